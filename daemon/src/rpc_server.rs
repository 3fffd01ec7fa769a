//! The intra-node RPC server.
//!
//! Serves cluster admission (join, confirm-join) and leader forwarding
//! (apply, forward-join) on the RPC port. Domain failures are reported in
//! the response status; transport errors never carry them.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::routing::post;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};

use orbit_rpc::{
    ApplyRequest, ConfirmJoinRequest, ForwardJoinRequest, JoinRequest, JoinResponse, Status,
    StatusResponse,
};
use orbit_store::Command;

use crate::config::Status as EngineStatus;
use crate::engine::{Engine, EngineError};

/// Bind the RPC listener and serve it for the life of the process.
/// Returns once the listener is up; a bind failure surfaces immediately
/// through the error channel race.
pub async fn start(engine: Arc<Engine>, port: u16) -> Result<(), EngineError> {
    let (started_tx, started_rx) = oneshot::channel();
    let (err_tx, err_rx) = oneshot::channel();

    tokio::spawn(run(engine, port, started_tx, err_tx));

    tokio::select! {
        _ = started_rx => Ok(()),
        err = err_rx => {
            let message = err
                .map(|e: std::io::Error| e.to_string())
                .unwrap_or_else(|_| "rpc server exited before starting".into());
            Err(EngineError::Io(format!("could not start rpc server: {message}")))
        }
    }
}

async fn run(
    engine: Arc<Engine>,
    port: u16,
    started: oneshot::Sender<()>,
    err: oneshot::Sender<std::io::Error>,
) {
    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            let _ = err.send(e);
            return;
        }
    };

    info!(port, "rpc server listening");
    let _ = started.send(());

    let app = router(engine).into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, app).await {
        let _ = err.send(e);
    }
}

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/v1/join", post(handle_join))
        .route("/v1/confirm-join", post(handle_confirm_join))
        .route("/v1/apply", post(handle_apply))
        .route("/v1/forward-join", post(handle_forward_join))
        .with_state(engine)
}

fn status_response(status: Status) -> Json<StatusResponse> {
    Json(StatusResponse { status })
}

/// Phase one of admission: validate the token, mint the joiner's
/// identity, and echo back the peer address we observed (that is the
/// address the joiner is reachable on from our side) plus our own port
/// layout.
async fn handle_join(
    State(engine): State<Arc<Engine>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(req): Json<JoinRequest>,
) -> Json<JoinResponse> {
    let reject = |status: Status| {
        Json(JoinResponse {
            status,
            advertise_addr: String::new(),
            id: String::new(),
            raft_port: 0,
            serf_port: 0,
            wan_serf_port: 0,
        })
    };

    // Only a fully running member can admit new nodes.
    if engine.status().await != EngineStatus::Running {
        warn!(%peer, "join rejected: engine is not running");
        return reject(Status::Error);
    }

    let catalog = engine.catalog();
    let catalog = catalog.read().await;
    if !catalog.join_token_valid(&req.join_token) {
        warn!(%peer, "join rejected: invalid join token");
        return reject(Status::Unauthorized);
    }
    let id = catalog.nodes.generate_id();
    drop(catalog);

    let Some(store) = engine.store() else {
        return reject(Status::Error);
    };

    info!(%peer, node = %id, "admitting joining node");
    Json(JoinResponse {
        status: Status::Ok,
        advertise_addr: peer.ip().to_string(),
        id,
        raft_port: store.raft_port,
        serf_port: store.serf_port,
        wan_serf_port: store.wan_serf_port,
    })
}

/// Phase two: the joiner's raft listener is live, add it as a voter. The
/// store forwards to the leader internally when this node is not it.
async fn handle_confirm_join(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<ConfirmJoinRequest>,
) -> Json<StatusResponse> {
    {
        let catalog = engine.catalog();
        let catalog = catalog.read().await;
        if !catalog.join_token_valid(&req.join_token) {
            return status_response(Status::Unauthorized);
        }
    }

    let Some(store) = engine.store() else {
        return status_response(Status::Error);
    };

    let Ok(raft_addr) = req.raft_addr.parse::<SocketAddr>() else {
        return status_response(Status::Error);
    };

    match store.join(&req.id, raft_addr).await {
        Ok(()) => status_response(Status::Ok),
        Err(e) => {
            warn!("confirm-join failed: {e}");
            status_response(Status::Error)
        }
    }
}

/// A follower forwarded a command envelope; apply it here. This endpoint
/// never forwards again, so a stale leader answers ERROR rather than
/// bouncing the envelope around the cluster.
async fn handle_apply(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<ApplyRequest>,
) -> Json<StatusResponse> {
    let Some(store) = engine.store() else {
        return status_response(Status::Error);
    };

    let Ok(cmd) = serde_json::from_slice::<Command>(&req.body) else {
        warn!("forwarded apply carried an undecodable envelope");
        return status_response(Status::Error);
    };

    if !store.is_leader().await {
        warn!("forwarded apply arrived at a non-leader");
        return status_response(Status::Error);
    }

    match store.apply_local(&cmd).await {
        Ok(()) => status_response(Status::Ok),
        Err(e) => {
            warn!("forwarded apply failed: {e}");
            status_response(Status::Error)
        }
    }
}

/// A non-leader received a confirm-join and forwarded the voter-add here.
async fn handle_forward_join(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<ForwardJoinRequest>,
) -> Json<StatusResponse> {
    let Some(store) = engine.store() else {
        return status_response(Status::Error);
    };

    if !store.is_leader().await {
        warn!("forwarded join arrived at a non-leader");
        return status_response(Status::Error);
    }

    let Ok(raft_addr) = req.address.parse::<SocketAddr>() else {
        return status_response(Status::Error);
    };

    match store.join(&req.node_id, raft_addr).await {
        Ok(()) => status_response(Status::Ok),
        Err(e) => {
            warn!("forwarded join failed: {e}");
            status_response(Status::Error)
        }
    }
}
