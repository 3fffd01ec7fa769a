//! The admin API.
//!
//! Dual-bound to a UNIX socket (for on-host tooling and the console
//! service) and a TCP port. Every mutating endpoint translates directly
//! to a command envelope routed through the store; list endpoints copy
//! out of the catalogue under the read lock.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::oneshot;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use orbit_catalog::{
    Brick, Certificate, Deployment, Namespace, NodeRole, Repository, Router as CatalogRouter,
    UserConfig, Volume, NODE_FIELD_UNSET,
};
use orbit_store::Command;

use crate::config::Status;
use crate::engine::{BootstrapParams, Engine, EngineError, JoinParams};
use crate::{build, certificates, swarm};

/// Poll cadence while waiting for a forwarded apply to become visible in
/// the local catalogue.
const READBACK_POLL: Duration = Duration::from_millis(200);

type AppState = Arc<Engine>;

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let code = match &self {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Consensus(_) | EngineError::Io(_) | EngineError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (code, self.to_string()).into_response()
    }
}

fn consensus(e: orbit_store::StoreError) -> EngineError {
    EngineError::Consensus(e.to_string())
}

/// Bind the admin listeners (UNIX socket + TCP) and serve forever.
/// Returns once both listeners are up.
pub async fn start(engine: AppState) -> Result<(), EngineError> {
    let app = router(engine.clone());

    // TCP listener.
    let (started_tx, started_rx) = oneshot::channel();
    let (err_tx, err_rx) = oneshot::channel();
    let tcp_app = app.clone();
    let port = engine.api_port;
    tokio::spawn(async move {
        let listener = match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => listener,
            Err(e) => {
                let _ = err_tx.send(e);
                return;
            }
        };
        info!(port, "api listening");
        let _ = started_tx.send(());
        if let Err(e) = axum::serve(listener, tcp_app).await {
            let _ = err_tx.send(e);
        }
    });
    tokio::select! {
        _ = started_rx => {}
        err = err_rx => {
            let message = err
                .map(|e: std::io::Error| e.to_string())
                .unwrap_or_else(|_| "api server exited before starting".into());
            return Err(EngineError::Io(format!("could not start api server: {message}")));
        }
    }

    // UNIX socket listener, served by driving hyper per connection.
    let socket_path = engine.socket_path.clone();
    let _ = std::fs::remove_file(&socket_path);
    if let Some(parent) = socket_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match UnixListener::bind(&socket_path) {
        Ok(listener) => {
            info!(socket = %socket_path.display(), "api listening on socket");
            tokio::spawn(serve_unix(listener, app));
        }
        Err(e) => {
            warn!(socket = %socket_path.display(), "not listening for socket requests: {e}");
        }
    }

    Ok(())
}

async fn serve_unix(listener: UnixListener, app: Router) {
    loop {
        let Ok((stream, _addr)) = listener.accept().await else {
            continue;
        };
        let app = app.clone();

        tokio::spawn(async move {
            let socket = hyper_util::rt::TokioIo::new(stream);
            let service = hyper::service::service_fn(
                move |request: hyper::Request<hyper::body::Incoming>| {
                    app.clone().oneshot(request)
                },
            );

            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(socket, service)
                .await
            {
                debug!("socket connection error: {e}");
            }
        });
    }
}

pub fn router(engine: AppState) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/state", get(handle_state))
        .route("/ip", get(handle_ip))
        .route("/snapshot", get(handle_snapshot))
        .route("/cluster/tokens", get(handle_get_tokens))
        .route("/cluster/bootstrap", post(handle_cluster_bootstrap))
        .route("/cluster/join", post(handle_cluster_join))
        .route("/users", get(handle_list_users))
        .route("/user", post(handle_user_signup))
        .route("/user/login", post(handle_user_login))
        .route("/user/:id", get(handle_user_get).delete(handle_user_remove))
        .route("/user/:id/profile", get(handle_user_profile))
        .route("/user/:id/sessions/:token", delete(handle_session_revoke))
        .route("/nodes", get(handle_list_nodes))
        .route("/node/:id", get(handle_node_get).put(handle_node_update))
        .route("/node/:id/remove", post(handle_not_implemented))
        .route("/namespaces", get(handle_list_namespaces))
        .route("/namespace", post(handle_namespace_add))
        .route("/routers", get(handle_list_routers))
        .route("/router", post(handle_router_add))
        .route(
            "/router/:id",
            put(handle_router_update).delete(handle_router_remove),
        )
        .route("/certificates", get(handle_list_certificates))
        .route("/certificates/renew", post(handle_renew_certificates))
        .route("/certificate", post(handle_certificate_add))
        .route("/certificate/:id", delete(handle_certificate_remove))
        .route("/volumes", get(handle_list_volumes))
        .route("/volume", post(handle_volume_add))
        .route("/volume/:id", delete(handle_volume_remove))
        .route("/repositories", get(handle_list_repositories))
        .route("/repository", post(handle_repository_add))
        .route("/repository/:id/remove", post(handle_not_implemented))
        .route("/deployments", get(handle_list_deployments))
        .route("/deployment", post(handle_deployment_add))
        .route("/deployment/:id/build", post(handle_deployment_build))
        .route("/deployment/:id/remove", post(handle_not_implemented))
        .route("/service/:id/restart", post(handle_service_restart))
        .with_state(engine)
}

async fn handle_index() -> &'static str {
    "Welcome to the Orbit Engine API.\nAll systems are operational.\n"
}

async fn handle_state(State(engine): State<AppState>) -> Json<serde_json::Value> {
    let status = engine.status().await;
    Json(json!({
        "status": status,
        "status_string": status.to_string(),
    }))
}

/// Best guess at this machine's public IP, for the setup flow to suggest
/// an advertise address.
async fn handle_ip() -> Response {
    let body = match reqwest::get("https://api.ipify.org").await {
        Ok(res) => res.text().await.unwrap_or_default(),
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };

    match body.trim().parse::<std::net::IpAddr>() {
        Ok(ip) => Json(json!({ "ip": ip.to_string() })).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Cut a raft snapshot and return the catalogue it captured.
async fn handle_snapshot(State(engine): State<AppState>) -> Result<Response, EngineError> {
    let store = engine
        .store()
        .ok_or_else(|| EngineError::Conflict("the store is not open".into()))?;
    store.trigger_snapshot().await.map_err(consensus)?;

    let catalog = engine.catalog();
    let catalog = catalog.read().await;
    Ok(Json(catalog.clone()).into_response())
}

async fn handle_get_tokens(State(engine): State<AppState>) -> Json<serde_json::Value> {
    let catalog = engine.catalog();
    let catalog = catalog.read().await;
    Json(json!({
        "manager": catalog.manager_join_token,
        "worker": catalog.worker_join_token,
    }))
}

async fn handle_cluster_bootstrap(
    State(engine): State<AppState>,
    Json(params): Json<BootstrapParams>,
) -> Result<Response, EngineError> {
    let config = engine.bootstrap(params).await?;
    Ok(Json(config).into_response())
}

async fn handle_cluster_join(
    State(engine): State<AppState>,
    Json(params): Json<JoinParams>,
) -> Result<Response, EngineError> {
    let config = engine.join(params).await?;
    Ok(Json(config).into_response())
}

#[derive(Debug, Deserialize)]
struct SignupBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    profile: Vec<u8>,
}

async fn handle_user_signup(
    State(engine): State<AppState>,
    Json(body): Json<SignupBody>,
) -> Result<Response, EngineError> {
    let store = engine
        .store()
        .ok_or_else(|| EngineError::Conflict("the store is not open".into()))?;

    let user = {
        let catalog = engine.catalog();
        let catalog = catalog.read().await;
        catalog
            .users
            .generate(UserConfig {
                name: body.name,
                username: body.username,
                password: body.password,
                email: body.email,
                profile: body.profile,
            })
            .map_err(|e| match e {
                orbit_catalog::CatalogError::MissingFields => {
                    EngineError::Validation("you didn't supply all of the required fields".into())
                }
                orbit_catalog::CatalogError::UsernameTaken => {
                    EngineError::Conflict("sorry, that username is already taken".into())
                }
                orbit_catalog::CatalogError::EmailTaken => {
                    EngineError::Conflict("sorry, that email address is already taken".into())
                }
                other => EngineError::Internal(other.to_string()),
            })?
    };
    let id = user.id.clone();

    store
        .apply(&Command::new_user(user))
        .await
        .map_err(consensus)?;

    Ok((StatusCode::CREATED, id).into_response())
}

/// Sanitised user view: no password hash, no profile bytes, no tokens.
#[derive(Debug, Serialize)]
struct ApiUser {
    id: String,
    name: String,
    username: String,
    email: String,
}

async fn handle_list_users(State(engine): State<AppState>) -> Json<Vec<ApiUser>> {
    let catalog = engine.catalog();
    let catalog = catalog.read().await;

    let users = catalog
        .users
        .iter()
        .map(|u| ApiUser {
            id: u.id.clone(),
            name: u.name.clone(),
            username: u.username.clone(),
            email: u.email.clone(),
        })
        .collect();
    Json(users)
}

/// Look a user up by ID, username, email, or session token.
async fn handle_user_get(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiUser>, EngineError> {
    let catalog = engine.catalog();
    let catalog = catalog.read().await;

    let user = catalog
        .users
        .find(&id)
        .or_else(|| catalog.users.find_by_token(&id))
        .ok_or_else(|| {
            EngineError::NotFound("a user with those details could not be found".into())
        })?;

    Ok(Json(ApiUser {
        id: user.id.clone(),
        name: user.name.clone(),
        username: user.username.clone(),
        email: user.email.clone(),
    }))
}

async fn handle_user_profile(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, EngineError> {
    let catalog = engine.catalog();
    let catalog = catalog.read().await;

    let user = catalog.users.find(&id).ok_or_else(|| {
        EngineError::NotFound(format!("a user with the identifier '{id}' could not be found"))
    })?;

    if user.profile.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    Ok(user.profile.clone().into_response())
}

async fn handle_user_remove(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, EngineError> {
    let store = engine
        .store()
        .ok_or_else(|| EngineError::Conflict("the store is not open".into()))?;

    {
        let catalog = engine.catalog();
        let catalog = catalog.read().await;
        if catalog.users.find_by_id(&id).is_none() {
            return Err(EngineError::NotFound(
                "a user with that ID does not exist".into(),
            ));
        }
    }

    store
        .apply(&Command::remove_user(id))
        .await
        .map_err(consensus)?;
    Ok("the user has been removed".into_response())
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    #[serde(default)]
    identifier: String,
    #[serde(default)]
    password: String,
}

/// Password login. The session is applied through the store (possibly via
/// the leader), so the handler polls the local catalogue until the token
/// replicates back before answering.
async fn handle_user_login(
    State(engine): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<Response, EngineError> {
    let store = engine
        .store()
        .ok_or_else(|| EngineError::Conflict("the store is not open".into()))?;

    let (user_id, session) = {
        let catalog = engine.catalog();
        let catalog = catalog.read().await;

        let user = catalog
            .users
            .iter()
            .find(|u| u.username == body.identifier || u.email == body.identifier)
            .ok_or_else(|| EngineError::NotFound("that user doesn't exist".into()))?;

        if !user.validate_password(&body.password) {
            return Err(EngineError::Unauthorized(
                "the password you provided is incorrect".into(),
            ));
        }
        (user.id.clone(), user.generate_session())
    };

    store
        .apply(&Command::new_session(user_id, session.clone()))
        .await
        .map_err(consensus)?;

    // Leader-forwarded applies give no read-your-writes; wait until the
    // session is visible locally.
    loop {
        {
            let catalog = engine.catalog();
            let catalog = catalog.read().await;
            if catalog.users.find_by_token(&session.token).is_some() {
                break;
            }
        }
        tokio::time::sleep(READBACK_POLL).await;
    }

    Ok(session.token.into_response())
}

async fn handle_session_revoke(
    State(engine): State<AppState>,
    Path((id, token)): Path<(String, String)>,
) -> Result<Response, EngineError> {
    let store = engine
        .store()
        .ok_or_else(|| EngineError::Conflict("the store is not open".into()))?;

    let user_id = {
        let catalog = engine.catalog();
        let catalog = catalog.read().await;
        catalog
            .users
            .find(&id)
            .map(|u| u.id.clone())
            .ok_or_else(|| EngineError::NotFound("that user doesn't exist".into()))?
    };

    let cmd = if token == "all" {
        Command::revoke_all_sessions(user_id)
    } else {
        Command::revoke_session(token)
    };
    store.apply(&cmd).await.map_err(consensus)?;

    Ok("session(s) revoked".into_response())
}

#[derive(Debug, Serialize)]
struct ApiNode {
    id: String,
    address: String,
    rpc_port: u16,
    raft_port: u16,
    serf_port: u16,
    wan_serf_port: u16,
    node_roles: Vec<NodeRole>,
    swap_size: i64,
    swappiness: i64,
    state: &'static str,
}

/// List nodes, annotated with each node's consensus role as seen by the
/// local raft membership.
async fn handle_list_nodes(State(engine): State<AppState>) -> Result<Response, EngineError> {
    if engine.status().await < Status::Ready {
        return Ok(Json(Vec::<ApiNode>::new()).into_response());
    }
    let store = engine
        .store()
        .ok_or_else(|| EngineError::Conflict("the store is not open".into()))?;

    let metrics = store.raft().metrics().borrow().clone();
    let membership = metrics.membership_config.membership().clone();
    let leader_id = metrics.current_leader;

    let catalog = engine.catalog();
    let catalog = catalog.read().await;

    let nodes = catalog
        .nodes
        .iter()
        .map(|n| {
            let raft_id = orbit_store::raft_node_id(&n.id);
            let state = if membership.get_node(&raft_id).is_none() {
                "worker"
            } else if leader_id == Some(raft_id) {
                "leader"
            } else {
                "manager"
            };

            ApiNode {
                id: n.id.clone(),
                address: n.address.to_string(),
                rpc_port: n.rpc_port,
                raft_port: n.raft_port,
                serf_port: n.serf_port,
                wan_serf_port: n.wan_serf_port,
                node_roles: n.roles.clone(),
                swap_size: n.swap_size,
                swappiness: n.swappiness,
                state,
            }
        })
        .collect::<Vec<_>>();

    Ok(Json(nodes).into_response())
}

async fn handle_node_get(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, EngineError> {
    let id = resolve_current(&engine, id).await;

    let catalog = engine.catalog();
    let catalog = catalog.read().await;
    let node = catalog
        .nodes
        .find_by_id(&id)
        .ok_or_else(|| EngineError::NotFound("could not find a node with that ID".into()))?;

    Ok(Json(node.clone()).into_response())
}

/// "current" is shorthand for the node answering the request.
async fn resolve_current(engine: &AppState, id: String) -> String {
    if id == "current" {
        if let Some(store) = engine.store() {
            return store.id.clone();
        }
    }
    id
}

#[derive(Debug, Deserialize)]
struct NodeUpdateBody {
    #[serde(default)]
    node_roles: Vec<NodeRole>,
    #[serde(default = "unset_field")]
    swap_size: i64,
    #[serde(default = "unset_field")]
    swappiness: i64,
}

fn unset_field() -> i64 {
    NODE_FIELD_UNSET
}

/// Update a node's roles and swap tuning. Assigning a manager or worker
/// role is also the final step of the join flow, promoting the engine to
/// Running.
async fn handle_node_update(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<NodeUpdateBody>,
) -> Result<Response, EngineError> {
    let store = engine
        .store()
        .ok_or_else(|| EngineError::Conflict("the store is not open".into()))?;
    let id = resolve_current(&engine, id).await;

    let node = {
        let catalog = engine.catalog();
        let catalog = catalog.read().await;
        let mut node = catalog
            .nodes
            .find_by_id(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound("could not find a node with that ID".into()))?;
        node.roles = body.node_roles.clone();
        node.swap_size = body.swap_size;
        node.swappiness = body.swappiness;
        node
    };

    let promotes = node.has_role(NodeRole::Manager) || node.has_role(NodeRole::Worker);
    store
        .apply(&Command::update_node(node))
        .await
        .map_err(consensus)?;

    if promotes && engine.status().await != Status::Running {
        engine.set_status(Status::Running).await?;
    }

    Ok(format!("successfully updated the node with id {id}").into_response())
}

async fn handle_list_namespaces(State(engine): State<AppState>) -> Json<Vec<Namespace>> {
    let catalog = engine.catalog();
    let catalog = catalog.read().await;
    Json(catalog.namespaces.iter().cloned().collect())
}

#[derive(Debug, Deserialize)]
struct NamespaceBody {
    #[serde(default)]
    name: String,
}

async fn handle_namespace_add(
    State(engine): State<AppState>,
    Json(body): Json<NamespaceBody>,
) -> Result<Response, EngineError> {
    let store = engine
        .store()
        .ok_or_else(|| EngineError::Conflict("the store is not open".into()))?;

    if body.name.is_empty() {
        return Err(EngineError::Validation("a namespace needs a name".into()));
    }

    let namespace = {
        let catalog = engine.catalog();
        let catalog = catalog.read().await;
        if body.name == orbit_catalog::ORBIT_SYSTEM_NAMESPACE
            || catalog.namespaces.find(&body.name).is_some()
        {
            return Err(EngineError::Conflict(
                "that namespace name is already in use".into(),
            ));
        }
        Namespace {
            id: catalog.namespaces.generate_id(),
            name: body.name,
        }
    };
    let id = namespace.id.clone();

    store
        .apply(&Command::new_namespace(namespace))
        .await
        .map_err(consensus)?;
    Ok((StatusCode::CREATED, id).into_response())
}

async fn handle_list_routers(State(engine): State<AppState>) -> Json<Vec<CatalogRouter>> {
    let catalog = engine.catalog();
    let catalog = catalog.read().await;
    Json(catalog.routers.iter().cloned().collect())
}

#[derive(Debug, Deserialize)]
struct RouterAddBody {
    #[serde(default)]
    domain: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    app_id: String,
    #[serde(default)]
    www_redirect: bool,
}

async fn handle_router_add(
    State(engine): State<AppState>,
    Json(body): Json<RouterAddBody>,
) -> Result<Response, EngineError> {
    let store = engine
        .store()
        .ok_or_else(|| EngineError::Conflict("the store is not open".into()))?;

    let router = {
        let catalog = engine.catalog();
        let catalog = catalog.read().await;
        let namespace_id = catalog
            .namespaces
            .find(&body.namespace)
            .map(|n| n.id.clone())
            .unwrap_or_default();

        CatalogRouter {
            id: catalog.routers.generate_id(),
            domain: body.domain,
            certificate_id: String::new(),
            namespace_id,
            app_id: body.app_id,
            www_redirect: body.www_redirect,
        }
    };
    let id = router.id.clone();

    store
        .apply(&Command::new_router(router))
        .await
        .map_err(consensus)?;
    Ok((StatusCode::CREATED, id).into_response())
}

#[derive(Debug, Deserialize)]
struct RouterUpdateBody {
    #[serde(default)]
    certificate_id: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    app_id: String,
}

async fn handle_router_update(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RouterUpdateBody>,
) -> Result<Response, EngineError> {
    let store = engine
        .store()
        .ok_or_else(|| EngineError::Conflict("the store is not open".into()))?;

    let namespace_id = {
        let catalog = engine.catalog();
        let catalog = catalog.read().await;
        catalog
            .namespaces
            .find(&body.namespace)
            .map(|n| n.id.clone())
            .unwrap_or_default()
    };

    let cmd = Command::update_router(CatalogRouter {
        id,
        certificate_id: body.certificate_id,
        namespace_id,
        app_id: body.app_id,
        ..CatalogRouter::default()
    });
    store.apply(&cmd).await.map_err(consensus)?;

    Ok("successfully updated your router".into_response())
}

async fn handle_router_remove(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, EngineError> {
    let store = engine
        .store()
        .ok_or_else(|| EngineError::Conflict("the store is not open".into()))?;

    {
        let catalog = engine.catalog();
        let catalog = catalog.read().await;
        if catalog.routers.find_by_id(&id).is_none() {
            return Err(EngineError::NotFound(format!(
                "router with the ID of {id} could not be found"
            )));
        }
    }

    store
        .apply(&Command::remove_router(id.clone()))
        .await
        .map_err(consensus)?;
    Ok(id.into_response())
}

async fn handle_list_certificates(State(engine): State<AppState>) -> Json<Vec<Certificate>> {
    let catalog = engine.catalog();
    let catalog = catalog.read().await;
    Json(catalog.certificates.iter().cloned().collect())
}

#[derive(Debug, Deserialize)]
struct CertificateAddBody {
    #[serde(default)]
    auto_renew: bool,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    domains: Vec<String>,
    #[serde(default)]
    full_chain: Vec<u8>,
    #[serde(default)]
    private_key: Vec<u8>,
}

async fn handle_certificate_add(
    State(engine): State<AppState>,
    Json(body): Json<CertificateAddBody>,
) -> Result<Response, EngineError> {
    let store = engine
        .store()
        .ok_or_else(|| EngineError::Conflict("the store is not open".into()))?;

    // Either the material is uploaded now, or auto-renew will obtain it.
    if !body.auto_renew && (body.full_chain.is_empty() || body.private_key.is_empty()) {
        return Err(EngineError::Validation(
            "you must supply either auto renew or certificate data".into(),
        ));
    }

    let certificate = {
        let catalog = engine.catalog();
        let catalog = catalog.read().await;
        let namespace = catalog.namespaces.find(&body.namespace).ok_or_else(|| {
            EngineError::NotFound(format!(
                "no namespace with the name or ID {} could be found",
                body.namespace
            ))
        })?;

        Certificate {
            id: catalog.certificates.generate_id(),
            domains: body.domains,
            namespace_id: namespace.id.clone(),
            full_chain: body.full_chain,
            private_key: body.private_key,
            auto_renew: body.auto_renew,
            challenges: Vec::new(),
        }
    };
    let id = certificate.id.clone();

    store
        .apply(&Command::new_certificate(certificate))
        .await
        .map_err(consensus)?;
    Ok((StatusCode::CREATED, id).into_response())
}

async fn handle_certificate_remove(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, EngineError> {
    let store = engine
        .store()
        .ok_or_else(|| EngineError::Conflict("the store is not open".into()))?;

    {
        let catalog = engine.catalog();
        let catalog = catalog.read().await;
        if catalog.certificates.find_by_id(&id).is_none() {
            return Err(EngineError::NotFound(format!(
                "certificate with the ID of {id} could not be found"
            )));
        }
    }

    store
        .apply(&Command::remove_certificate(id.clone()))
        .await
        .map_err(consensus)?;
    Ok(id.into_response())
}

async fn handle_renew_certificates(
    State(engine): State<AppState>,
) -> Result<Response, EngineError> {
    certificates::renew_certificates(&engine).await?;
    Ok("certificate renewal pass finished".into_response())
}

async fn handle_list_volumes(State(engine): State<AppState>) -> Json<Vec<Volume>> {
    let catalog = engine.catalog();
    let catalog = catalog.read().await;
    Json(catalog.volumes.iter().cloned().collect())
}

#[derive(Debug, Deserialize)]
struct VolumeAddBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: u64,
    /// Node IDs or addresses hosting a brick each.
    #[serde(default)]
    bricks: Vec<String>,
    #[serde(default)]
    namespace: String,
}

async fn handle_volume_add(
    State(engine): State<AppState>,
    Json(body): Json<VolumeAddBody>,
) -> Result<Response, EngineError> {
    let store = engine
        .store()
        .ok_or_else(|| EngineError::Conflict("the store is not open".into()))?;

    let volume = {
        let catalog = engine.catalog();
        let catalog = catalog.read().await;

        let mut bricks = Vec::new();
        for wanted in &body.bricks {
            let node = catalog
                .nodes
                .iter()
                .find(|n| n.id == *wanted || n.address.to_string() == *wanted);
            if let Some(node) = node {
                bricks.push(Brick {
                    node_id: node.id.clone(),
                    created: false,
                });
            }
        }
        if bricks.len() != body.bricks.len() {
            return Err(EngineError::Validation(
                "one of the bricks you provided doesn't exist".into(),
            ));
        }

        let namespace = catalog.namespaces.find(&body.namespace).ok_or_else(|| {
            EngineError::NotFound(format!(
                "no namespace with the name or ID {} could be found",
                body.namespace
            ))
        })?;

        Volume {
            id: String::new(),
            name: body.name,
            size: body.size,
            namespace_id: namespace.id.clone(),
            bricks,
        }
    };

    // Blocks until every brick node has converged, then assembles the
    // distributed volume (one node does this for the whole cluster).
    let volume = store.add_volume(volume).await.map_err(consensus)?;
    engine.assemble_volume(&volume).await?;

    Ok((StatusCode::CREATED, Json(volume)).into_response())
}

async fn handle_volume_remove(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, EngineError> {
    let store = engine
        .store()
        .ok_or_else(|| EngineError::Conflict("the store is not open".into()))?;

    let volume_id = {
        let catalog = engine.catalog();
        let catalog = catalog.read().await;
        catalog
            .volumes
            .find(&id)
            .map(|v| v.id.clone())
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "a volume with the name or ID '{id}' does not exist"
                ))
            })?
    };

    store
        .apply(&Command::remove_volume(volume_id.clone()))
        .await
        .map_err(consensus)?;

    // Stop and delete the distributed volume; each node's watcher tears
    // down its local directories as it observes the removal.
    if let Err(e) = crate::dfs::stop_volume(&volume_id).await {
        warn!(volume = %volume_id, "could not stop volume: {e}");
    }
    if let Err(e) = crate::dfs::delete_volume(&volume_id).await {
        warn!(volume = %volume_id, "could not delete volume: {e}");
    }

    Ok(volume_id.into_response())
}

async fn handle_list_repositories(State(engine): State<AppState>) -> Json<Vec<Repository>> {
    let catalog = engine.catalog();
    let catalog = catalog.read().await;
    Json(catalog.repositories.iter().cloned().collect())
}

#[derive(Debug, Deserialize)]
struct RepositoryAddBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: String,
}

async fn handle_repository_add(
    State(engine): State<AppState>,
    Json(body): Json<RepositoryAddBody>,
) -> Result<Response, EngineError> {
    let store = engine
        .store()
        .ok_or_else(|| EngineError::Conflict("the store is not open".into()))?;

    let (repository, repo_dir) = {
        let catalog = engine.catalog();
        let catalog = catalog.read().await;

        let volume = catalog.orbit_system_volume().ok_or_else(|| {
            EngineError::Conflict(
                "the orbit system volume is not ready for use; please complete the set up process"
                    .into(),
            )
        })?;

        let namespace_id = catalog
            .namespaces
            .find(&body.namespace)
            .map(|n| n.id.clone())
            .unwrap_or_default();

        let repository = Repository {
            id: catalog.repositories.generate_id(),
            name: body.name,
            namespace_id,
        };
        let dir = build::repository_dir(
            &volume.paths_under(&engine.volume_root).data,
            &repository.id,
        );
        (repository, dir)
    };
    let id = repository.id.clone();

    store
        .apply(&Command::new_repository(repository.clone()))
        .await
        .map_err(consensus)?;

    // Lay down the bare repository directory on the system volume.
    if let Err(e) = std::fs::create_dir_all(&repo_dir) {
        warn!(repository = %id, "could not create repository directory: {e}");
    }

    Ok((StatusCode::CREATED, Json(repository)).into_response())
}

async fn handle_list_deployments(State(engine): State<AppState>) -> Json<Vec<Deployment>> {
    let catalog = engine.catalog();
    let catalog = catalog.read().await;
    Json(catalog.deployments.iter().cloned().collect())
}

#[derive(Debug, Deserialize)]
struct DeploymentAddBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    repository_id: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    branch: String,
    #[serde(default)]
    namespace: String,
}

async fn handle_deployment_add(
    State(engine): State<AppState>,
    Json(body): Json<DeploymentAddBody>,
) -> Result<Response, EngineError> {
    let store = engine
        .store()
        .ok_or_else(|| EngineError::Conflict("the store is not open".into()))?;

    if body.repository_id.is_empty() || body.name.is_empty() {
        return Err(EngineError::Validation(
            "need to provide a repository_id and name".into(),
        ));
    }

    let deployment = {
        let catalog = engine.catalog();
        let catalog = catalog.read().await;
        let namespace_id = catalog
            .namespaces
            .find(&body.namespace)
            .map(|n| n.id.clone())
            .unwrap_or_default();

        Deployment {
            id: catalog.deployments.generate_id(),
            name: body.name,
            repository_id: body.repository_id,
            branch: body.branch,
            path: body.path,
            build_logs: Default::default(),
            namespace_id,
        }
    };
    let id = deployment.id.clone();

    store
        .apply(&Command::new_deployment(deployment))
        .await
        .map_err(consensus)?;
    Ok((StatusCode::CREATED, id).into_response())
}

async fn handle_deployment_build(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, EngineError> {
    let deployment = {
        let catalog = engine.catalog();
        let catalog = catalog.read().await;
        catalog
            .deployments
            .find_by_id(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound("no deployment with that ID exists".into()))?
    };

    build::build_and_deploy(&engine, deployment).await?;
    Ok((StatusCode::CREATED, id).into_response())
}

async fn handle_service_restart(
    State(_engine): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, EngineError> {
    swarm::force_update_service(&id)
        .await
        .map_err(|e| EngineError::Io(format!("could not force update the {id} service: {e}")))?;
    Ok(format!("force updated the {id} service").into_response())
}

/// Removal semantics for nodes, repositories and deployments are not part
/// of the stable command schema yet.
async fn handle_not_implemented() -> StatusCode {
    StatusCode::NOT_IMPLEMENTED
}
