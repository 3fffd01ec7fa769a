//! Raft transport: HTTP on the raft port.
//!
//! The client half posts serde-encoded openraft RPCs with reqwest; the
//! server half is an axum router the store binds on
//! `advertise_addr:raft_port`.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use openraft::error::{InstallSnapshotError, RPCError, RaftError, Unreachable};
use openraft::network::{RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use openraft::BasicNode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::typ::{NodeId, OrbitRaft, TypeConfig};

/// Peer connection pool size, shared across all raft RPCs to one node.
const MAX_POOL_CONNECTIONS: usize = 7;

/// Per-RPC timeout.
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request failed: {0}")]
    RequestFailed(String),
}

/// HTTP raft client for a single peer.
pub struct RaftHttpNetwork {
    target: BasicNode,
    client: reqwest::Client,
}

impl RaftHttpNetwork {
    pub fn new(target: BasicNode) -> Self {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .pool_max_idle_per_host(MAX_POOL_CONNECTIONS)
            .build()
            .unwrap_or_default();

        Self { target, client }
    }

    async fn send_rpc<Req, Resp>(&self, path: &str, req: &Req) -> Result<Resp, NetworkError>
    where
        Req: Serialize,
        Resp: for<'de> Deserialize<'de>,
    {
        let url = format!("http://{}{}", self.target.addr, path);

        let resp = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(NetworkError::RequestFailed(format!(
                "HTTP {}",
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| NetworkError::RequestFailed(e.to_string()))
    }
}

/// Network factory handed to openraft.
#[derive(Default)]
pub struct NetworkFactory;

impl NetworkFactory {
    pub fn new() -> Self {
        Self
    }
}

impl RaftNetworkFactory<TypeConfig> for NetworkFactory {
    type Network = RaftHttpNetwork;

    async fn new_client(&mut self, _target: NodeId, node: &BasicNode) -> Self::Network {
        debug!(?node, "creating raft network client");
        RaftHttpNetwork::new(node.clone())
    }
}

impl RaftNetwork<TypeConfig> for RaftHttpNetwork {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        _option: openraft::network::RPCOption,
    ) -> Result<AppendEntriesResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>>
    {
        trace!(target = %self.target.addr, "append_entries");

        self.send_rpc("/raft/append", &rpc)
            .await
            .map_err(|e| RPCError::Unreachable(Unreachable::new(&e)))
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        _option: openraft::network::RPCOption,
    ) -> Result<
        InstallSnapshotResponse<NodeId>,
        RPCError<NodeId, BasicNode, RaftError<NodeId, InstallSnapshotError>>,
    > {
        trace!(target = %self.target.addr, "install_snapshot");

        self.send_rpc("/raft/snapshot", &rpc)
            .await
            .map_err(|e| RPCError::Unreachable(Unreachable::new(&e)))
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<NodeId>,
        _option: openraft::network::RPCOption,
    ) -> Result<VoteResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        trace!(target = %self.target.addr, "vote");

        self.send_rpc("/raft/vote", &rpc)
            .await
            .map_err(|e| RPCError::Unreachable(Unreachable::new(&e)))
    }
}

/// Server-side raft routes, mounted on the raft listener.
pub fn raft_router(raft: OrbitRaft) -> Router {
    Router::new()
        .route("/raft/append", post(append))
        .route("/raft/snapshot", post(snapshot))
        .route("/raft/vote", post(vote))
        .with_state(raft)
}

fn internal(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

async fn append(
    State(raft): State<OrbitRaft>,
    Json(req): Json<AppendEntriesRequest<TypeConfig>>,
) -> Result<Json<AppendEntriesResponse<NodeId>>, (StatusCode, String)> {
    raft.append_entries(req).await.map(Json).map_err(internal)
}

async fn snapshot(
    State(raft): State<OrbitRaft>,
    Json(req): Json<InstallSnapshotRequest<TypeConfig>>,
) -> Result<Json<InstallSnapshotResponse<NodeId>>, (StatusCode, String)> {
    raft.install_snapshot(req).await.map(Json).map_err(internal)
}

async fn vote(
    State(raft): State<OrbitRaft>,
    Json(req): Json<VoteRequest<NodeId>>,
) -> Result<Json<VoteResponse<NodeId>>, (StatusCode, String)> {
    raft.vote(req).await.map(Json).map_err(internal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_constructs() {
        let _factory = NetworkFactory::new();
    }
}
