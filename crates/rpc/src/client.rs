use std::net::SocketAddr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::{
    ApplyRequest, ConfirmJoinRequest, ForwardJoinRequest, JoinRequest, JoinResponse,
    StatusResponse,
};

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("could not reach {addr}: {source}")]
    Transport {
        addr: SocketAddr,
        source: reqwest::Error,
    },

    #[error("rpc returned HTTP {0}")]
    Http(reqwest::StatusCode),

    #[error("could not decode rpc response: {0}")]
    Decode(reqwest::Error),
}

/// Client for one peer's RPC endpoint.
pub struct RpcClient {
    addr: SocketAddr,
    client: reqwest::Client,
}

impl RpcClient {
    pub fn new(addr: SocketAddr) -> Self {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self { addr, client }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn post<Req, Resp>(&self, path: &str, req: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let url = format!("http://{}{}", self.addr, path);

        let resp = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|source| RpcError::Transport {
                addr: self.addr,
                source,
            })?;

        if !resp.status().is_success() {
            return Err(RpcError::Http(resp.status()));
        }

        resp.json().await.map_err(RpcError::Decode)
    }

    /// Phase one of cluster admission.
    pub async fn join(&self, join_token: impl Into<String>) -> Result<JoinResponse, RpcError> {
        self.post(
            "/v1/join",
            &JoinRequest {
                join_token: join_token.into(),
            },
        )
        .await
    }

    /// Phase two: the joiner's raft listener is up at `raft_addr`.
    pub async fn confirm_join(
        &self,
        id: impl Into<String>,
        raft_addr: impl Into<String>,
        join_token: impl Into<String>,
    ) -> Result<StatusResponse, RpcError> {
        self.post(
            "/v1/confirm-join",
            &ConfirmJoinRequest {
                id: id.into(),
                raft_addr: raft_addr.into(),
                join_token: join_token.into(),
            },
        )
        .await
    }

    /// Forward a serialised command envelope to the leader.
    pub async fn apply(&self, body: Vec<u8>) -> Result<StatusResponse, RpcError> {
        self.post("/v1/apply", &ApplyRequest { body }).await
    }

    /// Forward a voter-add to the leader.
    pub async fn forward_join(
        &self,
        node_id: impl Into<String>,
        address: impl Into<String>,
    ) -> Result<StatusResponse, RpcError> {
        self.post(
            "/v1/forward-join",
            &ForwardJoinRequest {
                node_id: node_id.into(),
                address: address.into(),
            },
        )
        .await
    }
}
