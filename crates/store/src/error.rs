use thiserror::Error;

/// Store and consensus errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid advertise address")]
    InvalidAdvertiseAddr,

    #[error("could not open raft storage: {0}")]
    Storage(#[from] std::io::Error),

    #[error("could not bind raft listener on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("raft error: {0}")]
    Raft(String),

    #[error("apply timed out")]
    ApplyTimeout,

    #[error("could not determine leader")]
    NoLeader,

    #[error("forwarded apply failed on the leader")]
    ForwardedApply,

    #[error("forwarded join failed on the leader")]
    ForwardedJoin,

    #[error("rpc error: {0}")]
    Rpc(#[from] orbit_rpc::RpcError),

    #[error("could not encode command: {0}")]
    Encode(#[from] serde_json::Error),
}
