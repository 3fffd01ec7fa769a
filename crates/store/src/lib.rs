//! Orbit Store - the replicated state machine
//!
//! Wraps openraft with the catalogue finite state machine, the numeric
//! command envelope, disk-backed log and snapshot storage, the HTTP raft
//! transport, and the leader-forwarding apply path. All changes to the
//! catalogue are made via Raft distributed consensus.

mod command;
mod error;
mod fsm;
mod log_store;
mod network;
mod store;
mod typ;

pub use command::{Command, CommandResponse, Op};
pub use error::StoreError;
pub use fsm::{apply_command, SharedCatalog, StateMachine};
pub use log_store::LogStore;
pub use network::{raft_router, NetworkFactory, RaftHttpNetwork};
pub use store::{wait_for_volume, Store, StoreOptions};
pub use typ::{raft_node_id, NodeId, OrbitRaft, TypeConfig};
