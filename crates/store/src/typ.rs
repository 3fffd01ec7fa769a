//! Type configuration for openraft 0.9+
//!
//! Uses declare_raft_types! with minimal configuration: only the
//! application data and response types are specified, everything else
//! (NodeId = u64, Node = BasicNode, SnapshotData = Cursor<Vec<u8>>,
//! AsyncRuntime = TokioRuntime) stays at the openraft defaults.

use std::io::Cursor;

use openraft::declare_raft_types;

use crate::command::{Command, CommandResponse};

/// Node ID type alias (matches the openraft default).
pub type NodeId = u64;

declare_raft_types!(
    pub TypeConfig:
        D = Command,
        R = CommandResponse
);

/// The concrete raft handle for this type configuration.
pub type OrbitRaft = openraft::Raft<TypeConfig>;

/// Derive the openraft node ID from a catalogue node ID.
///
/// Catalogue node IDs are 32 random bytes hex-encoded; openraft 0.9 node
/// IDs must be `Copy`, so the raft ID is the u64 parsed from the leading 16
/// hex digits. Collisions across a cluster's worth of 64-bit prefixes are
/// not a practical concern.
pub fn raft_node_id(id: &str) -> NodeId {
    let prefix: String = id.chars().take(16).collect();
    u64::from_str_radix(&prefix, 16).unwrap_or_default()
}

/// Raft configuration tuned for a small control-plane cluster.
pub fn default_raft_config() -> openraft::Config {
    openraft::Config {
        cluster_name: "orbit".to_string(),
        election_timeout_min: 150,
        election_timeout_max: 300,
        heartbeat_interval: 50,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raft_id_is_the_leading_sixty_four_bits() {
        let id = "00000000000000ff".to_string() + &"a".repeat(48);
        assert_eq!(raft_node_id(&id), 0xff);
    }

    #[test]
    fn raft_id_of_garbage_is_zero() {
        assert_eq!(raft_node_id(""), 0);
        assert_eq!(raft_node_id("not-hex"), 0);
    }

    #[test]
    fn config_is_valid() {
        default_raft_config().validate().unwrap();
    }
}
