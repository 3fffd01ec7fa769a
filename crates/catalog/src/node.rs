use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::id::unique_hex;

const NODE_ID_BYTES: usize = 32;

/// Sentinel for "leave unchanged" in node update commands. `0` is a valid
/// explicit value for both swap fields, so zero cannot double as the
/// sentinel.
pub const NODE_FIELD_UNSET: i64 = -1;

/// A machine attached to the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique 32-byte hex ID, generated by the node that admits this one.
    pub id: String,
    pub address: IpAddr,

    #[serde(default)]
    pub rpc_port: u16,
    #[serde(default)]
    pub raft_port: u16,
    #[serde(default)]
    pub serf_port: u16,
    #[serde(default)]
    pub wan_serf_port: u16,

    #[serde(default)]
    pub roles: Vec<NodeRole>,
    #[serde(default = "unset")]
    pub swap_size: i64,
    #[serde(default = "unset")]
    pub swappiness: i64,
}

fn unset() -> i64 {
    NODE_FIELD_UNSET
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeRole {
    Manager,
    Worker,
    LoadBalancer,
    Storage,
    Builder,
}

impl Node {
    pub fn has_role(&self, role: NodeRole) -> bool {
        self.roles.contains(&role)
    }

    /// Merge an update command into this node. Roles are always taken from
    /// the command; the swap fields only when they are not the `-1`
    /// sentinel (`0` is a real value).
    pub fn apply_update(&mut self, update: &Node) {
        self.roles = update.roles.clone();

        if update.swap_size != NODE_FIELD_UNSET {
            self.swap_size = update.swap_size;
        }
        if update.swappiness != NODE_FIELD_UNSET {
            self.swappiness = update.swappiness;
        }
    }
}

/// The nodes collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Nodes(pub Vec<Node>);

impl Nodes {
    pub fn generate_id(&self) -> String {
        unique_hex(NODE_ID_BYTES, |id| self.0.iter().any(|n| n.id == id))
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Node> {
        self.0.iter().find(|n| n.id == id)
    }

    /// Exactly one node exists per (address, raft port) pair, which makes
    /// this lookup unambiguous.
    pub fn find_by_raft_addr(&self, address: IpAddr, raft_port: u16) -> Option<&Node> {
        self.0
            .iter()
            .find(|n| n.address == address && n.raft_port == raft_port)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Node> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node {
            id: "aa".repeat(32),
            address: "10.0.0.1".parse().unwrap(),
            rpc_port: 6501,
            raft_port: 6502,
            serf_port: 6503,
            wan_serf_port: 6504,
            roles: vec![NodeRole::Manager],
            swap_size: 2048,
            swappiness: 60,
        }
    }

    #[test]
    fn update_sentinel_leaves_swap_fields_untouched() {
        let mut current = node();
        let update = Node {
            roles: vec![NodeRole::Worker, NodeRole::Storage],
            swap_size: NODE_FIELD_UNSET,
            swappiness: NODE_FIELD_UNSET,
            ..node()
        };

        current.apply_update(&update);

        assert_eq!(current.roles, vec![NodeRole::Worker, NodeRole::Storage]);
        assert_eq!(current.swap_size, 2048);
        assert_eq!(current.swappiness, 60);
    }

    #[test]
    fn update_zero_is_an_explicit_value() {
        let mut current = node();
        let update = Node {
            swap_size: 0,
            swappiness: 0,
            ..node()
        };

        current.apply_update(&update);

        assert_eq!(current.swap_size, 0);
        assert_eq!(current.swappiness, 0);
    }

    #[test]
    fn roles_are_always_overwritten() {
        let mut current = node();
        let update = Node {
            roles: Vec::new(),
            swap_size: NODE_FIELD_UNSET,
            swappiness: NODE_FIELD_UNSET,
            ..node()
        };

        current.apply_update(&update);
        assert!(current.roles.is_empty());
    }

    #[test]
    fn roles_serialize_screaming_snake_case() {
        let encoded = serde_json::to_string(&NodeRole::LoadBalancer).unwrap();
        assert_eq!(encoded, "\"LOAD_BALANCER\"");
    }

    #[test]
    fn find_by_raft_addr_matches_address_and_port() {
        let nodes = Nodes(vec![node()]);
        let addr: IpAddr = "10.0.0.1".parse().unwrap();

        assert!(nodes.find_by_raft_addr(addr, 6502).is_some());
        assert!(nodes.find_by_raft_addr(addr, 6503).is_none());
    }
}
