//! Orbit RPC - the intra-node control channel
//!
//! A typed request/response transport, distinct from the raft transport,
//! used for cluster admission (join, confirm-join) and leader forwarding
//! (apply, forward-join). Domain failures are carried in the response
//! `status`; transport-level errors only surface for actual I/O problems.

mod client;

pub use client::{RpcClient, RpcError};

use serde::{Deserialize, Serialize};

/// Default RPC port.
pub const DEFAULT_RPC_PORT: u16 = 6501;

/// Outcome carried by every RPC response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "ERROR")]
    Error,
}

/// Sent by a joining node to a cluster member it wants to join through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub join_token: String,
}

/// The target's answer: the identity the joiner should assume and the
/// ports the target itself uses. `advertise_addr` is the peer address the
/// target observed on the connection, echoed back because it is the
/// address the joiner is reachable on from inside the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub status: Status,
    #[serde(default)]
    pub advertise_addr: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub raft_port: u16,
    #[serde(default)]
    pub serf_port: u16,
    #[serde(default)]
    pub wan_serf_port: u16,
}

/// Second phase of the join: the joiner's store is open and ready for raft
/// traffic at `raft_addr`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmJoinRequest {
    pub id: String,
    pub raft_addr: String,
    pub join_token: String,
}

/// A serialised command envelope forwarded to the leader for application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub body: Vec<u8>,
}

/// A voter-add forwarded from a non-leader that received a confirm-join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardJoinRequest {
    pub node_id: String,
    pub address: String,
}

/// Plain status answer used by everything except `Join`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serialises_as_upper_case_words() {
        assert_eq!(serde_json::to_string(&Status::Ok).unwrap(), "\"OK\"");
        assert_eq!(
            serde_json::to_string(&Status::Unauthorized).unwrap(),
            "\"UNAUTHORIZED\""
        );
        assert_eq!(serde_json::to_string(&Status::Error).unwrap(), "\"ERROR\"");
    }

    #[test]
    fn join_response_round_trips() {
        let res = JoinResponse {
            status: Status::Ok,
            advertise_addr: "10.0.0.2".into(),
            id: "ab".repeat(32),
            raft_port: 6502,
            serf_port: 6503,
            wan_serf_port: 6504,
        };

        let encoded = serde_json::to_string(&res).unwrap();
        let decoded: JoinResponse = serde_json::from_str(&encoded).unwrap();
        assert_eq!(res, decoded);
    }

    #[test]
    fn apply_request_carries_raw_bytes() {
        let req = ApplyRequest {
            body: br#"{"op":21}"#.to_vec(),
        };
        let decoded: ApplyRequest =
            serde_json::from_str(&serde_json::to_string(&req).unwrap()).unwrap();
        assert_eq!(decoded.body, req.body);
    }
}
