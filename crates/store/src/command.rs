//! The command envelope applied through the raft log.
//!
//! Opcodes are numeric and stable: they are the wire identifiers written
//! into every log entry and snapshot, so variants must never be renumbered.

use serde::{Deserialize, Serialize};

use orbit_catalog::{
    Brick, Certificate, Deployment, Namespace, Node, Repository, Router, Session, User, Volume,
};

/// Catalogue operation codes. Serialised as plain u16 so log entries stay
/// readable and the numbering survives refactors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
#[repr(u16)]
pub enum Op {
    NewUser = 1,
    RemoveUser = 2,
    NewSession = 3,
    RevokeSession = 4,
    RevokeAllSessions = 5,

    NewNode = 6,
    UpdateNode = 7,

    NewNamespace = 8,

    NewRouter = 9,
    UpdateRouter = 10,
    RemoveRouter = 11,

    NewCertificate = 12,
    UpdateCertificate = 13,
    RemoveCertificate = 14,

    NewRepository = 15,
    NewDeployment = 16,
    AppendBuildLog = 17,

    NewVolume = 18,
    RemoveVolume = 19,
    UpdateVolumeBrick = 20,

    SetJoinTokens = 21,
}

impl From<Op> for u16 {
    fn from(op: Op) -> u16 {
        op as u16
    }
}

impl TryFrom<u16> for Op {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        let op = match value {
            1 => Op::NewUser,
            2 => Op::RemoveUser,
            3 => Op::NewSession,
            4 => Op::RevokeSession,
            5 => Op::RevokeAllSessions,
            6 => Op::NewNode,
            7 => Op::UpdateNode,
            8 => Op::NewNamespace,
            9 => Op::NewRouter,
            10 => Op::UpdateRouter,
            11 => Op::RemoveRouter,
            12 => Op::NewCertificate,
            13 => Op::UpdateCertificate,
            14 => Op::RemoveCertificate,
            15 => Op::NewRepository,
            16 => Op::NewDeployment,
            17 => Op::AppendBuildLog,
            18 => Op::NewVolume,
            19 => Op::RemoveVolume,
            20 => Op::UpdateVolumeBrick,
            21 => Op::SetJoinTokens,
            other => return Err(format!("unknown opcode {other}")),
        };
        Ok(op)
    }
}

/// A catalogue mutation. Only the fields relevant to the opcode are
/// consulted; everything else stays off the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub op: Op,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<Router>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Certificate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<Deployment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Volume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brick: Option<Brick>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_join_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_join_token: Option<String>,
}

impl Command {
    pub fn new(op: Op) -> Self {
        Self {
            op,
            user: None,
            session: None,
            node: None,
            router: None,
            certificate: None,
            namespace: None,
            repository: None,
            deployment: None,
            volume: None,
            brick: None,
            manager_join_token: None,
            worker_join_token: None,
        }
    }

    pub fn new_user(user: User) -> Self {
        Self {
            user: Some(user),
            ..Self::new(Op::NewUser)
        }
    }

    pub fn remove_user(id: impl Into<String>) -> Self {
        Self {
            user: Some(User {
                id: id.into(),
                ..User::default()
            }),
            ..Self::new(Op::RemoveUser)
        }
    }

    pub fn new_session(user_id: impl Into<String>, session: Session) -> Self {
        Self {
            user: Some(User {
                id: user_id.into(),
                ..User::default()
            }),
            session: Some(session),
            ..Self::new(Op::NewSession)
        }
    }

    pub fn revoke_session(token: impl Into<String>) -> Self {
        Self {
            session: Some(Session {
                token: token.into(),
            }),
            ..Self::new(Op::RevokeSession)
        }
    }

    pub fn revoke_all_sessions(user_id: impl Into<String>) -> Self {
        Self {
            user: Some(User {
                id: user_id.into(),
                ..User::default()
            }),
            ..Self::new(Op::RevokeAllSessions)
        }
    }

    pub fn new_node(node: Node) -> Self {
        Self {
            node: Some(node),
            ..Self::new(Op::NewNode)
        }
    }

    pub fn update_node(node: Node) -> Self {
        Self {
            node: Some(node),
            ..Self::new(Op::UpdateNode)
        }
    }

    pub fn new_namespace(namespace: Namespace) -> Self {
        Self {
            namespace: Some(namespace),
            ..Self::new(Op::NewNamespace)
        }
    }

    pub fn new_router(router: Router) -> Self {
        Self {
            router: Some(router),
            ..Self::new(Op::NewRouter)
        }
    }

    pub fn update_router(router: Router) -> Self {
        Self {
            router: Some(router),
            ..Self::new(Op::UpdateRouter)
        }
    }

    pub fn remove_router(id: impl Into<String>) -> Self {
        Self {
            router: Some(Router {
                id: id.into(),
                ..Router::default()
            }),
            ..Self::new(Op::RemoveRouter)
        }
    }

    pub fn new_certificate(certificate: Certificate) -> Self {
        Self {
            certificate: Some(certificate),
            ..Self::new(Op::NewCertificate)
        }
    }

    pub fn update_certificate(certificate: Certificate) -> Self {
        Self {
            certificate: Some(certificate),
            ..Self::new(Op::UpdateCertificate)
        }
    }

    pub fn remove_certificate(id: impl Into<String>) -> Self {
        Self {
            certificate: Some(Certificate {
                id: id.into(),
                ..Certificate::default()
            }),
            ..Self::new(Op::RemoveCertificate)
        }
    }

    pub fn new_repository(repository: Repository) -> Self {
        Self {
            repository: Some(repository),
            ..Self::new(Op::NewRepository)
        }
    }

    pub fn new_deployment(deployment: Deployment) -> Self {
        Self {
            deployment: Some(deployment),
            ..Self::new(Op::NewDeployment)
        }
    }

    pub fn append_build_log(deployment: Deployment) -> Self {
        Self {
            deployment: Some(deployment),
            ..Self::new(Op::AppendBuildLog)
        }
    }

    pub fn new_volume(volume: Volume) -> Self {
        Self {
            volume: Some(volume),
            ..Self::new(Op::NewVolume)
        }
    }

    pub fn remove_volume(id: impl Into<String>) -> Self {
        Self {
            volume: Some(Volume {
                id: id.into(),
                ..Volume::default()
            }),
            ..Self::new(Op::RemoveVolume)
        }
    }

    pub fn update_volume_brick(volume_id: impl Into<String>, brick: Brick) -> Self {
        Self {
            volume: Some(Volume {
                id: volume_id.into(),
                ..Volume::default()
            }),
            brick: Some(brick),
            ..Self::new(Op::UpdateVolumeBrick)
        }
    }

    pub fn set_join_tokens(manager: impl Into<String>, worker: impl Into<String>) -> Self {
        Self {
            manager_join_token: Some(manager.into()),
            worker_join_token: Some(worker.into()),
            ..Self::new(Op::SetJoinTokens)
        }
    }
}

/// Result of applying a command to the state machine. Apply never fails:
/// commands that target missing or duplicate IDs are skipped and logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandResponse {
    Applied,
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_serialize_as_numbers() {
        let cmd = Command::set_join_tokens("m", "w");
        let value = serde_json::to_value(&cmd).unwrap();

        assert_eq!(value["op"], 21);
        assert_eq!(value["manager_join_token"], "m");
        // Irrelevant payload fields stay off the wire entirely.
        assert!(value.get("user").is_none());
    }

    #[test]
    fn opcode_numbering_is_stable() {
        assert_eq!(u16::from(Op::NewUser), 1);
        assert_eq!(u16::from(Op::UpdateCertificate), 13);
        assert_eq!(u16::from(Op::SetJoinTokens), 21);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let err = serde_json::from_str::<Command>(r#"{"op":99}"#);
        assert!(err.is_err());
    }

    #[test]
    fn envelope_round_trips() {
        let cmd = Command::new_namespace(Namespace {
            id: "0011223344556677".into(),
            name: "production".into(),
        });

        let encoded = serde_json::to_vec(&cmd).unwrap();
        let decoded: Command = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(cmd, decoded);
    }
}
