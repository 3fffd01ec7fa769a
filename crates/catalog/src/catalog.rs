use serde::{Deserialize, Serialize};

use crate::{
    Certificates, Deployments, Namespaces, Nodes, Repositories, Routers, Users, Volume, Volumes,
    ORBIT_SYSTEM_NAMESPACE,
};

/// The all-encompassing replicated state of the cluster.
///
/// Owned exclusively by the finite state machine; every mutation flows
/// through an applied command, and reads copy out under the read lock.
/// Snapshots serialise this value as a single JSON document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub namespaces: Namespaces,
    #[serde(default)]
    pub users: Users,
    #[serde(default)]
    pub nodes: Nodes,
    #[serde(default)]
    pub routers: Routers,
    #[serde(default)]
    pub certificates: Certificates,
    #[serde(default)]
    pub volumes: Volumes,
    #[serde(default)]
    pub repositories: Repositories,
    #[serde(default)]
    pub deployments: Deployments,

    /// Container-swarm join tokens, set once at bootstrap and replicated so
    /// any node can admit joiners.
    #[serde(default)]
    pub manager_join_token: String,
    #[serde(default)]
    pub worker_join_token: String,
}

impl Catalog {
    /// The volume the platform itself uses (repositories and the image
    /// registry), identified by living in the orbit-system namespace.
    pub fn orbit_system_volume(&self) -> Option<&Volume> {
        let namespace = self.namespaces.find(ORBIT_SYSTEM_NAMESPACE)?;
        self.volumes
            .iter()
            .find(|v| v.namespace_id == namespace.id)
    }

    /// Whether a join token is authorised: it must be non-empty and match
    /// one of the stored tokens.
    pub fn join_token_valid(&self, token: &str) -> bool {
        !token.is_empty()
            && (token == self.manager_join_token || token == self.worker_join_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Namespace, Volume};

    #[test]
    fn orbit_system_volume_resolves_through_the_namespace() {
        let mut catalog = Catalog::default();
        catalog.namespaces.0.push(Namespace {
            id: "ns-system".into(),
            name: ORBIT_SYSTEM_NAMESPACE.into(),
        });
        catalog.volumes.0.push(Volume {
            id: "vol1".into(),
            name: "repositories-and-registry".into(),
            namespace_id: "ns-system".into(),
            ..Volume::default()
        });

        assert_eq!(catalog.orbit_system_volume().unwrap().id, "vol1");
    }

    #[test]
    fn join_token_validation_rejects_empty_and_unknown_tokens() {
        let catalog = Catalog {
            manager_join_token: "manager-token".into(),
            worker_join_token: "worker-token".into(),
            ..Catalog::default()
        };

        assert!(catalog.join_token_valid("manager-token"));
        assert!(catalog.join_token_valid("worker-token"));
        assert!(!catalog.join_token_valid(""));
        assert!(!catalog.join_token_valid("stolen-token"));

        // A cluster that never set tokens accepts nothing, not everything.
        let blank = Catalog::default();
        assert!(!blank.join_token_valid(""));
    }

    #[test]
    fn empty_catalog_round_trips_through_json() {
        let catalog = Catalog::default();
        let encoded = serde_json::to_string(&catalog).unwrap();
        let decoded: Catalog = serde_json::from_str(&encoded).unwrap();
        assert_eq!(catalog, decoded);
    }
}
