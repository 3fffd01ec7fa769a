//! The replicated store: raft wiring, cluster membership, and the
//! leader-forwarded apply path.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use openraft::{BasicNode, ServerState};
use tokio::net::TcpListener;
use tracing::{info, warn};

use orbit_catalog::{Node, Volume};
use orbit_rpc::{RpcClient, Status};

use crate::command::Command;
use crate::error::StoreError;
use crate::fsm::{SharedCatalog, StateMachine};
use crate::log_store::LogStore;
use crate::network::{raft_router, NetworkFactory};
use crate::typ::{default_raft_config, raft_node_id, NodeId, OrbitRaft};

/// Interval between polls while waiting on replicated state.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How long leader discovery keeps retrying before giving up.
const LEADER_DISCOVERY_WINDOW: Duration = Duration::from_secs(20);

/// Inputs for opening the store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// The node's catalogue ID; generated (and reported back through
    /// [`Store::id`]) when empty.
    pub id: String,
    pub advertise_addr: Option<IpAddr>,
    pub rpc_port: u16,
    pub raft_port: u16,
    pub serf_port: u16,
    pub wan_serf_port: u16,
    pub data_path: PathBuf,
    pub retain_snapshot_count: usize,
    pub raft_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            id: String::new(),
            advertise_addr: None,
            rpc_port: 6501,
            raft_port: 6502,
            serf_port: 6503,
            wan_serf_port: 6504,
            data_path: PathBuf::from("/var/orbit"),
            retain_snapshot_count: 2,
            raft_timeout: Duration::from_secs(10),
        }
    }
}

/// A replicated state machine wrapper. All changes go through raft; reads
/// go through the shared catalogue's read lock.
pub struct Store {
    pub id: String,
    pub raft_id: NodeId,
    pub advertise_addr: IpAddr,
    pub rpc_port: u16,
    pub raft_port: u16,
    pub serf_port: u16,
    pub wan_serf_port: u16,
    pub raft_timeout: Duration,

    catalog: SharedCatalog,
    raft: OrbitRaft,
}

impl Store {
    /// Open the store: storage replay, raft instantiation, and the raft
    /// transport listener. Returns once the node is ready for raft
    /// traffic.
    pub async fn open(opts: StoreOptions, catalog: SharedCatalog) -> Result<Arc<Self>, StoreError> {
        let advertise_addr = opts.advertise_addr.ok_or(StoreError::InvalidAdvertiseAddr)?;

        // Generate a node identity if this is a fresh node. The caller
        // persists it to the engine config right after open.
        let id = if opts.id.is_empty() {
            let catalog = catalog.read().await;
            catalog.nodes.generate_id()
        } else {
            opts.id.clone()
        };
        let raft_id = raft_node_id(&id);

        let raft_dir = opts.data_path.join("raft");
        let log_store = LogStore::open(&raft_dir)?;
        let state_machine = StateMachine::open(
            catalog.clone(),
            raft_dir.join("snapshots"),
            opts.retain_snapshot_count,
        )
        .await?;

        let config = default_raft_config()
            .validate()
            .map_err(|e| StoreError::Raft(e.to_string()))?;

        let raft = OrbitRaft::new(
            raft_id,
            Arc::new(config),
            NetworkFactory::new(),
            log_store,
            state_machine,
        )
        .await
        .map_err(|e| StoreError::Raft(e.to_string()))?;

        // Raft transport listener.
        let raft_addr = SocketAddr::new(advertise_addr, opts.raft_port);
        let listener = TcpListener::bind(raft_addr)
            .await
            .map_err(|source| StoreError::Bind {
                addr: raft_addr.to_string(),
                source,
            })?;
        let router = raft_router(raft.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                warn!("raft listener stopped: {e}");
            }
        });

        info!(%raft_addr, id = %id, "store opened");

        Ok(Arc::new(Self {
            id,
            raft_id,
            advertise_addr,
            rpc_port: opts.rpc_port,
            raft_port: opts.raft_port,
            serf_port: opts.serf_port,
            wan_serf_port: opts.wan_serf_port,
            raft_timeout: opts.raft_timeout,
            catalog,
            raft,
        }))
    }

    pub fn catalog(&self) -> SharedCatalog {
        self.catalog.clone()
    }

    pub fn raft(&self) -> &OrbitRaft {
        &self.raft
    }

    /// This node's raft address as peers dial it.
    pub fn raft_addr(&self) -> String {
        format!("{}:{}", self.advertise_addr, self.raft_port)
    }

    /// The catalogue node entry describing this store instance. Used for
    /// the self-registration command during bootstrap and join.
    pub fn self_node(&self) -> Node {
        Node {
            id: self.id.clone(),
            address: self.advertise_addr,
            rpc_port: self.rpc_port,
            raft_port: self.raft_port,
            serf_port: self.serf_port,
            wan_serf_port: self.wan_serf_port,
            roles: Vec::new(),
            swap_size: 0,
            swappiness: 0,
        }
    }

    /// Install the single-voter configuration containing this node. The
    /// engine enforces that this only runs below Ready status.
    pub async fn bootstrap(&self) -> Result<(), StoreError> {
        let mut members = BTreeMap::new();
        members.insert(self.raft_id, BasicNode::new(self.raft_addr()));

        self.raft
            .initialize(members)
            .await
            .map_err(|e| StoreError::Raft(e.to_string()))
    }

    /// Block until this node is elected leader, or time out.
    pub async fn wait_for_leadership(&self, timeout: Duration) -> Result<(), StoreError> {
        self.raft
            .wait(Some(timeout))
            .state(ServerState::Leader, "leadership")
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Raft(e.to_string()))
    }

    pub async fn is_leader(&self) -> bool {
        self.raft.current_leader().await == Some(self.raft_id)
    }

    /// Add a node as a voter. Only the leader can change membership; a
    /// non-leader forwards the request to the current leader over the RPC
    /// channel.
    pub async fn join(&self, node_id: &str, raft_addr: SocketAddr) -> Result<(), StoreError> {
        info!(node = node_id, %raft_addr, "received join request");

        if !self.is_leader().await {
            let leader = self.leader_rpc_addr().await?;
            info!(%leader, "not the leader; forwarding join");

            let client = RpcClient::new(leader);
            let res = client.forward_join(node_id, raft_addr.to_string()).await?;
            if res.status != Status::Ok {
                return Err(StoreError::ForwardedJoin);
            }
            return Ok(());
        }

        let joining_id = raft_node_id(node_id);
        self.raft
            .add_learner(joining_id, BasicNode::new(raft_addr.to_string()), true)
            .await
            .map_err(|e| StoreError::Raft(e.to_string()))?;

        // Promote to voter alongside the existing membership.
        let metrics = self.raft.metrics().borrow().clone();
        let mut voters: std::collections::BTreeSet<NodeId> = metrics
            .membership_config
            .membership()
            .voter_ids()
            .collect();
        voters.insert(joining_id);

        self.raft
            .change_membership(voters, false)
            .await
            .map_err(|e| StoreError::Raft(e.to_string()))?;

        info!(node = node_id, %raft_addr, "node joined as voter");
        Ok(())
    }

    /// Apply a command: locally through raft when this node is the leader,
    /// otherwise forwarded to the leader's RPC endpoint.
    pub async fn apply(&self, cmd: &Command) -> Result<(), StoreError> {
        if self.is_leader().await {
            return self.apply_local(cmd).await;
        }

        let body = serde_json::to_vec(cmd)?;
        let leader = self.leader_rpc_addr().await?;
        info!(%leader, "forwarding apply to leader");

        let client = RpcClient::new(leader);
        let res = client.apply(body).await?;
        if res.status != Status::Ok {
            return Err(StoreError::ForwardedApply);
        }
        Ok(())
    }

    /// Apply on this node without forwarding; callers must hold
    /// leadership. The RPC server uses this for forwarded envelopes.
    pub async fn apply_local(&self, cmd: &Command) -> Result<(), StoreError> {
        match tokio::time::timeout(self.raft_timeout, self.raft.client_write(cmd.clone())).await {
            Err(_) => Err(StoreError::ApplyTimeout),
            Ok(Err(e)) => Err(StoreError::Raft(e.to_string())),
            Ok(Ok(_)) => Ok(()),
        }
    }

    /// Find the RPC endpoint of the current leader.
    ///
    /// The leader's raft address comes from the local raft; the catalogue
    /// maps it (address + raft port) to a node and its RPC port. Retries
    /// for the discovery window because the answer is transiently unknown
    /// during elections and while the node table replicates.
    pub async fn leader_rpc_addr(&self) -> Result<SocketAddr, StoreError> {
        let deadline = tokio::time::Instant::now() + LEADER_DISCOVERY_WINDOW;

        loop {
            if let Some(addr) = self.try_leader_rpc_addr().await {
                return Ok(addr);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(StoreError::NoLeader);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn try_leader_rpc_addr(&self) -> Option<SocketAddr> {
        let leader_id = self.raft.current_leader().await?;

        let metrics = self.raft.metrics().borrow().clone();
        let leader = metrics
            .membership_config
            .membership()
            .get_node(&leader_id)?
            .clone();
        let raft_addr: SocketAddr = leader.addr.parse().ok()?;

        let catalog = self.catalog.read().await;
        let node = catalog
            .nodes
            .find_by_raft_addr(raft_addr.ip(), raft_addr.port())?;
        Some(SocketAddr::new(node.address, node.rpc_port))
    }

    /// Ask raft to cut a snapshot now.
    pub async fn trigger_snapshot(&self) -> Result<(), StoreError> {
        self.raft
            .trigger()
            .snapshot()
            .await
            .map_err(|e| StoreError::Raft(e.to_string()))
    }

    /// High-level volume creation: generate the ID, apply the command, and
    /// block until every brick node has converged. The caller then issues
    /// the one-per-cluster DFS create/start calls.
    pub async fn add_volume(&self, mut volume: Volume) -> Result<Volume, StoreError> {
        if volume.id.is_empty() {
            let catalog = self.catalog.read().await;
            volume.id = catalog.volumes.generate_id();
        }

        self.apply(&Command::new_volume(volume.clone())).await?;
        wait_for_volume(&self.catalog, &volume.id).await;

        // Hand back the replicated view, which carries the created flags.
        let catalog = self.catalog.read().await;
        Ok(catalog
            .volumes
            .find_by_id(&volume.id)
            .cloned()
            .unwrap_or(volume))
    }

    /// Graceful raft shutdown.
    pub async fn shutdown(&self) {
        if let Err(e) = self.raft.shutdown().await {
            warn!("raft shutdown: {e}");
        }
    }
}

/// Wait until the volume exists in the local catalogue view and every one
/// of its bricks reports created. Polls on the watcher cadence; returns
/// only on success.
pub async fn wait_for_volume(catalog: &SharedCatalog, id: &str) {
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;

        let catalog = catalog.read().await;
        if let Some(volume) = catalog.volumes.find_by_id(id) {
            if volume.ready() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_catalog::{Brick, Catalog};
    use tokio::sync::RwLock;

    #[tokio::test]
    async fn wait_for_volume_returns_once_all_bricks_exist() {
        let catalog: SharedCatalog = Arc::new(RwLock::new(Catalog::default()));

        // Simulate the command apply and a remote node's watcher flipping
        // the brick flags while we wait.
        let writer = catalog.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            writer.write().await.volumes.0.push(Volume {
                id: "vol1".into(),
                bricks: vec![
                    Brick {
                        node_id: "n1".into(),
                        created: false,
                    },
                    Brick {
                        node_id: "n2".into(),
                        created: false,
                    },
                ],
                ..Volume::default()
            });

            tokio::time::sleep(Duration::from_millis(300)).await;
            let mut catalog = writer.write().await;
            for brick in &mut catalog.volumes.0[0].bricks {
                brick.created = true;
            }
        });

        tokio::time::timeout(Duration::from_secs(5), wait_for_volume(&catalog, "vol1"))
            .await
            .expect("wait_for_volume should return after bricks converge");

        assert!(catalog.read().await.volumes.find_by_id("vol1").unwrap().ready());
    }

    #[tokio::test]
    async fn open_without_advertise_addr_fails_fast() {
        let catalog: SharedCatalog = Arc::new(RwLock::new(Catalog::default()));
        let opts = StoreOptions {
            advertise_addr: None,
            ..StoreOptions::default()
        };

        let err = Store::open(opts, catalog).await.err().unwrap();
        assert!(matches!(err, StoreError::InvalidAdvertiseAddr));
    }

    #[tokio::test]
    async fn open_generates_and_reports_a_node_id() {
        let dir = tempfile::tempdir().unwrap();
        let catalog: SharedCatalog = Arc::new(RwLock::new(Catalog::default()));
        let opts = StoreOptions {
            advertise_addr: Some("127.0.0.1".parse().unwrap()),
            raft_port: 0, // ephemeral, test only binds the listener
            data_path: dir.path().to_path_buf(),
            ..StoreOptions::default()
        };

        let store = Store::open(opts, catalog).await.unwrap();
        assert_eq!(store.id.len(), 64);
        assert_eq!(store.raft_id, raft_node_id(&store.id));
        store.shutdown().await;
    }
}
