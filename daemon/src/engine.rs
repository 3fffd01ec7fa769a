//! The engine: cluster lifecycle orchestration.
//!
//! Owns the durable config, the shared catalogue, and (once the node is
//! part of a cluster) the replicated store. Bootstrap and join are the
//! two admin-triggered paths into Ready/Running; both hold the lifecycle
//! mutex so they can never race each other.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::info;

use orbit_catalog::{Brick, Catalog, Namespace, Volume, ORBIT_SYSTEM_NAMESPACE};
use orbit_rpc::{RpcClient, Status as RpcStatus};
use orbit_store::{Command, SharedCatalog, Store, StoreOptions};

use crate::config::{
    EngineConfig, Status, DEFAULT_RAFT_PORT, DEFAULT_RPC_PORT, DEFAULT_SERF_PORT,
    DEFAULT_WAN_SERF_PORT,
};
use crate::{dfs, rpc_server, swarm, watcher};

/// How long bootstrap waits for this node to win the initial election.
const LEADER_ELECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a joiner waits for the replicated join tokens to arrive.
const TOKEN_REPLICATION_WINDOW: Duration = Duration::from_secs(20);

/// Engine-level errors, classified so the API can map them onto response
/// codes.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("consensus failure: {0}")]
    Consensus(String),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Internal(String),
}

impl From<orbit_store::StoreError> for EngineError {
    fn from(e: orbit_store::StoreError) -> Self {
        EngineError::Consensus(e.to_string())
    }
}

/// Admin inputs for bootstrapping a cluster on this node.
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapParams {
    #[serde(default)]
    pub advertise_address: String,
    #[serde(default = "default_rpc")]
    pub rpc_port: u16,
    #[serde(default = "default_raft")]
    pub raft_port: u16,
    #[serde(default = "default_serf")]
    pub serf_port: u16,
    #[serde(default = "default_wan_serf")]
    pub wan_serf_port: u16,
}

/// Admin inputs for joining an existing cluster.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinParams {
    #[serde(default = "default_rpc")]
    pub rpc_port: u16,
    #[serde(default = "default_raft")]
    pub raft_port: u16,
    #[serde(default = "default_serf")]
    pub serf_port: u16,
    #[serde(default = "default_wan_serf")]
    pub wan_serf_port: u16,

    /// RPC address of the cluster member to join through.
    #[serde(default)]
    pub target_address: String,
    #[serde(default)]
    pub join_token: String,
}

fn default_rpc() -> u16 {
    DEFAULT_RPC_PORT
}

fn default_raft() -> u16 {
    DEFAULT_RAFT_PORT
}

fn default_serf() -> u16 {
    DEFAULT_SERF_PORT
}

fn default_wan_serf() -> u16 {
    DEFAULT_WAN_SERF_PORT
}

/// The primary all-encompassing daemon state.
pub struct Engine {
    pub data_path: PathBuf,
    pub socket_path: PathBuf,
    pub api_port: u16,
    /// Root under which per-volume directories live. Tests point this at a
    /// temp dir.
    pub volume_root: PathBuf,

    config: Mutex<EngineConfig>,
    catalog: SharedCatalog,
    store: OnceCell<Arc<Store>>,

    /// Held across bootstrap and join so concurrent admin requests cannot
    /// interleave cluster-lifecycle work.
    lifecycle: Mutex<()>,
}

impl Engine {
    pub fn new(
        data_path: PathBuf,
        socket_path: PathBuf,
        api_port: u16,
    ) -> Result<Arc<Self>, std::io::Error> {
        let config = EngineConfig::load(&data_path)?;

        Ok(Arc::new(Self {
            data_path,
            socket_path,
            api_port,
            volume_root: PathBuf::from(orbit_catalog::ROOT_VOLUME_DIR),
            config: Mutex::new(config),
            catalog: Arc::new(tokio::sync::RwLock::new(Catalog::default())),
            store: OnceCell::new(),
            lifecycle: Mutex::new(()),
        }))
    }

    pub fn catalog(&self) -> SharedCatalog {
        self.catalog.clone()
    }

    pub fn store(&self) -> Option<Arc<Store>> {
        self.store.get().cloned()
    }

    pub async fn config(&self) -> EngineConfig {
        self.config.lock().await.clone()
    }

    pub async fn status(&self) -> Status {
        self.config.lock().await.status
    }

    /// Persist a status transition before anything that depends on it
    /// runs.
    pub async fn set_status(&self, status: Status) -> Result<(), EngineError> {
        let mut config = self.config.lock().await;
        config.status = status;
        config
            .write(&self.data_path)
            .map_err(|e| EngineError::Io(format!("could not persist engine config: {e}")))?;
        info!(%status, "engine status");
        Ok(())
    }

    /// Bring up the long-running services appropriate for the persisted
    /// status. Called once at daemon start, after the admin API is bound.
    pub async fn start(self: Arc<Self>) -> Result<(), EngineError> {
        let config = self.config().await;

        if config.status >= Status::Ready {
            let advertise = config
                .advertise_addr
                .parse::<IpAddr>()
                .map_err(|_| EngineError::Validation("invalid stored advertise address".into()))?;
            self.open_store(config.clone(), advertise).await?;
            rpc_server::start(self.clone(), config.rpc_port).await?;
        }

        info!("engine started");
        Ok(())
    }

    /// Open the replicated store with the given identity, persist a
    /// freshly generated node ID, and hand off to the watcher.
    async fn open_store(
        &self,
        config: EngineConfig,
        advertise: IpAddr,
    ) -> Result<Arc<Store>, EngineError> {
        let opts = StoreOptions {
            id: config.id.clone(),
            advertise_addr: Some(advertise),
            rpc_port: config.rpc_port,
            raft_port: config.raft_port,
            serf_port: config.serf_port,
            wan_serf_port: config.wan_serf_port,
            data_path: self.data_path.clone(),
            ..StoreOptions::default()
        };

        let store = Store::open(opts, self.catalog.clone()).await?;

        // A fresh node got its identity inside open; keep it durable.
        if store.id != config.id {
            let mut config = self.config.lock().await;
            config.id = store.id.clone();
            config
                .write(&self.data_path)
                .map_err(|e| EngineError::Io(format!("could not persist node id: {e}")))?;
        }

        let store = self
            .store
            .get_or_init(|| async { store })
            .await
            .clone();

        watcher::spawn(store.clone(), self.volume_root.clone());
        Ok(store)
    }

    /// Bootstrap a brand new single-node cluster, then build the platform
    /// substrate on top of it: the system namespace, the container swarm
    /// and its join tokens, the overlay network, the system volume, the
    /// image registry, and the edge/console services.
    pub async fn bootstrap(self: Arc<Self>, params: BootstrapParams) -> Result<EngineConfig, EngineError> {
        let _guard = self.lifecycle.lock().await;

        if self.status().await >= Status::Ready {
            return Err(EngineError::Conflict(
                "this node already belongs to a cluster and cannot be bootstrapped again".into(),
            ));
        }

        let advertise: IpAddr = params.advertise_address.parse().map_err(|_| {
            EngineError::Validation(
                "the advertise address is not a valid IP address".into(),
            )
        })?;

        {
            let mut config = self.config.lock().await;
            config.advertise_addr = advertise.to_string();
            config.rpc_port = params.rpc_port;
            config.raft_port = params.raft_port;
            config.serf_port = params.serf_port;
            config.wan_serf_port = params.wan_serf_port;
            config
                .write(&self.data_path)
                .map_err(|e| EngineError::Io(e.to_string()))?;
        }

        let config = self.config().await;
        let store = self.open_store(config, advertise).await?;
        rpc_server::start(self.clone(), params.rpc_port).await?;

        store.bootstrap().await?;
        self.set_status(Status::Ready).await?;

        store
            .wait_for_leadership(LEADER_ELECTION_TIMEOUT)
            .await
            .map_err(|_| {
                EngineError::Consensus(
                    "there was an error establishing a leader for the cluster".into(),
                )
            })?;

        // Register ourselves and the system namespace.
        store.apply(&Command::new_node(store.self_node())).await?;

        let namespace_id = {
            let catalog = self.catalog.read().await;
            catalog.namespaces.generate_id()
        };
        store
            .apply(&Command::new_namespace(Namespace {
                id: namespace_id.clone(),
                name: ORBIT_SYSTEM_NAMESPACE.into(),
            }))
            .await?;

        // Swarm init; leaving a stale swarm first is allowed to fail.
        swarm::force_leave_swarm().await;
        swarm::swarm_init(advertise)
            .await
            .map_err(|e| EngineError::Io(format!("could not initialise container swarm: {e}")))?;

        let manager_token = swarm::swarm_token(true).await;
        let worker_token = swarm::swarm_token(false).await;
        store
            .apply(&Command::set_join_tokens(manager_token, worker_token))
            .await?;

        swarm::create_overlay_network(swarm::OVERLAY_NETWORK)
            .await
            .map_err(|e| EngineError::Io(format!("could not create overlay network: {e}")))?;

        // The system volume backs repositories and the image registry.
        // add_volume blocks until the watcher has converged the brick.
        let volume = store
            .add_volume(Volume {
                name: "repositories-and-registry".into(),
                size: 1024,
                namespace_id,
                bricks: vec![Brick {
                    node_id: store.id.clone(),
                    created: false,
                }],
                ..Volume::default()
            })
            .await?;
        self.assemble_volume(&volume).await?;

        let paths = volume.paths_under(&self.volume_root);
        swarm::deploy_registry(&paths.data, swarm::REGISTRY_PORT)
            .await
            .map_err(|e| EngineError::Io(format!("could not deploy image registry: {e}")))?;
        swarm::push(&["orbit/edge", "orbit/console"])
            .await
            .map_err(|e| EngineError::Io(format!("could not push platform images: {e}")))?;

        let socket = self.socket_path.to_string_lossy().to_string();
        let edge = swarm::Service {
            name: "edge".into(),
            tag: "orbit/edge".into(),
            publish: vec![
                swarm::Publish {
                    host: 443,
                    container: 443,
                },
                swarm::Publish {
                    host: 80,
                    container: 80,
                },
            ],
            mounts: vec![swarm::ServiceMount {
                source: socket.clone(),
                target: socket.clone(),
                mount_type: None,
            }],
            ..swarm::Service::default()
        };
        let console = swarm::Service {
            name: "console".into(),
            tag: "orbit/console".into(),
            publish: vec![swarm::Publish {
                host: 6500,
                container: 5000,
            }],
            mounts: vec![swarm::ServiceMount {
                source: socket.clone(),
                target: socket,
                mount_type: None,
            }],
            ..swarm::Service::default()
        };
        swarm::create_services(&[edge, console])
            .await
            .map_err(|e| EngineError::Io(format!("could not create platform services: {e}")))?;

        self.set_status(Status::Running).await?;
        Ok(self.config().await)
    }

    /// Issue the cluster-wide DFS volume creation for a converged volume.
    /// Runs on exactly one node (the one that created the volume).
    pub async fn assemble_volume(&self, volume: &Volume) -> Result<(), EngineError> {
        let self_id = self.store().map(|s| s.id.clone()).unwrap_or_default();
        let catalog = self.catalog.read().await;

        let mut bricks = Vec::new();
        let mut remote_peers = Vec::new();
        for brick in &volume.bricks {
            if let Some(node) = catalog.nodes.find_by_id(&brick.node_id) {
                let paths = volume.paths_under(&self.volume_root);
                bricks.push(format!("{}:{}", node.address, paths.brick.display()));
                if node.id != self_id {
                    remote_peers.push(node.address.to_string());
                }
            }
        }
        drop(catalog);

        // Remote brick hosts must be in the trusted pool before the
        // volume can span them.
        for peer in remote_peers {
            if let Err(e) = dfs::peer_probe(&peer).await {
                tracing::warn!(%peer, "could not probe peer: {e}");
            }
        }

        dfs::create_volume(&volume.id, &bricks)
            .await
            .map_err(|e| EngineError::Io(format!("could not create volume: {e}")))?;
        dfs::start_volume(&volume.id)
            .await
            .map_err(|e| EngineError::Io(format!("could not start volume: {e}")))?;
        Ok(())
    }

    /// Join this node to an existing cluster through a member's RPC
    /// endpoint.
    pub async fn join(self: Arc<Self>, params: JoinParams) -> Result<EngineConfig, EngineError> {
        let _guard = self.lifecycle.lock().await;

        if self.status().await >= Status::Ready {
            return Err(EngineError::Conflict(
                "this node is already part of a cluster".into(),
            ));
        }

        let target: SocketAddr = params.target_address.parse().map_err(|_| {
            EngineError::Validation("invalid TCP target address".into())
        })?;

        let client = RpcClient::new(target);
        let join_res = client
            .join(params.join_token.clone())
            .await
            .map_err(|e| EngineError::Io(format!("could not reach {target}: {e}")))?;
        match join_res.status {
            RpcStatus::Unauthorized => {
                return Err(EngineError::Unauthorized(
                    "that join token is not authorized".into(),
                ))
            }
            RpcStatus::Error => {
                return Err(EngineError::Internal(
                    "the target node refused the join request".into(),
                ))
            }
            RpcStatus::Ok => {}
        }

        // The target echoed the address it saw us from; that is what the
        // rest of the cluster will dial us on.
        let advertise: IpAddr = join_res.advertise_addr.parse().map_err(|_| {
            EngineError::Internal("the target returned an unusable advertise address".into())
        })?;

        {
            let mut config = self.config.lock().await;
            config.advertise_addr = advertise.to_string();
            config.id = join_res.id.clone();
            config.rpc_port = params.rpc_port;
            config.raft_port = params.raft_port;
            config.serf_port = params.serf_port;
            config.wan_serf_port = params.wan_serf_port;
            config
                .write(&self.data_path)
                .map_err(|e| EngineError::Io(e.to_string()))?;
        }

        let config = self.config().await;
        let store = self.open_store(config, advertise).await?;

        let raft_addr = format!("{advertise}:{}", params.raft_port);
        let confirm = client
            .confirm_join(store.id.clone(), raft_addr, params.join_token.clone())
            .await
            .map_err(|e| EngineError::Io(format!("could not confirm join: {e}")))?;
        match confirm.status {
            RpcStatus::Unauthorized => {
                return Err(EngineError::Unauthorized(
                    "that join token is no longer authorized".into(),
                ))
            }
            RpcStatus::Error => {
                return Err(EngineError::Internal(
                    "there was an error joining this node to the store".into(),
                ))
            }
            RpcStatus::Ok => {}
        }

        rpc_server::start(self.clone(), params.rpc_port).await?;

        store.apply(&Command::new_node(store.self_node())).await?;

        // Join the container swarm with the replicated manager token. The
        // token arrives with raft replication, so poll for it briefly.
        swarm::force_leave_swarm().await;
        let manager_token = self.wait_for_manager_token().await?;
        swarm::join_swarm(&target.ip().to_string(), &manager_token)
            .await
            .map_err(|e| EngineError::Io(format!("could not join container swarm: {e}")))?;

        self.set_status(Status::Ready).await?;
        Ok(self.config().await)
    }

    async fn wait_for_manager_token(&self) -> Result<String, EngineError> {
        let deadline = tokio::time::Instant::now() + TOKEN_REPLICATION_WINDOW;
        loop {
            {
                let catalog = self.catalog.read().await;
                if !catalog.manager_join_token.is_empty() {
                    return Ok(catalog.manager_join_token.clone());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::Consensus(
                    "join tokens never replicated to this node".into(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Orderly shutdown of the replicated store.
    pub async fn stop(&self) {
        info!("engine stopping");
        if let Some(store) = self.store() {
            store.shutdown().await;
        }
        info!("engine stopped");
    }
}
