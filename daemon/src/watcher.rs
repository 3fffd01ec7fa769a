//! The reconciliation watcher.
//!
//! A per-node loop that drives local volume state (block files,
//! filesystems, mounts) to match the replicated catalogue, and reports
//! convergence back through the store. Errors are logged and retried on
//! the next tick; the catalogue stays the single source of truth.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use orbit_catalog::{Brick, Volume};
use orbit_store::{Command, Store};

use crate::dfs;

/// Loop cadence. Half a second keeps state updates responsive without
/// pinning a core.
const TICK: Duration = Duration::from_millis(500);

pub fn spawn(store: Arc<Store>, volume_root: PathBuf) -> JoinHandle<()> {
    let mut watcher = Watcher::new(store, volume_root);

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(TICK).await;
            watcher.tick().await;
        }
    })
}

pub struct Watcher {
    store: Arc<Store>,
    root: PathBuf,
    first_iteration: bool,
}

impl Watcher {
    pub fn new(store: Arc<Store>, root: PathBuf) -> Self {
        Self {
            store,
            root,
            first_iteration: true,
        }
    }

    pub async fn tick(&mut self) {
        self.cleanup_volumes().await;
        self.create_bricks().await;
        self.mount_raw().await;
        self.mount_volumes().await;

        if self.first_iteration {
            // Start-of-day: the DFS daemon may have started before our
            // mounts existed, so restart it once to pick them up.
            self.first_iteration = false;
            dfs::restart_daemon().await;
        }
    }

    /// Snapshot the volumes out of the catalogue so no lock is held
    /// across filesystem or subprocess work.
    async fn volumes(&self) -> Vec<Volume> {
        let catalog = self.store.catalog();
        let catalog = catalog.read().await;
        catalog.volumes.iter().cloned().collect()
    }

    /// Tear down local state for any volume directory the catalogue no
    /// longer knows: unmount the data and volume mounts and remove the
    /// whole container directory.
    async fn cleanup_volumes(&self) {
        let volumes = self.volumes().await;

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!("could not list volume root: {e}");
                return;
            }
        };

        for entry in entries.flatten() {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if volumes.iter().any(|v| v.id == name) {
                continue;
            }

            debug!(volume = %name, "removing orphaned volume directory");
            let orphan = Volume {
                id: name.clone(),
                ..Volume::default()
            };
            let paths = orphan.paths_under(&self.root);

            if let Err(e) = dfs::unmount(&paths.data).await {
                warn!(volume = %name, "could not unmount data path: {e}");
                continue;
            }
            if let Err(e) = dfs::unmount(&paths.volume).await {
                warn!(volume = %name, "could not unmount volume path: {e}");
                continue;
            }
            if let Err(e) = std::fs::remove_dir_all(&paths.container) {
                warn!(volume = %name, "could not remove volume directory: {e}");
            }
        }
    }

    /// Create the local brick for every volume that wants one on this
    /// node: allocate the raw block file, format it, mount it, and lay
    /// out the brick and data directories. Completion is reported through
    /// the store so the rest of the cluster can see the volume converge.
    async fn create_bricks(&self) {
        let node_id = self.store.id.clone();

        for volume in self.volumes().await {
            let needs_creation = volume
                .brick_for_node(&node_id)
                .map(|b| !b.created)
                .unwrap_or(false);
            if !needs_creation {
                continue;
            }

            if let Err(e) = self.create_brick(&volume).await {
                warn!(volume = %volume.id, "could not create brick: {e}");
                continue;
            }

            let cmd = Command::update_volume_brick(
                volume.id.clone(),
                Brick {
                    node_id: node_id.clone(),
                    created: true,
                },
            );
            if let Err(e) = self.store.apply(&cmd).await {
                warn!(volume = %volume.id, "could not report brick creation: {e}");
            }
        }
    }

    async fn create_brick(&self, volume: &Volume) -> Result<(), std::io::Error> {
        let paths = volume.paths_under(&self.root);
        debug!(volume = %volume.id, "creating brick");

        std::fs::create_dir_all(&paths.container)?;
        dfs::fallocate(&paths.raw, volume.size).await?;
        dfs::make_fs("xfs", &paths.raw).await?;

        std::fs::create_dir_all(&paths.volume)?;
        dfs::mount(&paths.raw, &paths.volume).await?;

        std::fs::create_dir_all(&paths.brick)?;
        std::fs::create_dir_all(&paths.data)?;
        Ok(())
    }

    /// Re-establish the raw file mount for every created local brick.
    /// Idempotent: mounts that already exist are left alone.
    async fn mount_raw(&self) {
        let node_id = self.store.id.clone();

        for volume in self.volumes().await {
            let created_here = volume
                .brick_for_node(&node_id)
                .map(|b| b.created)
                .unwrap_or(false);
            if !created_here {
                continue;
            }

            let paths = volume.paths_under(&self.root);
            if let Err(e) = dfs::mount(&paths.raw, &paths.volume).await {
                warn!(volume = %volume.id, "could not mount raw file: {e}");
            }
        }
    }

    /// Mount each assembled distributed volume onto its data path, using
    /// the first brick's node as the mount source.
    async fn mount_volumes(&self) {
        let catalog = self.store.catalog();

        for volume in self.volumes().await {
            let Some(first) = volume.bricks.first() else {
                continue;
            };

            let address = {
                let catalog = catalog.read().await;
                catalog
                    .nodes
                    .find_by_id(&first.node_id)
                    .map(|n| n.address.to_string())
            };
            let Some(address) = address else {
                continue;
            };

            let paths = volume.paths_under(&self.root);
            if let Err(e) = dfs::mount_volume(&address, &volume.id, &paths.data).await {
                debug!(volume = %volume.id, "could not mount volume: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_catalog::Catalog;
    use orbit_store::{Store, StoreOptions};

    #[tokio::test]
    async fn cleanup_removes_orphaned_volume_directories() {
        let data = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let catalog = Arc::new(tokio::sync::RwLock::new(Catalog::default()));

        let store = Store::open(
            StoreOptions {
                advertise_addr: Some("127.0.0.1".parse().unwrap()),
                raft_port: 0,
                data_path: data.path().to_path_buf(),
                ..StoreOptions::default()
            },
            catalog.clone(),
        )
        .await
        .unwrap();

        // A directory with no catalogue entry, and one the catalogue
        // still owns. Neither has live mounts, so cleanup is pure
        // filesystem work here.
        let orphan = root.path().join("deadbeef00000000");
        std::fs::create_dir_all(orphan.join("volume")).unwrap();

        catalog.write().await.volumes.0.push(Volume {
            id: "feedface00000000".into(),
            ..Volume::default()
        });
        let live = root.path().join("feedface00000000");
        std::fs::create_dir_all(&live).unwrap();

        let watcher = Watcher::new(store.clone(), root.path().to_path_buf());
        watcher.cleanup_volumes().await;

        assert!(!orphan.exists());
        assert!(live.exists());
        store.shutdown().await;
    }
}
