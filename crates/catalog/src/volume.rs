use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::id::unique_hex;

const VOLUME_ID_BYTES: usize = 8;

/// Root directory holding all local volume state, identical on every node.
pub const ROOT_VOLUME_DIR: &str = "/var/orbit/volumes";

/// A distributed block-storage volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    #[serde(default)]
    pub id: String,
    /// The short friendly name.
    #[serde(default)]
    pub name: String,
    /// Size in MiB, used to allocate the raw block file on each brick node.
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub namespace_id: String,
    #[serde(default)]
    pub bricks: Vec<Brick>,
}

/// One node's contribution to a volume. `created` is flipped by the owning
/// node once the local block file, filesystem and mounts exist, which tells
/// the cluster the volume may be assembled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Brick {
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub created: bool,
}

/// Absolute on-disk paths for a volume. Kept in one place so every part of
/// the watcher derives the same layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumePaths {
    /// The per-volume container directory.
    pub container: PathBuf,
    /// The raw block file to allocate.
    pub raw: PathBuf,
    /// Mountpoint for the raw block file. The distributed filesystem does
    /// not use the mount root directly; it uses the `brick` subdirectory.
    pub volume: PathBuf,
    /// Brick directory inside the volume mount.
    pub brick: PathBuf,
    /// Mountpoint for the assembled distributed volume.
    pub data: PathBuf,
}

impl Volume {
    /// Paths for this volume under [`ROOT_VOLUME_DIR`].
    pub fn paths(&self) -> VolumePaths {
        self.paths_under(Path::new(ROOT_VOLUME_DIR))
    }

    /// Paths for this volume under an arbitrary root. The watcher tests run
    /// against a temp root.
    pub fn paths_under(&self, root: &Path) -> VolumePaths {
        let container = root.join(&self.id);
        let volume = container.join("volume");

        VolumePaths {
            raw: container.join("raw"),
            brick: volume.join("brick"),
            data: container.join("data"),
            container,
            volume,
        }
    }

    /// A volume is ready once every brick reports created.
    pub fn ready(&self) -> bool {
        self.bricks.iter().all(|b| b.created)
    }

    pub fn brick_for_node(&self, node_id: &str) -> Option<&Brick> {
        self.bricks.iter().find(|b| b.node_id == node_id)
    }
}

/// The volumes collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volumes(pub Vec<Volume>);

impl Volumes {
    pub fn generate_id(&self) -> String {
        unique_hex(VOLUME_ID_BYTES, |id| self.0.iter().any(|v| v.id == id))
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Volume> {
        self.0.iter().find(|v| v.id == id)
    }

    /// Search a volume by ID or name.
    pub fn find(&self, id: &str) -> Option<&Volume> {
        self.0.iter().find(|v| v.id == id || v.name == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Volume> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_the_volume_layout() {
        let volume = Volume {
            id: "a1b2c3d4e5f60718".into(),
            ..Volume::default()
        };
        let paths = volume.paths();

        assert_eq!(
            paths.container,
            Path::new("/var/orbit/volumes/a1b2c3d4e5f60718")
        );
        assert_eq!(paths.raw, paths.container.join("raw"));
        assert_eq!(paths.volume, paths.container.join("volume"));
        assert_eq!(paths.brick, paths.container.join("volume/brick"));
        assert_eq!(paths.data, paths.container.join("data"));
    }

    #[test]
    fn ready_requires_every_brick() {
        let mut volume = Volume {
            bricks: vec![
                Brick {
                    node_id: "n1".into(),
                    created: true,
                },
                Brick {
                    node_id: "n2".into(),
                    created: false,
                },
            ],
            ..Volume::default()
        };

        assert!(!volume.ready());
        volume.bricks[1].created = true;
        assert!(volume.ready());
    }
}
