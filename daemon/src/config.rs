//! Engine configuration persisted at `<dataPath>/config.json`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

pub const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_RPC_PORT: u16 = 6501;
pub const DEFAULT_RAFT_PORT: u16 = 6502;
pub const DEFAULT_SERF_PORT: u16 = 6503;
pub const DEFAULT_WAN_SERF_PORT: u16 = 6504;

/// Engine lifecycle status. Monotonic: Init -> Setup -> Ready -> Running.
/// Persisted as its numeric value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Status {
    /// Before the config has been loaded. Never persisted: a stored 0 is
    /// rewritten to Setup on load.
    #[default]
    Init = 0,
    /// Config loaded, waiting for a bootstrap or join.
    Setup = 1,
    /// Member of a cluster; store open.
    Ready = 2,
    /// Fully operational (bootstrap finished, or a role was assigned).
    Running = 3,
}

impl From<Status> for u8 {
    fn from(status: Status) -> u8 {
        status as u8
    }
}

impl TryFrom<u8> for Status {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Status::Init),
            1 => Ok(Status::Setup),
            2 => Ok(Status::Ready),
            3 => Ok(Status::Running),
            other => Err(format!("unknown status {other}")),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Init => "init",
            Status::Setup => "setup",
            Status::Ready => "ready",
            Status::Running => "running",
        };
        f.write_str(name)
    }
}

/// The engine's durable identity and port layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub status: Status,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub advertise_addr: String,
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,
    #[serde(default = "default_raft_port")]
    pub raft_port: u16,
    #[serde(default = "default_serf_port")]
    pub serf_port: u16,
    #[serde(default = "default_wan_serf_port")]
    pub wan_serf_port: u16,
}

fn default_rpc_port() -> u16 {
    DEFAULT_RPC_PORT
}

fn default_raft_port() -> u16 {
    DEFAULT_RAFT_PORT
}

fn default_serf_port() -> u16 {
    DEFAULT_SERF_PORT
}

fn default_wan_serf_port() -> u16 {
    DEFAULT_WAN_SERF_PORT
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            status: Status::Setup,
            id: String::new(),
            advertise_addr: String::new(),
            rpc_port: DEFAULT_RPC_PORT,
            raft_port: DEFAULT_RAFT_PORT,
            serf_port: DEFAULT_SERF_PORT,
            wan_serf_port: DEFAULT_WAN_SERF_PORT,
        }
    }
}

impl EngineConfig {
    pub fn path(data_path: &Path) -> PathBuf {
        data_path.join(CONFIG_FILE)
    }

    /// Read the config, creating a default one if the file does not exist.
    ///
    /// Init is a status reserved for before the config has been loaded;
    /// now that it has been, a stored 0 becomes Setup. The config is
    /// written back after loading so the file stays normalised.
    pub fn load(data_path: &Path) -> Result<Self, std::io::Error> {
        let path = Self::path(data_path);

        if !path.exists() {
            info!(?path, "creating engine config");
            std::fs::create_dir_all(data_path)?;
            let config = Self::default();
            config.write(data_path)?;
            return Ok(config);
        }

        let data = std::fs::read(&path)?;
        let mut config: Self = serde_json::from_slice(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        if config.status == Status::Init {
            config.status = Status::Setup;
        }

        config.write(data_path)?;
        info!(?path, "imported engine config");
        Ok(config)
    }

    /// Durably write the config. Every status transition goes through here
    /// before the engine takes its next step.
    pub fn write(&self, data_path: &Path) -> Result<(), std::io::Error> {
        std::fs::create_dir_all(data_path)?;
        let path = Self::path(data_path);

        let mut data = serde_json::to_vec_pretty(self)?;
        data.push(b'\n');

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_creates_a_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(dir.path()).unwrap();

        assert_eq!(config.status, Status::Setup);
        assert_eq!(config.rpc_port, 6501);
        assert_eq!(config.raft_port, 6502);
        assert!(EngineConfig::path(dir.path()).exists());
    }

    #[test]
    fn round_trip_preserves_identity() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            status: Status::Running,
            id: "ab".repeat(32),
            advertise_addr: "10.0.0.1".into(),
            rpc_port: 7501,
            raft_port: 7502,
            serf_port: 7503,
            wan_serf_port: 7504,
        };
        config.write(dir.path()).unwrap();

        let loaded = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn stored_init_status_is_rewritten_to_setup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            EngineConfig::path(dir.path()),
            r#"{"status":0,"id":"","advertise_addr":""}"#,
        )
        .unwrap();

        let config = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(config.status, Status::Setup);

        // And the normalised form was written back.
        let raw = std::fs::read_to_string(EngineConfig::path(dir.path())).unwrap();
        assert!(raw.contains("\"status\": 1"));
    }

    #[test]
    fn status_ordering_is_monotonic() {
        assert!(Status::Init < Status::Setup);
        assert!(Status::Setup < Status::Ready);
        assert!(Status::Ready < Status::Running);
    }

    #[test]
    fn status_serialises_numerically() {
        assert_eq!(serde_json::to_string(&Status::Running).unwrap(), "3");
        let decoded: Status = serde_json::from_str("2").unwrap();
        assert_eq!(decoded, Status::Ready);
    }
}
