//! Distributed-filesystem wrapper.
//!
//! Thin shell-outs to the GlusterFS CLI and the standard mount tooling.
//! Everything here is the capability set the reconciliation watcher and
//! the volume workflow need; no state lives in this module.

use std::path::Path;

use tokio::process::Command;
use tracing::{info, warn};

/// Run a command, mapping a non-zero exit into an io::Error.
async fn run(program: &str, args: &[&str]) -> Result<(), std::io::Error> {
    let status = Command::new(program).args(args).status().await?;
    if !status.success() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("{program} {} exited with {status}", args.join(" ")),
        ));
    }
    Ok(())
}

/// Probe a peer into the trusted storage pool. Fails if the peer is
/// already in another pool.
pub async fn peer_probe(ip: &str) -> Result<(), std::io::Error> {
    run("gluster", &["peer", "probe", ip]).await
}

/// Allocate a raw block file of `size` MiB at `path`.
pub async fn fallocate(path: &Path, size: u64) -> Result<(), std::io::Error> {
    let length = format!("{size}MiB");
    let path = path.to_string_lossy().into_owned();
    run("fallocate", &["--length", &length, &path]).await
}

/// Format a block file with the given filesystem.
pub async fn make_fs(filesystem: &str, path: &Path) -> Result<(), std::io::Error> {
    let bin = format!("mkfs.{}", filesystem.to_lowercase());
    let path = path.to_string_lossy().into_owned();
    run(&bin, &[&path]).await
}

/// The mounts currently present on this machine, as (source, target)
/// pairs read from /proc/mounts.
pub fn existing_mounts() -> Vec<(String, String)> {
    let Ok(data) = std::fs::read_to_string("/proc/mounts") else {
        return Vec::new();
    };

    data.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            Some((fields.next()?.to_string(), fields.next()?.to_string()))
        })
        .collect()
}

pub fn already_mounted(from: &str, to: &str) -> bool {
    existing_mounts()
        .iter()
        .any(|(f, t)| f == from && t == to)
}

/// Mount a source onto a target, skipping if the mount is already
/// present.
pub async fn mount(from: &Path, to: &Path) -> Result<(), std::io::Error> {
    let from = from.to_string_lossy().into_owned();
    let to = to.to_string_lossy().into_owned();
    if already_mounted(&from, &to) {
        return Ok(());
    }
    run("mount", &[&from, &to]).await
}

/// Mount a distributed volume from the given host onto a local path.
pub async fn mount_volume(ip: &str, volume: &str, to: &Path) -> Result<(), std::io::Error> {
    let from = format!("{ip}:/{volume}");
    let to = to.to_string_lossy().into_owned();
    if already_mounted(&from, &to) {
        return Ok(());
    }
    run("mount", &["-t", "glusterfs", &from, &to]).await
}

pub async fn unmount(path: &Path) -> Result<(), std::io::Error> {
    let path = path.to_string_lossy().into_owned();
    // Nothing mounted there is success for our purposes.
    if !existing_mounts().iter().any(|(_, t)| *t == path) {
        return Ok(());
    }
    run("umount", &[&path]).await
}

/// Create a distributed volume over the given `host:/brick-path` strings.
/// Replication kicks in once there is more than one brick.
pub async fn create_volume(id: &str, bricks: &[String]) -> Result<(), std::io::Error> {
    let mut args: Vec<String> = vec!["volume".into(), "create".into(), id.into()];

    if bricks.len() > 1 {
        args.push("replica".into());
        args.push(bricks.len().to_string());
    }
    args.extend(bricks.iter().cloned());

    let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
    info!(volume = id, "gluster {}", args.join(" "));
    run("gluster", &arg_refs).await
}

pub async fn start_volume(id: &str) -> Result<(), std::io::Error> {
    run("gluster", &["volume", "start", id]).await
}

pub async fn stop_volume(id: &str) -> Result<(), std::io::Error> {
    run("gluster", &["volume", "stop", id, "--mode=script"]).await
}

pub async fn delete_volume(id: &str) -> Result<(), std::io::Error> {
    run("gluster", &["volume", "delete", id, "--mode=script"]).await
}

/// Restart the DFS daemon so it picks up mounts made since it started.
/// The watcher runs this once after its first convergence pass.
pub async fn restart_daemon() {
    if let Err(e) = run("systemctl", &["restart", "glusterd"]).await {
        warn!("could not restart glusterd: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_mounted_is_false_for_nonsense_paths() {
        assert!(!already_mounted(
            "/nonexistent/source",
            "/nonexistent/target"
        ));
    }
}
