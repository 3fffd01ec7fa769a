//! Deployment builds.
//!
//! Checks a repository out of the system volume, builds its image with
//! the container runtime, and streams the build output into the
//! deployment's replicated build log (flushed through the store every
//! couple of seconds, keyed by commit hash and path).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command as ProcessCommand;
use tracing::info;

use orbit_catalog::Deployment;
use orbit_store::{Command, Store};

use crate::engine::{Engine, EngineError};
use crate::swarm;

/// How often buffered build-log lines are flushed into the store.
const LOG_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

/// Build a deployment's image, push it to the registry, and (re)create
/// its service. Returns the build-log key for this run.
pub async fn build_and_deploy(
    engine: &Arc<Engine>,
    deployment: Deployment,
) -> Result<String, EngineError> {
    let store = engine
        .store()
        .ok_or_else(|| EngineError::Conflict("the store is not open".into()))?;

    let repo_path = {
        let catalog = engine.catalog();
        let catalog = catalog.read().await;

        let repository = catalog
            .repositories
            .find_by_id(&deployment.repository_id)
            .ok_or_else(|| EngineError::NotFound("that repository does not exist".into()))?;

        let volume = catalog
            .orbit_system_volume()
            .ok_or_else(|| EngineError::Conflict("the system volume is not ready".into()))?;
        volume
            .paths_under(&engine.volume_root)
            .data
            .join("repositories")
            .join(&repository.id)
    };

    // Check the repo out into a scratch directory.
    let checkout = tempfile::tempdir()
        .map_err(|e| EngineError::Io(format!("could not create build directory: {e}")))?;
    git(&["clone", &repo_path.to_string_lossy(), "."], checkout.path()).await?;

    if !deployment.branch.is_empty() {
        git(&["checkout", &deployment.branch], checkout.path()).await?;
    }

    let commit = git_output(&["rev-parse", "HEAD"], checkout.path()).await?;
    let key = build_log_key(&commit, &deployment.path);

    let src = checkout.path().join(&deployment.path);
    swarm::ensure_dockerfile(&src)
        .await
        .map_err(|e| EngineError::Io(format!("could not scaffold dockerfile: {e}")))?;

    // Stream the image build, flushing buffered lines into the store on a
    // ticker so followers can watch the log grow.
    let (mut lines, mut errors) = swarm::build(src, deployment.id.clone());
    let mut ticker = tokio::time::interval(LOG_FLUSH_INTERVAL);
    let mut buffer: Vec<String> = Vec::new();
    let mut errors_closed = false;

    loop {
        tokio::select! {
            line = lines.recv() => match line {
                Some(line) => {
                    info!(deployment = %deployment.id, "{line}");
                    buffer.push(line);
                }
                None => break,
            },
            err = errors.recv(), if !errors_closed => match err {
                Some(e) => return Err(EngineError::Io(format!("image build failed: {e}"))),
                None => errors_closed = true,
            },
            _ = ticker.tick() => {
                flush_log(&store, &deployment.id, &key, &mut buffer).await?;
            }
        }
    }
    flush_log(&store, &deployment.id, &key, &mut buffer).await?;

    let mut log = |line: String| buffer.push(line);

    // Publish to the local registry and recreate the service.
    log(format!(
        "Pushing image {} to the local registry",
        deployment.id
    ));
    swarm::push(&[&deployment.id])
        .await
        .map_err(|e| EngineError::Io(format!("could not push image: {e}")))?;
    log(format!("Image {} pushed successfully", deployment.id));

    if swarm::remove_service(&deployment.id).await {
        log(format!("Removed existing service {}", deployment.id));
    }

    log(format!(
        "Creating the service definition for {}",
        deployment.id
    ));
    let service = swarm::Service {
        name: deployment.id.clone(),
        tag: deployment.id.clone(),
        command: "/start".into(),
        args: vec!["web".into()],
        ..swarm::Service::default()
    };
    swarm::create_services(&[service])
        .await
        .map_err(|e| EngineError::Io(format!("could not create service: {e}")))?;
    log(format!("Service {} created", deployment.id));
    log("-----> Deployment succeeded!".into());

    flush_log(&store, &deployment.id, &key, &mut buffer).await?;
    Ok(key)
}

/// The replicated log key for one build: `<commit>/<path>`, or just the
/// commit when the deployment builds the repository root.
pub fn build_log_key(commit: &str, path: &str) -> String {
    if path.is_empty() {
        commit.to_string()
    } else {
        format!("{commit}/{path}")
    }
}

async fn flush_log(
    store: &Arc<Store>,
    deployment_id: &str,
    key: &str,
    buffer: &mut Vec<String>,
) -> Result<(), EngineError> {
    if buffer.is_empty() {
        return Ok(());
    }

    let mut logs = BTreeMap::new();
    logs.insert(key.to_string(), std::mem::take(buffer));

    let cmd = Command::append_build_log(Deployment {
        id: deployment_id.to_string(),
        build_logs: logs,
        ..Deployment::default()
    });
    store.apply(&cmd).await?;
    Ok(())
}

async fn git(args: &[&str], dir: &Path) -> Result<(), EngineError> {
    let status = ProcessCommand::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .await
        .map_err(|e| EngineError::Io(format!("could not run git: {e}")))?;

    if !status.success() {
        return Err(EngineError::Io(format!(
            "git {} exited with {status}",
            args.join(" ")
        )));
    }
    Ok(())
}

async fn git_output(args: &[&str], dir: &Path) -> Result<String, EngineError> {
    let output = ProcessCommand::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| EngineError::Io(format!("could not run git: {e}")))?;

    if !output.status.success() {
        return Err(EngineError::Io(format!(
            "git {} exited with {}",
            args.join(" "),
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Absolute path of a repository inside the system volume.
pub fn repository_dir(volume_data: &Path, repository_id: &str) -> PathBuf {
    volume_data.join("repositories").join(repository_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_key_omits_empty_path() {
        assert_eq!(build_log_key("abc123", ""), "abc123");
        assert_eq!(build_log_key("abc123", "web"), "abc123/web");
    }

    #[test]
    fn repository_dir_layout() {
        let dir = repository_dir(Path::new("/var/orbit/volumes/v1/data"), "r1");
        assert_eq!(
            dir,
            Path::new("/var/orbit/volumes/v1/data/repositories/r1")
        );
    }
}
