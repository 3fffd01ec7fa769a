//! Container-runtime wrapper.
//!
//! Shell-outs to the docker CLI covering exactly what the engine needs:
//! swarm membership, the overlay network, the local image registry, image
//! build/push, and service management.

use std::net::IpAddr;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Port the local image registry publishes on every node.
pub const REGISTRY_PORT: u16 = 6510;

/// The overlay network all platform services attach to.
pub const OVERLAY_NETWORK: &str = "orbit";

async fn run(args: &[&str]) -> Result<(), std::io::Error> {
    let status = Command::new("docker").args(args).status().await?;
    if !status.success() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("docker {} exited with {status}", args.join(" ")),
        ));
    }
    Ok(())
}

/// Initialise a new swarm advertising the given address.
pub async fn swarm_init(ip: IpAddr) -> Result<(), std::io::Error> {
    let ip = ip.to_string();
    run(&["swarm", "init", "--advertise-addr", &ip]).await?;
    info!(advertise = %ip, "swarm initialised");
    Ok(())
}

/// Make sure the node is not in a swarm before starting or joining one.
/// Failing because there was no swarm to leave is fine.
pub async fn force_leave_swarm() {
    if run(&["swarm", "leave", "--force"]).await.is_ok() {
        info!("force left existing swarm");
    }
}

/// Fetch the manager or worker join token for this swarm.
pub async fn swarm_token(manager: bool) -> String {
    let token_type = if manager { "manager" } else { "worker" };

    let output = Command::new("docker")
        .args(["swarm", "join-token", token_type, "-q"])
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        }
        _ => {
            warn!(token_type, "could not retrieve swarm join token");
            String::new()
        }
    }
}

/// Join an existing swarm.
pub async fn join_swarm(ip: &str, token: &str) -> Result<(), std::io::Error> {
    run(&["swarm", "join", "--token", token, ip]).await
}

/// Create the overlay network used for inter-service routing. Once per
/// cluster, after swarm init.
pub async fn create_overlay_network(name: &str) -> Result<(), std::io::Error> {
    run(&["network", "create", "-d", "overlay", name]).await
}

/// Deploy the image registry service backed by the given data path and
/// published on `port` across the swarm.
pub async fn deploy_registry(path: &Path, port: u16) -> Result<(), std::io::Error> {
    let mount = format!(
        "type=bind,source={},target=/var/lib/registry",
        path.display()
    );
    let publish = format!("{port}:5000");

    run(&[
        "service",
        "create",
        "--name",
        "registry",
        "--mount",
        &mount,
        "--replicas",
        "1",
        "--publish",
        &publish,
        "registry:2",
    ])
    .await
}

/// Push tags to the local registry.
pub async fn push(tags: &[&str]) -> Result<(), std::io::Error> {
    for tag in tags {
        let name = format!("127.0.0.1:{REGISTRY_PORT}/{tag}");
        run(&["push", &name]).await?;
    }
    Ok(())
}

/// Write the buildpack Dockerfile into `path` unless one is already
/// present.
pub async fn ensure_dockerfile(path: &Path) -> Result<(), std::io::Error> {
    let dockerfile = path.join("Dockerfile");
    if dockerfile.exists() {
        return Ok(());
    }

    let contents = "FROM gliderlabs/herokuish\nWORKDIR /tmp/build\nCOPY . .\nRUN /build\n";
    tokio::fs::write(dockerfile, contents).await
}

/// Run `docker build`, streaming stdout lines into the returned channel.
/// A build failure arrives on the error channel; both close when the
/// build finishes.
pub fn build(
    path: std::path::PathBuf,
    tag: String,
) -> (mpsc::Receiver<String>, mpsc::Receiver<std::io::Error>) {
    let (line_tx, line_rx) = mpsc::channel(64);
    let (err_tx, err_rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let child = Command::new("docker")
            .args(["build", "-t", &tag])
            .arg(&path)
            .stdout(std::process::Stdio::piped())
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                let _ = err_tx.send(e).await;
                return;
            }
        };

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line_tx.send(line).await.is_err() {
                    break;
                }
            }
        }

        match child.wait().await {
            Ok(status) if status.success() => {}
            Ok(status) => {
                let _ = err_tx
                    .send(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("docker build exited with {status}"),
                    ))
                    .await;
            }
            Err(e) => {
                let _ = err_tx.send(e).await;
            }
        }
    });

    (line_rx, err_rx)
}

/// A port published by a service.
#[derive(Debug, Clone, Copy)]
pub struct Publish {
    pub host: u16,
    pub container: u16,
}

/// A mount a service uses; bind mounts unless a type is given.
#[derive(Debug, Clone)]
pub struct ServiceMount {
    pub source: String,
    pub target: String,
    pub mount_type: Option<String>,
}

impl ServiceMount {
    fn render(&self) -> String {
        let mount_type = self.mount_type.as_deref().unwrap_or("bind");
        format!(
            "type={mount_type},source={},target={}",
            self.source, self.target
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServiceMode {
    /// Run the requested number of replicas somewhere in the swarm.
    #[default]
    Replicated,
    /// Run one task on every node.
    Global,
}

/// A platform service declaration. Not a complete swarm service spec,
/// just the parts the engine provisions.
#[derive(Debug, Clone, Default)]
pub struct Service {
    pub name: String,
    pub tag: String,
    pub replicas: usize,
    pub disable_local_registry: bool,
    pub publish: Vec<Publish>,
    pub mode: ServiceMode,
    pub mounts: Vec<ServiceMount>,
    pub networks: Vec<String>,
    pub command: String,
    pub args: Vec<String>,
}

/// Create each service in turn.
pub async fn create_services(services: &[Service]) -> Result<(), std::io::Error> {
    for service in services {
        create_service(service).await?;
    }
    Ok(())
}

async fn create_service(service: &Service) -> Result<(), std::io::Error> {
    let mut args: Vec<String> = vec!["service".into(), "create".into()];

    if !service.name.is_empty() {
        args.push("--name".into());
        args.push(service.name.clone());
    }

    match service.mode {
        ServiceMode::Replicated => {
            args.push("--replicas".into());
            args.push(service.replicas.max(1).to_string());
        }
        ServiceMode::Global => {
            args.push("--mode".into());
            args.push("global".into());
        }
    }

    for mount in &service.mounts {
        args.push("--mount".into());
        args.push(mount.render());
    }

    // The orbit overlay network is always attached.
    args.push("--network".into());
    args.push(OVERLAY_NETWORK.into());
    for network in &service.networks {
        args.push("--network".into());
        args.push(network.clone());
    }

    for publish in &service.publish {
        args.push("--publish".into());
        args.push(format!("{}:{}", publish.host, publish.container));
    }

    if service.disable_local_registry {
        args.push(service.tag.clone());
    } else {
        args.push(format!("127.0.0.1:{REGISTRY_PORT}/{}", service.tag));
    }

    if !service.command.is_empty() {
        args.push(service.command.clone());
        args.extend(service.args.iter().cloned());
    }

    let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
    info!(service = %service.name, "docker {}", args.join(" "));
    run(&arg_refs).await
}

/// Remove a service; reports whether it existed.
pub async fn remove_service(id: &str) -> bool {
    run(&["service", "rm", id]).await.is_ok()
}

/// Forcefully restart a service's tasks so it re-reads its inputs.
pub async fn force_update_service(id: &str) -> Result<(), std::io::Error> {
    run(&["service", "update", id, "--force"]).await?;
    info!(service = id, "force updated service");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mounts_render_as_bind_by_default() {
        let mount = ServiceMount {
            source: "/var/run/orbit.sock".into(),
            target: "/var/run/orbit.sock".into(),
            mount_type: None,
        };
        assert_eq!(
            mount.render(),
            "type=bind,source=/var/run/orbit.sock,target=/var/run/orbit.sock"
        );
    }

    #[tokio::test]
    async fn ensure_dockerfile_scaffolds_and_preserves() {
        let dir = tempfile::tempdir().unwrap();

        ensure_dockerfile(dir.path()).await.unwrap();
        let scaffolded = std::fs::read_to_string(dir.path().join("Dockerfile")).unwrap();
        assert!(scaffolded.starts_with("FROM gliderlabs/herokuish"));

        // A repo that ships its own Dockerfile keeps it.
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        ensure_dockerfile(dir.path()).await.unwrap();
        let kept = std::fs::read_to_string(dir.path().join("Dockerfile")).unwrap();
        assert_eq!(kept, "FROM scratch\n");
    }
}
