//! Cluster integration tests.
//!
//! These spawn real daemons and drive them over the admin API, so they
//! need the orbitd binary built and free ports; run them explicitly with
//! `cargo test -- --ignored`.

use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Spawn a daemon against a scratch data dir and admin port.
fn spawn_daemon(data_path: &std::path::Path, api_port: u16) -> std::io::Result<Child> {
    let socket = data_path.join("orbit.sock");

    Command::new(env!("CARGO_BIN_EXE_orbitd"))
        .args([
            "--data-path",
            &data_path.to_string_lossy(),
            "--socket",
            &socket.to_string_lossy(),
            "--port",
            &api_port.to_string(),
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
}

async fn wait_for_api(port: u16, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    let client = reqwest::Client::new();

    while tokio::time::Instant::now() < deadline {
        if let Ok(res) = client
            .get(format!("http://127.0.0.1:{port}/state"))
            .send()
            .await
        {
            if res.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    false
}

/// A daemon with an empty data dir comes up in setup status and refuses
/// joins until bootstrapped.
#[tokio::test]
#[ignore]
async fn fresh_daemon_reports_setup_status() {
    let dir = tempfile::tempdir().unwrap();
    let mut daemon = spawn_daemon(dir.path(), 46500).expect("failed to spawn daemon");

    assert!(
        wait_for_api(46500, Duration::from_secs(30)).await,
        "daemon api did not come up"
    );

    let state: serde_json::Value = reqwest::get("http://127.0.0.1:46500/state")
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(state["status"], 1);
    assert_eq!(state["status_string"], "setup");

    let _ = daemon.kill();
}

/// Bootstrap on loopback: status lands on running, the catalogue holds
/// one node and the system namespace, and the join tokens exist. Needs
/// docker and gluster on the host.
#[tokio::test]
#[ignore]
async fn single_node_bootstrap() {
    let dir = tempfile::tempdir().unwrap();
    let mut daemon = spawn_daemon(dir.path(), 46510).expect("failed to spawn daemon");
    assert!(wait_for_api(46510, Duration::from_secs(30)).await);

    let client = reqwest::Client::new();
    let res = client
        .post("http://127.0.0.1:46510/cluster/bootstrap")
        .json(&serde_json::json!({
            "advertise_address": "127.0.0.1",
            "rpc_port": 46511,
            "raft_port": 46512,
            "serf_port": 46513,
            "wan_serf_port": 46514,
        }))
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success(), "bootstrap failed: {res:?}");

    let state: serde_json::Value = client
        .get("http://127.0.0.1:46510/state")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(state["status"], 3);

    let nodes: serde_json::Value = client
        .get("http://127.0.0.1:46510/nodes")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(nodes.as_array().unwrap().len(), 1);
    assert_eq!(nodes[0]["state"], "leader");

    let tokens: serde_json::Value = client
        .get("http://127.0.0.1:46510/cluster/tokens")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_ne!(tokens["manager"], "");
    assert_ne!(tokens["worker"], "");

    // Bootstrapping again must conflict without corrupting state.
    let res = client
        .post("http://127.0.0.1:46510/cluster/bootstrap")
        .json(&serde_json::json!({ "advertise_address": "127.0.0.1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::CONFLICT);

    let _ = daemon.kill();
}

/// Signup then login round-trips a session token through the store.
#[tokio::test]
#[ignore]
async fn user_signup_and_login() {
    let dir = tempfile::tempdir().unwrap();
    let mut daemon = spawn_daemon(dir.path(), 46520).expect("failed to spawn daemon");
    assert!(wait_for_api(46520, Duration::from_secs(30)).await);

    let client = reqwest::Client::new();
    client
        .post("http://127.0.0.1:46520/cluster/bootstrap")
        .json(&serde_json::json!({
            "advertise_address": "127.0.0.1",
            "rpc_port": 46521,
            "raft_port": 46522,
        }))
        .send()
        .await
        .unwrap();

    let res = client
        .post("http://127.0.0.1:46520/user")
        .json(&serde_json::json!({
            "name": "Ada",
            "username": "ada",
            "password": "p",
            "email": "a@x",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::CREATED);

    let res = client
        .post("http://127.0.0.1:46520/user/login")
        .json(&serde_json::json!({ "identifier": "ada", "password": "p" }))
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success());
    let token = res.text().await.unwrap();
    assert_eq!(token.len(), 64);

    let _ = daemon.kill();
}
