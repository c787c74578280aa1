//! ---
//! nuo_section: "05-update-orchestration"
//! nuo_subsection: "tests"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Updater admission and worker cycle tests."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use r_nuo_common::UpdaterConfig;
use r_nuo_core::{NetworkUpdater, Report, UpdateError, UpdateWorker, WorkerState};
use r_nuo_metrics::{new_registry, UpdateMetrics};
use r_nuo_transport::{
    ApplyError, MeshDriver, NodeAddress, NodeInfo, NodeRole, SimulatedMesh, TransportStatusCode,
};
use tempfile::TempDir;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

const ROUTER_A: u64 = 0x0013_A200_0000_000A;
const ROUTER_B: u64 = 0x0013_A200_0000_000B;
const HIDDEN: u64 = 0x0013_A200_0000_00F0;

struct Harness {
    _profiles: TempDir,
    mesh: SimulatedMesh,
    updater: NetworkUpdater,
    worker: Option<UpdateWorker>,
}

fn mesh() -> SimulatedMesh {
    SimulatedMesh::builder(NodeInfo::new(
        NodeAddress::new(0x0013_A200_0000_0001),
        "gateway",
        NodeRole::Coordinator,
    ))
    .node(NodeInfo::new(NodeAddress::new(ROUTER_A), "router-a", NodeRole::Router))
    .node(NodeInfo::new(NodeAddress::new(ROUTER_B), "router-b", NodeRole::Router))
    .hidden_node(NodeInfo::new(NodeAddress::new(HIDDEN), "far-router", NodeRole::Router))
    .discovery_duration(Duration::from_millis(30))
    .build()
}

async fn harness_with(
    mesh: SimulatedMesh,
    configure: impl FnOnce(&mut UpdaterConfig),
    metrics: Option<UpdateMetrics>,
) -> Harness {
    let profiles = tempfile::tempdir().unwrap();
    fs::write(profiles.path().join("demo.xpro"), b"profile").unwrap();
    let mut config = UpdaterConfig {
        profile_directory: profiles.path().to_path_buf(),
        discovery_poll_interval: Duration::from_millis(5),
        ..UpdaterConfig::default()
    };
    configure(&mut config);

    let driver: Arc<dyn MeshDriver> = Arc::new(mesh.clone());
    let (updater, worker) = NetworkUpdater::with_metrics(driver, &config, metrics);
    updater.connect().await.unwrap();
    Harness {
        _profiles: profiles,
        mesh,
        updater,
        worker: Some(worker),
    }
}

async fn harness() -> Harness {
    harness_with(mesh(), |_| {}, None).await
}

fn node_payload(address: u64) -> String {
    format!(r#"{{"tasks":[{{"target":{{"type":0,"value":"{address:016X}"}},"profile":"demo","timeout":30}}]}}"#)
}

fn group_payload(addresses: &[u64]) -> String {
    let members: Vec<String> = addresses.iter().map(|a| format!("{a:016X}")).collect();
    format!(
        r#"{{"tasks":[{{"target":{{"type":2,"value":"{}"}},"profile":"demo"}}]}}"#,
        members.join(",")
    )
}

async fn wait_for_state(updater: &NetworkUpdater, state: WorkerState) {
    let mut rx = updater.subscribe_state();
    timeout(WAIT, rx.wait_for(|current| *current == state))
        .await
        .expect("worker state not reached")
        .unwrap();
}

async fn next_report(rx: &mut tokio::sync::broadcast::Receiver<Report>) -> Report {
    timeout(WAIT, rx.recv()).await.expect("no report").unwrap()
}

#[tokio::test]
async fn accepted_request_updates_node_and_returns_to_idle() {
    let mut h = harness().await;
    let mut reports = h.updater.subscribe_reports();
    let worker = h.worker.take().unwrap().spawn();

    assert_eq!(h.updater.handle_request(node_payload(ROUTER_A).as_bytes()), "");
    let report = next_report(&mut reports).await;
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.rows()[0].node, "0013A2000000000A - router-a");
    wait_for_state(&h.updater, WorkerState::Idle).await;

    let applied = h.mesh.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].timeout, Some(Duration::from_secs(30)));
    assert!(!h.updater.is_processing_request());

    h.updater.stop();
    timeout(WAIT, worker).await.unwrap().unwrap();
}

#[tokio::test]
async fn second_request_while_executing_is_busy() {
    let mut h = harness().await;
    let mut reports = h.updater.subscribe_reports();
    let worker = h.worker.take().unwrap().spawn();
    h.mesh.pause_updates();

    h.updater.submit(node_payload(ROUTER_A).as_bytes()).unwrap();
    wait_for_state(&h.updater, WorkerState::Executing).await;
    assert!(h.updater.is_processing_request());

    let err = h.updater.submit(node_payload(ROUTER_B).as_bytes()).unwrap_err();
    assert_eq!(err, UpdateError::Busy);

    h.mesh.resume_updates();
    let report = next_report(&mut reports).await;
    assert_eq!(report.rows().len(), 1);
    assert_eq!(report.succeeded(), 1);
    wait_for_state(&h.updater, WorkerState::Idle).await;

    h.updater.submit(node_payload(ROUTER_B).as_bytes()).unwrap();
    let report = next_report(&mut reports).await;
    assert_eq!(report.rows()[0].node, "0013A2000000000B - router-b");

    h.updater.stop();
    timeout(WAIT, worker).await.unwrap().unwrap();
}

#[tokio::test]
async fn pending_request_blocks_admission_before_worker_runs() {
    let h = harness().await;
    h.updater.submit(node_payload(ROUTER_A).as_bytes()).unwrap();
    assert_eq!(h.updater.state(), WorkerState::Pending);
    assert_eq!(
        h.updater.handle_request(node_payload(ROUTER_B).as_bytes()),
        "ignoring update task request: there is an update in progress"
    );
}

#[tokio::test]
async fn offline_transport_rejects_requests_without_storing_them() {
    let h = harness().await;
    h.mesh.go_offline();
    timeout(WAIT, h.updater.tracker().wait_offline()).await.unwrap();

    let err = h.updater.submit(node_payload(ROUTER_A).as_bytes()).unwrap_err();
    assert_eq!(
        err,
        UpdateError::NotReady {
            reason: "Offline".into()
        }
    );
    assert_eq!(h.updater.state(), WorkerState::Idle);
    assert!(!h.updater.is_processing_request());
}

#[tokio::test]
async fn blocking_status_reports_driver_description() {
    let h = harness().await;
    h.mesh
        .set_status(TransportStatusCode::RemoteUpdateInProgress, true);
    let mut status = h.updater.tracker().subscribe();
    timeout(
        WAIT,
        status.wait_for(|s| {
            matches!(s, Some(s) if s.code == TransportStatusCode::RemoteUpdateInProgress)
        }),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(
        h.updater.handle_request(node_payload(ROUTER_A).as_bytes()),
        "ignoring update task request: Mesh Network Update not ready: Remote update in progress"
    );
}

#[tokio::test]
async fn readiness_is_rechecked_when_the_worker_wakes() {
    let mut h = harness().await;
    h.updater.submit(node_payload(ROUTER_A).as_bytes()).unwrap();

    h.mesh.set_status(TransportStatusCode::RecoveryInProgress, true);
    let mut status = h.updater.tracker().subscribe();
    timeout(WAIT, status.wait_for(|s| s.as_ref().is_some_and(|s| !s.accepts_operations())))
        .await
        .unwrap()
        .unwrap();

    let worker = h.worker.take().unwrap().spawn();
    wait_for_state(&h.updater, WorkerState::Idle).await;
    assert!(h.mesh.applied().is_empty());
    assert!(h.updater.last_report().is_none());

    h.updater.stop();
    timeout(WAIT, worker).await.unwrap().unwrap();
}

#[tokio::test]
async fn mixed_results_produce_ok_and_error_rows() {
    let mesh = mesh();
    mesh.set_failure(
        NodeAddress::new(ROUTER_B),
        ApplyError::Rejected("bad checksum".into()),
    );
    let mut h = harness_with(mesh, |_| {}, None).await;
    let mut reports = h.updater.subscribe_reports();
    let worker = h.worker.take().unwrap().spawn();

    h.updater
        .submit(group_payload(&[ROUTER_A, ROUTER_B]).as_bytes())
        .unwrap();
    let report = next_report(&mut reports).await;
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.rows()[0].result, "OK");
    assert_eq!(report.rows()[1].result, "ERROR: profile rejected: bad checksum");

    wait_for_state(&h.updater, WorkerState::Idle).await;
    h.updater
        .submit(node_payload(ROUTER_A).as_bytes())
        .unwrap();
    next_report(&mut reports).await;

    h.updater.stop();
    timeout(WAIT, worker).await.unwrap().unwrap();
}

#[tokio::test]
async fn discovery_runs_before_resolution_when_enabled() {
    let mut h = harness_with(mesh(), |config| config.discover_network = true, None).await;
    let mut reports = h.updater.subscribe_reports();
    let worker = h.worker.take().unwrap().spawn();

    let payload = r#"{"tasks":[{"target":{"type":1,"value":"router"},"profile":"demo"}]}"#;
    h.updater.submit(payload.as_bytes()).unwrap();
    let report = next_report(&mut reports).await;
    let nodes: Vec<&str> = report.rows().iter().map(|row| row.node.as_str()).collect();
    assert_eq!(
        nodes,
        vec![
            "0013A2000000000A - router-a",
            "0013A2000000000B - router-b",
            "0013A200000000F0 - far-router",
        ]
    );

    h.updater.stop();
    timeout(WAIT, worker).await.unwrap().unwrap();
}

#[tokio::test]
async fn empty_resolution_skips_the_driver() {
    let mut h = harness_with(
        mesh(),
        |config| config.include_undiscovered_nodes = false,
        None,
    )
    .await;
    let worker = h.worker.take().unwrap().spawn();

    h.updater
        .submit(node_payload(0x0013_A200_0000_0999).as_bytes())
        .unwrap();
    wait_for_state(&h.updater, WorkerState::Idle).await;
    assert!(h.mesh.applied().is_empty());
    assert!(h.updater.last_report().is_none());

    h.updater.stop();
    timeout(WAIT, worker).await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_closes_driver_and_rejects_new_requests() {
    let mut h = harness().await;
    let worker = h.worker.take().unwrap().spawn();

    h.updater.stop();
    timeout(WAIT, worker).await.unwrap().unwrap();
    assert_eq!(h.updater.state(), WorkerState::Stopped);
    assert!(!h.mesh.is_open());

    let err = h.updater.submit(node_payload(ROUTER_A).as_bytes()).unwrap_err();
    assert_eq!(err.kind(), "not_ready");
}

#[tokio::test]
async fn parse_failures_are_returned_verbatim() {
    let h = harness().await;
    assert_eq!(
        h.updater.handle_request(br#"{"tasks":[]}"#),
        r#"invalid request '{"tasks":[]}': no update tasks"#
    );
    assert!(h
        .updater
        .handle_request(b"not json")
        .starts_with("invalid request 'not json': "));
    assert_eq!(h.updater.state(), WorkerState::Idle);
}

#[tokio::test]
async fn requests_naming_only_invalid_addresses_are_rejected() {
    let mut h = harness().await;
    let worker = h.worker.take().unwrap().spawn();

    let node = r#"{"tasks":[{"target":{"type":0,"value":"not-an-address"},"profile":"demo"}]}"#;
    assert_eq!(
        h.updater.handle_request(node.as_bytes()),
        format!("invalid request '{node}': no update tasks")
    );
    let group = r#"{"tasks":[{"target":{"type":2,"value":"zz,yy,"},"profile":"demo"}]}"#;
    assert_eq!(
        h.updater.handle_request(group.as_bytes()),
        format!("invalid request '{group}': no update tasks")
    );
    assert!(!h.updater.is_processing_request());
    assert_eq!(h.updater.state(), WorkerState::Idle);
    assert!(h.mesh.applied().is_empty());

    h.updater.stop();
    timeout(WAIT, worker).await.unwrap().unwrap();
}

#[tokio::test]
async fn metrics_track_admission_and_node_results() {
    let metrics = UpdateMetrics::new(new_registry()).unwrap();
    let mesh = mesh();
    mesh.set_failure(NodeAddress::new(ROUTER_B), ApplyError::Unreachable);
    let mut h = harness_with(mesh, |_| {}, Some(metrics.clone())).await;
    let mut reports = h.updater.subscribe_reports();
    let worker = h.worker.take().unwrap().spawn();

    h.updater.handle_request(b"{}");
    h.updater
        .submit(group_payload(&[ROUTER_A, ROUTER_B]).as_bytes())
        .unwrap();
    next_report(&mut reports).await;

    assert_eq!(metrics.requests_with_outcome("empty"), 1);
    assert_eq!(metrics.requests_with_outcome("accepted"), 1);
    assert_eq!(metrics.node_results_with(true), 1);
    assert_eq!(metrics.node_results_with(false), 1);

    h.updater.stop();
    timeout(WAIT, worker).await.unwrap().unwrap();
}
