//! ---
//! nuo_section: "02-mesh-transport"
//! nuo_subsection: "module"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "In-process simulated radio mesh."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
//! Simulated mesh driver.
//!
//! Nodes are declared up front. "Hidden" nodes exist physically but only join
//! the known-node set once a discovery scan completes. Failures can be
//! scripted per node, and batches can be paused so callers can observe an
//! update in flight.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::driver::{ApplyError, ApplyTask, BatchOutcome, DriverError, MeshDriver};
use crate::node::{NodeAddress, NodeInfo, NodeStore};
use crate::status::{StatusNotification, TransportStatusCode, UpdateProgress};

const CHANNEL_CAPACITY: usize = 64;

/// Builder for [`SimulatedMesh`].
#[derive(Debug, Clone)]
pub struct SimulatedMeshBuilder {
    local: NodeInfo,
    nodes: Vec<NodeInfo>,
    hidden: Vec<NodeInfo>,
    failures: HashMap<NodeAddress, ApplyError>,
    apply_delay: Duration,
    discovery_duration: Duration,
}

impl SimulatedMeshBuilder {
    /// Add a node that is known from the start.
    pub fn node(mut self, node: NodeInfo) -> Self {
        self.nodes.push(node);
        self
    }

    /// Add a node that only becomes known after discovery.
    pub fn hidden_node(mut self, node: NodeInfo) -> Self {
        self.hidden.push(node);
        self
    }

    /// Make every application on `address` fail with `error`.
    pub fn failing_node(mut self, address: NodeAddress, error: ApplyError) -> Self {
        self.failures.insert(address, error);
        self
    }

    /// Time each profile application takes.
    pub fn apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = delay;
        self
    }

    /// Time a discovery scan takes.
    pub fn discovery_duration(mut self, duration: Duration) -> Self {
        self.discovery_duration = duration;
        self
    }

    /// Finish the builder.
    pub fn build(self) -> SimulatedMesh {
        let store = NodeStore::new();
        for node in self.nodes {
            store.upsert(node);
        }
        let (status_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (progress_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (pause_tx, _) = watch::channel(false);
        SimulatedMesh {
            inner: Arc::new(Inner {
                local: self.local,
                store,
                hidden: Mutex::new(self.hidden),
                failures: Mutex::new(self.failures),
                apply_delay: self.apply_delay,
                discovery_duration: self.discovery_duration,
                open: AtomicBool::new(false),
                discovering: AtomicBool::new(false),
                status_tx,
                progress_tx,
                applied: Mutex::new(Vec::new()),
                pause_tx,
            }),
        }
    }
}

struct Inner {
    local: NodeInfo,
    store: NodeStore,
    hidden: Mutex<Vec<NodeInfo>>,
    failures: Mutex<HashMap<NodeAddress, ApplyError>>,
    apply_delay: Duration,
    discovery_duration: Duration,
    open: AtomicBool,
    discovering: AtomicBool,
    status_tx: broadcast::Sender<StatusNotification>,
    progress_tx: broadcast::Sender<UpdateProgress>,
    applied: Mutex<Vec<ApplyTask>>,
    pause_tx: watch::Sender<bool>,
}

impl Inner {
    fn publish_status(&self, notification: StatusNotification) {
        debug!(code = %notification.code, available = notification.available, "simulated mesh status");
        let _ = self.status_tx.send(notification);
    }

    fn publish_progress(&self, node: NodeAddress, task: &str, percent: u8, finished: bool) {
        let _ = self.progress_tx.send(UpdateProgress {
            node,
            task: task.to_string(),
            percent,
            finished,
        });
    }

    fn is_reachable(&self, address: &NodeAddress) -> bool {
        *address == self.local.address
            || self.store.contains(address)
            || self.hidden.lock().iter().any(|node| node.address == *address)
    }

    async fn apply_one(&self, task: &ApplyTask) -> Result<(), ApplyError> {
        let address = task.node.address;
        self.publish_progress(address, "applying profile", 0, false);

        let result = if !self.is_reachable(&address) {
            Err(ApplyError::Unreachable)
        } else {
            match task.timeout {
                Some(limit) if self.apply_delay > limit => {
                    tokio::time::sleep(limit).await;
                    Err(ApplyError::TimedOut(limit))
                }
                _ => {
                    if !self.apply_delay.is_zero() {
                        tokio::time::sleep(self.apply_delay).await;
                    }
                    match self.failures.lock().get(&address) {
                        Some(error) => Err(error.clone()),
                        None => Ok(()),
                    }
                }
            }
        };

        self.publish_progress(address, "applying profile", 100, true);
        self.applied.lock().push(task.clone());
        result
    }
}

/// In-process mesh used by the daemon's simulation mode and the tests.
#[derive(Clone)]
pub struct SimulatedMesh {
    inner: Arc<Inner>,
}

impl SimulatedMesh {
    /// Start building a mesh around the given local radio.
    pub fn builder(local: NodeInfo) -> SimulatedMeshBuilder {
        SimulatedMeshBuilder {
            local,
            nodes: Vec::new(),
            hidden: Vec::new(),
            failures: HashMap::new(),
            apply_delay: Duration::ZERO,
            discovery_duration: Duration::from_millis(50),
        }
    }

    /// Push an arbitrary status notification.
    pub fn set_status(&self, code: TransportStatusCode, available: bool) {
        self.inner
            .publish_status(StatusNotification::new(code, available));
    }

    /// Drop the connection and announce it.
    pub fn go_offline(&self) {
        self.inner.open.store(false, Ordering::SeqCst);
        self.inner.publish_status(StatusNotification::offline());
    }

    /// Script a failure for a node.
    pub fn set_failure(&self, address: NodeAddress, error: ApplyError) {
        self.inner.failures.lock().insert(address, error);
    }

    /// Remove all scripted failures.
    pub fn clear_failures(&self) {
        self.inner.failures.lock().clear();
    }

    /// Add a node to the known set.
    pub fn add_node(&self, node: NodeInfo) {
        self.inner.store.upsert(node);
    }

    /// Hold every batch before its first application until resumed.
    pub fn pause_updates(&self) {
        self.inner.pause_tx.send_replace(true);
    }

    /// Release paused batches.
    pub fn resume_updates(&self) {
        self.inner.pause_tx.send_replace(false);
    }

    /// Every task the mesh has attempted, in order.
    pub fn applied(&self) -> Vec<ApplyTask> {
        self.inner.applied.lock().clone()
    }
}

impl std::fmt::Debug for SimulatedMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedMesh")
            .field("local", &self.inner.local)
            .field("known", &self.inner.store.len())
            .field("open", &self.inner.open.load(Ordering::SeqCst))
            .finish()
    }
}

#[async_trait]
impl MeshDriver for SimulatedMesh {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn open(&self) -> Result<(), DriverError> {
        if !self.inner.open.swap(true, Ordering::SeqCst) {
            info!(local = %self.inner.local, "simulated mesh opened");
            self.inner.publish_status(StatusNotification::online());
        }
        Ok(())
    }

    async fn close(&self) {
        if self.inner.open.swap(false, Ordering::SeqCst) {
            info!("simulated mesh closed");
        }
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    fn local_node(&self) -> NodeInfo {
        self.inner.local.clone()
    }

    fn known_nodes(&self) -> Vec<NodeInfo> {
        self.inner.store.snapshot()
    }

    async fn start_discovery(&self, deep: bool) -> Result<(), DriverError> {
        if !self.is_open() {
            return Err(DriverError::NotConnected);
        }
        if self.inner.discovering.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.publish_status(StatusNotification::new(
            TransportStatusCode::NetDiscoveryInProgress,
            true,
        ));
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.discovery_duration).await;
            let found: Vec<NodeInfo> = inner.hidden.lock().drain(..).collect();
            for node in found {
                debug!(node = %node, "simulated discovery found node");
                inner.store.upsert(node);
            }
            inner.discovering.store(false, Ordering::SeqCst);
            info!(deep, known = inner.store.len(), "simulated discovery finished");
            inner.publish_status(StatusNotification::online());
        });
        Ok(())
    }

    fn is_discovery_running(&self) -> bool {
        self.inner.discovering.load(Ordering::SeqCst)
    }

    async fn update_nodes(&self, tasks: Vec<ApplyTask>) -> BatchOutcome {
        let mut outcome = BatchOutcome::new();
        if !self.is_open() {
            warn!(tasks = tasks.len(), "update requested on closed simulated mesh");
            for task in tasks {
                outcome.insert(
                    task.node.address,
                    Err(ApplyError::Other(DriverError::NotConnected.to_string())),
                );
            }
            return outcome;
        }

        let mut pause = self.inner.pause_tx.subscribe();
        let _ = pause.wait_for(|paused| !*paused).await;

        for task in tasks {
            let result = self.inner.apply_one(&task).await;
            outcome.insert(task.node.address, result);
        }
        outcome
    }

    fn subscribe_status(&self) -> broadcast::Receiver<StatusNotification> {
        self.inner.status_tx.subscribe()
    }

    fn subscribe_progress(&self) -> broadcast::Receiver<UpdateProgress> {
        self.inner.progress_tx.subscribe()
    }
}
