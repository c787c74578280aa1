//! ---
//! nuo_section: "05-update-orchestration"
//! nuo_subsection: "module"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Request admission and updater lifecycle handle."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use r_nuo_common::UpdaterConfig;
use r_nuo_logging::{log_system_event, LogContext, SystemEventOutcome};
use r_nuo_metrics::UpdateMetrics;
use r_nuo_transport::{DriverError, MeshDriver, UpdateProgress};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::UpdateError;
use crate::report::Report;
use crate::request::{RequestParser, UpdateRequest};
use crate::resolver::TaskResolver;
use crate::status::{TransportStatus, TransportStatusTracker};
use crate::worker::{UpdateWorker, WorkerState};

const FIRST_STATUS_GRACE: Duration = Duration::from_secs(1);
const REPORT_CHANNEL_CAPACITY: usize = 16;

/// Request admitted by [`NetworkUpdater::submit`] and waiting for the worker.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub(crate) id: u64,
    pub(crate) request: UpdateRequest,
}

/// State shared between the updater handle and its worker.
pub(crate) struct Shared {
    pub(crate) driver: Arc<dyn MeshDriver>,
    pub(crate) parser: RequestParser,
    pub(crate) resolver: TaskResolver,
    pub(crate) config: UpdaterConfig,
    pub(crate) tracker: TransportStatusTracker,
    pub(crate) slot: Mutex<Option<PendingRequest>>,
    pub(crate) state: watch::Sender<WorkerState>,
    pub(crate) stop: watch::Sender<bool>,
    pub(crate) wake: mpsc::Sender<()>,
    pub(crate) metrics: Option<UpdateMetrics>,
    pub(crate) pumps: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) reports: broadcast::Sender<Report>,
    pub(crate) last_report: Mutex<Option<Report>>,
    sequence: AtomicU64,
}

impl Shared {
    /// `Ok` when a request may be admitted, otherwise the reason it may not.
    ///
    /// Later checks take precedence so the most specific reason is reported.
    pub(crate) fn readiness(&self) -> Result<(), String> {
        let mut reason = None;
        if *self.stop.borrow() {
            reason = Some("network updater stopped".to_owned());
        }
        if !self.driver.is_open() {
            reason = Some("mesh connection not established".to_owned());
        }
        if let Err(status) = self.tracker.readiness() {
            reason = Some(status);
        }
        match reason {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    /// Update the worker state. Callers changing admission-relevant state
    /// hold the slot lock.
    pub(crate) fn set_state(&self, state: WorkerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "update worker state changed");
        }
        if let Some(metrics) = &self.metrics {
            metrics.set_worker_state(state.code());
        }
    }
}

/// Handle used by request channels and the daemon to drive the orchestrator.
#[derive(Clone)]
pub struct NetworkUpdater {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for NetworkUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkUpdater")
            .field("driver", &self.shared.driver.name())
            .field("state", &*self.shared.state.borrow())
            .field("target", &self.shared.config.request_target)
            .finish()
    }
}

impl NetworkUpdater {
    /// Create the updater handle and the worker that executes its requests.
    pub fn new(driver: Arc<dyn MeshDriver>, config: &UpdaterConfig) -> (Self, UpdateWorker) {
        Self::with_metrics(driver, config, None)
    }

    /// Same as [`NetworkUpdater::new`], recording into `metrics`.
    pub fn with_metrics(
        driver: Arc<dyn MeshDriver>,
        config: &UpdaterConfig,
        metrics: Option<UpdateMetrics>,
    ) -> (Self, UpdateWorker) {
        let (wake_tx, wake_rx) = mpsc::channel(1);
        let (state_tx, _) = watch::channel(WorkerState::Idle);
        let (stop_tx, _) = watch::channel(false);
        let (reports_tx, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        if let Some(metrics) = &metrics {
            metrics.set_worker_state(WorkerState::Idle.code());
        }
        let shared = Arc::new(Shared {
            driver,
            parser: RequestParser::from_config(config),
            resolver: TaskResolver::from_config(config),
            config: config.clone(),
            tracker: TransportStatusTracker::new(),
            slot: Mutex::new(None),
            state: state_tx,
            stop: stop_tx,
            wake: wake_tx,
            metrics,
            pumps: Mutex::new(Vec::new()),
            reports: reports_tx,
            last_report: Mutex::new(None),
            sequence: AtomicU64::new(0),
        });
        let worker = UpdateWorker::new(shared.clone(), wake_rx);
        (Self { shared }, worker)
    }

    /// Subscribe to driver notifications and open the mesh connection.
    pub async fn connect(&self) -> Result<(), DriverError> {
        let driver = &self.shared.driver;
        let status_feed = driver.subscribe_status();
        let progress_feed = driver.subscribe_progress();
        {
            let mut pumps = self.shared.pumps.lock();
            pumps.push(self.shared.tracker.spawn_pump(status_feed));
            pumps.push(spawn_progress_pump(progress_feed));
        }

        driver.open().await?;

        let mut status = self.shared.tracker.subscribe();
        let reported = tokio::time::timeout(
            FIRST_STATUS_GRACE,
            status.wait_for(|status| status.is_some()),
        )
        .await
        .is_ok();
        if !reported {
            debug!(driver = driver.name(), "no transport status reported yet");
        }

        info!(
            driver = driver.name(),
            local = %driver.local_node(),
            target = %self.shared.config.request_target,
            "registered for update requests"
        );
        Ok(())
    }

    /// Admit a request for execution.
    ///
    /// Checks readiness, parses the payload, and stores it if no other
    /// request is pending or executing. Never queues.
    pub fn submit(&self, payload: &[u8]) -> Result<(), UpdateError> {
        let target = self.shared.config.request_target.as_str();
        debug!(target = %target, bytes = payload.len(), "received update request");

        let result = self.admit(payload);
        match &result {
            Ok(id) => {
                let ctx = LogContext::new().with_target(target).with_request(*id);
                log_system_event(
                    Some(&ctx),
                    "request.accepted",
                    "update request accepted",
                    SystemEventOutcome::Success,
                );
            }
            Err(err) => {
                let ctx = LogContext::new().with_target(target);
                match err {
                    UpdateError::NotReady { .. } | UpdateError::Busy => warn!(reason = err.kind(), "{err}"),
                    _ => error!(reason = err.kind(), "{err}"),
                }
                log_system_event(
                    Some(&ctx),
                    "request.rejected",
                    err.kind(),
                    SystemEventOutcome::Rejected,
                );
            }
        }
        if let Some(metrics) = &self.shared.metrics {
            let outcome = match &result {
                Ok(_) => "accepted",
                Err(err) => err.kind(),
            };
            metrics.record_request(outcome);
        }
        result.map(|_| ())
    }

    fn admit(&self, payload: &[u8]) -> Result<u64, UpdateError> {
        self.shared
            .readiness()
            .map_err(|reason| UpdateError::NotReady { reason })?;
        let request = self.shared.parser.parse(payload)?;

        let id = {
            let mut slot = self.shared.slot.lock();
            if slot.is_some() || *self.shared.state.borrow() != WorkerState::Idle {
                return Err(UpdateError::Busy);
            }
            let id = self.shared.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            *slot = Some(PendingRequest { id, request });
            self.shared.set_state(WorkerState::Pending);
            id
        };
        if self.shared.wake.try_send(()).is_err() {
            debug!(request = id, "update worker already signalled");
        }
        Ok(id)
    }

    /// Request-channel entrypoint: empty string on acceptance, otherwise the
    /// one-line rejection reason.
    pub fn handle_request(&self, payload: &[u8]) -> String {
        match self.submit(payload) {
            Ok(()) => String::new(),
            Err(err) => err.to_string(),
        }
    }

    /// `Ok` when a request would currently be admitted past the readiness gate.
    pub fn readiness(&self) -> Result<(), String> {
        self.shared.readiness()
    }

    /// Whether the readiness gate is open.
    pub fn is_ready(&self) -> bool {
        self.shared.readiness().is_ok()
    }

    /// Whether a request is pending or executing.
    pub fn is_processing_request(&self) -> bool {
        self.shared.slot.lock().is_some()
            || matches!(
                *self.shared.state.borrow(),
                WorkerState::Pending | WorkerState::Resolving | WorkerState::Executing
            )
    }

    /// Current worker state.
    pub fn state(&self) -> WorkerState {
        *self.shared.state.borrow()
    }

    /// Receiver observing worker state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.shared.state.subscribe()
    }

    /// Transport status tracker fed by the driver.
    pub fn tracker(&self) -> &TransportStatusTracker {
        &self.shared.tracker
    }

    /// Latest transport status.
    pub fn transport_status(&self) -> Option<TransportStatus> {
        self.shared.tracker.snapshot()
    }

    /// Request target this updater answers to.
    pub fn request_target(&self) -> &str {
        &self.shared.config.request_target
    }

    /// Driver in use.
    pub fn driver(&self) -> Arc<dyn MeshDriver> {
        self.shared.driver.clone()
    }

    /// Report of the most recent completed cycle.
    pub fn last_report(&self) -> Option<Report> {
        self.shared.last_report.lock().clone()
    }

    /// Receiver for reports of future cycles.
    pub fn subscribe_reports(&self) -> broadcast::Receiver<Report> {
        self.shared.reports.subscribe()
    }

    /// Ask the worker to stop after the in-flight batch, if any.
    pub fn stop(&self) {
        if !self.shared.stop.send_replace(true) {
            info!("network updater stop requested");
        }
    }
}

fn spawn_progress_pump(mut feed: broadcast::Receiver<UpdateProgress>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match feed.recv().await {
                Ok(progress) => {
                    debug!(node = %progress.node, task = %progress.task, percent = progress.percent, "update progress");
                    if progress.finished {
                        info!(node = %progress.node, task = %progress.task, "node update finished");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "progress notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
