//! ---
//! nuo_section: "05-update-orchestration"
//! nuo_subsection: "module"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Single-flight update worker loop."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use r_nuo_logging::{
    log_system_event, nuo_debug, nuo_error, nuo_info, nuo_warn, LogContext, SystemEventOutcome,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::UpdateError;
use crate::report::{aggregate, UpdateOutcome};
use crate::updater::{PendingRequest, Shared};

/// Lifecycle of the update worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Waiting for a request.
    Idle,
    /// A request was admitted and the worker has been woken.
    Pending,
    /// Discovering and resolving targets.
    Resolving,
    /// The batch is running on the mesh driver.
    Executing,
    /// The worker loop has exited.
    Stopped,
}

impl WorkerState {
    /// Numeric code exported as a metric.
    pub fn code(self) -> i64 {
        match self {
            WorkerState::Idle => 0,
            WorkerState::Pending => 1,
            WorkerState::Resolving => 2,
            WorkerState::Executing => 3,
            WorkerState::Stopped => 4,
        }
    }

    /// Stable lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Pending => "pending",
            WorkerState::Resolving => "resolving",
            WorkerState::Executing => "executing",
            WorkerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Long-lived task executing admitted requests one at a time.
pub struct UpdateWorker {
    shared: Arc<Shared>,
    wake: mpsc::Receiver<()>,
}

impl UpdateWorker {
    pub(crate) fn new(shared: Arc<Shared>, wake: mpsc::Receiver<()>) -> Self {
        Self { shared, wake }
    }

    /// Run the worker on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process requests until the updater is stopped, then close the driver.
    pub async fn run(mut self) {
        let mut stop = self.shared.stop.subscribe();
        info!(driver = self.shared.driver.name(), "update worker started");
        loop {
            if *stop.borrow_and_update() {
                break;
            }
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                woke = self.wake.recv() => {
                    if woke.is_none() {
                        break;
                    }
                    self.run_cycle().await;
                }
            }
        }
        self.shutdown().await;
    }

    async fn run_cycle(&self) {
        let started = Instant::now();
        let pending = self.shared.slot.lock().take();
        let Some(PendingRequest { id, request }) = pending else {
            nuo_debug!("update worker woken without a pending request");
            self.finish();
            return;
        };
        self.shared.set_state(WorkerState::Resolving);
        let target = self.shared.config.request_target.clone();
        let ctx = LogContext::new()
            .with_target(&target)
            .with_request(id)
            .with_state(WorkerState::Resolving.as_str());

        if let Err(reason) = self.shared.readiness() {
            let err = UpdateError::NotReady { reason };
            log_system_event(
                Some(&ctx),
                "cycle.aborted",
                &err.to_string(),
                SystemEventOutcome::Fault,
            );
            self.finish();
            return;
        }

        if self.shared.config.discover_network {
            self.discover().await;
        }

        let driver = &self.shared.driver;
        let known = driver.known_nodes();
        let local = driver.local_node();
        let tasks = self.shared.resolver.resolve(&request, &known, &local);
        if tasks.is_empty() {
            nuo_error!(
                context = ctx,
                "no update tasks to perform ({} target(s) rejected)",
                tasks.rejected().len()
            );
            self.finish();
            return;
        }

        nuo_info!(context = ctx, "request received to update the following targets:");
        for task in tasks.iter() {
            let node = task.node.address.to_string();
            nuo_info!(
                context = ctx.clone().with_node(&node),
                "  * '{}' to '{}'",
                task.node,
                task.profile_path.display()
            );
        }

        self.shared.set_state(WorkerState::Executing);
        let batch = driver.update_nodes(tasks.to_apply_tasks()).await;
        let outcomes = UpdateOutcome::collect(&tasks, &batch);
        let report = aggregate(&outcomes, &tasks);

        info!(request = id, "summary:");
        for line in report.lines() {
            info!(request = id, "{line}");
        }

        let elapsed = started.elapsed();
        if let Some(metrics) = &self.shared.metrics {
            for outcome in &outcomes {
                metrics.record_node_result(outcome.result.is_success());
            }
            metrics.observe_cycle(elapsed.as_secs_f64());
        }
        let summary = format!(
            "{} node(s) updated, {} failed in {:.2}s",
            report.succeeded(),
            report.failed(),
            elapsed.as_secs_f64()
        );
        let outcome = if report.failed() == 0 {
            SystemEventOutcome::Success
        } else {
            SystemEventOutcome::Fault
        };
        log_system_event(
            Some(&ctx.clone().with_state(WorkerState::Executing.as_str())),
            "cycle.completed",
            &summary,
            outcome,
        );

        *self.shared.last_report.lock() = Some(report.clone());
        let _ = self.shared.reports.send(report);
        self.finish();
    }

    async fn discover(&self) {
        let driver = &self.shared.driver;
        info!("discovering mesh network");
        if !driver.is_discovery_running() {
            if let Err(err) = driver.start_discovery(true).await {
                nuo_warn!("unable to start network discovery: {err}");
                return;
            }
        }
        let poll_interval = self.shared.config.discovery_poll_interval;
        let wait = async {
            while driver.is_discovery_running() {
                tokio::time::sleep(poll_interval).await;
            }
        };
        let limit = self.shared.config.discovery_timeout;
        match tokio::time::timeout(limit, wait).await {
            Ok(()) => info!(known = driver.known_nodes().len(), "network discovery finished"),
            Err(_) => nuo_warn!(
                "network discovery did not finish in {}s, using current node set",
                limit.as_secs()
            ),
        }
    }

    /// Drop the request and return to `Idle` so new requests are admitted.
    fn finish(&self) {
        let _slot = self.shared.slot.lock();
        self.shared.set_state(WorkerState::Idle);
    }

    async fn shutdown(&self) {
        self.shared.slot.lock().take();
        self.shared.set_state(WorkerState::Stopped);
        self.shared.driver.close().await;
        let pumps: Vec<JoinHandle<()>> = self.shared.pumps.lock().drain(..).collect();
        for pump in pumps {
            pump.abort();
        }
        info!("update worker stopped");
    }
}
