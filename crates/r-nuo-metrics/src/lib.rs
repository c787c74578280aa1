//! ---
//! nuo_section: "04-observability"
//! nuo_subsection: "module"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Metrics collection and export utilities."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, response::Response, Router};
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(registry: SharedRegistry) -> Response {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "r_nuod_starts_total",
            "Total number of times the R-NUO daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "r_nuod_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "r_nuod_build_info",
                "Build metadata for the running daemon binary",
            ),
            &["version", "driver"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, driver: &str) {
        self.build_info
            .with_label_values(&[version, driver])
            .set(1.0);
    }
}

/// Metrics recorded by the update orchestrator.
///
/// `outcome` labels: `accepted`, `malformed`, `invalid_task`, `empty`,
/// `not_ready`, `busy`. `result` labels: `ok`, `error`.
#[derive(Clone, Debug)]
pub struct UpdateMetrics {
    registry: SharedRegistry,
    requests: IntCounterVec,
    node_results: IntCounterVec,
    cycles_total: IntCounter,
    cycle_seconds: Histogram,
    worker_state: IntGauge,
}

impl UpdateMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let requests = IntCounterVec::new(
            Opts::new(
                "r_nuo_requests_total",
                "Update requests received, by admission outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        let node_results = IntCounterVec::new(
            Opts::new(
                "r_nuo_node_results_total",
                "Per-node profile application results",
            ),
            &["result"],
        )?;
        registry.register(Box::new(node_results.clone()))?;

        let cycles_total = IntCounter::with_opts(Opts::new(
            "r_nuo_update_cycles_total",
            "Update cycles that reached the mesh driver",
        ))?;
        registry.register(Box::new(cycles_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.01, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let cycle_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "r_nuo_update_cycle_seconds",
                "Wall time of an update cycle from wake to report",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(cycle_seconds.clone()))?;

        let worker_state = IntGauge::with_opts(Opts::new(
            "r_nuo_worker_state",
            "Update worker state (0 idle, 1 pending, 2 resolving, 3 executing, 4 stopped)",
        ))?;
        registry.register(Box::new(worker_state.clone()))?;

        Ok(Self {
            registry,
            requests,
            node_results,
            cycles_total,
            cycle_seconds,
            worker_state,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_request(&self, outcome: &str) {
        self.requests.with_label_values(&[outcome]).inc();
    }

    pub fn record_node_result(&self, success: bool) {
        let label = if success { "ok" } else { "error" };
        self.node_results.with_label_values(&[label]).inc();
    }

    pub fn observe_cycle(&self, seconds: f64) {
        self.cycles_total.inc();
        self.cycle_seconds.observe(seconds);
    }

    pub fn set_worker_state(&self, code: i64) {
        self.worker_state.set(code);
    }

    pub fn requests_with_outcome(&self, outcome: &str) -> u64 {
        self.requests.with_label_values(&[outcome]).get()
    }

    pub fn node_results_with(&self, success: bool) -> u64 {
        let label = if success { "ok" } else { "error" };
        self.node_results.with_label_values(&[label]).get()
    }
}

pub use prometheus;
