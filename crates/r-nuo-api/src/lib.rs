//! ---
//! nuo_section: "06-request-channels"
//! nuo_subsection: "module"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "HTTP request channel forwarding device requests to the updater."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use r_nuo_core::{NetworkUpdater, Report, TransportStatus, WorkerState};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// Shared API state exposed to handlers.
pub struct ApiState {
    updater: NetworkUpdater,
    version: String,
    start: Instant,
    started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(updater: NetworkUpdater, version: impl Into<String>) -> Self {
        Self {
            updater,
            version: version.into(),
            start: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn updater(&self) -> &NetworkUpdater {
        &self.updater
    }

    fn status(&self) -> StatusResponse {
        let readiness = self.updater.readiness();
        StatusResponse {
            ready: readiness.is_ok(),
            reason: readiness.err(),
            transport: self.updater.transport_status().map(TransportView::from),
            worker_state: self.updater.state(),
            uptime_seconds: self.start.elapsed().as_secs(),
            started_at: self.started_at,
            version: self.version.clone(),
        }
    }
}

pub struct ApiServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ApiServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

/// Spawn the request channel and status API.
pub fn spawn_api_server(state: Arc<ApiState>, addr: SocketAddr) -> Result<ApiServer> {
    let router = Router::new()
        .route("/device-requests/:target", post(post_device_request))
        .route("/api/status", get(get_status))
        .route("/api/report", get(get_report))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind API listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure API listener as non-blocking")?;
    let addr = listener
        .local_addr()
        .context("failed to read API listener address")?;
    let tcp_listener =
        TcpListener::from_std(listener).context("failed to create tokio listener")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %addr, "api server listening");
        if let Err(err) = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            error!(address = %addr, error = %err, "api server exited with error");
            return Err(err.into());
        }
        Ok(())
    });

    Ok(ApiServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

#[derive(Debug, Serialize)]
struct TransportView {
    code: u8,
    name: &'static str,
    description: String,
    available: bool,
}

impl From<TransportStatus> for TransportView {
    fn from(status: TransportStatus) -> Self {
        Self {
            code: status.code.code(),
            name: status.code.name(),
            description: status.description,
            available: status.available,
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    ready: bool,
    reason: Option<String>,
    transport: Option<TransportView>,
    worker_state: WorkerState,
    uptime_seconds: u64,
    started_at: DateTime<Utc>,
    version: String,
}

async fn post_device_request(
    State(state): State<Arc<ApiState>>,
    Path(target): Path<String>,
    body: Bytes,
) -> Response {
    if target != state.updater.request_target() {
        debug!(target = %target, "device request for unknown target");
        return StatusCode::NOT_FOUND.into_response();
    }
    let reply = state.updater.handle_request(&body);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        reply,
    )
        .into_response()
}

async fn get_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    Json(state.status())
}

async fn get_report(State(state): State<Arc<ApiState>>) -> Response {
    match state.updater.last_report() {
        Some(report) => Json::<Report>(report).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
