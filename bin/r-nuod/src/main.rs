//! ---
//! nuo_section: "01-core-functionality"
//! nuo_subsection: "binary"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Binary entrypoint for the R-NUO daemon."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use r_nuo_api::{spawn_api_server, ApiServer, ApiState};
use r_nuo_common::{init_tracing, AppConfig, LogLevel, UnknownRolePolicy};
use r_nuo_core::{NetworkUpdater, TransportStatusTracker, APP_NAME};
use r_nuo_metrics::{new_registry, spawn_http_server, DaemonMetrics, SharedRegistry, UpdateMetrics};
use r_nuo_transport::MeshDriver;
use tracing::{error, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    version = concat!("R-NUO ", env!("CARGO_PKG_VERSION")),
    about = "Update mesh radio modules from remote device requests",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(short = 'd', long, help = "Discover network before performing an update")]
    discover: bool,

    #[arg(short = 'i', long, help = "Ignore invalid tasks in received requests")]
    ignore_invalid_tasks: bool,

    #[arg(
        long,
        value_name = "include|exclude",
        help = "Whether role targets match nodes of unknown role"
    )]
    unknown_roles: Option<UnknownRolePolicy>,

    #[arg(long, help = "Enable log to standard output")]
    log_console: bool,

    #[arg(
        long,
        value_name = "D, I, W, E",
        help = "Log level: debug, info, warning, error"
    )]
    log_level: Option<LogLevel>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print version information and exit"
    )]
    version: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("R-NUO {VERSION}");
        return Ok(());
    }
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/r-nuod.toml"));
    candidates.push(PathBuf::from("/etc/r-nuo/r-nuod.toml"));

    let load_started = Instant::now();
    let loaded_config = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded_config.config;
    let config_path = loaded_config.source;
    let load_duration = load_started.elapsed();

    let metrics_registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(metrics_registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.inc_start();

    if cli.discover {
        config.updater.discover_network = true;
    }
    if cli.ignore_invalid_tasks {
        config.updater.ignore_invalid_tasks = true;
    }
    if let Some(policy) = cli.unknown_roles {
        config.updater.unknown_role_policy = policy;
    }
    if cli.log_console {
        config.logging.console = true;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_tracing("r-nuod", &config.logging)?;

    info!("+--------------------------+");
    info!("| {APP_NAME} |");
    info!("+--------------------------+");
    info!(source = %config_path.display(), "configuration loaded");
    log_configuration(&config);

    run_daemon(config, daemon_metrics, metrics_registry).await
}

fn log_configuration(config: &AppConfig) {
    let enabled = |flag: bool| if flag { "Enabled" } else { "Disabled" };
    info!("Configuration:");
    info!(" * Discover mesh network:  {}", enabled(config.updater.discover_network));
    info!(
        " * Ignore invalid tasks:   {}",
        if config.updater.ignore_invalid_tasks { "Yes" } else { "No" }
    );
    info!(
        " * Unknown-role nodes:     {:?}",
        config.updater.unknown_role_policy
    );
    info!(" * Log level:              {}", config.logging.level);
    info!(" * Log to console:         {}", enabled(config.logging.console));
    info!(" * Profile directory:      {}", config.updater.profile_directory.display());
    if !config.updater.profile_directory.is_dir() {
        warn!(
            profile_directory = %config.updater.profile_directory.display(),
            "profile directory not found; every task will be rejected until it exists"
        );
    }
}

async fn run_daemon(
    config: AppConfig,
    daemon_metrics: DaemonMetrics,
    metrics_registry: SharedRegistry,
) -> Result<()> {
    let driver: Arc<dyn MeshDriver> = Arc::new(config.mesh.build_simulated());
    daemon_metrics.set_build_info(VERSION, driver.name());

    let (update_metrics, metrics_server) = if config.metrics.enabled {
        let metrics = UpdateMetrics::new(metrics_registry.clone())?;
        let server = spawn_http_server(metrics_registry, config.metrics.listen)?;
        info!(address = %server.addr(), "metrics exporter enabled");
        (Some(metrics), Some(server))
    } else {
        info!("metrics exporter disabled by configuration");
        (None, None)
    };

    let (updater, worker) = NetworkUpdater::with_metrics(driver, &config.updater, update_metrics);
    updater
        .connect()
        .await
        .context("unable to establish connection with the local mesh node")?;
    let worker = worker.spawn();

    let mut api_server: Option<ApiServer> = None;
    if config.api.enabled {
        let state = Arc::new(ApiState::new(updater.clone(), VERSION));
        match spawn_api_server(state, config.api.listen) {
            Ok(server) => {
                info!(address = %server.addr(), target = %updater.request_target(), "request channel listening");
                api_server = Some(server);
            }
            Err(err) => {
                warn!(error = %err, "failed to start api server");
            }
        }
    } else {
        info!("api server disabled by configuration");
    }

    info!("waiting for incoming network update requests");
    let cause = wait_for_shutdown(updater.tracker()).await?;
    info!(cause, "shutting down");

    updater.stop();
    if let Err(err) = worker.await {
        error!(error = %err, "update worker terminated abnormally");
    }
    if let Some(server) = api_server {
        server.shutdown().await?;
    }
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    info!("{APP_NAME} stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown(tracker: &TransportStatusTracker) -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut quit = signal(SignalKind::quit()).context("failed to install SIGQUIT handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            Ok("interrupt")
        }
        _ = terminate.recv() => Ok("terminate"),
        _ = quit.recv() => Ok("quit"),
        _ = tracker.wait_offline() => Ok("transport offline"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(tracker: &TransportStatusTracker) -> Result<&'static str> {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            Ok("interrupt")
        }
        _ = tracker.wait_offline() => Ok("transport offline"),
    }
}
