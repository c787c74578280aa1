//! ---
//! nuo_section: "01-core-functionality"
//! nuo_subsection: "module"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Tracing subscriber initialisation."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
use std::fmt;

use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt as tracing_fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "R_NUO_LOG";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Available log formats for the console output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Minimum severity emitted when no filter directive is set in the environment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Filter directive understood by [`EnvFilter`].
    pub fn directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    /// Accepts the single-letter shorthand (`D`, `I`, `W`, `E`) or the full name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "d" | "debug" => Ok(LogLevel::Debug),
            "i" | "info" => Ok(LogLevel::Info),
            "w" | "warn" | "warning" => Ok(LogLevel::Warning),
            "e" | "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// Initialize the tracing subscriber based on configuration and environment variables.
///
/// * `R_NUO_LOG` overrides the log filter (e.g. `info`, `debug,r_nuo_core=trace`).
///   When unset the standard `RUST_LOG` variable is honoured, finally falling back
///   to the configured level.
/// * A rolling daily JSON log file is always written. Console output is only
///   enabled when `console` is set.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let prefix = config
        .file_prefix
        .clone()
        .unwrap_or_else(|| service_name.to_owned());

    let file_appender = daily(&config.directory, format!("{}.log", prefix));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let _ = FILE_GUARD.set(file_guard);

    let fallback = config.level.directive();
    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(directive).unwrap_or_else(|err| {
            eprintln!(
                "invalid {} directive ({}); defaulting to {} logging",
                LOG_ENV, err, fallback
            );
            EnvFilter::new(fallback)
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
    };

    let console_layer = if config.console {
        let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
        let _ = STDOUT_GUARD.set(stdout_guard);
        let layer = match config.format {
            LogFormat::StructuredJson => tracing_fmt::layer()
                .with_target(false)
                .with_timer(tracing_fmt::time::UtcTime::rfc_3339())
                .json()
                .with_writer(stdout_writer)
                .boxed(),
            LogFormat::Pretty => tracing_fmt::layer()
                .with_target(true)
                .with_timer(tracing_fmt::time::UtcTime::rfc_3339())
                .with_writer(stdout_writer)
                .boxed(),
        };
        Some(layer)
    } else {
        None
    };

    let file_layer = tracing_fmt::layer()
        .with_target(true)
        .with_timer(tracing_fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        level = %config.level,
        console = config.console,
        "tracing initialised"
    );
    Ok(())
}
