//! ---
//! nuo_section: "01-core-functionality"
//! nuo_subsection: "module"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Shared configuration and tracing setup for the workspace."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
//! Shared primitives for the R-NUO workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the daemon, the control CLI and the integration tests.

pub mod config;
pub mod logging;

pub use config::{
    ApiConfig, AppConfig, LoadedAppConfig, LocalNodeConfig, LoggingConfig, MeshConfig,
    MeshNodeConfig, MetricsConfig, UnknownRolePolicy, UpdaterConfig,
};
pub use logging::{init_tracing, LogFormat, LogLevel};
