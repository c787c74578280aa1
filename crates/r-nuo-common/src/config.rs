//! ---
//! nuo_section: "01-core-functionality"
//! nuo_subsection: "module"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Configuration model and loader for the update orchestrator."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use r_nuo_transport::{ApplyError, NodeAddress, NodeInfo, NodeRole, SimulatedMesh};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::{LogFormat, LogLevel};

fn default_profile_directory() -> PathBuf {
    PathBuf::from("/etc/config/mesh-profiles")
}

fn default_profile_extension() -> String {
    "xpro".to_owned()
}

fn default_request_target() -> String {
    "mesh_network_update".to_owned()
}

fn default_discovery_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_discovery_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_include_undiscovered() -> bool {
    true
}

fn default_local_address() -> NodeAddress {
    NodeAddress::new(0x0013_A200_4000_0001)
}

fn default_local_id() -> String {
    "gateway".to_owned()
}

fn default_local_role() -> NodeRole {
    NodeRole::Coordinator
}

fn default_apply_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_discovery_duration() -> Duration {
    Duration::from_secs(2)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9898))
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

/// Primary configuration object for the R-NUO runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub updater: UpdaterConfig,
    #[serde(default)]
    pub mesh: MeshConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "R_NUO_CONFIG";

    /// Load configuration from disk, respecting the `R_NUO_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.updater.validate()?;
        self.mesh.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// How role targets treat nodes whose role has not been determined yet.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnknownRolePolicy {
    /// Unknown-role nodes match every role target.
    #[default]
    Include,
    /// Unknown-role nodes never match a role target.
    Exclude,
}

impl std::str::FromStr for UnknownRolePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "include" => Ok(UnknownRolePolicy::Include),
            "exclude" => Ok(UnknownRolePolicy::Exclude),
            other => Err(format!("unknown role policy: {}", other)),
        }
    }
}

/// Behaviour of the update orchestrator itself.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Run a deep discovery before every update cycle.
    #[serde(default)]
    pub discover_network: bool,
    /// Skip invalid tasks instead of rejecting the whole request.
    #[serde(default)]
    pub ignore_invalid_tasks: bool,
    #[serde(default = "default_profile_directory")]
    pub profile_directory: PathBuf,
    /// Extension appended to profile names that lack it, without the dot.
    #[serde(default = "default_profile_extension")]
    pub profile_extension: String,
    /// Name requests are addressed to on the request channel.
    #[serde(default = "default_request_target")]
    pub request_target: String,
    #[serde(default = "default_discovery_poll_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "discovery_poll_interval_ms")]
    pub discovery_poll_interval: Duration,
    #[serde(default = "default_discovery_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub discovery_timeout: Duration,
    #[serde(default)]
    pub unknown_role_policy: UnknownRolePolicy,
    /// Target addresses the driver does not know yet are still attempted.
    #[serde(default = "default_include_undiscovered")]
    pub include_undiscovered_nodes: bool,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            discover_network: false,
            ignore_invalid_tasks: false,
            profile_directory: default_profile_directory(),
            profile_extension: default_profile_extension(),
            request_target: default_request_target(),
            discovery_poll_interval: default_discovery_poll_interval(),
            discovery_timeout: default_discovery_timeout(),
            unknown_role_policy: UnknownRolePolicy::default(),
            include_undiscovered_nodes: default_include_undiscovered(),
        }
    }
}

impl UpdaterConfig {
    pub fn validate(&self) -> Result<()> {
        let extension = self.profile_extension.trim_start_matches('.');
        if extension.trim().is_empty() {
            return Err(anyhow!("updater profile_extension must not be empty"));
        }
        if self.request_target.trim().is_empty() {
            return Err(anyhow!("updater request_target must not be empty"));
        }
        if self.discovery_poll_interval.is_zero() {
            return Err(anyhow!(
                "updater discovery_poll_interval_ms must be greater than zero"
            ));
        }
        Ok(())
    }
}

/// Local radio of the simulated mesh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalNodeConfig {
    #[serde(default = "default_local_address")]
    pub address: NodeAddress,
    #[serde(default = "default_local_id")]
    pub node_id: String,
    #[serde(default = "default_local_role")]
    pub role: NodeRole,
}

impl Default for LocalNodeConfig {
    fn default() -> Self {
        Self {
            address: default_local_address(),
            node_id: default_local_id(),
            role: default_local_role(),
        }
    }
}

impl LocalNodeConfig {
    pub fn to_node_info(&self) -> NodeInfo {
        NodeInfo::new(self.address, self.node_id.clone(), self.role)
    }
}

/// Remote node of the simulated mesh, keyed by its node identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshNodeConfig {
    pub address: NodeAddress,
    #[serde(default)]
    pub role: NodeRole,
    /// Only joins the known-node set after a discovery scan.
    #[serde(default)]
    pub hidden: bool,
    /// Every profile application on this node is rejected with this message.
    #[serde(default)]
    pub fail_with: Option<String>,
}

impl MeshNodeConfig {
    pub fn to_node_info(&self, node_id: &str) -> NodeInfo {
        NodeInfo::new(self.address, node_id, self.role)
    }
}

/// Topology and timing of the simulated mesh driver.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    #[serde(default)]
    pub local: LocalNodeConfig,
    #[serde(default)]
    pub nodes: IndexMap<String, MeshNodeConfig>,
    #[serde(default = "default_apply_delay")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "apply_delay_ms")]
    pub apply_delay: Duration,
    #[serde(default = "default_discovery_duration")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "discovery_duration_ms")]
    pub discovery_duration: Duration,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            local: LocalNodeConfig::default(),
            nodes: IndexMap::new(),
            apply_delay: default_apply_delay(),
            discovery_duration: default_discovery_duration(),
        }
    }
}

impl MeshConfig {
    pub fn validate(&self) -> Result<()> {
        if self.local.node_id.trim().is_empty() {
            return Err(anyhow!("mesh local node must have a node_id"));
        }
        let mut seen = HashSet::new();
        seen.insert(self.local.address);
        for (node_id, node) in &self.nodes {
            if node_id.trim().is_empty() {
                return Err(anyhow!("mesh node identifiers must not be empty"));
            }
            if !seen.insert(node.address) {
                return Err(anyhow!(
                    "mesh node '{}' reuses address {}",
                    node_id,
                    node.address
                ));
            }
        }
        Ok(())
    }

    /// Build the simulated driver described by this section.
    pub fn build_simulated(&self) -> SimulatedMesh {
        let mut builder = SimulatedMesh::builder(self.local.to_node_info())
            .apply_delay(self.apply_delay)
            .discovery_duration(self.discovery_duration);
        for (node_id, node) in &self.nodes {
            let info = node.to_node_info(node_id);
            builder = if node.hidden {
                builder.hidden_node(info)
            } else {
                builder.node(info)
            };
            if let Some(message) = &node.fail_with {
                builder = builder.failing_node(node.address, ApplyError::Rejected(message.clone()));
            }
        }
        builder.build()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    /// Mirror events to standard output.
    #[serde(default)]
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            level: default_log_level(),
            console: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen: default_api_listen(),
        }
    }
}
