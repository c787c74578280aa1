//! ---
//! nuo_section: "02-mesh-transport"
//! nuo_subsection: "module"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Mesh driver trait and batch apply types."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::node::{NodeAddress, NodeInfo};
use crate::status::{StatusNotification, UpdateProgress};

/// One "apply profile to node" instruction handed to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyTask {
    /// Target node.
    pub node: NodeInfo,
    /// Absolute path of the profile package.
    pub profile_path: PathBuf,
    /// Upper bound for the application, `None` for the driver default.
    pub timeout: Option<Duration>,
}

/// Per-node failure reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// The node did not answer.
    #[error("node is not reachable")]
    Unreachable,
    /// The node refused the profile.
    #[error("profile rejected: {0}")]
    Rejected(String),
    /// The application exceeded its timeout.
    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    /// Any other driver failure.
    #[error("{0}")]
    Other(String),
}

/// Per-node outcome map returned from a batch.
pub type BatchOutcome = IndexMap<NodeAddress, Result<(), ApplyError>>;

/// Failures of driver-level operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Operation requires an open connection.
    #[error("mesh connection not established")]
    NotConnected,
    /// Discovery could not be started.
    #[error("discovery failed: {0}")]
    Discovery(String),
    /// Local I/O failure while talking to the radio.
    #[error("radio i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capabilities the orchestrator needs from a radio mesh.
///
/// Implementations own the known-node set and are its only writer.
/// `update_nodes` must return an entry for every task and must not let one
/// node's failure abort the others.
#[async_trait]
pub trait MeshDriver: Send + Sync + 'static {
    /// Short driver name for logs.
    fn name(&self) -> &str;

    /// Open the connection to the local radio.
    async fn open(&self) -> Result<(), DriverError>;

    /// Close the connection. Idempotent.
    async fn close(&self);

    /// Whether the connection is open.
    fn is_open(&self) -> bool;

    /// Record describing the local radio.
    fn local_node(&self) -> NodeInfo;

    /// Snapshot of the known remote nodes.
    fn known_nodes(&self) -> Vec<NodeInfo>;

    /// Start a discovery scan. `deep` requests a full network scan.
    async fn start_discovery(&self, deep: bool) -> Result<(), DriverError>;

    /// Whether a discovery scan is running.
    fn is_discovery_running(&self) -> bool;

    /// Apply the profile packages and report one outcome per node.
    async fn update_nodes(&self, tasks: Vec<ApplyTask>) -> BatchOutcome;

    /// Subscribe to status change notifications.
    fn subscribe_status(&self) -> broadcast::Receiver<StatusNotification>;

    /// Subscribe to per-node progress notifications.
    fn subscribe_progress(&self) -> broadcast::Receiver<UpdateProgress>;
}
