//! ---
//! nuo_section: "02-mesh-transport"
//! nuo_subsection: "module"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Transport status codes and driver notifications."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::node::NodeAddress;

/// Status codes reported by the mesh driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportStatusCode {
    /// Connection established and idle.
    Online,
    /// Connection lost.
    Offline,
    /// The local radio is being updated.
    LocalUpdateInProgress,
    /// A remote node is being updated.
    RemoteUpdateInProgress,
    /// The radio is recovering from a failure.
    RecoveryInProgress,
    /// Network discovery is running.
    NetDiscoveryInProgress,
    /// Neighbour discovery is running.
    NeighborDiscoveryInProgress,
    /// Network find is running.
    NetworkFindInProgress,
    /// Active discovery is running.
    ActiveDiscoveryInProgress,
    /// Code this build does not know about.
    Unrecognised(u8),
}

impl TransportStatusCode {
    /// Map a wire code.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Online,
            1 => Self::Offline,
            2 => Self::LocalUpdateInProgress,
            3 => Self::RemoteUpdateInProgress,
            4 => Self::RecoveryInProgress,
            5 => Self::NetDiscoveryInProgress,
            6 => Self::NeighborDiscoveryInProgress,
            7 => Self::NetworkFindInProgress,
            8 => Self::ActiveDiscoveryInProgress,
            other => Self::Unrecognised(other),
        }
    }

    /// Wire code.
    pub fn code(&self) -> u8 {
        match self {
            Self::Online => 0,
            Self::Offline => 1,
            Self::LocalUpdateInProgress => 2,
            Self::RemoteUpdateInProgress => 3,
            Self::RecoveryInProgress => 4,
            Self::NetDiscoveryInProgress => 5,
            Self::NeighborDiscoveryInProgress => 6,
            Self::NetworkFindInProgress => 7,
            Self::ActiveDiscoveryInProgress => 8,
            Self::Unrecognised(code) => *code,
        }
    }

    /// Stable identifier used in logs and the status endpoint.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::LocalUpdateInProgress => "local_update_in_progress",
            Self::RemoteUpdateInProgress => "remote_update_in_progress",
            Self::RecoveryInProgress => "recovery_in_progress",
            Self::NetDiscoveryInProgress => "net_discovery_in_progress",
            Self::NeighborDiscoveryInProgress => "neighbor_discovery_in_progress",
            Self::NetworkFindInProgress => "network_find_in_progress",
            Self::ActiveDiscoveryInProgress => "active_discovery_in_progress",
            Self::Unrecognised(_) => "unrecognised",
        }
    }

    /// Whether the status forbids starting new update work.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            Self::LocalUpdateInProgress | Self::RemoteUpdateInProgress | Self::RecoveryInProgress
        )
    }

    /// Text used when the driver does not supply a description.
    pub fn default_description(&self) -> String {
        match self {
            Self::Online => "Online".to_string(),
            Self::Offline => "Offline".to_string(),
            Self::LocalUpdateInProgress => "Local update in progress".to_string(),
            Self::RemoteUpdateInProgress => "Remote update in progress".to_string(),
            Self::RecoveryInProgress => "Recovery in progress".to_string(),
            Self::NetDiscoveryInProgress => "Network discovery in progress".to_string(),
            Self::NeighborDiscoveryInProgress => "Neighbor discovery in progress".to_string(),
            Self::NetworkFindInProgress => "Network find in progress".to_string(),
            Self::ActiveDiscoveryInProgress => "Active discovery in progress".to_string(),
            Self::Unrecognised(code) => format!("Unrecognised status code {code}"),
        }
    }
}

impl fmt::Display for TransportStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Status change pushed by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusNotification {
    /// Status code.
    pub code: TransportStatusCode,
    /// Human readable description.
    pub description: String,
    /// Whether the driver considers itself usable.
    pub available: bool,
}

impl StatusNotification {
    /// Build a notification with the code's default description.
    pub fn new(code: TransportStatusCode, available: bool) -> Self {
        Self {
            description: code.default_description(),
            code,
            available,
        }
    }

    /// Driver is connected and idle.
    pub fn online() -> Self {
        Self::new(TransportStatusCode::Online, true)
    }

    /// Driver lost its connection.
    pub fn offline() -> Self {
        Self::new(TransportStatusCode::Offline, false)
    }
}

/// Progress of a single profile application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProgress {
    /// Node being updated.
    pub node: NodeAddress,
    /// Short description of the current step.
    pub task: String,
    /// Completion percentage, `0..=100`.
    pub percent: u8,
    /// Whether the application has finished (successfully or not).
    pub finished: bool,
}
