//! ---
//! nuo_section: "05-update-orchestration"
//! nuo_subsection: "module"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Request admission errors."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
use thiserror::Error;

/// Reasons a request is refused. The `Display` text is the reply returned
/// to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    /// Payload is not UTF-8, not JSON, or not a JSON object.
    #[error("invalid request '{payload}': {reason}")]
    MalformedRequest {
        /// Payload as received, trimmed.
        payload: String,
        /// Parser diagnostic.
        reason: String,
    },
    /// A task failed validation while invalid tasks are not ignored.
    #[error("invalid update task: {0}")]
    InvalidTask(String),
    /// The payload contains no usable task.
    #[error("invalid request '{payload}': no update tasks")]
    EmptyRequest {
        /// Payload as received, trimmed.
        payload: String,
    },
    /// The transport or the updater cannot accept work.
    #[error("ignoring update task request: {} not ready: {}", crate::APP_NAME, .reason)]
    NotReady {
        /// Why the updater is not ready.
        reason: String,
    },
    /// Another request is pending or executing.
    #[error("ignoring update task request: there is an update in progress")]
    Busy,
}

impl UpdateError {
    /// Stable label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateError::MalformedRequest { .. } => "malformed",
            UpdateError::InvalidTask(_) => "invalid_task",
            UpdateError::EmptyRequest { .. } => "empty",
            UpdateError::NotReady { .. } => "not_ready",
            UpdateError::Busy => "busy",
        }
    }
}
