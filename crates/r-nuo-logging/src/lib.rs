//! ---
//! nuo_section: "03-logging"
//! nuo_subsection: "module"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Structured logging context and lifecycle events."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Structured logging helpers layered on top of `tracing`.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for development and tests.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().with_test_writer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Node address the event concerns.
    pub node: Option<&'a str>,
    /// Request target the event concerns.
    pub target: Option<&'a str>,
    /// Sequence number of the request being processed.
    pub request: Option<u64>,
    /// Worker state at the time of the event.
    pub state: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node address.
    pub fn with_node(mut self, node: &'a str) -> Self {
        self.node = Some(node);
        self
    }

    /// Attach a request target.
    pub fn with_target(mut self, target: &'a str) -> Self {
        self.target = Some(target);
        self
    }

    /// Attach a request sequence number.
    pub fn with_request(mut self, request: u64) -> Self {
        self.request = Some(request);
        self
    }

    /// Attach the worker state.
    pub fn with_state(mut self, state: &'a str) -> Self {
        self.state = Some(state);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation was refused but the system is healthy.
    Rejected,
    /// The operation failed or was aborted.
    Fault,
}

impl SystemEventOutcome {
    /// Label recorded in the `outcome` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Rejected => "rejected",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized system event with its outcome.
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    macro_rules! emit {
        ($level:expr) => {
            tracing::event!(
                $level,
                event,
                outcome = outcome.as_str(),
                node = ctx.node.unwrap_or(""),
                target = ctx.target.unwrap_or(""),
                request = ctx.request.unwrap_or_default(),
                state = ctx.state.unwrap_or(""),
                message = %message
            )
        };
    }
    match outcome {
        SystemEventOutcome::Success => emit!(Level::INFO),
        SystemEventOutcome::Rejected => emit!(Level::WARN),
        SystemEventOutcome::Fault => emit!(Level::ERROR),
    }
}
