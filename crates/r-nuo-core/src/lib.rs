//! ---
//! nuo_section: "05-update-orchestration"
//! nuo_subsection: "module"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Core update orchestrator for remote mesh profile updates."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
//! Network update orchestrator.
//!
//! Inbound payloads are parsed by [`RequestParser`] into an [`UpdateRequest`].
//! [`NetworkUpdater::submit`] admits at most one request at a time and wakes
//! the [`UpdateWorker`], which resolves the abstract targets against the
//! driver's known nodes with [`TaskResolver`], runs the batch on the mesh
//! driver, and logs the [`Report`] built by [`aggregate`].
#![warn(missing_docs)]

pub mod error;
pub mod report;
pub mod request;
pub mod resolver;
pub mod status;
pub mod updater;
pub mod worker;

/// Human readable application name used in replies and log banners.
pub const APP_NAME: &str = "Mesh Network Update";

pub use error::UpdateError;
pub use report::{aggregate, OutcomeResult, Report, ReportRow, UpdateOutcome};
pub use request::{RequestParser, TargetType, TaskKey, TaskSpec, UpdateRequest};
pub use resolver::{RejectedTarget, ResolvedTask, ResolvedTaskSet, TaskConflict, TaskResolver};
pub use status::{TransportStatus, TransportStatusTracker};
pub use updater::NetworkUpdater;
pub use worker::{UpdateWorker, WorkerState};
