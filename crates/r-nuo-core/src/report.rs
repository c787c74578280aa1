//! ---
//! nuo_section: "05-update-orchestration"
//! nuo_subsection: "module"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Per-node outcome aggregation and summary table."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
use std::fmt;
use std::path::PathBuf;

use r_nuo_transport::{BatchOutcome, NodeAddress};
use serde::Serialize;

use crate::resolver::ResolvedTaskSet;

const MISSING_RESULT: &str = "no result reported by mesh driver";
const HEADER: [&str; 3] = ["Node", "Profile path", "Result"];
const GUTTER: &str = "  ";

/// Result of one profile application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum OutcomeResult {
    /// Profile applied.
    Success,
    /// Profile not applied, with the driver's message.
    Failure(String),
}

impl OutcomeResult {
    /// Whether the application succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeResult::Success)
    }
}

impl fmt::Display for OutcomeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeResult::Success => f.write_str("OK"),
            OutcomeResult::Failure(message) => write!(f, "ERROR: {message}"),
        }
    }
}

/// Outcome of one resolved task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    /// Updated node.
    pub node_address: NodeAddress,
    /// Profile that was applied.
    pub profile_path: PathBuf,
    /// What happened.
    pub result: OutcomeResult,
}

impl UpdateOutcome {
    /// Pair every resolved task with the driver's outcome for its node. A
    /// node the driver did not report on counts as a failure.
    pub fn collect(tasks: &ResolvedTaskSet, batch: &BatchOutcome) -> Vec<UpdateOutcome> {
        tasks
            .iter()
            .map(|task| {
                let result = match batch.get(&task.node.address) {
                    Some(Ok(())) => OutcomeResult::Success,
                    Some(Err(err)) => OutcomeResult::Failure(err.to_string()),
                    None => OutcomeResult::Failure(MISSING_RESULT.to_owned()),
                };
                UpdateOutcome {
                    node_address: task.node.address,
                    profile_path: task.profile_path.clone(),
                    result,
                }
            })
            .collect()
    }
}

/// One line of the summary table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    /// Node display text.
    pub node: String,
    /// Profile path.
    pub profile_path: String,
    /// `OK` or `ERROR: <message>`.
    pub result: String,
}

/// Summary of an update cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    rows: Vec<ReportRow>,
    succeeded: usize,
    failed: usize,
}

impl Report {
    /// Rows in resolution order.
    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }

    /// Number of successful nodes.
    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    /// Number of failed nodes.
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Table lines, header first, columns left-aligned.
    pub fn lines(&self) -> Vec<String> {
        let mut widths = HEADER.map(str::len);
        for row in &self.rows {
            widths[0] = widths[0].max(row.node.len());
            widths[1] = widths[1].max(row.profile_path.len());
            widths[2] = widths[2].max(row.result.len());
        }
        let render = |cells: [&str; 3]| {
            cells
                .iter()
                .zip(widths.iter())
                .map(|(cell, &width)| format!("{cell:<width$}"))
                .collect::<Vec<_>>()
                .join(GUTTER)
                .trim_end()
                .to_owned()
        };
        std::iter::once(render(HEADER))
            .chain(self.rows.iter().map(|row| {
                render([row.node.as_str(), row.profile_path.as_str(), row.result.as_str()])
            }))
            .collect()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines().join("\n"))
    }
}

/// Build the summary for `tasks`, one row per task in the set's order.
pub fn aggregate(outcomes: &[UpdateOutcome], tasks: &ResolvedTaskSet) -> Report {
    let mut report = Report::default();
    for task in tasks.iter() {
        let result = outcomes
            .iter()
            .find(|outcome| outcome.node_address == task.node.address)
            .map(|outcome| outcome.result.clone())
            .unwrap_or_else(|| OutcomeResult::Failure(MISSING_RESULT.to_owned()));
        if result.is_success() {
            report.succeeded += 1;
        } else {
            report.failed += 1;
        }
        report.rows.push(ReportRow {
            node: task.node.to_string(),
            profile_path: task.profile_path.display().to_string(),
            result: result.to_string(),
        });
    }
    report
}
