//! ---
//! nuo_section: "06-request-channels"
//! nuo_subsection: "binary"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Offline validation of update request payloads."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use r_nuo_common::{AppConfig, UpdaterConfig};
use r_nuo_core::{RequestParser, UpdateRequest};

/// Options for `validate`.
#[derive(Debug, Args)]
pub struct ValidateOptions {
    /// Configuration file providing the updater settings.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Profile directory, overriding the configuration.
    #[arg(long, value_name = "DIR")]
    pub profile_dir: Option<PathBuf>,
    /// Skip invalid tasks instead of rejecting the payload.
    #[arg(short = 'i', long)]
    pub ignore_invalid_tasks: bool,
    /// Payload file.
    #[arg(value_name = "FILE")]
    pub payload: PathBuf,
}

pub fn run(options: ValidateOptions) -> Result<()> {
    let mut updater = load_updater_config(&options)?;
    if let Some(dir) = &options.profile_dir {
        updater.profile_directory = dir.clone();
    }
    if options.ignore_invalid_tasks {
        updater.ignore_invalid_tasks = true;
    }
    let payload = fs::read(&options.payload)
        .with_context(|| format!("failed to read payload {}", options.payload.display()))?;

    let request = RequestParser::from_config(&updater).parse(&payload)?;
    for line in describe(&request) {
        println!("{line}");
    }
    Ok(())
}

fn load_updater_config(options: &ValidateOptions) -> Result<UpdaterConfig> {
    match &options.config {
        Some(path) => Ok(AppConfig::load(&[path])?.updater),
        None => Ok(UpdaterConfig::default()),
    }
}

fn describe(request: &UpdateRequest) -> Vec<String> {
    let mut lines = vec![format!("{} update task(s):", request.len())];
    for (key, spec) in request.tasks() {
        let timeout = spec
            .timeout
            .map(|timeout| format!("{}s", timeout.as_secs()))
            .unwrap_or_else(|| "driver default".to_owned());
        lines.push(format!(
            "  * {key} -> '{}' (timeout: {timeout})",
            spec.profile_path.display()
        ));
    }
    lines
}
