//! ---
//! nuo_section: "06-request-channels"
//! nuo_subsection: "binary"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Commands talking to a running daemon over HTTP."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::runtime::Runtime;

/// Connection options shared by every remote command.
#[derive(Debug, Args)]
pub struct RemoteOptions {
    /// Base URL of the daemon API.
    #[arg(long, env = "R_NUO_URL", default_value = "http://127.0.0.1:8080")]
    pub url: String,
}

/// Options for `submit`.
#[derive(Debug, Args)]
pub struct SubmitOptions {
    #[command(flatten)]
    pub remote: RemoteOptions,
    /// Request target the payload is addressed to.
    #[arg(long, default_value = "mesh_network_update")]
    pub target: String,
    /// Payload file, or `-` for standard input.
    #[arg(value_name = "FILE")]
    pub payload: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ReportBody {
    rows: Vec<ReportRowBody>,
    succeeded: usize,
    failed: usize,
}

#[derive(Debug, Deserialize)]
struct ReportRowBody {
    node: String,
    profile_path: String,
    result: String,
}

pub fn submit(options: SubmitOptions) -> Result<()> {
    let payload = read_payload(&options.payload)?;
    let url = format!(
        "{}/device-requests/{}",
        options.remote.url.trim_end_matches('/'),
        options.target
    );
    let runtime = Runtime::new()?;
    let (status, reply) = runtime.block_on(async {
        let response = Client::new()
            .post(&url)
            .body(payload)
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?;
        let status = response.status();
        let reply = response.text().await?;
        Ok::<_, anyhow::Error>((status, reply))
    })?;

    if status == StatusCode::NOT_FOUND {
        bail!("daemon does not answer to target '{}'", options.target);
    }
    if !status.is_success() {
        bail!("daemon returned {status}: {reply}");
    }
    if reply.is_empty() {
        println!("Request accepted");
        Ok(())
    } else {
        bail!("{reply}")
    }
}

pub fn status(options: RemoteOptions) -> Result<()> {
    let url = format!("{}/api/status", options.url.trim_end_matches('/'));
    let runtime = Runtime::new()?;
    let body: Value = runtime.block_on(async {
        Client::new()
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?
            .error_for_status()?
            .json()
            .await
            .context("invalid status response")
    })?;

    let ready = body["ready"].as_bool().unwrap_or(false);
    println!("Ready: {}", if ready { "yes" } else { "no" });
    if let Some(reason) = body["reason"].as_str() {
        println!("Reason: {reason}");
    }
    match body["transport"].as_object() {
        Some(transport) => println!(
            "Transport: {} ({})",
            transport
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown"),
            transport.get("code").and_then(Value::as_u64).unwrap_or_default()
        ),
        None => println!("Transport: no status reported"),
    }
    println!(
        "Worker: {}",
        body["worker_state"].as_str().unwrap_or("unknown")
    );
    println!(
        "Uptime: {}s",
        body["uptime_seconds"].as_u64().unwrap_or_default()
    );
    println!("Version: {}", body["version"].as_str().unwrap_or("unknown"));
    Ok(())
}

pub fn report(options: RemoteOptions) -> Result<()> {
    let url = format!("{}/api/report", options.url.trim_end_matches('/'));
    let runtime = Runtime::new()?;
    let report: Option<ReportBody> = runtime.block_on(async {
        let response = Client::new()
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?
            .error_for_status()?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok::<_, anyhow::Error>(None);
        }
        Ok(Some(response.json().await.context("invalid report response")?))
    })?;

    let Some(report) = report else {
        println!("No update cycle completed yet");
        return Ok(());
    };
    for row in &report.rows {
        println!("{}  {}  {}", row.node, row.profile_path, row.result);
    }
    println!("{} succeeded, {} failed", report.succeeded, report.failed);
    Ok(())
}

fn read_payload(path: &Path) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut buffer = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buffer)
            .context("failed to read payload from stdin")?;
        return Ok(buffer);
    }
    fs::read(path).with_context(|| format!("failed to read payload {}", path.display()))
}
