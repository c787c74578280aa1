//! ---
//! nuo_section: "06-request-channels"
//! nuo_subsection: "binary"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Control CLI for operators interacting with the R-NUO daemon."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use r_nuo_logging as logging;

mod remote;
mod validate;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "R-NUO control utility",
    long_about = None
)]
struct Cli {
    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print version information and exit"
    )]
    version: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Send an update request payload to a running daemon")]
    Submit(remote::SubmitOptions),
    #[command(about = "Show daemon readiness and worker state")]
    Status(remote::RemoteOptions),
    #[command(about = "Show the summary of the last update cycle")]
    Report(remote::RemoteOptions),
    #[command(about = "Parse a payload offline against a profile directory")]
    Validate(validate::ValidateOptions),
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    if cli.version {
        println!("R-NUO {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    match cli.command {
        Some(Commands::Submit(opts)) => remote::submit(opts)?,
        Some(Commands::Status(opts)) => remote::status(opts)?,
        Some(Commands::Report(opts)) => remote::report(opts)?,
        Some(Commands::Validate(opts)) => validate::run(opts)?,
        None => anyhow::bail!("no command given; see --help"),
    }
    Ok(())
}
