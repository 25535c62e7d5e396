use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use certstore_core::{JobDescriptor, JobOutcome, JobProcessor, JobStatus};
use clap::Parser;
use tracing::{debug, error};

mod logging;
mod result;

use result::CompletionReport;

/// Run one certificate store job and print its result as JSON.
#[derive(Debug, Parser)]
#[command(name = "certstore-agent")]
#[command(about = "Inventory and manage Windows certificate stores over WinRM")]
#[command(version)]
struct Cli {
    /// Job descriptor file. Reads stdin when omitted.
    #[arg(short, long, value_name = "FILE")]
    job: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,

    /// Pretty-print the result
    #[arg(long)]
    pretty: bool,
}

fn read_descriptor(path: Option<&PathBuf>) -> Result<JobDescriptor> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read job descriptor {}", path.display()))?,
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("failed to read job descriptor from stdin")?;
            raw
        }
    };

    parse_descriptor(&raw)
}

fn parse_descriptor(raw: &str) -> Result<JobDescriptor> {
    serde_json::from_str(raw).context("job descriptor is not valid JSON")
}

/// A descriptor that cannot be loaded still gets a Failure result.
fn load_failure(err: &anyhow::Error) -> JobOutcome {
    let message = format!("{:#}", err);
    error!(error = %message, "failed to load job descriptor");
    JobOutcome::failure(message)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let outcome = match read_descriptor(cli.job.as_ref()) {
        Ok(descriptor) => {
            debug!(?descriptor, "loaded job descriptor");
            JobProcessor::winrm().execute_descriptor(&descriptor).await
        }
        Err(err) => load_failure(&err),
    };
    let report = CompletionReport::from(&outcome);
    let json = if cli.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{}", json);

    if outcome.status == JobStatus::Failure {
        std::process::exit(1);
    }
    Ok(())
}
