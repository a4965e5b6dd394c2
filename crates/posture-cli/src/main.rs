//! posture - offline cloud security posture audits
//!
//! Runs the check library against an inventory snapshot and reports findings.

use anyhow::Result;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    posture_cli::run().await
}
