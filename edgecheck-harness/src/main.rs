//! `edgecheck`: run the acceptance scenarios against a CDN edge.

use std::process::ExitCode;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use edgecheck_core::HarnessConfig;
use edgecheck_harness::logging::init_logging;
use edgecheck_harness::report::{CaseReport, Outcome};
use edgecheck_harness::suite::{catalogue, run_suite, SuiteOutcome};
use edgecheck_harness::Harness;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match HarnessConfig::try_parse() {
        Ok(config) => config,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("error: {e}\n");
        let _ = HarnessConfig::command().print_help();
        return ExitCode::FAILURE;
    }

    init_logging();

    match run(&config).await {
        Ok(outcome) if outcome.success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!("run aborted: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &HarnessConfig) -> anyhow::Result<SuiteOutcome> {
    let harness = Harness::from_config(config).context("setting up harness")?;

    if let Err(e) = harness.reset().await {
        harness.stop_all().await;
        return Err(e).context("bringing up backends");
    }

    let outcome = run_suite(&harness, &catalogue(), config.filter.as_deref()).await;
    harness.stop_all().await;

    for report in &outcome.reports {
        print_report(report);
    }
    println!(
        "\n{} passed, {} failed, {} skipped",
        outcome.count(Outcome::Passed),
        outcome.count(Outcome::Failed),
        outcome.count(Outcome::Skipped),
    );

    if let Some(e) = outcome.aborted.as_ref() {
        anyhow::bail!("backends could not be reset: {e}");
    }
    Ok(outcome)
}

fn print_report(report: &CaseReport) {
    println!("{} {}", report.outcome, report.name);
    for failure in &report.failures {
        println!("    {failure}");
    }
    for warning in &report.warnings {
        println!("    warning: {warning}");
    }
    if let (Outcome::Skipped, Some(reason)) = (report.outcome, report.skip_reason.as_deref()) {
        println!("    {reason}");
    }
}
