use super::load_likelihood;
use crate::cli::CheckArgs;
use crate::config::builder::build_config;
use crate::error::{CliError, Result};
use crate::utils::progress::CheckProgressBar;
use tracing::{info, warn};
use treelik::engine::progress::ProgressReporter;
use treelik::workflows;

pub fn run(args: CheckArgs) -> Result<()> {
    info!("Merging configuration from file and CLI arguments...");
    let mut config = build_config(&args.input)?;
    if let Some(cycles) = args.cycles {
        config.check.cycles = cycles;
    }
    if let Some(seed) = args.seed {
        config.check.seed = seed;
    }
    let mut likelihood = load_likelihood(&config)?;

    let progress = CheckProgressBar::new();
    let reporter = ProgressReporter::with_callback(progress.callback());

    println!("Starting store/restore check ({} cycles)...", config.check.cycles);
    let report = workflows::check::run(&mut likelihood, &config.check, &reporter)?;

    println!(
        "Initial log-likelihood: {:.6}\nFinal log-likelihood:   {:.6} (full recomputation {:.6})",
        report.initial_log_likelihood, report.final_log_likelihood, report.full_log_likelihood
    );
    println!(
        "{} accepted, {} restored; {}",
        report.accepted, report.rejected, report.stats
    );

    if report.passed(config.check.tolerance) {
        println!("✓ Every restored state reproduced its stored likelihood.");
        Ok(())
    } else {
        for deviation in &report.deviations {
            warn!(
                "Cycle {}: stored {:.10}, restored {:.10}",
                deviation.cycle, deviation.stored, deviation.restored
            );
        }
        Err(CliError::CheckFailed(format!(
            "{} of {} restores deviated",
            report.deviations.len(),
            report.rejected
        )))
    }
}
