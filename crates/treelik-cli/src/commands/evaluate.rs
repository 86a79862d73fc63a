use super::load_likelihood;
use crate::cli::EvaluateArgs;
use crate::config::builder::build_config;
use crate::error::Result;
use tracing::info;
use treelik::core::io::site_table::write_site_table;
use treelik::engine::delegate::DataLikelihoodDelegate;
use treelik::engine::error::EngineError;

pub fn run(args: EvaluateArgs) -> Result<()> {
    info!("Merging configuration from file and CLI arguments...");
    let config = build_config(&args.input)?;
    let mut likelihood = load_likelihood(&config)?;

    let log_likelihood = likelihood.log_likelihood()?;
    let partitions = likelihood.partition_log_likelihoods()?;
    let stats = likelihood.delegate().evaluation_stats();
    info!("Evaluation finished ({}).", stats);

    println!("Log-likelihood: {:.6}", log_likelihood);
    if partitions.len() > 1 {
        for (i, value) in partitions.iter().enumerate() {
            println!("  Partition {}: {:.6}", i + 1, value);
        }
    }
    println!("Rescaling: {}", likelihood.delegate().rescaling_policy().describe());

    if let Some(path) = &args.sites {
        let records = likelihood.site_records()?;
        write_site_table(path, &records).map_err(EngineError::from)?;
        println!("✓ Per-pattern log-likelihoods written to: {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;
    use treelik::core::io::site_table::read_site_table;

    fn write_inputs(dir: &Path) {
        fs::write(dir.join("tree.nwk"), "((A:0.1,B:0.2):0.3,(C:0.4,D:0.5):0.6);\n").unwrap();
        fs::write(
            dir.join("first.fasta"),
            ">A\nACGTACGT\n>B\nACGTTCGT\n>C\nACGAACGG\n>D\nTCGAACGG\n",
        )
        .unwrap();
        fs::write(dir.join("second.fasta"), ">A\nGGA\n>B\nGGT\n>C\nCGA\n>D\nCGA\n").unwrap();
    }

    fn evaluate_args(dir: &Path, extra: &[&str]) -> EvaluateArgs {
        let tree = dir.join("tree.nwk");
        let mut args = vec![
            "treelik".to_string(),
            "evaluate".to_string(),
            "-t".to_string(),
            tree.to_string_lossy().to_string(),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));
        match Cli::parse_from(args).command {
            Commands::Evaluate(evaluate) => evaluate,
            _ => panic!("Expected 'evaluate' subcommand"),
        }
    }

    #[test]
    fn writes_one_row_per_pattern_of_every_partition() {
        let dir = tempdir().unwrap();
        write_inputs(dir.path());
        let first = dir.path().join("first.fasta");
        let second = dir.path().join("second.fasta");
        let sites = dir.path().join("sites.csv");
        let args = evaluate_args(
            dir.path(),
            &[
                "-a",
                first.to_str().unwrap(),
                "-a",
                second.to_str().unwrap(),
                "-o",
                sites.to_str().unwrap(),
            ],
        );
        run(args).unwrap();

        let records = read_site_table(&sites).unwrap();
        assert!(records.iter().any(|r| r.partition == 1));
        assert!(records.iter().all(|r| r.log_likelihood < 0.0));
        let weights: f64 = records.iter().map(|r| r.weight).sum();
        assert_eq!(weights, 11.0);
    }

    #[test]
    fn unreadable_alignment_is_a_parse_error() {
        let dir = tempdir().unwrap();
        write_inputs(dir.path());
        let missing = dir.path().join("missing.fasta");
        let args = evaluate_args(dir.path(), &["-a", missing.to_str().unwrap()]);
        assert!(matches!(
            run(args),
            Err(crate::error::CliError::FileParsing { .. })
        ));
    }
}
