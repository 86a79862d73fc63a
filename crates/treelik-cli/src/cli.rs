use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "Tony Kan, Ted Yu, William A. Goddard III, Victor Wai Tak Kam",
    version,
    about = "treelik CLI - Evaluate phylogenetic tree likelihoods with double-buffered state and automatic underflow rescaling.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for parallel computation.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute the log-likelihood of an alignment on a tree.
    Evaluate(EvaluateArgs),
    /// Run random store/propose/restore cycles and verify restored likelihoods.
    Check(CheckArgs),
}

/// Inputs and model settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    // --- Core Arguments ---
    /// Path to the rooted binary tree in Newick format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub tree: PathBuf,

    /// Path to a FASTA alignment. Repeat to evaluate several partitions together.
    #[arg(short, long = "alignment", required = true, value_name = "PATH")]
    pub alignments: Vec<PathBuf>,

    /// Path to a configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    // --- Model Overrides ---
    /// Override the data type (nucleotide, binary).
    #[arg(long, value_name = "TYPE")]
    pub data_type: Option<String>,

    /// Override the substitution model (jc, hky, gtr).
    #[arg(short, long, value_name = "NAME")]
    pub model: Option<String>,

    /// Override the HKY transition/transversion ratio.
    #[arg(long, value_name = "FLOAT")]
    pub kappa: Option<f64>,

    // --- Engine Overrides ---
    /// Override the rescaling scheme (none, always, dynamic, delayed, auto, default).
    #[arg(short = 'r', long, value_name = "SCHEME")]
    pub rescaling: Option<String>,

    /// Rescale from the first evaluation instead of waiting for an underflow.
    #[arg(long)]
    pub no_delay: bool,

    /// Send ambiguity codes to the engine as partial likelihoods.
    #[arg(long)]
    pub use_ambiguities: bool,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S engine.rescaling-frequency=50
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `evaluate` subcommand.
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Write per-pattern log-likelihoods to a CSV file.
    #[arg(short = 'o', long, value_name = "PATH")]
    pub sites: Option<PathBuf>,
}

/// Arguments for the `check` subcommand.
#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Override the number of store/propose cycles.
    #[arg(short = 'n', long, value_name = "INT")]
    pub cycles: Option<u64>,

    /// Override the random seed.
    #[arg(long, value_name = "INT")]
    pub seed: Option<u64>,
}
