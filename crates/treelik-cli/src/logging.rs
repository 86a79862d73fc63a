use crate::error::{CliError, Result};
use std::fs::File;
use std::path::PathBuf;
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::LevelFilter,
    fmt::{self},
    prelude::*,
    registry::LookupSpan,
};

fn level_for(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        LevelFilter::ERROR
    } else {
        match verbosity {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

/// Flag level as the default directive, refined by `directives` in `RUST_LOG` syntax.
fn filter_for(verbosity: u8, quiet: bool, directives: Option<&str>) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level_for(verbosity, quiet).into())
        .parse_lossy(directives.unwrap_or_default())
}

fn file_layer<S>(file: File) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_target(true)
}

/// Installs the global subscriber. `RUST_LOG` directives refine the level chosen by flags.
pub fn setup_logging(verbosity: u8, quiet: bool, log_file: Option<PathBuf>) -> Result<()> {
    let directives = std::env::var("RUST_LOG").ok();
    let filter = filter_for(verbosity, quiet, directives.as_deref());

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .compact();

    let subscriber = tracing_subscriber::registry().with(filter).with(stderr_layer);

    if let Some(path) = log_file {
        let file = File::create(&path).map_err(CliError::Io)?;
        subscriber.with(file_layer(file)).init();
    } else {
        subscriber.init();
    }

    Ok(())
}
