use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use treelik::engine::progress::{CycleOutcome, Progress, ProgressCallback};

const SPINNER_TICK_MS: u64 = 80;

/// Running outcome counts of a store/restore check.
#[derive(Debug, Default)]
pub struct CycleTally {
    accepted: AtomicU64,
    restored: AtomicU64,
    deviated: AtomicU64,
}

impl CycleTally {
    fn record(&self, outcome: CycleOutcome) {
        let counter = match outcome {
            CycleOutcome::Accepted => &self.accepted,
            CycleOutcome::Restored => &self.restored,
            CycleOutcome::Deviated => &self.deviated,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        for counter in [&self.accepted, &self.restored, &self.deviated] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// `(accepted, restored, deviated)`
    pub fn counts(&self) -> (u64, u64, u64) {
        (
            self.accepted.load(Ordering::Relaxed),
            self.restored.load(Ordering::Relaxed),
            self.deviated.load(Ordering::Relaxed),
        )
    }

    pub fn summary(&self) -> String {
        let (accepted, restored, deviated) = self.counts();
        let total = accepted + restored + deviated;
        let rate = if total == 0 {
            0.0
        } else {
            100.0 * accepted as f64 / total as f64
        };
        format!("{accepted} accepted ({rate:.0}%), {restored} restored, {deviated} deviated")
    }
}

/// Cycle bar for `treelik check`, labelled with the acceptance rate and restore failures.
#[derive(Clone)]
pub struct CheckProgressBar {
    bar: ProgressBar,
    tally: Arc<CycleTally>,
}

impl CheckProgressBar {
    pub fn new() -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr())
    }

    fn with_draw_target(target: ProgressDrawTarget) -> Self {
        Self {
            bar: ProgressBar::with_draw_target(Some(0), target),
            tally: Arc::new(CycleTally::default()),
        }
    }

    pub fn tally(&self) -> &CycleTally {
        &self.tally
    }

    pub fn callback(&self) -> ProgressCallback<'static> {
        let bar = self.bar.clone();
        let tally = Arc::clone(&self.tally);

        Box::new(move |event: Progress| match event {
            Progress::PhaseStart { name } => {
                bar.set_style(spinner_style());
                bar.set_prefix(name);
                bar.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
            }
            Progress::CyclesStart { total } => {
                tally.reset();
                bar.disable_steady_tick();
                bar.set_style(cycle_style());
                bar.set_length(total);
                bar.set_position(0);
                bar.set_message(tally.summary());
            }
            Progress::CycleFinished(outcome) => {
                tally.record(outcome);
                if outcome == CycleOutcome::Deviated {
                    bar.println(format!(
                        "  ⚠ cycle {}: restored state changed the likelihood",
                        bar.position()
                    ));
                }
                bar.set_message(tally.summary());
                bar.inc(1);
            }
            Progress::CyclesFinish => {
                bar.set_message(tally.summary());
            }
            Progress::PhaseFinish => {
                bar.finish_with_message(format!("✓ {}", tally.summary()));
            }
            Progress::Message(msg) => bar.println(format!("  {msg}")),
        })
    }
}

impl Default for CheckProgressBar {
    fn default() -> Self {
        Self::new()
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {prefix}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn cycle_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}
