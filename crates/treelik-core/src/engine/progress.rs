/// Events emitted while a workflow drives a likelihood delegate.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    PhaseStart { name: &'static str },
    PhaseFinish,

    CyclesStart { total: u64 },
    CycleFinished(CycleOutcome),
    CyclesFinish,

    Message(String),
}

/// How a store/propose/evaluate cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Accepted,
    /// Rejected, and the restored state reproduced the stored likelihood.
    Restored,
    /// Rejected, but the restored state evaluated to a different likelihood.
    Deviated,
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn reporter_without_callback_ignores_events() {
        ProgressReporter::new().report(Progress::PhaseFinish);
    }

    #[test]
    fn reporter_forwards_events_in_order() {
        let seen = Mutex::new(Vec::new());
        let reporter = ProgressReporter::with_callback(Box::new(|event| {
            seen.lock().unwrap().push(event);
        }));
        reporter.report(Progress::CyclesStart { total: 2 });
        reporter.report(Progress::CycleFinished(CycleOutcome::Accepted));
        drop(reporter);
        assert_eq!(
            seen.into_inner().unwrap(),
            vec![
                Progress::CyclesStart { total: 2 },
                Progress::CycleFinished(CycleOutcome::Accepted)
            ]
        );
    }
}
