use std::fmt;

/// Running counters of a likelihood delegate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationStats {
    pub evaluations: usize,
    /// Attempts whose root log-likelihood was NaN or infinite.
    pub underflows: usize,
    pub retries: usize,
    /// Evaluations that ended in negative infinity.
    pub failures: usize,
}

impl fmt::Display for EvaluationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} evaluations, {} underflows, {} retries, {} failures",
            self.evaluations, self.underflows, self.retries, self.failures
        )
    }
}
