use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

/// Number of recomputations performed at the start of each dynamic rescaling window.
pub const RESCALE_TIMES: usize = 1;
/// Default number of evaluations in a dynamic rescaling window.
pub const RESCALE_FREQUENCY: usize = 100;

const UNDERFLOW_MESSAGE_INTERVAL: usize = 1000;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error("Invalid rescaling scheme: '{0}'")]
pub struct ParseRescalingSchemeError(String);

/// How partial likelihoods are rescaled to avoid floating-point underflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RescalingScheme {
    /// Never rescale.
    None,
    /// Recompute scale factors on every evaluation.
    Always,
    /// Recompute scale factors once per window of evaluations and reuse them in between.
    Dynamic,
    /// `Always`, but only once an underflow has been observed.
    Delayed,
    /// Let the compute engine rescale on its own.
    Auto,
    /// Pick a scheme suited to the engine; currently `Dynamic`.
    #[default]
    Default,
}

impl FromStr for RescalingScheme {
    type Err = ParseRescalingSchemeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "always" => Ok(Self::Always),
            "dynamic" => Ok(Self::Dynamic),
            "delayed" => Ok(Self::Delayed),
            "auto" => Ok(Self::Auto),
            "default" => Ok(Self::Default),
            _ => Err(ParseRescalingSchemeError(s.to_string())),
        }
    }
}

impl fmt::Display for RescalingScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::None => "none",
            Self::Always => "always",
            Self::Dynamic => "dynamic",
            Self::Delayed => "delayed",
            Self::Auto => "auto",
            Self::Default => "default",
        };
        f.write_str(text)
    }
}

/// Scaling flags in effect for one evaluation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScalingDecision {
    pub use_scale_factors: bool,
    pub recompute_scale_factors: bool,
    pub use_auto_scaling: bool,
    /// Every internal node must be recomputed, not only the dirty ones.
    pub update_all_nodes: bool,
}

/// Per-delegate rescaling state machine.
///
/// The scheme is normalized once at construction (`Default` becomes `Dynamic`, `Delayed`
/// becomes `Always` with delay-until-underflow) and possibly once more when the engine's
/// capabilities are known. After that only the counters and flags evolve.
#[derive(Debug, Clone, PartialEq)]
pub struct RescalingPolicy {
    requested: RescalingScheme,
    scheme: RescalingScheme,
    delay: bool,
    frequency: usize,
    use_auto_scaling: bool,
    ever_underflowed: bool,
    rescaling_count: usize,
    rescaling_count_inner: usize,
    use_scale_factors: bool,
    recompute_scale_factors: bool,
    underflow_messages: usize,
}

impl RescalingPolicy {
    pub fn new(requested: RescalingScheme, delay_until_underflow: bool, frequency: usize) -> Self {
        let (scheme, delay) = match requested {
            RescalingScheme::Default => (RescalingScheme::Dynamic, delay_until_underflow),
            RescalingScheme::Delayed => (RescalingScheme::Always, true),
            other => (other, delay_until_underflow),
        };
        Self {
            requested,
            scheme,
            delay,
            frequency: if frequency < 1 {
                RESCALE_FREQUENCY
            } else {
                frequency
            },
            use_auto_scaling: scheme == RescalingScheme::Auto,
            ever_underflowed: false,
            rescaling_count: 0,
            rescaling_count_inner: 0,
            use_scale_factors: false,
            recompute_scale_factors: false,
            underflow_messages: 0,
        }
    }

    pub fn requested(&self) -> RescalingScheme {
        self.requested
    }

    pub fn scheme(&self) -> RescalingScheme {
        self.scheme
    }

    pub fn delays_until_underflow(&self) -> bool {
        self.delay
    }

    pub fn frequency(&self) -> usize {
        self.frequency
    }

    /// Whether the engine should be asked for built-in automatic scaling.
    pub fn requests_auto_scaling(&self) -> bool {
        self.use_auto_scaling
    }

    pub fn ever_underflowed(&self) -> bool {
        self.ever_underflowed
    }

    pub fn rescaling_count(&self) -> usize {
        self.rescaling_count
    }

    pub fn rescaling_count_inner(&self) -> usize {
        self.rescaling_count_inner
    }

    /// Large state spaces without vectorization underflow too often for dynamic rescaling.
    pub fn demote_dynamic(&mut self) {
        if self.scheme == RescalingScheme::Dynamic {
            self.scheme = RescalingScheme::Delayed;
        }
    }

    /// Falls back to dynamic rescaling when automatic scaling is unavailable.
    pub fn apply_engine_capabilities(&mut self, auto_scaling_supported: bool) {
        if self.scheme == RescalingScheme::Auto && !auto_scaling_supported {
            self.scheme = RescalingScheme::Dynamic;
            self.use_auto_scaling = false;
            info!(
                "Automatic rescaling not supported by the compute engine, using: {}",
                self.scheme
            );
        }
    }

    /// Human-readable summary of the effective scheme, logged once at setup.
    pub fn describe(&self) -> String {
        let mut notes = Vec::new();
        if self.scheme == RescalingScheme::Dynamic {
            notes.push(format!("rescaling every {} evaluations", self.frequency));
        }
        if self.delay {
            notes.push("delay rescaling until first overflow".to_string());
        }
        if notes.is_empty() {
            self.scheme.to_string()
        } else {
            format!("{} ({})", self.scheme, notes.join(", "))
        }
    }

    pub fn decision(&self) -> ScalingDecision {
        ScalingDecision {
            use_scale_factors: self.use_scale_factors,
            recompute_scale_factors: self.recompute_scale_factors,
            use_auto_scaling: self.use_auto_scaling,
            update_all_nodes: false,
        }
    }

    /// Advances the state machine at the start of an evaluation.
    pub fn begin_evaluation(&mut self) -> ScalingDecision {
        self.recompute_scale_factors = false;
        let mut update_all_nodes = false;

        if !self.delay || self.ever_underflowed {
            match self.scheme {
                RescalingScheme::Always | RescalingScheme::Delayed => {
                    self.use_scale_factors = true;
                    self.recompute_scale_factors = true;
                }
                RescalingScheme::Dynamic => {
                    self.use_scale_factors = true;
                    if self.rescaling_count > self.frequency {
                        self.rescaling_count = 0;
                        self.rescaling_count_inner = 0;
                    }
                    if self.rescaling_count_inner < RESCALE_TIMES {
                        self.recompute_scale_factors = true;
                        update_all_nodes = true;
                        self.rescaling_count_inner += 1;
                    }
                    self.rescaling_count += 1;
                }
                _ => {}
            }
        }

        ScalingDecision {
            update_all_nodes,
            ..self.decision()
        }
    }

    /// A retry after an invalid result is allowed when rescaling was delayed.
    pub fn retry_permitted(&self) -> bool {
        self.delay || self.scheme == RescalingScheme::Delayed
    }

    /// Records a NaN or infinite root likelihood. Returns the decision for a retry
    /// when one is permitted on this attempt.
    pub fn record_underflow(&mut self, first_attempt: bool) -> Option<ScalingDecision> {
        self.ever_underflowed = true;
        if !(first_attempt && self.retry_permitted()) {
            return None;
        }

        if self.scheme == RescalingScheme::Dynamic || self.rescaling_count == 0 {
            if self.underflow_messages % UNDERFLOW_MESSAGE_INTERVAL == 0 {
                if self.underflow_messages > 0 {
                    info!(
                        "Underflow calculating likelihood ({} messages not shown).",
                        self.underflow_messages
                    );
                } else {
                    info!("Underflow calculating likelihood. Attempting a rescaling...");
                }
            }
            self.underflow_messages += 1;
        }

        Some(self.force_rescale())
    }

    pub fn force_rescale(&mut self) -> ScalingDecision {
        self.use_scale_factors = true;
        self.recompute_scale_factors = true;
        ScalingDecision {
            update_all_nodes: true,
            ..self.decision()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_normalizes_to_dynamic() {
        let policy = RescalingPolicy::new(RescalingScheme::Default, false, 100);
        assert_eq!(policy.scheme(), RescalingScheme::Dynamic);
        assert_eq!(policy.requested(), RescalingScheme::Default);
    }

    #[test]
    fn delayed_normalizes_to_always_with_delay() {
        let policy = RescalingPolicy::new(RescalingScheme::Delayed, false, 100);
        assert_eq!(policy.scheme(), RescalingScheme::Always);
        assert!(policy.delays_until_underflow());
        assert!(policy.retry_permitted());
    }

    #[test]
    fn frequency_below_one_falls_back_to_default() {
        let policy = RescalingPolicy::new(RescalingScheme::Dynamic, false, 0);
        assert_eq!(policy.frequency(), RESCALE_FREQUENCY);
    }

    #[test]
    fn auto_falls_back_to_dynamic_without_engine_support() {
        let mut policy = RescalingPolicy::new(RescalingScheme::Auto, false, 100);
        assert!(policy.requests_auto_scaling());
        policy.apply_engine_capabilities(false);
        assert_eq!(policy.scheme(), RescalingScheme::Dynamic);
        assert!(!policy.requests_auto_scaling());

        let mut supported = RescalingPolicy::new(RescalingScheme::Auto, false, 100);
        supported.apply_engine_capabilities(true);
        assert_eq!(supported.scheme(), RescalingScheme::Auto);
        assert!(supported.begin_evaluation().use_auto_scaling);
    }

    #[test]
    fn always_recomputes_every_evaluation() {
        let mut policy = RescalingPolicy::new(RescalingScheme::Always, false, 100);
        for _ in 0..5 {
            let decision = policy.begin_evaluation();
            assert!(decision.use_scale_factors);
            assert!(decision.recompute_scale_factors);
        }
    }

    #[test]
    fn none_never_uses_scale_factors() {
        let mut policy = RescalingPolicy::new(RescalingScheme::None, false, 100);
        for _ in 0..5 {
            assert_eq!(policy.begin_evaluation(), ScalingDecision::default());
        }
    }

    #[test]
    fn delay_keeps_scaling_off_until_first_underflow() {
        let mut policy = RescalingPolicy::new(RescalingScheme::Dynamic, true, 100);
        for _ in 0..3 {
            assert!(!policy.begin_evaluation().use_scale_factors);
        }
        assert!(policy.record_underflow(true).is_some());
        let decision = policy.begin_evaluation();
        assert!(decision.use_scale_factors);
        assert!(decision.recompute_scale_factors);
    }

    #[test]
    fn dynamic_window_recomputes_once_per_window() {
        let mut policy = RescalingPolicy::new(RescalingScheme::Dynamic, false, 100);
        let recomputes: Vec<bool> = (0..250)
            .map(|_| policy.begin_evaluation().recompute_scale_factors)
            .collect();

        // index k is evaluation k + 1
        assert!(recomputes[0]);
        assert!(recomputes[1..101].iter().all(|&r| !r));
        assert!(recomputes[101]);
        assert!(recomputes[102..202].iter().all(|&r| !r));
        assert!(recomputes[202]);
    }

    #[test]
    fn dynamic_recompute_requests_all_nodes() {
        let mut policy = RescalingPolicy::new(RescalingScheme::Dynamic, false, 100);
        assert!(policy.begin_evaluation().update_all_nodes);
        let second = policy.begin_evaluation();
        assert!(second.use_scale_factors);
        assert!(!second.update_all_nodes);
    }

    #[test]
    fn scale_factor_use_is_sticky() {
        let mut policy = RescalingPolicy::new(RescalingScheme::None, false, 100);
        policy.force_rescale();
        let decision = policy.begin_evaluation();
        assert!(decision.use_scale_factors);
        assert!(!decision.recompute_scale_factors);
    }

    #[test]
    fn record_underflow_permits_only_first_attempt_when_delayed() {
        let mut policy = RescalingPolicy::new(RescalingScheme::Always, true, 100);
        assert!(policy.record_underflow(true).is_some());
        assert!(policy.record_underflow(false).is_none());
        assert!(policy.ever_underflowed());

        let mut undelayed = RescalingPolicy::new(RescalingScheme::Always, false, 100);
        assert!(undelayed.record_underflow(true).is_none());
        assert!(undelayed.ever_underflowed());
    }

    #[test]
    fn demote_dynamic_turns_dynamic_into_delayed() {
        let mut policy = RescalingPolicy::new(RescalingScheme::Dynamic, false, 100);
        policy.demote_dynamic();
        assert_eq!(policy.scheme(), RescalingScheme::Delayed);
        assert!(policy.retry_permitted());
        assert!(policy.begin_evaluation().recompute_scale_factors);
    }

    #[test]
    fn scheme_parses_and_displays() {
        for scheme in [
            RescalingScheme::None,
            RescalingScheme::Always,
            RescalingScheme::Dynamic,
            RescalingScheme::Delayed,
            RescalingScheme::Auto,
            RescalingScheme::Default,
        ] {
            assert_eq!(scheme.to_string().parse::<RescalingScheme>().unwrap(), scheme);
        }
        assert!("sometimes".parse::<RescalingScheme>().is_err());
    }
}
