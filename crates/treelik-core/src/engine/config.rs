use super::compute::EngineFlags;
use super::rescaling::{RESCALE_FREQUENCY, RescalingPolicy, RescalingScheme};
use thiserror::Error;
use tracing::debug;

/// Four-state data sets below this many patterns prefer the CPU when nothing else is asked for.
const CPU_PATTERN_THRESHOLD: usize = 10_000;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Conflicting engine flags requested: {0}")]
    ConflictingFlags(EngineFlags),

    #[error("Pattern data has {patterns} states but the substitution model has {model}")]
    StateCountMismatch { patterns: usize, model: usize },
}

/// Settings for one likelihood delegate.
///
/// The `*_order` lists are consulted round-robin by [`LikelihoodConfig::instance`], so a
/// set of delegates created from one configuration can be spread over several resources
/// or scaling schemes.
#[derive(Debug, Clone, PartialEq)]
pub struct LikelihoodConfig {
    pub rescaling_scheme: RescalingScheme,
    pub rescaling_frequency: usize,
    pub delay_rescaling_until_underflow: bool,
    pub resource_order: Vec<usize>,
    pub preferred_flags: Vec<EngineFlags>,
    pub required_flags: Vec<EngineFlags>,
    pub scaling_order: Vec<RescalingScheme>,
    pub extra_buffer_order: Vec<usize>,
    /// Hand ambiguity codes to the engine as partials instead of as "missing" states.
    pub use_ambiguities: bool,
    /// Keep SSE preferences even for state counts other than four.
    pub force_vectorization: bool,
    pub instance: usize,
}

impl Default for LikelihoodConfig {
    fn default() -> Self {
        Self {
            rescaling_scheme: RescalingScheme::Default,
            rescaling_frequency: RESCALE_FREQUENCY,
            delay_rescaling_until_underflow: true,
            resource_order: Vec::new(),
            preferred_flags: Vec::new(),
            required_flags: Vec::new(),
            scaling_order: Vec::new(),
            extra_buffer_order: Vec::new(),
            use_ambiguities: false,
            force_vectorization: false,
            instance: 0,
        }
    }
}

/// Engine request derived from a [`LikelihoodConfig`] and the data it will run on.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEngineSettings {
    pub resources: Vec<usize>,
    pub preference_flags: EngineFlags,
    pub requirement_flags: EngineFlags,
    pub extra_buffer_count: usize,
    pub policy: RescalingPolicy,
    /// SSE was dropped for a non-four-state model; used to demote dynamic rescaling.
    pub vectorization_disabled: bool,
}

fn round_robin<T: Copy>(order: &[T], instance: usize) -> Option<T> {
    if order.is_empty() {
        None
    } else {
        Some(order[instance % order.len()])
    }
}

impl LikelihoodConfig {
    pub fn builder() -> LikelihoodConfigBuilder {
        LikelihoodConfigBuilder::new()
    }

    /// Works out resources, flags and the rescaling policy for this instance.
    pub fn resolve(
        &self,
        pattern_state_count: usize,
        model_state_count: usize,
        pattern_count: usize,
        complex_eigen: bool,
    ) -> Result<ResolvedEngineSettings, ConfigError> {
        if pattern_state_count != model_state_count {
            return Err(ConfigError::StateCountMismatch {
                patterns: pattern_state_count,
                model: model_state_count,
            });
        }
        let state_count = model_state_count;
        let instance = self.instance;

        let scheme = round_robin(&self.scaling_order, instance).unwrap_or(self.rescaling_scheme);
        let mut policy = RescalingPolicy::new(
            scheme,
            self.delay_rescaling_until_underflow,
            self.rescaling_frequency,
        );

        let mut resources = Vec::new();
        let mut preference_flags = EngineFlags::NONE;
        let mut requirement_flags = EngineFlags::NONE;

        if let Some(resource) = round_robin(&self.resource_order, instance) {
            // the trailing CPU is the fallback if the requested resource fails
            resources = vec![resource, 0];
            if resource > 0 {
                preference_flags |= EngineFlags::PROCESSOR_GPU;
            }
        }
        if let Some(flags) = round_robin(&self.preferred_flags, instance) {
            preference_flags = flags;
        }
        if let Some(flags) = round_robin(&self.required_flags, instance) {
            requirement_flags = flags;
        }
        let extra_buffer_count = round_robin(&self.extra_buffer_order, instance).unwrap_or(0);

        if policy.requests_auto_scaling() {
            preference_flags |= EngineFlags::SCALING_AUTO;
        }

        if preference_flags.is_empty()
            && resources.is_empty()
            && state_count == 4
            && pattern_count < CPU_PATTERN_THRESHOLD
        {
            preference_flags |= EngineFlags::PROCESSOR_CPU;
        }

        let mut vectorization_disabled = false;
        if preference_flags.contains(EngineFlags::VECTOR_SSE)
            && state_count != 4
            && !self.force_vectorization
        {
            preference_flags.remove(EngineFlags::VECTOR_SSE);
            preference_flags |= EngineFlags::VECTOR_NONE;
            vectorization_disabled = true;
            if state_count > 4 {
                policy.demote_dynamic();
            }
        }

        if !preference_flags.contains(EngineFlags::PRECISION_SINGLE) {
            preference_flags |= EngineFlags::PRECISION_DOUBLE;
        }
        if complex_eigen {
            requirement_flags |= EngineFlags::EIGEN_COMPLEX;
        }

        debug!(
            instance,
            %preference_flags,
            %requirement_flags,
            "Resolved engine settings"
        );

        Ok(ResolvedEngineSettings {
            resources,
            preference_flags,
            requirement_flags,
            extra_buffer_count,
            policy,
            vectorization_disabled,
        })
    }
}

#[derive(Default)]
pub struct LikelihoodConfigBuilder {
    rescaling_scheme: Option<RescalingScheme>,
    rescaling_frequency: Option<usize>,
    delay_rescaling_until_underflow: Option<bool>,
    resource_order: Vec<usize>,
    preferred_flags: Vec<EngineFlags>,
    required_flags: Vec<EngineFlags>,
    scaling_order: Vec<RescalingScheme>,
    extra_buffer_order: Vec<usize>,
    use_ambiguities: Option<bool>,
    force_vectorization: Option<bool>,
    instance: Option<usize>,
}

impl LikelihoodConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rescaling_scheme(mut self, scheme: RescalingScheme) -> Self {
        self.rescaling_scheme = Some(scheme);
        self
    }
    pub fn rescaling_frequency(mut self, frequency: usize) -> Self {
        self.rescaling_frequency = Some(frequency);
        self
    }
    pub fn delay_rescaling_until_underflow(mut self, delay: bool) -> Self {
        self.delay_rescaling_until_underflow = Some(delay);
        self
    }
    pub fn resource_order(mut self, order: Vec<usize>) -> Self {
        self.resource_order = order;
        self
    }
    pub fn preferred_flags(mut self, order: Vec<EngineFlags>) -> Self {
        self.preferred_flags = order;
        self
    }
    pub fn required_flags(mut self, order: Vec<EngineFlags>) -> Self {
        self.required_flags = order;
        self
    }
    pub fn scaling_order(mut self, order: Vec<RescalingScheme>) -> Self {
        self.scaling_order = order;
        self
    }
    pub fn extra_buffer_order(mut self, order: Vec<usize>) -> Self {
        self.extra_buffer_order = order;
        self
    }
    pub fn use_ambiguities(mut self, use_ambiguities: bool) -> Self {
        self.use_ambiguities = Some(use_ambiguities);
        self
    }
    pub fn force_vectorization(mut self, force: bool) -> Self {
        self.force_vectorization = Some(force);
        self
    }
    pub fn instance(mut self, instance: usize) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn build(self) -> Result<LikelihoodConfig, ConfigError> {
        let precision = EngineFlags::PRECISION_SINGLE | EngineFlags::PRECISION_DOUBLE;
        if let Some(&flags) = self
            .required_flags
            .iter()
            .find(|flags| flags.contains(precision))
        {
            return Err(ConfigError::ConflictingFlags(flags));
        }

        let defaults = LikelihoodConfig::default();
        Ok(LikelihoodConfig {
            rescaling_scheme: self.rescaling_scheme.unwrap_or(defaults.rescaling_scheme),
            rescaling_frequency: self
                .rescaling_frequency
                .unwrap_or(defaults.rescaling_frequency),
            delay_rescaling_until_underflow: self
                .delay_rescaling_until_underflow
                .unwrap_or(defaults.delay_rescaling_until_underflow),
            resource_order: self.resource_order,
            preferred_flags: self.preferred_flags,
            required_flags: self.required_flags,
            scaling_order: self.scaling_order,
            extra_buffer_order: self.extra_buffer_order,
            use_ambiguities: self.use_ambiguities.unwrap_or(defaults.use_ambiguities),
            force_vectorization: self
                .force_vectorization
                .unwrap_or(defaults.force_vectorization),
            instance: self.instance.unwrap_or(defaults.instance),
        })
    }
}
