use super::compute::ComputeEngine;
use super::error::EngineError;
use super::operations::{NodeOperation, OperationEncoder, ScaleAccumulation};
use super::rescaling::{RescalingPolicy, ScalingDecision};
use super::state::EvaluationStats;
use super::traversal::all_node_operations;
use crate::core::models::patterns::PatternSource;
use crate::core::models::tree::Tree;
use tracing::{debug, trace, warn};

/// Rescaling and retry bookkeeping shared by every delegate flavour.
#[derive(Debug, Clone)]
pub(crate) struct EvaluationCore {
    pub encoder: OperationEncoder,
    pub policy: RescalingPolicy,
    pub stats: EvaluationStats,
    all_nodes: Vec<NodeOperation>,
    retried_since_store: bool,
    refresh_pending: bool,
}

impl EvaluationCore {
    pub fn new(tree: &Tree, policy: RescalingPolicy) -> Self {
        Self {
            encoder: OperationEncoder::new(tree.node_count(), tree.tip_count()),
            policy,
            stats: EvaluationStats::default(),
            all_nodes: all_node_operations(tree),
            retried_since_store: false,
            refresh_pending: false,
        }
    }

    /// Runs one likelihood evaluation.
    ///
    /// `attempt` encodes the given node operations with the given scaling decision and
    /// returns the root log-likelihood. It is called once, or twice when the first result
    /// is not finite and the policy permits a rescaled retry. The retry recomputes every
    /// internal node into its current buffers.
    pub fn evaluate<F>(&mut self, node_operations: &[NodeOperation], mut attempt: F) -> Result<f64, EngineError>
    where
        F: FnMut(&mut OperationEncoder, &[NodeOperation], &ScalingDecision, bool) -> Result<f64, EngineError>,
    {
        self.stats.evaluations += 1;

        let mut decision = self.policy.begin_evaluation();
        if self.refresh_pending {
            debug!("Refreshing all partials after a restore that followed a rescaled retry");
            decision = self.policy.force_rescale();
            self.refresh_pending = false;
        }

        let mut operations = if decision.update_all_nodes {
            self.all_nodes.as_slice()
        } else {
            node_operations
        };
        let mut flip = true;
        let mut first_attempt = true;

        loop {
            trace!(count = operations.len(), ?decision, flip, "Evaluating likelihood");
            let log_likelihood = attempt(&mut self.encoder, operations, &decision, flip)?;
            if log_likelihood.is_finite() {
                return Ok(log_likelihood);
            }

            self.stats.underflows += 1;
            match self.policy.record_underflow(first_attempt) {
                Some(retry) => {
                    self.stats.retries += 1;
                    self.retried_since_store = true;
                    decision = retry;
                    operations = self.all_nodes.as_slice();
                    flip = false;
                    first_attempt = false;
                }
                None => {
                    self.stats.failures += 1;
                    return Ok(f64::NEG_INFINITY);
                }
            }
        }
    }

    pub fn store_state(&mut self) {
        self.encoder.store_state();
        self.retried_since_store = false;
    }

    pub fn restore_state(&mut self) {
        self.encoder.restore_state();
        if self.retried_since_store {
            self.refresh_pending = true;
            self.retried_since_store = false;
        }
    }
}

/// Resets and fills the cumulative scale buffer an attempt needs before the root call.
pub(crate) fn accumulate_scale_factors<E: ComputeEngine>(
    engine: &mut E,
    accumulation: &ScaleAccumulation,
) -> Result<(), EngineError> {
    match accumulation {
        ScaleAccumulation::Recompute {
            destination,
            sources,
        } => {
            engine.reset_scale_factors(*destination)?;
            engine.accumulate_scale_factors(sources, Some(*destination))?;
        }
        ScaleAccumulation::Auto { sources } => {
            engine.accumulate_scale_factors(sources, None)?;
        }
        ScaleAccumulation::None | ScaleAccumulation::Reuse(_) => {}
    }
    Ok(())
}

/// Maps every tip of `tree` to its row in each of `sources` and uploads the tip data.
///
/// Exact patterns are sent as compact states unless any source is uncertain or
/// `use_partials` is set, in which case every tip becomes a partials buffer.
pub(crate) fn upload_tips<E: ComputeEngine>(
    engine: &mut E,
    tree: &Tree,
    sources: &[&PatternSource],
    use_partials: bool,
) -> Result<(), EngineError> {
    let use_partials = use_partials
        || sources
            .iter()
            .any(|source| matches!(source, PatternSource::Uncertain(_)));

    for tip in 0..tree.tip_count() {
        let taxon = tree
            .taxon_id(tip)
            .ok_or_else(|| EngineError::Internal(format!("tip {tip} has no taxon")))?;
        let rows = sources
            .iter()
            .enumerate()
            .map(|(i, source)| {
                source
                    .taxon_index(taxon)
                    .ok_or_else(|| EngineError::MissingTaxon {
                        taxon: taxon.to_string(),
                        source_name: format!("pattern set {i}"),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if use_partials {
            let mut partials = Vec::new();
            for (source, &row) in sources.iter().zip(&rows) {
                append_partials(source, row, &mut partials);
            }
            engine.set_tip_partials(tip, &partials)?;
        } else {
            let mut states = Vec::new();
            for (source, &row) in sources.iter().zip(&rows) {
                if let PatternSource::Exact(patterns) = source {
                    states.extend((0..patterns.pattern_count()).map(|p| patterns.state(row, p)));
                }
            }
            engine.set_tip_states(tip, &states)?;
        }
    }

    if sources
        .iter()
        .any(|source| source.taxa().len() > tree.tip_count())
    {
        warn!("Pattern data contains taxa that are not in the tree; they are ignored");
    }
    Ok(())
}

fn append_partials(source: &PatternSource, row: usize, out: &mut Vec<f64>) {
    match source {
        PatternSource::Exact(patterns) => {
            let data_type = patterns.data_type();
            for pattern in 0..patterns.pattern_count() {
                out.extend(
                    data_type
                        .state_set(patterns.state(row, pattern))
                        .into_iter()
                        .map(|on| if on { 1.0 } else { 0.0 }),
                );
            }
        }
        PatternSource::Uncertain(patterns) => {
            out.extend_from_slice(patterns.taxon_partials(row));
        }
    }
}
