use super::compute::{
    ComputeEngine, EngineFactory, EngineFlags, InstanceDetails, InstanceSpec, RootRequest,
};
use super::config::LikelihoodConfig;
use super::error::EngineError;
use super::evaluation::{EvaluationCore, accumulate_scale_factors, upload_tips};
use super::operations::{BranchOperation, NodeOperation};
use super::rescaling::RescalingPolicy;
use super::state::EvaluationStats;
use super::substitution_delegate::SubstitutionModelDelegate;
use crate::core::models::patterns::PatternSource;
use crate::core::models::tree::Tree;
use crate::core::substitution::branch_model::BranchModel;
use crate::core::substitution::site_rates::SiteRateModel;
use tracing::{debug, info, instrument};

/// Computes the likelihood of sequence data on a tree through a compute engine.
///
/// A delegate does not own the tree. The caller tells it which branches changed and which
/// internal nodes need new partials, in post-order, and the delegate keeps the engine's
/// buffers consistent across evaluations and store/restore cycles.
pub trait DataLikelihoodDelegate {
    /// Log-likelihood after updating the given branches and nodes.
    ///
    /// Returns negative infinity when the result stays invalid after the permitted
    /// rescaling retry. Errors are reserved for engine and model failures.
    fn calculate_likelihood(
        &mut self,
        branch_operations: &[BranchOperation],
        node_operations: &[NodeOperation],
        root: usize,
    ) -> Result<f64, EngineError>;

    fn store_state(&mut self);

    fn restore_state(&mut self);

    fn accept_state(&mut self) {}

    /// Forces every model to be re-uploaded on the next evaluation.
    fn make_dirty(&mut self);

    fn mark_substitution_model_dirty(&mut self, partition: usize);

    fn mark_site_model_dirty(&mut self, partition: usize);

    fn partition_count(&self) -> usize;

    fn pattern_count(&self) -> usize;

    /// Weight of every pattern, in engine order.
    fn pattern_weights(&self) -> &[f64];

    /// Partition of every pattern, in engine order.
    fn pattern_partitions(&self) -> &[usize];

    /// Length of the buffer expected by [`DataLikelihoodDelegate::get_partials`].
    fn partials_len(&self) -> usize;

    /// Current partials of `node`, as stored by the engine.
    fn get_partials(&self, node: usize, out: &mut [f64]) -> Result<(), EngineError>;

    /// Per-pattern log-likelihoods of the last evaluation.
    fn site_log_likelihoods(&self) -> Result<Vec<f64>, EngineError>;

    /// Per-partition log-likelihoods of the last evaluation.
    fn partition_log_likelihoods(&self) -> &[f64];

    fn evaluation_stats(&self) -> EvaluationStats;

    fn rescaling_policy(&self) -> &RescalingPolicy;

    fn instance_details(&self) -> &InstanceDetails;

    fn branch_model_mut(&mut self, partition: usize) -> Option<&mut BranchModel>;

    fn site_model_mut(&mut self, partition: usize) -> Option<&mut (dyn SiteRateModel + 'static)>;
}

impl<D: DataLikelihoodDelegate + ?Sized> DataLikelihoodDelegate for Box<D> {
    fn calculate_likelihood(
        &mut self,
        branch_operations: &[BranchOperation],
        node_operations: &[NodeOperation],
        root: usize,
    ) -> Result<f64, EngineError> {
        (**self).calculate_likelihood(branch_operations, node_operations, root)
    }

    fn store_state(&mut self) {
        (**self).store_state()
    }

    fn restore_state(&mut self) {
        (**self).restore_state()
    }

    fn accept_state(&mut self) {
        (**self).accept_state()
    }

    fn make_dirty(&mut self) {
        (**self).make_dirty()
    }

    fn mark_substitution_model_dirty(&mut self, partition: usize) {
        (**self).mark_substitution_model_dirty(partition)
    }

    fn mark_site_model_dirty(&mut self, partition: usize) {
        (**self).mark_site_model_dirty(partition)
    }

    fn partition_count(&self) -> usize {
        (**self).partition_count()
    }

    fn pattern_count(&self) -> usize {
        (**self).pattern_count()
    }

    fn pattern_weights(&self) -> &[f64] {
        (**self).pattern_weights()
    }

    fn pattern_partitions(&self) -> &[usize] {
        (**self).pattern_partitions()
    }

    fn partials_len(&self) -> usize {
        (**self).partials_len()
    }

    fn get_partials(&self, node: usize, out: &mut [f64]) -> Result<(), EngineError> {
        (**self).get_partials(node, out)
    }

    fn site_log_likelihoods(&self) -> Result<Vec<f64>, EngineError> {
        (**self).site_log_likelihoods()
    }

    fn partition_log_likelihoods(&self) -> &[f64] {
        (**self).partition_log_likelihoods()
    }

    fn evaluation_stats(&self) -> EvaluationStats {
        (**self).evaluation_stats()
    }

    fn rescaling_policy(&self) -> &RescalingPolicy {
        (**self).rescaling_policy()
    }

    fn instance_details(&self) -> &InstanceDetails {
        (**self).instance_details()
    }

    fn branch_model_mut(&mut self, partition: usize) -> Option<&mut BranchModel> {
        (**self).branch_model_mut(partition)
    }

    fn site_model_mut(&mut self, partition: usize) -> Option<&mut (dyn SiteRateModel + 'static)> {
        (**self).site_model_mut(partition)
    }
}

/// Likelihood of one pattern set under one branch model and one site-rate model.
#[derive(Debug)]
pub struct SinglePartitionDelegate<E: ComputeEngine> {
    engine: E,
    core: EvaluationCore,
    substitution: SubstitutionModelDelegate,
    site_model: Box<dyn SiteRateModel>,
    pattern_count: usize,
    pattern_weights: Vec<f64>,
    pattern_partitions: Vec<usize>,
    state_count: usize,
    category_count: usize,
    update_substitution_model: bool,
    update_site_model: bool,
    last_log_likelihood: [f64; 1],
}

impl<E: ComputeEngine> SinglePartitionDelegate<E> {
    #[instrument(skip_all, name = "single_partition_setup")]
    pub fn new<F>(
        factory: &F,
        tree: &Tree,
        patterns: PatternSource,
        branch_model: BranchModel,
        site_model: Box<dyn SiteRateModel>,
        config: &LikelihoodConfig,
    ) -> Result<Self, EngineError>
    where
        F: EngineFactory<Engine = E>,
    {
        let patterns = if config.use_ambiguities {
            patterns.with_ambiguities()
        } else {
            patterns
        };
        let state_count = branch_model.state_count();
        let pattern_count = patterns.pattern_count();
        let category_count = site_model.category_count();
        let resolved = config.resolve(
            patterns.data_type().state_count(),
            state_count,
            pattern_count,
            branch_model.can_return_complex_diagonalization(),
        )?;

        let substitution = SubstitutionModelDelegate::new(
            branch_model,
            tree.node_count(),
            0,
            resolved.extra_buffer_count,
        );
        let mut core = EvaluationCore::new(tree, resolved.policy);

        let use_partials =
            config.use_ambiguities || matches!(patterns, PatternSource::Uncertain(_));
        let spec = InstanceSpec {
            tip_count: tree.tip_count(),
            partials_buffer_count: core.encoder.partials_buffer_count(),
            compact_buffer_count: if use_partials { 0 } else { tree.tip_count() },
            state_count,
            pattern_count,
            eigen_buffer_count: substitution.eigen_buffer_count(),
            matrix_buffer_count: substitution.matrix_buffer_count(),
            category_count,
            scale_buffer_count: core.encoder.scale_buffer_count(),
            partition_count: 1,
            resources: resolved.resources,
            preference_flags: resolved.preference_flags,
            requirement_flags: resolved.requirement_flags,
        };
        let mut engine = factory.create_instance(&spec)?;
        info!("Using compute engine {}", engine.details());

        core.policy
            .apply_engine_capabilities(engine.details().flags.contains(EngineFlags::SCALING_AUTO));

        info!(
            "{} ambiguities in tree likelihood",
            if use_partials { "Using" } else { "Ignoring" }
        );
        info!("With {} unique site patterns", pattern_count);

        upload_tips(&mut engine, tree, &[&patterns], use_partials)?;
        engine.set_pattern_weights(patterns.weights())?;

        info!("Using rescaling scheme: {}", core.policy.describe());

        Ok(Self {
            engine,
            core,
            substitution,
            site_model,
            pattern_count,
            pattern_weights: patterns.weights().to_vec(),
            pattern_partitions: vec![0; pattern_count],
            state_count,
            category_count,
            update_substitution_model: true,
            update_site_model: true,
            last_log_likelihood: [f64::NAN],
        })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn substitution_delegate(&self) -> &SubstitutionModelDelegate {
        &self.substitution
    }
}

impl<E: ComputeEngine> DataLikelihoodDelegate for SinglePartitionDelegate<E> {
    fn calculate_likelihood(
        &mut self,
        branch_operations: &[BranchOperation],
        node_operations: &[NodeOperation],
        root: usize,
    ) -> Result<f64, EngineError> {
        if self.update_substitution_model {
            self.substitution
                .update_substitution_models(&mut self.engine, true)?;
        }
        if self.update_site_model {
            self.engine
                .set_category_rates(0, &self.site_model.category_rates())?;
        }
        if !branch_operations.is_empty() {
            self.substitution
                .update_transition_matrices(&mut self.engine, branch_operations, 0, true)?;
        }
        // the frequency slot is not double-buffered, so a restore relies on this upload
        self.engine
            .set_state_frequencies(0, self.substitution.root_state_frequencies())?;
        if self.update_site_model {
            self.engine
                .set_category_weights(0, &self.site_model.category_proportions())?;
        }

        let engine = &mut self.engine;
        let substitution = &self.substitution;
        let log_likelihood = self.core.evaluate(
            node_operations,
            |encoder, operations, decision, flip| {
                let list = encoder.encode(operations, decision, flip, |node| {
                    substitution.matrix_index(node)
                });
                engine.update_partials(list.operations(), None)?;

                let accumulation = encoder.accumulation(decision);
                accumulate_scale_factors(engine, &accumulation)?;

                let request = RootRequest {
                    buffer: encoder.partials_index(root),
                    category_weights_index: 0,
                    state_frequencies_index: 0,
                    cumulative_scale: accumulation.cumulative_index(),
                    partition: 0,
                };
                Ok(engine.calculate_root_log_likelihoods(&[request])?)
            },
        )?;

        self.update_substitution_model = false;
        self.update_site_model = false;
        self.last_log_likelihood = [log_likelihood];
        Ok(log_likelihood)
    }

    fn store_state(&mut self) {
        self.core.store_state();
        self.substitution.store_state();
    }

    fn restore_state(&mut self) {
        debug!("Restoring stored likelihood state");
        // category rates live in a single engine slot and must be uploaded again
        self.update_site_model = true;
        self.core.restore_state();
        self.substitution.restore_state();
    }

    fn make_dirty(&mut self) {
        self.update_substitution_model = true;
        self.update_site_model = true;
    }

    fn mark_substitution_model_dirty(&mut self, _partition: usize) {
        self.update_substitution_model = true;
    }

    fn mark_site_model_dirty(&mut self, _partition: usize) {
        self.update_site_model = true;
    }

    fn partition_count(&self) -> usize {
        1
    }

    fn pattern_count(&self) -> usize {
        self.pattern_count
    }

    fn pattern_weights(&self) -> &[f64] {
        &self.pattern_weights
    }

    fn pattern_partitions(&self) -> &[usize] {
        &self.pattern_partitions
    }

    fn partials_len(&self) -> usize {
        self.category_count * self.pattern_count * self.state_count
    }

    fn get_partials(&self, node: usize, out: &mut [f64]) -> Result<(), EngineError> {
        self.engine
            .get_partials(self.core.encoder.partials_index(node), None, out)?;
        Ok(())
    }

    fn site_log_likelihoods(&self) -> Result<Vec<f64>, EngineError> {
        let mut out = vec![0.0; self.pattern_count];
        self.engine.site_log_likelihoods(&mut out)?;
        Ok(out)
    }

    fn partition_log_likelihoods(&self) -> &[f64] {
        &self.last_log_likelihood
    }

    fn evaluation_stats(&self) -> EvaluationStats {
        self.core.stats
    }

    fn rescaling_policy(&self) -> &RescalingPolicy {
        &self.core.policy
    }

    fn instance_details(&self) -> &InstanceDetails {
        self.engine.details()
    }

    fn branch_model_mut(&mut self, partition: usize) -> Option<&mut BranchModel> {
        (partition == 0).then_some(self.substitution.branch_model_mut())
    }

    fn site_model_mut(&mut self, partition: usize) -> Option<&mut (dyn SiteRateModel + 'static)> {
        (partition == 0).then_some(self.site_model.as_mut())
    }
}
