use super::compute::{
    ComputeEngine, EngineFactory, EngineFlags, InstanceDetails, InstanceSpec, RootRequest,
};
use super::config::{ConfigError, LikelihoodConfig};
use super::delegate::DataLikelihoodDelegate;
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

/// One block of patterns with its own evolutionary models.
#[derive(Debug)]
pub struct PartitionData {
    pub patterns: PatternSource,
    pub branch_model: BranchModel,
    pub site_model: Box<dyn SiteRateModel>,
}

#[derive(Debug)]
struct Partition {
    substitution: SubstitutionModelDelegate,
    site_model: Box<dyn SiteRateModel>,
    update_substitution_model: bool,
    update_site_model: bool,
}

/// Likelihood of several partitions sharing one tree and one engine instance.
///
/// Patterns of all partitions are concatenated and tagged with their partition. The
/// partials and scale buffers are shared and flipped once per node; every partition
/// owns a disjoint range of eigen and matrix buffers and the category-rate, weight and
/// frequency slot matching its index.
#[derive(Debug)]
pub struct MultiPartitionDelegate<E: ComputeEngine> {
    engine: E,
    core: EvaluationCore,
    partitions: Vec<Partition>,
    pattern_count: usize,
    pattern_weights: Vec<f64>,
    pattern_partitions: Vec<usize>,
    state_count: usize,
    category_count: usize,
    partition_log_likelihoods: Vec<f64>,
}

impl<E: ComputeEngine> MultiPartitionDelegate<E> {
    #[instrument(skip_all, name = "multi_partition_setup", fields(partitions = data.len()))]
    pub fn new<F>(
        factory: &F,
        tree: &Tree,
        data: Vec<PartitionData>,
        config: &LikelihoodConfig,
    ) -> Result<Self, EngineError>
    where
        F: EngineFactory<Engine = E>,
    {
        let first = data
            .first()
            .ok_or_else(|| EngineError::IncompatibleData("no partitions given".to_string()))?;
        let data_type = first.patterns.data_type();
        let category_count = first.site_model.category_count();
        let state_count = first.branch_model.state_count();

        for (index, partition) in data.iter().enumerate() {
            if partition.patterns.data_type() != data_type {
                return Err(EngineError::IncompatibleData(format!(
                    "partition {index} has data type {}, expected {data_type}",
                    partition.patterns.data_type()
                )));
            }
            if partition.site_model.category_count() != category_count {
                return Err(EngineError::IncompatibleData(format!(
                    "partition {index} has {} rate categories, expected {category_count}",
                    partition.site_model.category_count()
                )));
            }
            if partition.branch_model.state_count() != data_type.state_count() {
                return Err(ConfigError::StateCountMismatch {
                    patterns: data_type.state_count(),
                    model: partition.branch_model.state_count(),
                }
                .into());
            }
        }

        let patterns: Vec<PatternSource> = data
            .iter()
            .map(|partition| {
                if config.use_ambiguities {
                    partition.patterns.clone().with_ambiguities()
                } else {
                    partition.patterns.clone()
                }
            })
            .collect();
        let pattern_count: usize = patterns.iter().map(PatternSource::pattern_count).sum();
        let complex_eigen = data
            .iter()
            .any(|partition| partition.branch_model.can_return_complex_diagonalization());

        let resolved = config.resolve(data_type.state_count(), state_count, pattern_count, complex_eigen)?;
        let mut core = EvaluationCore::new(tree, resolved.policy);

        let partition_count = data.len();
        let partitions: Vec<Partition> = data
            .into_iter()
            .enumerate()
            .map(|(index, partition)| Partition {
                substitution: SubstitutionModelDelegate::new(
                    partition.branch_model,
                    tree.node_count(),
                    index,
                    resolved.extra_buffer_count,
                ),
                site_model: partition.site_model,
                update_substitution_model: true,
                update_site_model: true,
            })
            .collect();

        let use_partials = config.use_ambiguities
            || patterns
                .iter()
                .any(|source| matches!(source, PatternSource::Uncertain(_)));
        let spec = InstanceSpec {
            tip_count: tree.tip_count(),
            partials_buffer_count: core.encoder.partials_buffer_count(),
            compact_buffer_count: if use_partials { 0 } else { tree.tip_count() },
            state_count,
            pattern_count,
            eigen_buffer_count: partitions
                .iter()
                .map(|p| p.substitution.eigen_buffer_count())
                .sum(),
            matrix_buffer_count: partitions
                .iter()
                .map(|p| p.substitution.matrix_buffer_count())
                .sum(),
            category_count,
            scale_buffer_count: core.encoder.scale_buffer_count(),
            partition_count,
            resources: resolved.resources,
            preference_flags: resolved.preference_flags,
            requirement_flags: resolved.requirement_flags,
        };
        let mut engine = factory.create_instance(&spec)?;
        info!("Using compute engine {}", engine.details());
        core.policy
            .apply_engine_capabilities(engine.details().flags.contains(EngineFlags::SCALING_AUTO));

        let assignments: Vec<usize> = patterns
            .iter()
            .enumerate()
            .flat_map(|(index, source)| std::iter::repeat_n(index, source.pattern_count()))
            .collect();
        engine.set_pattern_partitions(partition_count, &assignments)?;

        let sources: Vec<&PatternSource> = patterns.iter().collect();
        upload_tips(&mut engine, tree, &sources, use_partials)?;
        let weights: Vec<f64> = patterns
            .iter()
            .flat_map(|source| source.weights().iter().copied())
            .collect();
        engine.set_pattern_weights(&weights)?;

        info!(
            "With {} partitions and {} unique site patterns",
            partition_count, pattern_count
        );
        info!("Using rescaling scheme: {}", core.policy.describe());

        Ok(Self {
            engine,
            core,
            partitions,
            pattern_count,
            pattern_weights: weights,
            pattern_partitions: assignments,
            state_count,
            category_count,
            partition_log_likelihoods: vec![f64::NAN; partition_count],
        })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }
}

impl<E: ComputeEngine> DataLikelihoodDelegate for MultiPartitionDelegate<E> {
    fn calculate_likelihood(
        &mut self,
        branch_operations: &[BranchOperation],
        node_operations: &[NodeOperation],
        root: usize,
    ) -> Result<f64, EngineError> {
        for partition in &mut self.partitions {
            if partition.update_substitution_model {
                partition
                    .substitution
                    .update_substitution_models(&mut self.engine, true)?;
            }
        }
        for (index, partition) in self.partitions.iter().enumerate() {
            if partition.update_site_model {
                self.engine
                    .set_category_rates(index, &partition.site_model.category_rates())?;
            }
        }
        if !branch_operations.is_empty() {
            for (index, partition) in self.partitions.iter_mut().enumerate() {
                partition.substitution.update_transition_matrices(
                    &mut self.engine,
                    branch_operations,
                    index,
                    true,
                )?;
            }
        }
        for (index, partition) in self.partitions.iter().enumerate() {
            self.engine
                .set_state_frequencies(index, partition.substitution.root_state_frequencies())?;
            if partition.update_site_model {
                self.engine
                    .set_category_weights(index, &partition.site_model.category_proportions())?;
            }
        }

        let engine = &mut self.engine;
        let partitions = &self.partitions;
        let by_partition = &mut self.partition_log_likelihoods;
        let partition_count = partitions.len();
        let log_likelihood = self.core.evaluate(
            node_operations,
            |encoder, operations, decision, flip| {
                let batch = encoder.encode_partitioned(
                    operations,
                    decision,
                    flip,
                    partition_count,
                    |partition, node| partitions[partition].substitution.matrix_index(node),
                );
                engine.update_partials_by_partition(&batch)?;

                let accumulation = encoder.accumulation(decision);
                accumulate_scale_factors(engine, &accumulation)?;

                let buffer = encoder.partials_index(root);
                let requests: Vec<RootRequest> = (0..partition_count)
                    .map(|partition| RootRequest {
                        buffer,
                        category_weights_index: partition,
                        state_frequencies_index: partition,
                        cumulative_scale: accumulation.cumulative_index(),
                        partition,
                    })
                    .collect();
                let values = engine.calculate_root_log_likelihoods_by_partition(&requests)?;
                let total = values.iter().sum();
                *by_partition = values;
                Ok(total)
            },
        )?;

        for partition in &mut self.partitions {
            partition.update_substitution_model = false;
            partition.update_site_model = false;
        }
        Ok(log_likelihood)
    }

    fn store_state(&mut self) {
        self.core.store_state();
        for partition in &mut self.partitions {
            partition.substitution.store_state();
        }
    }

    fn restore_state(&mut self) {
        debug!("Restoring stored likelihood state");
        self.core.restore_state();
        for partition in &mut self.partitions {
            partition.substitution.restore_state();
            partition.update_site_model = true;
        }
    }

    fn make_dirty(&mut self) {
        for partition in &mut self.partitions {
            partition.update_substitution_model = true;
            partition.update_site_model = true;
        }
    }

    fn mark_substitution_model_dirty(&mut self, partition: usize) {
        if let Some(p) = self.partitions.get_mut(partition) {
            p.update_substitution_model = true;
        }
    }

    fn mark_site_model_dirty(&mut self, partition: usize) {
        if let Some(p) = self.partitions.get_mut(partition) {
            p.update_site_model = true;
        }
    }

    fn partition_count(&self) -> usize {
        self.partitions.len()
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
        &self.partition_log_likelihoods
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
        self.partitions
            .get_mut(partition)
            .map(|p| p.substitution.branch_model_mut())
    }

    fn site_model_mut(&mut self, partition: usize) -> Option<&mut (dyn SiteRateModel + 'static)> {
        self.partitions
            .get_mut(partition)
            .map(|p| p.site_model.as_mut())
    }
}
