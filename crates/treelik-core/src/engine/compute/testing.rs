//! Instrumented engine used by unit tests to observe and perturb orchestration.

use super::cpu::{CpuEngine, CpuEngineFactory};
use super::{
    ComputeEngine, ComputeError, EngineFactory, EngineFlags, InstanceDetails, InstanceSpec,
    ResourceDetails, RootRequest,
};
use crate::core::substitution::eigen::EigenDecomposition;
use crate::engine::operations::{Operation, PartitionOperation};

/// How many root calculations report NaN before the wrapped engine answers honestly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum InvalidRoots {
    #[default]
    Never,
    First(usize),
    Always,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedFactory {
    pub inner: CpuEngineFactory,
    pub invalid_roots: InvalidRoots,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_invalid_roots(invalid_roots: InvalidRoots) -> Self {
        Self {
            invalid_roots,
            ..Self::default()
        }
    }

    pub fn with_supported_flags(flags: EngineFlags) -> Self {
        Self {
            inner: CpuEngineFactory::with_supported_flags(flags),
            ..Self::default()
        }
    }
}

impl EngineFactory for ScriptedFactory {
    type Engine = ScriptedEngine;

    fn resources(&self) -> Vec<ResourceDetails> {
        self.inner.resources()
    }

    fn create_instance(&self, spec: &InstanceSpec) -> Result<ScriptedEngine, ComputeError> {
        Ok(ScriptedEngine {
            inner: self.inner.create_instance(spec)?,
            invalid_roots: self.invalid_roots,
            spec: spec.clone(),
            operations: Vec::new(),
            partition_operations: Vec::new(),
            matrix_updates: Vec::new(),
            eigen_uploads: Vec::new(),
            rate_uploads: 0,
            root_calls: 0,
        })
    }
}

/// A [`CpuEngine`] that records every batch it receives.
#[derive(Debug, Clone)]
pub(crate) struct ScriptedEngine {
    inner: CpuEngine,
    pub invalid_roots: InvalidRoots,
    pub spec: InstanceSpec,
    pub operations: Vec<Vec<Operation>>,
    pub partition_operations: Vec<Vec<PartitionOperation>>,
    pub matrix_updates: Vec<Vec<usize>>,
    pub eigen_uploads: Vec<usize>,
    pub rate_uploads: usize,
    pub root_calls: usize,
}

impl ScriptedEngine {
    fn next_root_invalid(&mut self) -> bool {
        self.root_calls += 1;
        match self.invalid_roots {
            InvalidRoots::Never => false,
            InvalidRoots::Always => true,
            InvalidRoots::First(0) => false,
            InvalidRoots::First(n) => {
                self.invalid_roots = InvalidRoots::First(n - 1);
                true
            }
        }
    }

    pub fn clear_log(&mut self) {
        self.operations.clear();
        self.partition_operations.clear();
        self.matrix_updates.clear();
        self.eigen_uploads.clear();
        self.rate_uploads = 0;
        self.root_calls = 0;
    }
}

impl ComputeEngine for ScriptedEngine {
    fn details(&self) -> &InstanceDetails {
        self.inner.details()
    }

    fn set_tip_states(&mut self, tip: usize, states: &[usize]) -> Result<(), ComputeError> {
        self.inner.set_tip_states(tip, states)
    }

    fn set_tip_partials(&mut self, tip: usize, partials: &[f64]) -> Result<(), ComputeError> {
        self.inner.set_tip_partials(tip, partials)
    }

    fn set_partials(&mut self, buffer: usize, partials: &[f64]) -> Result<(), ComputeError> {
        self.inner.set_partials(buffer, partials)
    }

    fn get_partials(
        &self,
        buffer: usize,
        scale: Option<usize>,
        out: &mut [f64],
    ) -> Result<(), ComputeError> {
        self.inner.get_partials(buffer, scale, out)
    }

    fn set_pattern_weights(&mut self, weights: &[f64]) -> Result<(), ComputeError> {
        self.inner.set_pattern_weights(weights)
    }

    fn set_pattern_partitions(
        &mut self,
        partition_count: usize,
        assignments: &[usize],
    ) -> Result<(), ComputeError> {
        self.inner.set_pattern_partitions(partition_count, assignments)
    }

    fn set_state_frequencies(&mut self, index: usize, frequencies: &[f64]) -> Result<(), ComputeError> {
        self.inner.set_state_frequencies(index, frequencies)
    }

    fn set_category_weights(&mut self, index: usize, weights: &[f64]) -> Result<(), ComputeError> {
        self.inner.set_category_weights(index, weights)
    }

    fn set_category_rates(&mut self, index: usize, rates: &[f64]) -> Result<(), ComputeError> {
        self.rate_uploads += 1;
        self.inner.set_category_rates(index, rates)
    }

    fn set_eigen_decomposition(
        &mut self,
        index: usize,
        decomposition: &EigenDecomposition,
    ) -> Result<(), ComputeError> {
        self.eigen_uploads.push(index);
        self.inner.set_eigen_decomposition(index, decomposition)
    }

    fn update_transition_matrices(
        &mut self,
        eigen_index: usize,
        category_rates_index: usize,
        matrix_indices: &[usize],
        lengths: &[f64],
    ) -> Result<(), ComputeError> {
        self.matrix_updates.push(matrix_indices.to_vec());
        self.inner
            .update_transition_matrices(eigen_index, category_rates_index, matrix_indices, lengths)
    }

    fn update_partials(
        &mut self,
        operations: &[Operation],
        cumulative_scale: Option<usize>,
    ) -> Result<(), ComputeError> {
        self.operations.push(operations.to_vec());
        self.inner.update_partials(operations, cumulative_scale)
    }

    fn update_partials_by_partition(
        &mut self,
        operations: &[PartitionOperation],
    ) -> Result<(), ComputeError> {
        self.partition_operations.push(operations.to_vec());
        self.inner.update_partials_by_partition(operations)
    }

    fn reset_scale_factors(&mut self, index: usize) -> Result<(), ComputeError> {
        self.inner.reset_scale_factors(index)
    }

    fn accumulate_scale_factors(
        &mut self,
        sources: &[usize],
        destination: Option<usize>,
    ) -> Result<(), ComputeError> {
        self.inner.accumulate_scale_factors(sources, destination)
    }

    fn calculate_root_log_likelihoods(&mut self, roots: &[RootRequest]) -> Result<f64, ComputeError> {
        let value = self.inner.calculate_root_log_likelihoods(roots)?;
        Ok(if self.next_root_invalid() { f64::NAN } else { value })
    }

    fn calculate_root_log_likelihoods_by_partition(
        &mut self,
        roots: &[RootRequest],
    ) -> Result<Vec<f64>, ComputeError> {
        let values = self.inner.calculate_root_log_likelihoods_by_partition(roots)?;
        if self.next_root_invalid() {
            Ok(vec![f64::NAN; values.len()])
        } else {
            Ok(values)
        }
    }

    fn site_log_likelihoods(&self, out: &mut [f64]) -> Result<(), ComputeError> {
        self.inner.site_log_likelihoods(out)
    }
}
