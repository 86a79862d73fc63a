use super::buffers::BufferIndexHelper;
use super::compute::ComputeEngine;
use super::error::EngineError;
use super::operations::BranchOperation;
use crate::core::substitution::branch_model::BranchModel;
use tracing::trace;

/// Keeps a [`BranchModel`] and the engine's eigen and transition-matrix buffers in step.
///
/// Eigen buffers are indexed by model, matrix buffers by node. Both are double-buffered so
/// that a rejected proposal can fall back to the matrices of the stored state. Each partition
/// gets its own disjoint range of buffers inside one engine instance.
#[derive(Debug)]
pub struct SubstitutionModelDelegate {
    branch_model: BranchModel,
    eigen_buffers: BufferIndexHelper,
    matrix_buffers: BufferIndexHelper,
    extra_buffer_count: usize,
}

impl SubstitutionModelDelegate {
    pub fn new(
        branch_model: BranchModel,
        node_count: usize,
        partition: usize,
        extra_buffer_count: usize,
    ) -> Self {
        let eigen_buffers = BufferIndexHelper::new(branch_model.model_count(), 0);
        let eigen_base = partition * eigen_buffers.buffer_count();
        let matrix_buffers = BufferIndexHelper::new(node_count, 0);
        // plus one reserve buffer
        let matrix_base = partition * (matrix_buffers.buffer_count() + extra_buffer_count + 1);
        Self {
            eigen_buffers: eigen_buffers.with_base(eigen_base),
            matrix_buffers: matrix_buffers.with_base(matrix_base),
            branch_model,
            extra_buffer_count,
        }
    }

    pub fn branch_model(&self) -> &BranchModel {
        &self.branch_model
    }

    pub fn branch_model_mut(&mut self) -> &mut BranchModel {
        &mut self.branch_model
    }

    pub fn model_count(&self) -> usize {
        self.branch_model.model_count()
    }

    pub fn eigen_buffer_count(&self) -> usize {
        self.eigen_buffers.buffer_count()
    }

    pub fn matrix_buffer_count(&self) -> usize {
        self.matrix_buffers.buffer_count() + self.extra_buffer_count + 1
    }

    pub fn eigen_index(&self, model: usize) -> usize {
        self.eigen_buffers.offset_index(model)
    }

    pub fn matrix_index(&self, node: usize) -> usize {
        self.matrix_buffers.offset_index(node)
    }

    pub fn root_state_frequencies(&self) -> &[f64] {
        self.branch_model.root_frequencies()
    }

    pub fn can_return_complex_diagonalization(&self) -> bool {
        self.branch_model.can_return_complex_diagonalization()
    }

    /// Decomposes every model and uploads the results, optionally into fresh buffers.
    pub fn update_substitution_models<E: ComputeEngine>(
        &mut self,
        engine: &mut E,
        flip_buffers: bool,
    ) -> Result<(), EngineError> {
        for model in 0..self.branch_model.model_count() {
            if flip_buffers {
                self.eigen_buffers.flip_offset(model);
            }
            let decomposition = self.branch_model.model(model).eigen_decomposition()?;
            engine.set_eigen_decomposition(self.eigen_buffers.offset_index(model), &decomposition)?;
        }
        Ok(())
    }

    /// Recomputes the matrices of the given branches, one engine call per model.
    pub fn update_transition_matrices<E: ComputeEngine>(
        &mut self,
        engine: &mut E,
        branches: &[BranchOperation],
        category_rates_index: usize,
        flip_buffers: bool,
    ) -> Result<(), EngineError> {
        let model_count = self.branch_model.model_count();
        let mut indices: Vec<Vec<usize>> = vec![Vec::new(); model_count];
        let mut lengths: Vec<Vec<f64>> = vec![Vec::new(); model_count];

        for branch in branches {
            let model = self.branch_model.model_index(branch.branch);
            if flip_buffers {
                self.matrix_buffers.flip_offset(branch.branch);
            }
            indices[model].push(self.matrix_buffers.offset_index(branch.branch));
            lengths[model].push(branch.length);
        }

        for (model, (indices, lengths)) in indices.iter().zip(&lengths).enumerate() {
            if indices.is_empty() {
                continue;
            }
            trace!(model, count = indices.len(), "Updating transition matrices");
            engine.update_transition_matrices(
                self.eigen_buffers.offset_index(model),
                category_rates_index,
                indices,
                lengths,
            )?;
        }
        Ok(())
    }

    pub fn store_state(&mut self) {
        self.eigen_buffers.store_state();
        self.matrix_buffers.store_state();
    }

    pub fn restore_state(&mut self) {
        self.eigen_buffers.restore_state();
        self.matrix_buffers.restore_state();
    }
}
