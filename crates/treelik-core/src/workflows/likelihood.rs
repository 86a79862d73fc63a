use crate::core::io::site_table::{SiteRecord, site_records};
use crate::core::models::tree::Tree;
use crate::engine::delegate::DataLikelihoodDelegate;
use crate::engine::error::EngineError;
use crate::engine::traversal::traverse;
use tracing::trace;

/// A tree paired with a likelihood delegate.
///
/// Changes to branch lengths and models are recorded as dirty flags; the next call to
/// [`TreeDataLikelihood::log_likelihood`] sends only the affected branches and nodes
/// to the delegate. `store_state`/`restore_state` cover both the branch lengths and the
/// delegate's buffers, so a rejected proposal costs no recomputation.
#[derive(Debug)]
pub struct TreeDataLikelihood<D: DataLikelihoodDelegate> {
    tree: Tree,
    delegate: D,
    dirty: Vec<bool>,
    log_likelihood: Option<f64>,
    stored: Option<StoredState>,
}

#[derive(Debug, Clone)]
struct StoredState {
    branch_lengths: Vec<f64>,
    dirty: Vec<bool>,
    log_likelihood: Option<f64>,
}

impl<D: DataLikelihoodDelegate> TreeDataLikelihood<D> {
    pub fn new(tree: Tree, delegate: D) -> Self {
        let dirty = vec![true; tree.node_count()];
        Self {
            tree,
            delegate,
            dirty,
            log_likelihood: None,
            stored: None,
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn delegate(&self) -> &D {
        &self.delegate
    }

    pub fn delegate_mut(&mut self) -> &mut D {
        &mut self.delegate
    }

    pub fn set_branch_length(&mut self, node: usize, length: f64) -> Result<(), EngineError> {
        self.tree.set_branch_length(node, length)?;
        self.dirty[node] = true;
        self.log_likelihood = None;
        Ok(())
    }

    /// Call after changing a substitution model of `partition` through the delegate.
    pub fn substitution_model_changed(&mut self, partition: usize) {
        self.delegate.mark_substitution_model_dirty(partition);
        self.mark_all_dirty();
    }

    /// Call after changing the site-rate model of `partition` through the delegate.
    pub fn site_model_changed(&mut self, partition: usize) {
        self.delegate.mark_site_model_dirty(partition);
        self.mark_all_dirty();
    }

    pub fn make_dirty(&mut self) {
        self.delegate.make_dirty();
        self.mark_all_dirty();
    }

    fn mark_all_dirty(&mut self) {
        self.dirty.fill(true);
        self.log_likelihood = None;
    }

    /// The cached log-likelihood, computing it first if anything changed.
    pub fn log_likelihood(&mut self) -> Result<f64, EngineError> {
        if let Some(value) = self.log_likelihood {
            return Ok(value);
        }
        let traversal = traverse(&self.tree, &self.dirty);
        trace!(
            branches = traversal.branch_operations.len(),
            nodes = traversal.node_operations.len(),
            "Updating likelihood"
        );
        let value = self.delegate.calculate_likelihood(
            &traversal.branch_operations,
            &traversal.node_operations,
            self.tree.root(),
        )?;
        self.dirty.fill(false);
        self.log_likelihood = Some(value);
        Ok(value)
    }

    pub fn store_state(&mut self) {
        self.delegate.store_state();
        self.stored = Some(StoredState {
            branch_lengths: self.tree.branch_lengths(),
            dirty: self.dirty.clone(),
            log_likelihood: self.log_likelihood,
        });
    }

    /// Returns to the last stored state. Without a stored state only the delegate is told.
    pub fn restore_state(&mut self) {
        self.delegate.restore_state();
        if let Some(stored) = self.stored.take() {
            self.tree.set_branch_lengths(&stored.branch_lengths);
            self.dirty = stored.dirty;
            self.log_likelihood = stored.log_likelihood;
        }
    }

    pub fn accept_state(&mut self) {
        self.stored = None;
        self.delegate.accept_state();
    }

    pub fn partition_log_likelihoods(&mut self) -> Result<Vec<f64>, EngineError> {
        self.log_likelihood()?;
        Ok(self.delegate.partition_log_likelihoods().to_vec())
    }

    /// Per-pattern results of the current state, ready for CSV export.
    pub fn site_records(&mut self) -> Result<Vec<SiteRecord>, EngineError> {
        self.log_likelihood()?;
        let values = self.delegate.site_log_likelihoods()?;
        Ok(site_records(
            self.delegate.pattern_partitions(),
            self.delegate.pattern_weights(),
            &values,
        )?)
    }
}
