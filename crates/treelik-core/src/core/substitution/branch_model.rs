use super::SubstitutionError;
use super::models::SubstitutionModel;

/// Assignment of substitution models to the branches of a tree.
///
/// Every branch (identified by its child node index) maps to one model; the root
/// frequencies come from a designated root model.
#[derive(Debug)]
pub struct BranchModel {
    models: Vec<Box<dyn SubstitutionModel>>,
    assignments: Vec<usize>,
    root_model: usize,
}

impl BranchModel {
    /// One model on every branch.
    pub fn homogeneous(model: Box<dyn SubstitutionModel>) -> Self {
        Self {
            models: vec![model],
            assignments: Vec::new(),
            root_model: 0,
        }
    }

    /// Several models; `assignments[node]` names the model of the branch above `node`.
    /// Nodes past the end of `assignments` use the root model.
    pub fn new(
        models: Vec<Box<dyn SubstitutionModel>>,
        assignments: Vec<usize>,
        root_model: usize,
    ) -> Result<Self, SubstitutionError> {
        let first = models.first().ok_or(SubstitutionError::NoModels)?;
        let state_count = first.state_count();
        if let Some(model) = models.iter().find(|m| m.state_count() != state_count) {
            return Err(SubstitutionError::StateCountMismatch {
                expected: state_count,
                found: model.state_count(),
            });
        }
        if let Some(&index) = assignments
            .iter()
            .chain(std::iter::once(&root_model))
            .find(|&&i| i >= models.len())
        {
            return Err(SubstitutionError::ModelOutOfRange {
                index,
                count: models.len(),
            });
        }
        Ok(Self {
            models,
            assignments,
            root_model,
        })
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn state_count(&self) -> usize {
        self.models[0].state_count()
    }

    pub fn model(&self, index: usize) -> &dyn SubstitutionModel {
        self.models[index].as_ref()
    }

    pub fn model_mut(&mut self, index: usize) -> Option<&mut (dyn SubstitutionModel + 'static)> {
        self.models.get_mut(index).map(|m| m.as_mut())
    }

    pub fn models(&self) -> impl Iterator<Item = &dyn SubstitutionModel> {
        self.models.iter().map(|m| m.as_ref())
    }

    /// Model index of the branch above `node`.
    pub fn model_index(&self, node: usize) -> usize {
        self.assignments
            .get(node)
            .copied()
            .unwrap_or(self.root_model)
    }

    pub fn root_model_index(&self) -> usize {
        self.root_model
    }

    pub fn root_frequencies(&self) -> &[f64] {
        self.models[self.root_model].frequencies()
    }

    pub fn can_return_complex_diagonalization(&self) -> bool {
        self.models
            .iter()
            .any(|m| m.can_return_complex_diagonalization())
    }
}
