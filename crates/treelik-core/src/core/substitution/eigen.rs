use super::SubstitutionError;
use nalgebra::{DMatrix, DVector, SymmetricEigen};

/// Spectral decomposition `Q = V · diag(λ) · V⁻¹` of an instantaneous rate matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct EigenDecomposition {
    pub eigenvectors: DMatrix<f64>,
    pub inverse_eigenvectors: DMatrix<f64>,
    pub eigenvalues: DVector<f64>,
}

impl EigenDecomposition {
    pub fn state_count(&self) -> usize {
        self.eigenvalues.len()
    }

    /// Decomposes a time-reversible rate matrix through its symmetric similarity transform.
    ///
    /// With `D = diag(π)`, the matrix `S = D^½ Q D^-½` is symmetric, so a real orthogonal
    /// decomposition `S = U Λ Uᵀ` exists and `Q = (D^-½ U) Λ (Uᵀ D^½)`.
    pub fn from_reversible(
        rate_matrix: &DMatrix<f64>,
        frequencies: &[f64],
    ) -> Result<Self, SubstitutionError> {
        let n = frequencies.len();
        if rate_matrix.nrows() != n || rate_matrix.ncols() != n {
            return Err(SubstitutionError::Decomposition(format!(
                "rate matrix is {}x{} but {} frequencies were given",
                rate_matrix.nrows(),
                rate_matrix.ncols(),
                n
            )));
        }
        if frequencies.iter().any(|&f| f <= 0.0 || !f.is_finite()) {
            return Err(SubstitutionError::InvalidFrequencies(frequencies.to_vec()));
        }

        let sqrt_pi: Vec<f64> = frequencies.iter().map(|f| f.sqrt()).collect();
        let symmetric = DMatrix::from_fn(n, n, |i, j| {
            let value = rate_matrix[(i, j)] * sqrt_pi[i] / sqrt_pi[j];
            let mirror = rate_matrix[(j, i)] * sqrt_pi[j] / sqrt_pi[i];
            0.5 * (value + mirror)
        });

        let SymmetricEigen {
            eigenvectors,
            eigenvalues,
        } = SymmetricEigen::new(symmetric);

        let right = DMatrix::from_fn(n, n, |i, k| eigenvectors[(i, k)] / sqrt_pi[i]);
        let left = DMatrix::from_fn(n, n, |k, j| eigenvectors[(j, k)] * sqrt_pi[j]);

        Ok(Self {
            eigenvectors: right,
            inverse_eigenvectors: left,
            eigenvalues,
        })
    }

    /// `P(t) = V · diag(exp(λ t)) · V⁻¹`, with round-off negatives clamped to zero.
    pub fn transition_matrix(&self, distance: f64) -> DMatrix<f64> {
        let n = self.state_count();
        let exp_lambda: Vec<f64> = self
            .eigenvalues
            .iter()
            .map(|&l| (l * distance).exp())
            .collect();
        DMatrix::from_fn(n, n, |i, j| {
            let sum: f64 = (0..n)
                .map(|k| {
                    self.eigenvectors[(i, k)] * exp_lambda[k] * self.inverse_eigenvectors[(k, j)]
                })
                .sum();
            sum.max(0.0)
        })
    }
}
