use super::SubstitutionError;
use super::eigen::EigenDecomposition;
use nalgebra::DMatrix;

/// A continuous-time Markov model of character substitution.
pub trait SubstitutionModel: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn state_count(&self) -> usize;

    fn frequencies(&self) -> &[f64];

    /// Free parameters in a fixed order, used by generic perturbation code.
    fn parameters(&self) -> Vec<f64>;

    fn set_parameters(&mut self, values: &[f64]) -> Result<(), SubstitutionError>;

    /// Unnormalized exchangeability-weighted rates `q_ij` for `i != j`.
    fn relative_rate(&self, from: usize, to: usize) -> f64;

    /// Instantaneous rate matrix, rows summing to zero and scaled to one expected
    /// substitution per unit time.
    fn rate_matrix(&self) -> DMatrix<f64> {
        let n = self.state_count();
        let pi = self.frequencies();
        let mut q = DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                0.0
            } else {
                self.relative_rate(i, j)
            }
        });
        for i in 0..n {
            let row: f64 = q.row(i).sum();
            q[(i, i)] = -row;
        }
        let mu: f64 = (0..n).map(|i| -pi[i] * q[(i, i)]).sum();
        if mu > 0.0 {
            q /= mu;
        }
        q
    }

    fn eigen_decomposition(&self) -> Result<EigenDecomposition, SubstitutionError> {
        EigenDecomposition::from_reversible(&self.rate_matrix(), self.frequencies())
    }

    /// Whether the decomposition may contain complex conjugate eigenvalue pairs.
    fn can_return_complex_diagonalization(&self) -> bool {
        false
    }
}

fn check_frequencies(frequencies: &[f64], state_count: usize) -> Result<Vec<f64>, SubstitutionError> {
    if frequencies.len() != state_count {
        return Err(SubstitutionError::FrequencyCount {
            expected: state_count,
            found: frequencies.len(),
        });
    }
    let sum: f64 = frequencies.iter().sum();
    if frequencies.iter().any(|&f| f <= 0.0 || !f.is_finite()) || sum <= 0.0 {
        return Err(SubstitutionError::InvalidFrequencies(frequencies.to_vec()));
    }
    Ok(frequencies.iter().map(|f| f / sum).collect())
}

fn check_rate(name: &'static str, value: f64) -> Result<f64, SubstitutionError> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(SubstitutionError::InvalidParameter { name, value })
    }
}

/// Equal rates and equal frequencies over any number of states.
#[derive(Debug, Clone, PartialEq)]
pub struct JukesCantor {
    frequencies: Vec<f64>,
}

impl JukesCantor {
    pub fn new(state_count: usize) -> Self {
        Self {
            frequencies: vec![1.0 / state_count as f64; state_count],
        }
    }
}

impl SubstitutionModel for JukesCantor {
    fn name(&self) -> &'static str {
        "JC"
    }

    fn state_count(&self) -> usize {
        self.frequencies.len()
    }

    fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    fn parameters(&self) -> Vec<f64> {
        Vec::new()
    }

    fn set_parameters(&mut self, values: &[f64]) -> Result<(), SubstitutionError> {
        if values.is_empty() {
            Ok(())
        } else {
            Err(SubstitutionError::ParameterCount {
                expected: 0,
                found: values.len(),
            })
        }
    }

    fn relative_rate(&self, _from: usize, _to: usize) -> f64 {
        1.0
    }
}

/// Hasegawa-Kishino-Yano nucleotide model: one transition/transversion ratio.
#[derive(Debug, Clone, PartialEq)]
pub struct Hky {
    kappa: f64,
    frequencies: Vec<f64>,
}

impl Hky {
    pub fn new(kappa: f64, frequencies: &[f64]) -> Result<Self, SubstitutionError> {
        Ok(Self {
            kappa: check_rate("kappa", kappa)?,
            frequencies: check_frequencies(frequencies, 4)?,
        })
    }

    pub fn kappa(&self) -> f64 {
        self.kappa
    }
}

fn is_transition(from: usize, to: usize) -> bool {
    // A<->G and C<->T
    matches!((from, to), (0, 2) | (2, 0) | (1, 3) | (3, 1))
}

impl SubstitutionModel for Hky {
    fn name(&self) -> &'static str {
        "HKY"
    }

    fn state_count(&self) -> usize {
        4
    }

    fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    fn parameters(&self) -> Vec<f64> {
        vec![self.kappa]
    }

    fn set_parameters(&mut self, values: &[f64]) -> Result<(), SubstitutionError> {
        match values {
            [kappa] => {
                self.kappa = check_rate("kappa", *kappa)?;
                Ok(())
            }
            _ => Err(SubstitutionError::ParameterCount {
                expected: 1,
                found: values.len(),
            }),
        }
    }

    fn relative_rate(&self, from: usize, to: usize) -> f64 {
        let exchange = if is_transition(from, to) {
            self.kappa
        } else {
            1.0
        };
        exchange * self.frequencies[to]
    }
}

const GTR_RATE_NAMES: [&str; 6] = ["rate-ac", "rate-ag", "rate-at", "rate-cg", "rate-ct", "rate-gt"];

/// General time-reversible nucleotide model with six exchangeabilities (AC, AG, AT, CG, CT, GT).
#[derive(Debug, Clone, PartialEq)]
pub struct Gtr {
    rates: [f64; 6],
    frequencies: Vec<f64>,
}

impl Gtr {
    pub fn new(rates: [f64; 6], frequencies: &[f64]) -> Result<Self, SubstitutionError> {
        for (name, &value) in GTR_RATE_NAMES.into_iter().zip(&rates) {
            check_rate(name, value)?;
        }
        Ok(Self {
            rates,
            frequencies: check_frequencies(frequencies, 4)?,
        })
    }

    fn exchangeability(&self, from: usize, to: usize) -> f64 {
        let (a, b) = if from < to { (from, to) } else { (to, from) };
        match (a, b) {
            (0, 1) => self.rates[0],
            (0, 2) => self.rates[1],
            (0, 3) => self.rates[2],
            (1, 2) => self.rates[3],
            (1, 3) => self.rates[4],
            _ => self.rates[5],
        }
    }
}

impl SubstitutionModel for Gtr {
    fn name(&self) -> &'static str {
        "GTR"
    }

    fn state_count(&self) -> usize {
        4
    }

    fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    fn parameters(&self) -> Vec<f64> {
        self.rates.to_vec()
    }

    fn set_parameters(&mut self, values: &[f64]) -> Result<(), SubstitutionError> {
        if values.len() != 6 {
            return Err(SubstitutionError::ParameterCount {
                expected: 6,
                found: values.len(),
            });
        }
        for (i, (name, &value)) in GTR_RATE_NAMES.into_iter().zip(values).enumerate() {
            self.rates[i] = check_rate(name, value)?;
        }
        Ok(())
    }

    fn relative_rate(&self, from: usize, to: usize) -> f64 {
        self.exchangeability(from, to) * self.frequencies[to]
    }
}
