use super::SubstitutionError;

/// Among-site rate heterogeneity as a finite mixture of rate categories.
pub trait SiteRateModel: std::fmt::Debug + Send + Sync {
    fn category_count(&self) -> usize;

    fn category_rates(&self) -> Vec<f64>;

    fn category_proportions(&self) -> Vec<f64>;
}

/// A single category with rate one.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UniformRates;

impl SiteRateModel for UniformRates {
    fn category_count(&self) -> usize {
        1
    }

    fn category_rates(&self) -> Vec<f64> {
        vec![1.0]
    }

    fn category_proportions(&self) -> Vec<f64> {
        vec![1.0]
    }
}

/// Explicit category rates and proportions; proportions are normalized to sum to one.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteRates {
    rates: Vec<f64>,
    proportions: Vec<f64>,
}

impl DiscreteRates {
    pub fn new(rates: Vec<f64>, proportions: Vec<f64>) -> Result<Self, SubstitutionError> {
        if rates.is_empty() || rates.len() != proportions.len() {
            return Err(SubstitutionError::CategoryMismatch {
                rates: rates.len(),
                proportions: proportions.len(),
            });
        }
        if let Some(&value) = rates.iter().find(|&&r| r < 0.0 || !r.is_finite()) {
            return Err(SubstitutionError::InvalidParameter {
                name: "category-rate",
                value,
            });
        }
        if let Some(&value) = proportions.iter().find(|&&p| p < 0.0 || !p.is_finite()) {
            return Err(SubstitutionError::InvalidParameter {
                name: "category-proportion",
                value,
            });
        }
        let total: f64 = proportions.iter().sum();
        if total <= 0.0 {
            return Err(SubstitutionError::InvalidParameter {
                name: "category-proportion",
                value: total,
            });
        }
        Ok(Self {
            rates,
            proportions: proportions.into_iter().map(|p| p / total).collect(),
        })
    }

    /// Equal-weight categories.
    pub fn equal_weights(rates: Vec<f64>) -> Result<Self, SubstitutionError> {
        let proportions = vec![1.0; rates.len()];
        Self::new(rates, proportions)
    }

    pub fn set_rates(&mut self, rates: &[f64]) -> Result<(), SubstitutionError> {
        let updated = Self::new(rates.to_vec(), self.proportions.clone())?;
        *self = updated;
        Ok(())
    }
}

impl SiteRateModel for DiscreteRates {
    fn category_count(&self) -> usize {
        self.rates.len()
    }

    fn category_rates(&self) -> Vec<f64> {
        self.rates.clone()
    }

    fn category_proportions(&self) -> Vec<f64> {
        self.proportions.clone()
    }
}
