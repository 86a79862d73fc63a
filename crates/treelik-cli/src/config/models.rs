use std::path::PathBuf;
use treelik::core::models::data_type::DataType;
use treelik::core::substitution::SubstitutionError;
use treelik::core::substitution::models::{Gtr, Hky, JukesCantor, SubstitutionModel};
use treelik::core::substitution::site_rates::{DiscreteRates, SiteRateModel, UniformRates};
use treelik::engine::config::LikelihoodConfig;
use treelik::workflows::check::CheckConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum ModelSpec {
    JukesCantor,
    Hky { kappa: f64, frequencies: Vec<f64> },
    Gtr { rates: [f64; 6], frequencies: Vec<f64> },
}

impl ModelSpec {
    pub fn build(&self, data_type: DataType) -> Result<Box<dyn SubstitutionModel>, SubstitutionError> {
        Ok(match self {
            ModelSpec::JukesCantor => Box::new(JukesCantor::new(data_type.state_count())),
            ModelSpec::Hky { kappa, frequencies } => Box::new(Hky::new(*kappa, frequencies)?),
            ModelSpec::Gtr { rates, frequencies } => Box::new(Gtr::new(*rates, frequencies)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SiteRatesSpec {
    pub rates: Vec<f64>,
    pub proportions: Option<Vec<f64>>,
}

impl SiteRatesSpec {
    pub fn build(&self) -> Result<Box<dyn SiteRateModel>, SubstitutionError> {
        match (&self.proportions, self.rates.as_slice()) {
            (None, []) => Ok(Box::new(UniformRates)),
            (None, rates) => Ok(Box::new(DiscreteRates::equal_weights(rates.to_vec())?)),
            (Some(proportions), rates) => Ok(Box::new(DiscreteRates::new(
                rates.to_vec(),
                proportions.clone(),
            )?)),
        }
    }
}

pub struct AppConfig {
    pub tree_path: PathBuf,
    pub alignment_paths: Vec<PathBuf>,
    pub data_type: DataType,
    pub model: ModelSpec,
    pub site_rates: SiteRatesSpec,
    pub likelihood: LikelihoodConfig,
    pub check: CheckConfig,
}
