use crate::error::{CliError, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileDataConfig {
    pub data_type: Option<String>,
    pub use_ambiguities: Option<bool>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileModelConfig {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub kappa: Option<f64>,
    pub frequencies: Option<Vec<f64>>,
    /// GTR exchangeabilities in the order AC, AG, AT, CG, CT, GT.
    pub rates: Option<Vec<f64>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileSiteRatesConfig {
    pub rates: Option<Vec<f64>>,
    pub proportions: Option<Vec<f64>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileEngineConfig {
    pub rescaling_scheme: Option<String>,
    pub rescaling_frequency: Option<usize>,
    pub delay_rescaling: Option<bool>,
    pub resource_order: Option<Vec<usize>>,
    /// Each entry is a `|`-separated list of flag names, e.g. `"PROCESSOR_CPU|PRECISION_DOUBLE"`.
    pub preferred_flags: Option<Vec<String>>,
    pub required_flags: Option<Vec<String>>,
    pub force_vectorization: Option<bool>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileCheckConfig {
    pub cycles: Option<u64>,
    pub seed: Option<u64>,
    pub window: Option<f64>,
    pub accept_probability: Option<f64>,
    pub tolerance: Option<f64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    pub data: Option<FileDataConfig>,
    pub model: Option<FileModelConfig>,
    pub site_rates: Option<FileSiteRatesConfig>,
    pub engine: Option<FileEngineConfig>,
    pub check: Option<FileCheckConfig>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }
}
