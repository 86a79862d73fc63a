use thiserror::Error;

use super::compute::ComputeError;
use super::config::ConfigError;
use crate::core::io::site_table::SiteTableError;
use crate::core::models::tree::TreeError;
use crate::core::substitution::SubstitutionError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Taxon '{taxon}' in the tree is not found in {source_name}")]
    MissingTaxon { taxon: String, source_name: String },

    #[error("Incompatible likelihood inputs: {0}")]
    IncompatibleData(String),

    #[error("Invalid configuration: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Compute engine failed: {source}")]
    Compute {
        #[from]
        source: ComputeError,
    },

    #[error("Substitution model error: {source}")]
    Substitution {
        #[from]
        source: SubstitutionError,
    },

    #[error("Invalid tree: {source}")]
    Tree {
        #[from]
        source: TreeError,
    },

    #[error("Site table error: {source}")]
    SiteTable {
        #[from]
        source: SiteTableError,
    },

    #[error("Internal logic error: {0}")]
    Internal(String),
}
