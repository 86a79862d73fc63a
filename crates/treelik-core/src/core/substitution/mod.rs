//! # Substitution Module
//!
//! Models of character evolution along branches and of rate variation among sites.
//!
//! - [`models`] - The [`models::SubstitutionModel`] trait with Jukes-Cantor, HKY and GTR
//! - [`eigen`] - Eigen decompositions of reversible rate matrices
//! - [`site_rates`] - Rate categories ([`site_rates::UniformRates`], [`site_rates::DiscreteRates`])
//! - [`branch_model`] - Which substitution model applies on which branch

pub mod branch_model;
pub mod eigen;
pub mod models;
pub mod site_rates;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SubstitutionError {
    #[error("Invalid value {value} for parameter '{name}'")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("Expected {expected} parameters, found {found}")]
    ParameterCount { expected: usize, found: usize },
    #[error("Expected {expected} state frequencies, found {found}")]
    FrequencyCount { expected: usize, found: usize },
    #[error("State frequencies must be positive and finite: {0:?}")]
    InvalidFrequencies(Vec<f64>),
    #[error("Category rates ({rates}) and proportions ({proportions}) differ in length or are empty")]
    CategoryMismatch { rates: usize, proportions: usize },
    #[error("Models disagree on state count: expected {expected}, found {found}")]
    StateCountMismatch { expected: usize, found: usize },
    #[error("Model index {index} is out of range for {count} models")]
    ModelOutOfRange { index: usize, count: usize },
    #[error("A branch model needs at least one substitution model")]
    NoModels,
    #[error("Eigen decomposition failed: {0}")]
    Decomposition(String),
}
