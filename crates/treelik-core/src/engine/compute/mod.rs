//! The interface between likelihood orchestration and the numerical back end.
//!
//! A [`ComputeEngine`] owns flat arrays of partials, scale, eigen and matrix buffers and
//! executes batched instructions against them; it knows nothing about trees. Engines are
//! created by an [`EngineFactory`] from an [`InstanceSpec`] and report the capability
//! [`EngineFlags`] they actually granted.

pub mod cpu;
#[cfg(test)]
pub(crate) mod testing;

use super::operations::{Operation, PartitionOperation};
use crate::core::substitution::eigen::EigenDecomposition;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ComputeError {
    #[error("{kind} buffer index {index} is out of range (count {count})")]
    BufferOutOfRange {
        kind: &'static str,
        index: usize,
        count: usize,
    },
    #[error("Expected {expected} values for {what}, found {found}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{0} has not been set")]
    Uninitialized(&'static str),
    #[error("Unable to create engine instance: {0}")]
    Instance(String),
}

/// Capability and preference bits of a compute engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EngineFlags(u64);

impl EngineFlags {
    pub const NONE: Self = Self(0);
    pub const PRECISION_SINGLE: Self = Self(1 << 0);
    pub const PRECISION_DOUBLE: Self = Self(1 << 1);
    pub const SCALING_MANUAL: Self = Self(1 << 5);
    pub const SCALING_AUTO: Self = Self(1 << 6);
    pub const EIGEN_REAL: Self = Self(1 << 12);
    pub const EIGEN_COMPLEX: Self = Self(1 << 13);
    pub const VECTOR_SSE: Self = Self(1 << 17);
    pub const VECTOR_NONE: Self = Self(1 << 19);
    pub const THREADING_NONE: Self = Self(1 << 22);
    pub const THREADING_PARALLEL: Self = Self(1 << 23);
    pub const PROCESSOR_CPU: Self = Self(1 << 15);
    pub const PROCESSOR_GPU: Self = Self(1 << 16);

    const NAMES: [(Self, &'static str); 13] = [
        (Self::PROCESSOR_CPU, "PROCESSOR_CPU"),
        (Self::PROCESSOR_GPU, "PROCESSOR_GPU"),
        (Self::PRECISION_SINGLE, "PRECISION_SINGLE"),
        (Self::PRECISION_DOUBLE, "PRECISION_DOUBLE"),
        (Self::SCALING_MANUAL, "SCALING_MANUAL"),
        (Self::SCALING_AUTO, "SCALING_AUTO"),
        (Self::EIGEN_REAL, "EIGEN_REAL"),
        (Self::EIGEN_COMPLEX, "EIGEN_COMPLEX"),
        (Self::VECTOR_SSE, "VECTOR_SSE"),
        (Self::VECTOR_NONE, "VECTOR_NONE"),
        (Self::THREADING_NONE, "THREADING_NONE"),
        (Self::THREADING_PARALLEL, "THREADING_PARALLEL"),
        (Self::NONE, "NONE"),
    ];

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Parses a flag name such as `SCALING_AUTO` (case-insensitive, optional `FLAG_` prefix).
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        let upper = upper.strip_prefix("FLAG_").unwrap_or(&upper);
        Self::NAMES
            .iter()
            .find(|(flag, n)| *n == upper && !flag.is_empty())
            .map(|(flag, _)| *flag)
    }
}

impl BitOr for EngineFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EngineFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EngineFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for EngineFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| !flag.is_empty() && self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            f.write_str("NONE")
        } else {
            f.write_str(&names.join(" "))
        }
    }
}

/// Dimensions and requested capabilities of a new engine instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSpec {
    pub tip_count: usize,
    pub partials_buffer_count: usize,
    /// Tips stored as compact state codes rather than partials.
    pub compact_buffer_count: usize,
    pub state_count: usize,
    pub pattern_count: usize,
    pub eigen_buffer_count: usize,
    pub matrix_buffer_count: usize,
    pub category_count: usize,
    pub scale_buffer_count: usize,
    /// Number of category-rate, category-weight and frequency slots (one per partition).
    pub partition_count: usize,
    /// Resource numbers in order of preference.
    pub resources: Vec<usize>,
    pub preference_flags: EngineFlags,
    pub requirement_flags: EngineFlags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDetails {
    pub number: usize,
    pub name: String,
    pub description: String,
    pub flags: EngineFlags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceDetails {
    pub resource_number: usize,
    pub implementation_name: String,
    pub flags: EngineFlags,
}

impl fmt::Display for InstanceDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (resource {}) with flags: {}",
            self.implementation_name, self.resource_number, self.flags
        )
    }
}

/// One root likelihood request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootRequest {
    pub buffer: usize,
    pub category_weights_index: usize,
    pub state_frequencies_index: usize,
    pub cumulative_scale: Option<usize>,
    pub partition: usize,
}

/// Numerical back end executing likelihood instructions on indexed buffers.
pub trait ComputeEngine {
    fn details(&self) -> &InstanceDetails;

    /// Observed states of a tip; codes at or above the state count are treated as missing.
    fn set_tip_states(&mut self, tip: usize, states: &[usize]) -> Result<(), ComputeError>;

    /// `pattern_count * state_count` values, replicated across rate categories.
    fn set_tip_partials(&mut self, tip: usize, partials: &[f64]) -> Result<(), ComputeError>;

    /// Full `category * pattern * state` contents of a partials buffer.
    fn set_partials(&mut self, buffer: usize, partials: &[f64]) -> Result<(), ComputeError>;

    /// Reads a partials buffer, optionally rescaled by the given scale buffer.
    fn get_partials(
        &self,
        buffer: usize,
        scale: Option<usize>,
        out: &mut [f64],
    ) -> Result<(), ComputeError>;

    fn set_pattern_weights(&mut self, weights: &[f64]) -> Result<(), ComputeError>;

    /// Assigns every pattern to a partition.
    fn set_pattern_partitions(
        &mut self,
        partition_count: usize,
        assignments: &[usize],
    ) -> Result<(), ComputeError>;

    fn set_state_frequencies(&mut self, index: usize, frequencies: &[f64]) -> Result<(), ComputeError>;

    fn set_category_weights(&mut self, index: usize, weights: &[f64]) -> Result<(), ComputeError>;

    fn set_category_rates(&mut self, index: usize, rates: &[f64]) -> Result<(), ComputeError>;

    fn set_eigen_decomposition(
        &mut self,
        index: usize,
        decomposition: &EigenDecomposition,
    ) -> Result<(), ComputeError>;

    /// Computes `P(rate * length)` for every category into each matrix buffer.
    fn update_transition_matrices(
        &mut self,
        eigen_index: usize,
        category_rates_index: usize,
        matrix_indices: &[usize],
        lengths: &[f64],
    ) -> Result<(), ComputeError>;

    /// Executes operations in order; later operations may read earlier destinations.
    fn update_partials(
        &mut self,
        operations: &[Operation],
        cumulative_scale: Option<usize>,
    ) -> Result<(), ComputeError>;

    /// Like [`ComputeEngine::update_partials`], but each operation touches one partition only.
    fn update_partials_by_partition(
        &mut self,
        operations: &[PartitionOperation],
    ) -> Result<(), ComputeError>;

    fn reset_scale_factors(&mut self, index: usize) -> Result<(), ComputeError>;

    /// Adds the log scale factors of `sources` into `destination`. Without a destination the
    /// engine accumulates its automatic scale factors of the given partials buffers.
    fn accumulate_scale_factors(
        &mut self,
        sources: &[usize],
        destination: Option<usize>,
    ) -> Result<(), ComputeError>;

    /// Sum over all patterns of the weighted site log-likelihoods.
    fn calculate_root_log_likelihoods(&mut self, roots: &[RootRequest]) -> Result<f64, ComputeError>;

    /// Per-partition sums, in the order of `roots`.
    fn calculate_root_log_likelihoods_by_partition(
        &mut self,
        roots: &[RootRequest],
    ) -> Result<Vec<f64>, ComputeError>;

    /// Site log-likelihoods of the last root calculation.
    fn site_log_likelihoods(&self, out: &mut [f64]) -> Result<(), ComputeError>;
}

/// Creates engine instances and describes the resources they can run on.
pub trait EngineFactory {
    type Engine: ComputeEngine;

    fn resources(&self) -> Vec<ResourceDetails>;

    fn create_instance(&self, spec: &InstanceSpec) -> Result<Self::Engine, ComputeError>;
}
