//! # treelik Core Library
//!
//! Orchestration of phylogenetic tree likelihood evaluation on top of a pluggable compute
//! engine, with double-buffered state for cheap rejection of proposals and automatic
//! recovery from numerical underflow.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture to keep data, orchestration and
//! user-facing procedures apart.
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Alignment`, `SitePatterns`,
//!   `Tree`), substitution and site-rate models with their eigen decompositions, and
//!   Newick/FASTA readers.
//!
//! - **[`engine`]: The Logic Core.** This stateful layer maps a tree onto numbered engine
//!   buffers. It includes the flip-bit `BufferIndexHelper`, the `OperationEncoder`, the
//!   `RescalingPolicy` state machine, the `ComputeEngine` contract with a reference CPU
//!   implementation, and the single- and multi-partition likelihood delegates.
//!
//! - **[`workflows`]: The Public API.** Ties `engine` and `core` together: a
//!   `TreeDataLikelihood` that tracks what changed since the last evaluation, and a
//!   store/restore consistency check.

pub mod core;
pub mod engine;
pub mod workflows;
