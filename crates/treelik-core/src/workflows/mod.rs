//! # Workflows Module
//!
//! High-level entry points that pair a tree with a likelihood delegate and drive it.
//!
//! ## Overview
//!
//! Delegates in [`crate::engine`] only see branch and node operations. The workflows keep
//! the tree itself, remember what changed since the last evaluation, and expose the
//! propose/accept/reject cycle a sampler or optimizer runs against the likelihood.
//!
//! ## Architecture
//!
//! - **Tree Likelihood** ([`likelihood`]) - Dirty tracking, caching, store/restore and
//!   per-site export on top of any [`crate::engine::delegate::DataLikelihoodDelegate`]
//! - **Consistency Check** ([`check`]) - Randomized store/propose/restore cycles that verify
//!   a restored state reproduces its stored likelihood

pub mod check;
pub mod likelihood;
