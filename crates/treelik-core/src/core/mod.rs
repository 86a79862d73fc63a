//! # Core Module
//!
//! Stateless building blocks for phylogenetic likelihood computation: the observed data,
//! the tree, the evolutionary models, and readers for common file formats.
//!
//! ## Architecture
//!
//! - **Data and Trees** ([`models`]) - Data types, alignments, site patterns and binary trees
//! - **Evolutionary Models** ([`substitution`]) - Substitution models, eigen decompositions,
//!   site-rate categories and branch-to-model assignments
//! - **File I/O** ([`io`]) - Newick trees and FASTA alignments
//!
//! Nothing in this layer knows about buffers or compute engines; that orchestration
//! lives in [`crate::engine`].

pub mod io;
pub mod models;
pub mod substitution;
