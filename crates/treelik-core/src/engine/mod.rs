//! # Engine Module
//!
//! This module implements the likelihood orchestration layer of treelik: everything that sits
//! between a tree with its evolutionary models and a compute engine that evaluates partial
//! likelihoods.
//!
//! ## Overview
//!
//! A compute engine only understands numbered buffers and flat operation lists. The engine
//! module translates tree traversals into those lists, keeps double-buffered indices so that
//! a proposed state can be rejected without recomputation, and decides when partials are
//! rescaled to avoid numerical underflow on large trees.
//!
//! ## Architecture
//!
//! - **Buffer Bookkeeping** ([`buffers`]) - Flip-bit index helpers for store/restore
//! - **Operations** ([`operations`]) - Encoding node updates into engine operations
//! - **Rescaling** ([`rescaling`]) - The rescaling state machine and its schemes
//! - **Compute Engines** ([`compute`]) - The engine contract and the reference CPU engine
//! - **Configuration** ([`config`]) - Resource, flag and rescaling settings
//! - **Delegates** ([`delegate`], [`multi_partition`]) - Single- and multi-partition likelihood
//! - **Progress Monitoring** ([`progress`]) - Progress reporting for long-running workflows
//! - **Error Handling** ([`error`]) - Engine-specific error types and error propagation
//!
//! ## Key Capabilities
//!
//! - **Incremental evaluation** touching only the branches and nodes that changed
//! - **Cheap rejection** of proposals by flipping buffer indices back
//! - **Underflow recovery** with a single rescaled retry over the whole tree
//! - **Partitioned data** sharing one engine instance across pattern blocks

pub mod buffers;
pub mod compute;
pub mod config;
pub mod delegate;
pub mod error;
pub(crate) mod evaluation;
pub mod multi_partition;
pub mod operations;
pub mod progress;
pub mod rescaling;
pub mod state;
pub mod substitution_delegate;
pub mod traversal;
