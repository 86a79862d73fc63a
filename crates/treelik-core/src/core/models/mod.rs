//! # Core Models Module
//!
//! Data structures describing the observed data and the tree it evolved on.
//!
//! ## Key Components
//!
//! - [`data_type`] - Alphabets, ambiguity codes and their canonical state sets
//! - [`alignment`] - Aligned sequences encoded as state codes
//! - [`patterns`] - Compressed site patterns, uncertain tip partials and the
//!   [`patterns::PatternSource`] handed to the likelihood engine
//! - [`tree`] - Rooted binary trees numbered tips first, root last
//!
//! ## Usage
//!
//! ```ignore
//! use treelik::core::models::{alignment::Alignment, data_type::DataType, patterns::SitePatterns};
//!
//! let mut alignment = Alignment::new(DataType::Nucleotide);
//! alignment.add_sequence("human", "ACGTACGT")?;
//! alignment.add_sequence("chimp", "ACGTACGA")?;
//! let patterns = SitePatterns::from_alignment(&alignment);
//! ```

pub mod alignment;
pub mod data_type;
pub mod patterns;
pub mod tree;
