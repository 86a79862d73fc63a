//! Readers for the tree and sequence formats consumed by the likelihood workflows.
//!
//! Trees are read through the [`traits::TreeFile`] interface ([`newick::NewickFile`]);
//! alignments through [`fasta::FastaReader`], which is parameterized by the data type.
//! Per-pattern results are exported as CSV through [`site_table`].

pub mod fasta;
pub mod newick;
pub mod site_table;
pub mod traits;
