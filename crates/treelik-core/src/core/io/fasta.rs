use crate::core::models::alignment::{Alignment, AlignmentError};
use crate::core::models::data_type::DataType;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FastaError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Sequence data on line {line} appears before any '>' header")]
    MissingHeader { line: usize },
    #[error("Header on line {line} has no taxon name")]
    EmptyName { line: usize },
    #[error("No sequences found")]
    Empty,
    #[error("Invalid alignment: {0}")]
    Alignment(#[from] AlignmentError),
}

/// Reads aligned FASTA files into an [`Alignment`] of a fixed [`DataType`].
///
/// The taxon name is the first whitespace-delimited word of the header line.
#[derive(Debug, Clone, Copy, Default)]
pub struct FastaReader {
    data_type: DataType,
}

impl FastaReader {
    pub fn new(data_type: DataType) -> Self {
        Self { data_type }
    }

    pub fn read_from(&self, reader: &mut impl BufRead) -> Result<Alignment, FastaError> {
        let mut records: Vec<(String, String)> = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line_number = index + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with(';') {
                continue;
            }
            if let Some(header) = trimmed.strip_prefix('>') {
                let name = header
                    .split_whitespace()
                    .next()
                    .ok_or(FastaError::EmptyName { line: line_number })?;
                records.push((name.to_string(), String::new()));
            } else {
                let (_, sequence) = records
                    .last_mut()
                    .ok_or(FastaError::MissingHeader { line: line_number })?;
                sequence.push_str(trimmed);
            }
        }

        if records.is_empty() {
            return Err(FastaError::Empty);
        }

        let mut alignment = Alignment::new(self.data_type);
        for (name, sequence) in &records {
            alignment.add_sequence(name, sequence)?;
        }
        Ok(alignment)
    }

    pub fn read_from_path<P: AsRef<Path>>(&self, path: P) -> Result<Alignment, FastaError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        self.read_from(&mut reader)
    }
}
