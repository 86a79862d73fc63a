use super::data_type::DataType;
use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum AlignmentError {
    #[error("Unrecognized character '{character}' at site {site} of taxon '{taxon}'")]
    UnknownCharacter {
        taxon: String,
        character: char,
        site: usize,
    },
    #[error("Sequence for taxon '{taxon}' has {found} sites, expected {expected}")]
    LengthMismatch {
        taxon: String,
        expected: usize,
        found: usize,
    },
    #[error("Taxon '{0}' appears more than once in the alignment")]
    DuplicateTaxon(String),
    #[error("Site range {start}..{end} is out of bounds for an alignment of {site_count} sites")]
    RangeOutOfBounds {
        start: usize,
        end: usize,
        site_count: usize,
    },
}

/// Aligned sequences encoded as state codes of a single [`DataType`].
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    data_type: DataType,
    taxa: Vec<String>,
    sequences: Vec<Vec<usize>>,
}

impl Alignment {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            taxa: Vec::new(),
            sequences: Vec::new(),
        }
    }

    pub fn add_sequence(&mut self, taxon: &str, sequence: &str) -> Result<(), AlignmentError> {
        if self.taxa.iter().any(|t| t == taxon) {
            return Err(AlignmentError::DuplicateTaxon(taxon.to_string()));
        }

        let codes = sequence
            .chars()
            .filter(|c| !c.is_whitespace())
            .enumerate()
            .map(|(site, c)| {
                self.data_type
                    .code_for_char(c)
                    .ok_or_else(|| AlignmentError::UnknownCharacter {
                        taxon: taxon.to_string(),
                        character: c,
                        site,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(first) = self.sequences.first() {
            if first.len() != codes.len() {
                return Err(AlignmentError::LengthMismatch {
                    taxon: taxon.to_string(),
                    expected: first.len(),
                    found: codes.len(),
                });
            }
        }

        self.taxa.push(taxon.to_string());
        self.sequences.push(codes);
        Ok(())
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn taxa(&self) -> &[String] {
        &self.taxa
    }

    pub fn taxon_count(&self) -> usize {
        self.taxa.len()
    }

    pub fn site_count(&self) -> usize {
        self.sequences.first().map_or(0, Vec::len)
    }

    pub fn taxon_index(&self, taxon: &str) -> Option<usize> {
        self.taxa.iter().position(|t| t == taxon)
    }

    pub fn state(&self, taxon: usize, site: usize) -> usize {
        self.sequences[taxon][site]
    }

    pub fn sequence(&self, taxon: usize) -> &[usize] {
        &self.sequences[taxon]
    }

    /// Copies the given column range into a new alignment, e.g. to split a gene into partitions.
    pub fn columns(&self, range: Range<usize>) -> Result<Alignment, AlignmentError> {
        let site_count = self.site_count();
        if range.start > range.end || range.end > site_count {
            return Err(AlignmentError::RangeOutOfBounds {
                start: range.start,
                end: range.end,
                site_count,
            });
        }
        Ok(Alignment {
            data_type: self.data_type,
            taxa: self.taxa.clone(),
            sequences: self
                .sequences
                .iter()
                .map(|s| s[range.clone()].to_vec())
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_alignment() -> Alignment {
        let mut aln = Alignment::new(DataType::Nucleotide);
        aln.add_sequence("A", "ACGTA").unwrap();
        aln.add_sequence("B", "ACGTT").unwrap();
        aln.add_sequence("C", "AC-TA").unwrap();
        aln
    }

    #[test]
    fn add_sequence_encodes_characters() {
        let aln = small_alignment();
        assert_eq!(aln.taxon_count(), 3);
        assert_eq!(aln.site_count(), 5);
        assert_eq!(aln.sequence(0), &[0, 1, 2, 3, 0]);
        assert_eq!(aln.state(2, 2), DataType::Nucleotide.unknown_code());
    }

    #[test]
    fn add_sequence_rejects_length_mismatch() {
        let mut aln = small_alignment();
        let err = aln.add_sequence("D", "ACG").unwrap_err();
        assert!(matches!(
            err,
            AlignmentError::LengthMismatch {
                expected: 5,
                found: 3,
                ..
            }
        ));
    }

    #[test]
    fn add_sequence_reports_unknown_characters_with_position() {
        let mut aln = Alignment::new(DataType::Nucleotide);
        let err = aln.add_sequence("A", "ACZ").unwrap_err();
        assert_eq!(
            err,
            AlignmentError::UnknownCharacter {
                taxon: "A".into(),
                character: 'Z',
                site: 2
            }
        );
    }

    #[test]
    fn columns_slices_every_sequence() {
        let aln = small_alignment();
        let part = aln.columns(1..3).unwrap();
        assert_eq!(part.site_count(), 2);
        assert_eq!(part.sequence(1), &[1, 2]);
        assert!(aln.columns(3..9).is_err());
    }
}
