use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error("Invalid data type: '{0}'")]
pub struct ParseDataTypeError(String);

/// The alphabet a sequence is written in, together with its ambiguity codes.
///
/// State codes below [`DataType::state_count`] are canonical states. Codes at or
/// above it are ambiguous and resolve to a set of canonical states through
/// [`DataType::state_set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    #[default]
    Nucleotide,
    Binary,
}

const NUCLEOTIDE_STATE_SETS: [[bool; 4]; 17] = [
    [true, false, false, false], // A
    [false, true, false, false], // C
    [false, false, true, false], // G
    [false, false, false, true], // T
    [true, false, true, false],  // R
    [false, true, false, true],  // Y
    [true, true, false, false],  // M
    [true, false, false, true],  // W
    [false, true, true, false],  // S
    [false, false, true, true],  // K
    [false, true, true, true],   // B
    [true, false, true, true],   // D
    [true, true, false, true],   // H
    [true, true, true, false],   // V
    [true, true, true, true],    // N
    [true, true, true, true],    // ?
    [true, true, true, true],    // -
];

const NUCLEOTIDE_CODES: &[u8; 17] = b"ACGTRYMWSKBDHVN?-";

impl DataType {
    pub fn state_count(&self) -> usize {
        match self {
            DataType::Nucleotide => 4,
            DataType::Binary => 2,
        }
    }

    /// Number of distinct codes, canonical and ambiguous.
    pub fn code_count(&self) -> usize {
        match self {
            DataType::Nucleotide => NUCLEOTIDE_CODES.len(),
            DataType::Binary => 3,
        }
    }

    /// The code used for gaps and fully unknown characters.
    pub fn unknown_code(&self) -> usize {
        self.code_count() - 1
    }

    pub fn code_for_char(&self, c: char) -> Option<usize> {
        let upper = c.to_ascii_uppercase();
        match self {
            DataType::Nucleotide => {
                if !upper.is_ascii() {
                    return None;
                }
                let byte = if upper == 'U' { b'T' } else { upper as u8 };
                match byte {
                    b'X' | b'.' => Some(14),
                    _ => NUCLEOTIDE_CODES.iter().position(|&b| b == byte),
                }
            }
            DataType::Binary => match upper {
                '0' => Some(0),
                '1' => Some(1),
                '-' | '?' | 'N' => Some(2),
                _ => None,
            },
        }
    }

    pub fn char_for_code(&self, code: usize) -> Option<char> {
        match self {
            DataType::Nucleotide => NUCLEOTIDE_CODES.get(code).map(|&b| b as char),
            DataType::Binary => ['0', '1', '-'].get(code).copied(),
        }
    }

    pub fn is_ambiguous(&self, code: usize) -> bool {
        code >= self.state_count()
    }

    /// Canonical states compatible with `code`; unknown codes map to all states.
    pub fn state_set(&self, code: usize) -> Vec<bool> {
        match self {
            DataType::Nucleotide => NUCLEOTIDE_STATE_SETS
                .get(code)
                .map(|set| set.to_vec())
                .unwrap_or_else(|| vec![true; 4]),
            DataType::Binary => match code {
                0 => vec![true, false],
                1 => vec![false, true],
                _ => vec![true, true],
            },
        }
    }
}

impl FromStr for DataType {
    type Err = ParseDataTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nucleotide" | "dna" | "rna" => Ok(DataType::Nucleotide),
            "binary" | "two-state" => Ok(DataType::Binary),
            _ => Err(ParseDataTypeError(s.to_string())),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Nucleotide => write!(f, "nucleotide"),
            DataType::Binary => write!(f, "binary"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nucleotide_codes_map_to_canonical_states() {
        let dt = DataType::Nucleotide;
        assert_eq!(dt.code_for_char('A'), Some(0));
        assert_eq!(dt.code_for_char('c'), Some(1));
        assert_eq!(dt.code_for_char('G'), Some(2));
        assert_eq!(dt.code_for_char('T'), Some(3));
        assert_eq!(dt.code_for_char('U'), Some(3));
    }

    #[test]
    fn nucleotide_ambiguity_codes_resolve_to_state_sets() {
        let dt = DataType::Nucleotide;
        let r = dt.code_for_char('R').unwrap();
        assert!(dt.is_ambiguous(r));
        assert_eq!(dt.state_set(r), vec![true, false, true, false]);
        let gap = dt.code_for_char('-').unwrap();
        assert_eq!(gap, dt.unknown_code());
        assert_eq!(dt.state_set(gap), vec![true; 4]);
    }

    #[test]
    fn unrecognized_characters_are_rejected() {
        assert_eq!(DataType::Nucleotide.code_for_char('Z'), None);
        assert_eq!(DataType::Binary.code_for_char('2'), None);
    }

    #[test]
    fn binary_codes_round_trip_through_chars() {
        let dt = DataType::Binary;
        for c in ['0', '1', '-'] {
            let code = dt.code_for_char(c).unwrap();
            assert_eq!(dt.char_for_code(code), Some(c));
        }
    }

    #[test]
    fn data_type_from_str_accepts_aliases() {
        assert_eq!("DNA".parse::<DataType>().unwrap(), DataType::Nucleotide);
        assert_eq!("binary".parse::<DataType>().unwrap(), DataType::Binary);
        assert!("protein".parse::<DataType>().is_err());
    }
}
