use crate::core::models::tree::Tree;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Common interface for tree file formats.
pub trait TreeFile {
    /// The error type for I/O and parse failures.
    type Error: Error + From<io::Error>;

    /// Reads a single tree from a buffered reader.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the text is not a valid binary tree.
    fn read_from(reader: &mut impl BufRead) -> Result<Tree, Self::Error>;

    /// Reads a single tree from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or parsing fails.
    fn read_from_path<P: AsRef<Path>>(path: P) -> Result<Tree, Self::Error> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::read_from(&mut reader)
    }
}
