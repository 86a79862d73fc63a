use super::traits::TreeFile;
use crate::core::models::tree::{Tree, TreeBuilder, TreeError};
use std::io::{self, BufRead, Read};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NewickError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error at byte {position}: {message}")]
    Parse { position: usize, message: String },
    #[error("Invalid tree: {0}")]
    Tree(#[from] TreeError),
}

/// Reader for rooted Newick trees.
///
/// Labels may be bare or single-quoted (`''` escapes a quote), square-bracket comments are
/// skipped wherever whitespace is allowed, and missing branch lengths default to zero.
/// Internal node labels are kept on the builder but not used by [`Tree`].
pub struct NewickFile;

impl TreeFile for NewickFile {
    type Error = NewickError;

    fn read_from(reader: &mut impl BufRead) -> Result<Tree, Self::Error> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        parse_newick(&text)
    }
}

pub fn parse_newick(text: &str) -> Result<Tree, NewickError> {
    let mut parser = Parser {
        bytes: text.as_bytes(),
        pos: 0,
        builder: TreeBuilder::new(),
    };
    parser.skip_trivia()?;
    let root = parser.parse_subtree()?;
    parser.skip_trivia()?;
    if !parser.consume(b';') {
        return Err(parser.error("expected ';' at end of tree"));
    }
    Ok(parser.builder.build(root)?)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    builder: TreeBuilder,
}

impl Parser<'_> {
    fn error(&self, message: impl Into<String>) -> NewickError {
        NewickError::Parse {
            position: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn consume(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) -> Result<(), NewickError> {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => self.pos += 1,
                Some(b'[') => {
                    let start = self.pos;
                    while let Some(b) = self.peek() {
                        self.pos += 1;
                        if b == b']' {
                            break;
                        }
                    }
                    if self.bytes[self.pos - 1] != b']' {
                        self.pos = start;
                        return Err(self.error("unterminated comment"));
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn parse_subtree(&mut self) -> Result<usize, NewickError> {
        if self.consume(b'(') {
            let mut children = Vec::new();
            loop {
                self.skip_trivia()?;
                children.push(self.parse_subtree()?);
                self.skip_trivia()?;
                if self.consume(b',') {
                    continue;
                }
                if self.consume(b')') {
                    break;
                }
                return Err(self.error("expected ',' or ')'"));
            }
            self.skip_trivia()?;
            let label = self.parse_label()?;
            let length = self.parse_length()?;
            Ok(self.builder.add_internal(
                children,
                (!label.is_empty()).then_some(label),
                length,
            ))
        } else {
            let label = self.parse_label()?;
            if label.is_empty() {
                return Err(self.error("expected a taxon label"));
            }
            let length = self.parse_length()?;
            Ok(self.builder.add_leaf(label, length))
        }
    }

    fn parse_label(&mut self) -> Result<String, NewickError> {
        if self.consume(b'\'') {
            let mut label = Vec::new();
            loop {
                match self.peek() {
                    None => return Err(self.error("unterminated quoted label")),
                    Some(b'\'') => {
                        self.pos += 1;
                        if self.consume(b'\'') {
                            label.push(b'\'');
                        } else {
                            break;
                        }
                    }
                    Some(b) => {
                        label.push(b);
                        self.pos += 1;
                    }
                }
            }
            self.skip_trivia()?;
            return String::from_utf8(label).map_err(|_| self.error("label is not valid UTF-8"));
        }

        let start = self.pos;
        while let Some(b) = self.peek() {
            if b"(),:;[".contains(&b) || b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
        let label = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| self.error("label is not valid UTF-8"))?
            .replace('_', " ");
        self.skip_trivia()?;
        Ok(label)
    }

    fn parse_length(&mut self) -> Result<f64, NewickError> {
        if !self.consume(b':') {
            return Ok(0.0);
        }
        self.skip_trivia()?;
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() || b"+-.eE".contains(&b) {
                self.pos += 1;
            } else {
                break;
            }
        }
        let token = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or_default();
        let length = token
            .parse::<f64>()
            .map_err(|_| self.error(format!("invalid branch length '{token}'")))?;
        self.skip_trivia()?;
        Ok(length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parse_newick_reads_labels_and_lengths() {
        let tree = parse_newick("((A:0.1,B:0.2):0.3,C:0.4);").unwrap();
        assert_eq!(tree.tip_count(), 3);
        assert_eq!(tree.node_count(), 5);
        assert_eq!(tree.taxon_index("A"), Some(0));
        assert_eq!(tree.taxon_index("C"), Some(2));
        assert_eq!(tree.branch_length(1), 0.2);
        assert_eq!(tree.branch_length(3), 0.3);
        assert_eq!(tree.children(4), Some((3, 2)));
    }

    #[test]
    fn parse_newick_handles_comments_quotes_and_whitespace() {
        let tree =
            parse_newick("[&R] ( 'Homo sapiens' : 0.1 , Pan_troglodytes[&x=1]:0.2 )root ;").unwrap();
        assert_eq!(tree.taxon_id(0), Some("Homo sapiens"));
        assert_eq!(tree.taxon_id(1), Some("Pan troglodytes"));
        assert_eq!(tree.branch_length(0), 0.1);
    }

    #[test]
    fn parse_newick_accepts_scientific_notation() {
        let tree = parse_newick("(A:1e-3,B:2.5E+0);").unwrap();
        assert_eq!(tree.branch_length(0), 1e-3);
        assert_eq!(tree.branch_length(1), 2.5);
    }

    #[test]
    fn parse_newick_rejects_missing_semicolon() {
        assert!(matches!(
            parse_newick("(A:0.1,B:0.2)"),
            Err(NewickError::Parse { .. })
        ));
    }

    #[test]
    fn parse_newick_rejects_multifurcations() {
        assert!(matches!(
            parse_newick("(A,B,C);"),
            Err(NewickError::Tree(TreeError::NotBinary { .. }))
        ));
    }

    #[test]
    fn read_from_consumes_a_reader() {
        let mut reader = Cursor::new("(A:0.1,B:0.1);\n");
        let tree = NewickFile::read_from(&mut reader).unwrap();
        assert_eq!(tree.tip_count(), 2);
    }
}
