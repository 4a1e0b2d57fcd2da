//! Species tree (Newick) parsing.
//!
//! Only the shape and branch lengths are kept; they feed the identity
//! threshold derivation. Quoted labels and comments are not supported.

use crate::ConfigError;

/// A node of the species tree.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeciesTree {
    /// Node label, if any.
    pub name: Option<String>,

    /// Length of the branch leading to this node (0 when absent).
    pub branch_length: f64,

    /// Child subtrees.
    pub children: Vec<SpeciesTree>,
}

impl SpeciesTree {
    /// Parse a Newick string such as `((a:0.1,b:0.2)ab:0.05,c:0.3);`.
    pub fn parse(newick: &str) -> Result<Self, ConfigError> {
        let mut parser = Parser {
            input: newick.as_bytes(),
            pos: 0,
        };
        let tree = parser.subtree()?;
        parser.skip_whitespace();
        if parser.peek() == Some(b';') {
            parser.pos += 1;
        }
        parser.skip_whitespace();
        if parser.pos != parser.input.len() {
            return Err(parser.error("trailing characters after tree"));
        }
        Ok(tree)
    }

    /// Largest sum of branch lengths from this node down to a leaf. The
    /// node's own branch is not counted.
    pub fn longest_path(&self) -> f64 {
        self.children
            .iter()
            .map(|child| child.branch_length + child.longest_path())
            .fold(0.0, f64::max)
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn error(&self, reason: &str) -> ConfigError {
        ConfigError::InvalidTopology {
            offset: self.pos,
            reason: reason.to_string(),
        }
    }

    fn subtree(&mut self) -> Result<SpeciesTree, ConfigError> {
        self.skip_whitespace();
        let mut children = Vec::new();

        if self.peek() == Some(b'(') {
            self.pos += 1;
            loop {
                children.push(self.subtree()?);
                self.skip_whitespace();
                match self.peek() {
                    Some(b',') => self.pos += 1,
                    Some(b')') => {
                        self.pos += 1;
                        break;
                    }
                    Some(_) => return Err(self.error("expected ',' or ')'")),
                    None => return Err(self.error("unbalanced parentheses")),
                }
            }
        }

        let name = self.label();
        let branch_length = self.branch_length()?;

        Ok(SpeciesTree {
            name,
            branch_length,
            children,
        })
    }

    fn label(&mut self) -> Option<String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| !matches!(c, b':' | b',' | b'(' | b')' | b';'))
        {
            self.pos += 1;
        }
        let label = String::from_utf8_lossy(&self.input[start..self.pos])
            .trim()
            .to_string();
        (!label.is_empty()).then_some(label)
    }

    fn branch_length(&mut self) -> Result<f64, ConfigError> {
        if self.peek() != Some(b':') {
            return Ok(0.0);
        }
        self.pos += 1;
        self.skip_whitespace();

        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, b'.' | b'-' | b'+' | b'e' | b'E'))
        {
            self.pos += 1;
        }
        let text = String::from_utf8_lossy(&self.input[start..self.pos]);
        let length: f64 = text
            .parse()
            .map_err(|_| self.error(&format!("invalid branch length '{text}'")))?;
        if !length.is_finite() || length < 0.0 {
            return Err(self.error(&format!("branch length {length} must be a non-negative number")));
        }
        self.skip_whitespace();
        Ok(length)
    }
}
