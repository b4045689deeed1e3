//! Parsed `/`-separated dirent paths
//!
//! ```text
//! /pci[0]/%command/memory     absolute, indexed, register-name segment
//! ../core[-1]/$node/mcfg      relative, parent, from-end index, bookmark
//! core[]                      array append (definition only)
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{RegtreeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    /// `name[]`
    Append,
    /// `name[3]`, `name[0x10]`, `name[017]`
    At(usize),
    /// `name[-1]` is the last element
    FromEnd(usize),
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Index::Append => Ok(()),
            Index::At(pos) => write!(f, "{pos}"),
            Index::FromEnd(n) => write!(f, "-{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    Name(String),
    Indexed { name: String, index: Index },
    Parent,
    Bookmark(String),
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn valid_name(name: &str) -> bool {
    let body = name.strip_prefix('%').unwrap_or(name);
    let mut chars = body.chars();
    match chars.next() {
        Some(c) if is_ident_start(c) => {}
        _ => return false,
    }
    if name.starts_with('%') {
        chars.all(is_ident_char)
    } else {
        chars.all(|c| is_ident_char(c) || c == '.')
    }
}

fn valid_ident(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if is_ident_start(c)) && chars.all(is_ident_char)
}

/// Parse a non-negative integer: `0x` hex, leading `0` octal, else decimal
fn parse_index_number(text: &str) -> Option<usize> {
    let hex = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"));
    let (digits, radix) = if let Some(hex) = hex {
        (hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        (&text[1..], 8)
    } else {
        (text, 10)
    };
    // from_str_radix alone would accept a sign
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    usize::from_str_radix(digits, radix).ok()
}

impl Element {
    /// Parse a single segment
    pub fn parse(segment: &str) -> Result<Self> {
        let invalid = |reason: &str| RegtreeError::invalid_path(segment, reason);

        if segment.is_empty() {
            return Err(invalid("empty path segment"));
        }
        if segment == ".." {
            return Ok(Element::Parent);
        }
        if let Some(bookmark) = segment.strip_prefix('$') {
            if !valid_ident(bookmark) {
                return Err(invalid("invalid bookmark name"));
            }
            return Ok(Element::Bookmark(bookmark.to_string()));
        }
        if let Some(open) = segment.find('[') {
            let name = &segment[..open];
            let inner = segment[open + 1..]
                .strip_suffix(']')
                .ok_or_else(|| invalid("unterminated array index"))?;
            if !valid_name(name) {
                return Err(invalid("invalid array name"));
            }
            let index = if inner.is_empty() {
                Index::Append
            } else if let Some(neg) = inner.strip_prefix('-') {
                match parse_index_number(neg) {
                    Some(n) if n > 0 => Index::FromEnd(n),
                    _ => return Err(invalid("invalid array index")),
                }
            } else {
                Index::At(parse_index_number(inner).ok_or_else(|| invalid("invalid array index"))?)
            };
            return Ok(Element::Indexed {
                name: name.to_string(),
                index,
            });
        }
        if !valid_name(segment) {
            return Err(invalid("invalid name"));
        }
        Ok(Element::Name(segment.to_string()))
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Name(name) => f.write_str(name),
            Element::Indexed { name, index } => write!(f, "{name}[{index}]"),
            Element::Parent => f.write_str(".."),
            Element::Bookmark(name) => write!(f, "${name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Path {
    absolute: bool,
    elements: Vec<Element>,
}

impl Path {
    pub fn new(absolute: bool, elements: Vec<Element>) -> Self {
        Self { absolute, elements }
    }

    /// Parse path text; a leading `/` makes it absolute
    ///
    /// A single trailing `/` is accepted, empty interior segments are not.
    pub fn parse(text: &str) -> Result<Self> {
        let (absolute, rest) = match text.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        if rest.is_empty() {
            return Ok(Self::new(absolute, Vec::new()));
        }
        let elements = rest
            .split('/')
            .map(|segment| {
                Element::parse(segment).map_err(|e| match e {
                    RegtreeError::InvalidPath { reason, .. } => {
                        RegtreeError::invalid_path(text, reason)
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(absolute, elements))
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn push(&mut self, element: Element) {
        self.elements.push(element);
    }

    /// Path of the first `n` elements, keeping absoluteness
    pub fn prefix(&self, n: usize) -> Path {
        Path::new(self.absolute, self.elements[..n.min(self.elements.len())].to_vec())
    }

    /// Lexically cancel `name/..` pairs
    pub fn normalized(&self) -> Path {
        let mut out: Vec<Element> = Vec::with_capacity(self.elements.len());
        for element in &self.elements {
            push_normalized(&mut out, element.clone(), self.absolute);
        }
        Path::new(self.absolute, out)
    }
}

/// Append `element`, cancelling it against the previous element when it is `..`
pub(crate) fn push_normalized(out: &mut Vec<Element>, element: Element, absolute: bool) {
    match element {
        Element::Parent => match out.last() {
            Some(Element::Parent) => out.push(Element::Parent),
            Some(Element::Bookmark(_)) => out.push(Element::Parent),
            Some(_) => {
                out.pop();
            }
            // the root is its own parent
            None if absolute => {}
            None => out.push(Element::Parent),
        },
        other => out.push(other),
    }
}

impl FromStr for Path {
    type Err = RegtreeError;

    fn from_str(s: &str) -> Result<Self> {
        Path::parse(s)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            f.write_str("/")?;
        }
        for (i, element) in self.elements.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{element}")?;
        }
        Ok(())
    }
}
