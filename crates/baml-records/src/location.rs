//! Source locations carried by debug records.

/// A line/column pair in the markup the stream was compiled from.
///
/// Both values are as written by the producer; this crate does not assume
/// whether they are zero- or one-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "facet", derive(facet::Facet))]
pub struct SourceLocation {
    pub line: u32,
    pub position: u32,
}

impl SourceLocation {
    #[inline]
    pub fn new(line: u32, position: u32) -> Self {
        Self { line, position }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.position)
    }
}
