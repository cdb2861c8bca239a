//! Source location tracking

use std::fmt;

/// A span represents a range in graph source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    /// Start byte offset
    pub start: usize,
    /// End byte offset (exclusive)
    pub end: usize,
    /// 1-based line of `start`
    pub line: usize,
    /// 1-based column of `start`
    pub col: usize,
}

impl Span {
    /// Create a new span
    pub fn new(start: usize, end: usize, line: usize, col: usize) -> Self {
        Self { start, end, line, col }
    }

    /// Create a dummy span (for testing and synthesized nodes)
    pub fn dummy() -> Self {
        Self { start: 0, end: 0, line: 0, col: 0 }
    }

    /// Merge two spans, keeping the position of the earlier one
    pub fn merge(&self, other: &Span) -> Span {
        let (line, col) = if self.start <= other.start {
            (self.line, self.col)
        } else {
            (other.line, other.col)
        };
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line,
            col,
        }
    }

    /// Get the length of the span
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Check if the span is empty
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl Default for Span {
    fn default() -> Self {
        Self::dummy()
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_earliest_position() {
        let a = Span::new(10, 14, 2, 3);
        let b = Span::new(2, 6, 1, 3);
        let merged = a.merge(&b);
        assert_eq!(merged.start, 2);
        assert_eq!(merged.end, 14);
        assert_eq!((merged.line, merged.col), (1, 3));
        assert_eq!(merged.len(), 12);
    }

    #[test]
    fn test_display() {
        assert_eq!(Span::new(0, 1, 4, 7).to_string(), "4:7");
        assert!(Span::dummy().is_empty());
    }
}
