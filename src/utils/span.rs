//! Source location tracking

/// A span represents a range in the source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    /// Start byte offset
    pub start: usize,
    /// End byte offset (exclusive)
    pub end: usize,
    /// Set on nodes invented by the parser while recovering from an error
    pub synthetic: bool,
}

impl Span {
    /// Create a new span
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end, synthetic: false }
    }

    /// Zero-width span for a node that has no source text of its own
    pub fn synthetic(at: usize) -> Self {
        Self { start: at, end: at, synthetic: true }
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    /// Merge two spans
    pub fn merge(&self, other: &Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            synthetic: self.synthetic && other.synthetic,
        }
    }

    /// Check if the span is empty
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The text this span covers
    pub fn slice<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.start..self.end).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_outer_bounds() {
        let a = Span::new(4, 6);
        let b = Span::new(1, 3);
        assert_eq!(a.merge(&b), Span::new(1, 6));
    }

    #[test]
    fn merging_with_real_span_is_not_synthetic() {
        let merged = Span::synthetic(3).merge(&Span::new(3, 5));
        assert!(!merged.is_synthetic());
        assert!(Span::synthetic(3).is_empty());
    }
}
