//! Source text with line/column mapping.
//!
//! Every token and AST node points back into a [`Source`] through a
//! [`Location`]. The mapping from byte offsets to lines is computed once when
//! the source is created.

use std::fmt;

/// A position range in source code.
///
/// `from`/`to` are byte offsets into the source, `line` is 1-based and
/// `column` is the 0-based character offset within that line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Location {
    pub line: usize,
    pub column: usize,
    pub from: usize,
    pub to: usize,
}

impl Location {
    /// A location covering a byte range; line and column are resolved later.
    pub fn span(from: usize, to: usize) -> Self {
        Self {
            line: 0,
            column: 0,
            from,
            to,
        }
    }

    /// Merge two locations into one covering both.
    /// The line and column of the earlier location win.
    pub fn merge(self, other: Location) -> Location {
        let (first, _) = if self.from <= other.from {
            (self, other)
        } else {
            (other, self)
        };
        Location {
            line: first.line,
            column: first.column,
            from: self.from.min(other.from),
            to: self.to.max(other.to),
        }
    }

    pub fn len(&self) -> usize {
        self.to.saturating_sub(self.from)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column + 1)
    }
}

/// The expression text plus a line index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    text: String,
    /// Byte offset of the first character of every line.
    line_starts: Vec<usize>,
}

impl Source {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let mut line_starts = vec![0];
        for (offset, ch) in text.char_indices() {
            if ch == '\n' {
                line_starts.push(offset + 1);
            }
        }
        Self { text, line_starts }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Resolve a byte offset to a `(line, column)` pair.
    ///
    /// Offsets past the end of the text map to the end of the last line.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.text.len());
        let line_index = match self.line_starts.binary_search(&offset) {
            Ok(index) => index,
            Err(index) => index - 1,
        };
        let start = self.line_starts[line_index];
        let column = self.text[start..floor_char_boundary(&self.text, offset)]
            .chars()
            .count();
        (line_index + 1, column)
    }

    /// Build a fully resolved location for a byte range.
    pub fn locate(&self, from: usize, to: usize) -> Location {
        let (line, column) = self.line_col(from);
        Location {
            line,
            column,
            from,
            to,
        }
    }

    /// Fill in line and column of a location that only knows its byte range.
    pub fn resolve(&self, location: &mut Location) {
        let (line, column) = self.line_col(location.from);
        location.line = line;
        location.column = column;
    }

    /// The text of a 1-based line, without its line terminator.
    pub fn snippet(&self, line: usize) -> Option<&str> {
        if line == 0 || line > self.line_starts.len() {
            return None;
        }
        let start = self.line_starts[line - 1];
        let end = self
            .line_starts
            .get(line)
            .map(|next| next - 1)
            .unwrap_or(self.text.len());
        Some(self.text[start..end].trim_end_matches('\r'))
    }
}

impl From<&str> for Source {
    fn from(text: &str) -> Self {
        Source::new(text)
    }
}

impl From<String> for Source {
    fn from(text: String) -> Self {
        Source::new(text)
    }
}

fn floor_char_boundary(text: &str, mut offset: usize) -> usize {
    while offset > 0 && !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_col() {
        let source = Source::new("line1\nline2\nline3");
        assert_eq!(source.line_col(0), (1, 0));
        assert_eq!(source.line_col(5), (1, 5));
        assert_eq!(source.line_col(6), (2, 0));
        assert_eq!(source.line_col(12), (3, 0));
    }

    #[test]
    fn test_column_counts_characters() {
        let source = Source::new("'é' + x");
        // 'é' is two bytes, so `+` starts at byte 5 but column 4.
        assert_eq!(source.line_col(5), (1, 4));
    }

    #[test]
    fn test_snippet() {
        let source = Source::new("a +\nb * c\r\nd");
        assert_eq!(source.snippet(1), Some("a +"));
        assert_eq!(source.snippet(2), Some("b * c"));
        assert_eq!(source.snippet(3), Some("d"));
        assert_eq!(source.snippet(4), None);
    }

    #[test]
    fn test_merge() {
        let a = Location::span(2, 4);
        let b = Location::span(6, 9);
        assert_eq!(a.merge(b), Location::span(2, 9));
        assert_eq!(b.merge(a), Location::span(2, 9));
    }
}
