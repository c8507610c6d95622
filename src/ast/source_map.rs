use std::fmt;

use super::Span;

/// Line index over a source string, for turning spans into `line:column`
/// positions. Columns count characters, not bytes.
pub struct SourceMap<'a> {
    source: &'a str,
    /// Byte offset at which each line begins.
    line_starts: Vec<usize>,
}

/// 1-based location shown to users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub file: Option<String>,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{}:", file)?;
        }
        write!(f, "{}:{}", self.line, self.column)
    }
}

impl<'a> SourceMap<'a> {
    pub fn new(source: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        SourceMap { source, line_starts }
    }

    /// 0-based index of the line holding byte `offset`.
    fn line_index(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= offset).saturating_sub(1)
    }

    /// `(line, column)` of byte `offset`. Offsets past the end land after the
    /// last character.
    pub fn lookup(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.source.len());
        let index = self.line_index(offset);
        let start = self.line_starts[index];
        let column = match self.source.get(start..offset) {
            Some(prefix) => prefix.chars().count(),
            None => offset - start,
        };
        (index + 1, column + 1)
    }

    pub fn position(&self, span: Span, file: Option<&str>) -> Position {
        let (line, column) = self.lookup(span.start);
        Position { line, column, file: file.map(str::to_string) }
    }

    /// Text of 1-based `line` without its line ending. Empty when out of range.
    pub fn line_text(&self, line: usize) -> &'a str {
        let Some(&start) = line.checked_sub(1).and_then(|i| self.line_starts.get(i)) else {
            return "";
        };
        let end = self.line_starts.get(line).copied().unwrap_or(self.source.len());
        self.source[start..end].trim_end_matches('\n').trim_end_matches('\r')
    }

    /// Number of characters `span` covers, at least one.
    pub fn width(&self, span: Span) -> usize {
        let end = span.end.min(self.source.len());
        self.source
            .get(span.start.min(end)..end)
            .map_or(end.saturating_sub(span.start), |text| text.chars().count())
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_on_the_first_line() {
        let map = SourceMap::new("let a = 1;");
        assert_eq!(map.lookup(0), (1, 1));
        assert_eq!(map.lookup(4), (1, 5));
    }

    #[test]
    fn newline_belongs_to_the_line_it_ends() {
        let map = SourceMap::new("let a = 1;\nlet b = 2;\na + b");
        assert_eq!(map.lookup(10), (1, 11));
        assert_eq!(map.lookup(11), (2, 1));
        assert_eq!(map.lookup(22), (3, 1));
        assert_eq!(map.lookup(999), (3, 6));
    }

    #[test]
    fn columns_count_characters() {
        let source = "let s = \"héllo\"; x";
        let map = SourceMap::new(source);
        let x = source.find('x').unwrap();
        assert_eq!(map.lookup(x), (1, 18));
        assert_eq!(map.width(Span::new(8, 15)), 6);
    }

    #[test]
    fn position_carries_the_file_name() {
        let map = SourceMap::new("1;\nfoo");
        let pos = map.position(Span::new(3, 6), Some("main.mk"));
        assert_eq!(pos, Position { line: 2, column: 1, file: Some("main.mk".into()) });
        assert_eq!(pos.to_string(), "main.mk:2:1");
        assert_eq!(map.position(Span::new(3, 6), None).to_string(), "2:1");
    }

    #[test]
    fn line_text_strips_line_endings() {
        let map = SourceMap::new("first\nsecond\r\nthird");
        assert_eq!(map.line_text(1), "first");
        assert_eq!(map.line_text(2), "second");
        assert_eq!(map.line_text(3), "third");
        assert_eq!(map.line_text(0), "");
        assert_eq!(map.line_text(4), "");
    }

    #[test]
    fn empty_source_has_one_line() {
        let map = SourceMap::new("");
        assert_eq!(map.lookup(0), (1, 1));
        assert_eq!(map.line_text(1), "");
        assert_eq!(map.width(Span::new(0, 0)), 1);
    }
}
