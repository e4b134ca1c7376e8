use crate::{
    ast::Position,
    error::{ParseError, ParseErrorKind},
};

pub(crate) type ParseResult<T> = Result<T, ParseError>;

/// A single physical line of template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Line<'a> {
    /// Line number (1-indexed)
    pub(crate) number: usize,
    /// Count of leading space/tab characters.
    pub(crate) indent: usize,
    /// The full line, without its terminator.
    pub(crate) text: &'a str,
}

impl<'a> Line<'a> {
    fn new(number: usize, text: &'a str) -> Self {
        let text = text.strip_suffix('\r').unwrap_or(text);
        let indent = text.chars().take_while(|c| *c == ' ' || *c == '\t').count();
        Self {
            number,
            indent,
            text,
        }
    }

    /// The line with its indentation removed.
    pub(crate) fn content(&self) -> &'a str {
        self.text.get(self.indent..).unwrap_or_default()
    }

    pub(crate) fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Character and line oriented reader over a template.
///
/// All character operations work within the current line; moving to the next
/// line is always explicit so callers decide where a construct may continue.
pub(crate) struct Reader<'a> {
    lines: Vec<Line<'a>>,
    /// Index of the current line in `lines`.
    index: usize,
    /// Byte offset into the current line's text.
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        let lines: Vec<Line<'a>> = input
            .split('\n')
            .enumerate()
            .map(|(i, text)| Line::new(i + 1, text))
            .collect();
        let pos = lines.first().map_or(0, |l| l.indent);
        Reader {
            lines,
            index: 0,
            pos,
        }
    }

    /// Reader over a single fragment, used for interpolated attribute values.
    pub(crate) fn fragment(input: &'a str, number: usize) -> Self {
        Reader {
            lines: vec![Line {
                number,
                indent: 0,
                text: input,
            }],
            index: 0,
            pos: 0,
        }
    }

    pub(crate) fn current_line(&self) -> Option<&Line<'a>> {
        self.lines.get(self.index)
    }

    /// Look at the line after the current one without moving.
    pub(crate) fn peek_line(&self) -> Option<&Line<'a>> {
        self.lines.get(self.index + 1)
    }

    pub(crate) fn eof(&self) -> bool {
        self.index >= self.lines.len()
    }

    #[inline]
    fn text(&self) -> &'a str {
        self.lines.get(self.index).map_or("", |l| l.text)
    }

    /// Remaining text on the current line, without consuming it.
    #[inline]
    pub(crate) fn rest(&self) -> &'a str {
        self.text().get(self.pos..).unwrap_or_default()
    }

    /// Current line number (1-indexed).
    pub(crate) fn line(&self) -> usize {
        match self.lines.get(self.index) {
            Some(line) => line.number,
            None => self.lines.len(),
        }
    }

    /// Current column (1-indexed, counted in characters).
    pub(crate) fn column(&self) -> usize {
        self.text()
            .get(..self.pos)
            .map_or(0, |consumed| consumed.chars().count())
            + 1
    }

    pub(crate) fn position(&self) -> Position {
        Position::new(self.line(), self.column())
    }

    #[inline]
    pub(crate) fn make_error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            line: self.line(),
            column: self.column(),
            kind,
        }
    }

    #[inline]
    pub(crate) fn current_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// One character of lookahead past the current character.
    #[inline]
    pub(crate) fn next_char(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    pub(crate) fn at_end_of_line(&self) -> bool {
        self.rest().is_empty()
    }

    /// Consume the current character.
    pub(crate) fn read(&mut self) -> Option<char> {
        let c = self.current_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Peek if the remaining line starts with `s`
    pub(crate) fn peek(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    /// Consume `s` if the remaining line starts with it.
    pub(crate) fn consume(&mut self, s: &str) -> bool {
        if self.peek(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    /// Expect `s` at the current position, consume it or return Err.
    pub(crate) fn skip(&mut self, s: &str) -> ParseResult<()> {
        if self.consume(s) {
            return Ok(());
        }
        let found: String = self.rest().chars().take(s.chars().count() + 10).collect();
        Err(self.make_error(if found.is_empty() {
            ParseErrorKind::unexpected_end("line", Some(s))
        } else {
            ParseErrorKind::UnexpectedToken {
                expected: format!("'{s}'"),
                found: format!("'{found}'"),
            }
        }))
    }

    pub(crate) fn skip_whitespace(&mut self) {
        self.read_while(char::is_whitespace);
    }

    pub(crate) fn read_while<F: Fn(char) -> bool>(&mut self, pred: F) -> &'a str {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| !pred(*c))
            .map_or(rest.len(), |(i, _)| i);
        self.pos += len;
        rest.get(..len).unwrap_or_default()
    }

    /// Consume and return a name (alphanumeric + '_' + '-' + ':')
    pub(crate) fn read_name(&mut self) -> ParseResult<&'a str> {
        let name = self.read_while(is_name_char);
        if name.is_empty() {
            return Err(self.make_error(match self.current_char() {
                Some(c) => ParseErrorKind::InvalidIdentifier {
                    at_char: c.to_string(),
                },
                None => ParseErrorKind::unexpected_end("line", Some("name")),
            }));
        }
        Ok(name)
    }

    /// Consume whatever is left of the current line.
    pub(crate) fn rest_of_line(&mut self) -> &'a str {
        let rest = self.rest();
        self.pos += rest.len();
        rest
    }

    /// Advance to the start of the next line's content.
    ///
    /// Returns false once the end of the stream has been reached.
    pub(crate) fn next_line(&mut self) -> bool {
        if self.index < self.lines.len() {
            self.index += 1;
        }
        self.pos = self.lines.get(self.index).map_or(0, |l| l.indent);
        !self.eof()
    }

    /// When the current line is exhausted, continue on the following
    /// non-blank line. Used by constructs allowed to span lines.
    ///
    /// Returns false when the stream ends before more data is found.
    pub(crate) fn continue_on_next_line(&mut self) -> bool {
        self.skip_whitespace();
        while self.at_end_of_line() {
            if !self.next_line() {
                return false;
            }
            self.skip_whitespace();
        }
        true
    }
}

pub(crate) fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == ':'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_indentation_is_tracked() {
        let reader = Reader::new("%div\n  %span\n\t\tText");
        assert_eq!(reader.lines.len(), 3);
        assert_eq!(reader.lines[0].indent, 0);
        assert_eq!(reader.lines[1].indent, 2);
        assert_eq!(reader.lines[2].indent, 2);
        assert_eq!(reader.lines[2].content(), "Text");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_lookahead_and_read() {
        let mut reader = Reader::new("ab");
        assert_eq!(reader.current_char(), Some('a'));
        assert_eq!(reader.next_char(), Some('b'));
        assert_eq!(reader.read(), Some('a'));
        assert_eq!(reader.current_char(), Some('b'));
        assert_eq!(reader.next_char(), None);
        assert_eq!(reader.column(), 2);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_skip_mismatch_reports_position() {
        let mut reader = Reader::new("\n  foo=bar");
        assert!(reader.next_line());
        assert_eq!(reader.read_name(), Ok("foo"));
        let err = reader.skip("=>").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 6);
        assert!(matches!(err.kind, ParseErrorKind::UnexpectedToken { .. }));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_read_while_and_names() {
        let mut reader = Reader::new("xml:lang-x=1");
        assert_eq!(reader.read_name(), Ok("xml:lang-x"));
        assert_eq!(reader.read_while(|c| c == '='), "=");
        assert_eq!(reader.rest_of_line(), "1");
        assert!(reader.at_end_of_line());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_next_line_reports_end_of_stream() {
        let mut reader = Reader::new("a\nb");
        assert!(reader.next_line());
        assert_eq!(reader.current_char(), Some('b'));
        assert!(!reader.next_line());
        assert!(reader.eof());
        assert_eq!(reader.current_char(), None);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_continue_on_next_line_skips_blank_lines() {
        let mut reader = Reader::new("(\n\n   b='c')");
        reader.skip("(").unwrap();
        assert!(reader.continue_on_next_line());
        assert_eq!(reader.line(), 3);
        assert_eq!(reader.current_char(), Some('b'));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_crlf_lines() {
        let reader = Reader::new("%p\r\n  hi\r\n");
        assert_eq!(reader.lines[0].text, "%p");
        assert_eq!(reader.lines[1].content(), "hi");
        assert!(reader.lines[2].is_blank());
    }
}
