use crate::{
    ast::{Chunk, Position, Text},
    error::{ParseError, ParseErrorKind},
    reader::{ParseResult, Reader},
};

/// Parse the rest of the reader's current line as text.
///
/// Returns `None` for an empty fragment so callers never attach empty text
/// nodes.
pub(crate) fn parse_text(reader: &mut Reader<'_>, escape: Option<bool>) -> ParseResult<Option<Text>> {
    let mut chunks = Vec::new();
    let mut buffer = String::new();

    while let Some(c) = reader.read() {
        match c {
            '\\' if matches!(reader.current_char(), Some('#' | '\\')) => {
                // Escaped, keep the next character verbatim.
                if let Some(escaped) = reader.read() {
                    buffer.push(escaped);
                }
            }
            '#' if reader.current_char() == Some('{') => {
                if !buffer.is_empty() {
                    chunks.push(Chunk::Literal(std::mem::take(&mut buffer)));
                }
                parse_interpolation(reader, escape, &mut chunks)?;
            }
            other => buffer.push(other),
        }
    }

    if !buffer.is_empty() {
        chunks.push(Chunk::Literal(buffer));
    }

    Ok((!chunks.is_empty()).then_some(Text { chunks }))
}

/// Parse a detached fragment (e.g. a quoted attribute value) that started at
/// `line`/`column` of the template, so errors point into the template.
pub(crate) fn parse_fragment(
    fragment: &str,
    escape: Option<bool>,
    line: usize,
    column: usize,
) -> ParseResult<Option<Text>> {
    let mut reader = Reader::fragment(fragment, line);
    let mut text = parse_text(&mut reader, escape).map_err(|err| ParseError {
        line,
        column: column + err.column - 1,
        kind: err.kind,
    })?;
    for chunk in text.iter_mut().flat_map(|text| text.chunks.iter_mut()) {
        if let Chunk::Code { at, .. } = chunk {
            *at = at.shifted(column.saturating_sub(1));
        }
    }
    Ok(text)
}

/// Called with the reader positioned on the `{` of `#{`.
fn parse_interpolation(
    reader: &mut Reader<'_>,
    escape: Option<bool>,
    chunks: &mut Vec<Chunk>,
) -> ParseResult<()> {
    let start = reader.make_error(ParseErrorKind::UnterminatedInterpolation);
    reader.skip("{")?;

    let origin = reader.position();
    let mut code = String::new();
    loop {
        match reader.read() {
            None => return Err(start),
            Some('}') => break,
            Some('\\') if matches!(reader.current_char(), Some('}' | '\\')) => {
                if let Some(escaped) = reader.read() {
                    code.push(escaped);
                }
            }
            Some(other) => code.push(other),
        }
    }

    if !code.trim().is_empty() {
        let leading = code.chars().take_while(|c| c.is_whitespace()).count();
        chunks.push(Chunk::Code {
            code,
            escape,
            at: origin.shifted(leading),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parse with code positions cleared, for comparing chunk contents.
    fn parse(input: &str) -> ParseResult<Option<Text>> {
        let mut text = parse_text(&mut Reader::new(input), None)?;
        for chunk in text.iter_mut().flat_map(|text| text.chunks.iter_mut()) {
            if let Chunk::Code { at, .. } = chunk {
                *at = Position::default();
            }
        }
        Ok(text)
    }

    fn lit(s: &str) -> Chunk {
        Chunk::Literal(s.to_owned())
    }

    fn code(s: &str) -> Chunk {
        Chunk::Code {
            code: s.to_owned(),
            escape: None,
            at: Position::default(),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_empty_fragment_produces_nothing() {
        assert_eq!(parse(""), Ok(None));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_interpolation_splits_chunks() {
        let text = parse("Hello #{name}!").unwrap().unwrap();
        assert_eq!(text.chunks, vec![lit("Hello "), code("name"), lit("!")]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_escaped_interpolation_is_literal() {
        let text = parse("\\#{literal}").unwrap().unwrap();
        assert_eq!(text.chunks, vec![lit("#{literal}")]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_escaped_backslash() {
        let text = parse("a\\\\#{b}").unwrap().unwrap();
        assert_eq!(text.chunks, vec![lit("a\\"), code("b")]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_lone_hash_and_backslash_are_kept() {
        let text = parse("#1 \\n").unwrap().unwrap();
        assert_eq!(text.chunks, vec![lit("#1 \\n")]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_multiple_interpolations() {
        let text = parse("#{a}#{b} and #{c}").unwrap().unwrap();
        assert_eq!(
            text.chunks,
            vec![code("a"), code("b"), lit(" and "), code("c")]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_first_closing_brace_ends_interpolation() {
        let text = parse("#{a{b}c}").unwrap().unwrap();
        assert_eq!(text.chunks, vec![code("a{b"), lit("c}")]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_escape_setting_is_carried() {
        let text = parse_text(&mut Reader::new("#{x}"), Some(false))
            .unwrap()
            .unwrap();
        assert_eq!(
            text.chunks,
            vec![Chunk::Code {
                code: "x".to_owned(),
                escape: Some(false),
                at: Position::new(1, 3),
            }]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_code_positions_point_into_the_line() {
        let text = parse_text(&mut Reader::new("  Hi #{ name } and #{x}"), None)
            .unwrap()
            .unwrap();
        let positions: Vec<Position> = text
            .chunks
            .iter()
            .filter_map(|chunk| match chunk {
                Chunk::Code { at, .. } => Some(*at),
                Chunk::Literal(_) => None,
            })
            .collect();
        assert_eq!(positions, [Position::new(1, 9), Position::new(1, 22)]);

        let text = parse_fragment("a #{b}", None, 3, 7).unwrap().unwrap();
        assert_eq!(
            text.chunks[1],
            Chunk::Code {
                code: "b".to_owned(),
                escape: None,
                at: Position::new(3, 11),
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unterminated_interpolation() {
        let err = parse("abc #{name").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnterminatedInterpolation);
        assert_eq!(err.line, 1);
        assert_eq!(err.column, 6);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_fragment_errors_are_offset() {
        let err = parse_fragment("x#{", None, 4, 10).unwrap_err();
        assert_eq!(err.line, 4);
        assert_eq!(err.column, 12);
    }
}
