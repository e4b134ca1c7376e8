use crate::{
    ast::{Attribute, AttributeValue, Text},
    error::ParseErrorKind,
    reader::{ParseResult, Reader},
    text::parse_fragment,
};

/// Parse `(name='value' other=code)`.
///
/// Entries are separated by whitespace and may continue over several lines.
/// Unquoted values are expressions and only accepted when `allow_code` is set.
pub(crate) fn parse_bracket_style(
    reader: &mut Reader<'_>,
    allow_code: bool,
) -> ParseResult<Vec<Attribute>> {
    reader.skip("(")?;
    let mut attributes = Vec::new();

    loop {
        if !reader.continue_on_next_line() {
            return Err(reader.make_error(ParseErrorKind::UnterminatedAttributes { closing: ')' }));
        }
        if reader.consume(")") {
            break;
        }

        let name = reader.read_name()?;
        reader.skip_whitespace();
        expect_separator(reader, "=")?;
        let value = parse_value(reader, name, allow_code, ')')?;
        attributes.push(Attribute::new(name, Some(value)));
    }

    Ok(attributes)
}

/// Parse `{:name => 'value', 'other' => code}`.
pub(crate) fn parse_map_style(
    reader: &mut Reader<'_>,
    allow_code: bool,
) -> ParseResult<Vec<Attribute>> {
    reader.skip("{")?;
    let mut attributes = Vec::new();

    loop {
        if !reader.continue_on_next_line() {
            return Err(reader.make_error(ParseErrorKind::UnterminatedAttributes { closing: '}' }));
        }
        if reader.consume("}") {
            break;
        }

        let name = parse_map_key(reader)?;
        reader.skip_whitespace();
        expect_separator(reader, "=>")?;
        let value = parse_value(reader, &name, allow_code, '}')?;
        attributes.push(Attribute::new(name, Some(value)));

        reader.skip_whitespace();
        reader.consume(",");
    }

    Ok(attributes)
}

fn expect_separator(reader: &mut Reader<'_>, separator: &str) -> ParseResult<()> {
    if reader.at_end_of_line() {
        return Err(reader.make_error(ParseErrorKind::MissingAttributeValue));
    }
    reader.skip(separator)?;
    reader.skip_whitespace();
    if reader.at_end_of_line() {
        return Err(reader.make_error(ParseErrorKind::MissingAttributeValue));
    }
    Ok(())
}

fn parse_map_key(reader: &mut Reader<'_>) -> ParseResult<String> {
    match reader.current_char() {
        Some(':') => {
            reader.skip(":")?;
            Ok(reader.read_name()?.to_owned())
        }
        Some(quote @ ('\'' | '"')) => {
            let (raw, _) = read_quoted(reader, quote)?;
            Ok(raw.to_owned())
        }
        _ => Ok(reader.read_name()?.to_owned()),
    }
}

fn parse_value(
    reader: &mut Reader<'_>,
    name: &str,
    allow_code: bool,
    closing: char,
) -> ParseResult<AttributeValue> {
    match reader.current_char() {
        None => Err(reader.make_error(ParseErrorKind::MissingAttributeValue)),
        Some(quote @ ('\'' | '"')) => {
            let line = reader.line();
            let (raw, column) = read_quoted(reader, quote)?;
            let text = parse_fragment(raw, None, line, column)?.unwrap_or_default();
            Ok(AttributeValue::Text(text))
        }
        Some(c) if c == closing || c == ',' => Err(reader.make_error(ParseErrorKind::UnexpectedToken {
            expected: format!("value for attribute '{name}'"),
            found: format!("'{c}'"),
        })),
        Some(_) if !allow_code => Err(reader.make_error(ParseErrorKind::CodeNotAllowed {
            attribute: name.to_owned(),
        })),
        Some(_) => {
            let at = reader.position();
            let code = reader.read_while(|c| !c.is_whitespace() && c != closing && c != ',');
            Ok(AttributeValue::Text(Text::code_at(code, None, at)))
        }
    }
}

/// Read a quoted string, returning its raw contents and the column they
/// start at.
fn read_quoted<'a>(reader: &mut Reader<'a>, quote: char) -> ParseResult<(&'a str, usize)> {
    let mut delimiter = [0u8; 4];
    let delimiter: &str = quote.encode_utf8(&mut delimiter);

    reader.skip(delimiter)?;
    let column = reader.column();
    let raw = reader.read_while(|c| c != quote);
    reader.skip(delimiter)?;
    Ok((raw, column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Chunk, Position};

    fn literal(name: &str, value: &str) -> Attribute {
        Attribute::text(name, Text::literal(value))
    }

    fn code(name: &str, value: &str, column: usize) -> Attribute {
        Attribute::text(name, Text::code_at(value, None, Position::new(1, column)))
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_bracket_style_literals_and_code() {
        let mut reader = Reader::new("(href='/home' title=page.title class=\"nav\")");
        let attributes = parse_bracket_style(&mut reader, true).unwrap();
        assert_eq!(
            attributes,
            vec![
                literal("href", "/home"),
                code("title", "page.title", 21),
                literal("class", "nav"),
            ]
        );
        assert!(reader.at_end_of_line());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_bracket_style_spans_lines() {
        let mut reader = Reader::new("(a='1'\n   b='2')");
        let attributes = parse_bracket_style(&mut reader, true).unwrap();
        assert_eq!(attributes, vec![literal("a", "1"), literal("b", "2")]);
        assert_eq!(reader.line(), 2);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_map_style_keys() {
        let mut reader = Reader::new("{:id => 'main', 'data-x' => \"y\", lang => code}");
        let attributes = parse_map_style(&mut reader, true).unwrap();
        assert_eq!(
            attributes,
            vec![
                literal("id", "main"),
                literal("data-x", "y"),
                code("lang", "code", 42),
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_quoted_values_are_interpolated() {
        let mut reader = Reader::new("(href='/users/#{user.id}')");
        let attributes = parse_bracket_style(&mut reader, true).unwrap();
        let Some(AttributeValue::Text(text)) = &attributes[0].value else {
            panic!("expected text value");
        };
        assert_eq!(
            text.chunks,
            vec![
                Chunk::Literal("/users/".to_owned()),
                Chunk::Code {
                    code: "user.id".to_owned(),
                    escape: None,
                    at: Position::new(1, 17),
                }
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_empty_quoted_value() {
        let mut reader = Reader::new("(alt='')");
        let attributes = parse_bracket_style(&mut reader, true).unwrap();
        assert_eq!(attributes, vec![Attribute::text("alt", Text::default())]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_code_not_allowed() {
        let mut reader = Reader::new("(model=user)");
        let err = parse_bracket_style(&mut reader, false).unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::CodeNotAllowed {
                attribute: "model".to_owned()
            }
        );
        assert_eq!(err.column, 8);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_line_ends_before_value() {
        let mut reader = Reader::new("(a=\n'b')");
        let err = parse_bracket_style(&mut reader, true).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingAttributeValue);
        assert_eq!(err.line, 1);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_closing_delimiter_mid_entry() {
        let mut reader = Reader::new("{:a => }");
        let err = parse_map_style(&mut reader, true).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::UnexpectedToken { .. }));

        let mut reader = Reader::new("(a)");
        let err = parse_bracket_style(&mut reader, true).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::UnexpectedToken { .. }));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unterminated_list() {
        let mut reader = Reader::new("(a='1'\n");
        let err = parse_bracket_style(&mut reader, true).unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::UnterminatedAttributes { closing: ')' }
        );
    }
}
