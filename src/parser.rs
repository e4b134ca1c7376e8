use std::collections::BTreeMap;

use crate::{
    ast::{
        Attribute, CodeBlock, Comment, DocType, Document, Filter, Meta, Node, Position, Tag, Text,
    },
    attributes::{parse_bracket_style, parse_map_style},
    classify::{LineKind, classify},
    error::{ParseError, ParseErrorKind},
    reader::{Line, ParseResult, Reader},
    text::{parse_fragment, parse_text},
};

/// Parse template source into a [`Document`].
///
/// # Errors
/// Returns a [`ParseError`] carrying the line and column of the first
/// malformed construct.
pub fn parse(source: &str) -> Result<Document, ParseError> {
    let mut parser = Parser {
        reader: Reader::new(source),
        metadata: BTreeMap::new(),
    };
    let children = parser.parse_block(None)?;
    Ok(Document {
        children,
        metadata: parser.metadata,
    })
}

struct Parser<'a> {
    reader: Reader<'a>,
    metadata: BTreeMap<String, Vec<String>>,
}

impl<'a> Parser<'a> {
    fn skip_blank_lines(&mut self) {
        while self.reader.current_line().is_some_and(Line::is_blank) {
            self.reader.next_line();
        }
    }

    /// Parse consecutive lines indented deeper than `parent`, or every
    /// remaining line at the top level.
    fn parse_block(&mut self, parent: Option<usize>) -> ParseResult<Vec<Node>> {
        let mut nodes = Vec::new();
        loop {
            self.skip_blank_lines();
            let Some(line) = self.reader.current_line().copied() else {
                break;
            };
            if parent.is_some_and(|indent| line.indent <= indent) {
                break;
            }
            if let Some(node) = self.parse_line(line)? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    /// Parse one logical line (which may span several physical lines for
    /// multi-line attribute lists) and everything nested below it.
    fn parse_line(&mut self, line: Line<'a>) -> ParseResult<Option<Node>> {
        let kind = classify(line.content());
        self.reader.skip(kind.marker())?;

        match kind {
            LineKind::Blank => {
                self.reader.next_line();
                Ok(None)
            }
            LineKind::DocType => {
                let text = self.reader.rest_of_line().trim().to_owned();
                self.finish_leaf(line, "a doctype")?;
                Ok(Some(Node::DocType(DocType { text })))
            }
            LineKind::SilentComment => {
                self.reader.next_line();
                self.take_nested_lines(line.indent);
                Ok(None)
            }
            LineKind::Tag => self.parse_tag(line).map(Some),
            LineKind::CodeBlock => {
                let (code, at) = self.read_code()?;
                self.reader.next_line();
                let child = Node::group(self.parse_block(Some(line.indent))?).map(Box::new);
                Ok(Some(Node::CodeBlock(CodeBlock { code, at, child })))
            }
            LineKind::Code { escape } => {
                let (code, at) = self.read_code()?;
                self.finish_leaf(line, "a code line")?;
                Ok(Some(Node::Text(Text::code_at(code, escape, at))))
            }
            LineKind::Text { escape } => {
                self.reader.skip_whitespace();
                let text = parse_text(&mut self.reader, escape)?;
                self.finish_leaf(line, "plain text")?;
                Ok(text.map(Node::Text))
            }
            LineKind::Escaped => {
                let text = parse_text(&mut self.reader, None)?;
                self.finish_leaf(line, "plain text")?;
                Ok(text.map(Node::Text))
            }
            LineKind::Comment => self.parse_comment(line).map(Some),
            LineKind::Filter => self.parse_filter(line).map(Some),
            LineKind::Meta => self.parse_meta(line).map(Some),
        }
    }

    /// The rest of the line as code, with where it starts.
    fn read_code(&mut self) -> ParseResult<(String, Position)> {
        self.reader.skip_whitespace();
        let at = self.reader.position();
        let code = self.reader.rest_of_line().trim();
        if code.is_empty() {
            return Err(self
                .reader
                .make_error(ParseErrorKind::unexpected_end("line", Some("code"))));
        }
        Ok((code.to_owned(), at))
    }

    /// Move past a line that may not have nested content.
    fn finish_leaf(&mut self, line: Line<'a>, what: &str) -> ParseResult<()> {
        self.reader.next_line();
        self.skip_blank_lines();
        match self.reader.current_line() {
            Some(next) if next.indent > line.indent => {
                Err(self.reader.make_error(ParseErrorKind::IllegalNesting {
                    reason: format!("content cannot be nested within {what}"),
                }))
            }
            _ => Ok(()),
        }
    }

    /// Move to the next line and parse the nested block, combined with any
    /// content given inline on the node's own line.
    fn parse_child(&mut self, line: Line<'a>, inline: Option<Node>) -> ParseResult<Option<Node>> {
        if inline.is_some() {
            self.finish_leaf(line, "a line that already has content")?;
            return Ok(inline);
        }
        self.reader.next_line();
        Ok(Node::group(self.parse_block(Some(line.indent))?))
    }

    /// Consume every following line that is blank or indented deeper than
    /// `indent`.
    fn take_nested_lines(&mut self, indent: usize) -> Vec<Line<'a>> {
        let mut lines = Vec::new();
        while let Some(line) = self.reader.current_line().copied() {
            if !line.is_blank() && line.indent <= indent {
                break;
            }
            lines.push(line);
            self.reader.next_line();
        }
        while lines.last().is_some_and(Line::is_blank) {
            lines.pop();
        }
        lines
    }

    fn parse_tag(&mut self, line: Line<'a>) -> ParseResult<Node> {
        let name = if self.reader.consume("%") {
            self.reader.read_name()?.to_owned()
        } else {
            "div".to_owned()
        };

        let mut attributes = Vec::new();
        loop {
            let attribute = match self.reader.current_char() {
                Some('.') => "class",
                Some('#') if self.reader.next_char() != Some('{') => "id",
                _ => break,
            };
            self.reader.read();
            let value = self
                .reader
                .read_while(|c| c.is_alphanumeric() || c == '_' || c == '-');
            if value.is_empty() {
                return Err(self.reader.make_error(match self.reader.current_char() {
                    Some(c) => ParseErrorKind::InvalidIdentifier {
                        at_char: c.to_string(),
                    },
                    None => ParseErrorKind::unexpected_end("line", Some(attribute)),
                }));
            }
            attributes.push(Attribute::text(attribute, Text::literal(value)));
        }

        self.parse_attribute_groups(&mut attributes, true)?;

        if self.reader.consume("/") {
            self.reader.skip_whitespace();
            if !self.reader.at_end_of_line() {
                return Err(self.reader.make_error(ParseErrorKind::UnexpectedToken {
                    expected: "end of line after '/'".to_owned(),
                    found: format!("'{}'", self.reader.rest()),
                }));
            }
            self.finish_leaf(line, "a self-closing tag")?;
            return Ok(Node::Tag(Tag {
                name,
                attributes,
                child: None,
                auto_close: true,
            }));
        }

        let inline = if let Some(escape) = self.consume_code_marker() {
            let (code, at) = self.read_code()?;
            Some(Node::Text(Text::code_at(code, escape, at)))
        } else if self.reader.at_end_of_line() {
            None
        } else if self.reader.current_char().is_some_and(char::is_whitespace) {
            self.reader.skip_whitespace();
            parse_text(&mut self.reader, None)?.map(Node::Text)
        } else {
            let found = self.reader.rest();
            return Err(self.reader.make_error(ParseErrorKind::UnexpectedToken {
                expected: format!("attributes or content for '%{name}'"),
                found: format!("'{found}'"),
            }));
        };

        let child = self.parse_child(line, inline)?.map(Box::new);
        Ok(Node::Tag(Tag {
            name,
            attributes,
            child,
            auto_close: false,
        }))
    }

    /// Consume `=`, `&=` or `!=` returning the escape setting it selects.
    fn consume_code_marker(&mut self) -> Option<Option<bool>> {
        if self.reader.consume("&=") {
            Some(Some(true))
        } else if self.reader.consume("!=") {
            Some(Some(false))
        } else if self.reader.consume("=") {
            Some(None)
        } else {
            None
        }
    }

    fn parse_attribute_groups(
        &mut self,
        attributes: &mut Vec<Attribute>,
        allow_code: bool,
    ) -> ParseResult<()> {
        loop {
            match self.reader.current_char() {
                Some('{') => attributes.extend(parse_map_style(&mut self.reader, allow_code)?),
                Some('(') => attributes.extend(parse_bracket_style(&mut self.reader, allow_code)?),
                _ => return Ok(()),
            }
        }
    }

    fn parse_comment(&mut self, line: Line<'a>) -> ParseResult<Node> {
        let condition = if self.reader.consume("[") {
            let condition = self.reader.read_while(|c| c != ']').trim().to_owned();
            self.reader.skip("]")?;
            Some(condition)
        } else {
            None
        };

        self.reader.skip_whitespace();
        let inline = parse_text(&mut self.reader, None)?.map(Node::Text);
        let child = self
            .parse_child(line, inline)?
            .unwrap_or_else(|| Node::Text(Text::default()));

        Ok(Node::Comment(Comment {
            condition,
            child: Box::new(child),
        }))
    }

    /// Filter bodies are raw lines: only the indentation of the first body
    /// line is removed so deeper lines keep their relative indentation.
    fn parse_filter(&mut self, line: Line<'a>) -> ParseResult<Node> {
        let name = self.reader.read_name()?.to_owned();
        self.reader.skip_whitespace();
        if !self.reader.at_end_of_line() {
            let found = self.reader.rest();
            return Err(self.reader.make_error(ParseErrorKind::UnexpectedToken {
                expected: format!("end of line after ':{name}'"),
                found: format!("'{found}'"),
            }));
        }

        self.reader.next_line();
        let body = self.take_nested_lines(line.indent);
        let base = body
            .iter()
            .find(|l| !l.is_blank())
            .map_or(0, |l| l.indent);

        let mut lines = Vec::with_capacity(body.len());
        for body_line in body {
            let strip = base.min(body_line.indent);
            let raw = body_line.text.get(strip..).unwrap_or_default();
            let text = parse_fragment(raw, None, body_line.number, strip + 1)?;
            lines.push(Node::Text(text.unwrap_or_default()));
        }

        let child = match lines.len() {
            1 => lines.pop().unwrap_or_else(|| Node::Children(Vec::new())),
            _ => Node::Children(lines),
        };
        Ok(Node::Filter(Filter {
            name,
            child: Box::new(child),
        }))
    }

    fn parse_meta(&mut self, line: Line<'a>) -> ParseResult<Node> {
        let name = self.reader.read_name()?.to_owned();
        self.reader.skip_whitespace();
        let at = self.reader.position();
        let value = self
            .reader
            .read_while(|c| !c.is_whitespace() && c != '(' && c != '{')
            .to_owned();

        let mut attributes = Vec::new();
        self.parse_attribute_groups(&mut attributes, false)?;

        self.reader.skip_whitespace();
        let inline = parse_text(&mut self.reader, None)?.map(Node::Text);
        let child = self.parse_child(line, inline)?.map(Box::new);

        self.metadata
            .entry(name.clone())
            .or_default()
            .push(value.clone());

        Ok(Node::Meta(Meta {
            name,
            value,
            at,
            attributes,
            child,
        }))
    }
}
