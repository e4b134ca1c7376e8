//! The expression language used by interpolations, code lines and block
//! headers.
//!
//! Parsing is recursive descent with the precedence
//! OR -> AND -> NOT -> comparison -> primary. Expressions are parsed once when
//! a template is compiled and evaluated against a [`Scope`] on every render.

use std::{borrow::Cow, cmp::Ordering};

use crate::{
    error::{MinihamlError, MinihamlResult, ParseError, ParseErrorKind},
    interface::{Context, Value},
    reader::{ParseResult, Reader},
};

static NIL: Value = Value::Nil;

/// Variables visible to an expression.
pub(crate) trait Scope {
    fn lookup(&self, name: &str) -> Option<&Value>;
}

impl Scope for Context {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Path(Path),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// `root.field[index]...`
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Path {
    root: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Field(String),
    Index(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// The meaning of a `- code` line.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Header {
    If(Expr),
    Unless(Expr),
    ElseIf(Expr),
    Else,
    For {
        binding: String,
        index: Option<String>,
        iterable: Expr,
    },
    Let {
        name: String,
        value: Expr,
    },
    Eval(Expr),
}

impl Expr {
    pub(crate) fn evaluate<'v, S: Scope + ?Sized>(
        &'v self,
        scope: &'v S,
    ) -> MinihamlResult<Cow<'v, Value>> {
        match self {
            Expr::Literal(value) => Ok(Cow::Borrowed(value)),
            Expr::Path(path) => path.resolve(scope),
            Expr::Not(inner) => Ok(Cow::Owned(Value::Bool(!inner.is_truthy(scope)?))),
            Expr::And(left, right) => Ok(Cow::Owned(Value::Bool(
                left.is_truthy(scope)? && right.is_truthy(scope)?,
            ))),
            Expr::Or(left, right) => Ok(Cow::Owned(Value::Bool(
                left.is_truthy(scope)? || right.is_truthy(scope)?,
            ))),
            Expr::Compare { op, left, right } => {
                let left = left.evaluate(scope)?;
                let right = right.evaluate(scope)?;
                Ok(Cow::Owned(Value::Bool(op.apply(&left, &right)?)))
            }
        }
    }

    pub(crate) fn is_truthy<S: Scope + ?Sized>(&self, scope: &S) -> MinihamlResult<bool> {
        Ok(self.evaluate(scope)?.is_truthy())
    }
}

impl Path {
    fn resolve<'v, S: Scope + ?Sized>(&'v self, scope: &'v S) -> MinihamlResult<Cow<'v, Value>> {
        let mut current = scope
            .lookup(&self.root)
            .map(Cow::Borrowed)
            .ok_or_else(|| MinihamlError::MissingVariable {
                variable_name: self.root.clone(),
            })?;

        for segment in &self.segments {
            current = match current {
                Cow::Borrowed(value) => step(value, segment, scope)?,
                Cow::Owned(value) => Cow::Owned(step(&value, segment, scope)?.into_owned()),
            };
        }
        Ok(current)
    }
}

fn step<'a, S: Scope + ?Sized>(
    value: &'a Value,
    segment: &Segment,
    scope: &S,
) -> MinihamlResult<Cow<'a, Value>> {
    match segment {
        Segment::Field(name) => Ok(member(value, name)),
        Segment::Index(expr) => {
            let key = expr.evaluate(scope)?;
            Ok(index(value, &key))
        }
    }
}

/// `.name` on a value. Maps look up their keys first; `length`, `size` and
/// `count` report sizes; anything unknown is `nil`.
fn member<'a>(value: &'a Value, name: &str) -> Cow<'a, Value> {
    if let Value::Map(map) = value {
        if let Some(found) = map.get(name) {
            return Cow::Borrowed(found);
        }
    }
    match (name, value) {
        ("length" | "size" | "count", _) => value
            .len()
            .map_or(Cow::Borrowed(&NIL), |len| Cow::Owned(Value::from(len))),
        ("first", Value::List(items)) => Cow::Borrowed(items.first().unwrap_or(&NIL)),
        ("last", Value::List(items)) => Cow::Borrowed(items.last().unwrap_or(&NIL)),
        _ => Cow::Borrowed(&NIL),
    }
}

/// `[key]` on a value. Negative list indices count from the end.
fn index<'a>(value: &'a Value, key: &Value) -> Cow<'a, Value> {
    let found = match (value, key) {
        (Value::List(items), Value::Int(i)) => {
            let position = if *i < 0 {
                usize::try_from(i.unsigned_abs())
                    .ok()
                    .and_then(|back| items.len().checked_sub(back))
            } else {
                usize::try_from(*i).ok()
            };
            position.and_then(|p| items.get(p))
        }
        (Value::Map(map), Value::String(k)) => map.get(k),
        _ => None,
    };
    Cow::Borrowed(found.unwrap_or(&NIL))
}

impl CompareOp {
    fn apply(self, left: &Value, right: &Value) -> MinihamlResult<bool> {
        let ordering = || {
            order(left, right).ok_or_else(|| MinihamlError::TypeMismatch {
                expected: "two numbers or two strings".to_owned(),
                found: format!("{} and {}", left.type_name(), right.type_name()),
            })
        };
        match self {
            CompareOp::Eq => Ok(loosely_equal(left, right)),
            CompareOp::Ne => Ok(!loosely_equal(left, right)),
            CompareOp::Lt => Ok(ordering()?.is_lt()),
            CompareOp::Le => Ok(ordering()?.is_le()),
            CompareOp::Gt => Ok(ordering()?.is_gt()),
            CompareOp::Ge => Ok(ordering()?.is_ge()),
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Nil
        | Value::Bool(_)
        | Value::String(_)
        | Value::List(_)
        | Value::Map(_) => None,
    }
}

/// Structural equality, except that integers and floats compare by value.
fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a == b,
        _ => match (as_number(left), as_number(right)) {
            (Some(a), Some(b)) => a == b,
            _ => left == right,
        },
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => as_number(left)?.partial_cmp(&as_number(right)?),
    }
}

/// Parse a complete expression.
pub(crate) fn parse_expression(source: &str) -> ParseResult<Expr> {
    let mut parser = ExprParser::new(source);
    parser
        .parse_or()
        .and_then(|expr| parser.finish().map(|()| expr))
        .map_err(|err| invalid(source, err))
}

/// Parse the code of a `- code` line.
pub(crate) fn parse_header(source: &str) -> ParseResult<Header> {
    let mut parser = ExprParser::new(source);
    parser
        .parse_header()
        .and_then(|header| parser.finish().map(|()| header))
        .map_err(|err| invalid(source, err))
}

/// Turn a lambda block `head (params) =>` into a loop header. The head is
/// `e.each`, `e.each_with_index` or just `e`.
pub(crate) fn parse_lambda(head: &str, params: &str) -> ParseResult<Header> {
    let head = head.trim();
    let iterable = head
        .strip_suffix(".each_with_index")
        .or_else(|| head.strip_suffix(".each"))
        .unwrap_or(head);
    let iterable = parse_expression(iterable)?;

    let mut names = params.split(',').map(str::trim);
    let mut parameter = |required: bool| -> ParseResult<Option<String>> {
        match names.next() {
            Some(name) if is_identifier(name) => Ok(Some(name.to_owned())),
            None if !required => Ok(None),
            other => Err(invalid(
                params,
                ParseError {
                    line: 1,
                    column: 1,
                    kind: ParseErrorKind::InvalidIdentifier {
                        at_char: other.unwrap_or_default().to_owned(),
                    },
                },
            )),
        }
    };
    let binding = parameter(true)?.unwrap_or_default();
    let index = parameter(false)?;

    Ok(Header::For {
        binding,
        index,
        iterable,
    })
}

fn invalid(source: &str, err: ParseError) -> ParseError {
    match err.kind {
        ParseErrorKind::InvalidExpression { .. } => err,
        kind => ParseError {
            line: err.line,
            column: err.column,
            kind: ParseErrorKind::InvalidExpression {
                expression: source.trim().to_owned(),
                reason: kind.to_string(),
            },
        },
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_identifier(name: &str) -> bool {
    name.chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && name.chars().all(is_identifier_char)
}

struct ExprParser<'a> {
    reader: Reader<'a>,
}

impl<'a> ExprParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            reader: Reader::fragment(source, 1),
        }
    }

    fn finish(&mut self) -> ParseResult<()> {
        self.reader.skip_whitespace();
        if self.reader.at_end_of_line() {
            return Ok(());
        }
        let found = self.reader.rest();
        Err(self.reader.make_error(ParseErrorKind::UnexpectedToken {
            expected: "end of expression".to_owned(),
            found: format!("'{found}'"),
        }))
    }

    /// Consume `keyword` when it is followed by something that cannot
    /// continue an identifier.
    fn keyword(&mut self, keyword: &str) -> bool {
        self.reader.skip_whitespace();
        let rest = self.reader.rest();
        let follows = rest
            .strip_prefix(keyword)
            .map(|after| after.chars().next());
        match follows {
            Some(next) if !next.is_some_and(is_identifier_char) => self.reader.consume(keyword),
            _ => false,
        }
    }

    fn identifier(&mut self) -> ParseResult<String> {
        self.reader.skip_whitespace();
        match self.reader.current_char() {
            Some(c) if c.is_alphabetic() || c == '_' => {
                Ok(self.reader.read_while(is_identifier_char).to_owned())
            }
            Some(c) => Err(self.reader.make_error(ParseErrorKind::InvalidIdentifier {
                at_char: c.to_string(),
            })),
            None => Err(self
                .reader
                .make_error(ParseErrorKind::unexpected_end("expression", Some("identifier")))),
        }
    }

    /// `name = ...` but not `name == ...`
    fn at_assignment(&self) -> bool {
        let rest = self.reader.rest().trim_start();
        let name_len = rest
            .find(|c: char| !is_identifier_char(c))
            .unwrap_or(rest.len());
        let (name, after) = rest.split_at(name_len);
        let after = after.trim_start();
        is_identifier(name) && after.starts_with('=') && !after.starts_with("==")
    }

    fn parse_header(&mut self) -> ParseResult<Header> {
        if self.keyword("else") {
            if self.keyword("if") {
                return Ok(Header::ElseIf(self.parse_or()?));
            }
            return Ok(Header::Else);
        }
        if self.keyword("elsif") {
            return Ok(Header::ElseIf(self.parse_or()?));
        }
        if self.keyword("if") {
            return Ok(Header::If(self.parse_or()?));
        }
        if self.keyword("unless") {
            return Ok(Header::Unless(self.parse_or()?));
        }
        if self.keyword("for") {
            let binding = self.identifier()?;
            self.reader.skip_whitespace();
            let index = if self.reader.consume(",") {
                Some(self.identifier()?)
            } else {
                None
            };
            if !self.keyword("in") {
                return Err(self.reader.make_error(ParseErrorKind::UnexpectedToken {
                    expected: "'in'".to_owned(),
                    found: format!("'{}'", self.reader.rest()),
                }));
            }
            let iterable = self.parse_or()?;
            return Ok(Header::For {
                binding,
                index,
                iterable,
            });
        }
        if self.keyword("let") || self.at_assignment() {
            let name = self.identifier()?;
            self.reader.skip_whitespace();
            self.reader.skip("=")?;
            let value = self.parse_or()?;
            return Ok(Header::Let { name, value });
        }
        Ok(Header::Eval(self.parse_or()?))
    }

    // Handles OR (||, or)
    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_and()?;
        loop {
            self.reader.skip_whitespace();
            if self.reader.consume("||") || self.keyword("or") {
                let right = self.parse_and()?;
                left = Expr::Or(Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    // Handles AND (&&, and)
    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_not()?;
        loop {
            self.reader.skip_whitespace();
            if self.reader.consume("&&") || self.keyword("and") {
                let right = self.parse_not()?;
                left = Expr::And(Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    // Handles NOT (!, not)
    fn parse_not(&mut self) -> ParseResult<Expr> {
        self.reader.skip_whitespace();
        if (self.reader.peek("!") && !self.reader.peek("!=") && self.reader.consume("!"))
            || self.keyword("not")
        {
            Ok(Expr::Not(Box::new(self.parse_not()?)))
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let left = self.parse_primary()?;
        self.reader.skip_whitespace();
        let op = [
            ("==", CompareOp::Eq),
            ("!=", CompareOp::Ne),
            ("<=", CompareOp::Le),
            (">=", CompareOp::Ge),
            ("<", CompareOp::Lt),
            (">", CompareOp::Gt),
        ]
        .into_iter()
        .find(|(token, _)| self.reader.consume(token));

        match op {
            Some((_, op)) => Ok(Expr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(self.parse_primary()?),
            }),
            None => Ok(left),
        }
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        self.reader.skip_whitespace();
        match self.reader.current_char() {
            Some('(') => {
                self.reader.skip("(")?;
                let inner = self.parse_or()?;
                self.reader.skip_whitespace();
                self.reader.skip(")")?;
                Ok(inner)
            }
            Some(quote @ ('\'' | '"')) => self.parse_string(quote),
            Some(c) if c.is_ascii_digit() => self.parse_number(),
            Some('-') if self.reader.next_char().is_some_and(|c| c.is_ascii_digit()) => {
                self.parse_number()
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                let name = self.identifier()?;
                match name.as_str() {
                    "true" => Ok(Expr::Literal(Value::Bool(true))),
                    "false" => Ok(Expr::Literal(Value::Bool(false))),
                    "nil" | "null" => Ok(Expr::Literal(Value::Nil)),
                    _ => self.parse_path(name),
                }
            }
            Some(c) => Err(self.reader.make_error(ParseErrorKind::UnexpectedToken {
                expected: "expression".to_owned(),
                found: format!("'{c}'"),
            })),
            None => Err(self
                .reader
                .make_error(ParseErrorKind::unexpected_end("expression", None))),
        }
    }

    fn parse_path(&mut self, root: String) -> ParseResult<Expr> {
        let mut segments = Vec::new();
        loop {
            if self.reader.consume(".") {
                let field = self.reader.read_while(is_identifier_char);
                if field.is_empty() {
                    return Err(self.reader.make_error(ParseErrorKind::unexpected_end(
                        "path",
                        Some("field name"),
                    )));
                }
                segments.push(Segment::Field(field.to_owned()));
            } else if self.reader.consume("[") {
                let index = self.parse_or()?;
                self.reader.skip_whitespace();
                self.reader.skip("]")?;
                segments.push(Segment::Index(index));
            } else {
                break;
            }
        }
        Ok(Expr::Path(Path { root, segments }))
    }

    fn parse_string(&mut self, quote: char) -> ParseResult<Expr> {
        self.reader.read();
        let mut value = String::new();
        loop {
            match self.reader.read() {
                None => {
                    return Err(self.reader.make_error(ParseErrorKind::unexpected_end(
                        "string",
                        Some(&quote.to_string()),
                    )));
                }
                Some(c) if c == quote => break,
                Some('\\') => match self.reader.read() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(escaped) => value.push(escaped),
                    None => value.push('\\'),
                },
                Some(c) => value.push(c),
            }
        }
        Ok(Expr::Literal(Value::String(value)))
    }

    fn parse_number(&mut self) -> ParseResult<Expr> {
        let start = self.reader.rest();
        let negative = self.reader.consume("-");
        let whole = self.reader.read_while(|c| c.is_ascii_digit());
        let is_float = self.reader.peek(".")
            && self.reader.next_char().is_some_and(|c| c.is_ascii_digit());

        let sign = if negative { "-" } else { "" };
        let result = if is_float {
            self.reader.read();
            let fraction = self.reader.read_while(|c| c.is_ascii_digit());
            format!("{sign}{whole}.{fraction}")
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| e.to_string())
        } else {
            format!("{sign}{whole}")
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| e.to_string())
        };

        result
            .map(Expr::Literal)
            .map_err(|reason| {
                self.reader.make_error(ParseErrorKind::InvalidExpression {
                    expression: start.to_owned(),
                    reason,
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Context {
        let user: Value = [
            ("name", Value::from("Ada")),
            ("admin", Value::from(true)),
            ("roles", Value::from(vec!["x", "y"])),
        ]
        .into_iter()
        .collect();
        Context::new()
            .with("user", user)
            .with("count", 3)
            .with("items", vec![1, 2, 3])
            .with("empty", "")
    }

    fn eval(source: &str) -> MinihamlResult<Value> {
        let context = context();
        let expr = parse_expression(source)?;
        Ok(expr.evaluate(&context)?.into_owned())
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_literals() {
        assert_eq!(eval("'hi'"), Ok(Value::from("hi")));
        assert_eq!(eval("\"a\\\"b\""), Ok(Value::from("a\"b")));
        assert_eq!(eval("42"), Ok(Value::Int(42)));
        assert_eq!(eval("-1.5"), Ok(Value::Float(-1.5)));
        assert_eq!(eval("nil"), Ok(Value::Nil));
        assert_eq!(eval("true"), Ok(Value::Bool(true)));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_paths() {
        assert_eq!(eval("user.name"), Ok(Value::from("Ada")));
        assert_eq!(eval("user.roles[1]"), Ok(Value::from("y")));
        assert_eq!(eval("user['name']"), Ok(Value::from("Ada")));
        assert_eq!(eval("items[-1]"), Ok(Value::Int(3)));
        assert_eq!(eval("items.length"), Ok(Value::Int(3)));
        assert_eq!(eval("user.roles.first"), Ok(Value::from("x")));
        assert_eq!(eval("user.missing"), Ok(Value::Nil));
        assert_eq!(eval("items[10]"), Ok(Value::Nil));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_missing_root_variable() {
        assert_eq!(
            eval("nobody.name"),
            Err(MinihamlError::MissingVariable {
                variable_name: "nobody".to_owned()
            })
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_boolean_logic_and_precedence() {
        assert_eq!(eval("user.admin && count > 2"), Ok(Value::Bool(true)));
        assert_eq!(eval("not user.admin or empty"), Ok(Value::Bool(false)));
        assert_eq!(eval("!empty"), Ok(Value::Bool(true)));
        assert_eq!(eval("false || true && false"), Ok(Value::Bool(false)));
        assert_eq!(eval("(false || true) && true"), Ok(Value::Bool(true)));
        // Short-circuit skips the missing variable.
        assert_eq!(eval("false && nobody"), Ok(Value::Bool(false)));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_comparisons() {
        assert_eq!(eval("count == 3.0"), Ok(Value::Bool(true)));
        assert_eq!(eval("user.name != 'Bob'"), Ok(Value::Bool(true)));
        assert_eq!(eval("'a' < 'b'"), Ok(Value::Bool(true)));
        assert_eq!(eval("count >= 4"), Ok(Value::Bool(false)));
        assert!(matches!(
            eval("user < 1"),
            Err(MinihamlError::TypeMismatch { .. })
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_invalid_expressions() {
        for source in ["", "a +", "'open", "(a", "a.", "a b"] {
            let err = parse_expression(source).unwrap_err();
            assert!(
                matches!(err.kind, ParseErrorKind::InvalidExpression { .. }),
                "{source:?} gave {err:?}"
            );
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_headers() {
        let path = |name: &str| {
            Expr::Path(Path {
                root: name.to_owned(),
                segments: vec![],
            })
        };
        assert_eq!(parse_header("if a"), Ok(Header::If(path("a"))));
        assert_eq!(parse_header("unless a"), Ok(Header::Unless(path("a"))));
        assert_eq!(parse_header("elsif a"), Ok(Header::ElseIf(path("a"))));
        assert_eq!(parse_header("else if a"), Ok(Header::ElseIf(path("a"))));
        assert_eq!(parse_header("else"), Ok(Header::Else));
        assert_eq!(
            parse_header("for item, i in items"),
            Ok(Header::For {
                binding: "item".to_owned(),
                index: Some("i".to_owned()),
                iterable: path("items"),
            })
        );
        assert_eq!(
            parse_header("total = count"),
            Ok(Header::Let {
                name: "total".to_owned(),
                value: path("count"),
            })
        );
        assert_eq!(
            parse_header("let x = 1"),
            Ok(Header::Let {
                name: "x".to_owned(),
                value: Expr::Literal(Value::Int(1)),
            })
        );
        assert!(matches!(parse_header("a == b"), Ok(Header::Eval(_))));
        assert!(matches!(parse_header("iffy"), Ok(Header::Eval(_))));
        assert!(parse_header("for x items").is_err());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_lambda_heads() {
        let Ok(Header::For { binding, index, .. }) = parse_lambda("items.each_with_index", "item, i")
        else {
            panic!("expected loop");
        };
        assert_eq!(binding, "item");
        assert_eq!(index.as_deref(), Some("i"));

        assert!(matches!(
            parse_lambda("user.roles.each", "role"),
            Ok(Header::For { index: None, .. })
        ));
        assert!(parse_lambda("items", "").is_err());
    }
}
