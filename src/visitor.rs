//! Lowers a [`Document`] into primitive render operations.
//!
//! The visitor owns the traversal and all HTML layout decisions. What happens
//! to the operations is up to the [`Backend`]: the compiler records them into a
//! program, tests record them into a list.

use std::{borrow::Cow, sync::LazyLock};

use regex::Regex;

use crate::{
    ast::{
        Attribute, AttributeValue, Chunk, Document, Filter, LateBinding, Meta, Node, Position, Tag,
        Text,
    },
    error::{MinihamlError, MinihamlResult},
    escape::encode_html,
    options::{Format, Options, PartialInvocation},
};

/// `head (params) =>` on a code line with a body.
static LAMBDA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\s*\((.*)\)\s*=>\s*$").expect("lambda pattern is a valid regex")
});

/// How a `- code` line opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockOpen<'a> {
    /// A header with a nested body, e.g. `if user`.
    Block { code: &'a str },
    /// `items.each (item) =>` with a nested body.
    Lambda { head: &'a str, params: &'a str },
    /// A line without a body, e.g. `total = 0`.
    Statement { code: &'a str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum RoutineKind {
    /// `@content name`, which a parent template may ask for.
    Content,
    /// The default body of `@contentplaceholder name`.
    Default,
}

/// Post-processing applied to captured filter output.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    /// Newlines become `&#x000A;` so whitespace-sensitive blocks survive
    /// re-indentation.
    Preserve,
    Plain,
    Escaped,
}

impl FilterKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "preserve" => Some(FilterKind::Preserve),
            "plain" => Some(FilterKind::Plain),
            "escaped" => Some(FilterKind::Escaped),
            _ => None,
        }
    }

    pub fn apply(self, input: &str) -> Cow<'_, str> {
        match self {
            FilterKind::Preserve => {
                let mut preserved = input.replace('\n', "&#x000A;");
                preserved.push_str("&#x000A;");
                Cow::Owned(preserved)
            }
            FilterKind::Plain => Cow::Borrowed(input),
            FilterKind::Escaped => encode_html(input),
        }
    }
}

/// The operations a lowering target must support.
pub(crate) trait Backend {
    fn write_text(&mut self, text: &str);
    /// Write the value of `code`, which starts at `at` in the template.
    fn write_code(&mut self, code: &str, escape: bool, at: Position);
    /// Redirect output into a fresh capture until the matching `pop_writer`.
    fn push_writer(&mut self);
    fn pop_writer(&mut self) -> LateBinding;
    fn write_data(&mut self, data: LateBinding, filter: Option<FilterKind>);
    fn join_data(&mut self, separator: &str, data: &[LateBinding], sort: bool) -> LateBinding;
    fn start_block(&mut self, block: BlockOpen<'_>, at: Position);
    fn end_block(&mut self);
    /// Begin a named routine. Output goes to it until `leave_routine`.
    fn enter_routine(&mut self, name: &str, kind: RoutineKind) -> MinihamlResult<()>;
    fn leave_routine(&mut self);
    fn content_placeholder(&mut self, name: &str, has_default: bool);
    fn render_partial(&mut self, invocation: PartialInvocation, at: Position);
}

/// Wraps a backend, merging consecutive literal text into one `write_text`.
struct Emitter<'b, B: Backend> {
    backend: &'b mut B,
    pending: String,
}

impl<B: Backend> Emitter<'_, B> {
    fn text(&mut self, text: &str) {
        self.pending.push_str(text);
    }

    fn flush(&mut self) -> &mut B {
        if !self.pending.is_empty() {
            self.backend.write_text(&self.pending);
            self.pending.clear();
        }
        self.backend
    }
}

/// Resolve the text after `!!!` to a doctype declaration.
///
/// # Errors
/// Returns [`MinihamlError::UnsupportedDocType`] for unknown tokens.
pub fn resolve_doctype(text: &str, format: Format) -> MinihamlResult<String> {
    const XHTML_TRANSITIONAL: &str = r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Transitional//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd">"#;
    const XHTML_STRICT: &str = r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Strict//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-strict.dtd">"#;
    const XHTML_FRAMESET: &str = r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Frameset//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-frameset.dtd">"#;
    const XHTML_11: &str = r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">"#;
    const XHTML_BASIC: &str = r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML Basic 1.1//EN" "http://www.w3.org/TR/xhtml-basic/xhtml-basic11.dtd">"#;
    const XHTML_MOBILE: &str = r#"<!DOCTYPE html PUBLIC "-//WAPFORUM//DTD XHTML Mobile 1.2//EN" "http://www.openmobilealliance.org/tech/DTD/xhtml-mobile12.dtd">"#;
    const HTML4_TRANSITIONAL: &str = r#"<!DOCTYPE html PUBLIC "-//W3C//DTD HTML 4.01 Transitional//EN" "http://www.w3.org/TR/html4/loose.dtd">"#;
    const HTML4_STRICT: &str = r#"<!DOCTYPE html PUBLIC "-//W3C//DTD HTML 4.01//EN" "http://www.w3.org/TR/html4/strict.dtd">"#;
    const HTML4_FRAMESET: &str = r#"<!DOCTYPE html PUBLIC "-//W3C//DTD HTML 4.01 Frameset//EN" "http://www.w3.org/TR/html4/frameset.dtd">"#;
    const HTML5: &str = "<!DOCTYPE html>";

    let mut tokens = text.split_whitespace();
    let first = tokens.next();
    let second = tokens.next();

    let doctype = match (first, format) {
        (None, Format::Html4) => HTML4_TRANSITIONAL,
        (None, Format::Html5) => HTML5,
        (None, Format::Xhtml) => XHTML_TRANSITIONAL,
        (Some("5"), _) => HTML5,
        (Some("1.1"), _) => XHTML_11,
        (Some("frameset"), Format::Html4) => HTML4_FRAMESET,
        (Some("frameset"), _) => XHTML_FRAMESET,
        (Some("HTML"), _) => match second {
            Some("frameset") => HTML4_FRAMESET,
            Some("strict") => HTML4_STRICT,
            _ => HTML4_TRANSITIONAL,
        },
        (Some("basic"), _) => XHTML_BASIC,
        (Some("mobile"), _) => XHTML_MOBILE,
        (Some("strict"), Format::Html4) => HTML4_STRICT,
        (Some("strict"), _) => XHTML_STRICT,
        (Some("transitional"), Format::Html4) => HTML4_TRANSITIONAL,
        (Some("transitional"), _) => XHTML_TRANSITIONAL,
        (Some("XML"), Format::Html4 | Format::Html5) => "",
        (Some("XML"), Format::Xhtml) => {
            let encoding = second.unwrap_or("utf-8");
            return Ok(format!("<?xml version='1.0' encoding='{encoding}' ?>"));
        }
        (Some(other), _) => {
            return Err(MinihamlError::UnsupportedDocType {
                doctype: other.to_owned(),
            });
        }
    };
    Ok(doctype.to_owned())
}

/// Lower `document` into `backend`.
///
/// The entry routine is opened by the backend itself; this only emits into
/// it and into the named routines declared by the document.
pub(crate) fn lower<B: Backend>(
    document: &Document,
    options: &Options,
    backend: &mut B,
) -> MinihamlResult<()> {
    let mut visitor = Visitor {
        options,
        indent: 0,
        indent_unit: options.indent_unit(),
    };
    let mut out = Emitter {
        backend,
        pending: String::new(),
    };
    visitor.visit_lines(&document.children, &mut out)?;
    out.flush();
    Ok(())
}

struct Visitor<'o> {
    options: &'o Options,
    indent: usize,
    indent_unit: String,
}

impl Visitor<'_> {
    fn write_indent<B: Backend>(&self, out: &mut Emitter<'_, B>) {
        let levels = self.indent.saturating_add(self.options.base_indent);
        for _ in 0..levels {
            out.text(&self.indent_unit);
        }
    }

    fn visit_lines<B: Backend>(
        &mut self,
        nodes: &[Node],
        out: &mut Emitter<'_, B>,
    ) -> MinihamlResult<()> {
        for node in nodes {
            self.visit_line(node, out)?;
        }
        Ok(())
    }

    /// Write `node` as a line of output. Code blocks and directives only
    /// produce the lines of their bodies.
    fn visit_line<B: Backend>(&mut self, node: &Node, out: &mut Emitter<'_, B>) -> MinihamlResult<()> {
        match node {
            Node::CodeBlock(_) | Node::Meta(_) => self.visit(node, out),
            Node::Text(text) if text.chunks.is_empty() => {
                out.text("\n");
                Ok(())
            }
            Node::DocType(doctype) => {
                let declaration = resolve_doctype(&doctype.text, self.options.format)?;
                if !declaration.is_empty() {
                    self.write_indent(out);
                    out.text(&declaration);
                    out.text("\n");
                }
                Ok(())
            }
            Node::Children(children) => self.visit_lines(children, out),
            Node::Tag(_)
            | Node::Text(_)
            | Node::Comment(_)
            | Node::Filter(_)
            | Node::LateBinding(_) => {
                self.write_indent(out);
                self.visit(node, out)?;
                out.text("\n");
                Ok(())
            }
        }
    }

    /// Write `node` as lines one level deeper, leaving the output positioned
    /// at the indentation of a closing line.
    fn visit_nested<B: Backend>(&mut self, node: &Node, out: &mut Emitter<'_, B>) -> MinihamlResult<()> {
        self.indent = self.indent.saturating_add(1);
        out.text("\n");
        self.visit_lines(node.as_lines(), out)?;
        self.indent = self.indent.saturating_sub(1);
        self.write_indent(out);
        Ok(())
    }

    fn visit<B: Backend>(&mut self, node: &Node, out: &mut Emitter<'_, B>) -> MinihamlResult<()> {
        match node {
            Node::Tag(tag) => self.visit_tag(tag, out),
            Node::Text(text) => {
                self.visit_text(text, out);
                Ok(())
            }
            Node::LateBinding(binding) => {
                out.flush().write_data(*binding, None);
                Ok(())
            }
            Node::CodeBlock(block) => {
                let code = block.code.trim();
                match &block.child {
                    Some(child) => {
                        let open = match LAMBDA.captures(code) {
                            Some(captures) => BlockOpen::Lambda {
                                head: captures.get(1).map_or("", |m| m.as_str()),
                                params: captures.get(2).map_or("", |m| m.as_str()),
                            },
                            None => BlockOpen::Block { code },
                        };
                        out.flush().start_block(open, block.at);
                        self.visit_lines(child.as_lines(), out)?;
                        out.flush().end_block();
                    }
                    None => out
                        .flush()
                        .start_block(BlockOpen::Statement { code }, block.at),
                }
                Ok(())
            }
            Node::Comment(comment) => {
                match &comment.condition {
                    Some(condition) => {
                        out.text("<!--[");
                        out.text(condition);
                        out.text("]>");
                        self.visit_nested(&comment.child, out)?;
                        out.text("<![endif]-->");
                    }
                    None if matches!(*comment.child, Node::Children(_)) => {
                        out.text("<!--");
                        self.visit_nested(&comment.child, out)?;
                        out.text("-->");
                    }
                    None => {
                        out.text("<!-- ");
                        self.visit(&comment.child, out)?;
                        out.text(" -->");
                    }
                }
                Ok(())
            }
            Node::Filter(filter) => self.visit_filter(filter, out),
            Node::Meta(meta) => self.visit_meta(meta, out),
            Node::DocType(doctype) => {
                let declaration = resolve_doctype(&doctype.text, self.options.format)?;
                out.text(&declaration);
                Ok(())
            }
            Node::Children(_) => self.visit_nested(node, out),
        }
    }

    fn visit_text<B: Backend>(&mut self, text: &Text, out: &mut Emitter<'_, B>) {
        for chunk in &text.chunks {
            match chunk {
                Chunk::Literal(literal) => out.text(literal),
                Chunk::Code { code, escape, at } => {
                    let escape = escape.unwrap_or(self.options.encode_html);
                    out.flush().write_code(code.trim(), escape, *at);
                }
            }
        }
    }

    fn visit_tag<B: Backend>(&mut self, tag: &Tag, out: &mut Emitter<'_, B>) -> MinihamlResult<()> {
        out.text("<");
        out.text(&tag.name);

        for (name, value) in self.merge_attributes(&tag.attributes, out)? {
            out.text(" ");
            out.text(name);
            out.text("='");
            out.flush().write_data(value, None);
            out.text("'");
        }

        let Some(child) = &tag.child else {
            if tag.auto_close || self.options.is_auto_closing(&tag.name) {
                out.text(if self.options.format.is_html() { ">" } else { " />" });
            } else {
                out.text("></");
                out.text(&tag.name);
                out.text(">");
            }
            return Ok(());
        };

        out.text(">");
        match &**child {
            Node::Text(_) | Node::LateBinding(_) => self.visit(child, out)?,
            Node::Tag(_)
            | Node::CodeBlock(_)
            | Node::Comment(_)
            | Node::Filter(_)
            | Node::Meta(_)
            | Node::DocType(_)
            | Node::Children(_) => self.visit_nested(child, out)?,
        }
        out.text("</");
        out.text(&tag.name);
        out.text(">");
        Ok(())
    }

    /// Merge same-named attributes and sort the result by name.
    ///
    /// Values of a repeated `id` are joined with `_` in source order, any
    /// other repeated attribute joins its values with a space, sorted.
    fn merge_attributes<'t, B: Backend>(
        &mut self,
        attributes: &'t [Attribute],
        out: &mut Emitter<'_, B>,
    ) -> MinihamlResult<Vec<(&'t str, LateBinding)>> {
        let mut remaining: Vec<&Attribute> = attributes.iter().collect();
        let mut merged = Vec::new();

        while let Some(first) = remaining.first().copied() {
            let name = first.name.as_str();
            let (same, rest): (Vec<&Attribute>, Vec<&Attribute>) =
                remaining.into_iter().partition(|a| a.name == name);
            remaining = rest;

            let mut captures = Vec::with_capacity(same.len());
            for attribute in same {
                captures.push(self.capture_value(attribute.value.as_ref(), out));
            }

            let binding = match captures.as_slice() {
                [single] => *single,
                many => {
                    let is_id = name.eq_ignore_ascii_case("id");
                    out.flush()
                        .join_data(if is_id { "_" } else { " " }, many, !is_id)
                }
            };
            merged.push((name, binding));
        }

        merged.sort_by(|a, b| a.0.cmp(b.0));
        Ok(merged)
    }

    fn capture_value<B: Backend>(
        &mut self,
        value: Option<&AttributeValue>,
        out: &mut Emitter<'_, B>,
    ) -> LateBinding {
        match value {
            Some(AttributeValue::LateBinding(binding)) => *binding,
            Some(AttributeValue::Text(text)) => {
                out.flush().push_writer();
                self.visit_text(text, out);
                out.flush().pop_writer()
            }
            None => {
                out.flush().push_writer();
                out.flush().pop_writer()
            }
        }
    }

    fn visit_filter<B: Backend>(&mut self, filter: &Filter, out: &mut Emitter<'_, B>) -> MinihamlResult<()> {
        if filter.name == "javascript" {
            out.text("<script type='text/javascript'>\n");
            self.indent = self.indent.saturating_add(1);
            self.write_indent(out);
            out.text("//<![CDATA[\n");
            self.indent = self.indent.saturating_add(1);
            self.visit_lines(filter.child.as_lines(), out)?;
            self.indent = self.indent.saturating_sub(1);
            self.write_indent(out);
            out.text("//]]>\n");
            self.indent = self.indent.saturating_sub(1);
            self.write_indent(out);
            out.text("</script>");
            return Ok(());
        }

        let kind = FilterKind::from_name(&filter.name).ok_or_else(|| {
            MinihamlError::UnsupportedFilter {
                name: filter.name.clone(),
            }
        })?;

        out.flush().push_writer();
        for (i, line) in filter.child.as_lines().iter().enumerate() {
            if i > 0 {
                out.text("\n");
            }
            self.visit(line, out)?;
        }
        let captured = out.flush().pop_writer();
        out.flush().write_data(captured, Some(kind));
        Ok(())
    }

    fn visit_meta<B: Backend>(&mut self, meta: &Meta, out: &mut Emitter<'_, B>) -> MinihamlResult<()> {
        let overrides = self.options.content_overrides;
        match meta.name.as_str() {
            "content" if overrides => {
                out.flush().enter_routine(&meta.value, RoutineKind::Content)?;
                let indent = std::mem::take(&mut self.indent);
                if let Some(child) = &meta.child {
                    self.visit_lines(child.as_lines(), out)?;
                }
                self.indent = indent;
                out.flush().leave_routine();
            }
            "contentplaceholder" if overrides => {
                out.flush()
                    .content_placeholder(&meta.value, meta.child.is_some());
                if let Some(child) = &meta.child {
                    out.flush().enter_routine(&meta.value, RoutineKind::Default)?;
                    self.visit_lines(child.as_lines(), out)?;
                    out.flush().leave_routine();
                }
            }
            "partialcontent" => {
                let model = meta.attribute("model").and_then(|a| match &a.value {
                    Some(AttributeValue::Text(text)) => Some(source_text(text)),
                    Some(AttributeValue::LateBinding(_)) | None => None,
                });
                let invocation = self.options.partials.invocation(&meta.value, model.as_deref());
                out.flush().render_partial(invocation, meta.at);
            }
            _ => {
                if let Some(child) = &meta.child {
                    self.visit_lines(child.as_lines(), out)?;
                }
            }
        }
        Ok(())
    }
}

/// The source form of a text value, with interpolations written back as
/// their code.
fn source_text(text: &Text) -> String {
    text.chunks
        .iter()
        .map(|chunk| match chunk {
            Chunk::Literal(literal) => literal.as_str(),
            Chunk::Code { code, .. } => code.as_str(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    /// Records operations, rendering literal text and code markers into a
    /// single string so layout can be asserted directly.
    #[derive(Debug, Default)]
    struct Recorder {
        output: String,
        ops: Vec<String>,
        captures: usize,
    }

    impl Backend for Recorder {
        fn write_text(&mut self, text: &str) {
            self.output.push_str(text);
            self.ops.push(format!("text {text:?}"));
        }

        fn write_code(&mut self, code: &str, escape: bool, _at: Position) {
            self.output.push_str(&format!("{{{code}}}"));
            self.ops.push(format!("code {code} {escape}"));
        }

        fn push_writer(&mut self) {
            self.ops.push("push".to_owned());
        }

        fn pop_writer(&mut self) -> LateBinding {
            self.captures += 1;
            self.ops.push(format!("pop ${}", self.captures));
            LateBinding(self.captures)
        }

        fn write_data(&mut self, data: LateBinding, filter: Option<FilterKind>) {
            self.output.push_str(&format!("${}", data.0));
            self.ops.push(format!("data ${} {filter:?}", data.0));
        }

        fn join_data(&mut self, separator: &str, data: &[LateBinding], sort: bool) -> LateBinding {
            self.captures += 1;
            let sources: Vec<String> = data.iter().map(|d| format!("${}", d.0)).collect();
            self.ops.push(format!(
                "join ${} = {} {separator:?} {sort}",
                self.captures,
                sources.join(",")
            ));
            LateBinding(self.captures)
        }

        fn start_block(&mut self, block: BlockOpen<'_>, _at: Position) {
            self.ops.push(format!("start {block:?}"));
        }

        fn end_block(&mut self) {
            self.ops.push("end".to_owned());
        }

        fn enter_routine(&mut self, name: &str, kind: RoutineKind) -> MinihamlResult<()> {
            self.ops.push(format!("enter {name} {kind:?}"));
            Ok(())
        }

        fn leave_routine(&mut self) {
            self.ops.push("leave".to_owned());
        }

        fn content_placeholder(&mut self, name: &str, has_default: bool) {
            self.ops.push(format!("placeholder {name} {has_default}"));
        }

        fn render_partial(&mut self, invocation: PartialInvocation, _at: Position) {
            self.ops.push(format!(
                "partial {} {:?}",
                invocation.template, invocation.model
            ));
        }
    }

    fn record_with(source: &str, options: &Options) -> MinihamlResult<Recorder> {
        let document = parse(source)?;
        let mut recorder = Recorder::default();
        lower(&document, options, &mut recorder)?;
        Ok(recorder)
    }

    fn record(source: &str) -> Recorder {
        record_with(source, &Options::default()).unwrap()
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_nesting_and_dedent() {
        let recorder = record("%div\n  %span\n    Hello\n%p");
        assert_eq!(
            recorder.output,
            "<div>\n  <span>Hello</span>\n</div>\n<p></p>\n"
        );
        // Adjacent literals are merged into a single write.
        assert_eq!(recorder.ops.len(), 1);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_self_closing_tags() {
        let recorder = record("%br\n%img/");
        assert_eq!(recorder.output, "<br />\n<img />\n");

        let html = Options::default().with_format(Format::Html5);
        let recorder = record_with("%br", &html).unwrap();
        assert_eq!(recorder.output, "<br>\n");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_attribute_merge() {
        let recorder = record("%p(class='a' class='b' id='x')");
        assert_eq!(
            recorder.ops,
            [
                "text \"<p\"",
                "push",
                "text \"a\"",
                "pop $1",
                "push",
                "text \"b\"",
                "pop $2",
                "join $3 = $1,$2 \" \" true",
                "push",
                "text \"x\"",
                "pop $4",
                "text \" class='\"",
                "data $3 None",
                "text \"' id='\"",
                "data $4 None",
                "text \"'></p>\\n\"",
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_ids_join_with_underscore_in_order() {
        let recorder = record("#a{:id => 'b'}");
        assert!(recorder.ops.contains(&"join $3 = $1,$2 \"_\" false".to_owned()));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_attributes_sorted_by_name() {
        let recorder = record("%a(title='t' href='h')");
        assert_eq!(recorder.output, "<a href='$2' title='$1'></a>\n");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_code_escaping_defaults() {
        let recorder = record("%p= a\n&= b\n!= c");
        assert_eq!(
            recorder.ops.iter().filter(|op| op.starts_with("code")).collect::<Vec<_>>(),
            ["code a true", "code b true", "code c false"]
        );

        let raw = Options::default().with_encode_html(false);
        let recorder = record_with("= a", &raw).unwrap();
        assert!(recorder.ops.contains(&"code a false".to_owned()));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_code_blocks_and_lambdas() {
        let recorder = record("- for x in xs\n  %li= x\n- items.each (item) =>\n  %p\n- y = 1");
        let blocks: Vec<&String> = recorder
            .ops
            .iter()
            .filter(|op| op.starts_with("start") || *op == "end")
            .collect();
        assert_eq!(
            blocks,
            [
                "start Block { code: \"for x in xs\" }",
                "end",
                "start Lambda { head: \"items.each\", params: \"item\" }",
                "end",
                "start Statement { code: \"y = 1\" }",
            ]
        );
        assert_eq!(recorder.output, "<li>{x}</li>\n<p></p>\n");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_comments() {
        assert_eq!(record("/ note").output, "<!-- note -->\n");
        assert_eq!(
            record("/\n  %p a\n  %p b").output,
            "<!--\n  <p>a</p>\n  <p>b</p>\n-->\n"
        );
        assert_eq!(
            record("/[if IE]\n  %p old").output,
            "<!--[if IE]>\n  <p>old</p>\n<![endif]-->\n"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_javascript_filter() {
        let recorder = record(":javascript\n  var a = 1;\n  go();");
        assert_eq!(
            recorder.output,
            "<script type='text/javascript'>\n  //<![CDATA[\n    var a = 1;\n    go();\n  //]]>\n</script>\n"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_capturing_filters() {
        let recorder = record(":preserve\n  a\n  b");
        assert_eq!(
            recorder.ops,
            [
                "push",
                "text \"a\\nb\"",
                "pop $1",
                "data $1 Some(Preserve)",
                "text \"\\n\"",
            ]
        );
        assert!(matches!(
            record_with(":sass\n  a", &Options::default()),
            Err(MinihamlError::UnsupportedFilter { name }) if name == "sass"
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_filter_kinds() {
        assert_eq!(FilterKind::Preserve.apply("a\nb"), "a&#x000A;b&#x000A;");
        assert_eq!(FilterKind::Escaped.apply("<x>"), "&lt;x&gt;");
        assert_eq!(FilterKind::Plain.apply("<x>"), "<x>");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_meta_routines() {
        let recorder = record("@content header\n  %h1 Hi\n@contentplaceholder side\n  %p default\n@partialcontent card(model='user')");
        assert_eq!(
            recorder.ops,
            [
                "enter header Content",
                "text \"<h1>Hi</h1>\\n\"",
                "leave",
                "placeholder side true",
                "enter side Default",
                "text \"<p>default</p>\\n\"",
                "leave",
                "partial card Some(\"user\")",
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_meta_inline_without_overrides() {
        let options = Options::default().with_content_overrides(false);
        let recorder = record_with("@content header\n  %h1 Hi\n@contentplaceholder side\n  %p d", &options)
            .unwrap();
        assert_eq!(recorder.output, "<h1>Hi</h1>\n<p>d</p>\n");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_indentation_options() {
        let options = Options::default().with_tabs(true).with_base_indent(1);
        let recorder = record_with("%div\n  %p", &options).unwrap();
        assert_eq!(recorder.output, "\t<div>\n\t\t<p></p>\n\t</div>\n");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_doctype_table_is_total() {
        let tokens = [
            "", "5", "1.1", "frameset", "HTML", "HTML frameset", "HTML strict",
            "HTML transitional", "basic", "mobile", "strict", "transitional", "XML",
            "XML iso-8859-1",
        ];
        for format in [Format::Xhtml, Format::Html4, Format::Html5] {
            for token in tokens {
                let doctype = resolve_doctype(token, format).unwrap();
                if token.starts_with("XML") && format.is_html() {
                    assert_eq!(doctype, "");
                } else {
                    assert!(doctype.starts_with("<"), "{token:?} in {format:?}");
                }
            }
            assert!(resolve_doctype("bogus", format).is_err());
        }
        assert_eq!(
            resolve_doctype("XML iso-8859-1", Format::Xhtml).unwrap(),
            "<?xml version='1.0' encoding='iso-8859-1' ?>"
        );
        assert_eq!(resolve_doctype("", Format::Html5).unwrap(), "<!DOCTYPE html>");
        assert!(resolve_doctype("strict", Format::Html4).unwrap().contains("HTML 4.01//EN"));
    }
}
