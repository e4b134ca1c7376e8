use std::collections::BTreeMap;

/// The root of a parsed template.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    pub children: Vec<Node>,
    /// Every meta directive seen while parsing, name to declared values in
    /// source order, e.g. `content => ["header", "footer"]`.
    pub metadata: BTreeMap<String, Vec<String>>,
}

impl Document {
    /// Whether the document declares a meta directive named `name`.
    pub fn declares(&self, name: &str) -> bool {
        self.metadata.contains_key(name)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// An element, `%name`.
    Tag(Tag),
    /// Literal and interpolated text.
    Text(Text),
    /// A `- code` line and the body nested below it.
    CodeBlock(CodeBlock),
    /// An HTML comment, optionally a conditional comment.
    Comment(Comment),
    /// A `:name` filter over raw body lines.
    Filter(Filter),
    /// An `@name value` directive.
    Meta(Meta),
    /// A `!!!` doctype line.
    DocType(DocType),
    /// A node with more than one nested child.
    Children(Vec<Node>),
    /// A value captured during lowering. Never produced by the parser.
    LateBinding(LateBinding),
}

impl Node {
    /// Group nested nodes into a single child, wrapping only when there is
    /// more than one.
    pub(crate) fn group(mut nodes: Vec<Node>) -> Option<Node> {
        match nodes.len() {
            0 => None,
            1 => nodes.pop(),
            _ => Some(Node::Children(nodes)),
        }
    }

    /// The nodes this node contributes as lines of output.
    pub(crate) fn as_lines(&self) -> &[Node] {
        match self {
            Node::Children(children) => children,
            other => std::slice::from_ref(other),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub child: Option<Box<Node>>,
    /// Set by a trailing `/`, e.g. `%br/`.
    pub auto_close: bool,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Text {
    pub chunks: Vec<Chunk>,
}

impl Text {
    pub fn literal<T: Into<String>>(text: T) -> Self {
        Self {
            chunks: vec![Chunk::Literal(text.into())],
        }
    }

    pub fn code<T: Into<String>>(code: T, escape: Option<bool>) -> Self {
        Self::code_at(code, escape, Position::default())
    }

    pub fn code_at<T: Into<String>>(code: T, escape: Option<bool>, at: Position) -> Self {
        Self {
            chunks: vec![Chunk::Code {
                code: code.into(),
                escape,
                at,
            }],
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Literal(String),
    /// An embedded expression. `escape` of `None` defers to the
    /// configured default.
    Code {
        code: String,
        escape: Option<bool>,
        at: Position,
    },
}

/// Where a piece of code starts in the template source, 1-indexed.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    /// The position `offset` characters further along the same line.
    pub(crate) const fn shifted(self, offset: usize) -> Self {
        Self {
            line: self.line,
            column: self.column.saturating_add(offset),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub code: String,
    pub at: Position,
    pub child: Option<Box<Node>>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    /// `if IE` for `/[if IE]`.
    pub condition: Option<String>,
    pub child: Box<Node>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub name: String,
    pub child: Box<Node>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    pub name: String,
    pub value: String,
    /// Start of the directive's value.
    pub at: Position,
    pub attributes: Vec<Attribute>,
    pub child: Option<Box<Node>>,
}

impl Meta {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocType {
    pub text: String,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<AttributeValue>,
}

impl Attribute {
    pub fn new<N: Into<String>>(name: N, value: Option<AttributeValue>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn text<N: Into<String>>(name: N, value: Text) -> Self {
        Self::new(name, Some(AttributeValue::Text(value)))
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Text(Text),
    LateBinding(LateBinding),
}

/// Handle to a value captured while rendering, resolved at render time.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LateBinding(pub usize);
