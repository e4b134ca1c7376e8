//! A HAML-style template compiler.
//!
//! Sources are parsed into a [`Document`], lowered into render operations,
//! compiled into a [`CompiledTemplate`] and cached by [`MinihamlEngine`].

mod ast;
mod attributes;
mod cache;
mod classify;
mod engine;
mod error;
mod escape;
mod expr;
mod interface;
mod options;
mod parser;
mod program;
mod provider;
mod reader;
mod template;
mod text;
mod visitor;

// Public exports.
pub use ast::{
    Attribute, AttributeValue, Chunk, CodeBlock, Comment, DocType, Document, Filter, LateBinding,
    Meta, Node, Position, Tag, Text,
};
pub use cache::TemplateCache;
pub use engine::MinihamlEngine;
pub use error::{MinihamlError, MinihamlResult, ParseError, ParseErrorKind};
pub use escape::encode_html;
pub use interface::{Context, MinihamlInterface, Value};
pub use options::{DirectPartials, Format, Options, PartialInvocation, PartialStrategy, PrefixedPartials};
pub use parser::parse;
pub use provider::{ContentProvider, MemoryProvider, TemplateSource};
pub use template::{CompiledTemplate, ContentLink, PartialRenderer, compile};
pub use visitor::{FilterKind, resolve_doctype};
