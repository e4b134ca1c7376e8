use std::{collections::BTreeSet, fmt, sync::Arc};

/// Output dialect.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Xhtml,
    Html4,
    Html5,
}

impl Format {
    /// Whether empty elements are written `<br>` instead of `<br />`.
    pub const fn is_html(self) -> bool {
        match self {
            Format::Xhtml => false,
            Format::Html4 | Format::Html5 => true,
        }
    }
}

/// A partial to render: which template, and the expression bound as `model`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartialInvocation {
    pub template: String,
    pub model: Option<String>,
}

/// Decides which template a `@partialcontent name` directive renders.
pub trait PartialStrategy: fmt::Debug + Send + Sync {
    fn invocation(&self, name: &str, model: Option<&str>) -> PartialInvocation;
}

/// Renders the template named by the directive as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectPartials;

impl PartialStrategy for DirectPartials {
    fn invocation(&self, name: &str, model: Option<&str>) -> PartialInvocation {
        PartialInvocation {
            template: name.to_owned(),
            model: model.map(str::to_owned),
        }
    }
}

/// Prepends a prefix to every partial name, e.g. `card` becomes `_card`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixedPartials {
    pub prefix: String,
}

impl PrefixedPartials {
    pub fn new<T: Into<String>>(prefix: T) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl PartialStrategy for PrefixedPartials {
    fn invocation(&self, name: &str, model: Option<&str>) -> PartialInvocation {
        PartialInvocation {
            template: format!("{}{name}", self.prefix),
            model: model.map(str::to_owned),
        }
    }
}

fn default_partials() -> Arc<dyn PartialStrategy> {
    Arc::new(DirectPartials)
}

fn default_auto_closing_tags() -> BTreeSet<String> {
    [
        "meta", "img", "link", "br", "hr", "input", "area", "param", "col", "base",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

/// Compilation options.
///
/// Options are fixed when a template is compiled; the same template source
/// compiled with different options is a different artifact.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone)]
pub struct Options {
    pub format: Format,
    /// Indent with tabs instead of `indent_size` spaces.
    pub use_tabs: bool,
    pub indent_size: usize,
    /// Levels of indentation added to every line.
    pub base_indent: usize,
    /// Whether code output is HTML-encoded unless a line says otherwise.
    pub encode_html: bool,
    /// Tags written as empty elements when they have no content.
    pub auto_closing_tags: BTreeSet<String>,
    /// Whether `@content` and `@contentplaceholder` build overridable blocks.
    /// When disabled their bodies render in place.
    pub content_overrides: bool,
    #[cfg_attr(feature = "serde", serde(skip, default = "default_partials"))]
    pub partials: Arc<dyn PartialStrategy>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            format: Format::default(),
            use_tabs: false,
            indent_size: 2,
            base_indent: 0,
            encode_html: true,
            auto_closing_tags: default_auto_closing_tags(),
            content_overrides: true,
            partials: default_partials(),
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub const fn with_tabs(mut self, use_tabs: bool) -> Self {
        self.use_tabs = use_tabs;
        self
    }

    #[must_use]
    pub const fn with_indent_size(mut self, indent_size: usize) -> Self {
        self.indent_size = indent_size;
        self
    }

    #[must_use]
    pub const fn with_base_indent(mut self, base_indent: usize) -> Self {
        self.base_indent = base_indent;
        self
    }

    #[must_use]
    pub const fn with_encode_html(mut self, encode_html: bool) -> Self {
        self.encode_html = encode_html;
        self
    }

    #[must_use]
    pub fn with_auto_closing_tag<T: Into<String>>(mut self, tag: T) -> Self {
        self.auto_closing_tags.insert(tag.into());
        self
    }

    #[must_use]
    pub const fn with_content_overrides(mut self, content_overrides: bool) -> Self {
        self.content_overrides = content_overrides;
        self
    }

    #[must_use]
    pub fn with_partials<S: PartialStrategy + 'static>(mut self, strategy: S) -> Self {
        self.partials = Arc::new(strategy);
        self
    }

    pub fn is_auto_closing(&self, tag: &str) -> bool {
        self.auto_closing_tags.contains(tag)
    }

    /// The whitespace for one level of indentation.
    pub(crate) fn indent_unit(&self) -> String {
        if self.use_tabs {
            "\t".to_owned()
        } else {
            " ".repeat(self.indent_size)
        }
    }
}
