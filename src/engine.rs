use std::{fmt, sync::Arc};

use crate::{
    cache::TemplateCache,
    error::{MinihamlError, MinihamlResult},
    interface::{Context, MinihamlInterface},
    options::Options,
    provider::{ContentProvider, MemoryProvider, normalise},
    template::{CompiledTemplate, ContentLink, PartialRenderer, compile},
};

/// `MinihamlEngine` is the primary implementation of the `MinihamlInterface` trait,
/// tying together a source provider, compilation options and a cache of
/// compiled templates.
///
/// Templates are compiled the first time they are needed and reused after
/// that. The engine also renders `@partialcontent` directives and fills
/// layout placeholders from the content blocks of a page.
///
/// # Examples
///
/// ```
/// use minihaml::{Context, MinihamlEngine, MinihamlInterface};
///
/// // Create a new engine
/// let mut engine = MinihamlEngine::new();
///
/// // Add a template
/// engine.add_template("greeting", "%p Hello, #{name}!").unwrap();
///
/// // Setup context
/// let context = Context::new().with("name", "World");
///
/// // Render template
/// let output = engine.render("greeting", Some(&context)).unwrap();
/// assert_eq!(output, "<p>Hello, World!</p>\n");
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug)]
pub struct MinihamlEngine<P = MemoryProvider> {
    options: Options,
    #[cfg_attr(feature = "serde", serde(skip))]
    cache: TemplateCache,
    provider: P,
    fallbacks: Vec<String>,
}

impl MinihamlEngine {
    /// Creates a new engine with no templates and default options.
    ///
    /// # Returns
    ///
    /// A new engine backed by an empty [`MemoryProvider`].
    pub fn new() -> Self {
        Self::with_provider(MemoryProvider::new())
    }
}

impl Default for MinihamlEngine {
    /// Creates a default `MinihamlEngine` instance by calling `new()`.
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ContentProvider> MinihamlEngine<P> {
    /// Creates an engine that reads template sources from `provider`.
    pub fn with_provider(provider: P) -> Self {
        Self {
            options: Options::default(),
            cache: TemplateCache::new(),
            provider,
            fallbacks: Vec::new(),
        }
    }

    /// Replaces the compilation options. Templates compiled under the old
    /// options are dropped.
    #[must_use]
    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self.cache.clear();
        self
    }

    /// Adds a location searched for templates that are not found under
    /// their own name, e.g. `shared` for `shared/footer.haml`.
    #[must_use]
    pub fn with_fallback<T: Into<String>>(mut self, location: T) -> Self {
        self.fallbacks.push(location.into());
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Drops every compiled template. Sources are kept and compile again
    /// on next use.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Returns the compiled form of template `name`, compiling it if needed.
    ///
    /// # Arguments
    ///
    /// * `name` - The template name, with or without the `.haml` suffix
    ///
    /// # Returns
    ///
    /// * `Ok(Arc<CompiledTemplate>)` shared with every other caller asking for
    ///   the same template
    /// * `Err(MinihamlError::TemplateNotFound)` if no source exists for `name`
    /// * `Err(MinihamlError::Parse)` and friends if the source fails to compile
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use minihaml::{MinihamlEngine, MinihamlInterface};
    ///
    /// let mut engine = MinihamlEngine::new();
    /// engine.add_template("page", "%p").unwrap();
    ///
    /// let first = engine.compiled("page").unwrap();
    /// let second = engine.compiled("page.haml").unwrap();
    /// assert!(Arc::ptr_eq(&first, &second));
    /// ```
    pub fn compiled<N: AsRef<str>>(&self, name: N) -> MinihamlResult<Arc<CompiledTemplate>> {
        let fallbacks: Vec<&str> = self.fallbacks.iter().map(String::as_str).collect();
        let source = self.provider.source(name.as_ref(), &fallbacks)?;
        self.cache.get_or_compile(&source.identity, || {
            compile(&source.identity, &source.text, &self.options)
        })
    }

    /// Renders a chain of layouts around a page.
    ///
    /// `templates[0]` is the outermost layout; each later template fills the
    /// placeholders of the ones before it, the last one being the page.
    ///
    /// # Errors
    ///
    /// * `Err(MinihamlError::Render)` if `templates` is empty
    /// * Any lookup, compile or render error of the templates involved
    ///
    /// # Examples
    ///
    /// ```
    /// use minihaml::{MinihamlEngine, MinihamlInterface};
    ///
    /// let mut engine = MinihamlEngine::new();
    /// engine.add_template("site", "%html\n  @contentplaceholder main").unwrap();
    /// engine.add_template("blog", "@content main\n  %article\n    @contentplaceholder post").unwrap();
    /// engine.add_template("entry", "@content post\n  %p Hello").unwrap();
    ///
    /// let output = engine.render_with_layouts(&["site", "blog", "entry"], None).unwrap();
    /// assert_eq!(output, "<html>\n<article>\n<p>Hello</p>\n</article>\n</html>\n");
    /// ```
    pub fn render_with_layouts<N: AsRef<str>>(
        &self,
        templates: &[N],
        context: Option<&Context>,
    ) -> MinihamlResult<String> {
        let compiled = templates
            .iter()
            .map(|name| self.compiled(name))
            .collect::<MinihamlResult<Vec<_>>>()?;
        let Some((outer, inner)) = compiled.split_first() else {
            return Err(MinihamlError::Render {
                message: "no templates to render".to_owned(),
            });
        };

        let default_context = Context::default();
        let context = context.unwrap_or(&default_context);

        let mut output = String::new();
        with_chain(inner, None, &mut |child| {
            outer.render_with_partials(&mut output, context, child, self)
        })?;
        Ok(output)
    }
}

/// Links `templates` into a content chain, innermost last, and hands the
/// head of the chain to `f`.
fn with_chain<R>(
    templates: &[Arc<CompiledTemplate>],
    next: Option<&ContentLink<'_>>,
    f: &mut dyn FnMut(Option<&ContentLink<'_>>) -> R,
) -> R {
    match templates.split_last() {
        None => f(next),
        Some((last, rest)) => {
            let link = ContentLink {
                template: last,
                next,
            };
            with_chain(rest, Some(&link), f)
        }
    }
}

impl MinihamlInterface for MinihamlEngine<MemoryProvider> {
    /// Adds a new template to the engine with the given name and content.
    ///
    /// The template is compiled straight away, so errors surface here rather
    /// than on first render.
    ///
    /// # Arguments
    ///
    /// * `name` - The name to identify this template by
    /// * `content` - The template source
    ///
    /// # Returns
    ///
    /// * `Ok(())` if the template was successfully added
    /// * `Err(MinihamlError::TemplateExists)` if a template with the given name already exists
    /// * `Err(MinihamlError::Parse)` if the template content contains syntax errors
    ///
    /// # Examples
    ///
    /// ```
    /// use minihaml::{MinihamlEngine, MinihamlInterface};
    ///
    /// let mut engine = MinihamlEngine::new();
    /// engine.add_template("greeting", "%p Hello, #{name}!").unwrap();
    /// assert!(engine.add_template("greeting", "%p again").is_err());
    /// ```
    fn add_template<N: AsRef<str>, C: Into<String>>(
        &mut self,
        name: N,
        content: C,
    ) -> MinihamlResult<()> {
        let name = name.as_ref();
        if self.provider.contains(name) {
            return Err(MinihamlError::TemplateExists {
                template_name: name.to_owned(),
            });
        }

        let content = content.into();
        let identity = normalise(name);
        let template = compile(&identity, &content, &self.options)?;

        self.provider.insert(name, content);
        self.cache.get_or_compile(&identity, || Ok(template))?;
        Ok(())
    }

    /// Renders a template with the given name using the provided context.
    ///
    /// # Arguments
    ///
    /// * `template_name` - The name of the template to render
    /// * `context` - Optional context with variables for template rendering
    ///
    /// # Returns
    ///
    /// * `Ok(String)` containing the rendered template content
    /// * `Err(MinihamlError::TemplateNotFound)` if no template with the given name exists
    /// * Other errors may be returned from the rendering process (missing variables, type mismatches, etc.)
    ///
    /// # Examples
    ///
    /// ```
    /// use minihaml::{Context, MinihamlEngine, MinihamlInterface};
    ///
    /// let mut engine = MinihamlEngine::new();
    /// engine.add_template("list", "%ul\n  - for item in items\n    %li= item").unwrap();
    ///
    /// let context = Context::new().with("items", vec!["a", "b"]);
    /// let output = engine.render("list", Some(&context)).unwrap();
    /// assert_eq!(output, "<ul>\n  <li>a</li>\n  <li>b</li>\n</ul>\n");
    /// ```
    fn render<N: AsRef<str>>(
        &self,
        template_name: N,
        context: Option<&Context>,
    ) -> MinihamlResult<String> {
        self.render_with_layouts(&[template_name], context)
    }

    /// Renders `layout`, filling its placeholders from the content blocks of
    /// `template_name`.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` containing the rendered layout
    /// * `Err(MinihamlError::MissingEntryPoint)` if the layout asks for a block
    ///   without default content that the page does not define
    ///
    /// # Examples
    ///
    /// ```
    /// use minihaml::{MinihamlEngine, MinihamlInterface};
    ///
    /// let mut engine = MinihamlEngine::new();
    /// engine
    ///     .add_template("layout", "%title\n  @contentplaceholder title\n    Untitled\n%body\n  @contentplaceholder main")
    ///     .unwrap();
    /// engine.add_template("home", "@content main\n  %h1 Home").unwrap();
    ///
    /// let output = engine.render_with_layout("layout", "home", None).unwrap();
    /// assert_eq!(output, "<title>\n  Untitled\n</title>\n<body>\n<h1>Home</h1>\n</body>\n");
    /// ```
    fn render_with_layout<L: AsRef<str>, N: AsRef<str>>(
        &self,
        layout: L,
        template_name: N,
        context: Option<&Context>,
    ) -> MinihamlResult<String> {
        self.render_with_layouts(&[layout.as_ref(), template_name.as_ref()], context)
    }
}

/// How deeply partials may nest before rendering gives up.
const MAX_PARTIAL_DEPTH: usize = 32;

impl<P: ContentProvider> PartialRenderer for MinihamlEngine<P> {
    fn render_partial(
        &self,
        template: &str,
        context: &Context,
        sink: &mut dyn fmt::Write,
    ) -> MinihamlResult<()> {
        NestedPartials {
            engine: self,
            depth: 0,
        }
        .render_partial(template, context, sink)
    }
}

/// Renders partials on behalf of an engine, counting how many partials
/// enclose the one being rendered.
struct NestedPartials<'e, P> {
    engine: &'e MinihamlEngine<P>,
    depth: usize,
}

impl<P: ContentProvider> PartialRenderer for NestedPartials<'_, P> {
    fn render_partial(
        &self,
        template: &str,
        context: &Context,
        sink: &mut dyn fmt::Write,
    ) -> MinihamlResult<()> {
        if self.depth >= MAX_PARTIAL_DEPTH {
            return Err(MinihamlError::Render {
                message: format!(
                    "partial '{template}' nested more than {MAX_PARTIAL_DEPTH} levels deep"
                ),
            });
        }
        tracing::trace!(partial = template, depth = self.depth, "rendering partial");
        let nested = NestedPartials {
            engine: self.engine,
            depth: self.depth.saturating_add(1),
        };
        self.engine
            .compiled(template)?
            .render_with_partials(sink, context, None, &nested)
    }
}
