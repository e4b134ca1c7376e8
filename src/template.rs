use std::{
    borrow::Cow,
    collections::{BTreeMap, HashMap},
    fmt,
};

use crate::{
    ast::Position,
    error::{MinihamlError, MinihamlResult, ParseError, ParseErrorKind},
    escape::encode_html,
    expr::{Expr, Header, Scope, parse_expression, parse_header, parse_lambda},
    interface::{Context, Value},
    options::Options,
    parser::parse,
    program::{Op, ProgramBuilder, Routine},
    visitor::{FilterKind, lower},
};

/// Name of the entry routine of an ordinary template.
const MAIN: &str = "main";
/// Name of the entry routine of a template that declares `@content` blocks.
const CONTENT_HOLDER: &str = "content_holder";

/// Renders partials on behalf of a template.
///
/// The engine implements this; a [`CompiledTemplate`] rendered on its own
/// has no way to find other templates.
pub trait PartialRenderer {
    /// Render `template` into `sink`, with `context` as its variables.
    ///
    /// # Errors
    /// Whatever looking up or rendering the partial fails with.
    fn render_partial(
        &self,
        template: &str,
        context: &Context,
        sink: &mut dyn fmt::Write,
    ) -> MinihamlResult<()>;
}

/// One step down a layout chain: the template a parent looks into for
/// content blocks, and the link that template itself looks into.
///
/// ```
/// use minihaml::{compile, Context, ContentLink, Options};
///
/// let options = Options::default();
/// let layout = compile("layout", "%body\n  @contentplaceholder main", &options).unwrap();
/// let page = compile("page", "@content main\n  %p Hi", &options).unwrap();
///
/// let link = ContentLink::new(&page);
/// let mut out = String::new();
/// layout.render(&mut out, &Context::new(), Some(&link)).unwrap();
/// assert_eq!(out, "<body>\n<p>Hi</p>\n</body>\n");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ContentLink<'a> {
    pub template: &'a CompiledTemplate,
    pub next: Option<&'a ContentLink<'a>>,
}

impl<'a> ContentLink<'a> {
    pub const fn new(template: &'a CompiledTemplate) -> Self {
        Self {
            template,
            next: None,
        }
    }

    #[must_use]
    pub const fn with_next(mut self, next: &'a ContentLink<'a>) -> Self {
        self.next = Some(next);
        self
    }

    pub fn contains_content(&self, name: &str) -> bool {
        self.template.contains_content(name, self.next)
    }

    fn run_content(
        &self,
        name: &str,
        sink: &mut dyn fmt::Write,
        context: &Context,
        partials: Option<&dyn PartialRenderer>,
    ) -> MinihamlResult<()> {
        self.template
            .run_content_in(name, sink, context, self.next, partials)
    }
}

/// A compiled template.
///
/// Holds only immutable instructions; every render gets its own frame, so a
/// single template can be rendered from many threads at once.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTemplate {
    identity: String,
    entry: Block,
    content: HashMap<String, Block>,
    defaults: HashMap<String, Block>,
    metadata: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
struct Block {
    name: String,
    slots: usize,
    instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq)]
enum Instruction {
    Text(String),
    Expr {
        expr: Expr,
        escape: bool,
    },
    Capture {
        slot: usize,
        body: Vec<Instruction>,
    },
    WriteSlot {
        slot: usize,
        filter: Option<FilterKind>,
    },
    Join {
        target: usize,
        sources: Vec<usize>,
        separator: String,
        sort: bool,
    },
    If {
        branches: Vec<Branch>,
        otherwise: Option<Vec<Instruction>>,
    },
    Each {
        binding: String,
        index: Option<String>,
        iterable: Expr,
        body: Vec<Instruction>,
    },
    Let {
        name: String,
        value: Expr,
    },
    Eval(Expr),
    Placeholder {
        name: String,
        has_default: bool,
    },
    Partial {
        template: String,
        model: Option<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct Branch {
    condition: Expr,
    negate: bool,
    body: Vec<Instruction>,
}

/// Compiles a template source into a [`CompiledTemplate`].
///
/// # Arguments
///
/// * `identity` - The name the template is known by, used in logs and cache keys
/// * `source` - The template source
/// * `options` - Compilation options
///
/// # Errors
///
/// Returns the first parse, lowering or expression error encountered.
///
/// # Examples
///
/// ```
/// use minihaml::{compile, Context, Options};
///
/// let template = compile("greeting", "%p Hello #{name}!", &Options::default()).unwrap();
/// let context = Context::new().with("name", "World");
/// assert_eq!(template.render_to_string(&context).unwrap(), "<p>Hello World!</p>\n");
/// ```
pub fn compile(identity: &str, source: &str, options: &Options) -> MinihamlResult<CompiledTemplate> {
    tracing::debug!(template = identity, "compiling template");
    let compiled = compile_inner(identity, source, options);
    match &compiled {
        Ok(template) => tracing::debug!(
            template = identity,
            content_blocks = template.content.len(),
            "compiled template"
        ),
        Err(err) => tracing::warn!(template = identity, %err, "template failed to compile"),
    }
    compiled
}

fn compile_inner(identity: &str, source: &str, options: &Options) -> MinihamlResult<CompiledTemplate> {
    let document = parse(source)?;
    let entry = if document.declares("content") {
        CONTENT_HOLDER
    } else {
        MAIN
    };

    let mut builder = ProgramBuilder::new(entry);
    lower(&document, options, &mut builder)?;
    let program = builder.finish();

    let named = |routines: Vec<Routine>| -> MinihamlResult<HashMap<String, Block>> {
        routines
            .into_iter()
            .map(|routine| assemble(routine).map(|block| (block.name.clone(), block)))
            .collect()
    };

    Ok(CompiledTemplate {
        identity: identity.to_owned(),
        entry: assemble(program.entry)?,
        content: named(program.content)?,
        defaults: named(program.defaults)?,
        metadata: document.metadata,
    })
}

enum Pending {
    Capture(usize),
    Block(Header, Position),
}

/// Folds a flat list of operations into an instruction tree.
#[derive(Default)]
struct Assembler {
    root: Vec<Instruction>,
    open: Vec<(Pending, Vec<Instruction>)>,
}

impl Assembler {
    fn current(&mut self) -> &mut Vec<Instruction> {
        self.open.last_mut().map_or(&mut self.root, |(_, body)| body)
    }

    fn push(&mut self, instruction: Instruction) {
        self.current().push(instruction);
    }

    fn close(&mut self, pending: Pending, body: Vec<Instruction>) -> MinihamlResult<()> {
        let (header, at) = match pending {
            Pending::Capture(slot) => {
                self.push(Instruction::Capture { slot, body });
                return Ok(());
            }
            Pending::Block(header, at) => (header, at),
        };

        match header {
            Header::If(condition) => self.push(Instruction::If {
                branches: vec![Branch {
                    condition,
                    negate: false,
                    body,
                }],
                otherwise: None,
            }),
            Header::Unless(condition) => self.push(Instruction::If {
                branches: vec![Branch {
                    condition,
                    negate: true,
                    body,
                }],
                otherwise: None,
            }),
            Header::ElseIf(condition) => match self.current().last_mut() {
                Some(Instruction::If {
                    branches,
                    otherwise: None,
                }) => branches.push(Branch {
                    condition,
                    negate: false,
                    body,
                }),
                _ => return Err(dangling("elsif", at)),
            },
            Header::Else => match self.current().last_mut() {
                Some(Instruction::If { otherwise, .. }) if otherwise.is_none() => {
                    *otherwise = Some(body);
                }
                _ => return Err(dangling("else", at)),
            },
            Header::For {
                binding,
                index,
                iterable,
            } => self.push(Instruction::Each {
                binding,
                index,
                iterable,
                body,
            }),
            Header::Let { name, value } => {
                self.push(Instruction::Let { name, value });
                self.current().extend(body);
            }
            Header::Eval(expr) => {
                self.push(Instruction::Eval(expr));
                self.current().extend(body);
            }
        }
        Ok(())
    }
}

fn dangling(keyword: &str, at: Position) -> MinihamlError {
    MinihamlError::Parse(ParseError {
        line: at.line,
        column: at.column,
        kind: ParseErrorKind::DanglingElse {
            keyword: keyword.to_owned(),
        },
    })
}

/// Move an error reported against a line of code to where that code starts
/// in the template.
fn locate(at: Position) -> impl Fn(ParseError) -> MinihamlError {
    move |err| {
        MinihamlError::Parse(ParseError {
            line: at.line,
            column: at.column.saturating_add(err.column.saturating_sub(1)),
            kind: err.kind,
        })
    }
}

fn unbalanced(routine: &str) -> MinihamlError {
    MinihamlError::Render {
        message: format!("unbalanced block in routine '{routine}'"),
    }
}

fn assemble(routine: Routine) -> MinihamlResult<Block> {
    let mut assembler = Assembler::default();

    for op in routine.ops {
        match op {
            Op::Text(text) => match assembler.current().last_mut() {
                Some(Instruction::Text(previous)) => previous.push_str(&text),
                _ => assembler.push(Instruction::Text(text)),
            },
            Op::Code { code, escape, at } => assembler.push(Instruction::Expr {
                expr: parse_expression(&code).map_err(locate(at))?,
                escape,
            }),
            Op::BeginCapture(slot) => assembler
                .open
                .push((Pending::Capture(slot.0), Vec::new())),
            Op::EndCapture | Op::EndBlock => {
                let (pending, body) = assembler
                    .open
                    .pop()
                    .ok_or_else(|| unbalanced(&routine.name))?;
                assembler.close(pending, body)?;
            }
            Op::WriteData { data, filter } => assembler.push(Instruction::WriteSlot {
                slot: data.0,
                filter,
            }),
            Op::Join {
                target,
                sources,
                separator,
                sort,
            } => assembler.push(Instruction::Join {
                target: target.0,
                sources: sources.into_iter().map(|s| s.0).collect(),
                separator,
                sort,
            }),
            Op::Block { code, at } => {
                let header = parse_header(&code).map_err(locate(at))?;
                assembler.open.push((Pending::Block(header, at), Vec::new()));
            }
            Op::Lambda { head, params, at } => {
                let header = parse_lambda(&head, &params).map_err(locate(at))?;
                assembler.open.push((Pending::Block(header, at), Vec::new()));
            }
            Op::Statement { code, at } => {
                let header = parse_header(&code).map_err(locate(at))?;
                assembler.close(Pending::Block(header, at), Vec::new())?;
            }
            Op::Placeholder { name, has_default } => {
                assembler.push(Instruction::Placeholder { name, has_default });
            }
            Op::Partial { invocation, at } => assembler.push(Instruction::Partial {
                template: invocation.template,
                model: invocation
                    .model
                    .as_deref()
                    .map(parse_expression)
                    .transpose()
                    .map_err(locate(at))?,
            }),
        }
    }

    if !assembler.open.is_empty() {
        return Err(unbalanced(&routine.name));
    }

    tracing::trace!(routine = %routine.name, slots = routine.slots, "assembled routine");
    Ok(Block {
        name: routine.name,
        slots: routine.slots,
        instructions: assembler.root,
    })
}

impl CompiledTemplate {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Meta directives the template declared, e.g. `content => ["main"]`.
    pub fn metadata(&self) -> &BTreeMap<String, Vec<String>> {
        &self.metadata
    }

    /// Names of the `@content` blocks this template defines.
    pub fn content_names(&self) -> impl Iterator<Item = &str> {
        self.content.keys().map(String::as_str)
    }

    /// Renders the template into `sink`.
    ///
    /// # Arguments
    ///
    /// * `sink` - Where output is written
    /// * `context` - Variables available to the template
    /// * `child` - The template (and its own chain) that content
    ///   placeholders are filled from
    ///
    /// # Errors
    ///
    /// * `MissingVariable` or `TypeMismatch` from expressions
    /// * `MissingChildTemplate` if a placeholder is reached without a child
    /// * `MissingEntryPoint` if no template in the chain defines a block
    ///   that a placeholder without default content asks for
    /// * `MissingPartialRenderer` if the template renders a partial
    pub fn render(
        &self,
        sink: &mut dyn fmt::Write,
        context: &Context,
        child: Option<&ContentLink<'_>>,
    ) -> MinihamlResult<()> {
        self.render_in(sink, context, child, None)
    }

    /// Like [`CompiledTemplate::render`], with `partials` resolving
    /// `@partialcontent` directives.
    ///
    /// # Errors
    ///
    /// As [`CompiledTemplate::render`], plus whatever `partials` fails with.
    pub fn render_with_partials(
        &self,
        sink: &mut dyn fmt::Write,
        context: &Context,
        child: Option<&ContentLink<'_>>,
        partials: &dyn PartialRenderer,
    ) -> MinihamlResult<()> {
        self.render_in(sink, context, child, Some(partials))
    }

    /// Renders the template on its own into a new string.
    ///
    /// # Errors
    ///
    /// As [`CompiledTemplate::render`].
    pub fn render_to_string(&self, context: &Context) -> MinihamlResult<String> {
        let mut output = String::new();
        self.render(&mut output, context, None)?;
        Ok(output)
    }

    pub(crate) fn render_in(
        &self,
        sink: &mut dyn fmt::Write,
        context: &Context,
        child: Option<&ContentLink<'_>>,
        partials: Option<&dyn PartialRenderer>,
    ) -> MinihamlResult<()> {
        let env = Env {
            template: self,
            context,
            child,
            partials,
        };
        run_block(&self.entry, sink, env)
    }

    /// Whether this template, or any template down its `child` chain,
    /// defines the `@content` block `name`.
    pub fn contains_content(&self, name: &str, child: Option<&ContentLink<'_>>) -> bool {
        self.content.contains_key(name) || child.is_some_and(|link| link.contains_content(name))
    }

    /// Runs the `@content` block `name`, from this template if it defines
    /// one, else from the first template down the `child` chain that does.
    ///
    /// # Errors
    ///
    /// `MissingEntryPoint` when no template in the chain defines `name`,
    /// otherwise as [`CompiledTemplate::render`].
    pub fn run_content(
        &self,
        name: &str,
        sink: &mut dyn fmt::Write,
        context: &Context,
        child: Option<&ContentLink<'_>>,
    ) -> MinihamlResult<()> {
        self.run_content_in(name, sink, context, child, None)
    }

    fn run_content_in(
        &self,
        name: &str,
        sink: &mut dyn fmt::Write,
        context: &Context,
        child: Option<&ContentLink<'_>>,
        partials: Option<&dyn PartialRenderer>,
    ) -> MinihamlResult<()> {
        if let Some(block) = self.content.get(name) {
            let env = Env {
                template: self,
                context,
                child,
                partials,
            };
            return run_block(block, sink, env);
        }
        match child {
            Some(link) => link.run_content(name, sink, context, partials),
            None => Err(MinihamlError::MissingEntryPoint {
                name: name.to_owned(),
            }),
        }
    }
}

/// What a running block can reach besides its own frame.
#[derive(Clone, Copy)]
struct Env<'a> {
    template: &'a CompiledTemplate,
    context: &'a Context,
    child: Option<&'a ContentLink<'a>>,
    partials: Option<&'a dyn PartialRenderer>,
}

/// Per-call state of a running block.
struct Frame<'c> {
    context: &'c Context,
    locals: Vec<(String, Value)>,
    slots: Vec<String>,
}

impl Frame<'_> {
    fn assign(&mut self, name: &str, value: Value) {
        match self.locals.iter_mut().rev().find(|(local, _)| local == name) {
            Some((_, existing)) => *existing = value,
            None => self.locals.push((name.to_owned(), value)),
        }
    }

    fn slot(&self, slot: usize) -> &str {
        self.slots.get(slot).map_or("", String::as_str)
    }

    fn fill(&mut self, slot: usize, text: String) {
        if let Some(target) = self.slots.get_mut(slot) {
            *target = text;
        }
    }
}

impl Scope for Frame<'_> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.locals
            .iter()
            .rev()
            .find(|(local, _)| local == name)
            .map(|(_, value)| value)
            .or_else(|| self.context.get(name))
    }
}

fn run_block(block: &Block, sink: &mut dyn fmt::Write, env: Env<'_>) -> MinihamlResult<()> {
    let mut frame = Frame {
        context: env.context,
        locals: Vec::new(),
        slots: vec![String::new(); block.slots],
    };
    run(&block.instructions, sink, &mut frame, env)
}

fn write_value(sink: &mut dyn fmt::Write, value: &Value, escape: bool) -> fmt::Result {
    let text = match value {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    };
    if escape {
        sink.write_str(&encode_html(&text))
    } else {
        sink.write_str(&text)
    }
}

fn run(
    instructions: &[Instruction],
    sink: &mut dyn fmt::Write,
    frame: &mut Frame<'_>,
    env: Env<'_>,
) -> MinihamlResult<()> {
    for instruction in instructions {
        match instruction {
            Instruction::Text(text) => sink.write_str(text)?,
            Instruction::Expr { expr, escape } => {
                let value = expr.evaluate(&*frame)?;
                write_value(sink, &value, *escape)?;
            }
            Instruction::Capture { slot, body } => {
                let mut captured = String::new();
                run(body, &mut captured, frame, env)?;
                frame.fill(*slot, captured);
            }
            Instruction::WriteSlot { slot, filter } => {
                let text = frame.slot(*slot);
                match filter {
                    Some(kind) => sink.write_str(&kind.apply(text))?,
                    None => sink.write_str(text)?,
                }
            }
            Instruction::Join {
                target,
                sources,
                separator,
                sort,
            } => {
                let mut parts: Vec<&str> = sources
                    .iter()
                    .map(|source| frame.slot(*source))
                    .filter(|part| !part.is_empty())
                    .collect();
                if *sort {
                    parts.sort_unstable();
                }
                let joined = parts.join(separator);
                frame.fill(*target, joined);
            }
            Instruction::If {
                branches,
                otherwise,
            } => {
                let mut taken = None;
                for branch in branches {
                    if branch.condition.is_truthy(&*frame)? != branch.negate {
                        taken = Some(&branch.body);
                        break;
                    }
                }
                if let Some(body) = taken.or(otherwise.as_ref()) {
                    run(body, sink, frame, env)?;
                }
            }
            Instruction::Each {
                binding,
                index,
                iterable,
                body,
            } => {
                let items = match iterable.evaluate(&*frame)? {
                    Cow::Borrowed(Value::List(items)) => items.clone(),
                    Cow::Owned(Value::List(items)) => items,
                    Cow::Borrowed(Value::Nil) | Cow::Owned(Value::Nil) => Vec::new(),
                    other => {
                        return Err(MinihamlError::TypeMismatch {
                            expected: "list".to_owned(),
                            found: other.type_name().to_owned(),
                        });
                    }
                };
                let depth = frame.locals.len();
                for (position, item) in items.into_iter().enumerate() {
                    frame.locals.truncate(depth);
                    frame.locals.push((binding.clone(), item));
                    if let Some(index) = index {
                        frame.locals.push((index.clone(), Value::from(position)));
                    }
                    run(body, sink, frame, env)?;
                }
                frame.locals.truncate(depth);
            }
            Instruction::Let { name, value } => {
                let value = value.evaluate(&*frame)?.into_owned();
                frame.assign(name, value);
            }
            Instruction::Eval(expr) => {
                expr.evaluate(&*frame)?;
            }
            Instruction::Placeholder { name, has_default } => {
                placeholder(name, *has_default, sink, env)?;
            }
            Instruction::Partial { template, model } => {
                let renderer = env.partials.ok_or_else(|| MinihamlError::MissingPartialRenderer {
                    name: template.clone(),
                })?;
                match model {
                    Some(model) => {
                        let value = model.evaluate(&*frame)?.into_owned();
                        let mut context = env.context.clone();
                        context.insert("model", value);
                        renderer.render_partial(template, &context, sink)?;
                    }
                    None => renderer.render_partial(template, env.context, sink)?,
                }
            }
        }
    }
    Ok(())
}

fn placeholder(
    name: &str,
    has_default: bool,
    sink: &mut dyn fmt::Write,
    env: Env<'_>,
) -> MinihamlResult<()> {
    let child = env.child.ok_or_else(|| MinihamlError::MissingChildTemplate {
        placeholder: name.to_owned(),
    })?;

    if has_default && !child.contains_content(name) {
        let default = env.template.defaults.get(name).ok_or_else(|| {
            MinihamlError::MissingEntryPoint {
                name: name.to_owned(),
            }
        })?;
        return run_block(default, sink, env);
    }
    child.run_content(name, sink, env.context, env.partials)
}
