//! Records lowered operations into routines.

use std::collections::BTreeSet;

use crate::{
    ast::{LateBinding, Position},
    error::{MinihamlError, MinihamlResult},
    options::PartialInvocation,
    visitor::{Backend, BlockOpen, FilterKind, RoutineKind},
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Op {
    Text(String),
    Code {
        code: String,
        escape: bool,
        at: Position,
    },
    BeginCapture(LateBinding),
    EndCapture,
    WriteData {
        data: LateBinding,
        filter: Option<FilterKind>,
    },
    Join {
        target: LateBinding,
        sources: Vec<LateBinding>,
        separator: String,
        sort: bool,
    },
    Block {
        code: String,
        at: Position,
    },
    Lambda {
        head: String,
        params: String,
        at: Position,
    },
    Statement {
        code: String,
        at: Position,
    },
    EndBlock,
    Placeholder {
        name: String,
        has_default: bool,
    },
    Partial {
        invocation: PartialInvocation,
        at: Position,
    },
}

/// A named, separately callable list of operations.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Routine {
    pub name: String,
    pub ops: Vec<Op>,
    /// Number of capture slots the routine uses.
    pub slots: usize,
    open_captures: Vec<LateBinding>,
}

impl Routine {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    fn next_slot(&mut self) -> LateBinding {
        let slot = LateBinding(self.slots);
        self.slots = self.slots.saturating_add(1);
        slot
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Program {
    pub entry: Routine,
    pub content: Vec<Routine>,
    pub defaults: Vec<Routine>,
}

/// A [`Backend`] that builds a [`Program`].
///
/// Starts inside the entry routine. Named routines nest on a stack and are
/// filed by kind when left.
#[derive(Debug)]
pub(crate) struct ProgramBuilder {
    entry: Routine,
    open: Vec<(RoutineKind, Routine)>,
    content: Vec<Routine>,
    defaults: Vec<Routine>,
    declared: BTreeSet<(bool, String)>,
}

impl ProgramBuilder {
    pub(crate) fn new(entry: &str) -> Self {
        Self {
            entry: Routine::new(entry),
            open: Vec::new(),
            content: Vec::new(),
            defaults: Vec::new(),
            declared: BTreeSet::new(),
        }
    }

    fn current(&mut self) -> &mut Routine {
        self.open
            .last_mut()
            .map_or(&mut self.entry, |(_, routine)| routine)
    }

    fn push(&mut self, op: Op) {
        self.current().ops.push(op);
    }

    pub(crate) fn finish(mut self) -> Program {
        while !self.open.is_empty() {
            self.leave_routine();
        }
        Program {
            entry: self.entry,
            content: self.content,
            defaults: self.defaults,
        }
    }
}

impl Backend for ProgramBuilder {
    fn write_text(&mut self, text: &str) {
        if let Some(Op::Text(previous)) = self.current().ops.last_mut() {
            previous.push_str(text);
        } else {
            self.push(Op::Text(text.to_owned()));
        }
    }

    fn write_code(&mut self, code: &str, escape: bool, at: Position) {
        self.push(Op::Code {
            code: code.to_owned(),
            escape,
            at,
        });
    }

    fn push_writer(&mut self) {
        let routine = self.current();
        let slot = routine.next_slot();
        routine.open_captures.push(slot);
        routine.ops.push(Op::BeginCapture(slot));
    }

    fn pop_writer(&mut self) -> LateBinding {
        let routine = self.current();
        match routine.open_captures.pop() {
            Some(slot) => {
                routine.ops.push(Op::EndCapture);
                slot
            }
            // Unbalanced pop: hand out an empty slot instead of closing
            // someone else's capture.
            None => routine.next_slot(),
        }
    }

    fn write_data(&mut self, data: LateBinding, filter: Option<FilterKind>) {
        self.push(Op::WriteData { data, filter });
    }

    fn join_data(&mut self, separator: &str, data: &[LateBinding], sort: bool) -> LateBinding {
        let routine = self.current();
        let target = routine.next_slot();
        routine.ops.push(Op::Join {
            target,
            sources: data.to_vec(),
            separator: separator.to_owned(),
            sort,
        });
        target
    }

    fn start_block(&mut self, block: BlockOpen<'_>, at: Position) {
        let op = match block {
            BlockOpen::Block { code } => Op::Block {
                code: code.to_owned(),
                at,
            },
            BlockOpen::Lambda { head, params } => Op::Lambda {
                head: head.to_owned(),
                params: params.to_owned(),
                at,
            },
            BlockOpen::Statement { code } => Op::Statement {
                code: code.to_owned(),
                at,
            },
        };
        self.push(op);
    }

    fn end_block(&mut self) {
        self.push(Op::EndBlock);
    }

    fn enter_routine(&mut self, name: &str, kind: RoutineKind) -> MinihamlResult<()> {
        let key = (kind == RoutineKind::Content, name.to_owned());
        if !self.declared.insert(key) {
            return Err(MinihamlError::DuplicateContent {
                name: name.to_owned(),
            });
        }
        tracing::trace!(routine = name, ?kind, "entering routine");
        self.open.push((kind, Routine::new(name)));
        Ok(())
    }

    fn leave_routine(&mut self) {
        match self.open.pop() {
            Some((RoutineKind::Content, routine)) => self.content.push(routine),
            Some((RoutineKind::Default, routine)) => self.defaults.push(routine),
            None => {}
        }
    }

    fn content_placeholder(&mut self, name: &str, has_default: bool) {
        self.push(Op::Placeholder {
            name: name.to_owned(),
            has_default,
        });
    }

    fn render_partial(&mut self, invocation: PartialInvocation, at: Position) {
        self.push(Op::Partial { invocation, at });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{options::Options, parser::parse, visitor::lower};

    fn build(source: &str) -> MinihamlResult<Program> {
        let document = parse(source)?;
        let mut builder = ProgramBuilder::new("main");
        lower(&document, &Options::default(), &mut builder)?;
        Ok(builder.finish())
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_text_is_merged() {
        let program = build("%p hello\n%br").unwrap();
        assert_eq!(program.entry.name, "main");
        assert_eq!(
            program.entry.ops,
            vec![Op::Text("<p>hello</p>\n<br />\n".to_owned())]
        );
        assert!(program.content.is_empty());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_capture_slots_are_numbered_per_routine() {
        let program = build("%a(href=url)\n@content main\n  %b(title=name)").unwrap();
        assert_eq!(program.entry.slots, 1);
        assert_eq!(program.content.len(), 1);
        let main = &program.content[0];
        assert_eq!(main.name, "main");
        assert_eq!(main.slots, 1);
        assert!(main.ops.contains(&Op::BeginCapture(LateBinding(0))));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_routines_are_filed_by_kind() {
        let program = build(
            "@contentplaceholder title\n  Default\n@content title\n  Mine",
        )
        .unwrap();
        assert_eq!(program.defaults.len(), 1);
        assert_eq!(program.content.len(), 1);
        assert!(program.entry.ops.contains(&Op::Placeholder {
            name: "title".to_owned(),
            has_default: true,
        }));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_duplicate_content_is_rejected() {
        let err = build("@content main\n  a\n@content main\n  b").unwrap_err();
        assert_eq!(
            err,
            MinihamlError::DuplicateContent {
                name: "main".to_owned()
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_blocks_are_recorded() {
        let program = build("- if user\n  %p hi\n- else\n  %p bye").unwrap();
        let ops = &program.entry.ops;
        assert_eq!(
            ops.first(),
            Some(&Op::Block {
                code: "if user".to_owned(),
                at: Position::new(1, 3),
            })
        );
        assert_eq!(ops.iter().filter(|op| **op == Op::EndBlock).count(), 2);
    }
}
