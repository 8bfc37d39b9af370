//! Code generation backends
//!
//! The translator drives a [`Backend`]; [`OpBuffer`] collects executable
//! code for the VM and [`TextBackend`] renders a readable listing of the
//! same operation stream.

use phpeval_core::ast::Literal;
use phpeval_core::InternalError;

use super::ops::{Label, Op, ScopeKind, VarRef};

/// Sink for translated code
pub trait Backend {
    fn emit(&mut self, op: Op);

    fn new_label(&mut self) -> Label;

    /// Bind `label` to the position of the next emitted op
    fn place_label(&mut self, label: Label);

    fn open_scope(&mut self, kind: ScopeKind);

    fn close_scope(&mut self) -> Result<(), InternalError>;
}

/// Representation of a frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Long,
    Double,
    Bool,
    Str,
    Value,
    Cell,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub name: String,
    pub kind: SlotKind,
}

/// How one parameter reaches its variable
#[derive(Debug, Clone)]
pub struct ParamBinding {
    pub name: String,
    pub var: VarRef,
    pub by_ref: bool,
    pub default: Option<Literal>,
}

/// Frame shape of a translated function
#[derive(Debug, Clone, Default)]
pub struct FrameLayout {
    pub slots: Vec<SlotInfo>,
    pub params: Vec<ParamBinding>,
    /// Parameters up to the last one without a default
    pub required: usize,
}

/// Executable code of one function
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub name: String,
    pub frame: FrameLayout,
    ops: Vec<Op>,
    labels: Vec<usize>,
}

impl CompiledFunction {
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Op index a label was placed at
    pub fn target(&self, label: Label) -> Result<usize, InternalError> {
        self.labels
            .get(label.0 as usize)
            .copied()
            .ok_or(InternalError::UnknownLabel(label.0))
    }
}

/// Collects ops and resolves labels
#[derive(Debug, Default)]
pub struct OpBuffer {
    ops: Vec<Op>,
    labels: Vec<Option<usize>>,
    scopes: Vec<ScopeKind>,
}

impl OpBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn finish(self, name: &str, frame: FrameLayout) -> Result<CompiledFunction, InternalError> {
        if !self.scopes.is_empty() {
            return Err(InternalError::UnbalancedScope);
        }
        let labels = self
            .labels
            .iter()
            .enumerate()
            .map(|(index, at)| at.ok_or(InternalError::UnknownLabel(index as u32)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CompiledFunction {
            name: name.to_string(),
            frame,
            ops: self.ops,
            labels,
        })
    }
}

impl Backend for OpBuffer {
    fn emit(&mut self, op: Op) {
        self.ops.push(op);
    }

    fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    fn place_label(&mut self, label: Label) {
        if let Some(slot) = self.labels.get_mut(label.0 as usize) {
            *slot = Some(self.ops.len());
        }
    }

    /// Loop scopes only structure listings; suppression needs runtime ops
    fn open_scope(&mut self, kind: ScopeKind) {
        if kind == ScopeKind::Suppress {
            self.ops.push(Op::OpenScope(kind));
        }
        self.scopes.push(kind);
    }

    fn close_scope(&mut self) -> Result<(), InternalError> {
        match self.scopes.pop() {
            Some(ScopeKind::Suppress) => {
                self.ops.push(Op::CloseScope);
                Ok(())
            }
            Some(ScopeKind::Loop) => Ok(()),
            None => Err(InternalError::UnbalancedScope),
        }
    }
}

/// Renders the op stream as indented text
#[derive(Debug, Default)]
pub struct TextBackend {
    lines: Vec<String>,
    labels: u32,
    scopes: Vec<ScopeKind>,
}

impl TextBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn indent(&self) -> String {
        "  ".repeat(self.scopes.len() + 1)
    }

    pub fn finish(self) -> Result<String, InternalError> {
        if !self.scopes.is_empty() {
            return Err(InternalError::UnbalancedScope);
        }
        let mut text = self.lines.join("\n");
        text.push('\n');
        Ok(text)
    }
}

impl Backend for TextBackend {
    fn emit(&mut self, op: Op) {
        let line = format!("{}{}", self.indent(), op);
        self.lines.push(line);
    }

    fn new_label(&mut self) -> Label {
        self.labels += 1;
        Label(self.labels - 1)
    }

    fn place_label(&mut self, label: Label) {
        let indent = "  ".repeat(self.scopes.len());
        self.lines.push(format!("{}{}:", indent, label));
    }

    fn open_scope(&mut self, kind: ScopeKind) {
        let line = format!("{}{} {{", self.indent(), kind);
        self.lines.push(line);
        self.scopes.push(kind);
    }

    fn close_scope(&mut self) -> Result<(), InternalError> {
        self.scopes.pop().ok_or(InternalError::UnbalancedScope)?;
        let line = format!("{}}}", self.indent());
        self.lines.push(line);
        Ok(())
    }
}
