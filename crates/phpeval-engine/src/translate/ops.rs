//! Target operations
//!
//! A compiled function is a flat list of [`Op`]s over an operand stack.
//! Typed operands (`long`, `double`, `bool`, `string`) travel unboxed; the
//! translator only emits a typed operation where analysis proved both
//! operands have that representation.

use std::cmp::Ordering;
use std::fmt;
use std::rc::Weak;

use phpeval_core::ast::{BinaryOp, CastKind, UnaryOp};
use phpeval_core::value::{format_double, PhpString};
use phpeval_core::Callable;

use crate::place::UpdateOp;

/// Jump target, resolved by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Representation of an operand on the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repr {
    Long,
    Double,
    Bool,
    Str,
    Value,
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Repr::Long => "long",
            Repr::Double => "double",
            Repr::Bool => "bool",
            Repr::Str => "string",
            Repr::Value => "value",
        })
    }
}

/// How an operation addresses a variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarRef {
    /// A typed or boxed frame slot
    Local { slot: usize, name: String },
    /// A frame slot holding an alias cell
    Cell { slot: usize, name: String },
    /// Looked up by name in the runtime on every access
    Name(String),
    /// Name taken from the top of the stack
    Dynamic,
}

impl fmt::Display for VarRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarRef::Local { slot, name } => write!(f, "${}#{}", name, slot),
            VarRef::Cell { slot, name } => write!(f, "&${}#{}", name, slot),
            VarRef::Name(name) => write!(f, "${}", name),
            VarRef::Dynamic => f.write_str("$$"),
        }
    }
}

/// Whether a read may find the variable undefined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Definitely initialized
    Plain,
    /// Possibly undefined; reported when it is
    Checked,
    /// `isset` context; never reported
    Quiet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongOp {
    Add,
    Sub,
    Mul,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl LongOp {
    pub fn of(op: BinaryOp) -> Option<LongOp> {
        Some(match op {
            BinaryOp::Add => LongOp::Add,
            BinaryOp::Sub => LongOp::Sub,
            BinaryOp::Mul => LongOp::Mul,
            BinaryOp::Mod => LongOp::Mod,
            BinaryOp::BitAnd => LongOp::BitAnd,
            BinaryOp::BitOr => LongOp::BitOr,
            BinaryOp::BitXor => LongOp::BitXor,
            BinaryOp::Shl => LongOp::Shl,
            BinaryOp::Shr => LongOp::Shr,
            _ => return None,
        })
    }

    /// Whether the result can leave the long range and become a double
    pub fn may_overflow(self) -> bool {
        matches!(self, LongOp::Add | LongOp::Sub | LongOp::Mul)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoubleOp {
    Add,
    Sub,
    Mul,
}

impl DoubleOp {
    pub fn of(op: BinaryOp) -> Option<DoubleOp> {
        Some(match op {
            BinaryOp::Add => DoubleOp::Add,
            BinaryOp::Sub => DoubleOp::Sub,
            BinaryOp::Mul => DoubleOp::Mul,
            _ => return None,
        })
    }

    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            DoubleOp::Add => a + b,
            DoubleOp::Sub => a - b,
            DoubleOp::Mul => a * b,
        }
    }
}

/// Comparison of two operands of the same primitive representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compare {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Compare {
    /// `===` and `!==` coincide with `==` and `!=` on operands of one type
    pub fn of(op: BinaryOp) -> Option<Compare> {
        Some(match op {
            BinaryOp::Eq | BinaryOp::Identical => Compare::Eq,
            BinaryOp::NotEq | BinaryOp::NotIdentical => Compare::NotEq,
            BinaryOp::Lt => Compare::Lt,
            BinaryOp::Le => Compare::Le,
            BinaryOp::Gt => Compare::Gt,
            BinaryOp::Ge => Compare::Ge,
            _ => return None,
        })
    }

    pub fn holds(self, ordering: Option<Ordering>) -> bool {
        match self {
            Compare::Eq => ordering == Some(Ordering::Equal),
            Compare::NotEq => ordering != Some(Ordering::Equal),
            Compare::Lt => ordering == Some(Ordering::Less),
            Compare::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            Compare::Gt => ordering == Some(Ordering::Greater),
            Compare::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        }
    }
}

/// Where a place walk starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceRoot {
    Var(VarRef),
    /// A value popped from below the keys, wrapped in a fresh cell
    Temp,
}

/// A step of a place path; index keys come from the stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceStep {
    Index { line: u32 },
    Append,
    Field(String),
}

/// A place: its root is below the keys, keys are pushed in path order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacePath {
    pub root: PlaceRoot,
    pub steps: Vec<PlaceStep>,
}

impl PlacePath {
    /// Number of keys the path pops
    pub fn keys(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, PlaceStep::Index { .. }))
            .count()
    }
}

impl fmt::Display for PlacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            PlaceRoot::Var(var) => write!(f, "{}", var)?,
            PlaceRoot::Temp => f.write_str("(temp)")?,
        }
        for step in &self.steps {
            match step {
                PlaceStep::Index { .. } => f.write_str("[_]")?,
                PlaceStep::Append => f.write_str("[]")?,
                PlaceStep::Field(name) => write!(f, "->{}", name)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// `@expr`: reporting is off until the scope closes
    Suppress,
    Loop,
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScopeKind::Suppress => "suppress",
            ScopeKind::Loop => "loop",
        })
    }
}

/// A statically resolved callee
///
/// Held weakly: the runtime's function table owns callables, and compiled
/// code must not keep its callees alive.
#[derive(Clone)]
pub struct Direct {
    pub name: String,
    pub target: Weak<dyn Callable>,
}

impl fmt::Debug for Direct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Direct").field("name", &self.name).finish()
    }
}

/// One target operation
///
/// Stack effects are written `before -> after`, top of stack last.
#[derive(Debug, Clone)]
pub enum Op {
    PushNull,
    PushBool(bool),
    PushLong(i64),
    PushDouble(f64),
    PushStr(PhpString),
    Pop,
    Dup,
    Swap,
    /// `x -> x'` in the given representation
    Convert(Repr),

    /// `-> value`
    Load { var: VarRef, mode: ReadMode, line: u32 },
    /// `value -> stored`; stores a copy, coerced to the slot's representation
    Store(VarRef),
    /// `-> cell`; creates the variable when missing
    PushRef(VarRef),
    /// `cell -> value`; the variable now denotes `cell`
    Bind(VarRef),
    Unset(VarRef),
    /// Create the variable as null when missing
    Define(VarRef),
    /// `current -> result`; `++`/`--` stored back into the variable
    StepVar { var: VarRef, op: UpdateOp },
    BindGlobal(String),
    LoadThis { line: u32 },

    /// `long long -> long`; `+ - *` push a boxed long, or a boxed double on overflow
    LongBin(LongOp),
    /// `double double -> double`
    DoubleBin(DoubleOp),
    /// `long long -> bool`
    LongCmp(Compare),
    DoubleCmp(Compare),
    /// `long -> value`; negating `i64::MIN` gives a double
    LongNeg,
    DoubleNeg,
    LongBitNot,
    BoolNot,
    BoolXor,
    /// `value value -> value`
    ValueBin(BinaryOp),
    ValueUnary(UnaryOp),
    Cast(CastKind),
    /// `string * n -> string`
    Concat(usize),
    /// `x -> bool`
    IsSet,

    Jump(Label),
    /// Pops the condition
    JumpIfFalse(Label),
    JumpIfTrue(Label),

    /// `-> array`
    NewArray,
    /// `array [key] item -> array`; `item` is a cell when `by_ref`
    ArrayItem { keyed: bool, by_ref: bool, line: u32 },
    /// `base index -> value`
    IndexGet { quiet: bool, line: u32 },
    /// `base -> value`
    FieldGet { name: String, quiet: bool, line: u32 },
    /// `base -> null`
    AppendRead { line: u32 },
    /// `source key -> element`
    ListGet { line: u32 },
    /// `value -> cell`
    MakeCell,

    /// `root keys.. value -> value`
    PlaceAssign { path: PlacePath, line: u32 },
    /// `root keys.. -> cell`
    PlaceRef { path: PlacePath, line: u32 },
    /// `root keys.. cell -> value`
    PlaceBind { path: PlacePath, line: u32 },
    /// `root keys.. [operand] -> result`
    PlaceUpdate { path: PlacePath, op: UpdateOp, line: u32 },
    /// `root keys.. ->`
    PlaceUnset { path: PlacePath, line: u32 },

    /// `args.. -> result`; each argument is a value or a cell
    Call { name: String, argc: usize, line: u32 },
    CallDirect { target: Direct, argc: usize, line: u32 },
    /// `receiver args.. -> result`
    CallMethod { name: String, argc: usize, line: u32 },

    /// `string ->`
    Echo,
    /// `value ->`
    Return,

    /// `subject ->`; `subject` is a cell when `by_ref`
    IterInit { by_ref: bool, line: u32 },
    /// `-> item [key]`, or a jump to `end` when exhausted
    IterNext { end: Label, key: bool },
    IterFree,

    OpenScope(ScopeKind),
    CloseScope,
}

fn mode_suffix(mode: ReadMode) -> &'static str {
    match mode {
        ReadMode::Plain => "",
        ReadMode::Checked => ".checked",
        ReadMode::Quiet => ".quiet",
    }
}

fn update_name(op: UpdateOp) -> String {
    match op {
        UpdateOp::Binary(op) => format!("{}=", op.symbol()),
        UpdateOp::Increment { prefix: true } => "++pre".to_string(),
        UpdateOp::Increment { prefix: false } => "++post".to_string(),
        UpdateOp::Decrement { prefix: true } => "--pre".to_string(),
        UpdateOp::Decrement { prefix: false } => "--post".to_string(),
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::PushNull => f.write_str("push null"),
            Op::PushBool(b) => write!(f, "push {}", b),
            Op::PushLong(n) => write!(f, "push {}", n),
            Op::PushDouble(d) => write!(f, "push {}", format_double(*d)),
            Op::PushStr(s) => write!(f, "push {:?}", s.to_str_lossy()),
            Op::Pop => f.write_str("pop"),
            Op::Dup => f.write_str("dup"),
            Op::Swap => f.write_str("swap"),
            Op::Convert(repr) => write!(f, "convert {}", repr),
            Op::Load { var, mode, .. } => write!(f, "load{} {}", mode_suffix(*mode), var),
            Op::Store(var) => write!(f, "store {}", var),
            Op::PushRef(var) => write!(f, "ref {}", var),
            Op::Bind(var) => write!(f, "bind {}", var),
            Op::Unset(var) => write!(f, "unset {}", var),
            Op::Define(var) => write!(f, "define {}", var),
            Op::StepVar { var, op } => write!(f, "step {} {}", update_name(*op), var),
            Op::BindGlobal(name) => write!(f, "global ${}", name),
            Op::LoadThis { .. } => f.write_str("load $this"),
            Op::LongBin(op) => write!(f, "long.{:?}", op),
            Op::DoubleBin(op) => write!(f, "double.{:?}", op),
            Op::LongCmp(c) => write!(f, "long.cmp.{:?}", c),
            Op::DoubleCmp(c) => write!(f, "double.cmp.{:?}", c),
            Op::LongNeg => f.write_str("long.neg"),
            Op::DoubleNeg => f.write_str("double.neg"),
            Op::LongBitNot => f.write_str("long.bitnot"),
            Op::BoolNot => f.write_str("bool.not"),
            Op::BoolXor => f.write_str("bool.xor"),
            Op::ValueBin(op) => write!(f, "value {}", op.symbol()),
            Op::ValueUnary(op) => write!(f, "value.unary {:?}", op),
            Op::Cast(kind) => write!(f, "cast {:?}", kind),
            Op::Concat(n) => write!(f, "concat {}", n),
            Op::IsSet => f.write_str("isset"),
            Op::Jump(label) => write!(f, "jump {}", label),
            Op::JumpIfFalse(label) => write!(f, "jump.false {}", label),
            Op::JumpIfTrue(label) => write!(f, "jump.true {}", label),
            Op::NewArray => f.write_str("array.new"),
            Op::ArrayItem { keyed, by_ref, .. } => write!(
                f,
                "array.{}{}",
                if *keyed { "insert" } else { "push" },
                if *by_ref { ".ref" } else { "" }
            ),
            Op::IndexGet { quiet, .. } => {
                write!(f, "index{}", if *quiet { ".quiet" } else { "" })
            }
            Op::FieldGet { name, quiet, .. } => {
                write!(f, "field{} {}", if *quiet { ".quiet" } else { "" }, name)
            }
            Op::AppendRead { .. } => f.write_str("append.read"),
            Op::ListGet { .. } => f.write_str("list.get"),
            Op::MakeCell => f.write_str("cell.new"),
            Op::PlaceAssign { path, .. } => write!(f, "place.assign {}", path),
            Op::PlaceRef { path, .. } => write!(f, "place.ref {}", path),
            Op::PlaceBind { path, .. } => write!(f, "place.bind {}", path),
            Op::PlaceUpdate { path, op, .. } => {
                write!(f, "place.update {} {}", update_name(*op), path)
            }
            Op::PlaceUnset { path, .. } => write!(f, "place.unset {}", path),
            Op::Call { name, argc, .. } => write!(f, "call {}/{}", name, argc),
            Op::CallDirect { target, argc, .. } => {
                write!(f, "call.direct {}/{}", target.name, argc)
            }
            Op::CallMethod { name, argc, .. } => write!(f, "call.method {}/{}", name, argc),
            Op::Echo => f.write_str("echo"),
            Op::Return => f.write_str("return"),
            Op::IterInit { by_ref, .. } => {
                write!(f, "iter.init{}", if *by_ref { ".ref" } else { "" })
            }
            Op::IterNext { end, key } => {
                write!(f, "iter.next{} {}", if *key { ".key" } else { "" }, end)
            }
            Op::IterFree => f.write_str("iter.free"),
            Op::OpenScope(kind) => write!(f, "scope.open {}", kind),
            Op::CloseScope => f.write_str("scope.close"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_maps_to_equality() {
        assert_eq!(Compare::of(BinaryOp::Identical), Some(Compare::Eq));
        assert_eq!(Compare::of(BinaryOp::NotIdentical), Some(Compare::NotEq));
        assert_eq!(Compare::of(BinaryOp::Spaceship), None);
    }

    #[test]
    fn test_compare_with_unordered_operands() {
        assert!(!Compare::Lt.holds(None));
        assert!(!Compare::Eq.holds(None));
        assert!(Compare::NotEq.holds(None));
        assert!(Compare::Ge.holds(Some(Ordering::Equal)));
    }

    #[test]
    fn test_path_display_and_keys() {
        let path = PlacePath {
            root: PlaceRoot::Var(VarRef::Name("a".to_string())),
            steps: vec![
                PlaceStep::Index { line: 1 },
                PlaceStep::Field("p".to_string()),
                PlaceStep::Append,
            ],
        };
        assert_eq!(path.to_string(), "$a[_]->p[]");
        assert_eq!(path.keys(), 1);
    }

    #[test]
    fn test_load_listing() {
        let op = Op::Load {
            var: VarRef::Local {
                slot: 0,
                name: "x".to_string(),
            },
            mode: ReadMode::Checked,
            line: 3,
        };
        assert_eq!(op.to_string(), "load.checked $x#0");
    }
}
