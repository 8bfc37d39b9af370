//! Expression and statement nodes
//!
//! The node tree is a closed set of variants. Every expression carries a
//! [`NodeId`] that analysis results are keyed by, and a source line used for
//! runtime diagnostics. Trees are usually built with
//! [`ExprFactory`](crate::factory::ExprFactory) or deserialized from JSON and
//! then numbered with [`Program::assign_ids`].

use serde::{Deserialize, Serialize};

/// Identifier of an expression node, unique within a program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ExprRepr", into = "ExprRepr")]
pub struct Expr {
    pub id: NodeId,
    /// Source line (0 when unknown)
    pub line: u32,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            id: NodeId::default(),
            line: 0,
            kind,
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    /// Direct sub-expressions, in evaluation order
    pub fn children(&self) -> Vec<&Expr> {
        use ExprKind::*;
        match &self.kind {
            Literal(_) | Var(_) | This => Vec::new(),
            VarVar(name) => vec![&**name],
            Binary { left, right, .. } => vec![&**left, &**right],
            Unary { expr, .. } => vec![&**expr],
            Concat(chain) => chain.parts().iter().collect(),
            ArrayLiteral(items) => items
                .iter()
                .flat_map(|item| item.key.iter().chain(std::iter::once(&item.value)))
                .collect(),
            ArrayGet { base, index } => vec![&**base, &**index],
            ArrayTail { base } => vec![&**base],
            FieldGet { base, .. } => vec![&**base],
            MethodCall { receiver, args, .. } => {
                std::iter::once(&**receiver).chain(args.iter()).collect()
            }
            Call { args, .. } => args.iter().collect(),
            Assign { target, value }
            | AssignRef { target, value }
            | AssignOp { target, value, .. } => vec![&**target, &**value],
            Conditional {
                test,
                then,
                otherwise,
            } => std::iter::once(&**test)
                .chain(then.iter().map(|e| &**e))
                .chain(std::iter::once(&**otherwise))
                .collect(),
            List { head, value } => std::iter::once(&**value)
                .chain(head.items.iter().flatten().flat_map(|item| {
                    item.key.iter().chain(std::iter::once(&item.target))
                }))
                .collect(),
            IncDec { target, .. } => vec![&**target],
            Suppress(expr) | Cast { expr, .. } | Empty(expr) => vec![&**expr],
            Isset(exprs) => exprs.iter().collect(),
        }
    }

    /// Mutable access to direct sub-expressions
    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        use ExprKind::*;
        match &mut self.kind {
            Literal(_) | Var(_) | This => Vec::new(),
            VarVar(name) => vec![&mut **name],
            Binary { left, right, .. } => vec![&mut **left, &mut **right],
            Unary { expr, .. } => vec![&mut **expr],
            Concat(chain) => chain.parts_mut().iter_mut().collect(),
            ArrayLiteral(items) => items
                .iter_mut()
                .flat_map(|item| item.key.iter_mut().chain(std::iter::once(&mut item.value)))
                .collect(),
            ArrayGet { base, index } => vec![&mut **base, &mut **index],
            ArrayTail { base } => vec![&mut **base],
            FieldGet { base, .. } => vec![&mut **base],
            MethodCall { receiver, args, .. } => std::iter::once(&mut **receiver)
                .chain(args.iter_mut())
                .collect(),
            Call { args, .. } => args.iter_mut().collect(),
            Assign { target, value }
            | AssignRef { target, value }
            | AssignOp { target, value, .. } => vec![&mut **target, &mut **value],
            Conditional {
                test,
                then,
                otherwise,
            } => std::iter::once(&mut **test)
                .chain(then.iter_mut().map(|e| &mut **e))
                .chain(std::iter::once(&mut **otherwise))
                .collect(),
            List { head, value } => std::iter::once(&mut **value)
                .chain(head.items.iter_mut().flatten().flat_map(|item| {
                    item.key.iter_mut().chain(std::iter::once(&mut item.target))
                }))
                .collect(),
            IncDec { target, .. } => vec![&mut **target],
            Suppress(expr) | Cast { expr, .. } | Empty(expr) => vec![&mut **expr],
            Isset(exprs) => exprs.iter_mut().collect(),
        }
    }

    /// Whether the node denotes a storage location
    pub fn is_assignable(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Var(_)
                | ExprKind::VarVar(_)
                | ExprKind::ArrayGet { .. }
                | ExprKind::ArrayTail { .. }
                | ExprKind::FieldGet { .. }
        )
    }

    /// Name of a plain variable node
    pub fn var_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Var(name) => Some(name),
            _ => None,
        }
    }
}

/// Serialized shape of [`Expr`]: either a bare kind or a kind with a line
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ExprRepr {
    Located {
        #[serde(default)]
        line: u32,
        kind: ExprKind,
    },
    Bare(ExprKind),
}

impl From<ExprRepr> for Expr {
    fn from(repr: ExprRepr) -> Self {
        match repr {
            ExprRepr::Located { line, kind } => Expr::new(kind).with_line(line),
            ExprRepr::Bare(kind) => Expr::new(kind),
        }
    }
}

impl From<Expr> for ExprRepr {
    fn from(expr: Expr) -> Self {
        if expr.line == 0 {
            ExprRepr::Bare(expr.kind)
        } else {
            ExprRepr::Located {
                line: expr.line,
                kind: expr.kind,
            }
        }
    }
}

/// Expression variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Literal(Literal),
    /// `$name`
    Var(String),
    /// `$$expr`
    VarVar(Box<Expr>),
    /// `$this`
    This,
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    /// `a . b . c`
    Concat(AppendChain),
    /// `[k => v, &$r]`
    ArrayLiteral(Vec<ArrayItem>),
    /// `$a[i]`
    ArrayGet {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    /// `$a[]`
    ArrayTail {
        base: Box<Expr>,
    },
    /// `$o->name`
    FieldGet {
        base: Box<Expr>,
        name: String,
    },
    MethodCall {
        receiver: Box<Expr>,
        name: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    Call {
        name: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    /// `target = value`
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    /// `target = &value`
    AssignRef {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    /// `target op= value`
    AssignOp {
        op: BinaryOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    /// `test ? then : otherwise`, or `test ?: otherwise` when `then` is absent
    Conditional {
        test: Box<Expr>,
        #[serde(default)]
        then: Option<Box<Expr>>,
        otherwise: Box<Expr>,
    },
    /// `list(...) = value`
    List {
        head: ListHead,
        value: Box<Expr>,
    },
    /// `++$x`, `$x--`, ...
    IncDec {
        target: Box<Expr>,
        increment: bool,
        prefix: bool,
    },
    /// `@expr`
    Suppress(Box<Expr>),
    Cast {
        kind: CastKind,
        expr: Box<Expr>,
    },
    Isset(Vec<Expr>),
    Empty(Box<Expr>),
}

impl ExprKind {
    /// Short name used in diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            ExprKind::Literal(_) => "literal",
            ExprKind::Var(_) => "variable",
            ExprKind::VarVar(_) => "variable-variable",
            ExprKind::This => "$this",
            ExprKind::Binary { .. } => "binary operation",
            ExprKind::Unary { .. } => "unary operation",
            ExprKind::Concat(_) => "concatenation",
            ExprKind::ArrayLiteral(_) => "array literal",
            ExprKind::ArrayGet { .. } => "array element",
            ExprKind::ArrayTail { .. } => "array append",
            ExprKind::FieldGet { .. } => "property",
            ExprKind::MethodCall { .. } => "method call",
            ExprKind::Call { .. } => "function call",
            ExprKind::Assign { .. } => "assignment",
            ExprKind::AssignRef { .. } => "reference assignment",
            ExprKind::AssignOp { .. } => "compound assignment",
            ExprKind::Conditional { .. } => "conditional",
            ExprKind::List { .. } => "list",
            ExprKind::IncDec { .. } => "increment/decrement",
            ExprKind::Suppress(_) => "suppression",
            ExprKind::Cast { .. } => "cast",
            ExprKind::Isset(_) => "isset",
            ExprKind::Empty(_) => "empty",
        }
    }
}

/// Literal constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    /// Text string
    String(String),
    /// Byte string
    Binary(Vec<u8>),
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    NotEq,
    Identical,
    NotIdentical,
    Lt,
    Le,
    Gt,
    Ge,
    Spaceship,
    And,
    Or,
    Xor,
    Coalesce,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Concat => ".",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Identical => "===",
            BinaryOp::NotIdentical => "!==",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Spaceship => "<=>",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Xor => "xor",
            BinaryOp::Coalesce => "??",
        }
    }

    /// Operators producing a boolean from a comparison
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Identical
                | BinaryOp::NotIdentical
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
        )
    }

    /// `&&`, `||` and `xor`
    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or | BinaryOp::Xor)
    }

    /// Operators whose right operand is evaluated conditionally
    pub fn short_circuits(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or | BinaryOp::Coalesce)
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
}

/// Cast targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CastKind {
    Long,
    Double,
    Bool,
    String,
    Binary,
    Array,
    Object,
    Unset,
}

/// One element of an array literal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayItem {
    #[serde(default)]
    pub key: Option<Expr>,
    pub value: Expr,
    #[serde(default)]
    pub by_ref: bool,
}

/// Targets of a `list(...)` destructuring; `None` skips a position
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListHead {
    pub items: Vec<Option<ListItem>>,
}

/// A destructuring target with an optional explicit key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListItem {
    #[serde(default)]
    pub key: Option<Expr>,
    pub target: Expr,
}

/// Operands of a `.` chain, flattened, with adjacent literals folded
///
/// Text and byte string literals are never merged with each other.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Expr>", into = "Vec<Expr>")]
pub struct AppendChain {
    parts: Vec<Expr>,
}

impl AppendChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operand, flattening nested chains and folding literals
    pub fn push(&mut self, expr: Expr) {
        if let ExprKind::Concat(inner) = expr.kind {
            for part in inner.parts {
                self.push(part);
            }
            return;
        }

        if let Some(last) = self.parts.last_mut() {
            match (&mut last.kind, &expr.kind) {
                (
                    ExprKind::Literal(Literal::String(head)),
                    ExprKind::Literal(Literal::String(tail)),
                ) => {
                    head.push_str(tail);
                    return;
                }
                (
                    ExprKind::Literal(Literal::Binary(head)),
                    ExprKind::Literal(Literal::Binary(tail)),
                ) => {
                    head.extend_from_slice(tail);
                    return;
                }
                _ => {}
            }
        }

        self.parts.push(expr);
    }

    pub fn with(mut self, expr: Expr) -> Self {
        self.push(expr);
        self
    }

    pub fn parts(&self) -> &[Expr] {
        &self.parts
    }

    pub fn parts_mut(&mut self) -> &mut [Expr] {
        &mut self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl From<Vec<Expr>> for AppendChain {
    fn from(parts: Vec<Expr>) -> Self {
        let mut chain = AppendChain::new();
        for part in parts {
            chain.push(part);
        }
        chain
    }
}

impl From<AppendChain> for Vec<Expr> {
    fn from(chain: AppendChain) -> Self {
        chain.parts
    }
}

fn one() -> u32 {
    1
}

/// Statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Expr(Expr),
    Echo(Vec<Expr>),
    Block(Vec<Stmt>),
    If {
        test: Expr,
        then: Vec<Stmt>,
        #[serde(default)]
        otherwise: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
    },
    DoWhile {
        body: Vec<Stmt>,
        test: Expr,
    },
    /// `for (init; test; step)`; the last test expression is the condition
    For {
        #[serde(default)]
        init: Vec<Expr>,
        #[serde(default)]
        test: Vec<Expr>,
        #[serde(default)]
        step: Vec<Expr>,
        body: Vec<Stmt>,
    },
    Foreach {
        subject: Expr,
        #[serde(default)]
        key: Option<Expr>,
        value: Expr,
        #[serde(default)]
        by_ref: bool,
        body: Vec<Stmt>,
    },
    Break {
        #[serde(default = "one")]
        depth: u32,
    },
    Continue {
        #[serde(default = "one")]
        depth: u32,
    },
    Return(Option<Expr>),
    Unset(Vec<Expr>),
    Global(Vec<String>),
}

impl Stmt {
    /// Expressions owned directly by this statement, in evaluation order
    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            Stmt::Expr(e) => vec![e],
            Stmt::Echo(es) | Stmt::Unset(es) => es.iter().collect(),
            Stmt::If { test, .. } | Stmt::While { test, .. } | Stmt::DoWhile { test, .. } => {
                vec![test]
            }
            Stmt::For {
                init, test, step, ..
            } => init.iter().chain(test).chain(step).collect(),
            Stmt::Foreach {
                subject, key, value, ..
            } => std::iter::once(subject)
                .chain(key.iter())
                .chain(std::iter::once(value))
                .collect(),
            Stmt::Return(e) => e.iter().collect(),
            Stmt::Block(_) | Stmt::Break { .. } | Stmt::Continue { .. } | Stmt::Global(_) => {
                Vec::new()
            }
        }
    }

    fn exprs_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Stmt::Expr(e) => vec![e],
            Stmt::Echo(es) | Stmt::Unset(es) => es.iter_mut().collect(),
            Stmt::If { test, .. } | Stmt::While { test, .. } | Stmt::DoWhile { test, .. } => {
                vec![test]
            }
            Stmt::For {
                init, test, step, ..
            } => init
                .iter_mut()
                .chain(test.iter_mut())
                .chain(step.iter_mut())
                .collect(),
            Stmt::Foreach {
                subject, key, value, ..
            } => std::iter::once(subject)
                .chain(key.iter_mut())
                .chain(std::iter::once(value))
                .collect(),
            Stmt::Return(e) => e.iter_mut().collect(),
            Stmt::Block(_) | Stmt::Break { .. } | Stmt::Continue { .. } | Stmt::Global(_) => {
                Vec::new()
            }
        }
    }

    /// Nested statement lists
    pub fn bodies(&self) -> Vec<&[Stmt]> {
        match self {
            Stmt::Block(body)
            | Stmt::While { body, .. }
            | Stmt::DoWhile { body, .. }
            | Stmt::For { body, .. }
            | Stmt::Foreach { body, .. } => vec![body.as_slice()],
            Stmt::If {
                then, otherwise, ..
            } => vec![then.as_slice(), otherwise.as_slice()],
            _ => Vec::new(),
        }
    }

    fn bodies_mut(&mut self) -> Vec<&mut Vec<Stmt>> {
        match self {
            Stmt::Block(body)
            | Stmt::While { body, .. }
            | Stmt::DoWhile { body, .. }
            | Stmt::For { body, .. }
            | Stmt::Foreach { body, .. } => vec![body],
            Stmt::If {
                then, otherwise, ..
            } => vec![then, otherwise],
            _ => Vec::new(),
        }
    }
}

/// A function parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(default)]
    pub by_ref: bool,
    #[serde(default)]
    pub default: Option<Literal>,
}

impl Param {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            by_ref: false,
            default: None,
        }
    }

    pub fn by_ref(mut self) -> Self {
        self.by_ref = true;
        self
    }

    pub fn with_default(mut self, default: Literal) -> Self {
        self.default = Some(default);
        self
    }
}

/// A user function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub body: Vec<Stmt>,
}

impl FunctionDef {
    pub fn new(name: impl Into<String>, params: Vec<Param>, body: Vec<Stmt>) -> Self {
        Self {
            name: name.into(),
            params,
            body,
        }
    }
}

/// Name of the pseudo-function holding a program's top-level statements
pub const MAIN_FUNCTION: &str = "{main}";

/// A whole program: functions plus top-level statements
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub functions: Vec<FunctionDef>,
    #[serde(default)]
    pub main: Vec<Stmt>,
}

impl Program {
    pub fn new(functions: Vec<FunctionDef>, main: Vec<Stmt>) -> Self {
        Self { functions, main }
    }

    /// Parse a program from its JSON form and number its nodes
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        let mut program: Program = serde_json::from_str(source)?;
        program.assign_ids();
        Ok(program)
    }

    /// Function lookup; PHP function names are case-insensitive
    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Number every expression node, starting at 1
    ///
    /// `.` written as a binary operation is first turned into its chain
    /// form, so every concatenation is flattened and folded the same way.
    pub fn assign_ids(&mut self) -> u32 {
        let mut next = 1;
        for function in &mut self.functions {
            number_stmts(&mut function.body, &mut next);
        }
        number_stmts(&mut self.main, &mut next);
        next
    }
}

fn number_stmts(stmts: &mut [Stmt], next: &mut u32) {
    for stmt in stmts {
        for expr in stmt.exprs_mut() {
            chain_concat(expr);
            number_expr(expr, next);
        }
        for body in stmt.bodies_mut() {
            number_stmts(body, next);
        }
    }
}

/// Rewrite `Binary(Concat)` nodes into chains, innermost first
fn chain_concat(expr: &mut Expr) {
    for child in expr.children_mut() {
        chain_concat(child);
    }
    let kind = std::mem::replace(&mut expr.kind, ExprKind::Literal(Literal::Null));
    expr.kind = match kind {
        ExprKind::Binary {
            op: BinaryOp::Concat,
            left,
            right,
        } => ExprKind::Concat(AppendChain::new().with(*left).with(*right)),
        // parts may have become chains themselves
        ExprKind::Concat(chain) => ExprKind::Concat(AppendChain::from(Vec::from(chain))),
        other => other,
    };
}

fn number_expr(expr: &mut Expr, next: &mut u32) {
    expr.id = NodeId(*next);
    *next += 1;
    for child in expr.children_mut() {
        number_expr(child, next);
    }
}
