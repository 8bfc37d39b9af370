//! Generation of target operations from analyzed functions
//!
//! Every node is generated from its analysis facts: variables are addressed
//! through the storage class their binding was given, and arithmetic or
//! comparisons whose operands carry a primitive facet are emitted as typed
//! operations. Evaluation order matches the interpreter's node for node.

use std::collections::HashSet;
use std::sync::Arc;

use phpeval_analyze::{
    argument_modes, CalleeOracle, FunctionBody, FunctionInfo, NodeFacts, NodePhase, StorageClass,
    TypeFacet,
};
use phpeval_core::ast::{BinaryOp, CastKind, Expr, ExprKind, Literal, NodeId, Stmt, UnaryOp};
use phpeval_core::value::PhpString;
use phpeval_core::InternalError;

use super::backend::{Backend, FrameLayout, ParamBinding, SlotInfo, SlotKind};
use super::ops::{
    Compare, Direct, DoubleOp, Label, LongOp, Op, PlacePath, PlaceRoot, PlaceStep, ReadMode, Repr,
    ScopeKind, VarRef,
};
use crate::place::UpdateOp;

/// Binds call sites to callees at translation time
pub trait CallResolver {
    /// The callee a call from `caller` to `callee` may be bound to directly
    fn resolve(&mut self, caller: &str, callee: &str) -> Result<Option<Direct>, InternalError>;
}

/// Leaves every call on the named lookup path
#[derive(Debug, Default, Clone, Copy)]
pub struct NamedCalls;

impl CallResolver for NamedCalls {
    fn resolve(&mut self, _caller: &str, _callee: &str) -> Result<Option<Direct>, InternalError> {
        Ok(None)
    }
}

/// Outcome of translating one function
#[derive(Debug)]
pub struct Translation {
    pub frame: FrameLayout,
    info: Arc<FunctionInfo>,
    generated: HashSet<NodeId>,
}

impl Translation {
    pub fn phase(&self, id: NodeId) -> NodePhase {
        if self.generated.contains(&id) {
            NodePhase::Generated
        } else {
            self.info.phase(id)
        }
    }

    pub fn generated_nodes(&self) -> usize {
        self.generated.len()
    }
}

/// Translate one function body into `backend`
pub fn translate(
    function: FunctionBody<'_>,
    info: &Arc<FunctionInfo>,
    oracle: &dyn CalleeOracle,
    resolver: &mut dyn CallResolver,
    backend: &mut dyn Backend,
) -> Result<Translation, InternalError> {
    let mut translator = Translator::new(function.name, info, oracle, resolver, backend);
    translator.block(function.body)?;
    translator.out.emit(Op::PushNull);
    translator.out.emit(Op::Return);

    let params = function
        .params
        .iter()
        .zip(&info.params)
        .map(|(param, id)| ParamBinding {
            name: param.name.clone(),
            var: translator.var_of(id.index(), &param.name),
            by_ref: param.by_ref,
            default: param.default.clone(),
        })
        .collect();
    let required = function
        .params
        .iter()
        .rposition(|p| p.default.is_none())
        .map_or(0, |i| i + 1);

    Ok(Translation {
        frame: FrameLayout {
            slots: translator.slots,
            params,
            required,
        },
        info: Arc::clone(info),
        generated: translator.generated,
    })
}

struct LoopLabels {
    brk: Label,
    cont: Label,
    iterates: bool,
}

/// Where an assigned value comes from
enum Source<'e> {
    Expr(&'e Expr),
    /// A hidden slot already holding the value
    Temp(VarRef),
}

fn repr_of_facet(facet: TypeFacet) -> Repr {
    match facet {
        TypeFacet::Long => Repr::Long,
        TypeFacet::Double => Repr::Double,
        TypeFacet::Boolean => Repr::Bool,
        TypeFacet::String => Repr::Str,
        TypeFacet::Value => Repr::Value,
    }
}

fn slot_kind(storage: StorageClass) -> Option<SlotKind> {
    match storage {
        StorageClass::PrimitiveLong => Some(SlotKind::Long),
        StorageClass::PrimitiveDouble => Some(SlotKind::Double),
        StorageClass::PrimitiveBoolean => Some(SlotKind::Bool),
        StorageClass::PrimitiveString => Some(SlotKind::Str),
        StorageClass::BoxedValue => Some(SlotKind::Value),
        StorageClass::AliasCell => Some(SlotKind::Cell),
        StorageClass::DynamicLookup => None,
    }
}

/// Operand representation for a typed emission of `op`, when one applies
fn typed_operands(op: BinaryOp, left: TypeFacet, right: TypeFacet, result: TypeFacet) -> Option<Repr> {
    let both = |facet| left == facet && right == facet;
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
            if both(TypeFacet::Long) {
                Some(Repr::Long)
            } else if result == TypeFacet::Double {
                Some(Repr::Double)
            } else {
                None
            }
        }
        BinaryOp::Mod
        | BinaryOp::BitAnd
        | BinaryOp::BitOr
        | BinaryOp::BitXor
        | BinaryOp::Shl
        | BinaryOp::Shr => both(TypeFacet::Long).then_some(Repr::Long),
        _ if Compare::of(op).is_some() => {
            if both(TypeFacet::Long) {
                Some(Repr::Long)
            } else if both(TypeFacet::Double) {
                Some(Repr::Double)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// The typed op for `op` on operands of `repr`, and its result representation
fn typed_op(op: BinaryOp, repr: Repr) -> Option<(Op, Repr)> {
    if let Some(compare) = Compare::of(op) {
        return match repr {
            Repr::Long => Some((Op::LongCmp(compare), Repr::Bool)),
            Repr::Double => Some((Op::DoubleCmp(compare), Repr::Bool)),
            _ => None,
        };
    }
    match repr {
        Repr::Long => LongOp::of(op).map(|op| {
            let result = if op.may_overflow() { Repr::Value } else { Repr::Long };
            (Op::LongBin(op), result)
        }),
        Repr::Double => DoubleOp::of(op).map(|op| (Op::DoubleBin(op), Repr::Double)),
        _ => None,
    }
}

struct Translator<'a> {
    name: &'a str,
    info: &'a FunctionInfo,
    oracle: &'a dyn CalleeOracle,
    resolver: &'a mut dyn CallResolver,
    out: &'a mut dyn Backend,
    /// Addressing of every binding, by `VarId` index
    vars: Vec<VarRef>,
    slots: Vec<SlotInfo>,
    loops: Vec<LoopLabels>,
    generated: HashSet<NodeId>,
}

impl<'a> Translator<'a> {
    fn new(
        name: &'a str,
        info: &'a FunctionInfo,
        oracle: &'a dyn CalleeOracle,
        resolver: &'a mut dyn CallResolver,
        out: &'a mut dyn Backend,
    ) -> Self {
        let mut slots = Vec::new();
        let vars = info
            .bindings
            .iter()
            .map(|binding| match slot_kind(binding.storage) {
                Some(kind) => {
                    let slot = slots.len();
                    slots.push(SlotInfo {
                        name: binding.name.clone(),
                        kind,
                    });
                    let name = binding.name.clone();
                    if kind == SlotKind::Cell {
                        VarRef::Cell { slot, name }
                    } else {
                        VarRef::Local { slot, name }
                    }
                }
                None => VarRef::Name(binding.name.clone()),
            })
            .collect();
        Self {
            name,
            info,
            oracle,
            resolver,
            out,
            vars,
            slots,
            loops: Vec::new(),
            generated: HashSet::new(),
        }
    }

    /// Facts of `e`, which is now generated
    fn visit(&mut self, e: &Expr) -> Result<NodeFacts, InternalError> {
        let facts = self.info.facts(e.id)?;
        self.generated.insert(e.id);
        Ok(facts)
    }

    fn var_of(&self, index: usize, name: &str) -> VarRef {
        self.vars
            .get(index)
            .cloned()
            .unwrap_or_else(|| VarRef::Name(name.to_string()))
    }

    fn var(&mut self, e: &Expr, name: &str) -> Result<(VarRef, NodeFacts), InternalError> {
        let facts = self.visit(e)?;
        let var = match facts.var.or_else(|| self.info.bindings.find(name)) {
            Some(id) => self.var_of(id.index(), name),
            None => VarRef::Name(name.to_string()),
        };
        Ok((var, facts))
    }

    fn slot_kind_of(&self, var: &VarRef) -> Option<SlotKind> {
        match var {
            VarRef::Local { slot, .. } | VarRef::Cell { slot, .. } => {
                self.slots.get(*slot).map(|s| s.kind)
            }
            VarRef::Name(_) | VarRef::Dynamic => None,
        }
    }

    fn repr_of(&self, var: &VarRef) -> Repr {
        match self.slot_kind_of(var) {
            Some(SlotKind::Long) => Repr::Long,
            Some(SlotKind::Double) => Repr::Double,
            Some(SlotKind::Bool) => Repr::Bool,
            Some(SlotKind::Str) => Repr::Str,
            _ => Repr::Value,
        }
    }

    fn storage_name(&self, var: &VarRef) -> String {
        match self.slot_kind_of(var) {
            Some(kind) => format!("{:?}", kind).to_lowercase(),
            None => "dynamic".to_string(),
        }
    }

    /// A variable that can be bound to an alias cell
    fn referenceable(&self, var: VarRef, name: &str) -> Result<VarRef, InternalError> {
        match var {
            VarRef::Local { .. } => Err(InternalError::NotReferenceable {
                name: name.to_string(),
                storage: self.storage_name(&var),
            }),
            var => Ok(var),
        }
    }

    fn temp(&mut self, kind: SlotKind) -> VarRef {
        let slot = self.slots.len();
        let name = format!("#{}", slot);
        self.slots.push(SlotInfo {
            name: name.clone(),
            kind,
        });
        if kind == SlotKind::Cell {
            VarRef::Cell { slot, name }
        } else {
            VarRef::Local { slot, name }
        }
    }

    fn emit(&mut self, op: Op) {
        self.out.emit(op);
    }

    fn convert(&mut self, from: Repr, to: Repr) {
        if from != to {
            self.emit(Op::Convert(to));
        }
    }

    // ==================== Statements ====================

    fn block(&mut self, stmts: &[Stmt]) -> Result<(), InternalError> {
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), InternalError> {
        match stmt {
            Stmt::Expr(e) => {
                self.expr(e)?;
                self.emit(Op::Pop);
            }
            Stmt::Echo(exprs) => {
                for e in exprs {
                    self.value(e, Repr::Str)?;
                    self.emit(Op::Echo);
                }
            }
            Stmt::Block(stmts) => self.block(stmts)?,
            Stmt::If {
                test,
                then,
                otherwise,
            } => {
                let other = self.out.new_label();
                let end = self.out.new_label();
                self.value(test, Repr::Bool)?;
                self.emit(Op::JumpIfFalse(other));
                self.block(then)?;
                self.emit(Op::Jump(end));
                self.out.place_label(other);
                self.block(otherwise)?;
                self.out.place_label(end);
            }
            Stmt::While { test, body } => {
                let cont = self.out.new_label();
                let brk = self.out.new_label();
                self.out.open_scope(ScopeKind::Loop);
                self.out.place_label(cont);
                self.value(test, Repr::Bool)?;
                self.emit(Op::JumpIfFalse(brk));
                self.loop_body(body, brk, cont, false)?;
                self.emit(Op::Jump(cont));
                self.out.close_scope()?;
                self.out.place_label(brk);
            }
            Stmt::DoWhile { body, test } => {
                let top = self.out.new_label();
                let cont = self.out.new_label();
                let brk = self.out.new_label();
                self.out.open_scope(ScopeKind::Loop);
                self.out.place_label(top);
                self.loop_body(body, brk, cont, false)?;
                self.out.place_label(cont);
                self.value(test, Repr::Bool)?;
                self.emit(Op::JumpIfTrue(top));
                self.out.close_scope()?;
                self.out.place_label(brk);
            }
            Stmt::For {
                init,
                test,
                step,
                body,
            } => {
                for e in init {
                    self.expr(e)?;
                    self.emit(Op::Pop);
                }
                let top = self.out.new_label();
                let cont = self.out.new_label();
                let brk = self.out.new_label();
                self.out.open_scope(ScopeKind::Loop);
                self.out.place_label(top);
                if let Some((last, rest)) = test.split_last() {
                    for e in rest {
                        self.expr(e)?;
                        self.emit(Op::Pop);
                    }
                    self.value(last, Repr::Bool)?;
                    self.emit(Op::JumpIfFalse(brk));
                }
                self.loop_body(body, brk, cont, false)?;
                self.out.place_label(cont);
                for e in step {
                    self.expr(e)?;
                    self.emit(Op::Pop);
                }
                self.emit(Op::Jump(top));
                self.out.close_scope()?;
                self.out.place_label(brk);
            }
            Stmt::Foreach {
                subject,
                key,
                value,
                by_ref,
                body,
            } => self.foreach(subject, key.as_ref(), value, *by_ref, body)?,
            Stmt::Break { depth } => self.jump(*depth, true),
            Stmt::Continue { depth } => self.jump(*depth, false),
            Stmt::Return(value) => {
                match value {
                    Some(e) => self.value(e, Repr::Value)?,
                    None => self.emit(Op::PushNull),
                }
                self.emit(Op::Return);
            }
            Stmt::Unset(targets) => {
                for target in targets {
                    self.unset(target)?;
                }
            }
            Stmt::Global(names) => {
                for name in names {
                    self.emit(Op::BindGlobal(name.clone()));
                }
            }
        }
        Ok(())
    }

    fn loop_body(
        &mut self,
        body: &[Stmt],
        brk: Label,
        cont: Label,
        iterates: bool,
    ) -> Result<(), InternalError> {
        self.loops.push(LoopLabels {
            brk,
            cont,
            iterates,
        });
        let result = self.block(body);
        self.loops.pop();
        result
    }

    fn foreach(
        &mut self,
        subject: &Expr,
        key: Option<&Expr>,
        value: &Expr,
        by_ref: bool,
        body: &[Stmt],
    ) -> Result<(), InternalError> {
        if by_ref {
            self.reference(subject)?;
        } else {
            self.value(subject, Repr::Value)?;
        }
        self.emit(Op::IterInit {
            by_ref,
            line: subject.line,
        });

        let next = self.out.new_label();
        let done = self.out.new_label();
        self.out.open_scope(ScopeKind::Loop);
        self.out.place_label(next);
        self.emit(Op::IterNext {
            end: done,
            key: key.is_some(),
        });
        let key_temp = match key {
            Some(_) => {
                let temp = self.temp(SlotKind::Value);
                self.emit(Op::Store(temp.clone()));
                self.emit(Op::Pop);
                Some(temp)
            }
            None => None,
        };
        if by_ref {
            let cell = self.temp(SlotKind::Cell);
            self.emit(Op::Bind(cell.clone()));
            self.emit(Op::Pop);
            self.bind_to(value, cell)?;
        } else {
            let temp = self.temp(SlotKind::Value);
            self.emit(Op::Store(temp.clone()));
            self.emit(Op::Pop);
            self.assign(value, Source::Temp(temp))?;
        }
        self.emit(Op::Pop);
        if let (Some(key), Some(temp)) = (key, key_temp) {
            self.assign(key, Source::Temp(temp))?;
            self.emit(Op::Pop);
        }

        self.loop_body(body, done, next, true)?;
        self.emit(Op::Jump(next));
        self.out.close_scope()?;
        self.out.place_label(done);
        self.emit(Op::IterFree);
        Ok(())
    }

    /// `break n` / `continue n`; leaving more loops than enclose the
    /// statement ends the function with null
    fn jump(&mut self, depth: u32, is_break: bool) {
        let depth = depth.max(1) as usize;
        let Some(index) = self.loops.len().checked_sub(depth) else {
            self.emit(Op::PushNull);
            self.emit(Op::Return);
            return;
        };
        let inner = self.loops[index + 1..]
            .iter()
            .filter(|l| l.iterates)
            .count();
        for _ in 0..inner {
            self.emit(Op::IterFree);
        }
        let target = &self.loops[index];
        let label = if is_break { target.brk } else { target.cont };
        self.emit(Op::Jump(label));
    }

    fn unset(&mut self, target: &Expr) -> Result<(), InternalError> {
        match &target.kind {
            ExprKind::Var(name) => {
                let (var, _) = self.var(target, name)?;
                self.emit(Op::Unset(var));
            }
            ExprKind::VarVar(name) => {
                self.visit(target)?;
                self.value(name, Repr::Str)?;
                self.emit(Op::Unset(VarRef::Dynamic));
            }
            ExprKind::ArrayGet { .. } | ExprKind::FieldGet { .. } => {
                let path = self.place(target, false)?;
                self.emit(Op::PlaceUnset {
                    path,
                    line: target.line,
                });
            }
            other => return Err(InternalError::NotUnsettable(other.name())),
        }
        Ok(())
    }

    // ==================== Expressions ====================

    /// Emit `e` in the given representation
    fn value(&mut self, e: &Expr, want: Repr) -> Result<(), InternalError> {
        let repr = self.expr(e)?;
        self.convert(repr, want);
        Ok(())
    }

    /// Emit `e`, leaving one operand in its natural representation
    fn expr(&mut self, e: &Expr) -> Result<Repr, InternalError> {
        let facts = self.visit(e)?;
        match &e.kind {
            ExprKind::Literal(literal) => Ok(self.literal(literal)),
            ExprKind::Var(name) => {
                let (var, facts) = self.var(e, name)?;
                let mode = if facts.state.is_valid() {
                    ReadMode::Plain
                } else {
                    ReadMode::Checked
                };
                let repr = self.repr_of(&var);
                self.emit(Op::Load {
                    var,
                    mode,
                    line: e.line,
                });
                Ok(repr)
            }
            ExprKind::VarVar(name) => {
                self.value(name, Repr::Str)?;
                self.emit(Op::Load {
                    var: VarRef::Dynamic,
                    mode: ReadMode::Checked,
                    line: e.line,
                });
                Ok(Repr::Value)
            }
            ExprKind::This => {
                self.emit(Op::LoadThis { line: e.line });
                Ok(Repr::Value)
            }
            ExprKind::Binary { op, left, right } => self.binary(*op, left, right, facts.facet),
            ExprKind::Unary { op, expr } => self.unary(*op, expr),
            ExprKind::Concat(chain) => {
                for part in chain.parts() {
                    self.value(part, Repr::Str)?;
                }
                self.emit(Op::Concat(chain.len()));
                Ok(Repr::Str)
            }
            ExprKind::ArrayLiteral(items) => {
                self.emit(Op::NewArray);
                for item in items {
                    if let Some(key) = &item.key {
                        self.value(key, Repr::Value)?;
                    }
                    if item.by_ref {
                        self.reference(&item.value)?;
                    } else {
                        self.value(&item.value, Repr::Value)?;
                    }
                    self.emit(Op::ArrayItem {
                        keyed: item.key.is_some(),
                        by_ref: item.by_ref,
                        line: e.line,
                    });
                }
                Ok(Repr::Value)
            }
            ExprKind::ArrayGet { base, index } => {
                self.value(base, Repr::Value)?;
                self.value(index, Repr::Value)?;
                self.emit(Op::IndexGet {
                    quiet: false,
                    line: e.line,
                });
                Ok(Repr::Value)
            }
            ExprKind::ArrayTail { base } => {
                self.value(base, Repr::Value)?;
                self.emit(Op::AppendRead { line: e.line });
                Ok(Repr::Value)
            }
            ExprKind::FieldGet { base, name } => {
                self.value(base, Repr::Value)?;
                self.emit(Op::FieldGet {
                    name: name.clone(),
                    quiet: false,
                    line: e.line,
                });
                Ok(Repr::Value)
            }
            ExprKind::MethodCall {
                receiver,
                name,
                args,
            } => {
                self.value(receiver, Repr::Value)?;
                self.arguments(args, &argument_modes(None, args))?;
                self.emit(Op::CallMethod {
                    name: name.clone(),
                    argc: args.len(),
                    line: e.line,
                });
                Ok(Repr::Value)
            }
            ExprKind::Call { name, args } => {
                self.call(e, name, args)?;
                Ok(Repr::Value)
            }
            ExprKind::Assign { target, value } => self.assign(target, Source::Expr(value)),
            ExprKind::AssignRef { target, value } => {
                self.reference(value)?;
                let cell = self.temp(SlotKind::Cell);
                self.emit(Op::Bind(cell.clone()));
                self.emit(Op::Pop);
                self.bind_to(target, cell)?;
                Ok(Repr::Value)
            }
            ExprKind::AssignOp { op, target, value } => self.compound(e, *op, target, value),
            ExprKind::Conditional {
                test,
                then,
                otherwise,
            } => {
                let repr = repr_of_facet(facts.facet);
                let end = self.out.new_label();
                match then {
                    Some(then) => {
                        let other = self.out.new_label();
                        self.value(test, Repr::Bool)?;
                        self.emit(Op::JumpIfFalse(other));
                        self.value(then, repr)?;
                        self.emit(Op::Jump(end));
                        self.out.place_label(other);
                    }
                    None => {
                        self.value(test, repr)?;
                        self.emit(Op::Dup);
                        self.emit(Op::JumpIfTrue(end));
                        self.emit(Op::Pop);
                    }
                }
                self.value(otherwise, repr)?;
                self.out.place_label(end);
                Ok(repr)
            }
            ExprKind::List { head, value } => {
                let source = self.temp(SlotKind::Value);
                self.value(value, Repr::Value)?;
                self.emit(Op::Store(source.clone()));
                for (position, item) in head.items.iter().enumerate() {
                    let Some(item) = item else {
                        continue;
                    };
                    self.emit(Op::Load {
                        var: source.clone(),
                        mode: ReadMode::Quiet,
                        line: e.line,
                    });
                    match &item.key {
                        Some(key) => self.value(key, Repr::Value)?,
                        None => self.emit(Op::PushLong(position as i64)),
                    }
                    self.emit(Op::ListGet { line: e.line });
                    let element = self.temp(SlotKind::Value);
                    self.emit(Op::Store(element.clone()));
                    self.emit(Op::Pop);
                    self.assign(&item.target, Source::Temp(element))?;
                    self.emit(Op::Pop);
                }
                Ok(Repr::Value)
            }
            ExprKind::IncDec {
                target,
                increment,
                prefix,
            } => self.inc_dec(e, target, *increment, *prefix),
            ExprKind::Suppress(inner) => {
                self.out.open_scope(ScopeKind::Suppress);
                let repr = self.expr(inner)?;
                self.out.close_scope()?;
                Ok(repr)
            }
            ExprKind::Cast { kind, expr } => {
                let scalar = match kind {
                    CastKind::Long => Some(Repr::Long),
                    CastKind::Double => Some(Repr::Double),
                    CastKind::Bool => Some(Repr::Bool),
                    CastKind::String => Some(Repr::Str),
                    _ => None,
                };
                match scalar {
                    Some(repr) => {
                        self.value(expr, repr)?;
                        Ok(repr)
                    }
                    None => {
                        self.value(expr, Repr::Value)?;
                        self.emit(Op::Cast(*kind));
                        Ok(Repr::Value)
                    }
                }
            }
            ExprKind::Isset(exprs) => {
                let unset = self.out.new_label();
                let end = self.out.new_label();
                for x in exprs {
                    self.quiet(x)?;
                    self.emit(Op::IsSet);
                    self.emit(Op::JumpIfFalse(unset));
                }
                self.emit(Op::PushBool(true));
                self.emit(Op::Jump(end));
                self.out.place_label(unset);
                self.emit(Op::PushBool(false));
                self.out.place_label(end);
                Ok(Repr::Bool)
            }
            ExprKind::Empty(x) => {
                let repr = self.quiet(x)?;
                self.convert(repr, Repr::Bool);
                self.emit(Op::BoolNot);
                Ok(Repr::Bool)
            }
        }
    }

    fn literal(&mut self, literal: &Literal) -> Repr {
        let (op, repr) = match literal {
            Literal::Null => (Op::PushNull, Repr::Value),
            Literal::Bool(b) => (Op::PushBool(*b), Repr::Bool),
            Literal::Long(n) => (Op::PushLong(*n), Repr::Long),
            Literal::Double(d) => (Op::PushDouble(*d), Repr::Double),
            Literal::String(s) => (Op::PushStr(PhpString::from(s.as_str())), Repr::Str),
            Literal::Binary(b) => (Op::PushStr(PhpString::from(b.as_slice())), Repr::Str),
        };
        self.emit(op);
        repr
    }

    fn facet(&self, e: &Expr) -> Result<TypeFacet, InternalError> {
        self.info.facet(e.id)
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        facet: TypeFacet,
    ) -> Result<Repr, InternalError> {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                let end = self.out.new_label();
                self.value(left, Repr::Bool)?;
                self.emit(Op::Dup);
                self.emit(if op == BinaryOp::And {
                    Op::JumpIfFalse(end)
                } else {
                    Op::JumpIfTrue(end)
                });
                self.emit(Op::Pop);
                self.value(right, Repr::Bool)?;
                self.out.place_label(end);
                Ok(Repr::Bool)
            }
            BinaryOp::Xor => {
                self.value(left, Repr::Bool)?;
                self.value(right, Repr::Bool)?;
                self.emit(Op::BoolXor);
                Ok(Repr::Bool)
            }
            BinaryOp::Coalesce => {
                let end = self.out.new_label();
                let repr = self.quiet(left)?;
                self.convert(repr, Repr::Value);
                self.emit(Op::Dup);
                self.emit(Op::IsSet);
                self.emit(Op::JumpIfTrue(end));
                self.emit(Op::Pop);
                self.value(right, Repr::Value)?;
                self.out.place_label(end);
                Ok(Repr::Value)
            }
            BinaryOp::Concat => {
                self.value(left, Repr::Str)?;
                self.value(right, Repr::Str)?;
                self.emit(Op::Concat(2));
                Ok(Repr::Str)
            }
            _ => {
                let typed = typed_operands(op, self.facet(left)?, self.facet(right)?, facet)
                    .and_then(|repr| typed_op(op, repr).map(|typed| (repr, typed)));
                match typed {
                    Some((repr, (typed, result))) => {
                        self.value(left, repr)?;
                        self.value(right, repr)?;
                        self.emit(typed);
                        Ok(result)
                    }
                    None => {
                        self.value(left, Repr::Value)?;
                        self.value(right, Repr::Value)?;
                        self.emit(Op::ValueBin(op));
                        Ok(Repr::Value)
                    }
                }
            }
        }
    }

    fn unary(&mut self, op: UnaryOp, expr: &Expr) -> Result<Repr, InternalError> {
        let operand = self.facet(expr)?;
        match (op, operand) {
            (UnaryOp::Not, _) => {
                self.value(expr, Repr::Bool)?;
                self.emit(Op::BoolNot);
                Ok(Repr::Bool)
            }
            (UnaryOp::Neg, TypeFacet::Long) => {
                self.value(expr, Repr::Long)?;
                self.emit(Op::LongNeg);
                Ok(Repr::Value)
            }
            (UnaryOp::Neg, TypeFacet::Double) => {
                self.value(expr, Repr::Double)?;
                self.emit(Op::DoubleNeg);
                Ok(Repr::Double)
            }
            (UnaryOp::Plus, TypeFacet::Long | TypeFacet::Double) => {
                let repr = repr_of_facet(operand);
                self.value(expr, repr)?;
                Ok(repr)
            }
            (UnaryOp::BitNot, TypeFacet::Long | TypeFacet::Double) => {
                self.value(expr, Repr::Long)?;
                self.emit(Op::LongBitNot);
                Ok(Repr::Long)
            }
            _ => {
                self.value(expr, Repr::Value)?;
                self.emit(Op::ValueUnary(op));
                Ok(Repr::Value)
            }
        }
    }

    /// Emit `e` in `isset` context
    fn quiet(&mut self, e: &Expr) -> Result<Repr, InternalError> {
        match &e.kind {
            ExprKind::Var(name) => {
                let (var, _) = self.var(e, name)?;
                let repr = self.repr_of(&var);
                self.emit(Op::Load {
                    var,
                    mode: ReadMode::Quiet,
                    line: e.line,
                });
                Ok(repr)
            }
            ExprKind::VarVar(name) => {
                self.visit(e)?;
                self.value(name, Repr::Str)?;
                self.emit(Op::Load {
                    var: VarRef::Dynamic,
                    mode: ReadMode::Quiet,
                    line: e.line,
                });
                Ok(Repr::Value)
            }
            ExprKind::ArrayGet { base, index } => {
                self.visit(e)?;
                let repr = self.quiet(base)?;
                self.convert(repr, Repr::Value);
                self.value(index, Repr::Value)?;
                self.emit(Op::IndexGet {
                    quiet: true,
                    line: e.line,
                });
                Ok(Repr::Value)
            }
            ExprKind::FieldGet { base, name } => {
                self.visit(e)?;
                let repr = self.quiet(base)?;
                self.convert(repr, Repr::Value);
                self.emit(Op::FieldGet {
                    name: name.clone(),
                    quiet: true,
                    line: e.line,
                });
                Ok(Repr::Value)
            }
            _ => self.expr(e),
        }
    }

    /// Push the alias cell `e` denotes, creating the location if missing
    fn reference(&mut self, e: &Expr) -> Result<(), InternalError> {
        match &e.kind {
            ExprKind::Var(name) => {
                let (var, _) = self.var(e, name)?;
                let var = self.referenceable(var, name)?;
                self.emit(Op::PushRef(var));
            }
            ExprKind::VarVar(name) => {
                self.visit(e)?;
                self.value(name, Repr::Str)?;
                self.emit(Op::PushRef(VarRef::Dynamic));
            }
            ExprKind::ArrayGet { .. } | ExprKind::ArrayTail { .. } | ExprKind::FieldGet { .. } => {
                let path = self.place(e, true)?;
                self.emit(Op::PlaceRef { path, line: e.line });
            }
            _ => {
                self.value(e, Repr::Value)?;
                self.emit(Op::MakeCell);
            }
        }
        Ok(())
    }

    /// Emit the root and keys of a place
    fn place(&mut self, e: &Expr, vivify: bool) -> Result<PlacePath, InternalError> {
        let (mut path, step) = match &e.kind {
            ExprKind::Var(name) => {
                let (var, _) = self.var(e, name)?;
                if let Some(kind) = self.slot_kind_of(&var) {
                    if !matches!(kind, SlotKind::Value | SlotKind::Cell) {
                        return Err(InternalError::NotContainer {
                            name: name.clone(),
                            storage: self.storage_name(&var),
                        });
                    }
                }
                if vivify {
                    self.emit(Op::Define(var.clone()));
                }
                return Ok(PlacePath {
                    root: PlaceRoot::Var(var),
                    steps: Vec::new(),
                });
            }
            ExprKind::VarVar(name) => {
                self.visit(e)?;
                self.value(name, Repr::Str)?;
                if vivify {
                    self.emit(Op::Dup);
                    self.emit(Op::Define(VarRef::Dynamic));
                }
                return Ok(PlacePath {
                    root: PlaceRoot::Var(VarRef::Dynamic),
                    steps: Vec::new(),
                });
            }
            ExprKind::ArrayGet { base, index } => {
                self.visit(e)?;
                let path = self.place(base, vivify)?;
                self.value(index, Repr::Value)?;
                (path, PlaceStep::Index { line: e.line })
            }
            ExprKind::ArrayTail { base } => {
                self.visit(e)?;
                (self.place(base, vivify)?, PlaceStep::Append)
            }
            ExprKind::FieldGet { base, name } => {
                self.visit(e)?;
                (self.place(base, vivify)?, PlaceStep::Field(name.clone()))
            }
            _ => {
                self.value(e, Repr::Value)?;
                return Ok(PlacePath {
                    root: PlaceRoot::Temp,
                    steps: Vec::new(),
                });
            }
        };
        path.steps.push(step);
        Ok(path)
    }

    fn source(&mut self, source: &Source<'_>, want: Repr) -> Result<(), InternalError> {
        match source {
            Source::Expr(e) => self.value(e, want),
            Source::Temp(var) => {
                self.emit(Op::Load {
                    var: var.clone(),
                    mode: ReadMode::Quiet,
                    line: 0,
                });
                self.convert(Repr::Value, want);
                Ok(())
            }
        }
    }

    /// Store into `target`; the place is resolved before the value
    fn assign(&mut self, target: &Expr, source: Source<'_>) -> Result<Repr, InternalError> {
        match &target.kind {
            ExprKind::Var(name) => {
                let (var, _) = self.var(target, name)?;
                let repr = self.repr_of(&var);
                self.source(&source, repr)?;
                self.emit(Op::Store(var));
                Ok(repr)
            }
            ExprKind::VarVar(name) => {
                self.visit(target)?;
                self.source(&source, Repr::Value)?;
                self.value(name, Repr::Str)?;
                self.emit(Op::Store(VarRef::Dynamic));
                Ok(Repr::Value)
            }
            ExprKind::ArrayGet { .. } | ExprKind::ArrayTail { .. } | ExprKind::FieldGet { .. } => {
                let path = self.place(target, true)?;
                self.source(&source, Repr::Value)?;
                self.emit(Op::PlaceAssign {
                    path,
                    line: target.line,
                });
                Ok(Repr::Value)
            }
            other => Err(InternalError::NotAssignable(other.name())),
        }
    }

    /// Make `target` share the cell held in `cell`; pushes its value
    fn bind_to(&mut self, target: &Expr, cell: VarRef) -> Result<(), InternalError> {
        match &target.kind {
            ExprKind::Var(name) => {
                let (var, _) = self.var(target, name)?;
                let var = self.referenceable(var, name)?;
                self.emit(Op::PushRef(cell));
                self.emit(Op::Bind(var));
            }
            ExprKind::VarVar(name) => {
                self.visit(target)?;
                self.emit(Op::PushRef(cell));
                self.value(name, Repr::Str)?;
                self.emit(Op::Bind(VarRef::Dynamic));
            }
            ExprKind::ArrayGet { .. } | ExprKind::ArrayTail { .. } | ExprKind::FieldGet { .. } => {
                let path = self.place(target, true)?;
                self.emit(Op::PushRef(cell));
                self.emit(Op::PlaceBind {
                    path,
                    line: target.line,
                });
            }
            other => return Err(InternalError::NotAssignable(other.name())),
        }
        Ok(())
    }

    fn compound(
        &mut self,
        e: &Expr,
        op: BinaryOp,
        target: &Expr,
        value: &Expr,
    ) -> Result<Repr, InternalError> {
        if op == BinaryOp::Coalesce {
            let end = self.out.new_label();
            let repr = self.quiet(target)?;
            self.convert(repr, Repr::Value);
            self.emit(Op::Dup);
            self.emit(Op::IsSet);
            self.emit(Op::JumpIfTrue(end));
            self.emit(Op::Pop);
            let stored = self.assign(target, Source::Expr(value))?;
            self.convert(stored, Repr::Value);
            self.out.place_label(end);
            return Ok(Repr::Value);
        }
        match &target.kind {
            ExprKind::Var(name) => {
                let current = self.expr(target)?;
                let (var, _) = self.var(target, name)?;
                let result = self.facet(e)?;
                let typed = typed_operands(op, self.facet(target)?, self.facet(value)?, result)
                    .and_then(|repr| typed_op(op, repr).map(|typed| (repr, typed)));
                let produced = match typed {
                    Some((repr, (typed, produced))) => {
                        self.convert(current, repr);
                        self.value(value, repr)?;
                        self.emit(typed);
                        produced
                    }
                    None => {
                        self.convert(current, Repr::Value);
                        self.value(value, Repr::Value)?;
                        self.emit(Op::ValueBin(op));
                        Repr::Value
                    }
                };
                let stored = self.repr_of(&var);
                self.convert(produced, stored);
                self.emit(Op::Store(var));
                Ok(stored)
            }
            ExprKind::VarVar(name) => {
                self.visit(target)?;
                self.value(name, Repr::Str)?;
                self.emit(Op::Dup);
                self.emit(Op::Load {
                    var: VarRef::Dynamic,
                    mode: ReadMode::Checked,
                    line: target.line,
                });
                self.value(value, Repr::Value)?;
                self.emit(Op::ValueBin(op));
                self.emit(Op::Swap);
                self.emit(Op::Store(VarRef::Dynamic));
                Ok(Repr::Value)
            }
            ExprKind::ArrayGet { .. } | ExprKind::ArrayTail { .. } | ExprKind::FieldGet { .. } => {
                let path = self.place(target, true)?;
                self.value(value, Repr::Value)?;
                self.emit(Op::PlaceUpdate {
                    path,
                    op: UpdateOp::Binary(op),
                    line: e.line,
                });
                Ok(Repr::Value)
            }
            other => Err(InternalError::NotAssignable(other.name())),
        }
    }

    fn inc_dec(
        &mut self,
        e: &Expr,
        target: &Expr,
        increment: bool,
        prefix: bool,
    ) -> Result<Repr, InternalError> {
        let op = if increment {
            UpdateOp::Increment { prefix }
        } else {
            UpdateOp::Decrement { prefix }
        };
        match &target.kind {
            ExprKind::Var(name) => {
                let current = self.expr(target)?;
                let (var, _) = self.var(target, name)?;
                // only doubles step in place, a stepped long may become a double
                if current == Repr::Double && self.repr_of(&var) == Repr::Double {
                    if !prefix {
                        self.emit(Op::Dup);
                    }
                    self.emit(Op::PushDouble(1.0));
                    self.emit(Op::DoubleBin(if increment { DoubleOp::Add } else { DoubleOp::Sub }));
                    self.emit(Op::Store(var));
                    if !prefix {
                        self.emit(Op::Pop);
                    }
                    Ok(Repr::Double)
                } else {
                    self.convert(current, Repr::Value);
                    self.emit(Op::StepVar { var, op });
                    Ok(Repr::Value)
                }
            }
            ExprKind::VarVar(name) => {
                self.visit(target)?;
                self.value(name, Repr::Str)?;
                self.emit(Op::Dup);
                self.emit(Op::Load {
                    var: VarRef::Dynamic,
                    mode: ReadMode::Checked,
                    line: target.line,
                });
                self.emit(Op::Swap);
                self.emit(Op::StepVar {
                    var: VarRef::Dynamic,
                    op,
                });
                Ok(Repr::Value)
            }
            ExprKind::ArrayGet { .. } | ExprKind::ArrayTail { .. } | ExprKind::FieldGet { .. } => {
                let path = self.place(target, true)?;
                self.emit(Op::PlaceUpdate {
                    path,
                    op,
                    line: e.line,
                });
                Ok(Repr::Value)
            }
            other => Err(InternalError::NotAssignable(other.name())),
        }
    }

    fn arguments(&mut self, args: &[Expr], modes: &[bool]) -> Result<(), InternalError> {
        for (arg, by_ref) in args.iter().zip(modes) {
            if *by_ref {
                self.reference(arg)?;
            } else {
                self.value(arg, Repr::Value)?;
            }
        }
        Ok(())
    }

    fn call(&mut self, e: &Expr, name: &str, args: &[Expr]) -> Result<(), InternalError> {
        let signature = self.oracle.signature(name);
        self.arguments(args, &argument_modes(signature.as_ref(), args))?;
        let caller_scope = signature.is_some_and(|s| s.uses_caller_scope);
        let direct = if caller_scope {
            None
        } else {
            self.resolver.resolve(self.name, name)?
        };
        let argc = args.len();
        self.emit(match direct {
            Some(target) => Op::CallDirect {
                target,
                argc,
                line: e.line,
            },
            None => Op::Call {
                name: name.to_string(),
                argc,
                line: e.line,
            },
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::backend::{OpBuffer, TextBackend};
    use phpeval_analyze::{analyze_function, AnalyzeConfig, SignatureTable};
    use phpeval_core::ast::{FunctionDef, Param};
    use phpeval_core::ExprFactory;

    fn listing(def: &FunctionDef) -> String {
        let oracle = SignatureTable::new();
        let info = Arc::new(analyze_function(
            FunctionBody::of(def),
            &AnalyzeConfig::default(),
            &oracle,
        ));
        let mut text = TextBackend::new();
        translate(FunctionBody::of(def), &info, &oracle, &mut NamedCalls, &mut text).unwrap();
        text.finish().unwrap()
    }

    #[test]
    fn test_long_locals_use_typed_arithmetic() {
        // function f() { $a = 1; $b = $a + 2; return $b; }
        let mut f = ExprFactory::new();
        let a = f.var("a");
        let one = f.long(1);
        let a2 = f.var("a");
        let two = f.long(2);
        let sum = f.add(a2, two);
        let b = f.var("b");
        let def = FunctionDef::new(
            "f",
            vec![],
            vec![
                Stmt::Expr(f.assign(a, one)),
                Stmt::Expr(f.assign(b, sum)),
                Stmt::Return(Some(f.var("b"))),
            ],
        );
        let text = listing(&def);
        assert!(text.contains("long.Add"), "{}", text);
        assert!(!text.contains("value +"), "{}", text);
    }

    #[test]
    fn test_stepped_long_is_boxed() {
        // function f() { $i = 0; $i++; return -$i; }
        let mut f = ExprFactory::new();
        let i = f.var("i");
        let zero = f.long(0);
        let target = f.var("i");
        let step = f.post_inc(target);
        let read = f.var("i");
        let negated = f.unary(UnaryOp::Neg, read);
        let def = FunctionDef::new(
            "f",
            vec![],
            vec![
                Stmt::Expr(f.assign(i, zero)),
                Stmt::Expr(step),
                Stmt::Return(Some(negated)),
            ],
        );
        let oracle = SignatureTable::new();
        let info = analyze_function(FunctionBody::of(&def), &AnalyzeConfig::default(), &oracle);
        let id = info.bindings.find("i").unwrap();
        assert_eq!(info.bindings.get(id).storage, StorageClass::BoxedValue);
        let text = listing(&def);
        assert!(text.contains("step "), "{}", text);
        assert!(!text.contains("long.Add"), "{}", text);
    }

    #[test]
    fn test_maybe_undefined_read_is_checked() {
        // function f($c) { if ($c) { $x = 1; } echo $x; }
        let mut f = ExprFactory::new();
        let x = f.var("x");
        let one = f.long(1);
        let def = FunctionDef::new(
            "f",
            vec![Param::new("c")],
            vec![
                Stmt::If {
                    test: f.var("c"),
                    then: vec![Stmt::Expr(f.assign(x, one))],
                    otherwise: vec![],
                },
                Stmt::Echo(vec![f.var("x")]),
            ],
        );
        let text = listing(&def);
        assert!(text.contains("load.checked $x#"), "{}", text);
    }

    #[test]
    fn test_node_without_facts_is_rejected() {
        let mut f = ExprFactory::new();
        let def = FunctionDef::new("f", vec![], vec![Stmt::Echo(vec![f.long(1)])]);
        let oracle = SignatureTable::new();
        let info = Arc::new(analyze_function(
            FunctionBody::of(&def),
            &AnalyzeConfig::default(),
            &oracle,
        ));
        let foreign = FunctionDef::new("f", vec![], vec![Stmt::Echo(vec![f.long(2)])]);
        let mut buffer = OpBuffer::new();
        let err = translate(
            FunctionBody::of(&foreign),
            &info,
            &oracle,
            &mut NamedCalls,
            &mut buffer,
        )
        .unwrap_err();
        assert!(matches!(err, InternalError::NotAnalyzed(_)));
    }

    #[test]
    fn test_generated_nodes_change_phase() {
        let mut f = ExprFactory::new();
        let literal = f.long(1);
        let id = literal.id;
        let def = FunctionDef::new("f", vec![], vec![Stmt::Echo(vec![literal])]);
        let oracle = SignatureTable::new();
        let info = Arc::new(analyze_function(
            FunctionBody::of(&def),
            &AnalyzeConfig::default(),
            &oracle,
        ));
        assert_eq!(info.phase(id), NodePhase::Analyzed);
        let mut buffer = OpBuffer::new();
        let translation =
            translate(FunctionBody::of(&def), &info, &oracle, &mut NamedCalls, &mut buffer)
                .unwrap();
        assert_eq!(translation.phase(id), NodePhase::Generated);
        assert_eq!(translation.generated_nodes(), 1);
    }

    #[test]
    fn test_stray_break_returns() {
        let def = FunctionDef::new("f", vec![], vec![Stmt::Break { depth: 1 }]);
        let text = listing(&def);
        assert!(text.starts_with("  push null\n  return\n"), "{}", text);
    }
}
