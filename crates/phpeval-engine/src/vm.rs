//! Stack machine for translated functions
//!
//! Runs one [`CompiledFunction`] activation against a [`Runtime`]. Frame
//! slots hold typed primitives, boxed values or alias cells as the layout
//! says; variables without a slot live in the runtime's symbol table.
//!
//! The runtime's error-reporting flag is restored to its entry value on
//! every exit from an activation, so a suppression scope cut short by an
//! error never leaks.

use std::vec;

use phpeval_core::ast::UnaryOp;
use phpeval_core::value::{shift_left, shift_right, AliasCell, ArrayKey, PhpString, Value};
use phpeval_core::{Arg, InternalError, Runtime, RuntimeError, SemanticError};

use crate::place::{self, Root, Step, UpdateOp};
use crate::semantics::{self, Passed};
use crate::translate::{
    CompiledFunction, LongOp, Op, ParamBinding, PlacePath, PlaceRoot, PlaceStep, ReadMode, Repr,
    SlotKind, VarRef,
};

/// A value on the operand stack
#[derive(Debug, Clone)]
pub enum Operand {
    Long(i64),
    Double(f64),
    Bool(bool),
    Str(PhpString),
    Value(Value),
    Cell(AliasCell),
}

impl Operand {
    pub fn into_value(self) -> Value {
        match self {
            Operand::Long(n) => Value::Long(n),
            Operand::Double(d) => Value::Double(d),
            Operand::Bool(b) => Value::Bool(b),
            Operand::Str(s) => Value::String(s),
            Operand::Value(v) => v,
            Operand::Cell(cell) => cell.get(),
        }
    }

    pub fn to_bool(&self) -> bool {
        match self {
            Operand::Long(n) => *n != 0,
            Operand::Double(d) => *d != 0.0,
            Operand::Bool(b) => *b,
            Operand::Str(s) => Value::String(s.clone()).to_bool(),
            Operand::Value(v) => v.to_bool(),
            Operand::Cell(cell) => cell.borrow().to_bool(),
        }
    }

    pub fn is_set(&self) -> bool {
        match self {
            Operand::Value(v) => v.is_set(),
            Operand::Cell(cell) => cell.borrow().is_set(),
            _ => true,
        }
    }

    /// The operand in representation `repr`, with PHP conversion rules
    pub fn convert(self, repr: Repr) -> Operand {
        match (repr, self) {
            (Repr::Long, Operand::Long(n)) => Operand::Long(n),
            (Repr::Long, other) => Operand::Long(other.into_value().to_long()),
            (Repr::Double, Operand::Double(d)) => Operand::Double(d),
            (Repr::Double, Operand::Long(n)) => Operand::Double(n as f64),
            (Repr::Double, other) => Operand::Double(other.into_value().to_double()),
            (Repr::Bool, other) => Operand::Bool(other.to_bool()),
            (Repr::Str, Operand::Str(s)) => Operand::Str(s),
            (Repr::Str, other) => Operand::Str(other.into_value().to_php_string()),
            (Repr::Value, other) => Operand::Value(other.into_value()),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Operand::Long(_) => "long",
            Operand::Double(_) => "double",
            Operand::Bool(_) => "bool",
            Operand::Str(_) => "string",
            Operand::Value(_) => "value",
            Operand::Cell(_) => "cell",
        }
    }
}

/// Storage of one frame slot
#[derive(Debug, Clone)]
enum Local {
    Long(i64),
    Double(f64),
    Bool(bool),
    Str(PhpString),
    Value(Option<Value>),
    Cell(Option<AliasCell>),
}

impl Local {
    fn new(kind: SlotKind) -> Self {
        match kind {
            SlotKind::Long => Local::Long(0),
            SlotKind::Double => Local::Double(0.0),
            SlotKind::Bool => Local::Bool(false),
            SlotKind::Str => Local::Str(PhpString::empty()),
            SlotKind::Value => Local::Value(None),
            SlotKind::Cell => Local::Cell(None),
        }
    }

    /// Store a copy of `value`, converted to the slot's representation
    fn store(&mut self, value: Value) -> Operand {
        match self {
            Local::Long(n) => {
                *n = value.to_long();
                Operand::Long(*n)
            }
            Local::Double(d) => {
                *d = value.to_double();
                Operand::Double(*d)
            }
            Local::Bool(b) => {
                *b = value.to_bool();
                Operand::Bool(*b)
            }
            Local::Str(s) => {
                *s = value.to_php_string();
                Operand::Str(s.clone())
            }
            Local::Value(slot) => {
                *slot = Some(value.copy());
                Operand::Value(value)
            }
            Local::Cell(Some(cell)) => {
                cell.set(value.copy());
                Operand::Value(value)
            }
            Local::Cell(slot) => {
                *slot = Some(AliasCell::new(value.copy()));
                Operand::Value(value)
            }
        }
    }

    fn unset(&mut self) {
        match self {
            Local::Long(n) => *n = 0,
            Local::Double(d) => *d = 0.0,
            Local::Bool(b) => *b = false,
            Local::Str(s) => *s = PhpString::empty(),
            Local::Value(slot) => *slot = None,
            Local::Cell(slot) => *slot = None,
        }
    }
}

enum Iteration {
    /// Snapshot of a by-value subject
    Values(vec::IntoIter<(Value, Value)>),
    /// Keys of a by-reference subject, resolved against it on every step
    Refs {
        subject: AliasCell,
        keys: vec::IntoIter<ArrayKey>,
    },
}

/// Run one activation of `code`; the caller has pushed the frame
pub fn execute(
    code: &CompiledFunction,
    rt: &mut dyn Runtime,
    args: Vec<Arg>,
) -> Result<Value, RuntimeError> {
    let entry = rt.error_reporting();
    let mut machine = Machine::new(code);
    let result = machine
        .bind_params(rt, args)
        .and_then(|()| machine.run(rt));
    if !machine.scopes.is_empty() || result.is_err() {
        rt.set_error_reporting(entry);
    }
    result
}

struct Machine<'c> {
    code: &'c CompiledFunction,
    locals: Vec<Local>,
    stack: Vec<Operand>,
    iterators: Vec<Iteration>,
    /// Reporting flags saved by open suppression scopes
    scopes: Vec<bool>,
}

fn stack_error(message: impl Into<String>) -> RuntimeError {
    InternalError::Stack(message.into()).into()
}

fn slot_mut(locals: &mut [Local], slot: usize) -> Result<&mut Local, RuntimeError> {
    locals
        .get_mut(slot)
        .ok_or_else(|| stack_error(format!("no frame slot {}", slot)))
}

fn operand_name(operand: Option<Operand>) -> Result<String, RuntimeError> {
    let operand = operand.ok_or_else(|| stack_error("missing variable name"))?;
    Ok(operand.into_value().to_php_string().to_str_lossy().into_owned())
}

fn named_root(rt: &mut dyn Runtime, name: &str, vivify: bool) -> Option<AliasCell> {
    if vivify {
        Some(rt.alias_cell(name))
    } else {
        rt.find_alias_cell(name)
    }
}

/// Where a place op starts; `None` when the root is missing and may not be
/// created
fn resolve_root<'l>(
    locals: &'l mut [Local],
    rt: &mut dyn Runtime,
    root: &PlaceRoot,
    operand: Option<Operand>,
    vivify: bool,
) -> Result<Option<Root<'l>>, RuntimeError> {
    let var = match root {
        PlaceRoot::Temp => {
            let value = operand.map(Operand::into_value).unwrap_or_default();
            return Ok(Some(Root::Cell(AliasCell::new(value))));
        }
        PlaceRoot::Var(var) => var,
    };
    match var {
        VarRef::Name(name) => Ok(named_root(rt, name, vivify).map(Root::Cell)),
        VarRef::Dynamic => {
            let name = operand_name(operand)?;
            Ok(named_root(rt, &name, vivify).map(Root::Cell))
        }
        VarRef::Local { slot, name } => match slot_mut(locals, *slot)? {
            Local::Value(value) => {
                if value.is_none() && vivify {
                    *value = Some(Value::Null);
                }
                Ok(value.as_mut().map(Root::Slot))
            }
            _ => Err(InternalError::NotContainer {
                name: name.clone(),
                storage: "primitive".to_string(),
            }
            .into()),
        },
        VarRef::Cell { slot, .. } => match slot_mut(locals, *slot)? {
            Local::Cell(cell) => {
                if cell.is_none() && vivify {
                    *cell = Some(AliasCell::default());
                }
                Ok(cell.clone().map(Root::Cell))
            }
            _ => Err(stack_error(format!("slot {} holds no cell", slot))),
        },
    }
}

/// Kind of place operation
enum PlaceAction {
    Assign(Value),
    Reference,
    Bind(AliasCell),
    Update(UpdateOp, Option<Value>),
    Unset,
}

impl<'c> Machine<'c> {
    fn new(code: &'c CompiledFunction) -> Self {
        let locals = code.frame.slots.iter().map(|s| Local::new(s.kind)).collect();
        Self {
            code,
            locals,
            stack: Vec::new(),
            iterators: Vec::new(),
            scopes: Vec::new(),
        }
    }

    fn bind_params(&mut self, rt: &mut dyn Runtime, args: Vec<Arg>) -> Result<(), RuntimeError> {
        let frame = &self.code.frame;
        let passed = args.len();
        let mut args = args.into_iter();
        for param in &frame.params {
            match args.next() {
                Some(arg) => self.bind_param(rt, param, arg)?,
                None => {
                    let value = semantics::missing_argument(
                        rt,
                        &self.code.name,
                        param.default.as_ref(),
                        frame.required,
                        passed,
                        frame.params.len(),
                    )?;
                    self.bind_param(rt, param, Arg::Value(value))?;
                }
            }
        }
        Ok(())
    }

    fn bind_param(
        &mut self,
        rt: &mut dyn Runtime,
        param: &ParamBinding,
        arg: Arg,
    ) -> Result<(), RuntimeError> {
        match &param.var {
            VarRef::Cell { slot, .. } => {
                let cell = if param.by_ref {
                    arg.into_cell()
                } else {
                    AliasCell::new(arg.value().copy())
                };
                *slot_mut(&mut self.locals, *slot)? = Local::Cell(Some(cell));
            }
            VarRef::Local { slot, .. } => {
                slot_mut(&mut self.locals, *slot)?.store(arg.value());
            }
            VarRef::Name(name) => {
                if param.by_ref {
                    rt.bind_alias(name, arg.into_cell());
                } else {
                    rt.set_value(name, arg.value().copy());
                }
            }
            VarRef::Dynamic => return Err(stack_error("dynamic parameter")),
        }
        Ok(())
    }

    fn push(&mut self, operand: Operand) {
        self.stack.push(operand);
    }

    fn pop(&mut self) -> Result<Operand, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| stack_error("pop from empty stack"))
    }

    fn pop_value(&mut self) -> Result<Value, RuntimeError> {
        Ok(self.pop()?.into_value())
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Operand>, RuntimeError> {
        let at = self
            .stack
            .len()
            .checked_sub(n)
            .ok_or_else(|| stack_error(format!("{} operands expected", n)))?;
        Ok(self.stack.split_off(at))
    }

    fn pop_long(&mut self) -> Result<i64, RuntimeError> {
        match self.pop()? {
            Operand::Long(n) => Ok(n),
            other => Err(stack_error(format!("expected long, found {}", other.kind()))),
        }
    }

    fn pop_double(&mut self) -> Result<f64, RuntimeError> {
        match self.pop()? {
            Operand::Double(d) => Ok(d),
            other => Err(stack_error(format!("expected double, found {}", other.kind()))),
        }
    }

    fn pop_bool(&mut self) -> Result<bool, RuntimeError> {
        match self.pop()? {
            Operand::Bool(b) => Ok(b),
            other => Err(stack_error(format!("expected bool, found {}", other.kind()))),
        }
    }

    fn pop_name(&mut self) -> Result<String, RuntimeError> {
        let operand = self.pop()?;
        operand_name(Some(operand))
    }

    fn pop_cell(&mut self) -> Result<AliasCell, RuntimeError> {
        match self.pop()? {
            Operand::Cell(cell) => Ok(cell),
            other => Err(stack_error(format!("expected cell, found {}", other.kind()))),
        }
    }

    fn pop_passed(&mut self, argc: usize) -> Result<Vec<Passed>, RuntimeError> {
        Ok(self
            .pop_n(argc)?
            .into_iter()
            .map(|operand| match operand {
                Operand::Cell(cell) => Passed::Cell(cell),
                other => Passed::Value(other.into_value()),
            })
            .collect())
    }

    fn run(&mut self, rt: &mut dyn Runtime) -> Result<Value, RuntimeError> {
        let code = self.code;
        let ops = code.ops();
        let mut pc = 0;
        while let Some(op) = ops.get(pc) {
            pc += 1;
            match op {
                Op::PushNull => self.push(Operand::Value(Value::Null)),
                Op::PushBool(b) => self.push(Operand::Bool(*b)),
                Op::PushLong(n) => self.push(Operand::Long(*n)),
                Op::PushDouble(d) => self.push(Operand::Double(*d)),
                Op::PushStr(s) => self.push(Operand::Str(s.clone())),
                Op::Pop => {
                    self.pop()?;
                }
                Op::Dup => {
                    let top = self
                        .stack
                        .last()
                        .cloned()
                        .ok_or_else(|| stack_error("dup of empty stack"))?;
                    self.push(top);
                }
                Op::Swap => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(b);
                    self.push(a);
                }
                Op::Convert(repr) => {
                    let operand = self.pop()?;
                    self.push(operand.convert(*repr));
                }

                Op::Load { var, mode, line } => {
                    let quiet = *mode == ReadMode::Quiet;
                    let operand = self.load(rt, var, quiet, *line)?;
                    self.push(operand);
                }
                Op::Store(var) => {
                    let name = self.dynamic_name(var)?;
                    let value = self.pop_value()?;
                    let stored = self.store(rt, var, name, value)?;
                    self.push(stored);
                }
                Op::PushRef(var) => {
                    let name = self.dynamic_name(var)?;
                    let cell = self.reference(rt, var, name)?;
                    self.push(Operand::Cell(cell));
                }
                Op::Bind(var) => {
                    let name = self.dynamic_name(var)?;
                    let cell = self.pop_cell()?;
                    let value = cell.get();
                    self.bind(rt, var, name, cell)?;
                    self.push(Operand::Value(value));
                }
                Op::Unset(var) => match var {
                    VarRef::Local { slot, .. } | VarRef::Cell { slot, .. } => {
                        slot_mut(&mut self.locals, *slot)?.unset();
                    }
                    VarRef::Name(name) => rt.unset(name),
                    VarRef::Dynamic => {
                        let name = self.pop_name()?;
                        rt.unset(&name);
                    }
                },
                Op::Define(var) => match var {
                    VarRef::Local { slot, .. } => {
                        if let Local::Value(value @ None) = slot_mut(&mut self.locals, *slot)? {
                            *value = Some(Value::Null);
                        }
                    }
                    VarRef::Cell { slot, .. } => {
                        if let Local::Cell(cell @ None) = slot_mut(&mut self.locals, *slot)? {
                            *cell = Some(AliasCell::default());
                        }
                    }
                    VarRef::Name(name) => {
                        rt.alias_cell(name);
                    }
                    VarRef::Dynamic => {
                        let name = self.pop_name()?;
                        rt.alias_cell(&name);
                    }
                },
                Op::StepVar { var, op } => {
                    let name = self.dynamic_name(var)?;
                    let current = self.pop_value()?;
                    let (stored, result) = op.apply(current, None)?;
                    self.store(rt, var, name, stored)?;
                    self.push(Operand::Value(result));
                }
                Op::BindGlobal(name) => {
                    let cell = rt.global_cell(name);
                    rt.bind_alias(name, cell);
                }
                Op::LoadThis { line } => {
                    let this = semantics::this(rt, *line)?;
                    self.push(Operand::Value(this));
                }

                Op::LongBin(op) => {
                    let b = self.pop_long()?;
                    let a = self.pop_long()?;
                    self.push(long_op(*op, a, b)?);
                }
                Op::DoubleBin(op) => {
                    let b = self.pop_double()?;
                    let a = self.pop_double()?;
                    self.push(Operand::Double(op.apply(a, b)));
                }
                Op::LongCmp(compare) => {
                    let b = self.pop_long()?;
                    let a = self.pop_long()?;
                    self.push(Operand::Bool(compare.holds(Some(a.cmp(&b)))));
                }
                Op::DoubleCmp(compare) => {
                    let b = self.pop_double()?;
                    let a = self.pop_double()?;
                    self.push(Operand::Bool(compare.holds(a.partial_cmp(&b))));
                }
                Op::LongNeg => {
                    let a = self.pop_long()?;
                    let negated = match a.checked_neg() {
                        Some(n) => Value::Long(n),
                        None => Value::Double(-(a as f64)),
                    };
                    self.push(Operand::Value(negated));
                }
                Op::DoubleNeg => {
                    let a = self.pop_double()?;
                    self.push(Operand::Double(-a));
                }
                Op::LongBitNot => {
                    let a = self.pop_long()?;
                    self.push(Operand::Long(!a));
                }
                Op::BoolNot => {
                    let a = self.pop_bool()?;
                    self.push(Operand::Bool(!a));
                }
                Op::BoolXor => {
                    let b = self.pop_bool()?;
                    let a = self.pop_bool()?;
                    self.push(Operand::Bool(a ^ b));
                }

                Op::ValueBin(op) => {
                    let b = self.pop_value()?;
                    let a = self.pop_value()?;
                    self.push(Operand::Value(a.binary_op(*op, &b)?));
                }
                Op::ValueUnary(op) => {
                    let a = self.pop_value()?;
                    let result = match op {
                        UnaryOp::Not => Value::Bool(!a.to_bool()),
                        UnaryOp::Neg => a.neg()?,
                        UnaryOp::Plus => a.plus()?,
                        UnaryOp::BitNot => a.bit_not()?,
                    };
                    self.push(Operand::Value(result));
                }
                Op::Cast(kind) => {
                    let a = self.pop_value()?;
                    self.push(Operand::Value(a.cast(*kind)));
                }
                Op::Concat(n) => {
                    let parts: Vec<PhpString> = self
                        .pop_n(*n)?
                        .into_iter()
                        .map(|operand| match operand {
                            Operand::Str(s) => s,
                            other => other.into_value().to_php_string(),
                        })
                        .collect();
                    self.push(Operand::Str(semantics::concat_all(&parts)));
                }
                Op::IsSet => {
                    let a = self.pop()?;
                    self.push(Operand::Bool(a.is_set()));
                }

                Op::Jump(label) => pc = code.target(*label)?,
                Op::JumpIfFalse(label) => {
                    if !self.pop()?.to_bool() {
                        pc = code.target(*label)?;
                    }
                }
                Op::JumpIfTrue(label) => {
                    if self.pop()?.to_bool() {
                        pc = code.target(*label)?;
                    }
                }

                Op::NewArray => self.push(Operand::Value(Value::empty_array())),
                Op::ArrayItem {
                    keyed,
                    by_ref,
                    line,
                } => {
                    let item = match self.pop()? {
                        Operand::Cell(cell) if *by_ref => Passed::Cell(cell),
                        other => Passed::Value(other.into_value()),
                    };
                    let key = if *keyed { Some(self.pop_value()?) } else { None };
                    let mut array = self.pop_value()?;
                    if let Some(items) = array.array_mut() {
                        semantics::insert_item(rt, items, key.as_ref(), item, *line)?;
                    }
                    self.push(Operand::Value(array));
                }
                Op::IndexGet { quiet, line } => {
                    let index = self.pop_value()?;
                    let base = self.pop_value()?;
                    let value = semantics::read_element(rt, &base, &index, *quiet, *line)?;
                    self.push(Operand::Value(value));
                }
                Op::FieldGet { name, quiet, line } => {
                    let base = self.pop_value()?;
                    let value = semantics::read_field(rt, &base, name, *quiet, *line)?;
                    self.push(Operand::Value(value));
                }
                Op::AppendRead { line } => {
                    self.pop()?;
                    let value = semantics::append_read(rt, *line)?;
                    self.push(Operand::Value(value));
                }
                Op::ListGet { line } => {
                    let key = self.pop_value()?;
                    let source = self.pop_value()?;
                    let value = semantics::list_element(rt, &source, &key, *line)?;
                    self.push(Operand::Value(value));
                }
                Op::MakeCell => {
                    let value = self.pop_value()?;
                    self.push(Operand::Cell(AliasCell::new(value)));
                }

                Op::PlaceAssign { path, line } => {
                    let value = self.pop_value()?.copy();
                    self.place(rt, path, *line, PlaceAction::Assign(value.clone()))?;
                    self.push(Operand::Value(value));
                }
                Op::PlaceRef { path, line } => {
                    let cell = self
                        .place(rt, path, *line, PlaceAction::Reference)?
                        .unwrap_or_else(|| Operand::Cell(AliasCell::default()));
                    self.push(cell);
                }
                Op::PlaceBind { path, line } => {
                    let cell = self.pop_cell()?;
                    let value = cell.get();
                    self.place(rt, path, *line, PlaceAction::Bind(cell))?;
                    self.push(Operand::Value(value));
                }
                Op::PlaceUpdate { path, op, line } => {
                    let operand = match op {
                        UpdateOp::Binary(_) => Some(self.pop_value()?),
                        _ => None,
                    };
                    let result = self
                        .place(rt, path, *line, PlaceAction::Update(*op, operand))?
                        .unwrap_or(Operand::Value(Value::Null));
                    self.push(result);
                }
                Op::PlaceUnset { path, line } => {
                    self.place(rt, path, *line, PlaceAction::Unset)?;
                }

                Op::Call { name, argc, line } => {
                    let result = self.call_named(rt, name, *argc, *line)?;
                    self.push(Operand::Value(result));
                }
                Op::CallDirect { target, argc, line } => {
                    let result = match target.target.upgrade() {
                        Some(callee) => {
                            let passed = self.pop_passed(*argc)?;
                            let args =
                                semantics::pass_arguments(rt, Some(&*callee), passed, *line)?;
                            rt.check_budget()?;
                            callee.call(rt, None, args)?
                        }
                        None => self.call_named(rt, &target.name, *argc, *line)?,
                    };
                    self.push(Operand::Value(result));
                }
                Op::CallMethod { name, argc, line } => {
                    let passed = self.pop_passed(*argc)?;
                    let receiver = self.pop_value()?;
                    let method = rt.find_method(&receiver, name);
                    let args = semantics::pass_arguments(rt, method.as_deref(), passed, *line)?;
                    let result = rt.call_method(receiver, name, args, *line)?;
                    self.push(Operand::Value(result));
                }

                Op::Echo => {
                    let text = match self.pop()? {
                        Operand::Str(s) => s,
                        other => other.into_value().to_php_string(),
                    };
                    rt.echo(&text);
                }
                Op::Return => return self.pop_value(),

                Op::IterInit { by_ref, line } => {
                    let iteration = if *by_ref {
                        let subject = match self.pop()? {
                            Operand::Cell(cell) => cell,
                            other => AliasCell::new(other.into_value()),
                        };
                        let keys = semantics::iteration_keys(rt, &subject, *line)?;
                        Iteration::Refs {
                            subject,
                            keys: keys.into_iter(),
                        }
                    } else {
                        let subject = self.pop_value()?;
                        let items = semantics::iteration_items(rt, &subject, *line)?;
                        Iteration::Values(items.into_iter())
                    };
                    self.iterators.push(iteration);
                }
                Op::IterNext { end, key } => match self.next_element()? {
                    Some((element, k)) => {
                        self.push(element);
                        if *key {
                            self.push(Operand::Value(k));
                        }
                    }
                    None => pc = code.target(*end)?,
                },
                Op::IterFree => {
                    self.iterators
                        .pop()
                        .ok_or_else(|| stack_error("no open iteration"))?;
                }

                Op::OpenScope(_) => {
                    let prior = rt.set_error_reporting(false);
                    self.scopes.push(prior);
                }
                Op::CloseScope => {
                    let prior = self.scopes.pop().ok_or(InternalError::UnbalancedScope)?;
                    rt.set_error_reporting(prior);
                }
            }
        }
        Ok(Value::Null)
    }

    /// Pops the name operand of a dynamic variable reference
    fn dynamic_name(&mut self, var: &VarRef) -> Result<Option<String>, RuntimeError> {
        match var {
            VarRef::Dynamic => self.pop_name().map(Some),
            _ => Ok(None),
        }
    }

    fn load(
        &mut self,
        rt: &mut dyn Runtime,
        var: &VarRef,
        quiet: bool,
        line: u32,
    ) -> Result<Operand, RuntimeError> {
        let (name, value) = match var {
            VarRef::Local { slot, name } | VarRef::Cell { slot, name } => {
                let value = match slot_mut(&mut self.locals, *slot)? {
                    Local::Long(n) => return Ok(Operand::Long(*n)),
                    Local::Double(d) => return Ok(Operand::Double(*d)),
                    Local::Bool(b) => return Ok(Operand::Bool(*b)),
                    Local::Str(s) => return Ok(Operand::Str(s.clone())),
                    Local::Value(value) => value.clone(),
                    Local::Cell(cell) => cell.as_ref().map(AliasCell::get),
                };
                (name.clone(), value)
            }
            VarRef::Name(name) => {
                let value = semantics::read_named(rt, name, quiet, line)?;
                return Ok(Operand::Value(value));
            }
            VarRef::Dynamic => {
                let name = self.pop_name()?;
                let value = semantics::read_named(rt, &name, quiet, line)?;
                return Ok(Operand::Value(value));
            }
        };
        match value {
            Some(value) => Ok(Operand::Value(value)),
            None => {
                if !quiet {
                    rt.report(SemanticError::undefined_variable(&name, line))?;
                }
                Ok(Operand::Value(Value::Null))
            }
        }
    }

    fn store(
        &mut self,
        rt: &mut dyn Runtime,
        var: &VarRef,
        name: Option<String>,
        value: Value,
    ) -> Result<Operand, RuntimeError> {
        match var {
            VarRef::Local { slot, .. } | VarRef::Cell { slot, .. } => {
                Ok(slot_mut(&mut self.locals, *slot)?.store(value))
            }
            VarRef::Name(name) => {
                rt.set_value(name, value.copy());
                Ok(Operand::Value(value))
            }
            VarRef::Dynamic => {
                let name = name.ok_or_else(|| stack_error("missing variable name"))?;
                rt.set_value(&name, value.copy());
                Ok(Operand::Value(value))
            }
        }
    }

    fn reference(
        &mut self,
        rt: &mut dyn Runtime,
        var: &VarRef,
        name: Option<String>,
    ) -> Result<AliasCell, RuntimeError> {
        match var {
            VarRef::Cell { slot, .. } => match slot_mut(&mut self.locals, *slot)? {
                Local::Cell(cell) => Ok(cell.get_or_insert_with(AliasCell::default).clone()),
                _ => Err(stack_error(format!("slot {} holds no cell", slot))),
            },
            VarRef::Local { name, .. } => Err(InternalError::NotReferenceable {
                name: name.clone(),
                storage: "local".to_string(),
            }
            .into()),
            VarRef::Name(name) => Ok(rt.alias_cell(name)),
            VarRef::Dynamic => {
                let name = name.ok_or_else(|| stack_error("missing variable name"))?;
                Ok(rt.alias_cell(&name))
            }
        }
    }

    fn bind(
        &mut self,
        rt: &mut dyn Runtime,
        var: &VarRef,
        name: Option<String>,
        cell: AliasCell,
    ) -> Result<(), RuntimeError> {
        match var {
            VarRef::Cell { slot, .. } => {
                *slot_mut(&mut self.locals, *slot)? = Local::Cell(Some(cell));
                Ok(())
            }
            VarRef::Local { name, .. } => Err(InternalError::NotReferenceable {
                name: name.clone(),
                storage: "local".to_string(),
            }
            .into()),
            VarRef::Name(name) => {
                rt.bind_alias(name, cell);
                Ok(())
            }
            VarRef::Dynamic => {
                let name = name.ok_or_else(|| stack_error("missing variable name"))?;
                rt.bind_alias(&name, cell);
                Ok(())
            }
        }
    }

    /// Pop the operands of a place op and run `action` on it
    ///
    /// Returns the cell a reference yields or the result of an update;
    /// `None` when the place could not be reached.
    fn place(
        &mut self,
        rt: &mut dyn Runtime,
        path: &PlacePath,
        line: u32,
        action: PlaceAction,
    ) -> Result<Option<Operand>, RuntimeError> {
        let keys = self.pop_n(path.keys())?;
        let root_operand = match &path.root {
            PlaceRoot::Temp | PlaceRoot::Var(VarRef::Dynamic) => Some(self.pop()?),
            PlaceRoot::Var(_) => None,
        };

        let mut keys = keys.into_iter().map(Operand::into_value);
        let mut steps = Vec::with_capacity(path.steps.len());
        let mut legal = true;
        for step in &path.steps {
            match step {
                PlaceStep::Index { line } => {
                    let offset = keys.next().unwrap_or_default();
                    match semantics::offset_key(rt, &offset, *line)? {
                        Some(key) => steps.push(Step::Index(key)),
                        None => legal = false,
                    }
                }
                PlaceStep::Append => steps.push(Step::Append),
                PlaceStep::Field(name) => steps.push(Step::Field(name.clone())),
            }
        }
        if !legal {
            return Ok(None);
        }

        let vivify = !matches!(action, PlaceAction::Unset);
        let Some(root) = resolve_root(&mut self.locals, rt, &path.root, root_operand, vivify)?
        else {
            return Ok(None);
        };
        match action {
            PlaceAction::Assign(value) => {
                place::assign(rt, root, &steps, value, line)?;
                Ok(None)
            }
            PlaceAction::Reference => {
                let cell = place::reference(rt, root, &steps, line)?;
                Ok(Some(Operand::Cell(cell)))
            }
            PlaceAction::Bind(cell) => {
                place::bind(rt, root, &steps, cell, line)?;
                Ok(None)
            }
            PlaceAction::Update(op, operand) => {
                let result = place::update(rt, root, &steps, line, true, |current| {
                    op.apply(current, operand.as_ref())
                })?;
                Ok(result.map(Operand::Value))
            }
            PlaceAction::Unset => {
                place::unset(rt, root, &steps, line)?;
                Ok(None)
            }
        }
    }

    fn call_named(
        &mut self,
        rt: &mut dyn Runtime,
        name: &str,
        argc: usize,
        line: u32,
    ) -> Result<Value, RuntimeError> {
        let passed = self.pop_passed(argc)?;
        let callee = rt.lookup_function(name);
        let args = semantics::pass_arguments(rt, callee.as_deref(), passed, line)?;
        rt.call_function(name, args, line)
    }

    fn next_element(&mut self) -> Result<Option<(Operand, Value)>, RuntimeError> {
        let iteration = self
            .iterators
            .last_mut()
            .ok_or_else(|| stack_error("no open iteration"))?;
        Ok(match iteration {
            Iteration::Values(items) => items.next().map(|(k, v)| (Operand::Value(v), k)),
            Iteration::Refs { subject, keys } => keys.find_map(|k| {
                semantics::element_ref(subject, &k).map(|cell| (Operand::Cell(cell), k.to_value()))
            }),
        })
    }
}

/// Overflowing `+ - *` give a boxed double, everything else a long
fn long_op(op: LongOp, a: i64, b: i64) -> Result<Operand, RuntimeError> {
    let boxed = |checked: Option<i64>, exact: f64| {
        Operand::Value(checked.map_or(Value::Double(exact), Value::Long))
    };
    Ok(Operand::Long(match op {
        LongOp::Add => return Ok(boxed(a.checked_add(b), a as f64 + b as f64)),
        LongOp::Sub => return Ok(boxed(a.checked_sub(b), a as f64 - b as f64)),
        LongOp::Mul => return Ok(boxed(a.checked_mul(b), a as f64 * b as f64)),
        LongOp::Mod => {
            if b == 0 {
                return Err(RuntimeError::ModuloByZero);
            }
            a.wrapping_rem(b)
        }
        LongOp::BitAnd => a & b,
        LongOp::BitOr => a | b,
        LongOp::BitXor => a ^ b,
        LongOp::Shl => shift_left(a, b)?,
        LongOp::Shr => shift_right(a, b)?,
    }))
}
