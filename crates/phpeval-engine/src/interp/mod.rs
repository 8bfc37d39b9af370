//! Tree-walking evaluation
//!
//! [`Evaluate`] gives every expression node its evaluation facets: value,
//! typed reads, reference, container slots, assignment, reference binding
//! and unset. Statements run through [`exec_block`].

mod function;
mod stmt;
mod suppress;

pub use function::InterpretedFunction;
pub use stmt::{exec_block, Flow};
pub use suppress::SuppressGuard;

use phpeval_core::ast::{BinaryOp, CastKind, Expr, ExprKind, Literal, UnaryOp};
use phpeval_core::value::{shift_left, shift_right, AliasCell, PhpArray, PhpString, Value};
use phpeval_core::{InternalError, Runtime, RuntimeError};

use crate::place::{self, ContainerKind, Root, Step, UpdateOp};
use crate::semantics::{self, Passed};

/// Evaluation facets of an expression node
pub trait Evaluate {
    fn eval_value(&self, rt: &mut dyn Runtime) -> Result<Value, RuntimeError>;

    fn eval_bool(&self, rt: &mut dyn Runtime) -> Result<bool, RuntimeError>;

    fn eval_long(&self, rt: &mut dyn Runtime) -> Result<i64, RuntimeError>;

    fn eval_double(&self, rt: &mut dyn Runtime) -> Result<f64, RuntimeError>;

    fn eval_string(&self, rt: &mut dyn Runtime) -> Result<PhpString, RuntimeError>;

    /// The storage location the node denotes, created if missing
    ///
    /// Nodes that denote no location yield a fresh cell holding their value.
    fn eval_ref(&self, rt: &mut dyn Runtime) -> Result<AliasCell, RuntimeError>;

    /// The node's value after turning a null location into an empty array
    fn eval_array_slot(&self, rt: &mut dyn Runtime) -> Result<Value, RuntimeError>;

    /// The node's value after turning a null location into a `stdClass`
    fn eval_object_slot(&self, rt: &mut dyn Runtime) -> Result<Value, RuntimeError>;

    /// Store a copy of `value`; returns the stored value
    fn assign(&self, rt: &mut dyn Runtime, value: Value) -> Result<Value, RuntimeError>;

    /// Make the node's location share `cell`
    fn assign_ref(&self, rt: &mut dyn Runtime, cell: AliasCell) -> Result<(), RuntimeError>;

    fn unset(&self, rt: &mut dyn Runtime) -> Result<(), RuntimeError>;
}

/// A resolved place: root cell plus the evaluated path
struct Place {
    root: AliasCell,
    path: Vec<Step>,
}

impl Place {
    fn root(&self) -> Root<'static> {
        Root::Cell(self.root.clone())
    }
}

fn dynamic_name(name: &Expr, rt: &mut dyn Runtime) -> Result<String, RuntimeError> {
    Ok(name.eval_string(rt)?.to_str_lossy().into_owned())
}

fn root_cell(rt: &mut dyn Runtime, name: &str, vivify: bool) -> Option<AliasCell> {
    if vivify {
        Some(rt.alias_cell(name))
    } else {
        rt.find_alias_cell(name)
    }
}

/// Resolve the node as a place, evaluating keys left to right
///
/// Returns `None` when the root does not exist and `vivify` is off, or
/// when an offset was illegal (reported).
fn place(e: &Expr, rt: &mut dyn Runtime, vivify: bool) -> Result<Option<Place>, RuntimeError> {
    let (base, step) = match &e.kind {
        ExprKind::Var(name) => {
            let root = root_cell(rt, name, vivify);
            return Ok(root.map(|root| Place { root, path: Vec::new() }));
        }
        ExprKind::VarVar(name) => {
            let name = dynamic_name(name, rt)?;
            let root = root_cell(rt, &name, vivify);
            return Ok(root.map(|root| Place { root, path: Vec::new() }));
        }
        ExprKind::ArrayGet { base, index } => {
            let place = place(base, rt, vivify)?;
            let offset = index.eval_value(rt)?;
            let Some(key) = semantics::offset_key(rt, &offset, e.line)? else {
                return Ok(None);
            };
            (place, Step::Index(key))
        }
        ExprKind::ArrayTail { base } => (place(base, rt, vivify)?, Step::Append),
        ExprKind::FieldGet { base, name } => (place(base, rt, vivify)?, Step::Field(name.clone())),
        _ => {
            let value = e.eval_value(rt)?;
            return Ok(Some(Place {
                root: AliasCell::new(value),
                path: Vec::new(),
            }));
        }
    };
    Ok(base.map(|mut place| {
        place.path.push(step);
        place
    }))
}

/// Value in `isset` context: undefined variables, keys and properties
/// are not reported
pub(crate) fn eval_quiet(e: &Expr, rt: &mut dyn Runtime) -> Result<Value, RuntimeError> {
    match &e.kind {
        ExprKind::Var(name) => semantics::read_named(rt, name, true, e.line),
        ExprKind::VarVar(name) => {
            let name = dynamic_name(name, rt)?;
            semantics::read_named(rt, &name, true, e.line)
        }
        ExprKind::ArrayGet { base, index } => {
            let base = eval_quiet(base, rt)?;
            let index = index.eval_value(rt)?;
            semantics::read_element(rt, &base, &index, true, e.line)
        }
        ExprKind::FieldGet { base, name } => {
            let base = eval_quiet(base, rt)?;
            semantics::read_field(rt, &base, name, true, e.line)
        }
        _ => e.eval_value(rt),
    }
}

fn slot(e: &Expr, rt: &mut dyn Runtime, kind: ContainerKind) -> Result<Value, RuntimeError> {
    match place(e, rt, true)? {
        None => Ok(Value::Null),
        Some(place) if place.path.is_empty() => {
            let mut value = place.root.borrow_mut();
            Ok(place::vivify_value(&mut value, kind))
        }
        Some(place) => place::vivify(rt, place.root(), &place.path, kind, e.line),
    }
}

/// Evaluate call arguments, by reference where `by_ref` says so
fn pass(
    rt: &mut dyn Runtime,
    args: &[Expr],
    by_ref: impl Fn(usize, &Expr) -> bool,
) -> Result<Vec<Passed>, RuntimeError> {
    let mut passed = Vec::with_capacity(args.len());
    for (index, arg) in args.iter().enumerate() {
        passed.push(if by_ref(index, arg) {
            Passed::Cell(arg.eval_ref(rt)?)
        } else {
            Passed::Value(arg.eval_value(rt)?)
        });
    }
    Ok(passed)
}

fn call(e: &Expr, rt: &mut dyn Runtime, name: &str, args: &[Expr]) -> Result<Value, RuntimeError> {
    let callee = rt.lookup_function(name);
    let passed = pass(rt, args, |index, arg| match &callee {
        Some(callee) => callee.param_by_ref(index) && arg.is_assignable(),
        None => arg.var_name().is_some(),
    })?;
    let args = semantics::pass_arguments(rt, callee.as_deref(), passed, e.line)?;
    rt.call_function(name, args, e.line)
}

fn method_call(
    e: &Expr,
    rt: &mut dyn Runtime,
    receiver: &Expr,
    name: &str,
    args: &[Expr],
) -> Result<Value, RuntimeError> {
    let receiver = receiver.eval_value(rt)?;
    let passed = pass(rt, args, |_, arg| arg.var_name().is_some())?;
    let method = rt.find_method(&receiver, name);
    let args = semantics::pass_arguments(rt, method.as_deref(), passed, e.line)?;
    rt.call_method(receiver, name, args, e.line)
}

fn binary(
    rt: &mut dyn Runtime,
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
) -> Result<Value, RuntimeError> {
    match op {
        BinaryOp::And => Ok(Value::Bool(left.eval_bool(rt)? && right.eval_bool(rt)?)),
        BinaryOp::Or => Ok(Value::Bool(left.eval_bool(rt)? || right.eval_bool(rt)?)),
        BinaryOp::Xor => {
            let l = left.eval_bool(rt)?;
            let r = right.eval_bool(rt)?;
            Ok(Value::Bool(l ^ r))
        }
        BinaryOp::Coalesce => {
            let l = eval_quiet(left, rt)?;
            if l.is_set() {
                Ok(l)
            } else {
                right.eval_value(rt)
            }
        }
        BinaryOp::Concat => {
            let parts = [left.eval_string(rt)?, right.eval_string(rt)?];
            Ok(Value::String(semantics::concat_all(&parts)))
        }
        _ => {
            let l = left.eval_value(rt)?;
            let r = right.eval_value(rt)?;
            l.binary_op(op, &r)
        }
    }
}

fn compound(
    e: &Expr,
    rt: &mut dyn Runtime,
    op: BinaryOp,
    target: &Expr,
    value: &Expr,
) -> Result<Value, RuntimeError> {
    if op == BinaryOp::Coalesce {
        let current = eval_quiet(target, rt)?;
        if current.is_set() {
            return Ok(current);
        }
        return store(rt, target, value);
    }
    match &target.kind {
        ExprKind::Var(name) => {
            let current = target.eval_value(rt)?;
            let operand = value.eval_value(rt)?;
            let result = current.binary_op(op, &operand)?;
            rt.set_value(name, result.clone());
            Ok(result)
        }
        ExprKind::VarVar(name) => {
            let name = dynamic_name(name, rt)?;
            let current = semantics::read_named(rt, &name, false, target.line)?;
            let operand = value.eval_value(rt)?;
            let result = current.binary_op(op, &operand)?;
            rt.set_value(&name, result.clone());
            Ok(result)
        }
        ExprKind::ArrayGet { .. } | ExprKind::ArrayTail { .. } | ExprKind::FieldGet { .. } => {
            let place = place(target, rt, true)?;
            let operand = value.eval_value(rt)?;
            let Some(place) = place else {
                return Ok(Value::Null);
            };
            let result = place::update(rt, place.root(), &place.path, e.line, true, |current| {
                UpdateOp::Binary(op).apply(current, Some(&operand))
            })?;
            Ok(result.unwrap_or_default())
        }
        other => Err(InternalError::NotAssignable(other.name()).into()),
    }
}

fn step(e: &Expr, rt: &mut dyn Runtime, target: &Expr, op: UpdateOp) -> Result<Value, RuntimeError> {
    match &target.kind {
        ExprKind::Var(name) => {
            let current = target.eval_value(rt)?;
            let (stored, result) = op.apply(current, None)?;
            rt.set_value(name, stored);
            Ok(result)
        }
        ExprKind::VarVar(name) => {
            let name = dynamic_name(name, rt)?;
            let current = semantics::read_named(rt, &name, false, target.line)?;
            let (stored, result) = op.apply(current, None)?;
            rt.set_value(&name, stored);
            Ok(result)
        }
        ExprKind::ArrayGet { .. } | ExprKind::ArrayTail { .. } | ExprKind::FieldGet { .. } => {
            let Some(place) = place(target, rt, true)? else {
                return Ok(Value::Null);
            };
            let result = place::update(rt, place.root(), &place.path, e.line, true, |current| {
                op.apply(current, None)
            })?;
            Ok(result.unwrap_or_default())
        }
        other => Err(InternalError::NotAssignable(other.name()).into()),
    }
}

/// `target = value` with the place resolved before the value
fn store(rt: &mut dyn Runtime, target: &Expr, value: &Expr) -> Result<Value, RuntimeError> {
    match &target.kind {
        ExprKind::Var(_) | ExprKind::VarVar(_) => {
            let value = value.eval_value(rt)?;
            target.assign(rt, value)
        }
        ExprKind::ArrayGet { .. } | ExprKind::ArrayTail { .. } | ExprKind::FieldGet { .. } => {
            let place = place(target, rt, true)?;
            let value = value.eval_value(rt)?.copy();
            if let Some(place) = place {
                place::assign(rt, place.root(), &place.path, value.clone(), target.line)?;
            }
            Ok(value)
        }
        other => Err(InternalError::NotAssignable(other.name()).into()),
    }
}

fn array_literal(
    e: &Expr,
    rt: &mut dyn Runtime,
    items: &[phpeval_core::ast::ArrayItem],
) -> Result<Value, RuntimeError> {
    let mut array = PhpArray::new();
    for item in items {
        let key = match &item.key {
            Some(key) => Some(key.eval_value(rt)?),
            None => None,
        };
        let value = if item.by_ref {
            Passed::Cell(item.value.eval_ref(rt)?)
        } else {
            Passed::Value(item.value.eval_value(rt)?)
        };
        semantics::insert_item(rt, &mut array, key.as_ref(), value, e.line)?;
    }
    Ok(Value::array(array))
}

fn list(
    e: &Expr,
    rt: &mut dyn Runtime,
    head: &phpeval_core::ast::ListHead,
    value: &Expr,
) -> Result<Value, RuntimeError> {
    let source = value.eval_value(rt)?;
    for (position, item) in head.items.iter().enumerate() {
        let Some(item) = item else {
            continue;
        };
        let key = match &item.key {
            Some(key) => key.eval_value(rt)?,
            None => Value::Long(position as i64),
        };
        let element = semantics::list_element(rt, &source, &key, e.line)?;
        item.target.assign(rt, element)?;
    }
    Ok(source)
}

impl Evaluate for Expr {
    fn eval_value(&self, rt: &mut dyn Runtime) -> Result<Value, RuntimeError> {
        match &self.kind {
            ExprKind::Literal(literal) => Ok(Value::from_literal(literal)),
            ExprKind::Var(name) => semantics::read_named(rt, name, false, self.line),
            ExprKind::VarVar(name) => {
                let name = dynamic_name(name, rt)?;
                semantics::read_named(rt, &name, false, self.line)
            }
            ExprKind::This => semantics::this(rt, self.line),
            ExprKind::Binary { op, left, right } => binary(rt, *op, left, right),
            ExprKind::Unary { op, expr } => match op {
                UnaryOp::Not => Ok(Value::Bool(!expr.eval_bool(rt)?)),
                UnaryOp::Neg => expr.eval_value(rt)?.neg(),
                UnaryOp::Plus => expr.eval_value(rt)?.plus(),
                UnaryOp::BitNot => expr.eval_value(rt)?.bit_not(),
            },
            ExprKind::Concat(_) => Ok(Value::String(self.eval_string(rt)?)),
            ExprKind::ArrayLiteral(items) => array_literal(self, rt, items),
            ExprKind::ArrayGet { base, index } => {
                let base = base.eval_value(rt)?;
                let index = index.eval_value(rt)?;
                semantics::read_element(rt, &base, &index, false, self.line)
            }
            ExprKind::ArrayTail { base } => {
                base.eval_value(rt)?;
                semantics::append_read(rt, self.line)
            }
            ExprKind::FieldGet { base, name } => {
                let base = base.eval_value(rt)?;
                semantics::read_field(rt, &base, name, false, self.line)
            }
            ExprKind::MethodCall { receiver, name, args } => {
                method_call(self, rt, receiver, name, args)
            }
            ExprKind::Call { name, args } => call(self, rt, name, args),
            ExprKind::Assign { target, value } => store(rt, target, value),
            ExprKind::AssignRef { target, value } => {
                let cell = value.eval_ref(rt)?;
                target.assign_ref(rt, cell.clone())?;
                Ok(cell.get())
            }
            ExprKind::AssignOp { op, target, value } => compound(self, rt, *op, target, value),
            ExprKind::Conditional {
                test,
                then,
                otherwise,
            } => match then {
                Some(then) => {
                    if test.eval_bool(rt)? {
                        then.eval_value(rt)
                    } else {
                        otherwise.eval_value(rt)
                    }
                }
                None => {
                    let value = test.eval_value(rt)?;
                    if value.to_bool() {
                        Ok(value)
                    } else {
                        otherwise.eval_value(rt)
                    }
                }
            },
            ExprKind::List { head, value } => list(self, rt, head, value),
            ExprKind::IncDec {
                target,
                increment,
                prefix,
            } => {
                let op = if *increment {
                    UpdateOp::Increment { prefix: *prefix }
                } else {
                    UpdateOp::Decrement { prefix: *prefix }
                };
                step(self, rt, target, op)
            }
            ExprKind::Suppress(inner) => {
                let mut guard = SuppressGuard::new(rt);
                inner.eval_value(guard.runtime())
            }
            ExprKind::Cast { kind, expr } => match kind {
                CastKind::Long => Ok(Value::Long(expr.eval_long(rt)?)),
                CastKind::Double => Ok(Value::Double(expr.eval_double(rt)?)),
                CastKind::Bool => Ok(Value::Bool(expr.eval_bool(rt)?)),
                CastKind::String => Ok(Value::String(expr.eval_string(rt)?)),
                _ => Ok(expr.eval_value(rt)?.cast(*kind)),
            },
            ExprKind::Isset(exprs) => {
                for e in exprs {
                    if !eval_quiet(e, rt)?.is_set() {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            ExprKind::Empty(expr) => Ok(Value::Bool(!eval_quiet(expr, rt)?.to_bool())),
        }
    }

    fn eval_bool(&self, rt: &mut dyn Runtime) -> Result<bool, RuntimeError> {
        match &self.kind {
            ExprKind::Literal(Literal::Bool(b)) => Ok(*b),
            ExprKind::Unary {
                op: UnaryOp::Not,
                expr,
            } => Ok(!expr.eval_bool(rt)?),
            ExprKind::Binary { op, left, right } if op.is_comparison() => {
                let l = left.eval_value(rt)?;
                let r = right.eval_value(rt)?;
                Ok(l.compare(*op, &r))
            }
            ExprKind::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => Ok(left.eval_bool(rt)? && right.eval_bool(rt)?),
            ExprKind::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => Ok(left.eval_bool(rt)? || right.eval_bool(rt)?),
            ExprKind::Binary {
                op: BinaryOp::Xor,
                left,
                right,
            } => {
                let l = left.eval_bool(rt)?;
                Ok(l ^ right.eval_bool(rt)?)
            }
            ExprKind::Isset(exprs) => {
                for e in exprs {
                    if !eval_quiet(e, rt)?.is_set() {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            ExprKind::Empty(expr) => Ok(!eval_quiet(expr, rt)?.to_bool()),
            ExprKind::Cast {
                kind: CastKind::Bool,
                expr,
            } => expr.eval_bool(rt),
            _ => Ok(self.eval_value(rt)?.to_bool()),
        }
    }

    fn eval_long(&self, rt: &mut dyn Runtime) -> Result<i64, RuntimeError> {
        match &self.kind {
            ExprKind::Literal(Literal::Long(n)) => Ok(*n),
            ExprKind::Binary {
                op: op @ (BinaryOp::Mod | BinaryOp::Shl | BinaryOp::Shr),
                left,
                right,
            } => {
                let l = left.eval_value(rt)?;
                let r = right.eval_value(rt)?;
                match (op, &l, &r) {
                    (BinaryOp::Mod, Value::Long(_), Value::Long(0)) => {
                        Err(RuntimeError::ModuloByZero)
                    }
                    (BinaryOp::Mod, Value::Long(a), Value::Long(b)) => Ok(a.wrapping_rem(*b)),
                    (BinaryOp::Shl, Value::Long(a), Value::Long(b)) => Ok(shift_left(*a, *b)?),
                    (BinaryOp::Shr, Value::Long(a), Value::Long(b)) => Ok(shift_right(*a, *b)?),
                    // string and double operands go through the boxed conversion
                    _ => Ok(l.binary_op(*op, &r)?.to_long()),
                }
            }
            ExprKind::Cast {
                kind: CastKind::Long,
                expr,
            } => expr.eval_long(rt),
            _ => Ok(self.eval_value(rt)?.to_long()),
        }
    }

    fn eval_double(&self, rt: &mut dyn Runtime) -> Result<f64, RuntimeError> {
        match &self.kind {
            ExprKind::Literal(Literal::Double(d)) => Ok(*d),
            ExprKind::Cast {
                kind: CastKind::Double,
                expr,
            } => expr.eval_double(rt),
            _ => Ok(self.eval_value(rt)?.to_double()),
        }
    }

    fn eval_string(&self, rt: &mut dyn Runtime) -> Result<PhpString, RuntimeError> {
        match &self.kind {
            ExprKind::Literal(Literal::String(s)) => Ok(PhpString::from(s.as_str())),
            ExprKind::Concat(chain) => {
                let mut parts = Vec::with_capacity(chain.len());
                for part in chain.parts() {
                    parts.push(part.eval_string(rt)?);
                }
                Ok(semantics::concat_all(&parts))
            }
            ExprKind::Cast {
                kind: CastKind::String,
                expr,
            } => expr.eval_string(rt),
            _ => Ok(self.eval_value(rt)?.to_php_string()),
        }
    }

    fn eval_ref(&self, rt: &mut dyn Runtime) -> Result<AliasCell, RuntimeError> {
        match &self.kind {
            ExprKind::Var(name) => Ok(rt.alias_cell(name)),
            ExprKind::VarVar(name) => {
                let name = dynamic_name(name, rt)?;
                Ok(rt.alias_cell(&name))
            }
            ExprKind::ArrayGet { .. } | ExprKind::ArrayTail { .. } | ExprKind::FieldGet { .. } => {
                match place(self, rt, true)? {
                    Some(place) => place::reference(rt, place.root(), &place.path, self.line),
                    None => Ok(AliasCell::default()),
                }
            }
            _ => Ok(AliasCell::new(self.eval_value(rt)?)),
        }
    }

    fn eval_array_slot(&self, rt: &mut dyn Runtime) -> Result<Value, RuntimeError> {
        slot(self, rt, ContainerKind::Array)
    }

    fn eval_object_slot(&self, rt: &mut dyn Runtime) -> Result<Value, RuntimeError> {
        slot(self, rt, ContainerKind::Object)
    }

    fn assign(&self, rt: &mut dyn Runtime, value: Value) -> Result<Value, RuntimeError> {
        match &self.kind {
            ExprKind::Var(name) => {
                rt.set_value(name, value.copy());
                Ok(value)
            }
            ExprKind::VarVar(name) => {
                let name = dynamic_name(name, rt)?;
                rt.set_value(&name, value.copy());
                Ok(value)
            }
            ExprKind::ArrayGet { .. } | ExprKind::ArrayTail { .. } | ExprKind::FieldGet { .. } => {
                if let Some(place) = place(self, rt, true)? {
                    place::assign(rt, place.root(), &place.path, value.copy(), self.line)?;
                }
                Ok(value)
            }
            other => Err(InternalError::NotAssignable(other.name()).into()),
        }
    }

    fn assign_ref(&self, rt: &mut dyn Runtime, cell: AliasCell) -> Result<(), RuntimeError> {
        match &self.kind {
            ExprKind::Var(name) => {
                rt.bind_alias(name, cell);
                Ok(())
            }
            ExprKind::VarVar(name) => {
                let name = dynamic_name(name, rt)?;
                rt.bind_alias(&name, cell);
                Ok(())
            }
            ExprKind::ArrayGet { .. } | ExprKind::ArrayTail { .. } | ExprKind::FieldGet { .. } => {
                match place(self, rt, true)? {
                    Some(place) => place::bind(rt, place.root(), &place.path, cell, self.line),
                    None => Ok(()),
                }
            }
            other => Err(InternalError::NotAssignable(other.name()).into()),
        }
    }

    fn unset(&self, rt: &mut dyn Runtime) -> Result<(), RuntimeError> {
        match &self.kind {
            ExprKind::Var(name) => {
                rt.unset(name);
                Ok(())
            }
            ExprKind::VarVar(name) => {
                let name = dynamic_name(name, rt)?;
                rt.unset(&name);
                Ok(())
            }
            ExprKind::ArrayGet { .. } | ExprKind::FieldGet { .. } => match place(self, rt, false)? {
                Some(place) => place::unset(rt, place.root(), &place.path, self.line),
                None => Ok(()),
            },
            other => Err(InternalError::NotUnsettable(other.name()).into()),
        }
    }
}
