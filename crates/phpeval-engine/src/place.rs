//! Writable locations reached through element and property steps
//!
//! A place is a root (a private value slot or an alias cell) plus a path of
//! [`Step`]s. Writes walk the path, turning null intermediates into arrays
//! (or `stdClass` objects for property steps), and apply their final
//! operation to the container of the last step.
//!
//! The walk never holds a borrow of one alias cell or object while entering
//! another, so paths through self-referential structures are safe.

use phpeval_core::ast::BinaryOp;
use phpeval_core::value::{AliasCell, ArrayKey, Entry, EntryMut, ObjectRef, PhpArray, Value};
use phpeval_core::{ErrorKind, Runtime, RuntimeError, SemanticError};

/// One step of a place path
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// `[key]`
    Index(ArrayKey),
    /// `[]`
    Append,
    /// `->name`
    Field(String),
}

impl Step {
    /// Key addressing this step in `container`; `None` when an append finds
    /// the array full
    fn key_in(&self, container: &PhpArray) -> Option<ArrayKey> {
        match self {
            Step::Index(key) => Some(key.clone()),
            Step::Field(name) => Some(ArrayKey::from(name.as_str())),
            Step::Append => container.next_key(),
        }
    }
}

/// Where a walk starts
pub enum Root<'v> {
    Slot(&'v mut Value),
    Cell(AliasCell),
}

/// Kind of container created for a missing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Array,
    Object,
}

/// Read-modify-write operations on a single location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Binary(BinaryOp),
    Increment { prefix: bool },
    Decrement { prefix: bool },
}

impl UpdateOp {
    /// New value to store and the value of the whole expression
    pub fn apply(self, current: Value, operand: Option<&Value>) -> Result<(Value, Value), RuntimeError> {
        match self {
            UpdateOp::Binary(op) => {
                let operand = operand.cloned().unwrap_or_default();
                let result = current.binary_op(op, &operand)?;
                Ok((result.clone(), result))
            }
            UpdateOp::Increment { prefix } => {
                let next = current.increment();
                Ok(stepped(current, next, prefix))
            }
            UpdateOp::Decrement { prefix } => {
                let next = current.decrement();
                Ok(stepped(current, next, prefix))
            }
        }
    }
}

fn stepped(current: Value, next: Value, prefix: bool) -> (Value, Value) {
    if prefix {
        (next.clone(), next)
    } else {
        (next, current)
    }
}

enum Anchor {
    Cell(AliasCell),
    Object(ObjectRef),
}

enum Walk<'s, R> {
    Done(R),
    Enter(Anchor, &'s [Step]),
    Missing,
    Fail(SemanticError),
}

/// Walk `path` from `root` and run `f` on the container of the last step
///
/// `f` receives the container, the last step and, for property steps, the
/// owning object's class. Returns `Ok(None)` when the walk stopped short:
/// a missing intermediate without `vivify`, or a scalar where a container
/// was needed (reported).
pub fn with_container<R>(
    rt: &mut dyn Runtime,
    root: Root<'_>,
    path: &[Step],
    vivify: bool,
    line: u32,
    f: impl FnOnce(&mut PhpArray, &Step, Option<&str>) -> R,
) -> Result<Option<R>, RuntimeError> {
    let mut f = Some(f);
    let mut walk = match root {
        Root::Slot(value) => descend(value, path, vivify, line, &mut f),
        Root::Cell(cell) => Walk::Enter(Anchor::Cell(cell), path),
    };
    loop {
        walk = match walk {
            Walk::Done(result) => return Ok(Some(result)),
            Walk::Missing => return Ok(None),
            Walk::Fail(error) => {
                rt.report(error)?;
                return Ok(None);
            }
            Walk::Enter(Anchor::Cell(cell), rest) => {
                let mut value = cell.borrow_mut();
                descend(&mut value, rest, vivify, line, &mut f)
            }
            Walk::Enter(Anchor::Object(object), rest) => {
                let mut object = object.borrow_mut();
                let object = &mut *object;
                descend_fields(
                    &mut object.fields,
                    &object.class_name,
                    rest,
                    vivify,
                    line,
                    &mut f,
                )
            }
        };
    }
}

fn descend<'s, R, F>(
    value: &mut Value,
    path: &'s [Step],
    vivify: bool,
    line: u32,
    f: &mut Option<F>,
) -> Walk<'s, R>
where
    F: FnOnce(&mut PhpArray, &Step, Option<&str>) -> R,
{
    let Some((step, rest)) = path.split_first() else {
        return Walk::Missing;
    };

    if let Step::Field(name) = step {
        if vivify && value.is_null() {
            *value = Value::Object(ObjectRef::std_class());
        }
        return match value {
            Value::Object(object) => Walk::Enter(Anchor::Object(object.clone()), path),
            Value::Null => Walk::Missing,
            other => Walk::Fail(SemanticError::new(
                ErrorKind::ScalarAsContainer,
                format!(
                    "Attempt to assign property \"{}\" on {}",
                    name,
                    other.type_name()
                ),
                line,
            )),
        };
    }

    if vivify && value.is_null() {
        *value = Value::empty_array();
    }
    match value {
        Value::Array(_) => {}
        Value::Null => return Walk::Missing,
        Value::Object(object) => {
            return Walk::Fail(SemanticError::new(
                ErrorKind::ScalarAsContainer,
                format!("Cannot use object of type {} as array", object.class_name()),
                line,
            ))
        }
        _ => {
            return Walk::Fail(SemanticError::new(
                ErrorKind::ScalarAsContainer,
                "Cannot use a scalar value as an array",
                line,
            ))
        }
    }
    let Some(array) = value.array_mut() else {
        return Walk::Missing;
    };
    if rest.is_empty() {
        return match f.take() {
            Some(f) => Walk::Done(f(array, step, None)),
            None => Walk::Missing,
        };
    }
    let Some(key) = step.key_in(array) else {
        return Walk::Fail(array_full(line));
    };
    match array.entry_mut(key, vivify) {
        None => Walk::Missing,
        Some(EntryMut::Value(inner)) => descend(inner, rest, vivify, line, f),
        Some(EntryMut::Ref(cell)) => Walk::Enter(Anchor::Cell(cell), rest),
    }
}

fn descend_fields<'s, R, F>(
    fields: &mut PhpArray,
    class_name: &str,
    path: &'s [Step],
    vivify: bool,
    line: u32,
    f: &mut Option<F>,
) -> Walk<'s, R>
where
    F: FnOnce(&mut PhpArray, &Step, Option<&str>) -> R,
{
    let Some((step, rest)) = path.split_first() else {
        return Walk::Missing;
    };
    if rest.is_empty() {
        return match f.take() {
            Some(f) => Walk::Done(f(fields, step, Some(class_name))),
            None => Walk::Missing,
        };
    }
    let Some(key) = step.key_in(fields) else {
        return Walk::Missing;
    };
    match fields.entry_mut(key, vivify) {
        None => Walk::Missing,
        Some(EntryMut::Value(inner)) => descend(inner, rest, vivify, line, f),
        Some(EntryMut::Ref(cell)) => Walk::Enter(Anchor::Cell(cell), rest),
    }
}

pub(crate) fn array_full(line: u32) -> SemanticError {
    SemanticError::new(
        ErrorKind::ArrayFull,
        "Cannot add element to the array as the next element is already occupied",
        line,
    )
}

fn append_read(line: u32) -> SemanticError {
    SemanticError::new(ErrorKind::AppendRead, "Cannot use [] for reading", line)
}

/// Warning for an update of an element or property that did not exist
pub(crate) fn missing_element(step: &Step, key: &ArrayKey, class: Option<&str>, line: u32) -> SemanticError {
    match (step, class) {
        (Step::Field(name), Some(class)) => SemanticError::new(
            ErrorKind::UndefinedProperty,
            format!("Undefined property: {}::${}", class, name),
            line,
        ),
        _ => SemanticError::new(
            ErrorKind::UndefinedIndex,
            format!("Undefined array key {}", key),
            line,
        ),
    }
}

/// Replace a null slot with a fresh container and return the slot's value
pub fn vivify_value(value: &mut Value, kind: ContainerKind) -> Value {
    if value.is_null() {
        *value = match kind {
            ContainerKind::Array => Value::empty_array(),
            ContainerKind::Object => Value::Object(ObjectRef::std_class()),
        };
    }
    value.clone()
}

/// Store a copy of `value` at the place
pub fn assign(
    rt: &mut dyn Runtime,
    root: Root<'_>,
    path: &[Step],
    value: Value,
    line: u32,
) -> Result<(), RuntimeError> {
    let outcome = with_container(rt, root, path, true, line, |container, step, _| {
        let Some(key) = step.key_in(container) else {
            return Err(array_full(line));
        };
        match container.get_entry(&key) {
            Some(Entry::Ref(cell)) => Ok(Some((cell.clone(), value))),
            _ => {
                container.insert(key, value);
                Ok(None)
            }
        }
    })?;
    match outcome {
        Some(Ok(Some((cell, value)))) => cell.set(value),
        Some(Err(error)) => rt.report(error)?,
        _ => {}
    }
    Ok(())
}

/// Alias cell of the element or property at the place, created if missing
///
/// A place that cannot be reached yields a detached cell.
pub fn reference(
    rt: &mut dyn Runtime,
    root: Root<'_>,
    path: &[Step],
    line: u32,
) -> Result<AliasCell, RuntimeError> {
    let outcome = with_container(rt, root, path, true, line, |container, step, _| {
        match step.key_in(container) {
            Some(key) => Ok(container.get_ref(key)),
            None => Err(array_full(line)),
        }
    })?;
    match outcome {
        Some(Ok(cell)) => Ok(cell),
        Some(Err(error)) => {
            rt.report(error)?;
            Ok(AliasCell::default())
        }
        None => Ok(AliasCell::default()),
    }
}

/// Make the element or property at the place share `cell`
pub fn bind(
    rt: &mut dyn Runtime,
    root: Root<'_>,
    path: &[Step],
    cell: AliasCell,
    line: u32,
) -> Result<(), RuntimeError> {
    let outcome = with_container(rt, root, path, true, line, |container, step, _| {
        match step {
            Step::Append => container.push_ref(cell).map(|_| ()).ok_or_else(|| array_full(line)),
            _ => match step.key_in(container) {
                Some(key) => {
                    container.set_ref(key, cell);
                    Ok(())
                }
                None => Err(array_full(line)),
            },
        }
    })?;
    if let Some(Err(error)) = outcome {
        rt.report(error)?;
    }
    Ok(())
}

enum Updated<F> {
    Done(Result<(Value, Option<SemanticError>), RuntimeError>),
    Through(AliasCell, F),
    Failed(SemanticError),
}

/// Read-modify-write of the element or property at the place
///
/// `op` maps the current value to the value to store and the result of the
/// expression. A missing element counts as null and is reported when
/// `warn_missing` is set. Returns `None` when the place could not be reached.
pub fn update(
    rt: &mut dyn Runtime,
    root: Root<'_>,
    path: &[Step],
    line: u32,
    warn_missing: bool,
    op: impl FnOnce(Value) -> Result<(Value, Value), RuntimeError>,
) -> Result<Option<Value>, RuntimeError> {
    let outcome = with_container(rt, root, path, true, line, |container, step, class| {
        if let Step::Append = step {
            return Updated::Failed(append_read(line));
        }
        let Some(key) = step.key_in(container) else {
            return Updated::Failed(array_full(line));
        };
        match container.get_entry(&key).cloned() {
            Some(Entry::Ref(cell)) => Updated::Through(cell, op),
            Some(Entry::Value(current)) => Updated::Done(op(current).map(|(stored, result)| {
                container.insert(key, stored);
                (result, None)
            })),
            None => {
                let warning = warn_missing.then(|| missing_element(step, &key, class, line));
                Updated::Done(op(Value::Null).map(|(stored, result)| {
                    container.insert(key, stored);
                    (result, warning)
                }))
            }
        }
    })?;
    match outcome {
        None => Ok(None),
        Some(Updated::Failed(error)) => {
            rt.report(error)?;
            Ok(None)
        }
        Some(Updated::Through(cell, op)) => {
            let (stored, result) = op(cell.get())?;
            cell.set(stored);
            Ok(Some(result))
        }
        Some(Updated::Done(done)) => {
            let (result, warning) = done?;
            if let Some(warning) = warning {
                rt.report(warning)?;
            }
            Ok(Some(result))
        }
    }
}

/// Make sure the place holds a container of `kind` and return its value
pub fn vivify(
    rt: &mut dyn Runtime,
    root: Root<'_>,
    path: &[Step],
    kind: ContainerKind,
    line: u32,
) -> Result<Value, RuntimeError> {
    let result = update(rt, root, path, line, false, |current| {
        let mut current = current;
        let value = vivify_value(&mut current, kind);
        Ok((current, value))
    })?;
    Ok(result.unwrap_or_default())
}

/// Remove the element or property at the place; missing steps are ignored
pub fn unset(
    rt: &mut dyn Runtime,
    root: Root<'_>,
    path: &[Step],
    line: u32,
) -> Result<(), RuntimeError> {
    with_container(rt, root, path, false, line, |container, step, _| {
        if let Some(key) = step.key_in(container) {
            container.remove(&key);
        }
    })?;
    Ok(())
}
