//! Runtime behavior shared by the interpreter and the VM
//!
//! Both strategies must produce the same values, output and diagnostics, so
//! every read-side rule with a warning attached lives here once.

use phpeval_core::ast::Literal;
use phpeval_core::value::{AliasCell, ArrayKey, PhpArray, PhpString, Value};
use phpeval_core::{Arg, Callable, ErrorKind, Runtime, RuntimeError, SemanticError};

use crate::place::array_full;

/// An argument before it is matched against the callee's parameters
#[derive(Debug, Clone)]
pub enum Passed {
    Value(Value),
    Cell(AliasCell),
}

/// Array key for an offset value; arrays and objects are reported
pub fn offset_key(
    rt: &mut dyn Runtime,
    offset: &Value,
    line: u32,
) -> Result<Option<ArrayKey>, RuntimeError> {
    match offset.to_key() {
        Some(key) => Ok(Some(key)),
        None => {
            rt.report(SemanticError::new(
                ErrorKind::IllegalOffset,
                format!("Illegal offset type {}", offset.type_name()),
                line,
            ))?;
            Ok(None)
        }
    }
}

/// `$base[$index]` in read context
pub fn read_element(
    rt: &mut dyn Runtime,
    base: &Value,
    index: &Value,
    quiet: bool,
    line: u32,
) -> Result<Value, RuntimeError> {
    match base {
        Value::Array(array) => {
            let key = if quiet {
                index.to_key()
            } else {
                offset_key(rt, index, line)?
            };
            let Some(key) = key else {
                return Ok(Value::Null);
            };
            match array.get(&key) {
                Some(value) => Ok(value),
                None => {
                    if !quiet {
                        rt.report(SemanticError::new(
                            ErrorKind::UndefinedIndex,
                            format!("Undefined array key {}", key),
                            line,
                        ))?;
                    }
                    Ok(Value::Null)
                }
            }
        }
        Value::String(s) => string_offset(rt, s, index, quiet, line),
        _ if quiet => Ok(Value::Null),
        Value::Object(object) => {
            rt.report(SemanticError::new(
                ErrorKind::ScalarAsContainer,
                format!("Cannot use object of type {} as array", object.class_name()),
                line,
            ))?;
            Ok(Value::Null)
        }
        other => {
            rt.report(SemanticError::new(
                ErrorKind::ScalarAsContainer,
                format!(
                    "Trying to access array offset on value of type {}",
                    other.type_name()
                ),
                line,
            ))?;
            Ok(Value::Null)
        }
    }
}

fn string_offset(
    rt: &mut dyn Runtime,
    s: &PhpString,
    index: &Value,
    quiet: bool,
    line: u32,
) -> Result<Value, RuntimeError> {
    let bytes = s.as_bytes();
    let offset = index.to_long();
    let position = if offset < 0 {
        bytes.len().checked_sub(offset.unsigned_abs() as usize)
    } else {
        Some(offset as usize)
    };
    match position.and_then(|p| bytes.get(p)) {
        Some(&byte) => {
            let single = [byte];
            Ok(match std::str::from_utf8(&single) {
                Ok(text) => Value::string(text),
                Err(_) => Value::bytes(&single),
            })
        }
        None if quiet => Ok(Value::Null),
        None => {
            rt.report(SemanticError::new(
                ErrorKind::UndefinedIndex,
                format!("Uninitialized string offset {}", offset),
                line,
            ))?;
            Ok(Value::string(""))
        }
    }
}

/// `$base->name` in read context
pub fn read_field(
    rt: &mut dyn Runtime,
    base: &Value,
    name: &str,
    quiet: bool,
    line: u32,
) -> Result<Value, RuntimeError> {
    match base {
        Value::Object(object) => match object.get_field(name) {
            Some(value) => Ok(value),
            None => {
                if !quiet {
                    rt.report(SemanticError::new(
                        ErrorKind::UndefinedProperty,
                        format!("Undefined property: {}::${}", object.class_name(), name),
                        line,
                    ))?;
                }
                Ok(Value::Null)
            }
        },
        _ if quiet => Ok(Value::Null),
        other => {
            rt.report(SemanticError::new(
                ErrorKind::ScalarAsContainer,
                format!(
                    "Attempt to read property \"{}\" on {}",
                    name,
                    other.type_name()
                ),
                line,
            ))?;
            Ok(Value::Null)
        }
    }
}

/// `$base[]` in read context
pub fn append_read(rt: &mut dyn Runtime, line: u32) -> Result<Value, RuntimeError> {
    rt.report(SemanticError::new(
        ErrorKind::AppendRead,
        "Cannot use [] for reading",
        line,
    ))?;
    Ok(Value::Null)
}

/// Element `key` of a destructured value; non-arrays yield null silently
pub fn list_element(
    rt: &mut dyn Runtime,
    source: &Value,
    key: &Value,
    line: u32,
) -> Result<Value, RuntimeError> {
    match source {
        Value::Array(_) => read_element(rt, source, key, false, line),
        _ => Ok(Value::Null),
    }
}

/// `$this`, reported outside of an object context
pub fn this(rt: &mut dyn Runtime, line: u32) -> Result<Value, RuntimeError> {
    match rt.this() {
        Some(this) => Ok(this),
        None => {
            rt.report(SemanticError::new(
                ErrorKind::ThisOutsideObject,
                "Using $this when not in object context",
                line,
            ))?;
            Ok(Value::Null)
        }
    }
}

/// Read a variable by name, reporting it when undefined
pub fn read_named(
    rt: &mut dyn Runtime,
    name: &str,
    quiet: bool,
    line: u32,
) -> Result<Value, RuntimeError> {
    match rt.get_value(name) {
        Some(value) => Ok(value),
        None => {
            if !quiet {
                rt.report(SemanticError::undefined_variable(name, line))?;
            }
            Ok(Value::Null)
        }
    }
}

/// Concatenate already converted parts
pub fn concat_all(parts: &[PhpString]) -> PhpString {
    if parts.iter().all(|p| !p.is_binary()) {
        let text: String = parts.iter().map(|p| p.to_str_lossy()).collect();
        return PhpString::from(text);
    }
    let bytes: Vec<u8> = parts.iter().flat_map(|p| p.as_bytes().iter().copied()).collect();
    PhpString::from(bytes)
}

/// Add one item of an array literal
pub fn insert_item(
    rt: &mut dyn Runtime,
    array: &mut PhpArray,
    key: Option<&Value>,
    item: Passed,
    line: u32,
) -> Result<(), RuntimeError> {
    let key = match key {
        Some(offset) => match offset_key(rt, offset, line)? {
            Some(key) => Some(key),
            None => return Ok(()),
        },
        None => None,
    };
    let added = match (key, item) {
        (Some(key), Passed::Value(value)) => {
            array.insert(key, value.copy());
            true
        }
        (Some(key), Passed::Cell(cell)) => {
            array.set_ref(key, cell);
            true
        }
        (None, Passed::Value(value)) => array.push(value.copy()).is_some(),
        (None, Passed::Cell(cell)) => array.push_ref(cell).is_some(),
    };
    if !added {
        rt.report(array_full(line))?;
    }
    Ok(())
}

/// Key/value pairs a by-value `foreach` visits
///
/// The subject is snapshotted: writes in the loop body do not affect the
/// iteration.
pub fn iteration_items(
    rt: &mut dyn Runtime,
    subject: &Value,
    line: u32,
) -> Result<Vec<(Value, Value)>, RuntimeError> {
    match subject {
        Value::Array(array) => Ok(array
            .iter()
            .map(|(key, entry)| (key.to_value(), entry.value()))
            .collect()),
        Value::Object(object) => Ok(object
            .borrow()
            .fields
            .iter()
            .map(|(key, entry)| (key.to_value(), entry.value()))
            .collect()),
        other => {
            not_iterable(rt, other, line)?;
            Ok(Vec::new())
        }
    }
}

/// Keys a by-reference `foreach` visits, taken when the loop starts
pub fn iteration_keys(
    rt: &mut dyn Runtime,
    subject: &AliasCell,
    line: u32,
) -> Result<Vec<ArrayKey>, RuntimeError> {
    let value = subject.get();
    match &value {
        Value::Array(array) => Ok(array.keys()),
        Value::Object(object) => Ok(object.borrow().fields.keys()),
        other => {
            not_iterable(rt, other, line)?;
            Ok(Vec::new())
        }
    }
}

/// Alias cell of element `key` of the iterated subject; `None` once the
/// element was removed by the loop body
pub fn element_ref(subject: &AliasCell, key: &ArrayKey) -> Option<AliasCell> {
    let mut value = subject.borrow_mut();
    if let Value::Object(object) = &*value {
        let object = object.clone();
        drop(value);
        let mut object = object.borrow_mut();
        return object
            .fields
            .contains_key(key)
            .then(|| object.fields.get_ref(key.clone()));
    }
    let array = value.array_mut()?;
    array.contains_key(key).then(|| array.get_ref(key.clone()))
}

fn not_iterable(rt: &mut dyn Runtime, subject: &Value, line: u32) -> Result<(), RuntimeError> {
    rt.report(SemanticError::new(
        ErrorKind::ScalarAsContainer,
        format!(
            "foreach() argument must be of type array|object, {} given",
            subject.type_name()
        ),
        line,
    ))
}

/// Match passed arguments against the callee's parameter modes
///
/// A cell handed to a by-value parameter is read; a value handed to a
/// by-reference parameter is reported and passed as a temporary.
pub fn pass_arguments(
    rt: &mut dyn Runtime,
    callee: Option<&dyn Callable>,
    passed: Vec<Passed>,
    line: u32,
) -> Result<Vec<Arg>, RuntimeError> {
    let mut args = Vec::with_capacity(passed.len());
    for (index, arg) in passed.into_iter().enumerate() {
        let by_ref = callee.is_some_and(|c| c.param_by_ref(index));
        args.push(match (arg, by_ref) {
            (Passed::Cell(cell), true) => Arg::Ref(cell),
            (Passed::Cell(cell), false) => Arg::Value(cell.get().copy()),
            (Passed::Value(value), true) => {
                rt.report(SemanticError::new(
                    ErrorKind::ReferenceArgument,
                    "Only variables should be passed by reference",
                    line,
                ))?;
                Arg::Value(value)
            }
            (Passed::Value(value), false) => Arg::Value(value.copy()),
        });
    }
    Ok(args)
}

/// Value of a parameter the caller did not pass
pub fn missing_argument(
    rt: &mut dyn Runtime,
    function: &str,
    default: Option<&Literal>,
    required: usize,
    passed: usize,
    total: usize,
) -> Result<Value, RuntimeError> {
    if let Some(default) = default {
        return Ok(Value::from_literal(default));
    }
    let bound = if required == total { "exactly" } else { "at least" };
    rt.report(SemanticError::new(
        ErrorKind::ArgumentCount,
        format!(
            "Too few arguments to function {}(), {} passed and {} {} expected",
            function, passed, bound, required
        ),
        0,
    ))?;
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use phpeval_core::{Env, NativeFunction};

    #[test]
    fn test_read_element_warnings() {
        let mut env = Env::new();
        let array = Value::array([Value::Long(10)].into_iter().collect());
        assert_eq!(
            read_element(&mut env, &array, &Value::Long(0), false, 1).unwrap(),
            Value::Long(10)
        );
        assert_eq!(
            read_element(&mut env, &array, &Value::string("k"), false, 2).unwrap(),
            Value::Null
        );
        assert_eq!(
            read_element(&mut env, &Value::Long(3), &Value::Long(0), false, 3).unwrap(),
            Value::Null
        );
        let messages: Vec<&str> = env.diagnostics().iter().map(|d| d.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "Undefined array key \"k\"",
                "Trying to access array offset on value of type int"
            ]
        );
    }

    #[test]
    fn test_quiet_reads_do_not_report() {
        let mut env = Env::new();
        let empty = Value::empty_array();
        read_element(&mut env, &empty, &Value::Long(1), true, 1).unwrap();
        read_element(&mut env, &Value::Null, &Value::Long(1), true, 1).unwrap();
        read_field(&mut env, &Value::Null, "p", true, 1).unwrap();
        assert!(env.diagnostics().is_empty());
    }

    #[test]
    fn test_string_offsets() {
        let mut env = Env::new();
        let s = Value::string("abc");
        assert_eq!(
            read_element(&mut env, &s, &Value::Long(1), false, 1).unwrap(),
            Value::string("b")
        );
        assert_eq!(
            read_element(&mut env, &s, &Value::Long(-1), false, 1).unwrap(),
            Value::string("c")
        );
        assert_eq!(
            read_element(&mut env, &s, &Value::Long(5), false, 1).unwrap(),
            Value::string("")
        );
        assert_eq!(env.diagnostics().len(), 1);
    }

    #[test]
    fn test_list_element_of_scalar_is_silent_null() {
        let mut env = Env::new();
        let value = list_element(&mut env, &Value::Long(5), &Value::Long(0), 1).unwrap();
        assert!(value.is_null());
        assert!(env.diagnostics().is_empty());
    }

    #[test]
    fn test_concat_all_keeps_bytes() {
        let text = concat_all(&[PhpString::from("a"), PhpString::from("b")]);
        assert!(!text.is_binary());
        assert_eq!(text, PhpString::from("ab"));
        let bytes = concat_all(&[PhpString::from("a"), PhpString::from(&[0xffu8][..])]);
        assert!(bytes.is_binary());
        assert_eq!(bytes.as_bytes(), &[b'a', 0xff]);
    }

    #[test]
    fn test_pass_arguments() {
        let mut env = Env::new();
        let callee = NativeFunction::new("f", |_, _, _| Ok(Value::Null)).with_by_ref(&[true, false]);
        let cell = AliasCell::new(Value::Long(1));
        let args = pass_arguments(
            &mut env,
            Some(&callee),
            vec![Passed::Cell(cell.clone()), Passed::Cell(cell.clone())],
            1,
        )
        .unwrap();
        assert!(matches!(&args[0], Arg::Ref(c) if c.ptr_eq(&cell)));
        assert!(matches!(&args[1], Arg::Value(Value::Long(1))));

        pass_arguments(&mut env, Some(&callee), vec![Passed::Value(Value::Long(2))], 4).unwrap();
        assert_eq!(env.diagnostics()[0].kind, ErrorKind::ReferenceArgument);
    }

    #[test]
    fn test_missing_argument() {
        let mut env = Env::new();
        let default = Literal::Long(7);
        let value = missing_argument(&mut env, "f", Some(&default), 1, 1, 2).unwrap();
        assert_eq!(value, Value::Long(7));

        let err = missing_argument(&mut env, "f", None, 2, 0, 2).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::fatal(
                "Too few arguments to function f(), 0 passed and exactly 2 expected",
                0
            )
        );
    }

    #[test]
    fn test_by_ref_iteration_skips_removed_elements() {
        let array: PhpArray = [Value::Long(1), Value::Long(2)].into_iter().collect();
        let subject = AliasCell::new(Value::array(array));
        let mut env = Env::new();
        let keys = iteration_keys(&mut env, &subject, 1).unwrap();
        assert_eq!(keys.len(), 2);

        subject.borrow_mut().array_mut().unwrap().remove(&ArrayKey::from(1));
        assert!(element_ref(&subject, &keys[0]).is_some());
        assert!(element_ref(&subject, &keys[1]).is_none());
    }
}
