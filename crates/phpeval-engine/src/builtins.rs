//! Built-in functions
//!
//! A small library covering by-reference parameters (`array_push`, `sort`,
//! `settype`) and functions that work on the caller's variables by name
//! (`extract`, `compact`, `get_defined_vars`). Natives run in the caller's
//! frame.

use std::cmp::Ordering;
use std::rc::Rc;

use phpeval_analyze::{CalleeSignature, SignatureTable};
use phpeval_core::ast::{BinaryOp, CastKind};
use phpeval_core::value::{ArrayKey, PhpArray, PhpString, Value};
use phpeval_core::{Arg, ErrorKind, NativeFunction, Runtime, RuntimeError, SemanticError};

/// Every built-in, ready to register
pub fn natives() -> Vec<Rc<NativeFunction>> {
    vec![
        Rc::new(NativeFunction::new("strlen", strlen)),
        Rc::new(NativeFunction::new("count", count)),
        Rc::new(NativeFunction::new("gettype", gettype)),
        Rc::new(NativeFunction::new("array_push", array_push).with_by_ref(&[true])),
        Rc::new(NativeFunction::new("sort", sort).with_by_ref(&[true])),
        Rc::new(NativeFunction::new("settype", settype).with_by_ref(&[true])),
        Rc::new(NativeFunction::new("extract", extract).with_caller_scope()),
        Rc::new(NativeFunction::new("compact", compact).with_caller_scope()),
        Rc::new(NativeFunction::new("get_defined_vars", get_defined_vars).with_caller_scope()),
    ]
}

/// Call-site signatures of the built-ins
pub fn signatures() -> SignatureTable {
    SignatureTable::new()
        .with("strlen", CalleeSignature::new(vec![false]))
        .with("count", CalleeSignature::new(vec![false]))
        .with("gettype", CalleeSignature::new(vec![false]))
        .with("array_push", CalleeSignature::new(vec![true]))
        .with("sort", CalleeSignature::new(vec![true]))
        .with("settype", CalleeSignature::new(vec![true, false]))
        .with("extract", CalleeSignature::new(vec![false]).with_caller_scope())
        .with("compact", CalleeSignature::new(vec![]).with_caller_scope())
        .with("get_defined_vars", CalleeSignature::new(vec![]).with_caller_scope())
}

fn arg(args: &[Arg], index: usize) -> Value {
    args.get(index).map(Arg::value).unwrap_or_default()
}

fn invalid(rt: &mut dyn Runtime, message: String) -> Result<Value, RuntimeError> {
    rt.report(SemanticError::new(ErrorKind::InvalidArgument, message, 0))?;
    Ok(Value::Null)
}

fn strlen(_rt: &mut dyn Runtime, _this: Option<Value>, args: Vec<Arg>) -> Result<Value, RuntimeError> {
    Ok(Value::Long(arg(&args, 0).to_php_string().len() as i64))
}

fn count(rt: &mut dyn Runtime, _this: Option<Value>, args: Vec<Arg>) -> Result<Value, RuntimeError> {
    match arg(&args, 0) {
        Value::Array(array) => Ok(Value::Long(array.len() as i64)),
        other => invalid(
            rt,
            format!(
                "count(): Argument #1 ($value) must be of type Countable|array, {} given",
                other.type_name()
            ),
        ),
    }
}

fn gettype(_rt: &mut dyn Runtime, _this: Option<Value>, args: Vec<Arg>) -> Result<Value, RuntimeError> {
    let name = match arg(&args, 0) {
        Value::Null => "NULL",
        Value::Bool(_) => "boolean",
        Value::Long(_) => "integer",
        Value::Double(_) => "double",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    Ok(Value::string(name))
}

fn array_push(rt: &mut dyn Runtime, _this: Option<Value>, args: Vec<Arg>) -> Result<Value, RuntimeError> {
    let mut args = args.into_iter();
    let Some(target) = args.next() else {
        return invalid(rt, "array_push() expects at least 1 argument, 0 given".to_string());
    };
    let cell = target.into_cell();
    let mut value = cell.borrow_mut();
    let Some(array) = value.array_mut() else {
        let given = value.type_name();
        drop(value);
        return invalid(
            rt,
            format!(
                "array_push(): Argument #1 ($array) must be of type array, {} given",
                given
            ),
        );
    };
    for item in args {
        if array.push(item.value().copy()).is_none() {
            break;
        }
    }
    Ok(Value::Long(array.len() as i64))
}

fn loose_order(a: &Value, b: &Value) -> Ordering {
    if a.compare(BinaryOp::Lt, b) {
        Ordering::Less
    } else if a.compare(BinaryOp::Gt, b) {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}

fn sort(rt: &mut dyn Runtime, _this: Option<Value>, args: Vec<Arg>) -> Result<Value, RuntimeError> {
    let Some(target) = args.into_iter().next() else {
        return invalid(rt, "sort() expects at least 1 argument, 0 given".to_string());
    };
    let cell = target.into_cell();
    let current = cell.get();
    let Some(array) = current.as_array() else {
        return invalid(
            rt,
            format!(
                "sort(): Argument #1 ($array) must be of type array, {} given",
                current.type_name()
            ),
        );
    };
    let mut values = array.values();
    values.sort_by(loose_order);
    let sorted: PhpArray = values.into_iter().collect();
    cell.set(Value::array(sorted));
    Ok(Value::Bool(true))
}

fn settype(rt: &mut dyn Runtime, _this: Option<Value>, args: Vec<Arg>) -> Result<Value, RuntimeError> {
    let type_name = arg(&args, 1).to_php_string();
    let kind = match type_name.to_str_lossy().to_ascii_lowercase().as_str() {
        "int" | "integer" => CastKind::Long,
        "float" | "double" => CastKind::Double,
        "bool" | "boolean" => CastKind::Bool,
        "string" => CastKind::String,
        "array" => CastKind::Array,
        "object" => CastKind::Object,
        "null" => CastKind::Unset,
        other => {
            invalid(
                rt,
                format!("settype(): Argument #2 ($type) must be a valid type, \"{}\" given", other),
            )?;
            return Ok(Value::Bool(false));
        }
    };
    let Some(target) = args.into_iter().next() else {
        return Ok(Value::Bool(false));
    };
    let cell = target.into_cell();
    let cast = cell.get().cast(kind);
    cell.set(cast);
    Ok(Value::Bool(true))
}

/// A string key usable as a variable name
fn variable_name(key: &ArrayKey) -> Option<String> {
    let ArrayKey::Str(name) = key else {
        return None;
    };
    let name = name.to_str_lossy();
    let mut chars = name.chars();
    let first = chars.next()?;
    let valid = (first == '_' || first.is_alphabetic())
        && chars.all(|c| c == '_' || c.is_alphanumeric())
        && name != "this";
    valid.then(|| name.into_owned())
}

fn extract(rt: &mut dyn Runtime, _this: Option<Value>, args: Vec<Arg>) -> Result<Value, RuntimeError> {
    let source = arg(&args, 0);
    let Some(array) = source.as_array() else {
        return invalid(
            rt,
            format!(
                "extract(): Argument #1 ($array) must be of type array, {} given",
                source.type_name()
            ),
        );
    };
    let mut extracted = 0;
    for (key, entry) in array.iter() {
        if let Some(name) = variable_name(key) {
            rt.set_value(&name, entry.value().copy());
            extracted += 1;
        }
    }
    Ok(Value::Long(extracted))
}

fn compact_into(rt: &mut dyn Runtime, result: &mut PhpArray, name: &Value) {
    match name {
        Value::Array(names) => {
            for nested in names.values() {
                compact_into(rt, result, &nested);
            }
        }
        other => {
            let name = other.to_php_string();
            if let Some(value) = rt.get_value(&name.to_str_lossy()) {
                result.insert(ArrayKey::from_string(name), value.copy());
            }
        }
    }
}

fn compact(rt: &mut dyn Runtime, _this: Option<Value>, args: Vec<Arg>) -> Result<Value, RuntimeError> {
    let mut result = PhpArray::new();
    for name in &args {
        compact_into(rt, &mut result, &name.value());
    }
    Ok(Value::array(result))
}

fn get_defined_vars(
    rt: &mut dyn Runtime,
    _this: Option<Value>,
    _args: Vec<Arg>,
) -> Result<Value, RuntimeError> {
    let mut result = PhpArray::new();
    for (name, cell) in rt.defined_variables() {
        result.insert(ArrayKey::from_string(PhpString::from(name.as_str())), cell.get().copy());
    }
    Ok(Value::array(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use phpeval_analyze::CalleeOracle;
    use phpeval_core::{AliasCell, Callable, Env};

    fn env() -> Env {
        let mut env = Env::new();
        for native in natives() {
            env.register_function(native);
        }
        env
    }

    fn list(values: &[i64]) -> Value {
        Value::array(values.iter().map(|n| Value::Long(*n)).collect())
    }

    #[test]
    fn test_signatures_cover_natives() {
        let table = signatures();
        for native in natives() {
            let signature = table.signature(native.name()).unwrap();
            assert_eq!(signature.param_by_ref(0), native.param_by_ref(0), "{}", native.name());
            assert_eq!(signature.uses_caller_scope, native.uses_caller_scope());
        }
    }

    #[test]
    fn test_array_push_writes_through_reference() {
        let mut env = env();
        let cell = AliasCell::new(list(&[1]));
        let result = env
            .call_function(
                "array_push",
                vec![Arg::Ref(cell.clone()), Arg::Value(Value::Long(2))],
                1,
            )
            .unwrap();
        assert_eq!(result, Value::Long(2));
        assert_eq!(cell.get(), list(&[1, 2]));
    }

    #[test]
    fn test_sort_reindexes() {
        let mut env = env();
        let cell = AliasCell::new(list(&[3, 1, 2]));
        env.call_function("sort", vec![Arg::Ref(cell.clone())], 1).unwrap();
        assert_eq!(cell.get(), list(&[1, 2, 3]));
    }

    #[test]
    fn test_settype() {
        let mut env = env();
        let cell = AliasCell::new(Value::string("42abc"));
        let ok = env
            .call_function(
                "settype",
                vec![Arg::Ref(cell.clone()), Arg::Value(Value::string("integer"))],
                1,
            )
            .unwrap();
        assert_eq!(ok, Value::Bool(true));
        assert_eq!(cell.get(), Value::Long(42));

        let bad = env
            .call_function(
                "settype",
                vec![Arg::Ref(cell), Arg::Value(Value::string("resource"))],
                1,
            )
            .unwrap();
        assert_eq!(bad, Value::Bool(false));
        assert_eq!(env.diagnostics()[0].kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_extract_and_compact_use_caller_scope() {
        let mut env = env();
        let mut source = PhpArray::new();
        source.insert(ArrayKey::from("a"), Value::Long(1));
        source.insert(ArrayKey::from("1bad"), Value::Long(2));
        source.insert(ArrayKey::Int(0), Value::Long(3));
        let extracted = env
            .call_function("extract", vec![Arg::Value(Value::array(source))], 1)
            .unwrap();
        assert_eq!(extracted, Value::Long(1));
        assert_eq!(env.global_value("a"), Some(Value::Long(1)));

        let compacted = env
            .call_function(
                "compact",
                vec![Arg::Value(Value::string("a")), Arg::Value(Value::string("missing"))],
                1,
            )
            .unwrap();
        assert_eq!(compacted.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_gettype_and_count() {
        let mut env = env();
        let kind = env
            .call_function("gettype", vec![Arg::Value(Value::Double(1.5))], 1)
            .unwrap();
        assert_eq!(kind, Value::string("double"));
        let n = env
            .call_function("count", vec![Arg::Value(list(&[1, 2]))], 1)
            .unwrap();
        assert_eq!(n, Value::Long(2));
        assert_eq!(
            env.call_function("count", vec![Arg::Value(Value::Long(1))], 1).unwrap(),
            Value::Null
        );
        assert_eq!(env.diagnostics().len(), 1);
    }
}
