//! Runtime environment contract and its default implementation
//!
//! Evaluation reaches variables, functions, objects and the error hook only
//! through the [`Runtime`] trait. [`Env`] implements it with a frame stack
//! whose symbol tables map names to [`AliasCell`]s, so binding a name to
//! another name's cell is how references between variables are made.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use crate::error::{ErrorKind, RuntimeError, SemanticError};
use crate::value::{AliasCell, ArrayKey, Entry, ObjectRef, PhpArray, PhpString, Value};

/// An argument as passed to a callee
#[derive(Debug, Clone)]
pub enum Arg {
    /// A copied value for a by-value parameter
    Value(Value),
    /// The caller's storage location for a by-reference parameter
    Ref(AliasCell),
}

impl Arg {
    pub fn value(&self) -> Value {
        match self {
            Arg::Value(v) => v.clone(),
            Arg::Ref(cell) => cell.get(),
        }
    }

    /// Cell to bind a parameter to; by-value arguments get a fresh one
    pub fn into_cell(self) -> AliasCell {
        match self {
            Arg::Value(v) => AliasCell::new(v),
            Arg::Ref(cell) => cell,
        }
    }
}

/// Something that can be invoked by name
pub trait Callable {
    fn name(&self) -> &str;

    /// Whether parameter `index` is declared by reference
    fn param_by_ref(&self, _index: usize) -> bool {
        false
    }

    /// Whether the callee reads or writes the caller's variables by name
    fn uses_caller_scope(&self) -> bool {
        false
    }

    fn call(
        &self,
        rt: &mut dyn Runtime,
        this: Option<Value>,
        args: Vec<Arg>,
    ) -> Result<Value, RuntimeError>;
}

type NativeBody = dyn Fn(&mut dyn Runtime, Option<Value>, Vec<Arg>) -> Result<Value, RuntimeError>;

/// A callable implemented in Rust
pub struct NativeFunction {
    name: String,
    by_ref: Vec<bool>,
    caller_scope: bool,
    body: Box<NativeBody>,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(&mut dyn Runtime, Option<Value>, Vec<Arg>) -> Result<Value, RuntimeError>
            + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            by_ref: Vec::new(),
            caller_scope: false,
            body: Box::new(body),
        }
    }

    /// Mark parameters as by-reference, by position
    pub fn with_by_ref(mut self, by_ref: &[bool]) -> Self {
        self.by_ref = by_ref.to_vec();
        self
    }

    pub fn with_caller_scope(mut self) -> Self {
        self.caller_scope = true;
        self
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("by_ref", &self.by_ref)
            .finish()
    }
}

impl Callable for NativeFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn param_by_ref(&self, index: usize) -> bool {
        self.by_ref.get(index).copied().unwrap_or(false)
    }

    fn uses_caller_scope(&self) -> bool {
        self.caller_scope
    }

    fn call(
        &self,
        rt: &mut dyn Runtime,
        this: Option<Value>,
        args: Vec<Arg>,
    ) -> Result<Value, RuntimeError> {
        (self.body)(rt, this, args)
    }
}

/// The environment evaluation runs against
pub trait Runtime {
    /// Value of a variable in the current frame
    fn get_value(&self, name: &str) -> Option<Value>;
    fn set_value(&mut self, name: &str, value: Value);
    /// Cell of a variable in the current frame, created as null when absent
    fn alias_cell(&mut self, name: &str) -> AliasCell;
    fn find_alias_cell(&self, name: &str) -> Option<AliasCell>;
    /// Make `name` denote `cell` in the current frame
    fn bind_alias(&mut self, name: &str, cell: AliasCell);
    fn unset(&mut self, name: &str);
    /// Cell of a global variable, created as null when absent
    fn global_cell(&mut self, name: &str) -> AliasCell;
    /// Variables of the current frame, in definition order
    fn defined_variables(&self) -> Vec<(String, AliasCell)>;

    fn push_frame(&mut self, this: Option<Value>) -> Result<(), RuntimeError>;
    fn pop_frame(&mut self);
    fn this(&self) -> Option<Value>;

    fn lookup_function(&self, name: &str) -> Option<Rc<dyn Callable>>;
    fn find_method(&self, receiver: &Value, name: &str) -> Option<Rc<dyn Callable>>;
    fn call_function(
        &mut self,
        name: &str,
        args: Vec<Arg>,
        line: u32,
    ) -> Result<Value, RuntimeError>;
    fn call_method(
        &mut self,
        receiver: Value,
        name: &str,
        args: Vec<Arg>,
        line: u32,
    ) -> Result<Value, RuntimeError>;
    fn create_object(&mut self, class_name: &str) -> Value;

    /// Hand a PHP-level error to the environment; `Err` means it is fatal
    fn report(&mut self, error: SemanticError) -> Result<(), RuntimeError>;
    fn error_reporting(&self) -> bool;
    /// Enable or disable reporting, returning the previous setting
    fn set_error_reporting(&mut self, enabled: bool) -> bool;

    fn echo(&mut self, text: &PhpString);
    /// Consulted once per call
    fn check_budget(&mut self) -> Result<(), RuntimeError>;
}

#[derive(Debug, Default)]
struct Frame {
    symbols: PhpArray,
    this: Option<Value>,
}

impl Frame {
    fn cell(&self, name: &str) -> Option<AliasCell> {
        match self.symbols.get_entry(&ArrayKey::from(name))? {
            Entry::Ref(cell) => Some(cell.clone()),
            Entry::Value(v) => Some(AliasCell::new(v.clone())),
        }
    }

    fn cell_or_create(&mut self, name: &str) -> AliasCell {
        self.symbols.get_ref(ArrayKey::from(name))
    }
}

/// Default [`Runtime`]: frames, function and method tables, error log, output
pub struct Env {
    frames: Vec<Frame>,
    functions: HashMap<String, Rc<dyn Callable>>,
    methods: HashMap<(String, String), Rc<dyn Callable>>,
    diagnostics: Vec<SemanticError>,
    reporting: bool,
    fatal_kinds: HashSet<ErrorKind>,
    output: Vec<u8>,
    budget: Option<u64>,
    max_depth: usize,
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

impl Env {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::default()],
            functions: HashMap::new(),
            methods: HashMap::new(),
            diagnostics: Vec::new(),
            reporting: true,
            fatal_kinds: [
                ErrorKind::UndefinedFunction,
                ErrorKind::UndefinedMethod,
                ErrorKind::ThisOutsideObject,
                ErrorKind::ArgumentCount,
                ErrorKind::AppendRead,
            ]
            .into_iter()
            .collect(),
            output: Vec::new(),
            budget: None,
            max_depth: 512,
        }
    }

    /// Limit the number of calls evaluation may make
    pub fn with_budget(mut self, calls: u64) -> Self {
        self.budget = Some(calls);
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Treat errors of `kind` as fatal
    pub fn fatal_on(mut self, kind: ErrorKind) -> Self {
        self.fatal_kinds.insert(kind);
        self
    }

    pub fn register_function(&mut self, function: Rc<dyn Callable>) {
        self.functions
            .insert(function.name().to_ascii_lowercase(), function);
    }

    /// Register a method for instances of `class_name`
    pub fn register_method(&mut self, class_name: &str, method: Rc<dyn Callable>) {
        self.methods.insert(
            (class_name.to_ascii_lowercase(), method.name().to_ascii_lowercase()),
            method,
        );
    }

    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    pub fn take_output(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.output).into_owned();
        self.output.clear();
        out
    }

    /// Errors reported while reporting was enabled
    pub fn diagnostics(&self) -> &[SemanticError] {
        &self.diagnostics
    }

    pub fn global_value(&self, name: &str) -> Option<Value> {
        self.frames[0].cell(name).map(|c| c.get())
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    fn frame(&self) -> &Frame {
        // The global frame is never popped
        &self.frames[self.frames.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }
}

impl Runtime for Env {
    fn get_value(&self, name: &str) -> Option<Value> {
        self.frame().cell(name).map(|c| c.get())
    }

    fn set_value(&mut self, name: &str, value: Value) {
        self.frame_mut().cell_or_create(name).set(value);
    }

    fn alias_cell(&mut self, name: &str) -> AliasCell {
        self.frame_mut().cell_or_create(name)
    }

    fn find_alias_cell(&self, name: &str) -> Option<AliasCell> {
        self.frame().cell(name)
    }

    fn bind_alias(&mut self, name: &str, cell: AliasCell) {
        self.frame_mut().symbols.set_ref(ArrayKey::from(name), cell);
    }

    fn unset(&mut self, name: &str) {
        self.frame_mut().symbols.remove(&ArrayKey::from(name));
    }

    fn global_cell(&mut self, name: &str) -> AliasCell {
        self.frames[0].cell_or_create(name)
    }

    fn defined_variables(&self) -> Vec<(String, AliasCell)> {
        self.frame()
            .symbols
            .iter()
            .filter_map(|(key, entry)| {
                let name = match key {
                    ArrayKey::Int(n) => n.to_string(),
                    ArrayKey::Str(s) => s.to_str_lossy().into_owned(),
                };
                match entry {
                    Entry::Ref(cell) => Some((name, cell.clone())),
                    Entry::Value(_) => None,
                }
            })
            .collect()
    }

    fn push_frame(&mut self, this: Option<Value>) -> Result<(), RuntimeError> {
        if self.frames.len() > self.max_depth {
            return Err(RuntimeError::CallDepthExceeded(self.max_depth));
        }
        self.frames.push(Frame {
            symbols: PhpArray::new(),
            this,
        });
        Ok(())
    }

    fn pop_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    fn this(&self) -> Option<Value> {
        self.frame().this.clone()
    }

    fn lookup_function(&self, name: &str) -> Option<Rc<dyn Callable>> {
        self.functions.get(&name.to_ascii_lowercase()).cloned()
    }

    fn find_method(&self, receiver: &Value, name: &str) -> Option<Rc<dyn Callable>> {
        let object = receiver.as_object()?;
        self.methods
            .get(&(object.class_name().to_ascii_lowercase(), name.to_ascii_lowercase()))
            .cloned()
    }

    fn call_function(
        &mut self,
        name: &str,
        args: Vec<Arg>,
        line: u32,
    ) -> Result<Value, RuntimeError> {
        let Some(function) = self.lookup_function(name) else {
            self.report(SemanticError::new(
                ErrorKind::UndefinedFunction,
                format!("Call to undefined function {}()", name),
                line,
            ))?;
            return Ok(Value::Null);
        };
        self.check_budget()?;
        function.call(self, None, args)
    }

    fn call_method(
        &mut self,
        receiver: Value,
        name: &str,
        args: Vec<Arg>,
        line: u32,
    ) -> Result<Value, RuntimeError> {
        let Some(object) = receiver.as_object() else {
            self.report(SemanticError::new(
                ErrorKind::UndefinedMethod,
                format!("Call to a member function {}() on {}", name, receiver.type_name()),
                line,
            ))?;
            return Ok(Value::Null);
        };
        let Some(method) = self.find_method(&receiver, name) else {
            self.report(SemanticError::new(
                ErrorKind::UndefinedMethod,
                format!("Call to undefined method {}::{}()", object.class_name(), name),
                line,
            ))?;
            return Ok(Value::Null);
        };
        self.check_budget()?;
        method.call(self, Some(receiver), args)
    }

    fn create_object(&mut self, class_name: &str) -> Value {
        Value::Object(ObjectRef::new(class_name))
    }

    fn report(&mut self, error: SemanticError) -> Result<(), RuntimeError> {
        if self.fatal_kinds.contains(&error.kind) {
            return Err(RuntimeError::fatal(error.message, error.line));
        }
        if self.reporting {
            self.diagnostics.push(error);
        }
        Ok(())
    }

    fn error_reporting(&self) -> bool {
        self.reporting
    }

    fn set_error_reporting(&mut self, enabled: bool) -> bool {
        std::mem::replace(&mut self.reporting, enabled)
    }

    fn echo(&mut self, text: &PhpString) {
        self.output.extend_from_slice(text.as_bytes());
    }

    fn check_budget(&mut self) -> Result<(), RuntimeError> {
        match self.budget.as_mut() {
            Some(0) => Err(RuntimeError::BudgetExhausted),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_alias_shares_storage() {
        let mut env = Env::new();
        env.set_value("a", Value::Long(1));
        let cell = env.alias_cell("a");
        env.bind_alias("b", cell);
        env.set_value("b", Value::Long(2));
        assert_eq!(env.get_value("a"), Some(Value::Long(2)));
    }

    #[test]
    fn test_frames_isolate_variables() {
        let mut env = Env::new();
        env.set_value("x", Value::Long(1));
        env.push_frame(None).unwrap();
        assert_eq!(env.get_value("x"), None);
        let global = env.global_cell("x");
        env.bind_alias("x", global);
        env.set_value("x", Value::Long(5));
        env.pop_frame();
        assert_eq!(env.get_value("x"), Some(Value::Long(5)));
    }

    #[test]
    fn test_report_respects_suppression_and_fatality() {
        let mut env = Env::new();
        env.report(SemanticError::undefined_variable("x", 1)).unwrap();
        assert_eq!(env.diagnostics().len(), 1);

        let prior = env.set_error_reporting(false);
        assert!(prior);
        env.report(SemanticError::undefined_variable("y", 2)).unwrap();
        assert_eq!(env.diagnostics().len(), 1);

        let fatal = env.report(SemanticError::new(ErrorKind::UndefinedFunction, "boom", 3));
        assert!(matches!(fatal, Err(RuntimeError::Fatal { .. })));
    }

    #[test]
    fn test_call_function_by_name() {
        let mut env = Env::new();
        env.register_function(Rc::new(NativeFunction::new("Twice", |_, _, args| {
            Ok(Value::Long(args[0].value().to_long() * 2))
        })));
        let result = env.call_function("twice", vec![Arg::Value(Value::Long(4))], 0);
        assert_eq!(result, Ok(Value::Long(8)));
        assert!(env.call_function("missing", vec![], 7).is_err());
    }

    #[test]
    fn test_budget() {
        let mut env = Env::new().with_budget(1);
        assert!(env.check_budget().is_ok());
        assert_eq!(env.check_budget(), Err(RuntimeError::BudgetExhausted));
    }

    #[test]
    fn test_defined_variables_in_order() {
        let mut env = Env::new();
        env.set_value("b", Value::Long(1));
        env.set_value("a", Value::Long(2));
        let names: Vec<String> = env.defined_variables().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
