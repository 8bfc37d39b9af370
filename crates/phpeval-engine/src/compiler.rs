//! Lazy compilation of program functions
//!
//! Functions are translated on first call. While translating a caller the
//! compiler may compile its callees so their calls become direct; a callee
//! that is still being compiled (self or mutual recursion) keeps the named
//! call path.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use phpeval_analyze::{logging, FunctionBody, FunctionInfo, ProgramAnalysis, SignatureTable};
use phpeval_core::ast::{Program, MAIN_FUNCTION};
use phpeval_core::value::Value;
use phpeval_core::{Arg, Callable, InternalError, Runtime, RuntimeError};

use crate::translate::{
    translate, CallResolver, CompiledFunction, Direct, Op, OpBuffer, TextBackend,
};
use crate::vm;

enum Compiled {
    InProgress,
    Done(Rc<CompiledFunction>),
}

/// Compiles program functions on demand and caches the result
pub struct Compiler {
    program: Rc<Program>,
    analysis: Rc<ProgramAnalysis>,
    oracle: Rc<SignatureTable>,
    /// Installed callables of program functions
    callables: HashMap<String, Weak<dyn Callable>>,
    natives: HashMap<String, Weak<dyn Callable>>,
    compiled: HashMap<String, Compiled>,
}

impl Compiler {
    pub fn new(
        program: Rc<Program>,
        analysis: Rc<ProgramAnalysis>,
        oracle: Rc<SignatureTable>,
    ) -> Self {
        Self {
            program,
            analysis,
            oracle,
            callables: HashMap::new(),
            natives: HashMap::new(),
            compiled: HashMap::new(),
        }
    }

    /// Make calls to `name` resolvable to a direct call of `callable`
    pub fn register_callable(&mut self, name: &str, callable: &Rc<dyn Callable>) {
        self.callables
            .insert(name.to_ascii_lowercase(), Rc::downgrade(callable));
    }

    pub fn register_native(&mut self, callable: &Rc<dyn Callable>) {
        self.natives
            .insert(callable.name().to_ascii_lowercase(), Rc::downgrade(callable));
    }

    pub fn is_compiled(&self, name: &str) -> bool {
        matches!(
            self.compiled.get(&name.to_ascii_lowercase()),
            Some(Compiled::Done(_))
        )
    }

    fn body_of<'p>(
        &self,
        program: &'p Program,
        name: &str,
    ) -> Result<(FunctionBody<'p>, Arc<FunctionInfo>), InternalError> {
        if name == MAIN_FUNCTION {
            return Ok((FunctionBody::main(program), Arc::clone(self.analysis.main())));
        }
        let unknown = || InternalError::UnknownFunction(name.to_string());
        let def = program.function(name).ok_or_else(unknown)?;
        let info = self.analysis.function(name).ok_or_else(unknown)?;
        Ok((FunctionBody::of(def), Arc::clone(info)))
    }

    /// Code of `name`, translating it on first use
    pub fn compile(&mut self, name: &str) -> Result<Rc<CompiledFunction>, InternalError> {
        let key = name.to_ascii_lowercase();
        match self.compiled.get(&key) {
            Some(Compiled::Done(code)) => return Ok(Rc::clone(code)),
            Some(Compiled::InProgress) => return Err(InternalError::CompileCycle(name.to_string())),
            None => {}
        }

        let program = Rc::clone(&self.program);
        let oracle = Rc::clone(&self.oracle);
        let (body, info) = self.body_of(&program, name)?;

        self.compiled.insert(key.clone(), Compiled::InProgress);
        let mut buffer = OpBuffer::new();
        let translation = match translate(body, &info, &*oracle, self, &mut buffer) {
            Ok(translation) => translation,
            Err(error) => {
                self.compiled.remove(&key);
                return Err(error);
            }
        };
        logging::log_translation(body.name, buffer.len());

        let code = Rc::new(buffer.finish(body.name, translation.frame)?);
        self.compiled.insert(key, Compiled::Done(Rc::clone(&code)));
        Ok(code)
    }

    /// Readable listing of `name` with the call decisions of its compiled code
    pub fn listing(&mut self, name: &str) -> Result<String, InternalError> {
        let code = self.compile(name)?;
        let mut direct = Replay::default();
        for op in code.ops() {
            if let Op::CallDirect { target, .. } = op {
                direct.calls.insert(target.name.to_ascii_lowercase());
            }
        }
        direct.targets = self.callables.clone();
        direct.targets.extend(self.natives.clone());

        let program = Rc::clone(&self.program);
        let (body, info) = self.body_of(&program, name)?;
        let mut text = TextBackend::new();
        translate(body, &info, &*self.oracle, &mut direct, &mut text)?;
        text.finish()
    }
}

impl CallResolver for Compiler {
    fn resolve(&mut self, caller: &str, callee: &str) -> Result<Option<Direct>, InternalError> {
        let key = callee.to_ascii_lowercase();
        if let Some(Compiled::InProgress) = self.compiled.get(&key) {
            logging::log_compile_cycle(caller, callee);
            return Ok(None);
        }
        if let Some(target) = self.callables.get(&key).cloned() {
            self.compile(callee)?;
            return Ok(Some(Direct {
                name: callee.to_string(),
                target,
            }));
        }
        Ok(self.natives.get(&key).map(|target| Direct {
            name: callee.to_string(),
            target: target.clone(),
        }))
    }
}

/// Re-issues the direct calls a compiled function made
#[derive(Default)]
struct Replay {
    calls: HashSet<String>,
    targets: HashMap<String, Weak<dyn Callable>>,
}

impl CallResolver for Replay {
    fn resolve(&mut self, _caller: &str, callee: &str) -> Result<Option<Direct>, InternalError> {
        let key = callee.to_ascii_lowercase();
        if !self.calls.contains(&key) {
            return Ok(None);
        }
        Ok(self.targets.get(&key).map(|target| Direct {
            name: callee.to_string(),
            target: target.clone(),
        }))
    }
}

/// A program function that runs as compiled code
pub struct CompiledCallable {
    name: String,
    by_ref: Vec<bool>,
    compiler: Rc<RefCell<Compiler>>,
}

impl CompiledCallable {
    pub fn new(name: &str, by_ref: Vec<bool>, compiler: Rc<RefCell<Compiler>>) -> Self {
        Self {
            name: name.to_string(),
            by_ref,
            compiler,
        }
    }
}

impl Callable for CompiledCallable {
    fn name(&self) -> &str {
        &self.name
    }

    fn param_by_ref(&self, index: usize) -> bool {
        self.by_ref.get(index).copied().unwrap_or(false)
    }

    fn call(
        &self,
        rt: &mut dyn Runtime,
        this: Option<Value>,
        args: Vec<Arg>,
    ) -> Result<Value, RuntimeError> {
        let code = self.compiler.borrow_mut().compile(&self.name)?;
        rt.push_frame(this)?;
        let result = vm::execute(&code, rt, args);
        rt.pop_frame();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phpeval_analyze::AnalyzeConfig;

    fn compiler(source: &str) -> (Rc<RefCell<Compiler>>, Vec<Rc<dyn Callable>>) {
        let program = Rc::new(Program::from_json(source).unwrap());
        let oracle = Rc::new(SignatureTable::from_program(&program));
        let analysis = Rc::new(ProgramAnalysis::analyze(
            &program,
            &AnalyzeConfig::default(),
            &*oracle,
        ));
        let compiler = Rc::new(RefCell::new(Compiler::new(
            Rc::clone(&program),
            analysis,
            oracle,
        )));
        let mut callables = Vec::new();
        for def in &program.functions {
            let by_ref = def.params.iter().map(|p| p.by_ref).collect();
            let callable: Rc<dyn Callable> =
                Rc::new(CompiledCallable::new(&def.name, by_ref, Rc::clone(&compiler)));
            compiler.borrow_mut().register_callable(&def.name, &callable);
            callables.push(callable);
        }
        (compiler, callables)
    }

    const CALLS: &str = r#"{
        "functions": [
            {"name": "leaf", "params": [], "body": [{"Return": {"Literal": {"Long": 1}}}]},
            {"name": "outer", "params": [], "body": [
                {"Return": {"Call": {"name": "leaf", "args": []}}}
            ]},
            {"name": "self_loop", "params": [], "body": [
                {"Return": {"Call": {"name": "self_loop", "args": []}}}
            ]}
        ],
        "main": []
    }"#;

    #[test]
    fn test_callee_compiled_for_direct_call() {
        let (compiler, _callables) = compiler(CALLS);
        let listing = compiler.borrow_mut().listing("outer").unwrap();
        assert!(listing.contains("call.direct leaf/0"), "{}", listing);
        assert!(compiler.borrow().is_compiled("leaf"));
    }

    #[test]
    fn test_self_recursion_uses_named_call() {
        let (compiler, _callables) = compiler(CALLS);
        let listing = compiler.borrow_mut().listing("self_loop").unwrap();
        assert!(listing.contains("call self_loop/0"), "{}", listing);
        assert!(!listing.contains("call.direct"), "{}", listing);
    }

    #[test]
    fn test_unknown_function() {
        let (compiler, _callables) = compiler(CALLS);
        let err = compiler.borrow_mut().compile("nope").unwrap_err();
        assert_eq!(err, InternalError::UnknownFunction("nope".to_string()));
    }
}
