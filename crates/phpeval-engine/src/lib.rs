//! phpeval-engine: Interpretation and compiled execution of phpeval programs
//!
//! A program runs under one of two strategies with identical observable
//! behavior:
//!
//! - [`Strategy::Interpret`] walks the AST against the runtime
//! - [`Strategy::Compile`] translates each analyzed function into stack code
//!   on first call and runs it on the VM
//!
//! # Example
//!
//! ```
//! use phpeval_core::{Env, Program};
//! use phpeval_engine::{Engine, Strategy};
//!
//! let program = Program::from_json(r#"{"main": [
//!     {"Expr": {"Assign": {"target": {"Var": "a"}, "value": {"Literal": {"Long": 1}}}}},
//!     {"Expr": {"AssignRef": {"target": {"Var": "b"}, "value": {"Var": "a"}}}},
//!     {"Expr": {"Assign": {"target": {"Var": "b"}, "value": {"Literal": {"Long": 2}}}}},
//!     {"Echo": [{"Var": "a"}]}
//! ]}"#).unwrap();
//!
//! for strategy in [Strategy::Interpret, Strategy::Compile] {
//!     let engine = Engine::new(program.clone(), strategy);
//!     let mut env = Env::new();
//!     engine.run(&mut env).unwrap();
//!     assert_eq!(env.output(), "2");
//! }
//! ```

pub mod builtins;
pub mod compiler;
pub mod interp;
pub mod place;
pub mod semantics;
pub mod translate;
pub mod vm;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use phpeval_analyze::{logging, AnalyzeConfig, AnalyzeError, ProgramAnalysis, SignatureTable};
use phpeval_core::ast::{Program, MAIN_FUNCTION};
use phpeval_core::value::Value;
use phpeval_core::{Callable, Env, InternalError, RuntimeError};
use serde::{Deserialize, Serialize};

pub use compiler::{CompiledCallable, Compiler};
pub use interp::{Evaluate, InterpretedFunction};

/// How program code is executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Interpret,
    Compile,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Interpret => f.write_str("interpret"),
            Strategy::Compile => f.write_str("compile"),
        }
    }
}

/// Errors from running or inspecting a program
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
}

impl From<InternalError> for EngineError {
    fn from(error: InternalError) -> Self {
        EngineError::Runtime(error.into())
    }
}

/// A program prepared for execution
pub struct Engine {
    program: Rc<Program>,
    strategy: Strategy,
    analysis: Rc<ProgramAnalysis>,
    compiler: Rc<RefCell<Compiler>>,
    functions: Vec<Rc<dyn Callable>>,
    natives: Vec<Rc<dyn Callable>>,
}

impl Engine {
    pub fn new(program: Program, strategy: Strategy) -> Self {
        Self::with_config(program, strategy, &AnalyzeConfig::default())
    }

    /// Analyze `program` and create its function callables
    pub fn with_config(program: Program, strategy: Strategy, config: &AnalyzeConfig) -> Self {
        let program = Rc::new(program);
        let mut oracle = builtins::signatures();
        oracle.add_program(&program);
        let oracle: Rc<SignatureTable> = Rc::new(oracle);
        let analysis = Rc::new(ProgramAnalysis::analyze(&program, config, &*oracle));
        let compiler = Rc::new(RefCell::new(Compiler::new(
            Rc::clone(&program),
            Rc::clone(&analysis),
            oracle,
        )));

        let natives: Vec<Rc<dyn Callable>> = builtins::natives()
            .into_iter()
            .map(|native| native as Rc<dyn Callable>)
            .collect();
        let mut functions: Vec<Rc<dyn Callable>> = Vec::with_capacity(program.functions.len());
        {
            let mut registry = compiler.borrow_mut();
            for native in &natives {
                registry.register_native(native);
            }
            for def in &program.functions {
                let callable: Rc<dyn Callable> = match strategy {
                    Strategy::Interpret => Rc::new(InterpretedFunction::new(def.clone())),
                    Strategy::Compile => {
                        let by_ref = def.params.iter().map(|p| p.by_ref).collect();
                        Rc::new(CompiledCallable::new(&def.name, by_ref, Rc::clone(&compiler)))
                    }
                };
                registry.register_callable(&def.name, &callable);
                functions.push(callable);
            }
        }

        Self {
            program,
            strategy,
            analysis,
            compiler,
            functions,
            natives,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn analysis(&self) -> &ProgramAnalysis {
        &self.analysis
    }

    /// Install the program's functions into `env` and run the main body
    pub fn run(&self, env: &mut Env) -> Result<Value, EngineError> {
        logging::section(&format!("RUN ({})", self.strategy));
        for callable in self.natives.iter().chain(&self.functions) {
            env.register_function(Rc::clone(callable));
        }
        let result = match self.strategy {
            Strategy::Interpret => match interp::exec_block(&self.program.main, env)? {
                interp::Flow::Return(value) => value,
                _ => Value::Null,
            },
            Strategy::Compile => {
                let code = self.compiler.borrow_mut().compile(MAIN_FUNCTION)?;
                vm::execute(&code, env, Vec::new())?
            }
        };
        logging::log(&format!("Main returned {}", result.type_name()));
        Ok(result)
    }

    /// Target listing of a function, or of the main body for `{main}`
    pub fn listing(&self, name: &str) -> Result<String, EngineError> {
        if name != MAIN_FUNCTION {
            self.analysis.require(name)?;
        }
        Ok(self.compiler.borrow_mut().listing(name)?)
    }
}
