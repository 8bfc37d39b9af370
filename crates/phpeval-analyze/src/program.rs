//! Program-level analysis and callee signatures

use std::collections::HashMap;
use std::sync::Arc;

use phpeval_core::ast::{Expr, Program};
use phpeval_core::{visit, NodeCounter};
use rayon::prelude::*;

use crate::analyzer::{analyze_function, FunctionBody};
use crate::config::AnalyzeConfig;
use crate::info::FunctionInfo;
use crate::issue::IssueCollection;
use crate::logging;
use crate::AnalyzeError;

/// What a call site needs to know about its callee
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalleeSignature {
    pub by_ref: Vec<bool>,
    pub uses_caller_scope: bool,
}

impl CalleeSignature {
    pub fn new(by_ref: Vec<bool>) -> Self {
        Self {
            by_ref,
            uses_caller_scope: false,
        }
    }

    pub fn with_caller_scope(mut self) -> Self {
        self.uses_caller_scope = true;
        self
    }

    pub fn param_by_ref(&self, index: usize) -> bool {
        self.by_ref.get(index).copied().unwrap_or(false)
    }
}

/// Which arguments of a call are passed as references
///
/// With an unknown callee every plain variable argument is, since the
/// callee may declare the parameter by reference.
pub fn argument_modes(signature: Option<&CalleeSignature>, args: &[Expr]) -> Vec<bool> {
    args.iter()
        .enumerate()
        .map(|(i, arg)| match signature {
            Some(sig) => sig.param_by_ref(i) && arg.is_assignable(),
            None => arg.var_name().is_some(),
        })
        .collect()
}

/// Source of callee signatures for call sites
pub trait CalleeOracle: Sync {
    fn signature(&self, name: &str) -> Option<CalleeSignature>;
}

/// Signatures keyed by lowercase function name
#[derive(Debug, Clone, Default)]
pub struct SignatureTable {
    signatures: HashMap<String, CalleeSignature>,
}

impl SignatureTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signatures of a program's user functions
    pub fn from_program(program: &Program) -> Self {
        let mut table = Self::new();
        table.add_program(program);
        table
    }

    pub fn add_program(&mut self, program: &Program) {
        for function in &program.functions {
            let by_ref = function.params.iter().map(|p| p.by_ref).collect();
            self.insert(&function.name, CalleeSignature::new(by_ref));
        }
    }

    pub fn insert(&mut self, name: &str, signature: CalleeSignature) {
        self.signatures.insert(name.to_ascii_lowercase(), signature);
    }

    pub fn with(mut self, name: &str, signature: CalleeSignature) -> Self {
        self.insert(name, signature);
        self
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

impl CalleeOracle for SignatureTable {
    fn signature(&self, name: &str) -> Option<CalleeSignature> {
        self.signatures.get(&name.to_ascii_lowercase()).cloned()
    }
}

/// Analysis results for every function of a program
#[derive(Debug)]
pub struct ProgramAnalysis {
    functions: HashMap<String, Arc<FunctionInfo>>,
    main: Arc<FunctionInfo>,
}

impl ProgramAnalysis {
    /// Analyze all functions in parallel, then the main body
    pub fn analyze(program: &Program, config: &AnalyzeConfig, oracle: &dyn CalleeOracle) -> Self {
        logging::section("PROGRAM ANALYSIS");
        let mut counter = NodeCounter::default();
        visit(&mut counter, program);
        logging::log(&format!(
            "Functions: {}, statements: {}, expressions: {}",
            program.functions.len(),
            counter.stmts,
            counter.exprs
        ));

        let infos: Vec<FunctionInfo> = program
            .functions
            .par_iter()
            .map(|def| analyze_function(FunctionBody::of(def), config, oracle))
            .collect();

        let functions = infos
            .into_iter()
            .map(|info| (info.name.to_ascii_lowercase(), Arc::new(info)))
            .collect();
        let main = Arc::new(analyze_function(FunctionBody::main(program), config, oracle));

        Self { functions, main }
    }

    pub fn function(&self, name: &str) -> Option<&Arc<FunctionInfo>> {
        self.functions.get(&name.to_ascii_lowercase())
    }

    pub fn require(&self, name: &str) -> Result<&Arc<FunctionInfo>, AnalyzeError> {
        self.function(name)
            .ok_or_else(|| AnalyzeError::UnknownFunction(name.to_string()))
    }

    pub fn main(&self) -> &Arc<FunctionInfo> {
        &self.main
    }

    /// User functions sorted by name, then the main body
    pub fn all(&self) -> Vec<&Arc<FunctionInfo>> {
        let mut all: Vec<&Arc<FunctionInfo>> = self.functions.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all.push(&self.main);
        all
    }

    pub fn issues(&self) -> IssueCollection {
        self.all()
            .into_iter()
            .flat_map(|info| info.issues.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phpeval_core::ast::{FunctionDef, Param, Stmt};
    use phpeval_core::ExprFactory;

    #[test]
    fn test_signature_table_is_case_insensitive() {
        let table = SignatureTable::new().with("Sort", CalleeSignature::new(vec![true]));
        assert_eq!(table.signature("sort").map(|s| s.param_by_ref(0)), Some(true));
        assert_eq!(table.signature("SORT").map(|s| s.param_by_ref(1)), Some(false));
        assert!(table.signature("usort").is_none());
    }

    #[test]
    fn test_argument_modes() {
        let mut f = ExprFactory::new();
        let args = vec![f.var("a"), f.long(1), f.var("b")];
        let sig = CalleeSignature::new(vec![true, true, false]);
        assert_eq!(argument_modes(Some(&sig), &args), vec![true, false, false]);
        assert_eq!(argument_modes(None, &args), vec![true, false, true]);
    }

    #[test]
    fn test_analyze_program() {
        let mut f = ExprFactory::new();
        let n = f.var("n");
        let inc = FunctionDef::new(
            "inc",
            vec![Param::new("n").by_ref()],
            vec![Stmt::Expr(f.post_inc(n))],
        );
        let x = f.var("x");
        let zero = f.long(0);
        let init = f.assign(x, zero);
        let x = f.var("x");
        let call = f.call("inc", vec![x]);
        let program = Program::new(vec![inc], vec![Stmt::Expr(init), Stmt::Expr(call)]);
        let oracle = SignatureTable::from_program(&program);
        let analysis = ProgramAnalysis::analyze(&program, &AnalyzeConfig::default(), &oracle);

        let inc = analysis.require("INC").unwrap();
        let n = inc.bindings.find("n").unwrap();
        assert!(inc.binding(n).is_reference_argument);
        let main = analysis.main();
        let x = main.bindings.find("x").unwrap();
        assert!(main.binding(x).is_aliased);
        assert!(analysis.require("missing").is_err());
        assert!(analysis.issues().is_empty());
    }
}
