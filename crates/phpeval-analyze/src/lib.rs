//! phpeval-analyze: Flow-sensitive analysis of phpeval functions
//!
//! For every function this crate computes:
//!
//! - a sealed `BindingTable` with the storage class of each variable
//! - a `TypeFacet` and, for variable nodes, a `VarState` per expression node
//! - `Issue`s for reads of undefined or possibly undefined variables
//!
//! # Example
//!
//! ```
//! use phpeval_analyze::{AnalyzeConfig, ProgramAnalysis, SignatureTable};
//! use phpeval_core::Program;
//!
//! let program = Program::from_json(r#"{"main": [
//!     {"Expr": {"Assign": {"target": {"Var": "a"}, "value": {"Literal": {"Long": 1}}}}},
//!     {"Echo": [{"Var": "b"}]}
//! ]}"#).unwrap();
//!
//! let oracle = SignatureTable::from_program(&program);
//! let analysis = ProgramAnalysis::analyze(&program, &AnalyzeConfig::default(), &oracle);
//! assert_eq!(analysis.issues().error_count(), 1);
//! ```

pub mod analyzer;
pub mod binding;
pub mod config;
pub mod facet;
pub mod info;
pub mod issue;
pub mod logging;
pub mod program;
pub mod state;

pub use analyzer::{analyze_function, FunctionBody};
pub use binding::{BindingTable, StorageClass, VarId, VariableBinding};
pub use config::AnalyzeConfig;
pub use facet::TypeFacet;
pub use info::{FunctionInfo, NodeFacts, NodePhase};
pub use issue::{Issue, IssueCollection, Severity};
pub use program::{argument_modes, CalleeOracle, CalleeSignature, ProgramAnalysis, SignatureTable};
pub use state::{StateMap, VarState};

/// Errors that can occur during analysis
#[derive(Debug, thiserror::Error)]
pub enum AnalyzeError {
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
}
