//! phpeval-core: Node set, value model and runtime contract
//!
//! This crate provides:
//! - `ast`: Expression and statement nodes, deserializable from JSON
//! - `ExprFactory`: Node construction with fresh ids and concatenation folding
//! - `Visitor`: Trait for traversing node trees
//! - `value`: PHP values, copy-on-write arrays, object handles and alias cells
//! - `Runtime`: The environment evaluation runs against, with `Env` as default

pub mod ast;
pub mod env;
pub mod error;
pub mod factory;
pub mod value;
pub mod visitor;

pub use ast::{Expr, ExprKind, FunctionDef, NodeId, Program, Stmt};
pub use env::{Arg, Callable, Env, NativeFunction, Runtime};
pub use error::{ErrorKind, InternalError, RuntimeError, SemanticError};
pub use factory::ExprFactory;
pub use value::{AliasCell, Value};
pub use visitor::{visit, CallCollector, NodeCounter, Visitor};
