//! Error types
//!
//! Two families exist. [`SemanticError`]s describe PHP-level problems
//! (undefined variable, undefined function, ...) and are handed to the
//! runtime's reporting hook, which decides whether evaluation continues.
//! [`InternalError`]s are consistency violations inside the engine; they
//! propagate as [`RuntimeError::Internal`] and are never reported as PHP
//! errors.

use crate::ast::NodeId;

/// Errors that abort evaluation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("PHP Fatal error: {message}{}", line_suffix(.line))]
    Fatal { message: String, line: u32 },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Modulo by zero")]
    ModuloByZero,

    #[error("Bit shift by negative number")]
    NegativeShift,

    #[error("Unsupported operand types: {left} {op} {right}")]
    UnsupportedOperands {
        left: &'static str,
        op: &'static str,
        right: &'static str,
    },

    #[error("Evaluation budget exhausted")]
    BudgetExhausted,

    #[error("Maximum call depth of {0} reached")]
    CallDepthExceeded(usize),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

fn line_suffix(line: &u32) -> String {
    if *line == 0 {
        String::new()
    } else {
        format!(" on line {}", line)
    }
}

impl RuntimeError {
    pub fn fatal(message: impl Into<String>, line: u32) -> Self {
        RuntimeError::Fatal {
            message: message.into(),
            line,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, RuntimeError::Internal(_))
    }
}

/// Engine consistency violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InternalError {
    #[error("{0} is not assignable")]
    NotAssignable(&'static str),

    #[error("{0} cannot be unset")]
    NotUnsettable(&'static str),

    #[error("node {0} was generated without analysis facts")]
    NotAnalyzed(NodeId),

    #[error("variable ${name} is stored as {storage}, which cannot hold a reference")]
    NotReferenceable { name: String, storage: String },

    #[error("variable ${name} is stored as {storage}, which cannot hold a container")]
    NotContainer { name: String, storage: String },

    #[error("no analysis for function {0}")]
    UnknownFunction(String),

    #[error("function {0} re-entered its own compilation")]
    CompileCycle(String),

    #[error("operand stack: {0}")]
    Stack(String),

    #[error("unknown label L{0}")]
    UnknownLabel(u32),

    #[error("scope close without matching open")]
    UnbalancedScope,
}

/// Category of a reported PHP-level error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UndefinedVariable,
    UndefinedIndex,
    UndefinedProperty,
    UndefinedFunction,
    UndefinedMethod,
    ThisOutsideObject,
    ScalarAsContainer,
    IllegalOffset,
    ArgumentCount,
    ReferenceArgument,
    AppendRead,
    ArrayFull,
    InvalidArgument,
}

impl ErrorKind {
    /// PHP severity label
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::UndefinedFunction
            | ErrorKind::UndefinedMethod
            | ErrorKind::ThisOutsideObject
            | ErrorKind::ArgumentCount
            | ErrorKind::AppendRead => "Fatal error",
            ErrorKind::ReferenceArgument => "Notice",
            _ => "Warning",
        }
    }
}

/// A PHP-level error handed to the runtime's reporting hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticError {
    pub kind: ErrorKind,
    pub message: String,
    pub line: u32,
}

impl SemanticError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, line: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            line,
        }
    }

    pub fn undefined_variable(name: &str, line: u32) -> Self {
        Self::new(
            ErrorKind::UndefinedVariable,
            format!("Undefined variable ${}", name),
            line,
        )
    }
}

impl std::fmt::Display for SemanticError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PHP {}: {}{}", self.kind.label(), self.message, line_suffix(&self.line))
    }
}
