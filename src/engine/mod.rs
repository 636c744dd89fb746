//! Execution engine
//!
//! Walks a validated [`Program`] against a [`Context`]. Faults end the
//! current run only.

mod context;
mod eval;
mod host;
mod value;

pub use context::{CancelToken, Context, DEFAULT_MAX_DEPTH};
pub use eval::EvalResult;
pub use host::{BufferHost, Host, StdoutHost};
pub use value::Value;

use thiserror::Error;

use crate::frontend::ast::Program;
use crate::utils::Span;

/// What went wrong at runtime
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FaultKind {
    #[error("division by zero")]
    DivisionByZero,

    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("integer overflow")]
    IntegerOverflow,

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("unknown field `{0}`")]
    UnknownField(String),

    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),

    #[error("`{0}` is not callable")]
    NotCallable(String),

    #[error("`{name}` expects {expected} argument(s), found {found}")]
    ArityMismatch {
        name: String,
        expected: String,
        found: usize,
    },

    #[error("invalid conversion: {0}")]
    InvalidConversion(String),

    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    #[error("recursion limit of {0} calls exceeded")]
    RecursionLimit(usize),

    #[error("invalid base: {0}")]
    InvalidBase(String),

    #[error("malformed program: {0}")]
    Malformed(String),

    #[error("host i/o error: {0}")]
    Io(String),

    #[error("evaluation cancelled")]
    Cancelled,
}

/// A fault with the span of the construct that raised it
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}")]
pub struct RuntimeFault {
    pub kind: FaultKind,
    pub span: Span,
}

impl RuntimeFault {
    pub fn new(kind: FaultKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Evaluate `program` in `ctx`
pub fn evaluate(program: &Program, ctx: &mut Context) -> EvalResult<Value> {
    ctx.evaluate(program)
}
