//! Spreadsheet formula interpreter for the reference pricing template.
//!
//! Read-only: the workbook is never modified. Callers pin cells with
//! [`Overrides`] to ask what-if questions.

mod eval;
mod lexer;
mod parser;
mod value;

use thiserror::Error;

#[allow(unused_imports)]
pub use eval::{Evaluator, Overrides};
#[allow(unused_imports)]
pub use parser::{parse, Expr, RefKind, Reference};
pub use value::Value;

/// Failure inside a single evaluation. Cell lookups never surface these;
/// they degrade to the cached value or blank instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("division by zero")]
    DivideByZero,
    #[error("unsupported function {0}")]
    UnsupportedFunction(String),
    #[error("{function} takes {expected} arguments")]
    Arity {
        function: &'static str,
        expected: &'static str,
    },
    #[error("type mismatch: {0}")]
    Type(String),
    #[error("range used where a single value is required")]
    RangeInScalarContext,
    #[error("formula nesting deeper than {0}")]
    DepthExceeded(usize),
}
