//! Formula language.
//!
//! This module handles the expressions used by filters and added columns:
//! - Parser: source text to an expression tree (pest grammar in `formula.pest`)
//! - Evaluator: typed evaluation against one row
//! - Functions: plugin and native custom functions

pub mod ast;
pub mod evaluator;
pub mod functions;
pub mod ops;
pub mod parser;
pub mod value;

pub use evaluator::{ColumnMap, Columns, Evaluator, Formula};
pub use functions::{CustomFunction, FunctionRegistry, NativeFn, DEFAULT_PLUGIN_DIR, MAX_CALL_DEPTH};
pub use value::Value;
