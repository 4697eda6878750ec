//! Formula evaluation
//!
//! A [`Formula`] is compiled once per run. For each row an [`Evaluator`]
//! is built over the row's columns, the sequence number and the shared
//! [`FunctionRegistry`]. The only names reachable from a formula are the
//! placeholders and the registered functions.

use std::collections::HashMap;

use super::ast::{BinaryOp, Context, Expr, UnaryOp};
use super::functions::FunctionRegistry;
use super::ops;
use super::parser::parse;
use super::value::{parse_int, Value};
use crate::error::{EvalCause, EvalError, EvalResult};

/// Read access to a row's columns for placeholders.
pub trait Columns {
    /// Case-insensitive lookup. `name` is already lowercased.
    fn lookup(&self, name: &str) -> Option<&str>;
}

/// Owned column values keyed by lowercased name.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    values: HashMap<String, String>,
}

impl ColumnMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_lowercase(), value.into());
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for ColumnMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = ColumnMap::new();
        for (name, value) in iter {
            map.insert(name.as_ref(), value);
        }
        map
    }
}

impl Columns for ColumnMap {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Name resolution for one evaluation frame.
pub(crate) trait Scope {
    fn column(&self, name: &str, context: Context) -> Result<Value, EvalCause>;
    fn sequence(&self, context: Context) -> Result<Value, EvalCause>;
    fn name(&self, name: &str) -> Result<Value, EvalCause>;
    fn call(&self, name: &str, args: &[Value]) -> Result<Value, EvalCause>;
}

/// Evaluate an expression tree in a scope.
pub(crate) fn eval(expr: &Expr, scope: &dyn Scope) -> Result<Value, EvalCause> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Column { name, context } => scope.column(name, *context),
        Expr::Sequence(context) => scope.sequence(*context),
        Expr::Name(name) => scope.name(name),
        Expr::Unary { op, operand } => {
            let value = eval(operand, scope)?;
            ops::unary(*op, &value)
        }
        Expr::Binary { op: BinaryOp::And, left, right } => {
            let left = eval(left, scope)?;
            if left.is_truthy() {
                eval(right, scope)
            } else {
                Ok(left)
            }
        }
        Expr::Binary { op: BinaryOp::Or, left, right } => {
            let left = eval(left, scope)?;
            if left.is_truthy() {
                Ok(left)
            } else {
                eval(right, scope)
            }
        }
        Expr::Binary { op, left, right } => {
            let left = eval(left, scope)?;
            let right = eval(right, scope)?;
            ops::binary(*op, &left, &right)
        }
        Expr::Call { name, args } => {
            let values = args
                .iter()
                .map(|arg| eval(arg, scope))
                .collect::<Result<Vec<_>, _>>()?;
            scope.call(name, &values)
        }
    }
}

/// Per-row evaluation context.
pub struct Evaluator<'a> {
    sequence: u64,
    columns: &'a dyn Columns,
    functions: &'a FunctionRegistry,
}

impl<'a> Evaluator<'a> {
    pub fn new(sequence: u64, columns: &'a dyn Columns, functions: &'a FunctionRegistry) -> Self {
        Self {
            sequence,
            columns,
            functions,
        }
    }

    /// Compile and evaluate formula source in one step.
    pub fn evaluate(&self, source: &str) -> EvalResult<Value> {
        Formula::compile(source).evaluate(self)
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence
    }
}

impl Scope for Evaluator<'_> {
    fn column(&self, name: &str, context: Context) -> Result<Value, EvalCause> {
        let raw = self.columns.lookup(name);
        Ok(match context {
            Context::Text => Value::Str(raw.unwrap_or_default().to_string()),
            Context::Integer => Value::Int(raw.and_then(parse_int).unwrap_or(0)),
        })
    }

    fn sequence(&self, context: Context) -> Result<Value, EvalCause> {
        Ok(match context {
            Context::Text => Value::Str(self.sequence.to_string()),
            Context::Integer => Value::Int(
                i64::try_from(self.sequence).map_err(|_| EvalCause::Overflow("@#"))?,
            ),
        })
    }

    fn name(&self, name: &str) -> Result<Value, EvalCause> {
        Err(EvalCause::UnknownName(name.to_string()))
    }

    fn call(&self, name: &str, args: &[Value]) -> Result<Value, EvalCause> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| EvalCause::UnknownFunction(name.to_string()))?;
        function.call(name, args)
    }
}

/// A formula compiled once and evaluated per row.
///
/// Compilation failures are kept and surface on every evaluation, so a bad
/// formula fails row by row exactly like a runtime error would.
#[derive(Debug, Clone)]
pub struct Formula {
    source: String,
    compiled: Result<Expr, EvalCause>,
}

impl Formula {
    pub fn compile(source: &str) -> Self {
        Self {
            source: source.to_string(),
            compiled: parse(source),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The compile error, if the source did not parse.
    pub fn compile_error(&self) -> Option<EvalError> {
        self.compiled
            .as_ref()
            .err()
            .map(|cause| EvalError::new(&self.source, cause.clone()))
    }

    pub fn evaluate(&self, evaluator: &Evaluator<'_>) -> EvalResult<Value> {
        let expr = self
            .compiled
            .as_ref()
            .map_err(|cause| EvalError::new(&self.source, cause.clone()))?;
        eval(expr, evaluator).map_err(|cause| EvalError::new(&self.source, cause))
    }

    /// The expression with placeholders replaced by the literals they
    /// resolve to for this row, e.g. `'1' + '20' + '1'`. Used in debug traces.
    pub fn substituted(&self, evaluator: &Evaluator<'_>) -> String {
        match &self.compiled {
            Ok(expr) => render(expr, evaluator),
            Err(_) => self.source.clone(),
        }
    }
}

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Binary { op, .. } => match op {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod => 6,
        },
        Expr::Unary { op: UnaryOp::Not, .. } => 3,
        Expr::Unary { .. } => 7,
        _ => 8,
    }
}

fn render(expr: &Expr, scope: &dyn Scope) -> String {
    let child = |inner: &Expr, min: u8| {
        let text = render(inner, scope);
        if precedence(inner) < min {
            format!("({})", text)
        } else {
            text
        }
    };

    match expr {
        Expr::Literal(value) => value.to_literal(),
        Expr::Column { name, context } => scope
            .column(name, *context)
            .map(|v| v.to_literal())
            .unwrap_or_else(|_| format!("[{}]", name)),
        Expr::Sequence(context) => scope
            .sequence(*context)
            .map(|v| v.to_literal())
            .unwrap_or_else(|_| "#".to_string()),
        Expr::Name(name) => name.clone(),
        Expr::Unary { op, operand } => {
            let prec = precedence(expr);
            match op {
                UnaryOp::Not => format!("not {}", child(operand, prec)),
                _ => format!("{}{}", op.symbol(), child(operand, prec)),
            }
        }
        Expr::Binary { op, left, right } => {
            let prec = precedence(expr);
            format!("{} {} {}", child(left, prec), op.symbol(), child(right, prec + 1))
        }
        Expr::Call { name, args } => {
            let rendered: Vec<String> = args.iter().map(|a| render(a, scope)).collect();
            format!("{}({})", name, rendered.join(", "))
        }
    }
}
