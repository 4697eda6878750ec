//! Operator semantics
//!
//! No implicit coercion between strings and numbers: `'1' + 2` is a type
//! error. Booleans act as the integers 0 and 1 in arithmetic.

use std::cmp::Ordering;

use super::ast::{BinaryOp, UnaryOp};
use super::value::Value;
use crate::error::EvalCause;

/// Upper bound on the byte length produced by `str * int`.
const MAX_REPEAT_LEN: usize = 64 * 1024 * 1024;

/// Numeric view of an operand.
#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        match value {
            Value::Int(n) => Some(Num::Int(*n)),
            Value::Float(x) => Some(Num::Float(*x)),
            Value::Bool(b) => Some(Num::Int(i64::from(*b))),
            Value::Str(_) => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(x) => x,
        }
    }
}

fn mismatch(op: BinaryOp, left: &Value, right: &Value) -> EvalCause {
    EvalCause::TypeMismatch {
        op: op.symbol(),
        left: left.type_name(),
        right: right.type_name(),
    }
}

/// Apply a unary operator.
pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value, EvalCause> {
    if op == UnaryOp::Not {
        return Ok(Value::Bool(!operand.is_truthy()));
    }

    let bad = || EvalCause::BadOperand {
        op: op.symbol(),
        operand: operand.type_name(),
    };
    match (op, Num::of(operand).ok_or_else(bad)?) {
        (UnaryOp::Neg, Num::Int(n)) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or(EvalCause::Overflow("-")),
        (UnaryOp::Neg, Num::Float(x)) => Ok(Value::Float(-x)),
        (_, Num::Int(n)) => Ok(Value::Int(n)),
        (_, Num::Float(x)) => Ok(Value::Float(x)),
    }
}

/// Apply an arithmetic or comparison operator.
///
/// `and`/`or` short-circuit and are handled by the evaluator.
pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalCause> {
    match op {
        BinaryOp::Add => add(left, right),
        BinaryOp::Sub | BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod => {
            match (Num::of(left), Num::of(right)) {
                (Some(a), Some(b)) => arithmetic(op, a, b),
                _ => Err(mismatch(op, left, right)),
            }
        }
        BinaryOp::Mul => multiply(left, right),
        BinaryOp::Eq => Ok(Value::Bool(equals(left, right))),
        BinaryOp::Ne => Ok(Value::Bool(!equals(left, right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(op, left, right)?;
            let result = match op {
                BinaryOp::Lt => ordering == Some(Ordering::Less),
                BinaryOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                BinaryOp::Gt => ordering == Some(Ordering::Greater),
                _ => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::And | BinaryOp::Or => Err(mismatch(op, left, right)),
    }
}

fn add(left: &Value, right: &Value) -> Result<Value, EvalCause> {
    if let (Value::Str(a), Value::Str(b)) = (left, right) {
        let mut joined = String::with_capacity(a.len() + b.len());
        joined.push_str(a);
        joined.push_str(b);
        return Ok(Value::Str(joined));
    }
    match (Num::of(left), Num::of(right)) {
        (Some(a), Some(b)) => arithmetic(BinaryOp::Add, a, b),
        _ => Err(mismatch(BinaryOp::Add, left, right)),
    }
}

fn multiply(left: &Value, right: &Value) -> Result<Value, EvalCause> {
    match (left, right) {
        (Value::Str(s), count @ (Value::Int(_) | Value::Bool(_)))
        | (count @ (Value::Int(_) | Value::Bool(_)), Value::Str(s)) => {
            let times = match Num::of(count) {
                Some(Num::Int(n)) => usize::try_from(n).unwrap_or(0),
                _ => 0,
            };
            s.len()
                .checked_mul(times)
                .filter(|total| *total <= MAX_REPEAT_LEN)
                .ok_or(EvalCause::Overflow("*"))?;
            Ok(Value::Str(s.repeat(times)))
        }
        _ => match (Num::of(left), Num::of(right)) {
            (Some(a), Some(b)) => arithmetic(BinaryOp::Mul, a, b),
            _ => Err(mismatch(BinaryOp::Mul, left, right)),
        },
    }
}

fn arithmetic(op: BinaryOp, a: Num, b: Num) -> Result<Value, EvalCause> {
    if let (Num::Int(x), Num::Int(y)) = (a, b) {
        return int_arithmetic(op, x, y);
    }

    let (x, y) = (a.as_f64(), b.as_f64());
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod if y == 0.0 => {
            return Err(EvalCause::DivisionByZero)
        }
        BinaryOp::Div => x / y,
        BinaryOp::FloorDiv => (x / y).floor(),
        BinaryOp::Mod => {
            let r = x % y;
            if r != 0.0 && (r < 0.0) != (y < 0.0) {
                r + y
            } else {
                r
            }
        }
        _ => return Err(EvalCause::Overflow(op.symbol())),
    };
    Ok(Value::Float(result))
}

fn int_arithmetic(op: BinaryOp, x: i64, y: i64) -> Result<Value, EvalCause> {
    let overflow = || EvalCause::Overflow(op.symbol());
    match op {
        BinaryOp::Add => x.checked_add(y).map(Value::Int).ok_or_else(overflow),
        BinaryOp::Sub => x.checked_sub(y).map(Value::Int).ok_or_else(overflow),
        BinaryOp::Mul => x.checked_mul(y).map(Value::Int).ok_or_else(overflow),
        _ if y == 0 => Err(EvalCause::DivisionByZero),
        BinaryOp::Div => Ok(Value::Float(x as f64 / y as f64)),
        BinaryOp::FloorDiv => {
            let q = x.checked_div(y).ok_or_else(overflow)?;
            // round toward negative infinity
            if x % y != 0 && ((x < 0) != (y < 0)) {
                Ok(Value::Int(q - 1))
            } else {
                Ok(Value::Int(q))
            }
        }
        BinaryOp::Mod => {
            let r = x.checked_rem(y).ok_or_else(overflow)?;
            if r != 0 && ((r < 0) != (y < 0)) {
                Ok(Value::Int(r + y))
            } else {
                Ok(Value::Int(r))
            }
        }
        _ => Err(overflow()),
    }
}

fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Str(_), _) | (_, Value::Str(_)) => false,
        _ => match (Num::of(left), Num::of(right)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
            (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
            _ => false,
        },
    }
}

/// `None` means unordered (NaN involved).
fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<Option<Ordering>, EvalCause> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
        _ => match (Num::of(left), Num::of(right)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => Ok(Some(a.cmp(&b))),
            (Some(a), Some(b)) => Ok(a.as_f64().partial_cmp(&b.as_f64())),
            _ => Err(mismatch(op, left, right)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Value {
        Value::from(text)
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(binary(BinaryOp::Add, &s("10"), &s("20")).unwrap(), s("1020"));
    }

    #[test]
    fn test_no_coercion_between_contexts() {
        let err = binary(BinaryOp::Add, &s("1"), &Value::Int(20)).unwrap_err();
        assert_eq!(
            err,
            EvalCause::TypeMismatch {
                op: "+",
                left: "str",
                right: "int"
            }
        );
        assert!(binary(BinaryOp::Gt, &s("5"), &Value::Int(10)).is_err());
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(binary(BinaryOp::Add, &Value::Int(10), &Value::Int(21)).unwrap(), Value::Int(31));
        assert_eq!(binary(BinaryOp::Div, &Value::Int(7), &Value::Int(2)).unwrap(), Value::Float(3.5));
        assert_eq!(binary(BinaryOp::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap(), Value::Int(-4));
        assert_eq!(binary(BinaryOp::Mod, &Value::Int(-7), &Value::Int(3)).unwrap(), Value::Int(2));
        assert_eq!(
            binary(BinaryOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err(),
            EvalCause::DivisionByZero
        );
        assert_eq!(
            binary(BinaryOp::Add, &Value::Int(i64::MAX), &Value::Int(1)).unwrap_err(),
            EvalCause::Overflow("+")
        );
    }

    #[test]
    fn test_mixed_numeric() {
        assert_eq!(binary(BinaryOp::Mul, &Value::Int(2), &Value::Float(1.5)).unwrap(), Value::Float(3.0));
        assert_eq!(binary(BinaryOp::Add, &Value::Bool(true), &Value::Int(1)).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_string_repeat() {
        assert_eq!(binary(BinaryOp::Mul, &s("ab"), &Value::Int(3)).unwrap(), s("ababab"));
        assert_eq!(binary(BinaryOp::Mul, &Value::Int(-1), &s("ab")).unwrap(), s(""));
        assert!(binary(BinaryOp::Mul, &s("ab"), &s("2")).is_err());
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(binary(BinaryOp::Gt, &Value::Int(20), &Value::Int(10)).unwrap(), Value::Bool(true));
        assert_eq!(binary(BinaryOp::Le, &Value::Float(2.0), &Value::Int(2)).unwrap(), Value::Bool(true));
        assert_eq!(binary(BinaryOp::Lt, &s("abc"), &s("abd")).unwrap(), Value::Bool(true));
        assert_eq!(binary(BinaryOp::Eq, &s("1"), &Value::Int(1)).unwrap(), Value::Bool(false));
        assert_eq!(binary(BinaryOp::Ne, &s("1"), &Value::Int(1)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_unary() {
        assert_eq!(unary(UnaryOp::Neg, &Value::Int(5)).unwrap(), Value::Int(-5));
        assert_eq!(unary(UnaryOp::Not, &s("")).unwrap(), Value::Bool(true));
        assert!(unary(UnaryOp::Neg, &s("5")).is_err());
    }
}
