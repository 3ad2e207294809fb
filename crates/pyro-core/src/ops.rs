//! Operator semantics

use crate::continuation::Op;
use crate::error::{PyroError, Result};
use crate::value::Value;
use std::cmp::Ordering;

/// Apply `op` to operands in push order
pub fn apply(op: Op, args: Vec<Value>) -> Result<Value> {
    if args.len() != op.arity() {
        return Err(PyroError::Arity {
            name: op.symbol().to_string(),
            expected: op.arity(),
            got: args.len(),
        });
    }
    let mut args = args.into_iter();
    let (Some(a), b) = (args.next(), args.next()) else {
        return Err(PyroError::StackUnderflow);
    };

    match (op, b) {
        (Op::Not, _) => Ok(Value::Bool(!a.truthy())),
        (Op::Neg, _) => match a {
            Value::Int(i) => i.checked_neg().map(Value::Int).ok_or(PyroError::Overflow),
            Value::Float(x) => Ok(Value::Float(-x)),
            other => Err(type_error("-", &other, None)),
        },
        (Op::And, Some(b)) => Ok(Value::Bool(a.truthy() && b.truthy())),
        (Op::Or, Some(b)) => Ok(Value::Bool(a.truthy() || b.truthy())),
        (Op::Eq, Some(b)) => Ok(Value::Bool(a == b)),
        (Op::Ne, Some(b)) => Ok(Value::Bool(a != b)),
        (Op::Lt | Op::Le | Op::Gt | Op::Ge, Some(b)) => compare(op, &a, &b),
        (Op::Add, Some(b)) => add(a, b),
        (Op::Sub | Op::Mul | Op::Div | Op::Rem, Some(b)) => arithmetic(op, a, b),
        (_, None) => Err(PyroError::StackUnderflow),
    }
}

fn type_error(symbol: &str, a: &Value, b: Option<&Value>) -> PyroError {
    match b {
        Some(b) => PyroError::TypeError(format!(
            "cannot apply {} to {} and {}",
            symbol,
            a.type_name(),
            b.type_name()
        )),
        None => PyroError::TypeError(format!("cannot apply {} to {}", symbol, a.type_name())),
    }
}

fn add(a: Value, b: Value) -> Result<Value> {
    match (a, b) {
        (Value::Str(mut s), Value::Str(t)) => {
            s.push_str(&t);
            Ok(Value::Str(s))
        }
        (Value::List(mut items), Value::List(more)) => {
            items.extend(more);
            Ok(Value::List(items))
        }
        (a, b) => arithmetic(Op::Add, a, b),
    }
}

fn arithmetic(op: Op, a: Value, b: Value) -> Result<Value> {
    if let (Value::Int(x), Value::Int(y)) = (&a, &b) {
        let (x, y) = (*x, *y);
        let result = match op {
            Op::Add => x.checked_add(y),
            Op::Sub => x.checked_sub(y),
            Op::Mul => x.checked_mul(y),
            Op::Div if y == 0 => return Err(PyroError::DivisionByZero),
            Op::Div => x.checked_div(y),
            Op::Rem if y == 0 => return Err(PyroError::DivisionByZero),
            Op::Rem => x.checked_rem(y),
            _ => return Err(type_error(op.symbol(), &a, Some(&b))),
        };
        return result.map(Value::Int).ok_or(PyroError::Overflow);
    }

    let (Some(x), Some(y)) = (a.as_float(), b.as_float()) else {
        return Err(type_error(op.symbol(), &a, Some(&b)));
    };
    let result = match op {
        Op::Add => x + y,
        Op::Sub => x - y,
        Op::Mul => x * y,
        Op::Div => x / y,
        Op::Rem => x % y,
        _ => return Err(type_error(op.symbol(), &a, Some(&b))),
    };
    Ok(Value::Float(result))
}

fn compare(op: Op, a: &Value, b: &Value) -> Result<Value> {
    let ordering = match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => return Err(type_error(op.symbol(), a, Some(b))),
        },
    };
    // NaN compares false against everything
    let Some(ordering) = ordering else {
        return Ok(Value::Bool(false));
    };
    let result = match op {
        Op::Lt => ordering == Ordering::Less,
        Op::Le => ordering != Ordering::Greater,
        Op::Gt => ordering == Ordering::Greater,
        Op::Ge => ordering != Ordering::Less,
        _ => return Err(type_error(op.symbol(), a, Some(b))),
    };
    Ok(Value::Bool(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(apply(Op::Add, vec![int(2), int(3)]), Ok(int(5)));
        assert_eq!(apply(Op::Rem, vec![int(7), int(3)]), Ok(int(1)));
        assert_eq!(apply(Op::Div, vec![int(7), int(2)]), Ok(int(3)));
        assert_eq!(
            apply(Op::Div, vec![int(1), int(0)]),
            Err(PyroError::DivisionByZero)
        );
        assert_eq!(
            apply(Op::Mul, vec![int(i64::MAX), int(2)]),
            Err(PyroError::Overflow)
        );
    }

    #[test]
    fn test_mixed_numbers_promote_to_float() {
        assert_eq!(
            apply(Op::Mul, vec![int(2), Value::Float(1.5)]),
            Ok(Value::Float(3.0))
        );
        assert_eq!(
            apply(Op::Lt, vec![Value::Float(0.5), int(1)]),
            Ok(Value::Bool(true))
        );
    }

    #[test]
    fn test_concatenation() {
        assert_eq!(
            apply(Op::Add, vec!["ab".into(), "cd".into()]),
            Ok(Value::Str("abcd".into()))
        );
        assert_eq!(
            apply(Op::Add, vec![vec![int(1)].into(), vec![int(2)].into()]),
            Ok(Value::List(vec![int(1), int(2)]))
        );
    }

    #[test]
    fn test_logic_uses_truthiness() {
        assert_eq!(
            apply(Op::And, vec![int(1), "x".into()]),
            Ok(Value::Bool(true))
        );
        assert_eq!(apply(Op::Not, vec![int(0)]), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_type_and_arity_errors() {
        assert!(matches!(
            apply(Op::Sub, vec!["a".into(), int(1)]),
            Err(PyroError::TypeError(_))
        ));
        assert!(matches!(
            apply(Op::Add, vec![int(1)]),
            Err(PyroError::Arity { expected: 2, got: 1, .. })
        ));
    }
}
