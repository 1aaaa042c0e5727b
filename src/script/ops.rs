//! Operator semantics: arithmetic, comparison, membership, indexing.

use std::cmp::Ordering;

use crate::error::ScriptError;

use super::ast::{BinOp, CmpOp, UnaryOp};
use super::value::{lock, snapshot, Value};

/// Upper bound on the length of a sequence built by `*` or `range`.
pub const MAX_SEQUENCE_LEN: usize = 10_000_000;

pub fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
        return int_binary(op, a, b);
    }

    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            let mut joined = String::with_capacity(a.len() + b.len());
            joined.push_str(a);
            joined.push_str(b);
            return Ok(Value::str(joined));
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = snapshot(a);
            items.extend(snapshot(b));
            return Ok(Value::list(items));
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            let mut items = a.to_vec();
            items.extend(b.iter().cloned());
            return Ok(Value::tuple(items));
        }
        (BinOp::Mul, Value::Str(s), count) | (BinOp::Mul, count, Value::Str(s))
            if count.as_int().is_some() =>
        {
            let n = repeat_count(count, s.len())?;
            return Ok(Value::str(s.repeat(n)));
        }
        (BinOp::Mul, Value::List(items), count) | (BinOp::Mul, count, Value::List(items))
            if count.as_int().is_some() =>
        {
            let items = snapshot(items);
            let n = repeat_count(count, items.len())?;
            let mut repeated = Vec::with_capacity(items.len() * n);
            for _ in 0..n {
                repeated.extend(items.iter().cloned());
            }
            return Ok(Value::list(repeated));
        }
        _ => {}
    }

    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => float_binary(op, a, b),
        _ => Err(ScriptError::Type(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn repeat_count(count: &Value, unit_len: usize) -> Result<usize, ScriptError> {
    let n = usize::try_from(count.as_int().unwrap_or(0).max(0)).unwrap_or(0);
    if unit_len.saturating_mul(n) > MAX_SEQUENCE_LEN {
        return Err(ScriptError::Value("repeated sequence is too large".into()));
    }
    Ok(n)
}

fn overflow() -> ScriptError {
    ScriptError::Value("integer overflow".into())
}

fn int_binary(op: BinOp, a: i64, b: i64) -> Result<Value, ScriptError> {
    let result = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::Div => {
            if b == 0 {
                return Err(ScriptError::ZeroDivision);
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(ScriptError::ZeroDivision);
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            if (a % b != 0) && ((a < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(ScriptError::ZeroDivision);
            }
            let r = a.checked_rem(b).ok_or_else(overflow)?;
            if r != 0 && ((r < 0) != (b < 0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if b < 0 {
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
    };
    Ok(Value::Int(result))
}

fn float_binary(op: BinOp, a: f64, b: f64) -> Result<Value, ScriptError> {
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(ScriptError::ZeroDivision);
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(ScriptError::ZeroDivision);
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(ScriptError::ZeroDivision);
            }
            a - b * (a / b).floor()
        }
        BinOp::Pow => a.powf(b),
    };
    Ok(Value::Float(result))
}

pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value, ScriptError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!operand.truthy())),
        UnaryOp::Neg => match operand {
            Value::Float(f) => Ok(Value::Float(-f)),
            other => match other.as_int() {
                Some(i) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
                None => Err(ScriptError::Type(format!(
                    "bad operand type for unary -: '{}'",
                    other.type_name()
                ))),
            },
        },
        UnaryOp::Pos => match operand {
            Value::Float(_) => Ok(operand.clone()),
            other => other.as_int().map(Value::Int).ok_or_else(|| {
                ScriptError::Type(format!(
                    "bad operand type for unary +: '{}'",
                    other.type_name()
                ))
            }),
        },
    }
}

pub fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, ScriptError> {
    let result = match op {
        CmpOp::Eq => left.py_eq(right),
        CmpOp::NotEq => !left.py_eq(right),
        CmpOp::Is => left.is_same(right),
        CmpOp::IsNot => !left.is_same(right),
        CmpOp::In => contains(right, left)?,
        CmpOp::NotIn => !contains(right, left)?,
        CmpOp::Lt => order(left, right, "<")? == Ordering::Less,
        CmpOp::LtE => order(left, right, "<=")? != Ordering::Greater,
        CmpOp::Gt => order(left, right, ">")? == Ordering::Greater,
        CmpOp::GtE => order(left, right, ">=")? != Ordering::Less,
    };
    Ok(result)
}

/// Total order used by comparisons, `sorted`, `min` and `max`.
pub fn order(left: &Value, right: &Value, symbol: &str) -> Result<Ordering, ScriptError> {
    if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
        return Ok(a.cmp(&b));
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::List(a), Value::List(b)) => order_seq(&snapshot(a), &snapshot(b), symbol),
        (Value::Tuple(a), Value::Tuple(b)) => order_seq(a, b, symbol),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => Ok(a.partial_cmp(&b).unwrap_or(Ordering::Equal)),
            _ => Err(ScriptError::Type(format!(
                "'{symbol}' not supported between instances of '{}' and '{}'",
                left.type_name(),
                right.type_name()
            ))),
        },
    }
}

fn order_seq(a: &[Value], b: &[Value], symbol: &str) -> Result<Ordering, ScriptError> {
    for (x, y) in a.iter().zip(b) {
        if !x.py_eq(y) {
            return order(x, y, symbol);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

pub fn contains(container: &Value, item: &Value) -> Result<bool, ScriptError> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(&**needle)),
            other => Err(ScriptError::Type(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(snapshot(items).iter().any(|x| x.py_eq(item))),
        Value::Tuple(items) => Ok(items.iter().any(|x| x.py_eq(item))),
        Value::Dict(dict) => Ok(lock(dict).contains(item)),
        other => Err(ScriptError::Type(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

/// Materializes the items a `for` loop walks over.
pub fn iterate(value: &Value) -> Result<Vec<Value>, ScriptError> {
    match value {
        Value::List(items) => Ok(snapshot(items)),
        Value::Tuple(items) => Ok(items.to_vec()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
        Value::Dict(dict) => Ok(lock(dict).keys()),
        other => Err(ScriptError::Type(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

fn normalize_index(index: &Value, len: usize, what: &str) -> Result<usize, ScriptError> {
    let Some(i) = index.as_int() else {
        return Err(ScriptError::Type(format!(
            "{what} indices must be integers, not {}",
            index.type_name()
        )));
    };
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if i < 0 { i + len } else { i };
    if resolved < 0 || resolved >= len {
        return Err(ScriptError::Index(format!("{what} index out of range")));
    }
    Ok(resolved as usize)
}

pub fn get_item(container: &Value, index: &Value) -> Result<Value, ScriptError> {
    match container {
        Value::List(items) => {
            let items = lock(items);
            let i = normalize_index(index, items.len(), "list")?;
            Ok(items[i].clone())
        }
        Value::Tuple(items) => {
            let i = normalize_index(index, items.len(), "tuple")?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = normalize_index(index, chars.len(), "string")?;
            Ok(Value::str(chars[i].to_string()))
        }
        Value::Dict(dict) => lock(dict)
            .get(index)
            .ok_or_else(|| ScriptError::Key(index.repr())),
        other => Err(ScriptError::Type(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub fn set_item(container: &Value, index: Value, value: Value) -> Result<(), ScriptError> {
    match container {
        Value::List(items) => {
            let mut items = lock(items);
            let i = normalize_index(&index, items.len(), "list assignment")?;
            items[i] = value;
            Ok(())
        }
        Value::Dict(dict) => lock(dict).insert(index, value),
        other => Err(ScriptError::Type(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_division_and_modulo_follow_python() {
        assert_eq!(
            binary(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap(),
            Value::Int(-4)
        );
        assert_eq!(
            binary(BinOp::Mod, &Value::Int(-7), &Value::Int(2)).unwrap(),
            Value::Int(1)
        );
        assert_eq!(
            binary(BinOp::Mod, &Value::Int(7), &Value::Int(-2)).unwrap(),
            Value::Int(-1)
        );
    }

    #[test]
    fn test_true_division_is_float() {
        assert_eq!(
            binary(BinOp::Div, &Value::Int(7), &Value::Int(2)).unwrap(),
            Value::Float(3.5)
        );
        assert_eq!(
            binary(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err(),
            ScriptError::ZeroDivision
        );
    }

    #[test]
    fn test_overflow_is_an_error_not_a_panic() {
        assert!(binary(BinOp::Mul, &Value::Int(i64::MAX), &Value::Int(2)).is_err());
        assert!(binary(BinOp::Pow, &Value::Int(10), &Value::Int(100)).is_err());
        assert!(unary(UnaryOp::Neg, &Value::Int(i64::MIN)).is_err());
    }

    #[test]
    fn test_string_and_list_operators() {
        assert_eq!(
            binary(BinOp::Add, &Value::str("ab"), &Value::str("cd")).unwrap(),
            Value::str("abcd")
        );
        assert_eq!(
            binary(BinOp::Mul, &Value::str("ab"), &Value::Int(3)).unwrap(),
            Value::str("ababab")
        );
        assert_eq!(
            binary(BinOp::Mul, &Value::Int(2), &Value::list(vec![Value::Int(1)])).unwrap(),
            Value::list(vec![Value::Int(1), Value::Int(1)])
        );
        assert!(binary(BinOp::Mul, &Value::str("x"), &Value::Int(100_000_000)).is_err());
    }

    #[test]
    fn test_mixed_types_are_rejected() {
        let err = binary(BinOp::Add, &Value::str("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: unsupported operand type(s) for +: 'str' and 'int'"
        );
    }

    #[test]
    fn test_comparisons() {
        assert!(compare(CmpOp::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap());
        assert!(compare(CmpOp::GtE, &Value::str("b"), &Value::str("a")).unwrap());
        assert!(compare(CmpOp::In, &Value::str("ell"), &Value::str("hello")).unwrap());
        assert!(compare(
            CmpOp::NotIn,
            &Value::Int(3),
            &Value::list(vec![Value::Int(1), Value::Int(2)])
        )
        .unwrap());
        assert!(compare(CmpOp::Lt, &Value::str("a"), &Value::Int(1)).is_err());
    }

    #[test]
    fn test_negative_indexing() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(get_item(&list, &Value::Int(-1)).unwrap(), Value::Int(3));
        assert!(matches!(
            get_item(&list, &Value::Int(3)).unwrap_err(),
            ScriptError::Index(_)
        ));
    }

    #[test]
    fn test_dict_missing_key() {
        let dict = Value::dict(Default::default());
        assert_eq!(
            get_item(&dict, &Value::str("k")).unwrap_err(),
            ScriptError::Key("'k'".into())
        );
    }
}
