//! Arithmetic, comparison and membership on builtin values.
//!
//! Helpers return `Ok(None)` when the operand types are not supported so the caller can fall
//! back to instance dunders or raise the CPython-format `TypeError`.

use std::cmp::Ordering;

use crate::{
    bytecode::{BinaryOperator, CompareOperator},
    exception_private::{ExcType, RunResult},
    resource::{check_sequence_len, repeated_len},
    types::Set,
    value::{Number, Value},
};

use super::format::percent_format;

/// Applies a binary operator to builtin operands.
pub(crate) fn binary_op(op: BinaryOperator, lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
    match op {
        BinaryOperator::Add => add(lhs, rhs),
        BinaryOperator::Sub => sub(lhs, rhs),
        BinaryOperator::Mul => mul(lhs, rhs),
        BinaryOperator::TrueDiv => true_div(lhs, rhs),
        BinaryOperator::FloorDiv => floor_div(lhs, rhs),
        BinaryOperator::Mod => modulo(lhs, rhs),
        BinaryOperator::Pow => pow(lhs, rhs),
        BinaryOperator::LShift | BinaryOperator::RShift => shift(op, lhs, rhs),
        BinaryOperator::And | BinaryOperator::Or | BinaryOperator::Xor => bitwise(op, lhs, rhs),
    }
}

/// Like [`binary_op`] but raising the unsupported-operand `TypeError`.
pub(crate) fn binary_op_or_error(op: BinaryOperator, lhs: &Value, rhs: &Value) -> RunResult<Value> {
    binary_op(op, lhs, rhs)?.ok_or_else(|| {
        ExcType::type_error_unsupported_operand(&op.to_string(), &lhs.type_name(), &rhs.type_name())
    })
}

fn numbers(lhs: &Value, rhs: &Value) -> Option<(Number, Number)> {
    Some((lhs.as_number()?, rhs.as_number()?))
}

fn add(lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
    Ok(Some(match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => {
            check_sequence_len(a.len().saturating_add(b.len()))?;
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            Value::from(s)
        }
        (Value::List(a), Value::List(b)) => {
            let (a, b) = (a.borrow(), b.borrow());
            check_sequence_len(a.len().saturating_add(b.len()))?;
            Value::list(a.iter().chain(b.iter()).cloned().collect())
        }
        (Value::Tuple(a), Value::Tuple(b)) => {
            check_sequence_len(a.len().saturating_add(b.len()))?;
            Value::tuple(a.iter().chain(b.iter()).cloned().collect())
        }
        _ => match numbers(lhs, rhs) {
            Some((Number::Int(a), Number::Int(b))) => Value::Int(a.checked_add(b).ok_or_else(ExcType::overflow)?),
            Some((a, b)) => Value::Float(a.as_f64() + b.as_f64()),
            None => return Ok(None),
        },
    }))
}

fn sub(lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
    if let (Value::Set(a), Value::Set(b)) = (lhs, rhs) {
        return Ok(Some(Value::set(set_difference(&a.borrow(), &b.borrow())?)));
    }
    Ok(Some(match numbers(lhs, rhs) {
        Some((Number::Int(a), Number::Int(b))) => Value::Int(a.checked_sub(b).ok_or_else(ExcType::overflow)?),
        Some((a, b)) => Value::Float(a.as_f64() - b.as_f64()),
        None => return Ok(None),
    }))
}

/// Repetition count for `seq * n`; negative counts repeat zero times.
fn repeat_count(count: &Value) -> Option<usize> {
    match count {
        Value::Int(n) if *n < 0 => Some(0),
        Value::Int(n) => Some(usize::try_from(*n).unwrap_or(usize::MAX)),
        Value::Bool(b) => Some(usize::from(*b)),
        _ => None,
    }
}

fn repeat(seq: &Value, count: usize) -> RunResult<Option<Value>> {
    Ok(Some(match seq {
        Value::Str(s) => {
            repeated_len(s.len(), count)?;
            Value::from(s.repeat(count))
        }
        Value::List(items) => {
            let items = items.borrow();
            let total = repeated_len(items.len(), count)?;
            Value::list(items.iter().cloned().cycle().take(total).collect())
        }
        Value::Tuple(items) => {
            let total = repeated_len(items.len(), count)?;
            Value::tuple(items.iter().cloned().cycle().take(total).collect())
        }
        _ => return Ok(None),
    }))
}

fn mul(lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
    if let Some(count) = repeat_count(rhs) {
        if let Some(value) = repeat(lhs, count)? {
            return Ok(Some(value));
        }
    }
    if let Some(count) = repeat_count(lhs) {
        if let Some(value) = repeat(rhs, count)? {
            return Ok(Some(value));
        }
    }
    Ok(Some(match numbers(lhs, rhs) {
        Some((Number::Int(a), Number::Int(b))) => Value::Int(a.checked_mul(b).ok_or_else(ExcType::overflow)?),
        Some((a, b)) => Value::Float(a.as_f64() * b.as_f64()),
        None => return Ok(None),
    }))
}

fn true_div(lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
    let Some((a, b)) = numbers(lhs, rhs) else {
        return Ok(None);
    };
    let divisor = b.as_f64();
    if divisor == 0.0 {
        let message = match (a, b) {
            (Number::Int(_), Number::Int(_)) => "division by zero",
            _ => "float division by zero",
        };
        return Err(ExcType::zero_division(message));
    }
    Ok(Some(Value::Float(a.as_f64() / divisor)))
}

/// Python floor division of integers: rounds toward negative infinity.
pub(crate) fn int_floor_div(a: i64, b: i64) -> RunResult<i64> {
    if b == 0 {
        return Err(ExcType::zero_division("integer division or modulo by zero"));
    }
    let quotient = a.checked_div(b).ok_or_else(ExcType::overflow)?;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        Ok(quotient - 1)
    } else {
        Ok(quotient)
    }
}

/// Python modulo of integers: the result takes the sign of the divisor.
pub(crate) fn int_mod(a: i64, b: i64) -> RunResult<i64> {
    if b == 0 {
        return Err(ExcType::zero_division("integer division or modulo by zero"));
    }
    let remainder = a.checked_rem(b).unwrap_or(0);
    if remainder != 0 && ((remainder < 0) != (b < 0)) {
        Ok(remainder + b)
    } else {
        Ok(remainder)
    }
}

fn float_mod(a: f64, b: f64) -> f64 {
    let remainder = a % b;
    if remainder != 0.0 && ((remainder < 0.0) != (b < 0.0)) {
        remainder + b
    } else {
        remainder
    }
}

fn floor_div(lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
    Ok(Some(match numbers(lhs, rhs) {
        Some((Number::Int(a), Number::Int(b))) => Value::Int(int_floor_div(a, b)?),
        Some((a, b)) => {
            let (a, b) = (a.as_f64(), b.as_f64());
            if b == 0.0 {
                return Err(ExcType::zero_division("float floor division by zero"));
            }
            Value::Float(((a - float_mod(a, b)) / b).round())
        }
        None => return Ok(None),
    }))
}

fn modulo(lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
    if let Value::Str(template) = lhs {
        return percent_format(template, rhs).map(|s| Some(Value::from(s)));
    }
    Ok(Some(match numbers(lhs, rhs) {
        Some((Number::Int(a), Number::Int(b))) => Value::Int(int_mod(a, b)?),
        Some((a, b)) => {
            let b = b.as_f64();
            if b == 0.0 {
                return Err(ExcType::zero_division("float modulo"));
            }
            Value::Float(float_mod(a.as_f64(), b))
        }
        None => return Ok(None),
    }))
}

fn pow(lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
    Ok(Some(match numbers(lhs, rhs) {
        Some((Number::Int(base), Number::Int(exp))) if exp >= 0 => {
            let exp = u32::try_from(exp).map_err(|_| ExcType::overflow())?;
            Value::Int(base.checked_pow(exp).ok_or_else(ExcType::overflow)?)
        }
        Some((base, exp)) => {
            let (base, exp) = (base.as_f64(), exp.as_f64());
            if base == 0.0 && exp < 0.0 {
                return Err(ExcType::zero_division("0.0 cannot be raised to a negative power"));
            }
            Value::Float(base.powf(exp))
        }
        None => return Ok(None),
    }))
}

fn int_operands(lhs: &Value, rhs: &Value) -> Option<(i64, i64)> {
    match numbers(lhs, rhs)? {
        (Number::Int(a), Number::Int(b)) => Some((a, b)),
        _ => None,
    }
}

fn shift(op: BinaryOperator, lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
    let Some((value, count)) = int_operands(lhs, rhs) else {
        return Ok(None);
    };
    if count < 0 {
        return Err(ExcType::ValueError.msg("negative shift count"));
    }
    let result = if op == BinaryOperator::LShift {
        if value == 0 {
            0
        } else if count >= 63 {
            return Err(ExcType::overflow());
        } else {
            let shifted = value << count;
            if shifted >> count != value {
                return Err(ExcType::overflow());
            }
            shifted
        }
    } else if count >= 64 {
        if value < 0 {
            -1
        } else {
            0
        }
    } else {
        value >> count
    };
    Ok(Some(Value::Int(result)))
}

fn bitwise(op: BinaryOperator, lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
    if let (Value::Bool(a), Value::Bool(b)) = (lhs, rhs) {
        return Ok(Some(Value::Bool(match op {
            BinaryOperator::And => a & b,
            BinaryOperator::Or => a | b,
            _ => a ^ b,
        })));
    }
    if let (Value::Set(a), Value::Set(b)) = (lhs, rhs) {
        let (a, b) = (a.borrow(), b.borrow());
        let result = match op {
            BinaryOperator::And => set_intersection(&a, &b)?,
            BinaryOperator::Or => set_union(&a, &b)?,
            _ => {
                let mut result = set_difference(&a, &b)?;
                for item in b.iter() {
                    if !a.contains(item)? {
                        result.add(item.clone())?;
                    }
                }
                result
            }
        };
        return Ok(Some(Value::set(result)));
    }
    let Some((a, b)) = int_operands(lhs, rhs) else {
        return Ok(None);
    };
    Ok(Some(Value::Int(match op {
        BinaryOperator::And => a & b,
        BinaryOperator::Or => a | b,
        _ => a ^ b,
    })))
}

pub(crate) fn set_union(a: &Set, b: &Set) -> RunResult<Set> {
    let mut result = a.clone();
    for item in b.iter() {
        result.add(item.clone())?;
    }
    Ok(result)
}

pub(crate) fn set_intersection(a: &Set, b: &Set) -> RunResult<Set> {
    let mut result = Set::new();
    for item in a.iter() {
        if b.contains(item)? {
            result.add(item.clone())?;
        }
    }
    Ok(result)
}

pub(crate) fn set_difference(a: &Set, b: &Set) -> RunResult<Set> {
    let mut result = Set::new();
    for item in a.iter() {
        if !b.contains(item)? {
            result.add(item.clone())?;
        }
    }
    Ok(result)
}

fn is_subset(a: &Set, b: &Set) -> RunResult<bool> {
    for item in a.iter() {
        if !b.contains(item)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Rich comparison of builtin values.
pub(crate) fn compare(op: CompareOperator, lhs: &Value, rhs: &Value) -> RunResult<bool> {
    match op {
        CompareOperator::Eq => return lhs.py_eq_checked(rhs),
        CompareOperator::Ne => return Ok(!lhs.py_eq_checked(rhs)?),
        _ => {}
    }
    if let (Value::Set(a), Value::Set(b)) = (lhs, rhs) {
        let (a, b) = (a.borrow(), b.borrow());
        return Ok(match op {
            CompareOperator::Le => is_subset(&a, &b)?,
            CompareOperator::Lt => a.len() < b.len() && is_subset(&a, &b)?,
            CompareOperator::Ge => is_subset(&b, &a)?,
            _ => a.len() > b.len() && is_subset(&b, &a)?,
        });
    }
    let ordering = lhs.py_cmp_checked(rhs)?.ok_or_else(|| {
        ExcType::type_error_not_supported_between(&op.to_string(), &lhs.type_name(), &rhs.type_name())
    })?;
    Ok(match op {
        CompareOperator::Lt => ordering == Ordering::Less,
        CompareOperator::Le => ordering != Ordering::Greater,
        CompareOperator::Gt => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    })
}

/// Ordering used by `sorted`, `min` and `max`.
pub(crate) fn order(lhs: &Value, rhs: &Value) -> RunResult<Ordering> {
    lhs.py_cmp_checked(rhs)?
        .ok_or_else(|| ExcType::type_error_not_supported_between("<", &lhs.type_name(), &rhs.type_name()))
}

/// Index of the first element equal to `item`.
pub(crate) fn position_of(items: &[Value], item: &Value) -> RunResult<Option<usize>> {
    for (index, candidate) in items.iter().enumerate() {
        if candidate.py_eq_checked(item)? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

/// `item in container` for builtin containers.
pub(crate) fn contains(container: &Value, item: &Value) -> RunResult<bool> {
    match container {
        Value::List(items) => Ok(position_of(&items.borrow(), item)?.is_some()),
        Value::Tuple(items) => Ok(position_of(items, item)?.is_some()),
        Value::Dict(dict) => dict.borrow().contains(item),
        Value::Set(set) => set.borrow().contains(item),
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(&**needle)),
            other => Err(ExcType::TypeError.msg(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Range(range) => Ok(match item.as_number() {
            Some(Number::Int(i)) => range.contains(i),
            #[allow(clippy::cast_possible_truncation)]
            Some(Number::Float(f)) => f.fract() == 0.0 && range.contains(f as i64),
            None => false,
        }),
        Value::Iter(iter) => {
            let mut iter = iter.borrow_mut();
            while let Some(value) = iter.next() {
                if value.py_eq_checked(item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(ExcType::TypeError.msg(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

pub(crate) fn unary_negative(value: &Value) -> RunResult<Value> {
    match value.as_number() {
        Some(Number::Int(i)) => Ok(Value::Int(i.checked_neg().ok_or_else(ExcType::overflow)?)),
        Some(Number::Float(f)) => Ok(Value::Float(-f)),
        None => Err(ExcType::TypeError.msg(format!("bad operand type for unary -: '{}'", value.type_name()))),
    }
}

pub(crate) fn unary_positive(value: &Value) -> RunResult<Value> {
    match value.as_number() {
        Some(Number::Int(i)) => Ok(Value::Int(i)),
        Some(Number::Float(f)) => Ok(Value::Float(f)),
        None => Err(ExcType::TypeError.msg(format!("bad operand type for unary +: '{}'", value.type_name()))),
    }
}

pub(crate) fn unary_invert(value: &Value) -> RunResult<Value> {
    match value.as_number() {
        Some(Number::Int(i)) => Ok(Value::Int(!i)),
        _ => Err(ExcType::TypeError.msg(format!("bad operand type for unary ~: '{}'", value.type_name()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(op: BinaryOperator, a: Value, b: Value) -> String {
        binary_op_or_error(op, &a, &b).map_or_else(|e| e.to_string(), |v| v.py_repr())
    }

    #[test]
    fn floor_division_and_modulo_round_down() {
        assert_eq!(op(BinaryOperator::FloorDiv, Value::Int(-7), Value::Int(2)), "-4");
        assert_eq!(op(BinaryOperator::Mod, Value::Int(-7), Value::Int(2)), "1");
        assert_eq!(op(BinaryOperator::Mod, Value::Int(7), Value::Int(-2)), "-1");
        assert_eq!(op(BinaryOperator::FloorDiv, Value::Float(7.5), Value::Int(2)), "3.0");
        assert_eq!(op(BinaryOperator::Mod, Value::Float(-1.0), Value::Int(3)), "2.0");
    }

    #[test]
    fn division_by_zero_messages() {
        assert!(op(BinaryOperator::TrueDiv, Value::Int(1), Value::Int(0)).contains("division by zero"));
        assert!(op(BinaryOperator::FloorDiv, Value::Int(1), Value::Int(0)).contains("integer division or modulo by zero"));
    }

    #[test]
    fn overflow_is_an_exception() {
        assert!(op(BinaryOperator::Mul, Value::Int(i64::MAX), Value::Int(2)).contains("OverflowError"));
        assert!(op(BinaryOperator::LShift, Value::Int(1), Value::Int(70)).contains("OverflowError"));
        assert_eq!(op(BinaryOperator::Pow, Value::Int(2), Value::Int(10)), "1024");
        assert_eq!(op(BinaryOperator::Pow, Value::Int(2), Value::Int(-1)), "0.5");
    }

    #[test]
    fn sequences_concatenate_and_repeat() {
        assert_eq!(op(BinaryOperator::Add, Value::from("ab"), Value::from("c")), "'abc'");
        assert_eq!(op(BinaryOperator::Mul, Value::Int(2), Value::list(vec![Value::Int(1)])), "[1, 1]");
        assert_eq!(
            op(BinaryOperator::Add, Value::tuple(vec![Value::Int(1)]), Value::tuple(vec![Value::Int(2)])),
            "(1, 2)"
        );
    }

    #[test]
    fn oversized_repeats_raise_memory_error() {
        let huge = Value::Int(1 << 62);
        assert!(op(BinaryOperator::Mul, Value::from("ab"), huge.clone()).starts_with("MemoryError"));
        assert!(op(BinaryOperator::Mul, huge, Value::list(vec![Value::None])).starts_with("MemoryError"));
        assert_eq!(op(BinaryOperator::Mul, Value::from("ab"), Value::Int(-3)), "''");
    }

    #[test]
    fn unsupported_operands_name_both_types() {
        let message = op(BinaryOperator::Add, Value::Int(1), Value::from("a"));
        assert!(message.contains("unsupported operand type(s) for +: 'int' and 'str'"), "{message}");
    }

    #[test]
    fn comparisons_and_membership() {
        assert!(compare(CompareOperator::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap());
        assert!(compare(CompareOperator::Ge, &Value::from("b"), &Value::from("a")).unwrap());
        let err = compare(CompareOperator::Lt, &Value::Int(1), &Value::from("a")).unwrap_err();
        assert!(err.to_string().contains("'<' not supported between instances of 'int' and 'str'"));
        assert!(contains(&Value::from("robot"), &Value::from("bot")).unwrap());
        assert!(contains(&Value::list(vec![Value::Int(3)]), &Value::Float(3.0)).unwrap());
    }
}
