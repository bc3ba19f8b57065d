//! Calling a builtin type: `int("3")`, `list(range(3))`, `type(x)` and friends.

use std::rc::Rc;

use super::{dunder_redirect, type_of, BuiltinOutput};
use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult},
    types::{collect_items, Dict, Range, Set, Slice, Type},
    value::Value,
};

pub(super) fn call_type(t: Type, args: ArgValues) -> RunResult<BuiltinOutput> {
    let value = match t {
        Type::Int => {
            let mut args = args;
            let base = args.take_kwarg("base");
            let (value, positional_base) = match args.get_zero_one_two_args("int")? {
                (None, _) => return Ok(Value::Int(0).into()),
                (Some(value), base) => (value, base),
            };
            match base.or(positional_base) {
                Some(base) => {
                    let base = base.as_int("int() base")?;
                    let Value::Str(text) = &value else {
                        return Err(ExcType::TypeError.msg("int() can't convert non-string with explicit base"));
                    };
                    Value::Int(int_from_str(text, base)?)
                }
                None => int_from_value(&value)?,
            }
        }
        Type::Float => match args.get_zero_one_arg("float")? {
            None => Value::Float(0.0),
            Some(value) => Value::Float(float_from_value(&value)?),
        },
        Type::Str => match args.get_zero_one_arg("str")? {
            None => Value::from(""),
            Some(value) => {
                if let Some(redirect) =
                    dunder_redirect(&value, "__str__").or_else(|| dunder_redirect(&value, "__repr__"))
                {
                    return Ok(redirect);
                }
                Value::from(value.py_str())
            }
        },
        Type::Bool => Value::Bool(args.get_zero_one_arg("bool")?.is_some_and(|value| value.truthy())),
        Type::List => match args.get_zero_one_arg("list")? {
            None => Value::list(Vec::new()),
            Some(iterable) => Value::list(collect_items(&iterable)?),
        },
        Type::Tuple => match args.get_zero_one_arg("tuple")? {
            None => Value::tuple(Vec::new()),
            Some(Value::Tuple(items)) => Value::Tuple(items),
            Some(iterable) => Value::tuple(collect_items(&iterable)?),
        },
        Type::Set => match args.get_zero_one_arg("set")? {
            None => Value::set(Set::new()),
            Some(iterable) => Value::set(Set::from_values(collect_items(&iterable)?)?),
        },
        Type::Dict => dict_from_args(args)?,
        Type::Range => Range::init(args)?,
        Type::Slice => {
            args.check_no_kwargs("slice")?;
            let mut values = args.into_positional();
            let slice = match values.len() {
                1 => Slice::new(Value::None, values.remove(0), Value::None),
                2 | 3 => {
                    let step = if values.len() == 3 { values.remove(2) } else { Value::None };
                    let stop = values.remove(1);
                    Slice::new(values.remove(0), stop, step)
                }
                0 => return Err(ExcType::type_error_at_least("slice", 1, 0)),
                n => return Err(ExcType::type_error_at_most("slice", 3, n)),
            };
            Value::Slice(Rc::new(slice))
        }
        Type::Type => {
            let value = args.get_one_arg("type")?;
            type_of(&value)?
        }
        Type::Object | Type::NoneType => {
            return Err(ExcType::TypeError.msg(format!("cannot create '{t}' instances")));
        }
    };
    Ok(value.into())
}

/// `dict()`, `dict(mapping)`, `dict(pairs)`, each optionally followed by keyword entries.
pub(crate) fn dict_from_args(args: ArgValues) -> RunResult<Value> {
    let (positional, kwargs) = args.into_parts();
    let mut dict = Dict::new();
    match positional.as_slice() {
        [] => {}
        [source] => update_dict(&mut dict, source)?,
        other => return Err(ExcType::type_error_at_most("dict", 1, other.len())),
    }
    for (key, value) in kwargs {
        dict.insert(Value::Str(key), value)?;
    }
    Ok(Value::dict(dict))
}

/// Merges a mapping or an iterable of key/value pairs into `dict`.
pub(crate) fn update_dict(dict: &mut Dict, source: &Value) -> RunResult<()> {
    if let Value::Dict(other) = source {
        let pairs: Vec<(Value, Value)> = other
            .borrow()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        for (key, value) in pairs {
            dict.insert(key, value)?;
        }
        return Ok(());
    }
    for (index, item) in collect_items(source)?.into_iter().enumerate() {
        let pair = collect_items(&item).map_err(|_| {
            ExcType::TypeError.msg(format!(
                "cannot convert dictionary update sequence element #{index} to a sequence"
            ))
        })?;
        let [key, value]: [Value; 2] = pair.try_into().map_err(|pair: Vec<Value>| {
            ExcType::ValueError.msg(format!(
                "dictionary update sequence element #{index} has length {}; 2 is required",
                pair.len()
            ))
        })?;
        dict.insert(key, value)?;
    }
    Ok(())
}

fn int_from_value(value: &Value) -> RunResult<Value> {
    Ok(Value::Int(match value {
        Value::Int(i) => *i,
        Value::Bool(b) => i64::from(*b),
        Value::Float(f) => float_to_int(*f)?,
        Value::Str(s) => int_from_str(s, 10)?,
        other => {
            return Err(ExcType::TypeError.msg(format!(
                "int() argument must be a string or a number, not '{}'",
                other.type_name()
            )))
        }
    }))
}

/// Truncates toward zero like CPython's `int(float)`.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub(crate) fn float_to_int(f: f64) -> RunResult<i64> {
    if f.is_nan() {
        return Err(ExcType::ValueError.msg("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(ExcType::OverflowError.msg("cannot convert float infinity to integer"));
    }
    let truncated = f.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(ExcType::overflow());
    }
    Ok(truncated as i64)
}

fn int_from_str(text: &str, base: i64) -> RunResult<i64> {
    let invalid = || {
        ExcType::ValueError.msg(format!(
            "invalid literal for int() with base {base}: {}",
            Value::from(text).py_repr()
        ))
    };
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let (radix, digits) = match base {
        0 | 16 if digits.starts_with("0x") || digits.starts_with("0X") => (16, &digits[2..]),
        0 | 8 if digits.starts_with("0o") || digits.starts_with("0O") => (8, &digits[2..]),
        0 | 2 if digits.starts_with("0b") || digits.starts_with("0B") => (2, &digits[2..]),
        0 => (10, digits),
        2..=36 => (u32::try_from(base).map_err(|_| invalid())?, digits),
        _ => return Err(ExcType::ValueError.msg("int() base must be >= 2 and <= 36, or 0")),
    };
    if digits.is_empty() || digits.starts_with(&['_', '+', '-'][..]) || digits.ends_with('_') || digits.contains("__") {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    let magnitude = i64::from_str_radix(&cleaned, radix).map_err(|_| invalid())?;
    Ok(if negative { -magnitude } else { magnitude })
}

fn float_from_value(value: &Value) -> RunResult<f64> {
    match value {
        Value::Float(f) => Ok(*f),
        Value::Str(s) => {
            let cleaned = s.trim().replace('_', "");
            cleaned.parse::<f64>().map_err(|_| {
                ExcType::ValueError.msg(format!(
                    "could not convert string to float: {}",
                    value.py_repr()
                ))
            })
        }
        other => match other.as_number() {
            Some(number) => Ok(number.as_f64()),
            None => Err(ExcType::TypeError.msg(format!(
                "float() argument must be a string or a number, not '{}'",
                other.type_name()
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(t: Type, args: Vec<Value>) -> RunResult<Value> {
        match call_type(t, ArgValues::positional(args))? {
            BuiltinOutput::Value(value) => Ok(value),
            BuiltinOutput::Call(..) => panic!("unexpected redirect"),
        }
    }

    #[test]
    fn int_conversions() {
        assert_eq!(call(Type::Int, vec![Value::from(" -1_000 ")]).unwrap().py_repr(), "-1000");
        assert_eq!(call(Type::Int, vec![Value::Float(-2.9)]).unwrap().py_repr(), "-2");
        assert_eq!(call(Type::Int, vec![Value::from("ff"), Value::Int(16)]).unwrap().py_repr(), "255");
        let err = call(Type::Int, vec![Value::from("1.5")]).unwrap_err();
        assert!(err.to_string().contains("invalid literal for int() with base 10: '1.5'"), "{err}");
        assert!(call(Type::Int, vec![Value::Float(f64::NAN)]).is_err());
    }

    #[test]
    fn float_and_str_conversions() {
        assert_eq!(call(Type::Float, vec![Value::from("2.5")]).unwrap().py_repr(), "2.5");
        assert_eq!(call(Type::Float, vec![Value::Int(3)]).unwrap().py_repr(), "3.0");
        assert_eq!(call(Type::Str, vec![Value::Float(1.0)]).unwrap().py_repr(), "'1.0'");
        assert_eq!(call(Type::Bool, vec![Value::list(vec![])]).unwrap().py_repr(), "False");
    }

    #[test]
    fn containers_from_iterables() {
        let pairs = Value::list(vec![
            Value::tuple(vec![Value::from("a"), Value::Int(1)]),
            Value::tuple(vec![Value::from("b"), Value::Int(2)]),
        ]);
        assert_eq!(call(Type::Dict, vec![pairs]).unwrap().py_repr(), "{'a': 1, 'b': 2}");
        assert_eq!(call(Type::Tuple, vec![Value::from("ab")]).unwrap().py_repr(), "('a', 'b')");
        assert_eq!(call(Type::Set, vec![Value::list(vec![Value::Int(1), Value::Int(1)])]).unwrap().py_repr(), "{1}");
        let err = call(Type::Dict, vec![Value::list(vec![Value::tuple(vec![Value::Int(1)])])]).unwrap_err();
        assert!(err.to_string().contains("has length 1; 2 is required"), "{err}");
    }

    #[test]
    fn type_of_values() {
        assert_eq!(call(Type::Type, vec![Value::Int(1)]).unwrap().py_repr(), "<class 'int'>");
        assert_eq!(call(Type::Type, vec![Value::Bool(true)]).unwrap().py_repr(), "<class 'bool'>");
    }
}
