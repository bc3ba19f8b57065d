//! Subscripting, slicing and unpacking of the builtin containers.

use std::rc::Rc;

use crate::{
    exception_private::{ExcType, RunResult},
    types::{collect_items, Slice},
    value::Value,
};

/// Resolves an integer index (negative counts from the end) against `len`.
fn resolve_index(key: &Value, len: usize, type_name: &str) -> RunResult<usize> {
    let index = key.as_int(&format!("{type_name} indices"))?;
    let len_i = i64::try_from(len).map_err(|_| ExcType::overflow())?;
    let resolved = if index < 0 { index + len_i } else { index };
    if resolved < 0 || resolved >= len_i {
        return Err(ExcType::index_error(type_name));
    }
    usize::try_from(resolved).map_err(|_| ExcType::index_error(type_name))
}

fn sequence_key_error(container: &Value, key: &Value) -> crate::exception_private::RunError {
    ExcType::TypeError.msg(format!(
        "{} indices must be integers or slices, not {}",
        container.type_name(),
        key.type_name()
    ))
}

fn select<T: Clone>(items: &[T], slice: &Slice) -> RunResult<Vec<T>> {
    Ok(slice
        .indices(items.len())?
        .into_iter()
        .map(|index| items[index].clone())
        .collect())
}

/// `container[key]` for builtin containers.
pub(crate) fn get_item(container: &Value, key: &Value) -> RunResult<Value> {
    match (container, key) {
        (Value::List(list), Value::Slice(slice)) => Ok(Value::list(select(&list.borrow(), slice)?)),
        (Value::Tuple(items), Value::Slice(slice)) => Ok(Value::tuple(select(items, slice)?)),
        (Value::Str(s), Value::Slice(slice)) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::from(select(&chars, slice)?.into_iter().collect::<String>()))
        }
        (Value::Range(range), Value::Slice(slice)) => {
            let values: Vec<i64> = range.iter().collect();
            Ok(Value::list(select(&values, slice)?.into_iter().map(Value::Int).collect()))
        }
        (Value::Dict(dict), _) => dict.borrow().get(key)?.ok_or_else(|| ExcType::key_error(key.clone())),
        (Value::List(list), Value::Int(_) | Value::Bool(_)) => {
            let list = list.borrow();
            let index = resolve_index(key, list.len(), "list")?;
            Ok(list[index].clone())
        }
        (Value::Tuple(items), Value::Int(_) | Value::Bool(_)) => {
            let index = resolve_index(key, items.len(), "tuple")?;
            Ok(items[index].clone())
        }
        (Value::Str(s), Value::Int(_) | Value::Bool(_)) => {
            let index = resolve_index(key, s.chars().count(), "string")?;
            Ok(s.chars().nth(index).map_or(Value::None, |c| Value::from(c.to_string())))
        }
        (Value::Range(range), Value::Int(_) | Value::Bool(_)) => {
            let index = resolve_index(key, range.len(), "range object")?;
            range
                .get(index)
                .map(Value::Int)
                .ok_or_else(|| ExcType::index_error("range object"))
        }
        (Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Range(_), _) => {
            Err(sequence_key_error(container, key))
        }
        (other, _) => Err(ExcType::type_error_not_sub(&other.type_name())),
    }
}

/// `container[key] = value` for builtin containers.
pub(crate) fn set_item(container: &Value, key: Value, value: Value) -> RunResult<()> {
    match (container, &key) {
        (Value::Dict(dict), _) => dict.borrow_mut().insert(key, value),
        (Value::List(list), Value::Slice(slice)) => {
            let replacement = collect_items(&value)?;
            let mut list = list.borrow_mut();
            let (start, stop) = slice.contiguous_bounds(list.len())?;
            list.splice(start..stop, replacement).for_each(drop);
            Ok(())
        }
        (Value::List(list), Value::Int(_) | Value::Bool(_)) => {
            let mut list = list.borrow_mut();
            let index = resolve_index(&key, list.len(), "list assignment")?;
            list[index] = value;
            Ok(())
        }
        (Value::List(_), _) => Err(sequence_key_error(container, &key)),
        (other, _) => Err(ExcType::type_error_not_sub_assignment(&other.type_name())),
    }
}

/// `del container[key]`
pub(crate) fn delete_item(container: &Value, key: &Value) -> RunResult<()> {
    match (container, key) {
        (Value::Dict(dict), _) => match dict.borrow_mut().remove(key)? {
            Some(_) => Ok(()),
            None => Err(ExcType::key_error(key.clone())),
        },
        (Value::List(list), Value::Slice(slice)) => {
            let mut list = list.borrow_mut();
            let mut doomed = slice.indices(list.len())?;
            doomed.sort_unstable();
            for index in doomed.into_iter().rev() {
                list.remove(index);
            }
            Ok(())
        }
        (Value::List(list), Value::Int(_) | Value::Bool(_)) => {
            let mut list = list.borrow_mut();
            let index = resolve_index(key, list.len(), "list assignment")?;
            list.remove(index);
            Ok(())
        }
        (other, _) => Err(ExcType::TypeError.msg(format!(
            "'{}' object doesn't support item deletion",
            other.type_name()
        ))),
    }
}

/// Builds the slice object of `BUILD_SLICE` / `BINARY_SLICE`.
pub(crate) fn make_slice(start: Value, stop: Value, step: Value) -> Value {
    Value::Slice(Rc::new(Slice::new(start, stop, step)))
}

/// Splits an iterable into exactly `count` values, in order.
pub(crate) fn unpack(value: &Value, count: usize) -> RunResult<Vec<Value>> {
    let items = collect_items(value).map_err(|_| {
        ExcType::TypeError.msg(format!("cannot unpack non-iterable {} object", value.type_name()))
    })?;
    match items.len() {
        n if n < count => Err(ExcType::ValueError.msg(format!(
            "not enough values to unpack (expected {count}, got {n})"
        ))),
        n if n > count => Err(ExcType::ValueError.msg(format!("too many values to unpack (expected {count})"))),
        _ => Ok(items),
    }
}

/// Length of a builtin container, for `GET_LEN`.
pub(crate) fn length(value: &Value) -> RunResult<usize> {
    Ok(match value {
        Value::Str(s) => s.chars().count(),
        Value::List(list) => list.borrow().len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(dict) => dict.borrow().len(),
        Value::Set(set) => set.borrow().len(),
        Value::Range(range) => range.len(),
        other => {
            return Err(ExcType::TypeError.msg(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Dict, Range};

    fn ints(items: &[i64]) -> Value {
        Value::list(items.iter().map(|i| Value::Int(*i)).collect())
    }

    #[test]
    fn indexing_and_slicing() {
        let list = ints(&[1, 2, 3, 4]);
        assert_eq!(get_item(&list, &Value::Int(-1)).unwrap().py_repr(), "4");
        let slice = make_slice(Value::Int(1), Value::None, Value::Int(2));
        assert_eq!(get_item(&list, &slice).unwrap().py_repr(), "[2, 4]");
        let reverse = make_slice(Value::None, Value::None, Value::Int(-1));
        assert_eq!(get_item(&Value::from("abc"), &reverse).unwrap().py_repr(), "'cba'");
        assert_eq!(get_item(&Value::Range(Range::new(0, 10, 3).unwrap()), &Value::Int(2)).unwrap().py_repr(), "6");
        let err = get_item(&list, &Value::Int(4)).unwrap_err();
        assert!(err.to_string().contains("list index out of range"), "{err}");
        let err = get_item(&list, &Value::from("a")).unwrap_err();
        assert!(err.to_string().contains("list indices must be integers or slices, not str"), "{err}");
        let err = get_item(&Value::Int(3), &Value::Int(0)).unwrap_err();
        assert!(err.to_string().contains("'int' object is not subscriptable"), "{err}");
    }

    #[test]
    fn assignment_and_deletion() {
        let list = ints(&[1, 2, 3, 4]);
        set_item(&list, Value::Int(0), Value::Int(9)).unwrap();
        set_item(&list, make_slice(Value::Int(1), Value::Int(3), Value::None), ints(&[7])).unwrap();
        assert_eq!(list.py_repr(), "[9, 7, 4]");
        delete_item(&list, &Value::Int(-1)).unwrap();
        assert_eq!(list.py_repr(), "[9, 7]");

        let dict = Value::dict(Dict::new());
        set_item(&dict, Value::from("k"), Value::Int(1)).unwrap();
        assert_eq!(get_item(&dict, &Value::from("k")).unwrap().py_repr(), "1");
        delete_item(&dict, &Value::from("k")).unwrap();
        assert!(delete_item(&dict, &Value::from("k")).is_err());
        assert!(set_item(&Value::tuple(vec![]), Value::Int(0), Value::None).is_err());
    }

    #[test]
    fn unpack_counts() {
        assert_eq!(unpack(&Value::from("ab"), 2).unwrap().len(), 2);
        let err = unpack(&ints(&[1]), 2).unwrap_err();
        assert!(err.to_string().contains("not enough values to unpack (expected 2, got 1)"), "{err}");
        let err = unpack(&ints(&[1, 2, 3]), 2).unwrap_err();
        assert!(err.to_string().contains("too many values to unpack (expected 2)"), "{err}");
        let err = unpack(&Value::Int(5), 2).unwrap_err();
        assert!(err.to_string().contains("cannot unpack non-iterable int object"), "{err}");
    }
}
