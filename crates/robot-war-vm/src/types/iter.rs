use std::{cell::RefCell, rc::Rc};

use super::Range;
use crate::{
    exception_private::{ExcType, RunResult},
    resource::check_sequence_len,
    value::Value,
};

/// Iterator state produced by `GET_ITER`, `iter()` and the lazy builtins.
///
/// Lists are iterated live (appending during iteration is observed, like CPython);
/// every other container is snapshotted when the iterator is created.
#[derive(Debug)]
pub enum ValueIter {
    List { list: Rc<RefCell<Vec<Value>>>, index: usize },
    Items { items: Vec<Value>, index: usize },
    Range { next: i64, range: Range },
}

impl ValueIter {
    /// Creates an iterator over an iterable value.
    pub fn new(value: &Value) -> RunResult<Value> {
        let iter = match value {
            Value::Iter(_) => return Ok(value.clone()),
            Value::List(list) => Self::List {
                list: list.clone(),
                index: 0,
            },
            Value::Range(range) => Self::Range {
                next: range.start,
                range: *range,
            },
            other => Self::Items {
                items: collect_items(other)?,
                index: 0,
            },
        };
        Ok(Value::iter(iter))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Value> {
        match self {
            Self::List { list, index } => {
                let item = list.borrow().get(*index).cloned();
                *index += 1;
                item
            }
            Self::Items { items, index } => {
                let item = items.get(*index).cloned();
                *index += 1;
                item
            }
            Self::Range { next, range } => {
                let done = if range.step > 0 {
                    *next >= range.stop
                } else {
                    *next <= range.stop
                };
                if done {
                    None
                } else {
                    let item = *next;
                    *next = next.saturating_add(range.step);
                    Some(Value::Int(item))
                }
            }
        }
    }
}

/// Materializes every element of an iterable value.
///
/// Iterators are drained; dicts yield their keys.
pub(crate) fn collect_items(value: &Value) -> RunResult<Vec<Value>> {
    Ok(match value {
        Value::List(list) => list.borrow().clone(),
        Value::Tuple(items) => items.to_vec(),
        Value::Str(s) => s.chars().map(|c| Value::from(c.to_string())).collect(),
        Value::Dict(dict) => dict.borrow().keys(),
        Value::Set(set) => set.borrow().to_vec(),
        Value::Range(range) => {
            check_sequence_len(range.len())?;
            range.iter().map(Value::Int).collect()
        }
        Value::Iter(iter) => {
            let mut iter = iter.borrow_mut();
            let mut items = Vec::new();
            while let Some(item) = iter.next() {
                check_sequence_len(items.len() + 1)?;
                items.push(item);
            }
            items
        }
        other => return Err(ExcType::type_error_not_iterable(&other.type_name())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_iteration_is_live() {
        let list = Value::list(vec![Value::Int(1)]);
        let Value::Iter(iter) = ValueIter::new(&list).unwrap() else {
            panic!("expected iterator");
        };
        assert_eq!(iter.borrow_mut().next().unwrap().py_repr(), "1");
        if let Value::List(items) = &list {
            items.borrow_mut().push(Value::Int(2));
        }
        assert_eq!(iter.borrow_mut().next().unwrap().py_repr(), "2");
        assert!(iter.borrow_mut().next().is_none());
    }

    #[test]
    fn negative_step_range() {
        let range = Value::Range(Range::new(3, 0, -1).unwrap());
        assert_eq!(Value::list(collect_items(&range).unwrap()).py_repr(), "[3, 2, 1]");
    }
}
