//! Methods of the builtin containers and `str`.

use std::rc::Rc;

use super::{sorted::list_sort, types::update_dict, BuiltinOutput};
use crate::{
    args::ArgValues,
    bytecode::vm::{
        binary::{position_of, set_difference, set_intersection, set_union},
        format::{join, str_format},
    },
    exception_private::{ExcType, RunResult},
    playground::Env,
    resource::check_sequence_len,
    types::{collect_items, Set},
    value::Value,
};

const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "index", "count", "clear", "copy", "reverse", "sort",
];
const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "setdefault", "update", "clear", "copy",
];
const SET_METHODS: &[&str] = &[
    "add", "remove", "discard", "pop", "clear", "copy", "union", "intersection", "difference", "update",
];
const STR_METHODS: &[&str] = &[
    "join", "split", "strip", "lstrip", "rstrip", "upper", "lower", "startswith", "endswith", "replace", "find",
    "format", "count",
];
const TUPLE_METHODS: &[&str] = &["index", "count"];

/// A method of a builtin value bound to its receiver, e.g. `[].append`.
#[derive(Debug)]
pub struct BuiltinMethod {
    receiver: Value,
    name: &'static str,
}

impl BuiltinMethod {
    /// Binds `name` on `receiver` when the receiver's type has such a method.
    pub(crate) fn lookup(receiver: &Value, name: &str) -> Option<Self> {
        let table = match receiver {
            Value::List(_) => LIST_METHODS,
            Value::Dict(_) => DICT_METHODS,
            Value::Set(_) => SET_METHODS,
            Value::Str(_) => STR_METHODS,
            Value::Tuple(_) => TUPLE_METHODS,
            _ => return None,
        };
        let name = table.iter().find(|method| **method == name)?;
        Some(Self {
            receiver: receiver.clone(),
            name,
        })
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn receiver(&self) -> &Value {
        &self.receiver
    }

    pub(crate) fn call(&self, env: &mut Env, args: ArgValues) -> RunResult<BuiltinOutput> {
        let value = match &self.receiver {
            Value::List(list) => {
                if self.name == "sort" {
                    return list_sort(env, &self.receiver, args);
                }
                list_method(list, self.name, args)?
            }
            Value::Dict(_) => dict_method(&self.receiver, self.name, args)?,
            Value::Set(_) => set_method(&self.receiver, self.name, args)?,
            Value::Str(s) => str_method(s, self.name, args)?,
            Value::Tuple(items) => sequence_method(items, "tuple", self.name, args)?,
            other => return Err(ExcType::attribute_error(&other.type_name(), self.name)),
        };
        Ok(value.into())
    }
}

fn method_name(type_name: &str, method: &str) -> String {
    format!("{type_name}.{method}")
}

/// Resolves a possibly negative index against `len`.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { index + len } else { index };
    usize::try_from(index).ok().filter(|_| index < len)
}

fn list_method(list: &Rc<std::cell::RefCell<Vec<Value>>>, name: &str, args: ArgValues) -> RunResult<Value> {
    let qualified = method_name("list", name);
    Ok(match name {
        "append" => {
            let item = args.get_one_arg(&qualified)?;
            list.borrow_mut().push(item);
            Value::None
        }
        "extend" => {
            let items = collect_items(&args.get_one_arg(&qualified)?)?;
            check_sequence_len(list.borrow().len().saturating_add(items.len()))?;
            list.borrow_mut().extend(items);
            Value::None
        }
        "insert" => {
            let (index, item) = args.get_two_args(&qualified)?;
            let index = index.as_int("list indices")?;
            let mut list = list.borrow_mut();
            let len = i64::try_from(list.len()).map_err(|_| ExcType::overflow())?;
            let position = if index < 0 { (index + len).max(0) } else { index.min(len) };
            list.insert(usize::try_from(position).unwrap_or(0), item);
            Value::None
        }
        "pop" => {
            let index = args.get_zero_one_arg(&qualified)?;
            let mut list = list.borrow_mut();
            if list.is_empty() {
                return Err(ExcType::IndexError.msg("pop from empty list"));
            }
            let index = match index {
                Some(index) => index.as_int("list indices")?,
                None => -1,
            };
            let position = normalize_index(index, list.len()).ok_or_else(|| ExcType::index_error("pop"))?;
            list.remove(position)
        }
        "remove" => {
            let item = args.get_one_arg(&qualified)?;
            // Comparing may borrow this list again through nested references.
            let items = list.borrow().clone();
            let position =
                position_of(&items, &item)?.ok_or_else(|| ExcType::ValueError.msg("list.remove(x): x not in list"))?;
            let mut list = list.borrow_mut();
            if position < list.len() {
                list.remove(position);
            }
            Value::None
        }
        "clear" => {
            args.check_zero_args(&qualified)?;
            list.borrow_mut().clear();
            Value::None
        }
        "copy" => {
            args.check_zero_args(&qualified)?;
            Value::list(list.borrow().clone())
        }
        "reverse" => {
            args.check_zero_args(&qualified)?;
            list.borrow_mut().reverse();
            Value::None
        }
        _ => {
            let items = list.borrow().clone();
            return sequence_method(&items, "list", name, args);
        }
    })
}

/// `index` and `count`, shared by lists and tuples.
fn sequence_method(items: &[Value], type_name: &str, name: &str, args: ArgValues) -> RunResult<Value> {
    let qualified = method_name(type_name, name);
    match name {
        "index" => {
            let item = args.get_one_arg(&qualified)?;
            let position = position_of(items, &item)?
                .ok_or_else(|| ExcType::ValueError.msg(format!("{} is not in {type_name}", item.py_repr())))?;
            Ok(Value::Int(i64::try_from(position).map_err(|_| ExcType::overflow())?))
        }
        "count" => {
            let item = args.get_one_arg(&qualified)?;
            let mut count = 0_usize;
            for candidate in items {
                if candidate.py_eq_checked(&item)? {
                    count += 1;
                }
            }
            Ok(Value::Int(i64::try_from(count).map_err(|_| ExcType::overflow())?))
        }
        _ => Err(ExcType::attribute_error(type_name, name)),
    }
}

fn dict_method(receiver: &Value, name: &str, args: ArgValues) -> RunResult<Value> {
    let Value::Dict(dict) = receiver else {
        return Err(ExcType::attribute_error(&receiver.type_name(), name));
    };
    let qualified = method_name("dict", name);
    Ok(match name {
        "get" => {
            let (key, default) = args.get_one_two_args(&qualified)?;
            dict.borrow().get(&key)?.or(default).unwrap_or(Value::None)
        }
        "keys" => {
            args.check_zero_args(&qualified)?;
            Value::list(dict.borrow().keys())
        }
        "values" => {
            args.check_zero_args(&qualified)?;
            Value::list(dict.borrow().values())
        }
        "items" => {
            args.check_zero_args(&qualified)?;
            Value::list(dict.borrow().items())
        }
        "pop" => {
            let (key, default) = args.get_one_two_args(&qualified)?;
            let removed = dict.borrow_mut().remove(&key)?;
            match (removed, default) {
                (Some(value), _) => value,
                (None, Some(default)) => default,
                (None, None) => return Err(ExcType::key_error(key)),
            }
        }
        "setdefault" => {
            let (key, default) = args.get_one_two_args(&qualified)?;
            let existing = dict.borrow().get(&key)?;
            match existing {
                Some(value) => value,
                None => {
                    let value = default.unwrap_or(Value::None);
                    dict.borrow_mut().insert(key, value.clone())?;
                    value
                }
            }
        }
        "update" => {
            let (positional, kwargs) = args.into_parts();
            let mut updated = dict.borrow().clone();
            match positional.as_slice() {
                [] => {}
                [source] => update_dict(&mut updated, source)?,
                other => return Err(ExcType::type_error_at_most(&qualified, 1, other.len())),
            }
            for (key, value) in kwargs {
                updated.insert(Value::Str(key), value)?;
            }
            *dict.borrow_mut() = updated;
            Value::None
        }
        "clear" => {
            args.check_zero_args(&qualified)?;
            dict.borrow_mut().clear();
            Value::None
        }
        "copy" => {
            args.check_zero_args(&qualified)?;
            Value::dict(dict.borrow().clone())
        }
        _ => return Err(ExcType::attribute_error("dict", name)),
    })
}

fn set_method(receiver: &Value, name: &str, args: ArgValues) -> RunResult<Value> {
    let Value::Set(set) = receiver else {
        return Err(ExcType::attribute_error(&receiver.type_name(), name));
    };
    let qualified = method_name("set", name);
    Ok(match name {
        "add" => {
            let item = args.get_one_arg(&qualified)?;
            set.borrow_mut().add(item)?;
            Value::None
        }
        "remove" => {
            let item = args.get_one_arg(&qualified)?;
            if !set.borrow_mut().remove(&item)? {
                return Err(ExcType::key_error(item));
            }
            Value::None
        }
        "discard" => {
            let item = args.get_one_arg(&qualified)?;
            set.borrow_mut().remove(&item)?;
            Value::None
        }
        "pop" => {
            args.check_zero_args(&qualified)?;
            let popped = set.borrow_mut().pop();
            popped.ok_or_else(|| ExcType::KeyError.msg("pop from an empty set"))?
        }
        "clear" => {
            args.check_zero_args(&qualified)?;
            set.borrow_mut().clear();
            Value::None
        }
        "copy" => {
            args.check_zero_args(&qualified)?;
            Value::set(set.borrow().clone())
        }
        "union" | "intersection" | "difference" => {
            args.check_no_kwargs(&qualified)?;
            let mut result = set.borrow().clone();
            for other in args.into_positional() {
                let other = as_set(&other)?;
                result = match name {
                    "union" => set_union(&result, &other)?,
                    "intersection" => set_intersection(&result, &other)?,
                    _ => set_difference(&result, &other)?,
                };
            }
            Value::set(result)
        }
        "update" => {
            args.check_no_kwargs(&qualified)?;
            for other in args.into_positional() {
                for item in collect_items(&other)? {
                    set.borrow_mut().add(item)?;
                }
            }
            Value::None
        }
        _ => return Err(ExcType::attribute_error("set", name)),
    })
}

fn as_set(value: &Value) -> RunResult<Set> {
    match value {
        Value::Set(set) => Ok(set.borrow().clone()),
        other => Set::from_values(collect_items(other)?),
    }
}

fn str_arg(value: &Value, method: &str) -> RunResult<Rc<str>> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => Err(ExcType::TypeError.msg(format!(
            "{method}() argument must be str, not {}",
            other.type_name()
        ))),
    }
}

fn optional_str(value: Option<Value>, method: &str) -> RunResult<Option<Rc<str>>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(value) => str_arg(&value, method).map(Some),
    }
}

fn char_count(text: &str) -> RunResult<Value> {
    Ok(Value::Int(i64::try_from(text.chars().count()).map_err(|_| ExcType::overflow())?))
}

fn str_method(s: &Rc<str>, name: &str, args: ArgValues) -> RunResult<Value> {
    let qualified = method_name("str", name);
    Ok(match name {
        "join" => Value::from(join(s, &args.get_one_arg(&qualified)?)?),
        "split" => {
            let mut args = args;
            let sep_kwarg = args.take_kwarg("sep");
            let maxsplit_kwarg = args.take_kwarg("maxsplit");
            let (sep, maxsplit) = args.get_zero_one_two_args(&qualified)?;
            let sep = optional_str(sep_kwarg.or(sep), "split")?;
            let maxsplit = match maxsplit_kwarg.or(maxsplit) {
                Some(value) => value.as_int("maxsplit")?,
                None => -1,
            };
            Value::list(split(s, sep.as_deref(), maxsplit)?.into_iter().map(Value::from).collect())
        }
        "strip" | "lstrip" | "rstrip" => {
            let chars = optional_str(args.get_zero_one_arg(&qualified)?, name)?;
            let matcher = |c: char| match &chars {
                Some(chars) => chars.contains(c),
                None => c.is_whitespace(),
            };
            Value::from(match name {
                "strip" => s.trim_matches(matcher),
                "lstrip" => s.trim_start_matches(matcher),
                _ => s.trim_end_matches(matcher),
            })
        }
        "upper" => {
            args.check_zero_args(&qualified)?;
            Value::from(s.to_uppercase())
        }
        "lower" => {
            args.check_zero_args(&qualified)?;
            Value::from(s.to_lowercase())
        }
        "startswith" | "endswith" => {
            let affix = args.get_one_arg(&qualified)?;
            let candidates = match &affix {
                Value::Tuple(items) => items.to_vec(),
                other => vec![other.clone()],
            };
            let mut found = false;
            for candidate in &candidates {
                let candidate = str_arg(candidate, name)?;
                found |= if name == "startswith" {
                    s.starts_with(&*candidate)
                } else {
                    s.ends_with(&*candidate)
                };
            }
            Value::Bool(found)
        }
        "replace" => {
            let values = {
                args.check_no_kwargs(&qualified)?;
                args.into_positional()
            };
            let (old, new, count) = match values.as_slice() {
                [old, new] => (str_arg(old, name)?, str_arg(new, name)?, -1),
                [old, new, count] => (str_arg(old, name)?, str_arg(new, name)?, count.as_int("count")?),
                other => return Err(ExcType::type_error_arg_count(&qualified, 2, other.len())),
            };
            let found = if old.is_empty() { s.chars().count() + 1 } else { s.matches(&*old).count() };
            let replaced = usize::try_from(count).map_or(found, |count| found.min(count));
            check_sequence_len(s.len().saturating_add(replaced.saturating_mul(new.len())))?;
            match usize::try_from(count) {
                Ok(count) => Value::from(s.replacen(&*old, &new, count)),
                Err(_) => Value::from(s.replace(&*old, &new)),
            }
        }
        "find" => {
            let needle = str_arg(&args.get_one_arg(&qualified)?, name)?;
            match s.find(&*needle) {
                Some(byte_index) => char_count(&s[..byte_index])?,
                None => Value::Int(-1),
            }
        }
        "count" => {
            let needle = str_arg(&args.get_one_arg(&qualified)?, name)?;
            if needle.is_empty() {
                Value::Int(i64::try_from(s.chars().count() + 1).map_err(|_| ExcType::overflow())?)
            } else {
                Value::Int(i64::try_from(s.matches(&*needle).count()).map_err(|_| ExcType::overflow())?)
            }
        }
        "format" => {
            let (positional, kwargs) = args.into_parts();
            Value::from(str_format(s, &positional, &kwargs)?)
        }
        _ => return Err(ExcType::attribute_error("str", name)),
    })
}

/// `str.split` with CPython's whitespace rules when `sep` is `None`.
fn split(s: &str, sep: Option<&str>, maxsplit: i64) -> RunResult<Vec<String>> {
    let limit = usize::try_from(maxsplit).ok();
    match sep {
        None => {
            let mut parts = Vec::new();
            let mut rest = s.trim_start();
            while !rest.is_empty() {
                if limit.is_some_and(|limit| parts.len() == limit) {
                    parts.push(rest.to_owned());
                    break;
                }
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                parts.push(rest[..end].to_owned());
                rest = rest[end..].trim_start();
            }
            Ok(parts)
        }
        Some("") => Err(ExcType::ValueError.msg("empty separator")),
        Some(sep) => Ok(match limit {
            Some(limit) => s.splitn(limit + 1, sep).map(str::to_owned).collect(),
            None => s.split(sep).map(str::to_owned).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::PlaygroundConfig, types::Dict};

    fn call(receiver: &Value, name: &str, args: ArgValues) -> RunResult<Value> {
        let mut env = Env::new(PlaygroundConfig::default());
        let method = BuiltinMethod::lookup(receiver, name).unwrap();
        match method.call(&mut env, args)? {
            BuiltinOutput::Value(value) => Ok(value),
            BuiltinOutput::Call(..) => panic!("unexpected redirect"),
        }
    }

    fn positional(values: Vec<Value>) -> ArgValues {
        ArgValues::positional(values)
    }

    #[test]
    fn list_mutation() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        call(&list, "append", positional(vec![Value::Int(3)])).unwrap();
        call(&list, "insert", positional(vec![Value::Int(0), Value::Int(0)])).unwrap();
        assert_eq!(call(&list, "pop", positional(vec![])).unwrap().py_repr(), "3");
        call(&list, "remove", positional(vec![Value::Int(1)])).unwrap();
        assert_eq!(list.py_repr(), "[0, 2]");
        assert_eq!(call(&list, "index", positional(vec![Value::Int(2)])).unwrap().py_repr(), "1");
        call(&list, "sort", ArgValues::new(vec![], vec![("reverse".into(), Value::Bool(true))])).unwrap();
        assert_eq!(list.py_repr(), "[2, 0]");
        let err = call(&list, "remove", positional(vec![Value::Int(9)])).unwrap_err();
        assert!(err.to_string().contains("x not in list"), "{err}");
    }

    #[test]
    fn remove_compares_against_the_list_itself() {
        // l = [[[0]]]; l.remove([l])
        let list = Value::list(vec![Value::list(vec![Value::list(vec![Value::Int(0)])])]);
        let err = call(&list, "remove", positional(vec![Value::list(vec![list.clone()])])).unwrap_err();
        assert!(err.to_string().contains("x not in list"), "{err}");
        assert_eq!(list.py_repr(), "[[[0]]]");
    }

    #[test]
    fn oversized_replace_raises_memory_error() {
        let s = Value::from("a".repeat(1_000));
        let err = call(&s, "replace", positional(vec![Value::from("a"), Value::from("b".repeat(100_000))])).unwrap_err();
        assert!(err.to_string().starts_with("MemoryError"), "{err}");
    }

    #[test]
    fn dict_access() {
        let dict = Value::dict(Dict::from_pairs([(Value::from("a"), Value::Int(1))]).unwrap());
        assert_eq!(call(&dict, "get", positional(vec![Value::from("b"), Value::Int(0)])).unwrap().py_repr(), "0");
        assert_eq!(call(&dict, "setdefault", positional(vec![Value::from("b"), Value::Int(2)])).unwrap().py_repr(), "2");
        assert_eq!(call(&dict, "items", positional(vec![])).unwrap().py_repr(), "[('a', 1), ('b', 2)]");
        let err = call(&dict, "pop", positional(vec![Value::from("z")])).unwrap_err();
        assert_eq!(crate::exception_public::exception_message(&match err {
            crate::exception_private::RunError::Exc(value) => value,
            other => panic!("unexpected {other:?}"),
        }), "'z'");
    }

    #[test]
    fn set_algebra() {
        let set = Value::set(Set::from_values(vec![Value::Int(1), Value::Int(2)]).unwrap());
        let other = Value::list(vec![Value::Int(2), Value::Int(3)]);
        assert_eq!(call(&set, "union", positional(vec![other.clone()])).unwrap().py_repr(), "{1, 2, 3}");
        assert_eq!(call(&set, "intersection", positional(vec![other.clone()])).unwrap().py_repr(), "{2}");
        assert_eq!(call(&set, "difference", positional(vec![other])).unwrap().py_repr(), "{1}");
        assert!(call(&set, "remove", positional(vec![Value::Int(7)])).is_err());
        call(&set, "discard", positional(vec![Value::Int(7)])).unwrap();
    }

    #[test]
    fn string_methods() {
        let s = Value::from("  a b  c ");
        assert_eq!(call(&s, "split", positional(vec![])).unwrap().py_repr(), "['a', 'b', 'c']");
        assert_eq!(
            call(&s, "split", positional(vec![Value::None, Value::Int(1)])).unwrap().py_repr(),
            "['a', 'b  c ']"
        );
        assert_eq!(call(&s, "strip", positional(vec![])).unwrap().py_repr(), "'a b  c'");
        let csv = Value::from("x,y,,z");
        assert_eq!(call(&csv, "split", positional(vec![Value::from(",")])).unwrap().py_repr(), "['x', 'y', '', 'z']");
        assert_eq!(call(&csv, "find", positional(vec![Value::from("z")])).unwrap().py_repr(), "5");
        assert_eq!(call(&csv, "count", positional(vec![Value::from(",")])).unwrap().py_repr(), "3");
        assert_eq!(
            call(&csv, "replace", positional(vec![Value::from(","), Value::from(";"), Value::Int(1)]))
                .unwrap()
                .py_repr(),
            "'x;y,,z'"
        );
        let tuple = Value::tuple(vec![Value::from("x"), Value::from("q")]);
        assert_eq!(call(&csv, "startswith", positional(vec![tuple])).unwrap().py_repr(), "True");
        assert!(BuiltinMethod::lookup(&csv, "encode").is_none());
    }
}
