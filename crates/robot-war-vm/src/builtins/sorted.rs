//! `sorted()`, `min()`, `max()` and `list.sort()`, including `key=` functions.
//!
//! Key functions may be script code, so a keyed call is turned into a small synthesized
//! function that computes `(key(item), item)` pairs in ordinary frames and then hands them to
//! a native finisher which does the comparison work.

use std::{cmp::Ordering, rc::Rc};

use super::BuiltinOutput;
use crate::{
    api::{NativeCx, NativeError, NativeFn, NativeReturn},
    args::ArgValues,
    bytecode::{builder::CodeBuilder, vm::binary::order, Opcode},
    exception_private::{ExcType, RunResult},
    function::Function,
    playground::Env,
    types::collect_items,
    value::Value,
};

/// `sorted(iterable, *, key=None, reverse=False)`
pub(super) fn builtin_sorted(env: &Env, args: ArgValues) -> RunResult<BuiltinOutput> {
    let mut args = args;
    let key = take_key(&mut args);
    let reverse = args.take_kwarg("reverse").is_some_and(|flag| flag.truthy());
    let items = collect_items(&args.get_one_arg("sorted")?)?;
    match key {
        Some(key) => Ok(with_keys(
            env,
            key,
            items,
            NativeFn::value("sorted", finish_sorted),
            Value::Bool(reverse),
        )),
        None => {
            let mut pairs = self_keyed(items);
            sort_pairs(&mut pairs, reverse)?;
            Ok(Value::list(pairs.into_iter().map(|(_, item)| item).collect()).into())
        }
    }
}

/// `list.sort(*, key=None, reverse=False)`, sorting in place.
pub(super) fn list_sort(env: &Env, list: &Value, args: ArgValues) -> RunResult<BuiltinOutput> {
    let Value::List(items) = list else {
        return Err(ExcType::TypeError.msg("sort() needs a list"));
    };
    let mut args = args;
    let key = take_key(&mut args);
    let reverse = args.take_kwarg("reverse").is_some_and(|flag| flag.truthy());
    args.check_zero_args("sort")?;
    let current = items.borrow().clone();
    match key {
        Some(key) => Ok(with_keys(
            env,
            key,
            current,
            NativeFn::value("sort", finish_sort_in_place),
            Value::tuple(vec![list.clone(), Value::Bool(reverse)]),
        )),
        None => {
            let mut pairs = self_keyed(current);
            sort_pairs(&mut pairs, reverse)?;
            *items.borrow_mut() = pairs.into_iter().map(|(_, item)| item).collect();
            Ok(Value::None.into())
        }
    }
}

/// `min(...)` / `max(...)` over one iterable or several positional values.
pub(super) fn builtin_min_max(env: &Env, args: ArgValues, is_min: bool) -> RunResult<BuiltinOutput> {
    let name = if is_min { "min" } else { "max" };
    let mut args = args;
    let key = take_key(&mut args);
    let default = args.take_kwarg("default");
    let (mut positional, kwargs) = args.into_parts();
    if let Some((key, _)) = kwargs.first() {
        return Err(ExcType::type_error_unexpected_keyword(name, key));
    }
    let items = match positional.len() {
        0 => return Err(ExcType::type_error_at_least(name, 1, 0)),
        1 => collect_items(&positional.remove(0))?,
        _ if default.is_some() => {
            return Err(ExcType::TypeError.msg(format!(
                "Cannot specify a default for {name}() with multiple positional arguments"
            )))
        }
        _ => positional,
    };
    match key {
        Some(key) => {
            let finish = if is_min {
                NativeFn::value("min", finish_min)
            } else {
                NativeFn::value("max", finish_max)
            };
            Ok(with_keys(env, key, items, finish, Value::tuple(default.into_iter().collect())))
        }
        None => Ok(pick_extreme(self_keyed(items), default, is_min)?.into()),
    }
}

fn take_key(args: &mut ArgValues) -> Option<Value> {
    args.take_kwarg("key").filter(|key| !key.is_none())
}

fn self_keyed(items: Vec<Value>) -> Vec<(Value, Value)> {
    items.into_iter().map(|item| (item.clone(), item)).collect()
}

/// Redirects into `_finish([(key(x), x) for x in items], extra)`.
fn with_keys(env: &Env, key: Value, items: Vec<Value>, finish: Value, extra: Value) -> BuiltinOutput {
    let mut builder = CodeBuilder::new("<keyed>");
    for param in ["_key", "_items", "_finish", "_extra"] {
        builder.param(param);
    }
    builder
        .emit(Opcode::BuildList, 0)
        .load_fast("_items")
        .emit(Opcode::GetIter, 0)
        .emit_named(Opcode::ForIter, 16, "to 24")
        .emit_named(Opcode::StoreFast, 4, "_item")
        .load_fast("_key")
        .emit_named(Opcode::LoadFast, 4, "_item")
        .emit(Opcode::CallFunction, 1)
        .emit_named(Opcode::LoadFast, 4, "_item")
        .emit(Opcode::BuildTuple, 2)
        .emit(Opcode::ListAppend, 2)
        .emit_named(Opcode::JumpAbsolute, 6, "to 6")
        .load_fast("_finish")
        .emit(Opcode::RotTwo, 0)
        .load_fast("_extra")
        .emit(Opcode::CallFunction, 2)
        .emit(Opcode::ReturnValue, 0);
    let function = Function::synthetic(builder.build(&env.engine_module));
    BuiltinOutput::Call(
        Value::Function(Rc::new(function)),
        ArgValues::positional(vec![key, Value::list(items), finish, extra]),
    )
}

/// Unpacks the `[(key, item), ...]` list built by the keyed wrapper.
fn keyed_pairs(pairs: &Value) -> RunResult<Vec<(Value, Value)>> {
    collect_items(pairs)?
        .into_iter()
        .map(|pair| match pair {
            Value::Tuple(pair) if pair.len() == 2 => Ok((pair[0].clone(), pair[1].clone())),
            other => Err(ExcType::TypeError.msg(format!("expected a key pair, got {}", other.py_repr()))),
        })
        .collect()
}

/// Stable sort by key; equal keys keep their order in both directions.
fn sort_pairs(pairs: &mut [(Value, Value)], reverse: bool) -> RunResult<()> {
    let mut error = None;
    pairs.sort_by(|a, b| match order(&a.0, &b.0) {
        Ok(ordering) if reverse => ordering.reverse(),
        Ok(ordering) => ordering,
        Err(err) => {
            error.get_or_insert(err);
            Ordering::Equal
        }
    });
    error.map_or(Ok(()), Err)
}

/// First minimal (or maximal) item by key, like CPython.
fn pick_extreme(pairs: Vec<(Value, Value)>, default: Option<Value>, is_min: bool) -> RunResult<Value> {
    let wanted = if is_min { Ordering::Less } else { Ordering::Greater };
    let mut pairs = pairs.into_iter();
    let Some((mut best_key, mut best)) = pairs.next() else {
        return default.ok_or_else(|| {
            let name = if is_min { "min" } else { "max" };
            ExcType::ValueError.msg(format!("{name}() arg is an empty sequence"))
        });
    };
    for (key, item) in pairs {
        if order(&key, &best_key)? == wanted {
            best_key = key;
            best = item;
        }
    }
    Ok(best)
}

fn finish_sorted(_cx: &mut NativeCx<'_>, args: ArgValues) -> Result<NativeReturn, NativeError> {
    let (pairs, reverse) = args.get_two_args("sorted")?;
    let mut pairs = keyed_pairs(&pairs)?;
    sort_pairs(&mut pairs, reverse.truthy())?;
    Ok(Value::list(pairs.into_iter().map(|(_, item)| item).collect()).into())
}

fn finish_sort_in_place(_cx: &mut NativeCx<'_>, args: ArgValues) -> Result<NativeReturn, NativeError> {
    let (pairs, extra) = args.get_two_args("sort")?;
    let mut pairs = keyed_pairs(&pairs)?;
    let Value::Tuple(extra) = &extra else {
        return Err(ExcType::TypeError.msg("sort() lost its list").into());
    };
    let [target, reverse] = &extra[..] else {
        return Err(ExcType::TypeError.msg("sort() lost its list").into());
    };
    sort_pairs(&mut pairs, reverse.truthy())?;
    if let Value::List(list) = target {
        *list.borrow_mut() = pairs.into_iter().map(|(_, item)| item).collect();
    }
    Ok(Value::None.into())
}

fn finish_min(_cx: &mut NativeCx<'_>, args: ArgValues) -> Result<NativeReturn, NativeError> {
    finish_extreme(args, true)
}

fn finish_max(_cx: &mut NativeCx<'_>, args: ArgValues) -> Result<NativeReturn, NativeError> {
    finish_extreme(args, false)
}

fn finish_extreme(args: ArgValues, is_min: bool) -> Result<NativeReturn, NativeError> {
    let (pairs, default) = args.get_two_args(if is_min { "min" } else { "max" })?;
    let default = collect_items(&default)?.into_iter().next();
    Ok(pick_extreme(keyed_pairs(&pairs)?, default, is_min)?.into())
}
