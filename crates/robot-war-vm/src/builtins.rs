//! Builtin functions, types and exception classes visible to every script.
//!
//! `Builtins` is a small `Copy` handle; the behaviour lives in the submodules and in
//! [`BuiltinsFunctions::call`]. A builtin that needs script code to finish (an instance's
//! `__str__`, a `key=` function) returns [`BuiltinOutput::Call`] and the VM pushes a frame.

pub(crate) mod isinstance;
pub(crate) mod methods;
mod print;
mod sorted;
mod types;

use std::{
    fmt::Write,
    hash::BuildHasher,
    rc::Rc,
    str::FromStr,
};

use ahash::RandomState;
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    args::ArgValues,
    bytecode::{
        vm::{
            attr::{load_attr, store_attr},
            binary::{binary_op_or_error, int_floor_div, int_mod},
        },
        BinaryOperator,
    },
    class::BoundMethod,
    exception_private::{ExcType, Exception, RunError, RunResult},
    playground::Env,
    types::{collect_items, DictKey, Type, ValueIter},
    value::Value,
};

/// Every builtin name a script can resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtins {
    Function(BuiltinsFunctions),
    /// A builtin type, callable as its constructor.
    Type(Type),
    /// An exception type constructor like `ValueError`.
    ExcType(ExcType),
}

/// What a builtin call produced.
#[derive(Debug)]
pub(crate) enum BuiltinOutput {
    Value(Value),
    /// Finish by calling `callee` with `args` in a new frame; its return value is the result.
    Call(Value, ArgValues),
}

impl From<Value> for BuiltinOutput {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl Builtins {
    /// Resolves a builtin-scope name, including `__build_class__`.
    pub(crate) fn lookup(name: &str) -> Option<Value> {
        if name == "__build_class__" {
            return Some(Value::BuildClass);
        }
        name.parse().ok().map(Value::Builtin)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Function(function) => function.into(),
            Self::Type(t) => t.into(),
            Self::ExcType(exc_type) => exc_type.into(),
        }
    }

    /// Writes the Python repr() string for this builtin.
    pub fn py_repr_fmt<W: Write>(self, f: &mut W) -> std::fmt::Result {
        match self {
            Self::Function(function) => write!(f, "<built-in function {function}>"),
            Self::Type(t) => write!(f, "<class '{t}'>"),
            Self::ExcType(exc_type) => write!(f, "<class '{exc_type}'>"),
        }
    }

    #[must_use]
    pub fn py_type(self) -> &'static str {
        match self {
            Self::Function(_) => "builtin_function_or_method",
            Self::Type(_) | Self::ExcType(_) => "type",
        }
    }

    pub(crate) fn call(self, env: &mut Env, args: ArgValues) -> RunResult<BuiltinOutput> {
        match self {
            Self::Function(function) => function.call(env, args),
            Self::Type(t) => types::call_type(t, args),
            Self::ExcType(exc_type) => {
                let name: &'static str = exc_type.into();
                args.check_no_kwargs(name)?;
                let exception = Exception::new(exc_type, args.into_positional());
                Ok(Value::Exception(Rc::new(exception)).into())
            }
        }
    }
}

impl FromStr for Builtins {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(function) = BuiltinsFunctions::from_str(s) {
            Ok(Self::Function(function))
        } else if let Ok(t) = Type::from_str(s).map_err(|_| ()).and_then(|t| match t {
            Type::NoneType => Err(()),
            t => Ok(t),
        }) {
            Ok(Self::Type(t))
        } else if let Ok(exc_type) = ExcType::from_str(s) {
            Ok(Self::ExcType(exc_type))
        } else {
            Err(())
        }
    }
}

/// Builtin functions like `print` and `len`.
///
/// All variants serialize to lowercase (e.g., `Print` -> "print").
#[derive(Debug, Clone, Copy, Display, EnumString, IntoStaticStr, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum BuiltinsFunctions {
    Print,
    Len,
    Repr,
    Isinstance,
    Hasattr,
    Getattr,
    Setattr,
    Abs,
    Min,
    Max,
    Sum,
    Sorted,
    Reversed,
    Enumerate,
    Zip,
    Round,
    Any,
    All,
    Iter,
    Next,
    Id,
    Hash,
    Chr,
    Ord,
    Divmod,
}

impl BuiltinsFunctions {
    fn call(self, env: &mut Env, args: ArgValues) -> RunResult<BuiltinOutput> {
        let value = match self {
            Self::Print => print::builtin_print(env.writer.as_mut(), args)?,
            Self::Len => return builtin_len(args),
            Self::Repr => {
                let value = args.get_one_arg("repr")?;
                if let Some(redirect) = dunder_redirect(&value, "__repr__") {
                    return Ok(redirect);
                }
                Value::from(value.py_repr())
            }
            Self::Isinstance => {
                let (value, class_info) = args.get_two_args("isinstance")?;
                Value::Bool(isinstance::isinstance(&value, &class_info)?)
            }
            Self::Hasattr => {
                let (value, name) = args.get_two_args("hasattr")?;
                let name = attr_name(&name, "hasattr")?;
                match load_attr(&value, &name) {
                    Ok(_) => Value::Bool(true),
                    Err(err) if is_attribute_error(&err) => Value::Bool(false),
                    Err(err) => return Err(err),
                }
            }
            Self::Getattr => {
                let (value, name, default) = match args.into_positional().as_slice() {
                    [value, name] => (value.clone(), name.clone(), None),
                    [value, name, default] => (value.clone(), name.clone(), Some(default.clone())),
                    other => return Err(ExcType::type_error_arg_count("getattr", 2, other.len())),
                };
                let name = attr_name(&name, "getattr")?;
                match (load_attr(&value, &name), default) {
                    (Ok(found), _) => found,
                    (Err(err), Some(default)) if is_attribute_error(&err) => default,
                    (Err(err), _) => return Err(err),
                }
            }
            Self::Setattr => {
                let [target, name, value]: [Value; 3] = args
                    .into_positional()
                    .try_into()
                    .map_err(|rest: Vec<Value>| ExcType::type_error_arg_count("setattr", 3, rest.len()))?;
                store_attr(&target, &attr_name(&name, "setattr")?, value)?;
                Value::None
            }
            Self::Abs => match args.get_one_arg("abs")? {
                Value::Int(i) => Value::Int(i.checked_abs().ok_or_else(ExcType::overflow)?),
                Value::Bool(b) => Value::Int(i64::from(b)),
                Value::Float(f) => Value::Float(f.abs()),
                other => {
                    return Err(ExcType::TypeError.msg(format!(
                        "bad operand type for abs(): '{}'",
                        other.type_name()
                    )))
                }
            },
            Self::Min => return sorted::builtin_min_max(env, args, true),
            Self::Max => return sorted::builtin_min_max(env, args, false),
            Self::Sum => {
                let (iterable, start) = args.get_one_two_args("sum")?;
                if matches!(start, Some(Value::Str(_))) {
                    return Err(ExcType::TypeError.msg("sum() can't sum strings [use ''.join(seq) instead]"));
                }
                let mut total = start.unwrap_or(Value::Int(0));
                for item in collect_items(&iterable)? {
                    total = binary_op_or_error(BinaryOperator::Add, &total, &item)?;
                }
                total
            }
            Self::Sorted => return sorted::builtin_sorted(env, args),
            Self::Reversed => {
                let value = args.get_one_arg("reversed")?;
                let mut items = match &value {
                    Value::Set(_) | Value::Iter(_) => {
                        return Err(ExcType::TypeError.msg(format!(
                            "'{}' object is not reversible",
                            value.type_name()
                        )))
                    }
                    other => collect_items(other)?,
                };
                items.reverse();
                Value::iter(ValueIter::Items { items, index: 0 })
            }
            Self::Enumerate => {
                let mut args = args;
                let start = args.take_kwarg("start");
                let (iterable, positional_start) = args.get_one_two_args("enumerate")?;
                let start = match start.or(positional_start) {
                    Some(start) => start.as_int("enumerate() start")?,
                    None => 0,
                };
                let mut items = Vec::new();
                for (index, item) in collect_items(&iterable)?.into_iter().enumerate() {
                    let offset = i64::try_from(index).map_err(|_| ExcType::overflow())?;
                    let counter = start.checked_add(offset).ok_or_else(ExcType::overflow)?;
                    items.push(Value::tuple(vec![Value::Int(counter), item]));
                }
                Value::iter(ValueIter::Items { items, index: 0 })
            }
            Self::Zip => {
                args.check_no_kwargs("zip")?;
                let columns = args
                    .into_positional()
                    .iter()
                    .map(collect_items)
                    .collect::<RunResult<Vec<_>>>()?;
                let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
                let items = (0..rows)
                    .map(|row| Value::tuple(columns.iter().map(|column| column[row].clone()).collect()))
                    .collect();
                Value::iter(ValueIter::Items { items, index: 0 })
            }
            Self::Round => {
                let (number, ndigits) = args.get_one_two_args("round")?;
                round(&number, ndigits.filter(|n| !n.is_none()))?
            }
            Self::Any => {
                let iterable = args.get_one_arg("any")?;
                Value::Bool(collect_items(&iterable)?.iter().any(Value::truthy))
            }
            Self::All => {
                let iterable = args.get_one_arg("all")?;
                Value::Bool(collect_items(&iterable)?.iter().all(Value::truthy))
            }
            Self::Iter => ValueIter::new(&args.get_one_arg("iter")?)?,
            Self::Next => {
                let (iterator, default) = args.get_one_two_args("next")?;
                let Value::Iter(iter) = &iterator else {
                    return Err(ExcType::TypeError.msg(format!(
                        "'{}' object is not an iterator",
                        iterator.type_name()
                    )));
                };
                let next = iter.borrow_mut().next();
                match (next, default) {
                    (Some(item), _) => item,
                    (None, Some(default)) => default,
                    (None, None) => return Err(ExcType::StopIteration.bare()),
                }
            }
            Self::Id => {
                let value = args.get_one_arg("id")?;
                match value.identity().and_then(|address| i64::try_from(address).ok()) {
                    Some(address) => Value::Int(address),
                    None => Value::Int(hash_value(&value)?),
                }
            }
            Self::Hash => Value::Int(hash_value(&args.get_one_arg("hash")?)?),
            Self::Chr => {
                let code = args.get_one_arg("chr")?.as_int("chr() argument")?;
                let c = u32::try_from(code)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| ExcType::ValueError.msg("chr() arg not in range(0x110000)"))?;
                Value::from(c.to_string())
            }
            Self::Ord => {
                let value = args.get_one_arg("ord")?;
                let text = value.as_str().ok_or_else(|| {
                    ExcType::TypeError.msg(format!(
                        "ord() expected string of length 1, but {} found",
                        value.type_name()
                    ))
                })?;
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Value::Int(i64::from(u32::from(c))),
                    _ => {
                        return Err(ExcType::TypeError.msg(format!(
                            "ord() expected a character, but string of length {} found",
                            text.chars().count()
                        )))
                    }
                }
            }
            Self::Divmod => {
                let (a, b) = args.get_two_args("divmod")?;
                match (&a, &b) {
                    (Value::Int(x), Value::Int(y)) => {
                        Value::tuple(vec![Value::Int(int_floor_div(*x, *y)?), Value::Int(int_mod(*x, *y)?)])
                    }
                    _ => Value::tuple(vec![
                        binary_op_or_error(BinaryOperator::FloorDiv, &a, &b)?,
                        binary_op_or_error(BinaryOperator::Mod, &a, &b)?,
                    ]),
                }
            }
        };
        Ok(value.into())
    }
}

fn builtin_len(args: ArgValues) -> RunResult<BuiltinOutput> {
    let value = args.get_one_arg("len")?;
    if let Some(redirect) = dunder_redirect(&value, "__len__") {
        return Ok(redirect);
    }
    let len = match &value {
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
    };
    let len = i64::try_from(len).map_err(|_| ExcType::overflow())?;
    Ok(Value::Int(len).into())
}

/// Redirects to a dunder defined by the instance's class, if any.
pub(crate) fn dunder_redirect(value: &Value, dunder: &str) -> Option<BuiltinOutput> {
    let Value::Instance(instance) = value else {
        return None;
    };
    let function = instance.class_function(dunder)?;
    let method = BoundMethod::new(value.clone(), function);
    Some(BuiltinOutput::Call(
        Value::BoundMethod(Rc::new(method)),
        ArgValues::default(),
    ))
}

/// The type object of a value, as returned by `type(x)`.
pub(crate) fn type_of(value: &Value) -> RunResult<Value> {
    Ok(match value {
        Value::Instance(instance) => Value::Class(instance.class().clone()),
        Value::Exception(exc) => Value::Builtin(Builtins::ExcType(exc.exc_type())),
        other => match other.builtin_type() {
            Some(t) => Value::Builtin(Builtins::Type(t)),
            None => {
                return Err(ExcType::TypeError.msg(format!(
                    "type() of '{}' objects is not supported",
                    other.type_name()
                )))
            }
        },
    })
}

fn attr_name(name: &Value, function: &str) -> RunResult<Rc<str>> {
    match name {
        Value::Str(s) => Ok(s.clone()),
        other => Err(ExcType::TypeError.msg(format!(
            "{function}(): attribute name must be string, not '{}'",
            other.type_name()
        ))),
    }
}

fn is_attribute_error(err: &RunError) -> bool {
    matches!(err, RunError::Exc(Value::Exception(exc)) if exc.exc_type() == ExcType::AttributeError)
}

/// `hash()`: ints hash to themselves, everything else through a fixed-seed hasher so results
/// are stable across runs.
#[allow(clippy::cast_possible_wrap)]
fn hash_value(value: &Value) -> RunResult<i64> {
    let key = DictKey::new(value)?;
    Ok(match key {
        DictKey::Int(i) => i,
        other => {
            let state = RandomState::with_seeds(0x5f3c, 0x9e37, 0x79b9, 0x7f4a);
            BuildHasher::hash_one(&state, &other) as i64
        }
    })
}

/// `round()` with banker's rounding, matching CPython for halfway cases.
fn round(number: &Value, ndigits: Option<Value>) -> RunResult<Value> {
    let digits = ndigits.map(|n| n.as_int("round() ndigits")).transpose()?;
    match (number, digits) {
        (Value::Int(i), None) => Ok(Value::Int(*i)),
        (Value::Bool(b), None) => Ok(Value::Int(i64::from(*b))),
        (Value::Int(i), Some(digits)) => {
            if digits >= 0 {
                return Ok(Value::Int(*i));
            }
            let factor = u32::try_from(-digits)
                .ok()
                .and_then(|exp| 10_i64.checked_pow(exp));
            let Some(factor) = factor else {
                return Ok(Value::Int(0));
            };
            let quotient = int_floor_div(*i, factor)?;
            let remainder = int_mod(*i, factor)?;
            let doubled = remainder.saturating_mul(2);
            let rounded = if doubled > factor || (doubled == factor && quotient % 2 != 0) {
                quotient + 1
            } else {
                quotient
            };
            Ok(Value::Int(rounded.checked_mul(factor).ok_or_else(ExcType::overflow)?))
        }
        (Value::Float(f), None) => {
            let rounded = round_half_even(*f);
            if rounded.is_nan() {
                return Err(ExcType::ValueError.msg("cannot convert float NaN to integer"));
            }
            if rounded.is_infinite() || rounded.abs() >= 9.2e18 {
                return Err(ExcType::OverflowError.msg("cannot convert float infinity to integer"));
            }
            #[allow(clippy::cast_possible_truncation)]
            Ok(Value::Int(rounded as i64))
        }
        (Value::Float(f), Some(digits)) => {
            let Ok(exp) = i32::try_from(digits) else {
                return Ok(Value::Float(*f));
            };
            let factor = 10_f64.powi(exp);
            if !factor.is_finite() || factor == 0.0 {
                return Ok(Value::Float(*f));
            }
            Ok(Value::Float(round_half_even(f * factor) / factor))
        }
        (other, _) => Err(ExcType::TypeError.msg(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

fn round_half_even(f: f64) -> f64 {
    let rounded = f.round();
    if (f - f.trunc()).abs() == 0.5 {
        2.0 * (f / 2.0).round()
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlaygroundConfig;

    fn call(name: &str, args: Vec<Value>) -> RunResult<Value> {
        let mut env = Env::new(PlaygroundConfig::default());
        let Some(Value::Builtin(builtin)) = Builtins::lookup(name) else {
            panic!("{name} is not a builtin");
        };
        match builtin.call(&mut env, ArgValues::positional(args))? {
            BuiltinOutput::Value(value) => Ok(value),
            BuiltinOutput::Call(..) => panic!("{name} unexpectedly redirected"),
        }
    }

    #[test]
    fn names_resolve_to_the_right_kind() {
        assert_eq!(Builtins::lookup("len").unwrap().py_repr(), "<built-in function len>");
        assert_eq!(Builtins::lookup("int").unwrap().py_repr(), "<class 'int'>");
        assert_eq!(Builtins::lookup("KeyError").unwrap().py_repr(), "<class 'KeyError'>");
        assert!(matches!(Builtins::lookup("__build_class__"), Some(Value::BuildClass)));
        assert!(Builtins::lookup("NoneType").is_none());
        assert!(Builtins::lookup("open").is_none());
    }

    #[test]
    fn round_uses_bankers_rounding() {
        assert_eq!(call("round", vec![Value::Float(2.5)]).unwrap().py_repr(), "2");
        assert_eq!(call("round", vec![Value::Float(3.5)]).unwrap().py_repr(), "4");
        assert_eq!(call("round", vec![Value::Float(-0.5)]).unwrap().py_repr(), "0");
        assert_eq!(call("round", vec![Value::Int(1250), Value::Int(-2)]).unwrap().py_repr(), "1200");
        assert_eq!(call("round", vec![Value::Float(1.234), Value::Int(2)]).unwrap().py_repr(), "1.23");
    }

    #[test]
    fn divmod_follows_floor_semantics() {
        let result = call("divmod", vec![Value::Int(-7), Value::Int(2)]).unwrap();
        assert_eq!(result.py_repr(), "(-4, 1)");
    }

    #[test]
    fn len_and_chr_ord() {
        assert_eq!(call("len", vec![Value::from("héllo")]).unwrap().py_repr(), "5");
        assert_eq!(call("chr", vec![Value::Int(65)]).unwrap().py_repr(), "'A'");
        assert_eq!(call("ord", vec![Value::from("a")]).unwrap().py_repr(), "97");
        let err = call("len", vec![Value::Int(3)]).unwrap_err();
        assert!(err.to_string().contains("object of type 'int' has no len()"), "{err}");
    }

    #[test]
    fn zip_stops_at_the_shortest() {
        let zipped = call(
            "zip",
            vec![
                Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
                Value::from("ab"),
            ],
        )
        .unwrap();
        let items = collect_items(&zipped).unwrap();
        assert_eq!(Value::list(items).py_repr(), "[(1, 'a'), (2, 'b')]");
    }

    #[test]
    fn hash_is_stable_and_rejects_lists() {
        let a = call("hash", vec![Value::from("robot")]).unwrap();
        let b = call("hash", vec![Value::from("robot")]).unwrap();
        assert!(a.py_eq(&b));
        assert_eq!(call("hash", vec![Value::Int(42)]).unwrap().py_repr(), "42");
        assert!(call("hash", vec![Value::list(vec![])]).is_err());
    }

    #[test]
    fn exception_types_construct_exceptions() {
        let exc = call("ValueError", vec![Value::from("bad")]).unwrap();
        assert_eq!(exc.py_repr(), "ValueError('bad')");
        assert_eq!(exc.py_str(), "bad");
    }
}
