use std::{
    borrow::Cow,
    cell::RefCell,
    cmp::Ordering,
    fmt::{self, Write},
    rc::Rc,
};

use crate::{
    api::{ApiClass, ApiObject, NativeFunction},
    builtins::{methods::BuiltinMethod, Builtins},
    bytecode::CodeBlock,
    class::{BoundMethod, SourceClass, SourceInstance},
    exception_private::{ExcType, Exception, RunError, RunResult},
    exception_public::{exception_message, TraceEntry},
    function::{CellRef, Constructor, Function},
    module::Module,
    types::{Dict, Range, Set, Slice, Type, ValueIter},
};

/// Containers nested deeper than this are rendered as `...` by `repr`.
const MAX_REPR_DEPTH: usize = 48;

/// Containers nested deeper than this raise `RecursionError` when compared.
const MAX_COMPARE_DEPTH: usize = 200;

/// Primary value type representing script objects at runtime.
///
/// Immediate values are stored inline; everything with identity is reference counted so that
/// cloning a `Value` never copies the underlying object. Mutable containers use `RefCell` since
/// all engine state lives on the single scheduler thread.
#[derive(Clone)]
pub enum Value {
    None,
    Ellipsis,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    Dict(Rc<RefCell<Dict>>),
    Set(Rc<RefCell<Set>>),
    Slice(Rc<Slice>),
    Range(Range),
    Iter(Rc<RefCell<ValueIter>>),
    /// A closure cell, as produced by `LOAD_CLOSURE`.
    Cell(CellRef),
    Code(Rc<CodeBlock>),
    Function(Rc<Function>),
    /// A class body function bound to the class namespace it populates.
    Constructor(Rc<Constructor>),
    BoundMethod(Rc<BoundMethod>),
    Class(Rc<SourceClass>),
    Instance(Rc<SourceInstance>),
    Module(Rc<Module>),
    Builtin(Builtins),
    BuiltinMethod(Rc<BuiltinMethod>),
    /// The `__build_class__` callable pushed by `LOAD_BUILD_CLASS`.
    BuildClass,
    Exception(Rc<Exception>),
    Traceback(Rc<[TraceEntry]>),
    ApiClass(Rc<dyn ApiClass>),
    ApiObject(Rc<dyn ApiObject>),
    Native(Rc<dyn NativeFunction>),
    /// Placeholder pushed by `LOAD_METHOD` when the attribute is already bound.
    NoSelf,
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.py_repr())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value.into())
    }
}

impl From<Rc<str>> for Value {
    fn from(value: Rc<str>) -> Self {
        Self::Str(value)
    }
}

impl Value {
    #[must_use]
    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    #[must_use]
    pub fn tuple(items: Vec<Self>) -> Self {
        Self::Tuple(items.into())
    }

    #[must_use]
    pub fn dict(dict: Dict) -> Self {
        Self::Dict(Rc::new(RefCell::new(dict)))
    }

    #[must_use]
    pub fn set(set: Set) -> Self {
        Self::Set(Rc::new(RefCell::new(set)))
    }

    #[must_use]
    pub fn iter(iter: ValueIter) -> Self {
        Self::Iter(Rc::new(RefCell::new(iter)))
    }

    /// The Python type name, as used in error messages and `repr`.
    #[must_use]
    pub fn type_name(&self) -> Cow<'_, str> {
        let name = match self {
            Self::None => "NoneType",
            Self::Ellipsis => "ellipsis",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Set(_) => "set",
            Self::Slice(_) => "slice",
            Self::Range(_) => "range",
            Self::Iter(_) => "iterator",
            Self::Cell(_) => "cell",
            Self::Code(_) => "code",
            Self::Function(_) | Self::Constructor(_) => "function",
            Self::BoundMethod(_) => "method",
            Self::Class(_) | Self::ApiClass(_) => "type",
            Self::Instance(instance) => return Cow::Owned(instance.class().name().to_owned()),
            Self::Module(_) => "module",
            Self::Builtin(builtin) => builtin.py_type(),
            Self::BuiltinMethod(_) | Self::BuildClass | Self::Native(_) => "builtin_function_or_method",
            Self::Exception(exc) => exc.exc_type().into(),
            Self::Traceback(_) => "traceback",
            Self::ApiObject(object) => return Cow::Owned(object.type_name().to_owned()),
            Self::NoSelf => "NULL",
        };
        Cow::Borrowed(name)
    }

    /// The builtin type of this value, `None` for user classes and capability objects.
    #[must_use]
    pub(crate) fn builtin_type(&self) -> Option<Type> {
        Some(match self {
            Self::None => Type::NoneType,
            Self::Bool(_) => Type::Bool,
            Self::Int(_) => Type::Int,
            Self::Float(_) => Type::Float,
            Self::Str(_) => Type::Str,
            Self::List(_) => Type::List,
            Self::Tuple(_) => Type::Tuple,
            Self::Dict(_) => Type::Dict,
            Self::Set(_) => Type::Set,
            Self::Range(_) => Type::Range,
            Self::Slice(_) => Type::Slice,
            Self::Class(_) | Self::ApiClass(_) | Self::Builtin(Builtins::Type(_) | Builtins::ExcType(_)) => {
                Type::Type
            }
            _ => return None,
        })
    }

    /// Python truthiness for values that do not need a frame to decide.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(list) => !list.borrow().is_empty(),
            Self::Tuple(items) => !items.is_empty(),
            Self::Dict(dict) => !dict.borrow().is_empty(),
            Self::Set(set) => !set.borrow().is_empty(),
            Self::Range(range) => range.len() != 0,
            _ => true,
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Identity comparison (`is`).
    #[must_use]
    pub fn is(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) | (Self::Ellipsis, Self::Ellipsis) | (Self::NoSelf, Self::NoSelf) => true,
            (Self::BuildClass, Self::BuildClass) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            // small ints and interned strings compare by value in practice
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Address of the shared allocation for reference values.
    #[must_use]
    pub(crate) fn identity(&self) -> Option<usize> {
        let ptr: *const () = match self {
            Self::Str(s) => Rc::as_ptr(s).cast(),
            Self::List(v) => Rc::as_ptr(v).cast(),
            Self::Tuple(v) => Rc::as_ptr(v).cast(),
            Self::Dict(v) => Rc::as_ptr(v).cast(),
            Self::Set(v) => Rc::as_ptr(v).cast(),
            Self::Slice(v) => Rc::as_ptr(v).cast(),
            Self::Iter(v) => Rc::as_ptr(v).cast(),
            Self::Cell(v) => Rc::as_ptr(v).cast(),
            Self::Code(v) => Rc::as_ptr(v).cast(),
            Self::Function(v) => Rc::as_ptr(v).cast(),
            Self::Constructor(v) => Rc::as_ptr(v).cast(),
            Self::BoundMethod(v) => Rc::as_ptr(v).cast(),
            Self::Class(v) => Rc::as_ptr(v).cast(),
            Self::Instance(v) => Rc::as_ptr(v).cast(),
            Self::Module(v) => Rc::as_ptr(v).cast(),
            Self::BuiltinMethod(v) => Rc::as_ptr(v).cast(),
            Self::Exception(v) => Rc::as_ptr(v).cast(),
            Self::Traceback(v) => Rc::as_ptr(v).cast(),
            Self::ApiClass(v) => Rc::as_ptr(v).cast(),
            Self::ApiObject(v) => Rc::as_ptr(v).cast(),
            Self::Native(v) => Rc::as_ptr(v).cast(),
            _ => return None,
        };
        Some(ptr as usize)
    }

    /// Python equality (`==`) for values whose comparison needs no user code.
    ///
    /// Instances compare by identity here; `__eq__` overrides are dispatched by the VM.
    /// Structures nested past the comparison limit compare unequal here; the VM raises instead.
    #[must_use]
    pub fn py_eq(&self, other: &Self) -> bool {
        self.eq_at(other, 0).unwrap_or(false)
    }

    /// Like [`Value::py_eq`] but raising `RecursionError` for self-referencing containers.
    pub(crate) fn py_eq_checked(&self, other: &Self) -> RunResult<bool> {
        self.eq_at(other, 0)
    }

    pub(crate) fn eq_at(&self, other: &Self, depth: usize) -> RunResult<bool> {
        if depth > MAX_COMPARE_DEPTH {
            return Err(comparison_depth_exceeded());
        }
        Ok(match (self, other) {
            (Self::None, Self::None) | (Self::Ellipsis, Self::Ellipsis) => true,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow(), depth)?,
            (Self::Tuple(a), Self::Tuple(b)) => seq_eq(a, b, depth)?,
            (Self::Dict(a), Self::Dict(b)) => Rc::ptr_eq(a, b) || a.borrow().eq_at(&b.borrow(), depth + 1)?,
            (Self::Set(a), Self::Set(b)) => Rc::ptr_eq(a, b) || a.borrow().py_eq(&b.borrow()),
            (Self::Range(a), Self::Range(b)) => a == b,
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Exception(a), Self::Exception(b)) => Rc::ptr_eq(a, b),
            _ => match (self.as_number(), other.as_number()) {
                (Some(Number::Int(a)), Some(Number::Int(b))) => a == b,
                (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
                _ => self.is(other),
            },
        })
    }

    /// Python ordering for builtin values, `None` when the types are not orderable.
    #[must_use]
    pub fn py_cmp(&self, other: &Self) -> Option<Ordering> {
        self.cmp_at(other, 0).ok().flatten()
    }

    /// Like [`Value::py_cmp`] but raising `RecursionError` for self-referencing containers.
    pub(crate) fn py_cmp_checked(&self, other: &Self) -> RunResult<Option<Ordering>> {
        self.cmp_at(other, 0)
    }

    fn cmp_at(&self, other: &Self, depth: usize) -> RunResult<Option<Ordering>> {
        if depth > MAX_COMPARE_DEPTH {
            return Err(comparison_depth_exceeded());
        }
        Ok(match (self, other) {
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::List(a), Self::List(b)) => seq_cmp(&a.borrow(), &b.borrow(), depth)?,
            (Self::Tuple(a), Self::Tuple(b)) => seq_cmp(a, b, depth)?,
            _ => match (self.as_number(), other.as_number()) {
                (Some(Number::Int(a)), Some(Number::Int(b))) => Some(a.cmp(&b)),
                (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()),
                _ => None,
            },
        })
    }

    /// Numeric view of ints, bools and floats.
    #[must_use]
    pub(crate) fn as_number(&self) -> Option<Number> {
        match self {
            Self::Bool(b) => Some(Number::Int(i64::from(*b))),
            Self::Int(i) => Some(Number::Int(*i)),
            Self::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }

    /// Interprets the value as an integer index (ints and bools only).
    pub(crate) fn as_int(&self, what: &str) -> RunResult<i64> {
        match self {
            Self::Int(i) => Ok(*i),
            Self::Bool(b) => Ok(i64::from(*b)),
            _ => Err(ExcType::TypeError.msg(format!(
                "{what} must be an integer, not '{}'",
                self.type_name()
            ))),
        }
    }

    /// Borrows the text of a `str` value.
    pub(crate) fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Arguments of an exception value, empty for anything else.
    #[must_use]
    pub(crate) fn exception_args(&self) -> Vec<Self> {
        match self {
            Self::Exception(exc) => exc.args().to_vec(),
            Self::Instance(instance) => match instance.get_value("args") {
                Some(Self::Tuple(args)) => args.to_vec(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// Python `repr()` for values that do not need a frame to render.
    #[must_use]
    pub fn py_repr(&self) -> String {
        let mut out = String::new();
        self.repr_into(&mut out, 0);
        out
    }

    /// Python `str()` for values that do not need a frame to render.
    #[must_use]
    pub fn py_str(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            Self::Exception(_) => exception_message(self),
            Self::Instance(instance) if instance.class().exception_base().is_some() => exception_message(self),
            _ => self.py_repr(),
        }
    }

    fn repr_into(&self, out: &mut String, depth: usize) {
        if depth > MAX_REPR_DEPTH {
            out.push_str("...");
            return;
        }
        match self {
            Self::None => out.push_str("None"),
            Self::Ellipsis => out.push_str("Ellipsis"),
            Self::Bool(true) => out.push_str("True"),
            Self::Bool(false) => out.push_str("False"),
            Self::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Self::Float(f) => out.push_str(&float_repr(*f)),
            Self::Str(s) => string_repr_fmt(s, out),
            Self::List(list) => {
                out.push('[');
                repr_items(&list.borrow(), out, depth);
                out.push(']');
            }
            Self::Tuple(items) => {
                out.push('(');
                repr_items(items, out, depth);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Self::Dict(dict) => {
                out.push('{');
                for (index, (key, value)) in dict.borrow().iter().enumerate() {
                    if index > 0 {
                        out.push_str(", ");
                    }
                    key.repr_into(out, depth + 1);
                    out.push_str(": ");
                    value.repr_into(out, depth + 1);
                }
                out.push('}');
            }
            Self::Set(set) => {
                let set = set.borrow();
                if set.is_empty() {
                    out.push_str("set()");
                } else {
                    out.push('{');
                    let items: Vec<Self> = set.iter().cloned().collect();
                    repr_items(&items, out, depth);
                    out.push('}');
                }
            }
            Self::Slice(slice) => {
                let _ = write!(
                    out,
                    "slice({}, {}, {})",
                    slice.start.py_repr(),
                    slice.stop.py_repr(),
                    slice.step.py_repr()
                );
            }
            Self::Range(range) => {
                if range.step == 1 {
                    let _ = write!(out, "range({}, {})", range.start, range.stop);
                } else {
                    let _ = write!(out, "range({}, {}, {})", range.start, range.stop, range.step);
                }
            }
            Self::Iter(_) => out.push_str("<iterator object>"),
            Self::Cell(_) => out.push_str("<cell>"),
            Self::Code(code) => {
                let _ = write!(out, "<code object {}>", code.label());
            }
            Self::Function(function) => {
                let _ = write!(out, "<function {}>", function.qualname());
            }
            Self::Constructor(constructor) => {
                let _ = write!(out, "<function {}>", constructor.function.qualname());
            }
            Self::BoundMethod(method) => {
                let _ = write!(out, "<bound method {} of ", method.function.qualname());
                method.receiver.repr_into(out, depth + 1);
                out.push('>');
            }
            Self::Class(class) => {
                let _ = write!(out, "<class '{}.{}'>", class.module_name(), class.name());
            }
            Self::Instance(instance) => {
                let class = instance.class();
                if class.exception_base().is_some() {
                    let _ = write!(out, "{}(", class.name());
                    repr_items(&self.exception_args(), out, depth);
                    out.push(')');
                } else {
                    let _ = write!(out, "<{}.{} object>", class.module_name(), class.name());
                }
            }
            Self::Module(module) => {
                let _ = write!(out, "<module '{}'>", module.name());
            }
            Self::Builtin(builtin) => {
                let _ = builtin.py_repr_fmt(out);
            }
            Self::BuiltinMethod(method) => {
                let _ = write!(
                    out,
                    "<built-in method {} of {} object>",
                    method.name(),
                    method.receiver().type_name()
                );
            }
            Self::BuildClass => out.push_str("<built-in function __build_class__>"),
            Self::Exception(exc) => {
                let _ = write!(out, "{}(", exc.exc_type());
                repr_items(exc.args(), out, depth);
                out.push(')');
            }
            Self::Traceback(_) => out.push_str("<traceback object>"),
            Self::ApiClass(class) => {
                let _ = write!(out, "<class '{}'>", class.name());
            }
            Self::ApiObject(object) => {
                let _ = write!(out, "<{} object>", object.type_name());
            }
            Self::Native(native) => {
                let _ = write!(out, "<built-in function {}>", native.name());
            }
            Self::NoSelf => out.push_str("<NULL>"),
        }
    }
}

/// Numeric view used by arithmetic and comparisons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

fn comparison_depth_exceeded() -> RunError {
    ExcType::RecursionError.msg("maximum recursion depth exceeded in comparison")
}

fn seq_eq(a: &[Value], b: &[Value], depth: usize) -> RunResult<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !x.eq_at(y, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn seq_cmp(a: &[Value], b: &[Value], depth: usize) -> RunResult<Option<Ordering>> {
    for (x, y) in a.iter().zip(b) {
        if !x.eq_at(y, depth + 1)? {
            return x.cmp_at(y, depth + 1);
        }
    }
    Ok(Some(a.len().cmp(&b.len())))
}

fn repr_items(items: &[Value], out: &mut String, depth: usize) {
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        item.repr_into(out, depth + 1);
    }
}

/// Formats a float the way CPython's `repr` does.
///
/// Exponential notation is used below 1e-4 and from 1e16 upwards, with the exponent
/// written as `e+16` / `e-05`.
#[must_use]
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_owned();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let s = format!("{f:e}");
        let Some((mantissa, exp)) = s.split_once('e') else {
            return s;
        };
        let (sign, digits) = match exp.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exp),
        };
        return format!("{mantissa}e{sign}{digits:0>2}");
    }
    let s = format!("{f}");
    if s.contains('.') {
        s
    } else {
        format!("{s}.0")
    }
}

/// Writes a Python string literal repr, preferring single quotes like CPython.
pub(crate) fn string_repr_fmt(s: &str, out: &mut String) {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}
