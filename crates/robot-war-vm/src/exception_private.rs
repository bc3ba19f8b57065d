use std::{fmt, rc::Rc};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{exception_public::TraceEntry, value::Value};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Python exception types supported by the engine.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>` implementations.
/// The string representation matches the variant name exactly (e.g., `ValueError` -> "ValueError").
/// `IOError` and `EnvironmentError` parse as aliases of `OSError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ExcType {
    /// Root of the hierarchy - matches any exception in isinstance checks.
    BaseException,
    /// Base of every ordinary exception.
    Exception,

    /// Normal-termination channel, carries the exit code.
    SystemExit,
    KeyboardInterrupt,

    // --- ArithmeticError hierarchy ---
    ArithmeticError,
    OverflowError,
    ZeroDivisionError,

    // --- LookupError hierarchy ---
    LookupError,
    IndexError,
    KeyError,

    // --- RuntimeError hierarchy ---
    RuntimeError,
    NotImplementedError,
    RecursionError,

    AttributeError,

    // --- NameError hierarchy ---
    NameError,
    UnboundLocalError,

    ValueError,

    // --- ImportError hierarchy ---
    ImportError,
    ModuleNotFoundError,

    #[strum(to_string = "OSError", serialize = "IOError", serialize = "EnvironmentError")]
    OSError,

    // --- Standalone exception types ---
    AssertionError,
    MemoryError,
    StopIteration,
    SystemError,
    TypeError,
}

impl ExcType {
    /// Checks if this exception type is a subclass of another exception type.
    ///
    /// Returns true if `self` would be caught by `except handler_type:`.
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        if self == handler_type {
            return true;
        }
        match handler_type {
            Self::BaseException => true,
            // Exception catches everything except BaseException and its direct children
            Self::Exception => !matches!(self, Self::BaseException | Self::KeyboardInterrupt | Self::SystemExit),
            Self::LookupError => matches!(self, Self::KeyError | Self::IndexError),
            Self::ArithmeticError => matches!(self, Self::ZeroDivisionError | Self::OverflowError),
            Self::RuntimeError => matches!(self, Self::RecursionError | Self::NotImplementedError),
            Self::NameError => matches!(self, Self::UnboundLocalError),
            Self::ImportError => matches!(self, Self::ModuleNotFoundError),
            _ => false,
        }
    }

    /// Builds a raised exception of this type carrying a single message argument.
    #[must_use]
    pub(crate) fn msg(self, message: impl Into<String>) -> RunError {
        RunError::Exc(Value::Exception(Rc::new(Exception::new(
            self,
            vec![Value::from(message.into())],
        ))))
    }

    /// Builds a raised exception of this type with no arguments.
    #[must_use]
    pub(crate) fn bare(self) -> RunError {
        RunError::Exc(Value::Exception(Rc::new(Exception::new(self, Vec::new()))))
    }

    /// Creates an AttributeError for when an attribute is not found.
    ///
    /// Matches CPython's format: `'ClassName' object has no attribute 'attr_name'`
    #[must_use]
    pub(crate) fn attribute_error(type_name: &str, attr: &str) -> RunError {
        Self::AttributeError.msg(format!("'{type_name}' object has no attribute '{attr}'"))
    }

    /// Creates an AttributeError for a missing module attribute.
    #[must_use]
    pub(crate) fn attribute_error_module(module_name: &str, attr: &str) -> RunError {
        Self::AttributeError.msg(format!("module '{module_name}' has no attribute '{attr}'"))
    }

    #[must_use]
    pub(crate) fn name_error(name: &str) -> RunError {
        Self::NameError.msg(format!("name '{name}' is not defined"))
    }

    #[must_use]
    pub(crate) fn unbound_local(name: &str) -> RunError {
        Self::UnboundLocalError.msg(format!("local variable '{name}' referenced before assignment"))
    }

    #[must_use]
    pub(crate) fn free_var_error(name: &str) -> RunError {
        Self::NameError.msg(format!(
            "free variable '{name}' referenced before assignment in enclosing scope"
        ))
    }

    #[must_use]
    pub(crate) fn type_error_not_callable(type_name: &str) -> RunError {
        Self::TypeError.msg(format!("'{type_name}' object is not callable"))
    }

    #[must_use]
    pub(crate) fn type_error_not_sub(type_name: &str) -> RunError {
        Self::TypeError.msg(format!("'{type_name}' object is not subscriptable"))
    }

    /// Matches CPython's format: `TypeError: '{type}' object does not support item assignment`
    #[must_use]
    pub(crate) fn type_error_not_sub_assignment(type_name: &str) -> RunError {
        Self::TypeError.msg(format!("'{type_name}' object does not support item assignment"))
    }

    #[must_use]
    pub(crate) fn type_error_not_iterable(type_name: &str) -> RunError {
        Self::TypeError.msg(format!("'{type_name}' object is not iterable"))
    }

    /// This matches CPython's message: `TypeError: unhashable type: 'list'`
    #[must_use]
    pub(crate) fn type_error_unhashable(type_name: &str) -> RunError {
        Self::TypeError.msg(format!("unhashable type: '{type_name}'"))
    }

    #[must_use]
    pub(crate) fn type_error_unsupported_operand(op: &str, left: &str, right: &str) -> RunError {
        Self::TypeError.msg(format!(
            "unsupported operand type(s) for {op}: '{left}' and '{right}'"
        ))
    }

    #[must_use]
    pub(crate) fn type_error_not_supported_between(op: &str, left: &str, right: &str) -> RunError {
        Self::TypeError.msg(format!(
            "'{op}' not supported between instances of '{left}' and '{right}'"
        ))
    }

    /// Creates a TypeError for when a function receives the wrong number of arguments.
    ///
    /// - For 1 expected arg: `{name}() takes exactly one argument ({actual} given)`
    /// - For N expected args: `{name} expected {expected} arguments, got {actual}`
    #[must_use]
    pub(crate) fn type_error_arg_count(name: &str, expected: usize, actual: usize) -> RunError {
        if expected == 1 {
            Self::TypeError.msg(format!("{name}() takes exactly one argument ({actual} given)"))
        } else {
            Self::TypeError.msg(format!("{name} expected {expected} arguments, got {actual}"))
        }
    }

    /// `{name}() takes no arguments ({actual} given)`
    #[must_use]
    pub(crate) fn type_error_no_args(name: &str, actual: usize) -> RunError {
        Self::TypeError.msg(format!("{name}() takes no arguments ({actual} given)"))
    }

    /// `{name} expected at least {min} argument, got {actual}`
    #[must_use]
    pub(crate) fn type_error_at_least(name: &str, min: usize, actual: usize) -> RunError {
        Self::TypeError.msg(format!("{name} expected at least {min} argument, got {actual}"))
    }

    /// `{name} expected at most {max} arguments, got {actual}`
    #[must_use]
    pub(crate) fn type_error_at_most(name: &str, max: usize, actual: usize) -> RunError {
        Self::TypeError.msg(format!("{name} expected at most {max} arguments, got {actual}"))
    }

    #[must_use]
    pub(crate) fn type_error_no_kwargs(name: &str) -> RunError {
        Self::TypeError.msg(format!("{name}() takes no keyword arguments"))
    }

    /// `{name}() missing {count} required positional argument(s): 'a' and 'b'`
    #[must_use]
    pub(crate) fn type_error_missing_positional(name: &str, missing: &[&str]) -> RunError {
        let names = format_param_names(missing);
        if missing.len() == 1 {
            Self::TypeError.msg(format!("{name}() missing 1 required positional argument: {names}"))
        } else {
            Self::TypeError.msg(format!(
                "{name}() missing {} required positional arguments: {names}",
                missing.len()
            ))
        }
    }

    #[must_use]
    pub(crate) fn type_error_missing_kwonly(name: &str, missing: &[&str]) -> RunError {
        let names = format_param_names(missing);
        if missing.len() == 1 {
            Self::TypeError.msg(format!("{name}() missing 1 required keyword-only argument: {names}"))
        } else {
            Self::TypeError.msg(format!(
                "{name}() missing {} required keyword-only arguments: {names}",
                missing.len()
            ))
        }
    }

    /// `{name}() takes {max} positional argument(s) but {actual} were given`
    #[must_use]
    pub(crate) fn type_error_too_many_positional(name: &str, max: usize, actual: usize) -> RunError {
        let takes_word = if max == 1 { "argument" } else { "arguments" };
        let were = if actual == 1 { "was" } else { "were" };
        Self::TypeError.msg(format!(
            "{name}() takes {max} positional {takes_word} but {actual} {were} given"
        ))
    }

    #[must_use]
    pub(crate) fn type_error_unexpected_keyword(name: &str, key: &str) -> RunError {
        Self::TypeError.msg(format!("{name}() got an unexpected keyword argument '{key}'"))
    }

    #[must_use]
    pub(crate) fn type_error_multiple_values(name: &str, key: &str) -> RunError {
        Self::TypeError.msg(format!("{name}() got multiple values for argument '{key}'"))
    }

    /// `KeyError` carrying the missing key itself; its message renders as the key's repr.
    #[must_use]
    pub(crate) fn key_error(key: Value) -> RunError {
        RunError::Exc(Value::Exception(Rc::new(Exception::new(Self::KeyError, vec![key]))))
    }

    #[must_use]
    pub(crate) fn index_error(type_name: &str) -> RunError {
        Self::IndexError.msg(format!("{type_name} index out of range"))
    }

    #[must_use]
    pub(crate) fn zero_division(message: &str) -> RunError {
        Self::ZeroDivisionError.msg(message)
    }

    #[must_use]
    pub(crate) fn overflow() -> RunError {
        Self::OverflowError.msg("integer overflow")
    }

    #[must_use]
    pub(crate) fn module_not_found(name: &str) -> RunError {
        Self::ModuleNotFoundError.msg(format!("No module named '{name}'"))
    }

    #[must_use]
    pub(crate) fn cannot_import_name(name: &str, module: &str) -> RunError {
        Self::ImportError.msg(format!("cannot import name '{name}' from '{module}'"))
    }
}

/// Formats a list of parameter names for error messages.
///
/// Examples:
/// - `["a"]` -> `'a'`
/// - `["a", "b"]` -> `'a' and 'b'`
/// - `["a", "b", "c"]` -> `'a', 'b', and 'c'`
fn format_param_names(names: &[&str]) -> String {
    match names {
        [] => String::new(),
        [one] => format!("'{one}'"),
        [a, b] => format!("'{a}' and '{b}'"),
        [rest @ .., last] => {
            let head: Vec<String> = rest.iter().map(|n| format!("'{n}'")).collect();
            format!("{}, and '{last}'", head.join(", "))
        }
    }
}

/// An instance of a builtin exception type.
///
/// Instances of user classes deriving from an exception type are `SourceInstance`s instead;
/// their constructor arguments live under `args` in the instance values.
#[derive(Debug, Clone)]
pub struct Exception {
    exc_type: ExcType,
    args: Vec<Value>,
}

impl Exception {
    #[must_use]
    pub fn new(exc_type: ExcType, args: Vec<Value>) -> Self {
        Self { exc_type, args }
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Exit code carried by a `SystemExit`: `None` and no argument mean 0, ints are used as-is,
    /// anything else exits with 1 like CPython.
    #[must_use]
    pub(crate) fn exit_code(&self) -> i64 {
        match self.args.first() {
            None | Some(Value::None) => 0,
            Some(Value::Int(code)) => *code,
            Some(Value::Bool(flag)) => i64::from(*flag),
            Some(_) => 1,
        }
    }
}

/// Control signal raised by instruction implementations.
///
/// `Exc` carries a script-visible exception value and is subject to try/except matching.
/// `Fatal` is an engine-fatal configuration violation that no handler may catch.
/// `Internal` is an engine invariant failure that terminates only the affected sandbox.
#[derive(Debug, Clone)]
pub enum RunError {
    Exc(Value),
    Fatal(String),
    Internal(String),
}

impl RunError {
    #[must_use]
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    #[must_use]
    pub(crate) fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exc(value) => f.write_str(&value.py_repr()),
            Self::Fatal(message) => write!(f, "fatal: {message}"),
            Self::Internal(message) => write!(f, "SystemError: {message}"),
        }
    }
}

/// An exception currently travelling up (or being handled on) a sandbox's call stack.
#[derive(Debug, Clone)]
pub(crate) struct Raised {
    pub value: Value,
    pub traceback: Rc<[TraceEntry]>,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn hierarchy_matches_python() {
        assert!(ExcType::IndexError.is_subclass_of(ExcType::LookupError));
        assert!(ExcType::ZeroDivisionError.is_subclass_of(ExcType::Exception));
        assert!(!ExcType::SystemExit.is_subclass_of(ExcType::Exception));
        assert!(ExcType::SystemExit.is_subclass_of(ExcType::BaseException));
        assert!(!ExcType::IndexError.is_subclass_of(ExcType::ZeroDivisionError));
    }

    #[test]
    fn io_error_is_an_alias() {
        assert_eq!(ExcType::from_str("IOError"), Ok(ExcType::OSError));
        assert_eq!(ExcType::OSError.to_string(), "OSError");
    }

    #[test]
    fn param_names_read_naturally() {
        assert_eq!(format_param_names(&["a", "b", "c"]), "'a', 'b', and 'c'");
        assert_eq!(format_param_names(&["a", "b"]), "'a' and 'b'");
    }
}
