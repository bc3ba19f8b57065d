use std::fmt;

use serde::Serialize;

use crate::{
    exception_private::{ExcType, Raised, RunError},
    value::Value,
};

/// One frame of a captured traceback, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    /// Dotted name of the module owning the code.
    pub module: String,
    /// Display name of the function (`<module>` for top-level code).
    pub function: String,
    /// Offset of the instruction that was executing.
    pub offset: u32,
    /// Source line, when the listing carried one.
    pub line: Option<u32>,
}

/// Host-visible description of an exception that escaped a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionRecord {
    /// Exception type name, e.g. `ValueError` or a user class name.
    pub exc_type: String,
    /// `str()` of the exception.
    pub message: String,
    pub traceback: Vec<TraceEntry>,
}

impl ExceptionRecord {
    pub(crate) fn from_raised(raised: &Raised) -> Self {
        Self {
            exc_type: raised.value.type_name().into_owned(),
            message: exception_message(&raised.value),
            traceback: raised.traceback.to_vec(),
        }
    }

    /// Engine invariant failures are reported as `SystemError`s without a traceback.
    pub(crate) fn from_internal(error: &RunError) -> Self {
        let message = match error {
            RunError::Internal(message) | RunError::Fatal(message) => message.clone(),
            RunError::Exc(value) => exception_message(value),
        };
        Self {
            exc_type: "SystemError".to_owned(),
            message,
            traceback: Vec::new(),
        }
    }
}

/// `str(exc)`: empty for no args, the single arg's `str` for one, the args tuple otherwise.
pub(crate) fn exception_message(value: &Value) -> String {
    let args = value.exception_args();
    match args.as_slice() {
        [] => String::new(),
        [key] if matches!(value, Value::Exception(exc) if exc.exc_type() == ExcType::KeyError) => key.py_repr(),
        [one] => one.py_str(),
        _ => Value::tuple(args).py_repr(),
    }
}

impl fmt::Display for ExceptionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Traceback (most recent call last):")?;
        for entry in &self.traceback {
            match entry.line {
                Some(line) => writeln!(
                    f,
                    "  Module \"{}\", line {line}, in {}",
                    entry.module, entry.function
                )?,
                None => writeln!(
                    f,
                    "  Module \"{}\", offset {}, in {}",
                    entry.module, entry.offset, entry.function
                )?,
            }
        }
        if self.message.is_empty() {
            write!(f, "{}", self.exc_type)
        } else {
            write!(f, "{}: {}", self.exc_type, self.message)
        }
    }
}
