//! Raising, matching and unwinding.
//!
//! Handler blocks use the six-slot layout of CPython 3.9: entering a handler truncates the
//! data stack to the depth recorded by `SETUP_FINALLY`/`SETUP_WITH` and pushes three
//! placeholders followed by traceback, value and type. `POP_EXCEPT` drops the handler and the
//! three exception slots, leaving the placeholders for the compiler's own `POP_TOP`s.

use std::rc::Rc;

use super::{ExecResult, HandlerEntry, SandBox, Signal, StepOutcome};
use crate::{
    args::ArgValues,
    builtins::{type_of, Builtins},
    bytecode::{builder::CodeBuilder, Opcode},
    class::SourceInstance,
    exception_private::{ExcType, Exception, Raised, RunError, RunResult},
    exception_public::{ExceptionRecord, TraceEntry},
    function::Function,
    playground::{Env, SandboxOutcome},
    value::Value,
};

impl SandBox {
    /// Routes an error raised by an instruction.
    pub(super) fn handle_error(&mut self, env: &Env, error: RunError) -> StepOutcome {
        match error {
            RunError::Exc(value) => {
                let traceback = self.capture_traceback(env);
                tracing::debug!(sandbox = %self.id, exception = %value.py_repr(), "raised");
                self.unwind(Raised { value, traceback })
            }
            RunError::Fatal(message) => {
                tracing::error!(sandbox = %self.id, %message, "fatal engine error");
                self.frames.clear();
                StepOutcome::Finished(SandboxOutcome::Fatal(message))
            }
            error @ RunError::Internal(_) => self.fail(error),
        }
    }

    /// Stack of the sandbox at the point of the raise, outermost first.
    ///
    /// Engine-synthesized frames (launchers, wrappers) are left out.
    fn capture_traceback(&self, env: &Env) -> Rc<[TraceEntry]> {
        self.frames
            .iter()
            .filter(|frame| !Rc::ptr_eq(&frame.globals, &env.engine_module))
            .map(|frame| TraceEntry {
                module: frame.globals.name().to_owned(),
                function: frame.code.name().to_owned(),
                offset: frame.offset,
                line: frame.code.line_at(frame.offset),
            })
            .collect()
    }

    /// Transfers control to the innermost live handler, popping frames without one.
    pub(super) fn unwind(&mut self, raised: Raised) -> StepOutcome {
        while let Some(frame) = self.frames.last_mut() {
            while let Some(entry) = frame.handlers.pop() {
                if entry.engaged.is_some() {
                    continue;
                }
                frame.stack.truncate(entry.stack_depth);
                let exc_type = type_of(&raised.value).unwrap_or(Value::None);
                frame.stack.extend([
                    Value::None,
                    Value::None,
                    Value::None,
                    Value::Traceback(raised.traceback.clone()),
                    raised.value.clone(),
                    exc_type,
                ]);
                frame.pc = entry.handler;
                frame.handlers.push(HandlerEntry {
                    engaged: Some(raised),
                    ..entry
                });
                return StepOutcome::Running;
            }
            self.frames.pop();
        }
        self.unhandled(raised)
    }

    /// An exception escaped the outermost frame: `SystemExit` ends normally, anything else
    /// fails the sandbox.
    fn unhandled(&mut self, raised: Raised) -> StepOutcome {
        let exit_code = match &raised.value {
            Value::Exception(exc) if exc.exc_type() == ExcType::SystemExit => Some(exc.exit_code()),
            Value::Instance(instance) if instance.class().exception_base() == Some(ExcType::SystemExit) => {
                Some(Exception::new(ExcType::SystemExit, raised.value.exception_args()).exit_code())
            }
            _ => None,
        };
        if let Some(code) = exit_code {
            tracing::debug!(sandbox = %self.id, code, "exited");
            return StepOutcome::Finished(SandboxOutcome::Exited(code));
        }
        let record = ExceptionRecord::from_raised(&raised);
        tracing::warn!(
            sandbox = %self.id,
            exc_type = %record.exc_type,
            message = %record.message,
            "unhandled exception"
        );
        StepOutcome::Finished(SandboxOutcome::Failed(record))
    }

    /// The exception being handled by the innermost engaged handler of any frame.
    fn current_exception(&self) -> Option<Raised> {
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.handlers.iter().rev())
            .find_map(|entry| entry.engaged.clone())
    }

    /// Bare `raise` / `RERAISE`.
    pub(super) fn reraise(&self) -> Signal {
        match self.current_exception() {
            Some(raised) => Signal::Reraise(raised),
            None => Signal::Raise(ExcType::RuntimeError.msg("No active exception to reraise")),
        }
    }

    /// `raise value`, where `value` may be an exception or an exception class.
    pub(super) fn raise_value(&mut self, env: &mut Env, value: Value) -> ExecResult {
        match &value {
            Value::Exception(_) => Err(RunError::Exc(value).into()),
            Value::Instance(instance) if instance.class().exception_base().is_some() => {
                Err(RunError::Exc(value).into())
            }
            Value::Builtin(Builtins::ExcType(exc_type)) => Err(exc_type.bare().into()),
            Value::Class(class) if class.exception_base().is_some() => {
                if class.find("__init__", None).is_none() && class.api_classes().is_empty() {
                    let instance = SourceInstance::new(class.clone(), Vec::new());
                    instance.set_value("args", Value::tuple(Vec::new()));
                    return Err(RunError::Exc(Value::Instance(Rc::new(instance))).into());
                }
                // _cls() runs __init__ in its own frame, then the result is raised
                let mut builder = CodeBuilder::new("<raise>");
                builder
                    .load_fast("_cls")
                    .emit(Opcode::CallFunction, 0)
                    .emit(Opcode::RaiseVarargs, 1);
                let wrapper = Function::synthetic(builder.build(&env.engine_module));
                self.call_value(env, Value::Function(Rc::new(wrapper)), ArgValues::positional(vec![value]))
            }
            _ => Err(ExcType::TypeError
                .msg("exceptions must derive from BaseException")
                .into()),
        }
    }
}

/// `except pattern:` test; `exception` may be an exception value or an exception type.
pub(super) fn exception_matches(exception: &Value, pattern: &Value) -> RunResult<bool> {
    match pattern {
        Value::Tuple(patterns) => {
            for pattern in patterns.iter() {
                if exception_matches(exception, pattern)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Builtin(Builtins::ExcType(handler)) => Ok(match exception {
            Value::Exception(exc) => exc.exc_type().is_subclass_of(*handler),
            Value::Builtin(Builtins::ExcType(exc_type)) => exc_type.is_subclass_of(*handler),
            Value::Instance(instance) => instance
                .class()
                .exception_base()
                .is_some_and(|base| base.is_subclass_of(*handler)),
            Value::Class(class) => class.exception_base().is_some_and(|base| base.is_subclass_of(*handler)),
            _ => false,
        }),
        Value::Class(handler) if handler.exception_base().is_some() => Ok(match exception {
            Value::Instance(instance) => instance.class().is_subclass_of(handler),
            Value::Class(class) => class.is_subclass_of(handler),
            _ => false,
        }),
        _ => Err(ExcType::TypeError.msg("catching classes that do not inherit from BaseException is not allowed")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        class::{ClassParent, SourceClass},
        module::Module,
    };

    fn exc_type(exc_type: ExcType) -> Value {
        Value::Builtin(Builtins::ExcType(exc_type))
    }

    #[test]
    fn builtin_hierarchy_matches() {
        let error = Value::Exception(Rc::new(Exception::new(ExcType::KeyError, vec![])));
        assert!(exception_matches(&error, &exc_type(ExcType::LookupError)).unwrap());
        assert!(!exception_matches(&error, &exc_type(ExcType::ValueError)).unwrap());
        let either = Value::tuple(vec![exc_type(ExcType::ValueError), exc_type(ExcType::KeyError)]);
        assert!(exception_matches(&exc_type(ExcType::KeyError), &either).unwrap());
    }

    #[test]
    fn source_classes_match_by_ancestry() {
        let module = Module::new("m", None, false);
        let base = Rc::new(SourceClass::new("Base", vec![ClassParent::Exception(ExcType::ValueError)], &module));
        let derived = Rc::new(SourceClass::new("Derived", vec![ClassParent::Source(base.clone())], &module));
        let instance = Value::Instance(Rc::new(SourceInstance::new(derived.clone(), Vec::new())));
        assert!(exception_matches(&instance, &Value::Class(base.clone())).unwrap());
        assert!(exception_matches(&instance, &exc_type(ExcType::Exception)).unwrap());
        assert!(!exception_matches(&Value::Class(base), &Value::Class(derived)).unwrap());
    }

    #[test]
    fn non_exception_patterns_are_rejected() {
        let error = Value::Exception(Rc::new(Exception::new(ExcType::KeyError, vec![])));
        let err = exception_matches(&error, &Value::Int(3)).unwrap_err();
        assert!(err.to_string().contains("do not inherit from BaseException"), "{err}");
    }
}
