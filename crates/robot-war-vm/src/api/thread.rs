use std::{any::Any, cell::Cell, rc::Rc};

use super::{ApiClass, ApiObject, NativeCx, NativeError, NativeMethod, NativeReturn};
use crate::{
    args::ArgValues,
    bytecode::{builder::CodeBuilder, Opcode},
    exception_private::{ExcType, RunResult},
    function::Function,
    playground::SandboxId,
    value::Value,
    waiter::Waiter,
};

/// `thread.Thread`: runs a callable in its own sandbox; `join()` parks until it returns.
#[derive(Debug, Default)]
pub struct ThreadClass;

impl ApiClass for ThreadClass {
    fn name(&self) -> &str {
        "Thread"
    }

    fn instantiate(&self, _cx: &mut NativeCx<'_>) -> RunResult<Rc<dyn ApiObject>> {
        Ok(Rc::new(Thread::default()))
    }
}

#[derive(Debug, Default)]
pub struct Thread {
    waiter: Waiter,
    running: Cell<bool>,
    sandbox: Cell<Option<SandboxId>>,
}

impl Thread {
    /// The sandbox running the thread body, once started.
    #[must_use]
    pub fn sandbox(&self) -> Option<SandboxId> {
        self.sandbox.get()
    }

    fn start(this: &Rc<Self>, cx: &mut NativeCx<'_>, args: ArgValues) -> Result<NativeReturn, NativeError> {
        if this.running.get() {
            return Err(ExcType::RuntimeError.msg("threads can only be started once").into());
        }
        let (positional, kwargs) = args.into_parts();
        let mut positional = positional.into_iter();
        let Some(function) = positional.next() else {
            return Err(ExcType::type_error_at_least("start", 1, 0).into());
        };
        let rest: Vec<Value> = positional.collect();

        // wrapper(_set_value, _func, _arg0.., kw..) = _set_value(_func(_arg0.., kw=kw..))
        let mut builder = CodeBuilder::new("<thread>");
        builder.load_fast("_set_value").load_fast("_func");
        let mut call_args = vec![
            NativeMethod::value("_set_value", this.clone(), Self::set_value),
            function,
        ];
        for (index, value) in rest.iter().enumerate() {
            builder.load_fast(&format!("_arg{index}"));
            call_args.push(value.clone());
        }
        let mut names = Vec::with_capacity(kwargs.len());
        for (name, value) in kwargs {
            builder.load_fast(&format!("_kw_{name}"));
            call_args.push(value);
            names.push(Value::Str(name));
        }
        let count = u32::try_from(rest.len() + names.len()).unwrap_or(u32::MAX);
        if names.is_empty() {
            builder.emit(Opcode::CallFunction, count);
        } else {
            builder.load_const(Value::tuple(names));
            builder.emit(Opcode::CallFunctionKw, count);
        }
        builder.emit(Opcode::CallFunction, 1).emit(Opcode::ReturnValue, 0);
        let engine = cx.env().engine_module.clone();
        let wrapper = Value::Function(Rc::new(Function::synthetic(builder.build(&engine))));

        this.running.set(true);
        let sandbox = cx.spawn(wrapper, call_args);
        this.sandbox.set(Some(sandbox));
        tracing::debug!(%sandbox, "thread started");
        Ok(Value::ApiObject(this.clone()).into())
    }

    fn set_value(this: &Rc<Self>, cx: &mut NativeCx<'_>, args: ArgValues) -> Result<NativeReturn, NativeError> {
        let value = args.get_one_arg("_set_value")?;
        this.running.set(false);
        this.waiter.set_value(cx, value);
        Ok(Value::None.into())
    }

    fn join(this: &Rc<Self>, cx: &mut NativeCx<'_>, args: ArgValues) -> Result<NativeReturn, NativeError> {
        args.check_zero_args("join")?;
        this.waiter.get_value(cx)
    }
}

impl ApiObject for Thread {
    fn type_name(&self) -> &str {
        "Thread"
    }

    fn get_attr(self: Rc<Self>, name: &str) -> Option<Value> {
        Some(match name {
            "start" => NativeMethod::value("start", self, Self::start),
            "join" => NativeMethod::value("join", self, Self::join),
            "running" => Value::Bool(self.running.get()),
            _ => return None,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
