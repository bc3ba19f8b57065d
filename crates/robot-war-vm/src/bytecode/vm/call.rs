//! Calling values: functions, classes, builtins and capability objects.
//!
//! Script callables push a frame and return immediately; the frame's `RETURN_VALUE` delivers
//! the result. Host callables run to completion here, or suspend the sandbox.

use std::rc::Rc;

use super::{bound, ExecResult, Frame, SandBox, Signal};
use crate::{
    api::{ApiClass, NativeCx, NativeError, NativeFunction, NativeReturn},
    args::ArgValues,
    builtins::{BuiltinOutput, Builtins},
    bytecode::{builder::CodeBuilder, Opcode},
    class::{ClassParent, SourceClass, SourceInstance},
    exception_private::{ExcType, RunError},
    function::{Constructor, Function},
    playground::Env,
    types::Type,
    value::Value,
};

impl SandBox {
    /// `callee(*args)`: pushes the result, or a frame that will produce it.
    pub(super) fn call_value(&mut self, env: &mut Env, callee: Value, args: ArgValues) -> ExecResult {
        match callee {
            Value::Function(function) => {
                let frame = Frame::for_function(&function, args)?;
                self.push_frame(env, frame)?;
            }
            Value::Constructor(constructor) => {
                let mut frame = Frame::for_function(&constructor.function, args)?;
                frame.class = Some(constructor.class.clone());
                self.push_frame(env, frame)?;
            }
            Value::BoundMethod(method) => {
                let mut args = args;
                args.prepend(method.receiver.clone());
                let frame = Frame::for_function(&method.function, args)?;
                self.push_frame(env, frame)?;
            }
            Value::Class(class) => return self.instantiate(env, class, args),
            Value::BuildClass => return self.build_class(env, args),
            Value::Builtin(builtin) => {
                let output = builtin.call(env, args)?;
                return self.finish_builtin(env, output);
            }
            Value::BuiltinMethod(method) => {
                let output = method.call(env, args)?;
                return self.finish_builtin(env, output);
            }
            Value::ApiClass(api_class) => {
                if api_class.is_agent() {
                    return Err(RunError::fatal(format!("{} must be subclassed", api_class.name())).into());
                }
                let object = api_class.instantiate(&mut NativeCx::new(env, Some(self.id)))?;
                self.push(Value::ApiObject(object));
            }
            Value::Native(native) => return self.call_native(env, native.as_ref(), args),
            Value::Instance(instance) => match instance.class_function("__call__") {
                Some(function) => {
                    let mut args = args;
                    args.prepend(Value::Instance(instance));
                    let frame = Frame::for_function(&function, args)?;
                    self.push_frame(env, frame)?;
                }
                None => return Err(ExcType::type_error_not_callable(instance.class().name()).into()),
            },
            other => return Err(ExcType::type_error_not_callable(&other.type_name()).into()),
        }
        Ok(())
    }

    fn finish_builtin(&mut self, env: &mut Env, output: BuiltinOutput) -> ExecResult {
        match output {
            BuiltinOutput::Value(value) => {
                self.push(value);
                Ok(())
            }
            BuiltinOutput::Call(callee, args) => self.call_value(env, callee, args),
        }
    }

    /// Host functions first run without the sandbox; those that need it ask to be re-invoked.
    fn call_native(&mut self, env: &mut Env, native: &dyn NativeFunction, args: ArgValues) -> ExecResult {
        let result = match native.call(&mut NativeCx::new(env, None), args.clone()) {
            Err(NativeError::SandboxRequired) => native.call(&mut NativeCx::new(env, Some(self.id)), args),
            other => other,
        };
        match result {
            Ok(NativeReturn::Value(value)) => {
                self.push(value);
                Ok(())
            }
            Ok(NativeReturn::Block(resumable)) => {
                tracing::trace!(sandbox = %self.id, function = native.name(), "blocked");
                Err(Signal::Block(resumable))
            }
            Ok(NativeReturn::Park) => {
                tracing::trace!(sandbox = %self.id, function = native.name(), "parked");
                Err(Signal::Park)
            }
            Err(NativeError::Raise(error)) => Err(error.into()),
            Err(NativeError::SandboxRequired) => Err(RunError::internal(format!(
                "{} asked for the sandbox twice",
                native.name()
            ))
            .into()),
        }
    }

    /// Creates an instance of a source class and runs its `__init__`.
    fn instantiate(&mut self, env: &mut Env, class: Rc<SourceClass>, args: ArgValues) -> ExecResult {
        let mut backings = Vec::new();
        for api_class in class.api_classes() {
            let object = api_class.instantiate(&mut NativeCx::new(env, Some(self.id)))?;
            backings.push((api_class, object));
        }
        let instance = Rc::new(SourceInstance::new(class.clone(), backings));
        let is_exception = class.exception_base().is_some();
        if is_exception {
            instance.set_value("args", Value::tuple(args.clone().into_positional()));
        }

        let Some(init) = instance.class_function("__init__") else {
            if !is_exception && (args.count() > 0 || args.has_kwargs()) {
                return Err(ExcType::TypeError
                    .msg(format!("{}() takes no arguments", class.name()))
                    .into());
            }
            self.push(Value::Instance(instance));
            return Ok(());
        };

        // _init(*args, **kwargs); return _instance
        let mut builder = CodeBuilder::new("<init>");
        builder.load_fast("_init");
        builder.param("_instance");
        let value = Value::Instance(instance);
        let mut call_args = vec![bound(value.clone(), init), value];
        let (positional, kwargs) = args.into_parts();
        let count = u32::try_from(positional.len() + kwargs.len()).unwrap_or(u32::MAX);
        for (index, arg) in positional.into_iter().enumerate() {
            builder.load_fast(&format!("_a{index}"));
            call_args.push(arg);
        }
        let mut names = Vec::with_capacity(kwargs.len());
        for (name, arg) in kwargs {
            builder.load_fast(&format!("_kw_{name}"));
            call_args.push(arg);
            names.push(Value::Str(name));
        }
        if names.is_empty() {
            builder.emit(Opcode::CallFunction, count);
        } else {
            builder.load_const(Value::tuple(names)).emit(Opcode::CallFunctionKw, count);
        }
        builder
            .emit(Opcode::PopTop, 0)
            .load_fast("_instance")
            .emit(Opcode::ReturnValue, 0);
        let wrapper = Function::synthetic(builder.build(&env.engine_module));
        self.call_value(env, Value::Function(Rc::new(wrapper)), ArgValues::positional(call_args))
    }

    /// `__build_class__(body, name, *bases)`: creates the class and runs its body.
    fn build_class(&mut self, env: &mut Env, args: ArgValues) -> ExecResult {
        let mut positional = args.into_positional().into_iter();
        let Some(Value::Function(body)) = positional.next() else {
            return Err(ExcType::TypeError.msg("__build_class__: func must be a function").into());
        };
        let Some(Value::Str(name)) = positional.next() else {
            return Err(ExcType::TypeError.msg("__build_class__: name is not a string").into());
        };

        let mut parents = Vec::new();
        let mut agent_bound = false;
        for base in positional {
            match base {
                Value::Class(class) => parents.push(ClassParent::Source(class)),
                Value::ApiClass(api_class) if api_class.is_agent() => {
                    parents.push(self.bind_agent(env, &name, &api_class, agent_bound)?);
                    agent_bound = true;
                }
                Value::ApiClass(api_class) => parents.push(ClassParent::Api(api_class)),
                Value::Builtin(Builtins::ExcType(exc_type)) => parents.push(ClassParent::Exception(exc_type)),
                Value::Builtin(Builtins::Type(Type::Object)) => {}
                other => {
                    return Err(ExcType::TypeError
                        .msg(format!("cannot derive class {name} from {}", other.py_repr()))
                        .into())
                }
            }
        }

        let module = body.code().module()?;
        let class = Rc::new(SourceClass::new(&name, parents, &module));
        class.set_attr("__module__", Value::from(module.name()));
        tracing::debug!(sandbox = %self.id, class = %name, module = module.name(), "class created");

        // body() runs with the class namespace as its locals; return class
        let mut builder = CodeBuilder::new("<class>");
        builder
            .load_fast("_body")
            .emit(Opcode::CallFunction, 0)
            .emit(Opcode::PopTop, 0)
            .load_fast("_class")
            .emit(Opcode::ReturnValue, 0);
        let wrapper = Function::synthetic(builder.build(&env.engine_module));
        let constructor = Constructor {
            function: body,
            class: class.clone(),
        };
        let args = vec![Value::Constructor(Rc::new(constructor)), Value::Class(class)];
        self.call_value(env, Value::Function(Rc::new(wrapper)), ArgValues::positional(args))
    }

    /// Instantiates the playground's single agent object for a class deriving from an agent
    /// class.
    fn bind_agent(
        &mut self,
        env: &mut Env,
        class_name: &str,
        api_class: &Rc<dyn ApiClass>,
        already_bound: bool,
    ) -> Result<ClassParent, Signal> {
        if already_bound {
            return Err(RunError::fatal(format!(
                "class {class_name} derives from more than one {}",
                api_class.name()
            ))
            .into());
        }
        if env.robot.is_some() {
            return Err(RunError::fatal(format!(
                "only one class may derive from {} (again in {class_name})",
                api_class.name()
            ))
            .into());
        }
        let object = api_class.instantiate(&mut NativeCx::new(env, Some(self.id)))?;
        env.robot = Some(object.clone());
        tracing::info!(sandbox = %self.id, class = class_name, agent = api_class.name(), "agent bound");
        Ok(ClassParent::Agent(object))
    }
}
