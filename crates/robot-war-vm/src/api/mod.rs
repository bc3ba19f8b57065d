//! Capability surface exposed to scripts: host-implemented classes, objects and functions.
//!
//! Scripts reach capabilities only through the curated modules registered here
//! (`robot_war`, `robot_war.model0`, `time` and `thread`); nothing else of the host is visible.

mod robot;
mod thread;
mod time;

use std::{any::Any, fmt, rc::Rc, task::Poll, time::Duration};

use ahash::AHashMap;

pub use robot::{Robot, RobotClass, RobotCommand};
pub use thread::{Thread, ThreadClass};
pub use time::Sleep;

use crate::{
    args::ArgValues,
    clock::Clock,
    exception_private::{ExcType, RunError, RunResult},
    io::PrintWriter,
    module::Module,
    playground::{Env, SandboxId},
    value::Value,
};

/// A host class scripts can instantiate or derive from.
pub trait ApiClass: fmt::Debug {
    fn name(&self) -> &str;

    /// Agent classes must be subclassed, and at most one agent exists per playground.
    fn is_agent(&self) -> bool {
        false
    }

    /// Creates a fresh backing object.
    fn instantiate(&self, cx: &mut NativeCx<'_>) -> RunResult<Rc<dyn ApiObject>>;
}

/// A host object living in script space.
pub trait ApiObject: fmt::Debug {
    fn type_name(&self) -> &str;

    /// Attribute read; methods are returned as bound [`NativeFunction`]s.
    fn get_attr(self: Rc<Self>, name: &str) -> Option<Value>;

    fn set_attr(&self, name: &str, _value: Value) -> RunResult<()> {
        Err(ExcType::AttributeError.msg(format!(
            "'{}' object attribute '{name}' is read-only",
            self.type_name()
        )))
    }

    /// Lets hosts downcast to the concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// A host callable.
///
/// Invocations first run without the calling sandbox; a function that needs it returns
/// [`NativeError::SandboxRequired`] and is invoked again with the sandbox supplied.
pub trait NativeFunction: fmt::Debug {
    fn name(&self) -> &str;

    fn call(&self, cx: &mut NativeCx<'_>, args: ArgValues) -> Result<NativeReturn, NativeError>;
}

/// Result of a native call.
#[derive(Debug)]
pub enum NativeReturn {
    Value(Value),
    /// Move the calling sandbox to the worker queue until the resumable completes.
    Block(Box<dyn Resumable>),
    /// Park the calling sandbox until something wakes it with a value.
    Park,
}

impl From<Value> for NativeReturn {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

#[derive(Debug)]
pub enum NativeError {
    SandboxRequired,
    Raise(RunError),
}

impl From<RunError> for NativeError {
    fn from(error: RunError) -> Self {
        Self::Raise(error)
    }
}

/// Pollable continuation of a blocked sandbox; the ready value becomes the call's result.
pub trait Resumable: fmt::Debug {
    fn resume(&mut self) -> Poll<Value>;
}

/// What a native function may touch while it runs.
pub struct NativeCx<'a> {
    env: &'a mut Env,
    sandbox: Option<SandboxId>,
}

impl<'a> NativeCx<'a> {
    pub(crate) fn new(env: &'a mut Env, sandbox: Option<SandboxId>) -> Self {
        Self { env, sandbox }
    }

    /// The calling sandbox, or the request to be invoked again with it.
    pub fn sandbox(&self) -> Result<SandboxId, NativeError> {
        self.sandbox.ok_or(NativeError::SandboxRequired)
    }

    /// Starts `callable(*args)` in a new sandbox that joins the ready queue after this step.
    pub fn spawn(&mut self, callable: Value, args: Vec<Value>) -> SandboxId {
        self.env.spawn(callable, args)
    }

    /// Resumes a parked sandbox, handing it `value` as the result of its blocking call.
    pub fn wake(&mut self, sandbox: SandboxId, value: Value) {
        self.env.wake(sandbox, value);
    }

    pub fn writer(&mut self) -> &mut dyn PrintWriter {
        self.env.writer.as_mut()
    }

    #[must_use]
    pub fn now(&self) -> Duration {
        self.env.clock.now()
    }

    #[must_use]
    pub fn clock(&self) -> Rc<dyn Clock> {
        self.env.clock.clone()
    }

    pub(crate) fn env(&mut self) -> &mut Env {
        self.env
    }
}

type NativeFnPtr = fn(&mut NativeCx<'_>, ArgValues) -> Result<NativeReturn, NativeError>;

/// A free native function.
#[derive(Clone, Copy)]
pub struct NativeFn {
    name: &'static str,
    func: NativeFnPtr,
}

impl NativeFn {
    #[must_use]
    pub fn new(name: &'static str, func: NativeFnPtr) -> Self {
        Self { name, func }
    }

    #[must_use]
    pub fn value(name: &'static str, func: NativeFnPtr) -> Value {
        Value::Native(Rc::new(Self::new(name, func)))
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<built-in function {}>", self.name)
    }
}

impl NativeFunction for NativeFn {
    fn name(&self) -> &str {
        self.name
    }

    fn call(&self, cx: &mut NativeCx<'_>, args: ArgValues) -> Result<NativeReturn, NativeError> {
        (self.func)(cx, args)
    }
}

type NativeMethodPtr<T> = fn(&Rc<T>, &mut NativeCx<'_>, ArgValues) -> Result<NativeReturn, NativeError>;

/// A native method bound to its receiver.
pub struct NativeMethod<T> {
    name: &'static str,
    receiver: Rc<T>,
    func: NativeMethodPtr<T>,
}

impl<T: 'static> NativeMethod<T> {
    #[must_use]
    pub fn value(name: &'static str, receiver: Rc<T>, func: NativeMethodPtr<T>) -> Value {
        Value::Native(Rc::new(Self { name, receiver, func }))
    }
}

impl<T> fmt::Debug for NativeMethod<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<built-in method {}>", self.name)
    }
}

impl<T> NativeFunction for NativeMethod<T> {
    fn name(&self) -> &str {
        self.name
    }

    fn call(&self, cx: &mut NativeCx<'_>, args: ArgValues) -> Result<NativeReturn, NativeError> {
        (self.func)(&self.receiver, cx, args)
    }
}

/// Builds the capability modules, keyed by dotted name.
///
/// `namespace` is the top-level name agent models are published under.
pub(crate) fn api_modules(namespace: &str) -> AHashMap<String, Rc<Module>> {
    let robot_class: Rc<dyn ApiClass> = Rc::new(RobotClass);
    let thread_class: Rc<dyn ApiClass> = Rc::new(ThreadClass);

    let model0_name = format!("{namespace}.model0");
    let model0 = Module::with_entries(&model0_name, [("Robot", Value::ApiClass(robot_class))]);
    let root = Module::with_entries(namespace, [("model0", Value::Module(model0.clone()))]);
    let time = Module::with_entries(
        "time",
        [
            ("monotonic", NativeFn::value("monotonic", time::monotonic)),
            ("sleep", NativeFn::value("sleep", time::sleep)),
        ],
    );
    let thread = Module::with_entries("thread", [("Thread", Value::ApiClass(thread_class))]);

    let mut modules = AHashMap::new();
    modules.insert(namespace.to_owned(), root);
    modules.insert(model0_name, model0);
    modules.insert("time".to_owned(), time);
    modules.insert("thread".to_owned(), thread);
    modules
}
