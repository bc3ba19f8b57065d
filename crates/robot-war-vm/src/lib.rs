#![doc = include_str!("../../../README.md")]
mod api;
mod args;
mod builtins;
mod bytecode;
mod class;
mod clock;
mod config;
mod error;
mod exception_private;
mod exception_public;
mod function;
mod io;
mod module;
mod namespace;
mod playground;
mod resource;
mod types;
mod value;
mod waiter;

pub use crate::{
    api::{
        ApiClass, ApiObject, NativeCx, NativeError, NativeFn, NativeFunction, NativeMethod, NativeReturn, Resumable,
        Robot, RobotClass, RobotCommand, Sleep, Thread, ThreadClass,
    },
    args::ArgValues,
    bytecode::{
        parse_listing, BinaryOperator, CodeListing, CompareOperator, CompiledModule, Instruction, JsonCompiler,
        ListingCompiler, ModuleCompiler, Opcode, CODE_STEP, MODULE_LABEL,
    },
    clock::{Clock, FixedStepClock, SystemClock},
    config::PlaygroundConfig,
    error::{CompileError, EngineError},
    exception_private::ExcType,
    exception_public::{ExceptionRecord, TraceEntry},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    module::Module,
    playground::{Playground, SandboxId, SandboxOutcome},
    resource::{ResourceLimits, DEFAULT_MAX_DATA_STACK, DEFAULT_MAX_RECURSION_DEPTH},
    value::Value,
    waiter::Waiter,
};
