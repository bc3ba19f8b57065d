//! The stack machine that executes one sandbox.
//!
//! A [`SandBox`] owns a stack of [`Frame`]s; every frame owns its program counter, data stack
//! and handler stack. [`SandBox::step`] executes exactly one instruction, so the scheduler can
//! interleave sandboxes at instruction granularity and suspend one at any native call.
//!
//! Whenever an operation needs script code to finish (a dunder, `__init__`, a class body, a
//! module import) it pushes a frame instead of recursing; the frame's return value lands on
//! the caller's data stack exactly where a direct result would have.

pub(crate) mod attr;
pub(crate) mod binary;
mod call;
pub(crate) mod collections;
mod exceptions;
pub(crate) mod format;
mod import;

use std::{iter, rc::Rc, str::FromStr};

use self::{
    attr::{delete_attr, load_attr, store_attr},
    binary::{binary_op_or_error, compare, contains, unary_invert, unary_negative, unary_positive},
    collections::{delete_item, get_item, length, make_slice, set_item, unpack},
    format::{format_with_spec, parse_spec},
};
use super::{
    builder::CodeBuilder,
    code::{CodeBlock, Instruction},
    op::{BinaryOperator, CompareOperator, Opcode},
};
use crate::{
    api::Resumable,
    args::ArgValues,
    builtins::Builtins,
    class::{BoundMethod, SourceClass},
    exception_private::{ExcType, Raised, RunError, RunResult},
    exception_public::ExceptionRecord,
    function::{CellRef, Function},
    module::Module,
    playground::{Env, SandboxId, SandboxOutcome},
    resource::check_sequence_len,
    types::{collect_items, Dict, Set, ValueIter},
    value::Value,
};

// ============================================================================
// Frames
// ============================================================================

/// What happens to a frame's return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReturnMode {
    /// Pushed onto the caller's data stack.
    Push,
    /// Dropped; used where the calling instruction has no result (`__setitem__`).
    Discard,
}

/// One entry of a frame's handler stack.
///
/// Pushed by `SETUP_FINALLY`/`SETUP_WITH`. Once an exception is routed to it the entry stays
/// on the stack as `engaged`, recording the exception being handled, until `POP_EXCEPT`.
#[derive(Debug, Clone)]
pub(crate) struct HandlerEntry {
    handler: u32,
    stack_depth: usize,
    engaged: Option<Raised>,
}

impl HandlerEntry {
    fn new(handler: u32, stack_depth: usize) -> Self {
        Self {
            handler,
            stack_depth,
            engaged: None,
        }
    }
}

/// Activation record of one code block.
#[derive(Debug)]
pub(crate) struct Frame {
    code: Rc<CodeBlock>,
    globals: Rc<Module>,
    /// Set for class bodies: name stores go to the class namespace.
    class: Option<Rc<SourceClass>>,
    fast: Vec<Option<Value>>,
    cells: Vec<CellRef>,
    stack: Vec<Value>,
    handlers: Vec<HandlerEntry>,
    /// Offset of the next instruction to execute.
    pc: u32,
    /// Offset of the instruction currently executing.
    offset: u32,
    return_mode: ReturnMode,
}

impl Frame {
    fn new(code: Rc<CodeBlock>, globals: Rc<Module>, fast: Vec<Option<Value>>, cells: Vec<CellRef>) -> Self {
        let pc = code.first_offset();
        Self {
            code,
            globals,
            class: None,
            fast,
            cells,
            stack: Vec::new(),
            handlers: Vec::new(),
            pc,
            offset: pc,
            return_mode: ReturnMode::Push,
        }
    }

    /// A frame running `function` with already bound arguments.
    fn for_function(function: &Function, args: ArgValues) -> RunResult<Self> {
        let fast = function.bind_args(args)?;
        let cells = function.make_cells(&fast);
        let code = function.code().clone();
        let globals = code.module()?;
        Ok(Self::new(code, globals, fast, cells))
    }
}

// ============================================================================
// Step results
// ============================================================================

/// Non-local outcome of executing one instruction.
pub(crate) enum Signal {
    Return(Value),
    Raise(RunError),
    /// Re-raise an exception that already carries its traceback.
    Reraise(Raised),
    Block(Box<dyn Resumable>),
    Park,
}

impl From<RunError> for Signal {
    fn from(error: RunError) -> Self {
        Self::Raise(error)
    }
}

/// What the scheduler should do with a sandbox after one step.
pub(crate) enum StepOutcome {
    Running,
    Blocked(Box<dyn Resumable>),
    Parked,
    Finished(SandboxOutcome),
}

type ExecResult = Result<(), Signal>;

// ============================================================================
// Sandbox
// ============================================================================

/// An independent call stack executing script code.
#[derive(Debug)]
pub(crate) struct SandBox {
    id: SandboxId,
    frames: Vec<Frame>,
}

impl SandBox {
    /// A sandbox whose first instructions call `callable(*args)` and return its result.
    pub(crate) fn spawn(id: SandboxId, env: &Env, callable: Value, args: Vec<Value>) -> Self {
        let mut builder = CodeBuilder::new("<spawn>");
        builder.load_fast("_callable");
        for index in 0..args.len() {
            builder.load_fast(&format!("_arg{index}"));
        }
        builder
            .emit(Opcode::CallFunction, u32::try_from(args.len()).unwrap_or(u32::MAX))
            .emit(Opcode::ReturnValue, 0);
        let code = builder.build(&env.engine_module);
        let fast = iter::once(callable).chain(args).map(Some).collect();
        Self {
            id,
            frames: vec![Frame::new(code, env.engine_module.clone(), fast, Vec::new())],
        }
    }

    /// The launcher of a main program: runs `path` as `__main__`, then exits with code 0.
    pub(crate) fn launch(id: SandboxId, env: &Env, path: &str) -> Self {
        let mut builder = CodeBuilder::new("<launcher>");
        builder
            .emit(Opcode::BuildList, 0)
            .load_const(Value::from("__main__"))
            .load_fast("path")
            .emit(Opcode::BuildTuple, 2)
            .emit(Opcode::LoadModule, 0)
            .emit(Opcode::PopTop, 0)
            .load_name("SystemExit")
            .load_const(Value::Int(0))
            .emit(Opcode::CallFunction, 1)
            .emit(Opcode::RaiseVarargs, 1);
        let code = builder.build(&env.engine_module);
        Self {
            id,
            frames: vec![Frame::new(code, env.engine_module.clone(), vec![Some(Value::from(path))], Vec::new())],
        }
    }

    pub(crate) fn id(&self) -> SandboxId {
        self.id
    }

    /// Delivers the result of a blocking call as the value the call returned.
    pub(crate) fn resume_with(&mut self, value: Value) {
        self.push(value);
    }

    /// Executes one instruction of the top frame.
    pub(crate) fn step(&mut self, env: &mut Env) -> StepOutcome {
        let Some(frame) = self.frames.last_mut() else {
            return self.fail(RunError::internal("sandbox has no frames left"));
        };
        let code = frame.code.clone();
        let pc = frame.pc;
        let Some(instruction) = code.instruction(pc) else {
            return self.fail(RunError::internal(format!(
                "no instruction at offset {pc} in {}",
                code.label()
            )));
        };
        frame.offset = pc;
        frame.pc = code.next_offset(pc);
        tracing::trace!(sandbox = %self.id, code = code.label(), offset = pc, opcode = %instruction.opcode, "exec");

        match self.exec(env, &code, instruction) {
            Ok(()) => self.check_data_stack(env),
            Err(signal) => self.handle_signal(env, signal),
        }
    }

    fn handle_signal(&mut self, env: &Env, signal: Signal) -> StepOutcome {
        match signal {
            Signal::Return(value) => self.return_value(value),
            Signal::Raise(error) => self.handle_error(env, error),
            Signal::Reraise(raised) => self.unwind(raised),
            Signal::Block(resumable) => StepOutcome::Blocked(resumable),
            Signal::Park => StepOutcome::Parked,
        }
    }

    fn check_data_stack(&mut self, env: &Env) -> StepOutcome {
        let limit = env.config.limits.max_data_stack;
        if self.frames.last().is_some_and(|frame| frame.stack.len() > limit) {
            let error = ExcType::MemoryError.msg(format!("data stack exceeded {limit} values"));
            return self.handle_error(env, error);
        }
        StepOutcome::Running
    }

    fn return_value(&mut self, value: Value) -> StepOutcome {
        let Some(frame) = self.frames.pop() else {
            return self.fail(RunError::internal("return without a frame"));
        };
        if !frame.stack.is_empty() {
            return self.fail(RunError::internal(format!(
                "{} returned with {} values left on its data stack",
                frame.code.label(),
                frame.stack.len()
            )));
        }
        match self.frames.last_mut() {
            None => StepOutcome::Finished(SandboxOutcome::Returned(value.py_repr())),
            Some(caller) => {
                if frame.return_mode == ReturnMode::Push {
                    caller.stack.push(value);
                }
                StepOutcome::Running
            }
        }
    }

    /// Terminates the sandbox on an engine invariant failure.
    fn fail(&mut self, error: RunError) -> StepOutcome {
        tracing::error!(sandbox = %self.id, %error, "internal engine error");
        self.frames.clear();
        StepOutcome::Finished(SandboxOutcome::Failed(ExceptionRecord::from_internal(&error)))
    }

    // ========================================================================
    // Stack Operations
    // ========================================================================

    fn top(&mut self) -> RunResult<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| RunError::internal("no active frame"))
    }

    fn push(&mut self, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.stack.push(value);
        }
    }

    fn pop(&mut self) -> RunResult<Value> {
        self.top()?
            .stack
            .pop()
            .ok_or_else(|| RunError::internal("data stack underflow"))
    }

    /// Pops `n` values, returned in push order.
    fn pop_n(&mut self, n: usize) -> RunResult<Vec<Value>> {
        let stack = &mut self.top()?.stack;
        let start = stack
            .len()
            .checked_sub(n)
            .ok_or_else(|| RunError::internal("data stack underflow"))?;
        Ok(stack.split_off(start))
    }

    /// The value `depth` slots from the top; `1` is TOS.
    fn peek(&mut self, depth: usize) -> RunResult<Value> {
        let stack = &self.top()?.stack;
        stack
            .len()
            .checked_sub(depth)
            .and_then(|index| stack.get(index))
            .cloned()
            .ok_or_else(|| RunError::internal("data stack underflow"))
    }

    fn jump(&mut self, target: u32) -> RunResult<()> {
        self.top()?.pc = target;
        Ok(())
    }

    fn push_frame(&mut self, env: &Env, frame: Frame) -> RunResult<()> {
        if self.frames.len() >= env.config.limits.max_recursion_depth {
            return Err(ExcType::RecursionError.msg("maximum recursion depth exceeded"));
        }
        self.frames.push(frame);
        Ok(())
    }

    // ========================================================================
    // Variable Operations
    // ========================================================================

    fn load_name(&mut self, name: &str) -> RunResult<Value> {
        let frame = self.top()?;
        if let Some(value) = frame.class.as_ref().and_then(|class| class.get_own(name)) {
            return Ok(value);
        }
        frame
            .globals
            .get(name)
            .or_else(|| Builtins::lookup(name))
            .ok_or_else(|| ExcType::name_error(name))
    }

    fn load_global(&mut self, name: &str) -> RunResult<Value> {
        self.top()?
            .globals
            .get(name)
            .or_else(|| Builtins::lookup(name))
            .ok_or_else(|| ExcType::name_error(name))
    }

    fn store_name(&mut self, name: &str, value: Value) -> RunResult<()> {
        let frame = self.top()?;
        match &frame.class {
            Some(class) => class.set_attr(name, value),
            None => frame.globals.set(name, value),
        }
        Ok(())
    }

    fn delete_name(&mut self, name: &str) -> RunResult<()> {
        let frame = self.top()?;
        let removed = match &frame.class {
            Some(class) => class.remove_attr(name),
            None => frame.globals.remove(name),
        };
        removed.map(drop).ok_or_else(|| ExcType::name_error(name))
    }

    fn store_fast(&mut self, index: usize, value: Option<Value>) -> RunResult<()> {
        let fast = &mut self.top()?.fast;
        if fast.len() <= index {
            fast.resize(index + 1, None);
        }
        fast[index] = value;
        Ok(())
    }

    fn cell(&mut self, index: usize) -> RunResult<CellRef> {
        self.top()?
            .cells
            .get(index)
            .cloned()
            .ok_or_else(|| RunError::internal(format!("no closure cell {index}")))
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    #[allow(clippy::too_many_lines)]
    fn exec(&mut self, env: &mut Env, code: &CodeBlock, ins: &Instruction) -> ExecResult {
        let operand = ins.operand;
        let count = operand as usize;
        match ins.opcode {
            // ================================================================
            // Stack manipulation
            // ================================================================
            Opcode::Nop | Opcode::Resume => {}
            Opcode::PopTop => {
                self.pop()?;
            }
            Opcode::RotTwo => self.rotate(2)?,
            Opcode::RotThree => self.rotate(3)?,
            Opcode::RotFour => self.rotate(4)?,
            Opcode::DupTop => {
                let value = self.peek(1)?;
                self.push(value);
            }
            Opcode::DupTopTwo => {
                let (below, top) = (self.peek(2)?, self.peek(1)?);
                self.push(below);
                self.push(top);
            }
            Opcode::Copy => {
                let value = self.peek(count)?;
                self.push(value);
            }
            Opcode::Swap => {
                let stack = &mut self.top()?.stack;
                let len = stack.len();
                if count == 0 || count > len {
                    return Err(RunError::internal("SWAP beyond the data stack").into());
                }
                stack.swap(len - 1, len - count);
            }

            // ================================================================
            // Variables
            // ================================================================
            Opcode::LoadConst => {
                let value = code.constant(ins)?;
                self.push(value);
            }
            Opcode::LoadFast => {
                let value = self.top()?.fast.get(count).cloned().flatten();
                match value {
                    Some(value) => self.push(value),
                    None => return Err(ExcType::unbound_local(ins.note.as_deref().unwrap_or("?")).into()),
                }
            }
            Opcode::StoreFast => {
                let value = self.pop()?;
                self.store_fast(count, Some(value))?;
            }
            Opcode::DeleteFast => {
                let bound = self.top()?.fast.get(count).is_some_and(Option::is_some);
                if !bound {
                    return Err(ExcType::unbound_local(ins.note.as_deref().unwrap_or("?")).into());
                }
                self.store_fast(count, None)?;
            }
            Opcode::LoadName => {
                let value = self.load_name(ins.require_note()?)?;
                self.push(value);
            }
            Opcode::StoreName => {
                let value = self.pop()?;
                self.store_name(ins.require_note()?, value)?;
            }
            Opcode::DeleteName => self.delete_name(ins.require_note()?)?,
            Opcode::LoadGlobal => {
                let value = self.load_global(ins.require_note()?)?;
                self.push(value);
            }
            Opcode::StoreGlobal => {
                let value = self.pop()?;
                self.top()?.globals.set(ins.require_note()?, value);
            }
            Opcode::DeleteGlobal => {
                let name = ins.require_note()?;
                if self.top()?.globals.remove(name).is_none() {
                    return Err(ExcType::name_error(name).into());
                }
            }
            Opcode::LoadClosure => {
                let cell = self.cell(count)?;
                self.push(Value::Cell(cell));
            }
            Opcode::LoadDeref => {
                let value = self.cell(count)?.borrow().clone();
                match value {
                    Some(value) => self.push(value),
                    None => {
                        let name = code.deref_name(count).unwrap_or("?");
                        let error = if count < code.cellvars().len() {
                            ExcType::unbound_local(name)
                        } else {
                            ExcType::free_var_error(name)
                        };
                        return Err(error.into());
                    }
                }
            }
            Opcode::StoreDeref => {
                let value = self.pop()?;
                *self.cell(count)?.borrow_mut() = Some(value);
            }

            // ================================================================
            // Attributes and subscripts
            // ================================================================
            Opcode::LoadAttr => {
                let owner = self.pop()?;
                let value = load_attr(&owner, ins.require_note()?)?;
                self.push(value);
            }
            Opcode::StoreAttr => {
                let owner = self.pop()?;
                let value = self.pop()?;
                store_attr(&owner, ins.require_note()?, value)?;
            }
            Opcode::DeleteAttr => {
                let owner = self.pop()?;
                delete_attr(&owner, ins.require_note()?)?;
            }
            Opcode::LoadMethod => self.load_method(ins.require_note()?)?,
            Opcode::BinarySubscr => {
                let key = self.pop()?;
                let container = self.pop()?;
                if let Some(function) = instance_dunder(&container, "__getitem__") {
                    return self.call_bound(env, container, function, vec![key]);
                }
                let value = get_item(&container, &key)?;
                self.push(value);
            }
            Opcode::StoreSubscr => {
                let key = self.pop()?;
                let container = self.pop()?;
                let value = self.pop()?;
                if let Some(function) = instance_dunder(&container, "__setitem__") {
                    return self.call_discarding(env, bound(container, function), vec![key, value]);
                }
                set_item(&container, key, value)?;
            }
            Opcode::DeleteSubscr => {
                let key = self.pop()?;
                let container = self.pop()?;
                if let Some(function) = instance_dunder(&container, "__delitem__") {
                    return self.call_discarding(env, bound(container, function), vec![key]);
                }
                delete_item(&container, &key)?;
            }
            Opcode::BinarySlice => {
                let stop = self.pop()?;
                let start = self.pop()?;
                let container = self.pop()?;
                let value = get_item(&container, &make_slice(start, stop, Value::None))?;
                self.push(value);
            }
            Opcode::StoreSlice => {
                let stop = self.pop()?;
                let start = self.pop()?;
                let container = self.pop()?;
                let value = self.pop()?;
                set_item(&container, make_slice(start, stop, Value::None), value)?;
            }
            Opcode::BuildSlice => {
                let step = if count == 3 { self.pop()? } else { Value::None };
                let stop = self.pop()?;
                let start = self.pop()?;
                self.push(make_slice(start, stop, step));
            }

            // ================================================================
            // Containers
            // ================================================================
            Opcode::BuildTuple => {
                let items = self.pop_n(count)?;
                self.push(Value::tuple(items));
            }
            Opcode::BuildList => {
                let items = self.pop_n(count)?;
                self.push(Value::list(items));
            }
            Opcode::BuildSet => {
                let items = self.pop_n(count)?;
                self.push(Value::set(Set::from_values(items)?));
            }
            Opcode::BuildMap => {
                let mut items = self.pop_n(count * 2)?.into_iter();
                let mut dict = Dict::new();
                while let (Some(key), Some(value)) = (items.next(), items.next()) {
                    dict.insert(key, value)?;
                }
                self.push(Value::dict(dict));
            }
            Opcode::BuildConstKeyMap => {
                let keys = self.pop()?;
                let values = self.pop_n(count)?;
                let dict = Dict::from_pairs(collect_items(&keys)?.into_iter().zip(values))?;
                self.push(Value::dict(dict));
            }
            Opcode::BuildString => {
                let parts = self.pop_n(count)?;
                let text: String = parts.iter().map(Value::py_str).collect();
                self.push(Value::from(text));
            }
            Opcode::ListAppend => {
                let value = self.pop()?;
                match self.peek(count)? {
                    Value::List(list) => list.borrow_mut().push(value),
                    other => return Err(RunError::internal(format!("LIST_APPEND target is {}", other.type_name())).into()),
                }
            }
            Opcode::SetAdd => {
                let value = self.pop()?;
                match self.peek(count)? {
                    Value::Set(set) => set.borrow_mut().add(value)?,
                    other => return Err(RunError::internal(format!("SET_ADD target is {}", other.type_name())).into()),
                }
            }
            Opcode::MapAdd => {
                let value = self.pop()?;
                let key = self.pop()?;
                match self.peek(count)? {
                    Value::Dict(dict) => dict.borrow_mut().insert(key, value)?,
                    other => return Err(RunError::internal(format!("MAP_ADD target is {}", other.type_name())).into()),
                }
            }
            Opcode::ListExtend => {
                let items = collect_items(&self.pop()?)?;
                match self.peek(count)? {
                    Value::List(list) => {
                        check_sequence_len(list.borrow().len().saturating_add(items.len()))?;
                        list.borrow_mut().extend(items);
                    }
                    other => return Err(RunError::internal(format!("LIST_EXTEND target is {}", other.type_name())).into()),
                }
            }
            Opcode::SetUpdate => {
                let items = collect_items(&self.pop()?)?;
                match self.peek(count)? {
                    Value::Set(set) => {
                        let mut set = set.borrow_mut();
                        for item in items {
                            set.add(item)?;
                        }
                    }
                    other => return Err(RunError::internal(format!("SET_UPDATE target is {}", other.type_name())).into()),
                }
            }
            Opcode::DictUpdate | Opcode::DictMerge => {
                let source = self.pop()?;
                let Value::Dict(source) = &source else {
                    return Err(ExcType::TypeError
                        .msg(format!("'{}' object is not a mapping", source.type_name()))
                        .into());
                };
                let pairs: Vec<(Value, Value)> =
                    source.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                let Value::Dict(target) = self.peek(count)? else {
                    return Err(RunError::internal("DICT_UPDATE target is not a dict").into());
                };
                let mut target = target.borrow_mut();
                for (key, value) in pairs {
                    if ins.opcode == Opcode::DictMerge && target.contains(&key)? {
                        return Err(ExcType::TypeError
                            .msg(format!("got multiple values for keyword argument {}", key.py_repr()))
                            .into());
                    }
                    target.insert(key, value)?;
                }
            }
            Opcode::ListToTuple => {
                let items = collect_items(&self.pop()?)?;
                self.push(Value::tuple(items));
            }
            Opcode::UnpackSequence => {
                let value = self.pop()?;
                for item in unpack(&value, count)?.into_iter().rev() {
                    self.push(item);
                }
            }
            Opcode::GetLen => {
                let len = length(&self.peek(1)?)?;
                self.push(Value::Int(i64::try_from(len).map_err(|_| ExcType::overflow())?));
            }
            Opcode::FormatValue => self.format_value(operand)?,

            // ================================================================
            // Operators
            // ================================================================
            Opcode::BinaryOp => {
                let op = BinaryOperator::from_binary_op_arg(operand)
                    .ok_or_else(|| RunError::internal(format!("unknown BINARY_OP operand {operand}")))?;
                return self.binary(env, op, operand >= 13);
            }
            Opcode::UnaryPositive => {
                let value = unary_positive(&self.pop()?)?;
                self.push(value);
            }
            Opcode::UnaryNegative => {
                let value = unary_negative(&self.pop()?)?;
                self.push(value);
            }
            Opcode::UnaryInvert => {
                let value = unary_invert(&self.pop()?)?;
                self.push(value);
            }
            Opcode::UnaryNot => {
                let value = self.pop()?;
                self.push(Value::Bool(!value.truthy()));
            }
            Opcode::CompareOp => {
                let op = ins
                    .note
                    .as_deref()
                    .and_then(|note| CompareOperator::from_str(note).ok())
                    .or_else(|| CompareOperator::from_arg(operand))
                    .ok_or_else(|| RunError::internal(format!("unknown COMPARE_OP operand {operand}")))?;
                return self.compare(env, op);
            }
            Opcode::IsOp => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.push(Value::Bool(lhs.is(&rhs) != (operand == 1)));
            }
            Opcode::ContainsOp => {
                let container = self.pop()?;
                let item = self.pop()?;
                self.push(Value::Bool(contains(&container, &item)? != (operand == 1)));
            }
            opcode => {
                if let Some(op) = opcode.binary_operator() {
                    return self.binary(env, op, opcode.is_inplace());
                }
                return self.exec_control(env, code, ins);
            }
        }
        Ok(())
    }

    /// Control flow, calls, definitions, exceptions and imports.
    #[allow(clippy::too_many_lines)]
    fn exec_control(&mut self, env: &mut Env, code: &CodeBlock, ins: &Instruction) -> ExecResult {
        let operand = ins.operand;
        let count = operand as usize;
        match ins.opcode {
            // ================================================================
            // Jumps and iteration
            // ================================================================
            Opcode::JumpForward | Opcode::JumpBackward | Opcode::JumpAbsolute => {
                let target = self.jump_target(ins)?;
                self.jump(target)?;
            }
            Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => {
                let value = self.pop()?;
                if value.truthy() == (ins.opcode == Opcode::PopJumpIfTrue) {
                    let target = self.jump_target(ins)?;
                    self.jump(target)?;
                }
            }
            Opcode::PopJumpIfNone | Opcode::PopJumpIfNotNone => {
                let value = self.pop()?;
                if value.is_none() == (ins.opcode == Opcode::PopJumpIfNone) {
                    let target = self.jump_target(ins)?;
                    self.jump(target)?;
                }
            }
            Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => {
                if self.peek(1)?.truthy() == (ins.opcode == Opcode::JumpIfTrueOrPop) {
                    let target = self.jump_target(ins)?;
                    self.jump(target)?;
                } else {
                    self.pop()?;
                }
            }
            Opcode::GetIter => {
                let value = self.pop()?;
                let iter = match value {
                    Value::Iter(_) => value,
                    other => ValueIter::new(&other)?,
                };
                self.push(iter);
            }
            Opcode::ForIter => {
                let next = match self.peek(1)? {
                    Value::Iter(iter) => iter.borrow_mut().next(),
                    other => {
                        return Err(RunError::internal(format!("FOR_ITER over {}", other.type_name())).into());
                    }
                };
                match next {
                    Some(item) => self.push(item),
                    None => {
                        self.pop()?;
                        let target = self.jump_target(ins)?;
                        self.jump(target)?;
                    }
                }
            }

            // ================================================================
            // Calls and definitions
            // ================================================================
            Opcode::CallFunction => {
                let args = self.pop_n(count)?;
                let callee = self.pop()?;
                return self.call_value(env, callee, ArgValues::positional(args));
            }
            Opcode::CallFunctionKw => {
                let Value::Tuple(names) = self.pop()? else {
                    return Err(RunError::internal("CALL_FUNCTION_KW without a names tuple").into());
                };
                let mut positional = self.pop_n(count)?;
                let split = positional
                    .len()
                    .checked_sub(names.len())
                    .ok_or_else(|| RunError::internal("more keyword names than arguments"))?;
                let values = positional.split_off(split);
                let kwargs = names
                    .iter()
                    .zip(values)
                    .map(|(name, value)| match name {
                        Value::Str(name) => Ok((name.clone(), value)),
                        other => Err(RunError::internal(format!("keyword name {}", other.py_repr()))),
                    })
                    .collect::<RunResult<Vec<_>>>()?;
                let callee = self.pop()?;
                return self.call_value(env, callee, ArgValues::new(positional, kwargs));
            }
            Opcode::CallFunctionEx => {
                let kwargs = if operand & 0x01 != 0 {
                    keyword_pairs(&self.pop()?)?
                } else {
                    Vec::new()
                };
                let args = self.pop()?;
                let positional = collect_items(&args).map_err(|_| {
                    ExcType::TypeError.msg(format!(
                        "argument after * must be an iterable, not {}",
                        args.type_name()
                    ))
                })?;
                let callee = self.pop()?;
                return self.call_value(env, callee, ArgValues::new(positional, kwargs));
            }
            Opcode::CallMethod => {
                let mut args = self.pop_n(count)?;
                let method = self.pop()?;
                let receiver_slot = self.pop()?;
                let callee = match receiver_slot {
                    Value::NoSelf => method,
                    function => {
                        args.insert(0, method);
                        function
                    }
                };
                return self.call_value(env, callee, ArgValues::positional(args));
            }
            Opcode::MakeFunction => self.make_function(operand)?,
            Opcode::ReturnValue => return Err(Signal::Return(self.pop()?)),
            Opcode::LoadBuildClass => self.push(Value::BuildClass),
            Opcode::SetupAnnotations => {
                let frame = self.top()?;
                let present = match &frame.class {
                    Some(class) => class.get_own("__annotations__").is_some(),
                    None => frame.globals.get("__annotations__").is_some(),
                };
                if !present {
                    self.store_name("__annotations__", Value::dict(Dict::new()))?;
                }
            }

            // ================================================================
            // Exceptions and context managers
            // ================================================================
            Opcode::SetupFinally => {
                let handler = self.jump_target(ins)?;
                let frame = self.top()?;
                let depth = frame.stack.len();
                frame.handlers.push(HandlerEntry::new(handler, depth));
            }
            Opcode::SetupWith => {
                let handler = self.jump_target(ins)?;
                let manager = self.pop()?;
                let enter = load_attr(&manager, "__enter__")?;
                let exit = load_attr(&manager, "__exit__")?;
                self.push(exit);
                let frame = self.top()?;
                let depth = frame.stack.len();
                frame.handlers.push(HandlerEntry::new(handler, depth));
                return self.call_value(env, enter, ArgValues::default());
            }
            Opcode::PopBlock => {
                self.top()?
                    .handlers
                    .pop()
                    .ok_or_else(|| RunError::internal("POP_BLOCK without a handler"))?;
            }
            Opcode::PopExcept => {
                self.top()?
                    .handlers
                    .pop()
                    .ok_or_else(|| RunError::internal("POP_EXCEPT without a handler"))?;
                self.pop_n(3)?;
            }
            Opcode::Reraise => return Err(self.reraise()),
            Opcode::RaiseVarargs => match count {
                0 => return Err(self.reraise()),
                1 | 2 => {
                    if count == 2 {
                        self.pop()?;
                    }
                    let value = self.pop()?;
                    return self.raise_value(env, value);
                }
                _ => return Err(RunError::internal(format!("RAISE_VARARGS {count}")).into()),
            },
            Opcode::JumpIfNotExcMatch => {
                let pattern = self.pop()?;
                let exception = self.pop()?;
                if !exceptions::exception_matches(&exception, &pattern)? {
                    let target = self.jump_target(ins)?;
                    self.jump(target)?;
                }
            }
            Opcode::WithExceptStart => {
                let frame = self.top()?;
                let len = frame.stack.len();
                if len < 7 {
                    return Err(RunError::internal("WITH_EXCEPT_START below the handler block").into());
                }
                let exit = frame.stack[len - 7].clone();
                let args = vec![
                    frame.stack[len - 1].clone(),
                    frame.stack[len - 2].clone(),
                    frame.stack[len - 3].clone(),
                ];
                return self.call_value(env, exit, ArgValues::positional(args));
            }
            Opcode::LoadAssertionError => self.push(Value::Builtin(Builtins::ExcType(ExcType::AssertionError))),

            // ================================================================
            // Imports
            // ================================================================
            Opcode::ImportName => {
                let fromlist = self.pop()?;
                let level = self.pop()?.as_int("import level")?;
                let name = ins.note.as_deref().unwrap_or("");
                return self.import_name(env, name, &fromlist, usize::try_from(level).unwrap_or(0));
            }
            Opcode::ImportFrom => return self.import_from(env, ins.require_note()?),
            Opcode::ImportStar => {
                let module = self.pop()?;
                self.import_star(&module)?;
            }
            Opcode::LoadModule => return self.load_module(env),
            Opcode::LinkModule => self.link_module()?,

            other => {
                return Err(RunError::internal(format!(
                    "{other} is not executable here (in {})",
                    code.label()
                ))
                .into())
            }
        }
        Ok(())
    }

    // ========================================================================
    // Instruction helpers
    // ========================================================================

    fn rotate(&mut self, n: usize) -> RunResult<()> {
        let stack = &mut self.top()?.stack;
        let start = stack
            .len()
            .checked_sub(n)
            .ok_or_else(|| RunError::internal("data stack underflow"))?;
        stack[start..].rotate_right(1);
        Ok(())
    }

    /// Target of a jump: the `to N` note when present, otherwise decoded from the operand.
    fn jump_target(&mut self, ins: &Instruction) -> RunResult<u32> {
        if let Some(target) = ins
            .note
            .as_deref()
            .and_then(|note| note.strip_prefix("to "))
            .and_then(|target| target.trim().parse().ok())
        {
            return Ok(target);
        }
        let next = self.top()?.pc;
        Ok(match ins.opcode {
            Opcode::JumpForward | Opcode::SetupFinally | Opcode::SetupWith | Opcode::ForIter => {
                next.saturating_add(ins.operand)
            }
            Opcode::JumpBackward => next.saturating_sub(ins.operand.saturating_mul(2)),
            _ => ins.operand,
        })
    }

    fn load_method(&mut self, name: &str) -> RunResult<()> {
        let owner = self.pop()?;
        if let Value::Instance(instance) = &owner {
            if instance.get_value(name).is_none() {
                if let Some(function) = instance.class_function(name) {
                    self.push(Value::Function(function));
                    self.push(owner);
                    return Ok(());
                }
            }
        }
        let method = load_attr(&owner, name)?;
        self.push(Value::NoSelf);
        self.push(method);
        Ok(())
    }

    fn format_value(&mut self, flags: u32) -> RunResult<()> {
        let spec = if flags & 0x04 != 0 { Some(self.pop()?) } else { None };
        let value = self.pop()?;
        let value = match flags & 0x03 {
            1 => Value::from(value.py_str()),
            2 | 3 => Value::from(value.py_repr()),
            _ => value,
        };
        let text = match spec.map(|spec| spec.py_str()) {
            Some(spec) if !spec.is_empty() => format_with_spec(&value, &parse_spec(&spec)?)?,
            _ => value.py_str(),
        };
        self.push(Value::from(text));
        Ok(())
    }

    fn make_function(&mut self, flags: u32) -> RunResult<()> {
        let qualname = match self.peek(1)? {
            Value::Str(name) => {
                self.pop()?;
                Some(name)
            }
            _ => None,
        };
        let Value::Code(code) = self.pop()? else {
            return Err(RunError::internal("MAKE_FUNCTION without a code object"));
        };
        let closure = if flags & 0x08 != 0 {
            collect_items(&self.pop()?)?
                .into_iter()
                .map(|cell| match cell {
                    Value::Cell(cell) => Ok(cell),
                    other => Err(RunError::internal(format!("closure item {}", other.type_name()))),
                })
                .collect::<RunResult<Vec<_>>>()?
        } else {
            Vec::new()
        };
        if flags & 0x04 != 0 {
            self.pop()?;
        }
        let kwdefaults = if flags & 0x02 != 0 {
            keyword_pairs(&self.pop()?)?
        } else {
            Vec::new()
        };
        let defaults = if flags & 0x01 != 0 {
            collect_items(&self.pop()?)?
        } else {
            Vec::new()
        };
        let qualname = qualname.unwrap_or_else(|| code.name().into());
        let function = Function::new(qualname, code, defaults, kwdefaults, closure);
        self.push(Value::Function(Rc::new(function)));
        Ok(())
    }

    fn binary(&mut self, env: &mut Env, op: BinaryOperator, inplace: bool) -> ExecResult {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let dunder = op.dunder();
        if inplace {
            if let Some(function) = instance_dunder(&lhs, &format!("__i{}", &dunder[2..])) {
                return self.call_bound(env, lhs, function, vec![rhs]);
            }
        }
        if let Some(function) = instance_dunder(&lhs, dunder) {
            return self.call_bound(env, lhs, function, vec![rhs]);
        }
        if let Some(function) = instance_dunder(&rhs, &format!("__r{}", &dunder[2..])) {
            return self.call_bound(env, rhs, function, vec![lhs]);
        }
        if inplace && op == BinaryOperator::Add {
            if let Value::List(list) = &lhs {
                let items = collect_items(&rhs)?;
                check_sequence_len(list.borrow().len().saturating_add(items.len()))?;
                list.borrow_mut().extend(items);
                self.push(lhs);
                return Ok(());
            }
        }
        let value = binary_op_or_error(op, &lhs, &rhs)?;
        self.push(value);
        Ok(())
    }

    fn compare(&mut self, env: &mut Env, op: CompareOperator) -> ExecResult {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        if let Some(function) = instance_dunder(&lhs, op.dunder()) {
            return self.call_bound(env, lhs, function, vec![rhs]);
        }
        if op == CompareOperator::Ne {
            if let Some(eq) = instance_dunder(&lhs, "__eq__") {
                return self.negated_call(env, bound(lhs, eq), rhs);
            }
        }
        if let Some(function) = instance_dunder(&rhs, reflected(op).dunder()) {
            return self.call_bound(env, rhs, function, vec![lhs]);
        }
        let result = compare(op, &lhs, &rhs)?;
        self.push(Value::Bool(result));
        Ok(())
    }

    /// `not method(arg)`, for `!=` on classes that only define `__eq__`.
    fn negated_call(&mut self, env: &mut Env, method: Value, arg: Value) -> ExecResult {
        let mut builder = CodeBuilder::new("<ne>");
        builder
            .load_fast("_method")
            .load_fast("_other")
            .emit(Opcode::CallFunction, 1)
            .emit(Opcode::UnaryNot, 0)
            .emit(Opcode::ReturnValue, 0);
        let wrapper = Function::synthetic(builder.build(&env.engine_module));
        self.call_value(env, Value::Function(Rc::new(wrapper)), ArgValues::positional(vec![method, arg]))
    }

    /// Calls `function` bound to `receiver`.
    fn call_bound(&mut self, env: &mut Env, receiver: Value, function: Rc<Function>, args: Vec<Value>) -> ExecResult {
        self.call_value(env, bound(receiver, function), ArgValues::positional(args))
    }

    /// Calls `callee` for its side effect only: a pushed frame discards its return value, a
    /// direct result is dropped.
    fn call_discarding(&mut self, env: &mut Env, callee: Value, args: Vec<Value>) -> ExecResult {
        let depth = self.frames.len();
        let stack_len = self.top()?.stack.len();
        self.call_value(env, callee, ArgValues::positional(args))?;
        if self.frames.len() > depth {
            if let Some(frame) = self.frames.last_mut() {
                frame.return_mode = ReturnMode::Discard;
            }
        } else if self.top()?.stack.len() > stack_len {
            self.pop()?;
        }
        Ok(())
    }
}

fn bound(receiver: Value, function: Rc<Function>) -> Value {
    Value::BoundMethod(Rc::new(BoundMethod::new(receiver, function)))
}

/// A dunder defined by the class of an instance value.
fn instance_dunder(value: &Value, name: &str) -> Option<Rc<Function>> {
    match value {
        Value::Instance(instance) => instance.class_function(name),
        _ => None,
    }
}

/// The operator tried on the right operand when the left one has no dunder.
fn reflected(op: CompareOperator) -> CompareOperator {
    match op {
        CompareOperator::Lt => CompareOperator::Gt,
        CompareOperator::Le => CompareOperator::Ge,
        CompareOperator::Gt => CompareOperator::Lt,
        CompareOperator::Ge => CompareOperator::Le,
        other => other,
    }
}

/// String-keyed pairs of a `**kwargs` mapping.
fn keyword_pairs(mapping: &Value) -> RunResult<Vec<(Rc<str>, Value)>> {
    let Value::Dict(dict) = mapping else {
        return Err(ExcType::TypeError.msg(format!(
            "argument after ** must be a mapping, not {}",
            mapping.type_name()
        )));
    };
    dict.borrow()
        .iter()
        .map(|(key, value)| match key {
            Value::Str(name) => Ok((name.clone(), value.clone())),
            _ => Err(ExcType::TypeError.msg("keywords must be strings")),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bytecode::parse_listing, config::PlaygroundConfig};

    /// Runs `<module>` of `listing` in a fresh sandbox until it finishes.
    fn run(listing: &str) -> (SandboxOutcome, Rc<Module>) {
        let mut env = Env::new(PlaygroundConfig::default());
        let module = Module::new("__main__", None, false);
        let code = module.install(parse_listing(listing).unwrap()).unwrap();
        let mut sandbox = SandBox {
            id: SandboxId::new(1),
            frames: vec![Frame::new(code, module.clone(), Vec::new(), Vec::new())],
        };
        for _ in 0..10_000 {
            if let StepOutcome::Finished(outcome) = sandbox.step(&mut env) {
                return (outcome, module);
            }
        }
        panic!("listing did not finish");
    }

    #[test]
    fn arithmetic_and_names() {
        let (outcome, module) = run("
code <module>
  1     0 LOAD_CONST 0 (2)
        2 LOAD_CONST 1 (3)
        4 BINARY_MULTIPLY
        6 STORE_NAME 0 (x)
        8 LOAD_NAME 0 (x)
       10 LOAD_CONST 2 (1)
       12 INPLACE_SUBTRACT
       14 RETURN_VALUE
");
        assert!(matches!(&outcome, SandboxOutcome::Returned(repr) if repr == "5"), "{outcome:?}");
        assert_eq!(module.get("x").unwrap().py_repr(), "6");
    }

    #[test]
    fn loops_accumulate_through_list_append() {
        let (outcome, _) = run("
code <module>
        0 BUILD_LIST 0
        2 LOAD_NAME 0 (range)
        4 LOAD_CONST 0 (4)
        6 CALL_FUNCTION 1
        8 GET_ITER
   >>  10 FOR_ITER 8 (to 20)
       12 LOAD_CONST 1 (10)
       14 BINARY_ADD
       16 LIST_APPEND 2
       18 JUMP_ABSOLUTE 10 (to 10)
   >>  20 RETURN_VALUE
");
        assert!(matches!(&outcome, SandboxOutcome::Returned(repr) if repr == "[10, 11, 12, 13]"), "{outcome:?}");
    }

    #[test]
    fn unbound_local_is_reported() {
        let (outcome, _) = run("
code <module>
        0 LOAD_FAST 0 (ghost)
        2 RETURN_VALUE
");
        let SandboxOutcome::Failed(record) = outcome else {
            panic!("expected a failure, got {outcome:?}");
        };
        assert_eq!(record.exc_type, "UnboundLocalError");
        assert_eq!(record.traceback.len(), 1);
    }

    #[test]
    fn data_stack_limit_raises_memory_error() {
        let mut env = Env::new(PlaygroundConfig::default());
        env.config.limits.max_data_stack = 2;
        let module = Module::new("__main__", None, false);
        let code = module
            .install(
                parse_listing(
                    "
code <module>
        0 LOAD_CONST 0 (1)
        2 LOAD_CONST 0 (1)
        4 LOAD_CONST 0 (1)
        6 BUILD_TUPLE 3
        8 RETURN_VALUE
",
                )
                .unwrap(),
            )
            .unwrap();
        let mut sandbox = SandBox {
            id: SandboxId::new(1),
            frames: vec![Frame::new(code, module, Vec::new(), Vec::new())],
        };
        let outcome = loop {
            if let StepOutcome::Finished(outcome) = sandbox.step(&mut env) {
                break outcome;
            }
        };
        assert!(matches!(&outcome, SandboxOutcome::Failed(record) if record.exc_type == "MemoryError"), "{outcome:?}");
    }

    #[test]
    fn missing_instruction_is_internal() {
        let (outcome, _) = run("
code <module>
        0 LOAD_CONST 0 (None)
        2 JUMP_ABSOLUTE 40 (to 40)
");
        assert!(matches!(&outcome, SandboxOutcome::Failed(record) if record.exc_type == "SystemError"), "{outcome:?}");
    }
}
