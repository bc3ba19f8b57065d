use std::{
    cell::RefCell,
    collections::BTreeMap,
    fmt,
    rc::{Rc, Weak},
};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use super::{
    constant::{parse_constant, Constant},
    op::Opcode,
};
use crate::{
    error::CompileError,
    exception_private::{RunError, RunResult},
    module::Module,
    value::Value,
};

/// Default distance between consecutive instruction offsets.
pub const CODE_STEP: u32 = 2;

/// One decoded instruction of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub offset: u32,
    pub opcode: Opcode,
    #[serde(default)]
    pub operand: u32,
    /// The parenthesised annotation of the listing line: a name, a constant repr or a jump target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<Rc<str>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Instruction {
    #[must_use]
    pub fn new(offset: u32, opcode: Opcode, operand: u32) -> Self {
        Self {
            offset,
            opcode,
            operand,
            note: None,
            line: None,
        }
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<Rc<str>>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// The note, or an internal error naming the instruction when the listing omitted it.
    pub(crate) fn require_note(&self) -> RunResult<&str> {
        self.note.as_deref().ok_or_else(|| {
            RunError::internal(format!("{} at offset {} has no name annotation", self.opcode, self.offset))
        })
    }
}

/// A code object as it appears in a listing, before it is attached to a module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeListing {
    pub label: String,
    /// Display name, defaults to the label.
    pub name: Option<String>,
    pub params: Vec<String>,
    pub kwonly: Vec<String>,
    pub varargs: Option<String>,
    pub varkw: Option<String>,
    pub cellvars: Vec<String>,
    pub freevars: Vec<String>,
    pub instructions: Vec<Instruction>,
}

/// Every code object of one module file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledModule {
    pub codes: Vec<CodeListing>,
}

/// Label of a module's top-level code.
pub const MODULE_LABEL: &str = "<module>";

impl CompiledModule {
    /// Parses the JSON form of a listing.
    pub fn from_json(text: &str) -> Result<Self, CompileError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, CompileError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Executable code attached to its owning module.
///
/// Instructions are keyed by offset so sparse offsets work; constants are materialized from
/// their notes on first use and cached.
pub struct CodeBlock {
    label: Rc<str>,
    name: Rc<str>,
    instructions: BTreeMap<u32, Instruction>,
    params: Vec<Rc<str>>,
    kwonly: Vec<Rc<str>>,
    varargs: Option<Rc<str>>,
    varkw: Option<Rc<str>>,
    cellvars: Vec<Rc<str>>,
    freevars: Vec<Rc<str>>,
    module: Weak<Module>,
    constants: RefCell<AHashMap<u32, Value>>,
}

impl fmt::Debug for CodeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeBlock")
            .field("label", &self.label)
            .field("instructions", &self.instructions.len())
            .finish_non_exhaustive()
    }
}

fn rc_names(names: Vec<String>) -> Vec<Rc<str>> {
    names.into_iter().map(Rc::from).collect()
}

impl CodeBlock {
    pub(crate) fn from_listing(listing: CodeListing, module: &Rc<Module>) -> Self {
        let name = listing.name.unwrap_or_else(|| listing.label.clone());
        Self {
            label: listing.label.into(),
            name: name.into(),
            instructions: listing
                .instructions
                .into_iter()
                .map(|instruction| (instruction.offset, instruction))
                .collect(),
            params: rc_names(listing.params),
            kwonly: rc_names(listing.kwonly),
            varargs: listing.varargs.map(Rc::from),
            varkw: listing.varkw.map(Rc::from),
            cellvars: rc_names(listing.cellvars),
            freevars: rc_names(listing.freevars),
            module: Rc::downgrade(module),
            constants: RefCell::new(AHashMap::new()),
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn instruction(&self, offset: u32) -> Option<&Instruction> {
        self.instructions.get(&offset)
    }

    /// Offset of the instruction following `offset`, or one stride past the end.
    pub(crate) fn next_offset(&self, offset: u32) -> u32 {
        self.instructions
            .range(offset + 1..)
            .next()
            .map_or(offset + CODE_STEP, |(next, _)| *next)
    }

    /// Source line of the instruction at `offset`: the nearest line marker at or before it.
    pub(crate) fn line_at(&self, offset: u32) -> Option<u32> {
        self.instructions
            .range(..=offset)
            .rev()
            .find_map(|(_, instruction)| instruction.line)
    }

    pub(crate) fn first_offset(&self) -> u32 {
        self.instructions.keys().next().copied().unwrap_or(0)
    }

    pub(crate) fn params(&self) -> &[Rc<str>] {
        &self.params
    }

    pub(crate) fn kwonly(&self) -> &[Rc<str>] {
        &self.kwonly
    }

    pub(crate) fn varargs(&self) -> Option<&Rc<str>> {
        self.varargs.as_ref()
    }

    pub(crate) fn varkw(&self) -> Option<&Rc<str>> {
        self.varkw.as_ref()
    }

    pub(crate) fn cellvars(&self) -> &[Rc<str>] {
        &self.cellvars
    }

    pub(crate) fn freevars(&self) -> &[Rc<str>] {
        &self.freevars
    }

    /// Names of the argument slots in fast-local order: params, kwonly, `*args`, `**kwargs`.
    pub(crate) fn slot_names(&self) -> impl Iterator<Item = &Rc<str>> {
        self.params
            .iter()
            .chain(&self.kwonly)
            .chain(self.varargs.as_ref())
            .chain(self.varkw.as_ref())
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.params.len()
            + self.kwonly.len()
            + usize::from(self.varargs.is_some())
            + usize::from(self.varkw.is_some())
    }

    /// Name of a cell or free variable by `LOAD_CLOSURE`/`LOAD_DEREF` index.
    pub(crate) fn deref_name(&self, index: usize) -> Option<&str> {
        self.cellvars
            .iter()
            .chain(&self.freevars)
            .nth(index)
            .map(|name| &**name)
    }

    pub(crate) fn module(&self) -> RunResult<Rc<Module>> {
        self.module
            .upgrade()
            .ok_or_else(|| RunError::internal(format!("module of code {} was dropped", self.label)))
    }

    /// Materializes the constant loaded by a `LOAD_CONST`, caching it by operand.
    pub(crate) fn constant(&self, instruction: &Instruction) -> RunResult<Value> {
        if let Some(value) = self.constants.borrow().get(&instruction.operand) {
            return Ok(value.clone());
        }
        let note = instruction.note.as_deref().unwrap_or("None");
        let value = match parse_constant(note).map_err(RunError::internal)? {
            Constant::Value(value) => value,
            Constant::Code(label) => {
                let module = self.module()?;
                let code = module
                    .code(&label)
                    .ok_or_else(|| RunError::internal(format!("unknown code object '{label}' in {}", module.name())))?;
                Value::Code(code)
            }
        };
        self.constants.borrow_mut().insert(instruction.operand, value.clone());
        Ok(value)
    }

    /// Pre-populates a constant slot, used for synthesized code.
    pub(crate) fn preload_constant(&self, index: u32, value: Value) {
        self.constants.borrow_mut().insert(index, value);
    }
}
