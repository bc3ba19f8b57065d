use std::rc::Rc;

use super::{
    code::{CodeBlock, CodeListing, Instruction, CODE_STEP},
    op::Opcode,
};
use crate::{module::Module, value::Value};

/// Emits engine-synthesized code in the same representation as listing code.
///
/// Used for the launcher, import sequences, instantiation and class-body wrappers, and
/// thread bootstraps. Constants are attached directly rather than parsed from notes.
#[derive(Debug)]
pub(crate) struct CodeBuilder {
    listing: CodeListing,
    constants: Vec<Value>,
}

impl CodeBuilder {
    pub fn new(label: &str) -> Self {
        Self {
            listing: CodeListing {
                label: label.to_owned(),
                ..CodeListing::default()
            },
            constants: Vec::new(),
        }
    }

    /// Declares a positional parameter and returns its fast-local index.
    pub fn param(&mut self, name: impl Into<String>) -> u32 {
        let name = name.into();
        let index = match self.listing.params.iter().position(|param| *param == name) {
            Some(index) => index,
            None => {
                self.listing.params.push(name);
                self.listing.params.len() - 1
            }
        };
        u32::try_from(index).unwrap_or(u32::MAX)
    }

    pub fn emit(&mut self, opcode: Opcode, operand: u32) -> &mut Self {
        let offset = self.next_offset();
        self.listing.instructions.push(Instruction::new(offset, opcode, operand));
        self
    }

    pub fn emit_named(&mut self, opcode: Opcode, operand: u32, note: &str) -> &mut Self {
        let offset = self.next_offset();
        self.listing
            .instructions
            .push(Instruction::new(offset, opcode, operand).with_note(note));
        self
    }

    /// `LOAD_FAST` of a declared parameter, declaring it when new.
    pub fn load_fast(&mut self, name: &str) -> &mut Self {
        let index = self.param(name);
        self.emit_named(Opcode::LoadFast, index, name)
    }

    pub fn load_const(&mut self, value: Value) -> &mut Self {
        let index = u32::try_from(self.constants.len()).unwrap_or(u32::MAX);
        self.constants.push(value);
        self.emit(Opcode::LoadConst, index)
    }

    pub fn load_name(&mut self, name: &str) -> &mut Self {
        self.emit_named(Opcode::LoadName, 0, name)
    }

    fn next_offset(&self) -> u32 {
        u32::try_from(self.listing.instructions.len())
            .unwrap_or(u32::MAX)
            .saturating_mul(CODE_STEP)
    }

    /// Finishes the code, attaching it to `module` for global lookups.
    pub fn build(self, module: &Rc<Module>) -> Rc<CodeBlock> {
        let code = CodeBlock::from_listing(self.listing, module);
        for (index, value) in self.constants.into_iter().enumerate() {
            code.preload_constant(u32::try_from(index).unwrap_or(u32::MAX), value);
        }
        Rc::new(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_advance_by_code_step() {
        let module = Module::new("<engine>", None, false);
        let mut builder = CodeBuilder::new("<wrapper>");
        builder.load_fast("a").load_const(Value::Int(3)).emit(Opcode::ReturnValue, 0);
        let code = builder.build(&module);
        assert_eq!(code.params().len(), 1);
        assert_eq!(code.first_offset(), 0);
        assert_eq!(code.next_offset(0), 2);
        assert_eq!(code.next_offset(4), 6);
        let load_const = code.instruction(2).unwrap();
        assert_eq!(code.constant(load_const).unwrap().py_repr(), "3");
    }
}
