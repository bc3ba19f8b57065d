//! Instruction set, code objects and the stack machine that executes them.

pub(crate) mod builder;
mod code;
mod constant;
mod listing;
mod op;
pub(crate) mod vm;

pub use code::{CodeBlock, CodeListing, CompiledModule, Instruction, CODE_STEP, MODULE_LABEL};
pub use listing::{parse_listing, JsonCompiler, ListingCompiler, ModuleCompiler};
pub use op::{BinaryOperator, CompareOperator, Opcode};
