//! Readers turning listing files into [`CompiledModule`]s.
//!
//! The text form mirrors `dis` output, one code object after another:
//!
//! ```text
//! code <module>
//!   1           0 LOAD_CONST               0 (1)
//!               2 STORE_NAME               0 (x)
//! code f params=a,b cellvars=c name=f
//!   3     >>    0 LOAD_FAST                0 (a)
//! ```

use std::{fmt, fs, path::Path, str::FromStr};

use super::{
    code::{CodeListing, CompiledModule, Instruction},
    op::Opcode,
};
use crate::error::CompileError;

/// Source of compiled modules, keyed by file path.
///
/// The engine never translates script source itself; a host plugs in whichever toolchain
/// produces instruction listings.
pub trait ModuleCompiler: fmt::Debug {
    fn compile(&self, path: &Path) -> Result<CompiledModule, CompileError>;
}

/// Reads `dis`-style text listings.
#[derive(Debug, Default, Clone, Copy)]
pub struct ListingCompiler;

impl ModuleCompiler for ListingCompiler {
    fn compile(&self, path: &Path) -> Result<CompiledModule, CompileError> {
        parse_listing(&read(path)?)
    }
}

/// Reads the JSON form of [`CompiledModule`].
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCompiler;

impl ModuleCompiler for JsonCompiler {
    fn compile(&self, path: &Path) -> Result<CompiledModule, CompileError> {
        CompiledModule::from_json(&read(path)?)
    }
}

fn read(path: &Path) -> Result<String, CompileError> {
    fs::read_to_string(path).map_err(|source| CompileError::Io {
        path: path.to_owned(),
        source,
    })
}

/// Parses a text listing.
pub fn parse_listing(text: &str) -> Result<CompiledModule, CompileError> {
    let mut codes: Vec<CodeListing> = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(header) = line.strip_prefix("code ") {
            codes.push(parse_header(header, line_no)?);
            continue;
        }
        if let Some(rest) = line.strip_prefix("Disassembly of") {
            codes.push(parse_disassembly_header(rest, line_no)?);
            continue;
        }
        let Some(code) = codes.last_mut() else {
            return Err(CompileError::syntax(line_no, "instruction before any code header"));
        };
        code.instructions.push(parse_instruction(line, line_no)?);
    }
    Ok(CompiledModule { codes })
}

fn split_names(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}

fn optional_name(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_owned())
}

fn parse_header(header: &str, line_no: usize) -> Result<CodeListing, CompileError> {
    let mut parts = header.split_whitespace();
    let label = parts
        .next()
        .ok_or_else(|| CompileError::syntax(line_no, "code header without a label"))?;
    let mut listing = CodeListing {
        label: label.to_owned(),
        ..CodeListing::default()
    };
    for part in parts {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| CompileError::syntax(line_no, format!("expected key=value, found '{part}'")))?;
        match key {
            "params" => listing.params = split_names(value),
            "kwonly" => listing.kwonly = split_names(value),
            "varargs" => listing.varargs = optional_name(value),
            "varkw" => listing.varkw = optional_name(value),
            "cellvars" => listing.cellvars = split_names(value),
            "freevars" => listing.freevars = split_names(value),
            "name" => listing.name = optional_name(value),
            other => return Err(CompileError::syntax(line_no, format!("unknown header key '{other}'"))),
        }
    }
    Ok(listing)
}

/// `Disassembly of <code object f at 0x..., file "x.py", line 3>:` starts a code object
/// without a signature; only its label is known.
fn parse_disassembly_header(rest: &str, line_no: usize) -> Result<CodeListing, CompileError> {
    let rest = rest.trim().trim_end_matches(':');
    let label = rest
        .strip_prefix("<code object")
        .and_then(|rest| rest.split_whitespace().next())
        .ok_or_else(|| CompileError::syntax(line_no, "malformed disassembly header"))?;
    Ok(CodeListing {
        label: label.to_owned(),
        ..CodeListing::default()
    })
}

fn parse_number(token: &str, line_no: usize) -> Result<u32, CompileError> {
    token
        .parse()
        .map_err(|_| CompileError::syntax(line_no, format!("expected a number, found '{token}'")))
}

fn parse_instruction(line: &str, line_no: usize) -> Result<Instruction, CompileError> {
    let (head, note) = match line.find('(') {
        Some(open) => {
            let note = line[open..].trim_end();
            let note = note
                .strip_prefix('(')
                .and_then(|note| note.strip_suffix(')'))
                .ok_or_else(|| CompileError::syntax(line_no, "unbalanced note parentheses"))?;
            (&line[..open], Some(note))
        }
        None => (line, None),
    };

    let tokens: Vec<&str> = head.split_whitespace().collect();
    let op_index = tokens
        .iter()
        .position(|token| token.starts_with(|c: char| c.is_ascii_alphabetic()))
        .ok_or_else(|| CompileError::syntax(line_no, "missing opcode"))?;
    let opcode = Opcode::from_str(tokens[op_index])
        .map_err(|_| CompileError::syntax(line_no, format!("unknown opcode '{}'", tokens[op_index])))?;

    let numbers: Vec<u32> = tokens[..op_index]
        .iter()
        .filter(|token| **token != ">>")
        .map(|token| parse_number(token, line_no))
        .collect::<Result<_, _>>()?;
    let (source_line, offset) = match numbers.as_slice() {
        [offset] => (None, *offset),
        [line, offset] => (Some(*line), *offset),
        _ => return Err(CompileError::syntax(line_no, "expected '[line] [>>] offset' before the opcode")),
    };

    let operand = match &tokens[op_index + 1..] {
        [] => 0,
        [operand] => parse_number(operand, line_no)?,
        _ => return Err(CompileError::syntax(line_no, "too many operands")),
    };

    Ok(Instruction {
        offset,
        opcode,
        operand,
        note: note.map(Into::into),
        line: source_line,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "
# a comment
code <module>
  1           0 LOAD_CONST               0 (('a', 'b'))
              2 STORE_NAME               0 (x)
         >>   4 JUMP_ABSOLUTE            0 (to 0)

code f params=a,b varargs=rest kwonly=k cellvars=c name=Outer.f
  3     >>    0 LOAD_FAST                0 (a)
              2 RETURN_VALUE
";

    #[test]
    fn parses_headers_and_instructions() {
        let module = parse_listing(LISTING).unwrap();
        assert_eq!(module.codes.len(), 2);
        let top = &module.codes[0];
        assert_eq!(top.label, "<module>");
        assert_eq!(top.instructions.len(), 3);
        assert_eq!(top.instructions[0].line, Some(1));
        assert_eq!(top.instructions[0].note.as_deref(), Some("('a', 'b')"));
        assert_eq!(top.instructions[2].opcode, Opcode::JumpAbsolute);
        assert_eq!(top.instructions[2].offset, 4);
        assert_eq!(top.instructions[2].line, None);

        let f = &module.codes[1];
        assert_eq!(f.params, vec!["a", "b"]);
        assert_eq!(f.varargs.as_deref(), Some("rest"));
        assert_eq!(f.kwonly, vec!["k"]);
        assert_eq!(f.cellvars, vec!["c"]);
        assert_eq!(f.name.as_deref(), Some("Outer.f"));
        assert_eq!(f.instructions[0].line, Some(3));
        assert_eq!(f.instructions[1].note, None);
    }

    #[test]
    fn reports_line_of_bad_opcode() {
        let err = parse_listing("code <module>\n 0 FROBNICATE\n").unwrap_err();
        match err {
            CompileError::Syntax { line, message } => {
                assert_eq!(line, 2);
                assert!(message.contains("FROBNICATE"), "{message}");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn instruction_needs_a_header() {
        assert!(parse_listing("0 NOP").is_err());
    }

    #[test]
    fn dis_style_headers_are_accepted() {
        let text = "Disassembly of <code object g at 0x7f, file \"m.py\", line 4>:\n  0 LOAD_CONST 0 (None)\n";
        let module = parse_listing(text).unwrap();
        assert_eq!(module.codes[0].label, "g");
    }

    #[test]
    fn json_round_trip_keeps_notes() {
        let module = parse_listing(LISTING).unwrap();
        let json = module.to_json().unwrap();
        assert_eq!(CompiledModule::from_json(&json).unwrap(), module);
    }
}
