//! Opcode definitions for the stack machine.
//!
//! Names follow the listing producer (CPython 3.9 `dis` output plus the handful of 3.11 forms
//! that scripts in the wild still carry), so a listing line's opcode column parses directly
//! with `FromStr`.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Every instruction the engine can execute.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    // === Stack manipulation ===
    Nop,
    Resume,
    PopTop,
    RotTwo,
    RotThree,
    RotFour,
    DupTop,
    DupTopTwo,
    /// Pushes a copy of the n-th item (1-based from the top).
    Copy,
    /// Swaps TOS with the n-th item (1-based from the top).
    Swap,

    // === Variables ===
    LoadConst,
    LoadFast,
    StoreFast,
    DeleteFast,
    LoadName,
    StoreName,
    DeleteName,
    LoadGlobal,
    StoreGlobal,
    DeleteGlobal,
    LoadClosure,
    LoadDeref,
    StoreDeref,
    LoadAttr,
    StoreAttr,
    DeleteAttr,
    LoadMethod,

    // === Subscripts ===
    BinarySubscr,
    StoreSubscr,
    DeleteSubscr,
    BinarySlice,
    StoreSlice,
    BuildSlice,

    // === Containers ===
    BuildTuple,
    BuildList,
    BuildSet,
    BuildMap,
    BuildConstKeyMap,
    BuildString,
    ListAppend,
    SetAdd,
    MapAdd,
    ListExtend,
    SetUpdate,
    DictUpdate,
    DictMerge,
    ListToTuple,
    UnpackSequence,
    GetLen,
    FormatValue,

    // === Arithmetic ===
    BinaryPower,
    BinaryMultiply,
    BinaryFloorDivide,
    BinaryTrueDivide,
    BinaryModulo,
    BinaryAdd,
    BinarySubtract,
    BinaryLshift,
    BinaryRshift,
    BinaryAnd,
    BinaryXor,
    BinaryOr,
    InplacePower,
    InplaceMultiply,
    InplaceFloorDivide,
    InplaceTrueDivide,
    InplaceModulo,
    InplaceAdd,
    InplaceSubtract,
    InplaceLshift,
    InplaceRshift,
    InplaceAnd,
    InplaceXor,
    InplaceOr,
    /// 3.11 combined binary operator, operand selects the operation.
    BinaryOp,
    UnaryPositive,
    UnaryNegative,
    UnaryNot,
    UnaryInvert,
    CompareOp,
    IsOp,
    ContainsOp,

    // === Control flow ===
    JumpForward,
    JumpBackward,
    JumpAbsolute,
    PopJumpIfFalse,
    PopJumpIfTrue,
    PopJumpIfNone,
    PopJumpIfNotNone,
    JumpIfFalseOrPop,
    JumpIfTrueOrPop,
    GetIter,
    ForIter,

    // === Calls and definitions ===
    CallFunction,
    CallFunctionKw,
    CallFunctionEx,
    CallMethod,
    MakeFunction,
    ReturnValue,
    LoadBuildClass,
    SetupAnnotations,

    // === Exceptions and with-blocks ===
    SetupFinally,
    SetupWith,
    PopBlock,
    PopExcept,
    Reraise,
    RaiseVarargs,
    JumpIfNotExcMatch,
    WithExceptStart,
    LoadAssertionError,

    // === Imports ===
    ImportName,
    ImportFrom,
    ImportStar,
    /// Engine-only: pops `(dotted name, path)` and the module list, loads and runs the module.
    LoadModule,
    /// Engine-only: attaches the newest module in the list onto its parent.
    LinkModule,
}

/// Arithmetic and bitwise operators shared by `BINARY_*`, `INPLACE_*` and `BINARY_OP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BinaryOperator {
    #[strum(to_string = "+")]
    Add,
    #[strum(to_string = "-")]
    Sub,
    #[strum(to_string = "*")]
    Mul,
    #[strum(to_string = "/")]
    TrueDiv,
    #[strum(to_string = "//")]
    FloorDiv,
    #[strum(to_string = "%")]
    Mod,
    #[strum(to_string = "** or pow()")]
    Pow,
    #[strum(to_string = "<<")]
    LShift,
    #[strum(to_string = ">>")]
    RShift,
    #[strum(to_string = "&")]
    And,
    #[strum(to_string = "|")]
    Or,
    #[strum(to_string = "^")]
    Xor,
}

impl BinaryOperator {
    /// Name of the dunder method implementing this operator on instances.
    #[must_use]
    pub fn dunder(self) -> &'static str {
        match self {
            Self::Add => "__add__",
            Self::Sub => "__sub__",
            Self::Mul => "__mul__",
            Self::TrueDiv => "__truediv__",
            Self::FloorDiv => "__floordiv__",
            Self::Mod => "__mod__",
            Self::Pow => "__pow__",
            Self::LShift => "__lshift__",
            Self::RShift => "__rshift__",
            Self::And => "__and__",
            Self::Or => "__or__",
            Self::Xor => "__xor__",
        }
    }

    /// Decodes the 3.11 `BINARY_OP` operand (inplace variants start at 13).
    #[must_use]
    pub fn from_binary_op_arg(arg: u32) -> Option<Self> {
        Some(match arg % 13 {
            0 => Self::Add,
            1 => Self::And,
            2 => Self::FloorDiv,
            3 => Self::LShift,
            5 => Self::Mul,
            6 => Self::Mod,
            7 => Self::Or,
            8 => Self::Pow,
            9 => Self::RShift,
            10 => Self::Sub,
            11 => Self::TrueDiv,
            12 => Self::Xor,
            _ => return None,
        })
    }
}

impl Opcode {
    /// The operator of a `BINARY_*` or `INPLACE_*` opcode.
    #[must_use]
    pub fn binary_operator(self) -> Option<BinaryOperator> {
        Some(match self {
            Self::BinaryPower | Self::InplacePower => BinaryOperator::Pow,
            Self::BinaryMultiply | Self::InplaceMultiply => BinaryOperator::Mul,
            Self::BinaryFloorDivide | Self::InplaceFloorDivide => BinaryOperator::FloorDiv,
            Self::BinaryTrueDivide | Self::InplaceTrueDivide => BinaryOperator::TrueDiv,
            Self::BinaryModulo | Self::InplaceModulo => BinaryOperator::Mod,
            Self::BinaryAdd | Self::InplaceAdd => BinaryOperator::Add,
            Self::BinarySubtract | Self::InplaceSubtract => BinaryOperator::Sub,
            Self::BinaryLshift | Self::InplaceLshift => BinaryOperator::LShift,
            Self::BinaryRshift | Self::InplaceRshift => BinaryOperator::RShift,
            Self::BinaryAnd | Self::InplaceAnd => BinaryOperator::And,
            Self::BinaryXor | Self::InplaceXor => BinaryOperator::Xor,
            Self::BinaryOr | Self::InplaceOr => BinaryOperator::Or,
            _ => return None,
        })
    }

    /// True for the `INPLACE_*` family, which may mutate its left operand.
    #[must_use]
    pub fn is_inplace(self) -> bool {
        matches!(
            self,
            Self::InplacePower
                | Self::InplaceMultiply
                | Self::InplaceFloorDivide
                | Self::InplaceTrueDivide
                | Self::InplaceModulo
                | Self::InplaceAdd
                | Self::InplaceSubtract
                | Self::InplaceLshift
                | Self::InplaceRshift
                | Self::InplaceAnd
                | Self::InplaceXor
                | Self::InplaceOr
        )
    }
}

/// Rich comparison operators of `COMPARE_OP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum CompareOperator {
    #[strum(to_string = "<")]
    Lt,
    #[strum(to_string = "<=")]
    Le,
    #[strum(to_string = "==")]
    Eq,
    #[strum(to_string = "!=")]
    Ne,
    #[strum(to_string = ">")]
    Gt,
    #[strum(to_string = ">=")]
    Ge,
}

impl CompareOperator {
    /// Decodes the 3.9 operand order `< <= == != > >=`.
    #[must_use]
    pub fn from_arg(arg: u32) -> Option<Self> {
        Some(match arg {
            0 => Self::Lt,
            1 => Self::Le,
            2 => Self::Eq,
            3 => Self::Ne,
            4 => Self::Gt,
            5 => Self::Ge,
            _ => return None,
        })
    }

    #[must_use]
    pub fn dunder(self) -> &'static str {
        match self {
            Self::Lt => "__lt__",
            Self::Le => "__le__",
            Self::Eq => "__eq__",
            Self::Ne => "__ne__",
            Self::Gt => "__gt__",
            Self::Ge => "__ge__",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn names_parse_from_listing_columns() {
        assert_eq!(Opcode::from_str("CALL_FUNCTION_KW"), Ok(Opcode::CallFunctionKw));
        assert_eq!(Opcode::from_str("POP_JUMP_IF_NOT_NONE"), Ok(Opcode::PopJumpIfNotNone));
        assert_eq!(Opcode::from_str("DUP_TOP_TWO"), Ok(Opcode::DupTopTwo));
        assert_eq!(Opcode::from_str("BINARY_SUBSCR"), Ok(Opcode::BinarySubscr));
        assert_eq!(Opcode::from_str("RERAISE"), Ok(Opcode::Reraise));
        assert!(Opcode::from_str("YIELD_VALUE").is_err());
    }

    #[test]
    fn compare_operand_order() {
        assert_eq!(CompareOperator::from_arg(2), Some(CompareOperator::Eq));
        assert_eq!(CompareOperator::from_str(">="), Ok(CompareOperator::Ge));
    }
}
