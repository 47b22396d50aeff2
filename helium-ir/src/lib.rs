//! The Helium compiler's intermediate representation and the AST→IR
//! lowering pass that builds it (components C1 and C2 of the design).
//!
//! Lexing, parsing, and parser error recovery live outside this crate;
//! see [`ast`]'s module documentation for the boundary this crate
//! assumes on their behalf.

pub mod ast;
pub mod ir;
pub mod lower;

pub use ir::{
    BasicBlock, BlockId, Function, Instruction, IrBuilder, IrOp, IrVerifyError, Module,
    SourceLocation, TempId, TypeId, Value,
};
pub use lower::{translate_compilation_unit, LoweringOutcome, TranslateError, TypeTable};
