//! Atomic types shared by the Helium compiler and virtual machine.
//!
//! This crate owns the one published numbering for bytecode opcodes
//! (`Opcode`), the fixed-width instruction encoding every opcode obeys, and
//! the panic taxonomy the interpreter raises. Both `helium-module` (the
//! emitter) and `helium-vm` (the interpreter) depend on this crate so the
//! numbering can never drift between the two sides of a compiler/VM
//! pairing.

mod instruction;
mod opcode;
mod panic_reason;

pub use instruction::{DecodeError, Instruction};
pub use opcode::Opcode;
pub use panic_reason::PanicReason;

/// Width, in bytes, of an instruction's opcode byte.
pub const OPCODE_WIDTH: usize = 1;

/// Width, in bytes, of a single 32-bit little-endian operand.
pub const OPERAND_WIDTH: usize = 4;
