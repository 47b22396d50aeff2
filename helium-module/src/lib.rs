//! The on-disk Helium module format, its bytecode emitter (C3), and its
//! packager/linker (C4).
//!
//! `helium-asm` owns the published opcode numbering; this crate owns
//! everything built on top of it: per-unit emission, multi-unit linking,
//! and the binary container the two sides of that process exchange.

pub mod constants;
pub mod cursor;
pub mod emit;
pub mod error;
pub mod header;
pub mod ir_opcode;
pub mod link;
pub mod tables;

pub use constants::{ConstantEntry, ConstantPool};
pub use emit::{emit_module, CompiledUnit, Emitter, Patch, PatchKind};
pub use error::{EmitError, LinkError, ModuleError};
pub use header::{ModuleFlags, ModuleHeader, HEADER_SIZE, MAGIC, VERSION_MAJOR, VERSION_MINOR};
pub use link::{ModuleKind, ProjectMetadata};
pub use tables::{
    field_flags, method_flags, type_flags, FieldEntry, MethodEntry, StringEntry, TypeEntry,
    NO_SUPERTYPE,
};
