//! The Helium virtual machine: module registry (C5), object/class system
//! (C6), heap (C7), and bytecode interpreter (C8).
//!
//! `helium-asm` supplies the published opcode numbering and `helium-module`
//! the on-disk module format this crate loads; everything here is runtime:
//! it owns no compile-time state and is driven entirely by module images.

pub mod config;
pub mod error;
pub mod frame;
pub mod heap;
pub mod interpreter;
pub mod object;
pub mod registry;
pub mod value;

pub use config::VmConfig;
pub use error::{HeapError, InterpreterError, RegistryError, RuntimeError};
pub use frame::CallFrame;
pub use heap::{GcReport, GcStats, GenerationKind, Heap};
pub use interpreter::Interpreter;
pub use object::{Class, Field, Method};
pub use registry::{ModuleRegistry, Runtime};
pub use value::{ObjectRef, Value};
