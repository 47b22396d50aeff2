//! Error taxonomy for C3 (emitter), C4 (linker), and module-image I/O.

/// Errors raised while lowering IR into a per-unit bytecode buffer and
/// tables (spec §7: fatal to the current method, other methods continue).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmitError {
    #[error("IR opcode `{op}` in function `{function}` has no known bytecode mapping")]
    UnknownIrOpcode { function: String, op: &'static str },
    #[error("function `{function}` references block {block}, which was never laid out")]
    UnresolvedBlock { function: String, block: u32 },
    #[error("function `{function}` failed structural verification: {source}")]
    Malformed {
        function: String,
        source: helium_ir::IrVerifyError,
    },
    #[error("function `{function}` instruction `{op}` has an operand shape the emitter does not recognise")]
    MalformedOperand { function: String, op: &'static str },
}

/// Errors raised while merging compiled units into one module image
/// (spec §7: fatal to packaging).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("type `{name}` is declared in more than one compilation unit")]
    DuplicateType { name: String },
    #[error("method `{name}` is declared more than once on type `{owner}`")]
    DuplicateMethod { owner: String, name: String },
    #[error("no compilation units were supplied to the linker")]
    EmptyLink,
    #[error("project requested entry method `{name}`, which no unit declares")]
    UnknownEntryPoint { name: String },
    #[error("call to `{name}` could not be resolved against any loaded unit or the implicit Sys class")]
    UnresolvedCallTarget { name: String },
    #[error("a type or method name contains invalid UTF-8")]
    InvalidNameEncoding,
}

/// Errors raised while reading or validating a module image (spec §7:
/// fatal to load).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModuleError {
    #[error("bad magic number: expected `HELIUM3\\0`, found {0:?}")]
    BadMagic([u8; 8]),
    #[error("unsupported module version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },
    #[error("truncated module: needed {needed} bytes at offset {offset}, had {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("string table entry references out-of-range bytes")]
    MalformedStringTable,
    #[error("invalid UTF-8 in string table")]
    InvalidUtf8,
}
