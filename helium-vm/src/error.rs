//! Error taxonomy for C5 (registry), C6 (objects), C7 (heap), and C8
//! (interpreter), per spec §7.

use helium_asm::PanicReason;

/// Errors raised while loading modules or resolving symbols against the
/// registry (spec §7: fatal to load / fatal to the resolving call).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("module file could not be read or parsed: {0}")]
    InvalidModule(#[from] helium_module::ModuleError),
    #[error("could not read module file `{path}`: {reason}")]
    Io { path: String, reason: String },
    #[error("no module is loaded at id {0}")]
    ModuleNotFound(u32),
    #[error("no class named `{0}` is loaded")]
    ClassNotFound(String),
    #[error("no class with global type id {0} is loaded")]
    ClassNotFoundById(u32),
    #[error("no method named `{0}` is loaded")]
    MethodNotFound(String),
    #[error("no method with global method id {0} is loaded")]
    MethodNotFoundById(u32),
    #[error("type `{owner}` has no method named `{name}`")]
    MethodNotFoundInType { owner: String, name: String },
    #[error("no field named `{0}` is loaded")]
    FieldNotFound(String),
    #[error("no field with global field id {0} is loaded")]
    FieldNotFoundById(u32),
    #[error("type `{owner}` has no field named `{name}`")]
    FieldNotFoundInType { owner: String, name: String },
    #[error("module {0} cannot be unloaded: it is the running entry module")]
    CannotUnloadEntryModule(u32),
    #[error("no interface with global type id {0} is loaded")]
    InterfaceNotFound(u32),
    #[error("no loaded module declares an entry point")]
    NoEntryPoint,
}

/// Errors raised by the heap (spec §4.7, §7: `AllocationFailure` is fatal
/// after one GC retry; the integrity errors are for test assertions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("heap exhausted: could not satisfy a {0}-byte allocation even after garbage collection")]
    AllocationFailure(usize),
    #[error("pointer does not belong to this heap's tracked allocations")]
    InvalidPointer,
    #[error("heap integrity check failed: {0}")]
    IntegrityViolation(&'static str),
}

/// Errors raised while executing bytecode (spec §7: fatal to the current
/// VM invocation unless noted otherwise; frames are unwound either way).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error("bytecode panic: {0}")]
    Panic(PanicReason),
    #[error("malformed module: {0}")]
    Decode(#[from] helium_asm::DecodeError),
}

impl RuntimeError {
    /// The panic reason this error corresponds to, for reporting through
    /// the published taxonomy even when the underlying cause is a Rust
    /// type rather than a raw `PanicReason` byte.
    pub fn panic_reason(&self) -> PanicReason {
        match self {
            RuntimeError::Panic(reason) => *reason,
            RuntimeError::Heap(HeapError::AllocationFailure(_)) => PanicReason::AllocationFailure,
            RuntimeError::Heap(_) => PanicReason::NullDereference,
            RuntimeError::Registry(RegistryError::FieldNotFound(_))
            | RuntimeError::Registry(RegistryError::FieldNotFoundById(_))
            | RuntimeError::Registry(RegistryError::FieldNotFoundInType { .. }) => {
                PanicReason::UnresolvedField
            }
            RuntimeError::Registry(_) => PanicReason::UnresolvedMethod,
            RuntimeError::Decode(_) => PanicReason::InvalidOpcode,
        }
    }
}

/// Top-level error returned by [`crate::interpreter::Interpreter::run`],
/// carrying the method and instruction pointer the fault occurred at.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{source} (method {method_id}, ip {ip})")]
pub struct InterpreterError {
    pub method_id: u32,
    pub ip: u32,
    #[source]
    pub source: RuntimeError,
}

impl InterpreterError {
    pub fn panic_reason(&self) -> PanicReason {
        self.source.panic_reason()
    }
}
