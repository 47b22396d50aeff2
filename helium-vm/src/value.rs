//! The runtime `Value`, the tagged union every operand stack slot, local
//! slot, and field holds (spec §9 design note: reproduce the source's
//! unboxed tagged union, not a boxed `enum` carrying its own heap pointer).

use core::fmt;

/// An opaque handle to a heap-resident object. Arena-style integer id,
/// not a raw pointer, per spec §9's guidance on cross-structure references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(pub u32);

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A single operand-stack / local-slot / field value. Kept small and
/// `Copy` so pushing, popping, and duplicating never allocate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I64(i64),
    F64(f64),
    Bool(bool),
    /// A string-table id (module-global after linking), not the string
    /// bytes themselves — strings are interned, not boxed.
    StringRef(u32),
    Object(ObjectRef),
    Null,
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::I64(_) => "integer",
            Value::F64(_) => "float",
            Value::Bool(_) => "boolean",
            Value::StringRef(_) => "string",
            Value::Object(_) => "object",
            Value::Null => "null",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Value::Object(obj) => Some(*obj),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I64(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::StringRef(id) => write!(f, "<string #{id}>"),
            Value::Object(obj) => write!(f, "<object {obj}>"),
            Value::Null => write!(f, "null"),
        }
    }
}
