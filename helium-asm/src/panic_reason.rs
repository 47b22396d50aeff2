use core::fmt;

/// Reasons the interpreter can panic, shared between the emitter (which
/// may statically rule some of these out) and the interpreter (which
/// raises them at runtime). Numbered and published here so both sides of
/// a compiler/VM pairing agree, per spec §7's error taxonomy for C8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
#[non_exhaustive]
pub enum PanicReason {
    /// The byte can't be mapped to any known `PanicReason`.
    UnknownPanicReason = 0x00,
    /// Pushing past the operand stack's configured capacity.
    StackOverflow = 0x01,
    /// Popping or peeking an empty operand stack.
    StackUnderflow = 0x02,
    /// An arithmetic, comparison, or logic opcode received operands of
    /// incompatible kinds.
    TypeMismatch = 0x03,
    /// `DIV` or `MOD` with a zero divisor.
    DivisionByZero = 0x04,
    /// Field, method, or array access through a `NULL` value.
    NullDereference = 0x05,
    /// The instruction pointer lands on a byte that is not a known
    /// opcode.
    InvalidOpcode = 0x06,
    /// Reading past a method's bytecode region without having already
    /// executed a `RETURN`/`RETURN_VALUE`.
    EndOfBytecode = 0x07,
    /// The host embedder raised the halt flag between instructions.
    Interrupted = 0x08,
    /// The heap could not satisfy an allocation even after a GC retry.
    AllocationFailure = 0x09,
    /// An index into an array was out of bounds.
    ArrayIndexOutOfBounds = 0x0a,
    /// A `CAST`/`INSTANCEOF` target type id does not resolve to a loaded
    /// class.
    UnresolvedType = 0x0b,
    /// A `CALL`/`CALLV`/`CALLI` method id does not resolve to a loaded
    /// method, or virtual/interface dispatch found no matching override.
    UnresolvedMethod = 0x0c,
    /// A `LOAD_FIELD`/`STORE_FIELD`/`LOAD_STATIC`/`STORE_STATIC` name does
    /// not resolve to a loaded field.
    UnresolvedField = 0x0d,
}

impl fmt::Display for PanicReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for PanicReason {}

impl From<u8> for PanicReason {
    fn from(byte: u8) -> Self {
        use PanicReason::*;
        match byte {
            0x01 => StackOverflow,
            0x02 => StackUnderflow,
            0x03 => TypeMismatch,
            0x04 => DivisionByZero,
            0x05 => NullDereference,
            0x06 => InvalidOpcode,
            0x07 => EndOfBytecode,
            0x08 => Interrupted,
            0x09 => AllocationFailure,
            0x0a => ArrayIndexOutOfBounds,
            0x0b => UnresolvedType,
            0x0c => UnresolvedMethod,
            0x0d => UnresolvedField,
            _ => UnknownPanicReason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn byte_round_trips_for_every_known_reason() {
        for reason in PanicReason::iter() {
            if reason == PanicReason::UnknownPanicReason {
                continue;
            }
            let byte = reason as u8;
            assert_eq!(PanicReason::from(byte), reason);
        }
    }

    #[test]
    fn unknown_byte_falls_back() {
        assert_eq!(PanicReason::from(0xff), PanicReason::UnknownPanicReason);
    }
}
