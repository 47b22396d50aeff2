use core::fmt;

use crate::opcode::Opcode;

/// A single decoded bytecode instruction: an opcode byte followed by
/// exactly `opcode.operand_width()` little-endian 32-bit operand words.
///
/// Per spec §4.3 the operand count is a static property of the opcode;
/// `Instruction` never carries more than one operand word because no
/// opcode in the published table needs more than one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction {
    opcode: Opcode,
    operand: u32,
}

/// Errors raised while decoding a raw byte stream into instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The byte at the given offset does not map to a known [`Opcode`].
    #[error("unknown opcode byte {byte:#04x} at offset {offset}")]
    UnknownOpcode {
        /// The unrecognised byte.
        byte: u8,
        /// Its offset within the buffer being decoded.
        offset: usize,
    },
    /// The buffer ended before the opcode's expected operand bytes did.
    #[error("truncated instruction at offset {offset}: expected {expected} more byte(s)")]
    Truncated {
        /// Offset of the opcode byte that was truncated.
        offset: usize,
        /// How many more bytes were expected.
        expected: usize,
    },
}

impl Instruction {
    /// Build an instruction carrying no operand. Panics in debug builds if
    /// the opcode actually expects one; see [`Instruction::with_operand`].
    pub fn bare(opcode: Opcode) -> Self {
        debug_assert_eq!(opcode.operand_width(), 0, "{opcode} expects an operand");
        Self { opcode, operand: 0 }
    }

    /// Build an instruction carrying a single 32-bit operand.
    pub fn with_operand(opcode: Opcode, operand: u32) -> Self {
        debug_assert_eq!(opcode.operand_width(), 1, "{opcode} expects no operand");
        Self { opcode, operand }
    }

    /// The instruction's opcode.
    pub const fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// The instruction's operand word. Zero for opcodes with no operand.
    pub const fn operand(&self) -> u32 {
        self.operand
    }

    /// Total encoded size in bytes: one opcode byte plus the opcode's
    /// operand width in 32-bit words, each 4 bytes.
    pub const fn encoded_len(&self) -> usize {
        crate::OPCODE_WIDTH + self.opcode.operand_width() * crate::OPERAND_WIDTH
    }

    /// Append this instruction's encoding to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.opcode as u8);
        if self.opcode.operand_width() == 1 {
            buf.extend_from_slice(&self.operand.to_le_bytes());
        }
    }

    /// Decode one instruction starting at `bytes[offset]`. Returns the
    /// instruction and the offset immediately following it.
    pub fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
        let byte = *bytes
            .get(offset)
            .ok_or(DecodeError::Truncated { offset, expected: 1 })?;
        let opcode = Opcode::try_from(byte).map_err(|byte| DecodeError::UnknownOpcode {
            byte,
            offset,
        })?;
        let width = opcode.operand_width();
        if width == 0 {
            return Ok((Self::bare(opcode), offset + 1));
        }
        let start = offset + 1;
        let end = start + crate::OPERAND_WIDTH;
        let operand_bytes =
            bytes
                .get(start..end)
                .ok_or(DecodeError::Truncated {
                    offset,
                    expected: crate::OPERAND_WIDTH,
                })?;
        let operand = u32::from_le_bytes(operand_bytes.try_into().expect("checked length"));
        Ok((Self::with_operand(opcode, operand), end))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.opcode.operand_width() == 0 {
            write!(f, "{}", self.opcode)
        } else {
            write!(f, "{} {}", self.opcode, self.operand)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_instruction_round_trips() {
        let instr = Instruction::bare(Opcode::Add);
        let mut buf = Vec::new();
        instr.encode(&mut buf);
        assert_eq!(buf, vec![Opcode::Add as u8]);
        let (decoded, consumed) = Instruction::decode(&buf, 0).unwrap();
        assert_eq!(decoded, instr);
        assert_eq!(consumed, 1);
    }

    #[test]
    fn operand_instruction_round_trips() {
        let instr = Instruction::with_operand(Opcode::LoadLocal, 7);
        let mut buf = Vec::new();
        instr.encode(&mut buf);
        assert_eq!(buf.len(), 5);
        let (decoded, consumed) = Instruction::decode(&buf, 0).unwrap();
        assert_eq!(decoded, instr);
        assert_eq!(consumed, 5);
    }

    #[test]
    fn truncated_operand_is_an_error() {
        let buf = vec![Opcode::Jmp as u8, 0x01, 0x02];
        let err = Instruction::decode(&buf, 0).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        let buf = vec![0x09];
        let err = Instruction::decode(&buf, 0).unwrap_err();
        assert_eq!(err, DecodeError::UnknownOpcode { byte: 0x09, offset: 0 });
    }

    #[test]
    fn sequence_decodes_end_to_end() {
        // PUSH_CONSTANT 42; RETURN_VALUE -- scenario 1 of spec §8.
        let mut buf = Vec::new();
        Instruction::with_operand(Opcode::PushConstant, 0).encode(&mut buf);
        Instruction::bare(Opcode::ReturnValue).encode(&mut buf);

        let mut offset = 0;
        let mut decoded = Vec::new();
        while offset < buf.len() {
            let (instr, next) = Instruction::decode(&buf, offset).unwrap();
            decoded.push(instr);
            offset = next;
        }
        assert_eq!(
            decoded,
            vec![
                Instruction::with_operand(Opcode::PushConstant, 0),
                Instruction::bare(Opcode::ReturnValue),
            ]
        );
    }
}
