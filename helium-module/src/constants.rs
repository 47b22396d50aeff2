//! The per-module constant pool.
//!
//! Resolves spec §9's "PUSH_CONSTANT operand width" open question as
//! option (b): `PUSH_CONSTANT`'s 4-byte operand is never the literal
//! value itself, it is always an index into this pool, so a 64-bit
//! `I64`/`F64` literal never has to be truncated to fit the fixed
//! instruction width.

use crate::cursor::{write_u32, Cursor};
use crate::error::ModuleError;
use std::collections::HashMap;

/// One constant-pool slot. `StringRef` stores a string-table id rather
/// than inline bytes, so the pool and the string table never duplicate
/// the same bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstantEntry {
    I64(i64),
    F64(f64),
    Bool(bool),
    StringRef(u32),
    Null,
}

const TAG_I64: u8 = 0;
const TAG_F64: u8 = 1;
const TAG_BOOL: u8 = 2;
const TAG_STRING_REF: u8 = 3;
const TAG_NULL: u8 = 4;

impl ConstantEntry {
    fn write(&self, buf: &mut Vec<u8>) {
        match self {
            ConstantEntry::I64(v) => {
                buf.push(TAG_I64);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            ConstantEntry::F64(v) => {
                buf.push(TAG_F64);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            ConstantEntry::Bool(v) => {
                buf.push(TAG_BOOL);
                buf.push(*v as u8);
            }
            ConstantEntry::StringRef(id) => {
                buf.push(TAG_STRING_REF);
                write_u32(buf, *id);
            }
            ConstantEntry::Null => {
                buf.push(TAG_NULL);
            }
        }
    }

    fn read(cursor: &mut Cursor<'_>) -> Result<Self, ModuleError> {
        let tag = cursor.read_bytes(1)?[0];
        Ok(match tag {
            TAG_I64 => {
                let bytes = cursor.read_bytes(8)?;
                ConstantEntry::I64(i64::from_le_bytes(bytes.try_into().expect("len 8")))
            }
            TAG_F64 => {
                let bytes = cursor.read_bytes(8)?;
                ConstantEntry::F64(f64::from_le_bytes(bytes.try_into().expect("len 8")))
            }
            TAG_BOOL => ConstantEntry::Bool(cursor.read_bytes(1)?[0] != 0),
            TAG_STRING_REF => ConstantEntry::StringRef(cursor.read_u32()?),
            TAG_NULL => ConstantEntry::Null,
            _ => return Err(ModuleError::MalformedStringTable),
        })
    }
}

/// A module's deduplicated table of literal constants, indexed by the
/// 4-byte operand `PUSH_CONSTANT` carries.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    entries: Vec<ConstantEntry>,
    index: HashMap<ConstantKey, u32>,
}

/// Hashable key mirroring [`ConstantEntry`]; floats are compared by bit
/// pattern so `NaN` still dedups against an identical `NaN` literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ConstantKey {
    I64(i64),
    F64Bits(u64),
    Bool(bool),
    StringRef(u32),
    Null,
}

impl From<ConstantEntry> for ConstantKey {
    fn from(entry: ConstantEntry) -> Self {
        match entry {
            ConstantEntry::I64(v) => ConstantKey::I64(v),
            ConstantEntry::F64(v) => ConstantKey::F64Bits(v.to_bits()),
            ConstantEntry::Bool(v) => ConstantKey::Bool(v),
            ConstantEntry::StringRef(id) => ConstantKey::StringRef(id),
            ConstantEntry::Null => ConstantKey::Null,
        }
    }
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a constant, returning its pool index. Idempotent for
    /// identical entries (spec §8's interning law, extended to constants).
    pub fn intern(&mut self, entry: ConstantEntry) -> u32 {
        let key = ConstantKey::from(entry);
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = self.entries.len() as u32;
        self.entries.push(entry);
        self.index.insert(key, id);
        id
    }

    pub fn get(&self, id: u32) -> Option<&ConstantEntry> {
        self.entries.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ConstantEntry] {
        &self.entries
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        write_u32(buf, self.entries.len() as u32);
        for entry in &self.entries {
            entry.write(buf);
        }
    }

    pub fn read(cursor: &mut Cursor<'_>) -> Result<Self, ModuleError> {
        let count = cursor.read_u32()?;
        let mut pool = ConstantPool::new();
        for _ in 0..count {
            let entry = ConstantEntry::read(cursor)?;
            pool.intern(entry);
        }
        Ok(pool)
    }

    /// Re-key every [`ConstantEntry::StringRef`] through `remap`, used
    /// when merging per-unit pools into one module-wide pool whose
    /// string table has been concatenated.
    pub fn remap_string_refs(&mut self, remap: impl Fn(u32) -> u32) {
        for entry in &mut self.entries {
            if let ConstantEntry::StringRef(id) = entry {
                *id = remap(*id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn interning_an_i64_is_idempotent(v: i64) -> bool {
        let mut pool = ConstantPool::new();
        let a = pool.intern(ConstantEntry::I64(v));
        let b = pool.intern(ConstantEntry::I64(v));
        a == b && pool.len() == 1
    }

    #[quickcheck]
    fn interned_i64_round_trips_through_get(v: i64) -> bool {
        let mut pool = ConstantPool::new();
        let id = pool.intern(ConstantEntry::I64(v));
        pool.get(id) == Some(&ConstantEntry::I64(v))
    }

    #[quickcheck]
    fn interning_string_refs_is_idempotent(id: u32) -> bool {
        let mut pool = ConstantPool::new();
        let a = pool.intern(ConstantEntry::StringRef(id));
        let b = pool.intern(ConstantEntry::StringRef(id));
        a == b && pool.len() == 1
    }

    #[test]
    fn interning_is_idempotent() {
        let mut pool = ConstantPool::new();
        let a = pool.intern(ConstantEntry::I64(42));
        let b = pool.intern(ConstantEntry::I64(42));
        assert_eq!(a, b);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn distinct_constants_get_distinct_ids() {
        let mut pool = ConstantPool::new();
        let a = pool.intern(ConstantEntry::I64(1));
        let b = pool.intern(ConstantEntry::I64(2));
        assert_ne!(a, b);
    }

    #[test]
    fn pool_round_trips() {
        let mut pool = ConstantPool::new();
        pool.intern(ConstantEntry::I64(42));
        pool.intern(ConstantEntry::F64(3.5));
        pool.intern(ConstantEntry::Bool(true));
        pool.intern(ConstantEntry::StringRef(7));
        pool.intern(ConstantEntry::Null);
        let mut buf = Vec::new();
        pool.write(&mut buf);
        let mut cursor = Cursor::new(&buf);
        let read_back = ConstantPool::read(&mut cursor).unwrap();
        assert_eq!(read_back.entries(), pool.entries());
    }
}
