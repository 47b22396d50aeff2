//! On-disk table formats for the string, type, method, and field tables
//! (spec §3.3 / §6.1). Every table shares the same shape: a 4-byte
//! little-endian entry count, followed by that many fixed-size records.

use crate::cursor::{write_u32, Cursor};
use crate::error::ModuleError;

/// One entry of the string table: a length-prefixed UTF-8 byte run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringEntry {
    pub bytes: Vec<u8>,
}

/// Type flag bits, spec §3.3.
pub mod type_flags {
    pub const CLASS: u32 = 1 << 0;
    pub const INTERFACE: u32 = 1 << 1;
    pub const RECORD: u32 = 1 << 2;
    pub const ENUM: u32 = 1 << 3;
}

/// Sentinel `super_type_id` meaning "no declared supertype".
pub const NO_SUPERTYPE: u32 = u32::MAX;

/// One entry of the type table (spec §3.3: name, supertype, interfaces,
/// field/method id ranges).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeEntry {
    pub name_id: u32,
    pub super_type_id: u32,
    pub interface_type_ids: Vec<u32>,
    pub field_start: u32,
    pub field_count: u32,
    pub method_start: u32,
    pub method_count: u32,
    pub flags: u32,
}

/// One entry of the method table: owning type, name, signature, and the
/// byte range of its bytecode within the module's single bytecode blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodEntry {
    pub owner_type_id: u32,
    pub name_id: u32,
    pub return_type_id: u32,
    pub param_type_ids: Vec<u32>,
    pub local_count: u32,
    pub bytecode_off: u32,
    pub bytecode_len: u32,
    pub flags: u32,
}

/// Method flag bits, spec §3.3.
pub mod method_flags {
    pub const STATIC: u32 = 1 << 0;
    pub const VIRTUAL: u32 = 1 << 1;
    pub const ASYNC: u32 = 1 << 2;
    /// Implemented by the VM itself rather than by a bytecode body
    /// (`bytecode_len` is 0); the implicit `Sys` class's methods are the
    /// only current users, spec §4.4.
    pub const INTRINSIC: u32 = 1 << 3;
}

/// One entry of the field table: owning type, name, declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEntry {
    pub owner_type_id: u32,
    pub name_id: u32,
    pub type_id: u32,
    pub flags: u32,
}

/// Field flag bits, spec §3.3.
pub mod field_flags {
    pub const STATIC: u32 = 1 << 0;
}

fn write_count_prefixed<T>(buf: &mut Vec<u8>, items: &[T], write_one: impl Fn(&mut Vec<u8>, &T)) {
    write_u32(buf, items.len() as u32);
    for item in items {
        write_one(buf, item);
    }
}

fn write_u32_vec(buf: &mut Vec<u8>, items: &[u32]) {
    write_u32(buf, items.len() as u32);
    for &item in items {
        write_u32(buf, item);
    }
}

fn read_u32_vec(cursor: &mut Cursor<'_>) -> Result<Vec<u32>, ModuleError> {
    let count = cursor.read_u32()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(cursor.read_u32()?);
    }
    Ok(out)
}

pub fn write_string_table(buf: &mut Vec<u8>, strings: &[StringEntry]) {
    write_count_prefixed(buf, strings, |buf, entry| {
        write_u32(buf, entry.bytes.len() as u32);
        buf.extend_from_slice(&entry.bytes);
    });
}

pub fn read_string_table(cursor: &mut Cursor<'_>) -> Result<Vec<StringEntry>, ModuleError> {
    let count = cursor.read_u32()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = cursor.read_u32()? as usize;
        let bytes = cursor.read_bytes(len)?.to_vec();
        out.push(StringEntry { bytes });
    }
    Ok(out)
}

pub fn write_type_table(buf: &mut Vec<u8>, types: &[TypeEntry]) {
    write_count_prefixed(buf, types, |buf, entry| {
        write_u32(buf, entry.name_id);
        write_u32(buf, entry.super_type_id);
        write_u32_vec(buf, &entry.interface_type_ids);
        write_u32(buf, entry.field_start);
        write_u32(buf, entry.field_count);
        write_u32(buf, entry.method_start);
        write_u32(buf, entry.method_count);
        write_u32(buf, entry.flags);
    });
}

pub fn read_type_table(cursor: &mut Cursor<'_>) -> Result<Vec<TypeEntry>, ModuleError> {
    let count = cursor.read_u32()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(TypeEntry {
            name_id: cursor.read_u32()?,
            super_type_id: cursor.read_u32()?,
            interface_type_ids: read_u32_vec(cursor)?,
            field_start: cursor.read_u32()?,
            field_count: cursor.read_u32()?,
            method_start: cursor.read_u32()?,
            method_count: cursor.read_u32()?,
            flags: cursor.read_u32()?,
        });
    }
    Ok(out)
}

pub fn write_method_table(buf: &mut Vec<u8>, methods: &[MethodEntry]) {
    write_count_prefixed(buf, methods, |buf, entry| {
        write_u32(buf, entry.owner_type_id);
        write_u32(buf, entry.name_id);
        write_u32(buf, entry.return_type_id);
        write_u32_vec(buf, &entry.param_type_ids);
        write_u32(buf, entry.local_count);
        write_u32(buf, entry.bytecode_off);
        write_u32(buf, entry.bytecode_len);
        write_u32(buf, entry.flags);
    });
}

pub fn read_method_table(cursor: &mut Cursor<'_>) -> Result<Vec<MethodEntry>, ModuleError> {
    let count = cursor.read_u32()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(MethodEntry {
            owner_type_id: cursor.read_u32()?,
            name_id: cursor.read_u32()?,
            return_type_id: cursor.read_u32()?,
            param_type_ids: read_u32_vec(cursor)?,
            local_count: cursor.read_u32()?,
            bytecode_off: cursor.read_u32()?,
            bytecode_len: cursor.read_u32()?,
            flags: cursor.read_u32()?,
        });
    }
    Ok(out)
}

pub fn write_field_table(buf: &mut Vec<u8>, fields: &[FieldEntry]) {
    write_count_prefixed(buf, fields, |buf, entry| {
        write_u32(buf, entry.owner_type_id);
        write_u32(buf, entry.name_id);
        write_u32(buf, entry.type_id);
        write_u32(buf, entry.flags);
    });
}

pub fn read_field_table(cursor: &mut Cursor<'_>) -> Result<Vec<FieldEntry>, ModuleError> {
    let count = cursor.read_u32()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(FieldEntry {
            owner_type_id: cursor.read_u32()?,
            name_id: cursor.read_u32()?,
            type_id: cursor.read_u32()?,
            flags: cursor.read_u32()?,
        });
    }
    Ok(out)
}
