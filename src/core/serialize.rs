// Binary serialization helpers shared by storage and the wire protocol

use crate::core::Hash256;
use crate::error::{NodeError, Result};
use std::io::{self, Read, Write};

/// Largest length prefix accepted when decoding untrusted bytes
pub const MAX_VAR_BYTES: u64 = 32 * 1024 * 1024;

/// Trait for serializable types
pub trait Serializable {
    fn serialize(&self) -> Vec<u8>;
    fn deserialize(data: &[u8]) -> Result<Self> where Self: Sized;
}

/// Write a variable-length integer (VarInt)
pub fn write_varint<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    match value {
        0..=0xfc => {
            writer.write_all(&[value as u8])?;
        }
        0xfd..=0xffff => {
            writer.write_all(&[0xfd])?;
            writer.write_all(&(value as u16).to_le_bytes())?;
        }
        0x10000..=0xffffffff => {
            writer.write_all(&[0xfe])?;
            writer.write_all(&(value as u32).to_le_bytes())?;
        }
        _ => {
            writer.write_all(&[0xff])?;
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Read a variable-length integer (VarInt)
pub fn read_varint<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let mut first_byte = [0u8; 1];
    reader.read_exact(&mut first_byte)?;

    match first_byte[0] {
        0..=0xfc => Ok(first_byte[0] as u64),
        0xfd => {
            let mut bytes = [0u8; 2];
            reader.read_exact(&mut bytes)?;
            Ok(u16::from_le_bytes(bytes) as u64)
        }
        0xfe => {
            let mut bytes = [0u8; 4];
            reader.read_exact(&mut bytes)?;
            Ok(u32::from_le_bytes(bytes) as u64)
        }
        0xff => {
            let mut bytes = [0u8; 8];
            reader.read_exact(&mut bytes)?;
            Ok(u64::from_le_bytes(bytes))
        }
    }
}

/// Write bytes with length prefix (VarInt length + data)
pub fn write_var_bytes<W: Write>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    write_varint(writer, data.len() as u64)?;
    writer.write_all(data)?;
    Ok(())
}

/// Read bytes with length prefix
pub fn read_var_bytes<R: Read + ?Sized>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = read_varint(reader)?;
    if len > MAX_VAR_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("length prefix {} exceeds limit", len),
        ));
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data)?;
    Ok(data)
}

pub fn write_var_str<W: Write>(writer: &mut W, s: &str) -> io::Result<()> {
    write_var_bytes(writer, s.as_bytes())
}

pub fn read_var_str<R: Read + ?Sized>(reader: &mut R) -> Result<String> {
    let bytes = read_var_bytes(reader).map_err(NodeError::serialization)?;
    String::from_utf8(bytes).map_err(NodeError::serialization)
}

pub fn read_hash<R: Read + ?Sized>(reader: &mut R) -> Result<Hash256> {
    Ok(Hash256::new(read_array(reader)?))
}

pub fn read_array<R: Read + ?Sized, const N: usize>(reader: &mut R) -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes).map_err(NodeError::serialization)?;
    Ok(bytes)
}

pub fn read_u32_le<R: Read + ?Sized>(reader: &mut R) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(reader)?))
}

pub fn read_u64_le<R: Read + ?Sized>(reader: &mut R) -> Result<u64> {
    Ok(u64::from_le_bytes(read_array(reader)?))
}

/// Fail if a decoder left bytes behind
pub fn ensure_consumed(cursor: &io::Cursor<&[u8]>) -> Result<()> {
    let len = cursor.get_ref().len() as u64;
    if cursor.position() != len {
        return Err(NodeError::Serialization(format!(
            "{} trailing bytes",
            len - cursor.position()
        )));
    }
    Ok(())
}
