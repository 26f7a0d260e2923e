pub mod files_merger;
pub mod varint;

pub use files_merger::FilesMerger;
pub use varint::{
    read_varint, read_varuint, write_varint, write_varuint, MAX_VARUINT64_BYTES,
};

use crate::CoreError;
use std::io::{Read, Write};

/// Little-endian primitive framing shared by every on-disk structure in the
/// workspace. All binary artifacts refuse to run on big-endian hosts (checked
/// once at process startup), so serialization is plain LE byte copies.
pub fn write_u8<W: Write>(sink: &mut W, value: u8) -> Result<(), CoreError> {
    sink.write_all(&[value])
        .map_err(CoreError::io("write u8"))
}

pub fn write_u32<W: Write>(sink: &mut W, value: u32) -> Result<(), CoreError> {
    sink.write_all(&value.to_le_bytes())
        .map_err(CoreError::io("write u32"))
}

pub fn write_u64<W: Write>(sink: &mut W, value: u64) -> Result<(), CoreError> {
    sink.write_all(&value.to_le_bytes())
        .map_err(CoreError::io("write u64"))
}

pub fn read_u8<R: Read>(source: &mut R) -> Result<u8, CoreError> {
    let mut buf = [0u8; 1];
    source
        .read_exact(&mut buf)
        .map_err(CoreError::io("read u8"))?;
    Ok(buf[0])
}

pub fn read_u32<R: Read>(source: &mut R) -> Result<u32, CoreError> {
    let mut buf = [0u8; 4];
    source
        .read_exact(&mut buf)
        .map_err(CoreError::io("read u32"))?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_u64<R: Read>(source: &mut R) -> Result<u64, CoreError> {
    let mut buf = [0u8; 8];
    source
        .read_exact(&mut buf)
        .map_err(CoreError::io("read u64"))?;
    Ok(u64::from_le_bytes(buf))
}

pub fn write_string<W: Write>(sink: &mut W, value: &str) -> Result<(), CoreError> {
    write_varuint(sink, value.len() as u64)?;
    sink.write_all(value.as_bytes())
        .map_err(CoreError::io("write string"))
}

pub fn read_string<R: Read>(source: &mut R) -> Result<String, CoreError> {
    let len = read_varuint(source)? as usize;
    let mut buf = vec![0u8; len];
    source
        .read_exact(&mut buf)
        .map_err(CoreError::io("read string"))?;
    String::from_utf8(buf).map_err(|e| CoreError::BadFormat(format!("non-utf8 string: {e}")))
}

/// Host endianness guard. Every binary artifact is little-endian on disk and
/// read back by direct byte reinterpretation.
pub fn is_little_endian() -> bool {
    cfg!(target_endian = "little")
}
