//! Variable-length integer encoding utilities.
//!
//! Integers are written 7 bits per byte, low-order group first, with the high
//! bit of each byte set when more bytes follow. Document deltas, term counts
//! and pointer deltas all use this encoding.

use std::io::{Read, Write};

use byteorder::ReadBytesExt;

use crate::error::{FolioError, Result};

/// Maximum encoded length of a u32.
pub const MAX_VARINT32_LEN: usize = 5;

/// Maximum encoded length of a u64.
pub const MAX_VARINT64_LEN: usize = 10;

/// Encode a u64 value into `buf`, returning the number of bytes used.
pub fn encode_into(value: u64, buf: &mut [u8; MAX_VARINT64_LEN]) -> usize {
    let mut val = value;
    let mut len = 0;

    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;

        if val != 0 {
            byte |= 0x80;
        }

        buf[len] = byte;
        len += 1;

        if val == 0 {
            return len;
        }
    }
}

/// Encode a u32 value using variable-length encoding.
pub fn encode_u32(value: u32) -> Vec<u8> {
    encode_u64(value as u64)
}

/// Encode a u64 value using variable-length encoding.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut buf = [0u8; MAX_VARINT64_LEN];
    let len = encode_into(value, &mut buf);
    buf[..len].to_vec()
}

/// Decode a u32 value from variable-length encoding.
pub fn decode_u32(bytes: &[u8]) -> Result<(u32, usize)> {
    let (value, read) = decode_u64(bytes)?;
    let value = u32::try_from(value).map_err(|_| FolioError::corrupt("VarInt overflow"))?;
    Ok((value, read))
}

/// Decode a u64 value from variable-length encoding.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;

    for (i, &byte) in bytes.iter().enumerate() {
        if shift >= 64 {
            return Err(FolioError::corrupt("VarInt overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, i + 1));
        }

        shift += 7;
    }

    Err(FolioError::corrupt("Incomplete VarInt"))
}

/// Write a variable-length encoded u32 to a writer.
pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<usize> {
    write_u64(writer, value as u64)
}

/// Write a variable-length encoded u64 to a writer.
pub fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<usize> {
    let mut buf = [0u8; MAX_VARINT64_LEN];
    let len = encode_into(value, &mut buf);
    writer.write_all(&buf[..len])?;
    Ok(len)
}

/// Read a variable-length encoded u32 from a reader.
pub fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let value = read_u64(reader)?;
    u32::try_from(value).map_err(|_| FolioError::corrupt("VarInt overflow"))
}

/// Read a variable-length encoded u64 from a reader.
pub fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0;

    loop {
        let byte = reader.read_u8()?;

        if shift >= 64 {
            return Err(FolioError::corrupt("VarInt overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok(result);
        }

        shift += 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_encode_decode_boundaries() {
        let test_values = [0, 1, 127, 128, 255, 256, 16383, 16384, u32::MAX as u64, u64::MAX];

        for &value in &test_values {
            let encoded = encode_u64(value);
            let (decoded, bytes_read) = decode_u64(&encoded).unwrap();

            assert_eq!(value, decoded);
            assert_eq!(encoded.len(), bytes_read);
        }
    }

    #[test]
    fn test_write_read_stream() {
        let mut buffer = Vec::new();
        write_u32(&mut buffer, 12345).unwrap();
        write_u64(&mut buffer, 123456789012345).unwrap();
        write_u32(&mut buffer, 0).unwrap();

        let mut cursor = Cursor::new(buffer);
        assert_eq!(read_u32(&mut cursor).unwrap(), 12345);
        assert_eq!(read_u64(&mut cursor).unwrap(), 123456789012345);
        assert_eq!(read_u32(&mut cursor).unwrap(), 0);
    }

    #[test]
    fn test_encoding_efficiency() {
        assert_eq!(encode_u32(0).len(), 1);
        assert_eq!(encode_u32(127).len(), 1);
        assert_eq!(encode_u32(128).len(), 2);
        assert_eq!(encode_u32(16383).len(), 2);
        assert_eq!(encode_u32(16384).len(), 3);
        assert_eq!(encode_u32(u32::MAX).len(), MAX_VARINT32_LEN);
        assert_eq!(encode_u64(u64::MAX).len(), MAX_VARINT64_LEN);
    }

    #[test]
    fn test_incomplete_varint() {
        let incomplete = vec![0x80];
        assert!(decode_u32(&incomplete).is_err());
        assert!(decode_u64(&incomplete).is_err());
    }

    #[test]
    fn test_u32_overflow() {
        let too_big = encode_u64(u32::MAX as u64 + 1);
        assert!(decode_u32(&too_big).is_err());
        assert!(read_u32(&mut Cursor::new(too_big)).is_err());
    }
}
