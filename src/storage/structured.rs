//! Structured file I/O for binary data serialization.
//!
//! Every index file is built from the same primitives: fixed-width
//! little-endian integers for absolute pointers, 7-bit variable-length
//! integers for counts and deltas, and length-prefixed UTF-8 strings. Files
//! that form the root of recovery (`segments`, `deletable`) additionally
//! carry a CRC32 trailer.

use std::io::{Read, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{FolioError, Result};
use crate::storage::{StorageInput, StorageOutput};
use crate::util::varint::{self, MAX_VARINT64_LEN};

/// A structured file writer for binary data.
#[derive(Debug)]
pub struct StructWriter<W: StorageOutput> {
    writer: W,
    hasher: Option<crc32fast::Hasher>,
}

impl<W: StorageOutput> StructWriter<W> {
    /// Create a new structured file writer.
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: None,
        }
    }

    /// Create a writer that accumulates a CRC32 over everything written.
    pub fn with_checksum(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: Some(crc32fast::Hasher::new()),
        }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(bytes);
        }
        Ok(())
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.put(&[value])
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.put(&value.to_le_bytes())
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.put(&value.to_le_bytes())
    }

    /// Write a variable-length u32.
    pub fn write_vint(&mut self, value: u32) -> Result<()> {
        self.write_vlong(value as u64)
    }

    /// Write a variable-length u64.
    pub fn write_vlong(&mut self, value: u64) -> Result<()> {
        let mut buf = [0u8; MAX_VARINT64_LEN];
        let len = varint::encode_into(value, &mut buf);
        self.put(&buf[..len])
    }

    /// Write a string with length prefix.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Write raw bytes with length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_vint(value.len() as u32)?;
        self.put(value)
    }

    /// Write raw bytes without length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.put(value)
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.writer.position()
    }

    /// Move the write position, typically to patch a placeholder.
    pub fn seek(&mut self, position: u64) -> Result<()> {
        if self.hasher.is_some() {
            return Err(FolioError::invalid_operation(
                "cannot seek a checksummed writer",
            ));
        }
        self.writer.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    /// Flush and close the writer.
    pub fn close(mut self) -> Result<()> {
        if let Some(hasher) = self.hasher.take() {
            let checksum = hasher.finalize();
            self.writer.write_u32::<LittleEndian>(checksum)?;
        }
        self.writer.close()
    }
}

/// A structured file reader for binary data.
#[derive(Debug, Clone)]
pub struct StructReader<R: StorageInput> {
    reader: R,
    hasher: Option<crc32fast::Hasher>,
    file_size: u64,
}

impl<R: StorageInput> StructReader<R> {
    /// Create a new structured file reader.
    pub fn new(reader: R) -> Self {
        let file_size = reader.size();
        StructReader {
            reader,
            hasher: None,
            file_size,
        }
    }

    /// Create a reader that verifies a CRC32 trailer.
    pub fn with_checksum(reader: R) -> Self {
        let mut reader = Self::new(reader);
        reader.hasher = Some(crc32fast::Hasher::new());
        reader
    }

    fn take(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reader.read_exact(buf)?;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(buf);
        }
        Ok(())
    }

    /// Read a u8 value.
    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.take(&mut buf)?;
        Ok(buf[0])
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.take(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read a u64 value (little-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.take(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a variable-length u32.
    pub fn read_vint(&mut self) -> Result<u32> {
        let value = self.read_vlong()?;
        u32::try_from(value).map_err(|_| FolioError::corrupt("VarInt overflow"))
    }

    /// Read a variable-length u64.
    pub fn read_vlong(&mut self) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0;

        loop {
            let byte = self.read_u8()?;
            if shift >= 64 {
                return Err(FolioError::corrupt("VarInt overflow"));
            }
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    /// Read a string with length prefix.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|e| FolioError::corrupt(format!("Invalid UTF-8: {e}")))
    }

    /// Read bytes with length prefix.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let length = self.read_vint()? as usize;
        self.read_raw(length)
    }

    /// Read exact number of raw bytes.
    pub fn read_raw(&mut self, length: usize) -> Result<Vec<u8>> {
        if self.position() + length as u64 > self.file_size {
            return Err(FolioError::corrupt(format!(
                "read past end of file ({} + {length} > {})",
                self.position(),
                self.file_size
            )));
        }
        let mut bytes = vec![0u8; length];
        self.take(&mut bytes)?;
        Ok(bytes)
    }

    /// Read raw bytes into an existing buffer.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        self.take(buf)
    }

    /// Skip over a length-prefixed value without materializing it.
    pub fn skip_bytes(&mut self) -> Result<()> {
        let length = self.read_vint()? as u64;
        let target = self.position() + length;
        self.seek(target)
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.reader.position()
    }

    /// Move the read position.
    pub fn seek(&mut self, position: u64) -> Result<()> {
        if self.hasher.is_some() {
            return Err(FolioError::invalid_operation(
                "cannot seek a checksummed reader",
            ));
        }
        self.reader.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    /// Get file size.
    pub fn size(&self) -> u64 {
        self.file_size
    }

    /// Check if we're at end of file.
    pub fn is_eof(&self) -> bool {
        self.position() >= self.file_size
    }

    /// Verify the CRC32 trailer against everything read so far.
    pub fn verify_checksum(&mut self) -> Result<()> {
        let Some(hasher) = self.hasher.take() else {
            return Err(FolioError::invalid_operation(
                "reader was not created with a checksum",
            ));
        };
        if self.position() + 4 > self.file_size {
            return Err(FolioError::corrupt("File too short for checksum"));
        }
        let stored = self.reader.read_u32::<LittleEndian>()?;
        let actual = hasher.finalize();
        if stored != actual {
            return Err(FolioError::corrupt(format!(
                "checksum mismatch (stored {stored:#010x}, computed {actual:#010x})"
            )));
        }
        Ok(())
    }

    /// Access the underlying input.
    pub fn inner(&self) -> &R {
        &self.reader
    }

    /// Close the reader.
    pub fn close(mut self) -> Result<()> {
        self.reader.close()
    }
}
