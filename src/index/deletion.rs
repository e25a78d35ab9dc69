//! Per-segment deletion bitmaps (`.del`).
//!
//! A set bit marks a tombstoned document. Deleted documents keep their
//! numbers until a merge drops them. The bitmap is persisted next to the
//! segment:
//!
//! ```text
//! u32 magic "DELB", u32 format, u32 doc count, u32 deleted count, bytes bits
//! ```

use bit_vec::BitVec;

use crate::error::{FolioError, Result};
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};

const DELETION_MAGIC: u32 = 0x44454C42;
const DELETION_FORMAT: u32 = 1;

/// A bitmap-based deletion tracker for a segment.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletionBitmap {
    /// Bitmap of deleted documents (bit set = deleted).
    deleted_docs: BitVec,

    /// Number of deleted documents.
    deleted_count: u32,
}

impl DeletionBitmap {
    /// Create an empty bitmap for a segment of `total_docs` documents.
    pub fn new(total_docs: u32) -> Self {
        DeletionBitmap {
            deleted_docs: BitVec::from_elem(total_docs as usize, false),
            deleted_count: 0,
        }
    }

    /// Mark a document as deleted. Returns whether it was live before.
    pub fn delete(&mut self, doc: u32) -> Result<bool> {
        if doc as usize >= self.deleted_docs.len() {
            return Err(FolioError::index(format!(
                "document {doc} out of range (segment holds {})",
                self.deleted_docs.len()
            )));
        }

        let was_deleted = self.deleted_docs.get(doc as usize).unwrap_or(false);
        if !was_deleted {
            self.deleted_docs.set(doc as usize, true);
            self.deleted_count += 1;
        }
        Ok(!was_deleted)
    }

    /// Check if a document is deleted.
    pub fn is_deleted(&self, doc: u32) -> bool {
        self.deleted_docs.get(doc as usize).unwrap_or(false)
    }

    /// Number of deleted documents.
    pub fn count(&self) -> u32 {
        self.deleted_count
    }

    /// Number of documents covered.
    pub fn len(&self) -> u32 {
        self.deleted_docs.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.deleted_docs.is_empty()
    }

    /// Write the bitmap to `name`.
    pub fn write(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        let mut writer = StructWriter::new(storage.create_output(name)?);
        writer.write_u32(DELETION_MAGIC)?;
        writer.write_u32(DELETION_FORMAT)?;
        writer.write_u32(self.len())?;
        writer.write_u32(self.deleted_count)?;
        writer.write_bytes(&self.deleted_docs.to_bytes())?;
        writer.close()
    }

    /// Read a bitmap written by [`write`](Self::write).
    pub fn read(storage: &dyn Storage, name: &str) -> Result<Self> {
        let mut reader = StructReader::new(storage.open_input(name)?);

        if reader.read_u32()? != DELETION_MAGIC {
            return Err(FolioError::corrupt(format!("{name} is not a deletion bitmap")));
        }
        let format = reader.read_u32()?;
        if format != DELETION_FORMAT {
            return Err(FolioError::corrupt(format!(
                "unsupported deletion bitmap format {format} in {name}"
            )));
        }

        let total_docs = reader.read_u32()? as usize;
        let deleted_count = reader.read_u32()?;
        let mut deleted_docs = BitVec::from_bytes(&reader.read_bytes()?);
        if deleted_docs.len() < total_docs {
            return Err(FolioError::corrupt(format!(
                "{name} holds {} bits for {total_docs} documents",
                deleted_docs.len()
            )));
        }
        deleted_docs.truncate(total_docs);

        let actual = deleted_docs.iter().filter(|bit| *bit).count() as u32;
        if actual != deleted_count {
            return Err(FolioError::corrupt(format!(
                "{name} records {deleted_count} deletions but has {actual} bits set"
            )));
        }

        Ok(DeletionBitmap {
            deleted_docs,
            deleted_count,
        })
    }
}
