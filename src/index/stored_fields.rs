//! Stored field values (`.fdt`) and their per-document index (`.fdx`).
//!
//! `.fdx` holds one u64 per document: the offset of that document's record
//! in `.fdt`. A record is:
//!
//! ```text
//! vint   stored field count
//! field* (vint field number, u8 flags, value)
//! ```
//!
//! Flags: 0x1 tokenized, 0x2 binary, 0x4 compressed. Text values are
//! length-prefixed UTF-8, binary values length-prefixed bytes. Compressed
//! values are LZ4 blocks with the uncompressed size prepended.

use std::sync::Arc;

use crate::document::{Document, Field, FieldKind, FieldValue};
use crate::error::{FolioError, Result};
use crate::index::field_infos::FieldInfos;
use crate::index::segment_file_name;
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{Storage, StorageInput, StorageOutput};

const FIELD_IS_TOKENIZED: u8 = 0x1;
const FIELD_IS_BINARY: u8 = 0x2;
const FIELD_IS_COMPRESSED: u8 = 0x4;

/// Appends documents' stored fields to a segment.
#[derive(Debug)]
pub struct StoredFieldsWriter {
    fdt: StructWriter<Box<dyn StorageOutput>>,
    fdx: StructWriter<Box<dyn StorageOutput>>,
    doc_count: u32,
}

impl StoredFieldsWriter {
    pub fn new(storage: &dyn Storage, segment: &str) -> Result<Self> {
        Ok(StoredFieldsWriter {
            fdt: StructWriter::new(storage.create_output(&segment_file_name(segment, "fdt"))?),
            fdx: StructWriter::new(storage.create_output(&segment_file_name(segment, "fdx"))?),
            doc_count: 0,
        })
    }

    /// Append the stored fields of `doc`. Every field must be registered in
    /// `field_infos`.
    pub fn add_document(&mut self, doc: &Document, field_infos: &FieldInfos) -> Result<()> {
        self.fdx.write_u64(self.fdt.position())?;

        let stored: Vec<&Field> = doc.fields().iter().filter(|f| f.is_stored()).collect();
        self.fdt.write_vint(stored.len() as u32)?;

        for field in stored {
            let number = field_infos.field_number(field.name()).ok_or_else(|| {
                FolioError::field(format!("field {} is not registered", field.name()))
            })?;
            self.fdt.write_vint(number)?;

            let mut flags = 0;
            if field.is_tokenized() {
                flags |= FIELD_IS_TOKENIZED;
            }
            if field.value().is_binary() {
                flags |= FIELD_IS_BINARY;
            }
            if field.is_compressed() {
                flags |= FIELD_IS_COMPRESSED;
            }
            self.fdt.write_u8(flags)?;

            let bytes: &[u8] = match field.value() {
                FieldValue::Text(text) => text.as_bytes(),
                FieldValue::Binary(bytes) => bytes,
            };
            if field.is_compressed() {
                self.fdt.write_bytes(&lz4_flex::compress_prepend_size(bytes))?;
            } else {
                self.fdt.write_bytes(bytes)?;
            }
        }

        self.doc_count += 1;
        Ok(())
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    pub fn close(self) -> Result<()> {
        self.fdt.close()?;
        self.fdx.close()
    }
}

/// Random access to a segment's stored documents.
#[derive(Debug, Clone)]
pub struct StoredFieldsReader {
    field_infos: Arc<FieldInfos>,
    fdt: StructReader<Box<dyn StorageInput>>,
    fdx: StructReader<Box<dyn StorageInput>>,
    size: u32,
}

impl StoredFieldsReader {
    pub fn open(storage: &dyn Storage, segment: &str, field_infos: Arc<FieldInfos>) -> Result<Self> {
        let fdt = StructReader::new(storage.open_input(&segment_file_name(segment, "fdt"))?);
        let fdx = StructReader::new(storage.open_input(&segment_file_name(segment, "fdx"))?);
        if fdx.size() % 8 != 0 {
            return Err(FolioError::corrupt(format!(
                "{segment}.fdx length {} is not a multiple of 8",
                fdx.size()
            )));
        }
        let size = (fdx.size() / 8) as u32;
        Ok(StoredFieldsReader {
            field_infos,
            fdt,
            fdx,
            size,
        })
    }

    /// Number of documents in the segment.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Load every stored field of document `n`.
    pub fn doc(&mut self, n: u32) -> Result<Document> {
        self.load(n, |_| true)
    }

    /// Load only the named fields of document `n`, skipping the rest.
    pub fn doc_fields(&mut self, n: u32, fields: &[&str]) -> Result<Document> {
        self.load(n, |name| fields.contains(&name))
    }

    fn load(&mut self, n: u32, wanted: impl Fn(&str) -> bool) -> Result<Document> {
        if n >= self.size {
            return Err(FolioError::index(format!(
                "document {n} out of range (segment holds {})",
                self.size
            )));
        }
        self.fdx.seek(n as u64 * 8)?;
        let pointer = self.fdx.read_u64()?;
        self.fdt.seek(pointer)?;

        let mut doc = Document::new();
        let count = self.fdt.read_vint()?;
        for _ in 0..count {
            let number = self.fdt.read_vint()?;
            let info = self.field_infos.by_number(number).ok_or_else(|| {
                FolioError::corrupt(format!("stored field number {number} is not registered"))
            })?;
            let flags = self.fdt.read_u8()?;

            if !wanted(&info.name) {
                self.fdt.skip_bytes()?;
                continue;
            }

            let mut bytes = self.fdt.read_bytes()?;
            let compressed = flags & FIELD_IS_COMPRESSED != 0;
            if compressed {
                bytes = lz4_flex::decompress_size_prepended(&bytes).map_err(|e| {
                    FolioError::corrupt(format!("cannot decompress field {}: {e}", info.name))
                })?;
            }

            let value = if flags & FIELD_IS_BINARY != 0 {
                FieldValue::Binary(bytes)
            } else {
                FieldValue::Text(String::from_utf8(bytes).map_err(|e| {
                    FolioError::corrupt(format!("stored field {} is not UTF-8: {e}", info.name))
                })?)
            };
            let kind = FieldKind::from_flags(true, info.is_indexed, flags & FIELD_IS_TOKENIZED != 0)
                .unwrap_or(FieldKind::Stored);

            doc.add(Field::from_stored(info.name.to_string(), value, kind, compressed));
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    fn sample_docs() -> Vec<Document> {
        vec![
            Document::new()
                .with_field(Field::keyword("id", "1"))
                .with_field(Field::text("title", "first document"))
                .with_field(Field::unstored("body", "never stored")),
            Document::new()
                .with_field(Field::keyword("id", "2"))
                .with_field(Field::binary("blob", vec![0, 159, 146, 150]))
                .with_field(Field::text("title", "compressed ".repeat(20)).compressed()),
        ]
    }

    #[test]
    fn test_round_trip() {
        let storage = MemoryStorage::new_default();
        let docs = sample_docs();
        let mut infos = FieldInfos::new();
        for doc in &docs {
            infos.add_document(doc);
        }

        let mut writer = StoredFieldsWriter::new(&storage, "_0").unwrap();
        for doc in &docs {
            writer.add_document(doc, &infos).unwrap();
        }
        assert_eq!(writer.doc_count(), 2);
        writer.close().unwrap();

        let mut reader = StoredFieldsReader::open(&storage, "_0", Arc::new(infos)).unwrap();
        assert_eq!(reader.size(), 2);

        let first = reader.doc(0).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first.get("id"), Some("1"));
        assert_eq!(first.get("title"), Some("first document"));
        assert!(first.field("title").unwrap().is_tokenized());
        assert!(first.field("body").is_none());

        let second = reader.doc(1).unwrap();
        assert_eq!(second.get_binary("blob"), Some([0u8, 159, 146, 150].as_slice()));
        assert_eq!(second.get("title"), Some("compressed ".repeat(20).as_str()));
        assert!(second.field("title").unwrap().is_compressed());

        assert!(reader.doc(2).is_err());
    }

    #[test]
    fn test_partial_load() {
        let storage = MemoryStorage::new_default();
        let docs = sample_docs();
        let mut infos = FieldInfos::new();
        docs.iter().for_each(|d| infos.add_document(d));

        let mut writer = StoredFieldsWriter::new(&storage, "_1").unwrap();
        for doc in &docs {
            writer.add_document(doc, &infos).unwrap();
        }
        writer.close().unwrap();

        let mut reader = StoredFieldsReader::open(&storage, "_1", Arc::new(infos)).unwrap();
        let partial = reader.doc_fields(1, &["id"]).unwrap();
        assert_eq!(partial.len(), 1);
        assert_eq!(partial.get("id"), Some("2"));
    }

    #[test]
    fn test_unregistered_field_rejected() {
        let storage = MemoryStorage::new_default();
        let mut writer = StoredFieldsWriter::new(&storage, "_2").unwrap();
        let doc = Document::new().with_field(Field::keyword("ghost", "x"));
        assert!(writer.add_document(&doc, &FieldInfos::new()).is_err());
    }
}
