//! Per-segment field registry (`.fnm`).
//!
//! Maps field names to dense ordinals assigned first come, first served.
//! Ordinals are local to one segment: merging builds a fresh registry, so
//! they must never be compared across segments. Ordinal 0 is always the
//! empty, unindexed field used by the term dictionary's sentinel entry.
//!
//! File format:
//!
//! ```text
//! vint   field count
//! field* (string name, u8 flags)      flags: 0x1 = indexed
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::document::Document;
use crate::error::{FolioError, Result};
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};

const IS_INDEXED: u8 = 0x1;

/// One field's schema entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: Arc<str>,
    pub number: u32,
    pub is_indexed: bool,
}

/// The field registry of one segment.
#[derive(Debug, Clone)]
pub struct FieldInfos {
    by_number: Vec<FieldInfo>,
    by_name: HashMap<Arc<str>, u32>,
}

impl Default for FieldInfos {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldInfos {
    /// Create a registry holding only the reserved empty field.
    pub fn new() -> Self {
        let mut infos = FieldInfos {
            by_number: Vec::new(),
            by_name: HashMap::new(),
        };
        infos.add("", false);
        infos
    }

    /// Register every field of a document.
    pub fn add_document(&mut self, doc: &Document) {
        for field in doc.fields() {
            self.add(field.name(), field.is_indexed());
        }
    }

    /// Register several names with the same indexed flag.
    pub fn add_names<I, S>(&mut self, names: I, indexed: bool)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            self.add(name.as_ref(), indexed);
        }
    }

    /// Register a field, returning its ordinal.
    ///
    /// Re-adding an existing field as indexed upgrades it; a field never
    /// goes back to unindexed.
    pub fn add(&mut self, name: &str, indexed: bool) -> u32 {
        if let Some(&number) = self.by_name.get(name) {
            let info = &mut self.by_number[number as usize];
            if indexed && !info.is_indexed {
                info.is_indexed = true;
            }
            return number;
        }

        let number = self.by_number.len() as u32;
        let name: Arc<str> = Arc::from(name);
        self.by_number.push(FieldInfo {
            name: Arc::clone(&name),
            number,
            is_indexed: indexed,
        });
        self.by_name.insert(name, number);
        number
    }

    pub fn field_number(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn field_name(&self, number: u32) -> Option<&Arc<str>> {
        self.by_number.get(number as usize).map(|info| &info.name)
    }

    pub fn by_number(&self, number: u32) -> Option<&FieldInfo> {
        self.by_number.get(number as usize)
    }

    pub fn by_name(&self, name: &str) -> Option<&FieldInfo> {
        self.field_number(name).and_then(|n| self.by_number(n))
    }

    /// Number of registered fields, including the reserved one.
    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldInfo> {
        self.by_number.iter()
    }

    /// Indexed fields, in ordinal order.
    pub fn indexed(&self) -> impl Iterator<Item = &FieldInfo> {
        self.by_number.iter().filter(|info| info.is_indexed)
    }

    /// Persist to `name` in `storage`.
    pub fn write(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        let mut writer = StructWriter::new(storage.create_output(name)?);
        writer.write_vint(self.by_number.len() as u32)?;
        for info in &self.by_number {
            writer.write_string(&info.name)?;
            writer.write_u8(if info.is_indexed { IS_INDEXED } else { 0 })?;
        }
        writer.close()
    }

    /// Load from `name` in `storage`.
    pub fn read(storage: &dyn Storage, name: &str) -> Result<Self> {
        let mut reader = StructReader::new(storage.open_input(name)?);
        let count = reader.read_vint()?;

        let mut infos = FieldInfos {
            by_number: Vec::with_capacity(count as usize),
            by_name: HashMap::with_capacity(count as usize),
        };
        for _ in 0..count {
            let field = reader.read_string()?;
            let flags = reader.read_u8()?;
            if infos.by_name.contains_key(field.as_str()) {
                return Err(FolioError::corrupt(format!(
                    "duplicate field {field:?} in {name}"
                )));
            }
            infos.add(&field, flags & IS_INDEXED != 0);
        }
        Ok(infos)
    }
}
