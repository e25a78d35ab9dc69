//! Output formatting for CLI commands.
//!
//! Every command produces one result value. In human mode it is printed
//! through its `Display` impl; in JSON mode it is serialized as is.

use std::fmt;

use serde::Serialize;

use crate::cli::args::{FolioArgs, OutputFormat};
use crate::error::Result;

/// One segment of an index.
#[derive(Debug, Serialize)]
pub struct SegmentSummary {
    pub name: String,
    pub doc_count: u32,
    pub has_deletions: bool,
    pub compound: bool,
}

/// Result of `info`.
#[derive(Debug, Serialize)]
pub struct IndexInfo {
    pub path: String,
    pub version: u64,
    pub last_modified_ms: u64,
    pub max_doc: u32,
    pub num_docs: u32,
    pub locked: bool,
    pub fields: Vec<String>,
    pub segments: Vec<SegmentSummary>,
}

impl fmt::Display for IndexInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Index: {}", self.path)?;
        writeln!(f, "  Version:       {}", self.version)?;
        writeln!(f, "  Last modified: {} ms", self.last_modified_ms)?;
        writeln!(f, "  Documents:     {} live / {} total", self.num_docs, self.max_doc)?;
        writeln!(f, "  Locked:        {}", if self.locked { "yes" } else { "no" })?;
        writeln!(f, "  Fields:        {}", self.fields.join(", "))?;
        writeln!(f, "  Segments:      {}", self.segments.len())?;
        for segment in &self.segments {
            write!(f, "    {:<10} {:>10} docs", segment.name, segment.doc_count)?;
            if segment.has_deletions {
                write!(f, "  deletions")?;
            }
            if segment.compound {
                write!(f, "  compound")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// One dictionary entry.
#[derive(Debug, Serialize)]
pub struct TermEntry {
    pub field: String,
    pub text: String,
    pub doc_freq: u32,
}

/// Result of `terms`.
#[derive(Debug, Serialize)]
pub struct TermList {
    pub terms: Vec<TermEntry>,
}

impl fmt::Display for TermList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for term in &self.terms {
            writeln!(f, "{}:{}\t{}", term.field, term.text, term.doc_freq)?;
        }
        Ok(())
    }
}

/// One stored field value.
#[derive(Debug, Serialize)]
pub struct StoredFieldValue {
    pub name: String,
    /// A string, or an array of bytes for binary values.
    pub value: serde_json::Value,
    pub indexed: bool,
    pub tokenized: bool,
    pub compressed: bool,
}

/// Result of `doc`.
#[derive(Debug, Serialize)]
pub struct StoredDocument {
    pub doc: u32,
    pub deleted: bool,
    pub fields: Vec<StoredFieldValue>,
}

impl fmt::Display for StoredDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Document {}{}", self.doc, if self.deleted { " (deleted)" } else { "" })?;
        for field in &self.fields {
            match &field.value {
                serde_json::Value::String(text) => writeln!(f, "  {}: {}", field.name, text)?,
                other => writeln!(f, "  {}: {}", field.name, other)?,
            }
        }
        Ok(())
    }
}

/// Result of `add`.
#[derive(Debug, Serialize)]
pub struct AddResult {
    pub documents_added: u64,
    pub lines_skipped: u64,
    pub segments: usize,
    pub duration_ms: u64,
}

impl fmt::Display for AddResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Added {} documents in {} ms ({} lines skipped, {} segments)",
            self.documents_added, self.duration_ms, self.lines_skipped, self.segments
        )
    }
}

/// Result of `optimize`.
#[derive(Debug, Serialize)]
pub struct OptimizeResult {
    pub segments_before: usize,
    pub segments_after: usize,
    pub doc_count: u64,
    pub duration_ms: u64,
}

impl fmt::Display for OptimizeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Optimized {} segments into {} ({} documents) in {} ms",
            self.segments_before, self.segments_after, self.doc_count, self.duration_ms
        )
    }
}

/// Result of `merge`.
#[derive(Debug, Serialize)]
pub struct MergeResult {
    pub sources: usize,
    pub doc_count: u64,
    pub duration_ms: u64,
}

impl fmt::Display for MergeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Merged {} indexes; the index now holds {} documents ({} ms)",
            self.sources, self.doc_count, self.duration_ms
        )
    }
}

/// Result of `delete`.
#[derive(Debug, Serialize)]
pub struct DeleteResult {
    pub term: String,
    pub deleted: u32,
}

impl fmt::Display for DeleteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Deleted {} documents containing {}", self.deleted, self.term)
    }
}

/// Result of `unlock`.
#[derive(Debug, Serialize)]
pub struct UnlockResult {
    pub was_locked: bool,
}

impl fmt::Display for UnlockResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.was_locked {
            writeln!(f, "Released index locks")
        } else {
            writeln!(f, "Index was not locked")
        }
    }
}

/// Render a result in the requested format.
pub fn render<T: Serialize + fmt::Display>(result: &T, args: &FolioArgs) -> Result<String> {
    Ok(match args.output_format {
        OutputFormat::Human => result.to_string(),
        OutputFormat::Json if args.pretty => serde_json::to_string_pretty(result)? + "\n",
        OutputFormat::Json => serde_json::to_string(result)? + "\n",
    })
}

/// Print a result to stdout in the requested format.
pub fn output_result<T: Serialize + fmt::Display>(result: &T, args: &FolioArgs) -> Result<()> {
    print!("{}", render(result, args)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_render_formats() {
        let result = DeleteResult {
            term: "body:stale".to_string(),
            deleted: 2,
        };

        let human = FolioArgs::try_parse_from(["folio", "unlock", "idx"]).unwrap();
        assert_eq!(
            render(&result, &human).unwrap(),
            "Deleted 2 documents containing body:stale\n"
        );

        let json = FolioArgs::try_parse_from(["folio", "-f", "json", "unlock", "idx"]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&render(&result, &json).unwrap()).unwrap();
        assert_eq!(value["deleted"], 2);
        assert_eq!(value["term"], "body:stale");
    }
}
