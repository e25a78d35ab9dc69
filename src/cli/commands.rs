//! Command implementations for the Folio CLI.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, bail};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::analysis::analyzer::Analyzer;
use crate::analysis::analyzer::keyword::KeywordAnalyzer;
use crate::analysis::analyzer::standard::StandardAnalyzer;
use crate::analysis::analyzer::whitespace::WhitespaceAnalyzer;
use crate::cli::args::*;
use crate::cli::output::*;
use crate::document::{Document, Field, FieldValue};
use crate::index::reader::{self, FieldSelection};
use crate::index::segment_info::SegmentInfos;
use crate::index::term::Term;
use crate::index::writer::{IndexWriter, IndexWriterConfig};
use crate::storage::Storage;
use crate::storage::file::FileStorage;

/// Execute a CLI command.
pub fn execute_command(args: &FolioArgs) -> anyhow::Result<()> {
    match &args.command {
        Command::Info(info_args) => show_info(info_args, args),
        Command::Terms(terms_args) => list_terms(terms_args, args),
        Command::Doc(doc_args) => show_document(doc_args, args),
        Command::Add(add_args) => add_documents(add_args, args),
        Command::Optimize(optimize_args) => optimize_index(optimize_args, args),
        Command::Merge(merge_args) => merge_indexes(merge_args, args),
        Command::Delete(delete_args) => delete_documents(delete_args, args),
        Command::Unlock(unlock_args) => unlock_index(unlock_args, args),
    }
}

/// Open an existing index directory.
fn open_storage(path: &Path) -> anyhow::Result<Arc<dyn Storage>> {
    if !path.is_dir() {
        bail!("{} is not a directory", path.display());
    }
    let storage = FileStorage::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Arc::new(storage))
}

/// Open an index directory, creating it if needed.
fn create_storage(path: &Path) -> anyhow::Result<Arc<dyn Storage>> {
    let storage = FileStorage::open(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(Arc::new(storage))
}

fn analyzer_for(kind: AnalyzerKind) -> Arc<dyn Analyzer> {
    match kind {
        AnalyzerKind::Standard => Arc::new(StandardAnalyzer::new()),
        AnalyzerKind::Whitespace => Arc::new(WhitespaceAnalyzer::new()),
        AnalyzerKind::Keyword => Arc::new(KeywordAnalyzer::new()),
    }
}

/// Build a document from a JSON object. Strings become text fields, or
/// keyword fields when listed in `keyword_fields`; numbers and booleans
/// become keyword fields; arrays contribute one field per scalar element.
/// Nulls and nested objects are ignored.
pub fn document_from_json(object: &Map<String, Value>, keyword_fields: &[String]) -> Document {
    fn add_value(doc: &mut Document, name: &str, value: &Value, keyword: bool) {
        match value {
            Value::String(text) if keyword => {
                doc.add(Field::keyword(name, text.as_str()));
            }
            Value::String(text) => {
                doc.add(Field::text(name, text.as_str()));
            }
            Value::Number(number) => {
                doc.add(Field::keyword(name, number.to_string()));
            }
            Value::Bool(flag) => {
                doc.add(Field::keyword(name, flag.to_string()));
            }
            Value::Array(items) => {
                for item in items.iter().filter(|item| !item.is_array()) {
                    add_value(doc, name, item, keyword);
                }
            }
            Value::Null | Value::Object(_) => {}
        }
    }

    let mut doc = Document::new();
    for (name, value) in object {
        let keyword = keyword_fields.iter().any(|field| field == name);
        add_value(&mut doc, name, value, keyword);
    }
    doc
}

fn show_info(args: &InfoArgs, cli_args: &FolioArgs) -> anyhow::Result<()> {
    let storage = open_storage(&args.index_path)?;
    let locked = reader::is_locked(storage.as_ref());
    let infos = SegmentInfos::read(&storage)?;
    let index_reader = reader::open(Arc::clone(&storage))?;

    let result = IndexInfo {
        path: args.index_path.display().to_string(),
        version: infos.version,
        last_modified_ms: reader::last_modified(storage.as_ref())?,
        max_doc: index_reader.max_doc(),
        num_docs: index_reader.num_docs(),
        locked,
        fields: index_reader.field_names(FieldSelection::All),
        segments: infos
            .iter()
            .map(|info| SegmentSummary {
                name: info.name.clone(),
                doc_count: info.doc_count,
                has_deletions: info.has_deletions(),
                compound: info.uses_compound_file(),
            })
            .collect(),
    };
    index_reader.close()?;
    output_result(&result, cli_args)?;
    Ok(())
}

fn list_terms(args: &TermsArgs, cli_args: &FolioArgs) -> anyhow::Result<()> {
    let storage = open_storage(&args.index_path)?;
    let index_reader = reader::open(storage)?;

    let mut terms = match &args.field {
        Some(field) => {
            let from = Term::new(field.as_str(), args.from.clone().unwrap_or_default());
            index_reader.terms_from(&from)?
        }
        None => {
            let mut terms = index_reader.terms()?;
            terms.next()?;
            terms
        }
    };

    let limit = args.limit.unwrap_or(usize::MAX);
    let mut entries = Vec::new();
    while let Some(term) = terms.term() {
        if entries.len() >= limit {
            break;
        }
        if args.field.as_deref().is_some_and(|field| field != term.field()) {
            break;
        }
        entries.push(TermEntry {
            field: term.field().to_string(),
            text: term.text().to_string(),
            doc_freq: terms.doc_freq(),
        });
        if !terms.next()? {
            break;
        }
    }

    index_reader.close()?;
    output_result(&TermList { terms: entries }, cli_args)?;
    Ok(())
}

fn show_document(args: &DocArgs, cli_args: &FolioArgs) -> anyhow::Result<()> {
    let storage = open_storage(&args.index_path)?;
    let index_reader = reader::open(storage)?;

    let doc = if args.fields.is_empty() {
        index_reader.document(args.doc)?
    } else {
        let names: Vec<&str> = args.fields.iter().map(String::as_str).collect();
        index_reader.document_fields(args.doc, &names)?
    };

    let result = StoredDocument {
        doc: args.doc,
        deleted: index_reader.is_deleted(args.doc),
        fields: doc
            .fields()
            .iter()
            .map(|field| StoredFieldValue {
                name: field.name().to_string(),
                value: match field.value() {
                    FieldValue::Text(text) => Value::String(text.clone()),
                    FieldValue::Binary(bytes) => Value::from(bytes.clone()),
                },
                indexed: field.is_indexed(),
                tokenized: field.is_tokenized(),
                compressed: field.is_compressed(),
            })
            .collect(),
    };
    index_reader.close()?;
    output_result(&result, cli_args)?;
    Ok(())
}

fn add_documents(args: &AddArgs, cli_args: &FolioArgs) -> anyhow::Result<()> {
    let storage = if args.create {
        create_storage(&args.index_path)?
    } else {
        open_storage(&args.index_path)?
    };
    let config = IndexWriterConfig {
        merge_factor: args.merge_factor,
        max_field_length: args.max_field_length,
        use_compound_file: args.compound,
        analyzer: analyzer_for(args.analyzer),
        ..IndexWriterConfig::default()
    };

    let start = Instant::now();
    let writer = IndexWriter::open(storage, args.create, config)?;
    let file = File::open(&args.document_file)
        .with_context(|| format!("opening {}", args.document_file.display()))?;

    let mut added = 0;
    let mut skipped = 0;
    for (line_number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(Value::Object(object)) => {
                writer
                    .add_document(&document_from_json(&object, &args.keyword_fields))
                    .with_context(|| format!("indexing line {}", line_number + 1))?;
                added += 1;
            }
            Ok(_) => {
                warn!(line = line_number + 1, "skipping line that is not a JSON object");
                skipped += 1;
            }
            Err(e) => {
                warn!(line = line_number + 1, error = %e, "skipping malformed line");
                skipped += 1;
            }
        }
    }
    writer.close()?;
    info!(added, skipped, "indexed documents");

    let result = AddResult {
        documents_added: added,
        lines_skipped: skipped,
        segments: writer.segment_count(),
        duration_ms: start.elapsed().as_millis() as u64,
    };
    output_result(&result, cli_args)?;
    Ok(())
}

fn optimize_index(args: &OptimizeArgs, cli_args: &FolioArgs) -> anyhow::Result<()> {
    let storage = open_storage(&args.index_path)?;
    let config = IndexWriterConfig {
        use_compound_file: args.compound,
        ..IndexWriterConfig::default()
    };

    let start = Instant::now();
    let writer = IndexWriter::open(storage, false, config)?;
    let segments_before = writer.segment_count();
    writer.optimize()?;
    writer.close()?;

    let result = OptimizeResult {
        segments_before,
        segments_after: writer.segment_count(),
        doc_count: writer.doc_count(),
        duration_ms: start.elapsed().as_millis() as u64,
    };
    output_result(&result, cli_args)?;
    Ok(())
}

fn merge_indexes(args: &MergeArgs, cli_args: &FolioArgs) -> anyhow::Result<()> {
    let storage = if args.create {
        create_storage(&args.index_path)?
    } else {
        open_storage(&args.index_path)?
    };
    let sources = args
        .sources
        .iter()
        .map(|path| open_storage(path))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let create = args.create && !reader::index_exists(storage.as_ref());
    let config = IndexWriterConfig {
        use_compound_file: args.compound,
        ..IndexWriterConfig::default()
    };

    let start = Instant::now();
    let writer = IndexWriter::open(storage, create, config)?;
    writer.add_indexes(&sources)?;
    writer.close()?;

    let result = MergeResult {
        sources: sources.len(),
        doc_count: writer.doc_count(),
        duration_ms: start.elapsed().as_millis() as u64,
    };
    output_result(&result, cli_args)?;
    Ok(())
}

fn delete_documents(args: &DeleteArgs, cli_args: &FolioArgs) -> anyhow::Result<()> {
    let storage = open_storage(&args.index_path)?;
    let index_reader = reader::open(storage)?;
    let term = Term::new(args.field.as_str(), args.text.as_str());
    let deleted = index_reader.delete_term(&term)?;
    index_reader.close()?;

    output_result(
        &DeleteResult {
            term: term.to_string(),
            deleted,
        },
        cli_args,
    )?;
    Ok(())
}

fn unlock_index(args: &UnlockArgs, cli_args: &FolioArgs) -> anyhow::Result<()> {
    let storage = open_storage(&args.index_path)?;
    let was_locked = reader::is_locked(storage.as_ref());
    reader::unlock(storage.as_ref())?;
    output_result(&UnlockResult { was_locked }, cli_args)?;
    Ok(())
}
