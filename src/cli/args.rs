//! Command line argument parsing for the Folio CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// Folio - inspect and maintain segment-based inverted indexes
#[derive(Parser, Debug, Clone)]
#[command(name = "folio")]
#[command(about = "Inspect and maintain segment-based inverted indexes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct FolioArgs {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human", global = true)]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl FolioArgs {
    /// Default log filter for the chosen verbosity. `RUST_LOG` wins over it.
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show segments, document counts, version and lock state
    Info(InfoArgs),

    /// List terms with their document frequencies
    Terms(TermsArgs),

    /// Print the stored fields of a document
    Doc(DocArgs),

    /// Index documents from a JSON lines file
    Add(AddArgs),

    /// Merge the index into a single segment
    Optimize(OptimizeArgs),

    /// Merge other indexes into this one
    Merge(MergeArgs),

    /// Delete every document containing a term
    Delete(DeleteArgs),

    /// Forcibly release the index locks
    Unlock(UnlockArgs),
}

/// Output formats
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text
    Human,
    /// JSON
    Json,
}

/// Analyzers selectable from the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerKind {
    /// Unicode words, lowercased
    Standard,
    /// Whitespace-separated tokens, unchanged
    Whitespace,
    /// Whole field as one token
    Keyword,
}

/// Arguments for `info`
#[derive(Parser, Debug, Clone)]
pub struct InfoArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,
}

/// Arguments for `terms`
#[derive(Parser, Debug, Clone)]
pub struct TermsArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Only list terms of this field
    #[arg(long)]
    pub field: Option<String>,

    /// Start at the first term not before this text
    #[arg(long, requires = "field")]
    pub from: Option<String>,

    /// Maximum number of terms to list
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Arguments for `doc`
#[derive(Parser, Debug, Clone)]
pub struct DocArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Document number
    #[arg(value_name = "DOC")]
    pub doc: u32,

    /// Only load these fields (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub fields: Vec<String>,
}

/// Arguments for `add`
#[derive(Parser, Debug, Clone)]
pub struct AddArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// JSON lines file; each object's properties become fields
    #[arg(value_name = "DOCUMENT_FILE")]
    pub document_file: PathBuf,

    /// Create a new index, replacing any existing one
    #[arg(long)]
    pub create: bool,

    /// Properties indexed verbatim as single terms (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub keyword_fields: Vec<String>,

    /// Analyzer for text properties
    #[arg(long, value_enum, default_value = "standard")]
    pub analyzer: AnalyzerKind,

    /// Segments per merge tier
    #[arg(long, default_value = "10", env = "FOLIO_MERGE_FACTOR")]
    pub merge_factor: u32,

    /// Tokens indexed per field
    #[arg(long, default_value = "10000")]
    pub max_field_length: u32,

    /// Pack merged segments into compound files
    #[arg(long)]
    pub compound: bool,
}

/// Arguments for `optimize`
#[derive(Parser, Debug, Clone)]
pub struct OptimizeArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Pack the result into a compound file
    #[arg(long)]
    pub compound: bool,
}

/// Arguments for `merge`
#[derive(Parser, Debug, Clone)]
pub struct MergeArgs {
    /// Path to the target index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Index directories to merge in
    #[arg(value_name = "SOURCE", required = true)]
    pub sources: Vec<PathBuf>,

    /// Create the target index if it does not exist
    #[arg(long)]
    pub create: bool,

    /// Pack the result into a compound file
    #[arg(long)]
    pub compound: bool,
}

/// Arguments for `delete`
#[derive(Parser, Debug, Clone)]
pub struct DeleteArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Field of the term
    #[arg(long)]
    pub field: String,

    /// Text of the term
    #[arg(long)]
    pub text: String,
}

/// Arguments for `unlock`
#[derive(Parser, Debug, Clone)]
pub struct UnlockArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,
}
