//! # csvsc - formula-driven CSV/TSV batch conversion
//!
//! csvsc reads every CSV/TSV table in a directory, filters rows and adds
//! computed columns with a small formula language, projects the columns
//! you ask for and writes one or more size-bounded CSV files.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ CSV/TSV dir │────▶│   Headers   │────▶│  Row rules  │────▶│ CSV output  │
//! │ (any enc.)  │     │  (union)    │     │ (formulas)  │     │ (rotating)  │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use csvsc::{run, Config, FunctionRegistry, MemoryReporter};
//!
//! let config = Config::load("csvsc.json")?;
//! let summary = run(&config, &FunctionRegistry::new(), &mut MemoryReporter::new())?;
//! println!("{} rows in {} files", summary.rows_emitted, summary.output_files.len());
//! ```
//!
//! ## Formulas
//!
//! - `$[name]` - column value as text, `$#` - sequence number as text
//! - `@[name]` - column value as integer (0 if missing or not a number), `@#`
//! - `+ - * / // %`, comparisons, `and`/`or`/`not`, string and number literals
//! - `name(args)` - custom functions from `fn/*.fx` plugin files
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`config`] - JSON configuration document
//! - [`formula`] - Formula parser, evaluator and custom functions
//! - [`input`] - Input discovery and decoding
//! - [`output`] - Rotating, encoding CSV writer
//! - [`transform`] - Header union, rows and the run pipeline
//! - [`report`] - Error log, debug trace and progress

// Core modules
pub mod error;
pub mod config;

// Formula language
pub mod formula;

// Files in and out
pub mod input;
pub mod output;

// Transformation
pub mod transform;

// Logging
pub mod report;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError,
    EvalCause,
    EvalError,
    PluginError,
    InputError,
    OutputError,
    FileError,
    PipelineError,
    PipelineResult,
};

// =============================================================================
// Re-exports - Configuration
// =============================================================================

pub use config::{Config, EncodingSetting, QuoteMode, DEFAULT_CONFIG_PATH};

// =============================================================================
// Re-exports - Formulas
// =============================================================================

pub use formula::{
    ColumnMap,
    Columns,
    CustomFunction,
    Evaluator,
    Formula,
    FunctionRegistry,
    Value,
    DEFAULT_PLUGIN_DIR,
};

// =============================================================================
// Re-exports - Input / Output
// =============================================================================

pub use input::{discover, detect_encoding, read_header, InputFile, TableFormat, TableReader};
pub use output::{numbered_path, OutputWriter};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use transform::{
    run,
    input_files,
    unify_headers,
    HeaderUnifier,
    Row,
    RunSummary,
    SequenceCounter,
};

// =============================================================================
// Re-exports - Reporting
// =============================================================================

pub use report::{
    FileReporter,
    LogEntry,
    LogLevel,
    MemoryReporter,
    Reporter,
    DEFAULT_DEBUG_LOG,
    DEFAULT_ERROR_LOG,
};
