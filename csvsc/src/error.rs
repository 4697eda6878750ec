//! Error types for the csvsc batch pipeline.
//!
//! Each layer has its own error type:
//!
//! - [`ConfigError`] - configuration document loading and validation
//! - [`EvalError`] - formula compilation and evaluation (one kind, with a cause)
//! - [`PluginError`] - custom function plugin loading
//! - [`InputError`] - input discovery, decoding and CSV reading
//! - [`OutputError`] - output file creation and serialization
//! - [`FileError`] - failures that abandon the current input file
//! - [`PipelineError`] - top-level errors that abort the run
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors while loading or validating the configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document could not be read.
    #[error("Cannot read config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid JSON or has wrongly typed keys.
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// One or more required keys are absent or empty.
    #[error("Missing required config keys: {}", .0.join(", "))]
    MissingRequired(Vec<&'static str>),

    /// An encoding label that encoding_rs does not know.
    #[error("Unknown text encoding '{0}'")]
    UnknownEncoding(String),

    /// Known label, but encoding_rs can only decode it (UTF-16 variants).
    #[error("Text encoding '{0}' cannot be used for output")]
    UnsupportedOutputEncoding(String),

    /// The output quote character must be exactly one ASCII character.
    #[error("Invalid output_quotechar '{0}': expected a single ASCII character")]
    InvalidQuoteChar(String),
}

// =============================================================================
// Formula Errors
// =============================================================================

/// Underlying cause of a formula failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalCause {
    /// The formula grammar rejected the source.
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    /// A bare name that is neither a parameter nor a call.
    #[error("name '{0}' is not defined")]
    UnknownName(String),

    /// A call to a function that is not in the namespace.
    #[error("function '{0}' is not defined")]
    UnknownFunction(String),

    /// Operand types not supported by a binary operator.
    #[error("unsupported operand types for {op}: '{left}' and '{right}'")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    /// Operand type not supported by a unary operator.
    #[error("bad operand type for unary {op}: '{operand}'")]
    BadOperand { op: &'static str, operand: &'static str },

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in {0}")]
    Overflow(&'static str),

    /// Wrong number of arguments for a plugin function.
    #[error("{name}() takes {expected} arguments but {given} were given")]
    Arity {
        name: String,
        expected: usize,
        given: usize,
    },

    #[error("maximum call depth exceeded in {0}()")]
    RecursionLimit(String),

    /// A native function reported a failure.
    #[error("{name}(): {message}")]
    Function { name: String, message: String },
}

/// A formula failed to compile or evaluate.
///
/// Carries the original expression text so the failure can be reported
/// against what the user wrote in the configuration.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Failed to evaluate expression '{expression}': {cause}")]
pub struct EvalError {
    pub expression: String,
    pub cause: EvalCause,
}

impl EvalError {
    pub fn new(expression: impl Into<String>, cause: EvalCause) -> Self {
        Self {
            expression: expression.into(),
            cause,
        }
    }
}

// =============================================================================
// Plugin Errors
// =============================================================================

/// Errors loading one plugin file. The file's functions are skipped.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Cannot read plugin '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line that is not a valid `name(params) = expression` definition.
    #[error("Plugin '{}' line {line}: {message}", path.display())]
    Definition {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

// =============================================================================
// Input Errors
// =============================================================================

/// Errors discovering or reading input tables.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Cannot read input directory '{}': {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot open '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed CSV or undecodable bytes.
    #[error("Cannot read '{}': {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("'{}' has no header row", path.display())]
    NoHeader { path: PathBuf },
}

// =============================================================================
// Output Errors
// =============================================================================

/// Errors creating or writing output files.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Cannot create output '{}': {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write output '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Cannot finish output '{}': {source}", path.display())]
    Close {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Quote mode `none` and a value that cannot be written unquoted.
    #[error("Value {field:?} for '{}' needs quoting but the quote mode is none", path.display())]
    NeedsQuoting { path: PathBuf, field: String },
}

impl OutputError {
    /// Whether the output itself is broken, as opposed to one row being
    /// unwritable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, OutputError::NeedsQuoting { .. })
    }
}

// =============================================================================
// Per-file Errors
// =============================================================================

/// A failure that abandons the remainder of one input file.
#[derive(Debug, Error)]
pub enum FileError {
    #[error(transparent)]
    Input(#[from] InputError),

    /// A filter condition raised instead of returning a value.
    #[error("Filter condition failed: {0}")]
    Filter(#[source] EvalError),

    /// Output failures are not file-local; the pipeline escalates them.
    #[error(transparent)]
    Output(#[from] OutputError),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Errors that abort the whole run before or during processing.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("No CSV/TSV files found in input directory '{}'", .0.display())]
    NoInputFiles(PathBuf),

    #[error("No header row could be read from any input file")]
    NoHeaders,

    #[error("Cannot create output directory '{}': {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Output error: {0}")]
    Output(#[from] OutputError),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for formula evaluation.
pub type EvalResult<T> = Result<T, EvalError>;

/// Result type for pipeline runs.
pub type PipelineResult<T> = Result<T, PipelineError>;
