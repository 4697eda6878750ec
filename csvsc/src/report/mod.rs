//! Run reporting: error log, debug trace and progress messages.
//!
//! The pipeline never writes to a sink directly. It hands [`LogEntry`]
//! values to an injected [`Reporter`]: the CLI uses [`FileReporter`],
//! tests use [`MemoryReporter`].

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default error log, appended to across runs.
pub const DEFAULT_ERROR_LOG: &str = "error.txt";

/// Default debug log, truncated when a debug run starts.
pub const DEFAULT_DEBUG_LOG: &str = "debug.log";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Which sink an entry goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Progress shown to the user
    Info,
    /// Per-row trace, only in debug runs
    Debug,
    Error,
}

/// A single log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    /// Input file the entry is about
    pub file: Option<PathBuf>,
    /// 1-based line in that file
    pub line: Option<u64>,
    pub message: String,
}

impl LogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Debug, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            file: None,
            line: None,
            message: message.into(),
        }
    }

    pub fn with_file(mut self, file: impl AsRef<Path>) -> Self {
        self.file = Some(file.as_ref().to_path_buf());
        self
    }

    pub fn with_line(mut self, line: u64) -> Self {
        self.line = Some(line);
        self
    }

    /// `timestamp \t file \t line \t message`, with `N/A` for absent fields.
    pub fn format_line(&self, timestamp: &str) -> String {
        let file = self
            .file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let line = self
            .line
            .map(|n| n.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        format!("{}\t{}\t{}\t{}\n", timestamp, file, line, self.message)
    }
}

/// Destination for everything the pipeline reports.
pub trait Reporter {
    fn log(&mut self, entry: LogEntry);

    /// Called once before the first debug entry of a debug run.
    fn start_debug(&mut self) {}
}

/// Writes errors and debug traces to their log files, progress to stdout.
///
/// Each entry is appended with its own open/write so a crash never loses
/// entries already reported. A sink that cannot be written is reported on
/// stderr and the run carries on.
pub struct FileReporter {
    error_log: PathBuf,
    debug_log: PathBuf,
}

impl FileReporter {
    pub fn new(error_log: impl Into<PathBuf>, debug_log: impl Into<PathBuf>) -> Self {
        Self {
            error_log: error_log.into(),
            debug_log: debug_log.into(),
        }
    }

    fn append(path: &Path, entry: &LogEntry) {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(entry.format_line(&timestamp).as_bytes()));
        if let Err(e) = result {
            eprintln!("Failed to write log '{}': {}", path.display(), e);
        }
    }
}

impl Default for FileReporter {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_LOG, DEFAULT_DEBUG_LOG)
    }
}

impl Reporter for FileReporter {
    fn log(&mut self, entry: LogEntry) {
        match entry.level {
            LogLevel::Info => println!("{}", entry.message),
            LogLevel::Debug => Self::append(&self.debug_log, &entry),
            LogLevel::Error => Self::append(&self.error_log, &entry),
        }
    }

    fn start_debug(&mut self) {
        let result = File::create(&self.debug_log)
            .and_then(|mut f| f.write_all(b"debug log started\n"));
        if let Err(e) = result {
            eprintln!("Failed to initialise debug log '{}': {}", self.debug_log.display(), e);
        }
    }
}

/// Keeps every entry in memory.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    pub entries: Vec<LogEntry>,
    pub debug_started: bool,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<&LogEntry> {
        self.of_level(LogLevel::Error)
    }

    pub fn debug_entries(&self) -> Vec<&LogEntry> {
        self.of_level(LogLevel::Debug)
    }

    pub fn progress(&self) -> Vec<&str> {
        self.of_level(LogLevel::Info)
            .into_iter()
            .map(|e| e.message.as_str())
            .collect()
    }

    fn of_level(&self, level: LogLevel) -> Vec<&LogEntry> {
        self.entries.iter().filter(|e| e.level == level).collect()
    }
}

impl Reporter for MemoryReporter {
    fn log(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    fn start_debug(&mut self) {
        self.debug_started = true;
    }
}
