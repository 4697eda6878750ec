//! Output files
//!
//! [`OutputWriter`] owns the output session for the whole run. The first
//! file is created only when the first row arrives, and with a row limit a
//! new numbered file is started once the current one is full.

pub mod encode;

use csv::{QuoteStyle, Terminator, WriterBuilder};
use encoding_rs::Encoding;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use crate::config::{Config, QuoteMode};
use crate::error::OutputError;
pub use encode::EncodingWriter;

/// Extension used for numbered files when the base name has none.
const DEFAULT_EXTENSION: &str = "csv";

const DELIMITER: u8 = b',';

impl QuoteMode {
    fn style(self) -> QuoteStyle {
        match self {
            QuoteMode::Minimal => QuoteStyle::Necessary,
            QuoteMode::Numeric => QuoteStyle::NonNumeric,
            QuoteMode::None => QuoteStyle::Never,
            QuoteMode::All => QuoteStyle::Always,
        }
    }
}

/// Name of the `index`-th file of a rotated output: `out.csv` becomes
/// `out_0001.csv`.
pub fn numbered_path(base: &Path, index: u32) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = base
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    base.with_file_name(format!("{}_{:04}.{}", stem, index, ext))
}

type Sink = csv::Writer<EncodingWriter<BufWriter<File>>>;

struct Session {
    writer: Sink,
    path: PathBuf,
    rows: u64,
}

impl Session {
    fn close(self) -> Result<PathBuf, OutputError> {
        let Session { writer, path, .. } = self;
        let close_error = |source: io::Error| OutputError::Close {
            path: path.clone(),
            source,
        };

        let encoder = writer
            .into_inner()
            .map_err(|e| close_error(io::Error::new(e.error().kind(), e.error().to_string())))?;
        encoder.finish().map_err(close_error)?;
        Ok(path)
    }
}

/// Writes projected rows to one or more output files.
pub struct OutputWriter {
    base: PathBuf,
    header: Vec<String>,
    max_rows: Option<u64>,
    encoding: &'static Encoding,
    quote: u8,
    quote_mode: QuoteMode,
    session: Option<Session>,
    next_index: u32,
    files: Vec<PathBuf>,
    rows: u64,
}

impl OutputWriter {
    /// `header` is written at the top of every file.
    pub fn new(config: &Config, header: Vec<String>) -> Self {
        Self {
            base: config.output_dir.join(&config.output_filename),
            header,
            max_rows: config.max_rows_per_file,
            encoding: config.output_encoding,
            quote: config.quote_char,
            quote_mode: config.quote_mode,
            session: None,
            next_index: 1,
            files: Vec::new(),
            rows: 0,
        }
    }

    /// Rows written across all files.
    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    /// Write one row. In quote mode `none` a row holding a value that
    /// would need quoting is refused before anything is written.
    pub fn write_row(&mut self, row: &[String]) -> Result<(), OutputError> {
        self.check_unquoted(row)?;
        if self.session.is_none() {
            let session = self.open()?;
            self.session = Some(session);
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        session
            .writer
            .write_record(row)
            .map_err(|source| OutputError::Write {
                path: session.path.clone(),
                source,
            })?;
        session.rows += 1;
        self.rows += 1;

        let full = self.max_rows.is_some_and(|max| session.rows >= max);
        if full {
            self.close_session()?;
        }
        Ok(())
    }

    /// Close the open file, if any, and return every file written.
    pub fn finish(mut self) -> Result<Vec<PathBuf>, OutputError> {
        self.close_session()?;
        Ok(self.files)
    }

    fn close_session(&mut self) -> Result<(), OutputError> {
        if let Some(session) = self.session.take() {
            let path = session.close()?;
            self.files.push(path);
        }
        Ok(())
    }

    fn next_path(&self) -> PathBuf {
        match self.max_rows {
            Some(_) => numbered_path(&self.base, self.next_index),
            None => self.base.clone(),
        }
    }

    fn check_unquoted(&self, fields: &[String]) -> Result<(), OutputError> {
        if self.quote_mode != QuoteMode::None {
            return Ok(());
        }
        let needs_quoting = |field: &&String| {
            field
                .bytes()
                .any(|b| b == DELIMITER || b == self.quote || b == b'\r' || b == b'\n')
        };
        let Some(field) = fields.iter().find(needs_quoting) else {
            return Ok(());
        };

        let path = match &self.session {
            Some(session) => session.path.clone(),
            None => self.next_path(),
        };
        Err(OutputError::NeedsQuoting {
            path,
            field: field.clone(),
        })
    }

    fn open(&mut self) -> Result<Session, OutputError> {
        self.check_unquoted(&self.header)?;
        let path = self.next_path();
        self.next_index += 1;

        let file = File::create(&path).map_err(|source| OutputError::Create {
            path: path.clone(),
            source,
        })?;
        let mut writer = WriterBuilder::new()
            .delimiter(DELIMITER)
            .quote(self.quote)
            .quote_style(self.quote_mode.style())
            .terminator(Terminator::CRLF)
            .from_writer(EncodingWriter::new(BufWriter::new(file), self.encoding));

        writer
            .write_record(&self.header)
            .map_err(|source| OutputError::Write {
                path: path.clone(),
                source,
            })?;

        Ok(Session {
            writer,
            path,
            rows: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{SHIFT_JIS, UTF_8};
    use std::fs;
    use tempfile::TempDir;

    fn config(dir: &Path, filename: &str, max_rows: Option<u64>, mode: QuoteMode) -> Config {
        Config {
            input_dir: dir.join("in"),
            input_encoding: crate::config::EncodingSetting::Fixed(UTF_8),
            output_encoding: UTF_8,
            output_dir: dir.to_path_buf(),
            output_filename: filename.to_string(),
            max_rows_per_file: max_rows,
            output_columns: Vec::new(),
            add_columns: Vec::new(),
            filter_conditions: Vec::new(),
            quote_char: b'"',
            quote_mode: mode,
            debug: false,
        }
    }

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_numbered_path() {
        assert_eq!(numbered_path(Path::new("out/result.csv"), 1), PathBuf::from("out/result_0001.csv"));
        assert_eq!(numbered_path(Path::new("out/result.txt"), 12), PathBuf::from("out/result_0012.txt"));
        assert_eq!(numbered_path(Path::new("out/result"), 3), PathBuf::from("out/result_0003.csv"));
    }

    #[test]
    fn test_no_rows_no_file() {
        let dir = TempDir::new().unwrap();
        let writer = OutputWriter::new(&config(dir.path(), "out.csv", None, QuoteMode::All), row(&["a"]));
        assert!(writer.finish().unwrap().is_empty());
        assert!(!dir.path().join("out.csv").exists());
    }

    #[test]
    fn test_single_file_quote_all() {
        let dir = TempDir::new().unwrap();
        let mut writer = OutputWriter::new(&config(dir.path(), "out.csv", None, QuoteMode::All), row(&["a", "b"]));
        writer.write_row(&row(&["1", "x\"y"])).unwrap();
        writer.write_row(&row(&["2", ""])).unwrap();
        let files = writer.finish().unwrap();

        assert_eq!(files, vec![dir.path().join("out.csv")]);
        assert_eq!(
            fs::read_to_string(&files[0]).unwrap(),
            "\"a\",\"b\"\r\n\"1\",\"x\"\"y\"\r\n\"2\",\"\"\r\n"
        );
    }

    #[test]
    fn test_rotation() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            OutputWriter::new(&config(dir.path(), "out.csv", Some(2), QuoteMode::Minimal), row(&["n"]));
        for n in ["1", "2", "3", "4", "5"] {
            writer.write_row(&row(&[n])).unwrap();
        }
        assert_eq!(writer.rows_written(), 5);
        let files = writer.finish().unwrap();

        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["out_0001.csv", "out_0002.csv", "out_0003.csv"]);
        assert_eq!(fs::read_to_string(&files[0]).unwrap(), "n\r\n1\r\n2\r\n");
        assert_eq!(fs::read_to_string(&files[2]).unwrap(), "n\r\n5\r\n");
    }

    #[test]
    fn test_exact_multiple_leaves_no_empty_file() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            OutputWriter::new(&config(dir.path(), "out.csv", Some(2), QuoteMode::Minimal), row(&["n"]));
        for n in ["1", "2", "3", "4"] {
            writer.write_row(&row(&[n])).unwrap();
        }
        assert_eq!(writer.finish().unwrap().len(), 2);
        assert!(!dir.path().join("out_0003.csv").exists());
    }

    #[test]
    fn test_quote_modes_and_custom_quote() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path(), "out.csv", None, QuoteMode::Numeric);
        cfg.quote_char = b'\'';
        let mut writer = OutputWriter::new(&cfg, row(&["name", "n"]));
        writer.write_row(&row(&["ab", "12"])).unwrap();
        let files = writer.finish().unwrap();
        assert_eq!(fs::read_to_string(&files[0]).unwrap(), "'name','n'\r\n'ab',12\r\n");
    }

    #[test]
    fn test_quote_mode_none_refuses_values_needing_quotes() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path(), "out.csv", None, QuoteMode::None);
        let mut writer = OutputWriter::new(&cfg, row(&["a", "b"]));

        writer.write_row(&row(&["plain", "2"])).unwrap();
        for bad in ["x,y", "say \"hi\"", "two\nlines", "cr\r"] {
            match writer.write_row(&row(&[bad, "2"])) {
                Err(OutputError::NeedsQuoting { field, .. }) => assert_eq!(field, bad),
                other => panic!("expected NeedsQuoting for {:?}, got {:?}", bad, other),
            }
        }
        writer.write_row(&row(&["last", "3"])).unwrap();
        assert_eq!(writer.rows_written(), 2);

        // every written row keeps the header's width
        let files = writer.finish().unwrap();
        let text = fs::read_to_string(&files[0]).unwrap();
        assert_eq!(text, "a,b\r\nplain,2\r\nlast,3\r\n");
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(&files[0])
            .unwrap();
        assert!(reader.records().all(|r| r.unwrap().len() == 2));
    }

    #[test]
    fn test_quote_mode_none_unquotable_header() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path(), "out.csv", None, QuoteMode::None);
        let mut writer = OutputWriter::new(&cfg, row(&["a,b"]));

        let result = writer.write_row(&row(&["1"]));
        assert!(matches!(result, Err(OutputError::NeedsQuoting { .. })));
        assert!(!dir.path().join("out.csv").exists());
    }

    #[test]
    fn test_encoded_output() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path(), "out.csv", None, QuoteMode::Minimal);
        cfg.output_encoding = SHIFT_JIS;
        let mut writer = OutputWriter::new(&cfg, row(&["列"]));
        writer.write_row(&row(&["あ"])).unwrap();
        let files = writer.finish().unwrap();

        let (expected, _, _) = SHIFT_JIS.encode("列\r\nあ\r\n");
        assert_eq!(fs::read(&files[0]).unwrap(), expected.into_owned());
    }

    #[test]
    fn test_unwritable_directory() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir.path().join("missing"), "out.csv", None, QuoteMode::All);
        let mut writer = OutputWriter::new(&cfg, row(&["a"]));
        assert!(matches!(writer.write_row(&row(&["1"])), Err(OutputError::Create { .. })));
    }
}
