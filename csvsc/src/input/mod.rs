//! Input discovery and table reading.
//!
//! Input tables are the `.csv` and `.tsv` files directly inside the input
//! directory, read in file name order. The first record of a table is its
//! header. Text is decoded while streaming, with the configured encoding or
//! one detected from the file's leading bytes.

pub mod decode;

use csv::{StringRecord, Terminator};
use encoding_rs::{Encoding, UTF_8};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

use crate::config::EncodingSetting;
use crate::error::InputError;
pub use decode::DecodingReader;

/// Bytes inspected when detecting a file's encoding.
const DETECTION_SAMPLE: u64 = 64 * 1024;

/// Quote character of every input table.
pub const INPUT_QUOTE: u8 = b'"';

/// Delimited text flavour, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Tsv,
}

impl TableFormat {
    /// `csv`/`tsv`, case-insensitive; anything else is not an input table.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(TableFormat::Csv),
            "tsv" => Some(TableFormat::Tsv),
            _ => None,
        }
    }

    pub fn delimiter(self) -> u8 {
        match self {
            TableFormat::Csv => b',',
            TableFormat::Tsv => b'\t',
        }
    }
}

/// A discovered input table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub path: PathBuf,
    pub format: TableFormat,
}

/// List the input tables of `dir`, sorted by file name.
pub fn discover(dir: &Path) -> Result<Vec<InputFile>, InputError> {
    let entries = fs::read_dir(dir).map_err(|source| InputError::Directory {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| InputError::Directory {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(format) = TableFormat::from_path(&path) {
            files.push(InputFile { path, format });
        }
    }

    files.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
    Ok(files)
}

/// Guess the encoding of raw bytes using chardet.
///
/// Falls back to UTF-8 when chardet's answer is not an encoding_rs label.
pub fn detect_encoding(bytes: &[u8]) -> &'static Encoding {
    let (charset, _confidence, _language) = chardet::detect(bytes);

    // Normalize charset names
    let label = match charset.to_lowercase().as_str() {
        "" | "ascii" | "utf-8" | "utf8" | "utf-8-sig" => return UTF_8,
        "iso-8859-1" | "latin-1" | "latin1" => "windows-1252".to_string(),
        other => other.to_string(),
    };
    Encoding::for_label(label.as_bytes()).unwrap_or(UTF_8)
}

type Source = io::Chain<Cursor<Vec<u8>>, BufReader<File>>;

/// Record values with a CRLF line ending's `\r` removed. `None` for a
/// blank `\r\n` line.
///
/// Records end at `\n` only, so each record's line feed is consumed with it
/// and the reader's line count stays in step with the records.
fn strip_cr(record: &StringRecord) -> Option<Vec<String>> {
    let mut values: Vec<String> = record.iter().map(str::to_string).collect();
    if let Some(last) = values.last_mut() {
        if last.ends_with('\r') {
            last.pop();
            if values.len() == 1 && values[0].is_empty() {
                return None;
            }
        }
    }
    Some(values)
}

/// A data record read but not yet numbered.
///
/// The csv reader skips `\n` blank lines silently; they are recovered from
/// the lines consumed between two records, which needs to know whether the
/// record ended with a line feed. That is certain for every record but the
/// last, so one record is held back.
struct Held {
    /// Line the reader was on before the record, blank lines included
    from: u64,
    /// Line the reader was on after the record
    to: u64,
    values: Vec<String>,
}

/// An open input table positioned after its header.
///
/// Blank lines are yielded as records without values, so callers see them
/// like any other malformed row.
pub struct TableReader {
    path: PathBuf,
    encoding: &'static Encoding,
    reader: csv::Reader<DecodingReader<Source>>,
    header: Vec<String>,
    record: StringRecord,
    held: Option<Held>,
    ready: VecDeque<(u64, Vec<String>)>,
    line: u64,
    done: bool,
}

impl TableReader {
    /// Open `file`, resolve its encoding and read the header record.
    pub fn open(file: &InputFile, encoding: EncodingSetting) -> Result<Self, InputError> {
        let io_error = |source: io::Error| InputError::Io {
            path: file.path.clone(),
            source,
        };
        let mut handle = BufReader::new(File::open(&file.path).map_err(io_error)?);

        // The sample is replayed in front of the rest of the file.
        let mut sample = Vec::new();
        let encoding = match encoding {
            EncodingSetting::Fixed(encoding) => encoding,
            EncodingSetting::Auto => {
                (&mut handle)
                    .take(DETECTION_SAMPLE)
                    .read_to_end(&mut sample)
                    .map_err(io_error)?;
                detect_encoding(&sample)
            }
        };
        let source = Cursor::new(sample).chain(handle);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(file.format.delimiter())
            .quote(INPUT_QUOTE)
            .terminator(Terminator::Any(b'\n'))
            .from_reader(DecodingReader::new(source, encoding));

        // leading blank lines come before the header
        let mut record = StringRecord::new();
        let header = loop {
            let more = reader.read_record(&mut record).map_err(|source| InputError::Csv {
                path: file.path.clone(),
                source,
            })?;
            if !more {
                return Err(InputError::NoHeader {
                    path: file.path.clone(),
                });
            }
            if let Some(header) = strip_cr(&record) {
                break header;
            }
        };
        let line = reader.position().line();

        Ok(Self {
            path: file.path.clone(),
            encoding,
            reader,
            header,
            record,
            held: None,
            ready: VecDeque::new(),
            line,
            done: false,
        })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Next data record with the 1-based line it starts on. A blank line
    /// comes back as an empty record.
    pub fn next_record(&mut self) -> Result<Option<(u64, Vec<String>)>, InputError> {
        while self.ready.is_empty() && !self.done {
            self.read_ahead()?;
        }
        Ok(self.ready.pop_front())
    }

    fn read_ahead(&mut self) -> Result<(), InputError> {
        let more = self
            .reader
            .read_record(&mut self.record)
            .map_err(|source| InputError::Csv {
                path: self.path.clone(),
                source,
            })?;
        let from = self.line;
        self.line = self.reader.position().line();

        if more {
            let next = Held {
                from,
                to: self.line,
                values: strip_cr(&self.record).unwrap_or_default(),
            };
            // another record follows, so the held one ended with a line feed
            if let Some(held) = self.held.replace(next) {
                self.release(held, true);
            }
            return Ok(());
        }

        self.done = true;
        let terminated = self.reader.get_ref().ends_with_newline();
        if let Some(held) = self.held.take() {
            self.release(held, terminated);
        }
        // trailing blank lines
        for line in from..self.line {
            self.ready.push_back((line, Vec::new()));
        }
        Ok(())
    }

    fn release(&mut self, held: Held, terminated: bool) {
        let embedded = held
            .values
            .iter()
            .map(|v| v.matches('\n').count() as u64)
            .sum::<u64>();
        let consumed = held.to.saturating_sub(held.from);
        let blank = consumed.saturating_sub(embedded + u64::from(terminated));

        for offset in 0..blank {
            self.ready.push_back((held.from + offset, Vec::new()));
        }
        self.ready.push_back((held.from + blank, held.values));
    }
}

/// Read only the header record of `file`.
pub fn read_header(file: &InputFile, encoding: EncodingSetting) -> Result<Vec<String>, InputError> {
    TableReader::open(file, encoding).map(|table| table.header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::SHIFT_JIS;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> InputFile {
        let path = dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        let format = TableFormat::from_path(&path).unwrap();
        InputFile { path, format }
    }

    fn read_all(table: &mut TableReader) -> Vec<(u64, Vec<String>)> {
        let mut rows = Vec::new();
        while let Some(row) = table.next_record().unwrap() {
            rows.push(row);
        }
        rows
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in ["b.TSV", "a.csv", "notes.txt", "c.csv"] {
            fs::write(dir.path().join(name), "x\n").unwrap();
        }
        fs::create_dir(dir.path().join("nested.csv")).unwrap();

        let files = discover(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.TSV", "c.csv"]);
        assert_eq!(files[1].format, TableFormat::Tsv);
    }

    #[test]
    fn test_discover_missing_directory() {
        let dir = TempDir::new().unwrap();
        let result = discover(&dir.path().join("missing"));
        assert!(matches!(result, Err(InputError::Directory { .. })));
    }

    #[test]
    fn test_quoted_values_and_line_numbers() {
        let dir = TempDir::new().unwrap();
        let file = write(&dir, "t.csv", b"name,value\n\"Alice\",\"Hello, \"\"World\"\"\"\n\"multi\nline\",2\nshort\n");

        let mut table = TableReader::open(&file, EncodingSetting::Fixed(UTF_8)).unwrap();
        assert_eq!(table.header(), ["name", "value"]);

        let rows = read_all(&mut table);
        assert_eq!(rows[0], (2, vec!["Alice".to_string(), "Hello, \"World\"".to_string()]));
        assert_eq!(rows[1], (3, vec!["multi\nline".to_string(), "2".to_string()]));
        // ragged rows are returned as-is
        assert_eq!(rows[2], (5, vec!["short".to_string()]));
    }

    #[test]
    fn test_blank_lines_are_empty_records() {
        let dir = TempDir::new().unwrap();
        let file = write(&dir, "b.csv", b"a,b\n1,2\n\n3,4\r\n\r\n\"x\ny\",5\n\n");

        let mut table = TableReader::open(&file, EncodingSetting::Fixed(UTF_8)).unwrap();
        let rows = read_all(&mut table);
        let lines: Vec<_> = rows.iter().map(|(line, values)| (*line, values.len())).collect();
        assert_eq!(lines, vec![(2, 2), (3, 0), (4, 2), (5, 0), (6, 2), (8, 0)]);
        assert_eq!(rows[2].1, vec!["3".to_string(), "4".to_string()]);
        assert_eq!(rows[4].1, vec!["x\ny".to_string(), "5".to_string()]);
    }

    #[test]
    fn test_last_record_without_line_feed() {
        let dir = TempDir::new().unwrap();
        let file = write(&dir, "c.csv", b"a\n\n1\n\n2");

        let mut table = TableReader::open(&file, EncodingSetting::Fixed(UTF_8)).unwrap();
        let lines: Vec<_> = read_all(&mut table)
            .into_iter()
            .map(|(line, values)| (line, values.len()))
            .collect();
        assert_eq!(lines, vec![(2, 0), (3, 1), (4, 0), (5, 1)]);
    }

    #[test]
    fn test_crlf_line_endings() {
        let dir = TempDir::new().unwrap();
        let file = write(&dir, "w.csv", b"\r\nname,note\r\nA,\"one\r\ntwo\"\r\nB,x\r\n");

        let mut table = TableReader::open(&file, EncodingSetting::Fixed(UTF_8)).unwrap();
        assert_eq!(table.header(), ["name", "note"]);
        assert_eq!(
            read_all(&mut table),
            vec![
                (3, vec!["A".to_string(), "one\r\ntwo".to_string()]),
                (5, vec!["B".to_string(), "x".to_string()]),
            ]
        );
    }

    #[test]
    fn test_tsv_and_fixed_encoding() {
        let dir = TempDir::new().unwrap();
        let (bytes, _, _) = SHIFT_JIS.encode("列1\t列2\nあ\tい\n");
        let file = write(&dir, "j.tsv", &bytes);

        let mut table = TableReader::open(&file, EncodingSetting::Fixed(SHIFT_JIS)).unwrap();
        assert_eq!(table.header(), ["列1", "列2"]);
        assert_eq!(read_all(&mut table), vec![(2, vec!["あ".to_string(), "い".to_string()])]);
    }

    #[test]
    fn test_undecodable_file_fails() {
        let dir = TempDir::new().unwrap();
        let file = write(&dir, "bad.csv", b"a,b\n1,\xFF\n");

        let mut table = TableReader::open(&file, EncodingSetting::Fixed(UTF_8)).unwrap();
        assert!(matches!(table.next_record(), Err(InputError::Csv { .. })));
    }

    #[test]
    fn test_empty_file_has_no_header() {
        let dir = TempDir::new().unwrap();
        let file = write(&dir, "empty.csv", b"");
        assert!(matches!(
            read_header(&file, EncodingSetting::Fixed(UTF_8)),
            Err(InputError::NoHeader { .. })
        ));
    }

    #[test]
    fn test_auto_encoding_reads_whole_file() {
        let dir = TempDir::new().unwrap();
        let file = write(&dir, "plain.csv", b"a,b\n1,2\n3,4\n");

        let mut table = TableReader::open(&file, EncodingSetting::Auto).unwrap();
        assert_eq!(table.encoding(), UTF_8);
        assert_eq!(table.header(), ["a", "b"]);
        assert_eq!(read_all(&mut table).len(), 2);
    }

    #[test]
    fn test_detect_encoding_fallbacks() {
        assert_eq!(detect_encoding(b"plain ascii"), UTF_8);
        assert_eq!(detect_encoding(b""), UTF_8);
    }
}
