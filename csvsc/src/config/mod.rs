//! Run configuration
//!
//! The configuration is a JSON document (default `csvsc.json`). It is read
//! once into [`RawConfig`], validated into an immutable [`Config`], and
//! never touched again during the run.

use encoding_rs::{Encoding, UTF_8};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};

/// Default configuration document, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "csvsc.json";

const AUTO: &str = "auto";

/// How input text is decoded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EncodingSetting {
    /// Detect the encoding of each file from its bytes
    Auto,
    Fixed(&'static Encoding),
}

/// Output quoting policy, mapped onto the csv writer's quote styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuoteMode {
    /// Quote only fields that need it
    Minimal,
    /// Quote fields that do not look like numbers
    Numeric,
    /// Never quote; values that would need quoting are rejected
    None,
    #[default]
    All,
}

impl QuoteMode {
    /// Case-insensitive; anything unrecognised means quote everything.
    pub fn parse(mode: &str) -> Self {
        match mode.to_ascii_lowercase().as_str() {
            "minimal" => QuoteMode::Minimal,
            "numeric" => QuoteMode::Numeric,
            "none" => QuoteMode::None,
            _ => QuoteMode::All,
        }
    }
}

/// `add_columns` in document order.
///
/// Duplicate keys keep the position of their first occurrence and the
/// value of their last.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderedMap(pub Vec<(String, String)>);

impl<'de> Deserialize<'de> for OrderedMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedMapVisitor;

        impl<'de> Visitor<'de> for OrderedMapVisitor {
            type Value = OrderedMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object of column name to expression")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<OrderedMap, A::Error> {
                let mut entries: Vec<(String, String)> = Vec::new();
                while let Some((key, value)) = access.next_entry::<String, String>()? {
                    match entries.iter_mut().find(|(k, _)| *k == key) {
                        Some(entry) => entry.1 = value,
                        None => entries.push((key, value)),
                    }
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor)
    }
}

/// The configuration document as written. Every key is optional and
/// `null` is accepted anywhere.
#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    pub input_dir: Option<String>,
    pub input_encoding: Option<String>,
    pub output_encoding: Option<String>,
    pub output_dir: Option<String>,
    pub output_filename: Option<String>,
    pub max_rows_per_file: Option<u64>,
    pub output_columns: Option<Vec<String>>,
    pub add_columns: Option<OrderedMap>,
    pub filter_conditions: Option<Vec<String>>,
    pub output_quotechar: Option<String>,
    pub output_quotemode: Option<String>,
    pub debug: Option<bool>,
}

/// Validated run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub input_dir: PathBuf,
    pub input_encoding: EncodingSetting,
    /// `auto` already resolved against the input encoding
    pub output_encoding: &'static Encoding,
    pub output_dir: PathBuf,
    pub output_filename: String,
    /// `None` writes a single file
    pub max_rows_per_file: Option<u64>,
    /// Empty means the unified header
    pub output_columns: Vec<String>,
    pub add_columns: Vec<(String, String)>,
    pub filter_conditions: Vec<String>,
    pub quote_char: u8,
    pub quote_mode: QuoteMode,
    pub debug: bool,
}

impl Config {
    /// Read and validate a configuration document.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let raw: RawConfig = serde_json::from_str(json)?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawConfig) -> ConfigResult<Self> {
        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.is_empty());

        let mut missing = Vec::new();
        if !present(&raw.input_dir) {
            missing.push("input_dir");
        }
        if !present(&raw.output_dir) {
            missing.push("output_dir");
        }
        if !present(&raw.output_filename) {
            missing.push("output_filename");
        }
        if !missing.is_empty() {
            return Err(ConfigError::MissingRequired(missing));
        }

        let input_encoding = match raw.input_encoding.as_deref() {
            None => EncodingSetting::Fixed(UTF_8),
            Some(label) if label.eq_ignore_ascii_case(AUTO) => EncodingSetting::Auto,
            Some(label) => EncodingSetting::Fixed(encoding_for_label(label)?),
        };

        let output_encoding = match raw.output_encoding.as_deref() {
            None => resolve_auto(input_encoding),
            Some(label) if label.eq_ignore_ascii_case(AUTO) => resolve_auto(input_encoding),
            Some(label) => {
                let encoding = encoding_for_label(label)?;
                // encoding_rs only encodes to encodings that are their own output encoding
                if encoding.output_encoding() != encoding {
                    return Err(ConfigError::UnsupportedOutputEncoding(label.to_string()));
                }
                encoding
            }
        };

        let quote_char = match raw.output_quotechar.as_deref() {
            None => b'"',
            Some(q) if q.len() == 1 && q.is_ascii() => q.as_bytes()[0],
            Some(q) => return Err(ConfigError::InvalidQuoteChar(q.to_string())),
        };

        Ok(Config {
            input_dir: PathBuf::from(raw.input_dir.unwrap_or_default()),
            input_encoding,
            output_encoding,
            output_dir: PathBuf::from(raw.output_dir.unwrap_or_default()),
            output_filename: raw.output_filename.unwrap_or_default(),
            max_rows_per_file: raw.max_rows_per_file.filter(|n| *n > 0),
            output_columns: raw.output_columns.unwrap_or_default(),
            add_columns: raw.add_columns.unwrap_or_default().0,
            filter_conditions: raw.filter_conditions.unwrap_or_default(),
            quote_char,
            quote_mode: raw
                .output_quotemode
                .as_deref()
                .map(QuoteMode::parse)
                .unwrap_or_default(),
            debug: raw.debug.unwrap_or(false),
        })
    }
}

fn encoding_for_label(label: &str) -> ConfigResult<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| ConfigError::UnknownEncoding(label.to_string()))
}

fn resolve_auto(input: EncodingSetting) -> &'static Encoding {
    match input {
        EncodingSetting::Fixed(encoding) => encoding,
        EncodingSetting::Auto => UTF_8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{SHIFT_JIS, WINDOWS_1252};

    const MINIMAL: &str = r#"{"input_dir": "in", "output_dir": "out", "output_filename": "out.csv"}"#;

    #[test]
    fn test_defaults() {
        let config = Config::from_json_str(MINIMAL).unwrap();
        assert_eq!(config.input_dir, PathBuf::from("in"));
        assert_eq!(config.input_encoding, EncodingSetting::Fixed(UTF_8));
        assert_eq!(config.output_encoding, UTF_8);
        assert_eq!(config.max_rows_per_file, None);
        assert!(config.output_columns.is_empty());
        assert!(config.add_columns.is_empty());
        assert!(config.filter_conditions.is_empty());
        assert_eq!(config.quote_char, b'"');
        assert_eq!(config.quote_mode, QuoteMode::All);
        assert!(!config.debug);
    }

    #[test]
    fn test_full_document() {
        let json = r#"{
            "input_dir": "data",
            "input_encoding": "Shift_JIS",
            "output_encoding": "auto",
            "output_dir": "out",
            "output_filename": "result.csv",
            "max_rows_per_file": 2,
            "output_columns": ["column1", "column3", "new_column"],
            "add_columns": {"new_column": "$[column1] + $[column2] + $#", "b": "1", "a": "2"},
            "filter_conditions": ["@[column2] > 10"],
            "output_quotechar": "'",
            "output_quotemode": "MINIMAL",
            "debug": true
        }"#;
        let config = Config::from_json_str(json).unwrap();

        assert_eq!(config.input_encoding, EncodingSetting::Fixed(SHIFT_JIS));
        assert_eq!(config.output_encoding, SHIFT_JIS);
        assert_eq!(config.max_rows_per_file, Some(2));
        let names: Vec<&str> = config.add_columns.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["new_column", "b", "a"]);
        assert_eq!(config.quote_char, b'\'');
        assert_eq!(config.quote_mode, QuoteMode::Minimal);
        assert!(config.debug);
    }

    #[test]
    fn test_missing_required_keys() {
        let err = Config::from_json_str(r#"{"input_dir": "in", "output_filename": ""}"#).unwrap_err();
        match err {
            ConfigError::MissingRequired(keys) => {
                assert_eq!(keys, vec!["output_dir", "output_filename"])
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_nulls_and_zero_rows() {
        let json = r#"{"input_dir": "in", "output_dir": "out", "output_filename": "o.csv",
                       "max_rows_per_file": 0, "add_columns": null, "output_quotemode": null}"#;
        let config = Config::from_json_str(json).unwrap();
        assert_eq!(config.max_rows_per_file, None);
        assert!(config.add_columns.is_empty());
        assert_eq!(config.quote_mode, QuoteMode::All);
    }

    #[test]
    fn test_auto_input_encoding() {
        let json = r#"{"input_dir": "in", "output_dir": "out", "output_filename": "o.csv",
                       "input_encoding": "AUTO"}"#;
        let config = Config::from_json_str(json).unwrap();
        assert_eq!(config.input_encoding, EncodingSetting::Auto);
        assert_eq!(config.output_encoding, UTF_8);

        let json = r#"{"input_dir": "in", "output_dir": "out", "output_filename": "o.csv",
                       "input_encoding": "auto", "output_encoding": "cp1252"}"#;
        assert_eq!(Config::from_json_str(json).unwrap().output_encoding, WINDOWS_1252);
    }

    #[test]
    fn test_invalid_values() {
        let with = |extra: &str| {
            Config::from_json_str(&format!(
                r#"{{"input_dir": "in", "output_dir": "out", "output_filename": "o.csv", {}}}"#,
                extra
            ))
        };
        assert!(matches!(with(r#""input_encoding": "klingon""#), Err(ConfigError::UnknownEncoding(_))));
        assert!(matches!(
            with(r#""output_encoding": "utf-16le""#),
            Err(ConfigError::UnsupportedOutputEncoding(_))
        ));
        assert!(matches!(with(r#""output_quotechar": "''""#), Err(ConfigError::InvalidQuoteChar(_))));
        assert!(matches!(with(r#""max_rows_per_file": "ten""#), Err(ConfigError::Json(_))));
        assert!(matches!(Config::from_json_str("{"), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_duplicate_add_columns_keep_first_position() {
        let json = r#"{"input_dir": "in", "output_dir": "out", "output_filename": "o.csv",
                       "add_columns": {"x": "1", "y": "2", "x": "3"}}"#;
        let config = Config::from_json_str(json).unwrap();
        assert_eq!(
            config.add_columns,
            vec![("x".to_string(), "3".to_string()), ("y".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn test_quote_mode_parse() {
        assert_eq!(QuoteMode::parse("Numeric"), QuoteMode::Numeric);
        assert_eq!(QuoteMode::parse("none"), QuoteMode::None);
        assert_eq!(QuoteMode::parse("quote_all"), QuoteMode::All);
    }
}
