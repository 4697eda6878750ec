//! Batch pipeline: input tables in, filtered and extended rows out.
//!
//! One run:
//! 1. creates the output directory
//! 2. discovers the input tables
//! 3. unifies their headers and appends the added columns
//! 4. streams every table row by row through filters, added columns and
//!    projection into the [`OutputWriter`]
//!
//! Failures below the run level are reported and counted, never returned:
//! a bad row is skipped, a bad added column is left unset, a bad file is
//! abandoned. A row that quote mode `none` cannot write abandons its file
//! too. Only configuration, discovery and broken output end the run.
//!
//! # Example
//!
//! ```rust,ignore
//! use csvsc::{run, Config, FileReporter, FunctionRegistry};
//!
//! let config = Config::load("csvsc.json")?;
//! let (functions, _errors) = FunctionRegistry::load("fn".as_ref());
//! let summary = run(&config, &functions, &mut FileReporter::default())?;
//! println!("{} rows written", summary.rows_emitted);
//! ```

use serde::Serialize;
use std::fs;
use std::path::PathBuf;

use super::header::HeaderUnifier;
use super::row::Row;
use crate::config::Config;
use crate::error::{FileError, PipelineError, PipelineResult};
use crate::formula::{Evaluator, Formula, FunctionRegistry};
use crate::input::{discover, read_header, InputFile, TableReader};
use crate::output::OutputWriter;
use crate::report::{LogEntry, Reporter};

/// Run-wide row sequence number.
///
/// Starts at 1 and only moves when a row survives the filters, so filters
/// see the number the row is about to receive.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceCounter {
    last: u64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number the next surviving row will get.
    pub fn peek(&self) -> u64 {
        self.last + 1
    }

    /// Claim the next number.
    pub fn advance(&mut self) -> u64 {
        self.last += 1;
        self.last
    }
}

/// Counters of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub files_processed: usize,
    /// Files abandoned part way
    pub files_failed: usize,
    /// Data records read, header excluded
    pub rows_read: u64,
    /// Records whose value count did not match the header
    pub rows_rejected: u64,
    pub rows_filtered: u64,
    pub rows_emitted: u64,
    pub column_failures: u64,
    pub output_files: Vec<PathBuf>,
}

/// Ordered union of all readable input headers plus the added columns.
///
/// Unreadable headers are reported and left out; the file is still tried
/// again in the main pass.
pub fn unify_headers(
    config: &Config,
    files: &[InputFile],
    reporter: &mut dyn Reporter,
) -> PipelineResult<Vec<String>> {
    let mut unifier = HeaderUnifier::new();
    for file in files {
        match read_header(file, config.input_encoding) {
            Ok(header) => unifier.extend(header.iter().map(String::as_str)),
            Err(e) => reporter.log(
                LogEntry::error(format!("Could not read header: {}", e)).with_file(&file.path),
            ),
        }
    }

    if unifier.is_empty() {
        return Err(PipelineError::NoHeaders);
    }
    unifier.extend(config.add_columns.iter().map(|(name, _)| name.as_str()));
    Ok(unifier.into_columns())
}

/// Discover the input tables of the configured directory.
pub fn input_files(config: &Config) -> PipelineResult<Vec<InputFile>> {
    let files = discover(&config.input_dir)?;
    if files.is_empty() {
        return Err(PipelineError::NoInputFiles(config.input_dir.clone()));
    }
    Ok(files)
}

/// Process every input table according to `config`.
pub fn run(
    config: &Config,
    functions: &FunctionRegistry,
    reporter: &mut dyn Reporter,
) -> PipelineResult<RunSummary> {
    if config.debug {
        reporter.start_debug();
    }

    fs::create_dir_all(&config.output_dir).map_err(|source| PipelineError::OutputDir {
        path: config.output_dir.clone(),
        source,
    })?;

    let files = input_files(config)?;
    let unified = unify_headers(config, &files, reporter)?;
    let projection = if config.output_columns.is_empty() {
        unified
    } else {
        config.output_columns.clone()
    };

    let mut pipeline = RowPipeline::new(config, functions, projection.clone());
    let mut writer = OutputWriter::new(config, projection);

    for file in &files {
        reporter.log(LogEntry::info(format!(
            "Processing file: {}",
            file.path.file_name().unwrap_or_default().to_string_lossy()
        )));

        match pipeline.process_file(file, &mut writer, reporter) {
            Ok(()) => pipeline.summary.files_processed += 1,
            Err(FileError::Output(e)) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                pipeline.summary.files_failed += 1;
                let message = format!("Error while processing file: {}", e);
                reporter.log(LogEntry::error(message).with_file(&file.path));
            }
        }
    }

    let mut summary = pipeline.summary;
    summary.output_files = writer.finish()?;
    Ok(summary)
}

/// Per-row rules compiled once for the run.
struct RowPipeline<'a> {
    config: &'a Config,
    functions: &'a FunctionRegistry,
    filters: Vec<Formula>,
    added: Vec<(String, Formula)>,
    projection: Vec<String>,
    sequence: SequenceCounter,
    summary: RunSummary,
}

impl<'a> RowPipeline<'a> {
    fn new(config: &'a Config, functions: &'a FunctionRegistry, projection: Vec<String>) -> Self {
        Self {
            config,
            functions,
            filters: config.filter_conditions.iter().map(|f| Formula::compile(f)).collect(),
            added: config
                .add_columns
                .iter()
                .map(|(name, expr)| (name.clone(), Formula::compile(expr)))
                .collect(),
            projection,
            sequence: SequenceCounter::new(),
            summary: RunSummary::default(),
        }
    }

    /// Stream one table into `writer`. The table is closed on return.
    fn process_file(
        &mut self,
        file: &InputFile,
        writer: &mut OutputWriter,
        reporter: &mut dyn Reporter,
    ) -> Result<(), FileError> {
        let mut table = TableReader::open(file, self.config.input_encoding)?;
        let header = table.header().to_vec();

        while let Some((line, values)) = table.next_record()? {
            self.summary.rows_read += 1;

            let count = values.len();
            let Some(mut row) = Row::from_record(&header, values) else {
                self.summary.rows_rejected += 1;
                reporter.log(
                    LogEntry::error(format!(
                        "Row has {} values but the header has {} columns",
                        count,
                        header.len()
                    ))
                    .with_file(&file.path)
                    .with_line(line),
                );
                continue;
            };

            if !self.passes_filters(&row, file, line, reporter)? {
                self.summary.rows_filtered += 1;
                continue;
            }

            let sequence = self.sequence.advance();
            self.add_columns(&mut row, sequence, file, line, reporter);

            writer.write_row(&row.project(&self.projection))?;
            self.summary.rows_emitted += 1;
        }
        Ok(())
    }

    /// All filters truthy. An evaluation failure abandons the file.
    fn passes_filters(
        &self,
        row: &Row,
        file: &InputFile,
        line: u64,
        reporter: &mut dyn Reporter,
    ) -> Result<bool, FileError> {
        let evaluator = Evaluator::new(self.sequence.peek(), row, self.functions);
        for filter in &self.filters {
            let value = filter.evaluate(&evaluator).map_err(FileError::Filter)?;
            if !value.is_truthy() {
                if self.config.debug {
                    reporter.log(
                        LogEntry::debug(format!(
                            "Row skipped by filter: {}",
                            filter.substituted(&evaluator)
                        ))
                        .with_file(&file.path)
                        .with_line(line),
                    );
                }
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluate added columns in order; each sees the ones before it.
    fn add_columns(
        &mut self,
        row: &mut Row,
        sequence: u64,
        file: &InputFile,
        line: u64,
        reporter: &mut dyn Reporter,
    ) {
        for (name, formula) in &self.added {
            let (result, trace) = {
                let evaluator = Evaluator::new(sequence, &*row, self.functions);
                let trace = self.config.debug.then(|| formula.substituted(&evaluator));
                (formula.evaluate(&evaluator), trace)
            };

            match result {
                Ok(value) => {
                    let rendered = value.to_string();
                    if let Some(trace) = trace {
                        let message = format!("Added column [{}]: {} = {}", name, trace, rendered);
                        reporter.log(
                            LogEntry::debug(message)
                                .with_file(&file.path)
                                .with_line(line),
                        );
                    }
                    row.set(name, rendered);
                }
                Err(e) => {
                    self.summary.column_failures += 1;
                    reporter.log(
                        LogEntry::error(format!("Added column [{}] failed: {}", name, e))
                            .with_file(&file.path)
                            .with_line(line),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MemoryReporter;
    use tempfile::TempDir;

    fn setup(files: &[(&str, &str)], extra: &str) -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        fs::create_dir(&input).unwrap();
        for (name, content) in files {
            fs::write(input.join(name), content).unwrap();
        }
        let json = format!(
            r#"{{"input_dir": {:?}, "output_dir": {:?}, "output_filename": "out.csv",
                 "output_quotemode": "minimal"{}}}"#,
            input.to_string_lossy(),
            dir.path().join("out").to_string_lossy(),
            extra
        );
        let config = Config::from_json_str(&json).unwrap();
        (dir, config)
    }

    fn output(path: &std::path::Path) -> String {
        fs::read_to_string(path).unwrap().replace("\r\n", "\n")
    }

    #[test]
    fn test_sequence_counter() {
        let mut seq = SequenceCounter::new();
        assert_eq!(seq.peek(), 1);
        assert_eq!(seq.advance(), 1);
        assert_eq!(seq.peek(), 2);
    }

    #[test]
    fn test_shape_mismatch_rejected_and_reported() {
        let (_dir, config) = setup(&[("a.csv", "x,y\n1,2\n3\n4,5,6\n7,8\n")], "");
        let mut reporter = MemoryReporter::new();
        let summary = run(&config, &FunctionRegistry::new(), &mut reporter).unwrap();

        assert_eq!(summary.rows_read, 4);
        assert_eq!(summary.rows_rejected, 2);
        assert_eq!(summary.rows_emitted, 2);
        let lines: Vec<_> = reporter.errors().iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![Some(3), Some(4)]);
        assert_eq!(output(&summary.output_files[0]), "x,y\n1,2\n7,8\n");
    }

    #[test]
    fn test_blank_line_is_a_rejected_row() {
        let (_dir, config) = setup(&[("a.csv", "x,y\n1,2\n\n3,4\n")], "");
        let mut reporter = MemoryReporter::new();
        let summary = run(&config, &FunctionRegistry::new(), &mut reporter).unwrap();

        assert_eq!(summary.rows_read, 3);
        assert_eq!(summary.rows_rejected, 1);
        let errors = reporter.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, Some(3));
        assert_eq!(errors[0].message, "Row has 0 values but the header has 2 columns");
        assert_eq!(output(&summary.output_files[0]), "x,y\n1,2\n3,4\n");
    }

    #[test]
    fn test_filter_failure_abandons_file_only() {
        let (_dir, config) = setup(
            &[("a.csv", "n\n1\n0\n2\n"), ("b.csv", "n\n5\n")],
            r#", "filter_conditions": ["10 // @[n] > 0"]"#,
        );
        let mut reporter = MemoryReporter::new();
        let summary = run(&config, &FunctionRegistry::new(), &mut reporter).unwrap();

        assert_eq!(summary.files_failed, 1);
        assert_eq!(summary.files_processed, 1);
        // row 1 of a.csv, then b.csv
        assert_eq!(output(&summary.output_files[0]), "n\n1\n5\n");
        let errors = reporter.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("Filter condition failed"));
        assert!(errors[0].file.as_ref().unwrap().ends_with("a.csv"));
    }

    #[test]
    fn test_added_columns_see_earlier_results() {
        let (_dir, config) = setup(
            &[("a.csv", "a\n2\n")],
            r#", "add_columns": {"double": "@[a] * 2", "quad": "@[double] * 2"}"#,
        );
        let summary = run(&config, &FunctionRegistry::new(), &mut MemoryReporter::new()).unwrap();
        assert_eq!(output(&summary.output_files[0]), "a,double,quad\n2,4,8\n");
    }

    #[test]
    fn test_failed_column_keeps_input_value() {
        let (_dir, config) = setup(
            &[("a.csv", "a,b\nx,1\n")],
            r#", "add_columns": {"a": "$[a] + @[b]", "c": "$[a] + '!'"}"#,
        );
        let mut reporter = MemoryReporter::new();
        let summary = run(&config, &FunctionRegistry::new(), &mut reporter).unwrap();

        assert_eq!(summary.column_failures, 1);
        assert_eq!(summary.rows_emitted, 1);
        assert_eq!(output(&summary.output_files[0]), "a,b,c\nx,1,x!\n");
    }

    #[test]
    fn test_debug_traces() {
        let (_dir, config) = setup(
            &[("a.csv", "v\n1\n20\n")],
            r#", "debug": true, "filter_conditions": ["@[v] > 5"], "add_columns": {"w": "$[v] + $#"}"#,
        );
        let mut reporter = MemoryReporter::new();
        run(&config, &FunctionRegistry::new(), &mut reporter).unwrap();

        assert!(reporter.debug_started);
        let traces: Vec<_> = reporter.debug_entries().iter().map(|e| e.message.clone()).collect();
        assert_eq!(
            traces,
            vec![
                "Row skipped by filter: 1 > 5".to_string(),
                "Added column [w]: '20' + '1' = 201".to_string(),
            ]
        );
    }

    #[test]
    fn test_unquotable_value_abandons_file() {
        let (_dir, mut config) = setup(
            &[("a.csv", "a,b\nok,1\n\"x,y\",2\nlater,3\n"), ("b.csv", "a,b\nnext,4\n")],
            "",
        );
        config.quote_mode = crate::config::QuoteMode::None;
        let mut reporter = MemoryReporter::new();
        let summary = run(&config, &FunctionRegistry::new(), &mut reporter).unwrap();

        assert_eq!(summary.files_failed, 1);
        assert_eq!(summary.files_processed, 1);
        assert_eq!(output(&summary.output_files[0]), "a,b\nok,1\nnext,4\n");
        let errors = reporter.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("needs quoting"));
        assert!(errors[0].file.as_ref().unwrap().ends_with("a.csv"));
    }

    #[test]
    fn test_discovery_errors() {
        let (dir, config) = setup(&[], "");
        let result = run(&config, &FunctionRegistry::new(), &mut MemoryReporter::new());
        assert!(matches!(result, Err(PipelineError::NoInputFiles(_))));
        // output directory is created before discovery
        assert!(dir.path().join("out").is_dir());

        let (_dir, config) = setup(&[("empty.csv", "")], "");
        let mut reporter = MemoryReporter::new();
        let result = run(&config, &FunctionRegistry::new(), &mut reporter);
        assert!(matches!(result, Err(PipelineError::NoHeaders)));
        assert_eq!(reporter.errors().len(), 1);
    }

    #[test]
    fn test_unreadable_header_still_processed_in_main_pass() {
        let (_dir, config) = setup(&[("a.csv", "x\n1\n"), ("b.csv", "")], "");
        let mut reporter = MemoryReporter::new();
        let summary = run(&config, &FunctionRegistry::new(), &mut reporter).unwrap();

        // header error from both passes
        assert_eq!(reporter.errors().len(), 2);
        assert_eq!(summary.files_failed, 1);
        assert_eq!(summary.rows_emitted, 1);
    }
}
