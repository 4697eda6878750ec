//! csvsc CLI - Filter, extend and split CSV/TSV files
//!
//! # Main Command
//!
//! ```bash
//! csvsc                              # Run with ./csvsc.json
//! csvsc --config job.json            # Run with another config
//! csvsc run --plugin-dir ./fn        # Same, explicit subcommand
//! ```
//!
//! # Helper Commands
//!
//! ```bash
//! csvsc headers                      # Print the unified header
//! csvsc eval '$[a] + $#' -v a=10     # Try a formula on sample values
//! csvsc functions                    # List loaded custom functions
//! ```

use clap::{Args, Parser, Subcommand};
use csvsc::{
    input_files, run, unify_headers, ColumnMap, Config, Evaluator, FileReporter, Formula,
    FunctionRegistry, LogEntry, MemoryReporter, Reporter, DEFAULT_CONFIG_PATH, DEFAULT_DEBUG_LOG,
    DEFAULT_ERROR_LOG, DEFAULT_PLUGIN_DIR,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "csvsc")]
#[command(about = "Filter, extend and split CSV/TSV files with formula rules", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct RunArgs {
    /// Configuration document
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Custom function directory (default: `fn` next to the executable)
    #[arg(long)]
    plugin_dir: Option<PathBuf>,

    /// Error log, appended to
    #[arg(long, default_value = DEFAULT_ERROR_LOG)]
    error_log: PathBuf,

    /// Debug log, truncated when `debug` is set in the config
    #[arg(long, default_value = DEFAULT_DEBUG_LOG)]
    debug_log: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the input directory (the default command)
    Run(RunArgs),

    /// Print the unified header of the input files
    Headers {
        /// Configuration document
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Evaluate a formula against sample column values
    Eval {
        /// Formula, e.g. '$[column1] + $#'
        expression: String,

        /// Column value as name=value (repeatable)
        #[arg(short = 'v', long = "value", value_parser = parse_column)]
        values: Vec<(String, String)>,

        /// Sequence number for `$#` / `@#`
        #[arg(long, default_value_t = 1)]
        seq: u64,

        /// Custom function directory
        #[arg(long)]
        plugin_dir: Option<PathBuf>,
    },

    /// List the custom functions that would be loaded
    Functions {
        /// Custom function directory
        #[arg(long)]
        plugin_dir: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        None => cmd_run(cli.run),
        Some(Commands::Run(args)) => cmd_run(args),
        Some(Commands::Headers { config }) => cmd_headers(config),
        Some(Commands::Eval {
            expression,
            values,
            seq,
            plugin_dir,
        }) => cmd_eval(&expression, values, seq, plugin_dir),
        Some(Commands::Functions { plugin_dir }) => cmd_functions(plugin_dir),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn parse_column(arg: &str) -> Result<(String, String), String> {
    arg.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{}'", arg))
}

/// `fn` next to the running executable, or in the working directory if
/// the executable path is unknown.
fn default_plugin_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_PLUGIN_DIR)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PLUGIN_DIR))
}

fn load_functions(plugin_dir: Option<PathBuf>, reporter: &mut dyn Reporter) -> FunctionRegistry {
    let dir = plugin_dir.unwrap_or_else(default_plugin_dir);
    let (functions, errors) = FunctionRegistry::load(&dir);
    for e in errors {
        reporter.log(LogEntry::error(e.to_string()));
    }
    functions
}

fn cmd_run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut reporter = FileReporter::new(&args.error_log, &args.debug_log);
    reporter.log(LogEntry::info("Processing CSV/TSV files."));

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            reporter.log(LogEntry::error(e.to_string()));
            return Err(e.into());
        }
    };
    let functions = load_functions(args.plugin_dir, &mut reporter);

    match run(&config, &functions, &mut reporter) {
        Ok(summary) => {
            reporter.log(LogEntry::info(format!(
                "Done: {} of {} rows written to {} file(s), \
                 {} filtered, {} rejected, {} file(s) failed",
                summary.rows_emitted,
                summary.rows_read,
                summary.output_files.len(),
                summary.rows_filtered,
                summary.rows_rejected,
                summary.files_failed,
            )));
            let incomplete = summary.files_failed > 0
                || summary.rows_rejected > 0
                || summary.column_failures > 0;
            if incomplete {
                eprintln!("Some input could not be processed, see {}", args.error_log.display());
            }
            Ok(())
        }
        Err(e) => {
            reporter.log(LogEntry::error(e.to_string()));
            Err(e.into())
        }
    }
}

fn cmd_headers(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(&config_path)?;
    let files = input_files(&config)?;

    let mut reporter = MemoryReporter::new();
    let header = unify_headers(&config, &files, &mut reporter);
    for entry in reporter.errors() {
        let file = entry.file.as_ref().map(|p| p.display().to_string()).unwrap_or_default();
        eprintln!("{}: {}", file, entry.message);
    }

    for name in header? {
        println!("{}", name);
    }
    Ok(())
}

fn cmd_eval(
    expression: &str,
    values: Vec<(String, String)>,
    seq: u64,
    plugin_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut reporter = MemoryReporter::new();
    let functions = load_functions(plugin_dir, &mut reporter);
    for entry in reporter.errors() {
        eprintln!("{}", entry.message);
    }

    let columns: ColumnMap = values.into_iter().collect();
    let evaluator = Evaluator::new(seq, &columns, &functions);
    let formula = Formula::compile(expression);

    eprintln!("Substituted: {}", formula.substituted(&evaluator));
    let value = formula.evaluate(&evaluator)?;
    println!("{}", value);
    Ok(())
}

fn cmd_functions(plugin_dir: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let dir = plugin_dir.unwrap_or_else(default_plugin_dir);
    let (functions, errors) = FunctionRegistry::load(&dir);
    for e in &errors {
        eprintln!("{}", e);
    }

    if functions.is_empty() {
        eprintln!("No custom functions in {}", dir.display());
        return Ok(());
    }

    for name in functions.names() {
        let Some(function) = functions.get(name) else {
            continue;
        };
        let origin = function
            .origin()
            .and_then(|p| p.file_name())
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        println!("{}({})  {}", name, function.params().join(", "), origin);
    }
    Ok(())
}
