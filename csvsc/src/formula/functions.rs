//! Custom function registry
//!
//! Functions callable from formulas come from two places:
//!
//! - plugin files: every `*.fx` file in the plugin directory, loaded in file
//!   name order. Each non-comment line defines one function written in the
//!   formula language, e.g. `pad(s, n) = s + ' ' * (n - 1)`. Names starting
//!   with `_` are private helpers, callable only from the same file.
//! - native functions registered from Rust with [`FunctionRegistry::register_native`].
//!
//! When two sources export the same name, the one loaded last wins.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::ast::{Context, Expr};
use super::evaluator::{eval, Scope};
use super::parser::parse;
use super::value::Value;
use crate::error::{EvalCause, PluginError};

/// Extension of plugin files.
pub const PLUGIN_EXTENSION: &str = "fx";

/// Directory searched for plugins, relative to the executable.
pub const DEFAULT_PLUGIN_DIR: &str = "fn";

/// Nested plugin calls allowed before evaluation is aborted.
pub const MAX_CALL_DEPTH: usize = 64;

/// `name(params) = body`
static DEFINITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)\s*=(.*)$").expect("valid regex")
});

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

const KEYWORDS: &[&str] = &["and", "or", "not", "True", "False"];

/// Signature of a function implemented in Rust.
pub type NativeFn = dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync;

/// A function defined in a plugin file.
#[derive(Debug)]
struct ScriptFunction {
    name: String,
    params: Vec<String>,
    body: Expr,
}

/// All functions from one plugin file. Private helpers live here too.
#[derive(Debug)]
pub struct PluginUnit {
    path: PathBuf,
    functions: Vec<ScriptFunction>,
    by_name: HashMap<String, usize>,
}

impl PluginUnit {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Functions visible outside the file, with their index in it.
    pub fn exported(&self) -> impl Iterator<Item = (usize, &str)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(index, f)| (index, f.name.as_str()))
            .filter(|(_, name)| !name.starts_with('_'))
    }

    fn invoke(&self, index: usize, args: &[Value], depth: usize) -> Result<Value, EvalCause> {
        let function = &self.functions[index];
        if args.len() != function.params.len() {
            return Err(EvalCause::Arity {
                name: function.name.clone(),
                expected: function.params.len(),
                given: args.len(),
            });
        }
        if depth > MAX_CALL_DEPTH {
            return Err(EvalCause::RecursionLimit(function.name.clone()));
        }

        let frame = Frame {
            unit: self,
            function,
            args,
            depth,
        };
        eval(&function.body, &frame)
    }
}

/// Evaluation scope of one plugin function call.
struct Frame<'a> {
    unit: &'a PluginUnit,
    function: &'a ScriptFunction,
    args: &'a [Value],
    depth: usize,
}

impl Scope for Frame<'_> {
    fn column(&self, name: &str, _context: Context) -> Result<Value, EvalCause> {
        Err(EvalCause::UnknownName(format!("[{}]", name)))
    }

    fn sequence(&self, _context: Context) -> Result<Value, EvalCause> {
        Err(EvalCause::UnknownName("#".to_string()))
    }

    fn name(&self, name: &str) -> Result<Value, EvalCause> {
        self.function
            .params
            .iter()
            .position(|p| p == name)
            .map(|i| self.args[i].clone())
            .ok_or_else(|| EvalCause::UnknownName(name.to_string()))
    }

    fn call(&self, name: &str, args: &[Value]) -> Result<Value, EvalCause> {
        let index = *self
            .unit
            .by_name
            .get(name)
            .ok_or_else(|| EvalCause::UnknownFunction(name.to_string()))?;
        self.unit.invoke(index, args, self.depth + 1)
    }
}

/// A callable entry in the registry.
#[derive(Clone)]
pub enum CustomFunction {
    Native(Arc<NativeFn>),
    Script { unit: Arc<PluginUnit>, index: usize },
}

impl CustomFunction {
    /// Call with already evaluated arguments.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, EvalCause> {
        match self {
            CustomFunction::Native(f) => f(args).map_err(|message| EvalCause::Function {
                name: name.to_string(),
                message,
            }),
            CustomFunction::Script { unit, index } => unit.invoke(*index, args, 1),
        }
    }

    /// Declared parameter count; `None` for native functions.
    pub fn arity(&self) -> Option<usize> {
        match self {
            CustomFunction::Native(_) => None,
            CustomFunction::Script { unit, index } => Some(unit.functions[*index].params.len()),
        }
    }

    /// Plugin file the function came from.
    pub fn origin(&self) -> Option<&Path> {
        match self {
            CustomFunction::Native(_) => None,
            CustomFunction::Script { unit, .. } => Some(unit.path()),
        }
    }

    pub fn params(&self) -> &[String] {
        match self {
            CustomFunction::Native(_) => &[],
            CustomFunction::Script { unit, index } => &unit.functions[*index].params,
        }
    }
}

impl fmt::Debug for CustomFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CustomFunction::Native(_) => f.write_str("Native(..)"),
            CustomFunction::Script { unit, index } => f
                .debug_struct("Script")
                .field("path", &unit.path)
                .field("name", &unit.functions[*index].name)
                .finish(),
        }
    }
}

/// Namespace of custom functions shared by every formula in a run.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, CustomFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every plugin file in `dir`.
    ///
    /// A missing directory gives an empty registry. A file that fails to
    /// load contributes nothing; its error is returned alongside so the
    /// caller can report it and keep going.
    pub fn load(dir: &Path) -> (Self, Vec<PluginError>) {
        let mut registry = Self::new();
        let mut errors = Vec::new();

        if !dir.is_dir() {
            return (registry, errors);
        }

        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(source) => {
                errors.push(PluginError::Io {
                    path: dir.to_path_buf(),
                    source,
                });
                return (registry, errors);
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file() && path.extension().is_some_and(|e| e == PLUGIN_EXTENSION)
            })
            .collect();
        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        for path in paths {
            if let Err(e) = registry.load_file(&path) {
                errors.push(e);
            }
        }

        (registry, errors)
    }

    /// Load one plugin file and register its exported functions.
    /// Returns the number of functions registered.
    pub fn load_file(&mut self, path: &Path) -> Result<usize, PluginError> {
        let source = fs::read_to_string(path).map_err(|source| PluginError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let unit = Arc::new(parse_plugin(path, &source)?);

        let mut count = 0;
        for (index, name) in unit.exported() {
            self.functions.insert(
                name.to_string(),
                CustomFunction::Script {
                    unit: Arc::clone(&unit),
                    index,
                },
            );
            count += 1;
        }
        Ok(count)
    }

    /// Register a function implemented in Rust, replacing any existing one.
    pub fn register_native<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions
            .insert(name.to_string(), CustomFunction::Native(Arc::new(f)));
    }

    pub fn get(&self, name: &str) -> Option<&CustomFunction> {
        self.functions.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Parse the text of a plugin file.
///
/// Blank lines and lines starting with `#` are ignored. Every function body
/// is checked up front: it may only use its own parameters and call
/// functions defined in the same file, and may not read row placeholders.
pub fn parse_plugin(path: &Path, source: &str) -> Result<PluginUnit, PluginError> {
    let definition_error = |line: usize, message: String| PluginError::Definition {
        path: path.to_path_buf(),
        line,
        message,
    };

    let mut functions = Vec::new();
    let mut by_name = HashMap::new();
    let mut lines = Vec::new();

    for (i, text) in source.lines().enumerate() {
        let line = i + 1;
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let caps = DEFINITION.captures(text).ok_or_else(|| {
            definition_error(line, "expected `name(params) = expression`".to_string())
        })?;
        let name = caps[1].to_string();
        if KEYWORDS.contains(&name.as_str()) {
            return Err(definition_error(line, format!("'{}' is a reserved word", name)));
        }

        let params = parse_params(&caps[2]).map_err(|m| definition_error(line, m))?;
        let body = parse(caps[3].trim())
            .map_err(|cause| definition_error(line, cause.to_string()))?;
        if body.uses_placeholders() {
            return Err(definition_error(
                line,
                "row placeholders are not available inside functions".to_string(),
            ));
        }

        let mut unknown = None;
        body.walk(&mut |node| {
            if let Expr::Name(n) = node {
                if unknown.is_none() && !params.contains(n) {
                    unknown = Some(n.clone());
                }
            }
        });
        if let Some(n) = unknown {
            let message = format!("name '{}' is not a parameter of {}", n, name);
            return Err(definition_error(line, message));
        }

        if by_name.insert(name.clone(), functions.len()).is_some() {
            return Err(definition_error(line, format!("function '{}' is defined twice", name)));
        }
        functions.push(ScriptFunction { name, params, body });
        lines.push(line);
    }

    // Calls are resolved within the file, so every target must exist here.
    for (function, line) in functions.iter().zip(&lines) {
        let mut missing = None;
        function.body.walk(&mut |node| {
            if let Expr::Call { name, .. } = node {
                if missing.is_none() && !by_name.contains_key(name) {
                    missing = Some(name.clone());
                }
            }
        });
        if let Some(n) = missing {
            return Err(definition_error(
                *line,
                format!("function '{}' is not defined in this file", n),
            ));
        }
    }

    Ok(PluginUnit {
        path: path.to_path_buf(),
        functions,
        by_name,
    })
}

fn parse_params(list: &str) -> Result<Vec<String>, String> {
    let list = list.trim();
    if list.is_empty() {
        return Ok(Vec::new());
    }

    let mut seen = HashSet::new();
    let mut params = Vec::new();
    for raw in list.split(',') {
        let param = raw.trim();
        if !IDENTIFIER.is_match(param) || KEYWORDS.contains(&param) {
            return Err(format!("invalid parameter name '{}'", param));
        }
        if !seen.insert(param) {
            return Err(format!("duplicate parameter '{}'", param));
        }
        params.push(param.to_string());
    }
    Ok(params)
}
