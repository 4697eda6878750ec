//! Unified header across input files.

use std::collections::HashSet;

/// Ordered union of column names, first-seen order.
#[derive(Debug, Clone, Default)]
pub struct HeaderUnifier {
    columns: Vec<String>,
    seen: HashSet<String>,
}

impl HeaderUnifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `name` unless it is already present.
    pub fn push(&mut self, name: &str) {
        if self.seen.insert(name.to_string()) {
            self.columns.push(name.to_string());
        }
    }

    pub fn extend<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            self.push(name);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<String> {
        self.columns
    }
}
