//! One data record paired with its file's header.

use std::collections::HashMap;

use crate::formula::Columns;

/// Ordered column name to value mapping.
///
/// Projection looks names up exactly; formulas look them up
/// case-insensitively. When a name occurs twice the later value wins.
#[derive(Debug, Clone, Default)]
pub struct Row {
    names: Vec<String>,
    values: Vec<String>,
    exact: HashMap<String, usize>,
    folded: HashMap<String, usize>,
}

impl Row {
    /// Pair `values` with `header`. `None` when the counts differ.
    pub fn from_record(header: &[String], values: Vec<String>) -> Option<Self> {
        if header.len() != values.len() {
            return None;
        }

        let mut row = Row {
            names: Vec::with_capacity(header.len()),
            values: Vec::with_capacity(header.len()),
            ..Default::default()
        };
        for (name, value) in header.iter().zip(values) {
            row.set(name, value);
        }
        Some(row)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.exact.get(name).map(|&i| self.values[i].as_str())
    }

    /// Insert or replace a column value.
    pub fn set(&mut self, name: &str, value: String) {
        let index = match self.exact.get(name) {
            Some(&i) => {
                self.values[i] = value;
                i
            }
            None => {
                self.names.push(name.to_string());
                self.values.push(value);
                let i = self.values.len() - 1;
                self.exact.insert(name.to_string(), i);
                i
            }
        };
        self.folded.insert(name.to_lowercase(), index);
    }

    /// Values for `columns` in order, empty for names the row lacks.
    pub fn project(&self, columns: &[String]) -> Vec<String> {
        columns
            .iter()
            .map(|c| self.get(c).unwrap_or_default().to_string())
            .collect()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Columns for Row {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.folded.get(name).map(|&i| self.values[i].as_str())
    }
}
