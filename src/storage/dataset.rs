use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// One dataset row: column -> cell, `None` for empty cells
pub type Row = HashMap<String, Option<String>>;

/// Rows read from a dataset file, with column names in first-seen order
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Dataset {
    /// Load a JSON or YAML list of row objects, picked by file extension
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading dataset from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read dataset: {}", path.display()))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        let value: Value = match extension.as_deref() {
            Some("json") => serde_json::from_str(&contents)
                .context(format!("Failed to parse JSON dataset: {}", path.display()))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&contents)
                .context(format!("Failed to parse YAML dataset: {}", path.display()))?,
            _ => anyhow::bail!(
                "Unsupported dataset format: {} (expected .json, .yaml or .yml)",
                path.display()
            ),
        };

        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Array(items) = value else {
            anyhow::bail!("Dataset must be a list of rows");
        };

        let mut dataset = Dataset::default();

        for (index, item) in items.into_iter().enumerate() {
            let Value::Object(fields) = item else {
                anyhow::bail!("Row {} is not an object", index + 1);
            };

            let mut row = Row::new();
            for (column, cell) in fields {
                if !dataset.columns.contains(&column) {
                    dataset.columns.push(column.clone());
                }
                row.insert(column, cell_text(cell));
            }
            dataset.rows.push(row);
        }

        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn cell_text(cell: Value) -> Option<String> {
    match cell {
        Value::Null => None,
        Value::String(text) if text.trim().is_empty() => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}
