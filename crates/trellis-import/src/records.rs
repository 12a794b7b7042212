//! Import rows.

use std::path::Path;

use crate::error::{ImportError, Result};

/// One data row. Missing trailing columns read as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportRow {
    /// 1-based position in the input, header included.
    pub line: usize,
    pub item_type: String,
    pub statement: String,
    pub coding: String,
    pub parent_coding: String,
    pub abbreviated_statement: String,
    pub grades: String,
}

impl ImportRow {
    pub fn from_fields(line: usize, fields: &[String]) -> Result<Self> {
        let col = |i: usize| fields.get(i).map(|s| s.trim().to_string()).unwrap_or_default();
        let row = Self {
            line,
            item_type: col(0),
            statement: col(1),
            coding: col(2),
            parent_coding: col(3),
            abbreviated_statement: col(4),
            grades: col(5),
        };
        if row.item_type.is_empty() {
            return Err(ImportError::row(line, "item type is empty"));
        }
        if row.statement.is_empty() {
            return Err(ImportError::row(line, "statement is empty"));
        }
        Ok(row)
    }

    fn optional(value: &str) -> Option<String> {
        (!value.is_empty()).then(|| value.to_string())
    }

    pub fn coding(&self) -> Option<String> {
        Self::optional(&self.coding)
    }

    pub fn parent_coding(&self) -> Option<&str> {
        (!self.parent_coding.is_empty()).then_some(self.parent_coding.as_str())
    }

    pub fn abbreviated_statement(&self) -> Option<String> {
        Self::optional(&self.abbreviated_statement)
    }
}

/// Parse raw rows. The first row is a header and is skipped, as are rows
/// with no content at all.
pub fn parse_rows(raw: Vec<Vec<String>>) -> Result<Vec<ImportRow>> {
    raw.iter()
        .enumerate()
        .skip(1)
        .filter(|(_, fields)| !is_blank(fields))
        .map(|(i, fields)| ImportRow::from_fields(i + 1, fields))
        .collect()
}

fn is_blank(fields: &[String]) -> bool {
    fields.iter().all(|f| f.trim().is_empty())
}

/// Read rows from a JSON array of string arrays.
pub fn read_rows(path: &Path) -> Result<Vec<ImportRow>> {
    let text = std::fs::read_to_string(path)?;
    rows_from_json(&text)
}

pub fn rows_from_json(text: &str) -> Result<Vec<ImportRow>> {
    let raw: Vec<Vec<String>> = serde_json::from_str(text)?;
    parse_rows(raw)
}
