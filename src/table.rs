//! In-memory tabular datasets shared by the extraction, validation and
//! normalization stages.
//!
//! A [`Table`] is a list of ordered column names plus rows of [`Cell`]s.
//! Null cells are kept distinct from zero or empty text so that
//! expectation checks can see them.

use std::collections::HashMap;
use std::io::Read;

use chrono::NaiveDate;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Nested(Value),
}

impl Cell {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map(Self::Float).unwrap_or(Self::Null),
            },
            Value::String(s) => Self::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => Self::Nested(value.clone()),
        }
    }

    /// Fields are trimmed. Empty is null; numbers parse as integer first,
    /// then float.
    pub fn from_csv_field(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return Self::Float(f);
        }
        Self::Text(trimmed.to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Only numeric cells can be negative.
    pub fn is_negative(&self) -> bool {
        match self {
            Self::Int(i) => *i < 0,
            Self::Float(f) => *f < 0.0,
            _ => false,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_nested(&self) -> Option<&Value> {
        match self {
            Self::Nested(v) => Some(v),
            _ => None,
        }
    }
}

/// Hashable view of a cell, used for duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum CellKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(String),
    Date(NaiveDate),
    Nested(String),
}

impl From<&Cell> for CellKey {
    fn from(cell: &Cell) -> Self {
        match cell {
            Cell::Null => Self::Null,
            Cell::Bool(b) => Self::Bool(*b),
            Cell::Int(i) => Self::Int(*i),
            // -0.0 and 0.0 compare equal and must land on the same key
            Cell::Float(f) => Self::Float(if *f == 0.0 { 0 } else { f.to_bits() }),
            Cell::Text(s) => Self::Text(s.clone()),
            Cell::Date(d) => Self::Date(*d),
            Cell::Nested(v) => Self::Nested(v.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("row has {found} cells, expected {expected}")]
    RowArity { expected: usize, found: usize },
    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new<I, S>(columns: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::default();
        for column in columns {
            let column = column.into();
            if table.index.contains_key(&column) {
                return Err(TableError::DuplicateColumn(column));
            }
            table.index.insert(column.clone(), table.columns.len());
            table.columns.push(column);
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowArity {
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Cell> + '_> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    /// Builds a table from JSON objects. Columns are the union of keys in
    /// first-seen order; keys absent from a record become null cells.
    pub fn from_json_objects(records: &[Map<String, Value>]) -> Self {
        let mut table = Self::default();
        for record in records {
            for key in record.keys() {
                if !table.index.contains_key(key) {
                    table.index.insert(key.clone(), table.columns.len());
                    table.columns.push(key.clone());
                }
            }
        }

        for record in records {
            let row = table
                .columns
                .iter()
                .map(|column| record.get(column).map(Cell::from_json).unwrap_or(Cell::Null))
                .collect();
            table.rows.push(row);
        }

        table
    }

    /// Reads a headed CSV document. Header names are trimmed and must be
    /// unique; short records are padded with nulls.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let mut table = Self::new(headers.iter().map(str::trim))?;

        for record in reader.records() {
            let record = record?;
            let row = (0..table.columns.len())
                .map(|idx| {
                    record
                        .get(idx)
                        .map(Cell::from_csv_field)
                        .unwrap_or(Cell::Null)
                })
                .collect();
            table.rows.push(row);
        }

        Ok(table)
    }
}
