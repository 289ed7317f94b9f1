//! In-memory tables parsed from uploaded CSV files.
//!
//! The first record is the header. Cells are kept as the strings the CSV
//! reader produced, so writing a table back out reproduces the same values.
//! Rows shorter than the header are padded with empty cells; rows wider than
//! the header are rejected.

use std::io::Read;

use csv::{ReaderBuilder, WriterBuilder};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("No columns to parse from file")]
    Empty,

    #[error("Expected {expected} fields in line {line}, saw {found}")]
    TooManyFields {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV write error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// The first rows of a table, as shown to the user before uploading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TablePreview {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub total_rows: usize,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { columns, rows }
    }

    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self, TableError> {
        Self::from_csv_reader(bytes)
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let columns: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        if columns.is_empty() {
            return Err(TableError::Empty);
        }

        let width = columns.len();
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            if record.len() > width {
                return Err(TableError::TooManyFields {
                    line: record.position().map(|p| p.line()).unwrap_or_default(),
                    expected: width,
                    found: record.len(),
                });
            }

            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(width, String::new());
            rows.push(row);
        }

        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn head(&self, n: usize) -> TablePreview {
        TablePreview {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
            total_rows: self.rows.len(),
        }
    }

    /// Serializes the header and rows, without any index column.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, TableError> {
        let mut writer = WriterBuilder::new().flexible(true).from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.into_inner().map_err(|e| TableError::Io(e.into_error()))
    }
}
