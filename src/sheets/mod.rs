// src/sheets/mod.rs

use crate::error::LoaderError;
use calamine::{open_workbook, Data, DataType, Reader, Xlsx};
use chrono::NaiveDateTime;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One cell, reduced to the closed set of native types the loader preserves.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
}

/// A fully extracted worksheet: header-derived column names plus data rows
/// in source order. Rows are rectangular, one value per column.
#[derive(Debug)]
pub struct SheetTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

/// Worksheets whose name carries the notes token hold explanatory metadata
/// rather than indicator data and are never surfaced past extraction. The
/// token matches case-insensitively at any position.
pub fn is_notes_sheet(name: &str) -> bool {
    name.to_lowercase().contains("notes")
}

/// Column name for a header cell. Blank headers get the parser-default
/// `columnN` name instead of being dropped.
fn header_name(cell: &Data, index: usize) -> String {
    let name = match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 => (*f as i64).to_string(),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_datetime()
            .map(|dt| dt.to_string())
            .unwrap_or_default(),
        _ => String::new(),
    };
    if name.is_empty() {
        format!("column{}", index + 1)
    } else {
        name
    }
}

fn cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Null,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::Int(i) => CellValue::Int(*i),
        // xlsx stores every number as a float; integral values are integers
        // as far as column typing is concerned.
        Data::Float(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 => {
            CellValue::Int(*f as i64)
        }
        Data::Float(f) => CellValue::Float(*f),
        Data::DateTime(_) | Data::DateTimeIso(_) => match cell.as_datetime() {
            Some(dt) => CellValue::DateTime(dt),
            None => CellValue::Text(cell.to_string()),
        },
        Data::DurationIso(s) => CellValue::Text(s.clone()),
        // Formula error cells carry no loadable value.
        Data::Error(_) => CellValue::Null,
    }
}

/// Lazy, finite, non-restartable reader over the loadable sheets of one
/// workbook. Iteration yields `(sheet name, extraction result)` pairs; a
/// corrupt or empty sheet errors on its own without ending the sequence.
pub struct SheetReader {
    path: PathBuf,
    workbook: Xlsx<BufReader<File>>,
    names: Vec<String>,
    next: usize,
}

impl SheetReader {
    /// Open the workbook and enumerate its loadable sheets. An unreadable
    /// container is fatal: nothing downstream can proceed without it.
    pub fn open(path: &Path) -> Result<Self, LoaderError> {
        let workbook: Xlsx<_> =
            open_workbook(path).map_err(|source| LoaderError::Workbook {
                path: path.to_path_buf(),
                source,
            })?;
        let names: Vec<String> = workbook
            .sheet_names()
            .iter()
            .filter(|name| !is_notes_sheet(name))
            .cloned()
            .collect();
        debug!(file = %path.display(), sheets = names.len(), "opened workbook");
        Ok(Self {
            path: path.to_path_buf(),
            workbook,
            names,
            next: 0,
        })
    }

    /// Names of the sheets iteration will yield, in workbook order, with
    /// notes sheets already filtered out.
    pub fn sheet_names(&self) -> &[String] {
        &self.names
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn extract(&mut self, name: &str) -> Result<SheetTable, LoaderError> {
        let range = self
            .workbook
            .worksheet_range(name)
            .map_err(|source| LoaderError::Sheet {
                sheet: name.to_string(),
                source,
            })?;
        if range.is_empty() {
            return Err(LoaderError::EmptySheet {
                sheet: name.to_string(),
            });
        }

        let mut rows = range.rows();
        let header = rows.next().ok_or_else(|| LoaderError::EmptySheet {
            sheet: name.to_string(),
        })?;
        let columns: Vec<String> = header
            .iter()
            .enumerate()
            .map(|(index, cell)| header_name(cell, index))
            .collect();
        let rows: Vec<Vec<CellValue>> = rows
            .map(|row| row.iter().map(cell_value).collect())
            .collect();

        Ok(SheetTable {
            name: name.to_string(),
            columns,
            rows,
        })
    }
}

impl Iterator for SheetReader {
    type Item = (String, Result<SheetTable, LoaderError>);

    fn next(&mut self) -> Option<Self::Item> {
        let name = self.names.get(self.next)?.clone();
        self.next += 1;
        let result = self.extract(&name);
        Some((name, result))
    }
}
