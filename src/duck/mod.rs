// src/duck/mod.rs

use crate::error::LoaderError;
use crate::sheets::{CellValue, SheetTable};
use duckdb::types::{TimeUnit, ToSqlOutput, Value};
use duckdb::{appender_params_from_iter, Connection, ToSql};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tracing::{debug, info};

static UNSAFE_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^0-9A-Za-z_]").expect("identifier pattern should parse"));

/// Normalize a filesystem or sheet name into a database identifier: every
/// character outside `[0-9A-Za-z_]` becomes an underscore, case preserved.
/// Total and pure; collisions between distinct inputs are the caller's to
/// detect.
pub fn normalize_identifier(name: &str) -> String {
    UNSAFE_IDENT.replace_all(name, "_").into_owned()
}

fn quoted(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// DuckDB column types the loader emits, narrowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Boolean,
    BigInt,
    Double,
    Timestamp,
    Varchar,
}

impl ColumnType {
    const fn as_sql(&self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::BigInt => "BIGINT",
            Self::Double => "DOUBLE",
            Self::Timestamp => "TIMESTAMP",
            Self::Varchar => "VARCHAR",
        }
    }
}

/// Pick one type for a column from its non-null cells: all-bool, all-int,
/// numeric mix, all-datetime, otherwise VARCHAR. An entirely null column is
/// VARCHAR.
fn infer_column_type(rows: &[Vec<CellValue>], column: usize) -> ColumnType {
    let mut saw_value = false;
    let (mut all_bool, mut all_int, mut all_numeric, mut all_datetime) =
        (true, true, true, true);

    for row in rows {
        match row.get(column) {
            None | Some(CellValue::Null) => continue,
            Some(value) => {
                saw_value = true;
                all_bool &= matches!(value, CellValue::Bool(_));
                all_int &= matches!(value, CellValue::Int(_));
                all_numeric &= matches!(value, CellValue::Int(_) | CellValue::Float(_));
                all_datetime &= matches!(value, CellValue::DateTime(_));
            }
        }
    }

    if !saw_value {
        ColumnType::Varchar
    } else if all_bool {
        ColumnType::Boolean
    } else if all_int {
        ColumnType::BigInt
    } else if all_numeric {
        ColumnType::Double
    } else if all_datetime {
        ColumnType::Timestamp
    } else {
        ColumnType::Varchar
    }
}

fn render(value: &CellValue) -> String {
    match value {
        CellValue::Null => String::new(),
        CellValue::Bool(b) => b.to_string(),
        CellValue::Int(i) => i.to_string(),
        CellValue::Float(f) => f.to_string(),
        CellValue::Text(s) => s.clone(),
        CellValue::DateTime(dt) => dt.to_string(),
    }
}

/// One cell bound for the appender, coerced to its column's inferred type.
struct SqlCell<'a> {
    value: &'a CellValue,
    ty: ColumnType,
}

impl ToSql for SqlCell<'_> {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        let out = match (self.value, self.ty) {
            (CellValue::Null, _) => Value::Null,
            (CellValue::Bool(b), ColumnType::Boolean) => Value::Boolean(*b),
            (CellValue::Int(i), ColumnType::BigInt) => Value::BigInt(*i),
            (CellValue::Int(i), ColumnType::Double) => Value::Double(*i as f64),
            (CellValue::Float(f), ColumnType::Double) => Value::Double(*f),
            (CellValue::DateTime(dt), ColumnType::Timestamp) => Value::Timestamp(
                TimeUnit::Microsecond,
                dt.and_utc().timestamp_micros(),
            ),
            // Strays in a VARCHAR column land as their display form.
            (value, _) => Value::Text(render(value)),
        };
        Ok(ToSqlOutput::Owned(out))
    }
}

/// Open (or create) the destination database file.
pub fn open_db(path: &Path) -> Result<Connection, LoaderError> {
    Connection::open(path).map_err(|source| LoaderError::Storage {
        context: format!("opening {}", path.display()),
        source,
    })
}

/// Create the schema if it does not exist yet. Never drops anything.
pub fn ensure_schema(conn: &Connection, schema: &str) -> Result<(), LoaderError> {
    conn.execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema)), [])
        .map_err(|source| LoaderError::CreateSchema {
            schema: schema.to_string(),
            source,
        })?;
    Ok(())
}

/// Create (or replace) `schema.table` from the extracted sheet and bulk-load
/// its rows through the appender, preserving row and column order.
///
/// Each call is its own unit of work: a failure here never rolls back tables
/// loaded earlier in the run. Returns the number of rows appended.
pub fn load_table(
    conn: &Connection,
    schema: &str,
    table: &str,
    sheet: &SheetTable,
) -> Result<usize, LoaderError> {
    let qualified = format!("{}.{}", schema, table);
    let types: Vec<ColumnType> = (0..sheet.columns.len())
        .map(|column| infer_column_type(&sheet.rows, column))
        .collect();

    let column_defs = sheet
        .columns
        .iter()
        .zip(&types)
        .map(|(name, ty)| format!("{} {}", quoted(name), ty.as_sql()))
        .collect::<Vec<_>>()
        .join(", ");

    // Replace, not append: a re-run with the same source file must converge
    // on identical table contents.
    let sql = format!(
        "CREATE OR REPLACE TABLE {}.{} ({})",
        quoted(schema),
        quoted(table),
        column_defs
    );
    debug!(table = %qualified, "creating table");
    conn.execute(&sql, [])
        .map_err(|source| LoaderError::CreateTable {
            table: qualified.clone(),
            source,
        })?;

    let null = CellValue::Null;
    let mut appender =
        conn.appender_to_db(table, schema)
            .map_err(|source| LoaderError::Append {
                table: qualified.clone(),
                source,
            })?;
    for row in &sheet.rows {
        let cells: Vec<SqlCell> = types
            .iter()
            .enumerate()
            .map(|(column, ty)| SqlCell {
                value: row.get(column).unwrap_or(&null),
                ty: *ty,
            })
            .collect();
        appender
            .append_row(appender_params_from_iter(cells))
            .map_err(|source| LoaderError::Append {
                table: qualified.clone(),
                source,
            })?;
    }
    appender.flush().map_err(|source| LoaderError::Append {
        table: qualified.clone(),
        source,
    })?;

    info!(table = %qualified, rows = sheet.rows.len(), "loaded");
    Ok(sheet.rows.len())
}

/// All user tables as `schema.table` strings, ordered.
pub fn list_tables(conn: &Connection) -> Result<Vec<String>, LoaderError> {
    let storage = |source| LoaderError::Storage {
        context: "listing tables".to_string(),
        source,
    };
    let mut stmt = conn
        .prepare(
            "SELECT table_schema || '.' || table_name
             FROM information_schema.tables
             WHERE table_schema NOT IN ('information_schema', 'pg_catalog')
             ORDER BY table_schema, table_name",
        )
        .map_err(storage)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(storage)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(storage)?;
    Ok(names)
}

/// Run one SQL statement and return column names plus stringified rows for
/// display. An empty result keeps its column header.
pub fn query_rows(
    conn: &Connection,
    sql: &str,
) -> Result<(Vec<String>, Vec<Vec<String>>), LoaderError> {
    let storage = |source| LoaderError::Storage {
        context: "running query".to_string(),
        source,
    };
    let mut stmt = conn.prepare(sql).map_err(storage)?;
    let mut rows = stmt.query([]).map_err(storage)?;

    let mut columns: Vec<String> = Vec::new();
    let mut rendered: Vec<Vec<String>> = Vec::new();
    while let Some(row) = rows.next().map_err(storage)? {
        let stmt = row.as_ref();
        if columns.is_empty() {
            columns = stmt.column_names().iter().map(|s| s.to_string()).collect();
        }
        let mut out = Vec::with_capacity(stmt.column_count());
        for index in 0..stmt.column_count() {
            let value: Value = row.get(index).map_err(storage)?;
            out.push(render_sql_value(&value));
        }
        rendered.push(out);
    }
    Ok((columns, rendered))
}

fn render_sql_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::TinyInt(i) => i.to_string(),
        Value::SmallInt(i) => i.to_string(),
        Value::Int(i) => i.to_string(),
        Value::BigInt(i) => i.to_string(),
        Value::UTinyInt(i) => i.to_string(),
        Value::USmallInt(i) => i.to_string(),
        Value::UInt(i) => i.to_string(),
        Value::UBigInt(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Double(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Timestamp(TimeUnit::Microsecond, micros) => chrono::DateTime::from_timestamp_micros(*micros)
            .map(|dt| dt.naive_utc().to_string())
            .unwrap_or_else(|| micros.to_string()),
        other => format!("{:?}", other),
    }
}
