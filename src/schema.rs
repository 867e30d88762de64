//! Table schema bootstrap: column types inferred from the first batch, the
//! destructive create statements, and the typed cell values bound into
//! inserts.

use anyhow::{bail, Result};
use chrono::NaiveDateTime;

use crate::normalize::ColumnTransforms;
use crate::source::RawBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    BigInt,
    DoublePrecision,
    Timestamp,
    Text,
}

impl ColumnType {
    pub fn sql_name(self) -> &'static str {
        match self {
            ColumnType::BigInt => "BIGINT",
            ColumnType::DoublePrecision => "DOUBLE PRECISION",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

/// Ordered column structure derived from the bootstrap batch. Every later
/// batch must match it exactly (same names, same order).
#[derive(Debug, Clone)]
pub struct TableSchema {
    columns: Vec<Column>,
}

impl TableSchema {
    /// Infer types from the header plus the sampled cell values of the first
    /// batch. A column with a registered datetime transform is a Timestamp;
    /// otherwise all non-empty values parsing as i64 make a BigInt, all
    /// parsing as f64 a DoublePrecision, anything else Text. Empty cells are
    /// NULLs and carry no type information.
    pub fn infer(batch: &RawBatch, transforms: &ColumnTransforms) -> Self {
        let columns = batch
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let ty = if transforms.is_datetime(name) {
                    ColumnType::Timestamp
                } else {
                    infer_value_type(batch.column_values(idx))
                };
                Column {
                    name: name.clone(),
                    ty,
                }
            })
            .collect();
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Statements for the destructive create: drop any pre-existing table of
    /// the same name, then recreate it empty with this column structure.
    pub fn create_table_sql(&self, table: &str) -> (String, String) {
        let drop = format!("DROP TABLE IF EXISTS {}", quote_ident(table));
        let cols = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.ty.sql_name()))
            .collect::<Vec<_>>()
            .join(", ");
        let create = format!("CREATE TABLE {} ({})", quote_ident(table), cols);
        (drop, create)
    }

    /// Structural compatibility: same column names in the same order.
    pub fn check_compatible(&self, columns: &[String]) -> Result<()> {
        let expected: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        let got: Vec<&str> = columns.iter().map(|c| c.as_str()).collect();
        if expected != got {
            bail!(
                "batch columns {:?} do not match bootstrap schema {:?}",
                got,
                expected
            );
        }
        Ok(())
    }
}

fn infer_value_type<'a>(values: impl Iterator<Item = &'a str>) -> ColumnType {
    let mut saw_value = false;
    let mut all_int = true;
    let mut all_float = true;
    for raw in values {
        let t = raw.trim();
        if t.is_empty() {
            continue;
        }
        saw_value = true;
        if all_int && t.parse::<i64>().is_err() {
            all_int = false;
        }
        if all_float && t.parse::<f64>().is_err() {
            all_float = false;
        }
        if !all_float {
            break;
        }
    }
    if !saw_value {
        return ColumnType::Text;
    }
    if all_int {
        ColumnType::BigInt
    } else if all_float {
        ColumnType::DoublePrecision
    } else {
        ColumnType::Text
    }
}

/// Typed value bound into an INSERT. Ephemeral, one batch at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Timestamp(NaiveDateTime),
    Text(String),
}

/// Double-quote an SQL identifier, escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
