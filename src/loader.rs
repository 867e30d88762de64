//! Chunked load pipeline: schema bootstrap from the first batch, then a
//! strictly alternating read-one/write-one loop until the source runs dry.

use std::time::Instant;

use anyhow::{Context, Result};

use crate::db::Db;
use crate::normalize::ColumnTransforms;
use crate::schema::{Cell, ColumnType, TableSchema};
use crate::source::{CsvBatchSource, RawBatch};

/// Totals for the final summary line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub batches: u64,
    pub rows: u64,
}

/// Stream the whole source into `table`.
///
/// The first batch bootstraps the table (destructive create, zero rows) and
/// is then appended like every other batch, so no rows are skipped or
/// duplicated. Any database error mid-run is fatal; re-running from scratch
/// is safe because the create is destructive.
pub async fn load(
    source: &mut CsvBatchSource,
    db: &Db,
    table: &str,
    transforms: &ColumnTransforms,
) -> Result<LoadReport> {
    let first = source
        .next_batch()?
        .context("source contains a header but no data rows")?;

    let schema = TableSchema::infer(&first, transforms);
    tracing::info!(table, columns = schema.len(), "schema bootstrapped from first batch");
    db.create_table(table, &schema).await?;

    let mut report = LoadReport::default();
    let mut batch = first;
    loop {
        let started = Instant::now();
        schema.check_compatible(batch.columns())?;
        let rows = typed_rows(&batch, &schema, transforms, report.batches + 1)?;
        db.append_rows(table, &schema, &rows).await?;
        report.batches += 1;
        report.rows += rows.len() as u64;
        tracing::info!(
            table,
            batch = report.batches,
            rows = rows.len(),
            total_rows = report.rows,
            elapsed_s = started.elapsed().as_secs_f64(),
            "chunk ingested"
        );

        match source.next_batch()? {
            Some(next) => batch = next,
            None => break,
        }
    }
    Ok(report)
}

/// Convert one raw batch into typed cells per the bootstrap schema,
/// normalizing registered datetime columns. A non-empty value that does not
/// fit its column's type is fatal rather than silently coerced; `batch_no`
/// (1-based) places the offending row without re-running the job.
pub fn typed_rows(
    batch: &RawBatch,
    schema: &TableSchema,
    transforms: &ColumnTransforms,
    batch_no: u64,
) -> Result<Vec<Vec<Cell>>> {
    let columns = schema.columns();
    let mut out = Vec::with_capacity(batch.len());
    for (row_idx, record) in batch.rows().iter().enumerate() {
        let mut cells = Vec::with_capacity(columns.len());
        for (col_idx, col) in columns.iter().enumerate() {
            let raw = record.get(col_idx).unwrap_or("").trim();
            let cell = if raw.is_empty() {
                Cell::Null
            } else {
                match col.ty {
                    ColumnType::BigInt => Cell::Int(raw.parse::<i64>().map_err(|e| {
                        value_error(&col.name, col.ty, batch_no, row_idx, raw, &e.to_string())
                    })?),
                    ColumnType::DoublePrecision => {
                        Cell::Float(raw.parse::<f64>().map_err(|e| {
                            value_error(&col.name, col.ty, batch_no, row_idx, raw, &e.to_string())
                        })?)
                    }
                    ColumnType::Timestamp => Cell::Timestamp(
                        transforms.normalize_datetime(&col.name, raw).map_err(|e| {
                            value_error(&col.name, col.ty, batch_no, row_idx, raw, &e.to_string())
                        })?,
                    ),
                    ColumnType::Text => Cell::Text(raw.to_string()),
                }
            };
            cells.push(cell);
        }
        out.push(cells);
    }
    Ok(out)
}

fn value_error(
    column: &str,
    ty: ColumnType,
    batch_no: u64,
    row_idx: usize,
    raw: &str,
    detail: &str,
) -> anyhow::Error {
    anyhow::anyhow!(
        "column {column:?} (batch {batch_no}, row {row_idx}): value {raw:?} does not fit {}: {detail}",
        ty.sql_name()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn batch(columns: &[&str], rows: &[&[&str]]) -> RawBatch {
        let cols: Arc<[String]> = columns.iter().map(|c| c.to_string()).collect();
        let rows = rows
            .iter()
            .map(|r| csv::StringRecord::from(r.to_vec()))
            .collect();
        RawBatch::new(cols, rows)
    }

    #[test]
    fn normalizes_datetime_columns_and_passes_rest_through() {
        let b = batch(
            &["tpep_pickup_datetime", "tpep_dropoff_datetime", "fare", "note"],
            &[&["2021-01-01 00:15:30", "2021-01-01 00:31:02", "12.5", "cash"]],
        );
        let transforms = ColumnTransforms::trip_datetimes();
        let schema = TableSchema::infer(&b, &transforms);
        let rows = typed_rows(&b, &schema, &transforms, 1).unwrap();
        let expected_pickup = NaiveDate::from_ymd_opt(2021, 1, 1)
            .unwrap()
            .and_hms_opt(0, 15, 30)
            .unwrap();
        assert_eq!(rows[0][0], Cell::Timestamp(expected_pickup));
        assert!(matches!(rows[0][1], Cell::Timestamp(_)));
        assert_eq!(rows[0][2], Cell::Float(12.5));
        assert_eq!(rows[0][3], Cell::Text("cash".to_string()));
    }

    #[test]
    fn empty_cells_become_null() {
        let b = batch(&["a", "b"], &[&["1", ""], &["", "2"]]);
        let transforms = ColumnTransforms::none();
        let schema = TableSchema::infer(&b, &transforms);
        let rows = typed_rows(&b, &schema, &transforms, 1).unwrap();
        assert_eq!(rows[0][1], Cell::Null);
        assert_eq!(rows[1][0], Cell::Null);
    }

    #[test]
    fn value_outside_bootstrap_type_is_fatal() {
        let first = batch(&["a"], &[&["1"], &["2"]]);
        let transforms = ColumnTransforms::none();
        let schema = TableSchema::infer(&first, &transforms);
        let later = batch(&["a"], &[&["not-a-number"]]);
        let err = typed_rows(&later, &schema, &transforms, 7).unwrap_err();
        assert!(err.to_string().contains("BIGINT"), "{err}");
    }

    #[test]
    fn value_error_locates_batch_and_row() {
        let first = batch(&["a"], &[&["1"]]);
        let transforms = ColumnTransforms::none();
        let schema = TableSchema::infer(&first, &transforms);
        let later = batch(&["a"], &[&["5"], &["oops"]]);
        let err = typed_rows(&later, &schema, &transforms, 42).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("batch 42"), "{msg}");
        assert!(msg.contains("row 1"), "{msg}");
    }

    #[test]
    fn bad_datetime_is_fatal_with_context() {
        let transforms = ColumnTransforms::trip_datetimes();
        let b = batch(&["tpep_pickup_datetime"], &[&["2021-01-01 00:00:00"]]);
        let schema = TableSchema::infer(&b, &transforms);
        let bad = batch(&["tpep_pickup_datetime"], &[&["around midnight"]]);
        let err = typed_rows(&bad, &schema, &transforms, 2).unwrap_err();
        assert!(err.to_string().contains("tpep_pickup_datetime"), "{err}");
    }

    #[test]
    fn column_drift_is_rejected() {
        let first = batch(&["a", "b"], &[&["1", "2"]]);
        let transforms = ColumnTransforms::none();
        let schema = TableSchema::infer(&first, &transforms);
        let drifted = batch(&["a", "c"], &[&["1", "2"]]);
        assert!(schema.check_compatible(drifted.columns()).is_err());
        let narrower = batch(&["a"], &[&["1"]]);
        assert!(schema.check_compatible(narrower.columns()).is_err());
        let same = batch(&["a", "b"], &[&["3", "4"]]);
        assert!(schema.check_compatible(same.columns()).is_ok());
    }
}
