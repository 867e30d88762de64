//! Lazy CSV batch source: fixed-size slices of the trip file, one batch in
//! memory at a time.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use csv::StringRecord;

/// One bounded slice of the source. Rows share the column order of the file
/// header; a ragged row is rejected by the csv layer before it gets here.
#[derive(Debug, Clone)]
pub struct RawBatch {
    columns: Arc<[String]>,
    rows: Vec<StringRecord>,
}

impl RawBatch {
    pub fn new(columns: Arc<[String]>, rows: Vec<StringRecord>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[StringRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column across the batch, by header position.
    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &str> {
        self.rows.iter().filter_map(move |r| r.get(idx))
    }
}

/// Sequential reader yielding at most `batch_size` records per call.
pub struct CsvBatchSource {
    reader: csv::Reader<BufReader<File>>,
    columns: Arc<[String]>,
    batch_size: usize,
}

impl CsvBatchSource {
    pub fn open(path: &Path, batch_size: usize) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("opening source file {}", path.display()))?;
        let mut reader = csv::Reader::from_reader(BufReader::new(file));
        let columns: Arc<[String]> = reader
            .headers()
            .context("reading CSV header")?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        Ok(Self {
            reader,
            columns,
            batch_size,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Next batch, or `None` once the file is exhausted. Exhaustion is the
    /// normal termination signal, not an error.
    pub fn next_batch(&mut self) -> Result<Option<RawBatch>> {
        let mut rows = Vec::with_capacity(self.batch_size.min(1024));
        let mut record = StringRecord::new();
        while rows.len() < self.batch_size {
            match self.reader.read_record(&mut record) {
                Ok(true) => rows.push(record.clone()),
                Ok(false) => break,
                Err(e) => return Err(e).context("reading CSV record"),
            }
        }
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(RawBatch::new(self.columns.clone(), rows)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(n_rows: usize) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "id,name").unwrap();
        for i in 0..n_rows {
            writeln!(f, "{i},row{i}").unwrap();
        }
        f.flush().unwrap();
        f
    }

    fn batch_sizes(n: usize, b: usize) -> Vec<usize> {
        let f = csv_file(n);
        let mut src = CsvBatchSource::open(f.path(), b).unwrap();
        let mut out = Vec::new();
        while let Some(batch) = src.next_batch().unwrap() {
            out.push(batch.len());
        }
        out
    }

    #[test]
    fn covers_every_row_exactly_once() {
        assert_eq!(batch_sizes(7, 3), vec![3, 3, 1]);
        assert_eq!(batch_sizes(6, 3), vec![3, 3]);
        assert_eq!(batch_sizes(1, 100), vec![1]);
        assert_eq!(batch_sizes(5, 1), vec![1, 1, 1, 1, 1]);
        for (n, b) in [(10, 4), (100, 7), (3, 3)] {
            assert_eq!(batch_sizes(n, b).iter().sum::<usize>(), n);
        }
    }

    #[test]
    fn header_only_file_yields_no_batches() {
        let f = csv_file(0);
        let mut src = CsvBatchSource::open(f.path(), 10).unwrap();
        assert!(src.next_batch().unwrap().is_none());
    }

    #[test]
    fn exhaustion_is_sticky() {
        let f = csv_file(2);
        let mut src = CsvBatchSource::open(f.path(), 10).unwrap();
        assert!(src.next_batch().unwrap().is_some());
        assert!(src.next_batch().unwrap().is_none());
        assert!(src.next_batch().unwrap().is_none());
    }

    #[test]
    fn ragged_row_is_an_error() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "a,b").unwrap();
        writeln!(f, "1,2").unwrap();
        writeln!(f, "1,2,3").unwrap();
        f.flush().unwrap();
        let mut src = CsvBatchSource::open(f.path(), 10).unwrap();
        assert!(src.next_batch().is_err());
    }

    #[test]
    fn columns_come_from_header_in_order() {
        let f = csv_file(1);
        let src = CsvBatchSource::open(f.path(), 10).unwrap();
        assert_eq!(src.columns(), ["id".to_string(), "name".to_string()]);
    }
}
