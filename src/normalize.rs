//! Per-column value normalization.
//!
//! The trip dataset stores its pickup/dropoff timestamps as text; they are
//! converted to a canonical timestamp before hitting the database. The
//! transform set is keyed by column name so a different dataset can register
//! its own columns instead of the yellow-taxi defaults.

use std::collections::HashSet;

use anyhow::{bail, Result};
use chrono::{NaiveDate, NaiveDateTime};

/// Transforms applied to raw cell text before type conversion, keyed by
/// column name. Currently only datetime normalization exists; the set keeps
/// the seam open for other per-column rules.
#[derive(Debug, Clone, Default)]
pub struct ColumnTransforms {
    datetime: HashSet<String>,
}

impl ColumnTransforms {
    /// No transforms; every column passes through untouched.
    pub fn none() -> Self {
        Self::default()
    }

    /// Defaults for the yellow-taxi trip dataset.
    pub fn trip_datetimes() -> Self {
        Self::none()
            .with_datetime("tpep_pickup_datetime")
            .with_datetime("tpep_dropoff_datetime")
    }

    pub fn with_datetime(mut self, column: &str) -> Self {
        self.datetime.insert(column.to_string());
        self
    }

    pub fn is_datetime(&self, column: &str) -> bool {
        self.datetime.contains(column)
    }

    /// Parse a raw datetime cell for a registered column.
    pub fn normalize_datetime(&self, column: &str, raw: &str) -> Result<NaiveDateTime> {
        debug_assert!(self.is_datetime(column));
        parse_datetime(raw)
    }
}

/// Accepts the dataset's canonical `YYYY-MM-DD HH:MM:SS` form plus the
/// RFC 3339 and bare-date variants seen in republished copies of the data.
pub fn parse_datetime(raw: &str) -> Result<NaiveDateTime> {
    let t = raw.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(dt);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(t) {
        return Ok(dt.naive_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        if let Some(dt) = d.and_hms_opt(0, 0, 0) {
            return Ok(dt);
        }
    }
    bail!("unrecognized datetime value {t:?}")
}
