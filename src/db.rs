//! Database handle and startup connection retry.
//!
//! The ingest job usually races the Postgres container coming up, so the
//! first connection is retried with exponential backoff. Only
//! connectivity-class failures are retried; a bad password or unknown
//! database fails immediately instead of burning the whole retry budget.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::schema::{Cell, ColumnType, TableSchema};

/// Postgres caps bind parameters per statement at u16::MAX; batches are
/// sub-chunked so `rows * columns` stays under it.
const BIND_LIMIT: usize = 65_535;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Wait after the n-th failed attempt (1-based): `base * 2^(n-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Retry-on-connectivity-failure loop around a connection probe.
///
/// Runs the probe up to `max_retries` times, sleeping the policy's backoff
/// between attempts. Returns the handle from the first successful probe. A
/// non-connectivity error aborts immediately.
pub async fn establish<T, F, Fut>(policy: &RetryPolicy, mut probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let max_attempts = policy.max_retries.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match probe().await {
            Ok(handle) => {
                info!(attempt, "database connection established");
                return Ok(handle);
            }
            Err(e) if is_connectivity_error(&e) => {
                if attempt >= max_attempts {
                    return Err(anyhow!(e)
                        .context(format!("database unreachable after {attempt} attempts")));
                }
                let wait = policy.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    wait_s = wait.as_secs_f64(),
                    error = %e,
                    "connection failed; retrying after backoff"
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => {
                return Err(anyhow!(e).context("database rejected connection (not retryable)"))
            }
        }
    }
}

/// Whether an error means "server not reachable/ready yet" as opposed to a
/// definitive rejection like bad credentials.
pub fn is_connectivity_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| is_connectivity_sqlstate(&code))
            .unwrap_or(false),
        _ => false,
    }
}

/// SQLSTATE classes that signal a startup race: 57P03 (cannot_connect_now,
/// Postgres still booting) and class 08 (connection exception). 28xxx (auth)
/// and 3D000 (unknown database) are deliberate rejections.
pub fn is_connectivity_sqlstate(code: &str) -> bool {
    code == "57P03" || code.starts_with("08")
}

/// Connection wrapper owned by the loader for the run's duration.
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    /// Connect and validate with a trivial round trip, retrying per policy.
    /// The pool is capped at one connection: the pipeline is strictly
    /// sequential and has exactly one consumer.
    pub async fn connect_with_retry(dsn: &str, policy: &RetryPolicy) -> Result<Self> {
        let pool = establish(policy, move || async move {
            let pool = PgPoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Duration::from_secs(10))
                .connect(dsn)
                .await?;
            sqlx::query("SELECT 1").execute(&pool).await?;
            Ok(pool)
        })
        .await?;
        Ok(Self { pool })
    }

    /// Destructive create: drop any existing table of this name, then
    /// recreate it empty with the bootstrap schema. The one place a run may
    /// discard existing data, and what makes re-runs idempotent.
    pub async fn create_table(&self, table: &str, schema: &TableSchema) -> Result<()> {
        let (drop_stmt, create_stmt) = schema.create_table_sql(table);
        sqlx::raw_sql(&drop_stmt)
            .execute(&self.pool)
            .await
            .with_context(|| format!("dropping existing table {table}"))?;
        sqlx::raw_sql(&create_stmt)
            .execute(&self.pool)
            .await
            .with_context(|| format!("creating table {table}"))?;
        info!(table, columns = schema.len(), "table replaced");
        Ok(())
    }

    /// Append typed rows preserving their order. Sub-chunks the batch to
    /// respect the bind-parameter limit; each statement commits on its own.
    pub async fn append_rows(
        &self,
        table: &str,
        schema: &TableSchema,
        rows: &[Vec<Cell>],
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let rows_per_stmt = (BIND_LIMIT / schema.len()).max(1);
        let column_list = schema
            .columns()
            .iter()
            .map(|c| crate::schema::quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        for chunk in rows.chunks(rows_per_stmt) {
            let mut qb = sqlx::QueryBuilder::<sqlx::Postgres>::new(format!(
                "INSERT INTO {} ({}) ",
                crate::schema::quote_ident(table),
                column_list
            ));
            qb.push_values(chunk, |mut b, row| {
                for (cell, col) in row.iter().zip(schema.columns()) {
                    match cell {
                        Cell::Int(v) => {
                            b.push_bind(*v);
                        }
                        Cell::Float(v) => {
                            b.push_bind(*v);
                        }
                        Cell::Timestamp(ts) => {
                            b.push_bind(*ts);
                        }
                        Cell::Text(s) => {
                            b.push_bind(s.clone());
                        }
                        Cell::Null => match col.ty {
                            ColumnType::BigInt => {
                                b.push_bind(Option::<i64>::None);
                            }
                            ColumnType::DoublePrecision => {
                                b.push_bind(Option::<f64>::None);
                            }
                            ColumnType::Timestamp => {
                                b.push_bind(Option::<chrono::NaiveDateTime>::None);
                            }
                            ColumnType::Text => {
                                b.push_bind(Option::<String>::None);
                            }
                        },
                    }
                }
            });
            qb.build()
                .persistent(false)
                .execute(&self.pool)
                .await
                .with_context(|| format!("appending {} rows to {table}", chunk.len()))?;
        }
        Ok(())
    }
}
