//! Database session abstraction
//!
//! Everything the diagnostic engine asks of an open connection goes through
//! [`DatabaseSession`]. The PostgreSQL implementation wraps a single
//! `tokio_postgres::Client`; tests substitute an in-memory fake.

pub mod queries;

use crate::error::DbError;
use async_trait::async_trait;
use queries::SqlBuilder;
use tokio_postgres::Client;
use tracing::debug;

/// Row counts for one table: `COUNT(*)` plus `COUNT(col)` per column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCounts {
    pub total_rows: i64,
    /// Non-null counts, same order as the requested columns
    pub non_null_rows: Vec<i64>,
}

/// Operations issued over one live connection
#[async_trait]
pub trait DatabaseSession: Send + Sync {
    /// Minimal no-op query
    async fn ping(&self) -> Result<(), DbError>;

    /// Names of the tables present in `namespace`
    async fn table_names(&self, namespace: &str) -> Result<Vec<String>, DbError>;

    /// Column names of `namespace.table` in ordinal order
    async fn column_names(&self, namespace: &str, table: &str) -> Result<Vec<String>, DbError>;

    /// Total and per-column non-null counts in one round trip
    async fn column_counts(
        &self,
        namespace: &str,
        table: &str,
        columns: &[String],
    ) -> Result<TableCounts, DbError>;

    /// Run a read query to completion, fetching every row. Returns the row count.
    async fn run_read(&self, sql: &str) -> Result<usize, DbError>;
}

/// Session over a single `tokio_postgres` client
pub struct PgSession {
    client: Client,
}

impl PgSession {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DatabaseSession for PgSession {
    async fn ping(&self) -> Result<(), DbError> {
        if self.client.is_closed() {
            return Err(DbError::new("connection closed"));
        }
        self.client.simple_query(queries::PING).await?;
        Ok(())
    }

    async fn table_names(&self, namespace: &str) -> Result<Vec<String>, DbError> {
        let rows = self.client.query(queries::LIST_TABLES, &[&namespace]).await?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn column_names(&self, namespace: &str, table: &str) -> Result<Vec<String>, DbError> {
        let rows = self
            .client
            .query(queries::LIST_COLUMNS, &[&namespace, &table])
            .await?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn column_counts(
        &self,
        namespace: &str,
        table: &str,
        columns: &[String],
    ) -> Result<TableCounts, DbError> {
        let sql = SqlBuilder::column_counts(namespace, table, columns);
        debug!(%namespace, %table, columns = columns.len(), "Counting non-null values");

        let row = self.client.query_one(sql.as_str(), &[]).await?;
        let total_rows: i64 = row.try_get(0)?;
        let non_null_rows = (1..=columns.len())
            .map(|i| row.try_get::<_, i64>(i))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TableCounts {
            total_rows,
            non_null_rows,
        })
    }

    async fn run_read(&self, sql: &str) -> Result<usize, DbError> {
        let rows = self.client.query(sql, &[]).await?;
        Ok(rows.len())
    }
}
