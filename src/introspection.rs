//! Schema Introspection Module
//!
//! Reads the catalog of a live database into typed table specs. Nothing here
//! is persisted; every diagnostic run introspects afresh.

use crate::db::DatabaseSession;
use crate::error::AppError;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

/// A table and its columns in ordinal order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<String>,
}

/// Catalog reader over a borrowed session
pub struct Introspector<'a> {
    session: &'a dyn DatabaseSession,
}

impl<'a> Introspector<'a> {
    pub fn new(session: &'a dyn DatabaseSession) -> Self {
        Self { session }
    }

    /// Names of all tables present in `namespace`, in catalog order
    pub async fn table_names(&self, namespace: &str) -> Result<Vec<String>, AppError> {
        self.session
            .table_names(namespace)
            .await
            .map_err(|e| {
                AppError::Introspection(format!("listing tables in '{}': {}", namespace, e))
            })
    }

    /// Set of tables present in `namespace`
    pub async fn present_tables(&self, namespace: &str) -> Result<BTreeSet<String>, AppError> {
        Ok(self.table_names(namespace).await?.into_iter().collect())
    }

    /// Every table in `namespace` with its columns
    pub async fn introspect(&self, namespace: &str) -> Result<Vec<TableSpec>, AppError> {
        let names = self.table_names(namespace).await?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let columns = self
                .session
                .column_names(namespace, &name)
                .await
                .map_err(|e| {
                    AppError::Introspection(format!(
                        "listing columns of '{}.{}': {}",
                        namespace, name, e
                    ))
                })?;
            tables.push(TableSpec { name, columns });
        }

        debug!(
            %namespace,
            tables = tables.len(),
            columns = tables.iter().map(|t| t.columns.len()).sum::<usize>(),
            "Introspected namespace"
        );
        Ok(tables)
    }
}
