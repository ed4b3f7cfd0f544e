//! Schema completeness check
//!
//! Verifies that a fixed list of expected tables exists in a namespace.
//! Presence only: renamed or restructured tables are not detected.

use crate::db::DatabaseSession;
use crate::error::AppError;
use crate::introspection::Introspector;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::info;

/// Presence of one expected table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePresence {
    pub table: String,
    pub present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaReport {
    pub namespace: String,
    /// One entry per expected table, in expected-list order
    pub tables: Vec<TablePresence>,
    /// Expected tables absent from the namespace, in expected-list order
    pub missing: Vec<String>,
}

impl SchemaReport {
    /// Compare the expected list against the tables actually present
    pub fn evaluate(namespace: &str, expected: &[String], present: &BTreeSet<String>) -> Self {
        let tables: Vec<TablePresence> = expected
            .iter()
            .map(|table| TablePresence {
                table: table.clone(),
                present: present.contains(table),
            })
            .collect();
        let missing = tables
            .iter()
            .filter(|t| !t.present)
            .map(|t| t.table.clone())
            .collect();

        Self {
            namespace: namespace.to_string(),
            tables,
            missing,
        }
    }

    pub fn present_count(&self) -> usize {
        self.tables.len() - self.missing.len()
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

pub struct SchemaValidator<'a> {
    namespace: &'a str,
    expected: &'a [String],
}

impl<'a> SchemaValidator<'a> {
    pub fn new(namespace: &'a str, expected: &'a [String]) -> Self {
        Self { namespace, expected }
    }

    /// One catalog query, then a set difference
    pub async fn validate(&self, session: &dyn DatabaseSession) -> Result<SchemaReport, AppError> {
        let present = Introspector::new(session).present_tables(self.namespace).await?;
        let report = SchemaReport::evaluate(self.namespace, self.expected, &present);

        info!(
            namespace = %self.namespace,
            present = report.present_count(),
            missing = report.missing.len(),
            "Schema validation finished"
        );
        Ok(report)
    }
}
