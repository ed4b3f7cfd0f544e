//! Data quality scan
//!
//! Two stages: introspect the namespace into [`TableSpec`]s, then count
//! nulls per table and assess every column against the threshold. The
//! assessment is a pure function of the counts.

use crate::db::{DatabaseSession, TableCounts};
use crate::error::AppError;
use crate::introspection::{Introspector, TableSpec};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Default null-percentage threshold
pub const DEFAULT_NULL_THRESHOLD: f64 = 25.0;

/// A column whose null ratio exceeds the threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityIssue {
    pub table: String,
    pub column: String,
    /// In `[0, 100]`
    pub null_percentage: f64,
    pub exceeded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub namespace: String,
    pub threshold: f64,
    pub tables_scanned: usize,
    pub columns_scanned: usize,
    /// Tables with zero rows (or no columns), not assessed
    pub skipped_tables: Vec<String>,
    /// In enumeration order: table order, then column order
    pub issues: Vec<QualityIssue>,
}

impl QualityReport {
    pub fn passed(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Percentage of null values, `None` when the table is empty
pub fn null_percentage(total_rows: i64, non_null_rows: i64) -> Option<f64> {
    if total_rows <= 0 {
        return None;
    }
    let nulls = (total_rows - non_null_rows).clamp(0, total_rows);
    Some(nulls as f64 * 100.0 / total_rows as f64)
}

/// Issues for one table given its counts; empty tables yield none
pub fn assess_table(spec: &TableSpec, counts: &TableCounts, threshold: f64) -> Vec<QualityIssue> {
    spec.columns
        .iter()
        .zip(&counts.non_null_rows)
        .filter_map(|(column, &non_null)| {
            let pct = null_percentage(counts.total_rows, non_null)?;
            (pct > threshold).then(|| QualityIssue {
                table: spec.name.clone(),
                column: column.clone(),
                null_percentage: pct,
                exceeded: true,
            })
        })
        .collect()
}

pub struct DataQualityScanner<'a> {
    namespace: &'a str,
    threshold: f64,
}

impl<'a> DataQualityScanner<'a> {
    pub fn new(namespace: &'a str) -> Self {
        Self {
            namespace,
            threshold: DEFAULT_NULL_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Introspect then scan. Any failure aborts the whole scan.
    pub async fn scan(&self, session: &dyn DatabaseSession) -> Result<QualityReport, AppError> {
        let tables = Introspector::new(session).introspect(self.namespace).await?;
        self.scan_tables(session, &tables).await
    }

    /// Scan already-introspected tables
    pub async fn scan_tables(
        &self,
        session: &dyn DatabaseSession,
        tables: &[TableSpec],
    ) -> Result<QualityReport, AppError> {
        let mut report = QualityReport {
            namespace: self.namespace.to_string(),
            threshold: self.threshold,
            tables_scanned: 0,
            columns_scanned: 0,
            skipped_tables: Vec::new(),
            issues: Vec::new(),
        };

        for spec in tables {
            if spec.columns.is_empty() {
                report.skipped_tables.push(spec.name.clone());
                continue;
            }

            let counts = session
                .column_counts(self.namespace, &spec.name, &spec.columns)
                .await
                .map_err(|e| {
                    warn!(table = %spec.name, error = %e, "Count query failed, aborting scan");
                    AppError::QualityScan {
                        table: spec.name.clone(),
                        message: e.message,
                    }
                })?;

            if counts.non_null_rows.len() != spec.columns.len() {
                return Err(AppError::QualityScan {
                    table: spec.name.clone(),
                    message: format!(
                        "expected {} column counts, got {}",
                        spec.columns.len(),
                        counts.non_null_rows.len()
                    ),
                });
            }

            report.tables_scanned += 1;
            if counts.total_rows == 0 {
                debug!(table = %spec.name, "Skipping empty table");
                report.skipped_tables.push(spec.name.clone());
                continue;
            }

            report.columns_scanned += spec.columns.len();
            report
                .issues
                .extend(assess_table(spec, &counts, self.threshold));
        }

        info!(
            namespace = %self.namespace,
            tables = report.tables_scanned,
            columns = report.columns_scanned,
            issues = report.issues.len(),
            "Data quality scan finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDatabase, FakeSession};
    use pretty_assertions::assert_eq;

    fn spec(name: &str, columns: &[&str]) -> TableSpec {
        TableSpec {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_null_ratio_is_flagged_above_threshold() {
        let counts = TableCounts {
            total_rows: 10,
            non_null_rows: vec![10, 7],
        };
        let issues = assess_table(&spec("lb_alerts", &["alert_id", "assigned_to"]), &counts, 25.0);

        assert_eq!(
            issues,
            vec![QualityIssue {
                table: "lb_alerts".to_string(),
                column: "assigned_to".to_string(),
                null_percentage: 30.0,
                exceeded: true,
            }]
        );
    }

    #[test]
    fn test_exact_threshold_is_not_flagged() {
        let counts = TableCounts {
            total_rows: 4,
            non_null_rows: vec![3],
        };
        assert_eq!(null_percentage(4, 3), Some(25.0));
        assert!(assess_table(&spec("t", &["c"]), &counts, 25.0).is_empty());
    }

    #[test]
    fn test_zero_rows_yield_no_issue() {
        let counts = TableCounts {
            total_rows: 0,
            non_null_rows: vec![0, 0],
        };
        assert_eq!(null_percentage(0, 0), None);
        assert!(assess_table(&spec("t", &["a", "b"]), &counts, 0.0).is_empty());
    }

    #[test]
    fn test_null_percentage_bounds() {
        assert_eq!(null_percentage(5, 0), Some(100.0));
        assert_eq!(null_percentage(5, 5), Some(0.0));
    }

    #[tokio::test]
    async fn test_scan_accumulates_in_enumeration_order() {
        let db = FakeDatabase::default()
            .with_table("data_wolves", "lb_events", &["event_id", "username", "hostname"], 10)
            .with_nulls("data_wolves", "lb_events", "hostname", 6)
            .with_nulls("data_wolves", "lb_events", "username", 3)
            .with_table("data_wolves", "lb_alerts", &["alert_id", "assigned_to"], 4)
            .with_nulls("data_wolves", "lb_alerts", "assigned_to", 4)
            .with_table("data_wolves", "empty_staging", &["id", "payload"], 0);
        let session = FakeSession::new(db);

        let report = DataQualityScanner::new("data_wolves").scan(&session).await.unwrap();

        let flagged: Vec<(&str, &str, f64)> = report
            .issues
            .iter()
            .map(|i| (i.table.as_str(), i.column.as_str(), i.null_percentage))
            .collect();
        assert_eq!(
            flagged,
            vec![
                ("lb_alerts", "assigned_to", 100.0),
                ("lb_events", "username", 30.0),
                ("lb_events", "hostname", 60.0),
            ]
        );
        assert_eq!(report.tables_scanned, 3);
        assert_eq!(report.columns_scanned, 5);
        assert_eq!(report.skipped_tables, vec!["empty_staging".to_string()]);
        assert!(!report.passed());
    }

    #[tokio::test]
    async fn test_count_failure_aborts_whole_scan() {
        let db = FakeDatabase::default()
            .with_table("data_wolves", "lb_alerts", &["assigned_to"], 10)
            .with_nulls("data_wolves", "lb_alerts", "assigned_to", 9)
            .with_table("data_wolves", "lb_events", &["event_id"], 10)
            .with_broken_counts("lb_events");
        let session = FakeSession::new(db);

        let err = DataQualityScanner::new("data_wolves")
            .scan(&session)
            .await
            .unwrap_err();

        match err {
            AppError::QualityScan { table, .. } => assert_eq!(table, "lb_events"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_custom_threshold() {
        let db = FakeDatabase::default()
            .with_table("ns", "t", &["c"], 10)
            .with_nulls("ns", "t", "c", 1);
        let session = FakeSession::new(db);

        let strict = DataQualityScanner::new("ns")
            .with_threshold(5.0)
            .scan(&session)
            .await
            .unwrap();
        assert_eq!(strict.issues.len(), 1);
        assert_eq!(strict.threshold, 5.0);
    }
}
