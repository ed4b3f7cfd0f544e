//! Query latency comparison
//!
//! Runs a fixed battery of named read queries on the reference instance and
//! on a candidate branch, one query at a time and one side at a time, and
//! flags candidates whose latency differs by more than a threshold.

use crate::db::DatabaseSession;
use crate::error::{AppError, Side};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default regression threshold, in percent
pub const DEFAULT_REGRESSION_THRESHOLD: f64 = 50.0;

/// A named representative query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkQuery {
    pub name: String,
    pub sql: String,
}

impl BenchmarkQuery {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }
}

/// The dashboard's representative reads, qualified with `namespace`
pub fn default_battery(namespace: &str) -> Vec<BenchmarkQuery> {
    let ns = crate::db::queries::SqlBuilder::quote_ident(namespace);
    vec![
        BenchmarkQuery::new(
            "Support Ticket Data Gather",
            format!(
                r#"
                SELECT st.ticket_id, st.tenant_id, t.tenant_name, st.alert_id,
                       a.severity AS alert_severity, a.alert_type, st.user_name,
                       st.activity_type, st.activity_timestamp, st.comment,
                       st.is_customer_facing, st.customer_message
                FROM {ns}.support_tickets st
                LEFT JOIN {ns}.lb_tenants t ON st.tenant_id = t.tenant_id
                LEFT JOIN {ns}.lb_alerts a ON st.alert_id = a.alert_id
                ORDER BY st.activity_timestamp DESC
                "#
            ),
        ),
        BenchmarkQuery::new(
            "Event Data Gathering",
            format!(
                r#"
                SELECT e.event_id, e.tenant_id, t.tenant_name, t.industry, e.alert_id,
                       e.event_type, e.severity, e.source_ip, e.username, e.hostname,
                       e.event_timestamp, e.raw_log, t.service_tier, t.risk_level
                FROM {ns}.lb_events e
                LEFT JOIN {ns}.lb_tenants t ON e.tenant_id = t.tenant_id
                ORDER BY e.event_timestamp DESC
                "#
            ),
        ),
        BenchmarkQuery::new(
            "Alert Data Gathering",
            format!(
                r#"
                SELECT a.alert_id, a.tenant_id, t.tenant_name, t.industry, a.alert_name,
                       a.alert_type, a.severity, a.status, a.detection_time,
                       a.assigned_to, a.affected_assets, a.description,
                       t.service_tier, t.risk_level
                FROM {ns}.lb_alerts a
                LEFT JOIN {ns}.lb_tenants t ON a.tenant_id = t.tenant_id
                ORDER BY a.detection_time DESC
                "#
            ),
        ),
        BenchmarkQuery::new(
            "Tenant Data Gathering",
            format!(
                r#"
                SELECT t.tenant_id, t.tenant_name, t.industry, t.company_size,
                       t.service_tier, t.security_score, t.risk_level, t.status,
                       COUNT(DISTINCT st.ticket_id) AS total_tickets
                FROM {ns}.lb_tenants t
                LEFT JOIN {ns}.support_tickets st ON t.tenant_id = st.tenant_id
                GROUP BY t.tenant_id, t.tenant_name, t.industry, t.company_size,
                         t.service_tier, t.security_score, t.risk_level, t.status
                ORDER BY t.security_score DESC
                "#
            ),
        ),
    ]
}

/// Outcome of one side of a sample
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SampleStatus {
    Ok,
    Failed { message: String },
}

impl SampleStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, SampleStatus::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSample {
    pub query_name: String,
    pub ref_secs: Option<f64>,
    pub cand_secs: Option<f64>,
    pub abs_diff_secs: Option<f64>,
    /// Relative to the slower side; `None` unless both sides succeeded
    pub percent_diff: Option<f64>,
    pub regression_flag: bool,
    pub ref_status: SampleStatus,
    pub cand_status: SampleStatus,
}

impl PerformanceSample {
    pub fn succeeded(&self) -> bool {
        self.ref_status.is_ok() && self.cand_status.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    /// Samples where both sides succeeded
    pub successful: usize,
    pub mean_ref_secs: Option<f64>,
    pub mean_cand_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub threshold: f64,
    pub samples: Vec<PerformanceSample>,
    pub summary: PerformanceSummary,
}

/// `(abs_diff, percent_diff, regression_flag)` for two successful timings.
///
/// The percentage is taken against the slower side so a near-zero fast side
/// cannot blow it up.
pub fn compare_durations(reference: f64, candidate: f64, threshold: f64) -> (f64, f64, bool) {
    let diff = (reference - candidate).abs();
    let slower = reference.max(candidate);
    let pct = if slower > 0.0 { diff / slower * 100.0 } else { 0.0 };
    (diff, pct, pct > threshold)
}

/// Build a sample from the two timed outcomes
pub fn build_sample(
    query_name: &str,
    reference: Result<Duration, String>,
    candidate: Result<Duration, String>,
    threshold: f64,
) -> PerformanceSample {
    let ref_secs = reference.as_ref().ok().map(Duration::as_secs_f64);
    let cand_secs = candidate.as_ref().ok().map(Duration::as_secs_f64);

    let (abs_diff_secs, percent_diff, regression_flag) = match (ref_secs, cand_secs) {
        (Some(r), Some(c)) => {
            let (diff, pct, flag) = compare_durations(r, c, threshold);
            (Some(diff), Some(pct), flag)
        }
        // A failed side is an availability problem, not a latency regression
        _ => (None, None, false),
    };

    let status = |outcome: Result<Duration, String>| match outcome {
        Ok(_) => SampleStatus::Ok,
        Err(message) => SampleStatus::Failed { message },
    };

    PerformanceSample {
        query_name: query_name.to_string(),
        ref_secs,
        cand_secs,
        abs_diff_secs,
        percent_diff,
        regression_flag,
        ref_status: status(reference),
        cand_status: status(candidate),
    }
}

/// Count of fully-successful samples, and each side's mean over the
/// samples where that side succeeded
pub fn summarize(samples: &[PerformanceSample]) -> PerformanceSummary {
    let mean = |values: Vec<f64>| {
        (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
    };

    PerformanceSummary {
        successful: samples.iter().filter(|s| s.succeeded()).count(),
        mean_ref_secs: mean(samples.iter().filter_map(|s| s.ref_secs).collect()),
        mean_cand_secs: mean(samples.iter().filter_map(|s| s.cand_secs).collect()),
    }
}

pub struct PerformanceComparator<'a> {
    battery: &'a [BenchmarkQuery],
    threshold: f64,
}

impl<'a> PerformanceComparator<'a> {
    pub fn new(battery: &'a [BenchmarkQuery]) -> Self {
        Self {
            battery,
            threshold: DEFAULT_REGRESSION_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Run every query on reference then candidate, sequentially
    pub async fn compare(
        &self,
        reference: &dyn DatabaseSession,
        candidate: &dyn DatabaseSession,
    ) -> PerformanceReport {
        let mut samples = Vec::with_capacity(self.battery.len());

        for query in self.battery {
            let ref_outcome = timed(reference, query, Side::Reference).await;
            let cand_outcome = timed(candidate, query, Side::Candidate).await;
            let sample = build_sample(&query.name, ref_outcome, cand_outcome, self.threshold);

            debug!(
                query = %sample.query_name,
                ref_secs = ?sample.ref_secs,
                cand_secs = ?sample.cand_secs,
                percent_diff = ?sample.percent_diff,
                regression = sample.regression_flag,
                "Sampled query"
            );
            samples.push(sample);
        }

        let summary = summarize(&samples);
        info!(
            queries = samples.len(),
            successful = summary.successful,
            regressions = samples.iter().filter(|s| s.regression_flag).count(),
            "Performance comparison finished"
        );

        PerformanceReport {
            threshold: self.threshold,
            samples,
            summary,
        }
    }
}

/// Wall-clock time to run `query` and fetch every row
async fn timed(
    session: &dyn DatabaseSession,
    query: &BenchmarkQuery,
    side: Side,
) -> Result<Duration, String> {
    let start = Instant::now();
    match session.run_read(&query.sql).await {
        Ok(rows) => {
            let elapsed = start.elapsed();
            debug!(query = %query.name, %side, rows, ?elapsed, "Query finished");
            Ok(elapsed)
        }
        Err(e) => {
            let err = AppError::QueryExecution {
                query: query.name.clone(),
                side,
                message: e.message,
            };
            warn!(error = %err, "Benchmark query failed");
            Err(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDatabase, FakeSession};
    use pretty_assertions::assert_eq;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_regression_boundary_below() {
        let (diff, pct, flag) = compare_durations(1.0, 1.4, 50.0);
        assert!(approx(diff, 0.4));
        assert!(approx(pct, 28.571428));
        assert!(!flag);
    }

    #[test]
    fn test_regression_boundary_above() {
        let (diff, pct, flag) = compare_durations(1.0, 2.1, 50.0);
        assert!(approx(diff, 1.1));
        assert!(approx(pct, 52.380952));
        assert!(flag);
    }

    #[test]
    fn test_percent_uses_slower_side_symmetrically() {
        let (_, a, _) = compare_durations(2.1, 1.0, 50.0);
        let (_, b, _) = compare_durations(1.0, 2.1, 50.0);
        assert!(approx(a, b));
        assert_eq!(compare_durations(0.0, 0.0, 50.0), (0.0, 0.0, false));
    }

    #[test]
    fn test_failed_side_is_not_a_regression() {
        let sample = build_sample(
            "Alert Data Gathering",
            Ok(Duration::from_millis(100)),
            Err("relation does not exist".to_string()),
            50.0,
        );

        assert!(!sample.regression_flag);
        assert_eq!(sample.percent_diff, None);
        assert_eq!(sample.abs_diff_secs, None);
        assert_eq!(sample.ref_secs, Some(0.1));
        assert_eq!(
            sample.cand_status,
            SampleStatus::Failed {
                message: "relation does not exist".to_string()
            }
        );
        assert!(!sample.succeeded());
    }

    #[test]
    fn test_summary_means_use_each_sides_own_successes() {
        let samples = vec![
            build_sample("a", Ok(Duration::from_secs(1)), Ok(Duration::from_secs(3)), 50.0),
            build_sample("b", Ok(Duration::from_secs(3)), Ok(Duration::from_secs(1)), 50.0),
            build_sample("c", Ok(Duration::from_secs(9)), Err("boom".into()), 50.0),
        ];

        let summary = summarize(&samples);
        assert_eq!(summary.successful, 2);
        // The reference timing of "c" still counts
        assert!(approx(summary.mean_ref_secs.unwrap(), 13.0 / 3.0));
        assert_eq!(summary.mean_cand_secs, Some(2.0));

        let none = summarize(&[]);
        assert_eq!(none.successful, 0);
        assert_eq!(none.mean_ref_secs, None);
    }

    #[test]
    fn test_default_battery_is_namespaced_and_ordered() {
        let battery = default_battery("data_wolves");
        let names: Vec<&str> = battery.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Support Ticket Data Gather",
                "Event Data Gathering",
                "Alert Data Gathering",
                "Tenant Data Gathering",
            ]
        );
        assert!(battery.iter().all(|q| q.sql.contains("\"data_wolves\".")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_compare_times_each_side() {
        let battery = vec![
            BenchmarkQuery::new("steady", "SELECT steady"),
            BenchmarkQuery::new("slower", "SELECT slower"),
            BenchmarkQuery::new("broken", "SELECT broken"),
        ];
        let reference = FakeSession::new(
            FakeDatabase::default()
                .with_query("SELECT steady", Duration::from_millis(1000))
                .with_query("SELECT slower", Duration::from_millis(1000))
                .with_query("SELECT broken", Duration::from_millis(500)),
        );
        let candidate = FakeSession::new(
            FakeDatabase::default()
                .with_query("SELECT steady", Duration::from_millis(1400))
                .with_query("SELECT slower", Duration::from_millis(2100))
                .with_failing_query("SELECT broken", "permission denied"),
        );

        let report = PerformanceComparator::new(&battery)
            .compare(&reference, &candidate)
            .await;

        let flags: Vec<(&str, bool)> = report
            .samples
            .iter()
            .map(|s| (s.query_name.as_str(), s.regression_flag))
            .collect();
        assert_eq!(flags, vec![("steady", false), ("slower", true), ("broken", false)]);

        assert!(approx(report.samples[0].percent_diff.unwrap(), 28.571428));
        assert!(approx(report.samples[1].percent_diff.unwrap(), 52.380952));
        assert_eq!(report.samples[2].ref_secs, Some(0.5));
        assert!(!report.samples[2].cand_status.is_ok());

        assert_eq!(report.summary.successful, 2);
        assert!(approx(report.summary.mean_ref_secs.unwrap(), 2.5 / 3.0));
        assert!(approx(report.summary.mean_cand_secs.unwrap(), 1.75));
    }
}
