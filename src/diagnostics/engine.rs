//! Diagnostic orchestration
//!
//! Resolves a branch to an endpoint, obtains a credential, borrows a live
//! connection from the supervisor and drives the checks. Every run is an
//! explicit call; nothing is re-derived from ambient state.

use crate::config::DiagnosticsConfig;
use crate::connection::{ConnectionInfo, ConnectionSupervisor, Connector, Identity};
use crate::credential::{CredentialCache, CredentialIssuer};
use crate::diagnostics::performance::{
    default_battery, BenchmarkQuery, PerformanceComparator, PerformanceReport,
};
use crate::diagnostics::quality::{DataQualityScanner, QualityReport};
use crate::diagnostics::schema::{SchemaReport, SchemaValidator};
use crate::error::AppError;
use crate::workspace::{resolve_endpoint, BranchDirectory, BranchInfo};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Result of one stage of a full run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum StageOutcome<T> {
    Completed { report: T },
    Failed { code: String, message: String },
}

impl<T> StageOutcome<T> {
    fn from_result(result: Result<T, AppError>) -> Self {
        match result {
            Ok(report) => StageOutcome::Completed { report },
            Err(e) => StageOutcome::Failed {
                code: e.code().to_string(),
                message: e.to_string(),
            },
        }
    }

    pub fn report(&self) -> Option<&T> {
        match self {
            StageOutcome::Completed { report } => Some(report),
            StageOutcome::Failed { .. } => None,
        }
    }
}

/// Everything one diagnostic run found
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    pub run_id: Uuid,
    pub branch: String,
    pub namespace: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub schema: StageOutcome<SchemaReport>,
    pub quality: StageOutcome<QualityReport>,
    pub performance: StageOutcome<PerformanceReport>,
}

impl DiagnosticReport {
    /// Number of stages that produced a report, out of three
    pub fn completed_stages(&self) -> usize {
        [
            self.schema.report().is_some(),
            self.quality.report().is_some(),
            self.performance.report().is_some(),
        ]
        .into_iter()
        .filter(|done| *done)
        .count()
    }
}

pub struct DiagnosticEngine {
    directory: Arc<dyn BranchDirectory>,
    credentials: Mutex<CredentialCache>,
    supervisor: Mutex<ConnectionSupervisor>,
    reference: Identity,
    config: DiagnosticsConfig,
    battery: Vec<BenchmarkQuery>,
    /// Branches from the last directory refresh
    branches: RwLock<Vec<BranchInfo>>,
}

impl DiagnosticEngine {
    pub fn new(
        directory: Arc<dyn BranchDirectory>,
        issuer: Arc<dyn CredentialIssuer>,
        connector: Arc<dyn Connector>,
        reference: Identity,
        config: DiagnosticsConfig,
    ) -> Self {
        let battery = default_battery(&config.namespace);
        Self {
            directory,
            credentials: Mutex::new(CredentialCache::new(issuer)),
            supervisor: Mutex::new(ConnectionSupervisor::new(connector)),
            reference,
            config,
            battery,
            branches: RwLock::new(Vec::new()),
        }
    }

    /// Replace the benchmark battery
    #[cfg(test)]
    pub fn with_battery(mut self, battery: Vec<BenchmarkQuery>) -> Self {
        self.battery = battery;
        self
    }

    /// List branches from the directory and remember them
    pub async fn refresh_branches(&self) -> Result<Vec<BranchInfo>, AppError> {
        let listed = self.directory.list_branches().await?;
        info!(count = listed.len(), "Refreshed branch list");
        *self.branches.write().await = listed.clone();
        Ok(listed)
    }

    /// Branches from the last refresh
    pub async fn branches(&self) -> Vec<BranchInfo> {
        self.branches.read().await.clone()
    }

    /// Branches that can be diagnosed: everything except the default branch
    pub async fn selectable_branches(&self) -> Vec<String> {
        self.branches
            .read()
            .await
            .iter()
            .filter(|b| !b.is_default)
            .map(|b| b.name.clone())
            .collect()
    }

    /// Cached connections, for display
    pub async fn connections(&self) -> Vec<ConnectionInfo> {
        self.supervisor.lock().await.connections()
    }

    /// Drop every cached connection and the cached credential
    pub async fn reset(&self) -> usize {
        self.credentials.lock().await.invalidate();
        self.supervisor.lock().await.clear()
    }

    /// Look `branch` up in the branch list, listing from the directory when
    /// nothing is remembered yet. Only listed, non-default branches qualify.
    async fn selectable(&self, branch: &str) -> Result<(), AppError> {
        if self.branches.read().await.is_empty() {
            self.refresh_branches().await?;
        }

        let branches = self.branches.read().await;
        match branches.iter().find(|b| b.name == branch) {
            Some(b) if b.is_default => Err(AppError::BadRequest(format!(
                "'{}' is the default branch; diagnostics compare other branches against it",
                branch
            ))),
            Some(_) => Ok(()),
            None => Err(AppError::NotFound(format!(
                "Branch '{}' is not in the branch list",
                branch
            ))),
        }
    }

    /// Resolve `branch` to a connectable identity
    async fn branch_identity(&self, branch: &str) -> Result<Identity, AppError> {
        self.selectable(branch).await?;

        let endpoint = resolve_endpoint(self.directory.as_ref(), branch).await?;
        let credential = self
            .credentials
            .lock()
            .await
            .get_or_refresh(&endpoint.name)
            .await?;

        Ok(Identity::Branch {
            host: endpoint.host,
            token: credential.token,
        })
    }

    /// Drop the cached connection to `branch`, if one was opened with the
    /// current credential. Never issues a new token.
    pub async fn disconnect_branch(&self, branch: &str) -> Result<bool, AppError> {
        self.selectable(branch).await?;
        let endpoint = resolve_endpoint(self.directory.as_ref(), branch).await?;

        let token = match self.credentials.lock().await.current() {
            Some(credential) if credential.endpoint == endpoint.name => credential.token.clone(),
            _ => return Ok(false),
        };
        let identity = Identity::Branch {
            host: endpoint.host,
            token,
        };

        let dropped = self.supervisor.lock().await.evict(&identity);
        info!(%branch, dropped, "Disconnected branch");
        Ok(dropped)
    }

    /// Verify a branch is reachable, returning its identity
    pub async fn connect_branch(&self, branch: &str) -> Result<Identity, AppError> {
        let identity = self.branch_identity(branch).await?;
        self.supervisor.lock().await.acquire(&identity).await?;
        info!(%branch, %identity, "Connected to branch");
        Ok(identity)
    }

    pub async fn check_tables(&self, branch: &str) -> Result<SchemaReport, AppError> {
        let identity = self.branch_identity(branch).await?;
        let mut supervisor = self.supervisor.lock().await;
        self.schema_stage(&mut supervisor, &identity).await
    }

    pub async fn check_quality(
        &self,
        branch: &str,
        threshold: Option<f64>,
    ) -> Result<QualityReport, AppError> {
        let identity = self.branch_identity(branch).await?;
        let mut supervisor = self.supervisor.lock().await;
        self.quality_stage(&mut supervisor, &identity, threshold).await
    }

    pub async fn compare_performance(&self, branch: &str) -> Result<PerformanceReport, AppError> {
        let identity = self.branch_identity(branch).await?;
        let mut supervisor = self.supervisor.lock().await;
        self.performance_stage(&mut supervisor, &identity).await
    }

    /// All checks in order. Only an unreachable branch fails the run;
    /// other failures are recorded per stage.
    pub async fn run(
        &self,
        branch: &str,
        threshold: Option<f64>,
    ) -> Result<DiagnosticReport, AppError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, %branch, "Starting diagnostic run");

        let identity = self.branch_identity(branch).await?;
        let mut supervisor = self.supervisor.lock().await;
        supervisor.acquire(&identity).await?;

        let schema = self.schema_stage(&mut supervisor, &identity).await;
        let quality = self.quality_stage(&mut supervisor, &identity, threshold).await;
        let performance = self.performance_stage(&mut supervisor, &identity).await;

        let report = DiagnosticReport {
            run_id,
            branch: branch.to_string(),
            namespace: self.config.namespace.clone(),
            started_at,
            finished_at: Utc::now(),
            schema: StageOutcome::from_result(schema),
            quality: StageOutcome::from_result(quality),
            performance: StageOutcome::from_result(performance),
        };
        info!(%run_id, %branch, "Diagnostic run finished");
        Ok(report)
    }

    async fn schema_stage(
        &self,
        supervisor: &mut ConnectionSupervisor,
        identity: &Identity,
    ) -> Result<SchemaReport, AppError> {
        let handle = supervisor.acquire(identity).await?;
        let result = SchemaValidator::new(&self.config.namespace, &self.config.expected_tables)
            .validate(handle.session())
            .await;
        settle(supervisor, identity, result)
    }

    async fn quality_stage(
        &self,
        supervisor: &mut ConnectionSupervisor,
        identity: &Identity,
        threshold: Option<f64>,
    ) -> Result<QualityReport, AppError> {
        let handle = supervisor.acquire(identity).await?;
        let result = DataQualityScanner::new(&self.config.namespace)
            .with_threshold(threshold.unwrap_or(self.config.null_threshold))
            .scan(handle.session())
            .await;
        settle(supervisor, identity, result)
    }

    async fn performance_stage(
        &self,
        supervisor: &mut ConnectionSupervisor,
        identity: &Identity,
    ) -> Result<PerformanceReport, AppError> {
        let (reference, candidate) = supervisor.acquire_pair(&self.reference, identity).await?;
        Ok(PerformanceComparator::new(&self.battery)
            .with_threshold(self.config.regression_threshold)
            .compare(reference.session(), candidate.session())
            .await)
    }
}

/// A failed check leaves the connection's health in doubt
fn settle<T>(
    supervisor: &mut ConnectionSupervisor,
    identity: &Identity,
    result: Result<T, AppError>,
) -> Result<T, AppError> {
    if let Err(e) = &result {
        warn!(%identity, error = %e, "Diagnostic check failed");
        supervisor.mark_unknown(identity);
    }
    result
}
