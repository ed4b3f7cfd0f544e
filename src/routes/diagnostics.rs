//! Diagnostic route handlers
//!
//! Each check is also available on its own; `run` executes all of them
//! against one connection.

use crate::diagnostics::{DiagnosticReport, PerformanceReport, QualityReport, SchemaReport};
use crate::error::{validation_error, ApiResult};
use crate::models::{DiagnosticRequest, SuccessResponse};
use crate::state::SharedState;
use axum::{extract::State, Json};
use validator::Validate;

fn validated(payload: DiagnosticRequest) -> ApiResult<DiagnosticRequest> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;
    Ok(payload)
}

/// Check that the expected tables exist on the branch
pub async fn check_tables(
    State(state): State<SharedState>,
    Json(payload): Json<DiagnosticRequest>,
) -> ApiResult<Json<SuccessResponse<SchemaReport>>> {
    let payload = validated(payload)?;
    let report = state.engine.check_tables(&payload.branch).await?;

    let message = if report.is_complete() {
        format!("All {} expected table(s) present.", report.tables.len())
    } else {
        format!("{} expected table(s) missing.", report.missing.len())
    };
    Ok(Json(SuccessResponse::with_data(message, report)))
}

/// Scan every table on the branch for null-heavy columns
pub async fn check_quality(
    State(state): State<SharedState>,
    Json(payload): Json<DiagnosticRequest>,
) -> ApiResult<Json<SuccessResponse<QualityReport>>> {
    let payload = validated(payload)?;
    let report = state
        .engine
        .check_quality(&payload.branch, payload.null_threshold)
        .await?;

    let message = if report.passed() {
        format!("Scanned {} table(s), no issues found.", report.tables_scanned)
    } else {
        format!(
            "Scanned {} table(s), {} issue(s) found.",
            report.tables_scanned,
            report.issues.len()
        )
    };
    Ok(Json(SuccessResponse::with_data(message, report)))
}

/// Compare query latency against the reference instance
pub async fn compare_performance(
    State(state): State<SharedState>,
    Json(payload): Json<DiagnosticRequest>,
) -> ApiResult<Json<SuccessResponse<PerformanceReport>>> {
    let payload = validated(payload)?;
    let report = state.engine.compare_performance(&payload.branch).await?;

    let regressions = report.samples.iter().filter(|s| s.regression_flag).count();
    let message = format!(
        "Ran {} query(ies), {} regression(s).",
        report.samples.len(),
        regressions
    );
    Ok(Json(SuccessResponse::with_data(message, report)))
}

/// Run every check
pub async fn run(
    State(state): State<SharedState>,
    Json(payload): Json<DiagnosticRequest>,
) -> ApiResult<Json<SuccessResponse<DiagnosticReport>>> {
    let payload = validated(payload)?;
    let report = state
        .engine
        .run(&payload.branch, payload.null_threshold)
        .await?;

    let message = format!(
        "Diagnostic run {} finished: {}/3 stage(s) completed.",
        report.run_id,
        report.completed_stages()
    );
    Ok(Json(SuccessResponse::with_data(message, report)))
}
