//! Branch directory route handlers

use crate::error::ApiResult;
use crate::models::{BranchListResponse, SuccessResponse};
use crate::state::SharedState;
use axum::{extract::State, Json};
use tracing::info;

/// Re-list branches from the workspace
pub async fn refresh_branches(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<BranchListResponse>>> {
    let branches = state.engine.refresh_branches().await?;
    let selectable = state.engine.selectable_branches().await;
    info!(
        total = branches.len(),
        selectable = selectable.len(),
        "Branch list refreshed"
    );

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} branch(es).", branches.len()),
        BranchListResponse {
            branches,
            selectable,
        },
    )))
}

/// Branches from the last refresh
pub async fn list_branches(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<BranchListResponse>>> {
    let branches = state.engine.branches().await;
    let selectable = state.engine.selectable_branches().await;

    Ok(Json(SuccessResponse::with_data(
        format!("{} branch(es) known.", branches.len()),
        BranchListResponse {
            branches,
            selectable,
        },
    )))
}
