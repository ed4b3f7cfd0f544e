//! Connection management route handlers

use crate::error::{validation_error, ApiResult};
use crate::models::{
    ConnectRequest, ConnectResponse, ConnectionListResponse, DisconnectResponse, MessageResponse,
    SuccessResponse,
};
use crate::state::SharedState;
use axum::{extract::State, Json};
use tracing::{debug, info};
use validator::Validate;

/// Open (or verify) the connection to a branch
pub async fn connect(
    State(state): State<SharedState>,
    Json(payload): Json<ConnectRequest>,
) -> ApiResult<Json<SuccessResponse<ConnectResponse>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;
    debug!(branch = %payload.branch, "Connecting to branch");

    let identity = state.engine.connect_branch(&payload.branch).await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Connected to '{}'.", payload.branch),
        ConnectResponse {
            branch: payload.branch,
            identity: identity.to_string(),
        },
    )))
}

/// Drop the cached connection to one branch
pub async fn disconnect(
    State(state): State<SharedState>,
    Json(payload): Json<ConnectRequest>,
) -> ApiResult<Json<SuccessResponse<DisconnectResponse>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let dropped = state.engine.disconnect_branch(&payload.branch).await?;
    let message = if dropped {
        format!("Disconnected from '{}'.", payload.branch)
    } else {
        format!("No open connection to '{}'.", payload.branch)
    };

    Ok(Json(SuccessResponse::with_data(
        message,
        DisconnectResponse {
            branch: payload.branch,
            dropped,
        },
    )))
}

/// List cached connections
pub async fn list_connections(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<ConnectionListResponse>>> {
    let connections = state.engine.connections().await;

    Ok(Json(SuccessResponse::with_data(
        format!("{} cached connection(s).", connections.len()),
        ConnectionListResponse { connections },
    )))
}

/// Drop every cached connection and the cached credential
pub async fn reset_connections(
    State(state): State<SharedState>,
) -> ApiResult<Json<MessageResponse>> {
    let dropped = state.engine.reset().await;
    info!(dropped, "Connections reset");

    Ok(Json(MessageResponse::new(format!(
        "Dropped {} connection(s).",
        dropped
    ))))
}
