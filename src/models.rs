//! Data models and DTOs (Data Transfer Objects)
//!
//! Request/response structures used by the API.

use crate::connection::ConnectionInfo;
use crate::workspace::BranchInfo;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Full branch resource name: `projects/<project>/branches/<branch>`
static BRANCH_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^projects/[A-Za-z0-9_-]+/branches/[A-Za-z0-9_-]+$")
        .expect("branch name regex is valid")
});

/// Generic success response
#[derive(Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub data: Option<T>,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn with_data(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// Message-only response (no data)
#[derive(Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Request naming the branch to diagnose
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticRequest {
    /// Full branch resource name, e.g. `projects/<id>/branches/<name>`
    #[validate(regex(
        path = *BRANCH_NAME,
        message = "Expected projects/<project>/branches/<branch>"
    ))]
    pub branch: String,

    /// Overrides the configured null-percentage threshold
    #[validate(range(min = 0.0, max = 100.0, message = "Threshold must be between 0 and 100"))]
    pub null_threshold: Option<f64>,
}

/// Request to open (or verify) a branch connection
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    #[validate(regex(
        path = *BRANCH_NAME,
        message = "Expected projects/<project>/branches/<branch>"
    ))]
    pub branch: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchListResponse {
    pub branches: Vec<BranchInfo>,
    /// Branch names eligible for diagnostics (default branch excluded)
    pub selectable: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionListResponse {
    pub connections: Vec<ConnectionInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectResponse {
    pub branch: String,
    pub dropped: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    pub branch: String,
    pub identity: String,
}
