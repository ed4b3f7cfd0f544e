//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod branch;
mod connection;
mod diagnostics;

use crate::config::Settings;
use crate::state::SharedState;
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    // Build CORS layer
    let cors = build_cors_layer(settings);

    // Build tracing/logging layer
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Build middleware stack
    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    // Build the router
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Branch directory
        .route("/api/branches", get(branch::list_branches))
        .route("/api/branches/refresh", post(branch::refresh_branches))
        // Connections
        .route(
            "/api/connections",
            get(connection::list_connections)
                .post(connection::connect)
                .delete(connection::reset_connections),
        )
        .route("/api/connections/disconnect", post(connection::disconnect))
        // Diagnostics
        .route("/api/diagnostics/tables", post(diagnostics::check_tables))
        .route("/api/diagnostics/quality", post(diagnostics::check_quality))
        .route("/api/diagnostics/performance", post(diagnostics::compare_performance))
        .route("/api/diagnostics/run", post(diagnostics::run))
        // Apply middleware and state
        .layer(middleware)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let layer = if origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new().allow_origin(origins)
    };

    layer
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(3600))
}

/// Health check endpoint
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        BranchConfig, CorsConfig, DatabaseConfig, DiagnosticsConfig, ServerConfig, WorkspaceConfig,
    };
    use crate::connection::Identity;
    use crate::diagnostics::DiagnosticEngine;
    use crate::state::AppState;
    use crate::testing::{FakeConnector, FakeDatabase, FakeDirectory, FakeIssuer};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    const BRANCH: &str = "projects/p/branches/dev";

    fn settings() -> Settings {
        Settings {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            branch: BranchConfig::default(),
            workspace: WorkspaceConfig {
                host: "workspace.example.com".to_string(),
                token: "t".to_string(),
                project: "projects/p".to_string(),
            },
            diagnostics: DiagnosticsConfig::default(),
            cors: CorsConfig::default(),
        }
    }

    fn app() -> Router {
        let directory = Arc::new(
            FakeDirectory::default()
                .with_branch("projects/p/branches/main", true, Some("ep-main.example.com"))
                .with_branch(BRANCH, false, Some("ep-dev.example.com")),
        );
        let branch_db = FakeDatabase::default()
            .with_table("data_wolves", "lb_alerts", &["alert_id"], 1)
            .with_table("data_wolves", "lb_events", &["event_id"], 1);
        let connector = Arc::new(
            FakeConnector::new(FakeDatabase::default()).with_host("ep-dev.example.com", branch_db),
        );
        let engine = DiagnosticEngine::new(
            directory,
            Arc::new(FakeIssuer::default()),
            connector,
            Identity::Reference {
                host: "ep-main.example.com".to_string(),
                user: "analyst".to_string(),
            },
            DiagnosticsConfig::default(),
        );
        create_router(Arc::new(AppState::new(engine)), &settings())
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn test_empty_branch_is_a_validation_error() {
        let (status, body) = send(
            &app(),
            "POST",
            "/api/diagnostics/tables",
            Some(json!({ "branch": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_branch_with_dot_segments_is_rejected() {
        let (status, body) = send(
            &app(),
            "POST",
            "/api/connections",
            Some(json!({ "branch": "projects/p/branches/../../../2.0/secrets/list?x=" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_default_branch_is_refused_without_refresh() {
        let (status, body) = send(
            &app(),
            "POST",
            "/api/diagnostics/tables",
            Some(json!({ "branch": "projects/p/branches/main" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_refresh_then_list_branches() {
        let app = app();
        let (status, _) = send(&app, "POST", "/api/branches/refresh", None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, "GET", "/api/branches", None).await;
        assert_eq!(body["branches"].as_array().unwrap().len(), 2);
        assert_eq!(body["selectable"], json!([BRANCH]));
    }

    #[tokio::test]
    async fn test_check_tables_reports_missing() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/diagnostics/tables",
            Some(json!({ "branch": BRANCH })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["missing"], json!(["lb_tenants", "support_tickets"]));

        let (_, body) = send(&app, "GET", "/api/connections", None).await;
        assert_eq!(body["connections"].as_array().unwrap().len(), 1);

        let (status, body) = send(
            &app,
            "POST",
            "/api/connections/disconnect",
            Some(json!({ "branch": BRANCH })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dropped"], true);
    }
}
