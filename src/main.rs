//! Branch Diagnostics API
//!
//! Keeps connections to a reference database and to short-lived branch
//! endpoints healthy, and runs diagnostics against a branch before it is
//! trusted:
//! - Schema completeness: the expected tables exist
//! - Data quality: no column is mostly null
//! - Performance: representative queries are not much slower than on the
//!   reference instance
//!
//! Branch endpoints are reached with rotating tokens issued by the workspace;
//! connections are probed before every reuse and reopened when dead.

mod config;
mod connection;
mod credential;
mod db;
mod diagnostics;
mod error;
mod introspection;
mod models;
mod routes;
mod state;
#[cfg(test)]
mod testing;
mod workspace;

use crate::config::Settings;
use crate::connection::PostgresConnector;
use crate::diagnostics::DiagnosticEngine;
use crate::routes::create_router;
use crate::state::AppState;
use crate::workspace::WorkspaceClient;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting Branch Diagnostics...");

    // Load configuration
    let settings = Settings::load()?;
    info!(
        namespace = %settings.diagnostics.namespace,
        expected_tables = settings.diagnostics.expected_tables.len(),
        "📋 Configuration loaded successfully"
    );

    // Workspace API serves both the branch directory and the credential issuer
    let workspace = Arc::new(WorkspaceClient::new(&settings.workspace)?);
    let connector = PostgresConnector::new(settings.database.clone(), settings.branch.clone());
    let reference = connector.reference_identity();
    info!(%reference, "Reference instance configured");

    let engine = DiagnosticEngine::new(
        workspace.clone(),
        workspace,
        Arc::new(connector),
        reference,
        settings.diagnostics.clone(),
    );

    // A failed first listing is not fatal; the first diagnostic lists again
    match engine.refresh_branches().await {
        Ok(branches) => info!("✅ Found {} branch(es)", branches.len()),
        Err(e) => warn!("⚠️  Could not list branches at startup: {}", e),
    }

    let state = Arc::new(AppState::new(engine));

    // Build the router
    let app = create_router(state, &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   ─── Branches ───");
    info!("   POST   /api/branches/refresh       - Re-list branches from the workspace");
    info!("   GET    /api/branches               - Branches from the last refresh");
    info!("");
    info!("   ─── Connections ───");
    info!("   POST   /api/connections            - Connect to a branch");
    info!("   POST   /api/connections/disconnect - Drop one branch connection");
    info!("   GET    /api/connections            - List cached connections");
    info!("   DELETE /api/connections            - Drop connections and credential");
    info!("");
    info!("   ─── Diagnostics ───");
    info!("   POST   /api/diagnostics/tables      - Expected tables present");
    info!("   POST   /api/diagnostics/quality     - Null ratios per column");
    info!("   POST   /api/diagnostics/performance - Latency against reference");
    info!("   POST   /api/diagnostics/run         - All of the above");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,branch_diagnostics=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
