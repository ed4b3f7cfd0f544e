//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::diagnostics::DiagnosticEngine;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Owns the credential cache, the connection supervisor and the
    /// remembered branch list
    pub engine: DiagnosticEngine,
}

impl AppState {
    pub fn new(engine: DiagnosticEngine) -> Self {
        Self { engine }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
