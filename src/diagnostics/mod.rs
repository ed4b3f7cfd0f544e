//! Branch Diagnostics
//!
//! The checks run against a branch before it is trusted:
//! - Schema completeness (expected tables present)
//! - Data quality (null ratios per column)
//! - Performance (query latency against the reference instance)

pub mod engine;
pub mod performance;
pub mod quality;
pub mod schema;

pub use engine::{DiagnosticEngine, DiagnosticReport};
pub use performance::PerformanceReport;
pub use quality::QualityReport;
pub use schema::SchemaReport;
