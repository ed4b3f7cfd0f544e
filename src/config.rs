//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Valid unquoted PostgreSQL identifier (namespaces, expected tables)
static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_$]*$").expect("identifier regex is valid"));

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0),
            port: 3000,
        }
    }
}

/// TLS negotiation mode for database connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    Disable,
    Prefer,
    Require,
}

impl FromStr for SslMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            other => Err(ConfigError::InvalidValue(format!(
                "sslmode '{}' (expected disable, prefer or require)",
                other
            ))),
        }
    }
}

/// TCP keepalive settings applied to every database connection
#[derive(Debug, Clone, Deserialize)]
pub struct KeepaliveConfig {
    pub idle: Duration,
    pub interval: Duration,
    pub retries: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(30),
            interval: Duration::from_secs(10),
            retries: 5,
        }
    }
}

/// Reference (default branch) database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: SslMode,
    pub keepalive: KeepaliveConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "databricks_postgres".to_string(),
            ssl_mode: SslMode::Require,
            keepalive: KeepaliveConfig::default(),
        }
    }
}

/// Branch connection parameters; host and password come from the
/// branch endpoint and the credential issuer at runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct BranchConfig {
    pub user: String,
    pub database: String,
    pub port: u16,
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            user: "postgres".to_string(),
            database: "databricks_postgres".to_string(),
            port: 5432,
        }
    }
}

/// Workspace API hosting the branch directory and credential issuer
#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceConfig {
    pub host: String,
    pub token: String,
    /// Parent resource of the branches, e.g. `projects/<uuid>`
    pub project: String,
}

/// Diagnostic workflow parameters
#[derive(Debug, Clone, Deserialize)]
pub struct DiagnosticsConfig {
    pub namespace: String,
    pub expected_tables: Vec<String>,
    pub null_threshold: f64,
    pub regression_threshold: f64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            namespace: "data_wolves".to_string(),
            expected_tables: vec![
                "lb_alerts".to_string(),
                "lb_events".to_string(),
                "lb_tenants".to_string(),
                "support_tickets".to_string(),
            ],
            null_threshold: 25.0,
            regression_threshold: 50.0,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:8501".to_string()],
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub branch: BranchConfig,
    pub workspace: WorkspaceConfig,
    pub diagnostics: DiagnosticsConfig,
    pub cors: CorsConfig,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let server = ServerConfig {
            host: parse_var("HOST")?.unwrap_or_else(|| ServerConfig::default().host),
            port: parse_var("PORT")?.unwrap_or_else(|| ServerConfig::default().port),
        };

        let keepalive = KeepaliveConfig {
            idle: parse_var("DB_KEEPALIVES_IDLE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or_else(|| KeepaliveConfig::default().idle),
            interval: parse_var("DB_KEEPALIVES_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or_else(|| KeepaliveConfig::default().interval),
            retries: parse_var("DB_KEEPALIVES_RETRIES")?
                .unwrap_or_else(|| KeepaliveConfig::default().retries),
        };
        let ssl_mode = parse_var("DB_SSLMODE")?.unwrap_or(SslMode::Require);

        // Try to load DATABASE_URL first, fall back to individual vars
        let defaults = DatabaseConfig::default();
        let mut database = if let Ok(database_url) = std::env::var("DATABASE_URL") {
            Self::parse_database_url(&database_url)?
        } else {
            DatabaseConfig {
                host: std::env::var("DB_HOST").unwrap_or(defaults.host),
                port: parse_var("DB_PORT")?.unwrap_or(defaults.port),
                user: std::env::var("DB_USER").unwrap_or(defaults.user),
                password: std::env::var("DB_PASSWORD").unwrap_or_default(),
                database: std::env::var("DB_NAME").unwrap_or(defaults.database),
                ssl_mode,
                keepalive: KeepaliveConfig::default(),
            }
        };
        database.keepalive = keepalive;
        if std::env::var("DB_SSLMODE").is_ok() {
            database.ssl_mode = ssl_mode;
        }

        let branch_defaults = BranchConfig::default();
        let branch = BranchConfig {
            user: std::env::var("BRANCH_DB_USER").unwrap_or(branch_defaults.user),
            database: std::env::var("BRANCH_DB_NAME").unwrap_or(branch_defaults.database),
            port: parse_var("BRANCH_DB_PORT")?.unwrap_or(branch_defaults.port),
        };

        let workspace = WorkspaceConfig {
            host: required_var("WORKSPACE_HOST")?,
            token: required_var("WORKSPACE_TOKEN")?,
            project: required_var("WORKSPACE_PROJECT")?,
        };

        let diag_defaults = DiagnosticsConfig::default();
        let diagnostics = DiagnosticsConfig {
            namespace: std::env::var("DIAG_NAMESPACE").unwrap_or(diag_defaults.namespace),
            expected_tables: std::env::var("DIAG_EXPECTED_TABLES")
                .ok()
                .map(|s| split_list(&s))
                .unwrap_or(diag_defaults.expected_tables),
            null_threshold: parse_var("DIAG_NULL_THRESHOLD")?
                .unwrap_or(diag_defaults.null_threshold),
            regression_threshold: parse_var("DIAG_REGRESSION_THRESHOLD")?
                .unwrap_or(diag_defaults.regression_threshold),
        };
        diagnostics.validate()?;

        let cors = CorsConfig {
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|s| split_list(&s))
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        Ok(Self {
            server,
            database,
            branch,
            workspace,
            diagnostics,
            cors,
        })
    }

    /// Parse a DATABASE_URL connection string (postgresql://...)
    fn parse_database_url(raw: &str) -> Result<DatabaseConfig, ConfigError> {
        let parsed = url::Url::parse(raw).map_err(|_| {
            ConfigError::InvalidValue(
                "Invalid DATABASE_URL format (expected postgresql://...)".to_string(),
            )
        })?;

        if !matches!(parsed.scheme(), "postgres" | "postgresql") {
            return Err(ConfigError::InvalidValue(format!(
                "Unsupported DATABASE_URL scheme '{}'",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidValue("Missing host in DATABASE_URL".to_string()))?
            .to_string();

        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(ConfigError::InvalidValue(
                "Missing database name in DATABASE_URL".to_string(),
            ));
        }

        let ssl_mode = parsed
            .query_pairs()
            .find(|(k, _)| k == "sslmode")
            .map(|(_, v)| v.parse::<SslMode>())
            .transpose()?
            .unwrap_or(SslMode::Require);

        Ok(DatabaseConfig {
            host,
            port: parsed.port().unwrap_or(5432),
            user: parsed.username().to_string(),
            password: parsed.password().map(|p| p.to_string()).unwrap_or_default(),
            database,
            ssl_mode,
            keepalive: KeepaliveConfig::default(),
        })
    }
}

impl DiagnosticsConfig {
    /// Reject namespaces and table names that are not plain identifiers
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_identifier(&self.namespace) {
            return Err(ConfigError::InvalidValue(format!(
                "namespace '{}' is not a valid identifier",
                self.namespace
            )));
        }
        if let Some(bad) = self.expected_tables.iter().find(|t| !is_identifier(t)) {
            return Err(ConfigError::InvalidValue(format!(
                "expected table '{}' is not a valid identifier",
                bad
            )));
        }
        for (name, value) in [
            ("null threshold", self.null_threshold),
            ("regression threshold", self.regression_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::InvalidValue(format!(
                    "{} {} must be within 0..=100",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn required_var(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingVar(key.to_string()))
}

/// Parse an optional environment variable, failing loudly on garbage
fn parse_var<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(format!("{}={}", key, raw))),
        Err(_) => Ok(None),
    }
}
