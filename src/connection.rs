//! Database Connection Supervisor
//!
//! Owns exactly one live connection per identity: the reference instance, or
//! a branch endpoint reached with a rotating token. Cached handles are probed
//! before reuse and reopened at most once when the probe fails.

use crate::config::{BranchConfig, DatabaseConfig, KeepaliveConfig, SslMode};
use crate::db::{DatabaseSession, PgSession};
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::config::SslMode as PgSslMode;
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::{NoTls, Socket};
use tracing::{debug, error, info, warn};

/// Reopen attempts after a failed liveness probe
pub const MAX_RECONNECT_ATTEMPTS: u32 = 1;

/// Key of a cached connection
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// The reference instance, reached with static credentials
    Reference { host: String, user: String },
    /// A branch endpoint, reached with an issued token
    Branch { host: String, token: String },
}

impl Identity {
    pub fn host(&self) -> &str {
        match self {
            Identity::Reference { host, .. } | Identity::Branch { host, .. } => host,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Identity::Reference { .. })
    }
}

// Tokens never reach logs
impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Reference { host, user } => write!(f, "reference:{}@{}", user, host),
            Identity::Branch { host, token } => {
                let skip = token.chars().count().saturating_sub(4);
                let tail: String = token.chars().skip(skip).collect();
                write!(f, "branch:{} (token ****{})", host, tail)
            }
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self)
    }
}

/// Liveness of a cached handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Alive,
    Dead,
    Unknown,
}

/// A cached connection, owned by the supervisor
pub struct ConnectionHandle {
    identity: Identity,
    session: Box<dyn DatabaseSession>,
    liveness: Liveness,
    created_at: DateTime<Utc>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("identity", &self.identity)
            .field("liveness", &self.liveness)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn session(&self) -> &dyn DatabaseSession {
        self.session.as_ref()
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Public connection info (safe to expose to frontend)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub identity: String,
    pub host: String,
    pub is_reference: bool,
    pub liveness: Liveness,
    pub created_at: DateTime<Utc>,
}

impl From<&ConnectionHandle> for ConnectionInfo {
    fn from(handle: &ConnectionHandle) -> Self {
        let identity = handle.identity();
        Self {
            identity: identity.to_string(),
            host: identity.host().to_string(),
            is_reference: identity.is_reference(),
            liveness: handle.liveness(),
            created_at: handle.created_at(),
        }
    }
}

/// Opens new sessions for an identity
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, identity: &Identity) -> Result<Box<dyn DatabaseSession>, AppError>;
}

/// Caches one handle per identity and keeps it alive
pub struct ConnectionSupervisor {
    connector: Arc<dyn Connector>,
    handles: HashMap<Identity, ConnectionHandle>,
}

impl ConnectionSupervisor {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            handles: HashMap::new(),
        }
    }

    /// Borrow a live handle for `identity`, opening or reopening as needed.
    ///
    /// A cached handle is probed first. On probe failure the entry is
    /// evicted and reopened at most [`MAX_RECONNECT_ATTEMPTS`] times.
    pub async fn acquire(&mut self, identity: &Identity) -> Result<&ConnectionHandle, AppError> {
        self.ensure_live(identity).await?;
        self.handles
            .get(identity)
            .ok_or_else(|| AppError::Internal(format!("handle for {} vanished", identity)))
    }

    /// Borrow live handles for both sides of a comparison
    pub async fn acquire_pair(
        &mut self,
        reference: &Identity,
        candidate: &Identity,
    ) -> Result<(&ConnectionHandle, &ConnectionHandle), AppError> {
        self.ensure_live(reference).await?;
        self.ensure_live(candidate).await?;

        let missing = |id: &Identity| AppError::Internal(format!("handle for {} vanished", id));
        let reference = self.handles.get(reference).ok_or_else(|| missing(reference))?;
        let candidate = self.handles.get(candidate).ok_or_else(|| missing(candidate))?;
        Ok((reference, candidate))
    }

    async fn ensure_live(&mut self, identity: &Identity) -> Result<(), AppError> {
        let Some(handle) = self.handles.get_mut(identity) else {
            return self.open(identity, 1).await;
        };

        match handle.session.ping().await {
            Ok(()) => {
                handle.liveness = Liveness::Alive;
                debug!(%identity, "Reusing cached connection");
                Ok(())
            }
            Err(e) => {
                handle.liveness = Liveness::Dead;
                let probe = AppError::ProbeFailure(e.message);
                warn!(%identity, error = %probe, "Cached connection is dead, reconnecting");
                self.handles.remove(identity);
                self.open(identity, MAX_RECONNECT_ATTEMPTS).await
            }
        }
    }

    /// Open and cache a new handle, giving up after `max_attempts`
    async fn open(&mut self, identity: &Identity, max_attempts: u32) -> Result<(), AppError> {
        let mut attempt = 0;
        let session = loop {
            attempt += 1;
            match self.connector.open(identity).await {
                Ok(session) => break session,
                Err(e) if attempt < max_attempts => {
                    warn!(%identity, attempt, error = %e, "Connection attempt failed");
                }
                Err(e) => {
                    error!(%identity, attempt, error = %e, "Giving up on connection");
                    return Err(match e {
                        AppError::Connection(_) => e,
                        other => AppError::Connection(other.to_string()),
                    });
                }
            }
        };

        if let Identity::Branch { host, .. } = identity {
            self.evict_rotated(host, identity);
        }

        self.handles.insert(
            identity.clone(),
            ConnectionHandle {
                identity: identity.clone(),
                session,
                liveness: Liveness::Alive,
                created_at: Utc::now(),
            },
        );
        info!(%identity, cached = self.handles.len(), "Opened connection");
        Ok(())
    }

    /// Drop branch handles for `host` that still carry an older token
    fn evict_rotated(&mut self, host: &str, current: &Identity) {
        let before = self.handles.len();
        self.handles.retain(|id, _| match id {
            Identity::Branch { host: h, .. } => h != host || id == current,
            Identity::Reference { .. } => true,
        });
        let evicted = before - self.handles.len();
        if evicted > 0 {
            debug!(%host, evicted, "Evicted branch connections with rotated tokens");
        }
    }

    /// Flag a cached handle whose health is in doubt; the next acquire probes it
    pub fn mark_unknown(&mut self, identity: &Identity) {
        if let Some(handle) = self.handles.get_mut(identity) {
            handle.liveness = Liveness::Unknown;
        }
    }

    /// Drop the cached handle for `identity`, if any
    pub fn evict(&mut self, identity: &Identity) -> bool {
        self.handles.remove(identity).is_some()
    }

    /// Drop every cached handle
    pub fn clear(&mut self) -> usize {
        let count = self.handles.len();
        self.handles.clear();
        info!("Dropped {} cached connection(s)", count);
        count
    }

    /// Snapshot of cached handles, reference first
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut list: Vec<_> = self.handles.values().map(ConnectionInfo::from).collect();
        list.sort_by(|a, b| {
            b.is_reference
                .cmp(&a.is_reference)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        list
    }
}

/// Parameters for one PostgreSQL connection
#[derive(Clone)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: SslMode,
    pub keepalive: Option<KeepaliveConfig>,
}

impl ConnectionParams {
    fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .password(&self.password)
            .dbname(&self.database)
            .application_name("branch-diagnostics")
            .connect_timeout(Duration::from_secs(10))
            .ssl_mode(match self.ssl_mode {
                SslMode::Disable => PgSslMode::Disable,
                SslMode::Prefer => PgSslMode::Prefer,
                SslMode::Require => PgSslMode::Require,
            });

        if let Some(keepalive) = &self.keepalive {
            config
                .keepalives(true)
                .keepalives_idle(keepalive.idle)
                .keepalives_interval(keepalive.interval)
                .keepalives_retries(keepalive.retries);
        }
        config
    }

    /// Password masked for display
    pub fn to_display_string(&self) -> String {
        format!(
            "postgres://{}:****@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

/// Opens real PostgreSQL connections from the service configuration
pub struct PostgresConnector {
    reference: DatabaseConfig,
    branch: BranchConfig,
}

impl PostgresConnector {
    pub fn new(reference: DatabaseConfig, branch: BranchConfig) -> Self {
        Self { reference, branch }
    }

    /// The identity of the configured reference instance
    pub fn reference_identity(&self) -> Identity {
        Identity::Reference {
            host: self.reference.host.clone(),
            user: self.reference.user.clone(),
        }
    }

    pub fn params_for(&self, identity: &Identity) -> Result<ConnectionParams, AppError> {
        match identity {
            Identity::Reference { host, user } => {
                if host != &self.reference.host || user != &self.reference.user {
                    return Err(AppError::Config(format!(
                        "no credentials configured for {}",
                        identity
                    )));
                }
                Ok(ConnectionParams {
                    host: host.clone(),
                    port: self.reference.port,
                    user: user.clone(),
                    password: self.reference.password.clone(),
                    database: self.reference.database.clone(),
                    ssl_mode: self.reference.ssl_mode,
                    keepalive: Some(self.reference.keepalive.clone()),
                })
            }
            Identity::Branch { host, token } => Ok(ConnectionParams {
                host: host.clone(),
                port: self.branch.port,
                user: self.branch.user.clone(),
                password: token.clone(),
                database: self.branch.database.clone(),
                ssl_mode: SslMode::Require,
                keepalive: None,
            }),
        }
    }

    async fn connect_with<T>(
        config: &tokio_postgres::Config,
        tls: T,
    ) -> Result<tokio_postgres::Client, AppError>
    where
        T: MakeTlsConnect<Socket> + 'static + Send,
        T::TlsConnect: Send,
        T::Stream: Send + 'static,
        <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
    {
        let (client, connection) = config
            .connect(tls)
            .await
            .map_err(|e| AppError::Connection(format!("Failed to connect: {}", e)))?;

        // The connection object drives the socket; it ends when the server goes away
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("Database connection terminated: {}", e);
            }
        });

        Ok(client)
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    async fn open(&self, identity: &Identity) -> Result<Box<dyn DatabaseSession>, AppError> {
        let params = self.params_for(identity)?;
        let config = params.to_pg_config();
        debug!("Connecting to {}", params.to_display_string());

        let client = match params.ssl_mode {
            SslMode::Disable => Self::connect_with(&config, NoTls).await?,
            SslMode::Prefer | SslMode::Require => Self::connect_with(&config, make_tls()).await?,
        };

        Ok(Box::new(PgSession::new(client)))
    }
}

/// TLS connector trusting the platform's native root certificates
fn make_tls() -> tokio_postgres_rustls::MakeRustlsConnect {
    let certs = rustls_native_certs::load_native_certs();
    let mut root_store = rustls::RootCertStore::empty();
    for cert in certs.certs {
        root_store.add(cert).ok();
    }

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    tokio_postgres_rustls::MakeRustlsConnect::new(tls_config)
}
