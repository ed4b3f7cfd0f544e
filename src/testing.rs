//! In-memory stand-ins for the database, the connector, the credential
//! issuer and the branch directory.

use crate::connection::{Connector, Identity};
use crate::credential::{CredentialIssuer, IssuedCredential};
use crate::db::{DatabaseSession, TableCounts};
use crate::error::{AppError, DbError};
use crate::workspace::{BranchDirectory, BranchEndpoint, BranchInfo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct FakeTable {
    columns: Vec<String>,
    rows: i64,
    nulls: HashMap<String, i64>,
}

/// Catalog, row counts and query latencies of a pretend database
#[derive(Debug, Clone, Default)]
pub struct FakeDatabase {
    tables: BTreeMap<(String, String), FakeTable>,
    broken_catalog: bool,
    broken_counts: HashSet<String>,
    queries: HashMap<String, Result<Duration, String>>,
}

impl FakeDatabase {
    pub fn with_table(mut self, namespace: &str, name: &str, columns: &[&str], rows: i64) -> Self {
        self.tables.insert(
            (namespace.to_string(), name.to_string()),
            FakeTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
                nulls: HashMap::new(),
            },
        );
        self
    }

    pub fn with_nulls(mut self, namespace: &str, table: &str, column: &str, nulls: i64) -> Self {
        if let Some(t) = self
            .tables
            .get_mut(&(namespace.to_string(), table.to_string()))
        {
            t.nulls.insert(column.to_string(), nulls);
        }
        self
    }

    pub fn with_broken_catalog(mut self) -> Self {
        self.broken_catalog = true;
        self
    }

    pub fn with_broken_counts(mut self, table: &str) -> Self {
        self.broken_counts.insert(table.to_string());
        self
    }

    /// `sql` succeeds after `latency`
    pub fn with_query(mut self, sql: &str, latency: Duration) -> Self {
        self.queries.insert(sql.to_string(), Ok(latency));
        self
    }

    /// `sql` fails immediately with `message`
    pub fn with_failing_query(mut self, sql: &str, message: &str) -> Self {
        self.queries
            .insert(sql.to_string(), Err(message.to_string()));
        self
    }

    fn table(&self, namespace: &str, table: &str) -> Result<&FakeTable, DbError> {
        self.tables
            .get(&(namespace.to_string(), table.to_string()))
            .ok_or_else(|| {
                DbError::new(format!(
                    "42P01: relation \"{}.{}\" does not exist",
                    namespace, table
                ))
            })
    }
}

pub struct FakeSession {
    db: FakeDatabase,
    alive: Arc<AtomicBool>,
    catalog_queries: AtomicUsize,
}

impl FakeSession {
    pub fn new(db: FakeDatabase) -> Self {
        Self::with_liveness(db, Arc::new(AtomicBool::new(true)))
    }

    fn with_liveness(db: FakeDatabase, alive: Arc<AtomicBool>) -> Self {
        Self {
            db,
            alive,
            catalog_queries: AtomicUsize::new(0),
        }
    }

    /// Number of table listings issued
    pub fn catalog_queries(&self) -> usize {
        self.catalog_queries.load(Ordering::SeqCst)
    }

    fn check_alive(&self) -> Result<(), DbError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DbError::new("server closed the connection unexpectedly"))
        }
    }
}

#[async_trait]
impl DatabaseSession for FakeSession {
    async fn ping(&self) -> Result<(), DbError> {
        self.check_alive()
    }

    async fn table_names(&self, namespace: &str) -> Result<Vec<String>, DbError> {
        self.check_alive()?;
        self.catalog_queries.fetch_add(1, Ordering::SeqCst);
        if self.db.broken_catalog {
            return Err(DbError::new("42501: permission denied for schema information_schema"));
        }
        Ok(self
            .db
            .tables
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn column_names(&self, namespace: &str, table: &str) -> Result<Vec<String>, DbError> {
        self.check_alive()?;
        Ok(self.db.table(namespace, table)?.columns.clone())
    }

    async fn column_counts(
        &self,
        namespace: &str,
        table: &str,
        columns: &[String],
    ) -> Result<TableCounts, DbError> {
        self.check_alive()?;
        if self.db.broken_counts.contains(table) {
            return Err(DbError::new("57014: canceling statement due to statement timeout"));
        }
        let t = self.db.table(namespace, table)?;
        let non_null_rows = columns
            .iter()
            .map(|c| t.rows - t.nulls.get(c).copied().unwrap_or(0))
            .collect();
        Ok(TableCounts {
            total_rows: t.rows,
            non_null_rows,
        })
    }

    async fn run_read(&self, sql: &str) -> Result<usize, DbError> {
        self.check_alive()?;
        match self.db.queries.get(sql) {
            Some(Ok(latency)) => {
                tokio::time::sleep(*latency).await;
                Ok(1)
            }
            Some(Err(message)) => Err(DbError::new(message.clone())),
            None => Err(DbError::new(format!("unexpected query: {}", sql))),
        }
    }
}

/// Hands out [`FakeSession`]s, one database per host
pub struct FakeConnector {
    default_db: FakeDatabase,
    hosts: HashMap<String, FakeDatabase>,
    opened: AtomicUsize,
    refusing: AtomicBool,
    sessions: Mutex<Vec<Arc<AtomicBool>>>,
}

impl FakeConnector {
    pub fn new(db: FakeDatabase) -> Self {
        Self {
            default_db: db,
            hosts: HashMap::new(),
            opened: AtomicUsize::new(0),
            refusing: AtomicBool::new(false),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_host(mut self, host: &str, db: FakeDatabase) -> Self {
        self.hosts.insert(host.to_string(), db);
        self
    }

    /// Connection attempts so far, refused ones included
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Every session opened so far starts failing
    pub fn kill_sessions(&self) {
        for alive in self.sessions.lock().unwrap().iter() {
            alive.store(false, Ordering::SeqCst);
        }
    }

    pub fn refuse_connections(&self) {
        self.refusing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, identity: &Identity) -> Result<Box<dyn DatabaseSession>, AppError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.refusing.load(Ordering::SeqCst) {
            return Err(AppError::Connection(format!(
                "could not connect to {}: connection refused",
                identity.host()
            )));
        }

        let db = self
            .hosts
            .get(identity.host())
            .unwrap_or(&self.default_db)
            .clone();
        let alive = Arc::new(AtomicBool::new(true));
        self.sessions.lock().unwrap().push(alive.clone());
        Ok(Box::new(FakeSession::with_liveness(db, alive)))
    }
}

/// Issues `token-1`, `token-2`, ...
#[derive(Default)]
pub struct FakeIssuer {
    calls: AtomicUsize,
    claimed_expiry: Mutex<Option<DateTime<Utc>>>,
    failure: Mutex<Option<String>>,
}

impl FakeIssuer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn claim_expiry(&self, at: DateTime<Utc>) {
        *self.claimed_expiry.lock().unwrap() = Some(at);
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }
}

#[async_trait]
impl CredentialIssuer for FakeIssuer {
    async fn issue(&self, _endpoint: &str) -> Result<IssuedCredential, AppError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(AppError::Credential(message));
        }
        Ok(IssuedCredential {
            token: format!("token-{}", n),
            server_expiry: *self.claimed_expiry.lock().unwrap(),
        })
    }
}

/// Static branch listing; a branch without a host has no endpoints
#[derive(Default)]
pub struct FakeDirectory {
    branches: Vec<(BranchInfo, Option<String>)>,
}

impl FakeDirectory {
    pub fn with_branch(mut self, name: &str, is_default: bool, host: Option<&str>) -> Self {
        self.branches.push((
            BranchInfo {
                name: name.to_string(),
                is_default,
                is_protected: is_default,
                created_at: None,
                state: Some("READY".to_string()),
                expires_at: None,
            },
            host.map(str::to_string),
        ));
        self
    }
}

#[async_trait]
impl BranchDirectory for FakeDirectory {
    async fn list_branches(&self) -> Result<Vec<BranchInfo>, AppError> {
        Ok(self.branches.iter().map(|(b, _)| b.clone()).collect())
    }

    async fn list_endpoints(&self, branch: &str) -> Result<Vec<BranchEndpoint>, AppError> {
        Ok(self
            .branches
            .iter()
            .filter(|(b, _)| b.name == branch)
            .filter_map(|(b, host)| {
                host.as_ref().map(|host| BranchEndpoint {
                    name: format!("{}/endpoints/primary", b.name),
                    host: host.clone(),
                })
            })
            .collect())
    }
}
