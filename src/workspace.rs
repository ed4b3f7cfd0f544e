//! Workspace API client
//!
//! The workspace hosts the branch directory (branches of the project and
//! their compute endpoints) and the credential issuer for branch endpoints.

use crate::config::WorkspaceConfig;
use crate::credential::{CredentialIssuer, IssuedCredential};
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Slash-separated resource path with plain segments only
static RESOURCE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+(/[A-Za-z0-9_-]+)*$").expect("resource path regex is valid")
});

/// A branch as listed by the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchInfo {
    pub name: String,
    pub is_default: bool,
    pub is_protected: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub state: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A compute endpoint serving a branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchEndpoint {
    /// Resource name, used to request credentials
    pub name: String,
    /// Network host to connect to
    pub host: String,
}

/// Enumerates branches and resolves them to endpoints
#[async_trait]
pub trait BranchDirectory: Send + Sync {
    async fn list_branches(&self) -> Result<Vec<BranchInfo>, AppError>;

    async fn list_endpoints(&self, branch: &str) -> Result<Vec<BranchEndpoint>, AppError>;
}

// Wire format of the workspace API

#[derive(Debug, Default, Deserialize)]
struct BranchStatusWire {
    #[serde(default)]
    default: bool,
    #[serde(default)]
    is_protected: bool,
    source_branch_time: Option<DateTime<Utc>>,
    current_state: Option<String>,
    expire_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct BranchWire {
    name: String,
    #[serde(default)]
    status: BranchStatusWire,
}

#[derive(Debug, Deserialize)]
struct ListBranchesWire {
    #[serde(default)]
    branches: Vec<BranchWire>,
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HostsWire {
    host: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EndpointStatusWire {
    #[serde(default)]
    hosts: HostsWire,
}

#[derive(Debug, Deserialize)]
struct EndpointWire {
    name: String,
    #[serde(default)]
    status: EndpointStatusWire,
}

#[derive(Debug, Deserialize)]
struct ListEndpointsWire {
    #[serde(default)]
    endpoints: Vec<EndpointWire>,
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct CredentialRequestWire<'a> {
    endpoint: &'a str,
}

#[derive(Debug, Deserialize)]
struct CredentialWire {
    token: String,
    expire_time: Option<DateTime<Utc>>,
}

impl From<BranchWire> for BranchInfo {
    fn from(wire: BranchWire) -> Self {
        Self {
            name: wire.name,
            is_default: wire.status.default,
            is_protected: wire.status.is_protected,
            created_at: wire.status.source_branch_time,
            state: wire.status.current_state,
            expires_at: wire.status.expire_time,
        }
    }
}

/// HTTP client for the workspace API
pub struct WorkspaceClient {
    http: reqwest::Client,
    base_url: url::Url,
    token: String,
    project: String,
}

impl WorkspaceClient {
    pub fn new(config: &WorkspaceConfig) -> Result<Self, AppError> {
        let raw = if config.host.starts_with("http://") || config.host.starts_with("https://") {
            config.host.clone()
        } else {
            format!("https://{}", config.host)
        };
        let base_url = url::Url::parse(&raw)
            .map_err(|e| {
                AppError::Config(format!("Invalid WORKSPACE_HOST '{}': {}", config.host, e))
            })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            token: config.token.clone(),
            project: config.project.clone(),
        })
    }

    fn api_url(&self, path: &str) -> Result<url::Url, AppError> {
        let path = path.trim_start_matches('/');
        if !RESOURCE_PATH.is_match(path) {
            return Err(AppError::BadRequest(format!("Invalid resource name '{}'", path)));
        }
        self.base_url
            .join(&format!("api/2.0/postgres/{}", path))
            .map_err(|e| AppError::Config(format!("Invalid workspace path '{}': {}", path, e)))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        page_token: Option<&str>,
    ) -> Result<T, String> {
        let mut url = self.api_url(path).map_err(|e| e.to_string())?;
        if let Some(token) = page_token {
            url.query_pairs_mut().append_pair("page_token", token);
        }
        debug!(%url, "Workspace GET");

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status, body));
        }
        response.json::<T>().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl BranchDirectory for WorkspaceClient {
    async fn list_branches(&self) -> Result<Vec<BranchInfo>, AppError> {
        let path = format!("{}/branches", self.project);
        let mut branches = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page: ListBranchesWire = self
                .get_json(&path, page_token.as_deref())
                .await
                .map_err(|e| AppError::Directory(format!("listing branches: {}", e)))?;
            branches.extend(page.branches.into_iter().map(BranchInfo::from));

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        debug!(count = branches.len(), "Listed branches");
        Ok(branches)
    }

    async fn list_endpoints(&self, branch: &str) -> Result<Vec<BranchEndpoint>, AppError> {
        let path = format!("{}/endpoints", branch);
        let mut endpoints = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page: ListEndpointsWire = self
                .get_json(&path, page_token.as_deref())
                .await
                .map_err(|e| {
                    AppError::Directory(format!("listing endpoints of '{}': {}", branch, e))
                })?;

            // Endpoints still provisioning have no host yet
            endpoints.extend(page.endpoints.into_iter().filter_map(|e| {
                e.status.hosts.host.map(|host| BranchEndpoint { name: e.name, host })
            }));

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        Ok(endpoints)
    }
}

#[async_trait]
impl CredentialIssuer for WorkspaceClient {
    async fn issue(&self, endpoint: &str) -> Result<IssuedCredential, AppError> {
        let url = self.api_url("credentials")?;
        debug!(%endpoint, "Requesting database credential");

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&CredentialRequestWire { endpoint })
            .send()
            .await
            .map_err(|e| AppError::Credential(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Credential(format!("HTTP {}: {}", status, body)));
        }

        let wire: CredentialWire = response
            .json()
            .await
            .map_err(|e| AppError::Credential(format!("malformed credential response: {}", e)))?;

        Ok(IssuedCredential {
            token: wire.token,
            server_expiry: wire.expire_time,
        })
    }
}

/// The first endpoint of `branch` that has a host
pub async fn resolve_endpoint(
    directory: &dyn BranchDirectory,
    branch: &str,
) -> Result<BranchEndpoint, AppError> {
    directory
        .list_endpoints(branch)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound(format!("Branch '{}' has no reachable endpoint", branch)))
}
