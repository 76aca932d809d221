//! Shared test support: scripted gateway and world-building helpers.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use hubmirror::gateway::{
    AccessCredential, AccountRecord, CacheMetadata, FetchOutcome, GatewayError, IssueRecord,
    LabelRecord, MemberRole, MembershipRecord, RepositoryRecord, RequestPriority,
};
use hubmirror::{SqlStore, UpstreamGateway};

/// Create an in-memory store with migrations applied.
pub async fn test_store() -> SqlStore {
    let db = hubmirror::connect_and_migrate("sqlite::memory:")
        .await
        .expect("in-memory database should migrate");
    SqlStore::new(db)
}

/// Poll a condition until it holds or the timeout expires.
pub async fn wait_until<F, Fut>(what: &str, timeout: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Errors a script can produce without owning a `GatewayError`.
#[derive(Clone, Debug)]
pub enum ScriptedError {
    RateLimited(Duration),
    Revoked,
    NotFound,
    Network,
}

impl ScriptedError {
    fn into_error(self, key: &str) -> GatewayError {
        match self {
            ScriptedError::RateLimited(retry_after) => GatewayError::RateLimited { retry_after },
            ScriptedError::Revoked => GatewayError::CredentialRevoked,
            ScriptedError::NotFound => GatewayError::not_found(key),
            ScriptedError::Network => GatewayError::network("scripted network failure"),
        }
    }
}

/// One scripted response.
#[derive(Clone, Debug)]
pub enum Scripted {
    Fresh {
        json: serde_json::Value,
        metadata: CacheMetadata,
        response_ts: DateTime<Utc>,
    },
    NotModified {
        metadata: CacheMetadata,
    },
    Fail(ScriptedError),
}

impl Scripted {
    /// A fresh payload with an hour of cache validity.
    pub fn fresh(json: serde_json::Value) -> Self {
        Scripted::fresh_at(json, Utc::now())
    }

    /// A fresh payload stamped with a specific response timestamp.
    pub fn fresh_at(json: serde_json::Value, response_ts: DateTime<Utc>) -> Self {
        Scripted::Fresh {
            json,
            metadata: fresh_metadata(),
            response_ts,
        }
    }
}

/// Metadata that stays valid for an hour.
pub fn fresh_metadata() -> CacheMetadata {
    CacheMetadata {
        etag: Some("\"scripted-v1\"".to_string()),
        expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
    }
}

/// Gateway whose responses are scripted per endpoint key.
///
/// Unscripted fetches answer "not modified" with the caller's own metadata,
/// which keeps idle agents quiet.
#[derive(Default)]
pub struct MockGateway {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<String>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for an endpoint key.
    pub fn script(&self, key: &str, response: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(response);
    }

    /// Every fetch made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of fetches made against one endpoint key.
    pub fn call_count(&self, key: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == key).count()
    }

    fn next<T: DeserializeOwned>(
        &self,
        key: &str,
        prior: &CacheMetadata,
    ) -> Result<FetchOutcome<T>, GatewayError> {
        self.calls.lock().unwrap().push(key.to_string());

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(|queue| queue.pop_front());

        match scripted {
            Some(Scripted::Fresh {
                json,
                metadata,
                response_ts,
            }) => Ok(FetchOutcome::Fresh {
                payload: serde_json::from_value(json).expect("scripted payload should deserialize"),
                metadata,
                response_ts,
            }),
            Some(Scripted::NotModified { metadata }) => Ok(FetchOutcome::NotModified { metadata }),
            Some(Scripted::Fail(error)) => Err(error.into_error(key)),
            None => Ok(FetchOutcome::NotModified {
                metadata: prior.clone(),
            }),
        }
    }
}

#[async_trait]
impl UpstreamGateway for MockGateway {
    async fn fetch_user(
        &self,
        cred: &AccessCredential,
        prior: &CacheMetadata,
        _priority: RequestPriority,
    ) -> Result<FetchOutcome<AccountRecord>, GatewayError> {
        self.next(&format!("user/{}", cred.token), prior)
    }

    async fn fetch_user_repositories(
        &self,
        cred: &AccessCredential,
        prior: &CacheMetadata,
        _priority: RequestPriority,
    ) -> Result<FetchOutcome<Vec<RepositoryRecord>>, GatewayError> {
        self.next(&format!("user_repos/{}", cred.token), prior)
    }

    async fn fetch_user_organizations(
        &self,
        cred: &AccessCredential,
        prior: &CacheMetadata,
        _priority: RequestPriority,
    ) -> Result<FetchOutcome<Vec<MembershipRecord>>, GatewayError> {
        self.next(&format!("user_orgs/{}", cred.token), prior)
    }

    async fn fetch_organization(
        &self,
        _cred: &AccessCredential,
        login: &str,
        prior: &CacheMetadata,
        _priority: RequestPriority,
    ) -> Result<FetchOutcome<AccountRecord>, GatewayError> {
        self.next(&format!("org/{login}"), prior)
    }

    async fn fetch_organization_members(
        &self,
        _cred: &AccessCredential,
        login: &str,
        role: MemberRole,
        prior: &CacheMetadata,
        _priority: RequestPriority,
    ) -> Result<FetchOutcome<Vec<AccountRecord>>, GatewayError> {
        self.next(&format!("org_members/{login}/{}", role.as_str()), prior)
    }

    async fn fetch_repository(
        &self,
        _cred: &AccessCredential,
        full_name: &str,
        prior: &CacheMetadata,
        _priority: RequestPriority,
    ) -> Result<FetchOutcome<RepositoryRecord>, GatewayError> {
        self.next(&format!("repo/{full_name}"), prior)
    }

    async fn fetch_repository_labels(
        &self,
        _cred: &AccessCredential,
        full_name: &str,
        prior: &CacheMetadata,
        _priority: RequestPriority,
    ) -> Result<FetchOutcome<Vec<LabelRecord>>, GatewayError> {
        self.next(&format!("repo_labels/{full_name}"), prior)
    }

    async fn fetch_repository_issues(
        &self,
        _cred: &AccessCredential,
        full_name: &str,
        prior: &CacheMetadata,
        _priority: RequestPriority,
    ) -> Result<FetchOutcome<Vec<IssueRecord>>, GatewayError> {
        self.next(&format!("repo_issues/{full_name}"), prior)
    }

    async fn fetch_repository_assignees(
        &self,
        _cred: &AccessCredential,
        full_name: &str,
        prior: &CacheMetadata,
        _priority: RequestPriority,
    ) -> Result<FetchOutcome<Vec<AccountRecord>>, GatewayError> {
        self.next(&format!("repo_assignees/{full_name}"), prior)
    }
}

/// JSON for a user account payload.
pub fn user_json(id: i64, login: &str) -> serde_json::Value {
    serde_json::json!({ "id": id, "login": login, "type": "User" })
}

/// JSON for an organization account payload.
pub fn org_json(id: i64, login: &str) -> serde_json::Value {
    serde_json::json!({ "id": id, "login": login, "type": "Organization" })
}

/// JSON for a repository payload with push permission and issues enabled.
pub fn repo_json(id: i64, owner_id: i64, owner: &str, name: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": name,
        "full_name": format!("{owner}/{name}"),
        "private": false,
        "has_issues": true,
        "owner": { "id": owner_id, "login": owner, "type": "User" },
        "permissions": { "admin": true, "push": true, "pull": true }
    })
}

/// JSON for an issue payload.
pub fn issue_json(id: i64, number: i64, title: &str, author: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "number": number,
        "title": title,
        "state": "open",
        "user": author,
        "labels": [{ "name": "bug", "color": "ff0000" }],
        "created_at": "2026-01-01T00:00:00Z",
        "updated_at": "2026-01-02T00:00:00Z"
    })
}

/// Typed account record helper.
pub fn account_record(id: i64, login: &str) -> AccountRecord {
    AccountRecord::user(id, login)
}

/// Typed repository record helper.
pub fn repository_record(id: i64, owner_id: i64, owner: &str, name: &str) -> RepositoryRecord {
    serde_json::from_value(repo_json(id, owner_id, owner, name)).expect("valid repo json")
}

/// Typed issue record helper.
pub fn issue_record(id: i64, number: i64, title: &str, author_id: i64) -> IssueRecord {
    serde_json::from_value(issue_json(
        id,
        number,
        title,
        user_json(author_id, &format!("user-{author_id}")),
    ))
    .expect("valid issue json")
}
