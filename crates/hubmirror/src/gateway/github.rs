//! Live gateway over the GitHub REST API.
//!
//! All requests are conditional GETs: the prior [`CacheMetadata`] token is
//! sent as `If-None-Match`, and a 304 response costs no payload transfer.
//! Fresh responses yield new metadata from the `ETag` and `Cache-Control`
//! headers and the response timestamp from the `Date` header. List endpoints
//! are paginated through the `Link` header and returned whole under the first
//! page's metadata.

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, IF_NONE_MATCH, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use super::budget::BudgetPool;
use super::errors::{GatewayError, Result};
use super::records::{
    AccountRecord, IssueRecord, LabelRecord, MembershipRecord, RepositoryRecord,
};
use super::{
    AccessCredential, CacheMetadata, FetchOutcome, MemberRole, RequestPriority, UpstreamGateway,
};

/// Default API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Page size requested from list endpoints.
const PER_PAGE: u32 = 100;

/// HTTP request timeout.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Extract the ETag from response headers.
pub fn extract_etag(headers: &HeaderMap) -> Option<String> {
    headers
        .get("etag")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Extract `max-age` seconds from the `Cache-Control` header.
pub fn parse_max_age(headers: &HeaderMap) -> Option<i64> {
    let value = headers.get("cache-control")?.to_str().ok()?;
    value.split(',').find_map(|directive| {
        directive
            .trim()
            .strip_prefix("max-age=")
            .and_then(|secs| secs.parse().ok())
    })
}

/// Upstream response timestamp from the `Date` header, falling back to now.
pub fn response_time(headers: &HeaderMap) -> DateTime<Utc> {
    headers
        .get("date")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Build cache metadata from response headers.
///
/// A response without `Cache-Control: max-age` yields no expiry, which the
/// freshness rule treats as stale, so the sub-resource is revalidated (cheap,
/// via ETag) on the next cycle.
pub fn metadata_from_headers(headers: &HeaderMap, now: DateTime<Utc>) -> CacheMetadata {
    CacheMetadata {
        etag: extract_etag(headers),
        expires_at: parse_max_age(headers).map(|secs| now + ChronoDuration::seconds(secs)),
    }
}

/// Detect an exhausted rate budget from response headers.
///
/// Checks `Retry-After` first, then `X-RateLimit-Remaining: 0` with the reset
/// epoch.
pub fn rate_limit_retry_after(headers: &HeaderMap) -> Option<std::time::Duration> {
    if let Some(secs) = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
    {
        return Some(std::time::Duration::from_secs(secs));
    }

    let remaining: u64 = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())?;
    if remaining > 0 {
        return None;
    }

    let reset: i64 = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())?;
    let wait = (reset - Utc::now().timestamp()).max(1) as u64;
    Some(std::time::Duration::from_secs(wait))
}

/// Extract the `rel="next"` URL from a `Link` header.
///
/// Link headers look like:
/// `<https://api.github.com/user/repos?page=2>; rel="next", <...>; rel="last"`
pub fn parse_link_next(link_header: &str) -> Option<String> {
    for part in link_header.split(',') {
        let part = part.trim();
        let mut url = None;
        let mut rel = None;

        for segment in part.split(';') {
            let segment = segment.trim();
            if segment.starts_with('<') && segment.ends_with('>') {
                url = Some(&segment[1..segment.len() - 1]);
            } else if let Some(rel_value) = segment.strip_prefix("rel=") {
                rel = Some(rel_value.trim_matches('"'));
            }
        }

        if let (Some(url), Some("next")) = (url, rel) {
            return Some(url.to_string());
        }
    }
    None
}

/// Outcome of one raw conditional GET.
enum RawFetch {
    NotModified {
        metadata: CacheMetadata,
    },
    Ok {
        body: String,
        headers: HeaderMap,
        response_ts: DateTime<Utc>,
    },
}

/// GitHub-backed implementation of [`UpstreamGateway`].
pub struct GitHubGateway {
    http: reqwest::Client,
    api_base: String,
    budgets: BudgetPool,
}

impl GitHubGateway {
    /// Create a gateway against the public API.
    pub fn new(requests_per_second: u32) -> Result<Self> {
        Self::with_api_base(DEFAULT_API_BASE, requests_per_second)
    }

    /// Create a gateway against a custom API base (GitHub Enterprise, tests).
    pub fn with_api_base(api_base: impl Into<String>, requests_per_second: u32) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::network(e.to_string()))?;

        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            budgets: BudgetPool::new(requests_per_second),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.api_base, path)
        }
    }

    /// One conditional GET, rate-budgeted and retried on transient network
    /// failure.
    async fn get(
        &self,
        cred: &AccessCredential,
        path: &str,
        etag: Option<&str>,
        priority: RequestPriority,
    ) -> Result<RawFetch> {
        self.budgets.for_token(&cred.token).acquire(priority).await;

        let url = self.url(path);
        let send = || async {
            let mut request = self
                .http
                .get(&url)
                .header(AUTHORIZATION, format!("Bearer {}", cred.token))
                .header(ACCEPT, "application/vnd.github+json")
                .header(USER_AGENT, "hubmirror");
            if let Some(etag) = etag {
                request = request.header(IF_NONE_MATCH, etag);
            }
            request.send().await
        };

        let response = send
            .retry(ExponentialBuilder::default().with_jitter())
            .when(|e: &reqwest::Error| e.is_timeout() || e.is_connect())
            .notify(|err, dur| {
                tracing::debug!(url = %url, error = %err, retry_in = ?dur, "transient network error");
            })
            .await
            .map_err(|e| GatewayError::network(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let response_ts = response_time(&headers);

        match status {
            StatusCode::NOT_MODIFIED => {
                let mut metadata = metadata_from_headers(&headers, Utc::now());
                // A 304 may omit the ETag; the prior token is still valid.
                if metadata.etag.is_none() {
                    metadata.etag = etag.map(String::from);
                }
                Ok(RawFetch::NotModified { metadata })
            }
            StatusCode::UNAUTHORIZED => Err(GatewayError::CredentialRevoked),
            StatusCode::NOT_FOUND => Err(GatewayError::not_found(path)),
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
                match rate_limit_retry_after(&headers) {
                    Some(retry_after) => Err(GatewayError::RateLimited { retry_after }),
                    None => Err(GatewayError::api(format!("{status} for {path}"))),
                }
            }
            s if s.is_success() => {
                let body = response
                    .text()
                    .await
                    .map_err(|e| GatewayError::network(e.to_string()))?;
                Ok(RawFetch::Ok {
                    body,
                    headers,
                    response_ts,
                })
            }
            s => Err(GatewayError::api(format!("{s} for {path}"))),
        }
    }

    /// Conditionally fetch a single JSON object.
    async fn fetch_one<T: DeserializeOwned>(
        &self,
        cred: &AccessCredential,
        path: &str,
        prior: &CacheMetadata,
        priority: RequestPriority,
    ) -> Result<FetchOutcome<T>> {
        match self.get(cred, path, prior.etag.as_deref(), priority).await? {
            RawFetch::NotModified { metadata } => Ok(FetchOutcome::NotModified { metadata }),
            RawFetch::Ok {
                body,
                headers,
                response_ts,
            } => {
                let payload: T = serde_json::from_str(&body)
                    .map_err(|e| GatewayError::api(format!("malformed payload for {path}: {e}")))?;
                Ok(FetchOutcome::Fresh {
                    payload,
                    metadata: metadata_from_headers(&headers, Utc::now()),
                    response_ts,
                })
            }
        }
    }

    /// Conditionally fetch a paginated list, whole.
    ///
    /// Revalidation covers the first page only: a 304 there means the listing
    /// is unchanged; otherwise every page is fetched and concatenated under
    /// the first page's metadata.
    async fn fetch_paged<T: DeserializeOwned>(
        &self,
        cred: &AccessCredential,
        path: &str,
        prior: &CacheMetadata,
        priority: RequestPriority,
    ) -> Result<FetchOutcome<Vec<T>>> {
        let first = self.get(cred, path, prior.etag.as_deref(), priority).await?;
        let (body, headers, response_ts) = match first {
            RawFetch::NotModified { metadata } => {
                return Ok(FetchOutcome::NotModified { metadata })
            }
            RawFetch::Ok {
                body,
                headers,
                response_ts,
            } => (body, headers, response_ts),
        };

        let metadata = metadata_from_headers(&headers, Utc::now());
        let mut items: Vec<T> = serde_json::from_str(&body)
            .map_err(|e| GatewayError::api(format!("malformed payload for {path}: {e}")))?;

        let mut next = headers
            .get("link")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_link_next);

        while let Some(next_url) = next {
            match self.get(cred, &next_url, None, priority).await? {
                RawFetch::NotModified { .. } => break,
                RawFetch::Ok { body, headers, .. } => {
                    let mut page: Vec<T> = serde_json::from_str(&body).map_err(|e| {
                        GatewayError::api(format!("malformed payload for {next_url}: {e}"))
                    })?;
                    items.append(&mut page);
                    next = headers
                        .get("link")
                        .and_then(|v| v.to_str().ok())
                        .and_then(parse_link_next);
                }
            }
        }

        Ok(FetchOutcome::Fresh {
            payload: items,
            metadata,
            response_ts,
        })
    }
}

#[async_trait]
impl UpstreamGateway for GitHubGateway {
    async fn fetch_user(
        &self,
        cred: &AccessCredential,
        prior: &CacheMetadata,
        priority: RequestPriority,
    ) -> Result<FetchOutcome<AccountRecord>> {
        self.fetch_one(cred, "/user", prior, priority).await
    }

    async fn fetch_user_repositories(
        &self,
        cred: &AccessCredential,
        prior: &CacheMetadata,
        priority: RequestPriority,
    ) -> Result<FetchOutcome<Vec<RepositoryRecord>>> {
        let path = format!("/user/repos?per_page={PER_PAGE}");
        self.fetch_paged(cred, &path, prior, priority).await
    }

    async fn fetch_user_organizations(
        &self,
        cred: &AccessCredential,
        prior: &CacheMetadata,
        priority: RequestPriority,
    ) -> Result<FetchOutcome<Vec<MembershipRecord>>> {
        let path = format!("/user/memberships/orgs?state=active&per_page={PER_PAGE}");
        self.fetch_paged(cred, &path, prior, priority).await
    }

    async fn fetch_organization(
        &self,
        cred: &AccessCredential,
        login: &str,
        prior: &CacheMetadata,
        priority: RequestPriority,
    ) -> Result<FetchOutcome<AccountRecord>> {
        let path = format!("/orgs/{login}");
        self.fetch_one(cred, &path, prior, priority).await
    }

    async fn fetch_organization_members(
        &self,
        cred: &AccessCredential,
        login: &str,
        role: MemberRole,
        prior: &CacheMetadata,
        priority: RequestPriority,
    ) -> Result<FetchOutcome<Vec<AccountRecord>>> {
        let path = format!(
            "/orgs/{login}/members?role={}&per_page={PER_PAGE}",
            role.as_str()
        );
        self.fetch_paged(cred, &path, prior, priority).await
    }

    async fn fetch_repository(
        &self,
        cred: &AccessCredential,
        full_name: &str,
        prior: &CacheMetadata,
        priority: RequestPriority,
    ) -> Result<FetchOutcome<RepositoryRecord>> {
        let path = format!("/repos/{full_name}");
        self.fetch_one(cred, &path, prior, priority).await
    }

    async fn fetch_repository_labels(
        &self,
        cred: &AccessCredential,
        full_name: &str,
        prior: &CacheMetadata,
        priority: RequestPriority,
    ) -> Result<FetchOutcome<Vec<LabelRecord>>> {
        let path = format!("/repos/{full_name}/labels?per_page={PER_PAGE}");
        self.fetch_paged(cred, &path, prior, priority).await
    }

    async fn fetch_repository_issues(
        &self,
        cred: &AccessCredential,
        full_name: &str,
        prior: &CacheMetadata,
        priority: RequestPriority,
    ) -> Result<FetchOutcome<Vec<IssueRecord>>> {
        let path = format!("/repos/{full_name}/issues?state=all&per_page={PER_PAGE}");
        self.fetch_paged(cred, &path, prior, priority).await
    }

    async fn fetch_repository_assignees(
        &self,
        cred: &AccessCredential,
        full_name: &str,
        prior: &CacheMetadata,
        priority: RequestPriority,
    ) -> Result<FetchOutcome<Vec<AccountRecord>>> {
        let path = format!("/repos/{full_name}/assignees?per_page={PER_PAGE}");
        self.fetch_paged(cred, &path, prior, priority).await
    }
}
