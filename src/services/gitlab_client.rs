//! GitLab API client.
//!
//! HTTP transport for GitLab API v4 with per-request bearer auth, bounded 429
//! retry, proactive rate-limit throttling, and header-driven pagination.
//!
//! Tokens are passed per call rather than baked into the client because every
//! account carries its own refreshable credential; one client instance serves
//! all accounts.

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::SyncError;

/// Items requested per page. GitLab caps this at 100.
const PER_PAGE: u32 = 100;

/// Cap on any rate-limit induced sleep.
const MAX_THROTTLE: Duration = Duration::from_secs(60);

/// Sleep applied when the quota is low but no reset header is present.
const FALLBACK_THROTTLE: Duration = Duration::from_secs(5);

/// GitLab API client configuration.
#[derive(Debug, Clone)]
pub struct GitLabClientConfig {
    /// Base URL of the GitLab instance (e.g., `https://gitlab.com`).
    pub base_url: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Throttle proactively once `RateLimit-Remaining` drops below this.
    pub rate_limit_low_water: u32,

    /// Give up after this many 429 responses for a single request.
    pub rate_limit_max_attempts: u32,
}

impl Default for GitLabClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gitlab.com".to_string(),
            timeout_secs: 30,
            rate_limit_low_water: 10,
            rate_limit_max_attempts: 5,
        }
    }
}

/// GitLab API client.
#[derive(Debug, Clone)]
pub struct GitLabClient {
    client: Client,
    config: GitLabClientConfig,
}

/// Query parameters for listing merge requests or issues.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListQuery {
    /// Filter by state: `opened`, `merged`, `closed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Sort key, e.g. `updated_at`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,

    /// Sort direction: `asc` or `desc`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,

    /// Only items updated after this instant (ISO 8601).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_after: Option<String>,
}

impl ListQuery {
    /// Query shared by the incremental fetches: filtered by state, newest
    /// updates first, optionally cut off at the sync cursor.
    fn by_state(state: &str, updated_after: Option<&str>) -> Self {
        Self {
            state: Some(state.to_string()),
            order_by: Some("updated_at".to_string()),
            sort: Some("desc".to_string()),
            updated_after: updated_after.map(str::to_string),
        }
    }
}

/// Query parameters for the project search endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSearchQuery {
    pub search: String,
    pub membership: bool,
    pub order_by: String,
    pub sort: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabUser {
    pub name: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabCurrentUser {
    pub id: i64,
    pub username: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabProject {
    pub id: i64,
    pub name: String,
    pub name_with_namespace: String,
    pub web_url: String,
    pub path_with_namespace: String,
    pub avatar_url: Option<String>,
    pub star_count: i64,
    pub last_activity_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabHeadPipeline {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabMergeRequest {
    pub id: i64,
    pub iid: i64,
    pub title: String,
    pub state: String,
    pub web_url: String,
    #[serde(default)]
    pub draft: bool,
    pub source_branch: String,
    pub target_branch: String,
    pub created_at: String,
    pub updated_at: String,
    pub author: GitLabUser,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub reviewers: Vec<GitLabUser>,
    pub head_pipeline: Option<GitLabHeadPipeline>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabIssue {
    pub id: i64,
    pub iid: i64,
    pub title: String,
    pub state: String,
    pub web_url: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub author: GitLabUser,
    #[serde(default)]
    pub assignees: Vec<GitLabUser>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabBoardLabel {
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabBoardList {
    pub id: i64,
    pub label: GitLabBoardLabel,
    pub position: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabBoardAssignee {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabBoard {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub assignee: Option<GitLabBoardAssignee>,
}

impl GitLabClient {
    /// Create a new GitLab client.
    pub fn new(config: GitLabClientConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Get the base URL for API requests.
    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/api/v4{}",
            self.config.base_url.trim_end_matches('/'),
            path
        )
    }

    fn read_header(response: &Response, name: &str) -> Option<i64> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
    }

    /// Slow down before the quota actually runs out. GitLab sends the
    /// remaining call budget and the epoch second it resets at.
    async fn throttle_if_low(&self, response: &Response) {
        let remaining = match Self::read_header(response, "RateLimit-Remaining") {
            Some(r) => r,
            None => return,
        };
        if remaining >= self.config.rate_limit_low_water as i64 {
            return;
        }

        let wait = match Self::read_header(response, "RateLimit-Reset") {
            Some(reset) => {
                let now = chrono::Utc::now().timestamp();
                Duration::from_secs(reset.saturating_sub(now).max(0) as u64 + 1).min(MAX_THROTTLE)
            }
            None => FALLBACK_THROTTLE,
        };

        debug!(remaining, wait_secs = wait.as_secs(), "rate limit quota low, throttling");
        tokio::time::sleep(wait).await;
    }

    /// Perform a GET with bearer auth, retrying on 429 up to the configured
    /// attempt cap. Returns the response only on a 2xx status.
    async fn get_with_retry(
        &self,
        token: &str,
        endpoint: &str,
        query: &[(String, String)],
    ) -> Result<Response, SyncError> {
        let url = self.api_url(endpoint);

        for attempt in 1..=self.config.rate_limit_max_attempts {
            let response = self
                .client
                .get(&url)
                .bearer_auth(token)
                .query(query)
                .send()
                .await?;

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                // No point sleeping after the final attempt.
                if attempt < self.config.rate_limit_max_attempts {
                    let wait = Self::read_header(&response, "Retry-After")
                        .map(|secs| Duration::from_secs(secs.max(0) as u64))
                        .unwrap_or(MAX_THROTTLE);
                    warn!(
                        endpoint,
                        attempt,
                        wait_secs = wait.as_secs(),
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(wait).await;
                }
                continue;
            }

            if status.is_success() {
                self.throttle_if_low(&response).await;
                return Ok(response);
            }

            if status == StatusCode::UNAUTHORIZED {
                return Err(SyncError::auth(
                    "GitLab rejected the access token (expired or revoked)",
                ));
            }

            let status_code = status.as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| {
                    v.get("message")
                        .or_else(|| v.get("error"))
                        .map(|m| match m.as_str() {
                            Some(s) => s.to_string(),
                            None => m.to_string(),
                        })
                })
                .unwrap_or_else(|| format!("Request failed ({status_code})"));

            return Err(SyncError::api_full(message, status_code, endpoint));
        }

        Err(SyncError::RateLimitTimeout {
            endpoint: endpoint.to_string(),
            attempts: self.config.rate_limit_max_attempts,
        })
    }

    /// Make a single GET request and deserialize the body.
    async fn get<T: DeserializeOwned>(
        &self,
        token: &str,
        endpoint: &str,
        query: &[(String, String)],
    ) -> Result<T, SyncError> {
        let response = self.get_with_retry(token, endpoint, query).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::internal(format!("Failed to parse response from {endpoint}: {e}")))
    }

    /// Fetch every page of a paginated endpoint into memory.
    ///
    /// Fine at the page sizes a single project produces; would need a
    /// streaming interface before pointing this at very large result sets.
    pub async fn get_all_pages<T: DeserializeOwned>(
        &self,
        token: &str,
        endpoint: &str,
        query: &impl Serialize,
    ) -> Result<Vec<T>, SyncError> {
        let base_query = query_pairs(query)?;
        let mut all_data = Vec::new();
        let mut page = 1u32;

        loop {
            let mut q = base_query.clone();
            q.push(("page".to_string(), page.to_string()));
            q.push(("per_page".to_string(), PER_PAGE.to_string()));

            let response = self.get_with_retry(token, endpoint, &q).await?;
            let total_pages = Self::read_header(&response, "x-total-pages");
            let data: Vec<T> = response.json().await.map_err(|e| {
                SyncError::internal(format!("Failed to parse response from {endpoint}: {e}"))
            })?;

            all_data.extend(data);

            // A missing header means the endpoint did not paginate.
            match total_pages {
                Some(total) if (page as i64) < total => page += 1,
                _ => break,
            }
        }

        Ok(all_data)
    }

    /// Fetch the authenticated user.
    pub async fn current_user(&self, token: &str) -> Result<GitLabCurrentUser, SyncError> {
        self.get(token, "/user", &[]).await
    }

    /// Search projects the token's user is a member of, most recently active
    /// first.
    pub async fn search_projects(
        &self,
        token: &str,
        search: &str,
    ) -> Result<Vec<GitLabProject>, SyncError> {
        let query = ProjectSearchQuery {
            search: search.to_string(),
            membership: true,
            order_by: "last_activity_at".to_string(),
            sort: "desc".to_string(),
        };
        self.get_all_pages(token, "/projects", &query).await
    }

    /// Open merge requests for a project, optionally limited to those updated
    /// after the sync cursor.
    pub async fn fetch_open_merge_requests(
        &self,
        token: &str,
        project_id: i64,
        updated_after: Option<&str>,
    ) -> Result<Vec<GitLabMergeRequest>, SyncError> {
        let endpoint = format!("/projects/{project_id}/merge_requests");
        self.get_all_pages(token, &endpoint, &ListQuery::by_state("opened", updated_after))
            .await
    }

    /// Merge requests that left the open state: the `merged` listing followed
    /// by the `closed` listing.
    pub async fn fetch_recently_closed_merge_requests(
        &self,
        token: &str,
        project_id: i64,
        updated_after: Option<&str>,
    ) -> Result<Vec<GitLabMergeRequest>, SyncError> {
        let endpoint = format!("/projects/{project_id}/merge_requests");

        let mut merged: Vec<GitLabMergeRequest> = self
            .get_all_pages(token, &endpoint, &ListQuery::by_state("merged", updated_after))
            .await?;
        let closed: Vec<GitLabMergeRequest> = self
            .get_all_pages(token, &endpoint, &ListQuery::by_state("closed", updated_after))
            .await?;

        merged.extend(closed);
        Ok(merged)
    }

    /// Open issues for a project, optionally limited by the sync cursor.
    pub async fn fetch_open_issues(
        &self,
        token: &str,
        project_id: i64,
        updated_after: Option<&str>,
    ) -> Result<Vec<GitLabIssue>, SyncError> {
        let endpoint = format!("/projects/{project_id}/issues");
        self.get_all_pages(token, &endpoint, &ListQuery::by_state("opened", updated_after))
            .await
    }

    /// Issues closed since the sync cursor.
    pub async fn fetch_recently_closed_issues(
        &self,
        token: &str,
        project_id: i64,
        updated_after: Option<&str>,
    ) -> Result<Vec<GitLabIssue>, SyncError> {
        let endpoint = format!("/projects/{project_id}/issues");
        self.get_all_pages(token, &endpoint, &ListQuery::by_state("closed", updated_after))
            .await
    }

    /// Merge requests GitLab links to an issue.
    pub async fn fetch_issue_related_merge_requests(
        &self,
        token: &str,
        project_id: i64,
        issue_iid: i64,
    ) -> Result<Vec<GitLabMergeRequest>, SyncError> {
        let endpoint = format!("/projects/{project_id}/issues/{issue_iid}/related_merge_requests");
        self.get(token, &endpoint, &[]).await
    }

    /// Issue boards configured on a project.
    pub async fn fetch_project_boards(
        &self,
        token: &str,
        project_id: i64,
    ) -> Result<Vec<GitLabBoard>, SyncError> {
        let endpoint = format!("/projects/{project_id}/boards");
        self.get(token, &endpoint, &[]).await
    }

    /// Label lists of one board, in board order.
    pub async fn fetch_board_lists(
        &self,
        token: &str,
        project_id: i64,
        board_id: i64,
    ) -> Result<Vec<GitLabBoardList>, SyncError> {
        let endpoint = format!("/projects/{project_id}/boards/{board_id}/lists");
        self.get(token, &endpoint, &[]).await
    }
}

/// Flatten a Serialize query struct into key/value pairs so pagination params
/// can be appended alongside it.
fn query_pairs(query: &impl Serialize) -> Result<Vec<(String, String)>, SyncError> {
    let value = serde_json::to_value(query)?;
    let map = match value {
        serde_json::Value::Object(map) => map,
        _ => return Err(SyncError::internal("Query parameters must serialize to an object")),
    };

    let mut pairs = Vec::with_capacity(map.len());
    for (key, val) in map {
        let rendered = match val {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => continue,
            other => other.to_string(),
        };
        pairs.push((key, rendered));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn client_for(server: &mockito::Server) -> GitLabClient {
        GitLabClient::new(GitLabClientConfig {
            base_url: server.url(),
            timeout_secs: 5,
            rate_limit_low_water: 10,
            rate_limit_max_attempts: 3,
        })
        .unwrap()
    }

    fn mr_json(iid: i64, title: &str) -> String {
        format!(
            r#"{{"id":{iid},"iid":{iid},"title":"{title}","state":"opened","web_url":"https://gitlab.example/mr/{iid}",
                "draft":false,"source_branch":"feature","target_branch":"main",
                "created_at":"2024-01-01T00:00:00Z","updated_at":"2024-01-02T00:00:00Z",
                "author":{{"name":"Alice","username":"alice","avatar_url":null}},
                "labels":["backend"],"reviewers":[],"head_pipeline":{{"status":"success"}}}}"#
        )
    }

    #[test]
    fn test_api_url_construction() {
        let client = GitLabClient::new(GitLabClientConfig {
            base_url: "https://gitlab.example.com/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            client.api_url("/projects/1/issues"),
            "https://gitlab.example.com/api/v4/projects/1/issues"
        );
    }

    #[tokio::test]
    async fn test_pagination_walks_all_pages() {
        let mut server = mockito::Server::new_async().await;

        let page1 = server
            .mock("GET", "/api/v4/projects/1/merge_requests")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("page".into(), "1".into()),
                mockito::Matcher::UrlEncoded("per_page".into(), "100".into()),
                mockito::Matcher::UrlEncoded("state".into(), "opened".into()),
            ]))
            .with_header("x-total-pages", "3")
            .with_body(format!("[{}]", mr_json(1, "one")))
            .create_async()
            .await;
        let page2 = server
            .mock("GET", "/api/v4/projects/1/merge_requests")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "2".into()))
            .with_header("x-total-pages", "3")
            .with_body(format!("[{}]", mr_json(2, "two")))
            .create_async()
            .await;
        let page3 = server
            .mock("GET", "/api/v4/projects/1/merge_requests")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "3".into()))
            .with_header("x-total-pages", "3")
            .with_body(format!("[{}]", mr_json(3, "three")))
            .create_async()
            .await;

        let client = client_for(&server);
        let mrs = client
            .fetch_open_merge_requests("token", 1, None)
            .await
            .unwrap();

        assert_eq!(mrs.len(), 3);
        assert_eq!(mrs[0].iid, 1);
        assert_eq!(mrs[2].iid, 3);
        page1.assert_async().await;
        page2.assert_async().await;
        page3.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_total_pages_header_means_single_page() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v4/projects/1/issues")
            .match_query(mockito::Matcher::Any)
            .with_body("[]")
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server);
        let issues = client.fetch_open_issues("token", 1, None).await.unwrap();
        assert!(issues.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_429_backs_off_and_retries() {
        let mut server = mockito::Server::new_async().await;
        // The server picks the earliest registered mock that is still short of
        // its expected hits, so the 429 answers exactly one request and the
        // retry falls through to the success mock.
        server
            .mock("GET", "/api/v4/user")
            .with_status(429)
            .with_header("Retry-After", "1")
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("GET", "/api/v4/user")
            .with_body(r#"{"id":7,"username":"alice","name":"Alice"}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let start = Instant::now();
        let user = client.current_user("token").await.unwrap();

        assert_eq!(user.id, 7);
        assert!(start.elapsed() >= Duration::from_secs(1));
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn test_429_gives_up_after_max_attempts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v4/user")
            .with_status(429)
            .with_header("Retry-After", "0")
            .expect(3)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.current_user("token").await.unwrap_err();
        match err {
            SyncError::RateLimitTimeout { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected RateLimitTimeout, got {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_429_final_attempt_skips_backoff_sleep() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/user")
            .with_status(429)
            .with_header("Retry-After", "60")
            .create_async()
            .await;

        let client = GitLabClient::new(GitLabClientConfig {
            base_url: server.url(),
            timeout_secs: 5,
            rate_limit_low_water: 10,
            rate_limit_max_attempts: 1,
        })
        .unwrap();

        let start = Instant::now();
        let err = client.current_user("token").await.unwrap_err();
        assert!(matches!(err, SyncError::RateLimitTimeout { .. }));
        // The exhausted attempt must not wait out Retry-After.
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_non_2xx_fails_immediately() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/1/boards")
            .with_status(404)
            .with_body(r#"{"message":"404 Project Not Found"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.fetch_project_boards("token", 1).await.unwrap_err();
        assert_eq!(err.status_code(), Some(404));
    }

    #[tokio::test]
    async fn test_401_is_auth_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/user")
            .with_status(401)
            .create_async()
            .await;

        let client = client_for(&server);
        assert!(client.current_user("token").await.unwrap_err().is_auth());
    }

    #[tokio::test]
    async fn test_recently_closed_concatenates_merged_and_closed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/1/merge_requests")
            .match_query(mockito::Matcher::UrlEncoded("state".into(), "merged".into()))
            .with_body(format!("[{}]", mr_json(10, "merged one")))
            .create_async()
            .await;
        server
            .mock("GET", "/api/v4/projects/1/merge_requests")
            .match_query(mockito::Matcher::UrlEncoded("state".into(), "closed".into()))
            .with_body(format!("[{}]", mr_json(11, "closed one")))
            .create_async()
            .await;

        let client = client_for(&server);
        let mrs = client
            .fetch_recently_closed_merge_requests("token", 1, Some("2024-01-01T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(mrs.iter().map(|m| m.iid).collect::<Vec<_>>(), vec![10, 11]);
    }
}
