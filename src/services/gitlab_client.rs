//! GitLab API client.
//!
//! Provides the HTTP client for the GitLab API v4 calls the bot depends on:
//! fetching merge requests, accepting merges, listing/creating tags, and the
//! branch/tag protection sweep. The [`GitLabApi`] trait is the seam the
//! engines consume, so tests can inject a recording fake.

use crate::error::BotError;
use crate::models::merge_request::MrSnapshot;
use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Push/merge/create access level "no one".
pub const ACCESS_NO_ONE: i64 = 0;

/// Access level "developer".
pub const ACCESS_DEVELOPER: i64 = 30;

/// GitLab API client configuration.
#[derive(Debug, Clone)]
pub struct GitLabClientConfig {
    /// Base URL of the GitLab instance (e.g., `https://gitlab.com`).
    pub base_url: String,

    /// Personal access token for authentication.
    pub token: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GitLabClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            timeout_secs: 30,
        }
    }
}

/// GitLab API client.
#[derive(Debug, Clone)]
pub struct GitLabClient {
    client: Client,
    config: GitLabClientConfig,
}

/// GitLab user from API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabUser {
    pub id: i64,
    pub username: String,
    pub name: String,
}

/// GitLab merge request from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabMergeRequest {
    pub id: i64,
    pub iid: i64,
    pub project_id: i64,
    pub title: String,
    pub state: String,
    /// `can_be_merged`, `cannot_be_merged`, `unchecked`, ...
    #[serde(default)]
    pub merge_status: String,
    pub source_branch: String,
    pub target_branch: String,
    pub author: GitLabUser,
    pub web_url: String,
}

impl GitLabMergeRequest {
    /// Reduce the API representation to the cached snapshot.
    pub fn snapshot(&self) -> MrSnapshot {
        MrSnapshot {
            author_username: self.author.username.clone(),
            merge_status: self.merge_status.clone(),
            target_branch: self.target_branch.clone(),
        }
    }
}

/// GitLab repository tag from API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabTag {
    pub name: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// GitLab group from API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabGroup {
    pub id: i64,
    pub full_name: String,
}

/// GitLab project from API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabProject {
    pub id: i64,
    pub name_with_namespace: String,
}

/// Options for accepting a merge request.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MergeOptions {
    pub should_remove_source_branch: bool,
    pub squash: bool,
}

/// Classified result of an accept-merge call.
///
/// Conflict and already-closed are expected remote outcomes, not errors;
/// anything else surfaces as `Err(BotError)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The MR was merged.
    Merged,

    /// The MR has conflicts and cannot be merged right now (405).
    Conflict,

    /// The MR is already merged or closed (406).
    AlreadyClosed,
}

/// The hosting-API calls the engines depend on.
///
/// `GitLabClient` is the production implementation; tests substitute a
/// recording fake.
#[async_trait]
pub trait GitLabApi: Send + Sync {
    /// Fetch a merge request by project ID and IID.
    async fn get_merge_request(
        &self,
        project_id: i64,
        mr_iid: i64,
    ) -> Result<GitLabMergeRequest, BotError>;

    /// Accept (merge) a merge request.
    async fn accept_merge_request(
        &self,
        project_id: i64,
        mr_iid: i64,
        options: MergeOptions,
    ) -> Result<MergeOutcome, BotError>;

    /// List repository tags filtered by a name search, ordered by name
    /// descending (GitLab's default for `order_by=name`).
    async fn list_tags(&self, project_id: i64, search: &str) -> Result<Vec<GitLabTag>, BotError>;

    /// Create a tag at the given ref.
    async fn create_tag(
        &self,
        project_id: i64,
        tag_name: &str,
        ref_name: &str,
    ) -> Result<GitLabTag, BotError>;
}

impl GitLabClient {
    /// Create a new GitLab client.
    pub fn new(config: GitLabClientConfig) -> Result<Self, BotError> {
        let mut headers = header::HeaderMap::new();

        let token_value = header::HeaderValue::from_str(&config.token)
            .map_err(|_| BotError::authentication("Invalid token format"))?;
        headers.insert("PRIVATE-TOKEN", token_value);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BotError::internal(format!("Failed to build HTTP client: {}", e)))?;

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

    /// Handle API response errors.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
        endpoint: &str,
    ) -> Result<T, BotError> {
        let status = response.status();

        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| BotError::internal(format!("Failed to parse response: {}", e)))
        } else if status == StatusCode::UNAUTHORIZED {
            Err(BotError::authentication(
                "GitLab token rejected (expired or revoked?)",
            ))
        } else {
            let status_code = status.as_u16();
            let body = response.text().await.unwrap_or_default();
            let body_message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| {
                    // GitLab returns errors as {"message": "..."} or {"error": "..."}
                    v.get("message").or_else(|| v.get("error")).map(|m| {
                        if let Some(s) = m.as_str() {
                            s.to_string()
                        } else {
                            // Sometimes "message" is an object like {"base":["msg"]}
                            m.to_string()
                        }
                    })
                });

            let message = match (status, &body_message) {
                (StatusCode::FORBIDDEN, _) => "Access denied".to_string(),
                (StatusCode::NOT_FOUND, _) => "Resource not found".to_string(),
                (StatusCode::TOO_MANY_REQUESTS, _) => "Rate limit exceeded".to_string(),
                (_, Some(msg)) => msg.clone(),
                _ => format!("Request failed ({}): {}", status_code, body),
            };

            Err(BotError::gitlab_api_full(&message, status_code, endpoint))
        }
    }

    /// Validate the token by fetching the current user.
    pub async fn validate_token(&self) -> Result<GitLabUser, BotError> {
        let url = self.api_url("/user");
        let response = self.client.get(&url).send().await?;
        self.handle_response(response, "/user").await
    }

    /// List top-level groups visible to the token.
    pub async fn list_groups(&self) -> Result<Vec<GitLabGroup>, BotError> {
        let endpoint = "/groups";
        let url = self.api_url(endpoint);
        let response = self.client.get(&url).send().await?;
        self.handle_response(response, endpoint).await
    }

    /// List a group's projects.
    pub async fn list_group_projects(&self, group_id: i64) -> Result<Vec<GitLabProject>, BotError> {
        let endpoint = format!("/groups/{}/projects", group_id);
        let url = self.api_url(&endpoint);
        let response = self.client.get(&url).send().await?;
        self.handle_response(response, &endpoint).await
    }

    /// Protect a repository branch pattern.
    pub async fn protect_branch(
        &self,
        project_id: i64,
        name: &str,
        push_access_level: i64,
        merge_access_level: i64,
    ) -> Result<(), BotError> {
        let endpoint = format!("/projects/{}/protected_branches", project_id);
        let url = self.api_url(&endpoint);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "name": name,
                "push_access_level": push_access_level,
                "merge_access_level": merge_access_level,
            }))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BotError::gitlab_api_full(
                "Failed to protect branch",
                response.status().as_u16(),
                &endpoint,
            ))
        }
    }

    /// Protect a repository tag pattern.
    pub async fn protect_tag(
        &self,
        project_id: i64,
        name: &str,
        create_access_level: i64,
    ) -> Result<(), BotError> {
        let endpoint = format!("/projects/{}/protected_tags", project_id);
        let url = self.api_url(&endpoint);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "name": name,
                "create_access_level": create_access_level,
            }))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BotError::gitlab_api_full(
                "Failed to protect tag",
                response.status().as_u16(),
                &endpoint,
            ))
        }
    }
}

#[async_trait]
impl GitLabApi for GitLabClient {
    async fn get_merge_request(
        &self,
        project_id: i64,
        mr_iid: i64,
    ) -> Result<GitLabMergeRequest, BotError> {
        let endpoint = format!("/projects/{}/merge_requests/{}", project_id, mr_iid);
        let url = self.api_url(&endpoint);
        let response = self.client.get(&url).send().await?;
        self.handle_response(response, &endpoint).await
    }

    async fn accept_merge_request(
        &self,
        project_id: i64,
        mr_iid: i64,
        options: MergeOptions,
    ) -> Result<MergeOutcome, BotError> {
        let endpoint = format!("/projects/{}/merge_requests/{}/merge", project_id, mr_iid);
        let url = self.api_url(&endpoint);
        let response = self.client.put(&url).json(&options).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(MergeOutcome::Merged);
        }

        match status.as_u16() {
            // 405: conflicts or an otherwise unmergeable MR
            405 => Ok(MergeOutcome::Conflict),
            // 406: already merged or closed
            406 => Ok(MergeOutcome::AlreadyClosed),
            401 => Err(BotError::authentication(
                "GitLab token rejected (expired or revoked?)",
            )),
            code => {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<serde_json::Value>(&body)
                    .ok()
                    .and_then(|v| v.get("message")?.as_str().map(String::from))
                    .unwrap_or_else(|| format!("Merge failed ({})", status));

                Err(BotError::gitlab_api_full(&message, code, &endpoint))
            }
        }
    }

    async fn list_tags(&self, project_id: i64, search: &str) -> Result<Vec<GitLabTag>, BotError> {
        let endpoint = format!("/projects/{}/repository/tags", project_id);
        let url = self.api_url(&endpoint);
        let response = self
            .client
            .get(&url)
            .query(&[("order_by", "name"), ("search", search)])
            .send()
            .await?;
        self.handle_response(response, &endpoint).await
    }

    async fn create_tag(
        &self,
        project_id: i64,
        tag_name: &str,
        ref_name: &str,
    ) -> Result<GitLabTag, BotError> {
        let endpoint = format!("/projects/{}/repository/tags", project_id);
        let url = self.api_url(&endpoint);
        let response = self
            .client
            .post(&url)
            .query(&[("tag_name", tag_name), ("ref", ref_name)])
            .send()
            .await?;
        self.handle_response(response, &endpoint).await
    }
}
