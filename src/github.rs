//! Code-hosting client: REST metadata, tarball and CDN endpoints, bearer
//! token lookup.
//!
//! Endpoints are overridable for tests and on-prem mirrors:
//! GIT_PEEK_HOST, GIT_PEEK_API_BASE, GIT_PEEK_CDN_BASE.

use std::env;

use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::errors::PeekError;

const USER_AGENT: &str = concat!("git-peek/", env!("CARGO_PKG_VERSION"));

/// The configured code-hosting domain (default: github.com).
pub fn default_host() -> String {
    env::var("GIT_PEEK_HOST")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "github.com".to_string())
}

/// REST API base (default: https://api.github.com).
pub fn api_base() -> String {
    env::var("GIT_PEEK_API_BASE")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim_end_matches('/').to_string())
        .unwrap_or_else(|| "https://api.github.com".to_string())
}

/// Content CDN base used by the single-file prefetch
/// (default: https://cdn.jsdelivr.net/gh).
pub fn cdn_base() -> String {
    env::var("GIT_PEEK_CDN_BASE")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim_end_matches('/').to_string())
        .unwrap_or_else(|| "https://cdn.jsdelivr.net/gh".to_string())
}

/// Load `~/.git-peek` (a dotenv file) into the environment, if present.
/// Used to persist GITHUB_TOKEN for private repositories.
pub fn load_dotenv() {
    if let Some(home) = home::home_dir() {
        let path = home.join(".git-peek");
        if path.exists() {
            if let Err(e) = dotenvy::from_path(&path) {
                tracing::debug!("ignoring unreadable {}: {e}", path.display());
            }
        }
    }
}

/// GITHUB_TOKEN from the environment, trimmed, resolved once per process.
pub fn find_github_token() -> Option<&'static str> {
    static TOKEN: OnceCell<Option<String>> = OnceCell::new();
    TOKEN
        .get_or_init(|| {
            env::var("GITHUB_TOKEN")
                .ok()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
        })
        .as_deref()
}

#[derive(Debug, Deserialize)]
struct RepoMeta {
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullMeta {
    head: PullHeadMeta,
}

#[derive(Debug, Deserialize)]
struct PullHeadMeta {
    label: String,
    sha: String,
}

/// (owner, sha) of a pull request's head branch.
#[derive(Debug, Clone)]
pub struct PullHead {
    pub owner: String,
    pub sha: String,
}

#[derive(Debug, Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api: String,
    cdn: String,
}

impl GithubClient {
    pub fn new() -> Result<Self, PeekError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            api: api_base(),
            cdn: cdn_base(),
        })
    }

    /// GET with the v3 Accept header and bearer token when one is known.
    pub fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .get(url)
            .header("Accept", "application/vnd.github.v3+json");
        if let Some(token) = find_github_token() {
            req = req.bearer_auth(token);
        }
        req
    }

    /// Plain GET without API headers (CDN requests).
    pub fn get_raw(&self, url: &str) -> reqwest::RequestBuilder {
        self.http.get(url)
    }

    pub fn tarball_url(&self, owner: &str, name: &str, git_ref: &str) -> String {
        format!("{}/repos/{owner}/{name}/tarball/{git_ref}", self.api)
    }

    pub fn cdn_file_url(&self, owner: &str, name: &str, git_ref: &str, path: &str) -> String {
        format!("{}/{owner}/{name}@{git_ref}/{path}", self.cdn)
    }

    pub fn search_url(&self, query: &str) -> String {
        let qs = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("q", query)
            .append_pair("per_page", "9")
            .finish();
        format!("{}/search/repositories?{qs}", self.api)
    }

    /// `GET /repos/{owner}/{name}` → default_branch. Failure is fatal.
    pub async fn default_branch(&self, owner: &str, name: &str) -> Result<String, PeekError> {
        let url = format!("{}/repos/{owner}/{name}", self.api);
        let resp = self.get(&url).send().await;
        let meta: RepoMeta = Self::read_json(&url, resp).await?;
        Ok(meta.default_branch.unwrap_or_else(|| "main".to_string()))
    }

    /// `GET /repos/{owner}/{name}/pulls/{id}` → head (owner, sha).
    /// Failure is fatal.
    pub async fn pull_request_head(
        &self,
        owner: &str,
        name: &str,
        id: u64,
    ) -> Result<PullHead, PeekError> {
        let url = format!("{}/repos/{owner}/{name}/pulls/{id}", self.api);
        let resp = self.get(&url).send().await;
        let meta: PullMeta = Self::read_json(&url, resp).await?;
        // The head label is "owner:branch"; the owner half is what we need.
        let head_owner = meta
            .head
            .label
            .split(':')
            .next()
            .unwrap_or(owner)
            .to_string();
        Ok(PullHead {
            owner: head_owner,
            sha: meta.head.sha,
        })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        url: &str,
        resp: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<T, PeekError> {
        let resp = resp.map_err(|e| PeekError::MetadataFetch {
            url: url.to_string(),
            detail: e.to_string(),
        })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PeekError::MetadataFetch {
                url: url.to_string(),
                detail: format!("HTTP {}\n{}", status.as_u16(), body),
            });
        }
        resp.json::<T>().await.map_err(|e| PeekError::MetadataFetch {
            url: url.to_string(),
            detail: e.to_string(),
        })
    }
}
