//! Search seam used when the input is not a well-formed reference.
//!
//! The interactive fuzzy-search UI is an external collaborator; the resolver
//! only needs "free text in, repository URL out". The non-interactive
//! implementation takes the top repository-search hit.

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::PeekError;
use crate::github::GithubClient;

#[async_trait]
pub trait RepoSearch: Send + Sync {
    /// Turn free text into a repository URL, or fail with
    /// `ResolutionAborted` when no result can be produced.
    async fn search(&self, query: &str) -> Result<String, PeekError>;
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    items: Option<Vec<SearchItem>>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    full_name: String,
    default_branch: Option<String>,
}

/// Repository search against the code-hosting REST API; the first hit wins.
pub struct GithubSearch {
    client: GithubClient,
}

impl GithubSearch {
    pub fn new(client: GithubClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RepoSearch for GithubSearch {
    async fn search(&self, query: &str) -> Result<String, PeekError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PeekError::ResolutionAborted(
                "empty search query".to_string(),
            ));
        }
        let url = self.client.search_url(query);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PeekError::ResolutionAborted(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(PeekError::ResolutionAborted(format!(
                "repository search failed with HTTP {}",
                resp.status().as_u16()
            )));
        }
        let results: SearchResults = resp
            .json()
            .await
            .map_err(|e| PeekError::ResolutionAborted(e.to_string()))?;
        let first = results
            .items
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| {
                PeekError::ResolutionAborted(format!("no repositories match {query:?}"))
            })?;
        let branch = first.default_branch.unwrap_or_else(|| "main".to_string());
        Ok(format!(
            "https://github.com/{}/tree/{}",
            first.full_name, branch
        ))
    }
}
