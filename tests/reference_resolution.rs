use async_trait::async_trait;

use git_peek::errors::PeekError;
use git_peek::github::GithubClient;
use git_peek::reference::{resolve, ResolveOptions};
use git_peek::search::RepoSearch;

fn rt() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

/// Search stub that returns a fixed URL, or fails.
struct FixedSearch(Option<String>);

#[async_trait]
impl RepoSearch for FixedSearch {
    async fn search(&self, query: &str) -> Result<String, PeekError> {
        match &self.0 {
            Some(url) => Ok(url.clone()),
            None => Err(PeekError::ResolutionAborted(format!(
                "no result for {query:?}"
            ))),
        }
    }
}

#[test]
fn test_shorthand_resolves_without_network() {
    let rt = rt();
    let client = GithubClient::new().expect("client");
    let search = FixedSearch(None);
    // No branch flag, no pull request, not fromscript: the ref defaults to
    // "master" locally and no metadata request is made.
    let r = rt
        .block_on(resolve(
            "octocat/hello-world",
            &ResolveOptions::default(),
            &client,
            &search,
        ))
        .expect("resolve");
    assert_eq!(r.owner, "octocat");
    assert_eq!(r.name, "hello-world");
    assert_eq!(r.git_ref, "master");
    assert_eq!(r.filepath, "");
    assert!(r.is_github());
}

#[test]
fn test_explicit_branch_wins_over_url_ref() {
    let rt = rt();
    let client = GithubClient::new().expect("client");
    let search = FixedSearch(None);
    let opts = ResolveOptions {
        branch: Some("dev".to_string()),
        ..Default::default()
    };
    let r = rt
        .block_on(resolve(
            "https://github.com/a/b/tree/main",
            &opts,
            &client,
            &search,
        ))
        .expect("resolve");
    assert_eq!(r.git_ref, "dev");
}

#[test]
fn test_blob_url_carries_file_and_line() {
    let rt = rt();
    let client = GithubClient::new().expect("client");
    let search = FixedSearch(None);
    let r = rt
        .block_on(resolve(
            "https://github.com/evanw/esbuild/blob/master/lib/common.ts#L42",
            &ResolveOptions::default(),
            &client,
            &search,
        ))
        .expect("resolve");
    assert_eq!(r.git_ref, "master");
    assert_eq!(r.filepath, "lib/common.ts");
    assert_eq!(r.line, Some(42));
}

#[test]
fn test_free_text_goes_through_search() {
    let rt = rt();
    let client = GithubClient::new().expect("client");
    let search = FixedSearch(Some(
        "https://github.com/octocat/hello-world/tree/main".to_string(),
    ));
    let r = rt
        .block_on(resolve(
            "hello world project",
            &ResolveOptions::default(),
            &client,
            &search,
        ))
        .expect("resolve");
    assert_eq!(r.owner, "octocat");
    assert_eq!(r.git_ref, "main");
}

#[test]
fn test_search_failure_aborts_resolution() {
    let rt = rt();
    let client = GithubClient::new().expect("client");
    let search = FixedSearch(None);
    let err = rt
        .block_on(resolve(
            "not-a-reference",
            &ResolveOptions::default(),
            &client,
            &search,
        ))
        .expect_err("resolution should fail");
    assert!(matches!(err, PeekError::ResolutionAborted(_)), "{err}");
}

#[test]
fn test_protocol_handler_prefix_is_stripped() {
    let rt = rt();
    let client = GithubClient::new().expect("client");
    let search = FixedSearch(None);
    let r = rt
        .block_on(resolve(
            "git-peek://octocat/hello-world",
            &ResolveOptions::default(),
            &client,
            &search,
        ))
        .expect("resolve");
    assert_eq!(r.owner, "octocat");
    assert_eq!(r.name, "hello-world");
}
