//! Reference resolution: turn a raw CLI argument (URL, `owner/repo`
//! shorthand, or free text) into a concrete (host, owner, name, ref,
//! filepath) tuple.
//!
//! Network is only touched for ambiguous refs (default branch, pull-request
//! head); this module never touches disk.

use url::Url;

use crate::errors::PeekError;
use crate::github::{default_host, GithubClient};
use crate::search::RepoSearch;

/// A resolved repository reference. `git_ref` may be empty after parsing;
/// [`resolve`] guarantees it is non-empty before acquisition begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub host: String,
    pub owner: String,
    pub name: String,
    pub git_ref: String,
    /// Path of the one file the user asked to view, if any ("" otherwise).
    pub filepath: String,
    /// Line selected via a `#L<n>` fragment, if any.
    pub line: Option<u32>,
    /// Pull-request id when the URL had a `/pull/<id>` segment.
    pub pull_request: Option<u64>,
    pub raw_url: String,
}

impl Reference {
    pub fn is_github(&self) -> bool {
        self.host == default_host()
    }
}

/// The "other" of {main, master}: used as the second ref to try when the
/// resolved ref returns not-found.
pub fn fallback_ref(git_ref: &str) -> String {
    if git_ref == "main" {
        "master".to_string()
    } else {
        "main".to_string()
    }
}

/// Strip the `git-peek://` protocol-handler prefix and surrounding space.
pub fn normalize_input(raw: &str) -> String {
    raw.trim().trim_start_matches("git-peek://").trim().to_string()
}

/// Expand `owner/repo` shorthand into a full URL on the configured host.
pub fn expand_shorthand(input: &str) -> Option<String> {
    if input.contains("://") {
        return None;
    }
    let mut parts = input.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(repo), None)
            if !owner.is_empty() && !repo.trim().is_empty() && !input.contains(char::is_whitespace) =>
        {
            Some(format!("https://{}/{}/{}", default_host(), owner, repo))
        }
        _ => None,
    }
}

/// A string is malformed if it is empty, contains whitespace, or lacks a `/`.
pub fn looks_malformed(input: &str) -> bool {
    input.is_empty() || !input.contains('/') || input.contains(char::is_whitespace)
}

/// Structural parse of a repository URL. Does not apply ref defaults.
pub fn parse_reference(input: &str) -> Result<Reference, PeekError> {
    if looks_malformed(input) {
        return Err(PeekError::MalformedReference(input.to_string()));
    }

    let url =
        Url::parse(input).map_err(|_| PeekError::MalformedReference(input.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| PeekError::MalformedReference(input.to_string()))?
        .to_string();

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    if segments.len() < 2 {
        return Err(PeekError::MalformedReference(input.to_string()));
    }

    let owner = segments[0].to_string();
    let name = segments[1].trim_end_matches(".git").to_string();
    if owner.is_empty() || name.is_empty() {
        return Err(PeekError::MalformedReference(input.to_string()));
    }

    let mut git_ref = String::new();
    let mut filepath = String::new();
    let mut pull_request = None;

    match segments.get(2).copied() {
        Some("pull") => {
            pull_request = segments.get(3).and_then(|s| s.parse::<u64>().ok());
        }
        Some("blob") | Some("tree") if segments.len() >= 4 => {
            git_ref = segments[3].to_string();
            filepath = segments[4..].join("/");
        }
        _ => {}
    }

    let line = url
        .fragment()
        .and_then(|f| f.strip_prefix('L'))
        .and_then(|n| n.parse::<u32>().ok());

    Ok(Reference {
        host,
        owner,
        name,
        git_ref,
        filepath,
        line,
        pull_request,
        raw_url: input.to_string(),
    })
}

/// Ref-defaulting knobs consumed from the CLI collaborator.
#[derive(Debug, Default, Clone)]
pub struct ResolveOptions {
    pub branch: Option<String>,
    pub use_default_branch: bool,
    pub fromscript: bool,
}

/// Resolve raw user input into a complete [`Reference`].
///
/// Malformed input re-enters the search collaborator until a well-formed URL
/// comes back or the collaborator itself fails (propagated as
/// `ResolutionAborted`). Metadata-fetch failures are fatal and not retried.
pub async fn resolve(
    raw: &str,
    opts: &ResolveOptions,
    client: &GithubClient,
    search: &dyn RepoSearch,
) -> Result<Reference, PeekError> {
    let mut input = normalize_input(raw);
    if let Some(expanded) = expand_shorthand(&input) {
        input = expanded;
    }

    let mut reference = loop {
        if !looks_malformed(&input) {
            match parse_reference(&input) {
                Ok(r) => break r,
                Err(e) => tracing::debug!("unparseable input {input:?}: {e}"),
            }
        }
        input = search.search(&input).await?;
        if let Some(expanded) = expand_shorthand(&input) {
            input = expanded;
        }
    };

    let branch = opts.branch.as_deref().unwrap_or("").trim();

    if reference.is_github() {
        if let Some(id) = reference.pull_request {
            // PR head wins over every ref default; the default-branch
            // endpoint is never consulted for pull-request URLs.
            let head = client
                .pull_request_head(&reference.owner, &reference.name, id)
                .await?;
            reference.owner = head.owner;
            reference.git_ref = head.sha;
            return Ok(reference);
        }

        let want_remote_default = branch == "default"
            || opts.use_default_branch
            || (branch.is_empty() && opts.fromscript);
        if want_remote_default {
            reference.git_ref = client
                .default_branch(&reference.owner, &reference.name)
                .await?;
            return Ok(reference);
        }
    }

    if !branch.is_empty() && branch != "default" {
        reference.git_ref = branch.to_string();
    } else if reference.git_ref.is_empty() {
        reference.git_ref = "master".to_string();
    }
    Ok(reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shorthand_expands_to_configured_host() {
        let url = expand_shorthand("octocat/hello-world").unwrap();
        assert_eq!(url, "https://github.com/octocat/hello-world");
        assert!(expand_shorthand("octocat/").is_none());
        assert!(expand_shorthand("https://github.com/a/b").is_none());
        assert!(expand_shorthand("a/b/c").is_none());
        assert!(expand_shorthand("not a/repo").is_none());
    }

    #[test]
    fn test_malformed_detection() {
        assert!(looks_malformed(""));
        assert!(looks_malformed("react"));
        assert!(looks_malformed("has space/repo"));
        assert!(!looks_malformed("owner/repo"));
    }

    #[test]
    fn test_parse_plain_repo_url() {
        let r = parse_reference("https://github.com/octocat/hello-world").unwrap();
        assert_eq!(r.host, "github.com");
        assert_eq!(r.owner, "octocat");
        assert_eq!(r.name, "hello-world");
        assert_eq!(r.git_ref, "");
        assert_eq!(r.filepath, "");
        assert_eq!(r.pull_request, None);
    }

    #[test]
    fn test_parse_blob_url_with_ref_path_and_line() {
        let r = parse_reference(
            "https://github.com/evanw/esbuild/blob/master/lib/common.ts#L42",
        )
        .unwrap();
        assert_eq!(r.git_ref, "master");
        assert_eq!(r.filepath, "lib/common.ts");
        assert_eq!(r.line, Some(42));
    }

    #[test]
    fn test_parse_tree_url() {
        let r = parse_reference("https://github.com/jarred/fastbench/tree/main/").unwrap();
        assert_eq!(r.git_ref, "main");
        assert_eq!(r.filepath, "");
    }

    #[test]
    fn test_parse_pull_request_url() {
        let r = parse_reference("https://github.com/rust-lang/rust/pull/1234").unwrap();
        assert_eq!(r.pull_request, Some(1234));
        assert_eq!(r.git_ref, "");
    }

    #[test]
    fn test_git_suffix_stripped() {
        let r = parse_reference("https://github.com/a/b.git").unwrap();
        assert_eq!(r.name, "b");
    }

    #[test]
    fn test_normalize_strips_protocol_handler_prefix() {
        assert_eq!(
            normalize_input("git-peek://octocat/hello-world"),
            "octocat/hello-world"
        );
    }

    #[test]
    fn test_fallback_ref_computation() {
        assert_eq!(fallback_ref("main"), "master");
        assert_eq!(fallback_ref("master"), "main");
        assert_eq!(fallback_ref("v1.2.3"), "main");
        assert_eq!(fallback_ref("deadbeef"), "main");
    }
}
