//! Error taxonomy and exit-code mapping.
//!
//! - Malformed references are recoverable: the resolver re-enters the search
//!   loop instead of surfacing them.
//! - Everything else routed through here is fatal and maps to a non-zero
//!   exit status; a missing editor binary maps to 127, all others to 1.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeekError {
    /// Input that cannot be shaped into a repository URL (whitespace, no
    /// slash, or structurally invalid). Recoverable via the search loop.
    #[error("malformed repository reference: {0:?}")]
    MalformedReference(String),

    /// The search collaborator failed or was cancelled; resolution cannot
    /// continue.
    #[error("repository search aborted: {0}")]
    ResolutionAborted(String),

    /// Default-branch or pull-request head lookup failed. Not retried:
    /// this implies bad credentials or a nonexistent repository.
    #[error("failed to fetch repository metadata from {url}: {detail}")]
    MetadataFetch { url: String, detail: String },

    /// The tarball strategy failed for both the primary and fallback ref.
    /// The message lists both URLs to aid manual diagnosis.
    #[error("invalid repository link. Tried:\n-  {primary}\n-  {fallback}")]
    AcquisitionExhausted { primary: String, fallback: String },

    /// Editor process could not be spawned (typically: binary missing).
    #[error("failed to launch editor {editor:?}: {source}")]
    EditorLaunch {
        editor: String,
        #[source]
        source: io::Error,
    },

    /// `git clone` fallback for non-GitHub hosts failed.
    #[error("git clone of {url} failed")]
    CloneFailed { url: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Map a fatal error to the process exit status.
/// 127 for a missing editor binary (command not found), 1 for everything else.
pub fn exit_code_for_error(e: &PeekError) -> u8 {
    match e {
        PeekError::EditorLaunch { source, .. } if source.kind() == io::ErrorKind::NotFound => 127,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_editor_not_found_maps_to_127() {
        let e = PeekError::EditorLaunch {
            editor: "definitely-not-an-editor".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(exit_code_for_error(&e), 127);
    }

    #[test]
    fn test_other_errors_map_to_1() {
        let e = PeekError::AcquisitionExhausted {
            primary: "https://example.invalid/a".to_string(),
            fallback: "https://example.invalid/b".to_string(),
        };
        assert_eq!(exit_code_for_error(&e), 1);
    }

    #[test]
    fn test_exhausted_error_lists_both_urls() {
        let e = PeekError::AcquisitionExhausted {
            primary: "https://api.github.com/repos/a/b/tarball/master".to_string(),
            fallback: "https://api.github.com/repos/a/b/tarball/main".to_string(),
        };
        let msg = e.to_string();
        assert!(msg.contains("/tarball/master"));
        assert!(msg.contains("/tarball/main"));
    }
}
