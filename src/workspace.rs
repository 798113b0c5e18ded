//! Ephemeral workspace lifecycle: creation, retention, idempotent teardown.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

const MAX_DELETE_ATTEMPTS: u32 = 10;
const DELETE_BACKOFF: Duration = Duration::from_millis(100);

/// Replace characters that are awkward in directory names (refs may contain
/// slashes) so the workspace name stays a single path component.
pub fn sanitize_label(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// The on-disk directory holding the materialized repository for one session.
///
/// Teardown is the only writer of `deletion_attempts` and is effective at
/// most once no matter how many paths invoke it (normal exit, error exit,
/// signal). Once `retain` is set the directory is never deleted.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    retain: AtomicBool,
    torn_down: AtomicBool,
    deletion_attempts: AtomicU32,
}

impl Workspace {
    /// Allocate a uniquely-named directory under `parent` (or the system
    /// temp dir). The name embeds repo and ref for human debuggability.
    pub fn create(parent: Option<&Path>, name: &str, git_ref: &str, keep: bool) -> std::io::Result<Self> {
        let base = match parent {
            Some(p) => {
                fs::create_dir_all(p)?;
                p.to_path_buf()
            }
            None => env::temp_dir(),
        };
        let prefix = format!(
            "git-peek-{}-{}-",
            sanitize_label(name),
            sanitize_label(git_ref)
        );
        let dir = tempfile::Builder::new().prefix(&prefix).tempdir_in(base)?;
        // Deletion is owned by teardown, not by TempDir's destructor.
        let path = dir.into_path();
        Ok(Self {
            path,
            retain: AtomicBool::new(keep),
            torn_down: AtomicBool::new(false),
            deletion_attempts: AtomicU32::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the directory after the session ends. Irreversible.
    pub fn mark_retain(&self) {
        self.retain.store(true, Ordering::SeqCst);
    }

    /// Undo a forced retention after the user explicitly confirmed
    /// deletion. Must never be called for `--keep` workspaces.
    pub fn clear_retain(&self) {
        self.retain.store(false, Ordering::SeqCst);
    }

    pub fn retained(&self) -> bool {
        self.retain.load(Ordering::SeqCst)
    }

    pub fn deletion_attempts(&self) -> u32 {
        self.deletion_attempts.load(Ordering::SeqCst)
    }

    /// Delete the directory unless retained. Idempotent and safe to invoke
    /// from any exit path; retries a handful of times because a child
    /// editor process may still hold an open handle, then gives up quietly
    /// (best-effort cleanup never fails the run).
    ///
    /// Returns true when the directory was removed by this call.
    pub fn teardown(&self, verbose: bool) -> bool {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return false;
        }
        if self.retained() {
            return false;
        }
        for attempt in 1..=MAX_DELETE_ATTEMPTS {
            self.deletion_attempts.store(attempt, Ordering::SeqCst);
            if !self.path.exists() {
                return attempt > 1;
            }
            match fs::remove_dir_all(&self.path) {
                Ok(()) => return true,
                Err(e) => {
                    if verbose {
                        eprintln!(
                            "git-peek: deletion attempt {attempt} for {} failed: {e}",
                            self.path.display()
                        );
                    }
                    tracing::debug!(
                        "deletion attempt {attempt} for {} failed: {e}",
                        self.path.display()
                    );
                }
            }
            if !self.path.exists() {
                return true;
            }
            std::thread::sleep(DELETE_BACKOFF);
        }
        tracing::debug!(
            "giving up on deleting {} after {MAX_DELETE_ATTEMPTS} attempts",
            self.path.display()
        );
        false
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        // Last-resort cleanup; a no-op when teardown already ran.
        self.teardown(false);
    }
}
