//! Session aggregate and exit coordination.
//!
//! Every exit path (normal completion, fatal error, signal) funnels through
//! [`Session::do_exit`], which is synchronous, idempotent, and safe to call
//! from a signal task. It silences further output, aborts any in-flight
//! extraction, reaps a tracked editor child, and tears the workspace down.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Mutex;

use crate::acquire::ExtractAbort;
use crate::editor::ExitPolicy;
use crate::workspace::Workspace;

/// Coarse lifecycle phase, recorded for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Resolving,
    Acquiring,
    Editing,
    Exiting,
}

pub struct Session {
    workspace: Workspace,
    exiting: AtomicBool,
    quiet: AtomicBool,
    child_pid: AtomicI32,
    abort: Mutex<Option<ExtractAbort>>,
    policy: Mutex<Option<ExitPolicy>>,
    verbose: bool,
}

impl Session {
    pub fn new(workspace: Workspace, verbose: bool) -> Self {
        Self {
            workspace,
            exiting: AtomicBool::new(false),
            quiet: AtomicBool::new(false),
            child_pid: AtomicI32::new(0),
            abort: Mutex::new(None),
            policy: Mutex::new(None),
            verbose,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn set_state(&self, state: SessionState) {
        tracing::debug!(?state, "session state");
    }

    pub fn set_abort_handle(&self, handle: ExtractAbort) {
        if let Ok(mut slot) = self.abort.lock() {
            *slot = Some(handle);
        }
    }

    pub fn set_policy(&self, policy: ExitPolicy) {
        if let Ok(mut slot) = self.policy.lock() {
            *slot = Some(policy);
        }
    }

    pub fn policy(&self) -> Option<ExitPolicy> {
        self.policy.lock().ok().and_then(|p| *p)
    }

    /// Track the spawned editor so a forced exit can terminate it. Pass 0
    /// once the child has been waited on (the pid may be recycled after
    /// that and must not be signalled).
    pub fn set_child_pid(&self, pid: i32) {
        self.child_pid.store(pid, Ordering::SeqCst);
    }

    /// Suppress progress output (a full-screen terminal editor owns the tty).
    pub fn set_quiet(&self, quiet: bool) {
        self.quiet.store(quiet, Ordering::SeqCst);
    }

    /// Progress line on stderr; dropped while quiet.
    pub fn log(&self, msg: &str) {
        if !self.quiet.load(Ordering::SeqCst) {
            eprintln!("{msg}");
        }
    }

    pub fn exiting(&self) -> bool {
        self.exiting.load(Ordering::SeqCst)
    }

    /// Run the teardown sequence exactly once. Synchronous on purpose so it
    /// can run from the signal task without touching the runtime.
    pub fn do_exit(&self) {
        if self.exiting.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(SessionState::Exiting);
        self.quiet.store(false, Ordering::SeqCst);

        if let Ok(slot) = self.abort.lock() {
            if let Some(handle) = slot.as_ref() {
                handle.abort();
            }
        }

        // A fire-and-forget editor must not keep handles into the directory
        // being deleted. Under WaitForEditorExit the child owns the session
        // and is left alone.
        let pid = self.child_pid.swap(0, Ordering::SeqCst);
        #[cfg(unix)]
        if pid > 0 && self.policy() != Some(ExitPolicy::WaitForEditorExit) {
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        let _ = pid;

        if self.workspace.teardown(self.verbose) {
            self.log("🗑  Deleted temp repo");
        } else if self.workspace.retained() {
            self.log(&format!(
                "📂 Keeping {}",
                self.workspace.path().display()
            ));
        }
    }
}

/// Install the signal task: any termination signal runs the full teardown
/// and exits with the conventional 128 + signal status.
#[cfg(unix)]
pub fn install_signal_handlers(session: std::sync::Arc<Session>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::debug!("SIGTERM handler unavailable: {e}");
                None
            }
        };
        let mut quit = signal(SignalKind::quit()).ok();
        // SIGABRT has no named constructor; registration failure is not
        // fatal, the remaining signals still get handled.
        let mut abrt = signal(SignalKind::from_raw(libc::SIGABRT)).ok();

        let signo = tokio::select! {
            _ = tokio::signal::ctrl_c() => libc::SIGINT,
            _ = wait_signal(&mut term) => libc::SIGTERM,
            _ = wait_signal(&mut quit) => libc::SIGQUIT,
            _ = wait_signal(&mut abrt) => libc::SIGABRT,
        };
        tracing::debug!("caught signal {signo}");
        session.do_exit();
        std::process::exit(128 + signo);
    });
}

#[cfg(unix)]
async fn wait_signal(sig: &mut Option<tokio::signal::unix::Signal>) {
    match sig {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
pub fn install_signal_handlers(session: std::sync::Arc<Session>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            session.do_exit();
            std::process::exit(130);
        }
    });
}
