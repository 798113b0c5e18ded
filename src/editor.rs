//! Editor discovery, classification, and launch planning.
//!
//! Classification is by program-name substring and decides the exit policy:
//! waitable graphical editors block until the window closes, non-waitable
//! ones force workspace retention, terminal editors run inline with a
//! raw-mode guard around them.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use which::which;

use crate::errors::PeekError;
use crate::util::{shell_join, shell_like_split_args, ShellScript};

/// Probe order when neither `--editor` nor `$EDITOR` is set.
pub const EDITOR_PROBE_ORDER: &[&str] = &["code", "subl", "code-insiders", "vim", "vi"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorMode {
    /// Supports a "block until the window closes" flag (VS Code family).
    GraphicalWaitable,
    /// GUI editor whose process returns immediately and cannot be waited on
    /// (Sublime Text). The workspace must outlive us.
    GraphicalNonWaitable,
    /// Runs inside the invoking terminal (vim, vi).
    Terminal,
    /// Anything we cannot classify.
    Unknown,
}

/// What the session waits for before tearing the workspace down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicy {
    /// Block on the editor child process; teardown when it exits.
    WaitForEditorExit,
    /// Only wait for the archive download to finish, then exit.
    WaitForDownload,
    /// Wait for the download, then ask the user before deleting.
    WaitForConfirmation,
}

/// Resolve the editor command string: explicit flag, then `$EDITOR`, then a
/// probe over well-known binaries. Falls back to "code" with a warning so
/// the error surfaces at spawn time with a useful message.
pub fn discover_editor(explicit: &str) -> String {
    if !explicit.trim().is_empty() && explicit != "auto" {
        return explicit.to_string();
    }
    if let Ok(from_env) = std::env::var("EDITOR") {
        if !from_env.trim().is_empty() {
            return from_env;
        }
    }
    for candidate in EDITOR_PROBE_ORDER {
        if which(candidate).is_ok() {
            return (*candidate).to_string();
        }
    }
    eprintln!("git-peek: no editor found; defaulting to \"code\" (set $EDITOR to override)");
    "code".to_string()
}

/// Classify by substring of the program's basename. `vi` also matches vim,
/// nvim and their variants.
pub fn classify_editor(editor: &str) -> EditorMode {
    let program = shell_like_split_args(editor)
        .into_iter()
        .next()
        .unwrap_or_default();
    let base = Path::new(&program)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or(program);
    if base.contains("code") {
        EditorMode::GraphicalWaitable
    } else if base.contains("subl") {
        EditorMode::GraphicalNonWaitable
    } else if base.contains("vi") {
        EditorMode::Terminal
    } else {
        EditorMode::Unknown
    }
}

/// Default policy for a mode. Editors we cannot block on (non-waitable or
/// unknown) ask the user before deleting when a terminal is attached, and
/// just wait out the download otherwise.
pub fn policy_for(mode: EditorMode, interactive: bool) -> ExitPolicy {
    match mode {
        EditorMode::GraphicalWaitable | EditorMode::Terminal => ExitPolicy::WaitForEditorExit,
        EditorMode::GraphicalNonWaitable | EditorMode::Unknown => {
            if interactive {
                ExitPolicy::WaitForConfirmation
            } else {
                ExitPolicy::WaitForDownload
            }
        }
    }
}

/// Fully-resolved command for spawning the editor.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl LaunchPlan {
    /// The whole command as one shell-safe line (terminal-window scripts).
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        shell_join(&parts)
    }
}

/// Build the concrete command line for `editor`.
///
/// User-supplied wait flags are stripped and re-added canonically so the
/// policy, not the `$EDITOR` value, decides whether the process blocks.
/// When a specific file was referenced, known editors get a cursor locator
/// argument for it.
pub fn build_launch_plan(
    editor: &str,
    mode: EditorMode,
    policy: ExitPolicy,
    workspace: &Path,
    open_file: Option<&Path>,
    line: Option<u32>,
) -> LaunchPlan {
    let mut tokens = shell_like_split_args(editor);
    let program = if tokens.is_empty() {
        editor.to_string()
    } else {
        tokens.remove(0)
    };
    let mut args: Vec<String> = tokens
        .into_iter()
        .filter(|t| t != "--wait" && t != "-w")
        .collect();

    match mode {
        EditorMode::GraphicalWaitable => {
            if policy == ExitPolicy::WaitForEditorExit {
                args.push("--wait".to_string());
            }
            args.push("--new-window".to_string());
            args.push(workspace.display().to_string());
            if let Some(file) = open_file {
                args.push("-g".to_string());
                args.push(format!("{}:{}:0", file.display(), line.unwrap_or(1)));
            }
        }
        EditorMode::GraphicalNonWaitable => {
            args.push(workspace.display().to_string());
            if let Some(file) = open_file {
                args.push(format!("{}:{}:0", file.display(), line.unwrap_or(1)));
            }
        }
        EditorMode::Terminal | EditorMode::Unknown => {
            if let Some(line) = line {
                if mode == EditorMode::Terminal {
                    args.push(format!("+{line}"));
                }
            }
            match open_file {
                Some(file) => args.push(file.display().to_string()),
                None => args.push(workspace.display().to_string()),
            }
        }
    }

    LaunchPlan {
        program,
        args,
        cwd: workspace.to_path_buf(),
    }
}

fn launch_error(plan: &LaunchPlan, source: std::io::Error) -> PeekError {
    PeekError::EditorLaunch {
        editor: plan.program.clone(),
        source,
    }
}

/// Spawn the editor and track it (waitable graphical and terminal editors).
pub fn spawn_tracked(plan: &LaunchPlan) -> Result<tokio::process::Child, PeekError> {
    let mut cmd = std::process::Command::new(&plan.program);
    cmd.args(&plan.args)
        .current_dir(&plan.cwd)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    tokio::process::Command::from(cmd)
        .spawn()
        .map_err(|e| launch_error(plan, e))
}

/// Spawn the editor fully detached (own process group, no inherited stdio)
/// so it survives our exit. Used for non-waitable graphical editors.
pub fn spawn_detached(plan: &LaunchPlan) -> Result<(), PeekError> {
    let mut cmd = std::process::Command::new(&plan.program);
    cmd.args(&plan.args)
        .current_dir(&plan.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    cmd.spawn().map_err(|e| launch_error(plan, e))?;
    Ok(())
}

/// Saves the terminal state on construction and restores it on drop, so a
/// crashed or killed terminal editor cannot leave the tty in raw mode.
///
/// Restore-only on purpose: the child inherits the tty and puts it into
/// raw mode itself, so this side never flips modes or pauses stdin.
#[cfg(unix)]
pub struct RawModeGuard {
    saved: Option<nix::sys::termios::Termios>,
}

#[cfg(unix)]
impl RawModeGuard {
    pub fn capture() -> Self {
        let saved = nix::sys::termios::tcgetattr(std::io::stdin()).ok();
        Self { saved }
    }
}

#[cfg(unix)]
impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            let _ = nix::sys::termios::tcsetattr(
                std::io::stdin(),
                nix::sys::termios::SetArg::TCSANOW,
                &saved,
            );
        }
    }
}

#[cfg(not(unix))]
pub struct RawModeGuard;

#[cfg(not(unix))]
impl RawModeGuard {
    pub fn capture() -> Self {
        RawModeGuard
    }
}

/// Interval at which the sentinel file is polled.
const SENTINEL_POLL: std::time::Duration = std::time::Duration::from_millis(200);

/// A terminal editor launched in its own terminal window.
///
/// We cannot wait on the editor process directly (the terminal emulator
/// forks it away), so the one-shot script touches a sentinel file when the
/// editor exits and we poll for it.
pub struct TerminalWindowSession {
    sentinel: PathBuf,
    script: PathBuf,
}

impl TerminalWindowSession {
    pub fn launch(plan: &LaunchPlan) -> Result<Self, PeekError> {
        let stamp = std::process::id();
        let base = std::env::temp_dir();
        let script = base.join(format!("git-peek-editor-{stamp}.sh"));
        let sentinel = base.join(format!("git-peek-editor-{stamp}.done"));
        let _ = std::fs::remove_file(&sentinel);

        let mut body = ShellScript::new();
        body.push(format!("cd {}", crate::util::shell_escape(&plan.cwd.display().to_string())));
        body.push(plan.command_line());
        body.push(format!(
            ": > {}",
            crate::util::shell_escape(&sentinel.display().to_string())
        ));
        let line = body.build()?;
        std::fs::write(&script, format!("#!/bin/sh\n{line}\n"))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;
        }

        Self::open_terminal_window(&script).map_err(|e| launch_error(plan, e))?;
        Ok(Self { sentinel, script })
    }

    #[cfg(target_os = "macos")]
    fn open_terminal_window(script: &Path) -> std::io::Result<()> {
        std::process::Command::new("open")
            .arg("-a")
            .arg("Terminal")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
    }

    #[cfg(not(target_os = "macos"))]
    fn open_terminal_window(script: &Path) -> std::io::Result<()> {
        const EMULATORS: &[&str] = &["x-terminal-emulator", "gnome-terminal", "konsole", "xterm"];
        let emulator = EMULATORS
            .iter()
            .copied()
            .find(|e| which(e).is_ok())
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no terminal emulator found")
            })?;
        let mut cmd = std::process::Command::new(emulator);
        if emulator == "gnome-terminal" {
            cmd.arg("--").arg(script);
        } else {
            cmd.arg("-e").arg(script);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
    }

    /// Resolve when the editor inside the window exits. Poll-based; the
    /// interval bounds how stale the signal can be.
    pub async fn wait(&self) {
        loop {
            if self.sentinel.exists() {
                break;
            }
            tokio::time::sleep(SENTINEL_POLL).await;
        }
    }
}

impl Drop for TerminalWindowSession {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.sentinel);
        let _ = std::fs::remove_file(&self.script);
    }
}
