//! End-to-end session flow: resolve, acquire, edit, tear down.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::acquire::{acquire, Acquisition};
use crate::cli::Cli;
use crate::editor::{
    build_launch_plan, classify_editor, discover_editor, policy_for, spawn_detached,
    spawn_tracked, EditorMode, ExitPolicy, LaunchPlan, RawModeGuard, TerminalWindowSession,
};
use crate::errors::{exit_code_for_error, PeekError};
use crate::github::{load_dotenv, GithubClient};
use crate::reference::{resolve, Reference, ResolveOptions};
use crate::search::GithubSearch;
use crate::session::{install_signal_handlers, Session, SessionState};
use crate::workspace::Workspace;

/// Run one complete session and return the process exit status.
pub async fn run(opts: Cli) -> u8 {
    load_dotenv();

    let client = match GithubClient::new() {
        Ok(c) => c,
        Err(e) => return fail_early(&e),
    };
    let search = GithubSearch::new(client.clone());
    let resolve_opts = ResolveOptions {
        branch: opts.branch.clone(),
        use_default_branch: opts.default_branch,
        fromscript: opts.fromscript,
    };
    let reference = match resolve(&opts.target, &resolve_opts, &client, &search).await {
        Ok(r) => r,
        Err(e) => return fail_early(&e),
    };
    tracing::debug!(?reference, "resolved");

    let workspace = match Workspace::create(
        opts.out.as_deref(),
        &reference.name,
        &reference.git_ref,
        opts.keep,
    ) {
        Ok(w) => w,
        Err(e) => return fail_early(&PeekError::Io(e)),
    };

    let session = Arc::new(Session::new(workspace, opts.verbose));
    install_signal_handlers(session.clone());

    match drive(&client, &session, &reference, &opts).await {
        Ok(()) => {
            session.do_exit();
            0
        }
        Err(e) => {
            eprintln!("git-peek: {e}");
            session.do_exit();
            exit_code_for_error(&e)
        }
    }
}

fn fail_early(e: &PeekError) -> u8 {
    eprintln!("git-peek: {e}");
    exit_code_for_error(e)
}

async fn drive(
    client: &GithubClient,
    session: &Arc<Session>,
    reference: &Reference,
    opts: &Cli,
) -> Result<(), PeekError> {
    let start = Instant::now();
    session.set_state(SessionState::Acquiring);

    let ws_path = session.workspace().path().to_path_buf();
    let using_default_file = reference.filepath.is_empty();
    let prefetch_rel = if using_default_file {
        "README.md".to_string()
    } else {
        reference.filepath.clone()
    };
    let prefetch_target = ws_path.join(&prefetch_rel);

    let prefetch_enabled =
        !opts.no_prefetch && std::env::var_os("GIT_PEEK_NO_PREFETCH").is_none();
    let mut acquisition: Option<Acquisition> = if reference.is_github() {
        let acq = acquire(
            client,
            session,
            reference,
            &ws_path,
            &prefetch_target,
            prefetch_enabled,
        );
        session.set_abort_handle(acq.abort_handle());
        Some(acq)
    } else {
        clone_repository(session, reference, &ws_path).await?;
        None
    };

    if let Some(acq) = acquisition.as_mut() {
        acq.wait_until_usable().await?;
    }

    let editor = discover_editor(&opts.editor);
    let mode = classify_editor(&editor);
    let interactive = !opts.fromscript && atty::is(atty::Stream::Stdin);
    let mut policy = policy_for(mode, interactive);
    if opts.wait && mode != EditorMode::GraphicalNonWaitable {
        policy = ExitPolicy::WaitForEditorExit;
    }
    // An editor we cannot block on must not have the floor pulled out from
    // under it.
    if mode == EditorMode::GraphicalNonWaitable || opts.keep {
        session.workspace().mark_retain();
    }
    session.set_policy(policy);
    tracing::debug!(%editor, ?mode, ?policy, interactive, "launch decision");

    // A blocking editor opening the bare tree must never see a
    // half-downloaded workspace. Terminal editors launched non-interactively
    // defer entirely to the exit policy instead.
    let wants_full_tree = (policy == ExitPolicy::WaitForEditorExit || opts.wait)
        && using_default_file
        && !(mode == EditorMode::Terminal && !interactive);
    if wants_full_tree {
        if let Some(acq) = acquisition.as_mut() {
            acq.wait_complete().await?;
        }
    }

    let open_file = (!using_default_file).then(|| prefetch_target.clone());
    let plan = build_launch_plan(
        &editor,
        mode,
        policy,
        &ws_path,
        open_file.as_deref(),
        reference.line,
    );

    session.set_state(SessionState::Editing);
    if mode == EditorMode::Terminal {
        run_terminal_editor(session, &plan, interactive, start).await?;
    } else if policy == ExitPolicy::WaitForEditorExit {
        let mut child = spawn_tracked(&plan)?;
        if let Some(pid) = child.id() {
            session.set_child_pid(pid as i32);
        }
        session.log(&launched_line(start));
        // Tarball exhaustion stays fatal even while the editor is open; the
        // prefetch winning the race earlier does not downgrade it.
        tokio::select! {
            _ = child.wait() => {}
            e = acquisition_failure(acquisition.as_mut()) => return Err(e),
        }
        session.set_child_pid(0);
    } else {
        spawn_detached(&plan)?;
        session.log(&launched_line(start));
    }

    match policy {
        ExitPolicy::WaitForEditorExit => {
            // Covers the editor exiting in the same instant the tarball
            // task failed, and terminal editors that owned the tty while
            // it did.
            if let Some(acq) = acquisition.as_mut() {
                acq.failure_if_settled().await?;
            }
        }
        ExitPolicy::WaitForDownload => {
            if let Some(acq) = acquisition.as_mut() {
                acq.wait_complete().await?;
            }
        }
        ExitPolicy::WaitForConfirmation => {
            if let Some(acq) = acquisition.as_mut() {
                acq.wait_complete().await?;
            }
            if confirm_delete().await {
                // Explicit confirmation is the sanctioned way past a
                // forced retention; --keep still wins.
                if !opts.keep {
                    session.workspace().clear_retain();
                }
            } else {
                session.workspace().mark_retain();
            }
        }
    }

    if opts.confirm
        && interactive
        && policy != ExitPolicy::WaitForConfirmation
        && !session.workspace().retained()
        && !confirm_delete().await
    {
        session.workspace().mark_retain();
    }
    Ok(())
}

/// Resolves only when the tarball strategy fails; a successful download
/// (or no acquisition at all) never resolves.
async fn acquisition_failure(acq: Option<&mut Acquisition>) -> PeekError {
    if let Some(acq) = acq {
        if let Err(e) = acq.wait_complete().await {
            return e;
        }
    }
    std::future::pending().await
}

fn launched_line(start: Instant) -> String {
    format!("💻 Launched editor in {:.2}s", start.elapsed().as_secs_f64())
}

async fn run_terminal_editor(
    session: &Arc<Session>,
    plan: &LaunchPlan,
    interactive: bool,
    start: Instant,
) -> Result<(), PeekError> {
    if interactive {
        // The editor takes over the tty; stay silent and restore the
        // terminal state afterwards even if the editor dies badly.
        let _guard = RawModeGuard::capture();
        session.set_quiet(true);
        let mut child = spawn_tracked(plan)?;
        if let Some(pid) = child.id() {
            session.set_child_pid(pid as i32);
        }
        let _ = child.wait().await;
        session.set_child_pid(0);
        session.set_quiet(false);
    } else {
        let window = TerminalWindowSession::launch(plan)?;
        session.log(&launched_line(start));
        window.wait().await;
    }
    Ok(())
}

/// Shallow single-branch clone for hosts without a tarball API.
async fn clone_repository(
    session: &Arc<Session>,
    reference: &Reference,
    dest: &Path,
) -> Result<(), PeekError> {
    let url = format!(
        "https://{}/{}/{}.git",
        reference.host, reference.owner, reference.name
    );
    session.log("⏳ Cloning repository to temp folder...");
    let mut cmd = tokio::process::Command::new("git");
    cmd.arg("clone")
        .arg("--filter=tree:0")
        .arg("--single-branch")
        .arg("--depth=1");
    if !reference.git_ref.is_empty() {
        cmd.arg("--branch").arg(&reference.git_ref);
    }
    cmd.arg(&url)
        .arg(dest)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    let status = cmd.status().await?;
    if !status.success() {
        return Err(PeekError::CloneFailed { url });
    }
    session.log("💿 Finished downloading repository!");
    Ok(())
}

/// Plain y/n prompt on the controlling terminal; defaults to yes. EOF or a
/// read failure also deletes (never leak directories on a closed stdin).
async fn confirm_delete() -> bool {
    eprint!("Delete repository: [Y/n] ");
    let mut line = String::new();
    let mut reader = BufReader::new(tokio::io::stdin());
    match reader.read_line(&mut line).await {
        Ok(0) | Err(_) => true,
        Ok(_) => {
            let answer = line.trim();
            !(answer.eq_ignore_ascii_case("n") || answer.eq_ignore_ascii_case("no"))
        }
    }
}
