use std::path::PathBuf;

use clap::Parser;

/// Open a remote repository in your local editor within seconds. The
/// temporary checkout is deleted when the session ends.
#[derive(Debug, Parser)]
#[command(name = "git-peek", version, about)]
pub struct Cli {
    /// Repository URL, `owner/repo` shorthand, or free text to search for.
    pub target: String,

    /// Editor command to launch ("auto" probes $EDITOR then common editors).
    #[arg(short, long, default_value = "auto")]
    pub editor: String,

    /// Branch, tag, or commit to check out ("default" fetches the remote
    /// default branch).
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Resolve the remote default branch instead of assuming main/master.
    #[arg(short = 'd', long = "default-branch")]
    pub default_branch: bool,

    /// Parent directory for the temporary checkout (defaults to the system
    /// temp dir).
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Wait for the full download before launching the editor.
    #[arg(short, long)]
    pub wait: bool,

    /// Keep the checkout instead of deleting it on exit.
    #[arg(short, long)]
    pub keep: bool,

    /// Ask before deleting the checkout.
    #[arg(short, long)]
    pub confirm: bool,

    /// Invoked from a protocol handler or script: never prompt, prefer the
    /// remote default branch.
    #[arg(long)]
    pub fromscript: bool,

    /// Disable the single-file prefetch; open only once extraction starts.
    #[arg(long)]
    pub no_prefetch: bool,

    /// Report deletion retries and other diagnostics on stderr.
    #[arg(long)]
    pub verbose: bool,
}
