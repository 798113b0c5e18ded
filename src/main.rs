use std::process::ExitCode;

use clap::Parser;

use git_peek::cli::Cli;

fn main() -> ExitCode {
    // GIT_PEEK_LOG selects diagnostic verbosity (tracing-style directives);
    // user-facing progress goes to stderr regardless.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("GIT_PEEK_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Single-threaded runtime: one session, event-driven, nothing here
    // benefits from a worker pool.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("git-peek: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    ExitCode::from(runtime.block_on(git_peek::run::run(cli)))
}
