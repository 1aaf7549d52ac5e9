use std::io::Write as _;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::{error, info};

use review_watchdog::{
    GhCli, PullRequestRef, RepoSlug, TriggerMode, WatchConfig, WatchOutcome, Watchdog,
};

/// Wait for the review bot to review a pull request.
///
/// Prints the actionable bot reviews as one JSON line on stdout when they
/// arrive. Exits 0 when reviews arrived or there was nothing to wait for,
/// and 1 on timeout or error.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Pull request number
    pr: u64,

    /// Repository as `owner/name`
    repo: String,

    /// Pull request was just opened: wait without requiring a trigger comment
    #[arg(long, default_value_t = false)]
    new: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // --help and --version are not failures
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("Watchdog failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<u8> {
    let repo: RepoSlug = args.repo.parse()?;
    let pr = PullRequestRef::new(repo, args.pr)?;
    let mode = if args.new {
        TriggerMode::AssumeTriggered
    } else {
        TriggerMode::AwaitComment
    };

    let watchdog = Watchdog::new(Box::new(GhCli::from_env()), WatchConfig::default());
    let outcome = watchdog.run(&pr, mode).await?;

    if let Some(line) = outcome.handoff_line()? {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}").context("Failed to write reviews to stdout")?;
        stdout.flush().context("Failed to flush stdout")?;
    }

    match &outcome {
        WatchOutcome::Reviews { reviews, found_at } => {
            info!(count = reviews.len(), ?found_at, "Automated review ready")
        }
        WatchOutcome::NoOp { reason } => info!(%reason, "Nothing to wait for"),
        WatchOutcome::TimedOut { elapsed } => {
            error!(elapsed_secs = elapsed.as_secs(), "No automated review before timeout")
        }
    }

    Ok(outcome.exit_code())
}
