use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use trendline_client::TrendlineClient;
use trendline_common::{score_percent, Config, ProcessingStatus, ScoreScale, SignalId};
use trendline_review::{ReviewContext, SignalAccess, StatusCoordinator, TrendEngine};

#[derive(Parser)]
#[command(name = "trendline", about = "Review imported signals and assemble trends")]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Backend base URL, overrides TRENDLINE_API_URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Seconds between status polls, overrides TRENDLINE_POLL_INTERVAL_SECS
    #[arg(long, global = true)]
    poll_interval: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll processing status until the pipeline is done
    Status { project: Uuid },
    /// Resume a stopped pipeline
    Resume { project: Uuid },
    /// Re-run failed verifications
    Retry { project: Uuid },
    /// Show the next signal waiting for review and its candidates
    Next {
        project: Uuid,
        #[arg(long)]
        exclude: Option<SignalId>,
    },
    /// List trends
    Trends {
        project: Uuid,
        /// Include retired and archived trends
        #[arg(long)]
        all: bool,
    },
}

impl Command {
    fn project(&self) -> Uuid {
        match self {
            Command::Status { project }
            | Command::Resume { project }
            | Command::Retry { project }
            | Command::Next { project, .. }
            | Command::Trends { project, .. } => *project,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trendline=info"));
    if cli.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = Config::from_lookup(|key| match key {
        "TRENDLINE_API_URL" => cli.api_url.clone().or_else(|| env::var(key).ok()),
        "TRENDLINE_POLL_INTERVAL_SECS" => cli
            .poll_interval
            .map(|secs| secs.to_string())
            .or_else(|| env::var(key).ok()),
        _ => env::var(key).ok(),
    })
    .context("Failed to load configuration")?;
    config.log_redacted();

    let client = TrendlineClient::from_config(&config).context("Failed to build API client")?;
    let ctx = ReviewContext::new(cli.command.project(), Arc::new(client));

    match cli.command {
        Command::Status { .. } => watch_status(&ctx, &config).await,
        Command::Resume { .. } => {
            let mut coordinator = StatusCoordinator::new(&ctx, config.poll_interval);
            coordinator.resume_processing().await?;
            print_snapshot(&coordinator);
            coordinator.shutdown().await;
            Ok(())
        }
        Command::Retry { .. } => {
            let mut coordinator = StatusCoordinator::new(&ctx, config.poll_interval);
            coordinator.retry_failed_verifications().await?;
            print_snapshot(&coordinator);
            coordinator.shutdown().await;
            Ok(())
        }
        Command::Next { exclude, .. } => show_next(ctx, exclude).await,
        Command::Trends { all, .. } => list_trends(ctx, all).await,
    }
}

async fn watch_status(ctx: &ReviewContext, config: &Config) -> Result<()> {
    let mut coordinator = StatusCoordinator::new(ctx, config.poll_interval);
    let mut updates = coordinator.subscribe();
    coordinator.activate();

    let printer = tokio::spawn(async move {
        let mut last = None;
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            let line = snapshot.status.as_ref().map(ProcessingStatus::progress_line);
            if line.is_some() && line != last {
                info!(progress = line.as_deref().unwrap_or_default(), "Processing");
                last = line;
            }
            if let Some(error) = snapshot.error {
                info!(error = error.as_str(), "Last status fetch failed, still polling");
            }
        }
    });

    let status = tokio::select! {
        status = coordinator.wait_until_complete() => status,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            None
        }
    };
    coordinator.shutdown().await;
    printer.abort();

    if let Some(status) = status {
        println!("{}", status.progress_line());
        if status.is_error() {
            println!(
                "Pipeline stopped: {}. Run `trendline resume` to continue.",
                status.error_message.as_deref().unwrap_or("unknown error")
            );
        } else if status.has_failed_verifications() {
            println!("Run `trendline retry` to re-run failed verifications.");
        }
    }
    Ok(())
}

fn print_snapshot(coordinator: &StatusCoordinator) {
    let snapshot = coordinator.snapshot();
    match (&snapshot.status, &snapshot.error) {
        (_, Some(error)) => println!("Status refresh failed: {error}"),
        (Some(status), None) => println!("{}", status.progress_line()),
        (None, None) => println!("No status yet"),
    }
}

async fn show_next(ctx: ReviewContext, exclude: Option<SignalId>) -> Result<()> {
    let head = SignalAccess::new(ctx).next_unassigned(exclude).await?;
    let Some(selection) = head.selection else {
        if head.remaining_count > 0 {
            println!("No other signal is waiting for review.");
        } else {
            println!("All signals reviewed.");
        }
        return Ok(());
    };

    let focal = selection.focal();
    println!("{} [{}] ({} remaining)", focal.display_title(), focal.id, head.remaining_count);
    println!("  {}", focal.original_text);
    for candidate in selection.candidates() {
        let scale = match candidate.scale {
            ScoreScale::Verification => "verified",
            ScoreScale::Cosine => "cosine",
        };
        let linked = candidate
            .signal
            .trend_title
            .as_deref()
            .map(|t| format!(" (in \"{t}\")"))
            .unwrap_or_default();
        println!(
            "  {:>3}% {:<8} {}{linked}",
            score_percent(candidate.signal.score),
            scale,
            candidate.signal.title.as_deref().unwrap_or(&candidate.signal.original_text),
        );
    }
    Ok(())
}

async fn list_trends(ctx: ReviewContext, include_archived: bool) -> Result<()> {
    let trends = TrendEngine::new(ctx).list(include_archived).await?;
    if trends.is_empty() {
        println!("No trends yet.");
    }
    for trend in trends {
        println!(
            "{:<8} {:>3} signal(s)  {}  [{}]",
            trend.status.to_string(),
            trend.signal_count,
            trend.title,
            trend.id
        );
    }
    Ok(())
}
