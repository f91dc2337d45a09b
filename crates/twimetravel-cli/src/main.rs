//! twimetravel binary
//!
//! Replays a recorded feed in the terminal, one line per post, at the pace
//! the posts originally appeared (scaled by `--rate`).
//!
//! ## Usage
//!
//! ```bash
//! # Replay an hour of posts sixty times faster than real time
//! twimetravel play --feed feeds/harrisimo.json --rate 60
//!
//! # Settings from a config file, debug logging
//! twimetravel --config twimetravel.toml --log-level debug play
//! ```
//!
//! Reveals go to stdout; logs go to stderr.

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use twimetravel_player::{
    JsonFileFeed, PlayRequest, PlaybackController, PlaybackFlow, PlaybackScheduler, PlayerConfig,
    Subscription, shared_playback_bus,
};
use twimetravel_types::{ItemId, RunId};

const STATUS_URL: &str = "https://twitter.com/i/web/status";

/// Replay a timeline as it happened.
#[derive(Parser, Debug)]
#[command(name = "twimetravel")]
#[command(about = "Replay a recorded timeline at a chosen rate")]
struct Args {
    /// Config file (default: ./twimetravel.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `twimetravel_player=trace` (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play a feed file
    Play(PlayArgs),
}

#[derive(clap::Args, Debug)]
struct PlayArgs {
    /// JSON feed file (overrides `[feed] path`)
    #[arg(long)]
    feed: Option<PathBuf>,

    /// Playback rate, 2.0 = twice as fast (overrides `rate`)
    #[arg(long)]
    rate: Option<f64>,

    /// Whose timeline the feed holds
    #[arg(long, default_value = "local")]
    who: String,

    /// Window start, seconds since the unix epoch
    #[arg(long, default_value_t = 0)]
    from: u64,

    /// Window end, seconds since the unix epoch
    #[arg(long, default_value_t = u64::MAX)]
    until: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = match args.log_level.as_deref() {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => PlayerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PlayerConfig::load_or_default(PlayerConfig::default_path())
            .context("loading default config")?,
    };

    match args.command {
        Command::Play(play_args) => play(config, play_args).await,
    }
}

async fn play(config: PlayerConfig, args: PlayArgs) -> Result<()> {
    let feed = args
        .feed
        .or(config.feed.path)
        .context("no feed file: pass --feed or set [feed] path in the config")?;
    let rate = args.rate.unwrap_or(config.rate.get());

    let scheduler = PlaybackScheduler::current(shared_playback_bus(config.bus_capacity))?;
    let controller = PlaybackController::new(Arc::new(JsonFileFeed::new(&feed)), scheduler);
    let mut events = controller.subscribe("playback.>");

    let submission = controller
        .submit(&PlayRequest::new(args.who, args.from, args.until, rate))
        .await
        .with_context(|| format!("playing {}", feed.display()))?;

    let Some(run) = submission.run else {
        tracing::info!(feed = %feed.display(), "feed is empty, nothing to play");
        return Ok(());
    };
    tracing::info!(
        run = %run.short(),
        items = submission.items,
        rate = %submission.rate,
        "playback started"
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    let end = follow(
        controller.scheduler(),
        run,
        &mut events,
        shutdown,
        &mut std::io::stdout(),
    )
    .await?;

    match end {
        End::Finished { revealed } => tracing::info!(revealed, "playback finished"),
        End::Cancelled => tracing::info!("playback cancelled"),
        End::Interrupted => {
            tracing::info!("interrupted, stopping playback");
            controller.dispose();
        }
    }
    Ok(())
}

/// How following a run ended.
#[derive(Debug, PartialEq, Eq)]
enum End {
    Finished { revealed: usize },
    Cancelled,
    Interrupted,
}

/// Print every reveal of `run` until it ends or `shutdown` resolves.
///
/// Events only say that something changed. The lines themselves come from
/// the scheduler's reveal record, so a subscriber that lags behind the bus
/// still prints each reveal exactly once and in order.
async fn follow(
    scheduler: &PlaybackScheduler,
    run: RunId,
    events: &mut Subscription<PlaybackFlow>,
    shutdown: impl Future<Output = ()>,
    out: &mut impl Write,
) -> Result<End> {
    tokio::pin!(shutdown);
    let mut printed = 0;

    let end = loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break End::Interrupted,

            msg = events.recv() => {
                let Some(msg) = msg else { break End::Cancelled };
                if msg.payload.run() != run {
                    continue;
                }
                printed = print_new(scheduler, printed, out)?;
                match msg.payload {
                    PlaybackFlow::Finished { revealed, .. } => break End::Finished { revealed },
                    PlaybackFlow::Cancelled { .. } => break End::Cancelled,
                    PlaybackFlow::Revealed { .. } | PlaybackFlow::Started { .. } => {}
                }
            }
        }
    };

    print_new(scheduler, printed, out)?;
    Ok(end)
}

/// Write the reveals past the first `printed`, returning the new count.
fn print_new(scheduler: &PlaybackScheduler, printed: usize, out: &mut impl Write) -> Result<usize> {
    let reveals = scheduler.reveals();
    for reveal in reveals.iter().skip(printed) {
        writeln!(out, "{}", reveal_line(reveal.elapsed, &reveal.id))?;
    }
    out.flush()?;
    Ok(printed.max(reveals.len()))
}

/// `[  12.250s] 963143061558743040 https://twitter.com/i/web/status/963143061558743040`
fn reveal_line(elapsed: Duration, id: &ItemId) -> String {
    format!("[{:>9.3}s] {id} {STATUS_URL}/{id}", elapsed.as_secs_f64())
}
