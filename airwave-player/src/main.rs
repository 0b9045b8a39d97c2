//! Airwave Player (airwave-player) - Main entry point
//!
//! Console front end for the playback engine. PCM goes to `--output` (a file,
//! or `-` for stdout); logs and command replies go to stderr.
//!
//! Commands, one per line on stdin:
//! - `play <identifier>`: queue a request and start playback
//! - `skip`, `stop`, `queue`, `status`, `quit`

use std::path::PathBuf;
use std::sync::Arc;

use airwave_common::config::load_config;
use airwave_common::events::{EventBus, PlayerEvent};
use airwave_player::playback::{
    LoggingStatistics, OutgoingSink, PipeSink, PlayRequest, PlaybackOrchestrator, PlaybackQueue,
    PlayerCommand, TranscoderProcess,
};
use airwave_player::resolver::StreamResolver;
use airwave_player::PlayerConfig;
use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Name recorded as the requester for console commands
const CONSOLE_USER: &str = "console";

/// Command-line arguments for airwave-player
#[derive(Parser, Debug)]
#[command(name = "airwave-player")]
#[command(about = "Queue-driven audio player streaming PCM to a sink")]
#[command(version)]
struct Args {
    /// Path to config file (overrides AIRWAVE_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// PCM output: file path, or `-` for stdout
    #[arg(short, long, default_value = "-", env = "AIRWAVE_OUTPUT")]
    output: String,

    /// Transcoder executable (overrides transcoder.program)
    #[arg(long, env = "AIRWAVE_FFMPEG")]
    ffmpeg: Option<PathBuf>,
}

#[derive(Debug, PartialEq, Eq)]
enum ConsoleCommand {
    Play(String),
    Skip,
    Stop,
    Queue,
    Status,
    Quit,
}

fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    match word.to_ascii_lowercase().as_str() {
        "play" | "p" if !rest.is_empty() => Some(ConsoleCommand::Play(rest.to_string())),
        "skip" | "s" => Some(ConsoleCommand::Skip),
        "stop" => Some(ConsoleCommand::Stop),
        "queue" | "q" => Some(ConsoleCommand::Queue),
        "status" => Some(ConsoleCommand::Status),
        "quit" | "exit" => Some(ConsoleCommand::Quit),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = load_config(args.config.as_deref()).context("Failed to load configuration")?;

    // Logs to stderr: stdout may be carrying PCM
    let level = &toml_config.logging.level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("airwave_player={0},airwave_common={0}", level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = PlayerConfig::from_toml(&toml_config);
    if let Some(ffmpeg) = args.ffmpeg {
        config.transcoder.program = ffmpeg;
    }

    info!(
        transcoder = %config.transcoder.program.display(),
        output = %args.output,
        max_retries = config.playback.max_retries,
        "Starting Airwave Player"
    );

    let sink: Arc<dyn OutgoingSink> = if args.output == "-" {
        Arc::new(PipeSink::new(tokio::io::stdout()))
    } else {
        let file = tokio::fs::File::create(&args.output)
            .await
            .with_context(|| format!("Failed to create output file {}", args.output))?;
        Arc::new(PipeSink::new(file))
    };

    let resolver = StreamResolver::from_settings(&config.resolver);
    info!(providers = ?resolver.provider_names(), "Stream resolver ready");

    let events = EventBus::new(256);
    let orchestrator = PlaybackOrchestrator::new(
        config.playback.clone(),
        Arc::new(PlaybackQueue::new()),
        Arc::new(resolver),
        Arc::new(TranscoderProcess::new(config.transcoder.clone())),
        sink,
        Arc::new(LoggingStatistics),
        events.clone(),
    );

    tokio::spawn(log_events(events.subscribe()));

    tokio::select! {
        result = run_console(&orchestrator) => result?,
        _ = shutdown_signal() => {}
    }

    orchestrator.shutdown().await;
    info!("Airwave Player stopped");
    Ok(())
}

async fn run_console(orchestrator: &PlaybackOrchestrator) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let Some(command) = parse_command(&line) else {
            eprintln!("unknown command: {}", line.trim());
            continue;
        };

        match command {
            ConsoleCommand::Play(identifier) => {
                let position = orchestrator.enqueue(PlayRequest::new(CONSOLE_USER, identifier));
                eprintln!("queued at position {}", position + 1);
                orchestrator
                    .register_disconnect(Box::new(|| info!("Left outgoing channel")))
                    .await;
                orchestrator.dispatch(PlayerCommand::Play).await?;
            }
            ConsoleCommand::Skip => orchestrator.dispatch(PlayerCommand::Skip).await?,
            ConsoleCommand::Stop => orchestrator.dispatch(PlayerCommand::Stop).await?,
            ConsoleCommand::Queue => {
                let pending = orchestrator.queue().snapshot();
                if pending.is_empty() {
                    eprintln!("queue is empty");
                }
                for (index, request) in pending.iter().enumerate() {
                    eprintln!("{:>3}. {} ({})", index + 1, request.identifier, request.requested_by);
                }
            }
            ConsoleCommand::Status => {
                let snapshot = orchestrator.snapshot().await;
                eprintln!("{} ({} queued)", snapshot.action, orchestrator.queue().len());
            }
            ConsoleCommand::Quit => break,
        }
    }

    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<PlayerEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => debug!(event = %json, "Player event"),
                Err(e) => warn!(error = %e, "Event not serializable"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event logger lagging");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_command("play  lofi beats "),
            Some(ConsoleCommand::Play("lofi beats".to_string()))
        );
        assert_eq!(parse_command("SKIP"), Some(ConsoleCommand::Skip));
        assert_eq!(parse_command("stop"), Some(ConsoleCommand::Stop));
        assert_eq!(parse_command("q"), Some(ConsoleCommand::Queue));
        assert_eq!(parse_command("quit"), Some(ConsoleCommand::Quit));
        assert_eq!(parse_command("play"), None);
        assert_eq!(parse_command("dance"), None);
    }
}
