//! yomiage-rs: sentence-by-sentence Japanese article reader for VOICEVOX.

mod article;
mod audio;
mod config;
mod engine;
mod player;
mod proxy;
mod segmenter;
mod status;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::audio::RodioOutput;
use crate::engine::{EngineClient, SpeakerRegistry};
use crate::player::{PlaybackController, PlaybackSession, PlayerCommand};
use crate::segmenter::SentenceUnit;
use crate::status::{StatusKind, StatusReporter};

#[derive(Parser, Debug)]
#[command(
    name = "yomiage-rs",
    about = "Read Japanese articles aloud through a local VOICEVOX engine"
)]
struct Args {
    /// Article URL, path to a text file, or raw Japanese text
    input: Option<String>,

    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Speaker (style) id, overriding the configured default
    #[arg(short, long)]
    speaker: Option<u32>,

    /// Print the available voices and exit
    #[arg(long)]
    list_speakers: bool,

    /// Run the CORS proxy for browser clients instead of the player
    #[arg(long)]
    proxy: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = config::Config::load(args.config.as_deref());
    if let Some(speaker) = args.speaker {
        config.engine.speaker = speaker;
    }

    if args.proxy {
        return proxy::serve(&config.engine, &config.proxy).await;
    }

    let client = Arc::new(EngineClient::new(&config.engine));

    if args.list_speakers {
        let registry = SpeakerRegistry::fetch(&client, config.engine.speaker).await;
        print_voices(&registry);
        return Ok(());
    }

    let Some(input) = args.input else {
        return Err("no input given: pass a URL, a file path, or Japanese text".into());
    };

    let status = StatusReporter::new(config.feedback.notifications);
    status.update(StatusKind::Loading, "Loading article…");
    let text = article::load(&input, config.engine.timeout_secs).await?;

    let session = PlaybackSession::new(segmenter::segment(&text));
    if session.is_empty() {
        status.update(StatusKind::Error, "No Japanese sentences detected");
        return Err("no Japanese sentences detected".into());
    }

    print_article(session.units());
    status.update(
        StatusKind::Success,
        &format!("Loaded {} sentences", session.len()),
    );

    let registry = Arc::new(SpeakerRegistry::fetch(&client, config.engine.speaker).await);
    info!(
        "Using voice {} ({} voices listed)",
        registry.current_voice_id(),
        registry.voices().len()
    );

    let audio = RodioOutput::new()?;
    let (controller, events_rx) = PlaybackController::new(
        session,
        client,
        audio,
        registry,
        status,
        Duration::from_millis(config.player.advance_delay_ms),
    );

    let (commands_tx, commands_rx) = mpsc::channel(16);
    tokio::spawn(read_commands(commands_tx));

    print_help();
    controller.run(commands_rx, events_rx).await;

    Ok(())
}

/// Parse stdin lines into player commands until EOF or quit.
async fn read_commands(tx: mpsc::Sender<PlayerCommand>) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Some(cmd) = parse_command(line.trim()) else {
            print_help();
            continue;
        };
        if tx.send(cmd).await.is_err() || cmd == PlayerCommand::Quit {
            break;
        }
    }
    // Dropping the sender stops the player on stdin EOF.
}

fn parse_command(line: &str) -> Option<PlayerCommand> {
    if line.is_empty() {
        return Some(PlayerCommand::Toggle);
    }
    let mut parts = line.split_whitespace();
    match parts.next()? {
        "p" => Some(PlayerCommand::Toggle),
        "play" => Some(PlayerCommand::Play),
        "pause" => Some(PlayerCommand::Pause),
        "n" | "next" => Some(PlayerCommand::Next),
        "b" | "back" | "prev" => Some(PlayerCommand::Previous),
        "g" | "go" => {
            let n: usize = parts.next()?.parse().ok()?;
            Some(PlayerCommand::Select(n.checked_sub(1)?))
        }
        "v" | "voice" => {
            let id: u32 = parts.next()?.parse().ok()?;
            Some(PlayerCommand::SetVoice(id))
        }
        "q" | "quit" => Some(PlayerCommand::Quit),
        _ => None,
    }
}

/// Print the segmented article; paragraph breaks become blank lines and
/// sentences are numbered the way `g <n>` addresses them.
fn print_article(units: &[SentenceUnit]) {
    println!();
    let mut position = 0usize;
    for unit in units {
        if unit.is_paragraph_break {
            println!();
        } else {
            position += 1;
            println!("{position:>4}  {}", unit.text);
        }
    }
    println!();
}

fn print_voices(registry: &SpeakerRegistry) {
    if registry.voices().is_empty() {
        println!("No voices available. Is the engine running?");
        return;
    }
    let mut group = "";
    for voice in registry.voices() {
        if voice.group_name != group {
            group = &voice.group_name;
            println!("{group}");
        }
        println!("  {:>4}  {}", voice.id, voice.display_name);
    }
}

fn print_help() {
    println!(
        "commands: p play/pause · n next · b back · g <n> go to sentence · v <id> voice · q quit"
    );
}
