use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use bytes::Bytes;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use voice_intake::ClientConfig;
use voice_intake::core::audio::{
    AudioBlockCallback, AudioPlayer, CapturePipeline, CpalMicrophone, CpalSpeaker,
    MicrophoneStream,
};
use voice_intake::core::realtime::{RealtimeSession, RecordUpdateCallback, StatusCallback};
use voice_intake::core::record::VehicleRecord;

/// Voice intake - fill in a vehicle record by talking
#[derive(Parser, Debug)]
#[command(name = "voice-intake")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// What the record describes, used in the session instructions
    #[arg(short = 'd', long = "description")]
    description: Option<String>,
}

enum Command {
    Mute(bool),
    Load(PathBuf),
    Quit,
    Unknown(String),
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        Some(match verb {
            "mute" => Command::Mute(true),
            "unmute" => Command::Mute(false),
            "load" if !rest.trim().is_empty() => Command::Load(PathBuf::from(rest.trim())),
            "quit" | "exit" => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        })
    }
}

fn status_printer() -> StatusCallback {
    Arc::new(|message: String| {
        Box::pin(async move {
            println!("[status] {message}");
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    })
}

fn record_printer() -> RecordUpdateCallback {
    Arc::new(|record: VehicleRecord| {
        Box::pin(async move {
            match serde_json::to_string_pretty(&record) {
                Ok(json) => println!("[record]\n{json}"),
                Err(e) => tracing::warn!(error = %e, "Failed to render record"),
            }
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    })
}

async fn load_record(session: &RealtimeSession, path: &PathBuf) -> anyhow::Result<()> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let record: VehicleRecord = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a vehicle record", path.display()))?;
    session.update_model(&record).await?;
    info!(path = %path.display(), "Record context sent");
    Ok(())
}

async fn run_commands(session: &RealtimeSession, microphone: &MicrophoneStream) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => return,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to read stdin");
                        return;
                    }
                };
                match Command::parse(&line) {
                    Some(Command::Mute(muted)) => {
                        microphone.set_mute(muted);
                        println!("[status] {}", if muted { "Muted" } else { "Unmuted" });
                    }
                    Some(Command::Load(path)) => {
                        if let Err(e) = load_record(session, &path).await {
                            println!("[status] {e:#}");
                        }
                    }
                    Some(Command::Quit) => return,
                    Some(Command::Unknown(line)) => {
                        println!("[status] Unknown command '{line}' (mute, unmute, load <file>, quit)");
                    }
                    None => {}
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Must be installed before the first TLS connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            ClientConfig::from_file(path)?
        }
        None => ClientConfig::from_env()?,
    };
    let description = cli
        .description
        .clone()
        .unwrap_or_else(|| config.description.clone());

    let speaker = CpalSpeaker::open(config.playback_sample_rate)?;
    let player = Arc::new(AudioPlayer::new(
        Arc::new(speaker),
        config.playback_sample_rate,
    ));
    let session = Arc::new(RealtimeSession::new(config.realtime_settings(), player));

    session
        .start_session(&description, record_printer(), status_printer())
        .await?;

    let sender = session.clone();
    let on_audio_block: AudioBlockCallback = Arc::new(move |block: Bytes| {
        let sender = sender.clone();
        Box::pin(async move {
            if let Err(e) = sender.send_audio(block).await {
                tracing::trace!(error = %e, "Audio block not sent");
            }
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });

    let microphone = match CapturePipeline::start(&CpalMicrophone, &config.capture, on_audio_block)
    {
        Ok(microphone) => microphone,
        Err(e) => {
            session.dispose().await;
            return Err(e.into());
        }
    };

    println!("[status] Listening. Commands: mute, unmute, load <file>, quit");
    run_commands(&session, &microphone).await;

    microphone.dispose();
    session.dispose().await;
    info!("Shutdown complete");

    Ok(())
}
