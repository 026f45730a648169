//! wyoming-f5-rs: Wyoming protocol text-to-speech server for F5-TTS.

mod audio;
mod buffer;
mod config;
mod engine;
mod error;
mod handler;
mod normalizer;
mod protocol;
mod sentences;
mod server;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, Overrides};
use crate::engine::f5_http::F5HttpEngine;
use crate::engine::Synthesizer;
use crate::handler::HandlerSettings;
use crate::normalizer::transcriber::MisakiTranscriber;
use crate::normalizer::TextNormalizer;
use crate::protocol::{Attribution, Info, TtsProgram, TtsVoice};
use crate::server::{ListenAddr, ServerState};

#[derive(Parser, Debug)]
#[command(
    name = "wyoming-f5-rs",
    version,
    about = "Wyoming text-to-speech server for F5-TTS"
)]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen URI (tcp://host:port or unix://path)
    #[arg(long)]
    uri: Option<String>,

    /// Accept synthesize-start/chunk/stop streams
    #[arg(long)]
    streaming: bool,

    /// Terminators appended to text that lacks one (empty disables)
    #[arg(long)]
    auto_punctuation: Option<String>,

    /// Samples per audio-chunk event
    #[arg(long)]
    samples_per_chunk: Option<usize>,

    /// Buffer sentences until this many characters are queued
    #[arg(long)]
    min_flush_chars: Option<usize>,

    /// Reference WAV for the command-line voice
    #[arg(long, requires = "ref_text")]
    ref_audio: Option<PathBuf>,

    /// Transcript of the reference WAV
    #[arg(long, requires = "ref_audio")]
    ref_text: Option<String>,

    /// Name of the command-line voice
    #[arg(long)]
    voice_name: Option<String>,

    /// Number of flow-matching steps
    #[arg(long)]
    nfe_step: Option<u32>,

    /// Speech speed multiplier
    #[arg(long)]
    speed: Option<f32>,

    /// F5 inference server base URL
    #[arg(long)]
    endpoint: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            uri: self.uri.clone(),
            streaming: self.streaming,
            auto_punctuation: self.auto_punctuation.clone(),
            samples_per_chunk: self.samples_per_chunk,
            min_flush_chars: self.min_flush_chars,
            ref_audio: self.ref_audio.clone(),
            ref_text: self.ref_text.clone(),
            voice_name: self.voice_name.clone(),
            nfe_step: self.nfe_step,
            speed: self.speed,
            endpoint: self.endpoint.clone(),
        }
    }
}

/// Capability description sent in reply to `describe`.
fn build_info(config: &Config) -> Info {
    let program = &config.program;
    let attribution = Attribution {
        name: program.attribution_name.clone(),
        url: program.attribution_url.clone(),
    };
    let version = Some(env!("CARGO_PKG_VERSION").to_string());

    let voices = config
        .voices
        .iter()
        .map(|voice| TtsVoice {
            name: voice.name.clone(),
            description: Some(
                voice
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("F5-TTS voice '{}'", voice.name)),
            ),
            attribution: attribution.clone(),
            installed: true,
            version: version.clone(),
            languages: program.languages.clone(),
        })
        .collect();

    Info {
        tts: vec![TtsProgram {
            name: program.name.clone(),
            description: Some(program.description.clone()),
            attribution,
            installed: true,
            version,
            voices,
            supports_synthesize_streaming: config.server.streaming,
        }],
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (keep HTTP client internals quiet)
    let filter = if args.debug {
        EnvFilter::new("debug,reqwest=info,hyper=info")
    } else {
        EnvFilter::new("info,reqwest=warn,hyper=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("wyoming-f5-rs {} starting", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(args.config.as_deref());
    config.apply(args.overrides());
    let addr: ListenAddr = config.server.uri.parse()?;
    info!(
        "Streaming: {}, auto-punctuation: '{}', samples per chunk: {}",
        config.server.streaming, config.server.auto_punctuation, config.server.samples_per_chunk
    );

    // Reference audio is read from disk, keep it off the event loop
    info!("Loading voices...");
    let engine = tokio::task::spawn_blocking({
        let engine_config = config.engine.clone();
        let voices = config.voices.clone();
        let runtime = tokio::runtime::Handle::current();
        move || F5HttpEngine::new(&engine_config, &voices, runtime)
    })
    .await??;

    let state = ServerState {
        info: Arc::new(build_info(&config)),
        settings: Arc::new(HandlerSettings::from(&config.server)),
        normalizer: Arc::new(TextNormalizer::new(Box::new(MisakiTranscriber::new()))),
        synthesizer: Synthesizer::new(Arc::new(engine)),
    };

    tokio::select! {
        result = server::serve(&addr, state) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    if let ListenAddr::Unix(path) = &addr {
        std::fs::remove_file(path).ok();
    }
    Ok(())
}
