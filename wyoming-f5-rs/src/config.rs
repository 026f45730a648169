//! Configuration management for wyoming-f5-rs.
//!
//! Loads config from YAML files in standard locations; command-line flags
//! are applied on top.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Voice name used when a reference is given on the command line only.
pub const DEFAULT_VOICE_NAME: &str = "espeech-voice";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub uri: String,
    pub streaming: bool,
    pub auto_punctuation: String,
    pub samples_per_chunk: usize,
    pub min_flush_chars: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            uri: "tcp://0.0.0.0:10206".into(),
            streaming: false,
            auto_punctuation: ".?!".into(),
            samples_per_chunk: 1024,
            min_flush_chars: crate::buffer::DEFAULT_MIN_CHARS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub endpoint: String,
    pub nfe_step: u32,
    pub speed: f32,
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:7860".into(),
            nfe_step: 7,
            speed: 1.0,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    pub name: String,
    pub ref_audio: PathBuf,
    pub ref_text: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProgramConfig {
    pub name: String,
    pub description: String,
    pub attribution_name: String,
    pub attribution_url: String,
    pub languages: Vec<String>,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            name: "f5-tts-wyoming".into(),
            description: "F5-TTS with Russian text normalization".into(),
            attribution_name: "ESpeech".into(),
            attribution_url: "https://huggingface.co/ESpeech/ESpeech-TTS-1_RL-V2".into(),
            languages: vec!["ru-Ru".into()],
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub voices: Vec<VoiceConfig>,
    pub program: ProgramConfig,
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub uri: Option<String>,
    pub streaming: bool,
    pub auto_punctuation: Option<String>,
    pub samples_per_chunk: Option<usize>,
    pub min_flush_chars: Option<usize>,
    pub ref_audio: Option<PathBuf>,
    pub ref_text: Option<String>,
    pub voice_name: Option<String>,
    pub nfe_step: Option<u32>,
    pub speed: Option<f32>,
    pub endpoint: Option<String>,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/wyoming-f5/config.yaml
    /// 3. /etc/wyoming-f5/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/wyoming-f5/config.yaml")),
                Some(PathBuf::from("/etc/wyoming-f5/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        let server = &mut self.server;
        if let Some(uri) = overrides.uri {
            server.uri = uri;
        }
        server.streaming |= overrides.streaming;
        if let Some(punct) = overrides.auto_punctuation {
            server.auto_punctuation = punct;
        }
        if let Some(n) = overrides.samples_per_chunk {
            server.samples_per_chunk = n;
        }
        if let Some(n) = overrides.min_flush_chars {
            server.min_flush_chars = n;
        }

        let engine = &mut self.engine;
        if let Some(endpoint) = overrides.endpoint {
            engine.endpoint = endpoint;
        }
        if let Some(steps) = overrides.nfe_step {
            engine.nfe_step = steps;
        }
        if let Some(speed) = overrides.speed {
            engine.speed = speed;
        }

        // A voice given on the command line becomes the default voice.
        if let (Some(ref_audio), Some(ref_text)) = (overrides.ref_audio, overrides.ref_text) {
            let name = overrides
                .voice_name
                .unwrap_or_else(|| DEFAULT_VOICE_NAME.to_string());
            self.voices.retain(|v| v.name != name);
            self.voices.insert(
                0,
                VoiceConfig {
                    name,
                    ref_audio,
                    ref_text,
                    description: None,
                },
            );
        }
    }
}
