//! F5-TTS engine backed by an HTTP inference server.
//!
//! Each voice is a reference recording plus its transcript. Both are loaded
//! once at start-up and sent along with every request, so the inference
//! server stays stateless.

use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use base64::Engine as _;
use reqwest::Client;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{info, warn};

use super::{EngineError, SpeechEngine, Synthesized};
use crate::audio;
use crate::config::{EngineConfig, VoiceConfig};

#[derive(Debug, Clone)]
pub struct VoiceReference {
    /// Base64 of the reference WAV file.
    pub audio: String,
    /// Transcript of the reference, already in the form F5 expects.
    pub text: String,
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    gen_text: &'a str,
    ref_text: &'a str,
    ref_audio: &'a str,
    nfe_step: u32,
    speed: f32,
}

pub struct F5HttpEngine {
    client: Client,
    runtime: Handle,
    url: String,
    nfe_step: u32,
    speed: f32,
    voices: Vec<(String, VoiceReference)>,
}

impl F5HttpEngine {
    /// Load every voice reference. Fails if there are none or any is unreadable.
    pub fn new(
        config: &EngineConfig,
        voices: &[VoiceConfig],
        runtime: Handle,
    ) -> Result<Self, EngineError> {
        if voices.is_empty() {
            return Err(EngineError::NoVoices);
        }

        let mut references = Vec::with_capacity(voices.len());
        for voice in voices {
            info!("Loading voice '{}' from {}", voice.name, voice.ref_audio.display());
            references.push((voice.name.clone(), load_reference(voice)?));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        info!(
            "F5 engine ready: {} (nfe_step={}, speed={}, voices={})",
            config.endpoint,
            config.nfe_step,
            config.speed,
            references.len()
        );

        Ok(Self {
            client,
            runtime,
            url: format!("{}/synthesize", config.endpoint.trim_end_matches('/')),
            nfe_step: config.nfe_step,
            speed: config.speed,
            voices: references,
        })
    }

    /// Reference for `name`, or the first voice when the name is unknown.
    fn reference(&self, name: &str) -> &VoiceReference {
        if let Some((_, reference)) = self.voices.iter().find(|(n, _)| n == name) {
            return reference;
        }
        let (fallback, reference) = &self.voices[0];
        warn!("Voice '{name}' not found, using fallback voice '{fallback}'");
        reference
    }

    async fn request(&self, text: &str, reference: &VoiceReference) -> Result<Vec<u8>, EngineError> {
        let body = SynthesisRequest {
            gen_text: text,
            ref_text: &reference.text,
            ref_audio: &reference.audio,
            nfe_step: self.nfe_step,
            speed: self.speed,
        };

        let resp = self.client.post(&self.url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

impl SpeechEngine for F5HttpEngine {
    fn synthesize(&self, text: &str, voice: &str) -> Result<Synthesized, EngineError> {
        let reference = self.reference(voice);
        let wav = self.runtime.block_on(self.request(text, reference))?;
        let (samples, sample_rate) = audio::decode_wav(&wav)?;
        Ok(Synthesized {
            samples,
            sample_rate,
        })
    }

    fn voices(&self) -> Vec<String> {
        self.voices.iter().map(|(name, _)| name.clone()).collect()
    }
}

fn load_reference(voice: &VoiceConfig) -> Result<VoiceReference, EngineError> {
    let reference_error = |reason: String| EngineError::Reference {
        voice: voice.name.clone(),
        reason,
    };

    let bytes = read_file(&voice.ref_audio).map_err(reference_error)?;
    let reader = hound::WavReader::new(Cursor::new(&bytes))
        .map_err(|e| reference_error(format!("not a WAV file: {e}")))?;
    let spec = reader.spec();
    let seconds = reader.duration() as f32 / spec.sample_rate.max(1) as f32;
    if seconds > 15.0 {
        warn!(
            "Reference for '{}' is {seconds:.1}s long; F5 works best with under 12s",
            voice.name
        );
    }

    let text = prepare_ref_text(&voice.ref_text);
    if text.trim().is_empty() {
        return Err(reference_error("reference text is empty".into()));
    }

    Ok(VoiceReference {
        audio: base64::engine::general_purpose::STANDARD.encode(&bytes),
        text,
    })
}

fn read_file(path: &Path) -> Result<Vec<u8>, String> {
    std::fs::read(path).map_err(|e| format!("cannot read {}: {e}", path.display()))
}

/// Terminate the reference transcript with ". " so generated speech does not
/// run on from the reference.
pub fn prepare_ref_text(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() || text.ends_with('。') {
        return text.to_string();
    }
    if text.ends_with('.') {
        format!("{text} ")
    } else {
        format!("{text}. ")
    }
}
