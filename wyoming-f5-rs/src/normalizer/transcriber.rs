//! Phonetic transcription providers for English words.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("G2P failed for '{word}': {reason}")]
    Failed { word: String, reason: String },
}

/// Turns a lower-cased English word into a phonetic transcription.
///
/// Implementations may return a transcription containing a failure marker
/// (`*` or `❓`) instead of an error; the phoneticizer treats both the same.
pub trait PhoneticTranscriber: Send + Sync {
    fn transcribe(&self, word: &str) -> Result<String, TranscriptionError>;
}

/// misaki-rs G2P (American English).
pub struct MisakiTranscriber {
    g2p: misaki_rs::G2P,
}

impl MisakiTranscriber {
    pub fn new() -> Self {
        Self {
            g2p: misaki_rs::G2P::new(misaki_rs::Language::EnglishUS),
        }
    }
}

impl Default for MisakiTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl PhoneticTranscriber for MisakiTranscriber {
    fn transcribe(&self, word: &str) -> Result<String, TranscriptionError> {
        let (phonemes, _tokens) = self.g2p.g2p(word).map_err(|e| TranscriptionError::Failed {
            word: word.to_string(),
            reason: e.to_string(),
        })?;
        Ok(phonemes)
    }
}
