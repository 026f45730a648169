//! Speech synthesis engines and the worker that runs them off the event loop.

pub mod f5_http;

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Inference request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Inference server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid audio: {0}")]
    Audio(#[from] hound::Error),

    #[error("Failed to load reference for voice '{voice}': {reason}")]
    Reference { voice: String, reason: String },

    #[error("No voices configured")]
    NoVoices,
}

/// Waveform produced by an engine.
#[derive(Debug, Clone)]
pub struct Synthesized {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// A text-to-speech engine.
///
/// `synthesize` is blocking and may take seconds; callers go through
/// [`Synthesizer`] which moves it onto the blocking pool.
pub trait SpeechEngine: Send + Sync {
    fn synthesize(&self, text: &str, voice: &str) -> Result<Synthesized, EngineError>;

    /// Voice names in configuration order; the first one is the fallback.
    fn voices(&self) -> Vec<String>;
}

/// Shared handle to the engine with one inference in flight process-wide.
#[derive(Clone)]
pub struct Synthesizer {
    engine: Arc<dyn SpeechEngine>,
    inference_lock: Arc<AsyncMutex<()>>,
}

impl Synthesizer {
    pub fn new(engine: Arc<dyn SpeechEngine>) -> Self {
        Self {
            engine,
            inference_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Pick the voice to use for a request.
    ///
    /// Unknown or missing names fall back to the first voice; `None` only
    /// when the engine has no voices at all.
    pub fn resolve_voice(&self, requested: Option<&str>) -> Option<String> {
        let voices = self.engine.voices();
        match requested {
            Some(name) if voices.iter().any(|v| v == name) => Some(name.to_string()),
            Some(name) => {
                let fallback = voices.into_iter().next()?;
                warn!("Voice '{name}' not found, using '{fallback}'");
                Some(fallback)
            }
            None => voices.into_iter().next(),
        }
    }

    /// Run inference on the blocking pool and wait for it.
    pub async fn synthesize(
        &self,
        text: String,
        voice: String,
    ) -> Result<Result<Synthesized, EngineError>, tokio::task::JoinError> {
        let _guard = self.inference_lock.lock().await;
        let engine = self.engine.clone();

        tokio::task::spawn_blocking(move || {
            let t0 = Instant::now();
            let result = engine.synthesize(&text, &voice);
            if let Ok(audio) = &result {
                debug!(
                    "Synthesized {} samples ({:.1}s) in {}ms",
                    audio.samples.len(),
                    audio.samples.len() as f32 / audio.sample_rate.max(1) as f32,
                    t0.elapsed().as_millis()
                );
            }
            result
        })
        .await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Engine that returns a fixed number of samples per call and records
    /// every request.
    pub struct FakeEngine {
        pub voices: Vec<String>,
        pub samples_per_call: usize,
        pub sample_rate: u32,
        pub fail: AtomicBool,
        pub calls: Mutex<Vec<(String, String)>>,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    impl FakeEngine {
        pub fn new(samples_per_call: usize) -> Self {
            Self {
                voices: vec!["espeech-voice".into(), "second".into()],
                samples_per_call,
                sample_rate: 24000,
                fail: AtomicBool::new(false),
                calls: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        pub fn texts(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
        }
    }

    impl SpeechEngine for FakeEngine {
        fn synthesize(&self, text: &str, voice: &str) -> Result<Synthesized, EngineError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            self.calls
                .lock()
                .unwrap()
                .push((text.to_string(), voice.to_string()));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail.load(Ordering::SeqCst) {
                return Err(EngineError::Status {
                    status: 500,
                    body: "CUDA out of memory".into(),
                });
            }
            Ok(Synthesized {
                samples: vec![0.5; self.samples_per_call],
                sample_rate: self.sample_rate,
            })
        }

        fn voices(&self) -> Vec<String> {
            self.voices.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::FakeEngine;
    use super::*;

    #[test]
    fn resolves_known_unknown_and_missing_voices() {
        let synth = Synthesizer::new(Arc::new(FakeEngine::new(1)));
        assert_eq!(synth.resolve_voice(Some("second")).as_deref(), Some("second"));
        assert_eq!(
            synth.resolve_voice(Some("nope")).as_deref(),
            Some("espeech-voice")
        );
        assert_eq!(synth.resolve_voice(None).as_deref(), Some("espeech-voice"));
    }

    #[test]
    fn no_voices_resolves_to_none() {
        let mut engine = FakeEngine::new(1);
        engine.voices.clear();
        let synth = Synthesizer::new(Arc::new(engine));
        assert_eq!(synth.resolve_voice(Some("any")), None);
        assert_eq!(synth.resolve_voice(None), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn inference_is_serialized_across_callers() {
        let engine = Arc::new(FakeEngine::new(10));
        let synth = Synthesizer::new(engine.clone());

        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let synth = synth.clone();
                tokio::spawn(async move { synth.synthesize(format!("текст {i}"), "espeech-voice".into()).await })
            })
            .collect();
        for task in tasks {
            let audio = task.await.unwrap().unwrap().unwrap();
            assert_eq!(audio.samples.len(), 10);
        }

        assert_eq!(engine.calls.lock().unwrap().len(), 4);
        assert_eq!(engine.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
