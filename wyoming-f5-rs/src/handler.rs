//! Per-connection event handler.
//!
//! Owns the session state machine: single-shot `synthesize` requests and
//! streamed `synthesize-start` / `-chunk` / `-stop` sequences both end up as
//! buffered, normalized sentences that are synthesized and sent back as
//! audio events.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::audio::{self, CHANNELS, SAMPLE_WIDTH};
use crate::buffer::SentenceBuffer;
use crate::config::ServerConfig;
use crate::engine::Synthesizer;
use crate::error::HandlerError;
use crate::normalizer::TextNormalizer;
use crate::protocol::{
    AudioChunk, AudioStart, AudioStop, Describe, ErrorEvent, Event, Eventable, Info, Synthesize,
    SynthesizeChunk, SynthesizeStart, SynthesizeStop, SynthesizeStopped,
};
use crate::sentences::SentenceBoundaryDetector;

#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub streaming: bool,
    pub auto_punctuation: String,
    pub samples_per_chunk: usize,
    pub min_flush_chars: usize,
}

impl From<&ServerConfig> for HandlerSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            streaming: config.streaming,
            auto_punctuation: config.auto_punctuation.clone(),
            samples_per_chunk: config.samples_per_chunk,
            min_flush_chars: config.min_flush_chars,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Idle,
    Single,
    Streaming,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Single => write!(f, "SINGLE"),
            Self::Streaming => write!(f, "STREAMING"),
        }
    }
}

struct Session {
    mode: SessionMode,
    voice: Option<String>,
    detector: SentenceBoundaryDetector,
    buffer: SentenceBuffer,
    audio_started: bool,
}

impl Session {
    fn new(mode: SessionMode, voice: Option<String>, min_chars: usize) -> Self {
        Self {
            mode,
            voice,
            detector: SentenceBoundaryDetector::new(),
            buffer: SentenceBuffer::new(min_chars),
            audio_started: false,
        }
    }
}

pub struct EventHandler {
    info: Arc<Info>,
    settings: Arc<HandlerSettings>,
    normalizer: Arc<TextNormalizer>,
    synthesizer: Synthesizer,
    events: mpsc::Sender<Event>,
    session: Session,
}

impl EventHandler {
    pub fn new(
        info: Arc<Info>,
        settings: Arc<HandlerSettings>,
        normalizer: Arc<TextNormalizer>,
        synthesizer: Synthesizer,
        events: mpsc::Sender<Event>,
    ) -> Self {
        let session = Session::new(SessionMode::Idle, None, settings.min_flush_chars);
        Self {
            info,
            settings,
            normalizer,
            synthesizer,
            events,
            session,
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.session.mode
    }

    /// Handle one client event. Returns `false` when the connection should close.
    pub async fn handle_event(&mut self, event: Event) -> bool {
        let event_type = event.event_type.clone();
        match self.dispatch(event).await {
            Ok(()) => true,
            Err(HandlerError::Disconnected) => {
                debug!("Client went away while handling '{event_type}'");
                false
            }
            Err(err) => {
                error!("Error handling '{event_type}' in {} session: {err}", self.session.mode);
                self.reset();
                let report = ErrorEvent {
                    text: err.to_string(),
                    code: Some(err.kind().to_string()),
                };
                self.send(report.to_event()).await.is_ok()
            }
        }
    }

    /// Flush what a streaming client left behind before it disconnected.
    pub async fn on_disconnect(&mut self) {
        if self.session.mode != SessionMode::Streaming {
            return;
        }
        info!("Client disconnected mid-stream, flushing pending text");
        if let Err(e) = self.finish_stream().await {
            debug!("Dropped output after disconnect: {e}");
        }
        self.reset();
    }

    async fn dispatch(&mut self, event: Event) -> Result<(), HandlerError> {
        if Describe::is_type(&event) {
            return self.send(self.info.to_event()).await;
        }
        if Synthesize::is_type(&event) {
            return self.on_synthesize(Synthesize::from_event(&event)?).await;
        }

        if !self.settings.streaming {
            debug!("Streaming disabled, ignoring '{}'", event.event_type);
            return Ok(());
        }

        if SynthesizeStart::is_type(&event) {
            self.on_start(SynthesizeStart::from_event(&event)?);
        } else if SynthesizeChunk::is_type(&event) {
            self.on_chunk(SynthesizeChunk::from_event(&event)?).await?;
        } else if SynthesizeStop::is_type(&event) {
            self.on_stop().await?;
        } else {
            debug!("Unhandled event: {}", event.event_type);
        }
        Ok(())
    }

    async fn on_synthesize(&mut self, request: Synthesize) -> Result<(), HandlerError> {
        if self.session.mode == SessionMode::Streaming {
            // Streaming clients send the full text again as a plain synthesize.
            debug!("Ignoring synthesize during an active stream");
            return Ok(());
        }

        let voice = request.voice.and_then(|v| v.name);
        self.session = Session::new(SessionMode::Single, voice, self.settings.min_flush_chars);
        info!("Synthesize: '{}'", preview(&request.text));

        let mut sentences = self.session.detector.add_chunk(&request.text);
        sentences.push(self.session.detector.finish());
        for sentence in sentences {
            if let Some(text) = self.session.buffer.accept(&sentence) {
                self.speak(&text).await?;
            }
        }
        if let Some(text) = self.session.buffer.force_flush() {
            self.speak(&text).await?;
        }

        self.send(AudioStop {}.to_event()).await?;
        self.reset();
        Ok(())
    }

    fn on_start(&mut self, start: SynthesizeStart) {
        if self.session.mode == SessionMode::Streaming {
            warn!("New stream started before the previous one stopped, discarding it");
        }
        let voice = start.voice.and_then(|v| v.name);
        info!("Stream started (voice: {})", voice.as_deref().unwrap_or("default"));
        self.session = Session::new(SessionMode::Streaming, voice, self.settings.min_flush_chars);
    }

    async fn on_chunk(&mut self, chunk: SynthesizeChunk) -> Result<(), HandlerError> {
        if self.session.mode != SessionMode::Streaming {
            debug!("Ignoring chunk outside of a stream");
            return Ok(());
        }
        for sentence in self.session.detector.add_chunk(&chunk.text) {
            if let Some(text) = self.session.buffer.accept(&sentence) {
                self.speak(&text).await?;
            }
        }
        Ok(())
    }

    async fn on_stop(&mut self) -> Result<(), HandlerError> {
        if self.session.mode != SessionMode::Streaming {
            debug!("Ignoring stop outside of a stream");
            return Ok(());
        }
        self.finish_stream().await?;
        if self.session.audio_started {
            self.send(AudioStop {}.to_event()).await?;
        }
        self.send(SynthesizeStopped {}.to_event()).await?;
        info!("Stream finished");
        self.reset();
        Ok(())
    }

    async fn finish_stream(&mut self) -> Result<(), HandlerError> {
        let tail = self.session.detector.finish();
        if let Some(text) = self.session.buffer.accept(&tail) {
            self.speak(&text).await?;
        }
        if let Some(text) = self.session.buffer.force_flush() {
            self.speak(&text).await?;
        }
        Ok(())
    }

    /// Normalize, synthesize and send one flushed piece of text.
    async fn speak(&mut self, text: &str) -> Result<(), HandlerError> {
        let normalized = self.normalizer.normalize(text);
        let normalized = add_terminal_punctuation(&normalized, &self.settings.auto_punctuation);
        if normalized.is_empty() {
            debug!("Nothing speakable in '{}'", preview(text));
            return Ok(());
        }

        let Some(voice) = self.synthesizer.resolve_voice(self.session.voice.as_deref()) else {
            warn!("No voices available, skipping '{}'", preview(&normalized));
            return Ok(());
        };

        debug!("Speaking with '{voice}': '{}'", preview(&normalized));
        let audio = self.synthesizer.synthesize(normalized, voice).await??;

        if !self.session.audio_started {
            let start = AudioStart {
                rate: audio.sample_rate,
                width: SAMPLE_WIDTH,
                channels: CHANNELS,
            };
            self.send(start.to_event()).await?;
            self.session.audio_started = true;
        }

        let pcm = audio::encode_pcm16(&audio.samples);
        for bytes in pcm.chunks(audio::bytes_per_chunk(self.settings.samples_per_chunk)) {
            let chunk = AudioChunk {
                rate: audio.sample_rate,
                width: SAMPLE_WIDTH,
                channels: CHANNELS,
                audio: bytes.to_vec(),
            };
            self.send(chunk.to_event()).await?;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.session = Session::new(SessionMode::Idle, None, self.settings.min_flush_chars);
    }

    async fn send(&self, event: Event) -> Result<(), HandlerError> {
        self.events
            .send(event)
            .await
            .map_err(|_| HandlerError::Disconnected)
    }
}

/// Append the first allowed terminator when `text` does not already end with one.
fn add_terminal_punctuation(text: &str, terminators: &str) -> String {
    let Some(default) = terminators.chars().next() else {
        return text.to_string();
    };
    match text.chars().last() {
        None => String::new(),
        Some(last) if terminators.contains(last) => text.to_string(),
        Some(_) => format!("{text}{default}"),
    }
}

fn preview(text: &str) -> String {
    let mut preview: String = text.chars().take(60).collect();
    if text.chars().count() > 60 {
        preview.push_str("...");
    }
    preview
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::*;
    use crate::engine::testing::FakeEngine;
    use crate::normalizer::transcriber::testing::OfflineTranscriber;

    struct Harness {
        handler: EventHandler,
        events: mpsc::Receiver<Event>,
        engine: Arc<FakeEngine>,
    }

    impl Harness {
        fn new(streaming: bool, samples_per_call: usize) -> Self {
            Self::with_engine(streaming, FakeEngine::new(samples_per_call))
        }

        fn with_engine(streaming: bool, engine: FakeEngine) -> Self {
            let engine = Arc::new(engine);
            let settings = HandlerSettings {
                streaming,
                auto_punctuation: ".?!".into(),
                samples_per_chunk: 4,
                min_flush_chars: 15,
            };
            let info = Info::default();
            let (tx, rx) = mpsc::channel(1024);
            let handler = EventHandler::new(
                Arc::new(info),
                Arc::new(settings),
                Arc::new(TextNormalizer::new(Box::new(OfflineTranscriber))),
                Synthesizer::new(engine.clone()),
                tx,
            );
            Self {
                handler,
                events: rx,
                engine,
            }
        }

        async fn send(&mut self, event: Event) {
            assert!(self.handler.handle_event(event).await);
        }

        fn drain(&mut self) -> Vec<Event> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }
    }

    fn types(events: &[Event]) -> Vec<&str> {
        events.iter().map(|e| e.event_type.as_str()).collect()
    }

    fn synthesize(text: &str) -> Event {
        Synthesize {
            text: text.into(),
            voice: None,
        }
        .to_event()
    }

    fn chunk(text: &str) -> Event {
        SynthesizeChunk { text: text.into() }.to_event()
    }

    #[test]
    fn auto_punctuation() {
        assert_eq!(add_terminal_punctuation("Привет", ".?!"), "Привет.");
        assert_eq!(add_terminal_punctuation("Привет?", ".?!"), "Привет?");
        assert_eq!(add_terminal_punctuation("Привет,", ".?!"), "Привет,.");
        assert_eq!(add_terminal_punctuation("Привет", ""), "Привет");
        assert_eq!(add_terminal_punctuation("", ".?!"), "");
    }

    #[tokio::test]
    async fn describe_returns_info_without_touching_session() {
        let mut h = Harness::new(true, 8);
        h.send(SynthesizeStart::default().to_event()).await;
        h.send(Describe {}.to_event()).await;
        assert_eq!(types(&h.drain()), vec!["info"]);
        assert_eq!(h.handler.mode(), SessionMode::Streaming);
    }

    #[tokio::test]
    async fn empty_synthesize_sends_only_audio_stop() {
        let mut h = Harness::new(false, 8);
        h.send(synthesize("")).await;
        h.send(synthesize("😀 ###")).await;
        assert_eq!(types(&h.drain()), vec!["audio-stop", "audio-stop"]);
        assert!(h.engine.texts().is_empty());
    }

    #[tokio::test]
    async fn single_shot_produces_start_chunks_stop() {
        // 10 samples at 4 samples per chunk -> 3 chunks
        let mut h = Harness::new(false, 10);
        h.send(synthesize("Привет")).await;

        let events = h.drain();
        assert_eq!(
            types(&events),
            vec!["audio-start", "audio-chunk", "audio-chunk", "audio-chunk", "audio-stop"]
        );
        assert_eq!(events[0].data["rate"], json!(24000));
        assert_eq!(events[0].data["width"], json!(2));
        assert_eq!(events[0].data["channels"], json!(1));

        let sizes: Vec<usize> = events[1..4]
            .iter()
            .map(|e| e.payload.as_ref().map_or(0, Vec::len))
            .collect();
        assert_eq!(sizes, vec![8, 8, 4]);

        assert_eq!(h.engine.texts(), vec!["Привет."]);
        assert_eq!(h.handler.mode(), SessionMode::Idle);
    }

    #[tokio::test]
    async fn single_shot_merges_short_sentences() {
        let mut h = Harness::new(false, 2);
        h.send(synthesize("Да. Нет. Может быть, завтра. Ок")).await;
        assert_eq!(h.engine.texts(), vec!["Да. Нет. Может быть, завтра.", "Ок."]);

        let events = h.drain();
        let starts = events.iter().filter(|e| AudioStart::is_type(e)).count();
        assert_eq!(starts, 1);
        assert_eq!(types(&events).last(), Some(&"audio-stop"));
    }

    #[tokio::test]
    async fn streaming_flushes_mid_stream_and_finishes_with_stopped() {
        let mut h = Harness::new(true, 4);
        h.send(SynthesizeStart::default().to_event()).await;
        h.send(chunk("Первое длинное предложение. Второе")).await;

        // The first sentence crossed the threshold and is already audible.
        assert_eq!(h.engine.texts(), vec!["Первое длинное предложение."]);
        assert_eq!(types(&h.drain()), vec!["audio-start", "audio-chunk"]);

        h.send(chunk(" тоже.")).await;
        h.send(SynthesizeStop {}.to_event()).await;

        assert_eq!(
            h.engine.texts(),
            vec!["Первое длинное предложение.", "Второе тоже."]
        );
        assert_eq!(
            types(&h.drain()),
            vec!["audio-chunk", "audio-stop", "synthesize-stopped"]
        );
        assert_eq!(h.handler.mode(), SessionMode::Idle);
    }

    #[tokio::test]
    async fn stream_without_audio_skips_audio_stop() {
        let mut h = Harness::new(true, 4);
        h.send(SynthesizeStart::default().to_event()).await;
        h.send(chunk("###")).await;
        h.send(SynthesizeStop {}.to_event()).await;
        assert_eq!(types(&h.drain()), vec!["synthesize-stopped"]);
    }

    #[tokio::test]
    async fn synthesize_is_ignored_while_streaming() {
        let mut h = Harness::new(true, 4);
        h.send(SynthesizeStart::default().to_event()).await;
        h.send(chunk("Короткий")).await;
        h.send(synthesize("Короткий")).await;
        assert!(h.drain().is_empty());
        assert!(h.engine.texts().is_empty());

        h.send(SynthesizeStop {}.to_event()).await;
        assert_eq!(h.engine.texts(), vec!["Короткий."]);
    }

    #[tokio::test]
    async fn streaming_events_ignored_when_disabled() {
        let mut h = Harness::new(false, 4);
        h.send(SynthesizeStart::default().to_event()).await;
        h.send(chunk("Привет, как у тебя дела сегодня? ")).await;
        h.send(SynthesizeStop {}.to_event()).await;
        assert!(h.drain().is_empty());
        assert_eq!(h.handler.mode(), SessionMode::Idle);
    }

    #[tokio::test]
    async fn chunk_and_stop_ignored_when_idle() {
        let mut h = Harness::new(true, 4);
        h.send(chunk("Привет, как у тебя дела сегодня? ")).await;
        h.send(SynthesizeStop {}.to_event()).await;
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn new_start_replaces_previous_stream() {
        let mut h = Harness::new(true, 4);
        h.send(SynthesizeStart::default().to_event()).await;
        h.send(chunk("Забытый текст")).await;
        h.send(SynthesizeStart::default().to_event()).await;
        h.send(chunk("Новый")).await;
        h.send(SynthesizeStop {}.to_event()).await;
        assert_eq!(h.engine.texts(), vec!["Новый."]);
    }

    #[tokio::test]
    async fn engine_failure_reports_one_error_and_recovers() {
        let mut h = Harness::new(true, 4);
        h.send(SynthesizeStart::default().to_event()).await;
        h.engine.fail.store(true, Ordering::SeqCst);
        h.send(chunk("Первое длинное предложение. ")).await;

        let events = h.drain();
        assert_eq!(types(&events), vec!["error"]);
        assert_eq!(events[0].data["code"], json!("EngineError"));
        assert!(events[0].data["text"].as_str().unwrap().contains("CUDA"));
        assert_eq!(h.handler.mode(), SessionMode::Idle);

        h.engine.fail.store(false, Ordering::SeqCst);
        h.send(SynthesizeStart::default().to_event()).await;
        h.send(chunk("Снова работаем")).await;
        h.send(SynthesizeStop {}.to_event()).await;
        assert_eq!(
            types(&h.drain()),
            vec!["audio-start", "audio-chunk", "audio-stop", "synthesize-stopped"]
        );
    }

    #[tokio::test]
    async fn malformed_chunk_reports_missing_field() {
        let mut h = Harness::new(true, 4);
        h.send(SynthesizeStart::default().to_event()).await;
        h.send(Event::new(SynthesizeChunk::TYPE)).await;
        let events = h.drain();
        assert_eq!(types(&events), vec!["error"]);
        assert_eq!(events[0].data["code"], json!("ProtocolError"));
    }

    #[tokio::test]
    async fn requested_voice_is_used_and_unknown_falls_back() {
        let mut h = Harness::new(false, 1);
        let mut event = synthesize("Раз");
        event.data.insert("voice".into(), json!({"name": "second"}));
        h.send(event).await;

        let mut event = synthesize("Два");
        event.data.insert("voice".into(), json!({"name": "missing"}));
        h.send(event).await;

        let voices: Vec<String> = h
            .engine
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, v)| v.clone())
            .collect();
        assert_eq!(voices, vec!["second", "espeech-voice"]);
    }

    #[tokio::test]
    async fn no_voices_skips_synthesis() {
        let mut engine = FakeEngine::new(4);
        engine.voices.clear();
        let mut h = Harness::with_engine(false, engine);
        h.send(synthesize("Привет")).await;
        assert_eq!(types(&h.drain()), vec!["audio-stop"]);
        assert!(h.engine.texts().is_empty());
    }

    #[tokio::test]
    async fn disconnect_mid_stream_flushes_pending_text() {
        let mut h = Harness::new(true, 4);
        h.send(SynthesizeStart::default().to_event()).await;
        h.send(chunk("Недосказанное")).await;
        h.handler.on_disconnect().await;
        assert_eq!(h.engine.texts(), vec!["Недосказанное."]);
        assert_eq!(h.handler.mode(), SessionMode::Idle);
    }

    #[tokio::test]
    async fn closed_channel_ends_the_connection() {
        let mut h = Harness::new(false, 4);
        h.events.close();
        assert!(!h.handler.handle_event(synthesize("Привет")).await);
    }
}
