//! Wyoming event framing.
//!
//! An event on the wire is a single JSON header line, optionally followed by
//! `data_length` bytes of JSON data and `payload_length` bytes of binary
//! payload.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;

/// Protocol version written into every header.
pub const PROTOCOL_VERSION: &str = "1.5.2";

/// Longest header line we accept, newline included.
pub const MAX_HEADER_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_type: String,
    pub data: Map<String, Value>,
    pub payload: Option<Vec<u8>>,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: Map::new(),
            payload: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_length: Option<usize>,
}

/// Read the next event. `Ok(None)` means the peer closed the stream cleanly.
pub async fn read_event<R>(reader: &mut R) -> Result<Option<Event>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = (&mut *reader)
            .take(MAX_HEADER_BYTES as u64)
            .read_until(b'\n', &mut line)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if line.last() != Some(&b'\n') {
            if n >= MAX_HEADER_BYTES {
                return Err(ProtocolError::HeaderTooLong {
                    limit: MAX_HEADER_BYTES,
                });
            }
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        if !line.trim_ascii().is_empty() {
            break;
        }
    }

    let header: Header = serde_json::from_slice(&line)?;
    let mut data = header.data.unwrap_or_default();

    if let Some(len) = header.data_length.filter(|&len| len > 0) {
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        let extra: Map<String, Value> = serde_json::from_slice(&buf)?;
        data.extend(extra);
    }

    let payload = match header.payload_length.filter(|&len| len > 0) {
        Some(len) => {
            let mut buf = vec![0u8; len];
            reader.read_exact(&mut buf).await?;
            Some(buf)
        }
        None => None,
    };

    Ok(Some(Event {
        event_type: header.event_type,
        data,
        payload,
    }))
}

/// Write one event and flush it.
pub async fn write_event<W>(writer: &mut W, event: &Event) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let data = if event.data.is_empty() {
        None
    } else {
        Some(serde_json::to_vec(&event.data)?)
    };
    let payload = event.payload.as_deref().filter(|p| !p.is_empty());

    let header = Header {
        event_type: event.event_type.clone(),
        version: Some(PROTOCOL_VERSION.to_string()),
        data: None,
        data_length: data.as_ref().map(Vec::len),
        payload_length: payload.map(<[u8]>::len),
    };
    let mut line = serde_json::to_vec(&header)?;
    line.push(b'\n');

    writer.write_all(&line).await?;
    if let Some(data) = &data {
        writer.write_all(data).await?;
    }
    if let Some(payload) = payload {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// A typed event with a fixed wire `type`.
pub trait Eventable: Serialize + DeserializeOwned {
    const TYPE: &'static str;
    /// Data fields that must be present when decoding.
    const REQUIRED: &'static [&'static str] = &[];

    fn is_type(event: &Event) -> bool {
        event.event_type == Self::TYPE
    }

    fn to_event(&self) -> Event {
        let data = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Event {
            event_type: Self::TYPE.to_string(),
            data,
            payload: None,
        }
    }

    fn from_event(event: &Event) -> Result<Self, ProtocolError> {
        if let Some(field) = Self::REQUIRED
            .iter()
            .copied()
            .find(|field| !event.data.contains_key(*field))
        {
            return Err(ProtocolError::MissingField {
                event_type: event.event_type.clone(),
                field,
            });
        }
        Ok(serde_json::from_value(Value::Object(event.data.clone()))?)
    }
}

// ---- capability description ----

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Describe {}

impl Eventable for Describe {
    const TYPE: &'static str = "describe";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsVoice {
    pub name: String,
    pub description: Option<String>,
    pub attribution: Attribution,
    pub installed: bool,
    pub version: Option<String>,
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsProgram {
    pub name: String,
    pub description: Option<String>,
    pub attribution: Attribution,
    pub installed: bool,
    pub version: Option<String>,
    pub voices: Vec<TtsVoice>,
    #[serde(default)]
    pub supports_synthesize_streaming: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub tts: Vec<TtsProgram>,
}

impl Eventable for Info {
    const TYPE: &'static str = "info";
}

// ---- synthesis requests ----

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesizeVoice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesize {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<SynthesizeVoice>,
}

impl Eventable for Synthesize {
    const TYPE: &'static str = "synthesize";
    const REQUIRED: &'static [&'static str] = &["text"];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesizeStart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<SynthesizeVoice>,
}

impl Eventable for SynthesizeStart {
    const TYPE: &'static str = "synthesize-start";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizeChunk {
    pub text: String,
}

impl Eventable for SynthesizeChunk {
    const TYPE: &'static str = "synthesize-chunk";
    const REQUIRED: &'static [&'static str] = &["text"];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesizeStop {}

impl Eventable for SynthesizeStop {
    const TYPE: &'static str = "synthesize-stop";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesizeStopped {}

impl Eventable for SynthesizeStopped {
    const TYPE: &'static str = "synthesize-stopped";
}

// ---- audio ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioStart {
    pub rate: u32,
    pub width: u16,
    pub channels: u16,
}

impl Eventable for AudioStart {
    const TYPE: &'static str = "audio-start";
    const REQUIRED: &'static [&'static str] = &["rate", "width", "channels"];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioChunk {
    pub rate: u32,
    pub width: u16,
    pub channels: u16,
    #[serde(skip)]
    pub audio: Vec<u8>,
}

impl Eventable for AudioChunk {
    const TYPE: &'static str = "audio-chunk";
    const REQUIRED: &'static [&'static str] = &["rate", "width", "channels"];

    fn to_event(&self) -> Event {
        let mut event = Event::new(Self::TYPE);
        event.data.insert("rate".into(), self.rate.into());
        event.data.insert("width".into(), self.width.into());
        event.data.insert("channels".into(), self.channels.into());
        event.payload = Some(self.audio.clone());
        event
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioStop {}

impl Eventable for AudioStop {
    const TYPE: &'static str = "audio-stop";
}

// ---- errors ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Eventable for ErrorEvent {
    const TYPE: &'static str = "error";
    const REQUIRED: &'static [&'static str] = &["text"];
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::BufReader;

    use super::*;

    async fn parse(bytes: &[u8]) -> Result<Option<Event>, ProtocolError> {
        let mut reader = BufReader::new(bytes);
        read_event(&mut reader).await
    }

    #[tokio::test]
    async fn reads_header_data_and_payload() {
        let mut wire = br#"{"type":"audio-chunk","data":{"rate":1},"data_length":26,"payload_length":3}"#.to_vec();
        wire.push(b'\n');
        wire.extend_from_slice(br#"{"width":2,"channels":1}  "#);
        wire.extend_from_slice(&[1, 2, 3]);

        let event = parse(&wire).await.unwrap().unwrap();
        assert_eq!(event.event_type, "audio-chunk");
        assert_eq!(event.data["rate"], json!(1));
        assert_eq!(event.data["width"], json!(2));
        assert_eq!(event.payload.as_deref(), Some(&[1u8, 2, 3][..]));
    }

    #[tokio::test]
    async fn out_of_line_data_overrides_inline() {
        let data = br#"{"text":"new"}"#;
        let header = format!(
            "{{\"type\":\"synthesize\",\"data\":{{\"text\":\"old\"}},\"data_length\":{}}}\n",
            data.len()
        );
        let mut wire = header.into_bytes();
        wire.extend_from_slice(data);

        let event = parse(&wire).await.unwrap().unwrap();
        let synth = Synthesize::from_event(&event).unwrap();
        assert_eq!(synth.text, "new");
    }

    #[tokio::test]
    async fn clean_eof_is_none() {
        assert!(parse(b"").await.unwrap().is_none());
        assert!(parse(b"\n\n").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_payload_is_an_error() {
        let wire = b"{\"type\":\"audio-chunk\",\"payload_length\":10}\n\x01\x02";
        assert!(matches!(parse(wire).await, Err(ProtocolError::Io(_))));
    }

    #[tokio::test]
    async fn non_object_data_is_an_error() {
        let wire = b"{\"type\":\"synthesize\",\"data_length\":5}\n[1,2]";
        assert!(matches!(parse(wire).await, Err(ProtocolError::Json(_))));
    }

    #[tokio::test]
    async fn oversized_header_is_rejected() {
        let wire = vec![b' '; MAX_HEADER_BYTES + 10];
        assert!(matches!(
            parse(&wire).await,
            Err(ProtocolError::HeaderTooLong { .. })
        ));
    }

    #[tokio::test]
    async fn written_events_read_back_over_a_pipe() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let chunk = AudioChunk {
            rate: 24000,
            width: 2,
            channels: 1,
            audio: vec![0, 1, 2, 3],
        };
        write_event(&mut client, &chunk.to_event()).await.unwrap();
        write_event(&mut client, &AudioStop {}.to_event()).await.unwrap();
        drop(client);

        let mut reader = BufReader::new(server);
        let first = read_event(&mut reader).await.unwrap().unwrap();
        assert!(AudioChunk::is_type(&first));
        assert_eq!(first.payload.as_deref(), Some(&[0u8, 1, 2, 3][..]));
        assert_eq!(AudioChunk::from_event(&first).unwrap().rate, 24000);

        let second = read_event(&mut reader).await.unwrap().unwrap();
        assert!(AudioStop::is_type(&second));
        assert!(second.data.is_empty());
        assert!(read_event(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn header_carries_version_and_lengths() {
        let mut out = Vec::new();
        let event = ErrorEvent {
            text: "boom".into(),
            code: Some("EngineError".into()),
        }
        .to_event();
        write_event(&mut out, &event).await.unwrap();

        let newline = out.iter().position(|&b| b == b'\n').unwrap();
        let header: Value = serde_json::from_slice(&out[..newline]).unwrap();
        assert_eq!(header["type"], "error");
        assert_eq!(header["version"], PROTOCOL_VERSION);
        assert_eq!(header["data_length"], json!(out.len() - newline - 1));
        assert!(header.get("payload_length").is_none());
    }

    #[test]
    fn missing_text_is_reported_by_name() {
        let event = Event::new("synthesize-chunk");
        match SynthesizeChunk::from_event(&event) {
            Err(ProtocolError::MissingField { field, .. }) => assert_eq!(field, "text"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn synthesize_voice_is_optional() {
        let mut event = Event::new("synthesize");
        event.data.insert("text".into(), json!("Привет"));
        let synth = Synthesize::from_event(&event).unwrap();
        assert_eq!(synth.voice, None);

        event.data.insert("voice".into(), json!({"name": "espeech-voice"}));
        let synth = Synthesize::from_event(&event).unwrap();
        assert_eq!(synth.voice.unwrap().name.as_deref(), Some("espeech-voice"));
    }
}
