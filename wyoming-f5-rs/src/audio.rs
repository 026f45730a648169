//! PCM helpers: float samples → 16-bit little-endian bytes, WAV decoding.

use std::io::Cursor;

/// Bytes per sample of the PCM we emit.
pub const SAMPLE_WIDTH: u16 = 2;
/// We always emit mono.
pub const CHANNELS: u16 = 1;

/// Encode f32 samples in [-1, 1] as 16-bit little-endian PCM.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * SAMPLE_WIDTH as usize);
    for &sample in samples {
        // f32 [-1, 1] → i16
        let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

/// Size of one audio-chunk payload in bytes.
pub fn bytes_per_chunk(samples_per_chunk: usize) -> usize {
    samples_per_chunk.max(1) * SAMPLE_WIDTH as usize * CHANNELS as usize
}

/// Decode a WAV file into mono f32 samples plus its sample rate.
///
/// Multi-channel audio keeps only the first channel.
pub fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32), hound::Error> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let samples = interleaved.into_iter().step_by(channels).collect();
    Ok((samples, spec.sample_rate))
}
