//! Audio file decoding (feature `decode`).
//!
//! WAV goes through `hound`, MP3 through `minimp3`. The format is sniffed
//! from the leading bytes rather than trusted from a file name.

use std::io::Cursor;

use crate::buffer::{AudioBuffer, DecodedAudio};
use crate::error::{Result, WeaverError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
}

impl AudioFormat {
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            return Some(AudioFormat::Wav);
        }
        // ID3 tag, or a bare MPEG frame sync
        if bytes.starts_with(b"ID3") || (bytes.len() >= 2 && bytes[0] == 0xff && bytes[1] & 0xe0 == 0xe0) {
            return Some(AudioFormat::Mp3);
        }
        None
    }
}

/// Decode WAV or MP3 bytes into planar float PCM.
pub fn decode(bytes: &[u8]) -> Result<DecodedAudio> {
    let audio = match AudioFormat::sniff(bytes) {
        Some(AudioFormat::Wav) => decode_wav(bytes)?,
        Some(AudioFormat::Mp3) => decode_mp3(bytes)?,
        None => return Err(WeaverError::Decode("unrecognised audio format".into())),
    };
    log::debug!(
        "decoded {} frames, {} channels at {} Hz",
        audio.length(),
        audio.number_of_channels(),
        audio.sample_rate()
    );
    Ok(audio)
}

pub fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).map_err(|e| WeaverError::Decode(e.to_string()))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(WeaverError::Decode("WAV declares zero channels".into()));
    }

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| WeaverError::Decode(e.to_string()))?,
        hound::SampleFormat::Int => {
            let bits = spec.bits_per_sample.clamp(1, 32);
            let full_scale = (1i64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / full_scale))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| WeaverError::Decode(e.to_string()))?
        }
    };

    // Drop a trailing partial frame
    let whole = samples.len() - samples.len() % channels;
    to_buffer(&samples[..whole], channels, spec.sample_rate as f32)
}

pub fn decode_mp3(bytes: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut samples: Vec<f32> = Vec::new();
    let mut format: Option<(usize, i32)> = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                let this = (frame.channels, frame.sample_rate);
                match format {
                    None => format = Some(this),
                    Some(f) if f != this => {
                        log::warn!("skipping MP3 frame with format {this:?}, stream is {f:?}");
                        continue;
                    }
                    Some(_) => {}
                }
                samples.extend(frame.data.iter().map(|&s| s as f32 / 32768.0));
            }
            Err(minimp3::Error::Eof) | Err(minimp3::Error::InsufficientData) => break,
            Err(minimp3::Error::SkippedData) => continue,
            Err(e) => return Err(WeaverError::Decode(e.to_string())),
        }
    }

    let Some((channels, sample_rate)) = format else {
        return Err(WeaverError::Decode("no MPEG audio frames found".into()));
    };
    to_buffer(&samples, channels, sample_rate as f32)
}

fn to_buffer(interleaved: &[f32], channels: usize, sample_rate: f32) -> Result<AudioBuffer> {
    AudioBuffer::from_interleaved(interleaved, channels, sample_rate).map_err(|e| WeaverError::Decode(e.to_string()))
}
