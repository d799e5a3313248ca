//! Planar PCM buffers: decoded input and rendered output.

use crate::error::{Result, WeaverError};

/// Lowest and highest sample rates a context or buffer may use.
pub const SAMPLE_RATE_RANGE: (f32, f32) = (3000.0, 768000.0);

/// An immutable planar PCM buffer.
///
/// Produced once by decoding (or by an offline render) and only read
/// afterwards, so it can be shared behind an `Arc` between a live preview
/// and a pending export.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: f32,
    channels: Vec<Vec<f32>>,
}

/// Input to both drivers.
pub type DecodedAudio = AudioBuffer;

pub(crate) fn check_sample_rate(sample_rate: f32) -> Result<()> {
    if sample_rate.is_finite() && sample_rate >= SAMPLE_RATE_RANGE.0 && sample_rate <= SAMPLE_RATE_RANGE.1 {
        Ok(())
    } else {
        Err(WeaverError::Unsupported(format!(
            "sample rate {sample_rate} Hz is outside {}–{} Hz",
            SAMPLE_RATE_RANGE.0, SAMPLE_RATE_RANGE.1
        )))
    }
}

impl AudioBuffer {
    /// Build from per-channel sample vectors of equal length.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: f32) -> Result<Self> {
        check_sample_rate(sample_rate)?;
        let Some(first) = channels.first() else {
            return Err(WeaverError::InvalidParameter {
                name: "channels",
                reason: "a buffer needs at least one channel".into(),
            });
        };
        let len = first.len();
        if channels.iter().any(|c| c.len() != len) {
            return Err(WeaverError::InvalidParameter {
                name: "channels",
                reason: "all channels must have the same length".into(),
            });
        }
        Ok(Self { sample_rate, channels })
    }

    /// Split interleaved samples into channels.
    pub fn from_interleaved(samples: &[f32], channels: usize, sample_rate: f32) -> Result<Self> {
        if channels == 0 || samples.len() % channels != 0 {
            return Err(WeaverError::InvalidParameter {
                name: "channels",
                reason: format!("{} samples do not split into {channels} channels", samples.len()),
            });
        }
        let frames = samples.len() / channels;
        let mut planar = vec![Vec::with_capacity(frames); channels];
        for frame in samples.chunks_exact(channels) {
            for (ch, &s) in frame.iter().enumerate() {
                planar[ch].push(s);
            }
        }
        Self::new(planar, sample_rate)
    }

    /// A zero-filled buffer.
    pub fn silent(channels: usize, length: usize, sample_rate: f32) -> Result<Self> {
        Self::new(vec![vec![0.0; length]; channels.max(1)], sample_rate)
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn number_of_channels(&self) -> usize {
        self.channels.len()
    }

    /// Frames per channel.
    pub fn length(&self) -> usize {
        self.channels[0].len()
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.length() as f64 / self.sample_rate as f64
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Interleaved 16-bit PCM, as written into a WAV data chunk.
    pub fn to_interleaved_i16(&self) -> Vec<i16> {
        let mut out = Vec::with_capacity(self.length() * self.channels.len());
        for i in 0..self.length() {
            for ch in &self.channels {
                let s = (ch[i] as f64 * 32767.0).round().clamp(-32768.0, 32767.0) as i16;
                out.push(s);
            }
        }
        out
    }

    /// RMS over every sample of every channel.
    pub fn rms(&self) -> f32 {
        let count = self.length() * self.channels.len();
        if count == 0 {
            return 0.0;
        }
        let sum: f64 = self
            .channels
            .iter()
            .flat_map(|c| c.iter())
            .map(|&s| (s as f64) * (s as f64))
            .sum();
        (sum / count as f64).sqrt() as f32
    }

    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|c| c.iter())
            .fold(0.0_f32, |m, &s| m.max(s.abs()))
    }

    /// Fraction of samples whose magnitude reaches `level`.
    pub fn fraction_at_or_above(&self, level: f32) -> f64 {
        let count = self.length() * self.channels.len();
        if count == 0 {
            return 0.0;
        }
        let hits = self
            .channels
            .iter()
            .flat_map(|c| c.iter())
            .filter(|s| s.abs() >= level)
            .count();
        hits as f64 / count as f64
    }
}
