//! Synthetic room impulse response for the convolution reverb.
//!
//! A stereo tail of independent white noise per channel under a
//! `(1 - n)^decay` envelope, with an optional slow amplitude wobble so the
//! tail sounds less static. The buffer is allocated at the rate of the
//! context that will use it; realtime and offline contexts each get their
//! own.

use std::f64::consts::TAU;

use rand::Rng;

use crate::buffer::AudioBuffer;
use crate::config::ImpulseConfig;
use crate::dsp::engine::AudioContext;
use crate::error::{Result, WeaverError};

/// Generate an impulse response at the rate of `context`.
pub fn create_impulse_response<R: Rng + ?Sized>(
    context: &AudioContext,
    rng: &mut R,
    config: &ImpulseConfig,
) -> Result<AudioBuffer> {
    context.ensure_open()?;
    generate(rng, context.sample_rate(), config)
}

fn generate<R: Rng + ?Sized>(rng: &mut R, sample_rate: f32, config: &ImpulseConfig) -> Result<AudioBuffer> {
    crate::buffer::check_sample_rate(sample_rate)?;
    if !(config.duration.is_finite() && config.duration > 0.0) {
        return Err(WeaverError::InvalidParameter {
            name: "impulse.duration",
            reason: format!("{} is not a positive number of seconds", config.duration),
        });
    }
    let length = ((config.duration * sample_rate as f64).round() as usize).max(1);
    let depth = config.modulation_depth.clamp(0.0, 1.0);
    let rate = config.modulation_rate.max(0.0);

    let channels = (0..2)
        .map(|_| {
            // Each ear wobbles out of phase with the other
            let phase = rng.gen_range(0.0..TAU);
            (0..length)
                .map(|i| {
                    let n = i as f64 / length as f64;
                    let envelope = (1.0 - n).powf(config.decay);
                    let wobble = if depth > 0.0 {
                        let t = i as f64 / sample_rate as f64;
                        1.0 - depth * 0.5 * (1.0 + (TAU * rate * t + phase).sin())
                    } else {
                        1.0
                    };
                    let noise: f64 = rng.gen_range(-1.0..1.0);
                    (noise * envelope * wobble) as f32
                })
                .collect()
        })
        .collect();

    AudioBuffer::new(channels, sample_rate)
}
