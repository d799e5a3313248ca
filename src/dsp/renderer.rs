//! Offline renderer — runs the effect graph over a whole buffer and encodes
//! the result as WAV bytes.
//!
//! The entire automation curve is registered before the first quantum is
//! rendered: one exact point every `offline_step_seconds` from zero to the
//! buffer's duration. Rendering then proceeds in bounded steps so a browser
//! can spread a long export across frames and cancel it midway.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::automation::{AutomationFrame, ParamWriter};
use crate::buffer::{AudioBuffer, DecodedAudio};
use crate::config::EngineConfig;
use crate::dsp::engine::AudioContext;
use crate::effect::EffectPreset;
use crate::error::{Result, WeaverError};
use crate::graph::{AudioGraphHandle, GraphSpec, build_graph};

/// Shared flag that aborts a [`RenderJob`] from another owner.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// An export in progress.
pub struct RenderJob {
    ctx: AudioContext,
    graph: AudioGraphHandle,
    quanta_per_step: usize,
    cancel: CancelHandle,
    preset: EffectPreset,
}

impl RenderJob {
    /// Build the graph for `preset` on an offline context matching the
    /// source's rate and length, and schedule every automation point.
    pub fn new(buffer: Arc<DecodedAudio>, preset: &EffectPreset, config: &EngineConfig) -> Result<Self> {
        Self::with_spec(buffer, preset, &GraphSpec::for_preset(preset, config), config)
    }

    /// Like [`RenderJob::new`] with an explicit graph description.
    pub fn with_spec(
        buffer: Arc<DecodedAudio>,
        preset: &EffectPreset,
        spec: &GraphSpec,
        config: &EngineConfig,
    ) -> Result<Self> {
        preset.validate()?;
        config.validate()?;
        let duration = buffer.duration();
        let mut ctx = AudioContext::offline(2, buffer.length(), buffer.sample_rate())?;
        let mut graph = build_graph(&mut ctx, buffer, spec).map_err(as_render_error)?;

        if let Err(e) = schedule(&mut ctx, &graph, preset, duration, config.offline_step_seconds) {
            graph.teardown(&mut ctx);
            return Err(as_render_error(e));
        }

        log::info!(
            "rendering {:.2}s of audio with {} ({} frames at {} Hz)",
            duration,
            preset.label(),
            ctx.length(),
            ctx.sample_rate()
        );
        Ok(Self {
            ctx,
            graph,
            quanta_per_step: config.quanta_per_step.max(1),
            cancel: CancelHandle::default(),
            preset: *preset,
        })
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Fraction of the output rendered so far, in [0, 1].
    pub fn progress(&self) -> f64 {
        let length = self.ctx.length();
        if length == 0 {
            return 1.0;
        }
        (self.ctx.rendered_frames() as f64 / length as f64).min(1.0)
    }

    pub fn is_complete(&self) -> bool {
        self.ctx.is_complete()
    }

    /// Render up to `quanta_per_step` quanta and report progress.
    pub fn step(&mut self) -> Result<f64> {
        self.check_cancelled()?;
        for _ in 0..self.quanta_per_step {
            if self.ctx.is_complete() {
                break;
            }
            if let Err(e) = self.ctx.render_quantum() {
                self.discard();
                return Err(as_render_error(e));
            }
        }
        Ok(self.progress())
    }

    /// Render whatever remains and hand over the finished buffer.
    pub fn finish(mut self) -> Result<AudioBuffer> {
        while !self.is_complete() {
            self.step()?;
        }
        self.check_cancelled()?;
        let rendered = self.ctx.take_rendered().map_err(as_render_error)?;
        self.discard();
        log::info!("render of {} finished: {:.2}s", self.preset.label(), rendered.duration());
        Ok(rendered)
    }

    fn check_cancelled(&mut self) -> Result<()> {
        if self.cancel.is_cancelled() {
            log::info!("render cancelled at {:.0}%", self.progress() * 100.0);
            self.discard();
            return Err(WeaverError::Cancelled);
        }
        Ok(())
    }

    fn discard(&mut self) {
        self.graph.teardown(&mut self.ctx);
        self.ctx.close();
    }
}

/// Pre-register the automation curve: pinned at zero, then an exact ramp
/// point every `step` seconds, ending exactly at `duration`.
fn schedule(
    ctx: &mut AudioContext,
    graph: &AudioGraphHandle,
    preset: &EffectPreset,
    duration: f64,
    step: f64,
) -> Result<()> {
    let writer = ParamWriter::offline();
    writer.prime(ctx, graph, &AutomationFrame::at(0.0, preset), 0.0)?;
    let mut k = 1u64;
    loop {
        let t = (k as f64 * step).min(duration);
        if t <= 0.0 {
            break;
        }
        writer.write(ctx, graph, &AutomationFrame::at(t, preset), t)?;
        if t >= duration {
            break;
        }
        k += 1;
    }
    graph.start(ctx, 0.0, 0.0)
}

fn as_render_error(e: WeaverError) -> WeaverError {
    match e {
        WeaverError::Unsupported(_) | WeaverError::Cancelled | WeaverError::Render(_) => e,
        other => WeaverError::Render(other.to_string()),
    }
}

/// Render `buffer` through `preset` in one call.
pub fn render(buffer: Arc<DecodedAudio>, preset: &EffectPreset, config: &EngineConfig) -> Result<AudioBuffer> {
    RenderJob::new(buffer, preset, config)?.finish()
}

/// Render and encode as 16-bit WAV bytes.
pub fn render_wav(buffer: Arc<DecodedAudio>, preset: &EffectPreset, config: &EngineConfig) -> Result<Vec<u8>> {
    Ok(encode_wav_buffer(&render(buffer, preset, config)?))
}

/// When an external capture of the rendered audio may stop recording.
pub fn capture_stop_time(duration: f64, config: &EngineConfig) -> f64 {
    duration.max(0.0) + config.capture_tail_seconds.max(0.0)
}

/// Encode a buffer as interleaved 16-bit PCM WAV.
pub fn encode_wav_buffer(buffer: &AudioBuffer) -> Vec<u8> {
    encode_wav(
        &buffer.to_interleaved_i16(),
        buffer.sample_rate().round() as u32,
        buffer.number_of_channels() as u16,
    )
}

/// Encode interleaved i16 PCM samples to a WAV byte buffer.
pub fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let bits_per_sample: u16 = 16;
    let byte_rate = sample_rate * channels as u32 * (bits_per_sample as u32 / 8);
    let block_align = channels * (bits_per_sample / 8);
    let data_size = (samples.len() * 2) as u32;
    let file_size = 36 + data_size;

    let mut buf = Vec::with_capacity(44 + data_size as usize);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_size.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt chunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    buf.extend_from_slice(&channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for &sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::engine::ParamKind;

    fn sine(seconds: f64, sr: f32) -> Arc<AudioBuffer> {
        let n = (seconds * sr as f64).round() as usize;
        let data = (0..n)
            .map(|i| (std::f64::consts::TAU * 440.0 * i as f64 / sr as f64).sin() as f32 * 0.5)
            .collect();
        Arc::new(AudioBuffer::new(vec![data], sr).unwrap())
    }

    #[test]
    fn wav_header_valid() {
        let buf = AudioBuffer::silent(2, 100, 44100.0).unwrap();
        let wav = encode_wav_buffer(&buf);

        // Check RIFF header
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");

        // Check sample rate
        let sr = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
        assert_eq!(sr, 44100);

        // Check channels
        let ch = u16::from_le_bytes([wav[22], wav[23]]);
        assert_eq!(ch, 2);

        let block_align = u16::from_le_bytes([wav[32], wav[33]]);
        assert_eq!(block_align, 4);
    }

    #[test]
    fn wav_size_correct() {
        // 0.5s stereo = 22050 frames * 2 channels * 2 bytes
        let buf = AudioBuffer::silent(2, 22050, 44100.0).unwrap();
        let wav = encode_wav_buffer(&buf);
        let data_size = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]);
        assert_eq!(data_size, 88200);
        assert_eq!(wav.len(), 44 + 88200);
        let riff_size = u32::from_le_bytes([wav[4], wav[5], wav[6], wav[7]]);
        assert_eq!(riff_size, 36 + 88200);
    }

    #[test]
    fn samples_are_little_endian_and_interleaved() {
        let wav = encode_wav(&[1, -2, 0x0102, i16::MIN], 8000, 2);
        assert_eq!(&wav[44..52], &[1, 0, 0xfe, 0xff, 0x02, 0x01, 0x00, 0x80]);
    }

    #[test]
    fn output_matches_source_length_and_rate() {
        let src = sine(0.5, 22050.0);
        let out = render(src.clone(), &EffectPreset::EightD, &EngineConfig::default()).unwrap();
        assert_eq!(out.length(), src.length());
        assert_eq!(out.sample_rate(), 22050.0);
        assert_eq!(out.number_of_channels(), 2);
        assert!(out.rms() > 0.01);
    }

    #[test]
    fn automation_reaches_the_final_position() {
        let src = sine(0.31, 22050.0);
        let config = EngineConfig::default();
        let job = RenderJob::new(src.clone(), &EffectPreset::EightD, &config).unwrap();
        let x = job.ctx.param(job.graph.panner, ParamKind::PositionX).unwrap();
        let end = x.last_event_time().unwrap();
        assert!((end - src.duration()).abs() < 1e-9);
        let expected = AutomationFrame::at(src.duration(), &EffectPreset::EightD).sample.position.x;
        assert!((x.value_at(end) - expected).abs() < 1e-5);
        // One point per step plus the anchor
        let steps = (src.duration() / config.offline_step_seconds).ceil() as usize;
        assert_eq!(x.event_count(), steps + 1);
    }

    #[test]
    fn stepping_reports_monotonic_progress() {
        let config = EngineConfig {
            quanta_per_step: 8,
            ..EngineConfig::default()
        };
        let mut job = RenderJob::new(sine(0.25, 22050.0), &EffectPreset::FourD, &config).unwrap();
        assert_eq!(job.progress(), 0.0);
        let mut last = 0.0;
        let mut steps = 0;
        while !job.is_complete() {
            let p = job.step().unwrap();
            assert!(p > last);
            last = p;
            steps += 1;
        }
        assert_eq!(last, 1.0);
        assert!(steps > 1);
        assert_eq!(job.finish().unwrap().length(), 5513);
    }

    #[test]
    fn cancellation_discards_output() {
        let mut job = RenderJob::new(sine(1.0, 22050.0), &EffectPreset::ElevenD, &EngineConfig::default()).unwrap();
        let handle = job.cancel_handle();
        job.step().unwrap();
        handle.cancel();
        assert!(matches!(job.step(), Err(WeaverError::Cancelled)));
        assert!(matches!(job.finish(), Err(WeaverError::Cancelled)));
    }

    #[test]
    fn graph_failures_surface_as_render_errors() {
        let mut config = EngineConfig::default();
        config.impulse.duration = -1.0;
        let spec = GraphSpec::for_preset(&EffectPreset::ElevenD, &config);
        let err = RenderJob::with_spec(sine(0.1, 22050.0), &EffectPreset::ElevenD, &spec, &EngineConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, WeaverError::Render(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn empty_source_renders_empty_output() {
        let src = Arc::new(AudioBuffer::silent(1, 0, 44100.0).unwrap());
        let out = render(src, &EffectPreset::EightD, &EngineConfig::default()).unwrap();
        assert_eq!(out.length(), 0);
    }

    #[test]
    fn capture_waits_for_the_tail() {
        let config = EngineConfig::default();
        assert!((capture_stop_time(2.0, &config) - 2.25).abs() < 1e-12);
    }
}
