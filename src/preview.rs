//! Live preview: the realtime animation driver.
//!
//! States: `Idle → Playing → (Paused | Idle)`. While playing, every frame
//! callback reads the context clock, samples the trajectory at the elapsed
//! time and schedules short ramps towards the new values. The driver owns
//! at most one [`AudioGraphHandle`] and tears it down before building
//! another.
//!
//! The frame callback is abstracted behind [`FrameScheduler`] so a browser
//! can drive it from `requestAnimationFrame` and tests can drive it by hand.

use std::sync::Arc;

use crate::automation::{AutomationFrame, ParamWriter};
use crate::buffer::DecodedAudio;
use crate::config::EngineConfig;
use crate::dsp::engine::AudioContext;
use crate::effect::EffectPreset;
use crate::error::{Result, WeaverError};
use crate::graph::{AudioGraphHandle, GraphSpec, build_graph};
use crate::trajectory::Orbit;

/// Identifies one requested frame callback.
pub type FrameHandle = u64;

/// The host's "call me on the next frame" primitive.
pub trait FrameScheduler {
    fn request_frame(&mut self) -> FrameHandle;
    fn cancel_frame(&mut self, handle: FrameHandle);
}

/// A scheduler whose frames are delivered by calling
/// [`PreviewDriver::on_frame`] with [`ManualFrameScheduler::pending`].
#[derive(Debug, Default)]
pub struct ManualFrameScheduler {
    next: FrameHandle,
    pending: Option<FrameHandle>,
}

impl ManualFrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The frame callback currently waiting to run, if any.
    pub fn pending(&self) -> Option<FrameHandle> {
        self.pending
    }
}

impl FrameScheduler for ManualFrameScheduler {
    fn request_frame(&mut self) -> FrameHandle {
        self.next += 1;
        self.pending = Some(self.next);
        self.next
    }

    fn cancel_frame(&mut self, handle: FrameHandle) {
        if self.pending == Some(handle) {
            self.pending = None;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewState {
    Idle,
    Playing,
    Paused,
}

/// Where playback resumes from.
#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    /// Seconds into the source buffer.
    audio_offset: f64,
    /// Seconds on the trajectory clock.
    elapsed: f64,
}

pub struct PreviewDriver<S: FrameScheduler> {
    ctx: AudioContext,
    config: EngineConfig,
    scheduler: S,
    writer: ParamWriter,
    buffer: Option<Arc<DecodedAudio>>,
    preset: EffectPreset,
    graph: Option<AudioGraphHandle>,
    state: PreviewState,
    pending_frame: Option<FrameHandle>,
    /// Context time at which the trajectory clock reads zero.
    clock_origin: f64,
    paused_at: Cursor,
    looping: bool,
}

impl<S: FrameScheduler> PreviewDriver<S> {
    pub fn new(config: EngineConfig, scheduler: S) -> Result<Self> {
        config.validate()?;
        let ctx = AudioContext::realtime(config.sample_rate)?;
        Ok(Self {
            ctx,
            writer: ParamWriter::live(config.ramp_seconds),
            looping: config.loop_preview,
            config,
            scheduler,
            buffer: None,
            preset: EffectPreset::default(),
            graph: None,
            state: PreviewState::Idle,
            pending_frame: None,
            clock_origin: 0.0,
            paused_at: Cursor::default(),
        })
    }

    pub fn state(&self) -> PreviewState {
        self.state
    }

    pub fn preset(&self) -> &EffectPreset {
        &self.preset
    }

    pub fn graph(&self) -> Option<&AudioGraphHandle> {
        self.graph.as_ref()
    }

    pub fn context(&self) -> &AudioContext {
        &self.ctx
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Nodes alive in the preview context.
    pub fn node_count(&self) -> usize {
        self.ctx.node_count()
    }

    /// Seconds on the trajectory clock.
    pub fn elapsed(&self) -> f64 {
        match self.state {
            PreviewState::Playing => (self.ctx.current_time() - self.clock_origin).max(0.0),
            PreviewState::Paused => self.paused_at.elapsed,
            PreviewState::Idle => 0.0,
        }
    }

    pub fn set_looping(&mut self, looping: bool) -> Result<()> {
        self.looping = looping;
        if let Some(graph) = &self.graph {
            graph.set_loop(&mut self.ctx, looping)?;
        }
        Ok(())
    }

    /// Replace the source. Any session in progress is stopped.
    pub fn load(&mut self, buffer: DecodedAudio) {
        self.stop();
        log::info!(
            "loaded {:.2}s of {}-channel audio at {} Hz",
            buffer.duration(),
            buffer.number_of_channels(),
            buffer.sample_rate()
        );
        self.buffer = Some(Arc::new(buffer));
    }

    /// Start from the beginning, or resume when paused.
    pub fn play(&mut self) -> Result<()> {
        match self.state {
            PreviewState::Playing => Ok(()),
            PreviewState::Paused => {
                let cursor = self.paused_at;
                log::info!("resuming preview at {:.2}s", cursor.audio_offset);
                self.start_session(cursor)
            }
            PreviewState::Idle => {
                log::info!("starting {} preview", self.preset.label());
                self.start_session(Cursor::default())
            }
        }
    }

    /// Silence output, remembering where to resume.
    pub fn pause(&mut self) {
        if self.state != PreviewState::Playing {
            return;
        }
        self.paused_at = self.cursor();
        self.cancel_frame();
        self.teardown_graph();
        self.state = PreviewState::Paused;
        log::info!("preview paused at {:.2}s", self.paused_at.audio_offset);
    }

    /// Cancel the frame loop, stop the source and release every node.
    /// Safe to call in any state.
    pub fn stop(&mut self) {
        self.cancel_frame();
        self.teardown_graph();
        if self.state != PreviewState::Idle {
            log::info!("preview stopped");
        }
        self.state = PreviewState::Idle;
        self.paused_at = Cursor::default();
    }

    /// Switch effect. While playing, parameter-only changes are ramped into
    /// the live graph; anything else rebuilds it in place. The trajectory
    /// clock restarts only when the loop period changes.
    pub fn set_effect(&mut self, preset: EffectPreset) -> Result<()> {
        preset.validate()?;
        let old = std::mem::replace(&mut self.preset, preset);
        let period_changed = Orbit::for_preset(&old).period != Orbit::for_preset(&preset).period;
        if self.state != PreviewState::Playing {
            // A paused session resumes on the new orbit from its start
            if self.state == PreviewState::Paused && period_changed {
                self.paused_at.elapsed = 0.0;
            }
            return Ok(());
        }
        let spec = GraphSpec::for_preset(&preset, &self.config);

        let patchable = matches!((old, preset), (EffectPreset::Custom(_), EffectPreset::Custom(_)))
            && self.graph.as_ref().is_some_and(|g| g.spec().same_topology(&spec));
        if patchable && !period_changed {
            log::debug!("patching live graph for {}", preset.label());
            let now = self.ctx.current_time();
            let frame = AutomationFrame::at(self.elapsed(), &preset);
            let result = match self.graph.as_mut() {
                Some(graph) => {
                    graph.set_spec(spec);
                    self.writer.write(&mut self.ctx, graph, &frame, now)
                }
                None => Ok(()),
            };
            return result.inspect_err(|_| self.stop());
        }

        let mut cursor = self.cursor();
        if period_changed {
            cursor.elapsed = 0.0;
        }
        log::debug!(
            "rebuilding graph for {} (clock {})",
            preset.label(),
            if period_changed { "restarted" } else { "continued" }
        );
        self.start_session(cursor)
    }

    /// Deliver a frame callback. Stale or cancelled handles are ignored.
    pub fn on_frame(&mut self, handle: FrameHandle) -> Result<()> {
        if self.pending_frame != Some(handle) {
            return Ok(());
        }
        self.pending_frame = None;
        self.tick()
    }

    fn tick(&mut self) -> Result<()> {
        if self.state != PreviewState::Playing {
            return Ok(());
        }
        let Some(graph) = self.graph.as_ref() else {
            return Ok(());
        };
        match self.ctx.has_ended(graph.source) {
            Ok(true) => {
                log::info!("source finished");
                self.stop();
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => {
                self.stop();
                return Err(e);
            }
        }

        let now = self.ctx.current_time();
        let frame = AutomationFrame::at(self.elapsed(), &self.preset);
        if let Err(e) = self.writer.write(&mut self.ctx, graph, &frame, now) {
            self.stop();
            return Err(e);
        }
        self.pending_frame = Some(self.scheduler.request_frame());
        Ok(())
    }

    /// Pull rendered audio for the output device.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) -> Result<()> {
        self.ctx.render_into(left, right)
    }

    /// Waveform bytes for a visualiser, while a graph exists.
    pub fn analyser_time_domain(&mut self) -> Option<Vec<u8>> {
        let id = self.graph.as_ref()?.analyser;
        self.ctx.analyser_mut(id).ok().map(|a| a.byte_time_domain_data())
    }

    /// Spectrum bytes for a visualiser, while a graph exists.
    pub fn analyser_spectrum(&mut self) -> Option<Vec<u8>> {
        let id = self.graph.as_ref()?.analyser;
        self.ctx.analyser_mut(id).ok().map(|a| a.byte_frequency_data())
    }

    fn cursor(&self) -> Cursor {
        let audio_offset = self
            .graph
            .as_ref()
            .and_then(|g| self.ctx.playback_position(g.source).ok())
            .unwrap_or(self.paused_at.audio_offset);
        Cursor {
            audio_offset,
            elapsed: self.elapsed(),
        }
    }

    fn start_session(&mut self, cursor: Cursor) -> Result<()> {
        let Some(buffer) = self.buffer.clone() else {
            return Err(WeaverError::InvalidState("no audio loaded".into()));
        };
        self.teardown_graph();
        match self.build_session(buffer, cursor) {
            Ok(graph) => {
                self.graph = Some(graph);
                self.state = PreviewState::Playing;
                if self.pending_frame.is_none() {
                    self.pending_frame = Some(self.scheduler.request_frame());
                }
                Ok(())
            }
            Err(e) => {
                log::warn!("could not start preview: {e}");
                self.stop();
                Err(e)
            }
        }
    }

    fn build_session(&mut self, buffer: Arc<DecodedAudio>, cursor: Cursor) -> Result<AudioGraphHandle> {
        let spec = GraphSpec::for_preset(&self.preset, &self.config);
        let mut graph = build_graph(&mut self.ctx, buffer, &spec)?;
        let now = self.ctx.current_time();
        let frame = AutomationFrame::at(cursor.elapsed, &self.preset);
        let started = graph
            .set_loop(&mut self.ctx, self.looping)
            .and_then(|_| self.writer.prime(&mut self.ctx, &graph, &frame, now))
            .and_then(|_| graph.start(&mut self.ctx, now, cursor.audio_offset));
        if let Err(e) = started {
            graph.teardown(&mut self.ctx);
            return Err(e);
        }
        self.clock_origin = now - cursor.elapsed;
        Ok(graph)
    }

    fn cancel_frame(&mut self) {
        if let Some(handle) = self.pending_frame.take() {
            self.scheduler.cancel_frame(handle);
        }
    }

    fn teardown_graph(&mut self) {
        if let Some(mut graph) = self.graph.take() {
            graph.teardown(&mut self.ctx);
        }
    }
}

impl<S: FrameScheduler> Drop for PreviewDriver<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
