//! Pushes trajectory samples and preset levels into a graph's parameters.
//!
//! Shared by both drivers so the live preview and the offline export apply
//! the same values in the same order: position, filter, gain, then the
//! reverb mix and EQ. Only the choice of event time differs.

use crate::dsp::engine::{AudioContext, NodeId, ParamKind};
use crate::effect::{EffectPreset, EqGains};
use crate::error::Result;
use crate::graph::AudioGraphHandle;
use crate::trajectory::{self, TrajectorySample};

/// How a write chooses the time of its automation event.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Schedule {
    /// Live: ramp over this many seconds from the write time, never ending
    /// before an event already on the timeline.
    Ramp(f64),
    /// Offline: arrive exactly at the write time.
    Exact,
}

/// Every value written into a graph at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutomationFrame {
    pub sample: TrajectorySample,
    /// Dry/wet split, written only for the custom preset.
    pub reverb_mix: Option<f32>,
    /// EQ band gains, written only for the custom preset.
    pub eq: Option<EqGains>,
}

impl AutomationFrame {
    /// Values for `preset` at `elapsed` seconds into playback.
    pub fn at(elapsed: f64, preset: &EffectPreset) -> Self {
        let custom = preset.custom().is_some();
        Self {
            sample: trajectory::sample(elapsed, preset),
            reverb_mix: if custom { preset.reverb_mix() } else { None },
            eq: custom.then(|| preset.eq_gains()),
        }
    }

    /// (node, parameter, value) triples in write order.
    fn targets(&self, graph: &AudioGraphHandle) -> Vec<(NodeId, ParamKind, f32)> {
        let p = self.sample.position;
        let mut out = vec![
            (graph.panner, ParamKind::PositionX, p.x),
            (graph.panner, ParamKind::PositionY, p.y),
            (graph.panner, ParamKind::PositionZ, p.z),
            (graph.filter, ParamKind::Frequency, self.sample.filter_cutoff_hz),
            (graph.gain, ParamKind::Gain, self.sample.gain),
        ];
        if let (Some(mix), Some(reverb)) = (self.reverb_mix, graph.reverb) {
            out.push((reverb.dry, ParamKind::Gain, 1.0 - mix));
            out.push((reverb.wet, ParamKind::Gain, mix));
        }
        if let Some(eq) = self.eq {
            out.push((graph.bass, ParamKind::Gain, eq.bass_db));
            out.push((graph.mid, ParamKind::Gain, eq.mid_db));
            out.push((graph.treble, ParamKind::Gain, eq.treble_db));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamWriter {
    schedule: Schedule,
}

impl ParamWriter {
    pub fn live(ramp_seconds: f64) -> Self {
        Self {
            schedule: Schedule::Ramp(ramp_seconds.max(0.0)),
        }
    }

    pub fn offline() -> Self {
        Self {
            schedule: Schedule::Exact,
        }
    }

    /// Pin every parameter to its value at `time` so later ramps start from
    /// a known point.
    pub fn prime(&self, ctx: &mut AudioContext, graph: &AudioGraphHandle, frame: &AutomationFrame, time: f64) -> Result<()> {
        for (node, kind, value) in frame.targets(graph) {
            ctx.param_mut(node, kind)?.set_value_at_time(value, time)?;
        }
        Ok(())
    }

    /// Schedule a ramp of every parameter towards `frame`, written at `time`.
    pub fn write(&self, ctx: &mut AudioContext, graph: &AudioGraphHandle, frame: &AutomationFrame, time: f64) -> Result<()> {
        for (node, kind, value) in frame.targets(graph) {
            let param = ctx.param_mut(node, kind)?;
            let at = match self.schedule {
                Schedule::Ramp(ramp) => (time + ramp).max(param.last_event_time().unwrap_or(0.0)),
                Schedule::Exact => time,
            };
            param.linear_ramp_to_value_at_time(value, at)?;
        }
        Ok(())
    }
}
