//! Localisation cues for the "where is the sound?" listening game.
//!
//! A short sine blip is rendered offline through the same HRTF panner the
//! effect uses, placed at one of four fixed spots around the listener.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::buffer::AudioBuffer;
use crate::dsp::engine::{AudioContext, ParamKind};
use crate::dsp::panner::{Distance, PanningModel};
use crate::error::Result;

pub const CUE_FREQUENCY_HZ: f32 = 440.0;
pub const CUE_SECONDS: f64 = 0.3;
pub const CUE_ATTACK_SECONDS: f64 = 0.05;
pub const CUE_PEAK: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CueLocation {
    FrontLeft,
    FrontRight,
    BackLeft,
    BackRight,
}

impl CueLocation {
    pub const ALL: [CueLocation; 4] = [
        CueLocation::FrontLeft,
        CueLocation::FrontRight,
        CueLocation::BackLeft,
        CueLocation::BackRight,
    ];

    /// Listener-relative position; the listener faces -z.
    pub fn position(self) -> Vec3 {
        match self {
            CueLocation::FrontLeft => Vec3::new(-2.0, 0.0, -2.0),
            CueLocation::FrontRight => Vec3::new(2.0, 0.0, -2.0),
            CueLocation::BackLeft => Vec3::new(-2.0, 0.0, 2.0),
            CueLocation::BackRight => Vec3::new(2.0, 0.0, 2.0),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CueLocation::FrontLeft => "Front Left",
            CueLocation::FrontRight => "Front Right",
            CueLocation::BackLeft => "Back Left",
            CueLocation::BackRight => "Back Right",
        }
    }

    /// Pick a location for the next round.
    pub fn random<R: rand::Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

/// Render the cue for `location` as a stereo buffer at `sample_rate`.
pub fn render_cue(location: CueLocation, sample_rate: f32) -> Result<AudioBuffer> {
    let length = (CUE_SECONDS * sample_rate as f64).round() as usize;
    let mut ctx = AudioContext::offline(2, length, sample_rate)?;

    let osc = ctx.create_oscillator(CUE_FREQUENCY_HZ)?;
    let env = ctx.create_gain(0.0)?;
    let panner = ctx.create_panner(PanningModel::Hrtf, Distance::default())?;
    let destination = ctx.destination();
    ctx.connect(osc, env)?;
    ctx.connect(env, panner)?;
    ctx.connect(panner, destination)?;

    let gain = ctx.param_mut(env, ParamKind::Gain)?;
    gain.set_value_at_time(0.0, 0.0)?;
    gain.linear_ramp_to_value_at_time(CUE_PEAK, CUE_ATTACK_SECONDS)?;
    gain.linear_ramp_to_value_at_time(0.0, CUE_SECONDS)?;

    let p = location.position();
    ctx.param_mut(panner, ParamKind::PositionX)?.set_value(p.x);
    ctx.param_mut(panner, ParamKind::PositionY)?.set_value(p.y);
    ctx.param_mut(panner, ParamKind::PositionZ)?.set_value(p.z);

    ctx.start(osc, 0.0, 0.0)?;
    ctx.stop(osc, CUE_SECONDS)?;
    while !ctx.is_complete() {
        ctx.render_quantum()?;
    }
    log::debug!("rendered {} cue", location.label());
    ctx.take_rendered()
}
