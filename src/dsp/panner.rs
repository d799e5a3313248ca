//! 3D spatializer — positions a mono signal around a listener at the origin
//! facing −z.
//!
//! Two panning models:
//! - `Hrtf`: a spherical-head binaural model. Interaural time difference
//!   follows Woodworth's formula and is applied with fractional delay lines;
//!   each ear gets a Brown–Duda head-shadow filter whose high-frequency gain
//!   depends on the angle between that ear and the source. A pinna stage
//!   then adds the cues a sphere lacks: a short reflection whose delay
//!   tracks elevation (moving the comb notch), and treble loss for sources
//!   behind the listener.
//! - `EqualPower`: constant-power amplitude panning by azimuth.
//!
//! Distance attenuation follows the WebAudio distance models.

use std::f64::consts::{FRAC_PI_2, PI};

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Head radius in meters.
const HEAD_RADIUS: f64 = 0.0875;
const SPEED_OF_SOUND: f64 = 343.0;
/// Head-shadow depth at the most shadowed angle.
const SHADOW_ALPHA_MIN: f64 = 0.1;
/// Angle (degrees) from the ear at which the shadow is deepest.
const SHADOW_THETA_MIN: f64 = 150.0;
/// Pinna reflection delay for a source straight below and straight above (seconds).
const PINNA_DELAY_LOW: f64 = 0.000_35;
const PINNA_DELAY_HIGH: f64 = 0.000_10;
/// Reflection gain at ear level; fades towards the poles.
const PINNA_REFLECTION: f64 = 0.25;
/// Corner of the rear treble loss.
const REAR_SHADOW_HZ: f64 = 2000.0;
/// Share of the signal replaced by its low-passed copy for a source straight behind.
const REAR_SHADOW_DEPTH: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PanningModel {
    EqualPower,
    #[default]
    Hrtf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistanceModel {
    Linear,
    #[default]
    Inverse,
    Exponential,
}

/// Distance attenuation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Distance {
    pub model: DistanceModel,
    pub ref_distance: f32,
    pub max_distance: f32,
    pub rolloff_factor: f32,
}

impl Default for Distance {
    fn default() -> Self {
        Self {
            model: DistanceModel::Inverse,
            ref_distance: 1.0,
            max_distance: 10000.0,
            rolloff_factor: 1.0,
        }
    }
}

impl Distance {
    /// Gain for a source `distance` meters away.
    pub fn gain(&self, distance: f32) -> f32 {
        let r = self.ref_distance.max(f32::EPSILON);
        let rolloff = self.rolloff_factor.max(0.0);
        match self.model {
            DistanceModel::Linear => {
                let max = self.max_distance.max(r);
                if max <= r {
                    return 1.0;
                }
                let d = distance.clamp(r, max);
                (1.0 - rolloff.min(1.0) * (d - r) / (max - r)).clamp(0.0, 1.0)
            }
            DistanceModel::Inverse => {
                let d = distance.max(r);
                r / (r + rolloff * (d - r))
            }
            DistanceModel::Exponential => {
                let d = distance.max(r);
                (d / r).powf(-rolloff)
            }
        }
    }
}

/// First-order head-shadow filter (Brown & Duda spherical-head model),
/// discretised with the bilinear transform.
#[derive(Debug, Clone)]
struct HeadShadow {
    /// `2 * sample_rate`
    k: f64,
    /// `2 * c / a`
    two_w0: f64,
    x1: f64,
    y1: f64,
}

impl HeadShadow {
    fn new(sample_rate: f64) -> Self {
        Self {
            k: 2.0 * sample_rate,
            two_w0: 2.0 * SPEED_OF_SOUND / HEAD_RADIUS,
            x1: 0.0,
            y1: 0.0,
        }
    }

    /// Shadow depth for a source `theta` radians away from the ear axis:
    /// 2.0 (+6 dB treble) facing the ear, down to 0.1 behind the head.
    fn alpha(theta: f64) -> f64 {
        let scaled = theta.to_degrees() / SHADOW_THETA_MIN * 180.0;
        (1.0 + SHADOW_ALPHA_MIN / 2.0) + (1.0 - SHADOW_ALPHA_MIN / 2.0) * scaled.to_radians().cos()
    }

    fn process(&mut self, input: f64, alpha: f64) -> f64 {
        let b0 = self.two_w0 + alpha * self.k;
        let b1 = self.two_w0 - alpha * self.k;
        let a0 = self.two_w0 + self.k;
        let a1 = self.two_w0 - self.k;
        let y = (b0 * input + b1 * self.x1 - a1 * self.y1) / a0;
        self.x1 = input;
        self.y1 = y;
        y
    }
}

/// Fractional delay line for the interaural time difference.
#[derive(Debug, Clone)]
struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl DelayLine {
    fn new(max_delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; max_delay_samples + 2],
            write_pos: 0,
        }
    }

    /// Push `input` and read it back `delay` samples later (linear interpolation).
    fn process(&mut self, input: f32, delay: f64) -> f32 {
        let len = self.buffer.len();
        self.buffer[self.write_pos] = input;
        let delay = delay.clamp(0.0, (len - 2) as f64);
        let delay_int = delay as usize;
        let frac = (delay - delay_int as f64) as f32;
        let read_0 = (self.write_pos + len - delay_int) % len;
        let read_1 = (read_0 + len - 1) % len;
        let out = self.buffer[read_0] + frac * (self.buffer[read_1] - self.buffer[read_0]);
        self.write_pos = (self.write_pos + 1) % len;
        out
    }
}

/// Outer-ear cues for one ear: a concha reflection and rear treble loss.
#[derive(Debug, Clone)]
struct Pinna {
    sample_rate: f64,
    echo: DelayLine,
    /// One-pole lowpass coefficient for the rear shadow.
    coeff: f64,
    lp: f64,
}

impl Pinna {
    fn new(sample_rate: f64) -> Self {
        let max_delay = (PINNA_DELAY_LOW * sample_rate).ceil() as usize + 1;
        Self {
            sample_rate,
            echo: DelayLine::new(max_delay),
            coeff: 1.0 - (-2.0 * PI * REAR_SHADOW_HZ / sample_rate).exp(),
            lp: 0.0,
        }
    }

    /// `elevation` in radians (positive up), `rear` in [0, 1] (1 = straight behind).
    fn process(&mut self, input: f64, elevation: f64, rear: f64) -> f64 {
        let up = (elevation.clamp(-FRAC_PI_2, FRAC_PI_2) + FRAC_PI_2) / PI;
        let delay = (PINNA_DELAY_LOW + (PINNA_DELAY_HIGH - PINNA_DELAY_LOW) * up) * self.sample_rate;
        let reflection = PINNA_REFLECTION * (1.0 - elevation.abs() / FRAC_PI_2).max(0.0);
        let echoed = input + reflection * self.echo.process(input as f32, delay) as f64;

        self.lp += self.coeff * (echoed - self.lp);
        echoed + REAR_SHADOW_DEPTH * rear * (self.lp - echoed)
    }
}

/// Woodworth interaural time difference in seconds for lateral angle `theta`
/// (radians, positive to the right). Positive means the left ear hears later.
pub fn woodworth_itd(theta: f64) -> f64 {
    let theta = theta.clamp(-FRAC_PI_2, FRAC_PI_2);
    HEAD_RADIUS / SPEED_OF_SOUND * (theta + theta.sin())
}

/// Left/right gains of constant-power panning for an azimuth in
/// [−90°, 90°] (radians, positive to the right).
pub fn equal_power_gains(azimuth: f64) -> (f32, f32) {
    let x = (azimuth.clamp(-FRAC_PI_2, FRAC_PI_2) + FRAC_PI_2) / PI;
    let angle = x * FRAC_PI_2;
    (angle.cos() as f32, angle.sin() as f32)
}

/// Stereo spatializer for a mono input.
#[derive(Debug, Clone)]
pub struct Panner {
    pub panning_model: PanningModel,
    pub distance: Distance,
    sample_rate: f64,
    delay_l: DelayLine,
    delay_r: DelayLine,
    shadow_l: HeadShadow,
    shadow_r: HeadShadow,
    pinna_l: Pinna,
    pinna_r: Pinna,
}

impl Panner {
    pub fn new(sample_rate: f64, panning_model: PanningModel) -> Self {
        let max_itd = woodworth_itd(FRAC_PI_2) * sample_rate;
        let max_delay = max_itd.ceil() as usize + 1;
        Self {
            panning_model,
            distance: Distance::default(),
            sample_rate,
            delay_l: DelayLine::new(max_delay),
            delay_r: DelayLine::new(max_delay),
            shadow_l: HeadShadow::new(sample_rate),
            shadow_r: HeadShadow::new(sample_rate),
            pinna_l: Pinna::new(sample_rate),
            pinna_r: Pinna::new(sample_rate),
        }
    }

    /// Spatialize one sample of `input` for a source at `position`.
    pub fn process(&mut self, input: f32, position: Vec3) -> (f32, f32) {
        let d = position.length();
        let gain = self.distance.gain(d);
        let (l, r) = match self.panning_model {
            PanningModel::Hrtf => self.binaural(input, position, d),
            PanningModel::EqualPower => {
                let horizontal = (position.x * position.x + position.z * position.z).sqrt();
                let azimuth = if horizontal > f32::EPSILON {
                    ((position.x / horizontal) as f64).clamp(-1.0, 1.0).asin()
                } else {
                    0.0
                };
                let (gl, gr) = equal_power_gains(azimuth);
                (input * gl, input * gr)
            }
        };
        (l * gain, r * gain)
    }

    fn binaural(&mut self, input: f32, position: Vec3, d: f32) -> (f32, f32) {
        // Direction cosines; the listener faces −z, so +z is behind
        let (lateral, vertical, depth) = if d > f32::EPSILON {
            let unit = position / d;
            (
                unit.x.clamp(-1.0, 1.0) as f64,
                unit.y.clamp(-1.0, 1.0) as f64,
                unit.z.clamp(-1.0, 1.0) as f64,
            )
        } else {
            (0.0, 0.0, 0.0)
        };
        let theta = lateral.asin();
        let itd = woodworth_itd(theta) * self.sample_rate;
        let (delay_l, delay_r) = if itd >= 0.0 { (itd, 0.0) } else { (0.0, -itd) };

        let left = self.delay_l.process(input, delay_l) as f64;
        let right = self.delay_r.process(input, delay_r) as f64;

        let angle_r = lateral.acos();
        let angle_l = PI - angle_r;
        let left = self.shadow_l.process(left, HeadShadow::alpha(angle_l));
        let right = self.shadow_r.process(right, HeadShadow::alpha(angle_r));

        let elevation = vertical.asin();
        let rear = depth.max(0.0);
        let left = self.pinna_l.process(left, elevation, rear);
        let right = self.pinna_r.process(right, elevation, rear);
        (left as f32, right as f32)
    }
}
