//! Trajectory function — where the source is, how loud it is and how bright
//! it sounds at a given elapsed time.
//!
//! [`sample`] is pure: it reads no clock and keeps no state, so the live
//! preview (one call per animation frame) and the offline export (one call
//! per fixed time step) produce identical curves for identical times.
//!
//! Coordinates follow the WebAudio listener convention: listener at the
//! origin, facing −z, +x to the right, +y up.

use std::f64::consts::{PI, TAU};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::effect::{EffectPreset, MovementPath};

/// Shortest loop period accepted, in seconds.
pub const MIN_PERIOD_SECONDS: f64 = 0.5;
/// A cutoff at or above this means "no attenuation".
pub const FILTER_BYPASS_HZ: f32 = 22050.0;
pub const MIN_CUTOFF_HZ: f32 = 20.0;
/// Bounds of the proximity gain envelope.
pub const MIN_GAIN: f32 = 0.35;
pub const MAX_GAIN: f32 = 1.0;

/// Within this fraction of the radius the source is "close" and ducks.
const PROXIMITY_FRACTION: f32 = 0.5;
const PROXIMITY_EXPONENT: f32 = 1.75;
const CUTOFF_BASE_HZ: f32 = 2500.0;
const CUTOFF_RANGE_HZ: f32 = 15000.0;
/// Peak height of the figure-eight's vertical weave (meters).
const VERTICAL_WEAVE: f32 = 0.5;

/// One point of a trajectory. Recomputed every tick, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectorySample {
    /// Source position in meters.
    pub position: Vec3,
    /// Source gain [MIN_GAIN, MAX_GAIN].
    pub gain: f32,
    /// Low-pass cutoff in Hz.
    pub filter_cutoff_hz: f32,
}

/// Resolved geometry of a preset: path shape, size and speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orbit {
    pub path: MovementPath,
    pub radius: f32,
    /// Seconds per loop. Floored at [`MIN_PERIOD_SECONDS`].
    pub period: f64,
    /// Gain used by paths without a proximity envelope.
    pub gain: f32,
}

impl Orbit {
    pub fn for_preset(preset: &EffectPreset) -> Self {
        match preset {
            EffectPreset::FourD => Orbit {
                path: MovementPath::WideArc,
                radius: 3.0,
                period: 10.0,
                gain: 0.95,
            },
            EffectPreset::EightD => Orbit {
                path: MovementPath::Circle,
                radius: 3.0,
                period: 8.0,
                gain: MAX_GAIN,
            },
            EffectPreset::ElevenD => Orbit {
                path: MovementPath::FigureEight,
                radius: 3.0,
                period: 12.0,
                gain: MAX_GAIN,
            },
            EffectPreset::Custom(params) => {
                let p = params.clamped();
                Orbit {
                    path: p.movement_path,
                    radius: p.width,
                    period: p.period_seconds(),
                    gain: MAX_GAIN,
                }
            }
        }
    }

    fn effective_period(&self) -> f64 {
        if self.period.is_finite() {
            self.period.max(MIN_PERIOD_SECONDS)
        } else {
            MIN_PERIOD_SECONDS
        }
    }

    /// Evaluate the orbit at `elapsed` seconds.
    pub fn sample(&self, elapsed: f64) -> TrajectorySample {
        let t = if elapsed.is_finite() { elapsed.max(0.0) } else { 0.0 };
        let period = self.effective_period();
        let r = self.radius.max(0.0);

        match self.path {
            MovementPath::WideArc => {
                // Half a turn per period, folded into the front hemisphere:
                // right -> front -> left -> front -> right.
                let angle = (t % (2.0 * period)) * (PI / period);
                let x = r * angle.cos() as f32;
                let z = -r * (angle.sin() as f32).abs();
                TrajectorySample {
                    position: Vec3::new(x, 0.0, z),
                    gain: self.gain.clamp(MIN_GAIN, MAX_GAIN),
                    filter_cutoff_hz: FILTER_BYPASS_HZ,
                }
            }
            MovementPath::Circle => {
                let angle = (t % period) * (TAU / period);
                let x = r * angle.sin() as f32;
                let z = r * angle.cos() as f32;
                TrajectorySample {
                    position: Vec3::new(x, 0.0, z),
                    gain: self.gain.clamp(MIN_GAIN, MAX_GAIN),
                    filter_cutoff_hz: FILTER_BYPASS_HZ,
                }
            }
            MovementPath::FigureEight => {
                let angle = (t % period) * (TAU / period);
                let (s, c) = angle.sin_cos();
                let x = r * s as f32;
                // Lemniscate of Gerono: crosses the listener twice per loop
                let z = r * (s * c) as f32;
                let y = VERTICAL_WEAVE * (2.0 * angle).cos() as f32;
                let position = Vec3::new(x, y, z);
                TrajectorySample {
                    position,
                    gain: proximity_gain(position.length(), r),
                    filter_cutoff_hz: depth_cutoff(z, r * 0.5),
                }
            }
        }
    }
}

/// Sample the trajectory of `preset` at `elapsed` seconds.
pub fn sample(elapsed: f64, preset: &EffectPreset) -> TrajectorySample {
    Orbit::for_preset(preset).sample(elapsed)
}

/// Duck the gain when the source passes close to the listener. Outside the
/// proximity zone the gain is [`MAX_GAIN`]; inside it falls along a convex
/// power curve towards [`MIN_GAIN`].
pub fn proximity_gain(distance: f32, radius: f32) -> f32 {
    let threshold = radius * PROXIMITY_FRACTION;
    if !(threshold > 0.0) || !distance.is_finite() || distance >= threshold {
        return MAX_GAIN;
    }
    let n = (distance / threshold).max(0.0);
    (MIN_GAIN + (MAX_GAIN - MIN_GAIN) * n.powf(PROXIMITY_EXPONENT)).clamp(MIN_GAIN, MAX_GAIN)
}

/// Map front/back depth onto a low-pass cutoff: bright in front (−z),
/// darker behind (+z).
pub fn depth_cutoff(z: f32, max_depth: f32) -> f32 {
    let zn = if max_depth > 0.0 && z.is_finite() {
        (z / max_depth).clamp(-1.0, 1.0)
    } else {
        0.0
    };
    let frontness = (1.0 - zn) * 0.5;
    (CUTOFF_BASE_HZ + CUTOFF_RANGE_HZ * frontness).clamp(MIN_CUTOFF_HZ, FILTER_BYPASS_HZ)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::CustomParameters;
    use approx::assert_relative_eq;

    fn times() -> impl Iterator<Item = f64> {
        (0..4000).map(|i| i as f64 * 0.0137)
    }

    #[test]
    fn sample_is_deterministic() {
        let presets = [
            EffectPreset::FourD,
            EffectPreset::EightD,
            EffectPreset::ElevenD,
            EffectPreset::Custom(CustomParameters {
                movement_path: MovementPath::FigureEight,
                speed: 1.7,
                width: 4.5,
                ..Default::default()
            }),
        ];
        for preset in &presets {
            for t in times() {
                let a = sample(t, preset);
                let b = sample(t, preset);
                assert_eq!(a.position.x.to_bits(), b.position.x.to_bits());
                assert_eq!(a.position.y.to_bits(), b.position.y.to_bits());
                assert_eq!(a.position.z.to_bits(), b.position.z.to_bits());
                assert_eq!(a.gain.to_bits(), b.gain.to_bits());
                assert_eq!(a.filter_cutoff_hz.to_bits(), b.filter_cutoff_hz.to_bits());
            }
        }
    }

    #[test]
    fn circle_keeps_constant_radius() {
        let orbit = Orbit::for_preset(&EffectPreset::EightD);
        for t in times() {
            let s = orbit.sample(t);
            let r = (s.position.x.powi(2) + s.position.z.powi(2)).sqrt();
            assert_relative_eq!(r, orbit.radius, epsilon = 1e-4);
            assert_eq!(s.position.y, 0.0);
            assert_eq!(s.filter_cutoff_hz, FILTER_BYPASS_HZ);
        }
    }

    #[test]
    fn circle_starts_behind_and_moves_right() {
        let s0 = sample(0.0, &EffectPreset::EightD);
        assert_relative_eq!(s0.position.z, 3.0, epsilon = 1e-6);
        // Quarter period later: x = radius
        let s1 = sample(2.0, &EffectPreset::EightD);
        assert_relative_eq!(s1.position.x, 3.0, epsilon = 1e-5);
    }

    #[test]
    fn wide_arc_stays_in_front() {
        for t in times() {
            let s = sample(t, &EffectPreset::FourD);
            assert!(s.position.z <= 0.0, "behind listener at t={t}: {:?}", s.position);
            assert_relative_eq!(s.position.length(), 3.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn eleven_d_gain_stays_in_bounds() {
        for t in times() {
            let s = sample(t, &EffectPreset::ElevenD);
            assert!(s.gain >= MIN_GAIN && s.gain <= MAX_GAIN, "gain {} at t={t}", s.gain);
            assert!(s.filter_cutoff_hz >= MIN_CUTOFF_HZ);
            assert!(s.filter_cutoff_hz <= FILTER_BYPASS_HZ);
        }
    }

    #[test]
    fn eleven_d_ducks_at_the_crossing() {
        // At t = 0 the path passes over the listener's head
        let crossing = sample(0.0, &EffectPreset::ElevenD);
        // At a quarter loop it is at the far right
        let wide = sample(3.0, &EffectPreset::ElevenD);
        assert!(crossing.gain < wide.gain);
        assert_relative_eq!(wide.gain, MAX_GAIN);
    }

    #[test]
    fn eleven_d_weaves_vertically() {
        let top = sample(0.0, &EffectPreset::ElevenD);
        let side = sample(3.0, &EffectPreset::ElevenD);
        assert_relative_eq!(top.position.y, VERTICAL_WEAVE, epsilon = 1e-6);
        assert_relative_eq!(side.position.y, -VERTICAL_WEAVE, epsilon = 1e-5);
    }

    #[test]
    fn depth_cutoff_darkens_behind() {
        let front = depth_cutoff(-1.5, 1.5);
        let centre = depth_cutoff(0.0, 1.5);
        let back = depth_cutoff(1.5, 1.5);
        assert!(front > centre && centre > back);
        assert_relative_eq!(front, CUTOFF_BASE_HZ + CUTOFF_RANGE_HZ);
        assert_relative_eq!(back, CUTOFF_BASE_HZ);
    }

    #[test]
    fn proximity_gain_is_clamped_and_monotonic() {
        assert_eq!(proximity_gain(0.0, 3.0), MIN_GAIN);
        assert_eq!(proximity_gain(100.0, 3.0), MAX_GAIN);
        assert_eq!(proximity_gain(1.0, 0.0), MAX_GAIN);
        assert_eq!(proximity_gain(f32::NAN, 3.0), MAX_GAIN);
        let mut prev = proximity_gain(0.0, 3.0);
        for i in 1..=150 {
            let g = proximity_gain(i as f32 * 0.01, 3.0);
            assert!(g >= prev);
            prev = g;
        }
    }

    #[test]
    fn period_has_a_floor() {
        let orbit = Orbit {
            path: MovementPath::Circle,
            radius: 2.0,
            period: 0.0,
            gain: 1.0,
        };
        let s = orbit.sample(1.234);
        assert!(s.position.is_finite());

        let orbit = Orbit { period: -5.0, ..orbit };
        assert!(orbit.sample(7.0).position.is_finite());
    }

    #[test]
    fn negative_or_nan_time_is_treated_as_zero() {
        let zero = sample(0.0, &EffectPreset::ElevenD);
        assert_eq!(sample(-3.0, &EffectPreset::ElevenD), zero);
        assert_eq!(sample(f64::NAN, &EffectPreset::ElevenD), zero);
    }

    #[test]
    fn custom_width_and_speed_drive_geometry() {
        let p = CustomParameters {
            movement_path: MovementPath::Circle,
            width: 5.0,
            speed: 2.0,
            ..Default::default()
        };
        let orbit = Orbit::for_preset(&EffectPreset::Custom(p));
        assert_eq!(orbit.radius, 5.0);
        assert_relative_eq!(orbit.period, 4.0);
        let s = orbit.sample(1.0);
        // Quarter of a 4 s loop
        assert_relative_eq!(s.position.x, 5.0, epsilon = 1e-5);
    }
}
