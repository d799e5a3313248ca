//! Effect presets — which trajectory family drives the spatializer, and the
//! user-tweakable parameters of the `Custom` preset.
//!
//! These types cross the WASM boundary as JSON, so field names are camelCase
//! and the path names used by the preset generator (`circular`,
//! `wide-arc`, `figure-eight`) are accepted as-is.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeaverError};

/// Allowed range for [`CustomParameters::speed`].
pub const SPEED_RANGE: (f32, f32) = (0.4, 4.0);
/// Allowed range for [`CustomParameters::width`] (meters).
pub const WIDTH_RANGE: (f32, f32) = (0.5, 8.0);
/// Allowed range for the three EQ band gains (dB).
pub const EQ_GAIN_RANGE: (f32, f32) = (-10.0, 10.0);

/// Loop period of a custom path at speed 1.0. Speed divides it, so the
/// speed range maps onto a 2–20 s loop.
pub const CUSTOM_BASE_PERIOD: f64 = 8.0;

/// Wet level of the fixed 11D room.
pub const ELEVEN_D_REVERB_MIX: f32 = 0.4;

/// Geometric shape of a custom trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MovementPath {
    #[default]
    #[serde(alias = "circular")]
    Circle,
    WideArc,
    FigureEight,
}

/// Parameters of the `Custom` preset.
///
/// Values outside their documented ranges are clamped by [`clamped`];
/// non-finite values are rejected by [`validate`].
///
/// [`clamped`]: CustomParameters::clamped
/// [`validate`]: CustomParameters::validate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomParameters {
    pub movement_path: MovementPath,
    /// Higher is faster (shorter loop period).
    pub speed: f32,
    /// Orbit radius in meters.
    pub width: f32,
    /// Reverb wet level [0, 1]. Zero removes the reverb branch entirely.
    pub reverb_mix: f32,
    pub bass_gain_db: f32,
    pub mid_gain_db: f32,
    pub treble_gain_db: f32,
}

impl Default for CustomParameters {
    fn default() -> Self {
        Self {
            movement_path: MovementPath::Circle,
            speed: 1.0,
            width: 3.0,
            reverb_mix: 0.0,
            bass_gain_db: 0.0,
            mid_gain_db: 0.0,
            treble_gain_db: 0.0,
        }
    }
}

impl CustomParameters {
    /// Reject values that cannot be clamped into range.
    pub fn validate(&self) -> Result<()> {
        let fields: [(&'static str, f32); 6] = [
            ("speed", self.speed),
            ("width", self.width),
            ("reverbMix", self.reverb_mix),
            ("bassGainDb", self.bass_gain_db),
            ("midGainDb", self.mid_gain_db),
            ("trebleGainDb", self.treble_gain_db),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(WeaverError::InvalidParameter {
                    name,
                    reason: format!("{value} is not a finite number"),
                });
            }
        }
        Ok(())
    }

    /// Copy with every field forced into its allowed range.
    pub fn clamped(&self) -> Self {
        Self {
            movement_path: self.movement_path,
            speed: self.speed.clamp(SPEED_RANGE.0, SPEED_RANGE.1),
            width: self.width.clamp(WIDTH_RANGE.0, WIDTH_RANGE.1),
            reverb_mix: self.reverb_mix.clamp(0.0, 1.0),
            bass_gain_db: self.bass_gain_db.clamp(EQ_GAIN_RANGE.0, EQ_GAIN_RANGE.1),
            mid_gain_db: self.mid_gain_db.clamp(EQ_GAIN_RANGE.0, EQ_GAIN_RANGE.1),
            treble_gain_db: self.treble_gain_db.clamp(EQ_GAIN_RANGE.0, EQ_GAIN_RANGE.1),
        }
    }

    /// Loop period in seconds; inversely proportional to speed.
    pub fn period_seconds(&self) -> f64 {
        let speed = self.speed.clamp(SPEED_RANGE.0, SPEED_RANGE.1) as f64;
        CUSTOM_BASE_PERIOD / speed
    }
}

/// Gains of the three-band EQ pre-stage, in dB.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EqGains {
    pub bass_db: f32,
    pub mid_db: f32,
    pub treble_db: f32,
}

/// The active spatial effect. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "effect", content = "params")]
pub enum EffectPreset {
    /// Slow sweep across the front hemisphere.
    #[serde(rename = "4D")]
    FourD,
    /// Uniform horizontal orbit.
    #[default]
    #[serde(rename = "8D")]
    EightD,
    /// Figure-eight weave with proximity gain, depth filtering and reverb.
    #[serde(rename = "11D")]
    ElevenD,
    Custom(CustomParameters),
}

impl EffectPreset {
    pub fn label(&self) -> &'static str {
        match self {
            EffectPreset::FourD => "4D",
            EffectPreset::EightD => "8D",
            EffectPreset::ElevenD => "11D",
            EffectPreset::Custom(_) => "Custom",
        }
    }

    pub fn custom(&self) -> Option<&CustomParameters> {
        match self {
            EffectPreset::Custom(p) => Some(p),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            EffectPreset::Custom(p) => p.validate(),
            _ => Ok(()),
        }
    }

    /// Wet level of the reverb branch, or `None` when the graph should have
    /// no reverb branch at all.
    pub fn reverb_mix(&self) -> Option<f32> {
        match self {
            EffectPreset::ElevenD => Some(ELEVEN_D_REVERB_MIX),
            EffectPreset::Custom(p) => {
                let mix = p.reverb_mix.clamp(0.0, 1.0);
                (mix > 0.0).then_some(mix)
            }
            EffectPreset::FourD | EffectPreset::EightD => None,
        }
    }

    /// EQ band gains: flat for the fixed presets.
    pub fn eq_gains(&self) -> EqGains {
        match self {
            EffectPreset::Custom(p) => {
                let p = p.clamped();
                EqGains {
                    bass_db: p.bass_gain_db,
                    mid_db: p.mid_gain_db,
                    treble_db: p.treble_gain_db,
                }
            }
            _ => EqGains::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_json_uses_effect_labels() {
        let json = serde_json::to_string(&EffectPreset::ElevenD).unwrap();
        assert_eq!(json, r#"{"effect":"11D"}"#);

        let parsed: EffectPreset = serde_json::from_str(r#"{"effect":"4D"}"#).unwrap();
        assert_eq!(parsed, EffectPreset::FourD);
    }

    #[test]
    fn custom_json_accepts_generator_path_names() {
        let json = r#"{"effect":"Custom","params":{"movementPath":"circular","speed":2.0}}"#;
        let parsed: EffectPreset = serde_json::from_str(json).unwrap();
        let p = parsed.custom().copied().unwrap();
        assert_eq!(p.movement_path, MovementPath::Circle);
        assert_eq!(p.speed, 2.0);
        // Missing fields fall back to defaults
        assert_eq!(p.width, 3.0);

        let p: CustomParameters =
            serde_json::from_str(r#"{"movementPath":"figure-eight"}"#).unwrap();
        assert_eq!(p.movement_path, MovementPath::FigureEight);
    }

    #[test]
    fn clamped_forces_ranges() {
        let p = CustomParameters {
            speed: 100.0,
            width: 0.0,
            reverb_mix: 2.0,
            bass_gain_db: -40.0,
            mid_gain_db: 3.0,
            treble_gain_db: 25.0,
            ..Default::default()
        }
        .clamped();
        assert_eq!(p.speed, SPEED_RANGE.1);
        assert_eq!(p.width, WIDTH_RANGE.0);
        assert_eq!(p.reverb_mix, 1.0);
        assert_eq!(p.bass_gain_db, -10.0);
        assert_eq!(p.mid_gain_db, 3.0);
        assert_eq!(p.treble_gain_db, 10.0);
    }

    #[test]
    fn validate_rejects_nan() {
        let p = CustomParameters {
            width: f32::NAN,
            ..Default::default()
        };
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("width"));
    }

    #[test]
    fn faster_speed_means_shorter_period() {
        let slow = CustomParameters { speed: 0.5, ..Default::default() };
        let fast = CustomParameters { speed: 2.0, ..Default::default() };
        assert!(fast.period_seconds() < slow.period_seconds());
        // The whole speed range stays inside the 2–20 s loop window
        let min = CustomParameters { speed: 0.0, ..Default::default() };
        let max = CustomParameters { speed: 1e6, ..Default::default() };
        assert!((min.period_seconds() - 20.0).abs() < 1e-4);
        assert!((max.period_seconds() - 2.0).abs() < 1e-4);
    }

    #[test]
    fn reverb_branch_selection() {
        assert_eq!(EffectPreset::FourD.reverb_mix(), None);
        assert_eq!(EffectPreset::EightD.reverb_mix(), None);
        assert_eq!(EffectPreset::ElevenD.reverb_mix(), Some(ELEVEN_D_REVERB_MIX));

        let dry = EffectPreset::Custom(CustomParameters::default());
        assert_eq!(dry.reverb_mix(), None);
        let wet = EffectPreset::Custom(CustomParameters {
            reverb_mix: 0.25,
            ..Default::default()
        });
        assert_eq!(wet.reverb_mix(), Some(0.25));
    }

    #[test]
    fn eq_is_flat_unless_custom() {
        assert_eq!(EffectPreset::ElevenD.eq_gains(), EqGains::default());
        let p = EffectPreset::Custom(CustomParameters {
            bass_gain_db: 4.0,
            treble_gain_db: -3.0,
            ..Default::default()
        });
        let eq = p.eq_gains();
        assert_eq!(eq.bass_db, 4.0);
        assert_eq!(eq.mid_db, 0.0);
        assert_eq!(eq.treble_db, -3.0);
    }
}
