//! Engine configuration.
//!
//! Every field has a default; a JSON document only needs to name what it
//! overrides.

use serde::{Deserialize, Serialize};

use crate::dsp::panner::{Distance, DistanceModel, PanningModel};
use crate::error::{Result, WeaverError};

/// Shape of the synthesized reverb impulse response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImpulseConfig {
    /// Tail length in seconds.
    pub duration: f64,
    /// Exponent of the `(1 - n)^decay` envelope.
    pub decay: f64,
    /// Depth of the slow amplitude wobble applied to the tail (0 = none).
    pub modulation_depth: f64,
    /// Wobble rate in Hz.
    pub modulation_rate: f64,
}

impl Default for ImpulseConfig {
    fn default() -> Self {
        Self {
            duration: 2.5,
            decay: 3.0,
            modulation_depth: 0.15,
            modulation_rate: 3.3,
        }
    }
}

/// Settings of the mastering compressor at the end of every chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompressorConfig {
    /// Threshold in dB.
    pub threshold: f64,
    /// Knee width in dB.
    pub knee: f64,
    /// Compression ratio.
    pub ratio: f64,
    /// Attack time in seconds.
    pub attack: f64,
    /// Release time in seconds.
    pub release: f64,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            threshold: -18.0,
            knee: 12.0,
            ratio: 10.0,
            attack: 0.003,
            release: 0.25,
        }
    }
}

/// How the effect graph spatializes its source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PannerConfig {
    /// `hrtf` (binaural) or `equal-power` for plain amplitude panning.
    pub panning_model: PanningModel,
    pub distance_model: DistanceModel,
    pub ref_distance: f32,
    pub max_distance: f32,
    pub rolloff_factor: f32,
}

impl Default for PannerConfig {
    fn default() -> Self {
        let distance = Distance::default();
        Self {
            panning_model: PanningModel::Hrtf,
            distance_model: distance.model,
            ref_distance: distance.ref_distance,
            max_distance: distance.max_distance,
            rolloff_factor: distance.rolloff_factor,
        }
    }
}

impl PannerConfig {
    pub fn distance(&self) -> Distance {
        Distance {
            model: self.distance_model,
            ref_distance: self.ref_distance,
            max_distance: self.max_distance,
            rolloff_factor: self.rolloff_factor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Sample rate of the realtime context, and of offline renders when the
    /// source rate is not used.
    pub sample_rate: f32,
    /// Length of the linear ramp each live tick schedules (seconds).
    pub ramp_seconds: f64,
    /// Spacing of the pre-scheduled automation points in offline renders.
    pub offline_step_seconds: f64,
    /// Render quanta processed per `RenderJob::step` call by the
    /// convenience render loop.
    pub quanta_per_step: usize,
    pub impulse: ImpulseConfig,
    pub compressor: CompressorConfig,
    pub panner: PannerConfig,
    /// How long a video capture must keep recording after the source ends.
    pub capture_tail_seconds: f64,
    /// Loop the source during live preview.
    pub loop_preview: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            ramp_seconds: 0.05,
            offline_step_seconds: 1.0 / 120.0,
            quanta_per_step: 64,
            impulse: ImpulseConfig::default(),
            compressor: CompressorConfig::default(),
            panner: PannerConfig::default(),
            capture_tail_seconds: 0.25,
            loop_preview: false,
        }
    }
}

fn check(ok: bool, what: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(WeaverError::Config(what.to_string()))
    }
}

impl EngineConfig {
    /// Parse a JSON document and validate the result.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| WeaverError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        check(
            self.sample_rate.is_finite() && self.sample_rate > 0.0,
            "sampleRate must be positive",
        )?;
        check(
            self.ramp_seconds.is_finite() && (0.0..=1.0).contains(&self.ramp_seconds),
            "rampSeconds must be within [0, 1]",
        )?;
        check(
            self.offline_step_seconds.is_finite()
                && self.offline_step_seconds > 0.0
                && self.offline_step_seconds <= 1.0 / 30.0,
            "offlineStepSeconds must be within (0, 1/30]",
        )?;
        check(self.quanta_per_step > 0, "quantaPerStep must be at least 1")?;
        check(
            self.impulse.duration.is_finite() && self.impulse.duration > 0.0 && self.impulse.duration <= 10.0,
            "impulse.duration must be within (0, 10]",
        )?;
        check(
            self.impulse.decay.is_finite() && self.impulse.decay > 0.0,
            "impulse.decay must be positive",
        )?;
        check(
            (0.0..=1.0).contains(&self.impulse.modulation_depth),
            "impulse.modulationDepth must be within [0, 1]",
        )?;
        check(
            self.impulse.modulation_rate.is_finite() && self.impulse.modulation_rate >= 0.0,
            "impulse.modulationRate must be non-negative",
        )?;
        check(
            self.compressor.ratio.is_finite() && self.compressor.ratio >= 1.0,
            "compressor.ratio must be at least 1",
        )?;
        check(
            self.compressor.threshold.is_finite() && self.compressor.threshold <= 0.0,
            "compressor.threshold must be at most 0 dB",
        )?;
        check(
            self.compressor.knee.is_finite() && self.compressor.knee >= 0.0,
            "compressor.knee must be non-negative",
        )?;
        check(
            self.compressor.attack > 0.0 && self.compressor.release > 0.0,
            "compressor attack and release must be positive",
        )?;
        check(
            self.panner.ref_distance.is_finite() && self.panner.ref_distance > 0.0,
            "panner.refDistance must be positive",
        )?;
        check(
            self.panner.max_distance.is_finite() && self.panner.max_distance >= self.panner.ref_distance,
            "panner.maxDistance must be at least panner.refDistance",
        )?;
        check(
            self.panner.rolloff_factor.is_finite() && self.panner.rolloff_factor >= 0.0,
            "panner.rolloffFactor must be non-negative",
        )?;
        check(
            self.capture_tail_seconds.is_finite() && self.capture_tail_seconds >= 0.0,
            "captureTailSeconds must be non-negative",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            EngineConfig::from_json(r#"{"rampSeconds":0.08,"compressor":{"ratio":12}}"#).unwrap();
        assert_eq!(config.ramp_seconds, 0.08);
        assert_eq!(config.compressor.ratio, 12.0);
        assert_eq!(config.compressor.knee, CompressorConfig::default().knee);
        assert_eq!(config.sample_rate, 44100.0);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = EngineConfig::from_json(r#"{"offlineStepSeconds":0.5}"#).unwrap_err();
        assert!(matches!(err, WeaverError::Config(_)));

        let err = EngineConfig::from_json(r#"{"compressor":{"ratio":0.5}}"#).unwrap_err();
        assert!(err.to_string().contains("ratio"));
    }

    #[test]
    fn panner_settings_parse_in_kebab_case() {
        let config = EngineConfig::from_json(
            r#"{"panner":{"panningModel":"equal-power","distanceModel":"exponential","rolloffFactor":2}}"#,
        )
        .unwrap();
        assert_eq!(config.panner.panning_model, PanningModel::EqualPower);
        let distance = config.panner.distance();
        assert_eq!(distance.model, DistanceModel::Exponential);
        assert_eq!(distance.rolloff_factor, 2.0);
        assert_eq!(distance.ref_distance, 1.0);

        let err = EngineConfig::from_json(r#"{"panner":{"maxDistance":0.5}}"#).unwrap_err();
        assert!(err.to_string().contains("maxDistance"));
        let err = EngineConfig::from_json(r#"{"panner":{"distanceModel":"cubic"}}"#).unwrap_err();
        assert!(matches!(err, WeaverError::Config(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = EngineConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, WeaverError::Config(_)));
    }
}
