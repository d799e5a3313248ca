//! Mastering compressor — the last stage of every chain.
//!
//! Implements a feed-forward compressor with threshold, ratio, knee,
//! attack, and release parameters matching the WebAudio DynamicsCompressorNode.
//! Detection is linked across channels so the stereo image does not shift.

use crate::config::CompressorConfig;

/// A stereo dynamics compressor.
#[derive(Debug, Clone)]
pub struct Compressor {
    sample_rate: f64,

    /// Threshold in dB (typical: -50 to 0).
    pub threshold: f64,
    /// Compression ratio (e.g., 4.0 = 4:1 compression).
    pub ratio: f64,
    /// Knee width in dB (0 = hard knee, higher = softer transition).
    pub knee: f64,
    /// Attack time in seconds.
    pub attack: f64,
    /// Release time in seconds.
    pub release: f64,
    /// Makeup gain in dB.
    pub makeup_gain: f64,

    // Internal state
    envelope: f64, // Current envelope level (linear)
    attack_coef: f64,
    release_coef: f64,
}

impl Compressor {
    /// Create a new compressor with default mastering settings.
    pub fn new(sample_rate: f64) -> Self {
        Self::from_config(sample_rate, &CompressorConfig::default())
    }

    /// Create a compressor from engine configuration.
    pub fn from_config(sample_rate: f64, config: &CompressorConfig) -> Self {
        let mut c = Self {
            sample_rate,
            threshold: config.threshold.clamp(-100.0, 0.0),
            ratio: config.ratio.clamp(1.0, 20.0),
            knee: config.knee.clamp(0.0, 40.0),
            attack: config.attack.clamp(0.0001, 1.0),
            release: config.release.clamp(0.001, 5.0),
            makeup_gain: 0.0,
            envelope: 0.0,
            attack_coef: 0.0,
            release_coef: 0.0,
        };
        c.update_coefficients();
        c
    }

    /// Recompute envelope coefficients after changing attack or release.
    pub fn update_coefficients(&mut self) {
        self.attack_coef = (-1.0 / (self.attack * self.sample_rate)).exp();
        self.release_coef = (-1.0 / (self.release * self.sample_rate)).exp();
    }

    /// Convert linear amplitude to dB.
    #[inline]
    fn linear_to_db(linear: f64) -> f64 {
        if linear <= 0.0 {
            -120.0
        } else {
            20.0 * linear.log10()
        }
    }

    /// Convert dB to linear amplitude.
    #[inline]
    fn db_to_linear(db: f64) -> f64 {
        10.0_f64.powf(db / 20.0)
    }

    /// Compute gain reduction for a given input level (in dB).
    #[inline]
    fn compute_gain(&self, input_db: f64) -> f64 {
        let threshold = self.threshold;
        let slope = 1.0 - 1.0 / self.ratio;
        let knee = self.knee;

        if knee <= 0.0 {
            if input_db <= threshold {
                0.0
            } else {
                (threshold - input_db) * slope
            }
        } else {
            let half_knee = knee / 2.0;
            let knee_start = threshold - half_knee;
            let knee_end = threshold + half_knee;

            if input_db <= knee_start {
                0.0
            } else if input_db >= knee_end {
                (threshold - input_db) * slope
            } else {
                // Quadratic transition through the knee
                let x = input_db - knee_start;
                -slope * x * x / (2.0 * knee)
            }
        }
    }

    /// Process a stereo sample pair.
    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let input_level = (left.abs()).max(right.abs()) as f64;

        let coef = if input_level > self.envelope {
            self.attack_coef
        } else {
            self.release_coef
        };
        self.envelope = coef * self.envelope + (1.0 - coef) * input_level;

        let envelope_db = Self::linear_to_db(self.envelope);
        let total_gain_db = self.compute_gain(envelope_db) + self.makeup_gain;
        let gain = Self::db_to_linear(total_gain_db) as f32;

        (left * gain, right * gain)
    }

    /// Process a block of stereo audio in-place.
    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        for i in 0..left.len().min(right.len()) {
            let (out_l, out_r) = self.process(left[i], right[i]);
            left[i] = out_l;
            right[i] = out_r;
        }
    }
}
