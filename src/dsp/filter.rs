//! Biquad filter — matches WebAudio BiquadFilterNode coefficients.

use std::f64::consts::PI;

/// Filter type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterType {
    Lowpass,
    Lowshelf,
    Peaking,
    Highshelf,
}

/// A biquad IIR filter (2nd order).
///
/// Implements the standard Direct Form II Transposed structure.
/// Coefficient formulas from the Audio EQ Cookbook (Robert Bristow-Johnson),
/// with shelf slope fixed at 1 as in WebAudio.
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    pub filter_type: FilterType,
    pub frequency: f64,
    pub q: f64,
    pub gain_db: f64, // shelves and peaking only

    // Coefficients
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,

    // State (Direct Form II Transposed)
    z1: f64,
    z2: f64,

    sample_rate: f64,
    dirty: bool,
}

impl BiquadFilter {
    pub fn new(filter_type: FilterType, sample_rate: f64) -> Self {
        let mut f = BiquadFilter {
            filter_type,
            frequency: 350.0,
            q: 0.707, // Butterworth
            gain_db: 0.0,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
            sample_rate,
            dirty: true,
        };
        f.update_coefficients();
        f
    }

    fn set_passthrough(&mut self, gain: f64) {
        self.b0 = gain;
        self.b1 = 0.0;
        self.b2 = 0.0;
        self.a1 = 0.0;
        self.a2 = 0.0;
    }

    /// Recompute filter coefficients from current parameters.
    pub fn update_coefficients(&mut self) {
        self.dirty = false;
        let nyquist = self.sample_rate / 2.0;

        // Degenerate frequencies collapse to a flat gain like WebAudio does
        if self.frequency >= nyquist {
            // A low shelf at Nyquist covers the whole band
            let gain = if self.filter_type == FilterType::Lowshelf {
                10.0_f64.powf(self.gain_db / 20.0)
            } else {
                1.0
            };
            self.set_passthrough(gain);
            return;
        }
        if self.frequency <= 0.0 {
            let gain = match self.filter_type {
                FilterType::Lowpass => 0.0,
                FilterType::Highshelf => 10.0_f64.powf(self.gain_db / 20.0),
                FilterType::Lowshelf | FilterType::Peaking => 1.0,
            };
            self.set_passthrough(gain);
            return;
        }

        let w0 = 2.0 * PI * self.frequency / self.sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let q = self.q.max(1e-4);

        let (b0, b1, b2, a0, a1, a2) = match self.filter_type {
            FilterType::Lowpass => {
                let alpha = sin_w0 / (2.0 * q);
                let b1 = 1.0 - cos_w0;
                let b0 = b1 / 2.0;
                let b2 = b0;
                let a0 = 1.0 + alpha;
                let a1 = -2.0 * cos_w0;
                let a2 = 1.0 - alpha;
                (b0, b1, b2, a0, a1, a2)
            }
            FilterType::Peaking => {
                let alpha = sin_w0 / (2.0 * q);
                let a_lin = (10.0_f64).powf(self.gain_db / 40.0);
                let b0 = 1.0 + alpha * a_lin;
                let b1 = -2.0 * cos_w0;
                let b2 = 1.0 - alpha * a_lin;
                let a0 = 1.0 + alpha / a_lin;
                let a1 = -2.0 * cos_w0;
                let a2 = 1.0 - alpha / a_lin;
                (b0, b1, b2, a0, a1, a2)
            }
            FilterType::Lowshelf => {
                let a_lin = (10.0_f64).powf(self.gain_db / 40.0);
                let alpha = sin_w0 / 2.0 * std::f64::consts::SQRT_2;
                let k = 2.0 * a_lin.sqrt() * alpha;
                let b0 = a_lin * ((a_lin + 1.0) - (a_lin - 1.0) * cos_w0 + k);
                let b1 = 2.0 * a_lin * ((a_lin - 1.0) - (a_lin + 1.0) * cos_w0);
                let b2 = a_lin * ((a_lin + 1.0) - (a_lin - 1.0) * cos_w0 - k);
                let a0 = (a_lin + 1.0) + (a_lin - 1.0) * cos_w0 + k;
                let a1 = -2.0 * ((a_lin - 1.0) + (a_lin + 1.0) * cos_w0);
                let a2 = (a_lin + 1.0) + (a_lin - 1.0) * cos_w0 - k;
                (b0, b1, b2, a0, a1, a2)
            }
            FilterType::Highshelf => {
                let a_lin = (10.0_f64).powf(self.gain_db / 40.0);
                let alpha = sin_w0 / 2.0 * std::f64::consts::SQRT_2;
                let k = 2.0 * a_lin.sqrt() * alpha;
                let b0 = a_lin * ((a_lin + 1.0) + (a_lin - 1.0) * cos_w0 + k);
                let b1 = -2.0 * a_lin * ((a_lin - 1.0) + (a_lin + 1.0) * cos_w0);
                let b2 = a_lin * ((a_lin + 1.0) + (a_lin - 1.0) * cos_w0 - k);
                let a0 = (a_lin + 1.0) - (a_lin - 1.0) * cos_w0 + k;
                let a1 = 2.0 * ((a_lin - 1.0) - (a_lin + 1.0) * cos_w0);
                let a2 = (a_lin + 1.0) - (a_lin - 1.0) * cos_w0 - k;
                (b0, b1, b2, a0, a1, a2)
            }
        };

        // Normalize by a0
        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
    }

    /// Process a single sample through the filter.
    pub fn process(&mut self, input: f64) -> f64 {
        if self.dirty {
            self.update_coefficients();
        }

        let output = self.b0 * input + self.z1;
        self.z1 = self.b1 * input - self.a1 * output + self.z2;
        self.z2 = self.b2 * input - self.a2 * output;
        output
    }

    /// Run a block of f32 samples in place.
    pub fn process_block(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            *s = self.process(*s as f64) as f32;
        }
    }

    /// Set frequency and mark coefficients dirty if it changed.
    pub fn set_frequency(&mut self, freq: f64) {
        if freq != self.frequency {
            self.frequency = freq;
            self.dirty = true;
        }
    }

    /// Set Q and mark coefficients dirty if it changed.
    pub fn set_q(&mut self, q: f64) {
        if q != self.q {
            self.q = q;
            self.dirty = true;
        }
    }

    /// Set gain (dB) and mark coefficients dirty if it changed.
    pub fn set_gain_db(&mut self, gain_db: f64) {
        if gain_db != self.gain_db {
            self.gain_db = gain_db;
            self.dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_peak(f: &mut BiquadFilter, freq: f64, sr: f64) -> f64 {
        let mut max_out = 0.0_f64;
        for i in 0..8820 {
            let t = i as f64 / sr;
            let out = f.process((2.0 * PI * freq * t).sin());
            if i > 4410 {
                // skip transient
                max_out = max_out.max(out.abs());
            }
        }
        max_out
    }

    fn dc_gain(f: &mut BiquadFilter) -> f64 {
        let mut output = 0.0;
        for _ in 0..20000 {
            output = f.process(1.0);
        }
        output
    }

    #[test]
    fn lowpass_passes_dc() {
        let mut f = BiquadFilter::new(FilterType::Lowpass, 44100.0);
        f.set_frequency(5000.0);
        let output = dc_gain(&mut f);
        assert!(
            (output - 1.0).abs() < 0.001,
            "Lowpass should pass DC, got {output}"
        );
    }

    #[test]
    fn lowpass_attenuates_high_freq() {
        let mut f = BiquadFilter::new(FilterType::Lowpass, 44100.0);
        f.set_frequency(200.0);
        let max_out = sine_peak(&mut f, 10000.0, 44100.0);
        assert!(
            max_out < 0.01,
            "Lowpass@200Hz should strongly attenuate 10kHz, got amplitude {max_out}"
        );
    }

    #[test]
    fn lowpass_at_nyquist_is_transparent() {
        let mut f = BiquadFilter::new(FilterType::Lowpass, 44100.0);
        f.set_frequency(22050.0);
        for i in 0..100 {
            let x = ((i * 7919) % 200) as f64 / 100.0 - 1.0;
            assert_eq!(f.process(x), x);
        }
    }

    #[test]
    fn peaking_boosts_centre_frequency() {
        let mut f = BiquadFilter::new(FilterType::Peaking, 44100.0);
        f.set_frequency(1000.0);
        f.set_q(1.0);
        f.set_gain_db(6.0);
        let peak = sine_peak(&mut f, 1000.0, 44100.0);
        assert!((peak - 1.995).abs() < 0.05, "expected ~+6 dB, got {peak}");
    }

    #[test]
    fn lowshelf_scales_dc_by_gain() {
        let mut f = BiquadFilter::new(FilterType::Lowshelf, 44100.0);
        f.set_frequency(250.0);
        f.set_gain_db(10.0);
        let g = dc_gain(&mut f);
        assert!((g - 3.1623).abs() < 0.01, "expected +10 dB at DC, got {g}");
    }

    #[test]
    fn highshelf_leaves_dc_alone() {
        let mut f = BiquadFilter::new(FilterType::Highshelf, 44100.0);
        f.set_frequency(4000.0);
        f.set_gain_db(-10.0);
        let g = dc_gain(&mut f);
        assert!((g - 1.0).abs() < 0.001, "DC should be untouched, got {g}");
        let mut f = BiquadFilter::new(FilterType::Highshelf, 44100.0);
        f.set_frequency(4000.0);
        f.set_gain_db(-10.0);
        let hf = sine_peak(&mut f, 15000.0, 44100.0);
        assert!(hf < 0.45, "treble should be cut, got {hf}");
    }

    #[test]
    fn zero_gain_shelves_are_flat() {
        for ty in [FilterType::Lowshelf, FilterType::Peaking, FilterType::Highshelf] {
            let mut f = BiquadFilter::new(ty, 44100.0);
            f.set_frequency(1000.0);
            let peak = sine_peak(&mut f, 3000.0, 44100.0);
            assert!((peak - 1.0).abs() < 0.01, "{ty:?} not flat: {peak}");
        }
    }

    #[test]
    fn filter_output_finite() {
        let mut f = BiquadFilter::new(FilterType::Lowpass, 44100.0);
        f.set_frequency(1000.0);

        for i in 0..10000 {
            let input = if i % 100 == 0 { 1.0 } else { 0.0 };
            let out = f.process(input);
            assert!(out.is_finite(), "Filter output not finite at sample {i}");
        }
    }
}
