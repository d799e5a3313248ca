//! Sine oscillator used for test tones: the localisation cues and the demo
//! arpeggio.

use std::f64::consts::TAU;

#[derive(Debug, Clone)]
pub struct Oscillator {
    pub frequency: f64,
    phase: f64,
    sample_rate: f64,
}

impl Oscillator {
    pub fn new(frequency: f64, sample_rate: f64) -> Self {
        Oscillator {
            frequency,
            phase: 0.0,
            sample_rate,
        }
    }

    /// Generate the next sample.
    pub fn next_sample(&mut self) -> f64 {
        let sample = (TAU * self.phase).sin();
        self.phase += self.frequency / self.sample_rate;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }
        sample
    }

    /// Fill `out` with successive samples.
    pub fn fill(&mut self, out: &mut [f32]) {
        for s in out.iter_mut() {
            *s = self.next_sample() as f32;
        }
    }

    /// Reset oscillator phase.
    pub fn reset(&mut self) {
        self.phase = 0.0;
    }
}
