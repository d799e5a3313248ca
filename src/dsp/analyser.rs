//! Keeps the most recent `fft_size` samples of the (mono
//! downmixed) signal for a visualiser. Audio passes through untouched.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

pub const DEFAULT_FFT_SIZE: usize = 512;
const SMOOTHING: f32 = 0.8;
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

pub struct Analyser {
    fft_size: usize,
    ring: Vec<f32>,
    write_pos: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
}

impl std::fmt::Debug for Analyser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyser").field("fft_size", &self.fft_size).finish()
    }
}

impl Analyser {
    /// `fft_size` is rounded up to a power of two within 32..=32768.
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.clamp(32, 32768).next_power_of_two();
        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        // Blackman window
        let n = fft_size as f32;
        let window = (0..fft_size)
            .map(|i| {
                let x = i as f32 / n;
                0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
            })
            .collect();
        Self {
            fft_size,
            ring: vec![0.0; fft_size],
            write_pos: 0,
            fft,
            window,
            smoothed: vec![0.0; fft_size / 2],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Record a block of stereo audio.
    pub fn push(&mut self, left: &[f32], right: &[f32]) {
        for (&l, &r) in left.iter().zip(right) {
            self.ring[self.write_pos] = 0.5 * (l + r);
            self.write_pos = (self.write_pos + 1) % self.fft_size;
        }
    }

    /// Oldest-to-newest copy of the captured samples.
    pub fn float_time_domain_data(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.fft_size);
        out.extend_from_slice(&self.ring[self.write_pos..]);
        out.extend_from_slice(&self.ring[..self.write_pos]);
        out
    }

    /// Time-domain data as unsigned bytes (128 = silence).
    pub fn byte_time_domain_data(&self) -> Vec<u8> {
        self.float_time_domain_data()
            .iter()
            .map(|s| (128.0 * (1.0 + s)).clamp(0.0, 255.0) as u8)
            .collect()
    }

    /// Smoothed magnitude spectrum in dB, one value per bin.
    pub fn float_frequency_data(&mut self) -> Vec<f32> {
        let mut spectrum: Vec<Complex32> = self
            .float_time_domain_data()
            .iter()
            .zip(&self.window)
            .map(|(s, w)| Complex32::new(s * w, 0.0))
            .collect();
        self.fft.process(&mut spectrum);

        let scale = 1.0 / self.fft_size as f32;
        self.smoothed
            .iter_mut()
            .zip(&spectrum)
            .map(|(prev, bin)| {
                *prev = SMOOTHING * *prev + (1.0 - SMOOTHING) * bin.norm() * scale;
                if *prev > 0.0 {
                    20.0 * prev.log10()
                } else {
                    f32::NEG_INFINITY
                }
            })
            .collect()
    }

    /// Spectrum mapped from [−100, −30] dB onto 0..=255.
    pub fn byte_frequency_data(&mut self) -> Vec<u8> {
        let range = MAX_DECIBELS - MIN_DECIBELS;
        self.float_frequency_data()
            .iter()
            .map(|db| (255.0 * (db - MIN_DECIBELS) / range).clamp(0.0, 255.0) as u8)
            .collect()
    }
}
