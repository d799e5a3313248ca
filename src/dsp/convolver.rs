//! Convolution reverb — uniformly partitioned overlap-save FFT convolution.
//!
//! The impulse response is split into partitions of one render quantum, so
//! the convolver adds no latency: each output block already contains the
//! contribution of the input block that produced it.

use std::sync::Arc;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use crate::buffer::AudioBuffer;

/// Loudness calibration applied to normalised impulse responses (−58 dB).
const GAIN_CALIBRATION: f32 = 0.001_258_925_4;
/// Rate at which the calibration above was measured.
const GAIN_CALIBRATION_SAMPLE_RATE: f32 = 44100.0;
/// Floor for the impulse RMS so near-silent responses are not blown up.
const MIN_POWER: f32 = 0.000_125;

/// Scale that brings an impulse response to a consistent perceived level.
pub fn normalization_scale(impulse: &AudioBuffer) -> f32 {
    let channels = impulse.number_of_channels();
    let length = impulse.length();
    if length == 0 {
        return 1.0;
    }
    let mut power = 0.0_f64;
    for ch in 0..channels {
        if let Some(data) = impulse.channel(ch) {
            power += data.iter().map(|&s| s as f64 * s as f64).sum::<f64>();
        }
    }
    let power = ((power / (channels * length) as f64).sqrt() as f32).max(MIN_POWER);
    let mut scale = GAIN_CALIBRATION / power;
    scale *= GAIN_CALIBRATION_SAMPLE_RATE / impulse.sample_rate();
    scale
}

/// Single-channel partitioned convolver.
struct Partitioned {
    block: usize,
    /// Spectra of the impulse partitions, each `2 * block` bins.
    filters: Vec<Vec<Complex32>>,
    /// Frequency-domain delay line of past input spectra (ring).
    history: Vec<Vec<Complex32>>,
    head: usize,
    /// Previous input block followed by the current one.
    window: Vec<f32>,
    scratch: Vec<Complex32>,
    accum: Vec<Complex32>,
}

impl Partitioned {
    fn new(impulse: &[f32], scale: f32, block: usize, forward: &Arc<dyn Fft<f32>>) -> Self {
        let size = 2 * block;
        let filters: Vec<Vec<Complex32>> = impulse
            .chunks(block)
            .map(|part| {
                let mut spectrum = vec![Complex32::new(0.0, 0.0); size];
                for (bin, &s) in spectrum.iter_mut().zip(part) {
                    bin.re = s * scale;
                }
                forward.process(&mut spectrum);
                spectrum
            })
            .collect();
        let partitions = filters.len().max(1);
        Self {
            block,
            filters,
            history: vec![vec![Complex32::new(0.0, 0.0); size]; partitions],
            head: 0,
            window: vec![0.0; size],
            scratch: vec![Complex32::new(0.0, 0.0); size],
            accum: vec![Complex32::new(0.0, 0.0); size],
        }
    }

    fn process(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        forward: &Arc<dyn Fft<f32>>,
        inverse: &Arc<dyn Fft<f32>>,
    ) {
        let block = self.block;
        let size = 2 * block;

        self.window.copy_within(block.., 0);
        self.window[block..].copy_from_slice(&input[..block]);

        for (bin, &s) in self.scratch.iter_mut().zip(&self.window) {
            *bin = Complex32::new(s, 0.0);
        }
        forward.process(&mut self.scratch);

        let partitions = self.history.len();
        self.head = (self.head + partitions - 1) % partitions;
        self.history[self.head].copy_from_slice(&self.scratch);

        self.accum.fill(Complex32::new(0.0, 0.0));
        for (k, filter) in self.filters.iter().enumerate() {
            let past = &self.history[(self.head + k) % partitions];
            for ((acc, x), h) in self.accum.iter_mut().zip(past).zip(filter) {
                *acc += x * h;
            }
        }
        inverse.process(&mut self.accum);

        // The first half is circular wrap-around; keep the linear part
        let norm = 1.0 / size as f32;
        for (out, bin) in output[..block].iter_mut().zip(&self.accum[block..]) {
            *out = bin.re * norm;
        }
    }
}

/// Stereo convolver. A mono impulse is applied to both channels.
pub struct Convolver {
    block: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    left: Partitioned,
    right: Partitioned,
}

impl std::fmt::Debug for Convolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Convolver")
            .field("block", &self.block)
            .field("partitions", &self.left.filters.len())
            .finish()
    }
}

impl Convolver {
    /// Build a convolver processing `block` frames at a time. When
    /// `normalize` is set the impulse is scaled by [`normalization_scale`].
    pub fn new(impulse: &AudioBuffer, block: usize, normalize: bool) -> Self {
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(2 * block);
        let inverse = planner.plan_fft_inverse(2 * block);

        let scale = if normalize { normalization_scale(impulse) } else { 1.0 };
        let empty: &[f32] = &[];
        let left_ir = impulse.channel(0).unwrap_or(empty);
        let right_ir = impulse.channel(1).unwrap_or(left_ir);

        Self {
            block,
            left: Partitioned::new(left_ir, scale, block, &forward),
            right: Partitioned::new(right_ir, scale, block, &forward),
            forward,
            inverse,
        }
    }

    /// Convolve one block. All slices must be exactly `block` frames long.
    pub fn process(&mut self, in_l: &[f32], in_r: &[f32], out_l: &mut [f32], out_r: &mut [f32]) {
        debug_assert_eq!(in_l.len(), self.block);
        self.left.process(in_l, out_l, &self.forward, &self.inverse);
        self.right.process(in_r, out_r, &self.forward, &self.inverse);
    }
}
