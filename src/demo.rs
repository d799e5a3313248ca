//! Built-in demo material: a short C-major arpeggio for the before/after
//! comparison, so the effect can be heard without loading a file.

use crate::buffer::AudioBuffer;
use crate::dsp::oscillator::Oscillator;
use crate::error::Result;

pub const DEMO_TEMPO_BPM: f64 = 140.0;
pub const DEMO_AMPLITUDE: f64 = 0.3;

/// C4 E4 G4 C5 G4 E4 C4 G3, one beat each.
pub const DEMO_NOTES_HZ: [f64; 8] = [261.63, 329.63, 392.00, 523.25, 392.00, 329.63, 261.63, 196.00];

/// Mono arpeggio at `sample_rate`. Each note starts at full level and
/// decays linearly to silence by the next beat.
pub fn demo_buffer(sample_rate: f32) -> Result<AudioBuffer> {
    crate::buffer::check_sample_rate(sample_rate)?;
    let sr = sample_rate as f64;
    let frame_of_beat = |beat: usize| (beat as f64 * 60.0 * sr / DEMO_TEMPO_BPM) as usize;
    let total = frame_of_beat(DEMO_NOTES_HZ.len());
    let mut data = vec![0.0f32; total];

    let mut osc = Oscillator::new(0.0, sr);
    for (i, &freq) in DEMO_NOTES_HZ.iter().enumerate() {
        let start = frame_of_beat(i);
        let end = frame_of_beat(i + 1).min(total);
        if end <= start {
            continue;
        }
        osc.frequency = freq;
        osc.reset();
        let span = (end - start) as f64;
        for (j, s) in data[start..end].iter_mut().enumerate() {
            let envelope = 1.0 - j as f64 / span;
            *s = (osc.next_sample() * DEMO_AMPLITUDE * envelope) as f32;
        }
    }

    AudioBuffer::new(vec![data], sample_rate)
}
