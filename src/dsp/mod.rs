//! DSP host — a small sample-accurate audio graph in pure Rust.
//!
//! The same nodes run the live preview (pulled by an output callback, or an
//! AudioWorklet through WASM) and the offline export, so both paths hear
//! exactly the same processing.

pub mod analyser;
pub mod compressor;
pub mod convolver;
pub mod engine;
pub mod filter;
pub mod impulse;
pub mod oscillator;
pub mod panner;
pub mod param;
pub mod renderer;
