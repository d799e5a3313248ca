pub mod automation;
pub mod buffer;
pub mod config;
pub mod cue;
#[cfg(feature = "decode")]
pub mod decode;
pub mod demo;
pub mod dsp;
pub mod effect;
pub mod error;
pub mod graph;
pub mod preview;
pub mod trajectory;

use std::sync::Arc;

use crate::buffer::AudioBuffer;
use crate::config::EngineConfig;
use crate::dsp::renderer::{self, CancelHandle, RenderJob};
use crate::effect::EffectPreset;
use crate::preview::{ManualFrameScheduler, PreviewDriver, PreviewState};
use wasm_bindgen::prelude::*;

pub use crate::buffer::DecodedAudio;
pub use crate::error::{Result, WeaverError};

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the sonicweaver-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// WASM-exposed: route `log` output and panics to the browser console.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn init_logging() {
    console_error_panic_hook::set_once();
    console_log::init_with_level(log::Level::Info).ok();
    log::info!("sonicweaver-core {VERSION} ready");
}

fn js_error(e: WeaverError) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn preset_from_js(value: JsValue) -> std::result::Result<EffectPreset, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(EffectPreset::default());
    }
    let preset: EffectPreset = serde_wasm_bindgen::from_value(value).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    preset.validate().map_err(js_error)?;
    Ok(preset)
}

fn config_from_js(value: JsValue) -> std::result::Result<EngineConfig, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(EngineConfig::default());
    }
    let config: EngineConfig = serde_wasm_bindgen::from_value(value).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    config.validate().map_err(js_error)?;
    Ok(config)
}

/// WASM-exposed: evaluate the trajectory of `preset` at `elapsed` seconds.
#[wasm_bindgen]
pub fn sample_trajectory(elapsed: f64, preset: JsValue) -> std::result::Result<JsValue, JsValue> {
    let preset = preset_from_js(preset)?;
    let sample = trajectory::sample(elapsed, &preset);
    serde_wasm_bindgen::to_value(&sample).map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: apply `preset` to interleaved PCM and return WAV bytes.
#[wasm_bindgen]
pub fn render_wav(
    interleaved: &[f32],
    channels: usize,
    sample_rate: f32,
    preset: JsValue,
    config: JsValue,
) -> std::result::Result<Vec<u8>, JsValue> {
    let preset = preset_from_js(preset)?;
    let config = config_from_js(config)?;
    let source = AudioBuffer::from_interleaved(interleaved, channels, sample_rate).map_err(js_error)?;
    renderer::render_wav(Arc::new(source), &preset, &config).map_err(js_error)
}

/// WASM-exposed: seconds an external capture must keep recording.
#[wasm_bindgen]
pub fn capture_stop_time(duration: f64, config: JsValue) -> std::result::Result<f64, JsValue> {
    Ok(renderer::capture_stop_time(duration, &config_from_js(config)?))
}

/// WASM-exposed: render a localisation cue as WAV bytes.
#[wasm_bindgen]
pub fn render_cue_wav(location: JsValue, sample_rate: f32) -> std::result::Result<Vec<u8>, JsValue> {
    let location: cue::CueLocation =
        serde_wasm_bindgen::from_value(location).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    let buffer = cue::render_cue(location, sample_rate).map_err(js_error)?;
    Ok(renderer::encode_wav_buffer(&buffer))
}

/// Live preview driven from JavaScript: `process` from the audio callback,
/// `frame` from `requestAnimationFrame`.
#[wasm_bindgen]
pub struct WasmPreview {
    driver: PreviewDriver<ManualFrameScheduler>,
}

#[wasm_bindgen]
impl WasmPreview {
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> std::result::Result<WasmPreview, JsValue> {
        let config = config_from_js(config)?;
        let driver = PreviewDriver::new(config, ManualFrameScheduler::new()).map_err(js_error)?;
        Ok(WasmPreview { driver })
    }

    pub fn load(&mut self, interleaved: &[f32], channels: usize, sample_rate: f32) -> std::result::Result<(), JsValue> {
        let buffer = AudioBuffer::from_interleaved(interleaved, channels, sample_rate).map_err(js_error)?;
        self.driver.load(buffer);
        Ok(())
    }

    /// Load the built-in arpeggio at the preview rate.
    pub fn load_demo(&mut self) -> std::result::Result<(), JsValue> {
        let rate = self.driver.context().sample_rate();
        self.driver.load(demo::demo_buffer(rate).map_err(js_error)?);
        Ok(())
    }

    #[cfg(feature = "decode")]
    pub fn load_file(&mut self, bytes: &[u8]) -> std::result::Result<(), JsValue> {
        self.driver.load(decode::decode(bytes).map_err(js_error)?);
        Ok(())
    }

    pub fn play(&mut self) -> std::result::Result<(), JsValue> {
        self.driver.play().map_err(js_error)
    }

    pub fn pause(&mut self) {
        self.driver.pause();
    }

    pub fn stop(&mut self) {
        self.driver.stop();
    }

    pub fn set_effect(&mut self, preset: JsValue) -> std::result::Result<(), JsValue> {
        let preset = preset_from_js(preset)?;
        self.driver.set_effect(preset).map_err(js_error)
    }

    pub fn set_looping(&mut self, looping: bool) -> std::result::Result<(), JsValue> {
        self.driver.set_looping(looping).map_err(js_error)
    }

    /// Fill one output block.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) -> std::result::Result<(), JsValue> {
        self.driver.process(left, right).map_err(js_error)
    }

    /// Run the pending animation frame, if any.
    pub fn frame(&mut self) -> std::result::Result<(), JsValue> {
        match self.driver.scheduler().pending() {
            Some(handle) => self.driver.on_frame(handle).map_err(js_error),
            None => Ok(()),
        }
    }

    pub fn state(&self) -> String {
        match self.driver.state() {
            PreviewState::Idle => "idle",
            PreviewState::Playing => "playing",
            PreviewState::Paused => "paused",
        }
        .to_string()
    }

    pub fn elapsed(&self) -> f64 {
        self.driver.elapsed()
    }

    pub fn waveform(&mut self) -> Vec<u8> {
        self.driver.analyser_time_domain().unwrap_or_default()
    }

    pub fn spectrum(&mut self) -> Vec<u8> {
        self.driver.analyser_spectrum().unwrap_or_default()
    }
}

/// Incremental export driven from JavaScript, one `step` per frame.
#[wasm_bindgen]
pub struct WasmRenderJob {
    job: RenderJob,
    cancel: CancelHandle,
}

#[wasm_bindgen]
impl WasmRenderJob {
    #[wasm_bindgen(constructor)]
    pub fn new(
        interleaved: &[f32],
        channels: usize,
        sample_rate: f32,
        preset: JsValue,
        config: JsValue,
    ) -> std::result::Result<WasmRenderJob, JsValue> {
        let preset = preset_from_js(preset)?;
        let config = config_from_js(config)?;
        let source = AudioBuffer::from_interleaved(interleaved, channels, sample_rate).map_err(js_error)?;
        let job = RenderJob::new(Arc::new(source), &preset, &config).map_err(js_error)?;
        let cancel = job.cancel_handle();
        Ok(WasmRenderJob { job, cancel })
    }

    /// Render a slice of the output; returns progress in [0, 1].
    pub fn step(&mut self) -> std::result::Result<f64, JsValue> {
        self.job.step().map_err(js_error)
    }

    pub fn progress(&self) -> f64 {
        self.job.progress()
    }

    pub fn is_complete(&self) -> bool {
        self.job.is_complete()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Finish rendering and return WAV bytes.
    pub fn finish_wav(self) -> std::result::Result<Vec<u8>, JsValue> {
        let buffer = self.job.finish().map_err(js_error)?;
        Ok(renderer::encode_wav_buffer(&buffer))
    }
}
