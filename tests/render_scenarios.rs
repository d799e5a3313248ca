//! End-to-end scenarios across the trajectory, graph builder and both
//! drivers.

use std::sync::Arc;

use sonicweaver_core::buffer::AudioBuffer;
use sonicweaver_core::config::EngineConfig;
use sonicweaver_core::dsp::engine::AudioContext;
use sonicweaver_core::dsp::panner::{DistanceModel, PanningModel};
use sonicweaver_core::dsp::renderer::{self, RenderJob};
use sonicweaver_core::effect::{CustomParameters, EffectPreset};
use sonicweaver_core::graph::{GraphSpec, build_graph};
use sonicweaver_core::preview::{ManualFrameScheduler, PreviewDriver, PreviewState};

fn sine(seconds: f64, freq: f64, amplitude: f32, sample_rate: f32) -> AudioBuffer {
    let n = (seconds * sample_rate as f64).round() as usize;
    let data = (0..n)
        .map(|i| (std::f64::consts::TAU * freq * i as f64 / sample_rate as f64).sin() as f32 * amplitude)
        .collect();
    AudioBuffer::new(vec![data], sample_rate).unwrap()
}

fn assert_loud_but_clean(out: &AudioBuffer) {
    let rms = out.rms();
    assert!(rms > 0.01, "output nearly silent: rms {rms}");
    assert!(rms < 0.7, "output too hot: rms {rms}");
    assert!(out.fraction_at_or_above(0.999) < 0.001, "output clips");
}

#[test]
fn eight_d_export_keeps_duration_and_level() {
    let source = Arc::new(sine(2.0, 440.0, 0.8, 44100.0));
    let out = renderer::render(source.clone(), &EffectPreset::EightD, &EngineConfig::default()).unwrap();
    assert!(out.length().abs_diff(source.length()) <= 1);
    assert!((out.duration() - 2.0).abs() <= 1.0 / 44100.0);
    assert_eq!(out.number_of_channels(), 2);
    assert_loud_but_clean(&out);
}

#[cfg(feature = "decode")]
#[test]
fn decoded_wav_renders_end_to_end() {
    let pcm = sine(2.0, 440.0, 0.8, 44100.0).to_interleaved_i16();
    let wav = renderer::encode_wav(&pcm, 44100, 1);
    let decoded = sonicweaver_core::decode::decode(&wav).unwrap();
    assert_eq!(decoded.length(), 88200);

    let exported = renderer::render_wav(Arc::new(decoded), &EffectPreset::EightD, &EngineConfig::default()).unwrap();
    // Stereo 16-bit: 4 bytes per frame after the 44-byte header
    assert_eq!(exported.len(), 44 + 88200 * 4);
}

#[test]
fn every_preset_renders() {
    let source = Arc::new(sine(0.5, 330.0, 0.5, 22050.0));
    let custom = EffectPreset::Custom(CustomParameters {
        reverb_mix: 0.3,
        treble_gain_db: -4.0,
        ..CustomParameters::default()
    });
    for preset in [EffectPreset::FourD, EffectPreset::EightD, EffectPreset::ElevenD, custom] {
        let out = renderer::render(source.clone(), &preset, &EngineConfig::default()).unwrap();
        assert_eq!(out.length(), source.length(), "{}", preset.label());
        assert!(out.rms() > 0.005, "{} is silent", preset.label());
    }
}

#[test]
fn zero_reverb_mix_matches_the_dry_only_graph() {
    let source = Arc::new(sine(0.75, 440.0, 0.5, 22050.0));
    let config = EngineConfig::default();
    let preset = EffectPreset::Custom(CustomParameters {
        reverb_mix: 0.0,
        ..CustomParameters::default()
    });

    let dry_only = renderer::render(source.clone(), &preset, &config).unwrap();

    let forced = GraphSpec::for_preset(&preset, &config).with_reverb_mix(Some(0.0));
    assert!(forced.has_reverb());
    let with_branch = RenderJob::with_spec(source, &preset, &forced, &config)
        .unwrap()
        .finish()
        .unwrap();

    assert_eq!(dry_only.length(), with_branch.length());
    for ch in 0..2 {
        let a = dry_only.channel(ch).unwrap();
        let b = with_branch.channel(ch).unwrap();
        let worst = a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0f32, f32::max);
        assert!(worst < 1e-5, "channel {ch} differs by {worst}");
    }
}

#[test]
fn panner_settings_come_from_the_config() {
    let source = Arc::new(sine(0.5, 440.0, 0.5, 22050.0));
    let config = EngineConfig::from_json(
        r#"{"panner":{"panningModel":"equal-power","distanceModel":"linear","maxDistance":20}}"#,
    )
    .unwrap();
    let spec = GraphSpec::for_preset(&EffectPreset::EightD, &config);
    assert_eq!(spec.panning_model, PanningModel::EqualPower);
    assert_eq!(spec.distance.model, DistanceModel::Linear);
    assert_eq!(spec.distance.max_distance, 20.0);

    let binaural = renderer::render(source.clone(), &EffectPreset::EightD, &EngineConfig::default()).unwrap();
    let amplitude = renderer::render(source, &EffectPreset::EightD, &config).unwrap();
    assert_eq!(binaural.length(), amplitude.length());
    assert_ne!(binaural.channel(0), amplitude.channel(0));
    assert_loud_but_clean(&amplitude);
}

fn preview_with(seconds: f64) -> PreviewDriver<ManualFrameScheduler> {
    let mut driver = PreviewDriver::new(EngineConfig::default(), ManualFrameScheduler::new()).unwrap();
    driver.load(sine(seconds, 440.0, 0.5, 44100.0));
    driver
}

fn pump(driver: &mut PreviewDriver<ManualFrameScheduler>, frames: usize) {
    let mut l = vec![0.0; 735];
    let mut r = vec![0.0; 735];
    for _ in 0..frames {
        driver.process(&mut l, &mut r).unwrap();
        if let Some(h) = driver.scheduler().pending() {
            driver.on_frame(h).unwrap();
        }
    }
}

#[test]
fn switching_four_d_to_eight_d_leaves_one_graph() {
    let mut driver = preview_with(3.0);
    driver.set_effect(EffectPreset::FourD).unwrap();
    driver.play().unwrap();
    pump(&mut driver, 20);

    driver.set_effect(EffectPreset::EightD).unwrap();
    pump(&mut driver, 5);

    assert_eq!(driver.state(), PreviewState::Playing);
    let graph = driver.graph().unwrap();
    assert!(!graph.is_torn_down());
    // Exactly the nodes of one dry graph are alive
    assert_eq!(driver.node_count(), graph.nodes().len());
    assert_eq!(driver.node_count(), 9);
}

#[test]
fn repeated_sessions_do_not_leak_nodes() {
    let mut driver = preview_with(1.0);
    let presets = [EffectPreset::FourD, EffectPreset::ElevenD, EffectPreset::EightD];
    for round in 0..30 {
        driver.set_effect(presets[round % presets.len()]).unwrap();
        driver.play().unwrap();
        pump(&mut driver, 3);
        // Playing again while playing must not stack a second session
        driver.play().unwrap();
        assert!(driver.node_count() <= 12);
        driver.stop();
        assert_eq!(driver.node_count(), 0);
    }
}

#[test]
fn teardown_twice_is_harmless() {
    let mut ctx = AudioContext::realtime(44100.0).unwrap();
    let source = Arc::new(sine(0.2, 440.0, 0.5, 44100.0));
    let spec = GraphSpec::for_preset(&EffectPreset::ElevenD, &EngineConfig::default());
    let mut graph = build_graph(&mut ctx, source, &spec).unwrap();
    graph.start(&mut ctx, 0.0, 0.0).unwrap();
    let mut l = vec![0.0; 256];
    let mut r = vec![0.0; 256];
    ctx.render_into(&mut l, &mut r).unwrap();

    graph.teardown(&mut ctx);
    graph.teardown(&mut ctx);
    assert!(graph.is_torn_down());
    assert_eq!(ctx.node_count(), 0);
    ctx.render_into(&mut l, &mut r).unwrap();
    assert!(l.iter().chain(&r).all(|s| *s == 0.0));
}

#[test]
fn cancelled_export_leaves_preview_usable() {
    let mut driver = preview_with(1.0);
    driver.play().unwrap();
    pump(&mut driver, 4);
    driver.pause();

    let source = Arc::new(sine(1.0, 440.0, 0.5, 44100.0));
    let mut job = RenderJob::new(source, &EffectPreset::ElevenD, &EngineConfig::default()).unwrap();
    let cancel = job.cancel_handle();
    job.step().unwrap();
    cancel.cancel();
    assert!(job.finish().is_err());

    driver.play().unwrap();
    assert_eq!(driver.state(), PreviewState::Playing);
}
