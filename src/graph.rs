//! Audio graph builder — one parameterised topology for every preset, on
//! any [`AudioContext`].
//!
//! ```text
//! source → gain → low shelf → peaking → high shelf ─┬─ dry → lowpass → panner ─┬→ compressor → analyser → out
//!                                                   └─ wet → convolver ────────┘
//! ```
//!
//! Without reverb the high shelf feeds the lowpass directly. The lowpass,
//! the panner position and the source gain are driven by the trajectory;
//! the EQ bands and the dry/wet levels by the preset.

use std::sync::Arc;

use rand::Rng;

use crate::buffer::AudioBuffer;
use crate::config::{CompressorConfig, EngineConfig, ImpulseConfig};
use crate::dsp::analyser::DEFAULT_FFT_SIZE;
use crate::dsp::engine::{AudioContext, NodeId, ParamKind};
use crate::dsp::filter::FilterType;
use crate::dsp::impulse;
use crate::dsp::panner::{Distance, PanningModel};
use crate::effect::{EffectPreset, EqGains};
use crate::error::Result;
use crate::trajectory::FILTER_BYPASS_HZ;

pub const BASS_SHELF_HZ: f32 = 250.0;
pub const MID_PEAK_HZ: f32 = 1000.0;
pub const MID_PEAK_Q: f32 = 1.0;
pub const TREBLE_SHELF_HZ: f32 = 4000.0;
const LOWPASS_Q: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Everything that decides what gets built.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphSpec {
    pub eq: EqGains,
    /// Wet level; `None` builds no reverb branch at all.
    pub reverb_mix: Option<f32>,
    pub panning_model: PanningModel,
    pub distance: Distance,
    pub impulse: ImpulseConfig,
    pub compressor: CompressorConfig,
    pub analyser_fft_size: usize,
}

impl GraphSpec {
    pub fn for_preset(preset: &EffectPreset, config: &EngineConfig) -> Self {
        Self {
            eq: preset.eq_gains(),
            reverb_mix: preset.reverb_mix(),
            panning_model: config.panner.panning_model,
            distance: config.panner.distance(),
            impulse: config.impulse,
            compressor: config.compressor,
            analyser_fft_size: DEFAULT_FFT_SIZE,
        }
    }

    /// Force the reverb branch on (`Some`) or off (`None`).
    pub fn with_reverb_mix(mut self, mix: Option<f32>) -> Self {
        self.reverb_mix = mix.map(|m| m.clamp(0.0, 1.0));
        self
    }

    pub fn has_reverb(&self) -> bool {
        self.reverb_mix.is_some()
    }

    /// Whether a graph built from `self` can be patched into `other`
    /// without rebuilding.
    pub fn same_topology(&self, other: &GraphSpec) -> bool {
        self.has_reverb() == other.has_reverb()
            && self.panning_model == other.panning_model
            && self.distance == other.distance
            && self.impulse == other.impulse
            && self.compressor == other.compressor
            && self.analyser_fft_size == other.analyser_fft_size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReverbBranch {
    pub dry: NodeId,
    pub wet: NodeId,
    pub convolver: NodeId,
}

/// The nodes of one playback session. Owned by exactly one driver.
#[derive(Debug)]
pub struct AudioGraphHandle {
    pub source: NodeId,
    pub gain: NodeId,
    pub bass: NodeId,
    pub mid: NodeId,
    pub treble: NodeId,
    pub filter: NodeId,
    pub panner: NodeId,
    pub reverb: Option<ReverbBranch>,
    pub compressor: NodeId,
    pub analyser: NodeId,
    spec: GraphSpec,
    torn_down: bool,
}

/// Build a graph playing `buffer`, with a freshly generated impulse
/// response when `spec` has a reverb branch.
pub fn build_graph(ctx: &mut AudioContext, buffer: Arc<AudioBuffer>, spec: &GraphSpec) -> Result<AudioGraphHandle> {
    build_graph_with_rng(ctx, buffer, spec, &mut rand::thread_rng())
}

/// [`build_graph`] with an explicit random source for the impulse response.
///
/// Either every node is built or none is: on failure the nodes created so
/// far are released before the error is returned.
pub fn build_graph_with_rng<R: Rng + ?Sized>(
    ctx: &mut AudioContext,
    buffer: Arc<AudioBuffer>,
    spec: &GraphSpec,
    rng: &mut R,
) -> Result<AudioGraphHandle> {
    ctx.ensure_open()?;
    let mut created = Vec::new();
    match build(ctx, buffer, spec, rng, &mut created) {
        Ok(handle) => {
            log::debug!(
                "built {} graph with {} nodes",
                if spec.has_reverb() { "reverb" } else { "dry" },
                created.len()
            );
            Ok(handle)
        }
        Err(e) => {
            for id in created {
                ctx.release(id);
            }
            log::warn!("graph construction failed: {e}");
            Err(e)
        }
    }
}

fn build<R: Rng + ?Sized>(
    ctx: &mut AudioContext,
    buffer: Arc<AudioBuffer>,
    spec: &GraphSpec,
    rng: &mut R,
    created: &mut Vec<NodeId>,
) -> Result<AudioGraphHandle> {
    let mut track = |id: NodeId| {
        created.push(id);
        id
    };

    let source = track(ctx.create_buffer_source(buffer)?);
    let gain = track(ctx.create_gain(1.0)?);

    let bass = track(ctx.create_biquad(FilterType::Lowshelf)?);
    ctx.param_mut(bass, ParamKind::Frequency)?.set_value(BASS_SHELF_HZ);
    ctx.param_mut(bass, ParamKind::Gain)?.set_value(spec.eq.bass_db);

    let mid = track(ctx.create_biquad(FilterType::Peaking)?);
    ctx.param_mut(mid, ParamKind::Frequency)?.set_value(MID_PEAK_HZ);
    ctx.param_mut(mid, ParamKind::Q)?.set_value(MID_PEAK_Q);
    ctx.param_mut(mid, ParamKind::Gain)?.set_value(spec.eq.mid_db);

    let treble = track(ctx.create_biquad(FilterType::Highshelf)?);
    ctx.param_mut(treble, ParamKind::Frequency)?.set_value(TREBLE_SHELF_HZ);
    ctx.param_mut(treble, ParamKind::Gain)?.set_value(spec.eq.treble_db);

    let filter = track(ctx.create_biquad(FilterType::Lowpass)?);
    ctx.param_mut(filter, ParamKind::Frequency)?.set_value(FILTER_BYPASS_HZ);
    ctx.param_mut(filter, ParamKind::Q)?.set_value(LOWPASS_Q);

    let panner = track(ctx.create_panner(spec.panning_model, spec.distance)?);
    let compressor = track(ctx.create_compressor(&spec.compressor)?);
    let analyser = track(ctx.create_analyser(spec.analyser_fft_size)?);

    ctx.connect(source, gain)?;
    ctx.connect(gain, bass)?;
    ctx.connect(bass, mid)?;
    ctx.connect(mid, treble)?;

    let reverb = match spec.reverb_mix {
        Some(mix) => {
            let ir = impulse::create_impulse_response(ctx, rng, &spec.impulse)?;
            let dry = track(ctx.create_gain(1.0 - mix)?);
            let wet = track(ctx.create_gain(mix)?);
            let convolver = track(ctx.create_convolver(&ir, true)?);
            ctx.connect(treble, dry)?;
            ctx.connect(dry, filter)?;
            ctx.connect(treble, wet)?;
            ctx.connect(wet, convolver)?;
            ctx.connect(convolver, compressor)?;
            Some(ReverbBranch { dry, wet, convolver })
        }
        None => {
            ctx.connect(treble, filter)?;
            None
        }
    };

    ctx.connect(filter, panner)?;
    ctx.connect(panner, compressor)?;
    ctx.connect(compressor, analyser)?;
    ctx.connect(analyser, ctx.destination())?;

    Ok(AudioGraphHandle {
        source,
        gain,
        bass,
        mid,
        treble,
        filter,
        panner,
        reverb,
        compressor,
        analyser,
        spec: spec.clone(),
        torn_down: false,
    })
}

impl AudioGraphHandle {
    pub fn spec(&self) -> &GraphSpec {
        &self.spec
    }

    /// Record values patched into the graph without a rebuild.
    pub(crate) fn set_spec(&mut self, spec: GraphSpec) {
        self.spec = spec;
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Every node owned by this session.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut ids = vec![
            self.source,
            self.gain,
            self.bass,
            self.mid,
            self.treble,
            self.filter,
            self.panner,
            self.compressor,
            self.analyser,
        ];
        if let Some(r) = self.reverb {
            ids.extend([r.dry, r.wet, r.convolver]);
        }
        ids
    }

    /// Start the source at context time `when`, `offset` seconds in.
    pub fn start(&self, ctx: &mut AudioContext, when: f64, offset: f64) -> Result<()> {
        ctx.start(self.source, when, offset)
    }

    pub fn set_loop(&self, ctx: &mut AudioContext, looping: bool) -> Result<()> {
        ctx.set_loop(self.source, looping)
    }

    /// Stop the source and release every node. Safe to call repeatedly.
    pub fn teardown(&mut self, ctx: &mut AudioContext) {
        if self.torn_down {
            return;
        }
        if ctx.contains(self.source) {
            let now = ctx.current_time();
            if let Err(e) = ctx.stop(self.source, now) {
                log::debug!("source not stopped during teardown: {e}");
            }
        }
        for id in self.nodes() {
            ctx.release(id);
        }
        self.torn_down = true;
    }
}
