//! Audio context — a small sample-accurate audio host.
//!
//! Nodes live in an arena keyed by [`NodeId`] and are wired with
//! [`AudioContext::connect`]. Every call to [`AudioContext::render_quantum`]
//! evaluates automation, runs each node once in topological order over a
//! 128-frame block and advances the context clock. All buses are stereo;
//! mono buffers are copied to both channels.
//!
//! Realtime contexts are pulled by an output callback of any size through
//! [`AudioContext::render_into`]. Offline contexts collect their output up to
//! a fixed length and hand it back with [`AudioContext::take_rendered`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use glam::Vec3;

use crate::buffer::{AudioBuffer, check_sample_rate};
use crate::config::CompressorConfig;
use crate::error::{Result, WeaverError};

use super::analyser::Analyser;
use super::compressor::Compressor;
use super::convolver::Convolver;
use super::filter::{BiquadFilter, FilterType};
use super::oscillator::Oscillator;
use super::panner::{Distance, Panner, PanningModel};
use super::param::AudioParam;

/// Frames processed per render call.
pub const RENDER_QUANTUM: usize = 128;

/// Handle to a node inside one [`AudioContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Pulled by the audio output; `current_time` follows frames delivered.
    Realtime,
    /// Rendered ahead of time into a buffer of `length` frames.
    Offline { channels: usize, length: usize },
}

/// Automatable parameters, addressed by name like their WebAudio
/// counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// `GainNode.gain`, or the shelf/peak gain (dB) of a biquad.
    Gain,
    /// Biquad cutoff/centre or oscillator frequency (Hz).
    Frequency,
    Q,
    PositionX,
    PositionY,
    PositionZ,
}

/// A scheduled one-shot player (buffer source or oscillator).
#[derive(Debug, Clone, Copy, Default)]
struct Transport {
    start: Option<f64>,
    stop: Option<f64>,
    ended: bool,
}

impl Transport {
    /// Whether frame time `t` should produce sound. Marks the transport
    /// ended once the stop time is reached.
    fn active_at(&mut self, t: f64) -> bool {
        if self.ended {
            return false;
        }
        let Some(start) = self.start else {
            return false;
        };
        if let Some(stop) = self.stop {
            if t >= stop {
                self.ended = true;
                return false;
            }
        }
        t >= start
    }
}

#[derive(Debug)]
struct SourceNode {
    buffer: Arc<AudioBuffer>,
    transport: Transport,
    looping: bool,
    /// Read position in buffer frames.
    position: f64,
}

impl SourceNode {
    fn render(&mut self, start: f64, sample_rate: f32, out_l: &mut [f32], out_r: &mut [f32]) {
        out_l.fill(0.0);
        out_r.fill(0.0);
        let Some(left) = self.buffer.channel(0) else {
            return;
        };
        let right = self.buffer.channel(1).unwrap_or(left);
        let len = left.len();
        let step = self.buffer.sample_rate() as f64 / sample_rate as f64;
        let dt = 1.0 / sample_rate as f64;

        for i in 0..out_l.len() {
            if !self.transport.active_at(start + i as f64 * dt) {
                if self.transport.ended {
                    break;
                }
                continue;
            }
            if self.position >= len as f64 {
                if self.looping && len > 0 {
                    self.position %= len as f64;
                } else {
                    self.transport.ended = true;
                    break;
                }
            }
            let idx = self.position as usize;
            let frac = (self.position - idx as f64) as f32;
            let next = if idx + 1 < len {
                idx + 1
            } else if self.looping {
                0
            } else {
                idx
            };
            out_l[i] = left[idx] + frac * (left[next] - left[idx]);
            out_r[i] = right[idx] + frac * (right[next] - right[idx]);
            self.position += step;
        }
    }
}

#[derive(Debug)]
struct OscillatorNode {
    oscillator: Oscillator,
    frequency: AudioParam,
    transport: Transport,
}

impl OscillatorNode {
    fn render(&mut self, start: f64, sample_rate: f32, out_l: &mut [f32], out_r: &mut [f32]) {
        self.oscillator.frequency = self.frequency.value_at(start) as f64;
        let dt = 1.0 / sample_rate as f64;
        for i in 0..out_l.len() {
            out_l[i] = if self.transport.active_at(start + i as f64 * dt) {
                self.oscillator.next_sample() as f32
            } else {
                0.0
            };
        }
        out_r.copy_from_slice(out_l);
    }
}

#[derive(Debug)]
enum NodeKind {
    Source(SourceNode),
    Oscillator(OscillatorNode),
    Gain {
        gain: AudioParam,
    },
    Biquad {
        left: BiquadFilter,
        right: BiquadFilter,
        frequency: AudioParam,
        q: AudioParam,
        gain: AudioParam,
    },
    Convolver(Box<Convolver>),
    Panner {
        panner: Panner,
        x: AudioParam,
        y: AudioParam,
        z: AudioParam,
    },
    Compressor(Compressor),
    Analyser(Box<Analyser>),
    Destination,
}

impl NodeKind {
    fn label(&self) -> &'static str {
        match self {
            NodeKind::Source(_) => "buffer-source",
            NodeKind::Oscillator(_) => "oscillator",
            NodeKind::Gain { .. } => "gain",
            NodeKind::Biquad { .. } => "biquad",
            NodeKind::Convolver(_) => "convolver",
            NodeKind::Panner { .. } => "panner",
            NodeKind::Compressor(_) => "compressor",
            NodeKind::Analyser(_) => "analyser",
            NodeKind::Destination => "destination",
        }
    }

    fn param(&self, kind: ParamKind) -> Option<&AudioParam> {
        match (self, kind) {
            (NodeKind::Gain { gain }, ParamKind::Gain) => Some(gain),
            (NodeKind::Biquad { frequency, .. }, ParamKind::Frequency) => Some(frequency),
            (NodeKind::Biquad { q, .. }, ParamKind::Q) => Some(q),
            (NodeKind::Biquad { gain, .. }, ParamKind::Gain) => Some(gain),
            (NodeKind::Oscillator(osc), ParamKind::Frequency) => Some(&osc.frequency),
            (NodeKind::Panner { x, .. }, ParamKind::PositionX) => Some(x),
            (NodeKind::Panner { y, .. }, ParamKind::PositionY) => Some(y),
            (NodeKind::Panner { z, .. }, ParamKind::PositionZ) => Some(z),
            _ => None,
        }
    }

    fn param_mut(&mut self, kind: ParamKind) -> Option<&mut AudioParam> {
        match (self, kind) {
            (NodeKind::Gain { gain }, ParamKind::Gain) => Some(gain),
            (NodeKind::Biquad { frequency, .. }, ParamKind::Frequency) => Some(frequency),
            (NodeKind::Biquad { q, .. }, ParamKind::Q) => Some(q),
            (NodeKind::Biquad { gain, .. }, ParamKind::Gain) => Some(gain),
            (NodeKind::Oscillator(osc), ParamKind::Frequency) => Some(&mut osc.frequency),
            (NodeKind::Panner { x, .. }, ParamKind::PositionX) => Some(x),
            (NodeKind::Panner { y, .. }, ParamKind::PositionY) => Some(y),
            (NodeKind::Panner { z, .. }, ParamKind::PositionZ) => Some(z),
            _ => None,
        }
    }

    fn prune_automation(&mut self, time: f64) {
        match self {
            NodeKind::Gain { gain } => gain.prune_before(time),
            NodeKind::Biquad { frequency, q, gain, .. } => {
                frequency.prune_before(time);
                q.prune_before(time);
                gain.prune_before(time);
            }
            NodeKind::Oscillator(osc) => osc.frequency.prune_before(time),
            NodeKind::Panner { x, y, z, .. } => {
                x.prune_before(time);
                y.prune_before(time);
                z.prune_before(time);
            }
            _ => {}
        }
    }
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    output: [Vec<f32>; 2],
    /// Per-frame automation values for the current quantum.
    automation: [Vec<f32>; 3],
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            output: std::array::from_fn(|_| vec![0.0; RENDER_QUANTUM]),
            automation: std::array::from_fn(|_| vec![0.0; RENDER_QUANTUM]),
        }
    }

    fn process(&mut self, input: &[Vec<f32>; 2], start: f64, sample_rate: f32) {
        let Node { kind, output, automation } = self;
        let [out_l, out_r] = output;
        let [in_l, in_r] = input;
        match kind {
            NodeKind::Source(src) => src.render(start, sample_rate, out_l, out_r),
            NodeKind::Oscillator(osc) => osc.render(start, sample_rate, out_l, out_r),
            NodeKind::Gain { gain } => {
                let g = &mut automation[0];
                gain.fill(start, sample_rate, g);
                for i in 0..RENDER_QUANTUM {
                    out_l[i] = in_l[i] * g[i];
                    out_r[i] = in_r[i] * g[i];
                }
            }
            NodeKind::Biquad { left, right, frequency, q, gain } => {
                // Coefficients are k-rate: updated once per quantum
                let f = frequency.value_at(start) as f64;
                let q = q.value_at(start) as f64;
                let g = gain.value_at(start) as f64;
                for filter in [&mut *left, &mut *right] {
                    filter.set_frequency(f);
                    filter.set_q(q);
                    filter.set_gain_db(g);
                }
                out_l.copy_from_slice(in_l);
                out_r.copy_from_slice(in_r);
                left.process_block(out_l);
                right.process_block(out_r);
            }
            NodeKind::Convolver(conv) => conv.process(in_l, in_r, out_l, out_r),
            NodeKind::Panner { panner, x, y, z } => {
                let [px, py, pz] = automation;
                x.fill(start, sample_rate, px);
                y.fill(start, sample_rate, py);
                z.fill(start, sample_rate, pz);
                for i in 0..RENDER_QUANTUM {
                    let mono = 0.5 * (in_l[i] + in_r[i]);
                    let (l, r) = panner.process(mono, Vec3::new(px[i], py[i], pz[i]));
                    out_l[i] = l;
                    out_r[i] = r;
                }
            }
            NodeKind::Compressor(comp) => {
                out_l.copy_from_slice(in_l);
                out_r.copy_from_slice(in_r);
                comp.process_block(out_l, out_r);
            }
            NodeKind::Analyser(analyser) => {
                out_l.copy_from_slice(in_l);
                out_r.copy_from_slice(in_r);
                analyser.push(out_l, out_r);
            }
            NodeKind::Destination => {
                out_l.copy_from_slice(in_l);
                out_r.copy_from_slice(in_r);
            }
        }
    }
}

/// Owner of a node graph and its clock.
#[derive(Debug)]
pub struct AudioContext {
    kind: ContextKind,
    sample_rate: f32,
    /// Frames rendered so far.
    frame: u64,
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeSet<(NodeId, NodeId)>,
    next_id: u32,
    destination: NodeId,
    order: Option<Vec<NodeId>>,
    closed: bool,
    mix: [Vec<f32>; 2],
    /// Realtime: read position inside the destination's last quantum.
    pending_pos: usize,
    /// Offline: collected destination output.
    rendered: [Vec<f32>; 2],
}

impl AudioContext {
    /// A context pulled by an audio output callback.
    pub fn realtime(sample_rate: f32) -> Result<Self> {
        Self::new(ContextKind::Realtime, sample_rate)
    }

    /// A context that renders `length` frames of `channels` (1 or 2)
    /// channels ahead of time.
    pub fn offline(channels: usize, length: usize, sample_rate: f32) -> Result<Self> {
        if !(1..=2).contains(&channels) {
            return Err(WeaverError::Unsupported(format!("{channels} output channels")));
        }
        let mut ctx = Self::new(ContextKind::Offline { channels, length }, sample_rate)?;
        ctx.rendered = std::array::from_fn(|_| Vec::with_capacity(length));
        Ok(ctx)
    }

    fn new(kind: ContextKind, sample_rate: f32) -> Result<Self> {
        check_sample_rate(sample_rate)?;
        let destination = NodeId(0);
        let mut nodes = BTreeMap::new();
        nodes.insert(destination, Node::new(NodeKind::Destination));
        Ok(Self {
            kind,
            sample_rate,
            frame: 0,
            nodes,
            edges: BTreeSet::new(),
            next_id: 1,
            destination,
            order: None,
            closed: false,
            mix: std::array::from_fn(|_| vec![0.0; RENDER_QUANTUM]),
            pending_pos: RENDER_QUANTUM,
            rendered: [Vec::new(), Vec::new()],
        })
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Context clock in seconds: frames rendered so far, in whole quanta.
    pub fn current_time(&self) -> f64 {
        self.frame as f64 / self.sample_rate as f64
    }

    pub fn destination(&self) -> NodeId {
        self.destination
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(WeaverError::Unsupported("the audio context is closed".into()))
        } else {
            Ok(())
        }
    }

    /// Live nodes, not counting the destination.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Kind of node, e.g. `"panner"`.
    pub fn node_label(&self, id: NodeId) -> Option<&'static str> {
        self.nodes.get(&id).map(|n| n.kind.label())
    }

    /// Number of connections, in both directions, touching `id`.
    pub fn connection_count(&self, id: NodeId) -> usize {
        self.edges.iter().filter(|(a, b)| *a == id || *b == id).count()
    }

    fn add(&mut self, kind: NodeKind) -> Result<NodeId> {
        self.ensure_open()?;
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Node::new(kind));
        self.order = None;
        Ok(id)
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(WeaverError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or(WeaverError::UnknownNode(id))
    }

    pub fn create_buffer_source(&mut self, buffer: Arc<AudioBuffer>) -> Result<NodeId> {
        self.add(NodeKind::Source(SourceNode {
            buffer,
            transport: Transport::default(),
            looping: false,
            position: 0.0,
        }))
    }

    pub fn create_oscillator(&mut self, frequency: f32) -> Result<NodeId> {
        let nyquist = self.sample_rate / 2.0;
        self.add(NodeKind::Oscillator(OscillatorNode {
            oscillator: Oscillator::new(frequency as f64, self.sample_rate as f64),
            frequency: AudioParam::new(frequency, -nyquist, nyquist),
            transport: Transport::default(),
        }))
    }

    pub fn create_gain(&mut self, gain: f32) -> Result<NodeId> {
        self.add(NodeKind::Gain {
            gain: AudioParam::new(gain, f32::MIN, f32::MAX),
        })
    }

    pub fn create_biquad(&mut self, filter_type: FilterType) -> Result<NodeId> {
        let sr = self.sample_rate as f64;
        let left = BiquadFilter::new(filter_type, sr);
        let right = BiquadFilter::new(filter_type, sr);
        let frequency = AudioParam::new(left.frequency as f32, 0.0, self.sample_rate / 2.0);
        let q = AudioParam::new(left.q as f32, 0.0001, 1000.0);
        self.add(NodeKind::Biquad {
            left,
            right,
            frequency,
            q,
            gain: AudioParam::new(0.0, -40.0, 40.0),
        })
    }

    /// Convolver over `impulse`, which must match the context rate.
    pub fn create_convolver(&mut self, impulse: &AudioBuffer, normalize: bool) -> Result<NodeId> {
        if impulse.sample_rate() != self.sample_rate {
            return Err(WeaverError::InvalidParameter {
                name: "impulse",
                reason: format!(
                    "impulse rate {} Hz differs from context rate {} Hz",
                    impulse.sample_rate(),
                    self.sample_rate
                ),
            });
        }
        if impulse.number_of_channels() > 2 {
            return Err(WeaverError::InvalidParameter {
                name: "impulse",
                reason: format!("{} channels; expected 1 or 2", impulse.number_of_channels()),
            });
        }
        let conv = Convolver::new(impulse, RENDER_QUANTUM, normalize);
        self.add(NodeKind::Convolver(Box::new(conv)))
    }

    pub fn create_panner(&mut self, panning_model: PanningModel, distance: Distance) -> Result<NodeId> {
        let mut panner = Panner::new(self.sample_rate as f64, panning_model);
        panner.distance = distance;
        let axis = || AudioParam::new(0.0, f32::MIN, f32::MAX);
        self.add(NodeKind::Panner {
            panner,
            x: axis(),
            y: axis(),
            z: axis(),
        })
    }

    pub fn create_compressor(&mut self, config: &CompressorConfig) -> Result<NodeId> {
        let comp = Compressor::from_config(self.sample_rate as f64, config);
        self.add(NodeKind::Compressor(comp))
    }

    pub fn create_analyser(&mut self, fft_size: usize) -> Result<NodeId> {
        self.add(NodeKind::Analyser(Box::new(Analyser::new(fft_size))))
    }

    /// Route the output of `from` into `to`. Connecting twice is a no-op;
    /// a connection that would close a cycle is rejected.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        self.ensure_open()?;
        self.node(from)?;
        self.node(to)?;
        if from == self.destination {
            return Err(WeaverError::InvalidParameter {
                name: "connection",
                reason: "the destination has no output".into(),
            });
        }
        if from == to || self.reaches(to, from) {
            return Err(WeaverError::InvalidParameter {
                name: "connection",
                reason: format!("{from:?} -> {to:?} would create a cycle"),
            });
        }
        if self.edges.insert((from, to)) {
            self.order = None;
        }
        Ok(())
    }

    fn reaches(&self, start: NodeId, target: NodeId) -> bool {
        let mut stack = vec![start];
        let mut seen = BTreeSet::new();
        while let Some(n) = stack.pop() {
            if n == target {
                return true;
            }
            if seen.insert(n) {
                stack.extend(self.edges.iter().filter(|(a, _)| *a == n).map(|(_, b)| *b));
            }
        }
        false
    }

    /// Remove every connection to and from `id`. Unknown ids are ignored.
    pub fn disconnect(&mut self, id: NodeId) {
        let before = self.edges.len();
        self.edges.retain(|(a, b)| *a != id && *b != id);
        if self.edges.len() != before {
            self.order = None;
        }
    }

    /// Disconnect and drop a node. Returns whether anything was released;
    /// releasing twice is a no-op. The destination is never released.
    pub fn release(&mut self, id: NodeId) -> bool {
        if id == self.destination {
            return false;
        }
        self.disconnect(id);
        let removed = self.nodes.remove(&id).is_some();
        if removed {
            self.order = None;
        }
        removed
    }

    /// Release every node and refuse further work.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        let ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        for id in ids {
            self.release(id);
        }
        self.closed = true;
        log::debug!("audio context closed at {:.3}s", self.current_time());
    }

    pub fn param(&self, id: NodeId, kind: ParamKind) -> Result<&AudioParam> {
        let node = self.node(id)?;
        let label = node.kind.label();
        node.kind.param(kind).ok_or_else(|| WeaverError::InvalidParameter {
            name: "param",
            reason: format!("{label} node has no {kind:?} parameter"),
        })
    }

    pub fn param_mut(&mut self, id: NodeId, kind: ParamKind) -> Result<&mut AudioParam> {
        let node = self.node_mut(id)?;
        let label = node.kind.label();
        node.kind.param_mut(kind).ok_or_else(|| WeaverError::InvalidParameter {
            name: "param",
            reason: format!("{label} node has no {kind:?} parameter"),
        })
    }

    fn transport_mut(&mut self, id: NodeId) -> Result<&mut Transport> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Source(src) => Ok(&mut src.transport),
            NodeKind::Oscillator(osc) => Ok(&mut osc.transport),
            other => Err(WeaverError::InvalidState(format!(
                "{} node cannot be started or stopped",
                other.label()
            ))),
        }
    }

    /// Schedule playback at context time `when`, `offset` seconds into the
    /// buffer. A player can only be started once.
    pub fn start(&mut self, id: NodeId, when: f64, offset: f64) -> Result<()> {
        self.ensure_open()?;
        let transport = self.transport_mut(id)?;
        if transport.start.is_some() {
            return Err(WeaverError::InvalidState(format!("{id:?} was already started")));
        }
        transport.start = Some(when.max(0.0));
        if let NodeKind::Source(src) = &mut self.node_mut(id)?.kind {
            let offset = offset.max(0.0);
            src.position = offset * src.buffer.sample_rate() as f64;
            if src.looping {
                let len = src.buffer.length() as f64;
                if len > 0.0 {
                    src.position %= len;
                }
            }
        }
        Ok(())
    }

    /// Schedule the end of playback. Stopping an ended or already stopped
    /// player is tolerated.
    pub fn stop(&mut self, id: NodeId, when: f64) -> Result<()> {
        let transport = self.transport_mut(id)?;
        if transport.start.is_none() {
            return Err(WeaverError::InvalidState(format!("{id:?} was stopped before being started")));
        }
        if transport.ended || transport.stop.is_some() {
            log::warn!("stop on {id:?} ignored: already stopped");
            return Ok(());
        }
        transport.stop = Some(when.max(0.0));
        Ok(())
    }

    pub fn set_loop(&mut self, id: NodeId, looping: bool) -> Result<()> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Source(src) => {
                src.looping = looping;
                Ok(())
            }
            other => Err(WeaverError::InvalidParameter {
                name: "loop",
                reason: format!("{} node does not loop", other.label()),
            }),
        }
    }

    /// Whether a started player has finished.
    pub fn has_ended(&self, id: NodeId) -> Result<bool> {
        match &self.node(id)?.kind {
            NodeKind::Source(src) => Ok(src.transport.ended),
            NodeKind::Oscillator(osc) => Ok(osc.transport.ended),
            other => Err(WeaverError::InvalidState(format!("{} node has no transport", other.label()))),
        }
    }

    /// Read position of a buffer source, in seconds into its buffer.
    pub fn playback_position(&self, id: NodeId) -> Result<f64> {
        match &self.node(id)?.kind {
            NodeKind::Source(src) => Ok(src.position / src.buffer.sample_rate() as f64),
            other => Err(WeaverError::InvalidState(format!("{} node has no buffer", other.label()))),
        }
    }

    pub fn analyser_mut(&mut self, id: NodeId) -> Result<&mut Analyser> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Analyser(a) => Ok(a),
            other => Err(WeaverError::InvalidState(format!("{} node is not an analyser", other.label()))),
        }
    }

    fn processing_order(&mut self) -> Vec<NodeId> {
        if let Some(order) = &self.order {
            return order.clone();
        }
        // Kahn's algorithm; connect() keeps the graph acyclic
        let mut indegree: BTreeMap<NodeId, usize> = self.nodes.keys().map(|&id| (id, 0)).collect();
        for (_, to) in &self.edges {
            if let Some(d) = indegree.get_mut(to) {
                *d += 1;
            }
        }
        let mut ready: Vec<NodeId> = indegree.iter().filter(|(_, d)| **d == 0).map(|(id, _)| *id).collect();
        ready.reverse();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop() {
            order.push(id);
            for (_, to) in self.edges.iter().filter(|(from, _)| *from == id) {
                if let Some(d) = indegree.get_mut(to) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(*to);
                    }
                }
            }
        }
        self.order = Some(order.clone());
        order
    }

    /// Render one quantum through the whole graph and advance the clock.
    pub fn render_quantum(&mut self) -> Result<()> {
        self.ensure_open()?;
        let start = self.current_time();
        let sample_rate = self.sample_rate;

        for id in self.processing_order() {
            let [mix_l, mix_r] = &mut self.mix;
            mix_l.fill(0.0);
            mix_r.fill(0.0);
            for (from, _) in self.edges.iter().filter(|(_, to)| *to == id) {
                if let Some(src) = self.nodes.get(from) {
                    for i in 0..RENDER_QUANTUM {
                        mix_l[i] += src.output[0][i];
                        mix_r[i] += src.output[1][i];
                    }
                }
            }
            if let Some(node) = self.nodes.get_mut(&id) {
                node.process(&self.mix, start, sample_rate);
            }
        }

        self.frame += RENDER_QUANTUM as u64;
        let now = self.current_time();
        for node in self.nodes.values_mut() {
            node.kind.prune_automation(now);
        }

        if let ContextKind::Offline { length, .. } = self.kind {
            let captured = self.rendered[0].len();
            let take = RENDER_QUANTUM.min(length.saturating_sub(captured));
            let dest = self
                .nodes
                .get(&self.destination)
                .ok_or(WeaverError::UnknownNode(self.destination))?;
            self.rendered[0].extend_from_slice(&dest.output[0][..take]);
            self.rendered[1].extend_from_slice(&dest.output[1][..take]);
        }
        Ok(())
    }

    /// Fill output slices of any length from a realtime context.
    pub fn render_into(&mut self, left: &mut [f32], right: &mut [f32]) -> Result<()> {
        if self.kind != ContextKind::Realtime {
            return Err(WeaverError::InvalidState("render_into needs a realtime context".into()));
        }
        let frames = left.len().min(right.len());
        let mut written = 0;
        while written < frames {
            if self.pending_pos >= RENDER_QUANTUM {
                self.render_quantum()?;
                self.pending_pos = 0;
            }
            let dest = self.node(self.destination)?;
            let n = (RENDER_QUANTUM - self.pending_pos).min(frames - written);
            let range = self.pending_pos..self.pending_pos + n;
            left[written..written + n].copy_from_slice(&dest.output[0][range.clone()]);
            right[written..written + n].copy_from_slice(&dest.output[1][range]);
            self.pending_pos += n;
            written += n;
        }
        Ok(())
    }

    /// Offline: frames collected so far.
    pub fn rendered_frames(&self) -> usize {
        self.rendered[0].len()
    }

    /// Offline: total frames to render (zero for realtime contexts).
    pub fn length(&self) -> usize {
        match self.kind {
            ContextKind::Offline { length, .. } => length,
            ContextKind::Realtime => 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.kind, ContextKind::Offline { length, .. } if self.rendered_frames() >= length)
    }

    /// Offline: hand over the rendered buffer once every frame is in.
    pub fn take_rendered(&mut self) -> Result<AudioBuffer> {
        let ContextKind::Offline { channels, length } = self.kind else {
            return Err(WeaverError::InvalidState("only offline contexts produce a buffer".into()));
        };
        if self.rendered_frames() < length {
            return Err(WeaverError::InvalidState(format!(
                "{} of {length} frames rendered",
                self.rendered_frames()
            )));
        }
        let [l, r] = std::mem::take(&mut self.rendered);
        if length == 0 {
            return AudioBuffer::silent(channels, 0, self.sample_rate);
        }
        let planar = if channels == 1 {
            vec![l.iter().zip(&r).map(|(a, b)| 0.5 * (a + b)).collect()]
        } else {
            vec![l, r]
        };
        AudioBuffer::new(planar, self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_buffer(len: usize, sr: f32) -> Arc<AudioBuffer> {
        Arc::new(AudioBuffer::new(vec![(0..len).map(|i| i as f32 / len as f32).collect()], sr).unwrap())
    }

    fn dc_buffer(len: usize, sr: f32) -> Arc<AudioBuffer> {
        Arc::new(AudioBuffer::new(vec![vec![0.5; len]], sr).unwrap())
    }

    #[test]
    fn rejects_bad_rates_and_closed_contexts() {
        assert!(matches!(AudioContext::realtime(0.0), Err(WeaverError::Unsupported(_))));
        assert!(matches!(AudioContext::offline(6, 10, 44100.0), Err(WeaverError::Unsupported(_))));

        let mut ctx = AudioContext::realtime(44100.0).unwrap();
        ctx.close();
        ctx.close();
        assert!(matches!(ctx.create_gain(1.0), Err(WeaverError::Unsupported(_))));
        assert!(ctx.render_quantum().is_err());
    }

    #[test]
    fn source_plays_through_gain_to_destination() {
        let mut ctx = AudioContext::offline(2, 256, 44100.0).unwrap();
        let src = ctx.create_buffer_source(dc_buffer(256, 44100.0)).unwrap();
        let gain = ctx.create_gain(0.5).unwrap();
        ctx.connect(src, gain).unwrap();
        ctx.connect(gain, ctx.destination()).unwrap();
        ctx.start(src, 0.0, 0.0).unwrap();
        while !ctx.is_complete() {
            ctx.render_quantum().unwrap();
        }
        let out = ctx.take_rendered().unwrap();
        assert_eq!(out.length(), 256);
        assert!(out.channel(0).unwrap().iter().all(|&s| (s - 0.25).abs() < 1e-6));
        assert_eq!(out.channel(0), out.channel(1));
    }

    #[test]
    fn offline_length_is_exact_for_partial_quanta() {
        let mut ctx = AudioContext::offline(1, 300, 44100.0).unwrap();
        while !ctx.is_complete() {
            ctx.render_quantum().unwrap();
        }
        assert_eq!(ctx.take_rendered().unwrap().length(), 300);
    }

    #[test]
    fn start_offset_and_end_of_buffer() {
        let mut ctx = AudioContext::offline(1, 512, 4000.0).unwrap();
        let buf = ramp_buffer(300, 4000.0);
        let src = ctx.create_buffer_source(buf).unwrap();
        ctx.connect(src, ctx.destination()).unwrap();
        ctx.start(src, 0.0, 100.0 / 4000.0).unwrap();
        ctx.render_quantum().unwrap();
        assert!(!ctx.has_ended(src).unwrap());
        ctx.render_quantum().unwrap();
        assert!(ctx.has_ended(src).unwrap());
        while !ctx.is_complete() {
            ctx.render_quantum().unwrap();
        }
        let out = ctx.take_rendered().unwrap();
        let data = out.channel(0).unwrap();
        assert!((data[0] - 100.0 / 300.0).abs() < 1e-5);
        assert!((data[199] - 299.0 / 300.0).abs() < 1e-5);
        assert_eq!(data[200], 0.0);
    }

    #[test]
    fn looping_source_wraps() {
        let mut ctx = AudioContext::offline(1, 256, 44100.0).unwrap();
        let src = ctx.create_buffer_source(ramp_buffer(100, 44100.0)).unwrap();
        ctx.set_loop(src, true).unwrap();
        ctx.connect(src, ctx.destination()).unwrap();
        ctx.start(src, 0.0, 0.0).unwrap();
        while !ctx.is_complete() {
            ctx.render_quantum().unwrap();
        }
        let out = ctx.take_rendered().unwrap();
        let data = out.channel(0).unwrap();
        assert_eq!(data[100], 0.0);
        assert!((data[150] - 0.5).abs() < 1e-6);
        assert!(!ctx.has_ended(src).unwrap());
    }

    #[test]
    fn resamples_buffers_at_other_rates() {
        let mut ctx = AudioContext::offline(1, 512, 44100.0).unwrap();
        let buf = Arc::new(AudioBuffer::new(vec![vec![0.25; 2205]], 22050.0).unwrap());
        let src = ctx.create_buffer_source(buf).unwrap();
        ctx.connect(src, ctx.destination()).unwrap();
        ctx.start(src, 0.0, 0.0).unwrap();
        ctx.render_quantum().unwrap();
        // Half-rate buffer advances half a frame per output frame
        assert!((ctx.playback_position(src).unwrap() - 128.0 / 44100.0).abs() < 1e-9);
    }

    #[test]
    fn stop_is_tolerant_of_repeats_but_not_of_unstarted_sources() {
        let mut ctx = AudioContext::realtime(44100.0).unwrap();
        let src = ctx.create_buffer_source(dc_buffer(10, 44100.0)).unwrap();
        assert!(matches!(ctx.stop(src, 0.0), Err(WeaverError::InvalidState(_))));
        ctx.start(src, 0.0, 0.0).unwrap();
        assert!(ctx.start(src, 0.0, 0.0).is_err());
        ctx.stop(src, 0.0).unwrap();
        ctx.stop(src, 0.0).unwrap();
    }

    #[test]
    fn rejects_cycles_and_destination_output() {
        let mut ctx = AudioContext::realtime(44100.0).unwrap();
        let a = ctx.create_gain(1.0).unwrap();
        let b = ctx.create_gain(1.0).unwrap();
        ctx.connect(a, b).unwrap();
        assert!(ctx.connect(b, a).is_err());
        assert!(ctx.connect(a, a).is_err());
        assert!(ctx.connect(ctx.destination(), a).is_err());
        ctx.connect(a, b).unwrap();
        assert_eq!(ctx.connection_count(a), 1);
    }

    #[test]
    fn release_is_idempotent_and_counts_nodes() {
        let mut ctx = AudioContext::realtime(44100.0).unwrap();
        let a = ctx.create_gain(1.0).unwrap();
        let b = ctx.create_biquad(FilterType::Lowpass).unwrap();
        ctx.connect(a, b).unwrap();
        ctx.connect(b, ctx.destination()).unwrap();
        assert_eq!(ctx.node_count(), 2);
        assert!(ctx.release(a));
        assert!(!ctx.release(a));
        ctx.disconnect(a);
        assert_eq!(ctx.node_count(), 1);
        assert_eq!(ctx.connection_count(b), 1);
        assert!(!ctx.release(ctx.destination()));
        assert!(matches!(ctx.param(a, ParamKind::Gain), Err(WeaverError::UnknownNode(_))));
    }

    #[test]
    fn gain_automation_is_sample_accurate() {
        let sr = 1280.0 * 4.0;
        let mut ctx = AudioContext::offline(1, 256, sr).unwrap();
        let src = ctx.create_buffer_source(Arc::new(AudioBuffer::new(vec![vec![1.0; 256]], sr).unwrap())).unwrap();
        let gain = ctx.create_gain(0.0).unwrap();
        ctx.connect(src, gain).unwrap();
        ctx.connect(gain, ctx.destination()).unwrap();
        ctx.start(src, 0.0, 0.0).unwrap();
        let g = ctx.param_mut(gain, ParamKind::Gain).unwrap();
        g.set_value_at_time(0.0, 0.0).unwrap();
        g.linear_ramp_to_value_at_time(1.0, 200.0 / sr as f64).unwrap();
        while !ctx.is_complete() {
            ctx.render_quantum().unwrap();
        }
        let out = ctx.take_rendered().unwrap();
        let data = out.channel(0).unwrap();
        assert!((data[100] - 0.5).abs() < 1e-4);
        assert!((data[250] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn realtime_pull_accepts_any_callback_size() {
        let mut ctx = AudioContext::realtime(44100.0).unwrap();
        let osc = ctx.create_oscillator(441.0).unwrap();
        ctx.connect(osc, ctx.destination()).unwrap();
        ctx.start(osc, 0.0, 0.0).unwrap();
        let mut l = vec![0.0; 100];
        let mut r = vec![0.0; 100];
        let mut all = Vec::new();
        for _ in 0..5 {
            ctx.render_into(&mut l, &mut r).unwrap();
            all.extend_from_slice(&l);
        }
        assert_eq!(ctx.current_time(), 512.0 / 44100.0);
        for (i, s) in all.iter().enumerate() {
            let want = (std::f64::consts::TAU * 441.0 * i as f64 / 44100.0).sin() as f32;
            assert!((s - want).abs() < 1e-4, "frame {i}");
        }
        assert!(ctx.take_rendered().is_err());
    }

    #[test]
    fn params_are_addressed_by_node_kind() {
        let mut ctx = AudioContext::realtime(48000.0).unwrap();
        let p = ctx.create_panner(PanningModel::Hrtf, Distance::default()).unwrap();
        ctx.param_mut(p, ParamKind::PositionZ).unwrap().set_value(-2.0);
        assert_eq!(ctx.param(p, ParamKind::PositionZ).unwrap().value_at(0.0), -2.0);
        assert!(ctx.param(p, ParamKind::Gain).is_err());
        assert_eq!(ctx.node_label(p), Some("panner"));
    }

    #[test]
    fn convolver_needs_matching_rate() {
        let mut ctx = AudioContext::realtime(44100.0).unwrap();
        let ir = AudioBuffer::new(vec![vec![1.0; 16]], 48000.0).unwrap();
        assert!(ctx.create_convolver(&ir, true).is_err());
        let ir = AudioBuffer::new(vec![vec![1.0; 16]], 44100.0).unwrap();
        assert!(ctx.create_convolver(&ir, true).is_ok());
    }
}
