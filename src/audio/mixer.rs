//! Per-voice gain, dry tap, and the reverb/delay/granular send busses.
//!
//! The engine's effects are external collaborators: the mixer only owns the
//! send taps. Each bus accumulates its gain-scaled share of the voice mix
//! into a pre-allocated block buffer; after the sample loop the registered
//! `BusEffect` renders the bus input into the bus return, and the returns
//! are summed into the master output together with the dry tap. Effects are
//! registered before the stream starts and are never swapped from the audio
//! thread.

use crate::params::FxRoute;

/// Largest block the engine accepts.
pub const MAX_BLOCK: usize = 2048;

/// Identity of a send bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusId {
    Reverb,
    Delay,
    Granular,
}

impl BusId {
    #[inline]
    fn index(self) -> usize {
        match self {
            BusId::Reverb => 0,
            BusId::Delay => 1,
            BusId::Granular => 2,
        }
    }
}

/// A host-supplied bus effect. Pulls from the tap (`input`), writes a
/// processed stream (`output`); the mixer sums the output into the master.
///
/// Implementations must be real-time safe: no allocation, no locking.
pub trait BusEffect: Send {
    fn process(
        &mut self,
        input_left: &[f32],
        input_right: &[f32],
        output_left: &mut [f32],
        output_right: &mut [f32],
    );

    /// Drop internal state (all-notes-off / transport reset).
    fn reset(&mut self) {}
}

/// Default adapter: a stateless pass-through, so a bus without a registered
/// external effect still sounds (the send becomes a parallel dry path).
pub struct PassthroughBus;

impl BusEffect for PassthroughBus {
    fn process(
        &mut self,
        input_left: &[f32],
        input_right: &[f32],
        output_left: &mut [f32],
        output_right: &mut [f32],
    ) {
        output_left[..input_left.len()].copy_from_slice(input_left);
        output_right[..input_right.len()].copy_from_slice(input_right);
    }
}

struct SendBus {
    input_l: Vec<f32>,
    input_r: Vec<f32>,
    return_l: Vec<f32>,
    return_r: Vec<f32>,
    effect: Box<dyn BusEffect>,
}

impl SendBus {
    fn new() -> Self {
        Self {
            input_l: vec![0.0; MAX_BLOCK],
            input_r: vec![0.0; MAX_BLOCK],
            return_l: vec![0.0; MAX_BLOCK],
            return_r: vec![0.0; MAX_BLOCK],
            effect: Box::new(PassthroughBus),
        }
    }
}

/// Send gains for one accumulated sample, resolved from the parameter table
/// and the pool's FX route by the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendLevels {
    pub reverb: f32,
    pub delay: f32,
    pub granular: f32,
}

impl SendLevels {
    /// Classical routing feeds reverb+delay; granular routing feeds the
    /// granular bus only.
    pub fn for_route(route: FxRoute, reverb: f32, delay: f32, granular: f32) -> Self {
        match route {
            FxRoute::Classical => Self {
                reverb,
                delay,
                granular: 0.0,
            },
            FxRoute::Granular => Self {
                reverb: 0.0,
                delay: 0.0,
                granular,
            },
        }
    }
}

/// The master mixer: dry accumulation plus three send busses.
pub struct Mixer {
    dry_l: Vec<f32>,
    dry_r: Vec<f32>,
    busses: [SendBus; 3],
    block_len: usize,
}

impl Mixer {
    pub fn new() -> Self {
        Self {
            dry_l: vec![0.0; MAX_BLOCK],
            dry_r: vec![0.0; MAX_BLOCK],
            busses: [SendBus::new(), SendBus::new(), SendBus::new()],
            block_len: 0,
        }
    }

    /// Register the external effect object for a bus. Call before the audio
    /// stream starts.
    pub fn set_effect(&mut self, bus: BusId, effect: Box<dyn BusEffect>) {
        self.busses[bus.index()].effect = effect;
    }

    /// Zero the accumulators for a new block.
    pub fn begin_block(&mut self, block_len: usize) {
        let n = block_len.min(MAX_BLOCK);
        self.block_len = n;
        self.dry_l[..n].fill(0.0);
        self.dry_r[..n].fill(0.0);
        for bus in &mut self.busses {
            bus.input_l[..n].fill(0.0);
            bus.input_r[..n].fill(0.0);
        }
    }

    /// Accumulate one already-gain-scaled stereo sample at block index `i`.
    #[inline]
    pub fn accumulate(&mut self, i: usize, left: f32, right: f32, sends: SendLevels) {
        self.dry_l[i] += left;
        self.dry_r[i] += right;
        if sends.reverb > 0.0 {
            self.busses[0].input_l[i] += left * sends.reverb;
            self.busses[0].input_r[i] += right * sends.reverb;
        }
        if sends.delay > 0.0 {
            self.busses[1].input_l[i] += left * sends.delay;
            self.busses[1].input_r[i] += right * sends.delay;
        }
        if sends.granular > 0.0 {
            self.busses[2].input_l[i] += left * sends.granular;
            self.busses[2].input_r[i] += right * sends.granular;
        }
    }

    /// Run the bus effects and write dry + returns into the output slices.
    pub fn finish_block(&mut self, out_left: &mut [f32], out_right: &mut [f32]) {
        let n = self.block_len.min(out_left.len()).min(out_right.len());

        out_left[..n].copy_from_slice(&self.dry_l[..n]);
        out_right[..n].copy_from_slice(&self.dry_r[..n]);

        for bus in &mut self.busses {
            bus.return_l[..n].fill(0.0);
            bus.return_r[..n].fill(0.0);
            bus.effect.process(
                &bus.input_l[..n],
                &bus.input_r[..n],
                &mut bus.return_l[..n],
                &mut bus.return_r[..n],
            );
            for i in 0..n {
                out_left[i] += bus.return_l[i];
                out_right[i] += bus.return_r[i];
            }
        }
    }

    /// The gain-scaled tap point of a bus for the last accumulated block.
    /// External effect objects may pull from here instead of being driven
    /// through `BusEffect`.
    pub fn send_tap(&self, bus: BusId) -> (&[f32], &[f32]) {
        let bus = &self.busses[bus.index()];
        (
            &bus.input_l[..self.block_len],
            &bus.input_r[..self.block_len],
        )
    }

    /// Reset every registered effect.
    pub fn reset_effects(&mut self) {
        for bus in &mut self.busses {
            bus.effect.reset();
        }
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}
