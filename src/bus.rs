//! Lock-free control→audio parameter bus and audio→control telemetry.
//!
//! The control thread publishes `(param_id, target)` records into a bounded
//! channel; the audio thread drains the channel at the start of every block
//! and writes targets into its smoothed-value table. The drain path never
//! blocks and never allocates. In the opposite direction the audio thread
//! publishes an `EngineTelemetry` snapshot through a triple buffer once per
//! block, which is the only way audio-side errors (NaN resets, dropped
//! events) become visible to the control thread.

use crossbeam_channel::{bounded, Receiver, Sender};
use triple_buffer::{Input, Output, TripleBuffer};

use crate::catalogue::{self, ParamId, PARAM_COUNT};

/// Capacity of the parameter record channel. Full-queue behaviour is
/// back-pressure to the control thread, not blocking.
pub const PARAM_CHANNEL_CAPACITY: usize = 1024;

/// One parameter change record published by the control thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamUpdate {
    pub id: ParamId,
    /// Validated target value in the parameter's natural unit.
    pub value: f32,
    /// Immediate updates skip the one-pole lag (discrete switches).
    pub immediate: bool,
}

/// Create the bounded parameter channel (control side, audio side).
pub fn create_param_channel() -> (Sender<ParamUpdate>, Receiver<ParamUpdate>) {
    bounded(PARAM_CHANNEL_CAPACITY)
}

/// Default smoothing time constant in milliseconds.
pub const DEFAULT_SMOOTHING_MS: f32 = 15.0;

/// One-pole parameter lag: `current += (1 - coeff) * (target - current)`.
#[derive(Debug, Clone, Copy)]
struct Smoother {
    current: f32,
    target: f32,
}

impl Smoother {
    fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
        }
    }

    #[inline]
    fn tick(&mut self, coeff: f32) {
        self.current = coeff * self.current + (1.0 - coeff) * self.target;
    }
}

/// Audio-side table of smoothed parameter values, one slot per `ParamId`.
///
/// Owned exclusively by the audio thread. Reads from voices are plain array
/// loads; writes happen only in the block-top drain. Stepped and unsmoothed
/// parameters snap to their target instead of lagging.
pub struct ParamTable {
    slots: [Smoother; PARAM_COUNT],
    /// Per-slot smoothing coefficient (1.0 disables the lag entirely).
    coeffs: [f32; PARAM_COUNT],
    sample_rate: f32,
}

impl ParamTable {
    /// Build a table holding every catalogue default, with the standard
    /// 15 ms time constant on smoothed parameters.
    pub fn new(sample_rate: f32) -> Self {
        Self::with_smoothing(sample_rate, DEFAULT_SMOOTHING_MS)
    }

    /// Build a table with a custom smoothing time constant.
    pub fn with_smoothing(sample_rate: f32, smoothing_ms: f32) -> Self {
        let coeff = smoothing_coeff(sample_rate, smoothing_ms);
        let mut slots = [Smoother::new(0.0); PARAM_COUNT];
        let mut coeffs = [1.0f32; PARAM_COUNT];
        for desc in catalogue::DESCRIPTORS.iter() {
            slots[desc.id.index()] = Smoother::new(desc.default);
            if desc.smoothed {
                coeffs[desc.id.index()] = coeff;
            }
        }
        Self {
            slots,
            coeffs,
            sample_rate,
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Apply one drained record. Values arriving here were validated on the
    /// control side; the clamp is a branchless backstop, not error handling.
    pub fn apply(&mut self, update: ParamUpdate) {
        let desc = catalogue::descriptor(update.id);
        let mut value = update.value.clamp(desc.min, desc.max);
        if desc.stepped {
            value = value.round();
        }
        let slot = &mut self.slots[update.id.index()];
        slot.target = value;
        if update.immediate || !desc.smoothed {
            slot.current = value;
        }
    }

    /// Advance every smoothed slot by one sample.
    #[inline]
    pub fn tick(&mut self) {
        for (slot, &coeff) in self.slots.iter_mut().zip(self.coeffs.iter()) {
            if coeff < 1.0 {
                slot.tick(coeff);
            }
        }
    }

    /// Current (smoothed) value of a parameter. Plain load.
    #[inline]
    pub fn get(&self, id: ParamId) -> f32 {
        self.slots[id.index()].current
    }

    /// Current value of a stepped parameter as an integer.
    #[inline]
    pub fn get_stepped(&self, id: ParamId) -> i32 {
        self.slots[id.index()].current.round() as i32
    }

    /// Target value (end of any in-flight lag).
    #[inline]
    pub fn target(&self, id: ParamId) -> f32 {
        self.slots[id.index()].target
    }

    /// Flat snapshot of all current values, in catalogue order. Used by the
    /// external patch layer; not called on the audio thread.
    pub fn snapshot(&self) -> Vec<(&'static str, f32)> {
        catalogue::DESCRIPTORS
            .iter()
            .map(|desc| (desc.name, self.slots[desc.id.index()].current))
            .collect()
    }
}

/// One-pole coefficient for a given time constant.
#[inline]
pub fn smoothing_coeff(sample_rate: f32, time_ms: f32) -> f32 {
    (-1.0 / (time_ms * 0.001 * sample_rate)).exp()
}

/// Counters and state published by the audio thread once per block.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EngineTelemetry {
    /// Active voices per engine (subtractive, resonator, macro-osc).
    pub active_voices: [usize; 3],
    /// Note/automation events dropped (invalid pitch, queue overflow).
    pub dropped_events: u32,
    /// Voices reset after producing a non-finite sample.
    pub nan_resets: u32,
    /// Parameter records discarded because the pending queue was full.
    pub queue_full_drops: u32,
    /// Sample time at the end of the last rendered block.
    pub sample_time: u64,
    /// Length of the last rendered block.
    pub last_block_len: usize,
}

/// Create the telemetry triple buffer (audio-side input, control-side output).
pub fn create_telemetry_buffer() -> (Input<EngineTelemetry>, Output<EngineTelemetry>) {
    TripleBuffer::new(&EngineTelemetry::default()).split()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_table_starts_at_defaults() {
        let table = ParamTable::new(44100.0);
        assert_relative_eq!(table.get(ParamId::LowpassCutoff), 1000.0);
        assert_relative_eq!(table.get(ParamId::SawLevel), 1.0);
        assert_relative_eq!(table.get(ParamId::MasterGain), 0.7);
    }

    #[test]
    fn test_smoothed_step_reaches_63_percent_at_tau() {
        // A 0→1 step on a smoothed parameter must reach 1 - 1/e at the
        // 15 ms time constant, within a millisecond.
        let sample_rate = 44100.0;
        let mut table = ParamTable::new(sample_rate);
        table.apply(ParamUpdate {
            id: ParamId::SquareLevel,
            value: 0.0,
            immediate: true,
        });
        table.apply(ParamUpdate {
            id: ParamId::SquareLevel,
            value: 1.0,
            immediate: false,
        });

        let tau_samples = (0.015 * sample_rate) as usize;
        for _ in 0..tau_samples {
            table.tick();
        }
        let at_tau = table.get(ParamId::SquareLevel);
        assert!(
            (at_tau - 0.632).abs() < 0.05,
            "expected ~0.63 at tau, got {}",
            at_tau
        );
    }

    #[test]
    fn test_immediate_update_skips_lag() {
        let mut table = ParamTable::new(44100.0);
        table.apply(ParamUpdate {
            id: ParamId::LowpassCutoff,
            value: 5000.0,
            immediate: true,
        });
        assert_relative_eq!(table.get(ParamId::LowpassCutoff), 5000.0);
    }

    #[test]
    fn test_stepped_params_snap_and_round() {
        let mut table = ParamTable::new(44100.0);
        table.apply(ParamUpdate {
            id: ParamId::Octave,
            value: 11.7,
            immediate: false,
        });
        // Stepped: no lag, rounded to the nearest step.
        assert_relative_eq!(table.get(ParamId::Octave), 12.0);
        assert_eq!(table.get_stepped(ParamId::Octave), 12);
    }

    #[test]
    fn test_apply_clamps_as_backstop() {
        let mut table = ParamTable::new(44100.0);
        table.apply(ParamUpdate {
            id: ParamId::PulseWidth,
            value: 2.0,
            immediate: true,
        });
        assert_relative_eq!(table.get(ParamId::PulseWidth), 0.95);
    }

    #[test]
    fn test_param_channel_is_bounded() {
        let (tx, _rx) = create_param_channel();
        for _ in 0..PARAM_CHANNEL_CAPACITY {
            tx.try_send(ParamUpdate {
                id: ParamId::MasterGain,
                value: 0.5,
                immediate: false,
            })
            .unwrap();
        }
        assert!(tx
            .try_send(ParamUpdate {
                id: ParamId::MasterGain,
                value: 0.5,
                immediate: false,
            })
            .is_err());
    }

    #[test]
    fn test_telemetry_round_trip() {
        let (mut input, mut output) = create_telemetry_buffer();
        input.write(EngineTelemetry {
            active_voices: [3, 0, 0],
            dropped_events: 1,
            ..EngineTelemetry::default()
        });
        let snap = output.read();
        assert_eq!(snap.active_voices[0], 3);
        assert_eq!(snap.dropped_events, 1);
    }
}
