//! Note/control events and the audio-side pending queue.
//!
//! The control thread submits events through a bounded channel; the audio
//! callback drains the channel at the top of each block and files timed
//! events into a pre-allocated pending queue. During the sample loop the
//! queue releases events whose trigger time has arrived, so intra-block
//! triggers land on their exact sample index. Late events (time already in
//! the past) fire at the first sample of the current block.
//!
//! Ordering is stable: by trigger time first, then by arrival order.

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::catalogue::ParamId;
use crate::params::{EngineKind, FxRoute, ModConfig, NoteEvent};

/// Capacity of the control event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Capacity of the audio-side pending queue. Events beyond this are dropped
/// with the dropped-event counter incremented; 256 in-flight future events
/// is far beyond what a sequencer schedules ahead.
pub const PENDING_CAPACITY: usize = 256;

/// Everything the control thread can ask of the audio thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlEvent {
    NoteOn(NoteEvent),
    /// Release by voice id, by pitch, or both (either may match).
    NoteOff {
        voice_id: Option<u32>,
        pitch: Option<u8>,
        at_sample: u64,
    },
    /// Flush the queue and fast-release every active voice.
    AllNotesOff,
    SelectEngine(EngineKind),
    /// Polyphony mode for the active engine's pool.
    SetPolyphony {
        mono: bool,
        voices: usize,
    },
    SetFxRoute(EngineKind, FxRoute),
    /// Install (or replace) the modulator attached to a parameter. New
    /// voices instantiate it at note-on; `None`-like removal is expressed
    /// with a muted config.
    ConfigureModulator {
        target: ParamId,
        config: ModConfig,
    },
}

impl ControlEvent {
    /// The sample index at which this event takes effect. Untimed events
    /// apply at the start of the block that drains them.
    pub fn time(&self) -> Option<u64> {
        match self {
            ControlEvent::NoteOn(note) => Some(note.trigger_time),
            ControlEvent::NoteOff { at_sample, .. } => Some(*at_sample),
            _ => None,
        }
    }
}

/// Create the bounded control event channel.
pub fn create_event_channel() -> (Sender<ControlEvent>, Receiver<ControlEvent>) {
    bounded(EVENT_CHANNEL_CAPACITY)
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    time: u64,
    seq: u64,
    event: ControlEvent,
}

/// Pre-allocated, time-ordered queue of future events.
///
/// Storage is a Vec that never grows past its initial capacity, so the
/// audio thread never reallocates. Insertion keeps the queue sorted by
/// `(time, seq)`; `pop_due` pops from the front.
pub struct PendingQueue {
    events: Vec<Pending>,
    next_seq: u64,
    dropped: u32,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self {
            events: Vec::with_capacity(PENDING_CAPACITY),
            next_seq: 0,
            dropped: 0,
        }
    }

    /// File an event for a future (or past) sample time. Returns false and
    /// counts a drop when the queue is full.
    pub fn push(&mut self, time: u64, event: ControlEvent) -> bool {
        if self.events.len() >= PENDING_CAPACITY {
            self.dropped += 1;
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        // Insert before the first entry that sorts after us; equal times
        // keep arrival order because seq is monotonic.
        let pos = self
            .events
            .partition_point(|p| (p.time, p.seq) <= (time, seq));
        self.events.insert(pos, Pending { time, seq, event });
        true
    }

    /// Pop the next event whose trigger time is at or before `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<ControlEvent> {
        if self.events.first().map(|p| p.time <= now).unwrap_or(false) {
            Some(self.events.remove(0).event)
        } else {
            None
        }
    }

    /// Earliest pending trigger time, if any.
    pub fn next_time(&self) -> Option<u64> {
        self.events.first().map(|p| p.time)
    }

    /// Discard everything (all-notes-off semantics).
    pub fn flush(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events dropped due to a full queue since the last take.
    pub fn take_dropped(&mut self) -> u32 {
        std::mem::take(&mut self.dropped)
    }
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new()
    }
}
