//! Voice pools: polyphony, stealing, and mono articulation handoff.
//!
//! One `Pool` exists per engine. All pools share the same allocation policy
//! behind the `PoolVoice` trait, so the subtractive voice and the wrapped
//! library voices get identical lifecycle semantics:
//!
//! 1. **Free tier**: any idle voice is taken first.
//! 2. **Releasing tier**: the releasing voice with the shortest remaining
//!    tail is retriggered (its retrigger crossfade keeps it click-free).
//! 3. **Steal tier**: the oldest still-active voice is fast-released and the
//!    incoming note parks on that slot, starting the moment the ≈25 ms tail
//!    ends.
//!
//! Mono mode reuses a single slot and owns the note stack for last-note
//! priority, plus the glide / slide / trill handoff rules.

use crate::bus::ParamTable;
use crate::catalogue::ParamId;
use crate::params::{EngineKind, NoteEvent};

use super::voice::{ModConfigSlots, MONO_SLIDE_S};

/// Held-note memory for mono last-note priority.
const NOTE_STACK_CAPACITY: usize = 64;

/// Ramp used when a released mono note falls back to a still-held one.
const MONO_FALLBACK_S: f32 = 0.005;

/// Lifecycle interface every engine voice implements. The pool drives
/// allocation, stealing and articulation exclusively through this.
pub trait PoolVoice {
    fn is_active(&self) -> bool;
    fn is_releasing(&self) -> bool;
    fn note(&self) -> u8;
    fn voice_id(&self) -> u32;
    fn allocation_time(&self) -> u64;
    /// Samples left in the release tail; `u64::MAX` when not releasing.
    fn remaining_release_samples(&self) -> u64;

    fn trigger(&mut self, event: &NoteEvent, table: &ParamTable, mods: &ModConfigSlots, now: u64);
    fn steal(&mut self, event: NoteEvent, now: u64);
    fn take_due_pending(&mut self, now: u64) -> Option<NoteEvent>;
    fn cancel_pending(&mut self, voice_id: Option<u32>, pitch: Option<u8>) -> bool;
    fn release(&mut self, table: &ParamTable, now: u64);
    fn fast_release(&mut self, now: u64);
    fn hard_reset(&mut self);
    fn step_boundary(&mut self, bar: bool, table: &ParamTable);
    fn process(&mut self, table: &ParamTable, now: u64) -> (f32, f32);
    fn flush_denormals(&mut self);

    /// Mono slide takeover (envelopes keep running, pitch ramps).
    fn legato_slide(&mut self, event: &NoteEvent, table: &ParamTable, now: u64, ramp_samples: u64);
    /// Mono glide (envelopes retrigger, pitch ramps).
    fn glide_to(
        &mut self,
        event: &NoteEvent,
        table: &ParamTable,
        mods: &ModConfigSlots,
        now: u64,
        glide_samples: u64,
    );
    /// Mono trill (one neighbour alternation over a step).
    fn trill_to(
        &mut self,
        event: &NoteEvent,
        table: &ParamTable,
        mods: &ModConfigSlots,
        now: u64,
        step_samples: u64,
        semitones: f32,
    );
}

/// Fixed-size pool of one voice type.
pub struct Pool<V: PoolVoice> {
    kind: EngineKind,
    sample_rate: f32,
    voices: Vec<V>,
    /// How many slots the allocator may use (≤ voices.len()). Shrinking the
    /// limit never kills voices already sounding beyond it; they just age out.
    max_voices: usize,
    mono: bool,
    note_stack: Vec<(u8, f32)>,
    nan_resets: u32,
}

impl<V: PoolVoice> Pool<V> {
    pub fn new(kind: EngineKind, sample_rate: f32, voices: Vec<V>) -> Self {
        let max_voices = voices.len();
        Self {
            kind,
            sample_rate,
            voices,
            max_voices,
            mono: false,
            note_stack: Vec::with_capacity(NOTE_STACK_CAPACITY),
            nan_resets: 0,
        }
    }

    #[inline]
    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.voices.len()
    }

    #[inline]
    pub fn is_mono(&self) -> bool {
        self.mono
    }

    /// Configure polyphony. `voices` is clamped to [1, capacity]; mono mode
    /// always uses exactly one slot.
    pub fn set_mode(&mut self, mono: bool, voices: usize, now: u64) {
        self.mono = mono;
        let limit = if mono {
            1
        } else {
            voices.clamp(1, self.voices.len())
        };
        if limit < self.max_voices {
            // Voices beyond the new limit finish quickly instead of hanging.
            for voice in self.voices[limit..].iter_mut() {
                if voice.is_active() {
                    voice.fast_release(now);
                }
            }
        }
        self.max_voices = limit;
        if !mono {
            self.note_stack.clear();
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    /// Route a note-on into the pool.
    pub fn trigger(
        &mut self,
        event: &NoteEvent,
        table: &ParamTable,
        mods: &ModConfigSlots,
        now: u64,
    ) {
        if event.velocity <= 0.0 {
            // MIDI semantics: zero velocity is a note-off.
            self.release_by(Some(event.voice_id), Some(event.pitch), table, now);
            return;
        }
        if self.mono {
            self.trigger_mono(event, table, mods, now);
        } else {
            self.trigger_poly(event, table, mods, now);
        }
    }

    fn trigger_poly(
        &mut self,
        event: &NoteEvent,
        table: &ParamTable,
        mods: &ModConfigSlots,
        now: u64,
    ) {
        let limit = self.max_voices;

        // Tier 1: free voice.
        if let Some(voice) = self.voices[..limit].iter_mut().find(|v| !v.is_active()) {
            voice.trigger(event, table, mods, now);
            return;
        }

        // Tier 2: releasing voice with the shortest remaining tail.
        if let Some(voice) = self.voices[..limit]
            .iter_mut()
            .filter(|v| v.is_releasing())
            .min_by_key(|v| v.remaining_release_samples())
        {
            voice.trigger(event, table, mods, now);
            return;
        }

        // Tier 3: steal the oldest still-active voice.
        if let Some(voice) = self.voices[..limit]
            .iter_mut()
            .min_by_key(|v| v.allocation_time())
        {
            voice.steal(*event, now);
        }
    }

    fn trigger_mono(
        &mut self,
        event: &NoteEvent,
        table: &ParamTable,
        mods: &ModConfigSlots,
        now: u64,
    ) {
        // Track held notes for last-note priority. The stack is bounded; a
        // pathological flood just forgets the oldest entry.
        if let Some(existing) = self
            .note_stack
            .iter_mut()
            .find(|(note, _)| *note == event.pitch)
        {
            existing.1 = event.velocity;
        } else {
            if self.note_stack.len() == NOTE_STACK_CAPACITY {
                self.note_stack.remove(0);
            }
            self.note_stack.push((event.pitch, event.velocity));
        }

        let glide = table.get(ParamId::Glide);
        let step_samples = (table.get(ParamId::StepLength) * self.sample_rate).max(3.0) as u64;
        let trill_semis = table.get_stepped(ParamId::TrillSemitones) as f32;

        let voice = &mut self.voices[0];
        if !voice.is_active() {
            voice.trigger(event, table, mods, now);
            return;
        }

        if event.trill {
            // Trill overrides slide.
            voice.trill_to(event, table, mods, now, step_samples, trill_semis);
        } else if event.slide {
            // Slide takeover: 80 ms, or glide·0.5 s when glide is engaged.
            let ramp_s = if glide > 0.001 {
                glide * 0.5
            } else {
                MONO_SLIDE_S
            };
            let ramp_samples = (ramp_s * self.sample_rate) as u64;
            voice.legato_slide(event, table, now, ramp_samples);
        } else if event.pitch == voice.note() {
            // Same pitch: plain retrigger, no new voice.
            voice.trigger(event, table, mods, now);
        } else if glide > 0.001 {
            // Portamento: glide·0.2 s to the new pitch, envelopes retrigger.
            let glide_samples = (glide * 0.2 * self.sample_rate) as u64;
            voice.glide_to(event, table, mods, now, glide_samples);
        } else {
            voice.trigger(event, table, mods, now);
        }
    }

    /// Release by voice id and/or pitch. Either selector may match.
    pub fn release_by(
        &mut self,
        voice_id: Option<u32>,
        pitch: Option<u8>,
        table: &ParamTable,
        now: u64,
    ) {
        if self.mono {
            self.release_mono(voice_id, pitch, table, now);
            return;
        }
        for voice in &mut self.voices {
            if voice.cancel_pending(voice_id, pitch) {
                continue;
            }
            if !voice.is_active() || voice.is_releasing() {
                continue;
            }
            let id_match = voice_id.map(|id| id == voice.voice_id()).unwrap_or(false);
            let pitch_match = pitch.map(|p| p == voice.note()).unwrap_or(false);
            if id_match || pitch_match {
                voice.release(table, now);
            }
        }
    }

    fn release_mono(
        &mut self,
        voice_id: Option<u32>,
        pitch: Option<u8>,
        table: &ParamTable,
        now: u64,
    ) {
        let sounding_note = self.voices[0].note();
        let sounding_id = self.voices[0].voice_id();

        // Release-by-id in mono addresses the sounding note.
        let released_pitch = pitch.or_else(|| {
            voice_id
                .filter(|id| *id == sounding_id)
                .map(|_| sounding_note)
        });
        if let Some(p) = released_pitch {
            self.note_stack.retain(|(note, _)| *note != p);
        }

        let voice = &mut self.voices[0];
        if !voice.is_active() {
            return;
        }
        let addresses_sounding = match released_pitch {
            Some(p) => p == voice.note(),
            // A selector was given but matched nothing: leave the voice be.
            None => voice_id.is_none() && pitch.is_none(),
        };
        if !addresses_sounding {
            return;
        }

        if let Some(&(held_note, held_velocity)) = self.note_stack.last() {
            // Last-note priority: fall back to the most recent held note,
            // legato so the envelope does not restart.
            let fallback = NoteEvent::new(held_note, held_velocity, voice.voice_id(), now);
            let ramp_samples = (MONO_FALLBACK_S * self.sample_rate) as u64;
            voice.legato_slide(&fallback, table, now, ramp_samples.max(1));
        } else {
            voice.release(table, now);
        }
    }

    /// Fast-release everything and forget held notes and parked steals.
    pub fn all_notes_off(&mut self, now: u64) {
        self.note_stack.clear();
        for voice in &mut self.voices {
            // Discard any parked steal note before the release.
            let _ = voice.take_due_pending(u64::MAX);
            if voice.is_active() {
                voice.fast_release(now);
            }
        }
    }

    /// Hard reset (panic): silence immediately, no tails.
    pub fn hard_reset(&mut self) {
        self.note_stack.clear();
        for voice in &mut self.voices {
            voice.hard_reset();
        }
    }

    /// Render and sum one sample across all voices. Parked steal notes that
    /// have become due are triggered here, sample-accurately. A voice whose
    /// output goes non-finite is reset to silence and counted.
    pub fn process(
        &mut self,
        table: &ParamTable,
        mods: &ModConfigSlots,
        now: u64,
    ) -> (f32, f32) {
        let mut left = 0.0;
        let mut right = 0.0;
        for voice in &mut self.voices {
            if let Some(parked) = voice.take_due_pending(now) {
                voice.trigger(&parked, table, mods, now);
            }
            let (l, r) = voice.process(table, now);
            if !l.is_finite() || !r.is_finite() {
                voice.hard_reset();
                self.nan_resets += 1;
                continue;
            }
            left += l;
            right += r;
        }
        (left, right)
    }

    pub fn step_boundary(&mut self, bar: bool, table: &ParamTable) {
        for voice in &mut self.voices {
            if voice.is_active() {
                voice.step_boundary(bar, table);
            }
        }
    }

    pub fn flush_denormals(&mut self) {
        for voice in &mut self.voices {
            voice.flush_denormals();
        }
    }

    pub fn take_nan_resets(&mut self) -> u32 {
        std::mem::take(&mut self.nan_resets)
    }

    /// Test/diagnostic access.
    pub fn voices(&self) -> &[V] {
        &self.voices
    }
}
