//! Single voice of the subtractive engine.
//!
//! A voice is a complete monophonic synthesiser: the band-limited oscillator
//! bank, a highpass and a lowpass ZDF filter, independent amplitude and
//! filter envelopes, a voice LFO and up to eight per-parameter modulators.
//! The pool owns the voices; the audio thread is the only thing that ever
//! touches them.
//!
//! # Articulation
//!
//! Besides the envelope stages a voice runs a pitch-level articulation
//! state machine: steady, gliding (portamento), sliding (303-style legato
//! takeover or poly slide-into), trilling (neighbour alternation over one
//! step), releasing. Pitch movement is expressed as ramps with absolute
//! sample deadlines, not host timers: every ramp knows the sample index at
//! which it must be finished, and on expiry the authoritative pitch is
//! forced to the ramp target so exponential interpolation error can never
//! accumulate.
//!
//! Scheduling a new ramp always cancels the previous one at the current
//! sample: the in-flight value at `now` becomes the new ramp's start point.
//! Entering release cancels an in-flight trill and restores the
//! authoritative pitch first.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::bus::ParamTable;
use crate::catalogue::{ParamId, PARAM_COUNT};
use crate::dsp::envelope::{AdsrEnvelope, EnvRole};
use crate::dsp::filter::ZdfFilter;
use crate::dsp::lfo::Lfo;
use crate::dsp::modulation::Modulator;
use crate::dsp::oscillator::{OscLevels, OscillatorBank};
use crate::params::{midi_to_hz, LfoWaveform, ModConfig, NoteEvent};

/// Maximum per-parameter modulators a single voice instantiates.
pub const MAX_VOICE_MODS: usize = 8;

/// Modulator configurations held by the engine; voices copy what they need
/// at note-on.
pub type ModConfigSlots = [Option<(ParamId, ModConfig)>; MAX_VOICE_MODS];

/// Duration of the poly slide-into ramp (slide flag on a poly note).
pub const POLY_SLIDE_S: f32 = 0.040;

/// Poly slide-into starts half a semitone below the target.
pub const POLY_SLIDE_SEMITONES: f32 = -0.5;

/// Default mono slide-takeover ramp when glide is not engaged.
pub const MONO_SLIDE_S: f32 = 0.080;

/// Extra headroom granted to a stolen voice's fast release before the
/// pending note is forced to start.
const STEAL_DEADLINE_S: f32 = 0.026;

/// Pitch-level articulation state. Mutually exclusive; envelope stages run
/// independently of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Articulation {
    #[default]
    Steady,
    Gliding,
    Sliding,
    Trilling,
    Releasing,
}

/// Exponential pitch ramp with a sample-count deadline.
#[derive(Debug, Clone, Copy)]
pub struct PitchRamp {
    pub from_hz: f32,
    pub to_hz: f32,
    pub start: u64,
    pub end: u64,
}

impl PitchRamp {
    pub fn new(from_hz: f32, to_hz: f32, start: u64, end: u64) -> Self {
        Self {
            from_hz: from_hz.max(0.1),
            to_hz: to_hz.max(0.1),
            start,
            end: end.max(start + 1),
        }
    }

    /// Instantaneous frequency. Exponential in frequency (linear in pitch);
    /// at or past the deadline this is exactly the target.
    pub fn value(&self, now: u64) -> f32 {
        if now >= self.end {
            return self.to_hz;
        }
        let span = (self.end - self.start) as f32;
        let progress = (now.saturating_sub(self.start)) as f32 / span;
        self.from_hz * (self.to_hz / self.from_hz).powf(progress)
    }

    #[inline]
    pub fn done(&self, now: u64) -> bool {
        now >= self.end
    }
}

/// One trill cycle: hold → ramp up → hold → ramp down → hold, spread over
/// one sequencer step in three equal segments. Each segment holds for 25 %
/// of its span and ramps for 70 %; the remainder settles on the segment
/// target. The final value is exactly the base pitch.
#[derive(Debug, Clone, Copy)]
pub struct TrillState {
    pub base_hz: f32,
    pub upper_hz: f32,
    pub start: u64,
    pub end: u64,
}

impl TrillState {
    pub fn new(base_hz: f32, upper_hz: f32, start: u64, end: u64) -> Self {
        Self {
            base_hz: base_hz.max(0.1),
            upper_hz: upper_hz.max(0.1),
            start,
            end: end.max(start + 3),
        }
    }

    fn segment_value(from: f32, to: f32, local: f32) -> f32 {
        if local < 0.25 {
            from
        } else if local < 0.95 {
            let x = (local - 0.25) / 0.70;
            from * (to / from).powf(x)
        } else {
            to
        }
    }

    pub fn value(&self, now: u64) -> f32 {
        if now >= self.end {
            return self.base_hz;
        }
        let span = (self.end - self.start) as f32;
        let t = (now.saturating_sub(self.start)) as f32 / span * 3.0;
        let segment = t as u32;
        let local = t - segment as f32;
        match segment {
            0 => Self::segment_value(self.base_hz, self.upper_hz, local),
            1 => Self::segment_value(self.upper_hz, self.base_hz, local),
            _ => self.base_hz,
        }
    }

    #[inline]
    pub fn done(&self, now: u64) -> bool {
        now >= self.end
    }
}

/// A single subtractive voice.
pub struct Voice {
    sample_rate: f32,

    // Identity
    voice_id: u32,
    note: u8,
    velocity: f32,
    accented: bool,
    active: bool,
    allocation_time: u64,

    // Pitch. `base_freq_hz` is the authoritative target; `current_freq_hz`
    // follows ramps and trills towards it.
    base_freq_hz: f32,
    current_freq_hz: f32,
    drift_cents: f32,
    ramp: Option<PitchRamp>,
    trill: Option<TrillState>,
    articulation: Articulation,

    // Components, pre-allocated once.
    oscs: OscillatorBank,
    hpf: ZdfFilter,
    lpf: ZdfFilter,
    amp_env: AdsrEnvelope,
    filter_env: AdsrEnvelope,
    lfo: Lfo,
    modulators: [Option<(ParamId, Modulator)>; MAX_VOICE_MODS],
    mod_offsets: [f32; PARAM_COUNT],

    // Steal handoff: the incoming note waits here while the fast release
    // finishes, then triggers on this same slot.
    pending: Option<NoteEvent>,
    pending_deadline: u64,

    rng: SmallRng,
    last_out: f32,
}

impl Voice {
    pub fn new(sample_rate: f32, seed: u64) -> Self {
        Self {
            sample_rate,
            voice_id: 0,
            note: 0,
            velocity: 0.0,
            accented: false,
            active: false,
            allocation_time: 0,
            base_freq_hz: 440.0,
            current_freq_hz: 440.0,
            drift_cents: 0.0,
            ramp: None,
            trill: None,
            articulation: Articulation::Steady,
            oscs: OscillatorBank::new(sample_rate, seed),
            hpf: ZdfFilter::new(sample_rate),
            lpf: ZdfFilter::new(sample_rate),
            amp_env: AdsrEnvelope::new(sample_rate, EnvRole::Amplitude),
            filter_env: AdsrEnvelope::new(sample_rate, EnvRole::Filter),
            lfo: Lfo::new(sample_rate, seed.wrapping_mul(31).wrapping_add(17)),
            modulators: Default::default(),
            mod_offsets: [0.0; PARAM_COUNT],
            pending: None,
            pending_deadline: 0,
            rng: SmallRng::seed_from_u64(seed.wrapping_add(0x9E37)),
            last_out: 0.0,
        }
    }

    // --- identity accessors -------------------------------------------------

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn is_releasing(&self) -> bool {
        self.amp_env.is_releasing()
    }

    #[inline]
    pub fn note(&self) -> u8 {
        self.note
    }

    #[inline]
    pub fn voice_id(&self) -> u32 {
        self.voice_id
    }

    #[inline]
    pub fn allocation_time(&self) -> u64 {
        self.allocation_time
    }

    #[inline]
    pub fn articulation(&self) -> Articulation {
        self.articulation
    }

    /// Instantaneous oscillator base frequency, before octave/drift/vibrato.
    #[inline]
    pub fn current_freq_hz(&self) -> f32 {
        self.current_freq_hz
    }

    pub fn remaining_release_samples(&self) -> u64 {
        self.amp_env.remaining_release_samples()
    }

    // --- note lifecycle -----------------------------------------------------

    /// Full trigger: new identity, envelopes restarted (with retrigger fade
    /// if the voice is still audible), modulators instantiated fresh.
    pub fn trigger(
        &mut self,
        event: &NoteEvent,
        table: &ParamTable,
        mods: &ModConfigSlots,
        now: u64,
    ) {
        let was_idle = !self.active;

        self.voice_id = event.voice_id;
        self.note = event.pitch;
        self.velocity = event.velocity.clamp(0.0, 1.0);
        self.accented = event.accent;
        self.active = true;
        self.allocation_time = now;
        self.pending = None;

        self.base_freq_hz = midi_to_hz(event.pitch as f32);
        let drift = table.get(ParamId::Drift);
        self.drift_cents = self.rng.gen_range(-1.0f32..1.0) * 12.0 * drift;

        self.trill = None;
        if event.slide {
            // Poly slide-into: start half a semitone below and resolve onto
            // the target over 40 ms.
            let from = self.base_freq_hz * (POLY_SLIDE_SEMITONES / 12.0).exp2();
            let end = now + (POLY_SLIDE_S * self.sample_rate) as u64;
            self.ramp = Some(PitchRamp::new(from, self.base_freq_hz, now, end));
            self.current_freq_hz = from;
            self.articulation = Articulation::Sliding;
        } else {
            self.ramp = None;
            self.current_freq_hz = self.base_freq_hz;
            self.articulation = Articulation::Steady;
        }

        self.trigger_envelopes(table);

        if table.get_stepped(ParamId::LfoReset) == 1 {
            self.lfo.reset();
        }

        // Fresh modulator instances for this note.
        self.mod_offsets = [0.0; PARAM_COUNT];
        for (slot, config) in self.modulators.iter_mut().zip(mods.iter()) {
            *slot = config.map(|(target, cfg)| {
                let seed = self.rng.gen::<u64>();
                let mut modulator = Modulator::new(cfg, self.sample_rate, seed);
                modulator.note_on(event.accent);
                (target, modulator)
            });
        }

        if was_idle {
            // Starting from silence: stale filter state from the previous
            // note would colour the first samples.
            self.hpf.reset();
            self.lpf.reset();
        }
    }

    fn trigger_envelopes(&mut self, table: &ParamTable) {
        let attack = table.get(ParamId::Attack);
        let decay = table.get(ParamId::Decay);
        let sustain = table.get(ParamId::Sustain);
        self.amp_env.trigger(attack, decay, sustain, self.accented);
        self.filter_env.trigger(attack, decay, sustain, self.accented);
    }

    /// Mono slide takeover: the slot keeps its envelopes and phases (the
    /// identity swap of oscillator and gain state) and only the pitch ramps
    /// to the new note. The new note's id takes over the slot.
    pub fn legato_slide(
        &mut self,
        event: &NoteEvent,
        _table: &ParamTable,
        now: u64,
        ramp_samples: u64,
    ) {
        let from = self.cancel_pitch_motion(now);
        self.voice_id = event.voice_id;
        self.note = event.pitch;
        self.velocity = event.velocity.clamp(0.0, 1.0);
        self.accented = event.accent;
        self.base_freq_hz = midi_to_hz(event.pitch as f32);
        self.ramp = Some(PitchRamp::new(
            from,
            self.base_freq_hz,
            now,
            now + ramp_samples.max(1),
        ));
        self.articulation = Articulation::Sliding;
    }

    /// Mono glide (portamento): pitch ramps from the current value, but the
    /// envelopes retrigger as for a normal note.
    pub fn glide_to(
        &mut self,
        event: &NoteEvent,
        table: &ParamTable,
        mods: &ModConfigSlots,
        now: u64,
        glide_samples: u64,
    ) {
        let from = self.cancel_pitch_motion(now);
        self.trigger(event, table, mods, now);
        self.ramp = Some(PitchRamp::new(
            from,
            self.base_freq_hz,
            now,
            now + glide_samples.max(1),
        ));
        self.current_freq_hz = from;
        self.articulation = Articulation::Gliding;
    }

    /// Mono trill: one hold/ramp alternation with the scale neighbour over a
    /// single step, then the pitch settles on the new note exactly.
    pub fn trill_to(
        &mut self,
        event: &NoteEvent,
        table: &ParamTable,
        mods: &ModConfigSlots,
        now: u64,
        step_samples: u64,
        semitones: f32,
    ) {
        self.cancel_pitch_motion(now);
        self.trigger(event, table, mods, now);
        let base = self.base_freq_hz;
        let upper = base * (semitones / 12.0).exp2();
        self.trill = Some(TrillState::new(base, upper, now, now + step_samples.max(3)));
        self.ramp = None;
        self.current_freq_hz = base;
        self.articulation = Articulation::Trilling;
    }

    /// Cancel any in-flight ramp or trill at the current sample and return
    /// the pitch the voice is sounding right now.
    fn cancel_pitch_motion(&mut self, now: u64) -> f32 {
        if let Some(trill) = self.trill.take() {
            self.current_freq_hz = trill.value(now);
        }
        if let Some(ramp) = self.ramp.take() {
            self.current_freq_hz = ramp.value(now);
        }
        self.current_freq_hz
    }

    /// Enter release. An in-flight trill is cancelled and the authoritative
    /// pitch restored before the envelopes let go; a glide/slide ramp is
    /// frozen at its current value.
    pub fn release(&mut self, table: &ParamTable, now: u64) {
        if !self.active {
            return;
        }
        if self.trill.take().is_some() {
            self.current_freq_hz = self.base_freq_hz;
        }
        if let Some(ramp) = self.ramp.take() {
            self.current_freq_hz = ramp.value(now);
        }
        self.articulation = Articulation::Releasing;
        let release = table.get(ParamId::Release);
        self.amp_env.release(release);
        self.filter_env.release(release);
    }

    /// The ≈25 ms release used by stealing and all-notes-off.
    pub fn fast_release(&mut self, now: u64) {
        if !self.active {
            return;
        }
        if self.trill.take().is_some() {
            self.current_freq_hz = self.base_freq_hz;
        }
        if let Some(ramp) = self.ramp.take() {
            self.current_freq_hz = ramp.value(now);
        }
        self.articulation = Articulation::Releasing;
        self.amp_env.fast_release();
        self.filter_env.fast_release();
    }

    /// Steal this slot: fast-release the sounding note and park the new one.
    /// The pending note fires when the release tail ends (or at the deadline
    /// if the tail overruns).
    pub fn steal(&mut self, event: NoteEvent, now: u64) {
        self.fast_release(now);
        self.pending = Some(event);
        self.pending_deadline = now + (STEAL_DEADLINE_S * self.sample_rate) as u64;
    }

    /// Hand back the parked note once the fast release has finished.
    pub fn take_due_pending(&mut self, now: u64) -> Option<NoteEvent> {
        if self.pending.is_some() && (!self.amp_env.is_active() || now >= self.pending_deadline) {
            self.pending.take()
        } else {
            None
        }
    }

    /// Drop a parked note if a release arrives for it before it ever starts.
    pub fn cancel_pending(&mut self, voice_id: Option<u32>, pitch: Option<u8>) -> bool {
        if let Some(event) = self.pending {
            let id_match = voice_id.map(|id| id == event.voice_id).unwrap_or(false);
            let pitch_match = pitch.map(|p| p == event.pitch).unwrap_or(false);
            if id_match || pitch_match {
                self.pending = None;
                return true;
            }
        }
        false
    }

    /// Hard stop: silence, idle, no scheduled ramps. Used for panic and for
    /// NaN recovery.
    pub fn reset(&mut self) {
        self.active = false;
        self.amp_env.reset();
        self.filter_env.reset();
        self.hpf.reset();
        self.lpf.reset();
        self.oscs.reset();
        self.ramp = None;
        self.trill = None;
        self.pending = None;
        self.articulation = Articulation::Steady;
        self.last_out = 0.0;
    }

    /// Step-boundary hook from the engine's step counter.
    pub fn step_boundary(&mut self, bar: bool, table: &ParamTable) {
        let reset_mode = table.get_stepped(ParamId::LfoReset);
        if reset_mode == 2 || (bar && reset_mode == 3) {
            self.lfo.reset();
        }
        for slot in self.modulators.iter_mut().flatten() {
            slot.1.step_boundary();
        }
    }

    #[inline]
    fn param(&self, table: &ParamTable, id: ParamId) -> f32 {
        table.get(id) + self.mod_offsets[id.index()]
    }

    /// Render one sample. Returns a mono-duplicated stereo pair.
    pub fn process(&mut self, table: &ParamTable, now: u64) -> (f32, f32) {
        if !self.active {
            return (0.0, 0.0);
        }

        // Pitch motion with deadline enforcement.
        if let Some(trill) = self.trill {
            if trill.done(now) {
                self.current_freq_hz = trill.base_hz;
                self.trill = None;
                self.articulation = Articulation::Steady;
            } else {
                self.current_freq_hz = trill.value(now);
            }
        } else if let Some(ramp) = self.ramp {
            if ramp.done(now) {
                self.current_freq_hz = ramp.to_hz;
                self.ramp = None;
                if self.articulation != Articulation::Releasing {
                    self.articulation = Articulation::Steady;
                }
            } else {
                self.current_freq_hz = ramp.value(now);
            }
        }

        // Modulators write into the override slots before parameters are read.
        let last_out = self.last_out;
        for slot in self.modulators.iter_mut().flatten() {
            let (target, modulator) = slot;
            self.mod_offsets[target.index()] = modulator.tick(last_out);
        }

        let lfo_wave = LfoWaveform::from_index(table.get_stepped(ParamId::LfoWave).max(0) as usize);
        let lfo_raw = self.lfo.tick(self.param(table, ParamId::LfoRate), lfo_wave);
        let lfo_val = (lfo_raw + self.param(table, ParamId::LfoOffset))
            * self.param(table, ParamId::LfoDepth).clamp(0.0, 1.0);

        let filter_level = self.filter_env.tick();
        let amp_level = self.amp_env.tick();

        if !self.amp_env.is_active() {
            if self.pending.is_some() {
                // Stolen slot waiting for its parked note: stay allocated,
                // output silence until the pool hands the note over.
                return (0.0, 0.0);
            }
            // Cleanup epoch: release completed, the voice goes idle and owns
            // no scheduled ramps.
            self.active = false;
            self.ramp = None;
            self.trill = None;
            self.articulation = Articulation::Steady;
            self.last_out = 0.0;
            return (0.0, 0.0);
        }

        // Instantaneous pitch.
        let pitch_src = if table.get_stepped(ParamId::PitchModSource) == 1 {
            filter_level
        } else {
            lfo_val
        };
        let vibrato_semis = self.param(table, ParamId::PitchModAmount).clamp(0.0, 1.0) * pitch_src * 2.0;
        let tune_semis = table.get_stepped(ParamId::Octave) as f32;
        let semis = tune_semis + self.drift_cents / 100.0 + vibrato_semis;
        let freq = (self.current_freq_hz * (semis / 12.0).exp2()).clamp(0.1, 20000.0);

        // Pulse width with modulation.
        let pwm_src = if table.get_stepped(ParamId::PwmSource) == 1 {
            filter_level
        } else {
            lfo_val
        };
        let pulse_width = (self.param(table, ParamId::PulseWidth)
            + self.param(table, ParamId::PwmAmount) * pwm_src * 0.45)
            .clamp(0.05, 0.95);

        let levels = OscLevels {
            saw: self.param(table, ParamId::SawLevel).clamp(0.0, 1.0),
            square: self.param(table, ParamId::SquareLevel).clamp(0.0, 1.0),
            triangle: self.param(table, ParamId::TriangleLevel).clamp(0.0, 1.0),
            sub: self.param(table, ParamId::SubLevel).clamp(0.0, 1.0),
            noise: self.param(table, ParamId::NoiseLevel).clamp(0.0, 1.0),
        };
        let sub_octaves = table.get_stepped(ParamId::SubOctave).clamp(1, 2) as u32;
        let raw = self.oscs.tick(freq, pulse_width, sub_octaves, &levels);

        // Highpass first, then the resonant lowpass.
        let (_, highpassed) =
            self.hpf
                .process(raw, self.param(table, ParamId::HighpassCutoff), 0.0);

        let accent_amount = self.param(table, ParamId::AccentAmount).clamp(0.0, 1.0);
        let env_amount = self.param(table, ParamId::FilterEnvAmount).clamp(-1.0, 1.0);
        let env_boost = if self.accented {
            1.0 + accent_amount
        } else {
            1.0
        };
        let cutoff_octaves = env_amount * filter_level * env_boost * 5.0
            + self.param(table, ParamId::FilterLfoDepth).clamp(0.0, 1.0) * lfo_val * 2.0
            + self.param(table, ParamId::KeyFollow).clamp(0.0, 1.0)
                * (self.note as f32 - 60.0)
                / 12.0;
        let cutoff = self.param(table, ParamId::LowpassCutoff) * cutoff_octaves.exp2();
        let resonance = self.param(table, ParamId::Resonance);
        let (filtered, _) = self.lpf.process(highpassed, cutoff, resonance);

        // Amplitude: envelope × velocity, with the accent level boost.
        let accent_gain = if self.accented {
            1.0 + 0.3 * accent_amount
        } else {
            1.0
        };
        let gain = amp_level * (0.3 + 0.7 * self.velocity) * accent_gain;
        let out = filtered * gain;
        self.last_out = out;

        (out, out)
    }

    pub fn flush_denormals(&mut self) {
        self.hpf.flush_denormals();
        self.lpf.flush_denormals();
    }
}

impl crate::audio::pool::PoolVoice for Voice {
    fn is_active(&self) -> bool {
        Voice::is_active(self)
    }
    fn is_releasing(&self) -> bool {
        Voice::is_releasing(self)
    }
    fn note(&self) -> u8 {
        Voice::note(self)
    }
    fn voice_id(&self) -> u32 {
        Voice::voice_id(self)
    }
    fn allocation_time(&self) -> u64 {
        Voice::allocation_time(self)
    }
    fn remaining_release_samples(&self) -> u64 {
        Voice::remaining_release_samples(self)
    }
    fn trigger(&mut self, event: &NoteEvent, table: &ParamTable, mods: &ModConfigSlots, now: u64) {
        Voice::trigger(self, event, table, mods, now)
    }
    fn steal(&mut self, event: NoteEvent, now: u64) {
        Voice::steal(self, event, now)
    }
    fn take_due_pending(&mut self, now: u64) -> Option<NoteEvent> {
        Voice::take_due_pending(self, now)
    }
    fn cancel_pending(&mut self, voice_id: Option<u32>, pitch: Option<u8>) -> bool {
        Voice::cancel_pending(self, voice_id, pitch)
    }
    fn release(&mut self, table: &ParamTable, now: u64) {
        Voice::release(self, table, now)
    }
    fn fast_release(&mut self, now: u64) {
        Voice::fast_release(self, now)
    }
    fn hard_reset(&mut self) {
        Voice::reset(self)
    }
    fn step_boundary(&mut self, bar: bool, table: &ParamTable) {
        Voice::step_boundary(self, bar, table)
    }
    fn process(&mut self, table: &ParamTable, now: u64) -> (f32, f32) {
        Voice::process(self, table, now)
    }
    fn flush_denormals(&mut self) {
        Voice::flush_denormals(self)
    }
    fn legato_slide(&mut self, event: &NoteEvent, table: &ParamTable, now: u64, ramp_samples: u64) {
        Voice::legato_slide(self, event, table, now, ramp_samples)
    }
    fn glide_to(
        &mut self,
        event: &NoteEvent,
        table: &ParamTable,
        mods: &ModConfigSlots,
        now: u64,
        glide_samples: u64,
    ) {
        Voice::glide_to(self, event, table, mods, now, glide_samples)
    }
    fn trill_to(
        &mut self,
        event: &NoteEvent,
        table: &ParamTable,
        mods: &ModConfigSlots,
        now: u64,
        step_samples: u64,
        semitones: f32,
    ) {
        Voice::trill_to(self, event, table, mods, now, step_samples, semitones)
    }
}
