//! Macro-oscillator and resonator voices.
//!
//! Both engines delegate waveform generation to the Plaits voice from
//! `mi-plaits-dsp`; note lifecycle, articulation ramps, the amplitude
//! envelope and parameter mapping live here so all three pools share the
//! same allocation and stealing semantics. The wrapper renders the library
//! voice in 12-sample blocks and serves single samples out of the block
//! buffer, the way the library is designed to run.
//!
//! Parameter mapping:
//! * macro-osc: model 1–24 selects the library engine (clamped to the
//!   compiled engine count); harmonics/timbre/morph and the LPG controls map
//!   straight through; `out_aux_mix` blends the main and auxiliary outputs.
//! * resonator: models 1–3 run the modal engine, 4–6 the string engine;
//!   structure→harmonics, brightness→timbre, position→morph and damping
//!   drives the internal decay. Strum intensity scales the trigger level.
//!
//! The library voice is tuned for its native 48 kHz grid; when the engine
//! runs at another rate the note is offset by `12·log2(48000/sr)` so the
//! sounding pitch stays correct.

use mi_plaits_dsp::dsp::voice::{Modulations, Patch, Voice as MiVoice};

use crate::bus::ParamTable;
use crate::catalogue::ParamId;
use crate::dsp::envelope::{AdsrEnvelope, EnvRole};
use crate::params::{EngineKind, NoteEvent};

use super::pool::PoolVoice;
use super::voice::{Articulation, ModConfigSlots, PitchRamp, TrillState, POLY_SLIDE_S, POLY_SLIDE_SEMITONES};

/// Library render quantum.
const PLAITS_BLOCK: usize = 12;

/// Engine count compiled into the wrapped library.
const MACRO_ENGINE_COUNT: i32 = 16;

/// Library engine indices for the resonator models.
const ENGINE_STRING: usize = 11;
const ENGINE_MODAL: usize = 12;

/// The library's native sample rate.
const PLAITS_NATIVE_RATE: f32 = 48000.0;

/// One macro-osc or resonator voice.
pub struct PlaitsVoice {
    kind: EngineKind,
    sample_rate: f32,
    /// Semitone offset compensating for a non-48 kHz engine rate.
    note_offset: f32,

    voice: MiVoice<'static>,
    patch: Patch,
    modulations: Modulations,
    out_buf: [f32; PLAITS_BLOCK],
    aux_buf: [f32; PLAITS_BLOCK],
    buf_pos: usize,
    /// Latched between blocks so a trigger landing mid-block is not lost.
    trigger_latch: bool,

    // Lifecycle (same shape as the subtractive voice).
    voice_id: u32,
    note: u8,
    velocity: f32,
    accented: bool,
    active: bool,
    allocation_time: u64,
    base_hz: f32,
    current_hz: f32,
    ramp: Option<PitchRamp>,
    trill: Option<TrillState>,
    articulation: Articulation,
    amp_env: AdsrEnvelope,
    pending: Option<NoteEvent>,
    pending_deadline: u64,
}

impl PlaitsVoice {
    pub fn new_macro(sample_rate: f32) -> Self {
        Self::new(EngineKind::MacroOsc, sample_rate)
    }

    pub fn new_resonator(sample_rate: f32) -> Self {
        Self::new(EngineKind::Resonator, sample_rate)
    }

    fn new(kind: EngineKind, sample_rate: f32) -> Self {
        let mut voice = MiVoice::new(&std::alloc::System, PLAITS_BLOCK);
        voice.init();
        Self {
            kind,
            sample_rate,
            note_offset: 12.0 * (PLAITS_NATIVE_RATE / sample_rate).log2(),
            voice,
            patch: Patch::default(),
            modulations: Modulations {
                trigger_patched: true,
                level_patched: true,
                ..Modulations::default()
            },
            out_buf: [0.0; PLAITS_BLOCK],
            aux_buf: [0.0; PLAITS_BLOCK],
            buf_pos: PLAITS_BLOCK,
            trigger_latch: false,
            voice_id: 0,
            note: 0,
            velocity: 0.0,
            accented: false,
            active: false,
            allocation_time: 0,
            base_hz: 440.0,
            current_hz: 440.0,
            ramp: None,
            trill: None,
            articulation: Articulation::Steady,
            amp_env: AdsrEnvelope::new(sample_rate, EnvRole::Amplitude),
            pending: None,
            pending_deadline: 0,
        }
    }

    fn apply_engine_params(&mut self, table: &ParamTable) {
        match self.kind {
            EngineKind::MacroOsc => {
                let model = table.get_stepped(ParamId::MacroModel).clamp(1, 24);
                self.patch.engine = (model - 1).min(MACRO_ENGINE_COUNT - 1) as usize;
                self.patch.harmonics = table.get(ParamId::MacroHarmonics).clamp(0.0, 1.0);
                self.patch.timbre = table.get(ParamId::MacroTimbre).clamp(0.0, 1.0);
                self.patch.morph = table.get(ParamId::MacroMorph).clamp(0.0, 1.0);
                self.patch.decay = table.get(ParamId::MacroLpgDecay).clamp(0.0, 1.0);
                self.patch.lpg_colour = table.get(ParamId::MacroLpgColour).clamp(0.0, 1.0);
            }
            EngineKind::Resonator => {
                let model = table.get_stepped(ParamId::ResoModel).clamp(1, 6);
                self.patch.engine = if model <= 3 { ENGINE_MODAL } else { ENGINE_STRING };
                self.patch.harmonics = table.get(ParamId::ResoStructure).clamp(0.0, 1.0);
                self.patch.timbre = table.get(ParamId::ResoBrightness).clamp(0.0, 1.0);
                self.patch.morph = table.get(ParamId::ResoPosition).clamp(0.0, 1.0);
                self.patch.decay = 1.0 - table.get(ParamId::ResoDamping).clamp(0.0, 1.0);
                self.patch.lpg_colour = table.get(ParamId::ResoBrightness).clamp(0.0, 1.0);
            }
            // Constructors only build MacroOsc and Resonator voices.
            EngineKind::Subtractive => {}
        }
    }

    fn render_block(&mut self, table: &ParamTable, env_level: f32) {
        self.apply_engine_params(table);

        // Pitch in library note units, compensated for the sample rate.
        self.patch.note =
            69.0 + 12.0 * (self.current_hz / 440.0).log2() + self.note_offset;

        let trigger_level = match self.kind {
            EngineKind::Resonator => {
                0.3 + 0.7 * table.get(ParamId::ResoStrum).clamp(0.0, 1.0)
            }
            _ => 1.0,
        };
        self.modulations.trigger = if self.trigger_latch { trigger_level } else { 0.0 };
        self.modulations.level = env_level.clamp(0.0, 1.0);

        self.voice.render(
            &self.patch,
            &self.modulations,
            &mut self.out_buf,
            &mut self.aux_buf,
        );

        self.trigger_latch = false;
        self.buf_pos = 0;
    }

    fn start_note(&mut self, event: &NoteEvent, table: &ParamTable, now: u64) {
        self.voice_id = event.voice_id;
        self.note = event.pitch;
        self.velocity = event.velocity.clamp(0.0, 1.0);
        self.accented = event.accent;
        self.active = true;
        self.allocation_time = now;
        self.pending = None;
        self.base_hz = crate::params::midi_to_hz(event.pitch as f32);
        self.trill = None;

        if event.slide {
            let from = self.base_hz * (POLY_SLIDE_SEMITONES / 12.0).exp2();
            let end = now + (POLY_SLIDE_S * self.sample_rate) as u64;
            self.ramp = Some(PitchRamp::new(from, self.base_hz, now, end));
            self.current_hz = from;
            self.articulation = Articulation::Sliding;
        } else {
            self.ramp = None;
            self.current_hz = self.base_hz;
            self.articulation = Articulation::Steady;
        }

        self.amp_env.trigger(
            table.get(ParamId::Attack),
            table.get(ParamId::Decay),
            table.get(ParamId::Sustain),
            event.accent,
        );
        self.trigger_latch = true;
        // Force a fresh block so the trigger is heard at this sample.
        self.buf_pos = PLAITS_BLOCK;
    }

    fn cancel_pitch_motion(&mut self, now: u64) -> f32 {
        if let Some(trill) = self.trill.take() {
            self.current_hz = trill.value(now);
        }
        if let Some(ramp) = self.ramp.take() {
            self.current_hz = ramp.value(now);
        }
        self.current_hz
    }
}

impl PoolVoice for PlaitsVoice {
    fn is_active(&self) -> bool {
        self.active
    }
    fn is_releasing(&self) -> bool {
        self.amp_env.is_releasing()
    }
    fn note(&self) -> u8 {
        self.note
    }
    fn voice_id(&self) -> u32 {
        self.voice_id
    }
    fn allocation_time(&self) -> u64 {
        self.allocation_time
    }
    fn remaining_release_samples(&self) -> u64 {
        self.amp_env.remaining_release_samples()
    }

    fn trigger(&mut self, event: &NoteEvent, table: &ParamTable, _mods: &ModConfigSlots, now: u64) {
        self.start_note(event, table, now);
    }

    fn steal(&mut self, event: NoteEvent, now: u64) {
        self.fast_release(now);
        self.pending = Some(event);
        self.pending_deadline = now + (0.026 * self.sample_rate) as u64;
    }

    fn take_due_pending(&mut self, now: u64) -> Option<NoteEvent> {
        if self.pending.is_some() && (!self.amp_env.is_active() || now >= self.pending_deadline) {
            self.pending.take()
        } else {
            None
        }
    }

    fn cancel_pending(&mut self, voice_id: Option<u32>, pitch: Option<u8>) -> bool {
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

    fn release(&mut self, table: &ParamTable, now: u64) {
        if !self.active {
            return;
        }
        if self.trill.take().is_some() {
            self.current_hz = self.base_hz;
        }
        if let Some(ramp) = self.ramp.take() {
            self.current_hz = ramp.value(now);
        }
        self.articulation = Articulation::Releasing;
        self.amp_env.release(table.get(ParamId::Release));
    }

    fn fast_release(&mut self, now: u64) {
        if !self.active {
            return;
        }
        self.cancel_pitch_motion(now);
        self.articulation = Articulation::Releasing;
        self.amp_env.fast_release();
    }

    fn hard_reset(&mut self) {
        self.active = false;
        self.amp_env.reset();
        self.ramp = None;
        self.trill = None;
        self.pending = None;
        self.articulation = Articulation::Steady;
        self.buf_pos = PLAITS_BLOCK;
        self.out_buf = [0.0; PLAITS_BLOCK];
        self.aux_buf = [0.0; PLAITS_BLOCK];
    }

    fn step_boundary(&mut self, _bar: bool, _table: &ParamTable) {}

    fn process(&mut self, table: &ParamTable, now: u64) -> (f32, f32) {
        if !self.active {
            return (0.0, 0.0);
        }

        // Pitch motion with deadline enforcement, as in the subtractive voice.
        if let Some(trill) = self.trill {
            if trill.done(now) {
                self.current_hz = trill.base_hz;
                self.trill = None;
                self.articulation = Articulation::Steady;
            } else {
                self.current_hz = trill.value(now);
            }
        } else if let Some(ramp) = self.ramp {
            if ramp.done(now) {
                self.current_hz = ramp.to_hz;
                self.ramp = None;
                if self.articulation != Articulation::Releasing {
                    self.articulation = Articulation::Steady;
                }
            } else {
                self.current_hz = ramp.value(now);
            }
        }

        let env_level = self.amp_env.tick();
        if !self.amp_env.is_active() {
            if self.pending.is_some() {
                return (0.0, 0.0);
            }
            self.active = false;
            self.ramp = None;
            self.trill = None;
            self.articulation = Articulation::Steady;
            return (0.0, 0.0);
        }

        if self.buf_pos >= PLAITS_BLOCK {
            self.render_block(table, env_level);
        }

        let main = self.out_buf[self.buf_pos];
        let aux = self.aux_buf[self.buf_pos];
        self.buf_pos += 1;

        let mixed = match self.kind {
            EngineKind::MacroOsc => {
                let mix = table.get(ParamId::MacroOutAuxMix).clamp(0.0, 1.0);
                main * (1.0 - mix) + aux * mix
            }
            _ => main,
        };

        let accent_gain = if self.accented {
            1.0 + 0.3 * table.get(ParamId::AccentAmount).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let out = mixed * (0.3 + 0.7 * self.velocity) * accent_gain;
        (out, out)
    }

    fn flush_denormals(&mut self) {}

    fn legato_slide(&mut self, event: &NoteEvent, _table: &ParamTable, now: u64, ramp_samples: u64) {
        let from = self.cancel_pitch_motion(now);
        self.voice_id = event.voice_id;
        self.note = event.pitch;
        self.velocity = event.velocity.clamp(0.0, 1.0);
        self.accented = event.accent;
        self.base_hz = crate::params::midi_to_hz(event.pitch as f32);
        self.ramp = Some(PitchRamp::new(
            from,
            self.base_hz,
            now,
            now + ramp_samples.max(1),
        ));
        self.articulation = Articulation::Sliding;
    }

    fn glide_to(
        &mut self,
        event: &NoteEvent,
        table: &ParamTable,
        _mods: &ModConfigSlots,
        now: u64,
        glide_samples: u64,
    ) {
        let from = self.cancel_pitch_motion(now);
        self.start_note(event, table, now);
        self.ramp = Some(PitchRamp::new(
            from,
            self.base_hz,
            now,
            now + glide_samples.max(1),
        ));
        self.current_hz = from;
        self.articulation = Articulation::Gliding;
    }

    fn trill_to(
        &mut self,
        event: &NoteEvent,
        table: &ParamTable,
        _mods: &ModConfigSlots,
        now: u64,
        step_samples: u64,
        semitones: f32,
    ) {
        self.cancel_pitch_motion(now);
        self.start_note(event, table, now);
        let upper = self.base_hz * (semitones / 12.0).exp2();
        self.trill = Some(TrillState::new(
            self.base_hz,
            upper,
            now,
            now + step_samples.max(3),
        ));
        self.current_hz = self.base_hz;
        self.articulation = Articulation::Trilling;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ParamTable;

    fn table() -> ParamTable {
        ParamTable::new(48000.0)
    }

    fn no_mods() -> ModConfigSlots {
        Default::default()
    }

    #[test]
    fn test_macro_voice_lifecycle() {
        let tbl = table();
        let mut voice = PlaitsVoice::new_macro(48000.0);
        assert!(!voice.is_active());

        let event = NoteEvent::new(60, 0.9, 1, 0);
        PoolVoice::trigger(&mut voice, &event, &tbl, &no_mods(), 0);
        assert!(voice.is_active());

        let mut heard = false;
        for n in 0..4800u64 {
            let (l, _) = voice.process(&tbl, n);
            assert!(l.is_finite());
            if l.abs() > 1.0e-4 {
                heard = true;
            }
        }
        assert!(heard, "macro voice produced no signal");

        PoolVoice::release(&mut voice, &tbl, 4800);
        for n in 4800..4800 + 48000 {
            voice.process(&tbl, n);
        }
        assert!(!voice.is_active());
    }

    #[test]
    fn test_resonator_model_selects_library_engine() {
        let mut tbl = table();
        let mut voice = PlaitsVoice::new_resonator(48000.0);

        tbl.apply(crate::bus::ParamUpdate {
            id: ParamId::ResoModel,
            value: 2.0,
            immediate: true,
        });
        voice.apply_engine_params(&tbl);
        assert_eq!(voice.patch.engine, ENGINE_MODAL);

        tbl.apply(crate::bus::ParamUpdate {
            id: ParamId::ResoModel,
            value: 5.0,
            immediate: true,
        });
        voice.apply_engine_params(&tbl);
        assert_eq!(voice.patch.engine, ENGINE_STRING);
    }

    #[test]
    fn test_macro_model_clamps_to_available_engines() {
        let mut tbl = table();
        let mut voice = PlaitsVoice::new_macro(48000.0);
        tbl.apply(crate::bus::ParamUpdate {
            id: ParamId::MacroModel,
            value: 24.0,
            immediate: true,
        });
        voice.apply_engine_params(&tbl);
        assert!(voice.patch.engine < MACRO_ENGINE_COUNT as usize);
    }

    #[test]
    fn test_note_offset_compensates_sample_rate() {
        let at_48k = PlaitsVoice::new_macro(48000.0);
        assert!(at_48k.note_offset.abs() < 1.0e-6);

        let at_44k = PlaitsVoice::new_macro(44100.0);
        // 48000/44100 is ~1.47 semitones up.
        assert!((at_44k.note_offset - 1.466).abs() < 0.01);
    }

    #[test]
    fn test_steal_and_pending_handoff() {
        let tbl = table();
        let mut voice = PlaitsVoice::new_macro(48000.0);
        PoolVoice::trigger(&mut voice, &NoteEvent::new(60, 0.9, 1, 0), &tbl, &no_mods(), 0);
        for n in 0..100 {
            voice.process(&tbl, n);
        }

        PoolVoice::steal(&mut voice, NoteEvent::new(72, 0.9, 2, 100), 100);
        assert!(voice.is_releasing());

        let deadline = 100 + (0.03 * 48000.0) as u64;
        for n in 100..deadline {
            voice.process(&tbl, n);
        }
        assert_eq!(voice.take_due_pending(deadline).map(|e| e.pitch), Some(72));
    }
}
