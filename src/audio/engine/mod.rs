//! Core synthesis engine.
//!
//! The `Engine` lives on the audio thread and owns everything that makes
//! sound: the three voice pools behind the engine dispatcher, the pending
//! event queue, the smoothed parameter table, the mixer with its send
//! busses, and the sample clock. The `EngineController` is the control
//! thread's handle: every operation on it is a validated, wait-free channel
//! write. The two halves are created together and speak only through the
//! parameter bus, the event channel, and the telemetry triple buffer.
//!
//! The audio callback (`render`) never allocates, never takes a lock, and
//! never returns an error: invalid input is dropped and counted, non-finite
//! voice output resets the offending voice, and everything else is clamped.


use crossbeam_channel::{Receiver, Sender, TrySendError};
use triple_buffer::{Input, Output};

use crate::bus::{
    create_param_channel, create_telemetry_buffer, EngineTelemetry, ParamTable, ParamUpdate,
};
use crate::catalogue::{self, ParamId};
use crate::clock::SampleClock;
use crate::error::ControlError;
use crate::events::{create_event_channel, ControlEvent, PendingQueue};
use crate::params::{EngineKind, FxRoute, ModConfig, NoteEvent};

use super::mixer::{BusEffect, BusId, Mixer, SendLevels, MAX_BLOCK};
use super::plaits_voice::PlaitsVoice;
use super::pool::Pool;
use super::voice::{ModConfigSlots, Voice};

/// Fixed polyphony of the subtractive pool.
pub const SUBTRACTIVE_VOICES: usize = 8;

/// Maximum polyphony of the resonator pool (user-configurable 1..=4).
pub const RESONATOR_VOICES: usize = 4;

/// Fixed polyphony of the macro-oscillator pool.
pub const MACRO_VOICES: usize = 8;

/// Steps per bar for modulator bar-resets.
const STEPS_PER_BAR: u64 = 16;

/// The audio-thread half: voice pools, scheduler, mixer, clock.
pub struct Engine {
    clock: SampleClock,
    table: ParamTable,

    param_rx: Receiver<ParamUpdate>,
    event_rx: Receiver<ControlEvent>,
    pending: PendingQueue,

    subtractive: Pool<Voice>,
    resonator: Pool<PlaitsVoice>,
    macro_osc: Pool<PlaitsVoice>,
    active_engine: EngineKind,
    routes: [FxRoute; 3],

    mixer: Mixer,
    mod_slots: ModConfigSlots,

    telemetry_input: Input<EngineTelemetry>,
    telemetry: EngineTelemetry,

    next_step_at: u64,
    step_count: u64,
}

/// The control-thread half: validated submission API.
pub struct EngineController {
    param_tx: Sender<ParamUpdate>,
    event_tx: Sender<ControlEvent>,
    telemetry_output: Output<EngineTelemetry>,
}

/// Create an engine / controller pair for a fixed sample rate.
pub fn create_engine(sample_rate: f32) -> (Engine, EngineController) {
    let (param_tx, param_rx) = create_param_channel();
    let (event_tx, event_rx) = create_event_channel();
    let (telemetry_input, telemetry_output) = create_telemetry_buffer();

    let subtractive_voices = (0..SUBTRACTIVE_VOICES)
        .map(|i| Voice::new(sample_rate, 0xACE0 + i as u64))
        .collect();
    let resonator_voices = (0..RESONATOR_VOICES)
        .map(|_| PlaitsVoice::new_resonator(sample_rate))
        .collect();
    let macro_voices = (0..MACRO_VOICES)
        .map(|_| PlaitsVoice::new_macro(sample_rate))
        .collect();

    let engine = Engine {
        clock: SampleClock::new(sample_rate),
        table: ParamTable::new(sample_rate),
        param_rx,
        event_rx,
        pending: PendingQueue::new(),
        subtractive: Pool::new(EngineKind::Subtractive, sample_rate, subtractive_voices),
        resonator: Pool::new(EngineKind::Resonator, sample_rate, resonator_voices),
        macro_osc: Pool::new(EngineKind::MacroOsc, sample_rate, macro_voices),
        active_engine: EngineKind::Subtractive,
        routes: [FxRoute::Classical; 3],
        mixer: Mixer::new(),
        mod_slots: Default::default(),
        telemetry_input,
        telemetry: EngineTelemetry::default(),
        next_step_at: 0,
        step_count: 0,
    };

    let controller = EngineController {
        param_tx,
        event_tx,
        telemetry_output,
    };

    (engine, controller)
}

impl Engine {
    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.clock.sample_rate()
    }

    /// Sample time at the start of the next block.
    #[inline]
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn active_voice_count(&self) -> usize {
        self.subtractive.active_voices()
            + self.resonator.active_voices()
            + self.macro_osc.active_voices()
    }

    #[inline]
    pub fn active_engine(&self) -> EngineKind {
        self.active_engine
    }

    /// Register an external bus effect. Call before the stream starts.
    pub fn set_bus_effect(&mut self, bus: BusId, effect: Box<dyn BusEffect>) {
        self.mixer.set_effect(bus, effect);
    }

    /// Gain-scaled tap of a send bus for the last rendered block.
    pub fn send_tap(&self, bus: BusId) -> (&[f32], &[f32]) {
        self.mixer.send_tap(bus)
    }

    /// Flat `name → value` snapshot for the external patch layer. Not for
    /// the audio thread.
    pub fn current_values(&self) -> Vec<(&'static str, f32)> {
        self.table.snapshot()
    }

    /// Render one stereo block. `block_start` is the host's sample time for
    /// the first sample; the engine clock never moves backwards.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32], block_start: u64) {
        let n = left.len().min(right.len()).min(MAX_BLOCK);
        self.clock.align_to(block_start);
        let start = self.clock.now();

        self.drain_control(start);
        self.mixer.begin_block(n);

        let master_route = self.routes;
        for i in 0..n {
            let now = start + i as u64;

            while let Some(event) = self.pending.pop_due(now) {
                self.apply_event(event, now);
            }
            self.tick_step_counter(now);
            self.table.tick();

            let master = self.table.get(ParamId::MasterGain);
            let reverb = self.table.get(ParamId::ReverbSend);
            let delay = self.table.get(ParamId::DelaySend);
            let granular = self.table.get(ParamId::GranularSend);

            let (sl, sr) = self.subtractive.process(&self.table, &self.mod_slots, now);
            self.mixer.accumulate(
                i,
                sl * master,
                sr * master,
                SendLevels::for_route(master_route[0], reverb, delay, granular),
            );

            let (rl, rr) = self.resonator.process(&self.table, &self.mod_slots, now);
            self.mixer.accumulate(
                i,
                rl * master,
                rr * master,
                SendLevels::for_route(master_route[1], reverb, delay, granular),
            );

            let (ml, mr) = self.macro_osc.process(&self.table, &self.mod_slots, now);
            self.mixer.accumulate(
                i,
                ml * master,
                mr * master,
                SendLevels::for_route(master_route[2], reverb, delay, granular),
            );
        }

        self.subtractive.flush_denormals();
        self.resonator.flush_denormals();
        self.macro_osc.flush_denormals();

        self.mixer.finish_block(&mut left[..n], &mut right[..n]);

        // Headroom guard, not a limiter: a runaway resonance is clamped
        // instead of propagating out of range.
        for sample in left[..n].iter_mut().chain(right[..n].iter_mut()) {
            *sample = sample.clamp(-4.0, 4.0);
        }

        self.clock.advance(n as u64);
        self.publish_telemetry(n);
    }

    fn drain_control(&mut self, block_start: u64) {
        for update in self.param_rx.try_iter() {
            self.table.apply(update);
        }

        while let Ok(event) = self.event_rx.try_recv() {
            match event.time() {
                Some(time) => {
                    // Late events fire at the first sample of this block.
                    let at = time.max(block_start);
                    if !self.pending.push(at, event) {
                        self.telemetry.queue_full_drops += 1;
                    }
                }
                None => self.apply_event(event, block_start),
            }
        }
        self.telemetry.queue_full_drops += self.pending.take_dropped();
    }

    fn apply_event(&mut self, event: ControlEvent, now: u64) {
        match event {
            ControlEvent::NoteOn(note) => {
                if note.pitch > 127 {
                    self.telemetry.dropped_events += 1;
                    return;
                }
                self.dispatch_note_on(note, now);
            }
            ControlEvent::NoteOff {
                voice_id, pitch, ..
            } => {
                // Releases address every pool so notes survive engine
                // switches and still end correctly.
                self.subtractive
                    .release_by(voice_id, pitch, &self.table, now);
                self.resonator.release_by(voice_id, pitch, &self.table, now);
                self.macro_osc.release_by(voice_id, pitch, &self.table, now);
            }
            ControlEvent::AllNotesOff => {
                self.pending.flush();
                self.subtractive.all_notes_off(now);
                self.resonator.all_notes_off(now);
                self.macro_osc.all_notes_off(now);
                self.mixer.reset_effects();
            }
            ControlEvent::SelectEngine(kind) => {
                self.active_engine = kind;
            }
            ControlEvent::SetPolyphony { mono, voices } => match self.active_engine {
                EngineKind::Subtractive => self.subtractive.set_mode(mono, voices, now),
                EngineKind::Resonator => self.resonator.set_mode(mono, voices, now),
                EngineKind::MacroOsc => self.macro_osc.set_mode(mono, voices, now),
            },
            ControlEvent::SetFxRoute(kind, route) => {
                self.routes[kind.index()] = route;
            }
            ControlEvent::ConfigureModulator { target, config } => {
                self.install_modulator(target, config);
            }
        }
    }

    fn dispatch_note_on(&mut self, note: NoteEvent, now: u64) {
        match self.active_engine {
            EngineKind::Subtractive => {
                self.subtractive
                    .trigger(&note, &self.table, &self.mod_slots, now)
            }
            EngineKind::Resonator => {
                self.resonator
                    .trigger(&note, &self.table, &self.mod_slots, now)
            }
            EngineKind::MacroOsc => {
                self.macro_osc
                    .trigger(&note, &self.table, &self.mod_slots, now)
            }
        }
    }

    fn install_modulator(&mut self, target: ParamId, config: ModConfig) {
        if let Some(slot) = self
            .mod_slots
            .iter_mut()
            .find(|slot| matches!(slot, Some((t, _)) if *t == target))
        {
            *slot = Some((target, config));
            return;
        }
        if let Some(slot) = self.mod_slots.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some((target, config));
            return;
        }
        self.telemetry.dropped_events += 1;
    }

    fn tick_step_counter(&mut self, now: u64) {
        if now < self.next_step_at {
            return;
        }
        self.step_count += 1;
        let bar = self.step_count % STEPS_PER_BAR == 0;
        self.subtractive.step_boundary(bar, &self.table);
        self.resonator.step_boundary(bar, &self.table);
        self.macro_osc.step_boundary(bar, &self.table);

        let step_samples = (self.table.get(ParamId::StepLength) * self.clock.sample_rate())
            .max(1.0) as u64;
        self.next_step_at = now + step_samples;
    }

    fn publish_telemetry(&mut self, block_len: usize) {
        self.telemetry.dropped_events += self.pending.take_dropped();
        self.telemetry.nan_resets += self.subtractive.take_nan_resets()
            + self.resonator.take_nan_resets()
            + self.macro_osc.take_nan_resets();
        self.telemetry.active_voices = [
            self.subtractive.active_voices(),
            self.resonator.active_voices(),
            self.macro_osc.active_voices(),
        ];
        self.telemetry.sample_time = self.clock.now();
        self.telemetry.last_block_len = block_len;
        self.telemetry_input.write(self.telemetry);
    }
}

impl EngineController {
    fn send_event(&self, event: ControlEvent) -> Result<(), ControlError> {
        match self.event_tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ControlError::EventQueueFull),
            Err(TrySendError::Disconnected(_)) => Err(ControlError::EngineNotInitialised),
        }
    }

    /// Schedule a note-on at an absolute sample time.
    #[allow(clippy::too_many_arguments)]
    pub fn note_on(
        &self,
        voice_id: u32,
        pitch: u8,
        velocity: f32,
        accent: bool,
        slide: bool,
        trill: bool,
        at_sample: u64,
    ) -> Result<(), ControlError> {
        let event = NoteEvent {
            pitch,
            velocity: velocity.clamp(0.0, 1.0),
            accent,
            slide,
            trill,
            voice_id,
            trigger_time: at_sample,
        };
        self.send_event(ControlEvent::NoteOn(event))
    }

    /// Schedule a note-off by voice id and/or pitch.
    pub fn note_off(
        &self,
        voice_id: Option<u32>,
        pitch: Option<u8>,
        at_sample: u64,
    ) -> Result<(), ControlError> {
        self.send_event(ControlEvent::NoteOff {
            voice_id,
            pitch,
            at_sample,
        })
    }

    /// Flush pending events and fast-release everything.
    pub fn all_notes_off(&self) -> Result<(), ControlError> {
        self.send_event(ControlEvent::AllNotesOff)
    }

    /// Set a parameter target; the audio side smooths towards it.
    pub fn set_parameter(&self, id: ParamId, value: f32) -> Result<(), ControlError> {
        let value = catalogue::validate(id, value)?;
        self.send_param(ParamUpdate {
            id,
            value,
            immediate: false,
        })
    }

    /// Set a parameter with no smoothing (discrete switches).
    pub fn set_parameter_immediate(&self, id: ParamId, value: f32) -> Result<(), ControlError> {
        let value = catalogue::validate(id, value)?;
        self.send_param(ParamUpdate {
            id,
            value,
            immediate: true,
        })
    }

    /// Name-based variant for string-keyed surfaces (patch loaders, OSC).
    pub fn set_parameter_by_name(&self, name: &str, value: f32) -> Result<(), ControlError> {
        let id = catalogue::lookup(name)?;
        self.set_parameter(id, value)
    }

    fn send_param(&self, update: ParamUpdate) -> Result<(), ControlError> {
        match self.param_tx.try_send(update) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ControlError::EventQueueFull),
            Err(TrySendError::Disconnected(_)) => Err(ControlError::EngineNotInitialised),
        }
    }

    /// Attach (or replace) the modulator for a parameter. New voices pick
    /// the configuration up at note-on.
    pub fn configure_modulator(
        &self,
        target: ParamId,
        config: ModConfig,
    ) -> Result<(), ControlError> {
        catalogue::validate_mod_target(target)?;
        let mut config = config;
        config.rate = config.rate.clamp(0.05, 30.0);
        config.step_count = config.step_count.clamp(1, 8);
        self.send_event(ControlEvent::ConfigureModulator { target, config })
    }

    pub fn select_engine(&self, kind: EngineKind) -> Result<(), ControlError> {
        self.send_event(ControlEvent::SelectEngine(kind))
    }

    /// Polyphony for the active engine. The resonator pool caps at 4; a
    /// zero-voice request is the one unservable configuration.
    pub fn set_polyphony_mode(&self, mono: bool, voices: usize) -> Result<(), ControlError> {
        if voices == 0 && !mono {
            return Err(ControlError::VoiceLimitExhausted);
        }
        self.send_event(ControlEvent::SetPolyphony { mono, voices })
    }

    pub fn set_fx_route(&self, engine: EngineKind, route: FxRoute) -> Result<(), ControlError> {
        self.send_event(ControlEvent::SetFxRoute(engine, route))
    }

    /// Latest telemetry snapshot published by the audio thread.
    pub fn telemetry(&mut self) -> EngineTelemetry {
        *self.telemetry_output.read()
    }
}
