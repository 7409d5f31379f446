//! Process-wide parameter catalogue.
//!
//! Every automatable value in the engine is described here once: its range,
//! stepping, bipolarity, smoothing class, modulation eligibility, and which
//! side of the audio thread it lands on. The catalogue is immutable after
//! startup and is the single source of truth for validation on the control
//! thread and for table layout on the audio thread.
//!
//! `ParamId` is a dense enum so the audio-side smoothed-value table is a
//! plain array indexed by `id as usize`; no hashing happens anywhere near
//! the audio path. The string→id map exists only for the control surface
//! and patch export.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::ControlError;

/// Dense parameter identifier. The discriminants are array indices into the
/// audio thread's smoothed-value table; keep them contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(usize)]
pub enum ParamId {
    // Oscillator
    Octave = 0,
    SubOctave,
    Drift,
    Glide,
    PulseWidth,
    PwmAmount,
    PitchModAmount,
    PwmSource,
    PitchModSource,
    // Mixer (oscillator levels)
    SawLevel,
    SquareLevel,
    TriangleLevel,
    SubLevel,
    NoiseLevel,
    // Filter
    HighpassCutoff,
    LowpassCutoff,
    Resonance,
    KeyFollow,
    FilterEnvAmount,
    FilterLfoDepth,
    // Envelope (shared by amplitude and filter envelope state)
    Attack,
    Decay,
    Sustain,
    Release,
    // Voice LFO
    LfoRate,
    LfoWave,
    LfoDepth,
    LfoOffset,
    LfoReset,
    // Articulation
    TrillSemitones,
    StepLength,
    AccentAmount,
    // Master and sends
    MasterGain,
    ReverbSend,
    DelaySend,
    GranularSend,
    // Macro-oscillator engine
    MacroModel,
    MacroHarmonics,
    MacroTimbre,
    MacroMorph,
    MacroLpgDecay,
    MacroLpgColour,
    MacroOutAuxMix,
    // Resonator engine
    ResoModel,
    ResoStructure,
    ResoBrightness,
    ResoDamping,
    ResoPosition,
    ResoStrum,
}

/// Total number of parameters; length of every per-parameter table.
pub const PARAM_COUNT: usize = ParamId::ResoStrum as usize + 1;

impl ParamId {
    /// All ids in table order.
    pub fn all() -> impl Iterator<Item = ParamId> {
        DESCRIPTORS.iter().map(|d| d.id)
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Which audio-thread state a parameter feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamTarget {
    /// A single engine-wide value (master gain, send levels, step length).
    Global,
    /// Read by every voice each sample (cutoff, levels, envelope times).
    PerVoice,
    /// A modulator-depth slot rather than a direct synthesis value.
    ModDepth,
}

/// Immutable description of one parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamDescriptor {
    pub id: ParamId,
    /// Stable dotted name used by the control surface and patch maps.
    pub name: &'static str,
    /// Group for display ("Oscillator", "Filter", ...).
    pub module: &'static str,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    /// Stepped parameters hold integer values and bypass smoothing.
    pub stepped: bool,
    /// Bipolar parameters are centred on zero.
    pub bipolar: bool,
    /// Smoothed parameters go through the one-pole lag on the audio side.
    pub smoothed: bool,
    /// Whether a per-parameter modulator may be attached.
    pub mod_eligible: bool,
    pub target: ParamTarget,
}

const fn smooth(
    id: ParamId,
    name: &'static str,
    module: &'static str,
    min: f32,
    max: f32,
    default: f32,
    mod_eligible: bool,
    target: ParamTarget,
) -> ParamDescriptor {
    ParamDescriptor {
        id,
        name,
        module,
        min,
        max,
        default,
        stepped: false,
        bipolar: min < 0.0,
        smoothed: true,
        mod_eligible,
        target,
    }
}

const fn plain(
    id: ParamId,
    name: &'static str,
    module: &'static str,
    min: f32,
    max: f32,
    default: f32,
    target: ParamTarget,
) -> ParamDescriptor {
    ParamDescriptor {
        id,
        name,
        module,
        min,
        max,
        default,
        stepped: false,
        bipolar: min < 0.0,
        smoothed: false,
        mod_eligible: false,
        target,
    }
}

const fn stepped(
    id: ParamId,
    name: &'static str,
    module: &'static str,
    min: f32,
    max: f32,
    default: f32,
    target: ParamTarget,
) -> ParamDescriptor {
    ParamDescriptor {
        id,
        name,
        module,
        min,
        max,
        default,
        stepped: true,
        bipolar: min < 0.0,
        smoothed: false,
        mod_eligible: false,
        target,
    }
}

/// The full catalogue, in `ParamId` order. The order is asserted in tests;
/// table lookups rely on `DESCRIPTORS[id as usize].id == id`.
pub static DESCRIPTORS: [ParamDescriptor; PARAM_COUNT] = [
    // Oscillator
    stepped(ParamId::Octave, "osc.octave", "Oscillator", -24.0, 24.0, 0.0, ParamTarget::PerVoice),
    stepped(ParamId::SubOctave, "osc.sub_octave", "Oscillator", 1.0, 2.0, 1.0, ParamTarget::PerVoice),
    smooth(ParamId::Drift, "osc.drift", "Oscillator", 0.0, 1.0, 0.0, false, ParamTarget::PerVoice),
    smooth(ParamId::Glide, "osc.glide", "Oscillator", 0.0, 1.0, 0.0, false, ParamTarget::PerVoice),
    smooth(ParamId::PulseWidth, "osc.pulse_width", "Oscillator", 0.05, 0.95, 0.5, true, ParamTarget::PerVoice),
    smooth(ParamId::PwmAmount, "osc.pwm_amount", "Oscillator", 0.0, 1.0, 0.0, true, ParamTarget::PerVoice),
    smooth(ParamId::PitchModAmount, "osc.pitch_mod_amount", "Oscillator", 0.0, 1.0, 0.0, true, ParamTarget::PerVoice),
    stepped(ParamId::PwmSource, "osc.pwm_source", "Oscillator", 0.0, 1.0, 0.0, ParamTarget::PerVoice),
    stepped(ParamId::PitchModSource, "osc.pitch_mod_source", "Oscillator", 0.0, 1.0, 0.0, ParamTarget::PerVoice),
    // Mixer
    smooth(ParamId::SawLevel, "mixer.saw", "Mixer", 0.0, 1.0, 1.0, true, ParamTarget::PerVoice),
    smooth(ParamId::SquareLevel, "mixer.square", "Mixer", 0.0, 1.0, 0.0, true, ParamTarget::PerVoice),
    smooth(ParamId::TriangleLevel, "mixer.triangle", "Mixer", 0.0, 1.0, 0.0, true, ParamTarget::PerVoice),
    smooth(ParamId::SubLevel, "mixer.sub", "Mixer", 0.0, 1.0, 0.0, true, ParamTarget::PerVoice),
    smooth(ParamId::NoiseLevel, "mixer.noise", "Mixer", 0.0, 1.0, 0.0, true, ParamTarget::PerVoice),
    // Filter
    smooth(ParamId::HighpassCutoff, "filter.highpass", "Filter", 20.0, 20000.0, 20.0, true, ParamTarget::PerVoice),
    smooth(ParamId::LowpassCutoff, "filter.lowpass", "Filter", 20.0, 20000.0, 1000.0, true, ParamTarget::PerVoice),
    smooth(ParamId::Resonance, "filter.resonance", "Filter", 0.0, 25.0, 1.0, true, ParamTarget::PerVoice),
    smooth(ParamId::KeyFollow, "filter.key_follow", "Filter", 0.0, 1.0, 0.0, false, ParamTarget::PerVoice),
    smooth(ParamId::FilterEnvAmount, "filter.env_amount", "Filter", -1.0, 1.0, 0.0, true, ParamTarget::PerVoice),
    smooth(ParamId::FilterLfoDepth, "filter.lfo_depth", "Filter", 0.0, 1.0, 0.0, true, ParamTarget::PerVoice),
    // Envelope
    plain(ParamId::Attack, "env.attack", "Envelope", 0.0005, 5.0, 0.003, ParamTarget::PerVoice),
    plain(ParamId::Decay, "env.decay", "Envelope", 0.001, 5.0, 0.3, ParamTarget::PerVoice),
    plain(ParamId::Sustain, "env.sustain", "Envelope", 0.0, 1.0, 0.7, ParamTarget::PerVoice),
    plain(ParamId::Release, "env.release", "Envelope", 0.001, 5.0, 0.2, ParamTarget::PerVoice),
    // Voice LFO
    smooth(ParamId::LfoRate, "lfo.rate", "LFO", 0.05, 30.0, 2.0, true, ParamTarget::PerVoice),
    stepped(ParamId::LfoWave, "lfo.waveform", "LFO", 0.0, 5.0, 0.0, ParamTarget::PerVoice),
    smooth(ParamId::LfoDepth, "lfo.depth", "LFO", 0.0, 1.0, 0.0, true, ParamTarget::ModDepth),
    smooth(ParamId::LfoOffset, "lfo.offset", "LFO", -1.0, 1.0, 0.0, false, ParamTarget::ModDepth),
    stepped(ParamId::LfoReset, "lfo.reset_mode", "LFO", 0.0, 3.0, 0.0, ParamTarget::PerVoice),
    // Articulation
    stepped(ParamId::TrillSemitones, "artic.trill_semitones", "Articulation", 1.0, 12.0, 2.0, ParamTarget::PerVoice),
    plain(ParamId::StepLength, "artic.step_length", "Articulation", 0.02, 2.0, 0.125, ParamTarget::Global),
    smooth(ParamId::AccentAmount, "artic.accent_amount", "Articulation", 0.0, 1.0, 0.5, false, ParamTarget::PerVoice),
    // Master and sends
    smooth(ParamId::MasterGain, "master.gain", "Master", 0.0, 1.0, 0.7, false, ParamTarget::Global),
    smooth(ParamId::ReverbSend, "fx.reverb_send", "Sends", 0.0, 1.0, 0.2, true, ParamTarget::Global),
    smooth(ParamId::DelaySend, "fx.delay_send", "Sends", 0.0, 1.0, 0.15, true, ParamTarget::Global),
    smooth(ParamId::GranularSend, "fx.granular_send", "Sends", 0.0, 1.0, 0.5, true, ParamTarget::Global),
    // Macro-oscillator engine
    stepped(ParamId::MacroModel, "macro.model", "Macro Osc", 1.0, 24.0, 1.0, ParamTarget::PerVoice),
    smooth(ParamId::MacroHarmonics, "macro.harmonics", "Macro Osc", 0.0, 1.0, 0.5, true, ParamTarget::PerVoice),
    smooth(ParamId::MacroTimbre, "macro.timbre", "Macro Osc", 0.0, 1.0, 0.5, true, ParamTarget::PerVoice),
    smooth(ParamId::MacroMorph, "macro.morph", "Macro Osc", 0.0, 1.0, 0.5, true, ParamTarget::PerVoice),
    smooth(ParamId::MacroLpgDecay, "macro.lpg_decay", "Macro Osc", 0.0, 1.0, 0.5, false, ParamTarget::PerVoice),
    smooth(ParamId::MacroLpgColour, "macro.lpg_colour", "Macro Osc", 0.0, 1.0, 0.5, false, ParamTarget::PerVoice),
    smooth(ParamId::MacroOutAuxMix, "macro.out_aux_mix", "Macro Osc", 0.0, 1.0, 0.0, true, ParamTarget::PerVoice),
    // Resonator engine
    stepped(ParamId::ResoModel, "reso.model", "Resonator", 1.0, 6.0, 1.0, ParamTarget::PerVoice),
    smooth(ParamId::ResoStructure, "reso.structure", "Resonator", 0.0, 1.0, 0.25, true, ParamTarget::PerVoice),
    smooth(ParamId::ResoBrightness, "reso.brightness", "Resonator", 0.0, 1.0, 0.5, true, ParamTarget::PerVoice),
    smooth(ParamId::ResoDamping, "reso.damping", "Resonator", 0.0, 1.0, 0.3, true, ParamTarget::PerVoice),
    smooth(ParamId::ResoPosition, "reso.position", "Resonator", 0.0, 1.0, 0.3, true, ParamTarget::PerVoice),
    smooth(ParamId::ResoStrum, "reso.strum_intensity", "Resonator", 0.0, 1.0, 0.5, false, ParamTarget::PerVoice),
];

/// Get the descriptor for a parameter id. O(1).
#[inline]
pub fn descriptor(id: ParamId) -> &'static ParamDescriptor {
    &DESCRIPTORS[id.index()]
}

/// Name→id lookup table, built once.
struct NameTable {
    by_name: IndexMap<&'static str, ParamId>,
}

static NAME_TABLE: OnceLock<NameTable> = OnceLock::new();

fn name_table() -> &'static NameTable {
    NAME_TABLE.get_or_init(|| {
        let mut by_name = IndexMap::with_capacity(PARAM_COUNT);
        for desc in DESCRIPTORS.iter() {
            by_name.insert(desc.name, desc.id);
        }
        NameTable { by_name }
    })
}

/// Resolve a parameter by its stable dotted name.
pub fn lookup(name: &str) -> Result<ParamId, ControlError> {
    name_table()
        .by_name
        .get(name)
        .copied()
        .ok_or(ControlError::UnknownParameter)
}

/// Validate a value against the catalogue range. Stepped parameters are
/// additionally rounded to the nearest step by the caller; validation only
/// checks bounds.
pub fn validate(id: ParamId, value: f32) -> Result<f32, ControlError> {
    let desc = descriptor(id);
    if !value.is_finite() || value < desc.min || value > desc.max {
        return Err(ControlError::InvalidParameterRange {
            id,
            value,
            min: desc.min,
            max: desc.max,
        });
    }
    Ok(value)
}

/// Validate that a modulator may target the given parameter.
pub fn validate_mod_target(id: ParamId) -> Result<(), ControlError> {
    if descriptor(id).mod_eligible {
        Ok(())
    } else {
        Err(ControlError::ParameterNotModulatable(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_table_is_in_id_order() {
        for (index, desc) in DESCRIPTORS.iter().enumerate() {
            assert_eq!(
                desc.id.index(),
                index,
                "descriptor {} out of order",
                desc.name
            );
        }
    }

    #[test]
    fn test_names_are_unique() {
        assert_eq!(name_table().by_name.len(), PARAM_COUNT);
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(lookup("filter.lowpass").unwrap(), ParamId::LowpassCutoff);
        assert_eq!(lookup("osc.pulse_width").unwrap(), ParamId::PulseWidth);
        assert_eq!(lookup("no.such.param"), Err(ControlError::UnknownParameter));
    }

    #[test]
    fn test_defaults_are_in_range() {
        for desc in DESCRIPTORS.iter() {
            assert!(
                desc.default >= desc.min && desc.default <= desc.max,
                "default of {} out of range",
                desc.name
            );
        }
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(validate(ParamId::PulseWidth, 0.5).is_ok());
        assert!(validate(ParamId::PulseWidth, 0.01).is_err());
        assert!(validate(ParamId::PulseWidth, f32::NAN).is_err());
        assert!(validate(ParamId::Resonance, 26.0).is_err());
    }

    #[test]
    fn test_stepped_params_bypass_smoothing() {
        for desc in DESCRIPTORS.iter() {
            if desc.stepped {
                assert!(!desc.smoothed, "{} is stepped but smoothed", desc.name);
            }
        }
    }

    #[test]
    fn test_mod_targets() {
        assert!(validate_mod_target(ParamId::LowpassCutoff).is_ok());
        assert!(validate_mod_target(ParamId::Octave).is_err());
    }
}
