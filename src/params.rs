use serde::{Deserialize, Serialize};
use std::fmt;

/// Which synthesis engine a voice pool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EngineKind {
    /// Band-limited oscillators into the ZDF filter pair (the classic path).
    #[default]
    Subtractive,
    /// Physical-modelling resonator (modal / string models).
    Resonator,
    /// Macro-oscillator bank (wrapped library voice).
    MacroOsc,
}

impl EngineKind {
    /// Dense index used for per-engine tables (routes, telemetry).
    #[inline]
    pub fn index(self) -> usize {
        match self {
            EngineKind::Subtractive => 0,
            EngineKind::Resonator => 1,
            EngineKind::MacroOsc => 2,
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Subtractive => write!(f, "Subtractive"),
            EngineKind::Resonator => write!(f, "Resonator"),
            EngineKind::MacroOsc => write!(f, "Macro Osc"),
        }
    }
}

/// Where a pool's output is sent: the classical reverb+delay pair or the
/// granular bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FxRoute {
    #[default]
    Classical,
    Granular,
}

impl fmt::Display for FxRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FxRoute::Classical => write!(f, "Classical"),
            FxRoute::Granular => write!(f, "Granular"),
        }
    }
}

/// LFO waveforms. `Noise` is fresh uniform noise each sample; `SampleHold`
/// latches a new random value once per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LfoWaveform {
    #[default]
    Sine,
    Triangle,
    Square,
    Saw,
    Noise,
    SampleHold,
}

impl LfoWaveform {
    /// Decode from a stepped parameter value (0..=5). Out-of-range values
    /// clamp to the last waveform.
    pub fn from_index(index: usize) -> Self {
        match index {
            0 => LfoWaveform::Sine,
            1 => LfoWaveform::Triangle,
            2 => LfoWaveform::Square,
            3 => LfoWaveform::Saw,
            4 => LfoWaveform::Noise,
            _ => LfoWaveform::SampleHold,
        }
    }
}

impl fmt::Display for LfoWaveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LfoWaveform::Sine => write!(f, "Sine"),
            LfoWaveform::Triangle => write!(f, "Triangle"),
            LfoWaveform::Square => write!(f, "Square"),
            LfoWaveform::Saw => write!(f, "Saw"),
            LfoWaveform::Noise => write!(f, "Noise"),
            LfoWaveform::SampleHold => write!(f, "S&H"),
        }
    }
}

/// Source selection for pulse-width and pitch modulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ModSource {
    #[default]
    Lfo,
    Env,
}

/// Shape of a per-parameter modulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ModMode {
    /// Free-running low-frequency oscillator.
    #[default]
    Lfo,
    /// Stepped random: a new uniform value latched at the configured rate.
    Rnd,
    /// Independent attack/release envelope retriggered per note.
    Env,
    /// Envelope follower of the voice's own output signal.
    Follower,
    /// Turing-machine style shift-register pattern.
    Turing,
    /// Short step sequence advanced on step boundaries.
    Seq,
}

impl fmt::Display for ModMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModMode::Lfo => write!(f, "LFO"),
            ModMode::Rnd => write!(f, "RND"),
            ModMode::Env => write!(f, "ENV"),
            ModMode::Follower => write!(f, "EF"),
            ModMode::Turing => write!(f, "TM"),
            ModMode::Seq => write!(f, "SEQ"),
        }
    }
}

/// When a modulator's phase/state is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ModResetMode {
    /// Free-running, never reset.
    #[default]
    None,
    /// Reset on every step boundary.
    Step,
    /// Reset only when an accented note triggers.
    Accent,
    /// Reset once per bar (16 steps).
    Bar,
}

/// Maximum number of steps a SEQ-mode modulator can hold.
pub const MOD_SEQ_STEPS: usize = 8;

/// Configuration of one per-parameter modulator.
///
/// A copy of this struct travels over the control channel and is instantiated
/// into a live modulator per voice at note-on, so it is plain-old-data with
/// no heap state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModConfig {
    pub mode: ModMode,
    /// Output scale applied to the shape, bipolar.
    pub depth: f32,
    /// Constant offset added to the scaled shape.
    pub offset: f32,
    /// Muted modulators stay instantiated but output zero.
    pub muted: bool,
    /// Rate in Hz for LFO/RND modes (0.05 to 30.0).
    pub rate: f32,
    /// Waveform for LFO mode.
    pub waveform: LfoWaveform,
    /// Attack time in seconds for ENV/EF modes.
    pub attack: f32,
    /// Release time in seconds for ENV/EF modes.
    pub release: f32,
    /// Bit-flip probability for TM mode (0 = locked loop, 1 = full random).
    pub probability: f32,
    /// Step values for SEQ mode, bipolar.
    pub steps: [f32; MOD_SEQ_STEPS],
    /// Number of active SEQ steps (1..=MOD_SEQ_STEPS).
    pub step_count: u8,
    pub reset: ModResetMode,
}

impl Default for ModConfig {
    fn default() -> Self {
        Self {
            mode: ModMode::Lfo,
            depth: 0.0,
            offset: 0.0,
            muted: false,
            rate: 2.0,
            waveform: LfoWaveform::Sine,
            attack: 0.01,
            release: 0.2,
            probability: 0.0,
            steps: [0.0; MOD_SEQ_STEPS],
            step_count: MOD_SEQ_STEPS as u8,
            reset: ModResetMode::None,
        }
    }
}

/// A single note trigger, produced by the sequencer/MIDI layer and consumed
/// exactly once by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// MIDI note number. Values above 127 are dropped by the engine with the
    /// dropped-event counter incremented.
    pub pitch: u8,
    /// Velocity 0.0 to 1.0. Zero-velocity notes are treated as note-off.
    pub velocity: f32,
    /// Accent: boosted level, halved decay, attack overshoot.
    pub accent: bool,
    /// Slide: pitch ramps into this note instead of stepping.
    pub slide: bool,
    /// Trill: alternate with the scale neighbour for one step (mono only).
    pub trill: bool,
    /// Caller-chosen id used to address this note for release.
    pub voice_id: u32,
    /// Absolute sample index at which the note takes effect.
    pub trigger_time: u64,
}

impl NoteEvent {
    pub fn new(pitch: u8, velocity: f32, voice_id: u32, trigger_time: u64) -> Self {
        Self {
            pitch,
            velocity,
            accent: false,
            slide: false,
            trill: false,
            voice_id,
            trigger_time,
        }
    }
}

/// Convert a MIDI note number to frequency in Hz (A4 = 69 = 440 Hz).
#[inline]
pub fn midi_to_hz(note: f32) -> f32 {
    440.0 * ((note - 69.0) / 12.0).exp2()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_midi_to_hz_reference_pitches() {
        assert_relative_eq!(midi_to_hz(69.0), 440.0, epsilon = 1e-3);
        assert_relative_eq!(midi_to_hz(57.0), 220.0, epsilon = 1e-3);
        assert_relative_eq!(midi_to_hz(60.0), 261.626, epsilon = 1e-2);
    }

    #[test]
    fn test_lfo_waveform_from_index_clamps() {
        assert_eq!(LfoWaveform::from_index(0), LfoWaveform::Sine);
        assert_eq!(LfoWaveform::from_index(5), LfoWaveform::SampleHold);
        assert_eq!(LfoWaveform::from_index(99), LfoWaveform::SampleHold);
    }

    #[test]
    fn test_mod_config_default_is_inert() {
        let config = ModConfig::default();
        assert_eq!(config.depth, 0.0);
        assert_eq!(config.offset, 0.0);
        assert!(!config.muted);
    }
}
