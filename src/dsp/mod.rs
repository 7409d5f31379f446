// === Core DSP modules ===

// Amplitude / filter envelope generator
pub mod envelope;

// Band-limited oscillator bank (PolyBLEP / PolyBLAMP)
pub mod oscillator;

// Zero-delay-feedback state-variable filter
pub mod filter;

// Voice LFO
pub mod lfo;

// Per-parameter modulators (LFO / RND / ENV / EF / TM / SEQ)
pub mod modulation;

// === Re-exports ===

pub use envelope::{AdsrEnvelope, EnvRole, EnvStage};
pub use filter::ZdfFilter;
pub use lfo::Lfo;
pub use modulation::Modulator;
pub use oscillator::{OscLevels, OscillatorBank};
