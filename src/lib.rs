//! Polyphonic real-time synthesiser engine.
//!
//! Three synthesis engines (subtractive, physical-modelling resonator,
//! macro-oscillator bank) behind one sample-accurate note API, with
//! click-free parameter automation over a lock-free control→audio bus.
//! The core is driver-agnostic: anything that can pull stereo f32 blocks
//! can host it (see `audio::Engine::render`).

pub mod audio;
pub mod bus;
pub mod catalogue;
pub mod clock;
pub mod dsp;
pub mod error;
pub mod events;
pub mod params;

pub use audio::{create_engine, Engine, EngineController};
pub use catalogue::ParamId;
pub use error::ControlError;
pub use params::{EngineKind, FxRoute, NoteEvent};
