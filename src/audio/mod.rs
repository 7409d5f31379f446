//! # Audio module: real-time synthesis engine
//!
//! Everything on the audio-thread side of the fence lives here:
//!
//! - **engine**: the block-render orchestrator, the engine dispatcher over
//!   the three voice pools, and the control-thread handle
//! - **voice**: the subtractive voice with its articulation state machine
//! - **plaits_voice**: the macro-oscillator / resonator voices wrapping the
//!   external library DSP
//! - **pool**: polyphony, three-tier allocation, stealing, mono handoff
//! - **mixer**: dry tap and the reverb/delay/granular send busses
//! - **output** (standalone only): cpal stream wrapper
//!
//! ## Threading
//!
//! ```text
//! Control thread                 Audio thread (pull callback)
//! ──────────────                 ────────────────────────────
//! EngineController ─ params ───→ ParamTable (smoothed)
//!                  ─ events ───→ PendingQueue ─→ pools ─→ voices
//!                  ←─ telemetry ─ triple buffer
//! ```
//!
//! The audio callback is the only writer to voice state; the control thread
//! is the only writer to parameter targets and the event queue. Both
//! directions are wait-free.

pub mod engine;
pub mod mixer;
pub mod plaits_voice;
pub mod pool;
pub mod voice;

#[cfg(feature = "standalone")]
pub mod output;

pub use engine::{create_engine, Engine, EngineController};
pub use mixer::{BusEffect, BusId, PassthroughBus};
