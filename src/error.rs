//! Errors observable at the control-side API boundary.
//!
//! The audio thread never returns errors: it clamps out-of-range values,
//! resets voices that produce NaN, and counts dropped events into the
//! telemetry snapshot. Everything here is reported on the control thread's
//! return path only.

use std::fmt;

use crate::catalogue::ParamId;

/// Errors returned by the engine controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlError {
    /// A parameter value was outside the catalogue range for its id.
    InvalidParameterRange {
        id: ParamId,
        value: f32,
        min: f32,
        max: f32,
    },
    /// A parameter name did not resolve to any catalogue entry.
    UnknownParameter,
    /// The target parameter is not modulation-eligible.
    ParameterNotModulatable(ParamId),
    /// The mono pool's single slot is externally locked and cannot be stolen.
    VoiceLimitExhausted,
    /// The audio-side engine has been dropped; its channel ends are gone.
    EngineNotInitialised,
    /// The control channel is full; back-pressure signal to the caller.
    EventQueueFull,
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::InvalidParameterRange {
                id,
                value,
                min,
                max,
            } => write!(
                f,
                "value {} for parameter {:?} outside range [{}, {}]",
                value, id, min, max
            ),
            ControlError::UnknownParameter => write!(f, "unknown parameter name"),
            ControlError::ParameterNotModulatable(id) => {
                write!(f, "parameter {:?} is not modulation-eligible", id)
            }
            ControlError::VoiceLimitExhausted => {
                write!(f, "voice limit exhausted and no steal is possible")
            }
            ControlError::EngineNotInitialised => {
                write!(f, "engine not initialised (audio side disconnected)")
            }
            ControlError::EventQueueFull => write!(f, "event queue full"),
        }
    }
}

impl std::error::Error for ControlError {}
