//! Zero-delay-feedback state-variable filter.
//!
//! Topology-preserving transform of the analog 2-pole SVF. Unlike a biquad,
//! the coefficients can move every sample across the whole cutoff/resonance
//! range without the structure going unstable, which is what per-sample
//! envelope and LFO modulation of the cutoff requires. `g` is re-evaluated
//! on every call, so audio-rate modulation needs no coefficient cache
//! invalidation.

use std::f32::consts::PI;

/// Cutoff clamp range in Hz, applied every sample.
const CUTOFF_MIN_HZ: f32 = 20.0;
const CUTOFF_MAX_HZ: f32 = 20000.0;

/// Resonance control range; 25 maps to zero damping (self-oscillation).
const RESONANCE_MAX: f32 = 25.0;

/// Magnitude below which integrator state is flushed to zero. Denormals in
/// the feedback path otherwise cost an order of magnitude in CPU on some
/// targets.
const DENORMAL_FLOOR: f32 = 1.0e-20;

/// One 2-pole TPT state-variable filter. A voice runs two instances: one
/// tapped as highpass, one as lowpass.
pub struct ZdfFilter {
    sample_rate: f32,
    ic1: f32,
    ic2: f32,
}

impl ZdfFilter {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            ic1: 0.0,
            ic2: 0.0,
        }
    }

    /// Run one sample through the filter and return `(lowpass, highpass)`.
    ///
    /// `cutoff_hz` is clamped to [20 Hz, 20 kHz] (and below Nyquist);
    /// `resonance` to [0, 25]. Both may move at audio rate.
    #[inline]
    pub fn process(&mut self, input: f32, cutoff_hz: f32, resonance: f32) -> (f32, f32) {
        let nyquist_guard = self.sample_rate * 0.49;
        let cutoff = cutoff_hz.clamp(CUTOFF_MIN_HZ, CUTOFF_MAX_HZ.min(nyquist_guard));
        let resonance = resonance.clamp(0.0, RESONANCE_MAX);

        let g = (PI * cutoff / self.sample_rate).tan();
        let k = 2.0 - 2.0 * resonance / RESONANCE_MAX;
        let a1 = 1.0 / (1.0 + g * (g + k));
        let a2 = g * a1;
        let a3 = g * a2;

        let v3 = input - self.ic2;
        let v1 = a1 * self.ic1 + a2 * v3;
        let v2 = self.ic2 + a2 * self.ic1 + a3 * v3;
        self.ic1 = 2.0 * v1 - self.ic1;
        self.ic2 = 2.0 * v2 - self.ic2;

        (v2, input - v2)
    }

    /// Flush denormal-range integrator state. Called once per block.
    #[inline]
    pub fn flush_denormals(&mut self) {
        if self.ic1.abs() < DENORMAL_FLOOR {
            self.ic1 = 0.0;
        }
        if self.ic2.abs() < DENORMAL_FLOOR {
            self.ic2 = 0.0;
        }
    }

    /// Clear the integrators (note retrigger on a stolen slot).
    pub fn reset(&mut self) {
        self.ic1 = 0.0;
        self.ic2 = 0.0;
    }
}
