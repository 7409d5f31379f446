use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;

use crate::params::LfoWaveform;

/// Low-frequency oscillator for vibrato, PWM and filter modulation.
///
/// Six waveforms; `Noise` is fresh uniform noise each sample and
/// `SampleHold` latches a new random value once per cycle. Rate is clamped
/// to 0.05–30 Hz. The phase runs continuously across note boundaries unless
/// the voice's reset mode says otherwise.
pub struct Lfo {
    sample_rate: f32,
    phase: f32,
    held: f32,
    rng: SmallRng,
}

impl Lfo {
    pub fn new(sample_rate: f32, seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let held = rng.gen_range(-1.0f32..1.0);
        Self {
            sample_rate,
            phase: 0.0,
            held,
            rng,
        }
    }

    /// Generate the next sample in [-1, 1].
    pub fn tick(&mut self, rate_hz: f32, waveform: LfoWaveform) -> f32 {
        let output = match waveform {
            LfoWaveform::Sine => (self.phase * TAU).sin(),
            LfoWaveform::Triangle => {
                if self.phase < 0.5 {
                    4.0 * self.phase - 1.0
                } else {
                    -4.0 * self.phase + 3.0
                }
            }
            LfoWaveform::Square => {
                if self.phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            LfoWaveform::Saw => 2.0 * self.phase - 1.0,
            LfoWaveform::Noise => self.rng.gen_range(-1.0f32..1.0),
            LfoWaveform::SampleHold => self.held,
        };

        let increment = rate_hz.clamp(0.05, 30.0) / self.sample_rate;
        self.phase += increment;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
            // New random value once per cycle for S&H.
            self.held = self.rng.gen_range(-1.0f32..1.0);
        }

        output
    }

    /// Reset phase to 0 (note/step/bar reset modes).
    pub fn reset(&mut self) {
        self.phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_waveforms_stay_in_range() {
        for waveform in [
            LfoWaveform::Sine,
            LfoWaveform::Triangle,
            LfoWaveform::Square,
            LfoWaveform::Saw,
            LfoWaveform::Noise,
            LfoWaveform::SampleHold,
        ] {
            let mut lfo = Lfo::new(44100.0, 7);
            for _ in 0..5000 {
                let s = lfo.tick(5.0, waveform);
                assert!((-1.0..=1.0).contains(&s), "{:?} out of range: {}", waveform, s);
            }
        }
    }

    #[test]
    fn test_rate_is_clamped() {
        // A 1000 Hz request clamps to 30 Hz: one cycle takes ~sr/30 samples.
        let sr = 44100.0;
        let mut lfo = Lfo::new(sr, 8);
        let mut first_wrap = 0;
        let mut prev = lfo.tick(1000.0, LfoWaveform::Saw);
        for i in 1..10000 {
            let s = lfo.tick(1000.0, LfoWaveform::Saw);
            if s < prev {
                first_wrap = i;
                break;
            }
            prev = s;
        }
        let expected = (sr / 30.0) as usize;
        assert!(
            first_wrap.abs_diff(expected) < expected / 10,
            "wrap at {} expected ~{}",
            first_wrap,
            expected
        );
    }

    #[test]
    fn test_sample_hold_latches_per_cycle() {
        let sr = 1000.0;
        let mut lfo = Lfo::new(sr, 9);
        // 10 Hz at 1 kHz: 100 samples per cycle.
        let first = lfo.tick(10.0, LfoWaveform::SampleHold);
        for _ in 0..80 {
            assert_eq!(lfo.tick(10.0, LfoWaveform::SampleHold), first);
        }
        let mut changed = false;
        for _ in 0..40 {
            if lfo.tick(10.0, LfoWaveform::SampleHold) != first {
                changed = true;
            }
        }
        assert!(changed, "S&H never latched a new value");
    }

    #[test]
    fn test_reset_restarts_phase() {
        let mut lfo = Lfo::new(44100.0, 10);
        for _ in 0..1000 {
            lfo.tick(2.0, LfoWaveform::Saw);
        }
        lfo.reset();
        let s = lfo.tick(2.0, LfoWaveform::Saw);
        assert!((s - (-1.0)).abs() < 0.01, "saw after reset: {}", s);
    }
}
