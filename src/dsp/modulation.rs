//! Per-parameter modulators.
//!
//! A voice owns at most one modulator per modulated parameter. Each computes
//! `offset + depth · shape(t)` every sample and the voice adds the result to
//! its parameter override slot. Six shapes: LFO, stepped random, an
//! independent AR envelope, an envelope follower of the voice's own signal,
//! a Turing-machine shift register, and a short step sequence. State is
//! reset on step boundary, accent, or bar according to the config.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::dsp::lfo::Lfo;
use crate::params::{ModConfig, ModMode, ModResetMode};

/// Shift-register length for TM mode.
const TURING_BITS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArStage {
    Idle,
    Attack,
    Release,
}

/// A live per-parameter modulator instantiated from a `ModConfig` at
/// note-on and destroyed with its voice.
pub struct Modulator {
    config: ModConfig,
    sample_rate: f32,
    lfo: Lfo,
    // RND state
    rnd_phase: f32,
    rnd_value: f32,
    // ENV state
    ar_stage: ArStage,
    ar_level: f32,
    // EF state
    follower: f32,
    // TM state
    register: u16,
    // SEQ state
    seq_index: usize,
    // Step counting for bar resets
    steps_seen: u32,
    rng: SmallRng,
}

impl Modulator {
    pub fn new(config: ModConfig, sample_rate: f32, seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let register = rng.gen::<u16>();
        let rnd_value = rng.gen_range(-1.0f32..1.0);
        Self {
            config,
            sample_rate,
            lfo: Lfo::new(sample_rate, seed.wrapping_add(1)),
            rnd_phase: 0.0,
            rnd_value,
            ar_stage: ArStage::Idle,
            ar_level: 0.0,
            follower: 0.0,
            register,
            seq_index: 0,
            steps_seen: 0,
            rng,
        }
    }

    pub fn config(&self) -> &ModConfig {
        &self.config
    }

    /// Note-on hook: retriggers the AR envelope, applies accent resets.
    pub fn note_on(&mut self, accented: bool) {
        if self.config.mode == ModMode::Env {
            self.ar_stage = ArStage::Attack;
        }
        if self.config.reset == ModResetMode::Accent && accented {
            self.reset_state();
        }
    }

    /// Step-boundary hook: advances TM/SEQ, applies step and bar resets.
    pub fn step_boundary(&mut self) {
        self.steps_seen += 1;
        match self.config.mode {
            ModMode::Turing => self.advance_register(),
            ModMode::Seq => {
                let count = self.config.step_count.clamp(1, 8) as usize;
                self.seq_index = (self.seq_index + 1) % count;
            }
            _ => {}
        }
        match self.config.reset {
            ModResetMode::Step => self.reset_state(),
            ModResetMode::Bar if self.steps_seen % 16 == 0 => self.reset_state(),
            _ => {}
        }
    }

    fn reset_state(&mut self) {
        self.lfo.reset();
        self.rnd_phase = 0.0;
        self.seq_index = 0;
    }

    fn advance_register(&mut self) {
        // Rotate left; the wrapped-around bit is flipped with the configured
        // probability, which is the classic locked-loop / random continuum.
        let top = (self.register >> (TURING_BITS - 1)) & 1;
        let mut incoming = top;
        if self.rng.gen::<f32>() < self.config.probability {
            incoming ^= 1;
        }
        self.register = (self.register << 1) | incoming;
    }

    /// Advance one sample. `input` is the voice's last output sample (used
    /// by the follower mode). Returns the value for the override slot.
    pub fn tick(&mut self, input: f32) -> f32 {
        if self.config.muted {
            return 0.0;
        }
        let shape = match self.config.mode {
            ModMode::Lfo => self.lfo.tick(self.config.rate, self.config.waveform),
            ModMode::Rnd => {
                self.rnd_phase += self.config.rate.clamp(0.05, 30.0) / self.sample_rate;
                if self.rnd_phase >= 1.0 {
                    self.rnd_phase -= 1.0;
                    self.rnd_value = self.rng.gen_range(-1.0f32..1.0);
                }
                self.rnd_value
            }
            ModMode::Env => {
                match self.ar_stage {
                    ArStage::Idle => {}
                    ArStage::Attack => {
                        self.ar_level +=
                            1.0 / (self.config.attack.max(0.001) * self.sample_rate);
                        if self.ar_level >= 1.0 {
                            self.ar_level = 1.0;
                            self.ar_stage = ArStage::Release;
                        }
                    }
                    ArStage::Release => {
                        self.ar_level -=
                            1.0 / (self.config.release.max(0.001) * self.sample_rate);
                        if self.ar_level <= 0.0 {
                            self.ar_level = 0.0;
                            self.ar_stage = ArStage::Idle;
                        }
                    }
                }
                self.ar_level
            }
            ModMode::Follower => {
                let rectified = input.abs();
                let time = if rectified > self.follower {
                    self.config.attack.max(0.0005)
                } else {
                    self.config.release.max(0.001)
                };
                let coeff = (-1.0 / (time * self.sample_rate)).exp();
                self.follower = coeff * self.follower + (1.0 - coeff) * rectified;
                self.follower
            }
            ModMode::Turing => {
                // Low byte as a bipolar value; constant between steps.
                (self.register & 0xFF) as f32 / 127.5 - 1.0
            }
            ModMode::Seq => {
                let count = self.config.step_count.clamp(1, 8) as usize;
                self.config.steps[self.seq_index % count]
            }
        };
        self.config.offset + self.config.depth * shape
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::LfoWaveform;

    fn config(mode: ModMode) -> ModConfig {
        ModConfig {
            mode,
            depth: 1.0,
            ..ModConfig::default()
        }
    }

    #[test]
    fn test_muted_modulator_outputs_zero() {
        let mut cfg = config(ModMode::Lfo);
        cfg.muted = true;
        let mut m = Modulator::new(cfg, 44100.0, 1);
        for _ in 0..100 {
            assert_eq!(m.tick(0.5), 0.0);
        }
    }

    #[test]
    fn test_depth_and_offset_scaling() {
        let mut cfg = config(ModMode::Lfo);
        cfg.depth = 0.25;
        cfg.offset = 0.5;
        cfg.waveform = LfoWaveform::Square;
        let mut m = Modulator::new(cfg, 44100.0, 2);
        // Square starts high: 0.5 + 0.25 * 1.0.
        assert!((m.tick(0.0) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_rnd_latches_at_rate() {
        let mut cfg = config(ModMode::Rnd);
        cfg.rate = 10.0;
        let sr = 1000.0;
        let mut m = Modulator::new(cfg, sr, 3);
        let first = m.tick(0.0);
        // Holds for the 100-sample period.
        for _ in 0..80 {
            assert_eq!(m.tick(0.0), first);
        }
        let mut changed = false;
        for _ in 0..60 {
            if m.tick(0.0) != first {
                changed = true;
            }
        }
        assert!(changed);
    }

    #[test]
    fn test_ar_envelope_rises_then_falls() {
        let mut cfg = config(ModMode::Env);
        cfg.attack = 0.01;
        cfg.release = 0.02;
        let sr = 44100.0;
        let mut m = Modulator::new(cfg, sr, 4);
        m.note_on(false);

        let mut peak: f32 = 0.0;
        for _ in 0..(0.011 * sr) as usize {
            peak = peak.max(m.tick(0.0));
        }
        assert!((peak - 1.0).abs() < 0.01, "AR peak {}", peak);

        let mut last = 1.0;
        for _ in 0..(0.03 * sr) as usize {
            last = m.tick(0.0);
        }
        assert!(last <= 0.001, "AR tail {}", last);
    }

    #[test]
    fn test_follower_tracks_amplitude() {
        let mut cfg = config(ModMode::Follower);
        cfg.attack = 0.001;
        cfg.release = 0.05;
        let mut m = Modulator::new(cfg, 44100.0, 5);

        let mut rising = 0.0;
        for _ in 0..500 {
            rising = m.tick(0.8);
        }
        assert!(rising > 0.7, "follower did not rise: {}", rising);

        let mut falling = rising;
        for _ in 0..200 {
            falling = m.tick(0.0);
        }
        assert!(falling < rising, "follower did not fall");
    }

    #[test]
    fn test_turing_zero_probability_locks_the_loop() {
        let mut cfg = config(ModMode::Turing);
        cfg.probability = 0.0;
        let mut m = Modulator::new(cfg, 44100.0, 6);

        let mut pattern = Vec::new();
        for _ in 0..TURING_BITS {
            pattern.push(m.tick(0.0));
            m.step_boundary();
        }
        // With no bit flips the register is periodic at its own length.
        for &expected in &pattern {
            assert_eq!(m.tick(0.0), expected);
            m.step_boundary();
        }
    }

    #[test]
    fn test_seq_advances_on_step_boundary() {
        let mut cfg = config(ModMode::Seq);
        cfg.steps = [0.1, 0.2, 0.3, 0.0, 0.0, 0.0, 0.0, 0.0];
        cfg.step_count = 3;
        let mut m = Modulator::new(cfg, 44100.0, 7);

        assert!((m.tick(0.0) - 0.1).abs() < 1e-6);
        m.step_boundary();
        assert!((m.tick(0.0) - 0.2).abs() < 1e-6);
        m.step_boundary();
        assert!((m.tick(0.0) - 0.3).abs() < 1e-6);
        m.step_boundary();
        assert!((m.tick(0.0) - 0.1).abs() < 1e-6, "SEQ did not wrap");
    }

    #[test]
    fn test_step_reset_mode_restarts_seq() {
        let mut cfg = config(ModMode::Seq);
        cfg.steps[0] = 0.9;
        cfg.steps[1] = -0.9;
        cfg.step_count = 2;
        cfg.reset = ModResetMode::Step;
        let mut m = Modulator::new(cfg, 44100.0, 8);
        m.step_boundary();
        // Step reset snaps the index back to the first step every boundary.
        assert!((m.tick(0.0) - 0.9).abs() < 1e-6);
    }
}
