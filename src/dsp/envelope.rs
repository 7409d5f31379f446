//! ADSR envelope generator with retrigger crossfade and accent shaping.
//!
//! Two instances run per voice: one for amplitude, one for the filter. The
//! state machine is total; every operation is pure arithmetic and there is
//! no failure path. Stage timing is snapshotted when a stage begins, so a
//! parameter change never bends an in-flight attack or release.

use crate::clock::seconds_to_samples;

/// Envelope stages. `RetriggerFade` is a short linear ramp to zero inserted
/// before `Attack` when a trigger arrives while the envelope is still
/// audible, which keeps fast retriggers click-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvStage {
    Idle,
    RetriggerFade,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Which release-tail tuning an instance uses: the amplitude envelope decays
/// with time constant `release/4`, the filter envelope with `release/5`
/// (never shorter than 10 ms).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvRole {
    Amplitude,
    Filter,
}

/// Level below which a fresh trigger starts attack directly instead of
/// inserting the retrigger crossfade.
const RETRIGGER_THRESHOLD: f32 = 0.01;

/// Retrigger crossfade length in seconds.
const RETRIGGER_FADE_S: f32 = 0.002;

/// Attacks at or below this skip the ramp and jump straight to peak.
const ATTACK_SKIP_S: f32 = 0.001;

/// Releases at or below this are replaced by a short linear ramp, which cuts
/// off clean instead of leaving an audible exponential stub.
const RELEASE_LINEAR_THRESHOLD_S: f32 = 0.002;
const RELEASE_LINEAR_S: f32 = 0.005;

/// Fast release used for voice stealing and all-notes-off.
pub const FAST_RELEASE_S: f32 = 0.025;

/// ADSR envelope with per-sample `tick()`.
///
/// Trigger parameters (attack, decay, sustain, accent) are passed at
/// `trigger()` and frozen for the life of the note; release parameters are
/// snapshotted at `release()`. This mirrors how the engine reads the shared
/// parameter table at articulation boundaries only.
pub struct AdsrEnvelope {
    sample_rate: f32,
    role: EnvRole,
    stage: EnvStage,
    level: f32,

    // Snapshot taken at trigger().
    attack_samples: u64,
    decay_samples: u64,
    sustain: f32,
    peak: f32,

    // Per-stage running state.
    stage_elapsed: u64,
    attack_increment: f32,
    fade_step: f32,

    // Snapshot taken at release().
    release_level: f32,
    release_total: u64,
    release_coeff: f32,
    release_linear: bool,
}

impl AdsrEnvelope {
    pub fn new(sample_rate: f32, role: EnvRole) -> Self {
        Self {
            sample_rate,
            role,
            stage: EnvStage::Idle,
            level: 0.0,
            attack_samples: 1,
            decay_samples: 1,
            sustain: 0.7,
            peak: 1.0,
            stage_elapsed: 0,
            attack_increment: 0.0,
            fade_step: 0.0,
            release_level: 0.0,
            release_total: 0,
            release_coeff: 0.0,
            release_linear: false,
        }
    }

    /// Start a new note.
    ///
    /// If the envelope is still above the retrigger threshold it first fades
    /// linearly to zero over 2 ms, then runs the attack; otherwise attack
    /// starts at once. An accented trigger halves the decay time and raises
    /// the attack target to 1.1 (the overshoot is worked off by the decay
    /// within the first few milliseconds).
    pub fn trigger(&mut self, attack_s: f32, decay_s: f32, sustain: f32, accented: bool) {
        self.sustain = sustain.clamp(0.0, 1.0);
        self.peak = if accented { 1.1 } else { 1.0 };

        let decay_s = if accented { decay_s * 0.5 } else { decay_s };
        self.attack_samples = seconds_to_samples(self.sample_rate, attack_s.max(0.0));
        self.decay_samples = seconds_to_samples(self.sample_rate, decay_s.max(0.001));

        let skip_attack = attack_s <= ATTACK_SKIP_S;
        self.attack_increment = if skip_attack {
            self.peak
        } else {
            self.peak / self.attack_samples as f32
        };

        if self.level > RETRIGGER_THRESHOLD {
            self.fade_step = self.level / seconds_to_samples(self.sample_rate, RETRIGGER_FADE_S) as f32;
            self.stage = EnvStage::RetriggerFade;
        } else {
            self.begin_attack();
        }
        self.stage_elapsed = 0;
    }

    fn begin_attack(&mut self) {
        self.level = 0.0;
        self.stage_elapsed = 0;
        if self.attack_increment >= self.peak {
            // Sub-millisecond attack: jump to peak, go straight to decay.
            self.level = self.peak;
            self.stage = EnvStage::Decay;
        } else {
            self.stage = EnvStage::Attack;
        }
    }

    /// Enter the release stage.
    ///
    /// The current level and the release time are snapshotted here; later
    /// parameter changes do not bend an in-flight release. The tail is
    /// exponential with time constant `release/4` (amplitude) or `release/5,
    /// min 10 ms` (filter), forced to exactly zero when the release deadline
    /// expires. Very short releases (≤ 2 ms) use a 5 ms linear ramp instead.
    pub fn release(&mut self, release_s: f32) {
        if self.stage == EnvStage::Idle {
            return;
        }
        self.release_level = self.level;
        self.stage_elapsed = 0;
        if release_s <= RELEASE_LINEAR_THRESHOLD_S {
            self.release_linear = true;
            self.release_total = seconds_to_samples(self.sample_rate, RELEASE_LINEAR_S);
            self.release_coeff = 0.0;
        } else {
            let tau_s = match self.role {
                EnvRole::Amplitude => release_s / 4.0,
                EnvRole::Filter => (release_s / 5.0).max(0.010),
            };
            self.release_linear = false;
            self.release_total = seconds_to_samples(self.sample_rate, release_s);
            self.release_coeff = (-1.0 / (tau_s * self.sample_rate)).exp();
        }
        self.stage = EnvStage::Release;
    }

    /// The ≈25 ms release used when a voice is stolen or panicked.
    pub fn fast_release(&mut self) {
        self.release(FAST_RELEASE_S);
    }

    /// Advance one sample and return the level in [0, peak].
    pub fn tick(&mut self) -> f32 {
        match self.stage {
            EnvStage::Idle => {
                self.level = 0.0;
            }
            EnvStage::RetriggerFade => {
                self.level -= self.fade_step;
                if self.level <= 0.0 {
                    self.begin_attack();
                }
            }
            EnvStage::Attack => {
                self.level += self.attack_increment;
                if self.level >= self.peak {
                    self.level = self.peak;
                    self.stage = EnvStage::Decay;
                    self.stage_elapsed = 0;
                }
            }
            EnvStage::Decay => {
                self.stage_elapsed += 1;
                let progress = self.stage_elapsed as f32 / self.decay_samples as f32;
                if progress >= 1.0 {
                    self.level = self.sustain;
                    self.stage = EnvStage::Sustain;
                } else {
                    self.level = self.peak - progress * (self.peak - self.sustain);
                }
            }
            EnvStage::Sustain => {
                self.level = self.sustain;
            }
            EnvStage::Release => {
                self.stage_elapsed += 1;
                if self.stage_elapsed >= self.release_total {
                    // Deadline: force the tail to exactly zero.
                    self.level = 0.0;
                    self.stage = EnvStage::Idle;
                } else if self.release_linear {
                    let progress = self.stage_elapsed as f32 / self.release_total as f32;
                    self.level = self.release_level * (1.0 - progress);
                } else {
                    self.level *= self.release_coeff;
                }
            }
        }
        self.level
    }

    #[inline]
    pub fn stage(&self) -> EnvStage {
        self.stage
    }

    #[inline]
    pub fn level(&self) -> f32 {
        self.level
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.stage != EnvStage::Idle
    }

    #[inline]
    pub fn is_releasing(&self) -> bool {
        self.stage == EnvStage::Release
    }

    /// Samples until the release tail ends. Voices not in release report
    /// `u64::MAX`; the allocator uses this to find the shortest tail.
    pub fn remaining_release_samples(&self) -> u64 {
        if self.stage == EnvStage::Release {
            self.release_total.saturating_sub(self.stage_elapsed)
        } else {
            u64::MAX
        }
    }

    /// Hard stop: silence and idle, no release tail.
    pub fn reset(&mut self) {
        self.stage = EnvStage::Idle;
        self.level = 0.0;
        self.stage_elapsed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(env: &mut AdsrEnvelope, samples: usize) -> f32 {
        let mut last = 0.0;
        for _ in 0..samples {
            last = env.tick();
        }
        last
    }

    #[test]
    fn test_idle_envelope_is_silent() {
        let mut env = AdsrEnvelope::new(44100.0, EnvRole::Amplitude);
        for _ in 0..100 {
            assert_eq!(env.tick(), 0.0);
        }
        assert!(!env.is_active());
    }

    #[test]
    fn test_full_adsr_cycle() {
        let sr = 44100.0;
        let mut env = AdsrEnvelope::new(sr, EnvRole::Amplitude);
        env.trigger(0.01, 0.05, 0.6, false);
        assert_eq!(env.stage(), EnvStage::Attack);

        // Through attack.
        run(&mut env, (0.01 * sr) as usize + 10);
        assert!(matches!(env.stage(), EnvStage::Decay | EnvStage::Sustain));

        // Through decay into sustain.
        run(&mut env, (0.05 * sr) as usize + 10);
        assert_eq!(env.stage(), EnvStage::Sustain);
        assert!((env.level() - 0.6).abs() < 0.01);

        // Release all the way down.
        env.release(0.1);
        assert_eq!(env.stage(), EnvStage::Release);
        run(&mut env, (0.1 * sr) as usize + 10);
        assert_eq!(env.stage(), EnvStage::Idle);
        assert_eq!(env.level(), 0.0);
    }

    #[test]
    fn test_release_endpoint_is_under_a_thousandth_of_peak() {
        // trigger(a, d, s) then release at t > a + d: level at t + release
        // must be <= 0.001 of the peak.
        let sr = 48000.0;
        let mut env = AdsrEnvelope::new(sr, EnvRole::Amplitude);
        env.trigger(0.005, 0.01, 0.8, false);
        run(&mut env, (0.05 * sr) as usize);

        let release_s = 0.2;
        env.release(release_s);
        run(&mut env, (release_s * sr) as usize + 1);
        assert!(
            env.level() <= 0.001,
            "release tail did not settle: {}",
            env.level()
        );
    }

    #[test]
    fn test_release_snapshot_ignores_later_calls() {
        // The snapshot at release() is authoritative: calling release again
        // mid-tail restarts from the current (lower) level but an in-flight
        // tail never jumps upwards.
        let sr = 44100.0;
        let mut env = AdsrEnvelope::new(sr, EnvRole::Amplitude);
        env.trigger(0.001, 0.01, 1.0, false);
        run(&mut env, 1000);
        env.release(0.5);
        let mid = run(&mut env, 2000);
        env.release(0.5);
        let after = env.tick();
        assert!(after <= mid + 1e-6);
    }

    #[test]
    fn test_retrigger_inserts_fade_to_zero() {
        let sr = 44100.0;
        let mut env = AdsrEnvelope::new(sr, EnvRole::Amplitude);
        env.trigger(0.001, 0.1, 0.8, false);
        run(&mut env, 500);
        assert!(env.level() > 0.5);

        env.trigger(0.001, 0.1, 0.8, false);
        assert_eq!(env.stage(), EnvStage::RetriggerFade);

        // The fade must reach zero within 2 ms and never step.
        let fade_samples = (0.002 * sr) as usize + 2;
        let mut prev = env.level();
        let mut reached_zero = false;
        for _ in 0..fade_samples {
            let level = env.tick();
            assert!(
                level <= prev + 1e-6,
                "level rose during retrigger fade: {} -> {}",
                prev,
                level
            );
            prev = level;
            if env.stage() != EnvStage::RetriggerFade {
                reached_zero = true;
                break;
            }
        }
        assert!(reached_zero, "retrigger fade never completed");
    }

    #[test]
    fn test_retrigger_continuity_bounds_sample_steps() {
        // Two triggers 1 ms apart: the largest sample-to-sample jump must
        // stay within what the 2 ms fade permits.
        let sr = 44100.0;
        let attack_s = 0.005;
        let mut env = AdsrEnvelope::new(sr, EnvRole::Amplitude);
        env.trigger(attack_s, 0.1, 0.8, false);
        let mut prev = env.tick();
        // Largest admissible step: the fade slope plus the attack slope.
        let fade_step_bound = 1.1 / (0.002 * sr) + 1.1 / (attack_s * sr);

        for i in 1..((0.02 * sr) as usize) {
            if i == (0.001 * sr) as usize {
                env.trigger(attack_s, 0.1, 0.8, false);
            }
            let level = env.tick();
            assert!(
                (level - prev).abs() <= fade_step_bound,
                "jump {} at sample {}",
                (level - prev).abs(),
                i
            );
            prev = level;
        }
    }

    #[test]
    fn test_accent_overshoot_and_halved_decay() {
        let sr = 44100.0;

        let mut plain = AdsrEnvelope::new(sr, EnvRole::Amplitude);
        plain.trigger(0.0005, 0.1, 0.5, false);
        let plain_peak = run(&mut plain, (0.003 * sr) as usize);

        let mut accented = AdsrEnvelope::new(sr, EnvRole::Amplitude);
        accented.trigger(0.0005, 0.1, 0.5, true);
        let mut accent_peak: f32 = 0.0;
        for _ in 0..(0.003 * sr) as usize {
            accent_peak = accent_peak.max(accented.tick());
        }

        assert!(
            accent_peak >= 1.1 * plain_peak.min(1.0) - 1e-3,
            "accent peak {} vs plain {}",
            accent_peak,
            plain_peak
        );

        // Halved decay: the accented envelope reaches sustain in half the time.
        let mut a = AdsrEnvelope::new(sr, EnvRole::Amplitude);
        a.trigger(0.0005, 0.2, 0.3, true);
        run(&mut a, (0.11 * sr) as usize);
        assert_eq!(a.stage(), EnvStage::Sustain);
    }

    #[test]
    fn test_short_release_uses_linear_ramp() {
        let sr = 44100.0;
        let mut env = AdsrEnvelope::new(sr, EnvRole::Amplitude);
        env.trigger(0.0005, 0.01, 1.0, false);
        run(&mut env, 500);

        env.release(0.001);
        // 5 ms linear ramp: halfway down at ~2.5 ms, zero at 5 ms.
        run(&mut env, (0.0025 * sr) as usize);
        assert!((env.level() - 0.5).abs() < 0.1);
        run(&mut env, (0.0030 * sr) as usize);
        assert_eq!(env.stage(), EnvStage::Idle);
    }

    #[test]
    fn test_fast_release_settles_in_25_ms() {
        let sr = 44100.0;
        let mut env = AdsrEnvelope::new(sr, EnvRole::Amplitude);
        env.trigger(0.0005, 0.01, 0.7, false);
        run(&mut env, 2000);

        env.fast_release();
        run(&mut env, (FAST_RELEASE_S * sr) as usize + 1);
        assert!(env.level() <= 0.01);
        assert_eq!(env.stage(), EnvStage::Idle);
    }

    #[test]
    fn test_filter_role_tau_floor() {
        // Filter envelope: tau = release/5, min 10 ms. With a 20 ms release
        // the tau floor (10 ms) applies, so the tail is slower than the
        // amplitude envelope's 5 ms tau would be.
        let sr = 44100.0;
        let mut amp = AdsrEnvelope::new(sr, EnvRole::Amplitude);
        let mut filt = AdsrEnvelope::new(sr, EnvRole::Filter);
        for env in [&mut amp, &mut filt] {
            env.trigger(0.0005, 0.01, 1.0, false);
            run(env, 1000);
            env.release(0.020);
        }
        run(&mut amp, 400);
        run(&mut filt, 400);
        assert!(filt.level() > amp.level());
    }

    #[test]
    fn test_remaining_release_samples() {
        let sr = 44100.0;
        let mut env = AdsrEnvelope::new(sr, EnvRole::Amplitude);
        assert_eq!(env.remaining_release_samples(), u64::MAX);

        env.trigger(0.0005, 0.01, 1.0, false);
        run(&mut env, 100);
        env.release(0.1);
        let total = env.remaining_release_samples();
        run(&mut env, 1000);
        assert_eq!(env.remaining_release_samples(), total - 1000);
    }

    #[test]
    fn test_level_always_within_bounds() {
        let sr = 44100.0;
        let mut env = AdsrEnvelope::new(sr, EnvRole::Amplitude);
        env.trigger(0.002, 0.05, 0.6, true);
        for _ in 0..(sr as usize) {
            let level = env.tick();
            assert!((0.0..=1.1).contains(&level), "level out of range: {}", level);
        }
    }
}
