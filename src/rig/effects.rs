//! Effect chain of the simulated unit
//!
//! A deliberately small model of the unit's signal path: booster, amp
//! (drive and tone stack), tremolo, feedback delay and a comb reverb, in
//! that order. Each stage reads its settings from the patch the unit holds
//! and processes mono audio in place.

use std::f32::consts::PI;

use crate::patch::{Patch, SectionId};

/// One stage of the chain
pub trait Processor: Send {
    fn process(&mut self, samples: &mut [f32]);

    fn name(&self) -> &'static str;
}

fn param(patch: &Patch, section: SectionId, key: &str, default: f64) -> f32 {
    patch.number(section, key).unwrap_or(default) as f32
}

fn enabled(patch: &Patch, section: SectionId) -> bool {
    patch.section(section).map(|s| s.enabled).unwrap_or(false)
}

/// One-pole lowpass coefficient for cutoff `fc`
fn one_pole(fc: f32, sample_rate: f32) -> f32 {
    1.0 - (-2.0 * PI * fc / sample_rate).exp()
}

// ============================================================================
// Booster
// ============================================================================

pub struct Booster {
    gain: f32,
}

impl Booster {
    pub fn from_patch(patch: &Patch) -> Self {
        Self {
            gain: 1.0 + param(patch, SectionId::Booster, "level", 0.0),
        }
    }
}

impl Processor for Booster {
    fn process(&mut self, samples: &mut [f32]) {
        samples.iter_mut().for_each(|s| *s *= self.gain);
    }

    fn name(&self) -> &'static str {
        "booster"
    }
}

// ============================================================================
// Amp
// ============================================================================

/// Tanh drive followed by a three-band tone stack and a presence shelf
pub struct AmpStage {
    drive: f32,
    master: f32,
    bass: f32,
    mid: f32,
    treble: f32,
    presence: f32,
    low_coeff: f32,
    high_coeff: f32,
    presence_coeff: f32,
    low_state: f32,
    high_state: f32,
    presence_state: f32,
}

impl AmpStage {
    pub fn from_patch(patch: &Patch, sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        let band = |key, default| 0.5 + param(patch, SectionId::Amp, key, default);
        Self {
            drive: 1.0 + 4.0 * param(patch, SectionId::Amp, "gain", 0.5),
            master: 0.5 + param(patch, SectionId::Amp, "master", 0.5),
            bass: band("bass", 0.5),
            mid: band("mid", 0.5),
            treble: band("treble", 0.5),
            presence: param(patch, SectionId::Amp, "presence", 0.5),
            low_coeff: one_pole(300.0, sr),
            high_coeff: one_pole(3000.0, sr),
            presence_coeff: one_pole(5000.0, sr),
            low_state: 0.0,
            high_state: 0.0,
            presence_state: 0.0,
        }
    }

    #[inline]
    fn waveshape(&self, x: f32) -> f32 {
        // tape-style soft clip, level-normalized
        (x * self.drive).tanh() / self.drive.tanh()
    }
}

impl Processor for AmpStage {
    fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            let driven = self.waveshape(*s);

            self.low_state += self.low_coeff * (driven - self.low_state);
            self.high_state += self.high_coeff * (driven - self.high_state);
            let low = self.low_state;
            let high = driven - self.high_state;
            let mid = driven - low - high;
            let toned = self.bass * low + self.mid * mid + self.treble * high;

            self.presence_state += self.presence_coeff * (toned - self.presence_state);
            let air = toned - self.presence_state;
            *s = self.master * (toned + self.presence * air);
        }
    }

    fn name(&self) -> &'static str {
        "amp"
    }
}

// ============================================================================
// Modulation
// ============================================================================

/// Amplitude modulation by a sine LFO
pub struct Tremolo {
    depth: f32,
    increment: f32,
    phase: f32,
}

impl Tremolo {
    pub fn from_patch(patch: &Patch, sample_rate: u32) -> Self {
        let depth = param(patch, SectionId::Modulation, "depth", 0.0)
            * param(patch, SectionId::Modulation, "mix", 0.0);
        let rate = param(patch, SectionId::Modulation, "rate_hz", 1.0);
        Self {
            depth: depth.clamp(0.0, 1.0),
            increment: 2.0 * PI * rate / sample_rate as f32,
            phase: 0.0,
        }
    }
}

impl Processor for Tremolo {
    fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            let lfo = 0.5 + 0.5 * self.phase.sin();
            *s *= 1.0 - self.depth * lfo;
            self.phase = (self.phase + self.increment) % (2.0 * PI);
        }
    }

    fn name(&self) -> &'static str {
        "modulation"
    }
}

// ============================================================================
// Delay
// ============================================================================

/// Feedback delay with a damped feedback path
pub struct EchoDelay {
    buffer: Vec<f32>,
    write_pos: usize,
    delay_samples: usize,
    feedback: f32,
    wet: f32,
    filter_coeff: f32,
    filter_state: f32,
}

impl EchoDelay {
    pub fn from_patch(patch: &Patch, sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        let time_ms = param(patch, SectionId::Delay, "time_ms", 300.0).clamp(1.0, 2000.0);
        let delay_samples = ((time_ms * sr / 1000.0) as usize).max(1);
        Self {
            buffer: vec![0.0; delay_samples + 1],
            write_pos: 0,
            delay_samples,
            feedback: param(patch, SectionId::Delay, "feedback", 0.3).clamp(0.0, 0.95),
            wet: param(patch, SectionId::Delay, "mix", 0.0),
            filter_coeff: one_pole(6000.0, sr),
            filter_state: 0.0,
        }
    }

    #[inline]
    fn read(&self) -> f32 {
        let size = self.buffer.len();
        self.buffer[(self.write_pos + size - self.delay_samples) % size]
    }
}

impl Processor for EchoDelay {
    fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            let input = *s;
            let delayed = self.read();
            self.filter_state += self.filter_coeff * (delayed * self.feedback - self.filter_state);
            self.buffer[self.write_pos] = input + self.filter_state;
            *s = input + delayed * self.wet;
            self.write_pos = (self.write_pos + 1) % self.buffer.len();
        }
    }

    fn name(&self) -> &'static str {
        "delay"
    }
}

// ============================================================================
// Reverb
// ============================================================================

/// Comb delays at 44.1 kHz
const COMB_DELAYS: [usize; 4] = [1116, 1277, 1422, 1557];

struct Comb {
    buffer: Vec<f32>,
    pos: usize,
    feedback: f32,
}

impl Comb {
    fn process(&mut self, input: f32) -> f32 {
        let out = self.buffer[self.pos];
        self.buffer[self.pos] = input + out * self.feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        out
    }
}

/// Parallel combs whose feedback follows the decay time
pub struct CombReverb {
    combs: Vec<Comb>,
    wet: f32,
}

impl CombReverb {
    pub fn from_patch(patch: &Patch, sample_rate: u32) -> Self {
        let decay_s = param(patch, SectionId::Reverb, "decay_s", 1.5).max(0.05);
        let scale = sample_rate as f32 / 44100.0;
        let combs = COMB_DELAYS
            .iter()
            .map(|&d| {
                let len = ((d as f32 * scale) as usize).max(1);
                // -60 dB after decay_s
                let feedback = 10f32.powf(-3.0 * len as f32 / (decay_s * sample_rate as f32));
                Comb {
                    buffer: vec![0.0; len],
                    pos: 0,
                    feedback: feedback.min(0.98),
                }
            })
            .collect();
        Self {
            combs,
            wet: param(patch, SectionId::Reverb, "mix", 0.0),
        }
    }
}

impl Processor for CombReverb {
    fn process(&mut self, samples: &mut [f32]) {
        let norm = 1.0 / self.combs.len() as f32;
        for s in samples.iter_mut() {
            let input = *s;
            let wet: f32 = self.combs.iter_mut().map(|c| c.process(input)).sum::<f32>() * norm;
            *s = input + wet * self.wet;
        }
    }

    fn name(&self) -> &'static str {
        "reverb"
    }
}

// ============================================================================
// Chain
// ============================================================================

/// The enabled stages of a patch, in signal order
pub struct RigChain {
    stages: Vec<Box<dyn Processor>>,
}

impl RigChain {
    pub fn from_patch(patch: &Patch, sample_rate: u32) -> Self {
        let mut stages: Vec<Box<dyn Processor>> = Vec::new();
        if enabled(patch, SectionId::Booster) {
            stages.push(Box::new(Booster::from_patch(patch)));
        }
        if enabled(patch, SectionId::Amp) {
            stages.push(Box::new(AmpStage::from_patch(patch, sample_rate)));
        }
        if enabled(patch, SectionId::Modulation) {
            stages.push(Box::new(Tremolo::from_patch(patch, sample_rate)));
        }
        if enabled(patch, SectionId::Delay) {
            stages.push(Box::new(EchoDelay::from_patch(patch, sample_rate)));
        }
        if enabled(patch, SectionId::Reverb) {
            stages.push(Box::new(CombReverb::from_patch(patch, sample_rate)));
        }
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for stage in &mut self.stages {
            stage.process(samples);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::signal;
    use crate::patch::Section;

    fn impulse_response(patch: &Patch, len: usize) -> Vec<f32> {
        let mut samples = signal::impulse(len, 0, 1.0);
        RigChain::from_patch(patch, 44100).process(&mut samples);
        samples
    }

    #[test]
    fn test_empty_patch_is_transparent() {
        let input = signal::guitar_di(0.1, 44100);
        let mut output = input.clone();
        RigChain::from_patch(&Patch::new("x"), 44100).process(&mut output);
        assert_eq!(input, output);
    }

    #[test]
    fn test_disabled_section_is_bypassed() {
        let patch = Patch::new("x").with_section(
            SectionId::Delay,
            Section::new(false).with("mix", 0.5).with("time_ms", 10.0),
        );
        assert!(RigChain::from_patch(&patch, 44100).stage_names().is_empty());
    }

    #[test]
    fn test_delay_produces_echo() {
        let patch = Patch::new("x")
            .with_number(SectionId::Delay, "time_ms", 10.0)
            .with_number(SectionId::Delay, "mix", 0.5)
            .with_number(SectionId::Delay, "feedback", 0.0);
        let ir = impulse_response(&patch, 1000);
        assert_eq!(ir[0], 1.0);
        assert!((ir[441] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_reverb_tail_follows_decay() {
        let short = Patch::new("x")
            .with_number(SectionId::Reverb, "decay_s", 0.3)
            .with_number(SectionId::Reverb, "mix", 1.0);
        let long = short.with_number(SectionId::Reverb, "decay_s", 2.5);
        let tail = |ir: Vec<f32>| crate::dsp::energy(&ir[22050..]);
        assert!(tail(impulse_response(&long, 44100)) > tail(impulse_response(&short, 44100)));
    }

    #[test]
    fn test_amp_gain_adds_drive() {
        let clean = Patch::new("x")
            .with_number(SectionId::Amp, "gain", 0.0)
            .with_number(SectionId::Amp, "presence", 0.0);
        let hot = clean.with_number(SectionId::Amp, "gain", 1.0);
        let tone = signal::sine(220.0, 0.1, 44100, 0.8);
        let crest = |patch: &Patch| {
            let mut s = tone.clone();
            RigChain::from_patch(patch, 44100).process(&mut s);
            crate::dsp::peak(&s) as f64 / crate::dsp::rms(&s)
        };
        // harder clipping flattens the waveform
        assert!(crest(&hot) < crest(&clean));
    }
}
