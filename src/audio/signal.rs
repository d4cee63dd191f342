//! Test signal generators

use std::f64::consts::PI;

/// Sine at `freq` Hz for `duration_secs`
pub fn sine(freq: f64, duration_secs: f64, sample_rate: u32, level: f32) -> Vec<f32> {
    let n = (duration_secs * sample_rate as f64).round() as usize;
    let w = 2.0 * PI * freq / sample_rate as f64;
    (0..n)
        .map(|i| level * (w * i as f64).sin() as f32)
        .collect()
}

/// Exponential sine sweep from `f0` to `f1` Hz
///
/// Instantaneous frequency rises geometrically, so every octave gets equal
/// time. A short raised-cosine fade at both ends avoids clicks.
pub fn exp_sweep(f0: f64, f1: f64, duration_secs: f64, sample_rate: u32, level: f32) -> Vec<f32> {
    let n = (duration_secs * sample_rate as f64).round() as usize;
    if n == 0 {
        return Vec::new();
    }
    let t_total = duration_secs;
    let ratio = (f1 / f0).ln();
    let k = t_total / ratio;
    let fade = (n / 20).max(1);

    (0..n)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            let phase = 2.0 * PI * f0 * k * ((t / k).exp() - 1.0);
            let env = if i < fade {
                0.5 - 0.5 * (PI * i as f64 / fade as f64).cos()
            } else if i >= n - fade {
                0.5 - 0.5 * (PI * (n - 1 - i) as f64 / fade as f64).cos()
            } else {
                1.0
            };
            level * (phase.sin() * env) as f32
        })
        .collect()
}

/// `len` samples of silence with a single sample of `level` at `position`
pub fn impulse(len: usize, position: usize, level: f32) -> Vec<f32> {
    let mut out = vec![0.0; len];
    if let Some(s) = out.get_mut(position) {
        *s = level;
    }
    out
}

pub fn silence(duration_secs: f64, sample_rate: u32) -> Vec<f32> {
    vec![0.0; (duration_secs * sample_rate as f64).round() as usize]
}

/// Plucked-string style DI: decaying harmonics, one note per `note_secs`
///
/// Deterministic, so the same arguments always produce the same signal.
pub fn guitar_di(duration_secs: f64, sample_rate: u32) -> Vec<f32> {
    const NOTES: [f64; 4] = [110.0, 146.83, 196.0, 164.81];
    let note_secs = 0.5;
    let n = (duration_secs * sample_rate as f64).round() as usize;
    let sr = sample_rate as f64;

    (0..n)
        .map(|i| {
            let t = i as f64 / sr;
            let note = ((t / note_secs) as usize) % NOTES.len();
            let local = t % note_secs;
            let f = NOTES[note];
            let env = (-local * 6.0).exp();
            let mut v = 0.0;
            for h in 1..=6 {
                v += (2.0 * PI * f * h as f64 * local).sin() / h as f64;
            }
            (0.3 * env * v) as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sine_length_and_level() {
        let s = sine(1000.0, 0.1, 44100, 0.25);
        assert_eq!(s.len(), 4410);
        let peak = s.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert_relative_eq!(peak, 0.25, epsilon = 1e-3);
    }

    #[test]
    fn test_sweep_bounded_and_faded() {
        let s = exp_sweep(100.0, 8000.0, 0.05, 44100, 0.5);
        assert_eq!(s.len(), 2205);
        assert!(s.iter().all(|v| v.abs() <= 0.5 + 1e-6));
        assert_eq!(s[0], 0.0);
    }

    #[test]
    fn test_impulse_position() {
        let s = impulse(10, 3, 0.8);
        assert_eq!(s[3], 0.8);
        assert_eq!(s.iter().filter(|v| **v != 0.0).count(), 1);
        assert!(impulse(3, 5, 1.0).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_di_is_deterministic() {
        assert_eq!(guitar_di(0.2, 22050), guitar_di(0.2, 22050));
    }
}
