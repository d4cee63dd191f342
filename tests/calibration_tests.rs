//! Calibration Tests
//!
//! Latency and gain measurement through the simulated loop.

use std::time::Duration;

use approx::assert_abs_diff_eq;
use test_case::test_case;

use stompmatch::calibration::CalibrationEngine;
use stompmatch::config::CalibrationConfig;
use stompmatch::dsp;
use stompmatch::error::CalibrationError;
use stompmatch::rig::{RigSettings, SimulatedRig};

fn rig(latency_ms: f64, gain_db: f64) -> SimulatedRig {
    SimulatedRig::new(RigSettings {
        latency_ms,
        gain_db,
        ..RigSettings::default()
    })
}

fn timeout() -> Duration {
    Duration::from_secs(5)
}

#[test_case(3.0, -3.0 ; "short loop")]
#[test_case(12.0, 0.0 ; "unity gain")]
#[test_case(47.5, -9.5 ; "quiet return")]
#[test_case(230.0, 4.0 ; "long loop with boost")]
fn test_latency_and_gain_are_recovered(latency_ms: f64, gain_db: f64) {
    let rig = rig(latency_ms, gain_db);
    let engine = CalibrationEngine::new(CalibrationConfig::default());
    let profile = engine.calibrate(&mut rig.audio(), timeout()).unwrap();

    let expected = dsp::ms_to_samples(latency_ms, 44100) as i64;
    let measured = profile.latency_samples() as i64;
    assert!(
        (measured - expected).abs() <= 1,
        "latency {} samples, expected {}",
        measured,
        expected
    );
    assert_abs_diff_eq!(profile.gain_ratio_db, gain_db, epsilon = 0.1);
    assert!(profile.confidence > 0.9);
    assert_eq!(profile.sample_rate, 44100);
}

#[test]
fn test_calibration_is_deterministic() {
    let engine = CalibrationEngine::new(CalibrationConfig::default());
    let first = engine.calibrate(&mut rig(12.0, -3.0).audio(), timeout()).unwrap();
    let second = engine.calibrate(&mut rig(12.0, -3.0).audio(), timeout()).unwrap();

    assert_eq!(first.latency_ms, second.latency_ms);
    assert_eq!(first.gain_ratio_db, second.gain_ratio_db);
    assert_eq!(first.confidence, second.confidence);
}

#[test]
fn test_unrelated_capture_is_rejected() {
    let rig = rig(12.0, -3.0);
    rig.control().scramble_next_captures(1);
    let engine = CalibrationEngine::new(CalibrationConfig::default());

    let err = engine.calibrate(&mut rig.audio(), timeout()).unwrap_err();
    assert!(
        matches!(
            err,
            CalibrationError::LowConfidence { .. } | CalibrationError::NoSignalDetected
        ),
        "unexpected error {:?}",
        err
    );
}

#[test]
fn test_capture_timeout_surfaces_as_audio_error() {
    let rig = rig(12.0, -3.0);
    rig.control().time_out_next_captures(1);
    let engine = CalibrationEngine::new(CalibrationConfig::default());

    let err = engine.calibrate(&mut rig.audio(), timeout()).unwrap_err();
    assert!(matches!(err, CalibrationError::Audio(_)));
}

#[test]
fn test_profile_compensation_undoes_loop_gain() {
    let rig = rig(12.0, -6.0);
    let engine = CalibrationEngine::new(CalibrationConfig::default());
    let profile = engine.calibrate(&mut rig.audio(), timeout()).unwrap();

    assert_abs_diff_eq!(profile.compensation(), dsp::db_to_linear(6.0), epsilon = 0.03);
    assert!(profile.is_usable(0.5));
}
