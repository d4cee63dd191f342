//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::Path;

use anyhow::{bail, Context, Result};
use log::info;

use crate::audio::{read_wav, signal, AudioTake};
use crate::config::StompConfig;
use crate::device::DeviceSession;
use crate::patch::{Patch, PatchCodec};
use crate::rig::{RigSettings, SimulatedRig};
use crate::session::{render_report, OptimizationOrchestrator, SessionStatus};

/// Length of the synthetic riff used when no DI recording is given
const SYNTHETIC_DI_SECS: f64 = 2.0;

/// Load the configuration file, or defaults
pub fn load_config(path: Option<&Path>) -> Result<StompConfig> {
    let config = match path {
        Some(path) => StompConfig::load(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => StompConfig::default(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn load_patch(path: &Path) -> Result<Patch> {
    Patch::load(path).with_context(|| format!("reading patch {}", path.display()))
}

/// Encode a patch JSON file into a bulk dump.
pub fn encode(patch_path: &Path, output: &Path, index: u8) -> Result<()> {
    info!("Encoding {} -> {}", patch_path.display(), output.display());
    let patch = load_patch(patch_path)?;
    let bytes = PatchCodec::new().encode_bulk(&patch, index)?;
    std::fs::write(output, &bytes).with_context(|| format!("writing {}", output.display()))?;

    println!("Encoded '{}' ({} bytes) to {}", patch.name(), bytes.len(), output.display());
    Ok(())
}

/// Decode a bulk dump into patch JSON.
pub fn decode(input: &Path, output: Option<&Path>) -> Result<()> {
    info!("Decoding {}", input.display());
    let bytes = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let patch = PatchCodec::new()
        .decode(&bytes)
        .with_context(|| format!("decoding {}", input.display()))?;

    match output {
        Some(path) => {
            patch.save(path).with_context(|| format!("writing {}", path.display()))?;
            println!("Decoded '{}' to {}", patch.name(), path.display());
        }
        None => println!("{}", patch.to_json_pretty()?),
    }
    Ok(())
}

/// Check a patch against the configured parameter space.
pub fn validate(config: &StompConfig, patch_path: &Path) -> Result<()> {
    let patch = load_patch(patch_path)?;
    let space = config.parameter_space()?;

    let mut missing = 0;
    for spec in space.specs() {
        match spec.resolve(&patch) {
            Ok(value) if spec.clamp(value) != value => {
                println!("  {:<20} {:>10.4}  outside [{}, {}]", spec.name, value, spec.min, spec.max);
            }
            Ok(value) => println!("  {:<20} {:>10.4}", spec.name, value),
            Err(e) => {
                missing += 1;
                println!("  {:<20} {:>10}  {}", spec.name, "-", e);
            }
        }
    }
    for warning in space.relationship_warnings(&patch) {
        println!("Warning: {}", warning);
    }

    // everything the codec can't encode fails here too
    PatchCodec::new().encode(&patch)?;

    if missing > 0 {
        bail!("{} parameters missing from '{}'", missing, patch.name());
    }
    println!("Patch '{}' is valid ({} parameters)", patch.name(), space.len());
    Ok(())
}

fn print_outcome(status: &SessionStatus, report: &str) -> Result<()> {
    println!("{}", report);
    if let SessionStatus::Aborted { reason } = status {
        bail!("session aborted: {}", reason);
    }
    Ok(())
}

/// Run a full session against the simulated rig.
pub fn simulate(
    mut config: StompConfig,
    patch_path: &Path,
    target_path: &Path,
    dry_path: Option<&Path>,
    iterations: Option<usize>,
) -> Result<()> {
    let initial = load_patch(patch_path)?;
    let target_patch = load_patch(target_path)?;
    let dry = match dry_path {
        Some(path) => read_wav(path).with_context(|| format!("reading {}", path.display()))?,
        None => {
            let rate = config.audio.sample_rate;
            AudioTake::from_mono(signal::guitar_di(SYNTHETIC_DI_SECS, rate), rate)
        }
    };
    if let Some(n) = iterations {
        config.search.max_iterations = n;
    }
    // the simulated unit applies a patch instantly
    config.audio.settle_ms = 0;

    let rig = SimulatedRig::new(RigSettings {
        sample_rate: dry.sample_rate(),
        ..RigSettings::default()
    });
    let target = SimulatedRig::render(&target_patch, &dry)?;
    info!(
        "Simulating: '{}' towards '{}' ({:.2} s of audio)",
        initial.name(),
        target_patch.name(),
        dry.duration_secs()
    );

    let device = DeviceSession::new(Box::new(rig.transport()), &config.device)?;
    let mut orchestrator = OptimizationOrchestrator::new(config, device, Box::new(rig.audio()))?;
    let session = orchestrator.run(&initial, &target, &dry);
    print_outcome(session.status(), &render_report(&session))
}

#[cfg(feature = "hardware")]
pub use hardware::{calibrate, list_devices, match_tone};

#[cfg(feature = "hardware")]
mod hardware {
    use super::*;
    use crate::audio::CpalDuplex;
    use crate::calibration::CalibrationEngine;
    use crate::cli::HardwareArgs;
    use crate::device::MidirTransport;
    use std::time::Duration;

    fn open_audio(args: &HardwareArgs, config: &StompConfig) -> Result<CpalDuplex> {
        Ok(CpalDuplex::open(
            args.audio_out.as_deref(),
            args.audio_in.as_deref(),
            config.audio.sample_rate,
        )?)
    }

    fn open_device(args: &HardwareArgs, config: &StompConfig) -> Result<DeviceSession> {
        let transport = MidirTransport::connect(&args.midi_port)
            .with_context(|| format!("opening MIDI port matching '{}'", args.midi_port))?;
        Ok(DeviceSession::new(Box::new(transport), &config.device)?)
    }

    /// List MIDI ports and audio devices.
    pub fn list_devices() -> Result<()> {
        println!("MIDI outputs:");
        for port in MidirTransport::list_output_ports()? {
            println!("  {}", port);
        }
        let (outputs, inputs) = CpalDuplex::list_devices()?;
        println!("Audio outputs:");
        for name in outputs {
            println!("  {}", name);
        }
        println!("Audio inputs:");
        for name in inputs {
            println!("  {}", name);
        }
        Ok(())
    }

    /// Measure loop latency and gain.
    pub fn calibrate(config: &StompConfig, args: &HardwareArgs, save: Option<&Path>) -> Result<()> {
        let mut audio = open_audio(args, config)?;
        let engine = CalibrationEngine::new(config.calibration.clone());
        let timeout = Duration::from_millis(config.audio.io_timeout_ms)
            + Duration::from_secs_f64(config.calibration.stimulus_secs());
        let profile = engine.calibrate(&mut audio, timeout)?;

        println!("Latency:    {:.2} ms", profile.latency_ms);
        println!("Gain ratio: {:+.2} dB", profile.gain_ratio_db);
        println!("Confidence: {:.3}", profile.confidence);
        if let Some(path) = save {
            profile.save(path).with_context(|| format!("writing {}", path.display()))?;
            println!("Saved profile to {}", path.display());
        }
        Ok(())
    }

    /// Match a target recording on the connected unit.
    pub fn match_tone(
        config: StompConfig,
        args: &HardwareArgs,
        patch_path: Option<&Path>,
        target_path: &Path,
        dry_path: &Path,
    ) -> Result<()> {
        let target = read_wav(target_path).with_context(|| format!("reading {}", target_path.display()))?;
        let dry = read_wav(dry_path).with_context(|| format!("reading {}", dry_path.display()))?;
        let device = open_device(args, &config)?;
        let initial = match patch_path {
            Some(path) => load_patch(path)?,
            None => device
                .request_patch(
                    &PatchCodec::new(),
                    config.device.patch_index,
                    Duration::from_millis(config.audio.io_timeout_ms),
                )
                .context("reading the current patch from the unit")?,
        };
        let audio = open_audio(args, &config)?;

        let mut orchestrator = OptimizationOrchestrator::new(config, device, Box::new(audio))?;
        let session = orchestrator.run(&initial, &target.to_mono(), &dry.to_mono());
        print_outcome(session.status(), &render_report(&session))
    }
}
