//! CLI Module
//!
//! Command-line interface for stompmatch.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Stompmatch - hardware-in-the-loop tone matching for SysEx effect units
#[derive(Parser, Debug)]
#[command(name = "stompmatch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Session configuration (JSON); defaults are used when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Encode a patch JSON file into a SysEx bulk dump
    #[command(name = "encode")]
    Encode {
        /// Patch JSON
        patch: PathBuf,

        /// Output .syx file
        #[arg(short, long)]
        output: PathBuf,

        /// Patch slot written into the dump markers
        #[arg(long, default_value_t = 0)]
        index: u8,
    },

    /// Decode a SysEx bulk dump into patch JSON
    #[command(name = "decode")]
    Decode {
        /// Input .syx file
        input: PathBuf,

        /// Output JSON file (printed when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check a patch against the parameter space
    #[command(name = "validate")]
    Validate {
        /// Patch JSON
        patch: PathBuf,
    },

    /// Run a full session against the simulated rig
    #[command(name = "simulate")]
    Simulate {
        /// Starting patch JSON
        #[arg(short, long)]
        patch: PathBuf,

        /// Patch whose rendered output is the target tone
        #[arg(short, long)]
        target_patch: PathBuf,

        /// Dry DI recording (a synthetic riff when omitted)
        #[arg(short, long)]
        dry: Option<PathBuf>,

        /// Export directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Override the trial budget
        #[arg(long)]
        iterations: Option<usize>,
    },

    /// List MIDI ports and audio devices
    #[cfg(feature = "hardware")]
    #[command(name = "devices")]
    Devices,

    /// Measure loop latency and gain through the unit
    #[cfg(feature = "hardware")]
    #[command(name = "calibrate")]
    Calibrate {
        #[command(flatten)]
        hardware: HardwareArgs,

        /// Save the profile as JSON
        #[arg(short, long)]
        save: Option<PathBuf>,
    },

    /// Match a target recording on the connected unit
    #[cfg(feature = "hardware")]
    #[command(name = "match")]
    Match {
        #[command(flatten)]
        hardware: HardwareArgs,

        /// Starting patch JSON (read from the unit when omitted)
        #[arg(short, long)]
        patch: Option<PathBuf>,

        /// Target recording
        #[arg(short, long)]
        target: PathBuf,

        /// Dry DI recording played through the unit
        #[arg(short, long)]
        dry: PathBuf,

        /// Export directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

/// Device selection shared by the hardware commands
#[cfg(feature = "hardware")]
#[derive(clap::Args, Debug)]
pub struct HardwareArgs {
    /// Substring of the MIDI output port name
    #[arg(long, default_value = "magicstomp")]
    pub midi_port: String,

    /// Substring of the audio output device name
    #[arg(long)]
    pub audio_out: Option<String>,

    /// Substring of the audio input device name
    #[arg(long)]
    pub audio_in: Option<String>,
}
