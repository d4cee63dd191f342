//! Stompmatch CLI
//!
//! Command-line interface for hardware-in-the-loop tone matching.

use clap::Parser;
use env_logger::Env;
use log::info;

use stompmatch::cli::commands;
use stompmatch::cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    info!("Stompmatch v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd) => handle_command(cmd, cli.config.as_deref()),
        None => {
            println!("Stompmatch v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands, config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    match cmd {
        Commands::Encode {
            patch,
            output,
            index,
        } => commands::encode(&patch, &output, index),
        Commands::Decode { input, output } => commands::decode(&input, output.as_deref()),
        Commands::Validate { patch } => {
            let config = commands::load_config(config_path)?;
            commands::validate(&config, &patch)
        }
        Commands::Simulate {
            patch,
            target_patch,
            dry,
            output_dir,
            iterations,
        } => {
            let mut config = commands::load_config(config_path)?;
            if output_dir.is_some() {
                config.export.output_dir = output_dir;
            }
            commands::simulate(config, &patch, &target_patch, dry.as_deref(), iterations)
        }
        #[cfg(feature = "hardware")]
        Commands::Devices => commands::list_devices(),
        #[cfg(feature = "hardware")]
        Commands::Calibrate { hardware, save } => {
            let config = commands::load_config(config_path)?;
            commands::calibrate(&config, &hardware, save.as_deref())
        }
        #[cfg(feature = "hardware")]
        Commands::Match {
            hardware,
            patch,
            target,
            dry,
            output_dir,
        } => {
            let mut config = commands::load_config(config_path)?;
            if output_dir.is_some() {
                config.export.output_dir = output_dir;
            }
            commands::match_tone(config, &hardware, patch.as_deref(), &target, &dry)
        }
    }
}
