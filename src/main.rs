//! Command-line entry point for the light-injection control system.
//!
//! Only the simulated backend is linked into this binary; real vendor
//! bindings implement the capability traits out-of-tree and wire up their
//! own `DeviceSet`. Every invocation runs a full enter → operate → exit
//! session so the hardware is never left outside deactivated mode.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use light_injection::config::Settings;
use light_injection::controller::{DeviceSet, SystemController};
use light_injection::diagnostics::LogReporter;
use light_injection::metadata;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "light-injection", version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print configuration, software revision and live device settings.
    Status,
    /// Drive the whole assembly into deactivated mode.
    Deactivate,
    /// Fire a master-mode pulse train (this system generates the triggers).
    Master {
        /// Laser-head relay channel.
        #[arg(long)]
        channel: u32,
        /// Head intensity in percent (0.1 % resolution).
        #[arg(long)]
        intensity: f64,
        /// Fibre switch input position.
        #[arg(long)]
        input: u32,
        /// Fibre switch output position.
        #[arg(long)]
        output: u32,
        /// Number of trigger pulses to emit.
        #[arg(long, default_value_t = 100)]
        pulses: u32,
    },
    /// Arm the light path for an externally triggered window.
    Slave {
        /// Laser-head relay channel.
        #[arg(long)]
        channel: u32,
        /// Head intensity in percent (0.1 % resolution).
        #[arg(long)]
        intensity: f64,
        /// Fibre switch input position.
        #[arg(long)]
        input: u32,
        /// Fibre switch output position.
        #[arg(long)]
        output: u32,
        /// Window length in seconds.
        #[arg(long, default_value_t = 1.0)]
        window: f64,
    },
    /// Set the photomultiplier gain voltage.
    Gain {
        /// Gain voltage in volts.
        #[arg(long)]
        volts: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let settings = Settings::new(cli.config.as_deref())?;
    if !settings.dummy_mode {
        bail!(
            "no vendor bindings are linked into this binary; set dummy_mode = true \
             (or LIGHT_INJECTION__DUMMY_MODE=true) to run against simulated hardware"
        );
    }

    let devices = DeviceSet::simulated(&settings);
    let mut controller = SystemController::new(settings, devices, Box::new(LogReporter));

    controller.enter().await?;
    let operated = run_command(&mut controller, cli.command).await;
    let exited = controller.exit().await;

    operated?;
    exited?;
    Ok(())
}

async fn run_command(controller: &mut SystemController, command: Command) -> Result<()> {
    match command {
        Command::Status => {
            println!(
                "light-injection {} ({})",
                metadata::crate_version(),
                metadata::SoftwareRevision::current().id
            );
            println!("\nCONFIGURATION:\n{}", controller.settings());
            println!("{}", controller.snapshot().await?);
        }
        Command::Deactivate => {
            controller.deactivate().await?;
            println!("{}", controller.snapshot().await?);
        }
        Command::Master {
            channel,
            intensity,
            input,
            output,
            pulses,
        } => {
            controller
                .run_master_pulsing(channel, intensity, input, output, pulses)
                .await?;
            println!("{}", controller.snapshot().await?);
        }
        Command::Slave {
            channel,
            intensity,
            input,
            output,
            window,
        } => {
            if !window.is_finite() || window < 0.0 {
                bail!("window must be a non-negative number of seconds, got {window}");
            }
            controller
                .run_slave_pulsing(
                    channel,
                    intensity,
                    input,
                    output,
                    Duration::from_secs_f64(window),
                )
                .await?;
            println!("{}", controller.snapshot().await?);
        }
        Command::Gain { volts } => {
            controller.set_gain_voltage(volts).await?;
            println!("{}", controller.snapshot().await?);
        }
    }
    Ok(())
}
