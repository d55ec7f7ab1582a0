//! Application configuration.
//!
//! All startup parameters live in a single immutable [`Settings`] value:
//! defaults are compiled in, an optional TOML file overrides them, and
//! `LIGHT_INJECTION__*` environment variables override both. The value is
//! constructed once, validated, and passed explicitly into the controller's
//! constructor; nothing in the crate mutates configuration at runtime.
//!
//! ## Configuration Example
//!
//! ```toml
//! dummy_mode = true
//!
//! [laser]
//! device_id = 0
//! slot_id = 200
//!
//! [fibre_switch]
//! port_index = 0
//! baud_rate = 57600
//! settle = "100ms"
//! park_input = 5
//! park_output = 14
//!
//! [trigger]
//! frequency_hz = 1000.0
//! high_time = "500ns"
//! minimum_low_time = "100us"
//! ```

use crate::error::{ControlError, ControlResult};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Pulsed laser driver addressing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserSettings {
    /// USB device index of the laser driver mainframe.
    pub device_id: u8,
    /// Slot of the oscillator/intensity module within the mainframe.
    pub slot_id: u16,
}

impl Default for LaserSettings {
    fn default() -> Self {
        Self {
            device_id: 0,
            slot_id: 200,
        }
    }
}

/// Laser-head relay switch connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserSwitchSettings {
    /// Serial port index the relay switch answers on.
    pub port_index: u8,
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Time the relay needs to settle after switching heads.
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
}

impl Default for LaserSwitchSettings {
    fn default() -> Self {
        Self {
            port_index: 1,
            baud_rate: 57_600,
            settle: Duration::from_secs(30),
        }
    }
}

/// Optical fibre switch connection and park positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FibreSwitchSettings {
    /// Serial port index the fibre switch answers on.
    pub port_index: u8,
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Wait time after a routing command.
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
    /// Input position with no physical fibre attached.
    pub park_input: u32,
    /// Output position with no detector fibre attached.
    pub park_output: u32,
}

impl Default for FibreSwitchSettings {
    fn default() -> Self {
        Self {
            port_index: 0,
            baud_rate: 57_600,
            settle: Duration::from_millis(100),
            park_input: 5,
            park_output: 14,
        }
    }
}

/// Trigger-pulse generator timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSettings {
    /// Analog I/O unit the counter output lives on.
    pub device_name: String,
    /// Counter pin driving the trigger line.
    pub counter_pin: String,
    /// High time of each trigger pulse.
    #[serde(with = "humantime_serde")]
    pub high_time: Duration,
    /// Pulse repetition rate in Hz.
    pub frequency_hz: f64,
    /// Minimum low time between pulses.
    #[serde(with = "humantime_serde")]
    pub minimum_low_time: Duration,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            device_name: "Dev1".to_string(),
            counter_pin: "/Ctr0".to_string(),
            high_time: Duration::from_nanos(500),
            frequency_hz: 1000.0,
            minimum_low_time: Duration::from_micros(100),
        }
    }
}

/// Photomultiplier gain-voltage generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GainSettings {
    /// Analog I/O unit the gain output lives on.
    pub device_name: String,
    /// Analog-out pin carrying the gain voltage.
    pub output_pin: String,
    /// Samples written per voltage update.
    pub sample_count: u32,
    /// Sampling rate in Hz.
    pub sample_rate_hz: f64,
    /// Largest commandable gain voltage in volts.
    pub max_voltage: f64,
}

impl Default for GainSettings {
    fn default() -> Self {
        Self {
            device_name: "Dev1".to_string(),
            output_pin: "/ao0".to_string(),
            sample_count: 100,
            sample_rate_hz: 3000.0,
            max_voltage: 100.0,
        }
    }
}

/// Immutable startup parameters for the whole assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Route all device traffic to simulated hardware.
    pub dummy_mode: bool,
    /// Pulsed laser driver.
    pub laser: LaserSettings,
    /// Laser-head relay switch.
    pub laser_switch: LaserSwitchSettings,
    /// Optical fibre switch.
    pub fibre_switch: FibreSwitchSettings,
    /// Trigger-pulse generator.
    pub trigger: TriggerSettings,
    /// Gain-voltage source.
    pub gain: GainSettings,
}

impl Settings {
    /// Build settings from compiled-in defaults, an optional TOML file and
    /// `LIGHT_INJECTION__*` environment overrides, then validate them.
    pub fn new(config_path: Option<&str>) -> ControlResult<Self> {
        let defaults = Config::try_from(&Settings::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        let merged = builder
            .add_source(
                Environment::with_prefix("LIGHT_INJECTION")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = merged.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic validation beyond what parsing can catch.
    pub fn validate(&self) -> ControlResult<()> {
        if self.trigger.frequency_hz <= 0.0 {
            return Err(ControlError::Configuration(format!(
                "trigger frequency must be positive, got {} Hz",
                self.trigger.frequency_hz
            )));
        }

        let period = Duration::from_secs_f64(1.0 / self.trigger.frequency_hz);
        if self.trigger.high_time + self.trigger.minimum_low_time > period {
            return Err(ControlError::Configuration(format!(
                "trigger timing does not fit one period: high {:?} + low {:?} > {:?}",
                self.trigger.high_time, self.trigger.minimum_low_time, period
            )));
        }

        if self.gain.sample_count == 0 {
            return Err(ControlError::Configuration(
                "gain sample count must be non-zero".to_string(),
            ));
        }
        if self.gain.sample_rate_hz <= 0.0 {
            return Err(ControlError::Configuration(format!(
                "gain sample rate must be positive, got {} Hz",
                self.gain.sample_rate_hz
            )));
        }
        if self.gain.max_voltage <= 0.0 {
            return Err(ControlError::Configuration(format!(
                "maximum gain voltage must be positive, got {} V",
                self.gain.max_voltage
            )));
        }

        Ok(())
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = toml::to_string_pretty(self).map_err(|_| fmt::Error)?;
        f.write_str(&rendered)
    }
}
