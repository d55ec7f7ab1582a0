//! Structured state reports.
//!
//! A [`StateSnapshot`] is the machine-readable answer to "what is the
//! hardware doing right now": every owned device is polled for its live
//! settings and the result is returned as an immutable value. Snapshots
//! are used both for operator diagnostics (via the `Display` rendering)
//! and for test assertions, so the fields are plain data rather than a
//! formatted string.

use crate::hardware::capabilities::{FrequencyMode, PulseMode};
use crate::metadata::SoftwareRevision;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable report of the live device settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// UTC timestamp the devices were polled.
    pub captured_at: DateTime<Utc>,
    /// Laser soft-lock interlock state.
    pub soft_lock: bool,
    /// Laser head intensity in percent.
    pub intensity_pct: f64,
    /// Firmware-reported pulse mode.
    pub pulse_mode: PulseMode,
    /// Selected frequency/trigger mode.
    pub frequency_mode: FrequencyMode,
    /// Laser driver firmware version.
    pub firmware_version: String,
    /// Laser-head relay channel currently routed.
    pub active_channel: u32,
    /// Fibre switch input position.
    pub router_input: u32,
    /// Fibre switch output position.
    pub router_output: u32,
    /// Latched photomultiplier gain voltage in volts.
    pub gain_voltage: f64,
    /// Source-control revision of the running software.
    pub revision: SoftwareRevision,
}

impl StateSnapshot {
    /// Whether two snapshots report identical hardware settings,
    /// ignoring when they were captured.
    pub fn same_settings(&self, other: &Self) -> bool {
        self.soft_lock == other.soft_lock
            && self.intensity_pct == other.intensity_pct
            && self.pulse_mode == other.pulse_mode
            && self.frequency_mode == other.frequency_mode
            && self.firmware_version == other.firmware_version
            && self.active_channel == other.active_channel
            && self.router_input == other.router_input
            && self.router_output == other.router_output
            && self.gain_voltage == other.gain_voltage
    }
}

impl fmt::Display for StateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Light-injection system state ({})", self.captured_at)?;
        writeln!(
            f,
            "  revision       : {} (dirty: {})",
            self.revision.id, self.revision.dirty
        )?;
        writeln!(
            f,
            "  soft lock      : {}",
            if self.soft_lock { "on" } else { "off" }
        )?;
        writeln!(f, "  intensity      : {:.1} %", self.intensity_pct)?;
        writeln!(f, "  pulse mode     : {}", self.pulse_mode)?;
        writeln!(f, "  frequency mode : {}", self.frequency_mode)?;
        writeln!(f, "  firmware       : {}", self.firmware_version)?;
        writeln!(f, "  laser channel  : {}", self.active_channel)?;
        writeln!(
            f,
            "  fibre route    : {} -> {}",
            self.router_input, self.router_output
        )?;
        write!(f, "  gain voltage   : {:.3} V", self.gain_voltage)
    }
}
