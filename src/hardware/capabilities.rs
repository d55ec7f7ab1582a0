//! Capability traits for the five device families.
//!
//! These are the only contracts the controller knows. Every method returns
//! `anyhow::Result` at this seam; failures are classified into the crate's
//! closed error taxonomy at the controller boundary. All traits are object
//! safe so the controller can own boxed handles chosen at startup (real
//! vendor bindings or the simulated backend).
//!
//! `close()` must be safe to call on a handle whose `open()` failed or
//! never ran: closing an already-closed handle is a no-op, not an error.
//! Opening an already-open handle is an error.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Firmware-reported pulse mode of the laser driver.
///
/// The driver must *always* run pulsed; a reading of `Continuous` is a
/// hardware inconsistency, never something to correct silently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PulseMode {
    /// Continuous-wave emission (never legal for this assembly).
    Continuous,
    /// Triggered pulse emission.
    Pulsed,
}

impl PulseMode {
    /// Convert from the vendor code. Returns `None` for invalid values.
    #[inline]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Continuous),
            1 => Some(Self::Pulsed),
            _ => None,
        }
    }

    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for PulseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PulseMode::Continuous => f.write_str("continuous"),
            PulseMode::Pulsed => f.write_str("pulsed"),
        }
    }
}

/// Laser driver frequency/trigger mode register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrequencyMode {
    /// Internal oscillator, 80 MHz.
    Internal80Mhz = 0,
    /// Internal oscillator, 40 MHz.
    Internal40Mhz = 1,
    /// Internal oscillator, 20 MHz.
    Internal20Mhz = 2,
    /// Internal oscillator, 10 MHz.
    Internal10Mhz = 3,
    /// Internal oscillator, 5 MHz.
    Internal5Mhz = 4,
    /// Internal oscillator, 2.5 MHz.
    Internal2_5Mhz = 5,
    /// External trigger, rising edge. The designated safe default.
    ExternalRising = 6,
    /// External trigger, falling edge.
    ExternalFalling = 7,
}

impl FrequencyMode {
    /// Convert from the vendor code. Returns `None` for invalid values.
    #[inline]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Internal80Mhz),
            1 => Some(Self::Internal40Mhz),
            2 => Some(Self::Internal20Mhz),
            3 => Some(Self::Internal10Mhz),
            4 => Some(Self::Internal5Mhz),
            5 => Some(Self::Internal2_5Mhz),
            6 => Some(Self::ExternalRising),
            7 => Some(Self::ExternalFalling),
            _ => None,
        }
    }

    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Whether pulsing is driven by an external trigger line.
    #[inline]
    pub const fn is_external(self) -> bool {
        matches!(self, Self::ExternalRising | Self::ExternalFalling)
    }
}

impl fmt::Display for FrequencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrequencyMode::Internal80Mhz => "internal 80 MHz",
            FrequencyMode::Internal40Mhz => "internal 40 MHz",
            FrequencyMode::Internal20Mhz => "internal 20 MHz",
            FrequencyMode::Internal10Mhz => "internal 10 MHz",
            FrequencyMode::Internal5Mhz => "internal 5 MHz",
            FrequencyMode::Internal2_5Mhz => "internal 2.5 MHz",
            FrequencyMode::ExternalRising => "external trigger, rising edge",
            FrequencyMode::ExternalFalling => "external trigger, falling edge",
        };
        f.write_str(name)
    }
}

/// The pulsed laser driver.
///
/// Intensity is carried in tenths of a percent (fine steps, 0..=1000) so
/// read-back comparisons are exact at the hardware's 0.1 % resolution.
#[async_trait]
pub trait LaserEmitter: Send + Sync {
    /// Open the hardware connection and map the driver's modules.
    async fn open(&mut self) -> Result<()>;

    /// Release the hardware connection.
    async fn close(&mut self) -> Result<()>;

    /// Engage or release the firmware soft-lock interlock.
    async fn set_soft_lock(&mut self, locked: bool) -> Result<()>;

    /// Poll the soft-lock state.
    async fn soft_lock(&self) -> Result<bool>;

    /// Set the head intensity in tenths of a percent (0..=1000).
    async fn set_intensity(&mut self, tenths: u16) -> Result<()>;

    /// Poll the head intensity in tenths of a percent.
    async fn intensity(&self) -> Result<u16>;

    /// Select the frequency/trigger mode.
    async fn set_frequency_mode(&mut self, mode: FrequencyMode) -> Result<()>;

    /// Poll the frequency/trigger mode.
    async fn frequency_mode(&self) -> Result<FrequencyMode>;

    /// Poll the firmware-reported pulse mode.
    async fn pulse_mode(&self) -> Result<PulseMode>;

    /// Poll the attached laser-head type code.
    async fn head_type(&self) -> Result<u8>;

    /// Firmware version string of the driver mainframe.
    async fn firmware_version(&self) -> Result<String>;

    /// Drive the emitter to its safe state: soft-lock on, external-rising
    /// trigger mode, intensity zero. Idempotent.
    async fn go_safe(&mut self) -> Result<()> {
        self.set_soft_lock(true).await?;
        self.set_frequency_mode(FrequencyMode::ExternalRising).await?;
        self.set_intensity(0).await?;
        Ok(())
    }
}

/// The laser-head relay switch.
#[async_trait]
pub trait ChannelSwitch: Send + Sync {
    /// Open the serial connection to the relay unit.
    async fn open(&mut self) -> Result<()>;

    /// Release the serial connection.
    async fn close(&mut self) -> Result<()>;

    /// Route the driver output to the given head channel. Channel 0 has no
    /// laser head attached.
    async fn set_active_channel(&mut self, channel: u32) -> Result<()>;

    /// Poll the currently routed head channel.
    async fn active_channel(&self) -> Result<u32>;

    /// Park the relay on the empty channel. Idempotent.
    async fn go_safe(&mut self) -> Result<()> {
        self.set_active_channel(0).await
    }
}

/// The optical fibre switch.
#[async_trait]
pub trait OpticalRouter: Send + Sync {
    /// Open the serial connection to the fibre switch.
    async fn open(&mut self) -> Result<()>;

    /// Release the serial connection.
    async fn close(&mut self) -> Result<()>;

    /// Select the input and output fibre positions.
    async fn set_io_channels(&mut self, input: u32, output: u32) -> Result<()>;

    /// Poll the selected `(input, output)` fibre positions.
    async fn io_channels(&self) -> Result<(u32, u32)>;

    /// Route to the park positions with no fibre attached. The positions
    /// are fixed per installation and configured on the concrete handle.
    async fn park(&mut self) -> Result<()>;
}

/// The trigger-pulse generator.
///
/// Acquired as a short-lived scope around each master-mode run; the
/// generator hardware, not the caller, drives pulse timing.
#[async_trait]
pub trait PulseSource: Send + Sync {
    /// Reserve the counter output.
    async fn open(&mut self) -> Result<()>;

    /// Release the counter output.
    async fn close(&mut self) -> Result<()>;

    /// Emit exactly `count` trigger pulses, blocking until the train has
    /// finished.
    async fn generate_pulses(&mut self, count: u32) -> Result<()>;
}

/// The photomultiplier gain-voltage source.
#[async_trait]
pub trait VoltageSource: Send + Sync {
    /// Reserve the analog output.
    async fn open(&mut self) -> Result<()>;

    /// Release the analog output.
    async fn close(&mut self) -> Result<()>;

    /// Drive the output to `volts`, blocking until the level is latched.
    async fn set_voltage(&mut self, volts: f64) -> Result<()>;

    /// Poll the latched output voltage.
    async fn voltage(&self) -> Result<f64>;

    /// Restore the safe 0 V default. Idempotent.
    async fn go_safe(&mut self) -> Result<()> {
        self.set_voltage(0.0).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_mode_codes_round_trip() {
        for code in 0..=7u8 {
            let mode = FrequencyMode::from_code(code).unwrap();
            assert_eq!(mode.code(), code);
        }
        assert!(FrequencyMode::from_code(8).is_none());
    }

    #[test]
    fn external_modes_are_flagged() {
        assert!(FrequencyMode::ExternalRising.is_external());
        assert!(FrequencyMode::ExternalFalling.is_external());
        assert!(!FrequencyMode::Internal80Mhz.is_external());
    }

    #[test]
    fn pulse_mode_codes() {
        assert_eq!(PulseMode::from_code(0), Some(PulseMode::Continuous));
        assert_eq!(PulseMode::from_code(1), Some(PulseMode::Pulsed));
        assert!(PulseMode::from_code(2).is_none());
        assert_eq!(PulseMode::Pulsed.code(), 1);
    }
}
