//! Custom error types for the application.
//!
//! This module defines the primary error type, [`ControlError`], for the
//! entire crate. Every failure that can escape a public controller
//! operation is one of the closed set of variants below; vendor-binding
//! errors are classified at the controller boundary and never propagate
//! unwrapped. The taxonomy, from least to most severe:
//!
//! - **`Config` / `Configuration`**: file-level and semantic configuration
//!   problems, caught before any hardware is touched.
//! - **`InvalidArgument`**: a caller-supplied parameter is out of range.
//! - **`InvalidState`**: an operation was requested in a lifecycle state
//!   that does not permit it.
//! - **`Acquisition`**: a device failed to open while the controller was
//!   being entered; already-opened devices are rolled back first.
//! - **`HardwareInconsistency`**: the hardware reported a value that
//!   violates a core invariant (wrong pulse mode, failed read-back). Never
//!   silently corrected.
//! - **`HardwareOperation`**: a device call itself failed; the mandatory
//!   revert-to-safe has already run by the time this reaches the caller.
//! - **`ConcurrentOperation`**: an operation was requested while another
//!   bounded operation was outstanding; rejected before any device call.
//! - **`UnsafeState`**: the revert-to-safe step itself failed. The
//!   controller can no longer assert its own safety invariant and refuses
//!   further operations.

use crate::safety::{ActiveMode, SystemState};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type ControlResult<T> = std::result::Result<T, ControlError>;

/// Identifies the device family a hardware failure originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    /// The pulsed laser driver.
    LaserEmitter,
    /// The laser-head relay switch.
    ChannelSwitch,
    /// The optical fibre switch.
    OpticalRouter,
    /// The trigger-pulse generator.
    PulseSource,
    /// The photomultiplier gain-voltage source.
    VoltageSource,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Device::LaserEmitter => "laser emitter",
            Device::ChannelSwitch => "channel switch",
            Device::OpticalRouter => "optical router",
            Device::PulseSource => "pulse source",
            Device::VoltageSource => "voltage source",
        };
        f.write_str(name)
    }
}

/// Primary error type for the light-injection control system.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("configuration validation error: {0}")]
    Configuration(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("'{operation}' is not permitted while the system is {state}")]
    InvalidState {
        operation: &'static str,
        state: SystemState,
    },

    #[error("failed to acquire {device}: {detail}")]
    Acquisition { device: Device, detail: String },

    #[error("{device} reported an inconsistent state: {detail}")]
    HardwareInconsistency { device: Device, detail: String },

    #[error("{device} operation failed: {detail}")]
    HardwareOperation { device: Device, detail: String },

    #[error("operation rejected: {0} is already in progress")]
    ConcurrentOperation(ActiveMode),

    #[error("system safety can no longer be asserted: {detail}")]
    UnsafeState { detail: String },
}

impl ControlError {
    /// Classify a vendor-binding failure as a hardware-operation error.
    pub fn hardware(device: Device, source: anyhow::Error) -> Self {
        ControlError::HardwareOperation {
            device,
            detail: format!("{source:#}"),
        }
    }

    /// Classify a vendor-binding failure raised while opening a device.
    pub fn acquisition(device: Device, source: anyhow::Error) -> Self {
        ControlError::Acquisition {
            device,
            detail: format!("{source:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ControlError::HardwareOperation {
            device: Device::LaserEmitter,
            detail: "usb write failed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "laser emitter operation failed: usb write failed"
        );
    }

    #[test]
    fn test_concurrent_operation_display() {
        let err = ControlError::ConcurrentOperation(ActiveMode::MasterPulsing);
        assert!(err.to_string().contains("master pulsing"));
    }

    #[test]
    fn test_classification_keeps_device_identity() {
        let err = ControlError::hardware(Device::VoltageSource, anyhow::anyhow!("timeout"));
        match err {
            ControlError::HardwareOperation { device, detail } => {
                assert_eq!(device, Device::VoltageSource);
                assert!(detail.contains("timeout"));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }
}
