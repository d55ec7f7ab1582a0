//! Safety state machine for the light-injection assembly.
//!
//! The hardware has no safe-by-default behaviour: an uncontrolled exit from
//! a pulsing sequence must not leave optical emission enabled. This module
//! is the single place that encodes "emission enabled" as a first-class,
//! checkable condition rather than an incidental combination of register
//! values. All transitions are guarded predicates; free-form mutation of
//! the system state is not possible from outside this module.
//!
//! State graph:
//!
//! ```text
//! Uninitialized --enter--> Deactivated
//! {Deactivated, Safe} --begin--> Active(mode)
//! Active(mode) --settle--> Safe          (mandatory, no failure path)
//! {Deactivated, Safe} --deactivate--> Deactivated
//! {Deactivated, Safe} --exit--> Uninitialized
//! ```
//!
//! When the mandatory revert to `Safe` cannot be executed on the hardware,
//! the machine still records `Safe` as the *intended* state and latches
//! itself defunct; every further operation is refused until the enclosing
//! scope is torn down.

use crate::error::{ControlError, ControlResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A bounded operation that temporarily takes the system out of `Safe`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActiveMode {
    /// This system generates the trigger pulses for laser and detector.
    MasterPulsing,
    /// An external system drives triggering; we only arm and wait.
    SlavePulsing,
    /// The photomultiplier gain voltage is being adjusted.
    GainAdjust,
}

impl fmt::Display for ActiveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActiveMode::MasterPulsing => "master pulsing",
            ActiveMode::SlavePulsing => "slave pulsing",
            ActiveMode::GainAdjust => "gain adjustment",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of the whole assembly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemState {
    /// No device handles acquired.
    Uninitialized,
    /// All devices acquired, laser soft-locked at zero intensity, gain
    /// voltage zeroed, relay on the empty channel, router parked.
    Deactivated,
    /// Laser soft-locked at zero intensity on the external-trigger mode;
    /// relay/router settings are not necessarily reset.
    Safe,
    /// A bounded operation is in progress.
    Active(ActiveMode),
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemState::Uninitialized => f.write_str("uninitialized"),
            SystemState::Deactivated => f.write_str("deactivated"),
            SystemState::Safe => f.write_str("safe"),
            SystemState::Active(mode) => write!(f, "active ({mode})"),
        }
    }
}

/// Guarded state machine enforcing the legal transition graph.
///
/// The machine holds no device references; it is a pure transition
/// evaluator over state reported to it by the controller.
#[derive(Debug, Clone)]
pub struct SafetyStateMachine {
    state: SystemState,
    defunct: bool,
}

impl SafetyStateMachine {
    pub const fn new() -> Self {
        Self {
            state: SystemState::Uninitialized,
            defunct: false,
        }
    }

    #[inline]
    pub const fn state(&self) -> SystemState {
        self.state
    }

    /// Whether a failed revert has made the machine refuse further work.
    #[inline]
    pub const fn is_defunct(&self) -> bool {
        self.defunct
    }

    /// Fail fast if the machine has been latched defunct.
    pub fn check_serviceable(&self) -> ControlResult<()> {
        if self.defunct {
            return Err(ControlError::UnsafeState {
                detail: "a previous revert to safe failed; the controller refuses further \
                         operations until it is exited"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// `Uninitialized -> Deactivated`, permitted only while entering.
    pub fn mark_entered(&mut self) -> ControlResult<()> {
        match self.state {
            SystemState::Uninitialized => {
                self.state = SystemState::Deactivated;
                Ok(())
            }
            state => Err(ControlError::InvalidState {
                operation: "enter",
                state,
            }),
        }
    }

    /// `{Deactivated, Safe} -> Active(mode)`.
    ///
    /// Rejects immediately, before any device traffic, if another bounded
    /// operation is outstanding or the controller was never entered.
    pub fn begin(&mut self, mode: ActiveMode) -> ControlResult<()> {
        match self.state {
            SystemState::Deactivated | SystemState::Safe => {
                self.state = SystemState::Active(mode);
                Ok(())
            }
            SystemState::Active(outstanding) => {
                Err(ControlError::ConcurrentOperation(outstanding))
            }
            state @ SystemState::Uninitialized => Err(ControlError::InvalidState {
                operation: "begin operation",
                state,
            }),
        }
    }

    /// `Active(_) -> Safe`, mandatory on every exit from a bounded
    /// operation. This transition has no failure path: when the hardware
    /// revert failed, `Safe` is still recorded as the intended state and
    /// the discrepancy is escalated through [`SafetyStateMachine::poison`].
    pub fn settle_safe(&mut self) {
        self.state = SystemState::Safe;
    }

    /// Record that the laser was driven safe outside a bounded operation.
    ///
    /// A deactivated system stays deactivated (the stricter state).
    pub fn mark_safe(&mut self) -> ControlResult<()> {
        match self.state {
            SystemState::Safe | SystemState::Active(_) => {
                self.state = SystemState::Safe;
                Ok(())
            }
            SystemState::Deactivated => Ok(()),
            state @ SystemState::Uninitialized => Err(ControlError::InvalidState {
                operation: "go safe",
                state,
            }),
        }
    }

    /// `{Deactivated, Safe} -> Deactivated`.
    pub fn mark_deactivated(&mut self) -> ControlResult<()> {
        match self.state {
            SystemState::Deactivated | SystemState::Safe => {
                self.state = SystemState::Deactivated;
                Ok(())
            }
            state => Err(ControlError::InvalidState {
                operation: "deactivate",
                state,
            }),
        }
    }

    /// `{Safe, Deactivated} -> Uninitialized`, only while exiting.
    ///
    /// Permitted even on a defunct machine so the enclosing scope can
    /// still release the hardware.
    pub fn mark_exited(&mut self) {
        self.state = SystemState::Uninitialized;
    }

    /// Latch the machine defunct after a failed revert to safe.
    pub fn poison(&mut self) {
        self.state = SystemState::Safe;
        self.defunct = true;
    }
}

impl Default for SafetyStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a reported soft-lock/intensity pair rules out optical emission.
///
/// This is the core interlock invariant: sustained, unlocked, non-zero
/// intensity is the only combination that permits emission.
#[inline]
pub const fn emission_inhibited(soft_lock: bool, intensity_tenths: u16) -> bool {
    soft_lock || intensity_tenths == 0
}
