//! System controller: device orchestration and the guaranteed safe-revert.
//!
//! The [`SystemController`] owns every device handle and is the only
//! component allowed to touch them. Each public operation validates the
//! current lifecycle state, drives the devices in a fixed order and, for
//! the bounded operations (master pulsing, slave pulsing, gain
//! adjustment), executes the mandatory revert-to-safe before returning:
//! on success, on partial failure and on hardware errors alike. When the
//! revert itself fails the controller escalates to
//! [`ControlError::UnsafeState`] and refuses all further operations.
//!
//! Operations are not reentrant: the controller is driven through
//! `&mut self`, so callers serialize, and the safety machine additionally
//! rejects a second bounded operation outright should one ever be left
//! outstanding.

use crate::config::Settings;
use crate::diagnostics::{DiagnosticsReporter, Severity};
use crate::error::{ControlError, ControlResult, Device};
use crate::hardware::capabilities::{
    ChannelSwitch, LaserEmitter, OpticalRouter, PulseMode, PulseSource, VoltageSource,
};
use crate::hardware::mock::{
    FaultPlan, MockChannelSwitch, MockLaser, MockOpticalRouter, MockPulseSource,
    MockVoltageSource,
};
use crate::metadata::SoftwareRevision;
use crate::safety::{emission_inhibited, ActiveMode, SafetyStateMachine, SystemState};
use crate::snapshot::StateSnapshot;
use chrono::Utc;
use log::{debug, info};
use std::time::Duration;
use tokio::time::sleep;

/// The boxed device handles a controller instance owns.
///
/// Real installations pass vendor-binding implementations of the
/// capability traits; dummy mode and tests use [`DeviceSet::simulated`].
pub struct DeviceSet {
    /// Optical fibre switch.
    pub router: Box<dyn OpticalRouter>,
    /// Laser-head relay switch.
    pub channel_switch: Box<dyn ChannelSwitch>,
    /// Photomultiplier gain-voltage source.
    pub voltage_source: Box<dyn VoltageSource>,
    /// Pulsed laser driver.
    pub laser: Box<dyn LaserEmitter>,
    /// Trigger-pulse generator, acquired as a scope per master-mode run.
    pub pulse_source: Box<dyn PulseSource>,
}

impl DeviceSet {
    /// Simulated backend for dummy mode.
    pub fn simulated(settings: &Settings) -> Self {
        Self::simulated_with_faults(settings, FaultPlan::new())
    }

    /// Simulated backend with scripted fault injection, for tests.
    pub fn simulated_with_faults(settings: &Settings, faults: FaultPlan) -> Self {
        Self {
            router: Box::new(MockOpticalRouter::new(
                faults.clone(),
                settings.fibre_switch.park_input,
                settings.fibre_switch.park_output,
            )),
            channel_switch: Box::new(MockChannelSwitch::new(faults.clone())),
            voltage_source: Box::new(MockVoltageSource::new(faults.clone())),
            laser: Box::new(MockLaser::new(faults.clone())),
            pulse_source: Box::new(MockPulseSource::new(faults, &settings.trigger)),
        }
    }
}

/// Convert a percentage to the laser's tenth-of-a-percent fine steps.
fn intensity_tenths(percent: f64) -> ControlResult<u16> {
    if !(0.0..=100.0).contains(&percent) {
        return Err(ControlError::InvalidArgument(format!(
            "intensity must be within 0..=100 %, got {percent}"
        )));
    }
    let tenths = percent * 10.0;
    if (tenths - tenths.round()).abs() > 1e-6 {
        return Err(ControlError::InvalidArgument(format!(
            "intensity resolution is 0.1 %, got {percent}"
        )));
    }
    Ok(tenths.round() as u16)
}

/// Orchestrates the light-injection hardware.
pub struct SystemController {
    settings: Settings,
    safety: SafetyStateMachine,
    diagnostics: Box<dyn DiagnosticsReporter>,
    router: Box<dyn OpticalRouter>,
    channel_switch: Box<dyn ChannelSwitch>,
    voltage_source: Box<dyn VoltageSource>,
    laser: Box<dyn LaserEmitter>,
    pulse_source: Box<dyn PulseSource>,
}

impl SystemController {
    /// Build a controller around an immutable configuration and a set of
    /// device handles. No hardware is touched until [`Self::enter`].
    pub fn new(
        settings: Settings,
        devices: DeviceSet,
        diagnostics: Box<dyn DiagnosticsReporter>,
    ) -> Self {
        Self {
            settings,
            safety: SafetyStateMachine::new(),
            diagnostics,
            router: devices.router,
            channel_switch: devices.channel_switch,
            voltage_source: devices.voltage_source,
            laser: devices.laser,
            pulse_source: devices.pulse_source,
        }
    }

    /// The configuration this controller was built with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SystemState {
        self.safety.state()
    }

    /// Whether a failed revert has made this instance refuse operations.
    pub fn is_defunct(&self) -> bool {
        self.safety.is_defunct()
    }

    /// Acquire every device handle and deactivate the assembly.
    ///
    /// Devices open in a fixed order (fibre router, channel switch,
    /// voltage source, laser emitter). If any open fails, the devices
    /// opened so far are released before the error propagates; no
    /// partially-open scope survives.
    pub async fn enter(&mut self) -> ControlResult<()> {
        self.safety.check_serviceable()?;
        if self.safety.state() != SystemState::Uninitialized {
            return Err(ControlError::InvalidState {
                operation: "enter",
                state: self.safety.state(),
            });
        }

        info!("acquiring device handles");
        if let Err(err) = self.acquire_all().await {
            let _ = self.release_all().await;
            self.report_failure(&err);
            return Err(err);
        }
        self.safety.mark_entered()?;

        if let Err(err) = self.deactivate().await {
            // Do not leave an entered scope behind a failed entry.
            let _ = self.release_all().await;
            self.safety.mark_exited();
            return Err(err);
        }
        Ok(())
    }

    /// Deactivate the assembly and release every device handle.
    ///
    /// Runs on every control-flow exit, including after a failed
    /// operation; calling it on an unentered controller is a no-op. A
    /// deactivation failure here is escalated to
    /// [`ControlError::UnsafeState`]: the hardware is being abandoned in a
    /// state we cannot vouch for.
    pub async fn exit(&mut self) -> ControlResult<()> {
        if self.safety.state() == SystemState::Uninitialized {
            return Ok(());
        }

        info!("releasing device handles");
        let deactivated = self.deactivate_sequence().await;
        let release_failure = self.release_all().await;

        if let Err(err) = deactivated {
            self.safety.poison();
            self.safety.mark_exited();
            let escalated = ControlError::UnsafeState {
                detail: format!("deactivation during exit failed: {err}"),
            };
            self.report_failure(&escalated);
            return Err(escalated);
        }

        self.safety.mark_exited();
        if let Some(err) = release_failure {
            self.report_failure(&err);
            return Err(err);
        }
        Ok(())
    }

    /// Drive the laser emitter to its safe state: soft-lock on,
    /// external-rising trigger mode, intensity zero. Idempotent.
    pub async fn go_safe(&mut self) -> ControlResult<()> {
        self.safety.check_serviceable()?;
        if self.safety.state() == SystemState::Uninitialized {
            return Err(ControlError::InvalidState {
                operation: "go safe",
                state: self.safety.state(),
            });
        }

        match self.laser_safe().await {
            Ok(()) => self.safety.mark_safe(),
            Err(err) => {
                self.report_failure(&err);
                Err(err)
            }
        }
    }

    /// Deactivate the whole assembly: laser safe, gain voltage zero,
    /// relay on the empty channel, fibre router parked. Idempotent.
    pub async fn deactivate(&mut self) -> ControlResult<()> {
        self.safety.check_serviceable()?;
        match self.safety.state() {
            SystemState::Deactivated | SystemState::Safe => {}
            state => {
                return Err(ControlError::InvalidState {
                    operation: "deactivate",
                    state,
                })
            }
        }

        match self.deactivate_sequence().await {
            Ok(()) => self.safety.mark_deactivated(),
            Err(err) => {
                self.report_failure(&err);
                Err(err)
            }
        }
    }

    /// Run a master-mode pulsing sequence: this system generates the
    /// trigger pulses for both the laser and the detector.
    ///
    /// Routes the relay to `channel`, sets and verifies the laser
    /// intensity, selects the fibre route, then emits exactly
    /// `pulse_count` triggers from a short-lived pulse-source scope. The
    /// assembly is driven back to safe before this returns, whatever
    /// happened in between.
    pub async fn run_master_pulsing(
        &mut self,
        channel: u32,
        intensity_pct: f64,
        router_input: u32,
        router_output: u32,
        pulse_count: u32,
    ) -> ControlResult<()> {
        self.safety.check_serviceable()?;
        let tenths = intensity_tenths(intensity_pct)?;
        self.safety.begin(ActiveMode::MasterPulsing)?;

        info!(
            "master pulsing: head {channel}, {intensity_pct:.1} %, route \
             {router_input}->{router_output}, {pulse_count} pulses"
        );
        let outcome = self
            .master_sequence(channel, tenths, router_input, router_output, pulse_count)
            .await;
        self.settle_active(outcome).await
    }

    /// Run a slave-mode pulsing window: an external system drives the
    /// triggers, we arm the hardware and hold the light path open for
    /// `window` before reverting to safe. A zero window is a legal no-op.
    pub async fn run_slave_pulsing(
        &mut self,
        channel: u32,
        intensity_pct: f64,
        router_input: u32,
        router_output: u32,
        window: Duration,
    ) -> ControlResult<()> {
        self.safety.check_serviceable()?;
        let tenths = intensity_tenths(intensity_pct)?;
        self.safety.begin(ActiveMode::SlavePulsing)?;

        info!(
            "slave pulsing: head {channel}, {intensity_pct:.1} %, route \
             {router_input}->{router_output}, window {window:?}"
        );
        let outcome = self
            .slave_sequence(channel, tenths, router_input, router_output, window)
            .await;
        self.settle_active(outcome).await
    }

    /// Set the photomultiplier gain voltage. Independent of the pulsing
    /// protocols; on failure the output is restored to its safe 0 V
    /// default before the error is surfaced.
    pub async fn set_gain_voltage(&mut self, volts: f64) -> ControlResult<()> {
        self.safety.check_serviceable()?;
        let max = self.settings.gain.max_voltage;
        if !(0.0..=max).contains(&volts) {
            return Err(ControlError::InvalidArgument(format!(
                "gain voltage must be within 0..={max} V, got {volts}"
            )));
        }
        self.safety.begin(ActiveMode::GainAdjust)?;

        info!("gain adjustment: {volts:.3} V");
        let outcome = self
            .voltage_source
            .set_voltage(volts)
            .await
            .map_err(|e| ControlError::hardware(Device::VoltageSource, e));

        match outcome {
            Ok(()) => {
                self.safety.settle_safe();
                Ok(())
            }
            Err(err) => {
                let restored = self
                    .voltage_source
                    .go_safe()
                    .await
                    .map_err(|e| ControlError::hardware(Device::VoltageSource, e));
                self.safety.settle_safe();
                match restored {
                    Ok(()) => {
                        self.report_failure(&err);
                        Err(err)
                    }
                    Err(restore_err) => {
                        self.safety.poison();
                        let escalated = ControlError::UnsafeState {
                            detail: format!(
                                "gain restore failed ({restore_err}) while handling: {err}"
                            ),
                        };
                        self.report_failure(&escalated);
                        Err(escalated)
                    }
                }
            }
        }
    }

    /// Poll every owned device for its live settings.
    ///
    /// Read-only: no device state is mutated.
    pub async fn snapshot(&self) -> ControlResult<StateSnapshot> {
        self.safety.check_serviceable()?;
        if self.safety.state() == SystemState::Uninitialized {
            return Err(ControlError::InvalidState {
                operation: "snapshot",
                state: self.safety.state(),
            });
        }

        let laser = |e| ControlError::hardware(Device::LaserEmitter, e);
        let soft_lock = self.laser.soft_lock().await.map_err(laser)?;
        let intensity = self.laser.intensity().await.map_err(laser)?;
        let pulse_mode = self.laser.pulse_mode().await.map_err(laser)?;
        let frequency_mode = self.laser.frequency_mode().await.map_err(laser)?;
        let firmware_version = self.laser.firmware_version().await.map_err(laser)?;

        let active_channel = self
            .channel_switch
            .active_channel()
            .await
            .map_err(|e| ControlError::hardware(Device::ChannelSwitch, e))?;
        let (router_input, router_output) = self
            .router
            .io_channels()
            .await
            .map_err(|e| ControlError::hardware(Device::OpticalRouter, e))?;
        let gain_voltage = self
            .voltage_source
            .voltage()
            .await
            .map_err(|e| ControlError::hardware(Device::VoltageSource, e))?;

        Ok(StateSnapshot {
            captured_at: Utc::now(),
            soft_lock,
            intensity_pct: f64::from(intensity) / 10.0,
            pulse_mode,
            frequency_mode,
            firmware_version,
            active_channel,
            router_input,
            router_output,
            gain_voltage,
            revision: SoftwareRevision::current(),
        })
    }

    // ------------------------------------------------------------------
    // Internal sequencing
    // ------------------------------------------------------------------

    /// Open every handle in the fixed acquisition order.
    async fn acquire_all(&mut self) -> ControlResult<()> {
        self.router
            .open()
            .await
            .map_err(|e| ControlError::acquisition(Device::OpticalRouter, e))?;
        self.channel_switch
            .open()
            .await
            .map_err(|e| ControlError::acquisition(Device::ChannelSwitch, e))?;
        self.voltage_source
            .open()
            .await
            .map_err(|e| ControlError::acquisition(Device::VoltageSource, e))?;
        self.laser
            .open()
            .await
            .map_err(|e| ControlError::acquisition(Device::LaserEmitter, e))?;

        let firmware = self
            .laser
            .firmware_version()
            .await
            .map_err(|e| ControlError::acquisition(Device::LaserEmitter, e))?;
        let head = self
            .laser
            .head_type()
            .await
            .map_err(|e| ControlError::acquisition(Device::LaserEmitter, e))?;
        info!("laser driver online: firmware {firmware}, head type {head}");
        Ok(())
    }

    /// Close every handle, reverse acquisition order, best effort.
    /// Closing an unopened handle is a no-op by contract.
    async fn release_all(&mut self) -> Option<ControlError> {
        let mut first_failure = None;
        let closes: [(Device, anyhow::Result<()>); 4] = [
            (Device::LaserEmitter, self.laser.close().await),
            (Device::VoltageSource, self.voltage_source.close().await),
            (Device::ChannelSwitch, self.channel_switch.close().await),
            (Device::OpticalRouter, self.router.close().await),
        ];
        for (device, result) in closes {
            if let Err(err) = result {
                debug!("failed to release {device}: {err:#}");
                if first_failure.is_none() {
                    first_failure = Some(ControlError::hardware(device, err));
                }
            }
        }
        first_failure
    }

    /// Laser to safe, classified.
    async fn laser_safe(&mut self) -> ControlResult<()> {
        self.laser
            .go_safe()
            .await
            .map_err(|e| ControlError::hardware(Device::LaserEmitter, e))
    }

    /// Full deactivation sequence, no safety bookkeeping.
    async fn deactivate_sequence(&mut self) -> ControlResult<()> {
        self.laser_safe().await?;
        self.voltage_source
            .go_safe()
            .await
            .map_err(|e| ControlError::hardware(Device::VoltageSource, e))?;
        self.channel_switch
            .go_safe()
            .await
            .map_err(|e| ControlError::hardware(Device::ChannelSwitch, e))?;
        self.router
            .park()
            .await
            .map_err(|e| ControlError::hardware(Device::OpticalRouter, e))?;
        Ok(())
    }

    /// Arm the light path: relay channel, verified intensity, fibre
    /// route, and finally release the soft-lock. From here on, trigger
    /// pulses produce light; callers must revert through
    /// [`Self::settle_active`].
    async fn arm_light_path(
        &mut self,
        channel: u32,
        tenths: u16,
        router_input: u32,
        router_output: u32,
    ) -> ControlResult<()> {
        self.channel_switch
            .set_active_channel(channel)
            .await
            .map_err(|e| ControlError::hardware(Device::ChannelSwitch, e))?;
        self.set_verified_intensity(tenths).await?;
        self.router
            .set_io_channels(router_input, router_output)
            .await
            .map_err(|e| ControlError::hardware(Device::OpticalRouter, e))?;
        self.laser
            .set_soft_lock(false)
            .await
            .map_err(|e| ControlError::hardware(Device::LaserEmitter, e))?;
        Ok(())
    }

    /// Write the intensity and verify it through the read-back contract.
    ///
    /// A non-zero intensity is only ever requested from a driver that
    /// reports pulsed mode; anything else is a hardware inconsistency,
    /// surfaced rather than corrected.
    async fn set_verified_intensity(&mut self, tenths: u16) -> ControlResult<()> {
        let laser = |e| ControlError::hardware(Device::LaserEmitter, e);

        if tenths > 0 {
            let mode = self.laser.pulse_mode().await.map_err(laser)?;
            if mode != PulseMode::Pulsed {
                return Err(ControlError::HardwareInconsistency {
                    device: Device::LaserEmitter,
                    detail: format!("pulse mode reads {mode}; refusing to raise intensity"),
                });
            }
        }

        self.laser.set_intensity(tenths).await.map_err(laser)?;
        let read_back = self.laser.intensity().await.map_err(laser)?;
        if read_back != tenths {
            return Err(ControlError::HardwareInconsistency {
                device: Device::LaserEmitter,
                detail: format!(
                    "intensity read back {:.1} % after writing {:.1} %",
                    f64::from(read_back) / 10.0,
                    f64::from(tenths) / 10.0
                ),
            });
        }
        Ok(())
    }

    async fn master_sequence(
        &mut self,
        channel: u32,
        tenths: u16,
        router_input: u32,
        router_output: u32,
        pulse_count: u32,
    ) -> ControlResult<()> {
        self.arm_light_path(channel, tenths, router_input, router_output)
            .await?;

        // Short-lived pulse-source scope; the close runs whether or not
        // the burst succeeded.
        self.pulse_source
            .open()
            .await
            .map_err(|e| ControlError::hardware(Device::PulseSource, e))?;
        let burst = self
            .pulse_source
            .generate_pulses(pulse_count)
            .await
            .map_err(|e| ControlError::hardware(Device::PulseSource, e));
        let closed = self
            .pulse_source
            .close()
            .await
            .map_err(|e| ControlError::hardware(Device::PulseSource, e));
        burst.and(closed)
    }

    async fn slave_sequence(
        &mut self,
        channel: u32,
        tenths: u16,
        router_input: u32,
        router_output: u32,
        window: Duration,
    ) -> ControlResult<()> {
        self.arm_light_path(channel, tenths, router_input, router_output)
            .await?;
        // The external trigger source drives the pulses; we just hold the
        // window open.
        sleep(window).await;
        Ok(())
    }

    /// Mandatory end of every bounded operation: revert the laser to
    /// safe, record the transition, and fold the revert result into the
    /// operation outcome. A failed revert wins over whatever the
    /// operation itself returned.
    async fn settle_active(&mut self, outcome: ControlResult<()>) -> ControlResult<()> {
        let reverted = match self.laser_safe().await {
            Ok(()) => self.verify_emission_inhibited().await,
            Err(err) => Err(err),
        };
        self.safety.settle_safe();

        match reverted {
            Ok(()) => match outcome {
                Ok(()) => Ok(()),
                Err(err) => {
                    self.report_failure(&err);
                    Err(err)
                }
            },
            Err(revert_err) => {
                self.safety.poison();
                let detail = match &outcome {
                    Ok(()) => format!("revert to safe failed: {revert_err}"),
                    Err(op_err) => {
                        format!("revert to safe failed ({revert_err}) while handling: {op_err}")
                    }
                };
                let escalated = ControlError::UnsafeState { detail };
                self.report_failure(&escalated);
                Err(escalated)
            }
        }
    }

    /// Confirm the interlock invariant on the live hardware.
    async fn verify_emission_inhibited(&self) -> ControlResult<()> {
        let laser = |e| ControlError::hardware(Device::LaserEmitter, e);
        let soft_lock = self.laser.soft_lock().await.map_err(laser)?;
        let intensity = self.laser.intensity().await.map_err(laser)?;
        if !emission_inhibited(soft_lock, intensity) {
            return Err(ControlError::HardwareInconsistency {
                device: Device::LaserEmitter,
                detail: format!(
                    "soft lock off with intensity {:.1} % after revert",
                    f64::from(intensity) / 10.0
                ),
            });
        }
        Ok(())
    }

    /// Surface a classified failure through the diagnostics seam exactly
    /// once. Everything goes out at warning severity except a failed
    /// revert, which is critical.
    fn report_failure(&self, err: &ControlError) {
        let severity = match err {
            ControlError::UnsafeState { .. } => Severity::Critical,
            _ => Severity::Warning,
        };
        self.diagnostics.report(severity, &format!("control error: {err}"));
    }
}
