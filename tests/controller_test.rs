//! Integration tests driving the controller over simulated hardware.
//!
//! Every scenario keeps probe handles on the mock devices so the tests
//! can assert on register state after the controller has finished, in
//! particular that no failure path ever leaves the laser able to emit.

use light_injection::config::Settings;
use light_injection::controller::{DeviceSet, SystemController};
use light_injection::diagnostics::{MemoryReporter, Severity};
use light_injection::error::{ControlError, Device};
use light_injection::hardware::capabilities::{FrequencyMode, PulseMode};
use light_injection::hardware::mock::{
    FaultPlan, MockChannelSwitch, MockLaser, MockOpticalRouter, MockPulseSource,
    MockVoltageSource,
};
use light_injection::safety::SystemState;
use std::time::{Duration, Instant};

struct Rig {
    controller: SystemController,
    faults: FaultPlan,
    laser: MockLaser,
    switch: MockChannelSwitch,
    router: MockOpticalRouter,
    pulses: MockPulseSource,
    volts: MockVoltageSource,
    reporter: MemoryReporter,
}

/// Controller over simulated hardware, with probe handles kept out.
fn rig() -> Rig {
    let settings = Settings::default();
    let faults = FaultPlan::new();
    let laser = MockLaser::new(faults.clone());
    let switch = MockChannelSwitch::new(faults.clone());
    let router = MockOpticalRouter::new(
        faults.clone(),
        settings.fibre_switch.park_input,
        settings.fibre_switch.park_output,
    );
    let pulses = MockPulseSource::new(faults.clone(), &settings.trigger);
    let volts = MockVoltageSource::new(faults.clone());
    let reporter = MemoryReporter::new();

    let devices = DeviceSet {
        router: Box::new(router.clone()),
        channel_switch: Box::new(switch.clone()),
        voltage_source: Box::new(volts.clone()),
        laser: Box::new(laser.clone()),
        pulse_source: Box::new(pulses.clone()),
    };
    let controller = SystemController::new(settings, devices, Box::new(reporter.clone()));

    Rig {
        controller,
        faults,
        laser,
        switch,
        router,
        pulses,
        volts,
        reporter,
    }
}

#[tokio::test]
async fn enter_leaves_everything_deactivated() {
    let mut rig = rig();
    rig.controller.enter().await.unwrap();
    assert_eq!(rig.controller.state(), SystemState::Deactivated);

    let snapshot = rig.controller.snapshot().await.unwrap();
    assert!(snapshot.soft_lock);
    assert_eq!(snapshot.intensity_pct, 0.0);
    assert_eq!(snapshot.frequency_mode, FrequencyMode::ExternalRising);
    assert_eq!(snapshot.pulse_mode, PulseMode::Pulsed);
    assert_eq!(snapshot.active_channel, 0);
    assert_eq!((snapshot.router_input, snapshot.router_output), (5, 14));
    assert_eq!(snapshot.gain_voltage, 0.0);
}

#[tokio::test]
async fn acquisition_failure_rolls_back_opened_devices() {
    let mut rig = rig();
    rig.faults.fail("voltage.open");

    let err = rig.controller.enter().await.unwrap_err();
    match err {
        ControlError::Acquisition { device, .. } => {
            assert_eq!(device, Device::VoltageSource)
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // No partially-open scope survives: the router and relay switch were
    // opened before the failure and must have been released again.
    assert_eq!(rig.controller.state(), SystemState::Uninitialized);
    assert!(!rig.router.is_open().await);
    assert!(!rig.switch.is_open().await);
    assert!(!rig.laser.is_open().await);
}

#[tokio::test]
async fn master_pulsing_emits_exact_count_and_reverts() {
    let mut rig = rig();
    rig.controller.enter().await.unwrap();
    rig.controller
        .run_master_pulsing(2, 5.0, 1, 3, 100)
        .await
        .unwrap();

    assert_eq!(rig.controller.state(), SystemState::Safe);
    assert_eq!(rig.pulses.total_emitted().await, 100);
    assert!(!rig.pulses.is_open().await);

    let snapshot = rig.controller.snapshot().await.unwrap();
    assert!(snapshot.soft_lock);
    assert_eq!(snapshot.intensity_pct, 0.0);
    assert_eq!(snapshot.frequency_mode, FrequencyMode::ExternalRising);
    // Safe mode relocks the laser but does not reset the routing.
    assert_eq!(snapshot.active_channel, 2);
    assert_eq!((snapshot.router_input, snapshot.router_output), (1, 3));
}

#[tokio::test]
async fn slave_pulsing_with_zero_window_returns_promptly() {
    let mut rig = rig();
    rig.controller.enter().await.unwrap();

    let started = Instant::now();
    rig.controller
        .run_slave_pulsing(1, 10.0, 2, 4, Duration::ZERO)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(rig.controller.state(), SystemState::Safe);
    let snapshot = rig.controller.snapshot().await.unwrap();
    assert!(snapshot.soft_lock);
    assert_eq!(snapshot.intensity_pct, 0.0);
}

#[tokio::test]
async fn soft_lock_implies_zero_intensity_after_every_operation() {
    let mut rig = rig();
    rig.controller.enter().await.unwrap();

    rig.controller
        .run_master_pulsing(1, 2.5, 1, 3, 10)
        .await
        .unwrap();
    let after_master = rig.controller.snapshot().await.unwrap();
    assert!(after_master.soft_lock && after_master.intensity_pct == 0.0);

    rig.controller
        .run_slave_pulsing(2, 7.5, 2, 4, Duration::from_millis(10))
        .await
        .unwrap();
    let after_slave = rig.controller.snapshot().await.unwrap();
    assert!(after_slave.soft_lock && after_slave.intensity_pct == 0.0);

    rig.controller.set_gain_voltage(12.5).await.unwrap();
    let after_gain = rig.controller.snapshot().await.unwrap();
    assert!(after_gain.soft_lock && after_gain.intensity_pct == 0.0);

    rig.controller.deactivate().await.unwrap();
    let after_deactivate = rig.controller.snapshot().await.unwrap();
    assert!(after_deactivate.soft_lock && after_deactivate.intensity_pct == 0.0);
}

#[tokio::test]
async fn router_failure_mid_sequence_still_reverts_to_safe() {
    let mut rig = rig();
    rig.controller.enter().await.unwrap();
    rig.faults.fail("router.set_io");

    let err = rig
        .controller
        .run_master_pulsing(2, 5.0, 1, 3, 50)
        .await
        .unwrap_err();
    match err {
        ControlError::HardwareOperation { device, .. } => {
            assert_eq!(device, Device::OpticalRouter)
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The remaining setup steps were skipped, the revert still ran.
    assert_eq!(rig.controller.state(), SystemState::Safe);
    assert_eq!(rig.pulses.total_emitted().await, 0);
    assert!(rig.laser.is_soft_locked().await);
    assert_eq!(rig.laser.commanded_intensity().await, 0);
}

#[tokio::test]
async fn pulse_burst_failure_closes_the_scope_and_reverts() {
    let mut rig = rig();
    rig.controller.enter().await.unwrap();
    rig.faults.fail("pulse.generate");

    let err = rig
        .controller
        .run_master_pulsing(2, 5.0, 1, 3, 50)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControlError::HardwareOperation {
            device: Device::PulseSource,
            ..
        }
    ));

    assert!(!rig.pulses.is_open().await);
    assert_eq!(rig.controller.state(), SystemState::Safe);
    assert!(rig.laser.is_soft_locked().await);
}

#[tokio::test]
async fn continuous_pulse_mode_blocks_intensity() {
    let mut rig = rig();
    rig.controller.enter().await.unwrap();
    rig.laser.force_pulse_mode(PulseMode::Continuous).await;

    let err = rig
        .controller
        .run_master_pulsing(2, 5.0, 1, 3, 10)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControlError::HardwareInconsistency {
            device: Device::LaserEmitter,
            ..
        }
    ));

    // The inconsistency was surfaced before any intensity was written.
    assert_eq!(rig.laser.commanded_intensity().await, 0);
    assert_eq!(rig.controller.state(), SystemState::Safe);
}

#[tokio::test]
async fn intensity_readback_mismatch_is_an_inconsistency() {
    let mut rig = rig();
    rig.controller.enter().await.unwrap();
    rig.laser.skew_intensity_readback(1).await;

    let err = rig
        .controller
        .run_master_pulsing(2, 5.0, 1, 3, 10)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControlError::HardwareInconsistency {
            device: Device::LaserEmitter,
            ..
        }
    ));
    assert_eq!(rig.controller.state(), SystemState::Safe);
    assert!(rig.laser.is_soft_locked().await);
}

#[tokio::test]
async fn deactivate_is_idempotent() {
    let mut rig = rig();
    rig.controller.enter().await.unwrap();

    // Diverge from the deactivated settings first.
    rig.controller.set_gain_voltage(25.0).await.unwrap();
    rig.controller
        .run_master_pulsing(2, 5.0, 1, 3, 10)
        .await
        .unwrap();

    rig.controller.deactivate().await.unwrap();
    let first = rig.controller.snapshot().await.unwrap();
    rig.controller.deactivate().await.unwrap();
    let second = rig.controller.snapshot().await.unwrap();

    assert!(first.same_settings(&second));
    assert_eq!(first.active_channel, 0);
    assert_eq!((first.router_input, first.router_output), (5, 14));
    assert_eq!(first.gain_voltage, 0.0);
}

#[tokio::test]
async fn gain_failure_restores_the_safe_default() {
    let mut rig = rig();
    rig.controller.enter().await.unwrap();
    // Raise the output first so the restore is observable.
    rig.controller.set_gain_voltage(30.0).await.unwrap();
    rig.faults.fail_once("voltage.set");

    let err = rig.controller.set_gain_voltage(50.0).await.unwrap_err();
    assert!(matches!(
        err,
        ControlError::HardwareOperation {
            device: Device::VoltageSource,
            ..
        }
    ));

    assert_eq!(rig.volts.current_voltage().await, 0.0);
    assert_eq!(rig.controller.state(), SystemState::Safe);
}

#[tokio::test]
async fn gain_restore_failure_escalates_to_unsafe_state() {
    let mut rig = rig();
    rig.controller.enter().await.unwrap();
    rig.faults.fail("voltage.set");

    let err = rig.controller.set_gain_voltage(50.0).await.unwrap_err();
    assert!(matches!(err, ControlError::UnsafeState { .. }));
    assert!(rig.controller.is_defunct());
}

#[tokio::test]
async fn gain_success_latches_the_requested_voltage() {
    let mut rig = rig();
    rig.controller.enter().await.unwrap();
    rig.controller.set_gain_voltage(50.0).await.unwrap();

    assert_eq!(rig.volts.current_voltage().await, 50.0);
    assert_eq!(rig.controller.state(), SystemState::Safe);
    let snapshot = rig.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.gain_voltage, 50.0);
}

#[tokio::test]
async fn out_of_range_gain_is_rejected_without_device_traffic() {
    let mut rig = rig();
    rig.controller.enter().await.unwrap();

    let err = rig.controller.set_gain_voltage(1000.0).await.unwrap_err();
    assert!(matches!(err, ControlError::InvalidArgument(_)));
    assert_eq!(rig.controller.state(), SystemState::Deactivated);
    assert_eq!(rig.volts.current_voltage().await, 0.0);
}

#[tokio::test]
async fn invalid_intensity_is_rejected_before_any_device_call() {
    let mut rig = rig();
    rig.controller.enter().await.unwrap();

    let err = rig
        .controller
        .run_master_pulsing(2, 100.05, 1, 3, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::InvalidArgument(_)));
    assert_eq!(rig.controller.state(), SystemState::Deactivated);
    assert_eq!(rig.switch.current_channel().await, 0);
}

#[tokio::test]
async fn failed_revert_latches_the_controller_defunct() {
    let mut rig = rig();
    rig.controller.enter().await.unwrap();
    // The relock during the revert uses the same register write as the
    // unlock, so this makes both the operation and the revert fail.
    rig.faults.fail("laser.set_soft_lock");

    let err = rig
        .controller
        .run_master_pulsing(2, 5.0, 1, 3, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::UnsafeState { .. }));
    assert!(rig.controller.is_defunct());

    // Every further operation is refused without touching hardware.
    let err = rig.controller.set_gain_voltage(10.0).await.unwrap_err();
    assert!(matches!(err, ControlError::UnsafeState { .. }));
    assert!(rig.controller.snapshot().await.is_err());

    // The failure went out at the highest severity.
    assert!(rig
        .reporter
        .entries()
        .iter()
        .any(|(severity, _)| *severity == Severity::Critical));

    // Exit still releases the hardware even though it reports the
    // unsafe teardown.
    let err = rig.controller.exit().await.unwrap_err();
    assert!(matches!(err, ControlError::UnsafeState { .. }));
    assert!(!rig.laser.is_open().await);
    assert!(!rig.router.is_open().await);
}

#[tokio::test]
async fn device_failures_are_reported_at_warning_severity() {
    let mut rig = rig();
    rig.controller.enter().await.unwrap();
    rig.faults.fail("router.set_io");

    let _ = rig.controller.run_master_pulsing(2, 5.0, 1, 3, 10).await;

    let entries = rig.reporter.entries();
    assert!(entries
        .iter()
        .any(|(severity, message)| *severity == Severity::Warning
            && message.contains("optical router")));
}

#[tokio::test]
async fn exit_releases_every_handle_after_a_failed_operation() {
    let mut rig = rig();
    rig.controller.enter().await.unwrap();
    rig.faults.fail("pulse.generate");
    let _ = rig.controller.run_master_pulsing(2, 5.0, 1, 3, 10).await;
    rig.faults.clear("pulse.generate");

    rig.controller.exit().await.unwrap();
    assert_eq!(rig.controller.state(), SystemState::Uninitialized);
    assert!(!rig.laser.is_open().await);
    assert!(!rig.volts.is_open().await);
    assert!(!rig.switch.is_open().await);
    assert!(!rig.router.is_open().await);

    // Exit deactivated the assembly before releasing it.
    assert!(rig.laser.is_soft_locked().await);
    assert_eq!(rig.router.current_route().await, (5, 14));
}

#[tokio::test]
async fn operations_before_enter_are_rejected() {
    let mut rig = rig();
    let err = rig
        .controller
        .run_master_pulsing(2, 5.0, 1, 3, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::InvalidState { .. }));
    assert!(rig.controller.snapshot().await.is_err());
}

#[tokio::test]
async fn exit_without_enter_is_a_noop() {
    let mut rig = rig();
    rig.controller.exit().await.unwrap();
    assert_eq!(rig.controller.state(), SystemState::Uninitialized);
}

#[tokio::test]
async fn simulated_device_set_runs_a_full_session() {
    let settings = Settings::default();
    let devices = DeviceSet::simulated(&settings);
    let mut controller =
        SystemController::new(settings, devices, Box::new(MemoryReporter::new()));

    controller.enter().await.unwrap();
    controller
        .run_master_pulsing(1, 1.0, 1, 2, 5)
        .await
        .unwrap();
    controller.exit().await.unwrap();
    assert_eq!(controller.state(), SystemState::Uninitialized);
}
