//! Simulated hardware implementations.
//!
//! Provides simulated devices for every family so the assembly can run
//! without physical hardware (dummy mode) and so tests can drive the
//! controller through failure scenarios. All simulated devices use
//! async-safe timing (`tokio::time::sleep`, never `std::thread::sleep`)
//! and share a [`FaultPlan`] for scripted per-operation fault injection.
//!
//! Every mock is cheaply cloneable; clones share the same underlying
//! registers, so a test can keep a probe handle while the controller owns
//! the boxed device.

use crate::config::TriggerSettings;
use crate::hardware::capabilities::{
    ChannelSwitch, FrequencyMode, LaserEmitter, OpticalRouter, PulseMode, PulseSource,
    VoltageSource,
};
use anyhow::{bail, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};

use async_trait::async_trait;

/// Scripted fault injection shared across the simulated devices.
///
/// Operations are addressed by the string keys documented on each mock
/// method. Once an operation is marked failing, every call fails until
/// the mark is cleared.
#[derive(Clone, Debug, Default)]
pub struct FaultPlan {
    failing: Arc<Mutex<HashSet<String>>>,
    failing_once: Arc<Mutex<HashSet<String>>>,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call of `operation` fail.
    pub fn fail(&self, operation: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(operation.to_string());
        }
    }

    /// Make only the next call of `operation` fail.
    pub fn fail_once(&self, operation: &str) {
        if let Ok(mut failing) = self.failing_once.lock() {
            failing.insert(operation.to_string());
        }
    }

    /// Let `operation` succeed again.
    pub fn clear(&self, operation: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(operation);
        }
        if let Ok(mut failing) = self.failing_once.lock() {
            failing.remove(operation);
        }
    }

    fn trip(&self, operation: &str) -> Result<()> {
        let tripped_once = self
            .failing_once
            .lock()
            .map(|mut failing| failing.remove(operation))
            .unwrap_or(false);
        let armed = self
            .failing
            .lock()
            .map(|failing| failing.contains(operation))
            .unwrap_or(false);
        if tripped_once || armed {
            bail!("injected fault on {operation}");
        }
        Ok(())
    }
}

// =============================================================================
// MockLaser - simulated pulsed laser driver
// =============================================================================

#[derive(Debug)]
struct LaserRegisters {
    open: bool,
    soft_lock: bool,
    intensity: u16,
    frequency_mode: FrequencyMode,
    pulse_mode: PulseMode,
    head_type: u8,
    /// Added to every intensity reading; lets tests break read-back.
    readback_skew: i32,
}

/// Simulated pulsed laser driver.
///
/// Powers on soft-locked at zero intensity in the external-rising trigger
/// mode, reporting pulsed mode. Fault keys: `laser.open`, `laser.close`,
/// `laser.set_soft_lock`, `laser.set_intensity`, `laser.set_frequency_mode`.
#[derive(Clone, Debug)]
pub struct MockLaser {
    registers: Arc<RwLock<LaserRegisters>>,
    faults: FaultPlan,
}

impl MockLaser {
    pub fn new(faults: FaultPlan) -> Self {
        Self {
            registers: Arc::new(RwLock::new(LaserRegisters {
                open: false,
                soft_lock: true,
                intensity: 0,
                frequency_mode: FrequencyMode::ExternalRising,
                pulse_mode: PulseMode::Pulsed,
                head_type: 1,
                readback_skew: 0,
            })),
            faults,
        }
    }

    /// Pretend the firmware dropped into a different pulse mode.
    pub async fn force_pulse_mode(&self, mode: PulseMode) {
        self.registers.write().await.pulse_mode = mode;
    }

    /// Make intensity readings disagree with what was written.
    pub async fn skew_intensity_readback(&self, skew: i32) {
        self.registers.write().await.readback_skew = skew;
    }

    pub async fn is_open(&self) -> bool {
        self.registers.read().await.open
    }

    pub async fn is_soft_locked(&self) -> bool {
        self.registers.read().await.soft_lock
    }

    /// Commanded intensity register, bypassing read-back skew.
    pub async fn commanded_intensity(&self) -> u16 {
        self.registers.read().await.intensity
    }
}

#[async_trait]
impl LaserEmitter for MockLaser {
    async fn open(&mut self) -> Result<()> {
        self.faults.trip("laser.open")?;
        let mut regs = self.registers.write().await;
        if regs.open {
            bail!("laser connection is already open");
        }
        regs.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.faults.trip("laser.close")?;
        self.registers.write().await.open = false;
        Ok(())
    }

    async fn set_soft_lock(&mut self, locked: bool) -> Result<()> {
        self.faults.trip("laser.set_soft_lock")?;
        let mut regs = self.registers.write().await;
        if !regs.open {
            bail!("laser connection is not open");
        }
        regs.soft_lock = locked;
        Ok(())
    }

    async fn soft_lock(&self) -> Result<bool> {
        Ok(self.registers.read().await.soft_lock)
    }

    async fn set_intensity(&mut self, tenths: u16) -> Result<()> {
        self.faults.trip("laser.set_intensity")?;
        let mut regs = self.registers.write().await;
        if !regs.open {
            bail!("laser connection is not open");
        }
        if tenths > 1000 {
            bail!("intensity register overflow: {tenths}");
        }
        regs.intensity = tenths;
        Ok(())
    }

    async fn intensity(&self) -> Result<u16> {
        let regs = self.registers.read().await;
        let skewed = i32::from(regs.intensity) + regs.readback_skew;
        Ok(skewed.clamp(0, 1000) as u16)
    }

    async fn set_frequency_mode(&mut self, mode: FrequencyMode) -> Result<()> {
        self.faults.trip("laser.set_frequency_mode")?;
        let mut regs = self.registers.write().await;
        if !regs.open {
            bail!("laser connection is not open");
        }
        regs.frequency_mode = mode;
        Ok(())
    }

    async fn frequency_mode(&self) -> Result<FrequencyMode> {
        Ok(self.registers.read().await.frequency_mode)
    }

    async fn pulse_mode(&self) -> Result<PulseMode> {
        Ok(self.registers.read().await.pulse_mode)
    }

    async fn head_type(&self) -> Result<u8> {
        Ok(self.registers.read().await.head_type)
    }

    async fn firmware_version(&self) -> Result<String> {
        Ok("SIM 1.05.552".to_string())
    }
}

// =============================================================================
// MockChannelSwitch - simulated laser-head relay
// =============================================================================

#[derive(Debug)]
struct SwitchRegisters {
    open: bool,
    channel: u32,
}

/// Simulated laser-head relay switch.
///
/// The real relay needs tens of seconds to settle; the simulation
/// compresses that to a few milliseconds. Fault keys: `switch.open`,
/// `switch.close`, `switch.set_channel`.
#[derive(Clone, Debug)]
pub struct MockChannelSwitch {
    registers: Arc<RwLock<SwitchRegisters>>,
    faults: FaultPlan,
}

impl MockChannelSwitch {
    pub fn new(faults: FaultPlan) -> Self {
        Self {
            registers: Arc::new(RwLock::new(SwitchRegisters {
                open: false,
                channel: 0,
            })),
            faults,
        }
    }

    pub async fn is_open(&self) -> bool {
        self.registers.read().await.open
    }

    pub async fn current_channel(&self) -> u32 {
        self.registers.read().await.channel
    }
}

#[async_trait]
impl ChannelSwitch for MockChannelSwitch {
    async fn open(&mut self) -> Result<()> {
        self.faults.trip("switch.open")?;
        let mut regs = self.registers.write().await;
        if regs.open {
            bail!("relay switch port is already open");
        }
        regs.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.faults.trip("switch.close")?;
        self.registers.write().await.open = false;
        Ok(())
    }

    async fn set_active_channel(&mut self, channel: u32) -> Result<()> {
        self.faults.trip("switch.set_channel")?;
        {
            let mut regs = self.registers.write().await;
            if !regs.open {
                bail!("relay switch port is not open");
            }
            regs.channel = channel;
        }
        // Compressed relay settle time.
        sleep(Duration::from_millis(2)).await;
        Ok(())
    }

    async fn active_channel(&self) -> Result<u32> {
        Ok(self.registers.read().await.channel)
    }
}

// =============================================================================
// MockOpticalRouter - simulated fibre switch
// =============================================================================

#[derive(Debug)]
struct RouterRegisters {
    open: bool,
    input: u32,
    output: u32,
}

/// Simulated optical fibre switch.
///
/// Fault keys: `router.open`, `router.close`, `router.set_io`.
#[derive(Clone, Debug)]
pub struct MockOpticalRouter {
    registers: Arc<RwLock<RouterRegisters>>,
    park: (u32, u32),
    faults: FaultPlan,
}

impl MockOpticalRouter {
    pub fn new(faults: FaultPlan, park_input: u32, park_output: u32) -> Self {
        Self {
            registers: Arc::new(RwLock::new(RouterRegisters {
                open: false,
                input: park_input,
                output: park_output,
            })),
            park: (park_input, park_output),
            faults,
        }
    }

    pub async fn is_open(&self) -> bool {
        self.registers.read().await.open
    }

    pub async fn current_route(&self) -> (u32, u32) {
        let regs = self.registers.read().await;
        (regs.input, regs.output)
    }
}

#[async_trait]
impl OpticalRouter for MockOpticalRouter {
    async fn open(&mut self) -> Result<()> {
        self.faults.trip("router.open")?;
        let mut regs = self.registers.write().await;
        if regs.open {
            bail!("fibre switch port is already open");
        }
        regs.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.faults.trip("router.close")?;
        self.registers.write().await.open = false;
        Ok(())
    }

    async fn set_io_channels(&mut self, input: u32, output: u32) -> Result<()> {
        self.faults.trip("router.set_io")?;
        {
            let mut regs = self.registers.write().await;
            if !regs.open {
                bail!("fibre switch port is not open");
            }
            regs.input = input;
            regs.output = output;
        }
        sleep(Duration::from_millis(1)).await;
        Ok(())
    }

    async fn io_channels(&self) -> Result<(u32, u32)> {
        let regs = self.registers.read().await;
        Ok((regs.input, regs.output))
    }

    async fn park(&mut self) -> Result<()> {
        let (input, output) = self.park;
        self.set_io_channels(input, output).await
    }
}

// =============================================================================
// MockPulseSource - simulated trigger generator
// =============================================================================

#[derive(Debug)]
struct PulseRegisters {
    open: bool,
    total_emitted: u64,
    last_burst: u32,
}

/// Simulated trigger-pulse generator.
///
/// Pulse trains take real wall-clock time derived from the configured
/// repetition rate, so a 100-pulse burst at 1 kHz blocks for ~100 ms just
/// like the hardware. Fault keys: `pulse.open`, `pulse.close`,
/// `pulse.generate`.
#[derive(Clone, Debug)]
pub struct MockPulseSource {
    registers: Arc<RwLock<PulseRegisters>>,
    period: Duration,
    faults: FaultPlan,
}

impl MockPulseSource {
    pub fn new(faults: FaultPlan, trigger: &TriggerSettings) -> Self {
        let period = if trigger.frequency_hz > 0.0 {
            Duration::from_secs_f64(1.0 / trigger.frequency_hz)
        } else {
            Duration::ZERO
        };
        Self {
            registers: Arc::new(RwLock::new(PulseRegisters {
                open: false,
                total_emitted: 0,
                last_burst: 0,
            })),
            period,
            faults,
        }
    }

    pub async fn is_open(&self) -> bool {
        self.registers.read().await.open
    }

    /// Total pulses emitted over the lifetime of the simulation.
    pub async fn total_emitted(&self) -> u64 {
        self.registers.read().await.total_emitted
    }

    pub async fn last_burst(&self) -> u32 {
        self.registers.read().await.last_burst
    }
}

#[async_trait]
impl PulseSource for MockPulseSource {
    async fn open(&mut self) -> Result<()> {
        self.faults.trip("pulse.open")?;
        let mut regs = self.registers.write().await;
        if regs.open {
            bail!("counter output is already reserved");
        }
        regs.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.faults.trip("pulse.close")?;
        self.registers.write().await.open = false;
        Ok(())
    }

    async fn generate_pulses(&mut self, count: u32) -> Result<()> {
        self.faults.trip("pulse.generate")?;
        if !self.registers.read().await.open {
            bail!("counter output is not reserved");
        }
        sleep(self.period * count).await;
        let mut regs = self.registers.write().await;
        regs.total_emitted += u64::from(count);
        regs.last_burst = count;
        Ok(())
    }
}

// =============================================================================
// MockVoltageSource - simulated gain-voltage generator
// =============================================================================

#[derive(Debug)]
struct VoltageRegisters {
    open: bool,
    volts: f64,
}

/// Simulated gain-voltage source. The output latches the last written
/// level, as the analog hardware does. Fault keys: `voltage.open`,
/// `voltage.close`, `voltage.set`.
#[derive(Clone, Debug)]
pub struct MockVoltageSource {
    registers: Arc<RwLock<VoltageRegisters>>,
    faults: FaultPlan,
}

impl MockVoltageSource {
    pub fn new(faults: FaultPlan) -> Self {
        Self {
            registers: Arc::new(RwLock::new(VoltageRegisters {
                open: false,
                volts: 0.0,
            })),
            faults,
        }
    }

    pub async fn is_open(&self) -> bool {
        self.registers.read().await.open
    }

    pub async fn current_voltage(&self) -> f64 {
        self.registers.read().await.volts
    }
}

#[async_trait]
impl VoltageSource for MockVoltageSource {
    async fn open(&mut self) -> Result<()> {
        self.faults.trip("voltage.open")?;
        let mut regs = self.registers.write().await;
        if regs.open {
            bail!("analog output is already reserved");
        }
        regs.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.faults.trip("voltage.close")?;
        self.registers.write().await.open = false;
        Ok(())
    }

    async fn set_voltage(&mut self, volts: f64) -> Result<()> {
        self.faults.trip("voltage.set")?;
        {
            let mut regs = self.registers.write().await;
            if !regs.open {
                bail!("analog output is not reserved");
            }
            regs.volts = volts;
        }
        sleep(Duration::from_millis(1)).await;
        Ok(())
    }

    async fn voltage(&self) -> Result<f64> {
        Ok(self.registers.read().await.volts)
    }
}
