//! Core library for the light-injection control system.
//!
//! This library sequences the laboratory hardware used to fire calibration
//! light pulses into a particle detector: a pulsed laser driver, a
//! laser-head relay switch, an optical fibre router, a trigger-pulse
//! generator and a photomultiplier gain-voltage source. The central piece
//! is the [`controller::SystemController`], which drives every device in a
//! fixed order and guarantees the assembly is returned to a safe optical
//! state on every exit path.

pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod error;
pub mod hardware;
pub mod metadata;
pub mod safety;
pub mod snapshot;
