//! Device handle abstractions and simulated hardware.
//!
//! Each physical device family is reached through a narrow capability
//! trait ([`capabilities`]); vendor bindings implement those traits
//! out-of-tree and the controller never sees a raw vendor error. The
//! [`mock`] module provides the simulated backend used for dummy mode and
//! for every test in this repository.

pub mod capabilities;
pub mod mock;

pub use capabilities::{
    ChannelSwitch, FrequencyMode, LaserEmitter, OpticalRouter, PulseMode, PulseSource,
    VoltageSource,
};
