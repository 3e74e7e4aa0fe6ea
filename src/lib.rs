//! Valve server controller firmware library.
//!
//! Exposes the controller, parameter store and drivers for integration
//! testing.  ESP-IDF specifics are guarded by `#[cfg(target_os = "espidf")]`
//! inside each module; the host build swaps in no-op twins.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod drivers;
pub mod error;
pub mod fsm;
pub mod params;
pub mod pins;
pub mod safety;
pub mod sensors;

#[cfg(target_os = "espidf")]
mod esp_link_shims;

pub use error::{Error, MachineError};
