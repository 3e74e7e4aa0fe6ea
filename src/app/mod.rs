//! Application core: controller orchestration, ports and events.
//!
//! The business rules of the valve server live here.  Hardware, storage
//! and the peer link are reached only through the traits in [`ports`],
//! so the layer is fully testable without real peripherals.

pub mod controller;
pub mod events;
pub mod ports;
