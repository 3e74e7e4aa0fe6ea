//! Sensor subsystem: water-flow pulse accounting and ADC measurement.
//!
//! The flow counter is fed from the GPIO ISR and read by the controller
//! task; the measurement task owns the ADC and publishes into the
//! parameter store.

pub mod flow;
pub mod measure;
