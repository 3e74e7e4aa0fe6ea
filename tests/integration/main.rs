//! Integration test driver for `tests/integration/`.
//!
//! Each `mod` below exercises one subsystem against the mock adapters in
//! `mock_hw`.  Everything runs on the host with no hardware attached.

mod controller_tests;
mod mock_hw;
mod params_tests;
