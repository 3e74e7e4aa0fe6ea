//! Controller timing and plausibility configuration
//!
//! Everything here is a firmware tunable rather than an operator setting;
//! operator settings (volumes, duty, calibration) live in the parameter
//! store.  Values can be overridden via NVS.

use serde::{Deserialize, Serialize};

/// Core controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    // --- Control loop ---
    /// Sleep between controller ticks (milliseconds)
    pub tick_poll_ms: u32,
    /// Actuator settle time after entering Working (milliseconds)
    pub settle_ms: u32,

    // --- Valve energize sequence ---
    /// Hold at soft-start duty after asserting the valve GPIO (milliseconds)
    pub energize_hold_ms: u32,
    /// Hold at full duty before dropping to steady duty (milliseconds)
    pub full_duty_hold_ms: u32,
    /// Current regulator switching frequency (Hz)
    pub valve_pwm_freq_hz: u32,

    // --- Flow sensor ---
    /// Silence before classifying flow as no-flow-short (milliseconds)
    pub flow_no_flow_short_ms: u32,
    /// Silence before escalating to no-flow-long (milliseconds)
    pub flow_no_flow_long_ms: u32,
    /// Highest plausible pulse rate; faster reads as reversed flow (Hz)
    pub flow_max_pulse_hz: u32,

    // --- Peer link ---
    /// No contact for this long means the control peer is gone (milliseconds)
    pub peer_timeout_ms: u32,

    // --- Background tasks ---
    /// Error latch poll period (milliseconds)
    pub latch_poll_ms: u32,
    /// ADC measurement period (milliseconds)
    pub measure_interval_ms: u32,
    /// Delay between a calibration request and the zero capture (milliseconds)
    pub calibration_delay_ms: u32,
    /// Minimum spacing between parameter autosaves (milliseconds)
    pub autosave_interval_ms: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            // Control loop
            tick_poll_ms: 100,
            settle_ms: 1000,

            // Valve energize sequence
            energize_hold_ms: 20,
            full_duty_hold_ms: 80,
            valve_pwm_freq_hz: crate::pins::VALVE_PWM_FREQ_HZ,

            // Flow sensor
            flow_no_flow_short_ms: 3_000,
            flow_no_flow_long_ms: 15_000,
            flow_max_pulse_hz: 1_000,

            // Peer link
            peer_timeout_ms: 3_000,

            // Background tasks
            latch_poll_ms: 200,
            measure_interval_ms: 100,
            calibration_delay_ms: 1_000,
            autosave_interval_ms: 5_000,
        }
    }
}
