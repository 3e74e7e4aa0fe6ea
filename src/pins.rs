//! GPIO / peripheral pin assignments for the valve server board.
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin numbers.

// ---------------------------------------------------------------------------
// Solenoid valves (low-side MOSFET per valve, shared current regulator)
// ---------------------------------------------------------------------------

/// Number of valves on the server board.
pub const VALVE_COUNT: usize = 7;

/// Valve enable outputs, index 0 = valve 1.
pub const VALVE_GPIOS: [i32; VALVE_COUNT] = [13, 14, 26, 25, 32, 18, 19];

/// Valve 6 feeds the tank; the controller mirrors `water_on` into it.
pub const WATER_VALVE_INDEX: usize = 5;

/// Main relay for the 12 V valve rail (active HIGH).
pub const SYSTEM_ON_GPIO: i32 = 15;

// ---------------------------------------------------------------------------
// Current regulation PWM (shared by every valve)
// ---------------------------------------------------------------------------

/// LEDC output driving the valve current regulator.
pub const VALVE_PWM_GPIO: i32 = 27;
/// LEDC channel owned by the valve reconcile loop.
pub const VALVE_PWM_CHANNEL: u32 = 0;
/// Regulator switching frequency.
pub const VALVE_PWM_FREQ_HZ: u32 = 1_000;
/// LEDC timer resolution (bits).  8-bit gives 0 – 255 duty levels.
pub const PWM_RESOLUTION_BITS: u32 = 8;

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

/// Hall-effect flow sensor, pulse output, rising-edge interrupt.
pub const FLOW_PULSE_GPIO: i32 = 34;

/// ADC1 channel: analog input header.
pub const ADC1_CH_INPUT: u32 = 6;
/// ADC1 channel: valve/motor current shunt.
pub const ADC1_CH_MOTOR: u32 = 7;
/// ADC1 channel: 12 V supply divider.
pub const ADC1_CH_SUPPLY_12V: u32 = 5;
