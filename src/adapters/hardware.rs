//! Hardware adapter: bridges the board peripherals to the domain ports.
//!
//! Valve outputs and the current regulator go through [`ActuatorPort`],
//! the measurement channels through [`AdcPort`], and the energize sequence
//! delays through `embedded_hal`'s [`DelayNs`].  On non-espidf targets the
//! underlying `hw_init` helpers are no-op twins and delays sleep the thread.

use embedded_hal::delay::DelayNs;

use crate::app::ports::{ActuatorError, ActuatorPort, AdcPort};
use crate::drivers::hw_init;

/// Zero-sized handle to the board peripherals.
///
/// Each task owns its own instance; the controller task is the only one
/// that drives outputs and the measurement task the only ADC reader.
#[derive(Debug, Default, Clone, Copy)]
pub struct HardwareAdapter;

impl HardwareAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl ActuatorPort for HardwareAdapter {
    fn configure_output(&mut self, pin: i32) -> Result<(), ActuatorError> {
        hw_init::configure_output(pin).map_err(|_| ActuatorError::GpioConfigFailed(pin))
    }

    fn set_level(&mut self, pin: i32, high: bool) {
        hw_init::gpio_write(pin, high);
    }

    fn set_pwm_duty(&mut self, channel: u32, percent: u8) {
        hw_init::ledc_set(channel, percent);
    }
}

impl AdcPort for HardwareAdapter {
    fn read_raw(&mut self, channel: u32) -> u16 {
        hw_init::adc1_read(channel)
    }
}

impl DelayNs for HardwareAdapter {
    fn delay_ns(&mut self, ns: u32) {
        #[cfg(target_os = "espidf")]
        esp_idf_hal::delay::Ets::delay_us(ns.div_ceil(1_000));

        #[cfg(not(target_os = "espidf"))]
        std::thread::sleep(std::time::Duration::from_nanos(u64::from(ns)));
    }

    fn delay_ms(&mut self, ms: u32) {
        #[cfg(target_os = "espidf")]
        esp_idf_hal::delay::FreeRtos::delay_ms(ms);

        #[cfg(not(target_os = "espidf"))]
        std::thread::sleep(std::time::Duration::from_millis(u64::from(ms)));
    }
}
