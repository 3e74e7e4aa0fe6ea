//! Solenoid valve driver.
//!
//! All valves share one current-regulating PWM channel.  Opening a valve
//! runs the pull-in sequence:
//!
//! ```text
//!  duty = soft ─▶ GPIO high ─▶ 20 ms ─▶ duty = 100 % ─▶ 80 ms ─▶ duty = steady
//! ```
//!
//! Closing a valve only drops its GPIO; the shared PWM is left alone so the
//! other open valves keep their holding current.  The sequence is not
//! cancellable, so the caller serializes every energize/de-energize.

use embedded_hal::delay::DelayNs;
use log::info;

use crate::app::ports::ActuatorPort;
use crate::params::ParamId;
use crate::pins;

/// One valve output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Valve {
    pub gpio: i32,
    /// Command parameter mirrored into `valve_on`.
    pub param: ParamId,
    /// Desired state.
    pub valve_on: bool,
    /// Actual output state, written only by [`ValveDriver`].
    state: bool,
}

impl Valve {
    pub const fn new(gpio: i32, param: ParamId) -> Self {
        Self {
            gpio,
            param,
            valve_on: false,
            state: false,
        }
    }

    pub fn is_energized(&self) -> bool {
        self.state
    }

    /// Desired and actual state differ.
    pub fn needs_update(&self) -> bool {
        self.valve_on != self.state
    }
}

/// The board's valve bank, index 0 = valve 1.
pub fn valve_bank() -> [Valve; pins::VALVE_COUNT] {
    core::array::from_fn(|i| Valve::new(pins::VALVE_GPIOS[i], ParamId::VALVES[i]))
}

pub struct ValveDriver {
    channel: u32,
    energize_hold_ms: u32,
    full_duty_hold_ms: u32,
}

impl ValveDriver {
    pub fn new(channel: u32, energize_hold_ms: u32, full_duty_hold_ms: u32) -> Self {
        Self {
            channel,
            energize_hold_ms,
            full_duty_hold_ms,
        }
    }

    /// Open `valve` with the pull-in sequence; `duty` is both the soft-start
    /// and the steady holding duty.
    pub fn energize(&self, valve: &mut Valve, hw: &mut (impl ActuatorPort + DelayNs), duty: u8) {
        info!(target: "valve", "[VALVE] {} ON", valve.gpio);
        hw.set_pwm_duty(self.channel, duty);
        hw.set_level(valve.gpio, true);
        hw.delay_ms(self.energize_hold_ms);
        hw.set_pwm_duty(self.channel, 100);
        hw.delay_ms(self.full_duty_hold_ms);
        hw.set_pwm_duty(self.channel, duty);
        valve.state = true;
    }

    pub fn de_energize(&self, valve: &mut Valve, hw: &mut impl ActuatorPort) {
        info!(target: "valve", "[VALVE] {} OFF", valve.gpio);
        hw.set_level(valve.gpio, false);
        valve.state = false;
    }
}
