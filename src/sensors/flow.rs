//! Hall-effect water flow sensor: pulse accounting and flow health.
//!
//! The ISR side ([`FlowCounter`]) only touches atomics: it bumps the pulse
//! counter and recomputes the derived volume, so the control loop can read
//! a coherent value with a single load and no lock.
//!
//! ```text
//!  GPIO34 ↑ ──ISR──▶ FlowCounter ──atomic load──▶ WaterFlowSensor ──▶ controller
//!                    pulses, value_cl               start/stop, poll()
//! ```
//!
//! Volumes are centilitres, truncated: `value_cl = floor(100 * N / P)`.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use log::{info, warn};

use crate::config::ControllerConfig;

/// Factory default calibration.
pub const DEFAULT_PULSES_PER_LITER: u32 = 100;

/// The counter wired to the flow sensor ISR.
/// `static` because ESP-IDF ISR callbacks cannot capture state.
pub static FLOW_COUNTER: FlowCounter = FlowCounter::new();

// ---------------------------------------------------------------------------
// ISR side
// ---------------------------------------------------------------------------

/// Lock-free single-producer (ISR) / single-consumer (controller) counter.
pub struct FlowCounter {
    pulses: AtomicU32,
    value_cl: AtomicU32,
    pulses_per_liter: AtomicU32,
    alert_cl: AtomicU32,
    alert: AtomicBool,
    measuring: AtomicBool,
}

impl Default for FlowCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowCounter {
    pub const fn new() -> Self {
        Self {
            pulses: AtomicU32::new(0),
            value_cl: AtomicU32::new(0),
            pulses_per_liter: AtomicU32::new(DEFAULT_PULSES_PER_LITER),
            alert_cl: AtomicU32::new(u32::MAX),
            alert: AtomicBool::new(false),
            measuring: AtomicBool::new(false),
        }
    }

    /// Rising-edge handler.  Bounded work, no blocking, no allocation:
    /// safe to call from interrupt context.
    pub fn on_pulse(&self) {
        if !self.measuring.load(Ordering::Acquire) {
            return;
        }
        let count = self.pulses.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let ppl = self.pulses_per_liter.load(Ordering::Relaxed).max(1);
        let cl = (u64::from(count) * 100 / u64::from(ppl)).min(u64::from(u32::MAX)) as u32;
        self.value_cl.store(cl, Ordering::Release);
        if cl >= self.alert_cl.load(Ordering::Relaxed) {
            self.alert.store(true, Ordering::Release);
        }
    }

    pub fn pulses(&self) -> u32 {
        self.pulses.load(Ordering::Acquire)
    }

    pub fn value_cl(&self) -> u32 {
        self.value_cl.load(Ordering::Acquire)
    }

    pub fn is_measuring(&self) -> bool {
        self.measuring.load(Ordering::Acquire)
    }

    fn restart(&self) {
        self.measuring.store(false, Ordering::Release);
        self.pulses.store(0, Ordering::Relaxed);
        self.value_cl.store(0, Ordering::Relaxed);
        self.alert.store(false, Ordering::Relaxed);
        self.measuring.store(true, Ordering::Release);
    }
}

/// Rising-edge entry point registered with the GPIO ISR service.
pub fn flow_isr_handler() {
    FLOW_COUNTER.on_pulse();
}

// ---------------------------------------------------------------------------
// Flow health
// ---------------------------------------------------------------------------

/// Classification published to `WaterFlowState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlowHealth {
    Normal = 0,
    /// No pulses for `flow_no_flow_short_ms`.
    NoFlowShort = 1,
    /// No pulses for `flow_no_flow_long_ms`.
    NoFlowLong = 2,
    /// Pulse rate above `flow_max_pulse_hz`.
    Reversed = 3,
}

impl FlowHealth {
    /// Value written to the `WaterFlowState` parameter.
    pub const fn code(self) -> u32 {
        self as u32
    }
}

// ---------------------------------------------------------------------------
// Consumer side
// ---------------------------------------------------------------------------

/// Control-loop view of the flow sensor.
pub struct WaterFlowSensor {
    counter: &'static FlowCounter,
    no_flow_short_ms: u32,
    no_flow_long_ms: u32,
    max_pulse_hz: u32,
    last_pulses: u32,
    last_change_ms: u32,
    last_poll_ms: u32,
    health: FlowHealth,
}

impl WaterFlowSensor {
    pub fn new(counter: &'static FlowCounter, config: &ControllerConfig) -> Self {
        Self {
            counter,
            no_flow_short_ms: config.flow_no_flow_short_ms,
            no_flow_long_ms: config.flow_no_flow_long_ms,
            max_pulse_hz: config.flow_max_pulse_hz,
            last_pulses: 0,
            last_change_ms: 0,
            last_poll_ms: 0,
            health: FlowHealth::Normal,
        }
    }

    /// Zero the counter and start accumulating.
    pub fn start_measure(&mut self, now_ms: u32) {
        self.counter.restart();
        self.last_pulses = 0;
        self.last_change_ms = now_ms;
        self.last_poll_ms = now_ms;
        self.health = FlowHealth::Normal;
        info!(target: "flow", "measurement started");
    }

    /// Stop accumulating; the last value stays readable.
    pub fn stop_measure(&mut self) {
        if self.counter.measuring.swap(false, Ordering::AcqRel) {
            info!(
                target: "flow",
                "measurement stopped at {} cl ({} pulses)",
                self.value_cl(),
                self.counter.pulses()
            );
        }
        self.health = FlowHealth::Normal;
    }

    pub fn is_measuring(&self) -> bool {
        self.counter.is_measuring()
    }

    /// Accumulated volume in centilitres.
    pub fn value_cl(&self) -> u32 {
        self.counter.value_cl()
    }

    /// Recalibrate.  Applies from the next pulse on; the current value is
    /// not recomputed.  Zero is ignored.
    pub fn set_pulses_per_liter(&mut self, ppl: u32) {
        if ppl == 0 {
            return;
        }
        self.counter.pulses_per_liter.store(ppl, Ordering::Relaxed);
    }

    /// Raise the ISR alert flag once the volume reaches `cl`.
    pub fn set_alert_cl(&mut self, cl: u32) {
        self.counter.alert_cl.store(cl, Ordering::Relaxed);
    }

    pub fn alert_raised(&self) -> bool {
        self.counter.alert.load(Ordering::Acquire)
    }

    pub fn health(&self) -> FlowHealth {
        self.health
    }

    /// Classify the pulse stream since the previous poll.
    pub fn poll(&mut self, now_ms: u32) -> FlowHealth {
        if !self.is_measuring() {
            self.health = FlowHealth::Normal;
            return self.health;
        }

        let pulses = self.counter.pulses();
        let delta = pulses.wrapping_sub(self.last_pulses);
        let elapsed = now_ms.wrapping_sub(self.last_poll_ms);

        let next = if delta > 0 {
            self.last_change_ms = now_ms;
            if elapsed > 0
                && u64::from(delta) * 1_000 > u64::from(self.max_pulse_hz) * u64::from(elapsed)
            {
                FlowHealth::Reversed
            } else {
                FlowHealth::Normal
            }
        } else {
            let silent = now_ms.wrapping_sub(self.last_change_ms);
            if silent >= self.no_flow_long_ms {
                FlowHealth::NoFlowLong
            } else if silent >= self.no_flow_short_ms {
                FlowHealth::NoFlowShort
            } else {
                FlowHealth::Normal
            }
        };

        self.last_pulses = pulses;
        self.last_poll_ms = now_ms;

        if next != self.health {
            if next == FlowHealth::Normal {
                info!(target: "flow", "flow health {:?} -> Normal", self.health);
            } else {
                warn!(target: "flow", "flow health {:?} -> {:?}", self.health, next);
            }
            self.health = next;
        }
        self.health
    }
}
