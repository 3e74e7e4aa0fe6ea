//! Server controller: the hexagonal core.
//!
//! [`ServerController`] owns the state machine, the valve bank and the
//! flow-sensor view.  Each tick:
//!
//! ```text
//!  snapshot store + peer + flow ─▶ FSM ─▶ apply requests ─▶ reconcile
//!                                                             │
//!                         poll delay ◀── settle (if asked) ◀──┘
//! ```
//!
//! All hardware goes through port traits passed in at the call site, so
//! the whole controller runs against mocks on the host.  Other tasks talk
//! to it only through the parameter store and a [`ControllerHandle`].

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use embedded_hal::delay::DelayNs;
use log::{error, info, warn};

use crate::config::ControllerConfig;
use crate::drivers::valve::{Valve, ValveDriver, valve_bank};
use crate::error::MachineError;
use crate::fsm::context::{ControllerContext, ControllerInputs};
use crate::fsm::states::build_state_table;
use crate::fsm::{Fsm, StateId};
use crate::params::{ParamId, ParamSnapshot, ParamStore};
use crate::pins;
use crate::safety::ErrorResetHandle;
use crate::sensors::flow::{FlowCounter, FlowHealth, WaterFlowSensor};
use crate::sensors::measure::MeasureShared;

use super::events::ControllerEvent;
use super::ports::{ActuatorPort, Clock, EventSink, PeerPort};

/// Parameters forced to zero when the controller initialises the board.
const BOOT_ZEROED: [ParamId; 12] = [
    ParamId::Valve1State,
    ParamId::Valve2State,
    ParamId::Valve3State,
    ParamId::Valve4State,
    ParamId::Valve5State,
    ParamId::Valve6State,
    ParamId::Valve7State,
    ParamId::AddWater,
    ParamId::WaterVolRead,
    ParamId::MachineErrors,
    ParamId::StartSystem,
    ParamId::WaterFlowState,
];

// ───────────────────────────────────────────────────────────────
// Shared state and handle
// ───────────────────────────────────────────────────────────────

/// State the controller publishes for other tasks after every tick.
#[derive(Debug)]
struct ControllerShared {
    state: AtomicU8,
    emergency_disable: AtomicBool,
    /// Held from the input snapshot until the new state is published, and
    /// by `raise_error` around its check and write.
    transition: Mutex<()>,
}

impl ControllerShared {
    fn lock_transition(&self) -> MutexGuard<'_, ()> {
        self.transition.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable view of the controller for the fault detectors, the button
/// task and the remote surface.
#[derive(Clone)]
pub struct ControllerHandle {
    shared: Arc<ControllerShared>,
    store: Arc<ParamStore>,
    reset: ErrorResetHandle,
}

impl ControllerHandle {
    pub fn state(&self) -> StateId {
        StateId::from_index(self.shared.state.load(Ordering::Acquire) as usize)
    }

    pub fn is_working(&self) -> bool {
        self.state() == StateId::Working
    }

    pub fn get_emergency_disable(&self) -> bool {
        self.shared.emergency_disable.load(Ordering::Acquire)
    }

    /// OR `1 << reason_bit` into `MachineErrors`.  Only honoured while
    /// `Working`; the controller enters `Error` on its next tick.
    ///
    /// Serialised against the controller's state decision, so a bit can
    /// never land after the controller has already left `Working`.
    pub fn raise_error(&self, reason_bit: u16) -> bool {
        if reason_bit >= 32 {
            return false;
        }
        let _transition = self.shared.lock_transition();
        if !self.is_working() {
            return false;
        }
        let mask = 1u32 << reason_bit;
        match self.store.update(ParamId::MachineErrors, |v| v | mask) {
            Ok(errors) => {
                warn!(target: "srvr_ctrl", "error raised: bit {} (mask 0b{:b})", reason_bit, errors);
                true
            }
            Err(e) => {
                error!(target: "srvr_ctrl", "raising error bit {} failed: {}", reason_bit, e);
                false
            }
        }
    }

    pub fn raise(&self, reason: MachineError) -> bool {
        self.raise_error(u16::from(reason.bit()))
    }

    /// Acknowledge the latched errors.  Only honoured while in `Error`.
    pub fn error_reset(&self) -> bool {
        if self.state() != StateId::Error {
            return false;
        }
        self.reset.request();
        true
    }
}

// ───────────────────────────────────────────────────────────────
// ServerController
// ───────────────────────────────────────────────────────────────

pub struct ServerController {
    fsm: Fsm,
    ctx: ControllerContext,
    store: Arc<ParamStore>,
    flow: WaterFlowSensor,
    valves: [Valve; pins::VALVE_COUNT],
    driver: ValveDriver,
    shared: Arc<ControllerShared>,
    measure: Arc<MeasureShared>,
    reset: ErrorResetHandle,
    settle_ms: u32,
    tick_poll_ms: u32,
    pending_settle: bool,
    published_water_on: bool,
}

impl ServerController {
    /// Build the controller.  The FSM starts in `Init`; call [`start`] next.
    ///
    /// [`start`]: Self::start
    pub fn new(
        config: &ControllerConfig,
        store: Arc<ParamStore>,
        counter: &'static FlowCounter,
        measure: Arc<MeasureShared>,
        reset: ErrorResetHandle,
    ) -> Self {
        Self {
            fsm: Fsm::new(build_state_table(), StateId::Init),
            ctx: ControllerContext::new(),
            store,
            flow: WaterFlowSensor::new(counter, config),
            valves: valve_bank(),
            driver: ValveDriver::new(
                pins::VALVE_PWM_CHANNEL,
                config.energize_hold_ms,
                config.full_duty_hold_ms,
            ),
            shared: Arc::new(ControllerShared {
                state: AtomicU8::new(StateId::Init as u8),
                emergency_disable: AtomicBool::new(false),
                transition: Mutex::new(()),
            }),
            measure,
            reset,
            settle_ms: config.settle_ms,
            tick_poll_ms: config.tick_poll_ms,
            pending_settle: false,
            published_water_on: false,
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            shared: self.shared.clone(),
            store: self.store.clone(),
            reset: self.reset.clone(),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    pub fn start(&mut self, sink: &mut impl EventSink) {
        self.fsm.start(&mut self.ctx);
        let state = self.fsm.current_state();
        self.publish_shared(state);
        sink.emit(&ControllerEvent::Started(state));
        info!(target: "srvr_ctrl", "controller started in {:?}", state);
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// Run one control cycle, including the settle and poll delays.
    ///
    /// `hw` drives the outputs and provides the blocking delays; the delays
    /// are the only places this call waits.
    pub fn tick(
        &mut self,
        hw: &mut (impl ActuatorPort + DelayNs),
        peer: &impl PeerPort,
        clock: &impl Clock,
        sink: &mut impl EventSink,
    ) {
        let prev_state = self.fsm.current_state();

        // 1-2. Inputs and state logic, published before anything else runs.
        let (snapshot, state) = {
            let shared = self.shared.clone();
            let _transition = shared.lock_transition();
            let snapshot = self.store.snapshot();
            self.ctx.inputs = self.read_inputs(&snapshot, peer);
            self.fsm.tick(&mut self.ctx);
            let state = self.fsm.current_state();
            self.publish_shared(state);
            (snapshot, state)
        };

        // 3. Requests and publications
        self.apply_requests(hw, clock.now_ms(), sink);
        self.publish(state, &snapshot, clock.now_ms(), sink);

        // 4. Outputs
        self.reconcile(hw, pwm_duty(&snapshot), sink);

        if state != prev_state {
            sink.emit(&ControllerEvent::StateChanged {
                from: prev_state,
                to: state,
            });
            if state == StateId::Error {
                sink.emit(&ControllerEvent::ErrorRaised(self.ctx.inputs.machine_errors));
            } else if prev_state == StateId::Error {
                sink.emit(&ControllerEvent::ErrorCleared);
            }
        }

        // 5. Delays
        if self.pending_settle {
            self.pending_settle = false;
            hw.delay_ms(self.settle_ms);
        }
        hw.delay_ms(self.tick_poll_ms);
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn state(&self) -> StateId {
        self.fsm.current_state()
    }

    pub fn system_on(&self) -> bool {
        self.ctx.system_on
    }

    pub fn water_on(&self) -> bool {
        self.ctx.water_on
    }

    pub fn water_read_cl(&self) -> u32 {
        self.ctx.water_read_cl
    }

    /// Actual output state of every valve.
    pub fn valve_states(&self) -> [bool; pins::VALVE_COUNT] {
        core::array::from_fn(|i| self.valves[i].is_energized())
    }

    pub fn flow_health(&self) -> FlowHealth {
        self.flow.health()
    }

    // ── Internal ──────────────────────────────────────────────

    fn read_inputs(&self, snap: &ParamSnapshot, peer: &impl PeerPort) -> ControllerInputs {
        ControllerInputs {
            start_request: snap.flag(ParamId::StartSystem),
            emergency_request: snap.flag(ParamId::EmergencyDisable),
            peer_connected: peer.is_connected(),
            machine_errors: snap.get(ParamId::MachineErrors),
            valve_commands: core::array::from_fn(|i| snap.flag(ParamId::VALVES[i])),
            add_water: snap.flag(ParamId::AddWater),
            water_volume_l: snap.get(ParamId::WaterVolAdd),
            // Alert first: a raised alert implies the volume load sees the target.
            flow_target_reached: self.flow.alert_raised(),
            flow_read_cl: self.flow.value_cl(),
        }
    }

    fn apply_requests(
        &mut self,
        hw: &mut impl ActuatorPort,
        now_ms: u32,
        sink: &mut impl EventSink,
    ) {
        let req = self.ctx.requests.take();

        if req.init_hardware {
            self.init_hardware(hw);
        }
        if req.settle {
            self.pending_settle = true;
        }
        if req.calibrate {
            self.measure.request_calibration();
        }
        if req.start_measure {
            let target_cl = self.ctx.target_cl();
            self.flow.set_alert_cl(target_cl);
            self.flow.start_measure(now_ms);
            sink.emit(&ControllerEvent::WaterMeasureStarted { target_cl });
        }
        if req.stop_measure && self.flow.is_measuring() {
            self.flow.stop_measure();
            sink.emit(&ControllerEvent::WaterMeasureStopped {
                read_cl: self.ctx.water_read_cl,
            });
        }
        if req.clear_add_water {
            self.store_set(ParamId::AddWater, 0);
        }
    }

    fn init_hardware(&mut self, hw: &mut impl ActuatorPort) {
        let outputs = core::iter::once(pins::SYSTEM_ON_GPIO).chain(pins::VALVE_GPIOS);
        for pin in outputs {
            if let Err(e) = hw.configure_output(pin) {
                error!(target: "srvr_ctrl", "output GPIO{} not configured: {}", pin, e);
            }
        }
        for id in BOOT_ZEROED {
            self.store_set(id, 0);
        }
        info!(target: "srvr_ctrl", "outputs configured, commands cleared");
    }

    fn publish(
        &mut self,
        state: StateId,
        snap: &ParamSnapshot,
        now_ms: u32,
        sink: &mut impl EventSink,
    ) {
        let read_cl = self.ctx.water_read_cl.min(ParamId::WaterVolRead.max());
        self.store_set(ParamId::WaterVolRead, read_cl);

        if state == StateId::Working || self.ctx.water_on != self.published_water_on {
            self.store_set(ParamId::Valve6State, u32::from(self.ctx.water_on));
            self.published_water_on = self.ctx.water_on;
        }

        self.flow.set_pulses_per_liter(snap.get(ParamId::PulsesPerLiter));

        let before = self.flow.health();
        let health = self.flow.poll(now_ms);
        self.store_set(ParamId::WaterFlowState, health.code());
        if health != before {
            sink.emit(&ControllerEvent::FlowHealthChanged(health));
        }
    }

    /// Drive the system-on relay, then bring every valve to its desired
    /// state one at a time.
    fn reconcile(
        &mut self,
        hw: &mut (impl ActuatorPort + DelayNs),
        duty: u8,
        sink: &mut impl EventSink,
    ) {
        hw.set_level(pins::SYSTEM_ON_GPIO, self.ctx.system_on);

        for (index, valve) in self.valves.iter_mut().enumerate() {
            valve.valve_on = self.ctx.valves_on[index];
            if !valve.needs_update() {
                continue;
            }
            if valve.valve_on {
                self.driver.energize(valve, hw, duty);
            } else {
                self.driver.de_energize(valve, hw);
            }
            sink.emit(&ControllerEvent::ValveSwitched {
                index,
                on: valve.valve_on,
            });
        }
    }

    fn publish_shared(&self, state: StateId) {
        self.shared.state.store(state as u8, Ordering::Release);
        self.shared
            .emergency_disable
            .store(self.ctx.emergency_disable, Ordering::Release);
    }

    fn store_set(&self, id: ParamId, value: u32) {
        if let Err(e) = self.store.set(id, value) {
            error!(target: "srvr_ctrl", "write {} = {} failed: {}", id.key(), value, e);
        }
    }
}

/// Valve holding duty from `PwmValve`, in percent.
fn pwm_duty(snap: &ParamSnapshot) -> u8 {
    snap.get(ParamId::PwmValve).min(100) as u8
}
