//! Server controller integration tests.
//!
//! A full controller runs against the recording board, a manual clock and
//! a mock peer; inputs arrive only through the parameter store, exactly as
//! they would from the remote surface.

use std::sync::Arc;

use valvectl::adapters::time::ManualClock;
use valvectl::app::controller::{ControllerHandle, ServerController};
use valvectl::app::events::ControllerEvent;
use valvectl::app::ports::EventSink;
use valvectl::config::ControllerConfig;
use valvectl::error::MachineError;
use valvectl::fsm::StateId;
use valvectl::params::{ParamId, ParamStore};
use valvectl::pins;
use valvectl::safety::{ErrorLatch, LatchState};
use valvectl::sensors::flow::{FlowCounter, FlowHealth};
use valvectl::sensors::measure::MeasureShared;

use crate::mock_hw::{CollectSink, HwCall, MockBoard, MockPeer};

const WATER_GPIO: i32 = pins::VALVE_GPIOS[pins::WATER_VALVE_INDEX];

struct Rig {
    ctrl: ServerController,
    handle: ControllerHandle,
    store: Arc<ParamStore>,
    counter: &'static FlowCounter,
    measure: Arc<MeasureShared>,
    latch: ErrorLatch,
    board: MockBoard,
    peer: MockPeer,
    clock: ManualClock,
    sink: CollectSink,
}

impl Rig {
    fn new() -> Self {
        let config = ControllerConfig::default();
        let store = Arc::new(ParamStore::new());
        let counter: &'static FlowCounter = Box::leak(Box::new(FlowCounter::new()));
        let measure = Arc::new(MeasureShared::new());
        let latch = ErrorLatch::new();
        let mut ctrl = ServerController::new(
            &config,
            store.clone(),
            counter,
            measure.clone(),
            latch.reset_handle(),
        );
        let mut sink = CollectSink::default();
        ctrl.start(&mut sink);
        let handle = ctrl.handle();
        Self {
            ctrl,
            handle,
            store,
            counter,
            measure,
            latch,
            board: MockBoard::new(),
            peer: MockPeer::connected(),
            clock: ManualClock::new(0),
            sink,
        }
    }

    fn tick(&mut self) {
        self.clock.advance(100);
        self.ctrl
            .tick(&mut self.board, &self.peer, &self.clock, &mut self.sink);
    }

    fn set(&self, id: ParamId, value: u32) {
        self.store.set(id, value).unwrap();
    }

    /// Init → Idle → Working, then one Working tick so outputs follow.
    fn working() -> Self {
        let mut rig = Self::new();
        rig.tick();
        rig.set(ParamId::StartSystem, 1);
        rig.tick();
        assert_eq!(rig.ctrl.state(), StateId::Working);
        rig.tick();
        rig
    }

    fn pulses(&self, n: u32) {
        for _ in 0..n {
            self.counter.on_pulse();
        }
    }
}

#[test]
fn init_configures_outputs_and_clears_run_commands() {
    let mut rig = Rig::new();
    rig.set(ParamId::Valve1State, 1);
    rig.set(ParamId::AddWater, 1);
    rig.set(ParamId::StartSystem, 1);
    rig.set(ParamId::MachineErrors, 5);
    rig.set(ParamId::WaterVolAdd, 250);

    rig.tick();

    assert_eq!(rig.ctrl.state(), StateId::Idle);
    assert!(rig.board.calls.contains(&HwCall::Configure(pins::SYSTEM_ON_GPIO)));
    for gpio in pins::VALVE_GPIOS {
        assert!(rig.board.calls.contains(&HwCall::Configure(gpio)));
    }
    for id in [
        ParamId::Valve1State,
        ParamId::AddWater,
        ParamId::StartSystem,
        ParamId::MachineErrors,
    ] {
        assert_eq!(rig.store.get(id), 0, "{id:?} not cleared");
    }
    assert_eq!(rig.store.get(ParamId::WaterVolAdd), 250);
}

#[test]
fn idle_with_start_but_no_peer_stays_idle() {
    let mut rig = Rig::new();
    rig.peer.set(false);
    rig.tick();
    rig.set(ParamId::StartSystem, 1);
    for _ in 0..5 {
        rig.tick();
        assert_eq!(rig.ctrl.state(), StateId::Idle);
    }
    assert!(!rig.board.level(pins::SYSTEM_ON_GPIO));
}

#[test]
fn entering_working_calibrates_and_settles() {
    let mut rig = Rig::new();
    rig.tick();
    rig.set(ParamId::StartSystem, 1);
    rig.board.clear();
    rig.tick();

    assert_eq!(rig.ctrl.state(), StateId::Working);
    assert!(rig.measure.calibration_pending());
    assert_eq!(rig.board.delays(), vec![1000, 100]);
    assert!(rig.sink.events.contains(&ControllerEvent::StateChanged {
        from: StateId::Idle,
        to: StateId::Working,
    }));
    assert!(rig.handle.is_working());

    rig.tick();
    assert!(rig.ctrl.system_on());
    assert!(rig.board.level(pins::SYSTEM_ON_GPIO));
}

#[test]
fn commanded_valve_runs_energize_sequence() {
    let mut rig = Rig::working();
    rig.board.clear();
    rig.set(ParamId::Valve2State, 1);
    rig.tick();

    let gpio = pins::VALVE_GPIOS[1];
    let expected = [
        HwCall::Duty(0, 50),
        HwCall::Level(gpio, true),
        HwCall::Delay(20),
        HwCall::Duty(0, 100),
        HwCall::Delay(80),
        HwCall::Duty(0, 50),
    ];
    assert!(
        rig.board.calls.windows(expected.len()).any(|w| w == expected),
        "sequence missing from {:?}",
        rig.board.calls
    );
    assert!(rig.ctrl.valve_states()[1]);
    assert!(rig
        .sink
        .events
        .contains(&ControllerEvent::ValveSwitched { index: 1, on: true }));
}

#[test]
fn steady_duty_follows_pwm_parameter() {
    let mut rig = Rig::working();
    rig.set(ParamId::PwmValve, 70);
    rig.board.clear();
    rig.set(ParamId::Valve3State, 1);
    rig.tick();
    assert_eq!(rig.board.calls.first(), Some(&HwCall::Level(pins::SYSTEM_ON_GPIO, true)));
    assert!(rig.board.calls.contains(&HwCall::Duty(0, 70)));
}

#[test]
fn closing_a_valve_never_writes_pwm() {
    let mut rig = Rig::working();
    rig.set(ParamId::Valve1State, 1);
    rig.tick();
    assert!(rig.board.level(pins::VALVE_GPIOS[0]));

    rig.board.clear();
    rig.set(ParamId::Valve1State, 0);
    rig.tick();

    assert_eq!(rig.board.pwm_writes(), 0);
    assert!(rig
        .board
        .calls
        .contains(&HwCall::Level(pins::VALVE_GPIOS[0], false)));
    assert!(!rig.ctrl.valve_states()[0]);
}

#[test]
fn emergency_disable_kills_every_output() {
    let mut rig = Rig::working();
    rig.set(ParamId::Valve1State, 1);
    rig.set(ParamId::Valve3State, 1);
    rig.tick();
    assert!(rig.board.level(pins::VALVE_GPIOS[0]));

    rig.set(ParamId::EmergencyDisable, 1);
    rig.tick();

    assert_eq!(rig.ctrl.state(), StateId::EmergencyDisable);
    assert!(rig.handle.get_emergency_disable());
    assert_eq!(rig.ctrl.valve_states(), [false; pins::VALVE_COUNT]);
    assert!(!rig.ctrl.system_on());
    assert!(!rig.board.level(pins::VALVE_GPIOS[0]));
    assert!(!rig.board.level(pins::VALVE_GPIOS[2]));
    assert!(!rig.board.level(pins::SYSTEM_ON_GPIO));

    // Commands are ignored while disabled.
    rig.tick();
    assert_eq!(rig.ctrl.valve_states(), [false; pins::VALVE_COUNT]);

    rig.set(ParamId::EmergencyDisable, 0);
    rig.tick();
    assert_eq!(rig.ctrl.state(), StateId::Idle);
}

#[test]
fn emergency_from_idle_is_honoured() {
    let mut rig = Rig::new();
    rig.tick();
    rig.set(ParamId::EmergencyDisable, 1);
    rig.tick();
    assert_eq!(rig.ctrl.state(), StateId::EmergencyDisable);
}

#[test]
fn water_dosing_stops_at_target_volume() {
    let mut rig = Rig::working();
    assert_eq!(rig.store.get(ParamId::WaterVolAdd), 100);
    assert_eq!(rig.store.get(ParamId::PulsesPerLiter), 100);

    rig.set(ParamId::AddWater, 1);
    rig.tick();
    assert!(rig.ctrl.water_on());
    assert!(rig.board.level(WATER_GPIO));
    assert_eq!(rig.store.get(ParamId::Valve6State), 1);
    assert!(rig
        .sink
        .events
        .contains(&ControllerEvent::WaterMeasureStarted { target_cl: 10_000 }));

    rig.pulses(5_000);
    rig.tick();
    assert!(rig.ctrl.water_on());
    assert_eq!(rig.store.get(ParamId::WaterVolRead), 5_000);

    rig.pulses(5_000);
    rig.tick();

    assert!(!rig.ctrl.water_on());
    assert_eq!(rig.store.get(ParamId::AddWater), 0);
    assert_eq!(rig.store.get(ParamId::WaterVolRead), 10_000);
    assert_eq!(rig.store.get(ParamId::Valve6State), 0);
    assert!(!rig.board.level(WATER_GPIO));
    assert!(rig
        .sink
        .events
        .contains(&ControllerEvent::WaterMeasureStopped { read_cl: 10_000 }));
    assert_eq!(rig.ctrl.state(), StateId::Working);
}

#[test]
fn volume_read_truncates_to_centilitres() {
    let mut rig = Rig::working();
    rig.set(ParamId::PulsesPerLiter, 30);
    rig.set(ParamId::AddWater, 1);
    rig.tick();

    rig.pulses(10);
    rig.tick();
    // floor(100 * 10 / 30)
    assert_eq!(rig.ctrl.water_read_cl(), 33);
}

#[test]
fn cancelled_add_water_stops_the_flow_measurement() {
    let mut rig = Rig::working();
    rig.set(ParamId::AddWater, 1);
    rig.tick();
    rig.pulses(10);
    rig.tick();
    assert!(rig.counter.is_measuring());

    rig.set(ParamId::AddWater, 0);
    rig.tick();

    assert_eq!(rig.ctrl.state(), StateId::Working);
    assert!(!rig.ctrl.water_on());
    assert!(!rig.counter.is_measuring());
    assert!(!rig.board.level(WATER_GPIO));
    assert!(rig
        .sink
        .events
        .contains(&ControllerEvent::WaterMeasureStopped { read_cl: 10 }));

    for _ in 0..200 {
        rig.tick();
    }
    assert!(!rig.counter.is_measuring());
    assert_eq!(rig.ctrl.flow_health(), FlowHealth::Normal);
    assert_eq!(rig.store.get(ParamId::WaterFlowState), 0);
}

/// Raises an error from inside the tick that leaves `Working`.
struct RaisingSink {
    handle: ControllerHandle,
    accepted: Vec<bool>,
}

impl EventSink for RaisingSink {
    fn emit(&mut self, event: &ControllerEvent) {
        if matches!(event, ControllerEvent::WaterMeasureStopped { .. }) {
            self.accepted.push(self.handle.raise(MachineError::NoWaterFlow));
        }
    }
}

#[test]
fn error_raised_while_leaving_working_is_refused() {
    let mut rig = Rig::working();
    rig.set(ParamId::AddWater, 1);
    rig.tick();
    assert!(rig.ctrl.water_on());

    rig.set(ParamId::StartSystem, 0);
    let mut sink = RaisingSink {
        handle: rig.handle.clone(),
        accepted: Vec::new(),
    };
    rig.clock.advance(100);
    rig.ctrl.tick(&mut rig.board, &rig.peer, &rig.clock, &mut sink);

    assert_eq!(rig.ctrl.state(), StateId::Idle);
    assert_eq!(sink.accepted, vec![false]);
    assert_eq!(rig.store.get(ParamId::MachineErrors), 0);
}

#[test]
fn peer_loss_closes_water_and_drops_to_idle() {
    let mut rig = Rig::working();
    rig.set(ParamId::Valve1State, 1);
    rig.set(ParamId::AddWater, 1);
    rig.tick();
    assert!(rig.ctrl.water_on());

    rig.peer.set(false);
    rig.tick();

    assert_eq!(rig.ctrl.state(), StateId::Idle);
    assert!(!rig.ctrl.water_on());
    assert_eq!(rig.store.get(ParamId::AddWater), 0);
    assert!(!rig.board.level(WATER_GPIO));
    // Other valves keep their last command.
    assert!(rig.board.level(pins::VALVE_GPIOS[0]));
}

#[test]
fn stop_request_returns_to_idle() {
    let mut rig = Rig::working();
    rig.set(ParamId::StartSystem, 0);
    rig.tick();
    assert_eq!(rig.ctrl.state(), StateId::Idle);
    assert!(!rig.handle.is_working());
}

#[test]
fn raise_error_outside_working_has_no_effect() {
    let mut rig = Rig::new();
    rig.tick();
    assert_eq!(rig.ctrl.state(), StateId::Idle);

    assert!(!rig.handle.raise_error(2));
    assert_eq!(rig.store.get(ParamId::MachineErrors), 0);
    rig.tick();
    assert_eq!(rig.ctrl.state(), StateId::Idle);
}

#[test]
fn raise_error_rejects_bits_outside_the_mask() {
    let rig = Rig::working();
    assert!(!rig.handle.raise_error(32));
    assert_eq!(rig.store.get(ParamId::MachineErrors), 0);
}

#[test]
fn error_reset_outside_error_is_refused() {
    let rig = Rig::working();
    assert!(!rig.handle.error_reset());
}

#[test]
fn machine_error_latches_until_acknowledged() {
    let mut rig = Rig::working();
    rig.set(ParamId::Valve4State, 1);
    rig.set(ParamId::AddWater, 1);
    rig.tick();
    assert!(rig.ctrl.water_on());

    assert!(rig.handle.raise(MachineError::NoWaterFlow));
    assert_eq!(rig.latch.tick(&rig.store), Ok(LatchState::WaitingForReset));

    rig.tick();
    assert_eq!(rig.ctrl.state(), StateId::Error);
    assert_eq!(rig.ctrl.valve_states(), [false; pins::VALVE_COUNT]);
    assert!(!rig.ctrl.water_on());
    let mask = MachineError::NoWaterFlow.mask();
    assert!(rig.sink.events.contains(&ControllerEvent::ErrorRaised(mask)));

    // Nothing changes until the operator acknowledges.
    assert_eq!(rig.latch.tick(&rig.store), Ok(LatchState::WaitingForReset));
    rig.tick();
    assert_eq!(rig.ctrl.state(), StateId::Error);

    assert!(rig.handle.error_reset());
    assert_eq!(rig.latch.tick(&rig.store), Ok(LatchState::Idle));
    assert_eq!(rig.store.get(ParamId::MachineErrors), 0);

    rig.tick();
    assert_eq!(rig.ctrl.state(), StateId::Idle);
    assert!(rig.sink.events.contains(&ControllerEvent::ErrorCleared));
}

#[test]
fn several_reasons_accumulate_in_the_mask() {
    let rig = Rig::working();
    assert!(rig.handle.raise(MachineError::Overcurrent));
    assert!(rig.handle.raise(MachineError::LowSupply));
    assert_eq!(
        rig.store.get(ParamId::MachineErrors),
        MachineError::Overcurrent.mask() | MachineError::LowSupply.mask()
    );
}

#[test]
fn working_entry_calibrates_the_measurement_task() {
    use valvectl::sensors::measure::Measurement;

    let mut rig = Rig::working();
    let config = ControllerConfig::default();
    let mut measurement = Measurement::new(rig.measure.clone(), &config);
    let mut adc = MockBoard::new();
    adc.adc_raw = 2048;

    // Fill the filter, then let the calibration delay elapse.
    let mut now = 0;
    for _ in 0..20 {
        measurement.tick(&mut adc, &rig.store, now);
        now += config.measure_interval_ms;
    }

    assert!(!rig.measure.calibration_pending());
    assert_eq!(rig.measure.motor_zero(), 2048);
    assert_eq!(rig.store.get(ParamId::VoltageAccum), 2000);

    rig.tick();
    assert_eq!(rig.ctrl.state(), StateId::Working);
}
