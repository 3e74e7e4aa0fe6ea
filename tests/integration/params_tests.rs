//! Parameter store persistence and remote-surface integration tests.

use std::sync::Arc;

use valvectl::adapters::peer::PeerLink;
use valvectl::adapters::time::ManualClock;
use valvectl::app::controller::ServerController;
use valvectl::app::ports::{PeerPort, StoragePort};
use valvectl::config::ControllerConfig;
use valvectl::error::MachineError;
use valvectl::fsm::StateId;
use valvectl::params::remote::{ParamResponse, RemoteParams};
use valvectl::params::{BootSource, NAMESPACE, ParamError, ParamId, ParamStore, RECORD_KEY, record};
use valvectl::safety::{ErrorLatch, LatchState};
use valvectl::sensors::flow::FlowCounter;
use valvectl::sensors::measure::MeasureShared;

use crate::mock_hw::{CollectSink, MockBoard, MockNvs};

#[test]
fn first_boot_installs_and_persists_defaults() {
    let mut nvs = MockNvs::new();
    let store = ParamStore::new();

    assert_eq!(store.init(&mut nvs), Ok(BootSource::Defaults));
    assert_eq!(nvs.writes, 1);
    assert_eq!(
        nvs.raw(NAMESPACE, RECORD_KEY).map(<[u8]>::len),
        Some(record::RECORD_SIZE)
    );
    for id in ParamId::ALL {
        assert_eq!(store.get(id), id.default_value());
    }
}

#[test]
fn wrong_size_record_falls_back_to_defaults() {
    let mut nvs = MockNvs::new();
    nvs.write(NAMESPACE, RECORD_KEY, &[0u8; record::RECORD_SIZE - 4])
        .unwrap();

    let store = ParamStore::new();
    assert_eq!(store.load(&nvs), Err(ParamError::SizeMismatch));
    assert_eq!(store.init(&mut nvs), Ok(BootSource::Defaults));

    assert_eq!(store.get(ParamId::PwmValve), 50);
    assert_eq!(nvs.blob_len(NAMESPACE, RECORD_KEY), Ok(record::RECORD_SIZE));
}

#[test]
fn out_of_range_record_is_rejected_whole() {
    let mut values = ParamId::ALL.map(ParamId::default_value);
    values[ParamId::WaterVolAdd as usize] = 300;
    values[ParamId::PwmValve as usize] = 5;
    let mut nvs = MockNvs::new();
    nvs.write(NAMESPACE, RECORD_KEY, &record::encode(&values))
        .unwrap();

    let store = ParamStore::new();
    assert_eq!(store.load(&nvs), Err(ParamError::OutOfRange));
    assert_eq!(store.get(ParamId::WaterVolAdd), 100);
}

#[test]
fn save_reset_load_restores_settings() {
    let mut nvs = MockNvs::new();
    let store = ParamStore::new();
    store.set(ParamId::WaterVolAdd, 420).unwrap();
    store.set(ParamId::PulsesPerLiter, 450).unwrap();
    store.set(ParamId::Valve3State, 1).unwrap();
    store.save(&mut nvs).unwrap();

    store.reset_to_defaults();
    assert_eq!(store.get(ParamId::WaterVolAdd), 100);

    store.load(&nvs).unwrap();
    assert_eq!(store.get(ParamId::WaterVolAdd), 420);
    assert_eq!(store.get(ParamId::PulsesPerLiter), 450);
    assert_eq!(store.get(ParamId::Valve3State), 1);
}

#[test]
fn reboot_clears_run_state_but_keeps_settings() {
    let mut nvs = MockNvs::new();
    let store = ParamStore::new();
    store.set(ParamId::StartSystem, 1).unwrap();
    store.set(ParamId::MachineErrors, 3).unwrap();
    store.set(ParamId::TankSize, 500).unwrap();
    store.save(&mut nvs).unwrap();

    let rebooted = ParamStore::new();
    assert_eq!(rebooted.init(&mut nvs), Ok(BootSource::Loaded));
    assert_eq!(rebooted.get(ParamId::StartSystem), 0);
    assert_eq!(rebooted.get(ParamId::MachineErrors), 0);
    assert_eq!(rebooted.get(ParamId::TankSize), 500);
}

#[test]
fn autosave_writes_only_after_setting_changes() {
    let mut nvs = MockNvs::new();
    let store = ParamStore::new();
    store.init(&mut nvs).unwrap();
    let baseline = nvs.writes;

    store.set(ParamId::WaterVolRead, 1234).unwrap();
    assert_eq!(store.save_if_dirty(&mut nvs), Ok(false));
    assert_eq!(nvs.writes, baseline);

    store.set(ParamId::Brightness, 3).unwrap();
    assert_eq!(store.save_if_dirty(&mut nvs), Ok(true));
    assert_eq!(store.save_if_dirty(&mut nvs), Ok(false));
    assert_eq!(nvs.writes, baseline + 1);
}

#[test]
fn remote_requests_drive_the_controller() {
    let clock = Arc::new(ManualClock::new(0));
    let store = Arc::new(ParamStore::new());
    let peer = Arc::new(PeerLink::new(clock.clone(), 3_000));
    let remote = RemoteParams::new(store.clone(), peer.clone());

    let counter: &'static FlowCounter = Box::leak(Box::new(FlowCounter::new()));
    let latch = ErrorLatch::new();
    let mut ctrl = ServerController::new(
        &ControllerConfig::default(),
        store.clone(),
        counter,
        Arc::new(MeasureShared::new()),
        latch.reset_handle(),
    );
    let mut board = MockBoard::new();
    let mut sink = CollectSink::default();
    ctrl.start(&mut sink);
    ctrl.tick(&mut board, &*peer, &*clock, &mut sink);
    assert_eq!(ctrl.state(), StateId::Idle);

    let reply = remote.handle(br#"{"cmd":"set_key","key":"start_system","value":1}"#);
    let reply: ParamResponse = serde_json::from_slice(&reply).unwrap();
    assert_eq!(reply, ParamResponse::Ok);
    assert!(peer.is_connected());

    ctrl.tick(&mut board, &*peer, &*clock, &mut sink);
    assert_eq!(ctrl.state(), StateId::Working);

    // Link goes quiet past the timeout.
    clock.advance(3_000);
    ctrl.tick(&mut board, &*peer, &*clock, &mut sink);
    assert_eq!(ctrl.state(), StateId::Idle);
}

#[test]
fn remote_rejects_out_of_range_writes() {
    let clock = Arc::new(ManualClock::new(0));
    let store = Arc::new(ParamStore::new());
    let peer = Arc::new(PeerLink::new(clock, 3_000));
    let remote = RemoteParams::new(store.clone(), peer);

    let body = format!(r#"{{"cmd":"set","id":{},"value":5}}"#, ParamId::PwmValve as u16);
    let reply: ParamResponse = serde_json::from_slice(&remote.handle(body.as_bytes())).unwrap();
    assert!(matches!(reply, ParamResponse::Error { .. }));
    assert_eq!(store.get(ParamId::PwmValve), 50);
}

#[test]
fn remote_acknowledges_latched_errors() {
    let clock = Arc::new(ManualClock::new(0));
    let store = Arc::new(ParamStore::new());
    let peer = Arc::new(PeerLink::new(clock.clone(), 3_000));

    let counter: &'static FlowCounter = Box::leak(Box::new(FlowCounter::new()));
    let mut latch = ErrorLatch::new();
    let mut ctrl = ServerController::new(
        &ControllerConfig::default(),
        store.clone(),
        counter,
        Arc::new(MeasureShared::new()),
        latch.reset_handle(),
    );
    let remote = RemoteParams::new(store.clone(), peer.clone()).with_controller(ctrl.handle());
    let call = |body: &str| -> ParamResponse {
        serde_json::from_slice(&remote.handle(body.as_bytes())).unwrap()
    };

    let mut board = MockBoard::new();
    let mut sink = CollectSink::default();
    ctrl.start(&mut sink);
    ctrl.tick(&mut board, &*peer, &*clock, &mut sink);

    // Nothing latched yet.
    assert!(matches!(call(r#"{"cmd":"error_reset"}"#), ParamResponse::Error { .. }));

    assert_eq!(call(r#"{"cmd":"set_key","key":"start_system","value":1}"#), ParamResponse::Ok);
    ctrl.tick(&mut board, &*peer, &*clock, &mut sink);
    assert_eq!(
        call(r#"{"cmd":"status"}"#),
        ParamResponse::Controller {
            state: StateId::Working,
            working: true,
            emergency_disable: false,
            machine_errors: 0,
        }
    );

    assert!(ctrl.handle().raise(MachineError::Overcurrent));
    ctrl.tick(&mut board, &*peer, &*clock, &mut sink);
    assert_eq!(ctrl.state(), StateId::Error);
    assert_eq!(latch.tick(&store), Ok(LatchState::WaitingForReset));

    assert_eq!(call(r#"{"cmd":"error_reset"}"#), ParamResponse::Ok);
    assert_eq!(latch.tick(&store), Ok(LatchState::Idle));
    assert_eq!(store.get(ParamId::MachineErrors), 0);

    ctrl.tick(&mut board, &*peer, &*clock, &mut sink);
    assert_eq!(ctrl.state(), StateId::Idle);
    match call(r#"{"cmd":"status"}"#) {
        ParamResponse::Controller { state, working, .. } => {
            assert_eq!(state, StateId::Idle);
            assert!(!working);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn remote_cannot_write_status_values() {
    let clock = Arc::new(ManualClock::new(0));
    let store = Arc::new(ParamStore::new());
    let peer = Arc::new(PeerLink::new(clock, 3_000));
    let remote = RemoteParams::new(store.clone(), peer);

    for id in [ParamId::MachineErrors, ParamId::WaterVolRead, ParamId::VoltageAccum] {
        let body = format!(r#"{{"cmd":"set_key","key":"{}","value":4}}"#, id.key());
        let reply: ParamResponse = serde_json::from_slice(&remote.handle(body.as_bytes())).unwrap();
        assert_eq!(
            reply,
            ParamResponse::Error {
                reason: ParamError::ReadOnly.to_string()
            }
        );
        assert_eq!(store.get(id), 0);
    }
}
