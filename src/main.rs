//! Valve server controller firmware, main entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                     │
//! │                                                              │
//! │  HardwareAdapter   LogEventSink   NvsAdapter   SystemClock   │
//! │  (GPIO/LEDC/ADC)   (EventSink)    (NVS blobs)  (Clock)       │
//! │  PeerLink          RemoteParams (console JSON lines)         │
//! │                                                              │
//! │  ─────────────────── Port Trait Boundary ─────────────────   │
//! │                                                              │
//! │  ┌──────────────────────────────────────────────────────┐    │
//! │  │  ServerController · ParamStore · ErrorLatch          │    │
//! │  │  WaterFlowSensor · Measurement                       │    │
//! │  └──────────────────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Tasks: controller, measurement, error latch with autosave, and the
//! console request reader.

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};

use valvectl::adapters::device_id;
use valvectl::adapters::hardware::HardwareAdapter;
use valvectl::adapters::log_sink::LogEventSink;
use valvectl::adapters::nvs::NvsAdapter;
use valvectl::adapters::peer::PeerLink;
use valvectl::adapters::time::SystemClock;
use valvectl::app::controller::ServerController;
use valvectl::app::ports::{Clock, ConfigPort};
use valvectl::config::ControllerConfig;
use valvectl::drivers::hw_init;
use valvectl::params::remote::RemoteParams;
use valvectl::params::{BootSource, ParamStore, StringParamId};
use valvectl::safety::ErrorLatch;
use valvectl::sensors::flow::FLOW_COUNTER;
use valvectl::sensors::measure::{MeasureShared, Measurement};

const CONTROLLER_STACK: usize = 4096;
const WORKER_STACK: usize = 4096;
const CONSOLE_STACK: usize = 6144;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("valvectl v{} starting", env!("CARGO_PKG_VERSION"));

    // ── 2. Persistence and configuration ──────────────────────
    let mut nvs = NvsAdapter::new().map_err(valvectl::Error::from)?;
    let config = nvs.load().unwrap_or_else(|e| {
        warn!("controller config unusable ({}), restoring defaults", e);
        let config = ControllerConfig::default();
        if let Err(e) = nvs.save(&config) {
            warn!("default controller config not persisted: {}", e);
        }
        config
    });

    // ── 3. Peripherals ────────────────────────────────────────
    hw_init::init_peripherals(config.valve_pwm_freq_hz).map_err(valvectl::Error::from)?;
    if let Err(e) = hw_init::init_isr_service() {
        // Without the ISR the flow sensor stays silent and dosing ends in
        // a no-flow fault rather than overfilling.
        error!("flow ISR unavailable: {}", e);
    }

    // ── 4. Parameter store ────────────────────────────────────
    let store = Arc::new(ParamStore::new());
    match store.init(&mut nvs) {
        Ok(BootSource::Loaded) => info!("parameters restored"),
        Ok(BootSource::Defaults) => info!("parameters initialised with defaults"),
        Err(e) => warn!("parameter persistence unavailable: {}", e),
    }
    let sn = device_id::serial_number(&device_id::read_mac());
    if let Err(e) = store.set_string(StringParamId::ControllerSn, &sn) {
        warn!("serial number not stored: {}", e);
    }
    info!("controller serial {}", sn);

    // ── 5. Shared objects ─────────────────────────────────────
    let measure_shared = Arc::new(MeasureShared::new());
    let peer = Arc::new(PeerLink::new(SystemClock::new(), config.peer_timeout_ms));
    let mut latch = ErrorLatch::new();

    let mut controller = ServerController::new(
        &config,
        store.clone(),
        &FLOW_COUNTER,
        measure_shared.clone(),
        latch.reset_handle(),
    );
    let controller_handle = controller.handle();

    // ── 6. Controller task ────────────────────────────────────
    let controller_task = {
        let peer = peer.clone();
        thread::Builder::new()
            .name("srvr_ctrl".into())
            .stack_size(CONTROLLER_STACK)
            .spawn(move || {
                let mut hw = HardwareAdapter::new();
                let clock = SystemClock::new();
                let mut sink = LogEventSink::new();
                controller.start(&mut sink);
                loop {
                    controller.tick(&mut hw, &*peer, &clock, &mut sink);
                }
            })
            .context("spawn controller task")?
    };

    // ── 7. Measurement task ───────────────────────────────────
    {
        let store = store.clone();
        let interval = Duration::from_millis(u64::from(config.measure_interval_ms));
        let mut measurement = Measurement::new(measure_shared, &config);
        thread::Builder::new()
            .name("measure".into())
            .stack_size(WORKER_STACK)
            .spawn(move || {
                let mut adc = HardwareAdapter::new();
                let clock = SystemClock::new();
                loop {
                    measurement.tick(&mut adc, &store, clock.now_ms());
                    thread::sleep(interval);
                }
            })
            .context("spawn measurement task")?;
    }

    // ── 8. Error latch + autosave task ────────────────────────
    {
        let store = store.clone();
        let poll = Duration::from_millis(u64::from(config.latch_poll_ms));
        let autosave_ms = config.autosave_interval_ms;
        thread::Builder::new()
            .name("error_latch".into())
            .stack_size(WORKER_STACK)
            .spawn(move || {
                let clock = SystemClock::new();
                let mut last_save = clock.now_ms();
                loop {
                    if let Err(e) = latch.tick(&store) {
                        error!(target: "error", "latch clear failed: {}", e);
                    }
                    let now = clock.now_ms();
                    if now.wrapping_sub(last_save) >= autosave_ms {
                        last_save = now;
                        match store.save_if_dirty(&mut nvs) {
                            Ok(true) => info!(target: "params", "settings saved"),
                            Ok(false) => {}
                            Err(e) => error!(target: "params", "autosave failed: {}", e),
                        }
                    }
                    thread::sleep(poll);
                }
            })
            .context("spawn error latch task")?;
    }

    // ── 9. Console transport ──────────────────────────────────
    // One JSON request per line in, one JSON response per line out.
    {
        let remote = RemoteParams::new(store, peer.clone()).with_controller(controller_handle);
        thread::Builder::new()
            .name("remote".into())
            .stack_size(CONSOLE_STACK)
            .spawn(move || {
                let stdin = std::io::stdin();
                let mut stdout = std::io::stdout();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else {
                        thread::sleep(Duration::from_millis(50));
                        continue;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let mut reply = remote.handle(line.as_bytes());
                    reply.push(b'\n');
                    if stdout.write_all(&reply).and_then(|()| stdout.flush()).is_err() {
                        warn!(target: "remote", "console write failed");
                    }
                }
                warn!(target: "remote", "console closed");
                peer.disconnect();
            })
            .context("spawn console task")?;
    }

    info!("all tasks running");
    controller_task
        .join()
        .map_err(|_| anyhow::anyhow!("controller task panicked"))?;
    Ok(())
}
