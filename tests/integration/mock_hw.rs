//! Mock adapters for integration tests.
//!
//! [`MockBoard`] records every GPIO, PWM and delay call in order so tests
//! can assert on the full output history without real registers.

use std::cell::Cell;
use std::collections::HashMap;

use embedded_hal::delay::DelayNs;
use valvectl::app::events::ControllerEvent;
use valvectl::app::ports::{
    ActuatorError, ActuatorPort, AdcPort, EventSink, PeerPort, StorageError, StoragePort,
};

// ── Board ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwCall {
    Configure(i32),
    Level(i32, bool),
    Duty(u32, u8),
    Delay(u32),
}

#[derive(Default)]
pub struct MockBoard {
    pub calls: Vec<HwCall>,
    /// Raw value returned for every ADC read.
    pub adc_raw: u16,
}

#[allow(dead_code)]
impl MockBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last level written to `pin`, `false` if never written.
    pub fn level(&self, pin: i32) -> bool {
        self.calls
            .iter()
            .rev()
            .find_map(|c| match c {
                HwCall::Level(p, high) if *p == pin => Some(*high),
                _ => None,
            })
            .unwrap_or(false)
    }

    pub fn pwm_writes(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, HwCall::Duty(..)))
            .count()
    }

    pub fn delays(&self) -> Vec<u32> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                HwCall::Delay(ms) => Some(*ms),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

impl ActuatorPort for MockBoard {
    fn configure_output(&mut self, pin: i32) -> Result<(), ActuatorError> {
        self.calls.push(HwCall::Configure(pin));
        Ok(())
    }

    fn set_level(&mut self, pin: i32, high: bool) {
        self.calls.push(HwCall::Level(pin, high));
    }

    fn set_pwm_duty(&mut self, channel: u32, percent: u8) {
        self.calls.push(HwCall::Duty(channel, percent));
    }
}

impl DelayNs for MockBoard {
    fn delay_ns(&mut self, ns: u32) {
        self.calls.push(HwCall::Delay(ns / 1_000_000));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.calls.push(HwCall::Delay(ms));
    }
}

impl AdcPort for MockBoard {
    fn read_raw(&mut self, _channel: u32) -> u16 {
        self.adc_raw
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Default)]
pub struct MockNvs {
    blobs: HashMap<String, Vec<u8>>,
    pub writes: usize,
}

#[allow(dead_code)]
impl MockNvs {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(ns: &str, key: &str) -> String {
        format!("{ns}::{key}")
    }

    pub fn raw(&self, ns: &str, key: &str) -> Option<&[u8]> {
        self.blobs.get(&Self::key(ns, key)).map(Vec::as_slice)
    }
}

impl StoragePort for MockNvs {
    fn read(&self, ns: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let data = self.blobs.get(&Self::key(ns, key)).ok_or(StorageError::NotFound)?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn blob_len(&self, ns: &str, key: &str) -> Result<usize, StorageError> {
        self.blobs
            .get(&Self::key(ns, key))
            .map(Vec::len)
            .ok_or(StorageError::NotFound)
    }

    fn write(&mut self, ns: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.writes += 1;
        self.blobs.insert(Self::key(ns, key), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, ns: &str, key: &str) -> Result<(), StorageError> {
        self.blobs.remove(&Self::key(ns, key));
        Ok(())
    }

    fn exists(&self, ns: &str, key: &str) -> bool {
        self.blobs.contains_key(&Self::key(ns, key))
    }
}

// ── Peer ──────────────────────────────────────────────────────

pub struct MockPeer {
    connected: Cell<bool>,
}

#[allow(dead_code)]
impl MockPeer {
    pub fn connected() -> Self {
        Self {
            connected: Cell::new(true),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            connected: Cell::new(false),
        }
    }

    pub fn set(&self, connected: bool) {
        self.connected.set(connected);
    }
}

impl PeerPort for MockPeer {
    fn is_connected(&self) -> bool {
        self.connected.get()
    }
}

// ── Event sink ────────────────────────────────────────────────

#[derive(Default)]
pub struct CollectSink {
    pub events: Vec<ControllerEvent>,
}

impl EventSink for CollectSink {
    fn emit(&mut self, event: &ControllerEvent) {
        self.events.push(event.clone());
    }
}
