//! ADC measurement task: supply voltage and valve current.
//!
//! Each tick multisamples every channel, pushes the average into a small
//! filter table and publishes the 12 V rail into `VoltageAccum`
//! (volts × 10 000).  The controller asks for a motor-current zero
//! calibration when a run starts; the capture happens `calibration_delay_ms`
//! later on this task so the controller never blocks on it.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use log::{info, warn};

use crate::app::ports::AdcPort;
use crate::config::ControllerConfig;
use crate::params::{ParamId, ParamStore};
use crate::pins;

/// Conversions averaged per sample.
pub const MULTISAMPLES: u32 = 64;
/// Depth of the per-channel filter table.
pub const FILTER_TABLE_SIZE: usize = 10;
/// Motor zero used until the first calibration.
pub const DEFAULT_MOTOR_ZERO: u32 = 1830;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MeasureChannel {
    Input = 0,
    Motor = 1,
    Supply12V = 2,
}

impl MeasureChannel {
    pub const COUNT: usize = 3;
    pub const ALL: [Self; Self::COUNT] = [Self::Input, Self::Motor, Self::Supply12V];

    pub const fn adc_channel(self) -> u32 {
        match self {
            Self::Input => pins::ADC1_CH_INPUT,
            Self::Motor => pins::ADC1_CH_MOTOR,
            Self::Supply12V => pins::ADC1_CH_SUPPLY_12V,
        }
    }
}

// ── Filter ────────────────────────────────────────────────────

/// Ring of recent samples reduced by running pairwise averaging, oldest
/// first, so newer samples weigh more.
#[derive(Debug, Clone, Copy, Default)]
struct ChannelFilter {
    table: [u16; FILTER_TABLE_SIZE],
    len: usize,
    next: usize,
    filtered: u16,
}

impl ChannelFilter {
    fn push(&mut self, sample: u16) {
        self.table[self.next] = sample;
        self.next = (self.next + 1) % FILTER_TABLE_SIZE;
        self.len = (self.len + 1).min(FILTER_TABLE_SIZE);

        let oldest = (self.next + FILTER_TABLE_SIZE - self.len) % FILTER_TABLE_SIZE;
        let mut acc = u32::from(self.table[oldest]);
        for i in 1..self.len {
            let s = self.table[(oldest + i) % FILTER_TABLE_SIZE];
            acc = (acc + u32::from(s)) / 2;
        }
        self.filtered = acc as u16;
    }
}

// ── Shared state ──────────────────────────────────────────────

/// State shared between the measurement task and the controller.
#[derive(Debug)]
pub struct MeasureShared {
    calibration_requested: AtomicBool,
    motor_zero: AtomicU32,
    motor_filtered: AtomicU32,
}

impl Default for MeasureShared {
    fn default() -> Self {
        Self::new()
    }
}

impl MeasureShared {
    pub const fn new() -> Self {
        Self {
            calibration_requested: AtomicBool::new(false),
            motor_zero: AtomicU32::new(DEFAULT_MOTOR_ZERO),
            motor_filtered: AtomicU32::new(0),
        }
    }

    /// Ask for a motor-current zero capture.
    pub fn request_calibration(&self) {
        self.calibration_requested.store(true, Ordering::Release);
    }

    pub fn calibration_pending(&self) -> bool {
        self.calibration_requested.load(Ordering::Acquire)
    }

    pub fn motor_zero(&self) -> u32 {
        self.motor_zero.load(Ordering::Acquire)
    }

    /// Valve driver current in milliamps above the calibrated zero.
    pub fn motor_current_ma(&self) -> u32 {
        let raw = self.motor_filtered.load(Ordering::Acquire);
        raw.saturating_sub(self.motor_zero()) * 92 / 100
    }
}

// ── Task body ─────────────────────────────────────────────────

pub struct Measurement {
    filters: [ChannelFilter; MeasureChannel::COUNT],
    shared: Arc<MeasureShared>,
    calibration_delay_ms: u32,
    calibration_started_ms: Option<u32>,
}

impl Measurement {
    pub fn new(shared: Arc<MeasureShared>, config: &ControllerConfig) -> Self {
        Self {
            filters: [ChannelFilter::default(); MeasureChannel::COUNT],
            shared,
            calibration_delay_ms: config.calibration_delay_ms,
            calibration_started_ms: None,
        }
    }

    /// Averaged reading of one channel.
    fn sample(adc: &mut impl AdcPort, channel: MeasureChannel) -> u16 {
        let ch = channel.adc_channel();
        let sum: u32 = (0..MULTISAMPLES).map(|_| u32::from(adc.read_raw(ch))).sum();
        (sum / MULTISAMPLES) as u16
    }

    pub fn filtered(&self, channel: MeasureChannel) -> u16 {
        self.filters[channel as usize].filtered
    }

    /// Supply rail, volts × 10 000: `filtered / 4096 / 2.5`.
    pub fn supply_scaled(&self) -> u32 {
        u32::from(self.filtered(MeasureChannel::Supply12V)) * 10_000 / 10_240
    }

    /// One measurement cycle.
    pub fn tick(&mut self, adc: &mut impl AdcPort, store: &ParamStore, now_ms: u32) {
        for channel in MeasureChannel::ALL {
            let sample = Self::sample(adc, channel);
            self.filters[channel as usize].push(sample);
        }
        self.shared.motor_filtered.store(
            u32::from(self.filtered(MeasureChannel::Motor)),
            Ordering::Release,
        );

        if let Err(e) = store.set(ParamId::VoltageAccum, self.supply_scaled()) {
            warn!(target: "measure", "publishing supply voltage failed: {}", e);
        }

        self.run_calibration(now_ms);
    }

    fn run_calibration(&mut self, now_ms: u32) {
        if self.calibration_started_ms.is_none()
            && self.shared.calibration_requested.swap(false, Ordering::AcqRel)
        {
            self.calibration_started_ms = Some(now_ms);
        }

        if let Some(started) = self.calibration_started_ms {
            if now_ms.wrapping_sub(started) >= self.calibration_delay_ms {
                let zero = u32::from(self.filtered(MeasureChannel::Motor));
                self.shared.motor_zero.store(zero, Ordering::Release);
                self.calibration_started_ms = None;
                info!(target: "measure", "motor zero calibrated to {}", zero);
            }
        }
    }
}
