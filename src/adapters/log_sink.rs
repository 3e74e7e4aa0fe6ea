//! Log-based event sink.
//!
//! Writes every [`ControllerEvent`] to the ESP-IDF logger, which ends up
//! on UART in production.  A network sink would implement the same port.

use log::{info, warn};

use crate::app::events::ControllerEvent;
use crate::app::ports::EventSink;
use crate::safety;

#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &ControllerEvent) {
        match event {
            ControllerEvent::Started(state) => {
                info!(target: "srvr_ctrl", "START | initial_state={:?}", state);
            }
            ControllerEvent::StateChanged { from, to } => {
                info!(target: "srvr_ctrl", "STATE | {:?} -> {:?}", from, to);
            }
            ControllerEvent::ValveSwitched { index, on } => {
                info!(
                    target: "valve",
                    "VALVE | {} {}",
                    index + 1,
                    if *on { "ON" } else { "OFF" }
                );
            }
            ControllerEvent::WaterMeasureStarted { target_cl } => {
                info!(
                    target: "flow",
                    "WATER | start, target {}.{:02} L",
                    target_cl / 100,
                    target_cl % 100
                );
            }
            ControllerEvent::WaterMeasureStopped { read_cl } => {
                info!(
                    target: "flow",
                    "WATER | stop, read {}.{:02} L",
                    read_cl / 100,
                    read_cl % 100
                );
            }
            ControllerEvent::FlowHealthChanged(health) => {
                info!(target: "flow", "FLOW | health={:?} code={}", health, health.code());
            }
            ControllerEvent::ErrorRaised(mask) => {
                warn!(
                    target: "error",
                    "FAULT | 0b{:08b} ({})",
                    mask,
                    safety::describe(*mask)
                );
            }
            ControllerEvent::ErrorCleared => {
                info!(target: "error", "FAULT | cleared");
            }
        }
    }
}
