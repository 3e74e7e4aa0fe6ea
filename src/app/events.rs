//! Outbound controller events.
//!
//! The [`ServerController`](super::controller::ServerController) emits these
//! through the [`EventSink`](super::ports::EventSink) port.  Adapters decide
//! what to do with them; in firmware they go to the serial log.

use crate::fsm::StateId;
use crate::sensors::flow::FlowHealth;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// The controller task started (carries the initial state).
    Started(StateId),

    StateChanged { from: StateId, to: StateId },

    /// A valve output was switched by the reconcile pass.
    ValveSwitched { index: usize, on: bool },

    /// Water dosing began; the target is in centilitres.
    WaterMeasureStarted { target_cl: u32 },

    /// Water dosing ended.
    WaterMeasureStopped { read_cl: u32 },

    FlowHealthChanged(FlowHealth),

    /// Entered `Error` with this `MachineErrors` mask.
    ErrorRaised(u32),

    /// Left `Error` after acknowledgement.
    ErrorCleared,
}
