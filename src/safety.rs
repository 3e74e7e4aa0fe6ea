//! Machine-error latch.
//!
//! Any task may OR a reason bit into `MachineErrors`; the controller drops
//! to `Error` on the next tick and stays there.  This latch owns the other
//! half of the lifecycle:
//!
//! 1. `Idle`: waits for `MachineErrors != 0`, then moves to `WaitingForReset`.
//! 2. `WaitingForReset`: waits for an acknowledgement (button or remote,
//!    routed through [`ErrorResetHandle`]).
//! 3. On acknowledgement it writes `MachineErrors = 0`, clears the request
//!    and returns to `Idle`.  The controller sees the zero and goes `Idle`.
//!
//! Runs on its own task every `latch_poll_ms`.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};

use crate::error::MachineError;
use crate::params::{ParamError, ParamId, ParamStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchState {
    Idle,
    WaitingForReset,
}

/// Cloneable acknowledgement line into the latch.
#[derive(Debug, Clone, Default)]
pub struct ErrorResetHandle {
    requested: Arc<AtomicBool>,
}

impl ErrorResetHandle {
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

pub struct ErrorLatch {
    state: LatchState,
    reset: ErrorResetHandle,
}

impl Default for ErrorLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorLatch {
    pub fn new() -> Self {
        Self {
            state: LatchState::Idle,
            reset: ErrorResetHandle::default(),
        }
    }

    pub fn reset_handle(&self) -> ErrorResetHandle {
        self.reset.clone()
    }

    pub fn state(&self) -> LatchState {
        self.state
    }

    /// One latch step.
    pub fn tick(&mut self, store: &ParamStore) -> Result<LatchState, ParamError> {
        let errors = store.get(ParamId::MachineErrors);

        match self.state {
            LatchState::Idle => {
                if errors != 0 {
                    warn!(target: "error", "machine errors latched: {}", describe(errors));
                    self.state = LatchState::WaitingForReset;
                } else {
                    // Nothing to acknowledge.
                    self.reset.requested.store(false, Ordering::Release);
                }
            }
            LatchState::WaitingForReset => {
                if self.reset.requested.swap(false, Ordering::AcqRel) {
                    store.set(ParamId::MachineErrors, 0)?;
                    info!(target: "error", "machine errors acknowledged");
                    self.state = LatchState::Idle;
                } else if errors == 0 {
                    // Cleared elsewhere (controller Init).
                    self.state = LatchState::Idle;
                }
            }
        }
        Ok(self.state)
    }
}

/// Human-readable list of the set reason bits.
pub fn describe(errors: u32) -> heapless::String<96> {
    use core::fmt::Write;
    let mut out = heapless::String::new();
    for reason in MachineError::ALL {
        if errors & reason.mask() != 0 {
            let _ = write!(out, "{} ", reason);
        }
    }
    let unknown = errors & !MachineError::ALL.iter().fold(0, |acc, r| acc | r.mask());
    if unknown != 0 {
        let _ = write!(out, "0x{:x}", unknown);
    }
    out
}
