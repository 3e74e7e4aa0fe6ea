//! Unified error types for the valve controller firmware.
//!
//! A single `Error` enum that every subsystem converts into, so `main` and
//! the task loops handle failures uniformly.  All variants are `Copy`.

use core::fmt;

use crate::app::ports::StorageError;
use crate::drivers::hw_init::HwInitError;
use crate::params::ParamError;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A parameter read/write was rejected.
    Param(ParamError),
    /// The persistence backend failed.
    Storage(StorageError),
    /// Peripheral initialisation failed.
    Hardware(HwInitError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Param(e) => write!(f, "param: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Hardware(e) => write!(f, "hardware: {e}"),
        }
    }
}

impl core::error::Error for Error {}

impl From<ParamError> for Error {
    fn from(e: ParamError) -> Self {
        Self::Param(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<HwInitError> for Error {
    fn from(e: HwInitError) -> Self {
        Self::Hardware(e)
    }
}

// ---------------------------------------------------------------------------
// Machine error reasons
// ---------------------------------------------------------------------------

/// Process faults reported by the fault-detection collaborators.
///
/// Each reason owns one bit of the `MachineErrors` parameter.  A non-zero
/// mask latches the controller in `Error` until an operator reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MachineError {
    /// Valve driver current above the regulator limit.
    Overcurrent = 0,
    /// Water valve open but the flow sensor stays silent.
    NoWaterFlow = 1,
    /// Flow sensor pulsing faster than physically possible.
    FlowReversed = 2,
    /// Control peer vanished while a run was active.
    PeerLost = 3,
    /// 12 V rail below the valve hold-in voltage.
    LowSupply = 4,
}

impl MachineError {
    pub const ALL: [Self; 5] = [
        Self::Overcurrent,
        Self::NoWaterFlow,
        Self::FlowReversed,
        Self::PeerLost,
        Self::LowSupply,
    ];

    /// Bit index inside the `MachineErrors` mask.
    pub const fn bit(self) -> u8 {
        self as u8
    }

    /// Return the bitmask for this reason.
    pub const fn mask(self) -> u32 {
        1 << self as u8
    }
}

impl fmt::Display for MachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overcurrent => write!(f, "valve overcurrent"),
            Self::NoWaterFlow => write!(f, "no water flow"),
            Self::FlowReversed => write!(f, "flow reversed"),
            Self::PeerLost => write!(f, "control peer lost"),
            Self::LowSupply => write!(f, "supply voltage low"),
        }
    }
}
