//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ServerController (domain)
//! ```
//!
//! Driven adapters (GPIO/PWM, ADC, storage, peer link, event sinks)
//! implement these traits.  The controller and the parameter store consume
//! them via generics, so the domain core never touches hardware directly.
//!
//! All port errors are typed; callers must handle every variant explicitly.

use crate::config::ControllerConfig;

// ───────────────────────────────────────────────────────────────
// Actuator port (driven adapter: domain → hardware)
// ───────────────────────────────────────────────────────────────

/// Write-side port for valve outputs and the shared current regulator.
pub trait ActuatorPort {
    /// Configure `pin` as a push-pull output driven low.
    fn configure_output(&mut self, pin: i32) -> Result<(), ActuatorError>;

    /// Drive an already-configured output.
    fn set_level(&mut self, pin: i32, high: bool);

    /// Set the duty of a PWM channel in percent (0–100).
    fn set_pwm_duty(&mut self, channel: u32, percent: u8);
}

// ───────────────────────────────────────────────────────────────
// ADC port (driven adapter: hardware → measurement)
// ───────────────────────────────────────────────────────────────

/// Raw 12-bit ADC reads for the measurement task.
pub trait AdcPort {
    /// One conversion on an ADC1 channel (0 – 4095).
    fn read_raw(&mut self, channel: u32) -> u16;
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock.  Wraps after ~49 days; consumers use
/// `wrapping_sub` for elapsed time.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

// ───────────────────────────────────────────────────────────────
// Peer port (network layer → domain)
// ───────────────────────────────────────────────────────────────

/// Reachability of the remote control peer.
pub trait PeerPort {
    fn is_connected(&self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The controller emits structured
/// [`ControllerEvent`](super::events::ControllerEvent)s through this port.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::ControllerEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists controller configuration.
///
/// Implementations MUST validate config values before persisting.
/// Invalid values are rejected with [`ConfigError::ValidationFailed`],
/// not silently clamped.
pub trait ConfigPort {
    /// Load configuration from persistent storage.
    /// Returns [`ControllerConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<ControllerConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &ControllerConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent blob storage keyed by namespace and key.
///
/// Write operations MUST be atomic; no partial writes on power loss.
/// The ESP-IDF NVS API guarantees this natively.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Size in bytes of the stored value.
    fn blob_len(&self, namespace: &str, key: &str) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

/// Errors from [`ActuatorPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// `gpio_config` rejected the pin.
    GpioConfigFailed(i32),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::GpioConfigFailed(pin) => write!(f, "GPIO {} config failed", pin),
        }
    }
}
