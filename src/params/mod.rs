//! Parameter store: the shared registry of bounded, persisted values.
//!
//! Every piece of configuration and live state exchanged between the
//! controller task, the measurement task, the error latch and the remote
//! control peer lives in one fixed table:
//!
//! ```text
//!  remote get/set ──▶ ┌──────────────┐ ◀── measurement (VoltageAccum)
//!                     │  ParamStore  │
//!  controller ◀──────▶│  [u32; 27]   │ ◀── error latch (MachineErrors)
//!                     └──────┬───────┘
//!                            ▼
//!                   NVS "parameters"/"menu"
//! ```
//!
//! Writes outside `[min, max]` are rejected, never clamped.  The whole
//! table sits behind one critical-section mutex and every access is a
//! short closure, so readers never observe a torn table.

pub mod record;
pub mod remote;

use core::cell::RefCell;
use core::fmt;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{StorageError, StoragePort};

/// NVS namespace holding the parameter record.
pub const NAMESPACE: &str = "parameters";
/// NVS key of the parameter record.
pub const RECORD_KEY: &str = "menu";

/// Capacity of each free-text slot, in bytes.
pub const STRING_CAPACITY: usize = 32;

// ---------------------------------------------------------------------------
// Parameter identity
// ---------------------------------------------------------------------------

/// Numeric parameters.  The discriminant is the index into the value table
/// and into the persisted record, so new entries go at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ParamId {
    Valve1State = 0,
    Valve2State = 1,
    Valve3State = 2,
    Valve4State = 3,
    Valve5State = 4,
    Valve6State = 5,
    Valve7State = 6,
    AddWater = 7,
    WaterVolAdd = 8,
    WaterVolRead = 9,
    VoltageAccum = 10,
    StartSystem = 11,
    BootUpSystem = 12,
    EmergencyDisable = 13,
    SilosLevel = 14,
    SilosSensorConnected = 15,
    SilosHeight = 16,
    LowLevelSilos = 17,
    Language = 18,
    PowerOnMin = 19,
    PulsesPerLiter = 20,
    PwmValve = 21,
    TankSize = 22,
    MachineErrors = 23,
    WaterFlowState = 24,
    Buzzer = 25,
    Brightness = 26,
}

impl ParamId {
    /// Total number of numeric parameters.
    pub const COUNT: usize = 27;

    /// Every id in table order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Valve1State,
        Self::Valve2State,
        Self::Valve3State,
        Self::Valve4State,
        Self::Valve5State,
        Self::Valve6State,
        Self::Valve7State,
        Self::AddWater,
        Self::WaterVolAdd,
        Self::WaterVolRead,
        Self::VoltageAccum,
        Self::StartSystem,
        Self::BootUpSystem,
        Self::EmergencyDisable,
        Self::SilosLevel,
        Self::SilosSensorConnected,
        Self::SilosHeight,
        Self::LowLevelSilos,
        Self::Language,
        Self::PowerOnMin,
        Self::PulsesPerLiter,
        Self::PwmValve,
        Self::TankSize,
        Self::MachineErrors,
        Self::WaterFlowState,
        Self::Buzzer,
        Self::Brightness,
    ];

    /// Valve command parameters, index 0 = valve 1.
    pub const VALVES: [Self; crate::pins::VALVE_COUNT] = [
        Self::Valve1State,
        Self::Valve2State,
        Self::Valve3State,
        Self::Valve4State,
        Self::Valve5State,
        Self::Valve6State,
        Self::Valve7State,
    ];

    /// Look up a numeric id coming from the network boundary.
    pub fn from_index(idx: u16) -> Option<Self> {
        Self::ALL.get(idx as usize).copied()
    }

    /// Look up an id by its wire key (`"pulses_per_liter"`).
    pub fn from_key(key: &str) -> Option<Self> {
        DESCRIPTORS.iter().find(|d| d.key == key).map(|d| d.id)
    }

    pub fn descriptor(self) -> &'static ParamDescriptor {
        &DESCRIPTORS[self as usize]
    }

    pub fn key(self) -> &'static str {
        self.descriptor().key
    }

    pub fn min(self) -> u32 {
        self.descriptor().min
    }

    pub fn max(self) -> u32 {
        self.descriptor().max
    }

    pub fn default_value(self) -> u32 {
        self.descriptor().default
    }

    /// Settings and commands may be written by the control peer; status
    /// values only by the firmware.
    pub fn is_remote_writable(self) -> bool {
        self.descriptor().kind != ParamKind::Status
    }
}

/// Free-text parameters, kept apart from the numeric table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StringParamId {
    ControllerSn = 0,
}

impl StringParamId {
    pub const COUNT: usize = 1;

    pub fn from_index(idx: u16) -> Option<Self> {
        match idx {
            0 => Some(Self::ControllerSn),
            _ => None,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::ControllerSn => "controller_sn",
        }
    }
}

// ---------------------------------------------------------------------------
// Descriptor table
// ---------------------------------------------------------------------------

/// Who writes a parameter, which decides whether a change is worth a flash write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Operator setting; persisted by autosave.
    Setting,
    /// Remote command consumed by the controller.
    Command,
    /// Live value published by the firmware.
    Status,
}

/// Static description of one parameter.
#[derive(Debug)]
pub struct ParamDescriptor {
    pub id: ParamId,
    pub key: &'static str,
    pub min: u32,
    pub max: u32,
    pub default: u32,
    pub kind: ParamKind,
    /// Forced back to `default` after every successful boot load.
    pub reset_on_boot: bool,
}

const fn entry(
    id: ParamId,
    key: &'static str,
    min: u32,
    max: u32,
    default: u32,
    kind: ParamKind,
    reset_on_boot: bool,
) -> ParamDescriptor {
    ParamDescriptor {
        id,
        key,
        min,
        max,
        default,
        kind,
        reset_on_boot,
    }
}

use ParamKind::{Command, Setting, Status};

/// Ordered descriptor table: `DESCRIPTORS[i].id as usize == i`.
pub static DESCRIPTORS: [ParamDescriptor; ParamId::COUNT] = [
    entry(ParamId::Valve1State, "v1", 0, 1, 0, Command, false),
    entry(ParamId::Valve2State, "v2", 0, 1, 0, Command, false),
    entry(ParamId::Valve3State, "v3", 0, 1, 0, Command, false),
    entry(ParamId::Valve4State, "v4", 0, 1, 0, Command, false),
    entry(ParamId::Valve5State, "v5", 0, 1, 0, Command, false),
    entry(ParamId::Valve6State, "v6", 0, 1, 0, Command, false),
    entry(ParamId::Valve7State, "v7", 0, 1, 0, Command, false),
    entry(ParamId::AddWater, "add_water", 0, 1, 0, Command, true),
    entry(ParamId::WaterVolAdd, "water_volume_add", 0, 65_535, 100, Setting, false),
    entry(ParamId::WaterVolRead, "water_volume_read", 0, 6_553_500, 0, Status, false),
    entry(ParamId::VoltageAccum, "voltage_accum", 0, u32::MAX, 0, Status, false),
    entry(ParamId::StartSystem, "start_system", 0, 1, 0, Command, true),
    entry(ParamId::BootUpSystem, "bootup_system", 0, 1, 1, Setting, false),
    entry(ParamId::EmergencyDisable, "emergency_disable", 0, 1, 0, Command, false),
    entry(ParamId::SilosLevel, "silos_lvl", 0, 100, 0, Status, false),
    entry(ParamId::SilosSensorConnected, "silos_sensor_is_connected", 0, 1, 0, Status, false),
    entry(ParamId::SilosHeight, "silos_height", 0, 300, 60, Setting, false),
    entry(ParamId::LowLevelSilos, "low_level_silos", 0, 1, 0, Status, false),
    entry(ParamId::Language, "language", 0, 3, 0, Setting, false),
    entry(ParamId::PowerOnMin, "power_on_min", 5, 100, 30, Setting, false),
    entry(ParamId::PulsesPerLiter, "pulses_per_liter", 10, 10_000, 100, Setting, false),
    entry(ParamId::PwmValve, "pwm_valve", 30, 100, 50, Setting, false),
    entry(ParamId::TankSize, "tank_size", 100, 8_000, 150, Setting, false),
    entry(ParamId::MachineErrors, "machine_errors", 0, u32::MAX, 0, Status, true),
    entry(ParamId::WaterFlowState, "water_flow_state", 0, 10, 0, Status, true),
    entry(ParamId::Buzzer, "buzzer", 0, 1, 1, Setting, false),
    entry(ParamId::Brightness, "brightness", 0, 10, 10, Setting, false),
];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamError {
    /// Value outside `[min, max]`.
    OutOfRange,
    /// Text longer than the slot capacity.
    StringTooLong,
    /// Text contains non-printable bytes.
    InvalidText,
    /// Persisted record size differs from the current table layout.
    SizeMismatch,
    /// Numeric id not present in the table.
    UnknownId,
    /// Status values are written by the firmware only.
    ReadOnly,
    /// The storage backend failed.
    Storage(StorageError),
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange => write!(f, "value out of range"),
            Self::StringTooLong => write!(f, "string too long"),
            Self::InvalidText => write!(f, "string not printable"),
            Self::SizeMismatch => write!(f, "record size mismatch"),
            Self::UnknownId => write!(f, "unknown parameter id"),
            Self::ReadOnly => write!(f, "parameter is read-only"),
            Self::Storage(e) => write!(f, "storage: {e}"),
        }
    }
}

impl From<StorageError> for ParamError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Invoked after a successful write that changed the value.  Runs on the
/// writer's task, outside the store lock.
pub type ChangeHook = fn(ParamId, u32);

/// How the table was populated at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootSource {
    /// A valid record was found in NVS.
    Loaded,
    /// No usable record; defaults were installed and persisted.
    Defaults,
}

/// Coherent copy of every numeric value, taken under one lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSnapshot {
    values: [u32; ParamId::COUNT],
}

impl ParamSnapshot {
    pub fn get(&self, id: ParamId) -> u32 {
        self.values[id as usize]
    }

    pub fn flag(&self, id: ParamId) -> bool {
        self.get(id) != 0
    }

    pub fn values(&self) -> &[u32; ParamId::COUNT] {
        &self.values
    }
}

struct ParamTable {
    values: [u32; ParamId::COUNT],
    strings: [heapless::String<STRING_CAPACITY>; StringParamId::COUNT],
    hooks: [Option<ChangeHook>; ParamId::COUNT],
    /// A `Setting` changed since the last save.
    dirty: bool,
}

fn default_values() -> [u32; ParamId::COUNT] {
    core::array::from_fn(|i| DESCRIPTORS[i].default)
}

fn in_range(id: ParamId, value: u32) -> bool {
    let d = id.descriptor();
    (d.min..=d.max).contains(&value)
}

/// The parameter registry shared by every task (wrap in an `Arc`).
pub struct ParamStore {
    inner: Mutex<CriticalSectionRawMutex, RefCell<ParamTable>>,
}

impl Default for ParamStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamStore {
    /// A store holding compiled-in defaults.  Call [`init`](Self::init)
    /// to apply the boot policy against persistent storage.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(ParamTable {
                values: default_values(),
                strings: core::array::from_fn(|_| heapless::String::new()),
                hooks: [None; ParamId::COUNT],
                dirty: false,
            })),
        }
    }

    // ── Numeric access ────────────────────────────────────────

    pub fn get(&self, id: ParamId) -> u32 {
        self.inner.lock(|t| t.borrow().values[id as usize])
    }

    /// Read by raw index.  Unknown indices read as 0.
    pub fn get_by_index(&self, idx: u16) -> u32 {
        ParamId::from_index(idx).map_or(0, |id| self.get(id))
    }

    /// Write a value.  Rejects anything outside `[min, max]` and leaves the
    /// table untouched.
    pub fn set(&self, id: ParamId, value: u32) -> Result<(), ParamError> {
        if !in_range(id, value) {
            warn!(
                target: "params",
                "set {} = {} rejected (range {}..={})",
                id.key(),
                value,
                id.min(),
                id.max()
            );
            return Err(ParamError::OutOfRange);
        }

        let (changed, hook) = self.inner.lock(|t| {
            let mut t = t.borrow_mut();
            let slot = &mut t.values[id as usize];
            let changed = *slot != value;
            *slot = value;
            if changed && id.descriptor().kind == ParamKind::Setting {
                t.dirty = true;
            }
            (changed, t.hooks[id as usize])
        });

        if changed {
            if let Some(hook) = hook {
                hook(id, value);
            }
        }
        Ok(())
    }

    /// Read-modify-write under one lock, so concurrent updaters never lose
    /// each other's changes.  Returns the stored value.
    pub fn update(&self, id: ParamId, f: impl FnOnce(u32) -> u32) -> Result<u32, ParamError> {
        let (result, hook) = self.inner.lock(|t| {
            let mut t = t.borrow_mut();
            let old = t.values[id as usize];
            let new = f(old);
            if !in_range(id, new) {
                return (Err(ParamError::OutOfRange), None);
            }
            t.values[id as usize] = new;
            let changed = old != new;
            if changed && id.descriptor().kind == ParamKind::Setting {
                t.dirty = true;
            }
            (Ok(new), if changed { t.hooks[id as usize] } else { None })
        });

        if let (Ok(value), Some(hook)) = (result, hook) {
            hook(id, value);
        }
        result
    }

    /// Write by raw index, for the network boundary.
    pub fn set_by_index(&self, idx: u16, value: u32) -> Result<(), ParamError> {
        let id = ParamId::from_index(idx).ok_or(ParamError::UnknownId)?;
        self.set(id, value)
    }

    pub fn flag(&self, id: ParamId) -> bool {
        self.get(id) != 0
    }

    pub fn snapshot(&self) -> ParamSnapshot {
        ParamSnapshot {
            values: self.inner.lock(|t| t.borrow().values),
        }
    }

    /// Fill every entry from the compiled-in defaults.
    pub fn reset_to_defaults(&self) {
        self.inner.lock(|t| {
            let mut t = t.borrow_mut();
            t.values = default_values();
            t.dirty = true;
        });
        info!(target: "params", "table reset to defaults");
    }

    /// Register the change hook for `id`, replacing any previous one.
    pub fn set_hook(&self, id: ParamId, hook: ChangeHook) {
        self.inner.lock(|t| t.borrow_mut().hooks[id as usize] = Some(hook));
    }

    // ── String access ─────────────────────────────────────────

    pub fn set_string(&self, id: StringParamId, text: &str) -> Result<(), ParamError> {
        if text.len() > STRING_CAPACITY {
            return Err(ParamError::StringTooLong);
        }
        if !text.bytes().all(|b| (0x20..=0x7E).contains(&b)) {
            return Err(ParamError::InvalidText);
        }
        self.inner.lock(|t| {
            let mut t = t.borrow_mut();
            let slot = &mut t.strings[id as usize];
            slot.clear();
            slot.push_str(text).map_err(|()| ParamError::StringTooLong)
        })
    }

    pub fn get_string(&self, id: StringParamId) -> heapless::String<STRING_CAPACITY> {
        self.inner.lock(|t| t.borrow().strings[id as usize].clone())
    }

    // ── Persistence ───────────────────────────────────────────

    /// Load the table from one fixed-size record.
    ///
    /// Fails on a missing record, on any size other than
    /// [`record::RECORD_SIZE`], and on any out-of-range value.  Nothing is
    /// committed unless the whole record is valid.
    pub fn load(&self, storage: &impl StoragePort) -> Result<(), ParamError> {
        let len = storage.blob_len(NAMESPACE, RECORD_KEY)?;
        if len != record::RECORD_SIZE {
            warn!(
                target: "params",
                "stored record is {} bytes, expected {}",
                len,
                record::RECORD_SIZE
            );
            return Err(ParamError::SizeMismatch);
        }

        let mut buf = [0u8; record::RECORD_SIZE];
        let read = storage.read(NAMESPACE, RECORD_KEY, &mut buf)?;
        let values = record::decode(&buf[..read])?;

        if let Some(bad) = ParamId::ALL
            .iter()
            .find(|id| !in_range(**id, values[**id as usize]))
        {
            warn!(
                target: "params",
                "stored {} = {} out of range",
                bad.key(),
                values[*bad as usize]
            );
            return Err(ParamError::OutOfRange);
        }

        self.inner.lock(|t| {
            let mut t = t.borrow_mut();
            t.values = values;
            t.dirty = false;
        });
        Ok(())
    }

    /// Persist the whole table as one record.
    ///
    /// The dirty mark is cleared together with the copy, so a setting
    /// written while the flash write runs stays dirty for the next save.
    pub fn save(&self, storage: &mut impl StoragePort) -> Result<(), ParamError> {
        let (values, was_dirty) = self.inner.lock(|t| {
            let mut t = t.borrow_mut();
            (t.values, core::mem::replace(&mut t.dirty, false))
        });
        if let Err(e) = storage.write(NAMESPACE, RECORD_KEY, &record::encode(&values)) {
            self.inner.lock(|t| t.borrow_mut().dirty |= was_dirty);
            return Err(e.into());
        }
        info!(target: "params", "table saved ({} bytes)", record::RECORD_SIZE);
        Ok(())
    }

    /// Persist only if a setting changed since the last save.
    /// Returns `Ok(true)` when a write happened.
    pub fn save_if_dirty(&self, storage: &mut impl StoragePort) -> Result<bool, ParamError> {
        if !self.is_dirty() {
            return Ok(false);
        }
        self.save(storage)?;
        Ok(true)
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock(|t| t.borrow().dirty)
    }

    /// Boot policy.
    ///
    /// A valid record is loaded and then every `reset_on_boot` entry is
    /// forced back to its default, so a power cycle never resumes a run or
    /// a latched error.  Anything else installs the defaults and persists
    /// them immediately.
    pub fn init(&self, storage: &mut impl StoragePort) -> Result<BootSource, ParamError> {
        match self.load(storage) {
            Ok(()) => {
                self.inner.lock(|t| {
                    let mut t = t.borrow_mut();
                    for d in DESCRIPTORS.iter().filter(|d| d.reset_on_boot) {
                        t.values[d.id as usize] = d.default;
                    }
                });
                info!(target: "params", "table loaded from NVS");
                Ok(BootSource::Loaded)
            }
            Err(e) => {
                if storage.exists(NAMESPACE, RECORD_KEY) {
                    warn!(target: "params", "stored record unusable ({}), replacing with defaults", e);
                    if let Err(e) = storage.delete(NAMESPACE, RECORD_KEY) {
                        warn!(target: "params", "dropping stale record failed: {}", e);
                    }
                } else {
                    info!(target: "params", "no stored record, installing defaults");
                }
                self.reset_to_defaults();
                if let Err(e) = self.save(storage) {
                    error!(target: "params", "persisting defaults failed: {}", e);
                    return Err(e);
                }
                Ok(BootSource::Defaults)
            }
        }
    }
}
