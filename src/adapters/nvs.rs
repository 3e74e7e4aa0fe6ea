//! NVS adapter: persistent blobs for the parameter record and the
//! controller configuration.
//!
//! On ESP32 every call opens the namespace, performs one operation and
//! closes the handle again; writes are followed by `nvs_commit`.  The host
//! build keeps blobs in a `HashMap` keyed by `"namespace::key"` so the
//! persistence paths run in tests unchanged.

use log::info;
#[cfg(target_os = "espidf")]
use log::warn;

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::ControllerConfig;

#[cfg(not(target_os = "espidf"))]
use std::cell::RefCell;
#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

const CONFIG_NAMESPACE: &str = "valvectl";
const CONFIG_KEY: &str = "ctrlcfg";

/// NVS keys and namespaces are limited to 15 characters plus NUL.
const NVS_NAME_LEN: usize = 16;

#[cfg(target_os = "espidf")]
const MAX_BLOB_SIZE: usize = 4000;

// Bindgen emits the IDF error macros as `u32`.
#[cfg(target_os = "espidf")]
const OK: esp_err_t = ESP_OK as esp_err_t;
#[cfg(target_os = "espidf")]
const NOT_FOUND: esp_err_t = ESP_ERR_NVS_NOT_FOUND as esp_err_t;
#[cfg(target_os = "espidf")]
const NO_SPACE: esp_err_t = ESP_ERR_NVS_NOT_ENOUGH_SPACE as esp_err_t;
#[cfg(target_os = "espidf")]
const NO_FREE_PAGES: esp_err_t = ESP_ERR_NVS_NO_FREE_PAGES as esp_err_t;
#[cfg(target_os = "espidf")]
const NEW_VERSION_FOUND: esp_err_t = ESP_ERR_NVS_NEW_VERSION_FOUND as esp_err_t;

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    blobs: RefCell<HashMap<String, Vec<u8>>>,
}

/// NUL-terminated copy of an NVS name, truncated to 15 bytes.
#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
fn nvs_name(name: &str) -> [u8; NVS_NAME_LEN] {
    let mut buf = [0u8; NVS_NAME_LEN];
    let len = name.len().min(NVS_NAME_LEN - 1);
    buf[..len].copy_from_slice(&name.as_bytes()[..len]);
    buf
}

impl NvsAdapter {
    /// Initialise the default NVS partition.
    ///
    /// A partition with no free pages or written by a newer IDF is erased
    /// and initialised again; all stored parameters fall back to defaults.
    pub fn new() -> Result<Self, StorageError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: called once from the main task before any other NVS user.
            let mut ret = unsafe { nvs_flash_init() };
            if ret == NO_FREE_PAGES || ret == NEW_VERSION_FOUND {
                warn!(target: "params", "NVS partition unusable ({ret}), erasing");
                if unsafe { nvs_flash_erase() } != OK {
                    return Err(StorageError::IoError);
                }
                ret = unsafe { nvs_flash_init() };
            }
            if ret != OK {
                return Err(StorageError::IoError);
            }
            info!(target: "params", "NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!(target: "params", "NVS simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            blobs: RefCell::new(HashMap::new()),
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{namespace}::{key}")
    }

    #[cfg(target_os = "espidf")]
    fn with_handle<T>(
        namespace: &str,
        write: bool,
        f: impl FnOnce(nvs_handle_t) -> Result<T, esp_err_t>,
    ) -> Result<T, esp_err_t> {
        let ns = nvs_name(namespace);
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };
        let mut handle: nvs_handle_t = 0;
        let ret = unsafe { nvs_open(ns.as_ptr().cast(), mode, &mut handle) };
        if ret != OK {
            return Err(ret);
        }
        let result = f(handle);
        unsafe { nvs_close(handle) };
        result
    }

    #[cfg(target_os = "espidf")]
    fn map_err(ret: esp_err_t) -> StorageError {
        match ret {
            NOT_FOUND => StorageError::NotFound,
            NO_SPACE => StorageError::Full,
            _ => StorageError::IoError,
        }
    }

    /// Read a whole blob into a fresh buffer.
    fn read_blob(&self, namespace: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let len = self.blob_len(namespace, key)?;
        let mut buf = vec![0u8; len];
        let read = self.read(namespace, key, &mut buf)?;
        buf.truncate(read);
        Ok(buf)
    }
}

/// Reject configurations that would stall a task or invert the flow
/// timeouts.
pub fn validate_config(cfg: &ControllerConfig) -> Result<(), ConfigError> {
    let nonzero: [(u32, &'static str); 9] = [
        (cfg.tick_poll_ms, "tick_poll_ms must be > 0"),
        (cfg.energize_hold_ms, "energize_hold_ms must be > 0"),
        (cfg.full_duty_hold_ms, "full_duty_hold_ms must be > 0"),
        (cfg.valve_pwm_freq_hz, "valve_pwm_freq_hz must be > 0"),
        (cfg.flow_max_pulse_hz, "flow_max_pulse_hz must be > 0"),
        (cfg.peer_timeout_ms, "peer_timeout_ms must be > 0"),
        (cfg.latch_poll_ms, "latch_poll_ms must be > 0"),
        (cfg.measure_interval_ms, "measure_interval_ms must be > 0"),
        (cfg.autosave_interval_ms, "autosave_interval_ms must be > 0"),
    ];
    if let Some((_, msg)) = nonzero.iter().find(|(v, _)| *v == 0) {
        return Err(ConfigError::ValidationFailed(msg));
    }
    if cfg.flow_no_flow_short_ms >= cfg.flow_no_flow_long_ms {
        return Err(ConfigError::ValidationFailed(
            "flow_no_flow_short_ms must be < flow_no_flow_long_ms",
        ));
    }
    Ok(())
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<ControllerConfig, ConfigError> {
        let bytes = match self.read_blob(CONFIG_NAMESPACE, CONFIG_KEY) {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound) => {
                info!(target: "params", "no stored controller config, using defaults");
                return Ok(ControllerConfig::default());
            }
            Err(_) => return Err(ConfigError::IoError),
        };
        let cfg: ControllerConfig =
            postcard::from_bytes(&bytes).map_err(|_| ConfigError::Corrupted)?;
        validate_config(&cfg)?;
        info!(target: "params", "controller config loaded ({} bytes)", bytes.len());
        Ok(cfg)
    }

    fn save(&self, config: &ControllerConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;

        #[cfg(not(target_os = "espidf"))]
        self.blobs
            .borrow_mut()
            .insert(Self::composite_key(CONFIG_NAMESPACE, CONFIG_KEY), bytes);

        #[cfg(target_os = "espidf")]
        {
            let key = nvs_name(CONFIG_KEY);
            Self::with_handle(CONFIG_NAMESPACE, true, |handle| {
                let ret = unsafe {
                    nvs_set_blob(handle, key.as_ptr().cast(), bytes.as_ptr().cast(), bytes.len())
                };
                if ret != OK {
                    return Err(ret);
                }
                match unsafe { nvs_commit(handle) } {
                    OK => Ok(()),
                    e => Err(e),
                }
            })
            .map_err(|e| {
                warn!(target: "params", "controller config write failed ({e})");
                ConfigError::IoError
            })?;
        }

        info!(target: "params", "controller config saved");
        Ok(())
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let blobs = self.blobs.borrow();
            let data = blobs
                .get(&Self::composite_key(namespace, key))
                .ok_or(StorageError::NotFound)?;
            let len = data.len().min(buf.len());
            buf[..len].copy_from_slice(&data[..len]);
            Ok(len)
        }

        #[cfg(target_os = "espidf")]
        {
            let key = nvs_name(key);
            Self::with_handle(namespace, false, |handle| {
                let mut size = buf.len();
                let ret = unsafe {
                    nvs_get_blob(handle, key.as_ptr().cast(), buf.as_mut_ptr().cast(), &mut size)
                };
                if ret == OK {
                    Ok(size)
                } else {
                    Err(ret)
                }
            })
            .map_err(Self::map_err)
        }
    }

    fn blob_len(&self, namespace: &str, key: &str) -> Result<usize, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            self.blobs
                .borrow()
                .get(&Self::composite_key(namespace, key))
                .map(Vec::len)
                .ok_or(StorageError::NotFound)
        }

        #[cfg(target_os = "espidf")]
        {
            let key = nvs_name(key);
            let size = Self::with_handle(namespace, false, |handle| {
                let mut size: usize = 0;
                let ret = unsafe {
                    nvs_get_blob(handle, key.as_ptr().cast(), core::ptr::null_mut(), &mut size)
                };
                if ret == OK {
                    Ok(size)
                } else {
                    Err(ret)
                }
            })
            .map_err(Self::map_err)?;
            if size > MAX_BLOB_SIZE {
                return Err(StorageError::IoError);
            }
            Ok(size)
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            self.blobs
                .borrow_mut()
                .insert(Self::composite_key(namespace, key), data.to_vec());
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let key = nvs_name(key);
            Self::with_handle(namespace, true, |handle| {
                let ret = unsafe {
                    nvs_set_blob(handle, key.as_ptr().cast(), data.as_ptr().cast(), data.len())
                };
                if ret != OK {
                    return Err(ret);
                }
                match unsafe { nvs_commit(handle) } {
                    OK => Ok(()),
                    e => Err(e),
                }
            })
            .map_err(Self::map_err)
        }
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            self.blobs
                .borrow_mut()
                .remove(&Self::composite_key(namespace, key));
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let key = nvs_name(key);
            Self::with_handle(namespace, true, |handle| {
                let ret = unsafe { nvs_erase_key(handle, key.as_ptr().cast()) };
                if ret != OK && ret != NOT_FOUND {
                    return Err(ret);
                }
                match unsafe { nvs_commit(handle) } {
                    OK => Ok(()),
                    e => Err(e),
                }
            })
            .map_err(Self::map_err)
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        #[cfg(not(target_os = "espidf"))]
        {
            self.blobs
                .borrow()
                .contains_key(&Self::composite_key(namespace, key))
        }

        #[cfg(target_os = "espidf")]
        {
            let key = nvs_name(key);
            Self::with_handle(namespace, false, |handle| {
                Ok(unsafe { nvs_find_key(handle, key.as_ptr().cast(), core::ptr::null_mut()) }
                    == OK)
            })
            .unwrap_or(false)
        }
    }
}
