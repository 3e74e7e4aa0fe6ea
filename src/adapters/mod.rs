//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter     | Implements                   | Connects to              |
//! |-------------|------------------------------|--------------------------|
//! | `hardware`  | ActuatorPort, AdcPort        | ESP32 GPIO, LEDC, ADC1   |
//! |             | DelayNs                      | FreeRTOS delay           |
//! | `log_sink`  | EventSink                    | Serial log output        |
//! | `nvs`       | ConfigPort, StoragePort      | NVS / in-memory store    |
//! | `peer`      | PeerPort                     | Control peer contact     |
//! | `time`      | Clock                        | ESP32 system timer       |
//! | `device_id` | -                            | eFuse MAC                |

pub mod device_id;
pub mod hardware;
pub mod log_sink;
pub mod nvs;
pub mod peer;
pub mod time;
