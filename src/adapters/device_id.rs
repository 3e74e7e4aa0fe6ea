//! Controller serial number derived from the factory MAC address.
//!
//! The full 6-byte eFuse MAC is rendered as `VC-XXXXXXXXXXXX` and stored in
//! the `ControllerSn` string parameter at boot, so the control peer can
//! tell controllers apart without any provisioning step.

use core::fmt::Write;

use crate::params::STRING_CAPACITY;

pub type SerialNumber = heapless::String<STRING_CAPACITY>;

pub type MacAddress = [u8; 6];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    // SAFETY: the buffer is exactly the six bytes the call writes.
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Host builds get a fixed MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0x24, 0x6F, 0x28, 0x0A, 0xB1, 0xC3]
}

pub fn serial_number(mac: &MacAddress) -> SerialNumber {
    let mut sn = SerialNumber::new();
    let _ = write!(sn, "VC-");
    for b in mac {
        let _ = write!(sn, "{b:02X}");
    }
    sn
}
