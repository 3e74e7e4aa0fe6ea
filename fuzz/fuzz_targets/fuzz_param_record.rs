//! Fuzz target: persisted parameter record
//!
//! Feeds arbitrary blobs through the NVS load path.  Loading must never
//! panic, must only succeed for a correctly sized in-range record, and a
//! failed load must leave the table untouched.
//!
//! cargo fuzz run fuzz_param_record

#![no_main]

use libfuzzer_sys::fuzz_target;
use valvectl::adapters::nvs::NvsAdapter;
use valvectl::app::ports::StoragePort;
use valvectl::params::{NAMESPACE, ParamId, ParamStore, RECORD_KEY, record};

fuzz_target!(|data: &[u8]| {
    let decoded = record::decode(data);
    assert_eq!(decoded.is_ok(), data.len() == record::RECORD_SIZE);

    let Ok(mut nvs) = NvsAdapter::new() else {
        return;
    };
    if nvs.write(NAMESPACE, RECORD_KEY, data).is_err() {
        return;
    }

    let store = ParamStore::new();
    let before = store.snapshot();
    match store.load(&nvs) {
        Ok(()) => {
            for id in ParamId::ALL {
                let v = store.get(id);
                assert!(v >= id.min() && v <= id.max(), "{id:?} loaded out of range");
            }
        }
        Err(_) => assert_eq!(store.snapshot(), before),
    }
});
