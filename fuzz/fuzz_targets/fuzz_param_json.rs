//! Fuzz target: remote parameter surface
//!
//! Arbitrary request bodies must always produce a well-formed JSON reply
//! and never push a value outside its declared range.
//!
//! cargo fuzz run fuzz_param_json

#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use valvectl::adapters::peer::PeerLink;
use valvectl::adapters::time::ManualClock;
use valvectl::params::remote::{ParamResponse, RemoteParams};
use valvectl::params::{ParamId, ParamStore};

fuzz_target!(|data: &[u8]| {
    let store = Arc::new(ParamStore::new());
    let peer = Arc::new(PeerLink::new(ManualClock::new(0), 3_000));
    let remote = RemoteParams::new(store.clone(), peer);

    let reply = remote.handle(data);
    assert!(serde_json::from_slice::<ParamResponse>(&reply).is_ok());

    for id in ParamId::ALL {
        let v = store.get(id);
        assert!(v >= id.min() && v <= id.max());
    }
});
