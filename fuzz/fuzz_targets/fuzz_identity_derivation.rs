//! Fuzz target: car identity derivation.
//!
//! Any advertised name must derive a stable id and display name without
//! panicking, and any text must either parse as a BLE address or be
//! rejected.
//!
//! cargo fuzz run fuzz_identity_derivation

#![no_main]

use libfuzzer_sys::fuzz_target;
use rlgateway::car::{BleAddr, derive_car_id, derive_display_name};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    let first = derive_car_id(text);
    assert_eq!(first, derive_car_id(text), "derivation must be stable");
    let _ = derive_display_name(text);

    if let Ok(addr) = text.parse::<BleAddr>() {
        let rendered = addr.to_string();
        assert_eq!(rendered.parse::<BleAddr>().unwrap(), addr);
    }
});
