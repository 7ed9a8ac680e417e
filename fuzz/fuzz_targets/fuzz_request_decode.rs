//! Fuzz target: client request decoding.
//!
//! Arbitrary text frames must decode to either a request or a typed
//! error — never a panic.
//!
//! cargo fuzz run fuzz_request_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use rlgateway::session::protocol::{car_id_field, decode_request};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    if let Ok(request) = decode_request(text) {
        let _ = car_id_field(&request.body, "car");
        let _ = request.action.len();
    }
});
