//! Fuzz target: `FrameAssembler::feed`
//!
//! Drives arbitrary byte sequences into the newline-frame assembler and
//! asserts that it never panics, never yields a frame above the length
//! cap, and recovers cleanly after a reset.
//!
//! cargo fuzz run fuzz_frame_assembler

#![no_main]

use libfuzzer_sys::fuzz_target;
use rlgateway::session::io::{FrameAssembler, MAX_FRAME_LEN};

fuzz_target!(|data: &[u8]| {
    let mut assembler = FrameAssembler::new();

    assembler.feed(data, |frame| {
        assert!(frame.len() <= MAX_FRAME_LEN, "frame exceeds length cap");
        assert!(!frame.is_empty(), "assembler must not yield empty frames");
        assert!(!frame.contains('\n'), "frames never contain the delimiter");
    });

    // After a reset the assembler must accept bytes cleanly again.
    assembler.reset();
    assembler.feed(data, |_| {});
});
