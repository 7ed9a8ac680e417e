//! Car GATT profile: UUIDs and the wire codec.
//!
//! Every characteristic on the car is one of four shapes (`u8`, `i8`,
//! `bool`, UTF-8 string).  The encoders here are bit-exact mirrors of what
//! the car firmware expects; the domain clamps (steering range, battery
//! range, …) are applied by the device session *before* encoding.
//!
//! ## GATT service layout
//!
//! | Characteristic | UUID suffix | Shape  | Range     |
//! |----------------|-------------|--------|-----------|
//! | Service        | `…a1f0`     | —      | —         |
//! | WiFi SSID      | `…a1f1`     | string | ≤32 bytes |
//! | WiFi PASS      | `…a1f2`     | string | ≤64 bytes |
//! | WiFi Apply     | `…a1f3`     | bool   | —         |
//! | Status         | `…a1f4`     | string | + notify  |
//! | Battery        | `…a1f5`     | u8     | 0–100     |
//! | Dir X          | `…a1f6`     | i8     | -100..100 |
//! | Dir Y          | `…a1f7`     | i8     | -100..100 |
//! | Dir Speed      | `…a1f8`     | i8     | 0..100    |
//! | Device ID      | `…a1f9`     | string | —         |
//! | Decay mode     | `…a1fa`     | i8     | 0..1      |

use crate::error::CodecError;

// ───────────────────────────────────────────────────────────────
// UUIDs
// ───────────────────────────────────────────────────────────────

pub const SERVICE_UUID: u128 = 0x7f1f9b2a_6a43_4f62_8c2a_b9d3c0e4a1f0;
pub const CHAR_SSID: u128 = 0x7f1f9b2a_6a43_4f62_8c2a_b9d3c0e4a1f1;
pub const CHAR_PASS: u128 = 0x7f1f9b2a_6a43_4f62_8c2a_b9d3c0e4a1f2;
pub const CHAR_APPLY: u128 = 0x7f1f9b2a_6a43_4f62_8c2a_b9d3c0e4a1f3;
pub const CHAR_STATUS: u128 = 0x7f1f9b2a_6a43_4f62_8c2a_b9d3c0e4a1f4;
pub const CHAR_BATTERY: u128 = 0x7f1f9b2a_6a43_4f62_8c2a_b9d3c0e4a1f5;
pub const CHAR_DIR_X: u128 = 0x7f1f9b2a_6a43_4f62_8c2a_b9d3c0e4a1f6;
pub const CHAR_DIR_Y: u128 = 0x7f1f9b2a_6a43_4f62_8c2a_b9d3c0e4a1f7;
pub const CHAR_DIR_SPEED: u128 = 0x7f1f9b2a_6a43_4f62_8c2a_b9d3c0e4a1f8;
pub const CHAR_DEVID: u128 = 0x7f1f9b2a_6a43_4f62_8c2a_b9d3c0e4a1f9;
pub const CHAR_DECAY_MODE: u128 = 0x7f1f9b2a_6a43_4f62_8c2a_b9d3c0e4a1fa;

/// Advertised local names of cars start with this prefix, followed by a
/// MAC-style identifier (`RL-CAR-cc:ba:97:0d:8c:b5`).
pub const CAR_DEVICE_PREFIX: &str = "RL-CAR-";

/// Maximum characteristic payload we ever read back.
pub const MAX_VALUE_LEN: usize = 64;

// ───────────────────────────────────────────────────────────────
// Shared clamp helper
// ───────────────────────────────────────────────────────────────

/// Clamp `v` into `lo..=hi`.
pub const fn clamp(v: i32, lo: i32, hi: i32) -> i32 {
    if v < lo {
        lo
    } else if v > hi {
        hi
    } else {
        v
    }
}

// ───────────────────────────────────────────────────────────────
// Encoders (host → car)
// ───────────────────────────────────────────────────────────────

/// Encode an unsigned byte, clamping into `0..=255`.
pub fn encode_u8(v: i32) -> [u8; 1] {
    [clamp(v, 0, 255) as u8]
}

/// Encode a signed byte (two's complement), clamping into `-128..=127`.
pub fn encode_i8(v: i32) -> [u8; 1] {
    [(clamp(v, -128, 127) as i8) as u8]
}

/// Encode a boolean as `0x00` / `0x01`.
pub fn encode_bool(v: bool) -> [u8; 1] {
    [u8::from(v)]
}

/// Encode a string as raw UTF-8 bytes, no terminator.
pub fn encode_string(s: &str) -> &[u8] {
    s.as_bytes()
}

// ───────────────────────────────────────────────────────────────
// Decoders (car → host)
// ───────────────────────────────────────────────────────────────

pub fn decode_u8(data: &[u8]) -> Result<u8, CodecError> {
    match data.first() {
        Some(&b) => Ok(b),
        None => Err(CodecError::ShortRead { needed: 1, got: 0 }),
    }
}

pub fn decode_i8(data: &[u8]) -> Result<i8, CodecError> {
    match data.first() {
        Some(&b) => Ok(b as i8),
        None => Err(CodecError::ShortRead { needed: 1, got: 0 }),
    }
}

/// Any nonzero byte decodes to `true`.
pub fn decode_bool(data: &[u8]) -> Result<bool, CodecError> {
    match data.first() {
        Some(&b) => Ok(b != 0),
        None => Err(CodecError::ShortRead { needed: 1, got: 0 }),
    }
}

/// Decode UTF-8 text; malformed sequences are substituted with U+FFFD.
/// An empty payload is a valid empty string.
pub fn decode_string(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
