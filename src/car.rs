//! Car model and identity derivation.
//!
//! A car's canonical key is its BLE MAC address; everything else (the
//! numeric car id, the display name) is derived deterministically from the
//! advertised local name so the same physical car keeps the same identity
//! across rediscoveries and gateway restarts.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::gatt::CAR_DEVICE_PREFIX;
use crate::session::SessionId;

// ───────────────────────────────────────────────────────────────
// BLE address
// ───────────────────────────────────────────────────────────────

/// A 48-bit BLE device address (`cc:ba:97:0d:8c:b5`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BleAddr(pub [u8; 6]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrParseError;

impl fmt::Display for AddrParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid BLE address")
    }
}

impl FromStr for BleAddr {
    type Err = AddrParseError;

    /// Parse `aa:bb:cc:dd:ee:ff` (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 6];
        let mut parts = s.split(':');
        for slot in &mut out {
            let part = parts.next().ok_or(AddrParseError)?;
            if part.len() != 2 {
                return Err(AddrParseError);
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| AddrParseError)?;
        }
        if parts.next().is_some() {
            return Err(AddrParseError);
        }
        Ok(Self(out))
    }
}

impl fmt::Display for BleAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a[0], a[1], a[2], a[3], a[4], a[5]
        )
    }
}

impl Serialize for BleAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BleAddr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s: &str = <&str>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ───────────────────────────────────────────────────────────────
// Car id derivation
// ───────────────────────────────────────────────────────────────

/// Numeric car identifier, stable across rediscoveries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct CarId(pub u32);

impl fmt::Display for CarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Truncate to at most `max` bytes, respecting char boundaries.
pub(crate) fn clip(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// FNV-1a over the advertised name, reduced mod 10000.  Used only when the
/// name does not carry a parseable MAC tail.
fn fallback_id(ble_name: &str) -> CarId {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;
    let mut hash = FNV_OFFSET;
    for b in ble_name.bytes() {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    CarId(hash % 10_000)
}

/// Derive the numeric car id from an advertised name.
///
/// For `RL-CAR-<mac>` names the id is the integer value of the last four
/// hex digits of the MAC (colons stripped); otherwise a stable hash of the
/// whole name, reduced below 10000.
pub fn derive_car_id(ble_name: &str) -> CarId {
    if let Some(mac) = ble_name.strip_prefix(CAR_DEVICE_PREFIX) {
        let mut digits = heapless::String::<16>::new();
        for c in mac.chars().filter(|c| *c != ':') {
            if digits.push(c).is_err() {
                // Longer than any MAC can be; treat as unparseable.
                return fallback_id(ble_name);
            }
        }
        // Last four characters of the stripped MAC, hex-decoded.
        if let Some((tail_start, _)) = digits.char_indices().rev().nth(3) {
            if let Ok(id) = u32::from_str_radix(&digits[tail_start..], 16) {
                return CarId(id);
            }
        }
    }
    fallback_id(ble_name)
}

/// Human-readable display name: `Rocket League Car (<last 8 chars of mac>)`
/// for car advertisements, `Unknown Car (<name>)` otherwise.
pub fn derive_display_name(ble_name: &str) -> heapless::String<48> {
    use core::fmt::Write;
    let mut out = heapless::String::new();
    if let Some(mac) = ble_name.strip_prefix(CAR_DEVICE_PREFIX) {
        // Last eight characters of the MAC text ("0d:8c:b5").
        let tail_start = mac.char_indices().rev().nth(7).map_or(0, |(i, _)| i);
        let _ = write!(out, "Rocket League Car ({})", &mac[tail_start..]);
    } else {
        let _ = write!(out, "Unknown Car ({})", clip(ble_name, 24));
    }
    out
}

// ───────────────────────────────────────────────────────────────
// Movement state
// ───────────────────────────────────────────────────────────────

/// High-level movement command last requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Move {
    #[default]
    Stopped,
    Forward,
    Backward,
}

impl Move {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stopped" => Some(Self::Stopped),
            "forward" => Some(Self::Forward),
            "backward" => Some(Self::Backward),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Forward => "forward",
            Self::Backward => "backward",
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Car
// ───────────────────────────────────────────────────────────────

/// One car in the fleet: identity, last-known telemetry, and ownership.
#[derive(Debug, Clone)]
pub struct Car {
    pub car_id: CarId,
    pub name: heapless::String<48>,
    pub ble_name: heapless::String<32>,
    pub ble_address: BleAddr,

    // Last-known telemetry (updated by discovery and by client commands).
    pub battery_level: u8,
    pub movement: Move,
    pub x: i8,
    pub boost: bool,
    pub boost_value: u8,
    pub status: Option<heapless::String<32>>,
    pub wifi_ssid: Option<heapless::String<32>>,
    pub wifi_apply_pending: bool,

    /// Whether the gateway currently holds an open GATT link to the car.
    pub connected: bool,
    /// Milliseconds (gateway monotonic clock) of the latest advertisement.
    pub last_seen: Option<u64>,
    pub rssi: Option<i8>,

    /// Exclusive owner, if any.  At most one session at a time.
    pub owner: Option<SessionId>,
    /// Monotonic counter used to drop superseded queued drive commands.
    pub drive_seq: u32,
}

impl Car {
    /// Construct a car from a first-sight advertisement.
    pub fn from_advertisement(ble_name: &str, ble_address: BleAddr) -> Self {
        let mut name_buf = heapless::String::new();
        let _ = name_buf.push_str(clip(ble_name, 32));
        Self {
            car_id: derive_car_id(ble_name),
            name: derive_display_name(ble_name),
            ble_name: name_buf,
            ble_address,
            battery_level: 100,
            movement: Move::Stopped,
            x: 0,
            boost: false,
            boost_value: 100,
            status: None,
            wifi_ssid: None,
            wifi_apply_pending: false,
            connected: false,
            last_seen: None,
            rssi: None,
            owner: None,
            drive_seq: 0,
        }
    }

    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }

    /// Flat status snapshot sent over the wire.
    pub fn status_json(&self) -> Value {
        json!({
            "car": self.car_id,
            "name": self.name.as_str(),
            "ble_name": self.ble_name.as_str(),
            "ble_address": self.ble_address,
            "battery_level": self.battery_level,
            "move": self.movement.as_str(),
            "x": self.x,
            "boost": self.boost,
            "boost_value": self.boost_value,
            "connected": self.connected,
            "last_seen": self.last_seen,
            "rssi": self.rssi,
            "selected": self.owner.is_some(),
        })
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
