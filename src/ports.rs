//! Port traits — the hexagonal boundary between gateway logic and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Coordinator / DeviceSession (domain)
//! ```
//!
//! Driven adapters (the BLE host stack, the BlueZ shell tools, the system
//! clock) implement these traits.  The domain consumes them via generics,
//! with ports injected at call sites, so the core never touches a radio or
//! spawns a subprocess directly and the whole thing runs under test with
//! recording mocks.

use crate::car::BleAddr;
use crate::error::BackendError;

// ───────────────────────────────────────────────────────────────
// BLE backend port (driven adapter: host BLE stack)
// ───────────────────────────────────────────────────────────────

/// One advertisement observed during a scan window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub addr: BleAddr,
    pub local_name: heapless::String<32>,
    pub rssi: i8,
}

/// Scan filter: always service-filtered, optionally address-filtered
/// (the focused pre-connect refresh).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanFilter {
    pub service: u128,
    pub address: Option<BleAddr>,
}

impl ScanFilter {
    pub const fn service(service: u128) -> Self {
        Self {
            service,
            address: None,
        }
    }

    pub const fn address(service: u128, addr: BleAddr) -> Self {
        Self {
            service,
            address: Some(addr),
        }
    }
}

/// The host BLE central stack.  One instance per physical adapter; the
/// coordinator wraps it in the adapter mutex, so implementations may assume
/// calls never overlap.
///
/// All failures are reported as [`BackendError`] message strings; the
/// domain classifies them centrally.
#[allow(async_fn_in_trait)]
pub trait BleBackend {
    /// Passive scan for `duration_ms`, returning every matching
    /// advertisement seen in the window (deduplicated by address, last
    /// RSSI wins).
    async fn scan(
        &mut self,
        filter: ScanFilter,
        duration_ms: u32,
    ) -> Result<Vec<Advertisement>, BackendError>;

    /// Open a GATT connection, bounded by `timeout_ms`.
    async fn connect(&mut self, addr: BleAddr, timeout_ms: u32) -> Result<(), BackendError>;

    /// Close the GATT connection.  Succeeds when already closed.
    async fn disconnect(&mut self, addr: BleAddr) -> Result<(), BackendError>;

    /// Read a characteristic value, bounded by `timeout_ms`.
    async fn read(
        &mut self,
        addr: BleAddr,
        characteristic: u128,
        timeout_ms: u32,
    ) -> Result<heapless::Vec<u8, 64>, BackendError>;

    /// Write a characteristic value with response.
    async fn write(
        &mut self,
        addr: BleAddr,
        characteristic: u128,
        data: &[u8],
    ) -> Result<(), BackendError>;

    /// Enable notifications on a characteristic.
    async fn subscribe(&mut self, addr: BleAddr, characteristic: u128)
    -> Result<(), BackendError>;

    /// Disable notifications on a characteristic.
    async fn unsubscribe(
        &mut self,
        addr: BleAddr,
        characteristic: u128,
    ) -> Result<(), BackendError>;
}

// ───────────────────────────────────────────────────────────────
// Host shell port (driven adapter: BlueZ command-line fallbacks)
// ───────────────────────────────────────────────────────────────

/// Host-level Bluetooth plumbing used for stale-link cleanup and adapter
/// recovery.  Every method is best-effort: `false` means the step did not
/// succeed, and callers log at debug and carry on — a broken shell tool
/// must never take the gateway down.
///
/// Non-Linux hosts use the no-op implementation.
pub trait ShellPort {
    /// Addresses with an active host-level link.
    fn active_links(&self) -> heapless::Vec<BleAddr, 8>;

    /// Force-disconnect one address at the host layer.
    fn disconnect_link(&self, addr: BleAddr) -> bool;

    /// Bring the adapter down.
    fn adapter_down(&self) -> bool;

    /// Bring the adapter up.
    fn adapter_up(&self) -> bool;

    /// Power the host Bluetooth service off/on.
    fn service_power(&self, on: bool) -> bool;

    /// Whether the adapter reports UP and RUNNING.
    fn adapter_running(&self) -> bool;

    /// Pair (pair + trust + connect) with a device.
    fn pair(&self, addr: BleAddr) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Time ports
// ───────────────────────────────────────────────────────────────

/// Monotonic clock, milliseconds since gateway start.
pub trait ClockPort {
    fn now_ms(&self) -> u64;
}

/// Cooperative delay.  Backoffs and settle waits go through this port so
/// tests run instantly and can assert on the exact delays requested.
#[allow(async_fn_in_trait)]
pub trait DelayPort {
    async fn delay_ms(&self, ms: u32);
}
