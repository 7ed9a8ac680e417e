//! Rocket League IRL BLE fleet gateway library.
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection.  All platform-specific code (ESP-IDF Bluedroid, BlueZ
//! shell tools) is guarded by `cfg` attributes inside [`adapters`]; the
//! domain modules only ever see the port traits in [`ports`].

#![deny(unused_must_use)]

pub mod ble;
pub mod car;
pub mod config;
pub mod game;
pub mod gatt;
pub mod ports;
pub mod registry;
pub mod session;

pub mod error;

// Re-export the platform adapters so the crate compiles everywhere; the
// actual implementations are guarded by cfg attributes inside.
pub mod adapters;

// Host test binaries need a critical-section implementation for the
// embassy-sync primitives; the dev-dependency provides one.
#[cfg(test)]
use critical_section as _;
