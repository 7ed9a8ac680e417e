//! Gateway configuration parameters
//!
//! All tunable timings and limits for the gateway in one place.
//! Values can be overridden at construction time (e.g. shorter scan windows
//! on the bench, a different listen port behind a reverse proxy).

use serde::{Deserialize, Serialize};

/// Core gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    // --- Adapter ---
    /// Host adapter identifier used by the shell fallbacks (e.g. "hci1")
    pub adapter_name: heapless::String<8>,

    // --- Scanning ---
    /// Standalone discovery scan window (milliseconds)
    pub discover_scan_ms: u32,
    /// Discovery window when entering the scan phase (milliseconds)
    pub phase_scan_ms: u32,
    /// Address-filtered refresh scan before a connect attempt (milliseconds)
    pub focused_scan_ms: u32,
    /// Rescan window after an adapter reset (milliseconds)
    pub post_reset_scan_ms: u32,
    /// Interval between automatic discovery rounds (milliseconds)
    pub auto_scan_interval_ms: u32,

    // --- Connection ---
    /// Per-attempt GATT connect timeout (milliseconds)
    pub connect_attempt_timeout_ms: u32,
    /// Backend client-level ceiling for one connect cycle (milliseconds)
    pub connect_budget_ms: u32,
    /// Retries for the direct connect strategy
    pub connect_retries: u32,
    /// Retries for the post-reset connect strategy
    pub connect_retries_after_reset: u32,
    /// Settle delay after the adapter reset before rescanning (milliseconds)
    pub post_reset_settle_ms: u32,

    // --- Characteristic I/O ---
    /// Default read timeout (milliseconds)
    pub read_timeout_ms: u32,
    /// Health-probe Status read timeout (milliseconds)
    pub health_check_timeout_ms: u32,
    /// Settle delay after writing WiFi Apply before re-reading Status
    pub wifi_apply_settle_ms: u32,

    // --- Clients & game ---
    /// WebSocket listen port
    pub listen_port: u16,
    /// Default match length (seconds)
    pub match_length_seconds: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let mut adapter_name = heapless::String::new();
        let _ = adapter_name.push_str("hci1");
        Self {
            adapter_name,

            // Scanning
            discover_scan_ms: 8_000,
            phase_scan_ms: 10_000,
            focused_scan_ms: 5_000,
            post_reset_scan_ms: 3_000,
            auto_scan_interval_ms: 10_000,

            // Connection
            connect_attempt_timeout_ms: 12_000,
            connect_budget_ms: 15_000,
            connect_retries: 3,
            connect_retries_after_reset: 2,
            post_reset_settle_ms: 3_000,

            // Characteristic I/O
            read_timeout_ms: 5_000,
            health_check_timeout_ms: 3_000,
            wifi_apply_settle_ms: 1_000,

            // Clients & game
            listen_port: 8000,
            match_length_seconds: 300, // 5 minutes
        }
    }
}
