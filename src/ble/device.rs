//! Per-car BLE device session.
//!
//! Owns one car's link state and translates high-level operations (drive,
//! Wi-Fi provisioning, telemetry reads) into ordered GATT traffic.  All I/O
//! flows through port traits injected at call sites; the session itself is
//! a pure state machine.
//!
//! ```text
//!   Idle ──connect──▶ Connecting ──probe ok──▶ Connected
//!    ▲                    │                        │
//!    └────── failure ─────┘      link loss / disconnect()
//!    ◀─────────────────────────────────────────────┘
//! ```

use log::{debug, info, warn};

use crate::car::BleAddr;
use crate::config::GatewayConfig;
use crate::error::{
    BackendError, ConnectError, DriveAxis, DriveError, ErrorClass, LinkError,
};
use crate::gatt::{
    self, CHAR_APPLY, CHAR_BATTERY, CHAR_DECAY_MODE, CHAR_DEVID, CHAR_DIR_SPEED, CHAR_DIR_X,
    CHAR_DIR_Y, CHAR_PASS, CHAR_SSID, CHAR_STATUS,
};
use crate::ports::{BleBackend, DelayPort, ShellPort};

use super::clear_host_links;

// ───────────────────────────────────────────────────────────────
// Link state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

/// Result of a Wi-Fi provisioning sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiOutcome {
    /// Status string read back after the apply settle, when readable.
    pub status: Option<String>,
}

impl WifiOutcome {
    /// The firmware reports this status once credentials are applied.
    pub const CONFIGURED: &'static str = "configured";

    pub fn is_configured(&self) -> bool {
        self.status.as_deref() == Some(Self::CONFIGURED)
    }
}

// ───────────────────────────────────────────────────────────────
// Device session
// ───────────────────────────────────────────────────────────────

/// One car's GATT link.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    pub addr: BleAddr,
    pub name: heapless::String<32>,
    pub device_id: Option<heapless::String<32>>,
    pub rssi: Option<i8>,
    state: LinkState,
    status_notify: bool,
}

impl DeviceSession {
    pub fn new(addr: BleAddr, name: &str) -> Self {
        let mut name_buf = heapless::String::new();
        let _ = name_buf.push_str(crate::car::clip(name, 32));
        Self {
            addr,
            name: name_buf,
            device_id: None,
            rssi: None,
            state: LinkState::Idle,
            status_notify: false,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Refresh the advertised name/RSSI from a newer advertisement.
    pub fn refresh_advertisement(&mut self, name: &str, rssi: i8) {
        self.name.clear();
        let _ = self.name.push_str(crate::car::clip(name, 32));
        self.rssi = Some(rssi);
    }

    // ── Connect / disconnect ──────────────────────────────────

    /// Establish the GATT link with adaptive retry.
    ///
    /// Closes any previous client, clears stale host-level links, then
    /// attempts up to `retries` connects.  Each attempt is bounded by the
    /// configured per-attempt timeout; on success the session reads
    /// Device-ID and Status once as a liveness probe.
    pub async fn connect(
        &mut self,
        retries: u32,
        backend: &mut impl BleBackend,
        shell: &impl ShellPort,
        delay: &impl DelayPort,
        cfg: &GatewayConfig,
    ) -> Result<(), ConnectError> {
        // Drop whatever was left of a previous client.
        if self.state != LinkState::Idle {
            if let Err(e) = backend.disconnect(self.addr).await {
                debug!("pre-connect cleanup of {} failed: {e}", self.name);
            }
            self.state = LinkState::Idle;
        }
        clear_host_links(self.addr, shell, delay).await;

        let mut last_class = ErrorClass::Other;
        for attempt in 1..=retries {
            if attempt > 1 {
                // Let the host stack settle between attempts.
                delay.delay_ms(500).await;
            }
            self.state = LinkState::Connecting;

            match backend
                .connect(self.addr, cfg.connect_attempt_timeout_ms)
                .await
            {
                Ok(()) => {
                    // Stabilisation delay before the first GATT traffic.
                    delay.delay_ms(500).await;
                    self.state = LinkState::Connected;
                    self.probe(backend, cfg).await;
                    info!(
                        "connected to {} ({}) on attempt {attempt}",
                        self.name, self.addr
                    );
                    return Ok(());
                }
                Err(e) => {
                    let class = e.class();
                    last_class = class;
                    warn!(
                        "attempt {attempt}/{retries} to {} failed: {e}",
                        self.name
                    );
                    self.state = LinkState::Idle;
                    if let Err(e) = backend.disconnect(self.addr).await {
                        debug!("cleanup after failed attempt: {e}");
                    }

                    if attempt < retries {
                        let backoff = class.backoff_ms(attempt);
                        info!("{class}, waiting {backoff} ms before retry");
                        delay.delay_ms(backoff).await;
                        if class == ErrorClass::Abort {
                            clear_host_links(self.addr, shell, delay).await;
                        }
                    }
                }
            }
        }

        warn!("failed to connect to {} after {retries} attempts", self.name);
        Err(ConnectError {
            attempts: retries,
            last_class,
        })
    }

    /// Liveness probe after connect: read Device-ID (cached) and Status.
    /// Probe failures are logged, not fatal — some firmware revisions are
    /// slow to publish the identification characteristics.
    async fn probe(&mut self, backend: &mut impl BleBackend, cfg: &GatewayConfig) {
        if self.device_id.is_none() {
            match backend
                .read(self.addr, CHAR_DEVID, cfg.read_timeout_ms)
                .await
            {
                Ok(data) => {
                    let id = gatt::decode_string(&data);
                    let mut buf = heapless::String::new();
                    let _ = buf.push_str(crate::car::clip(&id, 32));
                    info!("device id for {}: {buf}", self.name);
                    self.device_id = Some(buf);
                }
                Err(e) => warn!("could not read device id from {}: {e}", self.name),
            }
        }
        if let Err(e) = backend
            .read(self.addr, CHAR_STATUS, cfg.read_timeout_ms)
            .await
        {
            warn!("could not read initial status from {}: {e}", self.name);
        }
    }

    /// Close the link.  Idempotent.
    pub async fn disconnect(
        &mut self,
        backend: &mut impl BleBackend,
        shell: &impl ShellPort,
        delay: &impl DelayPort,
    ) {
        if self.state == LinkState::Idle {
            return;
        }
        self.state = LinkState::Disconnecting;
        if self.status_notify {
            if let Err(e) = backend.unsubscribe(self.addr, CHAR_STATUS).await {
                debug!("could not stop notifications on {}: {e}", self.name);
            }
            self.status_notify = false;
        }
        if let Err(e) = backend.disconnect(self.addr).await {
            debug!("disconnect of {} reported: {e}", self.name);
        }
        self.state = LinkState::Idle;
        info!("disconnected from {}", self.name);
        clear_host_links(self.addr, shell, delay).await;
    }

    /// Short Status read; true iff it completes inside the health timeout.
    pub async fn is_healthy(
        &mut self,
        backend: &mut impl BleBackend,
        cfg: &GatewayConfig,
    ) -> bool {
        if self.state != LinkState::Connected {
            return false;
        }
        match backend
            .read(self.addr, CHAR_STATUS, cfg.health_check_timeout_ms)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!("health check failed for {}: {e}", self.name);
                false
            }
        }
    }

    /// Record an unsolicited link loss reported by the backend.
    pub fn mark_link_lost(&mut self) {
        if self.state == LinkState::Connected {
            warn!("link to {} lost", self.name);
        }
        self.state = LinkState::Idle;
        self.status_notify = false;
    }

    // ── Raw characteristic I/O ────────────────────────────────

    fn ensure_connected(&self) -> Result<(), LinkError> {
        if self.state == LinkState::Connected {
            Ok(())
        } else {
            Err(LinkError::NotConnected)
        }
    }

    /// Track backend failures: a transport-class error drops the link.
    fn note_error(&mut self, e: &BackendError) {
        if e.class().is_link_loss() {
            self.mark_link_lost();
        }
    }

    async fn read_raw(
        &mut self,
        characteristic: u128,
        backend: &mut impl BleBackend,
        cfg: &GatewayConfig,
    ) -> Result<heapless::Vec<u8, 64>, LinkError> {
        self.ensure_connected()?;
        backend
            .read(self.addr, characteristic, cfg.read_timeout_ms)
            .await
            .map_err(|e| {
                self.note_error(&e);
                LinkError::Backend(e)
            })
    }

    async fn write_raw(
        &mut self,
        characteristic: u128,
        data: &[u8],
        backend: &mut impl BleBackend,
    ) -> Result<(), LinkError> {
        self.ensure_connected()?;
        backend
            .write(self.addr, characteristic, data)
            .await
            .map_err(|e| {
                self.note_error(&e);
                LinkError::Backend(e)
            })
    }

    // ── Typed reads ───────────────────────────────────────────

    pub async fn read_battery(
        &mut self,
        backend: &mut impl BleBackend,
        cfg: &GatewayConfig,
    ) -> Result<u8, LinkError> {
        let data = self.read_raw(CHAR_BATTERY, backend, cfg).await?;
        Ok(gatt::decode_u8(&data)?)
    }

    pub async fn read_status(
        &mut self,
        backend: &mut impl BleBackend,
        cfg: &GatewayConfig,
    ) -> Result<String, LinkError> {
        let data = self.read_raw(CHAR_STATUS, backend, cfg).await?;
        Ok(gatt::decode_string(&data))
    }

    pub async fn read_device_id(
        &mut self,
        backend: &mut impl BleBackend,
        cfg: &GatewayConfig,
    ) -> Result<String, LinkError> {
        let data = self.read_raw(CHAR_DEVID, backend, cfg).await?;
        Ok(gatt::decode_string(&data))
    }

    pub async fn read_wifi_ssid(
        &mut self,
        backend: &mut impl BleBackend,
        cfg: &GatewayConfig,
    ) -> Result<String, LinkError> {
        let data = self.read_raw(CHAR_SSID, backend, cfg).await?;
        Ok(gatt::decode_string(&data))
    }

    pub async fn read_wifi_apply_pending(
        &mut self,
        backend: &mut impl BleBackend,
        cfg: &GatewayConfig,
    ) -> Result<bool, LinkError> {
        let data = self.read_raw(CHAR_APPLY, backend, cfg).await?;
        Ok(gatt::decode_bool(&data)?)
    }

    pub async fn read_drive_state(
        &mut self,
        backend: &mut impl BleBackend,
        cfg: &GatewayConfig,
    ) -> Result<(i8, i8, i8, i8), LinkError> {
        let x = gatt::decode_i8(&self.read_raw(CHAR_DIR_X, backend, cfg).await?)?;
        let y = gatt::decode_i8(&self.read_raw(CHAR_DIR_Y, backend, cfg).await?)?;
        let speed = gatt::decode_i8(&self.read_raw(CHAR_DIR_SPEED, backend, cfg).await?)?;
        let decay = gatt::decode_i8(&self.read_raw(CHAR_DECAY_MODE, backend, cfg).await?)?;
        Ok((x, y, speed, decay))
    }

    // ── Typed writes ──────────────────────────────────────────

    pub async fn write_battery(
        &mut self,
        percent: i32,
        backend: &mut impl BleBackend,
    ) -> Result<(), LinkError> {
        let clamped = gatt::clamp(percent, 0, 100);
        self.write_raw(CHAR_BATTERY, &gatt::encode_u8(clamped), backend)
            .await
    }

    /// Enable Status notifications.
    pub async fn enable_status_notify(
        &mut self,
        backend: &mut impl BleBackend,
    ) -> Result<(), LinkError> {
        self.ensure_connected()?;
        backend
            .subscribe(self.addr, CHAR_STATUS)
            .await
            .map_err(|e| {
                self.note_error(&e);
                LinkError::Backend(e)
            })?;
        self.status_notify = true;
        Ok(())
    }

    // ── Composite operations ──────────────────────────────────

    /// Write the four motor characteristics in fixed order X→Y→Speed→Decay.
    ///
    /// Values are clamped to the firmware domains before encoding.  On a
    /// partial failure the car acts on whatever it already received; the
    /// error names the first axis that failed.
    pub async fn set_drive(
        &mut self,
        x: i32,
        y: i32,
        speed: i32,
        decay: i32,
        backend: &mut impl BleBackend,
    ) -> Result<(), DriveError> {
        self.ensure_connected().map_err(|cause| DriveError {
            axis: DriveAxis::X,
            cause,
        })?;

        let writes: [(DriveAxis, u128, i32, i32, i32); 4] = [
            (DriveAxis::X, CHAR_DIR_X, x, -100, 100),
            (DriveAxis::Y, CHAR_DIR_Y, y, -100, 100),
            (DriveAxis::Speed, CHAR_DIR_SPEED, speed, 0, 100),
            (DriveAxis::Decay, CHAR_DECAY_MODE, decay, 0, 1),
        ];
        for (axis, characteristic, value, lo, hi) in writes {
            let clamped = gatt::clamp(value, lo, hi);
            self.write_raw(characteristic, &gatt::encode_i8(clamped), backend)
                .await
                .map_err(|cause| DriveError { axis, cause })?;
        }
        debug!(
            "drive params sent to {}: x={x} y={y} speed={speed} decay={decay}",
            self.name
        );
        Ok(())
    }

    /// Provision Wi-Fi: SSID → PASS → Apply=true, settle, re-read Status.
    pub async fn set_wifi(
        &mut self,
        ssid: &str,
        password: &str,
        backend: &mut impl BleBackend,
        delay: &impl DelayPort,
        cfg: &GatewayConfig,
    ) -> Result<WifiOutcome, LinkError> {
        info!("setting WiFi credentials on {}: SSID={ssid}", self.name);
        self.write_raw(CHAR_SSID, gatt::encode_string(ssid), backend)
            .await?;
        self.write_raw(CHAR_PASS, gatt::encode_string(password), backend)
            .await?;
        self.write_raw(CHAR_APPLY, &gatt::encode_bool(true), backend)
            .await?;

        // Give the car time to bring its station interface up.
        delay.delay_ms(cfg.wifi_apply_settle_ms).await;

        let status = match self.read_raw(CHAR_STATUS, backend, cfg).await {
            Ok(data) => Some(gatt::decode_string(&data)),
            Err(e) => {
                debug!("could not verify WiFi status on {}: {e}", self.name);
                None
            }
        };
        if status.as_deref() == Some(WifiOutcome::CONFIGURED) {
            info!("WiFi credentials configured on {}", self.name);
        } else if let Some(s) = &status {
            warn!("WiFi configuration on {} returned status: {s}", self.name);
        }
        Ok(WifiOutcome { status })
    }

    /// Generic command passthrough: `"<command>:<message>"` written to the
    /// SSID characteristic (the firmware's designated scratch channel until
    /// a dedicated command characteristic lands).
    pub async fn send_command(
        &mut self,
        command: &str,
        message: &str,
        backend: &mut impl BleBackend,
        delay: &impl DelayPort,
    ) -> Result<(), LinkError> {
        let mut payload = String::with_capacity(command.len() + 1 + message.len());
        payload.push_str(command);
        payload.push(':');
        payload.push_str(message);
        self.write_raw(CHAR_SSID, gatt::encode_string(&payload), backend)
            .await?;
        info!("command '{command}' sent to {}", self.name);
        delay.delay_ms(1_000).await;
        Ok(())
    }
}
