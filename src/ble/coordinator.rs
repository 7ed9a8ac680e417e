//! Single-adapter coordination: mutual exclusion, phase gating, recovery.
//!
//! The host has exactly one BLE adapter, and it is the only contended
//! resource in the gateway.  The coordinator wraps the backend *inside* an
//! async mutex, so holding the lock and being allowed to touch the radio
//! are the same thing — a scan, connect attempt or adapter reset can never
//! overlap another adapter operation by construction.
//!
//! ```text
//!              ┌──────────────────────────────────────────┐
//!              │ Mutex<Adapter<B>>                        │
//!   scan ─────▶│  backend: B                              │
//!   connect ──▶│  links: addr → DeviceSession             │
//!   reset ────▶│                                          │
//!              └──────────────────────────────────────────┘
//! ```
//!
//! Phase gating sits in front of the lock: per-car GATT traffic is admitted
//! only while the adapter is in the `Control` phase, and a phase rejection
//! never acquires the lock at all.

use core::cell::{Cell, RefCell};
use std::rc::Rc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use heapless::FnvIndexMap;
use log::{debug, info, warn};
use serde_json::{Value, json};

use crate::car::BleAddr;
use crate::config::GatewayConfig;
use crate::error::{Error, PhaseError, Result};
use crate::gatt::{CAR_DEVICE_PREFIX, SERVICE_UUID};
use crate::ports::{Advertisement, BleBackend, DelayPort, ScanFilter, ShellPort};
use crate::registry::{CarRegistry, MAX_CARS, UpsertOutcome};

use super::device::{DeviceSession, WifiOutcome};
use super::{BleEvent, EventBus, Phase, SubscriptionId};

// ───────────────────────────────────────────────────────────────
// Adapter state (everything guarded by the lock)
// ───────────────────────────────────────────────────────────────

/// The radio and every per-car link riding on it.
pub struct Adapter<B> {
    pub backend: B,
    links: FnvIndexMap<BleAddr, DeviceSession, MAX_CARS>,
}

impl<B> Adapter<B> {
    fn new(backend: B) -> Self {
        Self {
            backend,
            links: FnvIndexMap::new(),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Coordinator
// ───────────────────────────────────────────────────────────────

pub struct Coordinator<B, S, D> {
    adapter: Mutex<CriticalSectionRawMutex, Adapter<B>>,
    phase: Cell<Phase>,
    auto_discovery: Cell<bool>,
    events: RefCell<EventBus<BleEvent>>,
    registry: Rc<RefCell<CarRegistry>>,
    shell: S,
    delay: D,
    cfg: GatewayConfig,
}

impl<B, S, D> Coordinator<B, S, D>
where
    B: BleBackend,
    S: ShellPort,
    D: DelayPort,
{
    /// The gateway boots in the scan phase: nothing is connectable until a
    /// discovery window has run.
    pub fn new(
        backend: B,
        registry: Rc<RefCell<CarRegistry>>,
        shell: S,
        delay: D,
        cfg: GatewayConfig,
    ) -> Self {
        Self {
            adapter: Mutex::new(Adapter::new(backend)),
            phase: Cell::new(Phase::Scan),
            auto_discovery: Cell::new(true),
            events: RefCell::new(EventBus::new()),
            registry,
            shell,
            delay,
            cfg,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.cfg
    }

    pub fn shell(&self) -> &S {
        &self.shell
    }

    // ── Phase ─────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    pub fn is_in_control_phase(&self) -> bool {
        self.phase.get() == Phase::Control
    }

    pub fn is_in_scan_phase(&self) -> bool {
        self.phase.get() == Phase::Scan
    }

    fn set_phase(&self, phase: Phase) {
        if self.phase.get() != phase {
            self.phase.set(phase);
            info!("=== {} PHASE STARTED ===", phase.as_str().to_uppercase());
            self.emit(&BleEvent::PhaseChanged { phase });
        }
    }

    /// Manually enter the control phase.
    pub fn switch_to_control_phase(&self) {
        self.set_phase(Phase::Control);
    }

    /// Manually drop back to the scan phase.
    pub fn switch_to_scan_phase(&self) {
        self.set_phase(Phase::Scan);
    }

    fn require_control_phase(&self) -> Result<()> {
        let current = self.phase.get();
        if current == Phase::Control {
            Ok(())
        } else {
            Err(PhaseError { current }.into())
        }
    }

    // ── Events ────────────────────────────────────────────────

    pub fn subscribe(&self, listener: impl FnMut(&BleEvent) + 'static) -> SubscriptionId {
        self.events.borrow_mut().subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.borrow_mut().unsubscribe(id)
    }

    fn emit(&self, event: &BleEvent) {
        self.events.borrow_mut().emit(event);
    }

    // ── Auto-discovery flag ───────────────────────────────────

    pub fn auto_discovery(&self) -> bool {
        self.auto_discovery.get()
    }

    pub fn set_auto_discovery(&self, on: bool) {
        self.auto_discovery.set(on);
    }

    // ── Discovery ─────────────────────────────────────────────

    /// Timed passive scan for car advertisements.
    ///
    /// Sweeps stale links first, then populates the registry and emits
    /// discovery events.  Returns every car advertisement seen in the
    /// window.  Scan failures yield an empty result — discovery is retried
    /// on the next round, never escalated.
    pub async fn discover_cars(&self, duration_ms: u32, now_ms: u64) -> Vec<Advertisement> {
        info!(
            "scanning for cars (service {SERVICE_UUID:032x}, window {} ms)",
            duration_ms
        );
        let mut adapter = self.adapter.lock().await;
        self.cleanup_stale_locked(&mut adapter).await;

        let advs = match adapter
            .backend
            .scan(ScanFilter::service(SERVICE_UUID), duration_ms)
            .await
        {
            Ok(advs) => advs,
            Err(e) => {
                warn!("BLE discovery failed: {e}");
                return Vec::new();
            }
        };

        let mut cars = Vec::new();
        for adv in advs {
            if !adv.local_name.starts_with(CAR_DEVICE_PREFIX) {
                continue;
            }
            let Adapter { links, .. } = &mut *adapter;
            match links.get_mut(&adv.addr) {
                Some(link) => link.refresh_advertisement(&adv.local_name, adv.rssi),
                None => {
                    let session = DeviceSession::new(adv.addr, &adv.local_name);
                    if links.insert(adv.addr, session).is_err() {
                        warn!("link table full, ignoring {}", adv.addr);
                        continue;
                    }
                }
            }

            let outcome = self.registry.borrow_mut().upsert_from_advertisement(
                &adv.local_name,
                adv.addr,
                adv.rssi,
                now_ms,
            );
            match outcome {
                UpsertOutcome::Discovered(car_id) => {
                    info!(
                        "discovered new car: {} ({}) RSSI {}",
                        adv.local_name, adv.addr, adv.rssi
                    );
                    self.emit(&BleEvent::Discovered {
                        car_id,
                        addr: adv.addr,
                    });
                }
                UpsertOutcome::Rediscovered(car_id) => {
                    debug!("rediscovered car: {} ({})", adv.local_name, adv.addr);
                    self.emit(&BleEvent::Rediscovered {
                        car_id,
                        addr: adv.addr,
                    });
                }
                UpsertOutcome::Dropped => {}
            }
            cars.push(adv);
        }

        info!("discovery complete: {} cars seen this window", cars.len());
        cars
    }

    /// Enter the scan phase, run a discovery window, and move to the
    /// control phase iff at least one car was seen.
    pub async fn start_scan_phase(&self, now_ms: u64) -> Vec<Advertisement> {
        self.set_phase(Phase::Scan);
        let cars = self.discover_cars(self.cfg.phase_scan_ms, now_ms).await;
        if cars.is_empty() {
            info!("no cars found, staying in scan phase");
        } else {
            info!("found {} cars, switching to control phase", cars.len());
            self.set_phase(Phase::Control);
        }
        cars
    }

    // ── Connection ────────────────────────────────────────────

    /// Connect to a discovered car with the full recovery ladder:
    /// healthy-link short-circuit → focused refresh scan → direct connect →
    /// adapter reset → rescan → final connect.
    pub async fn connect_to_device(&self, addr: BleAddr) -> Result<()> {
        // Phase rejection happens before the lock is even requested.
        self.require_control_phase()?;

        let mut adapter = self.adapter.lock().await;
        if !adapter.links.contains_key(&addr) {
            warn!("device {addr} not found in discovered devices");
            return Err(Error::UnknownDevice);
        }

        // Already connected and responsive?  Done.
        {
            let Adapter { backend, links } = &mut *adapter;
            let link = links.get_mut(&addr).ok_or(Error::UnknownDevice)?;
            if link.is_connected() {
                if link.is_healthy(backend, &self.cfg).await {
                    debug!("device {addr} is already connected and responsive");
                    return Ok(());
                }
                warn!("existing connection to {addr} is stale");
                link.disconnect(backend, &self.shell, &self.delay).await;
                self.set_connected_flag(addr, false);
            }
        }

        // Refresh the backend's device handle (and our RSSI) with a short
        // address-filtered scan.  Not seeing the car is not fatal; the
        // cached handle is used instead.
        self.refresh_device_locked(&mut adapter, addr, self.cfg.focused_scan_ms)
            .await;
        self.delay.delay_ms(500).await;

        // Strategy 1: direct connect.
        info!("attempting direct connection to {addr}");
        let direct = {
            let Adapter { backend, links } = &mut *adapter;
            let link = links.get_mut(&addr).ok_or(Error::UnknownDevice)?;
            link.connect(
                self.cfg.connect_retries,
                backend,
                &self.shell,
                &self.delay,
                &self.cfg,
            )
            .await
        };

        if let Err(first) = direct {
            // Strategy 2: reset the adapter and try once more.
            warn!("direct connection failed ({first}), trying with adapter reset");
            self.reset_adapter_locked(&mut adapter).await;
            self.delay.delay_ms(self.cfg.post_reset_settle_ms).await;
            self.refresh_device_locked(&mut adapter, addr, self.cfg.post_reset_scan_ms)
                .await;

            let Adapter { backend, links } = &mut *adapter;
            let link = links.get_mut(&addr).ok_or(Error::UnknownDevice)?;
            link.connect(
                self.cfg.connect_retries_after_reset,
                backend,
                &self.shell,
                &self.delay,
                &self.cfg,
            )
            .await
            .map_err(|e| {
                self.set_connected_flag(addr, false);
                Error::Connect(e)
            })?;
        }

        self.set_connected_flag(addr, true);
        self.emit(&BleEvent::Connected { addr });
        info!("successfully connected to {addr}");
        Ok(())
    }

    /// Disconnect one car, if a link exists.
    pub async fn disconnect_device(&self, addr: BleAddr) {
        let mut adapter = self.adapter.lock().await;
        let Adapter { backend, links } = &mut *adapter;
        if let Some(link) = links.get_mut(&addr) {
            link.disconnect(backend, &self.shell, &self.delay).await;
            self.set_connected_flag(addr, false);
            self.emit(&BleEvent::Disconnected { addr });
        }
    }

    // ── Recovery ──────────────────────────────────────────────

    /// Cycle the adapter down/up and power-cycle the host BLE service.
    pub async fn reset_adapter(&self) {
        let mut adapter = self.adapter.lock().await;
        self.reset_adapter_locked(&mut adapter).await;
    }

    async fn reset_adapter_locked(&self, adapter: &mut Adapter<B>) {
        info!("resetting Bluetooth adapter");

        // Drop whatever host-level links are still around.
        for link_addr in self.shell.active_links() {
            if !self.shell.disconnect_link(link_addr) {
                debug!("could not disconnect active link {link_addr}");
            }
        }
        self.delay.delay_ms(1_000).await;

        if !self.shell.adapter_down() {
            debug!("failed to bring adapter down");
        }
        self.delay.delay_ms(2_000).await;
        if !self.shell.adapter_up() {
            debug!("failed to bring adapter up");
        }
        self.delay.delay_ms(2_000).await;

        if !self.shell.service_power(false) {
            debug!("could not power-cycle BLE service (off)");
        }
        self.delay.delay_ms(1_000).await;
        if !self.shell.service_power(true) {
            debug!("could not power-cycle BLE service (on)");
        }
        self.delay.delay_ms(1_500).await;

        if self.shell.adapter_running() {
            info!("Bluetooth adapter reset successful");
        } else {
            warn!("Bluetooth adapter may not be fully operational after reset");
        }

        // Every GATT link died with the adapter.
        for (addr, link) in adapter.links.iter_mut() {
            if link.is_connected() {
                link.mark_link_lost();
                self.set_connected_flag(*addr, false);
            }
        }
    }

    /// Force-disconnect links that claim to be connected but fail the
    /// health probe.  Runs before every scan.
    async fn cleanup_stale_locked(&self, adapter: &mut Adapter<B>) {
        let Adapter { backend, links } = &mut *adapter;
        for (addr, link) in links.iter_mut() {
            if link.is_connected() && !link.is_healthy(backend, &self.cfg).await {
                warn!("found stale connection to {}, cleaning up", link.name);
                link.disconnect(backend, &self.shell, &self.delay).await;
                self.set_connected_flag(*addr, false);
            }
        }
    }

    async fn refresh_device_locked(
        &self,
        adapter: &mut Adapter<B>,
        addr: BleAddr,
        duration_ms: u32,
    ) {
        let Adapter { backend, links } = &mut *adapter;
        match backend
            .scan(ScanFilter::address(SERVICE_UUID, addr), duration_ms)
            .await
        {
            Ok(advs) => match advs.iter().find(|a| a.addr == addr) {
                Some(adv) => {
                    if let Some(link) = links.get_mut(&addr) {
                        link.refresh_advertisement(&adv.local_name, adv.rssi);
                    }
                    if let Some(car) = self.registry.borrow_mut().by_addr_mut(addr) {
                        car.rssi = Some(adv.rssi);
                    }
                    info!("updated device reference for {addr} (RSSI {})", adv.rssi);
                }
                None => warn!("device {addr} not seen in refresh scan, using cached handle"),
            },
            Err(e) => warn!("refresh scan for {addr} failed: {e}, using cached handle"),
        }
    }

    // ── Per-car operations (phase-gated) ──────────────────────

    /// Write a full drive frame.  Connects first when no link is open.
    pub async fn drive_car(&self, addr: BleAddr, x: i32, y: i32, speed: i32, decay: i32) -> Result<()> {
        self.require_control_phase()?;
        self.ensure_connected(addr).await?;

        let mut adapter = self.adapter.lock().await;
        let Adapter { backend, links } = &mut *adapter;
        let link = links.get_mut(&addr).ok_or(Error::UnknownDevice)?;
        let result = link.set_drive(x, y, speed, decay, backend).await;
        if !link.is_connected() {
            self.set_connected_flag(addr, false);
        }
        result.map_err(Error::Drive)
    }

    /// Provision Wi-Fi credentials on a car.
    pub async fn set_wifi(&self, addr: BleAddr, ssid: &str, password: &str) -> Result<WifiOutcome> {
        self.require_control_phase()?;
        self.ensure_connected(addr).await?;

        let mut adapter = self.adapter.lock().await;
        let Adapter { backend, links } = &mut *adapter;
        let link = links.get_mut(&addr).ok_or(Error::UnknownDevice)?;
        let outcome = link
            .set_wifi(ssid, password, backend, &self.delay, &self.cfg)
            .await;
        if !link.is_connected() {
            self.set_connected_flag(addr, false);
        }
        let outcome = outcome.map_err(Error::Link)?;

        let mut registry = self.registry.borrow_mut();
        if let Some(car) = registry.by_addr_mut(addr) {
            car.wifi_ssid = {
                let mut buf = heapless::String::new();
                let _ = buf.push_str(crate::car::clip(ssid, 32));
                Some(buf)
            };
            car.wifi_apply_pending = !outcome.is_configured();
            if let Some(status) = &outcome.status {
                let mut buf = heapless::String::new();
                let _ = buf.push_str(crate::car::clip(status, 32));
                car.status = Some(buf);
            }
        }
        Ok(outcome)
    }

    /// Generic command passthrough to a car.
    pub async fn send_command(&self, addr: BleAddr, command: &str, message: &str) -> Result<()> {
        self.require_control_phase()?;
        self.ensure_connected(addr).await?;

        let mut adapter = self.adapter.lock().await;
        let Adapter { backend, links } = &mut *adapter;
        let link = links.get_mut(&addr).ok_or(Error::UnknownDevice)?;
        let result = link.send_command(command, message, backend, &self.delay).await;
        if !link.is_connected() {
            self.set_connected_flag(addr, false);
        }
        result.map_err(Error::Link)
    }

    /// Pull battery and status into the registry's cached telemetry.
    /// Read failures are recovered locally — the cache simply keeps its
    /// previous value.
    pub async fn refresh_telemetry(&self, addr: BleAddr) -> Result<()> {
        self.require_control_phase()?;

        let mut adapter = self.adapter.lock().await;
        let Adapter { backend, links } = &mut *adapter;
        let link = links.get_mut(&addr).ok_or(Error::UnknownDevice)?;

        let battery = link.read_battery(backend, &self.cfg).await.ok();
        let status = link.read_status(backend, &self.cfg).await.ok();
        if !link.is_connected() {
            self.set_connected_flag(addr, false);
        }

        let mut registry = self.registry.borrow_mut();
        if let Some(car) = registry.by_addr_mut(addr) {
            if let Some(level) = battery {
                car.battery_level = level.min(100);
            }
            if let Some(status) = status {
                let mut buf = heapless::String::new();
                let _ = buf.push_str(crate::car::clip(&status, 32));
                car.status = Some(buf);
            }
        }
        Ok(())
    }

    /// Connect when the registry mirror says there is no open link.
    async fn ensure_connected(&self, addr: BleAddr) -> Result<()> {
        let connected = self
            .registry
            .borrow()
            .by_addr(addr)
            .is_some_and(|c| c.connected);
        if connected {
            Ok(())
        } else {
            self.connect_to_device(addr).await
        }
    }

    fn set_connected_flag(&self, addr: BleAddr, connected: bool) {
        if let Some(car) = self.registry.borrow_mut().by_addr_mut(addr) {
            car.connected = connected;
        }
    }

    // ── Status snapshot ───────────────────────────────────────

    /// Coordinator status for `get_phase_status` / `get_bluetooth_status`.
    pub async fn status_json(&self) -> Value {
        let adapter = self.adapter.lock().await;
        let mut devices = serde_json::Map::new();
        let mut connected = 0usize;
        for (addr, link) in adapter.links.iter() {
            if link.is_connected() {
                connected += 1;
            }
            devices.insert(
                addr.to_string(),
                json!({
                    "name": link.name.as_str(),
                    "address": addr,
                    "device_id": link.device_id.as_deref(),
                    "rssi": link.rssi,
                    "is_connected": link.is_connected(),
                }),
            );
        }
        json!({
            "current_phase": self.phase.get().as_str(),
            "is_in_control_phase": self.is_in_control_phase(),
            "is_in_scan_phase": self.is_in_scan_phase(),
            "is_scanning": self.auto_discovery.get(),
            "total_discovered": adapter.links.len(),
            "total_connected": connected,
            "devices": devices,
        })
    }
}
