//! Car registry: the canonical set of known cars and their ownership.
//!
//! Keyed by BLE address (the one identity a car cannot change); the numeric
//! car id and display name are derived.  Ownership transitions are the only
//! mutations with preconditions:
//!
//! ```text
//!   Unassigned ──select(S)──▶ owned by S ──free / session end──▶ Unassigned
//! ```
//!
//! There is no direct S → S' transfer; the holder must free first.
//! Registry operations are fast and in-memory; callers on the single-task
//! executor need no locking around them.

use heapless::FnvIndexMap;
use serde_json::Value;

use crate::car::{BleAddr, Car, CarId};
use crate::error::RegistryError;
use crate::session::SessionId;

/// Upper bound on fleet size (index map capacity must be a power of two).
pub const MAX_CARS: usize = 16;

/// Outcome of feeding one advertisement into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First sighting; a new car was created.
    Discovered(CarId),
    /// Already known; name/rssi/last_seen were refreshed.
    Rediscovered(CarId),
    /// The registry is full; the advertisement was dropped.
    Dropped,
}

#[derive(Debug, Default)]
pub struct CarRegistry {
    cars: FnvIndexMap<BleAddr, Car, MAX_CARS>,
}

impl CarRegistry {
    pub fn new() -> Self {
        Self {
            cars: FnvIndexMap::new(),
        }
    }

    // ── Lookup ────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.cars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cars.is_empty()
    }

    pub fn by_addr(&self, addr: BleAddr) -> Option<&Car> {
        self.cars.get(&addr)
    }

    pub fn by_addr_mut(&mut self, addr: BleAddr) -> Option<&mut Car> {
        self.cars.get_mut(&addr)
    }

    pub fn by_id(&self, id: CarId) -> Option<&Car> {
        self.cars.values().find(|c| c.car_id == id)
    }

    pub fn by_id_mut(&mut self, id: CarId) -> Option<&mut Car> {
        self.cars.values_mut().find(|c| c.car_id == id)
    }

    pub fn by_ble_name(&self, ble_name: &str) -> Option<&Car> {
        self.cars.values().find(|c| c.ble_name.as_str() == ble_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Car> {
        self.cars.values()
    }

    // ── Discovery ─────────────────────────────────────────────

    /// Insert or refresh a car from an advertisement.
    ///
    /// Existing cars keep their identity and ownership; only the advertised
    /// name, signal strength and `last_seen` are refreshed.
    pub fn upsert_from_advertisement(
        &mut self,
        ble_name: &str,
        addr: BleAddr,
        rssi: i8,
        now_ms: u64,
    ) -> UpsertOutcome {
        if let Some(car) = self.cars.get_mut(&addr) {
            car.ble_name.clear();
            let _ = car.ble_name.push_str(crate::car::clip(ble_name, 32));
            car.rssi = Some(rssi);
            car.last_seen = Some(now_ms);
            return UpsertOutcome::Rediscovered(car.car_id);
        }

        let mut car = Car::from_advertisement(ble_name, addr);
        car.rssi = Some(rssi);
        car.last_seen = Some(now_ms);
        let id = car.car_id;
        match self.cars.insert(addr, car) {
            Ok(_) => UpsertOutcome::Discovered(id),
            Err(_) => {
                log::warn!("registry full ({MAX_CARS} cars), dropping {addr}");
                UpsertOutcome::Dropped
            }
        }
    }

    // ── Ownership ─────────────────────────────────────────────

    /// Assign a car to a session.  Idempotent when the caller already owns
    /// it; fails with `Busy` when any other session does.
    pub fn select(&mut self, id: CarId, session: SessionId) -> Result<(), RegistryError> {
        let car = self.by_id_mut(id).ok_or(RegistryError::NotFound(id))?;
        match car.owner {
            None => {
                car.owner = Some(session);
                Ok(())
            }
            Some(owner) if owner == session => Ok(()),
            Some(_) => Err(RegistryError::Busy(id)),
        }
    }

    /// Release a car.  Idempotent when already free.  When `verifier` is
    /// supplied, only the owning session may free it.
    pub fn free(&mut self, id: CarId, verifier: Option<SessionId>) -> Result<(), RegistryError> {
        let car = self.by_id_mut(id).ok_or(RegistryError::NotFound(id))?;
        match car.owner {
            None => Ok(()),
            Some(owner) => {
                if let Some(v) = verifier {
                    if owner != v {
                        return Err(RegistryError::NotOwner(id));
                    }
                }
                car.owner = None;
                Ok(())
            }
        }
    }

    /// Release every car owned by `session`; returns the freed ids.
    /// Always runs before a session id is forgotten.
    pub fn free_all_by(&mut self, session: SessionId) -> heapless::Vec<CarId, MAX_CARS> {
        let mut freed = heapless::Vec::new();
        for car in self.cars.values_mut() {
            if car.owner == Some(session) {
                car.owner = None;
                let _ = freed.push(car.car_id);
            }
        }
        freed
    }

    pub fn list_free(&self) -> heapless::Vec<CarId, MAX_CARS> {
        let mut out = heapless::Vec::new();
        for car in self.cars.values().filter(|c| c.is_free()) {
            let _ = out.push(car.car_id);
        }
        out
    }

    pub fn owned_by(&self, session: SessionId) -> heapless::Vec<CarId, MAX_CARS> {
        let mut out = heapless::Vec::new();
        for car in self.cars.values().filter(|c| c.owner == Some(session)) {
            let _ = out.push(car.car_id);
        }
        out
    }

    // ── Drive-command coalescing ──────────────────────────────

    /// Bump and return the car's drive sequence number.  A queued drive job
    /// carrying an older number has been superseded and is dropped.
    pub fn next_drive_seq(&mut self, id: CarId) -> Option<u32> {
        let car = self.by_id_mut(id)?;
        car.drive_seq = car.drive_seq.wrapping_add(1);
        Some(car.drive_seq)
    }

    // ── Snapshots ─────────────────────────────────────────────

    pub fn all_status_json(&self) -> Vec<Value> {
        self.cars.values().map(Car::status_json).collect()
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
