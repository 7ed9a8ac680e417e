//! BLE coordination subsystem.
//!
//! - [`Phase`] — the adapter-wide scan/control mode.
//! - [`EventBus`] — typed subscribe/unsubscribe event delivery for device
//!   and phase events.
//! - [`device`] — per-car GATT link state machine.
//! - [`coordinator`] — single-adapter arbitration, discovery and recovery.

pub mod coordinator;
pub mod device;

use core::fmt;

use crate::car::{BleAddr, CarId};
use crate::ports::{DelayPort, ShellPort};

// ───────────────────────────────────────────────────────────────
// Phase
// ───────────────────────────────────────────────────────────────

/// Adapter-wide mode.  `Scan` disables per-car GATT traffic; `Control`
/// enables it.  Discovery drives the transitions, clients may force them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Scan,
    Control,
}

impl Phase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Control => "control",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ───────────────────────────────────────────────────────────────
// Events
// ───────────────────────────────────────────────────────────────

/// Device and phase events emitted by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleEvent {
    /// A never-before-seen car advertised during a scan window.
    Discovered { car_id: CarId, addr: BleAddr },
    /// A known car advertised again.
    Rediscovered { car_id: CarId, addr: BleAddr },
    /// A GATT link to the car was established.
    Connected { addr: BleAddr },
    /// The GATT link was closed (deliberately or by the stack).
    Disconnected { addr: BleAddr },
    /// The adapter changed phase.
    PhaseChanged { phase: Phase },
}

/// Handle returned by [`EventBus::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u32);

/// Typed event fan-out with explicit subscription handles.
///
/// Listeners run synchronously on the emitting task; they must not block.
pub struct EventBus<E> {
    subscribers: Vec<(SubscriptionId, Box<dyn FnMut(&E)>)>,
    next_id: u32,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&E) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.subscribers.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener.  Returns false when the handle is unknown
    /// (e.g. already unsubscribed).
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    pub fn emit(&mut self, event: &E) {
        for (_, listener) in &mut self.subscribers {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

// ───────────────────────────────────────────────────────────────
// Stale host links
// ───────────────────────────────────────────────────────────────

/// Clear any host-level link to `addr` left behind by a previous run or a
/// crashed client.  Shell failures are logged and swallowed — this is a
/// cleanup pass, not a precondition.
pub async fn clear_host_links(addr: BleAddr, shell: &impl ShellPort, delay: &impl DelayPort) {
    let links = shell.active_links();
    if !links.contains(&addr) {
        return;
    }
    log::info!("found existing host link to {addr}, clearing");
    if !shell.disconnect_link(addr) {
        log::debug!("host-level disconnect of {addr} did not succeed");
    }
    delay.delay_ms(1_000).await;
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
