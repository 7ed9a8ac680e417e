//! Client sessions: identity, liveness, and message routing.
//!
//! One session per connected client transport.  A session's id is unique
//! for the lifetime of the process (slots are reused, ids are not), so a
//! car owned by a dead session can never be confused with the next client
//! that lands on the same slot.

pub mod channels;
pub mod dispatcher;
pub mod drive;
pub mod io;
pub mod protocol;

use core::fmt;

/// Transport slot index (bounded, reused after disconnect).
pub type ClientSlot = u8;

/// Maximum simultaneously connected clients.
pub const MAX_CLIENTS: usize = 8;

/// Process-unique client session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{:08x}", self.0)
    }
}

/// Live sessions, indexed by transport slot.
#[derive(Debug, Default)]
pub struct SessionTable {
    slots: [Option<SessionId>; MAX_CLIENTS],
    next_serial: u32,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            slots: [None; MAX_CLIENTS],
            next_serial: 1,
        }
    }

    /// Register a session on a freshly accepted slot.
    /// A still-occupied slot is replaced (the transport reuses slots only
    /// after disconnect, so a leftover entry means we missed the close).
    pub fn open(&mut self, slot: ClientSlot) -> Option<SessionId> {
        let entry = self.slots.get_mut(slot as usize)?;
        let id = SessionId(self.next_serial);
        self.next_serial = self.next_serial.wrapping_add(1);
        if entry.replace(id).is_some() {
            log::warn!("slot {slot} reopened without close; previous session replaced");
        }
        Some(id)
    }

    /// Remove the session on `slot`, returning its id.
    pub fn close(&mut self, slot: ClientSlot) -> Option<SessionId> {
        self.slots.get_mut(slot as usize)?.take()
    }

    pub fn session(&self, slot: ClientSlot) -> Option<SessionId> {
        *self.slots.get(slot as usize)?
    }

    /// Every live `(slot, session)` pair.
    pub fn live(&self) -> impl Iterator<Item = (ClientSlot, SessionId)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, id)| id.map(|id| (slot as ClientSlot, id)))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fan a JSON payload out to every live session via the response channel.
/// Slots whose queue entry cannot be placed are skipped with a warning;
/// dead transports are reaped by the I/O task on the next failed write.
pub fn broadcast_json(sessions: &SessionTable, payload: &serde_json::Value) {
    let text = payload.to_string();
    for (slot, _) in sessions.live() {
        let msg = channels::OutboundMsg {
            slot,
            text: text.clone(),
        };
        if channels::RESP_CHANNEL.try_send(msg).is_err() {
            log::warn!("broadcast to slot {slot} dropped: response channel full");
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
