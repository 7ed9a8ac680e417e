//! Client transport port and the TCP adapter.
//!
//! The gateway's wire protocol is framed JSON text; how the frames travel
//! (WebSocket behind a proxy, raw TCP on the bench) is a transport
//! concern kept behind [`TransportPort`].  The bundled adapter is a
//! non-blocking TCP listener built on `std::net`, which ESP-IDF supports
//! natively — the same code serves the target and Linux hosts.

use core::fmt;

use crate::session::{ClientSlot, MAX_CLIENTS};

// ───────────────────────────────────────────────────────────────
// Port
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The slot has no live client.
    NotConnected,
    /// The peer closed the stream.
    Closed,
    /// Any other socket error.
    Io,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::Closed => write!(f, "connection closed"),
            Self::Io => write!(f, "I/O error"),
        }
    }
}

/// Multi-client byte transport.  All calls are non-blocking; the I/O task
/// polls via reactor timers.
pub trait TransportPort {
    /// Accept one pending client, if any.  Returns its slot.
    fn try_accept(&mut self) -> Option<ClientSlot>;

    fn is_connected(&self, slot: ClientSlot) -> bool;

    /// Non-blocking read.  `Ok(0)` means no data right now.
    fn read_client(&mut self, slot: ClientSlot, buf: &mut [u8])
    -> Result<usize, TransportError>;

    /// Blocking-ish write of a full frame (frames are small).
    fn write_client(&mut self, slot: ClientSlot, data: &[u8]) -> Result<(), TransportError>;

    /// Drop the client.  Idempotent.
    fn disconnect(&mut self, slot: ClientSlot);
}

// ───────────────────────────────────────────────────────────────
// TCP adapter
// ───────────────────────────────────────────────────────────────

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};

use log::{debug, info, warn};

/// Non-blocking TCP listener with a fixed client-slot table.
pub struct TcpTransport {
    listener: TcpListener,
    clients: [Option<TcpStream>; MAX_CLIENTS],
}

impl TcpTransport {
    /// Bind on all interfaces.  Clients on the LAN are trusted; there is
    /// no authentication layer.
    pub fn bind(port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        info!("listening for clients on port {port}");
        Ok(Self {
            listener,
            clients: core::array::from_fn(|_| None),
        })
    }

    fn free_slot(&self) -> Option<usize> {
        self.clients.iter().position(Option::is_none)
    }
}

impl TransportPort for TcpTransport {
    fn try_accept(&mut self) -> Option<ClientSlot> {
        let (stream, peer) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return None,
            Err(e) => {
                debug!("accept failed: {e}");
                return None;
            }
        };
        let Some(slot) = self.free_slot() else {
            warn!("client table full, refusing connection from {peer}");
            return None;
        };
        if let Err(e) = stream.set_nonblocking(true) {
            warn!("could not make client socket non-blocking: {e}");
            return None;
        }
        let _ = stream.set_nodelay(true);
        info!("accepted client {peer} on slot {slot}");
        self.clients[slot] = Some(stream);
        Some(slot as ClientSlot)
    }

    fn is_connected(&self, slot: ClientSlot) -> bool {
        self.clients
            .get(slot as usize)
            .is_some_and(Option::is_some)
    }

    fn read_client(
        &mut self,
        slot: ClientSlot,
        buf: &mut [u8],
    ) -> Result<usize, TransportError> {
        let stream = self
            .clients
            .get_mut(slot as usize)
            .and_then(Option::as_mut)
            .ok_or(TransportError::NotConnected)?;
        match stream.read(buf) {
            Ok(0) => Err(TransportError::Closed),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => {
                debug!("read error on slot {slot}: {e}");
                Err(TransportError::Io)
            }
        }
    }

    fn write_client(&mut self, slot: ClientSlot, data: &[u8]) -> Result<(), TransportError> {
        let stream = self
            .clients
            .get_mut(slot as usize)
            .and_then(Option::as_mut)
            .ok_or(TransportError::NotConnected)?;
        match stream.write_all(data) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::BrokenPipe => Err(TransportError::Closed),
            Err(e) => {
                debug!("write error on slot {slot}: {e}");
                Err(TransportError::Io)
            }
        }
    }

    fn disconnect(&mut self, slot: ClientSlot) {
        if let Some(entry) = self.clients.get_mut(slot as usize) {
            entry.take();
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
