//! Async client I/O — reactor-driven multi-client transport bridge.
//!
//! Three cooperating tasks on the shared executor:
//!
//! 1. **Accept** — polls `try_accept()` every 50 ms via reactor timer
//! 2. **Read** — polls connected clients every 10 ms, feeding bytes into
//!    per-slot frame assemblers and forwarding complete frames to the
//!    dispatcher via `CMD_CHANNEL`
//! 3. **Write** — truly async via `RESP_CHANNEL.receive().await`
//!    (wakes instantly when the dispatcher pushes a reply)
//!
//! The transport delivers text frames; this layer only reassembles
//! newline-delimited frames from the byte stream and never looks inside
//! them.

use core::cell::RefCell;
use core::time::Duration;
use std::rc::Rc;

use log::{info, warn};

use crate::adapters::transport::{TransportError, TransportPort};

use super::channels::{
    CMD_CHANNEL, CONNECT_CHANNEL, ConnectMsg, DISCONNECT_CHANNEL, DisconnectMsg, InboundMsg,
    OutboundMsg, RESP_CHANNEL,
};
use super::{ClientSlot, MAX_CLIENTS};

const READ_BUF_SIZE: usize = 1024;

/// Longest accepted frame; overlong input is discarded to the next newline.
pub const MAX_FRAME_LEN: usize = 1024;

// ── Frame reassembly ─────────────────────────────────────────

/// Reassembles newline-delimited text frames from a byte stream.
pub struct FrameAssembler {
    buf: Vec<u8>,
    overflowed: bool,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            overflowed: false,
        }
    }

    /// Feed raw bytes; invokes `sink` once per completed frame.
    /// Carriage returns before the newline are stripped; empty frames and
    /// frames that overflowed the length cap are dropped.
    pub fn feed(&mut self, data: &[u8], mut sink: impl FnMut(&str)) {
        for &byte in data {
            if byte == b'\n' {
                if !self.overflowed && !self.buf.is_empty() {
                    if self.buf.last() == Some(&b'\r') {
                        self.buf.pop();
                    }
                    if let Ok(text) = core::str::from_utf8(&self.buf) {
                        if !text.is_empty() {
                            sink(text);
                        }
                    } else {
                        warn!("dropping frame with invalid UTF-8");
                    }
                }
                self.buf.clear();
                self.overflowed = false;
            } else if self.buf.len() >= MAX_FRAME_LEN {
                if !self.overflowed {
                    warn!("frame exceeds {MAX_FRAME_LEN} bytes, discarding to newline");
                }
                self.overflowed = true;
            } else {
                self.buf.push(byte);
            }
        }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.overflowed = false;
    }
}

// ── Shared I/O state ─────────────────────────────────────────

pub type SharedTransport<T> = Rc<RefCell<T>>;
type SharedSlots = Rc<RefCell<[FrameAssembler; MAX_CLIENTS]>>;

pub fn new_slots() -> SharedSlots {
    Rc::new(RefCell::new(core::array::from_fn(|_| FrameAssembler::new())))
}

fn forward_frame(slot: ClientSlot, text: &str) {
    if CMD_CHANNEL
        .try_send(InboundMsg {
            slot,
            text: text.to_owned(),
        })
        .is_err()
    {
        warn!("IO[{slot}]: command channel full, dropping frame");
    }
}

fn notify_connect(slot: ClientSlot) {
    if CONNECT_CHANNEL.try_send(ConnectMsg { slot }).is_err() {
        warn!("IO[{slot}]: connect channel full");
    }
}

fn notify_disconnect(slot: ClientSlot) {
    if DISCONNECT_CHANNEL.try_send(DisconnectMsg { slot }).is_err() {
        warn!("IO[{slot}]: disconnect channel full");
    }
}

// ── I/O tasks ────────────────────────────────────────────────

/// Accept task — checks for new connections at 50 ms intervals.
pub async fn accept_loop<T: TransportPort>(transport: SharedTransport<T>, slots: SharedSlots) {
    loop {
        {
            let mut t = transport.borrow_mut();
            if let Some(slot) = t.try_accept() {
                info!("IO: client {slot} connected");
                slots.borrow_mut()[slot as usize].reset();
                notify_connect(slot);
            }
        }
        async_io_mini::Timer::after(Duration::from_millis(50)).await;
    }
}

/// Read task — polls all connected clients at 10 ms intervals.
pub async fn read_loop<T: TransportPort>(transport: SharedTransport<T>, slots: SharedSlots) {
    let mut read_buf = [0u8; READ_BUF_SIZE];
    loop {
        {
            let mut t = transport.borrow_mut();
            let mut s = slots.borrow_mut();
            for slot_idx in 0..MAX_CLIENTS {
                let slot = slot_idx as ClientSlot;
                if !t.is_connected(slot) {
                    continue;
                }
                match t.read_client(slot, &mut read_buf) {
                    Ok(0) => {}
                    Ok(n) => {
                        s[slot_idx].feed(&read_buf[..n], |text| forward_frame(slot, text));
                    }
                    Err(TransportError::Closed) => {
                        info!("IO: client {slot} disconnected (read)");
                        t.disconnect(slot);
                        s[slot_idx].reset();
                        notify_disconnect(slot);
                    }
                    Err(e) => {
                        warn!("IO: client {slot} read error ({e}), disconnecting");
                        t.disconnect(slot);
                        s[slot_idx].reset();
                        notify_disconnect(slot);
                    }
                }
            }
        }
        async_io_mini::Timer::after(Duration::from_millis(10)).await;
    }
}

/// Write task — wakes instantly when the dispatcher pushes a reply.
/// A failed write reaps the client: the reply is dropped and the session
/// torn down, never surfaced to other clients.
pub async fn write_loop<T: TransportPort>(transport: SharedTransport<T>, slots: SharedSlots) {
    loop {
        let OutboundMsg { slot, text } = RESP_CHANNEL.receive().await;

        let mut t = transport.borrow_mut();
        if !t.is_connected(slot) {
            continue;
        }
        let mut frame = text.into_bytes();
        frame.push(b'\n');
        if let Err(e) = t.write_client(slot, &frame) {
            warn!("IO: write to client {slot} failed: {e}");
            t.disconnect(slot);
            slots.borrow_mut()[slot as usize].reset();
            notify_disconnect(slot);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
