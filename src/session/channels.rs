//! Inter-task communication channels for client traffic.
//!
//! Bounded `embassy-sync` MPMC channels bridge the transport I/O task with
//! the dispatcher task.  Both run on the same executor; the channels exist
//! for backpressure and so the I/O side never calls into domain logic.
//!
//! ```text
//! ┌──────────────┐  InboundMsg   ┌──────────────┐
//! │   I/O task   │──────────────▶│  Dispatcher  │
//! │              │◀──────────────│              │
//! └──────────────┘  OutboundMsg  └──────────────┘
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use super::ClientSlot;

/// One decoded text frame from a client.
pub struct InboundMsg {
    pub slot: ClientSlot,
    pub text: String,
}

/// One JSON reply on its way to a client.
pub struct OutboundMsg {
    pub slot: ClientSlot,
    pub text: String,
}

/// A client transport was accepted.
pub struct ConnectMsg {
    pub slot: ClientSlot,
}

/// A client transport closed (or failed on write).
pub struct DisconnectMsg {
    pub slot: ClientSlot,
}

const CMD_DEPTH: usize = 8;
const RESP_DEPTH: usize = 16;

/// Inbound frames: I/O task → dispatcher.
pub static CMD_CHANNEL: Channel<CriticalSectionRawMutex, InboundMsg, CMD_DEPTH> = Channel::new();

/// Outbound replies and broadcasts: dispatcher → I/O task.
pub static RESP_CHANNEL: Channel<CriticalSectionRawMutex, OutboundMsg, RESP_DEPTH> = Channel::new();

/// Accept notifications: I/O task → dispatcher.
pub static CONNECT_CHANNEL: Channel<CriticalSectionRawMutex, ConnectMsg, 4> = Channel::new();

/// Disconnect notifications: I/O task → dispatcher.
pub static DISCONNECT_CHANNEL: Channel<CriticalSectionRawMutex, DisconnectMsg, 4> = Channel::new();
