//! Unified error types for the gateway.
//!
//! Small typed enums per subsystem that every caller can match on
//! exhaustively, funnelled into a single top-level [`Error`] for the few
//! places that need to carry "anything that can go wrong on the radio
//! side".
//!
//! The one deliberate wart lives here too: the BLE backend reports failures
//! as free-form message strings, so [`ErrorClass::classify`] is the single
//! place in the crate where error-message inspection is permitted.  Everything
//! above it sees only the enum.

use core::fmt;

use crate::ble::Phase;
use crate::car::CarId;

// ---------------------------------------------------------------------------
// Backend error classification
// ---------------------------------------------------------------------------

/// Coarse classes of BLE backend failures, driving the reconnect backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The host stack already has an operation in flight ("InProgress").
    InProgress,
    /// The link was torn down underneath us ("connection abort",
    /// "software caused", unsolicited disconnect).
    Abort,
    /// Generic failure or timeout.
    Failure,
    /// The device is not currently visible to the adapter.
    NotFound,
    /// Anything the table above does not recognise.
    Other,
}

impl ErrorClass {
    /// Map a backend-provided error message onto an [`ErrorClass`].
    ///
    /// The match table mirrors the strings BlueZ/Bluedroid are known to
    /// produce.  This is the only function in the crate allowed to inspect
    /// error message text.
    pub fn classify(message: &str) -> Self {
        let msg = message.to_ascii_lowercase();
        if msg.contains("inprogress") || msg.contains("in progress") {
            Self::InProgress
        } else if msg.contains("connection abort")
            || msg.contains("software caused")
            || msg.contains("abort")
            || msg.contains("disconnected")
        {
            Self::Abort
        } else if msg.contains("failed") || msg.contains("timeout") {
            Self::Failure
        } else if msg.contains("device not found") || msg.contains("not available") {
            Self::NotFound
        } else {
            Self::Other
        }
    }

    /// Backoff before retry attempt `attempt` (1-based), in milliseconds.
    pub fn backoff_ms(self, attempt: u32) -> u32 {
        match self {
            Self::InProgress => 3_000 + attempt * 500,
            Self::Abort => 2_000 + attempt * 1_000,
            Self::Failure => 1_500 + attempt * 500,
            Self::NotFound => 4_000,
            Self::Other => 1_000 + attempt * 500,
        }
    }

    /// Whether a characteristic operation failing with this class means the
    /// underlying GATT link is gone (Connected → Idle).
    pub fn is_link_loss(self) -> bool {
        matches!(self, Self::Abort | Self::NotFound)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "operation in progress"),
            Self::Abort => write!(f, "link aborted"),
            Self::Failure => write!(f, "connection failed"),
            Self::NotFound => write!(f, "device not found"),
            Self::Other => write!(f, "backend error"),
        }
    }
}

// ---------------------------------------------------------------------------
// Backend error
// ---------------------------------------------------------------------------

/// A raw failure reported by the BLE backend, message included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        ErrorClass::classify(&self.message)
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

/// Malformed GATT payload.  Recovered locally by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// A read returned fewer bytes than the shape requires.
    ShortRead { needed: usize, got: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShortRead { needed, got } => {
                write!(f, "short read: needed {needed} bytes, got {got}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Device-session errors
// ---------------------------------------------------------------------------

/// Failure of a single characteristic operation on a car link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Operation requires a Connected link.
    NotConnected,
    /// The backend rejected the operation.
    Backend(BackendError),
    /// The payload could not be decoded.
    Codec(CodecError),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "device not connected"),
            Self::Backend(e) => write!(f, "backend: {e}"),
            Self::Codec(e) => write!(f, "codec: {e}"),
        }
    }
}

impl From<BackendError> for LinkError {
    fn from(e: BackendError) -> Self {
        Self::Backend(e)
    }
}

impl From<CodecError> for LinkError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

/// All connect attempts (and the optional adapter reset) were exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectError {
    /// How many attempts were made in total.
    pub attempts: u32,
    /// Class of the final failure.
    pub last_class: ErrorClass,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connect failed after {} attempts ({})",
            self.attempts, self.last_class
        )
    }
}

/// The four motor characteristics, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DriveAxis {
    X = 0,
    Y = 1,
    Speed = 2,
    Decay = 3,
}

impl DriveAxis {
    pub const fn index(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for DriveAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X => write!(f, "X"),
            Self::Y => write!(f, "Y"),
            Self::Speed => write!(f, "Speed"),
            Self::Decay => write!(f, "Decay"),
        }
    }
}

/// A drive write sequence failed part-way; `axis` names the first write
/// that did not go through.  Earlier writes are not rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveError {
    pub axis: DriveAxis,
    pub cause: LinkError,
}

impl fmt::Display for DriveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "drive write failed at axis {} (index {}): {}",
            self.axis,
            self.axis.index(),
            self.cause
        )
    }
}

// ---------------------------------------------------------------------------
// Coordinator errors
// ---------------------------------------------------------------------------

/// An operation was attempted in the wrong adapter phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseError {
    pub current: Phase,
}

impl fmt::Display for PhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation blocked: adapter is in {} phase", self.current)
    }
}

// ---------------------------------------------------------------------------
// Registry errors
// ---------------------------------------------------------------------------

/// Ownership / lookup failures from the car registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// No car with this id is known.
    NotFound(CarId),
    /// The car is already selected by another client.
    Busy(CarId),
    /// The caller does not own the car it tried to free.
    NotOwner(CarId),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "Car {id} not found"),
            Self::Busy(id) => write!(f, "Car {id} is already selected by another client"),
            Self::NotOwner(id) => write!(f, "Car {id} is not selected by this client"),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level funnel
// ---------------------------------------------------------------------------

/// Every fallible radio-side operation funnels into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Phase(PhaseError),
    Connect(ConnectError),
    Link(LinkError),
    Drive(DriveError),
    Registry(RegistryError),
    /// The requested address has never been seen by discovery.
    UnknownDevice,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Phase(e) => write!(f, "{e}"),
            Self::Connect(e) => write!(f, "{e}"),
            Self::Link(e) => write!(f, "{e}"),
            Self::Drive(e) => write!(f, "{e}"),
            Self::Registry(e) => write!(f, "{e}"),
            Self::UnknownDevice => write!(f, "device not found in discovered devices"),
        }
    }
}

impl From<PhaseError> for Error {
    fn from(e: PhaseError) -> Self {
        Self::Phase(e)
    }
}

impl From<ConnectError> for Error {
    fn from(e: ConnectError) -> Self {
        Self::Connect(e)
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

impl From<DriveError> for Error {
    fn from(e: DriveError) -> Self {
        Self::Drive(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

/// Gateway-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
