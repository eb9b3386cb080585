//! Error types for the control dispatch library

use thiserror::Error;

use crate::dispatch::UnitKind;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Time sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire-format codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed address: {0:?}")]
    MalformedAddress(String),

    #[error("Type tag string does not start with ','")]
    MalformedTypeTagString,

    #[error("Unknown type tag: {0:?}")]
    UnknownTypeTag(char),

    #[error("Unterminated argument array")]
    UnterminatedArray,

    #[error("Invalid UTF-8 in string argument")]
    InvalidString(#[from] std::str::Utf8Error),

    #[error("Character code {0:#x} is not a valid char")]
    InvalidChar(u32),

    #[error("Unexpected end of packet: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("Cannot encode message: {0}")]
    InvalidMessage(String),

    #[error("Cannot encode bundle: {0}")]
    InvalidBundle(String),
}

/// Orchestration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("{0} unit did not acknowledge init within the timeout")]
    UnitInitTimeout(UnitKind),

    #[error("{unit} unit failed to initialize: {reason}")]
    UnitInitFailure { unit: UnitKind, reason: String },

    #[error("Dispatcher is not ready")]
    NotReady,

    #[error("Dispatcher is already initialized")]
    AlreadyInitialized,

    #[error("{0} unit command channel closed")]
    ChannelClosed(UnitKind),
}

/// Per-unit transport errors (non-fatal to the system)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Control region full: {needed} bytes needed, {available} available")]
    RegionFull { needed: usize, available: usize },

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Packet queue full")]
    QueueFull,

    #[error("Transport disconnected")]
    Disconnected,
}

/// Clock synchronization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Audio clock never reported running (waited {waited_ms} ms)")]
    ClockNeverRan { waited_ms: u64 },
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
