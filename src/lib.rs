//! # osc-link
//!
//! Time-accurate OSC control message dispatch for real-time audio
//! synthesis engines.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        SUPERVISING CONTEXT                       │
//! │                                                                  │
//! │   UI / editors ──► TimeSync (sync) ──► Dispatcher (dispatch)     │
//! │                      │ offset              │ commands            │
//! │                      │                     ▼                     │
//! │   ┌──────────────────┴──────┬──────────────┬─────────────────┐   │
//! │   │   Outbound Unit         │ Inbound Unit │ Diagnostic Unit │   │
//! │   │   pending sends,        │ decode +     │ decode +        │   │
//! │   │   cancellation          │ deliver      │ deliver         │   │
//! │   └───────────┬─────────────┴──────┬───────┴───────┬─────────┘   │
//! │               │ write control      │ reply slots   │             │
//! │               ▼                    ▼               ▼             │
//! │   ┌──────────────────────────────────────────────────────────┐   │
//! │   │              Shared Region (region::SharedRegion)        │   │
//! │   │     control area │ arbitrated reply slots                │   │
//! │   └──────────────────────────┬───────────────────────────────┘   │
//! └──────────────────────────────┼───────────────────────────────────┘
//!                                │
//!                                ▼
//!                    Audio synthesis engine (black box,
//!                    owns the real-time clock)
//! ```
//!
//! The codec (`codec`) is pure and stateless; the dispatcher never blocks
//! the audio path; the time-sync bridge converts bundle time tags into
//! local-clock release delays.

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod region;
pub mod sync;
pub mod transport;

pub use error::{Error, Result};

/// Library-wide constants
pub mod constants {
    /// Per-unit init handshake timeout
    pub const DEFAULT_INIT_TIMEOUT_MS: u64 = 5_000;

    /// Per-unit stats query timeout
    pub const DEFAULT_STATS_TIMEOUT_MS: u64 = 1_000;

    /// Receiver transport poll interval
    pub const DEFAULT_POLL_INTERVAL_US: u64 = 500;

    /// Grace period for unit shutdown
    pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 1_000;

    /// Event broadcast buffer capacity
    pub const DEFAULT_EVENT_CAPACITY: usize = 256;

    /// Compensation for downstream processing latency
    pub const DEFAULT_LATENCY_BUDGET_MS: u64 = 50;

    /// Bounded wait for the first clock offset
    pub const DEFAULT_OFFSET_WAIT_MS: u64 = 5_000;

    /// Control area size in the shared region
    pub const DEFAULT_CONTROL_CAPACITY: usize = 64 * 1024;

    /// Number of engine reply slots
    pub const DEFAULT_REPLY_SLOTS: usize = 64;

    /// Size of one reply slot
    pub const DEFAULT_REPLY_SLOT_SIZE: usize = 1_024;

    /// Packet queue capacity for the loopback engine
    pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

    /// Largest packet accepted by the outbound transport
    pub const MAX_PACKET_SIZE: usize = 65_536;
}
