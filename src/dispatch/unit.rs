//! Execution unit primitives
//!
//! The dispatcher runs three units: the outbound sender, the inbound
//! receiver and the diagnostic receiver. Each is a tokio task owning its
//! transport, driven purely by commands; the handle kept by the
//! orchestrator carries the command channel and the lifecycle watch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::DispatchError;
use crate::region::SharedRegion;

/// Identifies one of the three execution units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    Outbound,
    Inbound,
    Diagnostic,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitKind::Outbound => "outbound",
            UnitKind::Inbound => "inbound",
            UnitKind::Diagnostic => "diagnostic",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of one execution unit.
///
/// `Uninitialized -> Initializing -> Ready | Failed`, and
/// `Ready -> Terminated` on shutdown. Failed and Terminated are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnitState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
    Terminated,
}

/// Identifies the subsystem or editor a send originated from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OriginId(pub u32);

impl fmt::Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "origin#{}", self.0)
    }
}

/// Which pending sends a cancellation applies to.
///
/// Narrower scopes take precedence: exact origin+tag, then origin-only,
/// then global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelScope {
    All,
    Origin(OriginId),
    Exact(OriginId, String),
}

impl CancelScope {
    /// Whether a pending send with this origin/tag matches the scope
    pub fn matches(&self, origin: OriginId, tag: Option<&str>) -> bool {
        match self {
            CancelScope::All => true,
            CancelScope::Origin(o) => *o == origin,
            CancelScope::Exact(o, t) => *o == origin && tag == Some(t.as_str()),
        }
    }
}

/// Options for a raw outbound send
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub origin: OriginId,
    /// Free-form cancellation group
    pub tag: Option<String>,
    /// Hold the send for this long before dispatching; absent = send now
    pub release_delay: Option<Duration>,
}

impl SendOptions {
    pub fn new(origin: OriginId) -> Self {
        Self {
            origin,
            ..Self::default()
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn release_delay(mut self, delay: Duration) -> Self {
        self.release_delay = Some(delay);
        self
    }
}

/// Counters reported by one execution unit
#[derive(Debug, Clone, Default, Serialize)]
pub struct UnitStats {
    /// Packets dispatched (outbound) or decoded (receivers)
    pub packets: u64,
    /// Payload bytes handled
    pub bytes: u64,
    /// Decode/transport errors survived
    pub errors: u64,
    /// Pending delayed sends currently held
    pub pending: usize,
    /// Pending sends dropped by cancellation
    pub cancelled: u64,
}

/// Stats query outcome for one unit
#[derive(Debug, Clone, Serialize)]
pub enum UnitStatsReport {
    Stats(UnitStats),
    /// The unit did not answer within the query timeout
    TimedOut,
}

/// Commands accepted by unit tasks
pub(crate) enum UnitCommand {
    /// Handshake: bind the transport to the shared region and acknowledge
    Init {
        region: Arc<SharedRegion>,
        ack: oneshot::Sender<std::result::Result<(), String>>,
    },
    /// Begin draining the transport (receivers only)
    StartConsuming,
    /// Outbound send, optionally held for a release delay
    Send {
        payload: Bytes,
        origin: OriginId,
        tag: Option<String>,
        delay: Option<Duration>,
    },
    /// Flatten any bundle structure and dispatch every message now
    SendImmediate { payload: Bytes },
    /// A held send's delay elapsed
    Release(u64),
    /// Drop matching pending sends
    Cancel(CancelScope),
    Stats(oneshot::Sender<UnitStats>),
    Shutdown,
}

/// Orchestrator-side handle to a spawned unit
pub(crate) struct UnitHandle {
    pub kind: UnitKind,
    pub cmd_tx: mpsc::UnboundedSender<UnitCommand>,
    pub state: watch::Receiver<UnitState>,
    pub task: JoinHandle<()>,
}

impl UnitHandle {
    pub fn send(&self, cmd: UnitCommand) -> std::result::Result<(), DispatchError> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| DispatchError::ChannelClosed(self.kind))
    }

    pub fn state(&self) -> UnitState {
        *self.state.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_scope_precedence() {
        let origin = OriginId(1);
        let other = OriginId(2);

        let exact = CancelScope::Exact(origin, "x".to_string());
        assert!(exact.matches(origin, Some("x")));
        assert!(!exact.matches(origin, Some("y")));
        assert!(!exact.matches(origin, None));
        assert!(!exact.matches(other, Some("x")));

        let by_origin = CancelScope::Origin(origin);
        assert!(by_origin.matches(origin, Some("anything")));
        assert!(by_origin.matches(origin, None));
        assert!(!by_origin.matches(other, None));

        assert!(CancelScope::All.matches(other, Some("x")));
    }

    #[test]
    fn test_send_options_builder() {
        let opts = SendOptions::new(OriginId(7))
            .tag("swoosh")
            .release_delay(Duration::from_millis(250));
        assert_eq!(opts.origin, OriginId(7));
        assert_eq!(opts.tag.as_deref(), Some("swoosh"));
        assert_eq!(opts.release_delay, Some(Duration::from_millis(250)));
    }
}
