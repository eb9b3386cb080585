//! Outbound sender unit
//!
//! Owns the write side of the engine transport. Delayed sends are held in
//! a pending registry keyed by an internal id; a timer task posts a
//! `Release` back onto the command queue when the delay elapses, so the
//! transport is only ever touched from the unit task itself. Cancellation
//! removes pending entries and aborts their timers; a release racing a
//! cancel may miss a send dispatched in the same instant, which is
//! accepted best-effort behavior.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use crate::codec::{decode_packet, encode_message};
use crate::dispatch::events::EventBus;
use crate::dispatch::unit::{
    CancelScope, OriginId, UnitCommand, UnitHandle, UnitKind, UnitState, UnitStats,
};
use crate::transport::UnitTransport;

struct PendingSend {
    payload: Bytes,
    origin: OriginId,
    tag: Option<String>,
    timer: AbortHandle,
}

struct OutboundUnit {
    transport: Box<dyn UnitTransport>,
    cmd_tx: mpsc::UnboundedSender<UnitCommand>,
    state_tx: watch::Sender<UnitState>,
    events: EventBus,
    pending: Arc<DashMap<u64, PendingSend>>,
    next_id: u64,
    stats: UnitStats,
}

/// Spawn the outbound unit task
pub(crate) fn spawn(transport: Box<dyn UnitTransport>, events: EventBus) -> UnitHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(UnitState::Uninitialized);

    let unit = OutboundUnit {
        transport,
        cmd_tx: cmd_tx.clone(),
        state_tx,
        events,
        pending: Arc::new(DashMap::new()),
        next_id: 0,
        stats: UnitStats::default(),
    };
    let task = tokio::spawn(unit.run(cmd_rx));

    UnitHandle {
        kind: UnitKind::Outbound,
        cmd_tx,
        state: state_rx,
        task,
    }
}

impl OutboundUnit {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<UnitCommand>) {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                UnitCommand::Init { region, ack } => {
                    let _ = self.state_tx.send(UnitState::Initializing);
                    match self.transport.bind(region) {
                        Ok(()) => {
                            let _ = self.state_tx.send(UnitState::Ready);
                            let _ = ack.send(Ok(()));
                        }
                        Err(e) => {
                            let _ = self.state_tx.send(UnitState::Failed);
                            let _ = ack.send(Err(e.to_string()));
                        }
                    }
                }
                UnitCommand::StartConsuming => {}
                UnitCommand::Send {
                    payload,
                    origin,
                    tag,
                    delay,
                } => match delay {
                    None => self.dispatch(payload),
                    Some(delay) => self.hold(payload, origin, tag, delay),
                },
                UnitCommand::SendImmediate { payload } => self.flatten_dispatch(payload),
                UnitCommand::Release(id) => {
                    if let Some((_, held)) = self.pending.remove(&id) {
                        self.dispatch(held.payload);
                    }
                }
                UnitCommand::Cancel(scope) => self.cancel(scope),
                UnitCommand::Stats(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                UnitCommand::Shutdown => break,
            }
        }

        // Drop any still-held sends on the way out
        for entry in self.pending.iter() {
            entry.value().timer.abort();
        }
        self.pending.clear();
        let _ = self.state_tx.send(UnitState::Terminated);
    }

    /// Write one packet to the engine
    fn dispatch(&mut self, payload: Bytes) {
        match self.transport.send(&payload) {
            Ok(()) => {
                self.stats.packets += 1;
                self.stats.bytes += payload.len() as u64;
            }
            Err(e) => {
                self.stats.errors += 1;
                self.events
                    .publish_error(UnitKind::Outbound, format!("send failed: {}", e));
            }
        }
    }

    /// Hold a send until its release delay elapses
    fn hold(&mut self, payload: Bytes, origin: OriginId, tag: Option<String>, delay: Duration) {
        let id = self.next_id;
        self.next_id += 1;

        let cmd_tx = self.cmd_tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = cmd_tx.send(UnitCommand::Release(id));
        })
        .abort_handle();

        self.pending.insert(
            id,
            PendingSend {
                payload,
                origin,
                tag,
                timer,
            },
        );
    }

    /// Flatten any bundle structure and dispatch the constituent messages
    /// now, ignoring embedded time tags
    fn flatten_dispatch(&mut self, payload: Bytes) {
        let packet = match decode_packet(&payload) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.errors += 1;
                self.events
                    .publish_error(UnitKind::Outbound, format!("immediate send: {}", e));
                return;
            }
        };

        for message in packet.flatten() {
            match encode_message(&message) {
                Ok(bytes) => self.dispatch(bytes),
                Err(e) => {
                    self.stats.errors += 1;
                    self.events
                        .publish_error(UnitKind::Outbound, format!("immediate send: {}", e));
                }
            }
        }
    }

    /// Drop pending sends matching the scope and abort their timers
    fn cancel(&mut self, scope: CancelScope) {
        let mut cancelled = 0u64;
        self.pending.retain(|_, held| {
            if scope.matches(held.origin, held.tag.as_deref()) {
                held.timer.abort();
                cancelled += 1;
                false
            } else {
                true
            }
        });
        if cancelled > 0 {
            tracing::debug!(count = cancelled, ?scope, "cancelled pending sends");
        }
        self.stats.cancelled += cancelled;
    }

    fn snapshot(&self) -> UnitStats {
        let mut stats = self.stats.clone();
        stats.pending = self.pending.len();
        stats
    }
}
