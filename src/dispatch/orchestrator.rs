//! Dispatch orchestrator
//!
//! Brings up the three execution units over one shared region, routes
//! decoded inbound traffic to subscribers and forwards outbound
//! send/cancel requests. The orchestrator itself never blocks the audio
//! path: every unit interaction is a channel send, and the only awaits
//! are the bounded init handshake and stats queries.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future;
use tokio::sync::{broadcast, oneshot};

use crate::codec::{encode_message, Argument, Message};
use crate::config::DispatchConfig;
use crate::dispatch::events::{ErrorEvent, EventBus, InboundEvent};
use crate::dispatch::unit::{
    CancelScope, OriginId, SendOptions, UnitCommand, UnitHandle, UnitKind, UnitState,
    UnitStatsReport,
};
use crate::dispatch::{inbound, outbound};
use crate::error::{DispatchError, Result};
use crate::region::SharedRegion;
use crate::transport::UnitTransports;

/// Orchestrator-level state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

/// Per-unit statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct LinkStats {
    pub outbound: UnitStatsReport,
    pub inbound: UnitStatsReport,
    pub diagnostic: UnitStatsReport,
}

struct Units {
    outbound: UnitHandle,
    inbound: UnitHandle,
    diagnostic: UnitHandle,
}

impl Units {
    fn handles(&self) -> [&UnitHandle; 3] {
        [&self.outbound, &self.inbound, &self.diagnostic]
    }
}

/// The dispatch orchestrator
pub struct Dispatcher {
    config: DispatchConfig,
    state: Mutex<LinkState>,
    units: Mutex<Option<Units>>,
    events: EventBus,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            config,
            state: Mutex::new(LinkState::Uninitialized),
            units: Mutex::new(None),
            events,
        }
    }

    pub fn state(&self) -> LinkState {
        *self.state.lock()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LinkState::Ready
    }

    /// Start all three execution units and perform the init handshake.
    ///
    /// Each unit gets an independent, concurrently evaluated timeout. Any
    /// timeout or unit-reported failure aborts the whole bring-up and
    /// surfaces the first error in unit order; partially started units
    /// remain terminable by [`Dispatcher::shutdown`].
    pub async fn initialize(
        &self,
        transports: UnitTransports,
        region: Arc<SharedRegion>,
    ) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != LinkState::Uninitialized {
                return Err(DispatchError::AlreadyInitialized.into());
            }
            *state = LinkState::Initializing;
        }

        let units = Units {
            outbound: outbound::spawn(transports.outbound, self.events.clone()),
            inbound: inbound::spawn(
                UnitKind::Inbound,
                transports.inbound,
                self.events.clone(),
                self.config.poll_interval(),
            ),
            diagnostic: inbound::spawn(
                UnitKind::Diagnostic,
                transports.diagnostic,
                self.events.clone(),
                self.config.poll_interval(),
            ),
        };

        // Fire the handshake at every unit before awaiting any of them
        let mut acks = Vec::new();
        for handle in units.handles() {
            let (ack_tx, ack_rx) = oneshot::channel();
            let sent = handle
                .send(UnitCommand::Init {
                    region: region.clone(),
                    ack: ack_tx,
                })
                .is_ok();
            acks.push((handle.kind, ack_rx, sent));
        }
        *self.units.lock() = Some(units);

        let init_timeout = self.config.init_timeout();
        let outcomes = future::join_all(acks.into_iter().map(|(kind, ack_rx, sent)| async move {
            if !sent {
                return Err(DispatchError::UnitInitFailure {
                    unit: kind,
                    reason: "command channel closed".to_string(),
                });
            }
            match tokio::time::timeout(init_timeout, ack_rx).await {
                Err(_) => Err(DispatchError::UnitInitTimeout(kind)),
                Ok(Err(_)) => Err(DispatchError::UnitInitFailure {
                    unit: kind,
                    reason: "unit task terminated".to_string(),
                }),
                Ok(Ok(Err(reason))) => Err(DispatchError::UnitInitFailure { unit: kind, reason }),
                Ok(Ok(Ok(()))) => Ok(()),
            }
        }))
        .await;

        if let Some(err) = outcomes.into_iter().find_map(|r| r.err()) {
            tracing::error!("initialization failed: {}", err);
            *self.state.lock() = LinkState::Failed;
            return Err(err.into());
        }

        let begun = {
            let units = self.units.lock();
            match units.as_ref() {
                Some(units) => units
                    .inbound
                    .send(UnitCommand::StartConsuming)
                    .and_then(|_| units.diagnostic.send(UnitCommand::StartConsuming)),
                None => Err(DispatchError::NotReady),
            }
        };
        if let Err(err) = begun {
            tracing::error!("initialization failed: {}", err);
            *self.state.lock() = LinkState::Failed;
            return Err(err.into());
        }

        *self.state.lock() = LinkState::Ready;
        self.events.publish_initialized();
        tracing::info!("dispatcher ready");
        Ok(())
    }

    /// Auto-typing convenience send; encode errors surface synchronously
    pub fn send(&self, address: &str, args: Vec<Argument>) -> Result<()> {
        let message = Message::with_args(address, args)?;
        let bytes = encode_message(&message)?;
        self.send_raw(bytes, SendOptions::default())
    }

    /// Forward a raw outbound packet.
    ///
    /// A no-op with a logged warning when the dispatcher is not ready.
    pub fn send_raw(&self, payload: Bytes, options: SendOptions) -> Result<()> {
        let Some(tx) = self.outbound_handle_tx() else {
            tracing::warn!("send ignored: dispatcher not ready");
            return Ok(());
        };
        tx.send(UnitCommand::Send {
            payload,
            origin: options.origin,
            tag: options.tag,
            delay: options.release_delay,
        })
        .map_err(|_| DispatchError::ChannelClosed(UnitKind::Outbound))?;
        Ok(())
    }

    /// Flatten any bundle structure in the payload and dispatch every
    /// constituent message with no delay, ignoring embedded time tags
    pub fn send_immediate(&self, payload: Bytes) -> Result<()> {
        let Some(tx) = self.outbound_handle_tx() else {
            tracing::warn!("immediate send ignored: dispatcher not ready");
            return Ok(());
        };
        tx.send(UnitCommand::SendImmediate { payload })
            .map_err(|_| DispatchError::ChannelClosed(UnitKind::Outbound))?;
        Ok(())
    }

    /// Drop pending sends with this exact origin and tag
    pub fn cancel(&self, origin: OriginId, tag: impl Into<String>) -> Result<()> {
        self.cancel_scope(CancelScope::Exact(origin, tag.into()))
    }

    /// Drop all pending sends from this origin
    pub fn cancel_origin(&self, origin: OriginId) -> Result<()> {
        self.cancel_scope(CancelScope::Origin(origin))
    }

    /// Drop every pending send
    pub fn cancel_all(&self) -> Result<()> {
        self.cancel_scope(CancelScope::All)
    }

    fn cancel_scope(&self, scope: CancelScope) -> Result<()> {
        let Some(tx) = self.outbound_handle_tx() else {
            tracing::warn!("cancel ignored: dispatcher not ready");
            return Ok(());
        };
        tx.send(UnitCommand::Cancel(scope))
            .map_err(|_| DispatchError::ChannelClosed(UnitKind::Outbound))?;
        Ok(())
    }

    /// Query per-unit statistics.
    ///
    /// Units are queried concurrently with independent timeouts; a unit
    /// that fails to answer reports [`UnitStatsReport::TimedOut`] instead
    /// of failing the call. Returns `None` when not ready.
    pub async fn stats(&self) -> Option<LinkStats> {
        if !self.is_ready() {
            return None;
        }

        let mut queries = Vec::new();
        {
            let units = self.units.lock();
            let units = units.as_ref()?;
            for handle in units.handles() {
                let (reply_tx, reply_rx) = oneshot::channel();
                // A closed channel means the unit is gone; report it the
                // same way as an unanswered query
                queries.push(handle.send(UnitCommand::Stats(reply_tx)).ok().map(|_| reply_rx));
            }
        }

        let stats_timeout = self.config.stats_timeout();
        let mut reports = future::join_all(queries.into_iter().map(|rx| async move {
            let Some(rx) = rx else {
                return UnitStatsReport::TimedOut;
            };
            match tokio::time::timeout(stats_timeout, rx).await {
                Ok(Ok(stats)) => UnitStatsReport::Stats(stats),
                _ => UnitStatsReport::TimedOut,
            }
        }))
        .await
        .into_iter();

        let missing = || UnitStatsReport::TimedOut;
        Some(LinkStats {
            outbound: reports.next().unwrap_or_else(missing),
            inbound: reports.next().unwrap_or_else(missing),
            diagnostic: reports.next().unwrap_or_else(missing),
        })
    }

    /// Stop every unit, release their handles and reset to uninitialized.
    ///
    /// Idempotent; sends after shutdown are no-ops.
    pub async fn shutdown(&self) {
        let Some(units) = self.units.lock().take() else {
            *self.state.lock() = LinkState::Uninitialized;
            return;
        };

        for handle in units.handles() {
            let _ = handle.send(UnitCommand::Shutdown);
        }

        for task in [units.outbound.task, units.inbound.task, units.diagnostic.task] {
            let abort = task.abort_handle();
            if tokio::time::timeout(self.config.shutdown_grace(), task)
                .await
                .is_err()
            {
                tracing::warn!("unit did not stop within grace period, aborting");
                abort.abort();
            }
        }

        *self.state.lock() = LinkState::Uninitialized;
        tracing::info!("dispatcher shut down");
    }

    /// Decoded inbound packets, in per-unit decode order
    pub fn subscribe_received(&self) -> broadcast::Receiver<InboundEvent> {
        self.events.subscribe_received()
    }

    /// Diagnostic packets
    pub fn subscribe_diagnostic(&self) -> broadcast::Receiver<InboundEvent> {
        self.events.subscribe_diagnostic()
    }

    /// Per-unit decode/transport errors
    pub fn subscribe_errors(&self) -> broadcast::Receiver<ErrorEvent> {
        self.events.subscribe_errors()
    }

    /// Fires exactly once per successful initialization
    pub fn subscribe_initialized(&self) -> broadcast::Receiver<()> {
        self.events.subscribe_initialized()
    }

    /// Lifecycle state of each execution unit, if any are running
    pub fn unit_states(&self) -> Option<[(UnitKind, UnitState); 3]> {
        let units = self.units.lock();
        units.as_ref().map(|u| {
            [
                (UnitKind::Outbound, u.outbound.state()),
                (UnitKind::Inbound, u.inbound.state()),
                (UnitKind::Diagnostic, u.diagnostic.state()),
            ]
        })
    }

    fn outbound_handle_tx(&self) -> Option<tokio::sync::mpsc::UnboundedSender<UnitCommand>> {
        if !self.is_ready() {
            return None;
        }
        let units = self.units.lock();
        units.as_ref().map(|u| u.outbound.cmd_tx.clone())
    }
}
