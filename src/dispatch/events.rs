//! Event fan-out to subscribers
//!
//! Decoded inbound packets, diagnostics, per-unit errors and the
//! initialized signal each get their own broadcast stream. Publishing
//! never blocks; events for streams with no subscriber are dropped.

use tokio::sync::broadcast;

use crate::codec::Packet;
use crate::dispatch::unit::UnitKind;

/// A decoded packet delivered by a receiver unit
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub unit: UnitKind,
    pub packet: Packet,
}

/// A decode or transport error survived by a unit
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub unit: UnitKind,
    pub detail: String,
}

#[derive(Clone)]
pub(crate) struct EventBus {
    received: broadcast::Sender<InboundEvent>,
    diagnostic: broadcast::Sender<InboundEvent>,
    errors: broadcast::Sender<ErrorEvent>,
    initialized: broadcast::Sender<()>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            received: broadcast::channel(capacity).0,
            diagnostic: broadcast::channel(capacity).0,
            errors: broadcast::channel(capacity).0,
            initialized: broadcast::channel(4).0,
        }
    }

    pub fn publish_packet(&self, unit: UnitKind, packet: Packet) {
        let channel = match unit {
            UnitKind::Diagnostic => &self.diagnostic,
            _ => &self.received,
        };
        let _ = channel.send(InboundEvent { unit, packet });
    }

    pub fn publish_error(&self, unit: UnitKind, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::warn!(unit = %unit, "{}", detail);
        let _ = self.errors.send(ErrorEvent { unit, detail });
    }

    pub fn publish_initialized(&self) {
        let _ = self.initialized.send(());
    }

    pub fn subscribe_received(&self) -> broadcast::Receiver<InboundEvent> {
        self.received.subscribe()
    }

    pub fn subscribe_diagnostic(&self) -> broadcast::Receiver<InboundEvent> {
        self.diagnostic.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<ErrorEvent> {
        self.errors.subscribe()
    }

    pub fn subscribe_initialized(&self) -> broadcast::Receiver<()> {
        self.initialized.subscribe()
    }
}
