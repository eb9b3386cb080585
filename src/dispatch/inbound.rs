//! Receiver units
//!
//! One task shape serves both the inbound and the diagnostic unit; only
//! the event stream they publish to differs. After `StartConsuming` the
//! task drains its transport on a poll interval and decodes each payload.
//! A decode or transport error is published to the error stream and the
//! unit keeps running; packets are delivered in decode order.

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::codec::decode_packet;
use crate::dispatch::events::EventBus;
use crate::dispatch::unit::{UnitCommand, UnitHandle, UnitKind, UnitState, UnitStats};
use crate::transport::UnitTransport;

struct ReceiverUnit {
    kind: UnitKind,
    transport: Box<dyn UnitTransport>,
    state_tx: watch::Sender<UnitState>,
    events: EventBus,
    poll_interval: Duration,
    stats: UnitStats,
}

/// Spawn a receiver unit task for the given kind
pub(crate) fn spawn(
    kind: UnitKind,
    transport: Box<dyn UnitTransport>,
    events: EventBus,
    poll_interval: Duration,
) -> UnitHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(UnitState::Uninitialized);

    let unit = ReceiverUnit {
        kind,
        transport,
        state_tx,
        events,
        poll_interval,
        stats: UnitStats::default(),
    };
    let task = tokio::spawn(unit.run(cmd_rx));

    UnitHandle {
        kind,
        cmd_tx,
        state: state_rx,
        task,
    }
}

impl ReceiverUnit {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<UnitCommand>) {
        let mut consuming = false;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(UnitCommand::Init { region, ack }) => {
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
                        Some(UnitCommand::StartConsuming) => consuming = true,
                        Some(UnitCommand::Stats(reply)) => {
                            let _ = reply.send(self.stats.clone());
                        }
                        Some(UnitCommand::Shutdown) | None => break,
                        // Send-family commands only make sense on the
                        // outbound unit
                        Some(_) => {}
                    }
                }
                _ = tokio::time::sleep(self.poll_interval), if consuming => {
                    self.drain();
                }
            }
        }

        let _ = self.state_tx.send(UnitState::Terminated);
    }

    /// Decode and deliver everything the transport has buffered
    fn drain(&mut self) {
        loop {
            match self.transport.try_recv() {
                Ok(Some(payload)) => match decode_packet(&payload) {
                    Ok(packet) => {
                        self.stats.packets += 1;
                        self.stats.bytes += payload.len() as u64;
                        self.events.publish_packet(self.kind, packet);
                    }
                    Err(e) => {
                        self.stats.errors += 1;
                        self.events
                            .publish_error(self.kind, format!("decode failed: {}", e));
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    self.stats.errors += 1;
                    self.events
                        .publish_error(self.kind, format!("transport: {}", e));
                    break;
                }
            }
        }
    }
}
