//! Unit transport contract and reference transports
//!
//! Each execution unit talks to the audio engine through a [`UnitTransport`].
//! The trait is the message-passing contract; the ring discipline inside a
//! real engine transport is its own concern. Two implementations live here:
//! a region-backed transport pair for engine integration and a loopback
//! engine for tests and the demo binary.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::constants::{DEFAULT_QUEUE_CAPACITY, MAX_PACKET_SIZE};
use crate::error::TransportError;
use crate::region::{ReplySlot, SharedRegion};

/// Message-passing contract between an execution unit and its transport
pub trait UnitTransport: Send + 'static {
    /// Attach to the shared region. Called once during unit init.
    fn bind(&mut self, region: Arc<SharedRegion>) -> Result<(), TransportError>;

    /// Hand one encoded packet to the engine (outbound unit only)
    fn send(&mut self, packet: &[u8]) -> Result<(), TransportError>;

    /// Pull the next raw payload from the engine, if any
    fn try_recv(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// The transport triple consumed by [`crate::dispatch::Dispatcher::initialize`]
pub struct UnitTransports {
    pub outbound: Box<dyn UnitTransport>,
    pub inbound: Box<dyn UnitTransport>,
    pub diagnostic: Box<dyn UnitTransport>,
}

/// Fixed-capacity lock-free packet queue
///
/// Single-producer single-consumer in practice; overflow and underrun are
/// counted rather than blocking, since a stalled consumer must never back
/// up into the audio path.
pub struct PacketQueue {
    queue: ArrayQueue<Bytes>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl PacketQueue {
    /// Create a queue with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push a packet; returns false if the queue is full (overflow)
    pub fn push(&self, packet: Bytes) -> bool {
        match self.queue.push(packet) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Pop a packet; returns None if the queue is empty (underrun)
    pub fn pop(&self) -> Option<Bytes> {
        match self.queue.pop() {
            Some(packet) => Some(packet),
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Pop without counting underrun
    pub fn try_pop(&self) -> Option<Bytes> {
        self.queue.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a packet queue
pub type SharedPacketQueue = Arc<PacketQueue>;

/// Create a new shared packet queue
pub fn create_shared_queue(capacity: usize) -> SharedPacketQueue {
    Arc::new(PacketQueue::new(capacity))
}

// ---------------------------------------------------------------------------
// Region-backed transports
// ---------------------------------------------------------------------------

type SlotSignal = Arc<ArrayQueue<(ReplySlot, usize)>>;

/// Wires the three unit transports to a shared region, with an engine-side
/// handle for the other half of the contract
pub struct RegionLink {
    region: Arc<SharedRegion>,
    reply_signals: SlotSignal,
    debug_signals: SlotSignal,
}

impl RegionLink {
    pub fn new(region: Arc<SharedRegion>) -> Self {
        let slots = region.layout().reply_slot_count;
        Self {
            region,
            reply_signals: Arc::new(ArrayQueue::new(slots)),
            debug_signals: Arc::new(ArrayQueue::new(slots)),
        }
    }

    /// Unit-side transports for [`crate::dispatch::Dispatcher::initialize`]
    pub fn transports(&self) -> UnitTransports {
        UnitTransports {
            outbound: Box::new(RegionOutbound { region: None }),
            inbound: Box::new(RegionConsumer {
                region: None,
                signals: self.reply_signals.clone(),
            }),
            diagnostic: Box::new(RegionConsumer {
                region: None,
                signals: self.debug_signals.clone(),
            }),
        }
    }

    /// Engine-side handle
    pub fn engine(&self) -> RegionEngine {
        RegionEngine {
            region: self.region.clone(),
            reply_signals: self.reply_signals.clone(),
            debug_signals: self.debug_signals.clone(),
        }
    }
}

/// Engine side of the region contract: drains control packets, posts
/// replies and diagnostics through arbitrated slots
pub struct RegionEngine {
    region: Arc<SharedRegion>,
    reply_signals: SlotSignal,
    debug_signals: SlotSignal,
}

impl RegionEngine {
    /// Drain all pending outbound control packets
    pub fn consume_control(&self) -> Vec<Vec<u8>> {
        self.region.consume_control()
    }

    /// Post a reply payload for the inbound unit
    pub fn post_reply(&self, data: &[u8]) -> Result<(), TransportError> {
        self.post(data, &self.reply_signals)
    }

    /// Post a diagnostic payload for the diagnostic unit
    pub fn post_diagnostic(&self, data: &[u8]) -> Result<(), TransportError> {
        self.post(data, &self.debug_signals)
    }

    fn post(&self, data: &[u8], signals: &SlotSignal) -> Result<(), TransportError> {
        let slot = self
            .region
            .arbiter()
            .claim()
            .ok_or(TransportError::QueueFull)?;
        self.region.write_reply_slot(&slot, data)?;
        signals
            .push((slot, data.len()))
            .map_err(|_| TransportError::QueueFull)
    }
}

struct RegionOutbound {
    region: Option<Arc<SharedRegion>>,
}

impl UnitTransport for RegionOutbound {
    fn bind(&mut self, region: Arc<SharedRegion>) -> Result<(), TransportError> {
        self.region = Some(region);
        Ok(())
    }

    fn send(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        if packet.len() > MAX_PACKET_SIZE {
            return Err(TransportError::PacketTooLarge(packet.len()));
        }
        let region = self.region.as_ref().ok_or(TransportError::Disconnected)?;
        region.write_control(packet)
    }

    fn try_recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        Ok(None)
    }
}

struct RegionConsumer {
    region: Option<Arc<SharedRegion>>,
    signals: SlotSignal,
}

impl UnitTransport for RegionConsumer {
    fn bind(&mut self, region: Arc<SharedRegion>) -> Result<(), TransportError> {
        self.region = Some(region);
        Ok(())
    }

    fn send(&mut self, _packet: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::Disconnected)
    }

    fn try_recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        let region = self.region.as_ref().ok_or(TransportError::Disconnected)?;
        match self.signals.pop() {
            Some((slot, len)) => {
                let data = region.read_reply_slot(slot.index(), len);
                region.arbiter().acknowledge(slot);
                Ok(Some(Bytes::from(data)))
            }
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Loopback engine
// ---------------------------------------------------------------------------

/// In-process engine stub.
///
/// Control packets land in a queue the test (or demo) can drain; replies
/// and diagnostics are injected from outside. No region is involved, which
/// keeps scenario tests independent of slot arbitration.
pub struct LoopbackEngine {
    control: SharedPacketQueue,
    replies: SharedPacketQueue,
    diagnostics: SharedPacketQueue,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self {
            control: create_shared_queue(DEFAULT_QUEUE_CAPACITY),
            replies: create_shared_queue(DEFAULT_QUEUE_CAPACITY),
            diagnostics: create_shared_queue(DEFAULT_QUEUE_CAPACITY),
        }
    }

    /// Unit-side transports for [`crate::dispatch::Dispatcher::initialize`]
    pub fn transports(&self) -> UnitTransports {
        UnitTransports {
            outbound: Box::new(QueueTransport {
                outgoing: Some(self.control.clone()),
                incoming: None,
            }),
            inbound: Box::new(QueueTransport {
                outgoing: None,
                incoming: Some(self.replies.clone()),
            }),
            diagnostic: Box::new(QueueTransport {
                outgoing: None,
                incoming: Some(self.diagnostics.clone()),
            }),
        }
    }

    /// Inject a reply payload as if the engine had produced it
    pub fn inject_reply(&self, data: Bytes) -> bool {
        self.replies.push(data)
    }

    /// Inject a diagnostic payload
    pub fn inject_diagnostic(&self, data: Bytes) -> bool {
        self.diagnostics.push(data)
    }

    /// Drain every control packet dispatched so far
    pub fn drain_control(&self) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Some(packet) = self.control.try_pop() {
            out.push(packet);
        }
        out
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

struct QueueTransport {
    outgoing: Option<SharedPacketQueue>,
    incoming: Option<SharedPacketQueue>,
}

impl UnitTransport for QueueTransport {
    fn bind(&mut self, _region: Arc<SharedRegion>) -> Result<(), TransportError> {
        Ok(())
    }

    fn send(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        let queue = self.outgoing.as_ref().ok_or(TransportError::Disconnected)?;
        if queue.push(Bytes::copy_from_slice(packet)) {
            Ok(())
        } else {
            Err(TransportError::QueueFull)
        }
    }

    fn try_recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        match &self.incoming {
            Some(queue) => Ok(queue.try_pop()),
            None => Ok(None),
        }
    }
}
