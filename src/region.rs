//! Shared memory region between the supervisor, the execution units and
//! the audio engine
//!
//! The region is allocated once by the supervising context and handed to
//! all three units at init time. Only the outbound unit writes control
//! data; reply slots are handed out by the [`SlotArbiter`] so that no two
//! claimants ever own the same slot, and a slot is reused only after the
//! engine has acknowledged consuming it.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::TransportError;

/// Layout constants for the shared region, as reported by the engine in
/// its initialization acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionLayout {
    /// Bytes reserved for outbound control data
    pub control_capacity: usize,
    /// Size of one reply slot in bytes
    pub reply_slot_size: usize,
    /// Number of reply slots
    pub reply_slot_count: usize,
}

impl Default for RegionLayout {
    fn default() -> Self {
        Self {
            control_capacity: crate::constants::DEFAULT_CONTROL_CAPACITY,
            reply_slot_size: crate::constants::DEFAULT_REPLY_SLOT_SIZE,
            reply_slot_count: crate::constants::DEFAULT_REPLY_SLOTS,
        }
    }
}

impl RegionLayout {
    /// Total region size in bytes
    pub fn total_size(&self) -> usize {
        self.control_capacity + self.reply_slot_size * self.reply_slot_count
    }
}

/// Write cursor state of the control area
struct ControlArea {
    data: Box<[u8]>,
    write_pos: usize,
}

/// The shared memory region
pub struct SharedRegion {
    layout: RegionLayout,
    control: Mutex<ControlArea>,
    reply: Mutex<Box<[u8]>>,
    arbiter: SlotArbiter,
}

impl SharedRegion {
    /// Allocate a region with the given layout
    pub fn allocate(layout: RegionLayout) -> Arc<Self> {
        tracing::debug!(bytes = layout.total_size(), "allocated shared region");
        Arc::new(Self {
            layout,
            control: Mutex::new(ControlArea {
                data: vec![0u8; layout.control_capacity].into_boxed_slice(),
                write_pos: 0,
            }),
            reply: Mutex::new(
                vec![0u8; layout.reply_slot_size * layout.reply_slot_count].into_boxed_slice(),
            ),
            arbiter: SlotArbiter::new(layout.reply_slot_count),
        })
    }

    pub fn layout(&self) -> RegionLayout {
        self.layout
    }

    pub fn arbiter(&self) -> &SlotArbiter {
        &self.arbiter
    }

    /// Append a length-prefixed packet to the control area.
    ///
    /// Only the outbound unit calls this; the engine drains the area
    /// via [`SharedRegion::consume_control`].
    pub fn write_control(&self, packet: &[u8]) -> Result<(), TransportError> {
        let mut control = self.control.lock();
        let needed = packet.len() + 4;
        let available = control.data.len() - control.write_pos;
        if needed > available {
            return Err(TransportError::RegionFull { needed, available });
        }

        let pos = control.write_pos;
        control.data[pos..pos + 4].copy_from_slice(&(packet.len() as u32).to_be_bytes());
        control.data[pos + 4..pos + needed].copy_from_slice(packet);
        control.write_pos += needed;
        Ok(())
    }

    /// Drain all length-prefixed packets from the control area.
    ///
    /// Engine side of the contract; resets the write cursor.
    pub fn consume_control(&self) -> Vec<Vec<u8>> {
        let mut control = self.control.lock();
        let mut packets = Vec::new();
        let mut pos = 0;
        while pos + 4 <= control.write_pos {
            let len = u32::from_be_bytes([
                control.data[pos],
                control.data[pos + 1],
                control.data[pos + 2],
                control.data[pos + 3],
            ]) as usize;
            if pos + 4 + len > control.write_pos {
                break;
            }
            packets.push(control.data[pos + 4..pos + 4 + len].to_vec());
            pos += 4 + len;
        }
        control.write_pos = 0;
        packets
    }

    /// Write reply data into a claimed slot
    pub fn write_reply_slot(&self, slot: &ReplySlot, data: &[u8]) -> Result<(), TransportError> {
        if data.len() > self.layout.reply_slot_size {
            return Err(TransportError::PacketTooLarge(data.len()));
        }
        let mut reply = self.reply.lock();
        let start = slot.index * self.layout.reply_slot_size;
        reply[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Read the contents of a reply slot
    pub fn read_reply_slot(&self, index: usize, len: usize) -> Vec<u8> {
        let reply = self.reply.lock();
        let start = index * self.layout.reply_slot_size;
        reply[start..start + len.min(self.layout.reply_slot_size)].to_vec()
    }
}

/// Permit for writing one reply slot.
///
/// Obtained from [`SlotArbiter::claim`]; the slot returns to the free pool
/// only through [`SlotArbiter::acknowledge`].
#[derive(Debug)]
pub struct ReplySlot {
    index: usize,
}

impl ReplySlot {
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Hands out write permission for reply slots, one claimant per slot.
///
/// Slot lifecycle: free -> claimed -> awaiting engine acknowledgment ->
/// free. Dropping a permit without submitting it leaks the slot until the
/// engine acknowledges it, which matches the reuse contract.
pub struct SlotArbiter {
    free: Mutex<VecDeque<usize>>,
    claimed: AtomicUsize,
    acknowledged: AtomicUsize,
}

impl SlotArbiter {
    fn new(slot_count: usize) -> Self {
        Self {
            free: Mutex::new((0..slot_count).collect()),
            claimed: AtomicUsize::new(0),
            acknowledged: AtomicUsize::new(0),
        }
    }

    /// Claim a free slot; `None` when every slot awaits acknowledgment
    pub fn claim(&self) -> Option<ReplySlot> {
        let index = self.free.lock().pop_front()?;
        self.claimed.fetch_add(1, Ordering::Relaxed);
        Some(ReplySlot { index })
    }

    /// Engine acknowledgment of a consumed slot; recycles it
    pub fn acknowledge(&self, slot: ReplySlot) {
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
        self.free.lock().push_back(slot.index);
    }

    /// Number of slots currently available
    pub fn free_slots(&self) -> usize {
        self.free.lock().len()
    }

    /// Total claims handed out
    pub fn claim_count(&self) -> usize {
        self.claimed.load(Ordering::Relaxed)
    }

    /// Total acknowledgments received
    pub fn ack_count(&self) -> usize {
        self.acknowledged.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_write_consume() {
        let region = SharedRegion::allocate(RegionLayout::default());

        region.write_control(b"abc").unwrap();
        region.write_control(b"defg").unwrap();

        let packets = region.consume_control();
        assert_eq!(packets, vec![b"abc".to_vec(), b"defg".to_vec()]);

        // Cursor reset; area reusable
        assert!(region.consume_control().is_empty());
        region.write_control(b"h").unwrap();
        assert_eq!(region.consume_control(), vec![b"h".to_vec()]);
    }

    #[test]
    fn test_control_overflow() {
        let layout = RegionLayout {
            control_capacity: 16,
            ..RegionLayout::default()
        };
        let region = SharedRegion::allocate(layout);

        region.write_control(&[0u8; 8]).unwrap();
        let err = region.write_control(&[0u8; 8]).unwrap_err();
        assert!(matches!(err, TransportError::RegionFull { .. }));
    }

    #[test]
    fn test_slot_exclusivity() {
        let layout = RegionLayout {
            reply_slot_count: 2,
            ..RegionLayout::default()
        };
        let region = SharedRegion::allocate(layout);
        let arbiter = region.arbiter();

        let a = arbiter.claim().unwrap();
        let b = arbiter.claim().unwrap();
        assert_ne!(a.index(), b.index());

        // Both slots out: nothing left to claim
        assert!(arbiter.claim().is_none());

        // Reuse requires acknowledgment
        arbiter.acknowledge(a);
        assert_eq!(arbiter.free_slots(), 1);
        assert!(arbiter.claim().is_some());
        drop(b);
        // Dropping without acknowledgment does not recycle
        assert_eq!(arbiter.free_slots(), 0);
    }

    #[test]
    fn test_reply_slot_round_trip() {
        let region = SharedRegion::allocate(RegionLayout::default());
        let slot = region.arbiter().claim().unwrap();

        region.write_reply_slot(&slot, b"/status.reply").unwrap();
        let data = region.read_reply_slot(slot.index(), 13);
        assert_eq!(&data, b"/status.reply");
    }
}
