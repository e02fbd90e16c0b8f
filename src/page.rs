//! # Per-Page Transaction Slots
//!
//! Each heap page reserves a small opaque area holding a fixed table of
//! transaction slots. A slot associates the transactions that recently
//! touched the page's tuples with their undo chains:
//!
//! ```text
//! +--------+-----------------------------------------+
//! | Slot 0 | xid: 100 | undo_ptr: 0x2_0040 | cid: 1  |
//! | Slot 1 | xid: 101 | undo_ptr: 0x2_0090 | cid: 0  |
//! | Slot 2 | (empty)                                 |
//! | Slot 3 | (empty)                                 |
//! +--------+-----------------------------------------+
//! ```
//!
//! Tuples reference a slot by index in their header. The sentinel index
//! [`FROZEN_SLOT`] means the tuple has no live transaction association and
//! is treated as committed in the deep past.
//!
//! ## Slot Recycling
//!
//! Slots are a scarce per-page resource. When every slot is taken and the
//! occupying transactions are all old enough, the page freezes a slot for
//! reuse: an `InvalidXactSlot` undo record capturing the old occupant's
//! xid/cid is pushed, and every tuple still referencing the slot gets the
//! `INVALID_XACT_SLOT` flag. From then on the authoritative transaction
//! information for those tuples lives in undo, not in the slot; the
//! visibility engine recovers it with the invalid-slot resolver.
//!
//! ## Interface vs. Implementation
//!
//! The engine only needs the [`PageMetadata`] read interface. The concrete
//! [`PageOpaque`] table in this module backs the in-memory collaborators
//! and the test fixtures; a storage layer with its own page layout
//! implements the trait over its opaque area instead.

use crate::tuple::Tuple;
use crate::txn::{CommandId, Xid, INVALID_CID, INVALID_XID};
use crate::undo::{UndoPtr, INVALID_UNDO_PTR};

pub type SlotIndex = u8;

/// Sentinel slot index: no live transaction association.
pub const FROZEN_SLOT: SlotIndex = u8::MAX;

/// Slots per page.
pub const MAX_TRANS_SLOTS: usize = 4;

/// One transaction-slot entry: the occupying xid, the head of its undo
/// chain for this page, and the command id of its latest action here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransSlot {
    pub xid: Xid,
    pub undo_ptr: UndoPtr,
    pub cid: CommandId,
}

impl TransSlot {
    pub const fn empty() -> Self {
        Self {
            xid: INVALID_XID,
            undo_ptr: INVALID_UNDO_PTR,
            cid: INVALID_CID,
        }
    }

    pub const fn new(xid: Xid, undo_ptr: UndoPtr, cid: CommandId) -> Self {
        Self { xid, undo_ptr, cid }
    }

    pub fn is_empty(&self) -> bool {
        self.xid == INVALID_XID
    }
}

/// Read access to the transaction-slot table of the page a tuple lives on.
///
/// `slot_xid` and `slot_undo_ptr` return the raw per-slot values without
/// interpreting the tuple's `INVALID_XACT_SLOT` flag; resolving recycled
/// slots is the visibility engine's job.
pub trait PageMetadata {
    fn slot_xid(&self, slot: SlotIndex) -> Xid;

    fn slot_undo_ptr(&self, slot: SlotIndex) -> UndoPtr;

    /// Command id of the latest action on `tuple` by its slot's occupant.
    fn tuple_cid(&self, tuple: &Tuple) -> CommandId;
}

/// Concrete fixed-size slot table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOpaque {
    slots: [TransSlot; MAX_TRANS_SLOTS],
}

impl PageOpaque {
    pub fn new() -> Self {
        Self {
            slots: [TransSlot::empty(); MAX_TRANS_SLOTS],
        }
    }

    pub fn slot(&self, index: SlotIndex) -> &TransSlot {
        &self.slots[index as usize]
    }

    pub fn set_slot(&mut self, index: SlotIndex, slot: TransSlot) {
        self.slots[index as usize] = slot;
    }

    /// Recycles a slot. The caller is responsible for having pushed the
    /// `InvalidXactSlot` undo record and for flagging affected tuples.
    pub fn freeze_slot(&mut self, index: SlotIndex) {
        self.slots[index as usize] = TransSlot::empty();
    }
}

impl Default for PageOpaque {
    fn default() -> Self {
        Self::new()
    }
}

impl PageMetadata for PageOpaque {
    fn slot_xid(&self, slot: SlotIndex) -> Xid {
        if slot == FROZEN_SLOT {
            return INVALID_XID;
        }
        self.slots[slot as usize].xid
    }

    fn slot_undo_ptr(&self, slot: SlotIndex) -> UndoPtr {
        if slot == FROZEN_SLOT {
            return INVALID_UNDO_PTR;
        }
        self.slots[slot as usize].undo_ptr
    }

    fn tuple_cid(&self, tuple: &Tuple) -> CommandId {
        let slot = tuple.header.slot;
        if slot == FROZEN_SLOT {
            return INVALID_CID;
        }
        self.slots[slot as usize].cid
    }
}
