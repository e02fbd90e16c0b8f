//! # Invalid-Slot Resolver
//!
//! When a page freezes a transaction slot for reuse, the tuples still
//! referencing it get the `INVALID_XACT_SLOT` flag and an `InvalidXactSlot`
//! undo record is pushed capturing the old occupant's xid and cid. The slot
//! itself then carries some newer transaction's state, so for a flagged
//! tuple the slot table lies: the authoritative transaction information
//! must be recovered from undo.
//!
//! The resolver walks the slot's current undo chain for the tuple's
//! position. Each step remembers the record's `prev_xid` and `cid` and
//! advances through `blkprev`; the walk ends after consuming the
//! `InvalidXactSlot` marker, whose captured values are the answer.
//!
//! Two termination modes exist:
//!
//! - **Top level** (resolving a live tuple): stop on the first marker, or
//!   when the chain has been discarded (the effect then predates the
//!   horizon and both xid and cid come back invalid).
//! - **Walker side** (resolving a version reconstructed from undo, whose
//!   producing xid is already known): additionally require the marker's
//!   captured xid to equal that known xid, and also give up as pre-horizon
//!   as soon as a record's `prev_xid` falls behind the horizon. Without
//!   the xid match, the marker of a newer recycle of the same slot could
//!   be taken for the one that captured this version's transaction.

use tracing::trace;

use super::{EffectiveXact, VisibilityEngine};
use crate::page::PageMetadata;
use crate::tuple::TuplePtr;
use crate::txn::{xid_precedes, TransactionOracle, Xid, INVALID_CID, INVALID_XID};
use crate::undo::{UndoPtr, UndoRecType, UndoStore};

impl<'a, O, U, P> VisibilityEngine<'a, O, U, P>
where
    O: TransactionOracle,
    U: UndoStore,
    P: PageMetadata,
{
    /// Recovers the authoritative (xid, cid, next undo pointer) for a
    /// tuple whose slot was recycled, starting from the slot's current
    /// undo pointer.
    ///
    /// `match_xid` selects the walker-side termination mode: the marker
    /// must capture exactly that xid, and pre-horizon records end the walk
    /// early.
    pub(crate) fn resolve_invalid_slot(
        &self,
        start: UndoPtr,
        tid: TuplePtr,
        match_xid: Option<Xid>,
    ) -> EffectiveXact {
        let mut urec_ptr = start;
        let mut xid = INVALID_XID;
        let mut cid = INVALID_CID;

        trace!(start, block = tid.block, offset = tid.offset, "resolving recycled slot");

        loop {
            let Some(rec) = self.undo.fetch(urec_ptr, tid.block, tid.offset, INVALID_XID) else {
                // Chain discarded: the last touch predates the horizon.
                xid = INVALID_XID;
                cid = INVALID_CID;
                break;
            };

            if match_xid.is_some() && xid_precedes(rec.prev_xid, self.horizon()) {
                xid = INVALID_XID;
                cid = INVALID_CID;
                self.undo.release(rec);
                break;
            }

            xid = rec.prev_xid;
            cid = rec.cid;
            urec_ptr = rec.blkprev;
            let rec_type = rec.rec_type;

            // The slot index cannot change along this walk; only the
            // transaction information is in question.

            self.undo.release(rec);

            let done = match match_xid {
                Some(want) => rec_type == UndoRecType::InvalidXactSlot && xid == want,
                None => rec_type == UndoRecType::InvalidXactSlot,
            };
            if done {
                break;
            }
        }

        trace!(xid, cid, urec_ptr, "recycled slot resolved");
        EffectiveXact { xid, cid, urec_ptr }
    }
}
