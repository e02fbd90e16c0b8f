//! # Undo Chain Walker
//!
//! When the newest version of a tuple is not visible to the observer, the
//! engine reconstructs older versions from undo, one step back at a time,
//! until a version gets a verdict. This module implements that walk, in
//! two flavours sharing one step routine:
//!
//! - [`VisibilityEngine::tuple_from_undo`]: MVCC flavour; returns the
//!   visible prior version itself (owned by the caller), or `None`.
//! - [`VisibilityEngine::undo_satisfies_update`]: update flavour; returns
//!   whether some prior version is visible at the caller's command id and
//!   reports the visible version's position and in-place/lock state.
//!
//! ## One Step
//!
//! A step fetches the undo record behind the current version, skipping
//! slot-recycle markers (they carry no image), and overlays the stored
//! image on the current version's identity. The restored version's own
//! header then drives three concerns:
//!
//! 1. **Chain switch.** Undo chains are per transaction. If the restored
//!    version's slot differs from the one we came from (and is not
//!    frozen), its history continues in *that* slot's chain, so the walk
//!    re-roots at the restored version's raw slot pointer instead of the
//!    record's `blkprev`. Missing this re-root is the classic way to
//!    follow another transaction's history by accident.
//! 2. **Slot recycling.** If the restored version points at a recycled
//!    slot and its producing xid is not already behind the horizon, the
//!    invalid-slot resolver recovers the command id attached to the reused
//!    slot (walker-side mode: the marker must capture the known xid).
//! 3. **Classification.** The restored version was itself produced by an
//!    in-place update, a lock, or an insert (the chain root). Restored
//!    versions are never deleted/replaced: such flags on an undo image
//!    mean corruption.
//!
//! ## Termination
//!
//! Each iteration either returns a verdict or moves strictly backward in
//! the log (new pointer, older version), and any version whose slot is
//! frozen or whose xid is behind the horizon is immediately visible, so
//! the walk is bounded by the chain length. The walkers are loops, not
//! recursion: chain depth must not consume stack.
//!
//! Versions restored along the way are dropped as the walk moves past
//! them; only the version finally returned transfers out.

use tracing::trace;

use super::VisibilityEngine;
use crate::page::{PageMetadata, FROZEN_SLOT};
use crate::tuple::{Tuple, TuplePtr};
use crate::txn::{xid_precedes, CommandId, Snapshot, TransactionOracle, Xid, INVALID_CID, INVALID_XID};
use crate::undo::{UndoPtr, UndoRecType, UndoStore};

/// How the version restored by one walk step came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UndoOper {
    InplaceUpdated,
    XidLockOnly,
    /// Chain root: the version is the original insert.
    Root,
}

/// Product of one walk step.
struct WalkStep {
    restored: Tuple,
    oper: UndoOper,
    xid: Xid,
    cid: CommandId,
    /// Where the walk continues (chain-switched when the slot changed).
    next_ptr: UndoPtr,
    /// Position answer for update callers: the successor for a
    /// non-in-place update record, the restored version itself otherwise.
    ctid: TuplePtr,
}

impl<'a, O, U, P> VisibilityEngine<'a, O, U, P>
where
    O: TransactionOracle,
    U: UndoStore,
    P: PageMetadata,
{
    /// Fetches and restores the version behind `cur`, handling marker
    /// skipping, chain switching, and recycled-slot recovery. `None` means
    /// the chain was discarded under the walk, which a correctly
    /// horizon-gated caller never sees.
    fn walk_step(&self, mut urec_ptr: UndoPtr, cur: &Tuple, prev_undo_xid: Xid) -> Option<WalkStep> {
        let prev_slot = cur.header.slot;

        let mut rec = loop {
            let Some(rec) = self.undo.fetch(
                urec_ptr,
                cur.self_ptr.block,
                cur.self_ptr.offset,
                prev_undo_xid,
            ) else {
                debug_assert!(false, "undo chain discarded under an active walk");
                return None;
            };

            // Slot-recycle markers carry transaction info only, no image.
            if rec.rec_type == UndoRecType::InvalidXactSlot {
                urec_ptr = rec.blkprev;
                self.undo.release(rec);
                continue;
            }
            break rec;
        };

        let image = rec.prev_image.take();
        let successor = rec.successor.take();
        let rec_type = rec.rec_type;
        let xid = rec.prev_xid;
        let mut next_ptr = rec.blkprev;
        self.undo.release(rec);

        let Some(image) = image else {
            debug_assert!(false, "{:?} undo record without a prior image", rec_type);
            return None;
        };
        let restored = Tuple::restored(image.header, image.data, cur);

        let ctid = match (rec_type, successor) {
            (UndoRecType::Update, Some(successor)) => successor,
            _ => restored.self_ptr,
        };

        let oper = if restored.header.is_inplace_updated() {
            UndoOper::InplaceUpdated
        } else if restored.header.is_lock_only() {
            UndoOper::XidLockOnly
        } else {
            debug_assert!(
                !(restored.header.is_deleted() && restored.header.is_updated()),
                "restored version flagged both deleted and updated"
            );
            UndoOper::Root
        };

        let slot = restored.header.slot;
        if slot != FROZEN_SLOT && slot != prev_slot {
            // The restored version belongs to another transaction; its
            // history continues in that transaction's chain.
            next_ptr = self.page.slot_undo_ptr(slot);
        }

        let mut xid = xid;
        let mut cid = INVALID_CID;
        if slot != FROZEN_SLOT && !xid_precedes(xid, self.horizon()) {
            if restored.header.has_invalid_slot() {
                let resolved = self.resolve_invalid_slot(next_ptr, restored.self_ptr, Some(xid));
                xid = resolved.xid;
                cid = resolved.cid;
                next_ptr = resolved.urec_ptr;
            } else {
                cid = self.page.tuple_cid(&restored);
            }
        }

        trace!(xid, cid, next_ptr, ?oper, "restored prior version");
        Some(WalkStep {
            restored,
            oper,
            xid,
            cid,
            next_ptr,
            ctid,
        })
    }

    /// Returns the version of `tuple` visible to `snapshot` from undo, if
    /// any. The caller has already judged the live version invisible.
    pub(crate) fn tuple_from_undo(
        &self,
        urec_ptr: UndoPtr,
        tuple: &Tuple,
        snapshot: &Snapshot,
        prev_undo_xid: Xid,
    ) -> Option<Tuple> {
        let mut cur = tuple.clone();
        let mut urec_ptr = urec_ptr;
        let mut prev_undo_xid = prev_undo_xid;

        loop {
            let step = self.walk_step(urec_ptr, &cur, prev_undo_xid)?;
            let WalkStep {
                restored,
                oper,
                xid,
                cid,
                next_ptr,
                ..
            } = step;

            // Frozen slot or pre-horizon xid: nothing newer can hide it.
            if restored.header.slot == FROZEN_SLOT || xid_precedes(xid, self.horizon()) {
                return Some(restored);
            }

            match oper {
                UndoOper::InplaceUpdated | UndoOper::XidLockOnly => {
                    if self.oracle.is_current(xid) {
                        if oper == UndoOper::XidLockOnly {
                            return Some(restored);
                        }
                        if cid < snapshot.curcid {
                            return Some(restored);
                        }
                        // Updated after the scan started; keep walking.
                    } else if snapshot.hides(xid) {
                        // Keep walking.
                    } else if self.oracle.did_commit(xid) {
                        return Some(restored);
                    }
                    // Aborted: keep walking.
                }
                UndoOper::Root => {
                    return if self.oracle.is_current(xid) {
                        if cid < snapshot.curcid {
                            Some(restored)
                        } else {
                            None
                        }
                    } else if snapshot.hides(xid) {
                        None
                    } else if self.oracle.did_commit(xid) {
                        Some(restored)
                    } else {
                        None
                    };
                }
            }

            urec_ptr = next_ptr;
            prev_undo_xid = xid;
            cur = restored;
        }
    }

    /// Update-flavoured walk: is some prior version of `tuple` visible at
    /// `curcid`? Reports the visible version's position through `ctid` and
    /// whether it was in-place updated or locked through
    /// `in_place_updated_or_locked`.
    pub(crate) fn undo_satisfies_update(
        &self,
        urec_ptr: UndoPtr,
        tuple: &Tuple,
        curcid: CommandId,
        prev_undo_xid: Xid,
        ctid: &mut Option<TuplePtr>,
        in_place_updated_or_locked: &mut bool,
    ) -> bool {
        let mut cur = tuple.clone();
        let mut urec_ptr = urec_ptr;
        let mut prev_undo_xid = prev_undo_xid;

        loop {
            let Some(step) = self.walk_step(urec_ptr, &cur, prev_undo_xid) else {
                return false;
            };
            let WalkStep {
                restored,
                oper,
                xid,
                cid,
                next_ptr,
                ctid: step_ctid,
            } = step;

            *ctid = Some(step_ctid);
            if oper != UndoOper::Root {
                *in_place_updated_or_locked = true;
            }

            if restored.header.slot == FROZEN_SLOT || xid_precedes(xid, self.horizon()) {
                return true;
            }

            match oper {
                UndoOper::InplaceUpdated | UndoOper::XidLockOnly => {
                    if self.oracle.is_current(xid) {
                        if oper == UndoOper::XidLockOnly {
                            return true;
                        }
                        if cid < curcid {
                            return true;
                        }
                        // Updated after the scan started; keep walking.
                    } else if self.oracle.is_in_progress(xid) {
                        // Keep walking.
                    } else if self.oracle.did_commit(xid) {
                        return true;
                    }
                    // Aborted: keep walking.
                }
                UndoOper::Root => {
                    return if self.oracle.is_current(xid) {
                        cid < curcid
                    } else if self.oracle.is_in_progress(xid) {
                        false
                    } else {
                        self.oracle.did_commit(xid)
                    };
                }
            }

            urec_ptr = next_ptr;
            prev_undo_xid = xid;
            cur = restored;
        }
    }
}
