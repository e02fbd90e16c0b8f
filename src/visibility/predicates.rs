//! # Visibility Predicates
//!
//! The five deciders over a tuple's newest version. Each one resolves the
//! effective transaction behind the tuple first, then branches on the
//! tuple's lifecycle state:
//!
//! - deleted / replaced (`DELETED` or `UPDATED`),
//! - still newest with history (`INPLACE_UPDATED` or `XID_LOCK_ONLY`),
//! - plain insert otherwise,
//!
//! and within each state on what the transaction oracle says about the
//! effective xid. A frozen slot or a pre-horizon xid short-circuits every
//! table: such effects are committed in the deep past, and the undo behind
//! them may already be gone.
//!
//! Outcomes are verdicts only. Corrupt states trip debug assertions; a
//! discarded undo chain reads as "effect predates the horizon"; nothing is
//! retried and no error variants escape.

use tracing::debug;

use super::{DirtyVisibility, TupleLiveness, UpdateInfo, UpdateVerdict, VisibilityEngine};
use crate::page::{PageMetadata, FROZEN_SLOT};
use crate::tuple::Tuple;
use crate::txn::{
    xid_precedes, CommandId, Snapshot, TransactionOracle, Xid, INVALID_XID,
};
use crate::undo::UndoStore;

impl<'a, O, U, P> VisibilityEngine<'a, O, U, P>
where
    O: TransactionOracle,
    U: UndoStore,
    P: PageMetadata,
{
    /// Returns the version of `tuple` visible to `snapshot`, if any.
    ///
    /// Considers effects of all transactions committed as of the snapshot
    /// and of previous commands of the observer's own transaction; not
    /// those of transactions the snapshot shows in progress, of
    /// transactions started after it, or of the current command. When the
    /// newest version fails those rules, the undo chain supplies the
    /// answer. The returned tuple is owned by the caller.
    pub fn satisfies_mvcc(&self, tuple: &Tuple, snapshot: &Snapshot) -> Option<Tuple> {
        debug_assert!(tuple.self_ptr.is_valid());
        debug_assert!(tuple.table_id != crate::tuple::INVALID_TABLE_ID);
        tuple.header.debug_assert_valid();

        let header = &tuple.header;
        let eff = self.effective_xact(tuple);
        let (xid, cid, urec_ptr) = (eff.xid, eff.cid, eff.urec_ptr);

        if header.is_deleted_or_updated() {
            // Gone for good once the deleter is ancient.
            if header.slot == FROZEN_SLOT || xid_precedes(xid, self.horizon()) {
                return None;
            }

            if self.oracle.is_current(xid) {
                if cid >= snapshot.curcid {
                    // Deleted after the scan started; the prior version
                    // may still be visible.
                    return self.tuple_from_undo(urec_ptr, tuple, snapshot, INVALID_XID);
                }
                return None;
            } else if snapshot.hides(xid) {
                return self.tuple_from_undo(urec_ptr, tuple, snapshot, INVALID_XID);
            } else if self.oracle.did_commit(xid) {
                return None;
            }
            // Aborted deleter: the tuple is effectively still there.
            return self.tuple_from_undo(urec_ptr, tuple, snapshot, INVALID_XID);
        } else if header.is_inplace_updated_or_locked() {
            if header.slot == FROZEN_SLOT || xid_precedes(xid, self.horizon()) {
                return Some(tuple.clone());
            }

            if self.oracle.is_current(xid) {
                if header.is_lock_only() {
                    return Some(tuple.clone());
                }
                if cid >= snapshot.curcid {
                    return self.tuple_from_undo(urec_ptr, tuple, snapshot, INVALID_XID);
                }
                return Some(tuple.clone());
            } else if snapshot.hides(xid) {
                return self.tuple_from_undo(urec_ptr, tuple, snapshot, INVALID_XID);
            } else if self.oracle.did_commit(xid) {
                return Some(tuple.clone());
            }
            return self.tuple_from_undo(urec_ptr, tuple, snapshot, INVALID_XID);
        }

        // Plain insert.
        if header.slot == FROZEN_SLOT || xid_precedes(xid, self.horizon()) {
            return Some(tuple.clone());
        }

        if self.oracle.is_current(xid) {
            if cid >= snapshot.curcid {
                None
            } else {
                Some(tuple.clone())
            }
        } else if snapshot.hides(xid) {
            None
        } else if self.oracle.did_commit(xid) {
            Some(tuple.clone())
        } else {
            None
        }
    }

    /// May the caller modify `tuple`? Resolves the newest version against
    /// `curcid` the way an UPDATE/DELETE executor needs it, distinguishing
    /// self-modification, concurrent modification, and completed
    /// replacement.
    ///
    /// `lock_allowed` permits taking a committed in-place-updated tuple
    /// even when its updater is still in the caller's snapshot.
    pub fn satisfies_update(
        &self,
        tuple: &Tuple,
        curcid: CommandId,
        snapshot: &Snapshot,
        lock_allowed: bool,
    ) -> (UpdateVerdict, UpdateInfo) {
        debug_assert!(tuple.self_ptr.is_valid());
        debug_assert!(tuple.table_id != crate::tuple::INVALID_TABLE_ID);
        tuple.header.debug_assert_valid();

        let header = &tuple.header;
        let eff = self.effective_xact(tuple);
        let mut info = UpdateInfo {
            xid: eff.xid,
            cid: eff.cid,
            ..Default::default()
        };
        let urec_ptr = eff.urec_ptr;

        let verdict = if header.is_deleted_or_updated() {
            // A tuple this old cannot reach the update path: it was
            // filtered by the scan's snapshot already.
            debug_assert!(
                !(header.slot == FROZEN_SLOT && xid_precedes(info.xid, self.horizon())),
                "deleted-by-ancient tuple offered for update"
            );

            if self.oracle.is_current(info.xid) {
                if info.cid >= curcid {
                    // Deleted by a later command of this transaction.
                    let visible = self.undo_satisfies_update(
                        urec_ptr,
                        tuple,
                        curcid,
                        INVALID_XID,
                        &mut info.ctid,
                        &mut info.in_place_updated_or_locked,
                    );
                    if visible {
                        UpdateVerdict::SelfUpdated
                    } else {
                        UpdateVerdict::Invisible
                    }
                } else {
                    UpdateVerdict::Invisible
                }
            } else if self.oracle.is_in_progress(info.xid) {
                let visible = self.undo_satisfies_update(
                    urec_ptr,
                    tuple,
                    curcid,
                    INVALID_XID,
                    &mut info.ctid,
                    &mut info.in_place_updated_or_locked,
                );
                if visible {
                    UpdateVerdict::BeingUpdated
                } else {
                    UpdateVerdict::Invisible
                }
            } else if self.oracle.did_commit(info.xid) {
                if header.is_updated() {
                    info.ctid = self.successor_tid(tuple);
                }
                UpdateVerdict::Updated
            } else {
                // Aborted deleter. Walk from the raw slot pointer: the
                // effective pointer may already sit past the records the
                // aborted transaction wrote.
                // TODO: once aborted transactions are rolled back eagerly
                // by an undo worker, wait for (or apply) the rollback here
                // instead of probing the chain.
                let raw_ptr = self.page.slot_undo_ptr(header.slot);
                let visible = self.undo_satisfies_update(
                    raw_ptr,
                    tuple,
                    curcid,
                    INVALID_XID,
                    &mut info.ctid,
                    &mut info.in_place_updated_or_locked,
                );
                if visible {
                    UpdateVerdict::MayBeUpdated
                } else {
                    UpdateVerdict::Invisible
                }
            }
        } else if header.is_inplace_updated_or_locked() {
            info.in_place_updated_or_locked = true;

            if header.slot == FROZEN_SLOT || xid_precedes(info.xid, self.horizon()) {
                return (UpdateVerdict::MayBeUpdated, info);
            }

            if self.oracle.is_current(info.xid) {
                if header.is_lock_only() {
                    UpdateVerdict::BeingUpdated
                } else if info.cid >= curcid {
                    let visible = self.undo_satisfies_update(
                        urec_ptr,
                        tuple,
                        curcid,
                        INVALID_XID,
                        &mut info.ctid,
                        &mut info.in_place_updated_or_locked,
                    );
                    if visible {
                        UpdateVerdict::SelfUpdated
                    } else {
                        UpdateVerdict::Invisible
                    }
                } else {
                    UpdateVerdict::MayBeUpdated
                }
            } else if self.oracle.is_in_progress(info.xid) {
                let visible = self.undo_satisfies_update(
                    urec_ptr,
                    tuple,
                    curcid,
                    INVALID_XID,
                    &mut info.ctid,
                    &mut info.in_place_updated_or_locked,
                );
                if visible {
                    UpdateVerdict::BeingUpdated
                } else {
                    UpdateVerdict::Invisible
                }
            } else if self.oracle.did_commit(info.xid) {
                // Committed in-place update: modifiable unless the updater
                // is still in the caller's snapshot and locking was not
                // requested.
                if lock_allowed || !snapshot.hides(info.xid) {
                    UpdateVerdict::MayBeUpdated
                } else {
                    UpdateVerdict::Updated
                }
            } else {
                // TODO: same rollback handling as the deleted arm above.
                let visible = self.undo_satisfies_update(
                    urec_ptr,
                    tuple,
                    curcid,
                    INVALID_XID,
                    &mut info.ctid,
                    &mut info.in_place_updated_or_locked,
                );
                if visible {
                    UpdateVerdict::MayBeUpdated
                } else {
                    UpdateVerdict::Invisible
                }
            }
        } else {
            // Plain insert.
            if header.slot == FROZEN_SLOT || xid_precedes(info.xid, self.horizon()) {
                return (UpdateVerdict::MayBeUpdated, info);
            }

            if self.oracle.is_current(info.xid) {
                if info.cid >= curcid {
                    UpdateVerdict::Invisible
                } else {
                    UpdateVerdict::MayBeUpdated
                }
            } else if self.oracle.is_in_progress(info.xid) {
                UpdateVerdict::Invisible
            } else if self.oracle.did_commit(info.xid) {
                UpdateVerdict::MayBeUpdated
            } else {
                UpdateVerdict::Invisible
            }
        };

        debug!(?verdict, xid = info.xid, "update visibility decided");
        (verdict, info)
    }

    /// Returns the version of `tuple` visible to a dirty read: committed
    /// and in-progress effects both count. In-progress inserters and
    /// deleters are reported through the snapshot's xmin/xmax so the
    /// caller can wait on them.
    pub fn satisfies_dirty(&self, tuple: &Tuple, snapshot: &mut Snapshot) -> DirtyVisibility {
        debug_assert!(tuple.self_ptr.is_valid());
        debug_assert!(tuple.table_id != crate::tuple::INVALID_TABLE_ID);
        tuple.header.debug_assert_valid();

        snapshot.xmin = INVALID_XID;
        snapshot.xmax = INVALID_XID;

        let header = &tuple.header;
        let (xid, _urec_ptr) = self.effective_xid(tuple);
        let mut out = DirtyVisibility::default();

        if header.is_deleted_or_updated() {
            debug_assert!(
                !(header.slot == FROZEN_SLOT && xid_precedes(xid, self.horizon())),
                "deleted-by-ancient tuple offered for a dirty read"
            );

            if self.oracle.is_current(xid) {
                if header.is_updated() {
                    out.ctid = self.successor_tid(tuple);
                }
            } else if self.oracle.is_in_progress(xid) {
                snapshot.xmax = xid;
                out.tuple = Some(tuple.clone());
            } else if self.oracle.did_commit(xid) {
                if header.is_updated() {
                    out.ctid = self.successor_tid(tuple);
                }
            } else {
                // Aborted deleter: would need a dirty-flavoured undo walk,
                // which rollback is expected to make unnecessary.
                debug_assert!(false, "dirty read of a tuple deleted by an aborted transaction");
            }
            return out;
        } else if header.is_inplace_updated_or_locked() {
            if header.slot == FROZEN_SLOT || xid_precedes(xid, self.horizon()) {
                out.tuple = Some(tuple.clone());
                return out;
            }

            if self.oracle.is_current(xid) {
                out.tuple = Some(tuple.clone());
            } else if self.oracle.is_in_progress(xid) {
                if !header.is_lock_only() {
                    snapshot.xmax = xid;
                }
                out.tuple = Some(tuple.clone());
            } else if self.oracle.did_commit(xid) {
                out.tuple = Some(tuple.clone());
            } else {
                debug_assert!(false, "dirty read of a tuple updated by an aborted transaction");
            }
            return out;
        }

        // Plain insert.
        if header.slot == FROZEN_SLOT || xid_precedes(xid, self.horizon()) {
            out.tuple = Some(tuple.clone());
            return out;
        }

        if self.oracle.is_current(xid) {
            out.tuple = Some(tuple.clone());
        } else if self.oracle.is_in_progress(xid) {
            snapshot.xmin = xid;
            out.tuple = Some(tuple.clone());
        } else if self.oracle.did_commit(xid) {
            out.tuple = Some(tuple.clone());
        } else {
            debug_assert!(false, "dirty read of a tuple inserted by an aborted transaction");
        }
        out
    }

    /// Classifies `tuple` against `oldest_xmin` for pruning: is it live,
    /// removable, or still interesting to some open transaction? Also
    /// returns the effective xid so callers can wait on it.
    pub fn satisfies_oldest_xmin(&self, tuple: &Tuple, oldest_xmin: Xid) -> (TupleLiveness, Xid) {
        debug_assert!(tuple.self_ptr.is_valid());
        debug_assert!(tuple.table_id != crate::tuple::INVALID_TABLE_ID);
        tuple.header.debug_assert_valid();

        let header = &tuple.header;

        let xid = if header.slot == FROZEN_SLOT {
            INVALID_XID
        } else {
            let raw_xid = self.page.slot_xid(header.slot);
            if !xid_precedes(raw_xid, self.horizon()) && header.has_invalid_slot() {
                self.resolve_invalid_slot(
                    self.page.slot_undo_ptr(header.slot),
                    tuple.self_ptr,
                    None,
                )
                .xid
            } else {
                raw_xid
            }
        };

        if header.is_deleted_or_updated() {
            if header.slot == FROZEN_SLOT || xid_precedes(xid, self.horizon()) {
                return (TupleLiveness::Dead, xid);
            }

            if self.oracle.is_current(xid) || self.oracle.is_in_progress(xid) {
                (TupleLiveness::DeleteInProgress, xid)
            } else if self.oracle.did_commit(xid) {
                // The deleter committed, but an open transaction may still
                // see the tuple.
                if !xid_precedes(xid, oldest_xmin) {
                    (TupleLiveness::RecentlyDead, xid)
                } else {
                    (TupleLiveness::Dead, xid)
                }
            } else {
                (TupleLiveness::Live, xid)
            }
        } else if header.is_lock_only() {
            // The "deleting" transaction only locked the tuple.
            (TupleLiveness::Live, xid)
        } else {
            // Newly inserted or in-place updated.
            if header.slot == FROZEN_SLOT || xid_precedes(xid, self.horizon()) {
                return (TupleLiveness::Live, xid);
            }

            if self.oracle.is_current(xid) || self.oracle.is_in_progress(xid) {
                (TupleLiveness::InsertInProgress, xid)
            } else if self.oracle.did_commit(xid) {
                (TupleLiveness::Live, xid)
            } else {
                // TODO: an aborted in-place update still has the prior
                // committed version in undo; report it once rollback (or a
                // dirty-flavoured walk) can restore it.
                (TupleLiveness::Dead, xid)
            }
        }
    }

    /// True when no observer, present or future, can see `tuple`: it is
    /// deleted or replaced, and its deleter is ancient.
    pub fn is_surely_dead(&self, tuple: &Tuple) -> bool {
        debug_assert!(tuple.self_ptr.is_valid());
        debug_assert!(tuple.table_id != crate::tuple::INVALID_TABLE_ID);

        let (xid, _) = self.effective_xid(tuple);

        if tuple.header.is_deleted_or_updated() {
            if tuple.header.slot == FROZEN_SLOT || xid_precedes(xid, self.horizon()) {
                return true;
            }
        }

        false
    }
}
