//! # Tuple Visibility Engine
//!
//! This module decides which version of a tuple, if any, an observer may
//! see. The heap keeps only the newest version in place; history lives in
//! the undo log. A visibility check therefore has two halves:
//!
//! 1. Find the effective transaction behind the newest version: read the
//!    tuple's slot, and when the slot was recycled recover the real
//!    (xid, cid, undo pointer) from undo (the invalid-slot resolver).
//! 2. Judge that transaction against the observer's context. When its
//!    effects are not visible, reconstruct the prior version from undo and
//!    judge again, until a verdict is reached (the chain walker).
//!
//! ## Predicates
//!
//! | Predicate              | Observer context     | Answer                      |
//! |------------------------|----------------------|-----------------------------|
//! | `satisfies_mvcc`       | MVCC snapshot        | visible version, if any     |
//! | `satisfies_update`     | curcid + snapshot    | [`UpdateVerdict`]           |
//! | `satisfies_dirty`      | dirty snapshot       | visible version incl. open  |
//! | `satisfies_oldest_xmin`| pruning horizon      | [`TupleLiveness`]           |
//! | `is_surely_dead`       | none                 | certainly removable?        |
//! | `satisfies_any`        | none                 | the tuple itself            |
//!
//! ## Horizon
//!
//! The engine carries the oldest xid whose undo may still exist. Anything
//! older is long committed: its history has been reclaimed, so the
//! predicates answer from the tuple state alone and never touch undo.
//!
//! ## Caller Contract
//!
//! The caller holds the page stable (pin + shared lock in a real buffer
//! manager) for the duration of a call. The engine only reads; the one
//! write it performs is into the caller's own dirty snapshot. Every undo
//! record fetched during a call is released before the call returns.

mod predicates;
mod resolver;
mod walker;

use crate::page::{PageMetadata, FROZEN_SLOT};
use crate::tuple::{Tuple, TuplePtr};
use crate::txn::{CommandId, TransactionOracle, Xid, INVALID_CID, INVALID_XID};
use crate::undo::{UndoPtr, UndoStore, INVALID_UNDO_PTR};

/// Outcome of [`VisibilityEngine::satisfies_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateVerdict {
    /// The newest version is visible and nothing blocks modifying it.
    MayBeUpdated,
    /// No version is visible to the caller.
    Invisible,
    /// The caller's own transaction modified the tuple after the scan
    /// started.
    SelfUpdated,
    /// Another in-progress transaction holds the tuple.
    BeingUpdated,
    /// A committed transaction deleted or replaced the tuple.
    Updated,
}

/// Outcome of [`VisibilityEngine::satisfies_oldest_xmin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TupleLiveness {
    Live,
    Dead,
    /// Dead, but possibly still visible to an open transaction; not yet
    /// removable.
    RecentlyDead,
    InsertInProgress,
    DeleteInProgress,
}

/// Side information filled by [`VisibilityEngine::satisfies_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateInfo {
    /// Xid behind the newest version.
    pub xid: Xid,
    /// Command id of that xid's action, when recoverable.
    pub cid: CommandId,
    /// Where the tuple went: the successor for a non-in-place update,
    /// otherwise the visible version's own position.
    pub ctid: Option<TuplePtr>,
    /// The visible version was in-place updated or merely locked.
    pub in_place_updated_or_locked: bool,
}

impl Default for UpdateInfo {
    fn default() -> Self {
        Self {
            xid: INVALID_XID,
            cid: INVALID_CID,
            ctid: None,
            in_place_updated_or_locked: false,
        }
    }
}

/// Outcome of [`VisibilityEngine::satisfies_dirty`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirtyVisibility {
    pub tuple: Option<Tuple>,
    /// Successor position when the tuple was replaced by a non-in-place
    /// update.
    pub ctid: Option<TuplePtr>,
}

/// Effective transaction behind a tuple's newest version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EffectiveXact {
    pub xid: Xid,
    pub cid: CommandId,
    pub urec_ptr: UndoPtr,
}

impl EffectiveXact {
    pub(crate) const PRE_HORIZON: Self = Self {
        xid: INVALID_XID,
        cid: INVALID_CID,
        urec_ptr: INVALID_UNDO_PTR,
    };
}

/// The visibility decider. Borrows its collaborators; one instance per
/// page access is the expected usage.
pub struct VisibilityEngine<'a, O, U, P>
where
    O: TransactionOracle,
    U: UndoStore,
    P: PageMetadata,
{
    pub(crate) oracle: &'a O,
    pub(crate) undo: &'a U,
    pub(crate) page: &'a P,
    horizon: Xid,
}

impl<'a, O, U, P> VisibilityEngine<'a, O, U, P>
where
    O: TransactionOracle,
    U: UndoStore,
    P: PageMetadata,
{
    /// `horizon` is the oldest xid whose undo may still exist
    /// (RecentGlobalXmin in the transaction manager's terms).
    pub fn new(oracle: &'a O, undo: &'a U, page: &'a P, horizon: Xid) -> Self {
        Self {
            oracle,
            undo,
            page,
            horizon,
        }
    }

    pub fn horizon(&self) -> Xid {
        self.horizon
    }

    /// Identity predicate: any tuple satisfies "any".
    pub fn satisfies_any<'t>(&self, tuple: &'t Tuple) -> &'t Tuple {
        tuple
    }

    /// Effective (xid, cid, undo pointer) behind `tuple`'s newest version.
    ///
    /// Frozen slots resolve to the invalid xid, which every caller treats
    /// as committed in the deep past. Recycled slots route through the
    /// invalid-slot resolver.
    pub(crate) fn effective_xact(&self, tuple: &Tuple) -> EffectiveXact {
        let header = &tuple.header;
        if header.slot == FROZEN_SLOT {
            return EffectiveXact::PRE_HORIZON;
        }
        if header.has_invalid_slot() {
            self.resolve_invalid_slot(
                self.page.slot_undo_ptr(header.slot),
                tuple.self_ptr,
                None,
            )
        } else {
            EffectiveXact {
                xid: self.page.slot_xid(header.slot),
                cid: self.page.tuple_cid(tuple),
                urec_ptr: self.page.slot_undo_ptr(header.slot),
            }
        }
    }

    /// As [`Self::effective_xact`] but without the cid lookup, for
    /// predicates that never gate on command ids.
    pub(crate) fn effective_xid(&self, tuple: &Tuple) -> (Xid, UndoPtr) {
        let header = &tuple.header;
        if header.slot == FROZEN_SLOT {
            return (INVALID_XID, INVALID_UNDO_PTR);
        }
        if header.has_invalid_slot() {
            let resolved = self.resolve_invalid_slot(
                self.page.slot_undo_ptr(header.slot),
                tuple.self_ptr,
                None,
            );
            (resolved.xid, resolved.urec_ptr)
        } else {
            (
                self.page.slot_xid(header.slot),
                self.page.slot_undo_ptr(header.slot),
            )
        }
    }

    /// Successor position for a tuple replaced by a non-in-place update,
    /// read from the update's undo record.
    pub(crate) fn successor_tid(&self, tuple: &Tuple) -> Option<TuplePtr> {
        let ptr = self.page.slot_undo_ptr(tuple.header.slot);
        let rec = self.undo.fetch(
            ptr,
            tuple.self_ptr.block,
            tuple.self_ptr.offset,
            INVALID_XID,
        )?;
        debug_assert!(
            rec.rec_type == crate::undo::UndoRecType::Update,
            "successor requested from a {:?} record",
            rec.rec_type
        );
        let successor = rec.successor;
        self.undo.release(rec);
        successor
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::txn::{TransactionOracle, Xid};

    /// Table-driven oracle: aborted is the residual of the three sets.
    #[derive(Debug, Default)]
    pub(crate) struct StubOracle {
        pub current: Vec<Xid>,
        pub in_progress: Vec<Xid>,
        pub committed: Vec<Xid>,
    }

    impl TransactionOracle for StubOracle {
        fn is_current(&self, xid: Xid) -> bool {
            self.current.contains(&xid)
        }

        fn is_in_progress(&self, xid: Xid) -> bool {
            self.in_progress.contains(&xid)
        }

        fn did_commit(&self, xid: Xid) -> bool {
            self.committed.contains(&xid)
        }
    }
}
