//! # Transaction Identity, Ordering, and Snapshots
//!
//! This module defines the transaction-facing vocabulary of the visibility
//! engine: transaction ids, command ids, the wraparound ordering used for
//! horizon comparisons, the status oracle the engine consults, and the
//! snapshot an observer carries.
//!
//! ## Transaction Identifiers
//!
//! Transaction IDs (`Xid`) are 64-bit integers allocated monotonically by
//! the transaction manager. Special values:
//! - `Xid = 0` (`INVALID_XID`): no transaction. The engine also produces it
//!   when undo has been discarded, because an invalid xid orders before
//!   every normal xid and therefore lands in the "long committed, fully
//!   visible" bucket without any extra branching.
//!
//! ## Wraparound Ordering
//!
//! `xid_precedes` compares ids on the wrapping difference, so ordering
//! stays correct when the counter wraps. The horizon checks in the
//! visibility predicates all go through it; plain `<` would invert near
//! the wrap point.
//!
//! ## Command Identifiers
//!
//! Command IDs (`CommandId`) order statements within one transaction. A
//! tuple touched at `cid` is visible to a scan at `curcid` only when
//! `cid < curcid`. `INVALID_CID` is the all-ones value, so an
//! unrecoverable cid compares as "at or after any scan start" and the
//! engine falls back to the undo chain.
//!
//! ## Status Oracle
//!
//! The engine never tracks transaction state itself; it asks the
//! [`TransactionOracle`]. For a valid xid exactly one of current /
//! in-progress / committed / aborted holds at an instant, and aborted is
//! the residual: none of the three trait methods answer true. The oracle
//! must answer consistently for the duration of one predicate call.
//!
//! ## Snapshots
//!
//! A [`Snapshot`] is the observer context for MVCC reads: the command id
//! of the scan, an `[xmin, xmax)` window, and the list of transactions
//! that were in progress when the snapshot was taken. [`Snapshot::hides`]
//! answers whether the snapshot considers an xid concurrent (its effects
//! invisible). Dirty reads use a mutable snapshot whose xmin/xmax fields
//! double as output slots, see [`Snapshot::dirty`].

use smallvec::SmallVec;

pub type Xid = u64;

/// No transaction. Orders before every normal xid.
pub const INVALID_XID: Xid = 0;

pub type CommandId = u32;

/// Unknown command id. Compares as ">= any curcid".
pub const INVALID_CID: CommandId = u32::MAX;

/// Command id of the first statement in a transaction.
pub const FIRST_CID: CommandId = 0;

#[inline]
pub fn xid_is_valid(xid: Xid) -> bool {
    xid != INVALID_XID
}

/// Strict "a is older than b" on the wrapping difference.
#[inline]
pub fn xid_precedes(a: Xid, b: Xid) -> bool {
    (a.wrapping_sub(b) as i64) < 0
}

/// Classifies transaction status for the visibility engine.
///
/// Aborted is the residual state: an xid for which none of the three
/// methods answers true.
pub trait TransactionOracle {
    /// Does `xid` belong to the calling transaction?
    fn is_current(&self, xid: Xid) -> bool;

    /// Is `xid` known to be running in some other backend?
    fn is_in_progress(&self, xid: Xid) -> bool;

    /// Has `xid` durably committed?
    fn did_commit(&self, xid: Xid) -> bool;
}

/// Observer context for MVCC visibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Command id of the current scan; effects at `cid >= curcid` are
    /// invisible to it.
    pub curcid: CommandId,
    /// Everything before `xmin` is visible (if committed).
    pub xmin: Xid,
    /// Everything at or after `xmax` is hidden.
    pub xmax: Xid,
    /// Transactions in `[xmin, xmax)` that were running at snapshot time.
    pub xip: SmallVec<[Xid; 8]>,
}

impl Snapshot {
    pub fn new(xmin: Xid, xmax: Xid, curcid: CommandId) -> Self {
        Self {
            curcid,
            xmin,
            xmax,
            xip: SmallVec::new(),
        }
    }

    /// Adds the set of transactions that were in progress at snapshot time.
    pub fn with_xip(mut self, xip: impl IntoIterator<Item = Xid>) -> Self {
        self.xip = xip.into_iter().collect();
        self
    }

    /// A dirty-read snapshot. The window is empty; the xmin/xmax fields
    /// are outputs that the dirty predicate fills with the xids of
    /// in-progress inserters/deleters it observed.
    pub fn dirty() -> Self {
        Self {
            curcid: FIRST_CID,
            xmin: INVALID_XID,
            xmax: INVALID_XID,
            xip: SmallVec::new(),
        }
    }

    /// True when the snapshot considers `xid` concurrent, hiding its
    /// effects.
    pub fn hides(&self, xid: Xid) -> bool {
        if xid_precedes(xid, self.xmin) {
            return false;
        }
        if !xid_precedes(xid, self.xmax) {
            return true;
        }
        self.xip.contains(&xid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_xid_precedes_normal_xids() {
        assert!(xid_precedes(INVALID_XID, 1));
        assert!(xid_precedes(INVALID_XID, 100));
        assert!(!xid_precedes(100, INVALID_XID));
    }

    #[test]
    fn precedes_is_strict() {
        assert!(xid_precedes(99, 100));
        assert!(!xid_precedes(100, 100));
        assert!(!xid_precedes(101, 100));
    }

    #[test]
    fn precedes_survives_wraparound() {
        let near_wrap = u64::MAX - 5;
        let wrapped = 10u64;
        assert!(xid_precedes(near_wrap, wrapped));
        assert!(!xid_precedes(wrapped, near_wrap));
    }

    #[test]
    fn snapshot_hides_at_and_after_xmax() {
        let snap = Snapshot::new(50, 100, 0);
        assert!(snap.hides(100));
        assert!(snap.hides(150));
    }

    #[test]
    fn snapshot_shows_before_xmin() {
        let snap = Snapshot::new(50, 100, 0).with_xip([60]);
        assert!(!snap.hides(49));
        assert!(!snap.hides(10));
    }

    #[test]
    fn snapshot_window_consults_xip() {
        let snap = Snapshot::new(50, 100, 0).with_xip([60, 75]);
        assert!(snap.hides(60));
        assert!(snap.hides(75));
        assert!(!snap.hides(70));
    }

    #[test]
    fn dirty_snapshot_starts_cleared() {
        let snap = Snapshot::dirty();
        assert_eq!(snap.xmin, INVALID_XID);
        assert_eq!(snap.xmax, INVALID_XID);
        assert!(snap.xip.is_empty());
    }

    #[test]
    fn invalid_cid_gates_as_after_scan_start() {
        assert!(INVALID_CID >= FIRST_CID);
        assert!(INVALID_CID >= 12345);
    }
}
