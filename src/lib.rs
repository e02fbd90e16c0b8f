//! # undoheap - Tuple Visibility for an Undo-Log MVCC Heap
//!
//! undoheap is the visibility core of an undo-log based table storage
//! format: the heap keeps only the newest version of each row in place,
//! pushes prior versions into per-page undo chains, and answers "which
//! version may this observer see?" by interpreting tuple flags,
//! transaction-slot metadata, and the backward undo chain.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │      VisibilityEngine (predicates)        │
//! │  mvcc / update / dirty / oldest / surely  │
//! ├─────────────────┬─────────────────────────┤
//! │ Invalid-Slot    │   Undo Chain Walker     │
//! │ Resolver        │   (version restore)     │
//! ├─────────┬───────┴───────┬─────────────────┤
//! │ Tuple   │ Page Slots    │  Undo Records   │
//! │ Header  │ (PageMetadata)│  (UndoStore)    │
//! ├─────────┴───────────────┴─────────────────┤
//! │ TransactionOracle / Snapshot / Horizon    │
//! └───────────────────────────────────────────┘
//! ```
//!
//! The storage layer proper (buffer manager, transaction manager, undo
//! writing, rollback, retention) stays outside; the engine consumes it
//! through three traits ([`TransactionOracle`], [`UndoStore`],
//! [`PageMetadata`]) and ships in-memory implementations of the latter two
//! so it runs end-to-end on its own.
//!
//! ## Quick Start
//!
//! ```
//! use undoheap::{
//!     MemUndoStore, PageOpaque, Snapshot, TransSlot, TransactionOracle,
//!     Tuple, TupleHeader, TuplePtr, VisibilityEngine, Xid,
//! };
//!
//! struct Oracle;
//! impl TransactionOracle for Oracle {
//!     fn is_current(&self, _: Xid) -> bool { false }
//!     fn is_in_progress(&self, _: Xid) -> bool { false }
//!     fn did_commit(&self, xid: Xid) -> bool { xid == 100 }
//! }
//!
//! let undo = MemUndoStore::new();
//! let mut page = PageOpaque::new();
//! page.set_slot(0, TransSlot::new(100, 0, 0));
//!
//! let engine = VisibilityEngine::new(&Oracle, &undo, &page, 90);
//! let tuple = Tuple::new(TuplePtr::new(0, 1), 1, TupleHeader::new(0), b"row".to_vec());
//! let snapshot = Snapshot::new(90, 120, 5);
//!
//! assert!(engine.satisfies_mvcc(&tuple, &snapshot).is_some());
//! ```
//!
//! ## Visibility Model
//!
//! A tuple's newest version carries a flag mask (deleted, replaced,
//! in-place updated, lock-only, recycled-slot) and a transaction-slot
//! index. A predicate resolves the effective transaction behind the
//! version, through the undo log when the slot was recycled, classifies
//! it via the oracle (current / in progress / committed / aborted), and
//! either answers directly or restores prior versions from undo until one
//! passes. Versions whose producer precedes the engine's horizon xid are
//! committed in the deep past and never require undo.
//!
//! ## Module Overview
//!
//! - [`txn`]: xids, command ids, wraparound ordering, oracle, snapshots
//! - [`tuple`]: tuple header codec and lifecycle flags
//! - [`page`]: per-page transaction slots
//! - [`undo`]: undo records, page codec, stores
//! - [`visibility`]: the predicates, resolver, and chain walker

pub mod page;
pub mod tuple;
pub mod txn;
pub mod undo;
pub mod visibility;

pub use page::{PageMetadata, PageOpaque, SlotIndex, TransSlot, FROZEN_SLOT, MAX_TRANS_SLOTS};
pub use tuple::{TableId, Tuple, TupleHeader, TuplePtr};
pub use txn::{
    xid_precedes, CommandId, Snapshot, TransactionOracle, Xid, FIRST_CID, INVALID_CID, INVALID_XID,
};
pub use undo::mem::MemUndoStore;
pub use undo::{UndoPtr, UndoRecType, UndoRecord, UndoStore, INVALID_UNDO_PTR};
pub use visibility::{
    DirtyVisibility, TupleLiveness, UpdateInfo, UpdateVerdict, VisibilityEngine,
};
