//! # In-Memory Undo Store
//!
//! [`MemUndoStore`] keeps the undo log in codec pages held in memory. It
//! backs the engine's tests and gives embedders a working store without a
//! storage layer.
//!
//! ## Append Path
//!
//! `append` encodes the record into the current page; when the page cannot
//! fit it, a fresh page is allocated and becomes current. The returned
//! [`UndoPtr`] packs (page number, in-page offset).
//!
//! ## Fetch Path
//!
//! `fetch` follows `blkprev` from the given pointer until it finds a
//! record targeting the requested tuple position (and written by the
//! advisory xid, when one is given). Pointers below the discard watermark
//! read as gone, which is how tests model undo retention.
//!
//! ## Accounting
//!
//! The store counts fetches and releases and tracks how many fetched
//! records are outstanding. The visibility engine's release obligation is
//! strict (every fetch paired with exactly one release on every path), and
//! the scenario tests assert it through these counters.

use super::page::{encoded_size, UndoPageReader, UndoPageWriter, UNDO_PAGE_SIZE};
use super::{decode_undo_ptr, encode_undo_ptr, UndoPtr, UndoRecord, UndoStore, INVALID_UNDO_PTR};
use crate::txn::{xid_is_valid, Xid};
use eyre::{ensure, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchStats {
    pub fetched: u64,
    pub released: u64,
    pub outstanding: u64,
}

struct StoreInner {
    pages: HashMap<u64, Vec<u8>>,
    current_page: u64,
    discard_before: UndoPtr,
    stats: FetchStats,
}

pub struct MemUndoStore {
    inner: Mutex<StoreInner>,
}

impl MemUndoStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                pages: HashMap::new(),
                current_page: 0,
                discard_before: INVALID_UNDO_PTR,
                stats: FetchStats::default(),
            }),
        }
    }

    /// Appends a record, returning its address.
    pub fn append(&self, rec: &UndoRecord) -> Result<UndoPtr> {
        let size = encoded_size(rec);
        ensure!(
            size <= UNDO_PAGE_SIZE - super::page::UNDO_DATA_START,
            "undo record larger than a page: {}",
            size
        );

        let mut inner = self.inner.lock();
        let page_no = inner.current_page;

        if let Some(page) = inner.pages.get_mut(&page_no) {
            let mut writer = UndoPageWriter::new(page)?;
            if writer.free_space() >= size {
                let offset = writer.append(rec)?;
                return Ok(encode_undo_ptr(page_no, offset));
            }
        }

        let new_page_no = if inner.pages.is_empty() {
            0
        } else {
            page_no + 1
        };
        let mut page = vec![0u8; UNDO_PAGE_SIZE];
        let offset = {
            let mut writer = UndoPageWriter::init_empty(&mut page)?;
            writer.append(rec)?
        };
        inner.pages.insert(new_page_no, page);
        inner.current_page = new_page_no;

        Ok(encode_undo_ptr(new_page_no, offset))
    }

    /// Moves the discard watermark: every pointer strictly below `ptr`
    /// reads as discarded from now on.
    pub fn discard_up_to(&self, ptr: UndoPtr) {
        self.inner.lock().discard_before = ptr;
    }

    pub fn stats(&self) -> FetchStats {
        self.inner.lock().stats
    }

    pub fn reset_stats(&self) {
        self.inner.lock().stats = FetchStats::default();
    }
}

impl Default for MemUndoStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoStore for MemUndoStore {
    fn fetch(&self, ptr: UndoPtr, block: u32, offset: u16, xid: Xid) -> Option<UndoRecord> {
        let mut inner = self.inner.lock();
        let mut ptr = ptr;

        while ptr != INVALID_UNDO_PTR {
            if ptr < inner.discard_before {
                return None;
            }
            let (page_no, rec_offset) = decode_undo_ptr(ptr);
            let page = inner.pages.get(&page_no)?;
            let reader = UndoPageReader::new(page).ok()?;
            let rec = reader.read_record_at(rec_offset).ok()?;

            if rec.target.block == block
                && rec.target.offset == offset
                && (!xid_is_valid(xid) || rec.xid == xid)
            {
                inner.stats.fetched += 1;
                inner.stats.outstanding += 1;
                return Some(rec);
            }
            ptr = rec.blkprev;
        }

        None
    }

    fn release(&self, rec: UndoRecord) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.stats.outstanding > 0, "release without a fetch");
        inner.stats.released += 1;
        inner.stats.outstanding -= 1;
        drop(rec);
    }
}
