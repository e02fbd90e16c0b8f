//! # Undo Page Codec
//!
//! Append-only page format for encoded undo records.
//!
//! ## Page Layout
//!
//! ```text
//! +------------------+
//! | Undo Header      |
//! | (16 bytes)       |
//! +------------------+
//! | Undo Records     |
//! | (append-only)    |
//! +------------------+
//! | Free Space       |
//! +------------------+
//! ```
//!
//! ## Undo Header (16 bytes)
//!
//! ```text
//! Offset  Size  Field         Description
//! ------  ----  ------------  ---------------------------------------
//! 0       2     entry_count   Number of records in this page
//! 2       2     free_offset   Offset where the next record is written
//! 4       8     min_prev_xid  Minimum prev_xid in this page
//! 12      4     reserved
//! ```
//!
//! `min_prev_xid` lets the undo retention machinery discard a whole page
//! once the horizon passes it.
//!
//! ## Record Layout (variable length)
//!
//! ```text
//! Offset  Size  Field       Description
//! ------  ----  ----------  -----------------------------------------
//! 0       2     entry_size  Total encoded size of this record
//! 2       1     rec_type    UndoRecType tag
//! 3       1     info        Bit 0: has prior image; bit 1: has successor
//! 4       4     block       Target tuple block
//! 8       2     offset      Target tuple offset
//! 10      8     xid         Writer of the record
//! 18      8     prev_xid    Producer of the restored version
//! 26      4     cid
//! 30      8     blkprev
//! 38      6     successor   (if info bit 1) block u32 + offset u16
//! ..      3+n   prev_image  (if info bit 0) tuple header + payload
//! ```
//!
//! The image always comes last so its payload can run to `entry_size`
//! without its own length prefix.
//!
//! The fixed header uses zerocopy for safe unaligned access; records are
//! variable-size and parsed manually.

use super::{UndoRecType, UndoRecord};
use crate::tuple::{TupleHeader, TuplePtr};
use crate::txn::{xid_is_valid, Xid};
use eyre::{bail, ensure, Result};
use zerocopy::little_endian::{U16, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const UNDO_PAGE_SIZE: usize = 16384;
pub const UNDO_PAGE_HEADER_SIZE: usize = 16;
pub const UNDO_DATA_START: usize = UNDO_PAGE_HEADER_SIZE;
pub const UNDO_RECORD_BASE_SIZE: usize = 38;

const INFO_HAS_IMAGE: u8 = 0b0000_0001;
const INFO_HAS_SUCCESSOR: u8 = 0b0000_0010;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct UndoPageHeader {
    entry_count: U16,
    free_offset: U16,
    min_prev_xid: U64,
    reserved: [u8; 4],
}

const _: () = assert!(std::mem::size_of::<UndoPageHeader>() == UNDO_PAGE_HEADER_SIZE);

impl UndoPageHeader {
    pub fn new() -> Self {
        Self {
            entry_count: U16::new(0),
            free_offset: U16::new(UNDO_DATA_START as u16),
            min_prev_xid: U64::new(u64::MAX),
            reserved: [0u8; 4],
        }
    }

    pub fn entry_count(&self) -> u16 {
        self.entry_count.get()
    }

    pub fn free_offset(&self) -> u16 {
        self.free_offset.get()
    }

    pub fn min_prev_xid(&self) -> Xid {
        self.min_prev_xid.get()
    }

    pub fn free_space(&self) -> usize {
        UNDO_PAGE_SIZE.saturating_sub(self.free_offset.get() as usize)
    }

    fn read_from(data: &[u8]) -> Result<Self> {
        ensure!(
            data.len() >= UNDO_PAGE_HEADER_SIZE,
            "page too small for undo header: {}",
            data.len()
        );
        Self::read_from_bytes(&data[..UNDO_PAGE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse undo page header: {:?}", e))
    }

    fn write_to(&self, data: &mut [u8]) {
        debug_assert!(data.len() >= UNDO_PAGE_HEADER_SIZE);
        data[..UNDO_PAGE_HEADER_SIZE].copy_from_slice(self.as_bytes());
    }
}

impl Default for UndoPageHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Encoded size of a record.
pub fn encoded_size(rec: &UndoRecord) -> usize {
    let mut size = UNDO_RECORD_BASE_SIZE;
    if rec.successor.is_some() {
        size += 6;
    }
    if let Some(image) = &rec.prev_image {
        size += TupleHeader::SIZE + image.data.len();
    }
    size
}

/// Serializes `rec` into `data`, which must hold [`encoded_size`] bytes.
pub fn encode_record(rec: &UndoRecord, data: &mut [u8]) -> Result<()> {
    let size = encoded_size(rec);
    ensure!(
        data.len() >= size,
        "buffer too small for undo record: {} < {}",
        data.len(),
        size
    );
    ensure!(size <= u16::MAX as usize, "undo record too large: {}", size);

    let mut info = 0u8;
    if rec.prev_image.is_some() {
        info |= INFO_HAS_IMAGE;
    }
    if rec.successor.is_some() {
        info |= INFO_HAS_SUCCESSOR;
    }

    data[0..2].copy_from_slice(&(size as u16).to_le_bytes());
    data[2] = rec.rec_type.to_u8();
    data[3] = info;
    data[4..8].copy_from_slice(&rec.target.block.to_le_bytes());
    data[8..10].copy_from_slice(&rec.target.offset.to_le_bytes());
    data[10..18].copy_from_slice(&rec.xid.to_le_bytes());
    data[18..26].copy_from_slice(&rec.prev_xid.to_le_bytes());
    data[26..30].copy_from_slice(&rec.cid.to_le_bytes());
    data[30..38].copy_from_slice(&rec.blkprev.to_le_bytes());

    let mut pos = UNDO_RECORD_BASE_SIZE;
    if let Some(successor) = rec.successor {
        data[pos..pos + 4].copy_from_slice(&successor.block.to_le_bytes());
        data[pos + 4..pos + 6].copy_from_slice(&successor.offset.to_le_bytes());
        pos += 6;
    }
    if let Some(image) = &rec.prev_image {
        image.header.write_to(&mut data[pos..pos + TupleHeader::SIZE]);
        pos += TupleHeader::SIZE;
        data[pos..pos + image.data.len()].copy_from_slice(&image.data);
    }

    Ok(())
}

/// Parses one record from the front of `data`.
pub fn decode_record(data: &[u8]) -> Result<UndoRecord> {
    ensure!(
        data.len() >= UNDO_RECORD_BASE_SIZE,
        "undo record too small: {} < {}",
        data.len(),
        UNDO_RECORD_BASE_SIZE
    );

    let entry_size = u16::from_le_bytes(data[0..2].try_into().unwrap()) as usize;
    ensure!(
        entry_size >= UNDO_RECORD_BASE_SIZE && data.len() >= entry_size,
        "undo record truncated: entry_size {} buffer {}",
        entry_size,
        data.len()
    );

    let rec_type = UndoRecType::from_u8(data[2])
        .ok_or_else(|| eyre::eyre!("unknown undo record type tag {}", data[2]))?;
    let info = data[3];
    let block = u32::from_le_bytes(data[4..8].try_into().unwrap());
    let offset = u16::from_le_bytes(data[8..10].try_into().unwrap());
    let xid = u64::from_le_bytes(data[10..18].try_into().unwrap());
    let prev_xid = u64::from_le_bytes(data[18..26].try_into().unwrap());
    let cid = u32::from_le_bytes(data[26..30].try_into().unwrap());
    let blkprev = u64::from_le_bytes(data[30..38].try_into().unwrap());

    let mut rec = UndoRecord::new(
        rec_type,
        TuplePtr::new(block, offset),
        xid,
        prev_xid,
        cid,
        blkprev,
    );

    let mut pos = UNDO_RECORD_BASE_SIZE;
    if info & INFO_HAS_SUCCESSOR != 0 {
        ensure!(
            entry_size >= pos + 6,
            "undo record successor extends past entry"
        );
        let succ_block = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
        let succ_offset = u16::from_le_bytes(data[pos + 4..pos + 6].try_into().unwrap());
        rec = rec.with_successor(TuplePtr::new(succ_block, succ_offset));
        pos += 6;
    }
    if info & INFO_HAS_IMAGE != 0 {
        ensure!(
            entry_size >= pos + TupleHeader::SIZE,
            "undo record image extends past entry"
        );
        let header = TupleHeader::from_bytes(&data[pos..pos + TupleHeader::SIZE]);
        let payload = data[pos + TupleHeader::SIZE..entry_size].to_vec();
        rec = rec.with_image(header, payload);
    }

    Ok(rec)
}

pub struct UndoPageReader<'a> {
    data: &'a [u8],
    header: UndoPageHeader,
}

impl<'a> UndoPageReader<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let header = UndoPageHeader::read_from(data)?;
        Ok(Self { data, header })
    }

    pub fn header(&self) -> &UndoPageHeader {
        &self.header
    }

    pub fn entry_count(&self) -> u16 {
        self.header.entry_count()
    }

    pub fn read_record_at(&self, offset: u16) -> Result<UndoRecord> {
        let offset = offset as usize;
        ensure!(
            offset >= UNDO_DATA_START && offset < self.header.free_offset() as usize,
            "undo record offset out of bounds: {}",
            offset
        );
        decode_record(&self.data[offset..])
    }

    pub fn iter(&self) -> UndoRecordIter<'a> {
        UndoRecordIter {
            data: self.data,
            current_offset: UNDO_DATA_START,
            end_offset: self.header.free_offset() as usize,
        }
    }

    /// The whole page is discardable once the horizon passed every
    /// prev_xid recorded in it.
    pub fn is_discardable(&self, horizon: Xid) -> bool {
        crate::txn::xid_precedes(self.header.min_prev_xid(), horizon)
    }
}

pub struct UndoRecordIter<'a> {
    data: &'a [u8],
    current_offset: usize,
    end_offset: usize,
}

impl<'a> Iterator for UndoRecordIter<'a> {
    type Item = Result<(u16, UndoRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_offset >= self.end_offset {
            return None;
        }

        let offset = self.current_offset as u16;
        match decode_record(&self.data[self.current_offset..]) {
            Ok(rec) => {
                self.current_offset += encoded_size(&rec);
                Some(Ok((offset, rec)))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

pub struct UndoPageWriter<'a> {
    data: &'a mut [u8],
    header: UndoPageHeader,
}

impl<'a> UndoPageWriter<'a> {
    pub fn new(data: &'a mut [u8]) -> Result<Self> {
        ensure!(
            data.len() >= UNDO_PAGE_SIZE,
            "page buffer too small: {} < {}",
            data.len(),
            UNDO_PAGE_SIZE
        );
        let header = UndoPageHeader::read_from(data)?;
        Ok(Self { data, header })
    }

    pub fn init_empty(data: &'a mut [u8]) -> Result<Self> {
        ensure!(
            data.len() >= UNDO_PAGE_SIZE,
            "page buffer too small: {} < {}",
            data.len(),
            UNDO_PAGE_SIZE
        );
        let header = UndoPageHeader::new();
        header.write_to(data);
        Ok(Self { data, header })
    }

    pub fn header(&self) -> &UndoPageHeader {
        &self.header
    }

    pub fn free_space(&self) -> usize {
        self.header.free_space()
    }

    /// Appends `rec`, returning its in-page offset.
    pub fn append(&mut self, rec: &UndoRecord) -> Result<u16> {
        let size = encoded_size(rec);
        if self.header.free_space() < size {
            bail!(
                "undo page full: need {} bytes, have {} free",
                size,
                self.header.free_space()
            );
        }

        let offset = self.header.free_offset();
        encode_record(rec, &mut self.data[offset as usize..])?;

        self.header.free_offset = U16::new(offset + size as u16);
        self.header.entry_count = U16::new(self.header.entry_count() + 1);
        if xid_is_valid(rec.prev_xid) && rec.prev_xid < self.header.min_prev_xid() {
            self.header.min_prev_xid = U64::new(rec.prev_xid);
        }
        self.header.write_to(self.data);

        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::flags;
    use crate::txn::INVALID_XID;
    use crate::undo::{encode_undo_ptr, UndoRecType};

    fn make_page() -> Vec<u8> {
        vec![0u8; UNDO_PAGE_SIZE]
    }

    fn delete_record() -> UndoRecord {
        UndoRecord::new(
            UndoRecType::Delete,
            TuplePtr::new(7, 2),
            101,
            100,
            3,
            encode_undo_ptr(0, 16),
        )
        .with_image(TupleHeader::new(0), vec![1, 2, 3, 4])
    }

    #[test]
    fn header_defaults() {
        let header = UndoPageHeader::new();
        assert_eq!(header.entry_count(), 0);
        assert_eq!(header.free_offset(), UNDO_DATA_START as u16);
        assert_eq!(header.min_prev_xid(), u64::MAX);
    }

    #[test]
    fn record_roundtrip_with_image() {
        let original = delete_record();
        let mut buf = vec![0u8; encoded_size(&original)];
        encode_record(&original, &mut buf).unwrap();
        let restored = decode_record(&buf).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn record_roundtrip_with_successor() {
        let original = UndoRecord::new(UndoRecType::Update, TuplePtr::new(7, 2), 101, 100, 1, 0)
            .with_successor(TuplePtr::new(9, 5))
            .with_image(TupleHeader::with_flags(1, flags::INPLACE_UPDATED), vec![8]);
        let mut buf = vec![0u8; encoded_size(&original)];
        encode_record(&original, &mut buf).unwrap();
        let restored = decode_record(&buf).unwrap();
        assert_eq!(restored.successor, Some(TuplePtr::new(9, 5)));
        assert_eq!(original, restored);
    }

    #[test]
    fn record_roundtrip_bare_marker() {
        let original = UndoRecord::new(
            UndoRecType::InvalidXactSlot,
            TuplePtr::new(7, 2),
            103,
            95,
            2,
            encode_undo_ptr(1, 40),
        );
        let mut buf = vec![0u8; encoded_size(&original)];
        encode_record(&original, &mut buf).unwrap();
        assert_eq!(encoded_size(&original), UNDO_RECORD_BASE_SIZE);
        assert_eq!(decode_record(&buf).unwrap(), original);
    }

    #[test]
    fn decode_rejects_truncated_buffer() {
        let original = delete_record();
        let mut buf = vec![0u8; encoded_size(&original)];
        encode_record(&original, &mut buf).unwrap();
        assert!(decode_record(&buf[..10]).is_err());
    }

    #[test]
    fn decode_rejects_unknown_type_tag() {
        let original = delete_record();
        let mut buf = vec![0u8; encoded_size(&original)];
        encode_record(&original, &mut buf).unwrap();
        buf[2] = 0xEE;
        assert!(decode_record(&buf).is_err());
    }

    #[test]
    fn writer_append_and_read_back() {
        let mut page = make_page();
        let offset;
        {
            let mut writer = UndoPageWriter::init_empty(&mut page).unwrap();
            offset = writer.append(&delete_record()).unwrap();
            assert_eq!(writer.header().entry_count(), 1);
            assert_eq!(writer.header().min_prev_xid(), 100);
        }

        let reader = UndoPageReader::new(&page).unwrap();
        let rec = reader.read_record_at(offset).unwrap();
        assert_eq!(rec, delete_record());
    }

    #[test]
    fn writer_rejects_record_past_free_space() {
        let mut page = make_page();
        let mut writer = UndoPageWriter::init_empty(&mut page).unwrap();
        let huge = UndoRecord::new(UndoRecType::Delete, TuplePtr::new(0, 1), 2, 1, 0, 0)
            .with_image(TupleHeader::new(0), vec![0u8; UNDO_PAGE_SIZE]);
        assert!(writer.append(&huge).is_err());
    }

    #[test]
    fn reader_rejects_out_of_bounds_offset() {
        let mut page = make_page();
        {
            let mut writer = UndoPageWriter::init_empty(&mut page).unwrap();
            writer.append(&delete_record()).unwrap();
        }
        let reader = UndoPageReader::new(&page).unwrap();
        assert!(reader.read_record_at(0).is_err());
        assert!(reader.read_record_at(u16::MAX).is_err());
    }

    #[test]
    fn iterator_walks_records_in_order() {
        let mut page = make_page();
        {
            let mut writer = UndoPageWriter::init_empty(&mut page).unwrap();
            for xid in [120u64, 105, 110] {
                let rec = UndoRecord::new(UndoRecType::Insert, TuplePtr::new(0, 1), xid, xid, 0, 0);
                writer.append(&rec).unwrap();
            }
        }

        let reader = UndoPageReader::new(&page).unwrap();
        let xids: Vec<Xid> = reader
            .iter()
            .map(|r| r.unwrap().1.prev_xid)
            .collect();
        assert_eq!(xids, vec![120, 105, 110]);
        assert_eq!(reader.header().min_prev_xid(), 105);
    }

    #[test]
    fn invalid_prev_xid_does_not_poison_min() {
        let mut page = make_page();
        {
            let mut writer = UndoPageWriter::init_empty(&mut page).unwrap();
            let rec = UndoRecord::new(UndoRecType::Insert, TuplePtr::new(0, 1), 7, INVALID_XID, 0, 0);
            writer.append(&rec).unwrap();
        }
        let reader = UndoPageReader::new(&page).unwrap();
        assert_eq!(reader.header().min_prev_xid(), u64::MAX);
    }

    #[test]
    fn page_discardable_once_horizon_passes() {
        let mut page = make_page();
        {
            let mut writer = UndoPageWriter::init_empty(&mut page).unwrap();
            writer
                .append(&UndoRecord::new(
                    UndoRecType::Insert,
                    TuplePtr::new(0, 1),
                    50,
                    50,
                    0,
                    0,
                ))
                .unwrap();
        }
        let reader = UndoPageReader::new(&page).unwrap();
        assert!(reader.is_discardable(100));
        assert!(!reader.is_discardable(50));
    }
}
