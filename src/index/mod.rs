//! The Index: one `(block kind, data kind, offset)` triple per block.
//!
//! Rebuilt in memory on open and rewritten wholesale on close.  Two on-disk
//! variants exist and differ only in the width of the entry count:
//!
//! ```text
//! INDX   kind u32 · count u16 · crc64 u64 · entries
//! IDX2   kind u32 · count u64 · crc64 u64 · entries
//! entry  block kind u32 · data kind u32 · offset u64      (16 bytes)
//! ```
//! The CRC64 covers the serialized entries only.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Read, Write};
use thiserror::Error;

use crate::block::{tag_to_string, BlockKind, DataKind};
use crate::checksum::crc64;

pub const INDEX_ENTRY_SIZE: usize = 16;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Block '{}' is not an index", tag_to_string(*.0))]
    NotAnIndex(u32),
    #[error("Index checksum mismatch: stored {stored:016x}, computed {computed:016x}")]
    ChecksumMismatch { stored: u64, computed: u64 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// One Index row.  `block_kind` stays a raw tag so unknown kinds survive a
/// read and can be skipped by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    pub block_kind: u32,
    pub data_kind:  DataKind,
    pub offset:     u64,
}

impl IndexEntry {
    pub fn new(kind: BlockKind, data_kind: DataKind, offset: u64) -> Self {
        Self { block_kind: kind.tag(), data_kind, offset }
    }

    pub fn kind(&self) -> Option<BlockKind> {
        BlockKind::from_tag(self.block_kind)
    }

    fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.block_kind)?;
        w.write_u32::<LittleEndian>(self.data_kind.0 as u32)?;
        w.write_u64::<LittleEndian>(self.offset)
    }

    fn read<R: Read>(mut r: R) -> io::Result<Self> {
        let block_kind = r.read_u32::<LittleEndian>()?;
        // data kinds are 16-bit everywhere else
        let data_kind  = DataKind(r.read_u32::<LittleEndian>()? as u16);
        let offset     = r.read_u64::<LittleEndian>()?;
        Ok(Self { block_kind, data_kind, offset })
    }
}

/// In-memory index, kept in write order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Index {
    pub entries: Vec<IndexEntry>,
}

impl Index {
    pub fn push(&mut self, entry: IndexEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter()
    }

    /// The variant the entry count requires.
    pub fn block_kind(&self) -> BlockKind {
        if self.entries.len() <= u16::MAX as usize {
            BlockKind::Index
        } else {
            BlockKind::Index2
        }
    }

    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        let mut body: Vec<u8> = Vec::with_capacity(self.entries.len() * INDEX_ENTRY_SIZE);
        for e in &self.entries {
            e.write(&mut body)?;
        }
        let kind = self.block_kind();
        w.write_u32::<LittleEndian>(kind.tag())?;
        match kind {
            BlockKind::Index => w.write_u16::<LittleEndian>(self.entries.len() as u16)?,
            _                => w.write_u64::<LittleEndian>(self.entries.len() as u64)?,
        }
        w.write_u64::<LittleEndian>(crc64(&body))?;
        w.write_all(&body)
    }

    /// Read an index at the current position, accepting either variant.
    pub fn read<R: Read>(mut r: R) -> Result<Self, IndexError> {
        let tag = r.read_u32::<LittleEndian>()?;
        let count = match BlockKind::from_tag(tag) {
            Some(BlockKind::Index)  => r.read_u16::<LittleEndian>()? as u64,
            Some(BlockKind::Index2) => r.read_u64::<LittleEndian>()?,
            _ => return Err(IndexError::NotAnIndex(tag)),
        };
        let stored = r.read_u64::<LittleEndian>()?;
        let length = count.checked_mul(INDEX_ENTRY_SIZE as u64).ok_or_else(|| {
            IndexError::Io(io::Error::new(io::ErrorKind::InvalidData, "index entry count overflows"))
        })?;
        let mut body = Vec::new();
        r.take(length).read_to_end(&mut body)?;
        if body.len() as u64 != length {
            return Err(IndexError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "index truncated",
            )));
        }
        let computed = crc64(&body);
        if computed != stored {
            return Err(IndexError::ChecksumMismatch { stored, computed });
        }
        let entries = body
            .chunks_exact(INDEX_ENTRY_SIZE)
            .map(IndexEntry::read)
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample(n: usize) -> Index {
        let mut idx = Index::default();
        for i in 0..n {
            idx.push(IndexEntry::new(BlockKind::Data, DataKind::USER_DATA, 72 + i as u64 * 100));
        }
        idx.push(IndexEntry::new(BlockKind::DeduplicationTable, DataKind::USER_DATA, 9000));
        idx
    }

    #[test]
    fn small_index_uses_16_bit_count() {
        let idx = sample(3);
        let mut buf = Vec::new();
        idx.write(&mut buf).unwrap();
        assert_eq!(&buf[..4], b"INDX");
        assert_eq!(buf.len(), 4 + 2 + 8 + 4 * INDEX_ENTRY_SIZE);
        assert_eq!(Index::read(Cursor::new(&buf)).unwrap(), idx);
    }

    #[test]
    fn large_index_uses_64_bit_count() {
        let idx = sample(u16::MAX as usize);
        assert_eq!(idx.block_kind(), BlockKind::Index2);
        let mut buf = Vec::new();
        idx.write(&mut buf).unwrap();
        assert_eq!(&buf[..4], b"IDX2");
        assert_eq!(Index::read(Cursor::new(&buf)).unwrap().len(), idx.len());
    }

    #[test]
    fn corrupted_entries_fail_checksum() {
        let mut buf = Vec::new();
        sample(2).write(&mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 1;
        assert!(matches!(
            Index::read(Cursor::new(&buf)),
            Err(IndexError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn foreign_block_is_not_an_index() {
        let mut buf = b"DBLK".to_vec();
        buf.extend_from_slice(&[0u8; 16]);
        assert!(matches!(Index::read(Cursor::new(&buf)), Err(IndexError::NotAnIndex(_))));
    }

    #[test]
    fn oversized_entry_count_is_invalid_data() {
        let mut buf = b"IDX2".to_vec();
        buf.extend_from_slice(&u64::MAX.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        match Index::read(Cursor::new(&buf)) {
            Err(IndexError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::InvalidData),
            other => panic!("expected InvalidData, got {other:?}"),
        }
    }
}
