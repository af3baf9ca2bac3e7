//! Tape file and partition tables (`TFLE`, `TPBT`).
//!
//! ```text
//! TFLE   kind u32 · count u32 · length u64 · crc64 u64
//!        entry: file u32 · partition u8 · first block u64 · last block u64
//! TPBT   kind u32 · count u8 · length u64 · crc64 u64
//!        entry: number u8 · first block u64 · last block u64
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Read, Write};

use super::invalid_data;
use crate::block::{read_payload, BlockKind};
use crate::checksum::crc64;

const FILE_ENTRY_SIZE:      usize = 21;
const PARTITION_ENTRY_SIZE: usize = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TapeFile {
    pub file:        u32,
    pub partition:   u8,
    pub first_block: u64,
    pub last_block:  u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TapePartition {
    pub number:      u8,
    pub first_block: u64,
    pub last_block:  u64,
}

pub fn write_files_block<W: Write>(mut w: W, files: &[TapeFile]) -> io::Result<()> {
    let mut entries: Vec<u8> = Vec::with_capacity(files.len() * FILE_ENTRY_SIZE);
    for f in files {
        entries.write_u32::<LittleEndian>(f.file)?;
        entries.write_u8(f.partition)?;
        entries.write_u64::<LittleEndian>(f.first_block)?;
        entries.write_u64::<LittleEndian>(f.last_block)?;
    }
    w.write_u32::<LittleEndian>(BlockKind::TapeFile.tag())?;
    w.write_u32::<LittleEndian>(files.len() as u32)?;
    w.write_u64::<LittleEndian>(entries.len() as u64)?;
    w.write_u64::<LittleEndian>(crc64(&entries))?;
    w.write_all(&entries)
}

pub fn read_files_block<R: Read>(mut r: R) -> io::Result<Vec<TapeFile>> {
    let count  = r.read_u32::<LittleEndian>()? as usize;
    let length = r.read_u64::<LittleEndian>()?;
    let crc    = r.read_u64::<LittleEndian>()?;
    if length != (count * FILE_ENTRY_SIZE) as u64 {
        return Err(invalid_data("tape file block length mismatch"));
    }
    let entries = read_payload(&mut r, length)?;
    if crc64(&entries) != crc {
        return Err(invalid_data("tape file block checksum mismatch"));
    }
    let mut cur = &entries[..];
    (0..count)
        .map(|_| -> io::Result<TapeFile> {
            Ok(TapeFile {
                file:        cur.read_u32::<LittleEndian>()?,
                partition:   cur.read_u8()?,
                first_block: cur.read_u64::<LittleEndian>()?,
                last_block:  cur.read_u64::<LittleEndian>()?,
            })
        })
        .collect()
}

pub fn write_partitions_block<W: Write>(mut w: W, partitions: &[TapePartition]) -> io::Result<()> {
    let mut entries: Vec<u8> = Vec::with_capacity(partitions.len() * PARTITION_ENTRY_SIZE);
    for p in partitions {
        entries.write_u8(p.number)?;
        entries.write_u64::<LittleEndian>(p.first_block)?;
        entries.write_u64::<LittleEndian>(p.last_block)?;
    }
    w.write_u32::<LittleEndian>(BlockKind::TapePartition.tag())?;
    w.write_u8(partitions.len() as u8)?;
    w.write_u64::<LittleEndian>(entries.len() as u64)?;
    w.write_u64::<LittleEndian>(crc64(&entries))?;
    w.write_all(&entries)
}

pub fn read_partitions_block<R: Read>(mut r: R) -> io::Result<Vec<TapePartition>> {
    let count  = r.read_u8()? as usize;
    let length = r.read_u64::<LittleEndian>()?;
    let crc    = r.read_u64::<LittleEndian>()?;
    if length != (count * PARTITION_ENTRY_SIZE) as u64 {
        return Err(invalid_data("tape partition block length mismatch"));
    }
    let entries = read_payload(&mut r, length)?;
    if crc64(&entries) != crc {
        return Err(invalid_data("tape partition block checksum mismatch"));
    }
    let mut cur = &entries[..];
    (0..count)
        .map(|_| -> io::Result<TapePartition> {
            Ok(TapePartition {
                number:      cur.read_u8()?,
                first_block: cur.read_u64::<LittleEndian>()?,
                last_block:  cur.read_u64::<LittleEndian>()?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn files_round_trip() {
        let files = vec![
            TapeFile { file: 0, partition: 0, first_block: 0, last_block: 99 },
            TapeFile { file: 1, partition: 0, first_block: 100, last_block: 149 },
        ];
        let mut buf = Vec::new();
        write_files_block(&mut buf, &files).unwrap();
        assert_eq!(read_files_block(Cursor::new(&buf[4..])).unwrap(), files);
    }

    #[test]
    fn partitions_round_trip() {
        let parts = vec![TapePartition { number: 0, first_block: 0, last_block: 149 }];
        let mut buf = Vec::new();
        write_partitions_block(&mut buf, &parts).unwrap();
        assert_eq!(read_partitions_block(Cursor::new(&buf[4..])).unwrap(), parts);
    }

    #[test]
    fn huge_declared_length_without_data_is_truncated() {
        let count = u32::MAX;
        let mut buf = Vec::new();
        buf.extend_from_slice(&count.to_le_bytes());
        buf.extend_from_slice(&(count as u64 * FILE_ENTRY_SIZE as u64).to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        let err = read_files_block(Cursor::new(&buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
