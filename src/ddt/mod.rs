//! Deduplication Table: LBA → `(block offset, index within block)`.
//!
//! Each entry is `(offset << shift) | index`, with `shift = log2(sectors per
//! block)`.  Zero means the sector was never written.  The table lives either
//! in memory, or uncompressed on disk where every entry sits at
//! `base + lba * 8` and is patched in place.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::block::{encode_payload, DataKind, DdtHeader, EncodedPayload};
use crate::cache::GenerationalCache;
use crate::checksum::Crc64;
use crate::codec::{CodecError, CompressionKind};

pub const DDT_ENTRY_SIZE: usize = 8;

/// Smallest shift whose block capacity holds `sectors_per_block`.
pub fn shift_for(sectors_per_block: u32) -> u8 {
    sectors_per_block.max(1).next_power_of_two().trailing_zeros() as u8
}

/// `None` when `offset` does not fit above the `shift` index bits.
pub fn encode_entry(offset: u64, index: u64, shift: u8) -> Option<u64> {
    (offset <= u64::MAX >> shift).then(|| (offset << shift) | index)
}

pub fn decode_entry(value: u64, shift: u8) -> (u64, u64) {
    let mask = (1u64 << shift) - 1;
    (value >> shift, value & mask)
}

enum Storage {
    Memory(Vec<u64>),
    Disk {
        base:  u64,
        cache: GenerationalCache<u64>,
    },
}

pub struct Ddt {
    shift:   u8,
    entries: u64,
    storage: Storage,
}

impl Ddt {
    pub fn in_memory(entries: u64, shift: u8) -> Self {
        Self { shift, entries, storage: Storage::Memory(vec![0; entries as usize]) }
    }

    /// Table decoded from a DDT block payload.
    pub fn from_bytes(bytes: &[u8], shift: u8) -> Self {
        let table: Vec<u64> = bytes.chunks_exact(DDT_ENTRY_SIZE).map(LittleEndian::read_u64).collect();
        Self { shift, entries: table.len() as u64, storage: Storage::Memory(table) }
    }

    /// Entries stored verbatim starting at byte `base` of the stream.
    pub fn on_disk(base: u64, entries: u64, shift: u8, cache_entries: usize) -> Self {
        Self {
            shift,
            entries,
            storage: Storage::Disk { base, cache: GenerationalCache::new("ddt", cache_entries) },
        }
    }

    pub fn shift(&self) -> u8 {
        self.shift
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn is_on_disk(&self) -> bool {
        matches!(self.storage, Storage::Disk { .. })
    }

    pub fn get<S: Read + Seek>(&mut self, stream: &mut S, lba: u64) -> io::Result<u64> {
        if lba >= self.entries {
            return Ok(0);
        }
        match &mut self.storage {
            Storage::Memory(table) => Ok(table[lba as usize]),
            Storage::Disk { base, cache } => {
                if let Some(&v) = cache.get(lba) {
                    return Ok(v);
                }
                stream.seek(SeekFrom::Start(*base + lba * DDT_ENTRY_SIZE as u64))?;
                let v = stream.read_u64::<LittleEndian>()?;
                cache.insert(lba, v, 1);
                Ok(v)
            }
        }
    }

    pub fn set<S: Write + Seek>(&mut self, stream: &mut S, lba: u64, value: u64) -> io::Result<()> {
        if lba >= self.entries {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("DDT has no entry {lba}")));
        }
        match &mut self.storage {
            Storage::Memory(table) => table[lba as usize] = value,
            Storage::Disk { base, cache } => {
                stream.seek(SeekFrom::Start(*base + lba * DDT_ENTRY_SIZE as u64))?;
                stream.write_u64::<LittleEndian>(value)?;
                cache.insert(lba, value, 1);
            }
        }
        Ok(())
    }

    /// Serialized entries of an in-memory table.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match &self.storage {
            Storage::Memory(table) => {
                let mut out = vec![0u8; table.len() * DDT_ENTRY_SIZE];
                LittleEndian::write_u64_into(table, &mut out);
                Some(out)
            }
            Storage::Disk { .. } => None,
        }
    }

    pub fn flush_cache(&mut self) {
        if let Storage::Disk { cache, .. } = &mut self.storage {
            cache.flush();
        }
    }

    pub fn cache_flushes(&self) -> u64 {
        match &self.storage {
            Storage::Disk { cache, .. } => cache.flushes(),
            Storage::Memory(_) => 0,
        }
    }
}

// ── Block framing ────────────────────────────────────────────────────────────

/// Compress a table payload and build its header.
pub fn encode_table(
    data_kind: DataKind,
    shift:     u8,
    entries:   u64,
    raw:       &[u8],
    requested: CompressionKind,
) -> Result<(DdtHeader, Vec<u8>), CodecError> {
    let EncodedPayload { compression, payload, length, crc64, cmp_crc64 } = encode_payload(raw, requested)?;
    let header = DdtHeader {
        data_kind,
        compression: compression as u16,
        shift,
        entries,
        cmp_length: payload.len() as u64,
        length:     length as u64,
        cmp_crc64,
        crc64,
    };
    Ok((header, payload))
}

/// Reserve an uncompressed on-disk table at the current stream position:
/// a header followed by `entries` zero entries.  Returns the header offset.
pub fn reserve_on_disk<W: Write + Seek>(w: &mut W, shift: u8, entries: u64) -> io::Result<u64> {
    let at = w.stream_position()?;
    let length = entries * DDT_ENTRY_SIZE as u64;
    DdtHeader {
        data_kind:   DataKind::USER_DATA,
        compression: CompressionKind::None as u16,
        shift,
        entries,
        cmp_length:  length,
        length,
        cmp_crc64:   0,
        crc64:       0,
    }
    .write(&mut *w)?;
    let zeros = vec![0u8; 1 << 20];
    let mut left = length;
    while left > 0 {
        let n = left.min(zeros.len() as u64) as usize;
        w.write_all(&zeros[..n])?;
        left -= n as u64;
    }
    Ok(at)
}

/// Recompute the CRCs of an on-disk table and rewrite its header.
pub fn finalize_on_disk<S: Read + Write + Seek>(s: &mut S, header_offset: u64) -> io::Result<()> {
    s.seek(SeekFrom::Start(header_offset))?;
    let mut header = DdtHeader::read(&mut *s)?;
    let mut crc = Crc64::new();
    let mut buf = vec![0u8; 1 << 20];
    let mut left = header.length;
    while left > 0 {
        let n = left.min(buf.len() as u64) as usize;
        s.read_exact(&mut buf[..n])?;
        crc.update(&buf[..n]);
        left -= n as u64;
    }
    let crc = crc.finalize();
    header.crc64     = crc;
    header.cmp_crc64 = crc;
    s.seek(SeekFrom::Start(header_offset))?;
    header.write(&mut *s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn shift_rounds_up_to_power_of_two() {
        assert_eq!(shift_for(1), 0);
        assert_eq!(shift_for(4096), 12);
        assert_eq!(shift_for(4097), 13);
        assert_eq!(shift_for(3), 2);
        assert_eq!(shift_for(0), 0);
    }

    #[test]
    fn in_memory_get_set() {
        let mut d = Ddt::in_memory(10, 4);
        let mut nothing = Cursor::new(Vec::<u8>::new());
        d.set(&mut nothing, 3, encode_entry(72, 5, 4).unwrap()).unwrap();
        assert_eq!(d.get(&mut nothing, 3).unwrap(), 72 << 4 | 5);
        assert_eq!(d.get(&mut nothing, 4).unwrap(), 0);
        assert!(d.set(&mut nothing, 10, 1).is_err());
        let back = Ddt::from_bytes(&d.to_bytes().unwrap(), 4);
        assert_eq!(back.entries(), 10);
    }

    #[test]
    fn on_disk_patches_in_place() {
        let mut s = Cursor::new(vec![0xEEu8; 8]);
        s.seek(SeekFrom::Start(8)).unwrap();
        let at = reserve_on_disk(&mut s, 3, 4).unwrap();
        assert_eq!(at, 8);
        let base = at + crate::block::DDT_HEADER_SIZE as u64;
        let mut d = Ddt::on_disk(base, 4, 3, 2);
        d.set(&mut s, 2, 0x1234).unwrap();
        let raw = s.get_ref();
        let pos = base as usize + 16;
        assert_eq!(&raw[pos..pos + 8], &0x1234u64.to_le_bytes());

        // a cold table sees the patch through the stream
        let mut cold = Ddt::on_disk(base, 4, 3, 2);
        assert_eq!(cold.get(&mut s, 2).unwrap(), 0x1234);
        assert_eq!(cold.get(&mut s, 0).unwrap(), 0);
        assert_eq!(cold.get(&mut s, 1).unwrap(), 0);
        assert_eq!(cold.cache_flushes(), 1);

        finalize_on_disk(&mut s, at).unwrap();
        s.seek(SeekFrom::Start(at)).unwrap();
        let h = DdtHeader::read(&mut s).unwrap();
        let entries = &s.get_ref()[base as usize..base as usize + 32];
        assert_eq!(h.crc64, crate::checksum::crc64(entries));
    }

    #[test]
    fn offset_beyond_entry_range_is_rejected() {
        assert_eq!(encode_entry(1 << 33, 0, 31), None);
        assert_eq!(encode_entry((1 << 33) - 1, 1, 31), Some(u64::MAX - (1 << 31) + 2));
    }

    proptest! {
        #[test]
        fn entry_encoding_is_invertible(shift in 0u8..32, offset in 0u64..(1u64 << 32), raw_index in any::<u64>()) {
            let index = raw_index & ((1u64 << shift) - 1);
            prop_assert_eq!(decode_entry(encode_entry(offset, index, shift).unwrap(), shift), (offset, index));
        }
    }
}
