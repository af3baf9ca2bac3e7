//! Integrity primitives.
//!
//! * [`crc64`] guards every block payload.
//! * [`content_hash`] keys the write-path deduplication map.
//! * [`ImageDigests`] accumulates the optional whole-image digests that end
//!   up in the checksum block on close.

pub mod crc64;
pub mod spamsum;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::io::{self, Read, Write};

use crate::block::BlockKind;
pub use crc64::{crc64, Crc64};
pub use spamsum::SpamSum;

/// BLAKE3 of the sector bytes.  Identical content ⇒ identical key.
pub fn content_hash(data: &[u8]) -> [u8; 32] {
    blake3::hash(data).into()
}

// ── Digest selection ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum ChecksumAlgorithm {
    Md5     = 1,
    Sha1    = 2,
    Sha256  = 3,
    SpamSum = 4,
}

impl ChecksumAlgorithm {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Md5),
            2 => Some(Self::Sha1),
            3 => Some(Self::Sha256),
            4 => Some(Self::SpamSum),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Md5     => "md5",
            Self::Sha1    => "sha1",
            Self::Sha256  => "sha256",
            Self::SpamSum => "spamsum",
        }
    }
}

/// Which whole-image digests to compute while writing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DigestSelection {
    pub md5:     bool,
    pub sha1:    bool,
    pub sha256:  bool,
    pub spamsum: bool,
}

impl DigestSelection {
    pub fn any(&self) -> bool {
        self.md5 || self.sha1 || self.sha256 || self.spamsum
    }
}

/// Running whole-image digests over user data in LBA order.
pub struct ImageDigests {
    md5:     Option<md5::Context>,
    sha1:    Option<Sha1>,
    sha256:  Option<Sha256>,
    spamsum: Option<SpamSum>,
}

impl ImageDigests {
    /// `None` when nothing is selected.
    pub fn new(selection: DigestSelection) -> Option<Self> {
        if !selection.any() {
            return None;
        }
        Some(Self {
            md5:     selection.md5.then(md5::Context::new),
            sha1:    selection.sha1.then(Sha1::new),
            sha256:  selection.sha256.then(Sha256::new),
            spamsum: selection.spamsum.then(SpamSum::new),
        })
    }

    pub fn update(&mut self, data: &[u8]) {
        if let Some(ctx) = &mut self.md5     { ctx.consume(data); }
        if let Some(ctx) = &mut self.sha1    { ctx.update(data); }
        if let Some(ctx) = &mut self.sha256  { ctx.update(data); }
        if let Some(ctx) = &mut self.spamsum { ctx.update(data); }
    }

    pub fn finalize(self) -> Vec<ChecksumEntry> {
        let mut out = Vec::new();
        if let Some(ctx) = self.md5 {
            out.push(ChecksumEntry::new(ChecksumAlgorithm::Md5, ctx.compute().0.to_vec()));
        }
        if let Some(ctx) = self.sha1 {
            out.push(ChecksumEntry::new(ChecksumAlgorithm::Sha1, ctx.finalize().to_vec()));
        }
        if let Some(ctx) = self.sha256 {
            out.push(ChecksumEntry::new(ChecksumAlgorithm::Sha256, ctx.finalize().to_vec()));
        }
        if let Some(ctx) = self.spamsum {
            out.push(ChecksumEntry::new(ChecksumAlgorithm::SpamSum, ctx.finalize().into_bytes()));
        }
        out
    }
}

// ── Checksum block ───────────────────────────────────────────────────────────

/// One stored digest.  SpamSum values are ASCII, the rest raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumEntry {
    pub algorithm: ChecksumAlgorithm,
    pub value:     Vec<u8>,
}

impl ChecksumEntry {
    pub fn new(algorithm: ChecksumAlgorithm, value: Vec<u8>) -> Self {
        Self { algorithm, value }
    }

    /// Hex for binary digests, the digest string for SpamSum.
    pub fn display_value(&self) -> String {
        match self.algorithm {
            ChecksumAlgorithm::SpamSum => String::from_utf8_lossy(&self.value).into_owned(),
            _ => hex::encode(&self.value),
        }
    }
}

/// `kind u32 · length u32 · count u8` then `(algorithm u8, length u32, bytes)`.
pub fn write_checksum_block<W: Write>(mut w: W, entries: &[ChecksumEntry]) -> io::Result<()> {
    let length: usize = entries.iter().map(|e| 5 + e.value.len()).sum();
    w.write_u32::<LittleEndian>(BlockKind::Checksum.tag())?;
    w.write_u32::<LittleEndian>(length as u32)?;
    w.write_u8(entries.len() as u8)?;
    for e in entries {
        w.write_u8(e.algorithm as u8)?;
        w.write_u32::<LittleEndian>(e.value.len() as u32)?;
        w.write_all(&e.value)?;
    }
    Ok(())
}

/// Reads a checksum block whose kind tag was already consumed.  Entries with
/// an unknown algorithm are dropped.
pub fn read_checksum_block<R: Read>(mut r: R) -> io::Result<Vec<ChecksumEntry>> {
    let length = r.read_u32::<LittleEndian>()? as usize;
    let count  = r.read_u8()?;
    let mut consumed = 0usize;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let algorithm = r.read_u8()?;
        let len = r.read_u32::<LittleEndian>()? as usize;
        consumed += 5 + len;
        if consumed > length {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "checksum entry overruns block"));
        }
        let mut value = vec![0u8; len];
        r.read_exact(&mut value)?;
        if let Some(algorithm) = ChecksumAlgorithm::from_u8(algorithm) {
            out.push(ChecksumEntry { algorithm, value });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn nothing_selected_yields_none() {
        assert!(ImageDigests::new(DigestSelection::default()).is_none());
    }

    #[test]
    fn digests_match_known_vectors() {
        let sel = DigestSelection { md5: true, sha1: true, sha256: true, spamsum: true };
        let mut d = ImageDigests::new(sel).unwrap();
        d.update(b"ab");
        d.update(b"c");
        let entries = d.finalize();
        assert_eq!(entries[0].display_value(), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(entries[1].display_value(), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(
            entries[2].display_value(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(entries[3].algorithm, ChecksumAlgorithm::SpamSum);
    }

    #[test]
    fn checksum_block_round_trip() {
        let entries = vec![
            ChecksumEntry::new(ChecksumAlgorithm::Md5, vec![1; 16]),
            ChecksumEntry::new(ChecksumAlgorithm::SpamSum, b"3::".to_vec()),
        ];
        let mut buf = Vec::new();
        write_checksum_block(&mut buf, &entries).unwrap();
        let mut cur = Cursor::new(&buf[4..]);
        assert_eq!(read_checksum_block(&mut cur).unwrap(), entries);
    }
}
