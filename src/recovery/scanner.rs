//! Index-bypass recovery scanner: walk an image block by block without the
//! index.
//!
//! # How it works
//!
//! The scanner reads forward from `HEADER_SIZE` (offset 72).  At each
//! position it reads a kind tag and, when the tag is one this crate writes,
//! parses the block with the same reader `open` uses and checks its CRC64.
//! Every block is self-describing, so the walk needs no prior state.  Bytes
//! that do not start a recognisable block are skipped one at a time and
//! reported as a single garbage region per run.
//!
//! ## Block health
//!
//! | Health | Meaning |
//! |--------|---------|
//! | `Healthy` | header parsed, payload CRC64 matches |
//! | `Truncated` | fewer bytes follow than the header declares |
//! | `PayloadCorrupt` | stored-payload CRC64 differs from the header |
//! | `UnknownCompression` | payload intact, compression code not in this build |
//! | `Malformed` | table block whose own checks failed |
//!
//! ## Quality
//!
//! | Quality | Meaning |
//! |---------|---------|
//! | `Full` | every block healthy, trailer index valid and covering them |
//! | `Unindexed` | every block healthy but the trailer is missing or stale |
//! | `Partial` | damage present, at least half the blocks healthy |
//! | `Catastrophic` | no header, no blocks, or mostly damage |
//!
//! ## Progress
//!
//! `scan()` takes an optional callback called after every block with
//! `(bytes_scanned, image_length)`.

use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;
use std::collections::HashSet;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::block::{
    read_payload, BlockKind, DataBlockHeader, DataKind, DdtHeader, DATA_BLOCK_HEADER_SIZE, DDT_HEADER_SIZE,
};
use crate::checksum::{crc64, read_checksum_block};
use crate::codec::CompressionKind;
use crate::header::{ImageHeader, HEADER_SIZE};
use crate::index::{Index, IndexError};
use crate::media::dump::read_dump_hardware_block;
use crate::media::tape::{read_files_block, read_partitions_block};
use crate::media::track::read_tracks_block;
use crate::media::{Geometry, Metadata};

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BlockHealth {
    Healthy,
    Truncated { declared: u64, available: u64 },
    PayloadCorrupt { stored: u64, computed: u64 },
    UnknownCompression(u16),
    Malformed(String),
}

impl BlockHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, BlockHealth::Healthy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScannedBlock {
    pub offset:    u64,
    pub kind:      BlockKind,
    /// `NO_DATA` for blocks that carry no data kind.
    pub data_kind: DataKind,
    /// Bytes from the kind tag to the end of the payload.
    pub length:    u64,
    pub health:    BlockHealth,
}

/// A run of bytes that starts no recognisable block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GarbageRegion {
    pub offset: u64,
    pub length: u64,
}

/// What the header says about the index written on close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TrailerStatus {
    Valid { offset: u64, entries: usize },
    /// Index offset 0: the image was never closed.
    NotWritten,
    Corrupt { offset: u64, reason: String },
    /// The header itself is unreadable.
    NoHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecoveryQuality {
    Full,
    Unindexed,
    Partial,
    Catastrophic,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    #[serde(skip)]
    pub header:           Option<ImageHeader>,
    pub image_length:     u64,
    pub blocks:           Vec<ScannedBlock>,
    pub garbage:          Vec<GarbageRegion>,
    pub trailer:          TrailerStatus,
    /// Healthy blocks the trailer index does not list.
    pub unindexed_blocks: usize,
    pub quality:          RecoveryQuality,
}

impl RecoveryReport {
    pub fn healthy_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| b.health.is_healthy()).count()
    }

    /// Percentage of scanned regions that are healthy blocks (0.0–100.0).
    pub fn health_pct(&self) -> f64 {
        let total = self.blocks.len() + self.garbage.len();
        if total == 0 {
            return 0.0;
        }
        self.healthy_blocks() as f64 / total as f64 * 100.0
    }

    /// Sectors' worth of user data held by healthy Data Blocks.
    pub fn user_data_blocks(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.kind == BlockKind::Data && b.data_kind == DataKind::USER_DATA && b.health.is_healthy())
            .count()
    }

    pub fn summary(&self) -> String {
        let garbage: u64 = self.garbage.iter().map(|g| g.length).sum();
        format!(
            "{:?} recovery: {}/{} blocks healthy ({:.1}%), {} user data block(s), {} garbage byte(s), trailer {}",
            self.quality,
            self.healthy_blocks(),
            self.blocks.len(),
            self.health_pct(),
            self.user_data_blocks(),
            garbage,
            match &self.trailer {
                TrailerStatus::Valid { entries, .. } => format!("valid ({entries} entries)"),
                TrailerStatus::NotWritten => "not written".to_string(),
                TrailerStatus::Corrupt { reason, .. } => format!("corrupt ({reason})"),
                TrailerStatus::NoHeader => "unknown (no header)".to_string(),
            },
        )
    }
}

// ── Scanner ──────────────────────────────────────────────────────────────────

/// What starts at one position.
enum Candidate {
    Block(ScannedBlock),
    /// Nothing recognisable starts here.
    Miss,
}

/// Scan an image without using its index.
///
/// Corrupt data never produces `Err`: damage is encoded in the report.  Only
/// genuine I/O errors propagate.
pub fn scan<R, F>(reader: &mut R, mut progress: Option<&mut F>) -> io::Result<RecoveryReport>
where
    R: Read + Seek,
    F: FnMut(u64, u64),
{
    let image_length = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;
    let header = ImageHeader::read(&mut *reader).ok();

    let mut blocks: Vec<ScannedBlock> = Vec::new();
    let mut garbage: Vec<GarbageRegion> = Vec::new();
    let mut pos = HEADER_SIZE as u64;

    while pos < image_length {
        match examine(reader, pos, image_length)? {
            Candidate::Block(block) => {
                pos += block.length.max(1);
                blocks.push(block);
            }
            Candidate::Miss => {
                match garbage.last_mut() {
                    Some(g) if g.offset + g.length == pos => g.length += 1,
                    _ => garbage.push(GarbageRegion { offset: pos, length: 1 }),
                }
                pos += 1;
            }
        }
        if let Some(ref mut cb) = progress {
            cb(pos.min(image_length), image_length);
        }
    }

    let trailer = match &header {
        None => TrailerStatus::NoHeader,
        Some(h) if h.index_offset == 0 => TrailerStatus::NotWritten,
        Some(h) => {
            reader.seek(SeekFrom::Start(h.index_offset))?;
            match Index::read(&mut *reader) {
                Ok(index) => TrailerStatus::Valid { offset: h.index_offset, entries: index.len() },
                Err(IndexError::Io(e)) if !is_damage(&e) => return Err(e),
                Err(e) => TrailerStatus::Corrupt { offset: h.index_offset, reason: e.to_string() },
            }
        }
    };

    let unindexed_blocks = match (&header, &trailer) {
        (Some(h), TrailerStatus::Valid { .. }) => {
            reader.seek(SeekFrom::Start(h.index_offset))?;
            let listed: HashSet<u64> = Index::read(&mut *reader)
                .map(|i| i.iter().map(|e| e.offset).collect())
                .unwrap_or_default();
            blocks
                .iter()
                .filter(|b| b.health.is_healthy())
                .filter(|b| !matches!(b.kind, BlockKind::Index | BlockKind::Index2))
                .filter(|b| !listed.contains(&b.offset))
                .count()
        }
        _ => 0,
    };

    let healthy = blocks.iter().filter(|b| b.health.is_healthy()).count();
    let damaged = blocks.len() - healthy + garbage.len();
    let quality = if header.is_none() || blocks.is_empty() {
        RecoveryQuality::Catastrophic
    } else if damaged == 0 {
        match trailer {
            TrailerStatus::Valid { .. } if unindexed_blocks == 0 => RecoveryQuality::Full,
            _ => RecoveryQuality::Unindexed,
        }
    } else if healthy * 2 >= healthy + damaged {
        RecoveryQuality::Partial
    } else {
        RecoveryQuality::Catastrophic
    };

    Ok(RecoveryReport { header, image_length, blocks, garbage, trailer, unindexed_blocks, quality })
}

/// Convenience: scan the image at `path`.
pub fn scan_file(path: &Path) -> io::Result<RecoveryReport> {
    let mut f = io::BufReader::new(std::fs::File::open(path)?);
    scan::<_, fn(u64, u64)>(&mut f, None)
}

fn is_damage(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof)
}

fn examine<R: Read + Seek>(r: &mut R, pos: u64, image_length: u64) -> io::Result<Candidate> {
    if image_length - pos < 4 {
        return Ok(Candidate::Miss);
    }
    r.seek(SeekFrom::Start(pos))?;
    let Some(kind) = BlockKind::from_tag(r.read_u32::<LittleEndian>()?) else {
        return Ok(Candidate::Miss);
    };
    let block = |data_kind: DataKind, length: u64, health: BlockHealth| {
        Candidate::Block(ScannedBlock { offset: pos, kind, data_kind, length, health })
    };

    match kind {
        BlockKind::Data | BlockKind::DeduplicationTable => {
            let parsed = match kind {
                BlockKind::Data => DataBlockHeader::read_after_tag(&mut *r).map(|h| {
                    (h.data_kind, h.compression, h.cmp_length as u64, h.cmp_crc64, DATA_BLOCK_HEADER_SIZE)
                }),
                _ => DdtHeader::read_after_tag(&mut *r)
                    .map(|h| (h.data_kind, h.compression, h.cmp_length, h.cmp_crc64, DDT_HEADER_SIZE)),
            };
            let (data_kind, compression, declared, stored, header_size) = match parsed {
                Ok(v) => v,
                Err(e) if is_damage(&e) => return Ok(Candidate::Miss),
                Err(e) => return Err(e),
            };
            let payload_at = pos + header_size as u64;
            let available = image_length.saturating_sub(payload_at);
            if available < declared {
                let health = BlockHealth::Truncated { declared, available };
                return Ok(block(data_kind, header_size as u64 + available, health));
            }
            let payload = read_payload(&mut *r, declared)?;
            let computed = crc64(&payload);
            let health = if computed != stored {
                BlockHealth::PayloadCorrupt { stored, computed }
            } else if CompressionKind::from_u16(compression).is_none() {
                BlockHealth::UnknownCompression(compression)
            } else {
                BlockHealth::Healthy
            };
            Ok(block(data_kind, header_size as u64 + declared, health))
        }
        BlockKind::Index | BlockKind::Index2 => {
            r.seek(SeekFrom::Start(pos))?;
            let health = match Index::read(&mut *r) {
                Ok(_) => BlockHealth::Healthy,
                Err(IndexError::ChecksumMismatch { stored, computed }) => {
                    BlockHealth::PayloadCorrupt { stored, computed }
                }
                Err(IndexError::Io(e)) if !is_damage(&e) => return Err(e),
                Err(_) => return Ok(Candidate::Miss),
            };
            let end = r.stream_position()?;
            Ok(block(DataKind::NO_DATA, end - pos, health))
        }
        _ => {
            let parsed = match kind {
                BlockKind::Geometry      => Geometry::read_after_tag(&mut *r).map(drop),
                BlockKind::Metadata      => Metadata::read_after_tag(&mut *r).map(drop),
                BlockKind::Tracks        => read_tracks_block(&mut *r).map(drop),
                BlockKind::Checksum      => read_checksum_block(&mut *r).map(drop),
                BlockKind::DumpHardware  => read_dump_hardware_block(&mut *r).map(drop),
                BlockKind::TapeFile      => read_files_block(&mut *r).map(drop),
                BlockKind::TapePartition => read_partitions_block(&mut *r).map(drop),
                // layouts this crate never writes
                _ => return Ok(Candidate::Miss),
            };
            let end = r.stream_position()?;
            match parsed {
                Ok(()) => Ok(block(DataKind::NO_DATA, end - pos, BlockHealth::Healthy)),
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    Ok(block(DataKind::NO_DATA, end - pos, BlockHealth::Malformed(e.to_string())))
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(Candidate::Miss),
                Err(e) => Err(e),
            }
        }
    }
}
