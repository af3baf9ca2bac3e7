//! The image: one seekable stream holding header, blocks, DDT and index.
//!
//! [`Image`] owns the stream and every cache built over it.  Read operations
//! need `Read + Seek`; an image made by [`Image::create`] additionally needs
//! `Write` and stays writable until [`Image::close`], which writes the side
//! tables, the DDT, the index and finally rewrites the header.
//!
//! The type is single-threaded by construction: every operation takes
//! `&mut self` and moves one shared stream cursor.

mod close;
mod open;
pub mod options;
mod read;
pub mod verify;
mod write;

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;
use thiserror::Error;

use chrono::{DateTime, Utc};

use crate::block::{DataBlockHeader, DataKind};
use crate::cache::GenerationalCache;
use crate::cd::FixupTable;
use crate::checksum::{ChecksumEntry, ImageDigests};
use crate::codec::{CodecError, CompressionKind};
use crate::ddt::Ddt;
use crate::header::{HeaderError, ImageHeader};
use crate::index::{Index, IndexError};
use crate::media::{DumpHardware, Geometry, MediaType, Metadata, TapeFile, TapePartition, Track, TrackType};

pub use options::{CreateOptions, ReadOptions};
pub use verify::{BlockFailure, VerifyProblem, VerifyReport};

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Header error: {0}")]
    Header(#[from] HeaderError),
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Image has no index; it was never closed")]
    IndexNotFound,
    #[error("Image has no user data deduplication table")]
    MissingUserDdt,
    #[error("Sector {lba} is out of range (image has {sectors} sectors)")]
    OutOfRange { lba: u64, sectors: u64 },
    #[error("Reading {count} sectors at offset {offset} crosses the end of track {track}")]
    CrossesTrackEnd { track: u8, offset: u64, count: u64 },
    #[error("Track {0} does not exist")]
    NoSuchTrack(u8),
    #[error("Sector {0} is not inside any track")]
    NoTrack(u64),
    #[error("Image is read-only")]
    ReadOnly,
    #[error("Sector {lba} data is {actual} bytes, expected {expected}")]
    WrongSectorLength { lba: u64, expected: usize, actual: usize },
    #[error("Long sector data is {actual} bytes, expected {expected}")]
    WrongLongSectorLength { expected: usize, actual: usize },
    #[error("Sector tag {0} is not available here")]
    UnsupportedSectorTag(SectorTag),
    #[error("Sector tag {tag} takes {expected} bytes, got {actual}")]
    WrongTagLength { tag: SectorTag, expected: usize, actual: usize },
    #[error("Block at offset {offset} is corrupt: {reason}")]
    CorruptBlock { offset: u64, reason: String },
    #[error("CD side stream exceeds the fixup pointer range")]
    SideStreamFull,
    #[error("Offset {offset} is beyond what a {sectors_per_block}-sector block entry can address")]
    OffsetOutOfRange { offset: u64, sectors_per_block: u64 },
    #[error("Data block of {0} bytes exceeds the 32-bit length field")]
    BlockTooLarge(u64),
    #[error("Invalid option: {0}")]
    InvalidOption(String),
    #[error("Invalid tracks: {0}")]
    InvalidTracks(String),
    #[error("{0} is not a media tag")]
    NotAMediaTag(DataKind),
    #[error("Media tag {0} is not present")]
    MediaTagNotFound(DataKind),
}

/// Outcome of loading one index entry on open: fatal problems are `Err`,
/// problems confined to that block are `Skip`.
#[derive(Debug)]
pub enum Scan<T> {
    Keep(T),
    Skip(String),
}

// ── Sector tags ──────────────────────────────────────────────────────────────

/// Parts of a raw CD sector addressable on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SectorTag {
    Sync,
    Header,
    SubHeader,
    Edc,
    Ecc,
    EccP,
    EccQ,
    Subchannel,
}

impl SectorTag {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sync"       => Some(Self::Sync),
            "header"     => Some(Self::Header),
            "subheader"  => Some(Self::SubHeader),
            "edc"        => Some(Self::Edc),
            "ecc"        => Some(Self::Ecc),
            "ecc-p"      => Some(Self::EccP),
            "ecc-q"      => Some(Self::EccQ),
            "subchannel" => Some(Self::Subchannel),
            _            => None,
        }
    }
}

impl fmt::Display for SectorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Summary ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ImageInfo {
    pub application:         String,
    pub application_version: String,
    pub format_version:      String,
    pub media_type:          MediaType,
    pub media_type_name:     String,
    pub creation_time:       DateTime<Utc>,
    pub last_written_time:   DateTime<Utc>,
    pub sectors:             u64,
    pub sector_size:         u32,
    pub sectors_per_block:   u64,
    pub ddt_on_disk:         bool,
    pub blocks:              usize,
    pub media_tags:          Vec<DataKind>,
    pub has_subchannel:      bool,
    pub has_raw_cd_data:     bool,
    pub tracks:              Vec<Track>,
    pub geometry:            Option<Geometry>,
    pub metadata:            Metadata,
    pub dump_hardware:       Vec<DumpHardware>,
    pub tape_files:          Vec<TapeFile>,
    pub tape_partitions:     Vec<TapePartition>,
    pub checksums:           Vec<ChecksumEntry>,
}

// ── Image ────────────────────────────────────────────────────────────────────

/// Decompressed Data Block held by the read cache.
pub(crate) struct CachedBlock {
    header: DataBlockHeader,
    data:   Vec<u8>,
}

/// CD-only per-sector side tables.
pub(crate) struct CdTables {
    prefix:     FixupTable,
    suffix:     FixupTable,
    /// 8 bytes per sector, allocated on the first Mode 2 long write.
    subheaders: Option<Vec<u8>>,
    /// 96 bytes per sector, allocated on the first subchannel write.
    subchannel: Option<Vec<u8>>,
}

impl CdTables {
    fn new(sectors: u64) -> Self {
        Self {
            prefix:     FixupTable::prefix(sectors),
            suffix:     FixupTable::suffix(sectors),
            subheaders: None,
            subchannel: None,
        }
    }
}

/// The open accumulation buffer.
pub(crate) struct BlockBuffer {
    data:        Vec<u8>,
    sector_size: u32,
    compression: CompressionKind,
    sectors:     u64,
    /// Offset the block will be written at.
    position:    u64,
    /// `(lba, ddt value)` published once the block is on disk.
    pending:     Vec<(u64, u64)>,
}

impl Default for BlockBuffer {
    fn default() -> Self {
        Self {
            data:        Vec::new(),
            sector_size: 0,
            compression: CompressionKind::None,
            sectors:     0,
            position:    0,
            pending:     Vec::new(),
        }
    }
}

impl BlockBuffer {
    fn holds(&self, offset: u64) -> bool {
        self.sectors > 0 && self.position == offset
    }
}

/// State that exists only while a created image is being written.
pub(crate) struct WriteState {
    options:      CreateOptions,
    buffer:       BlockBuffer,
    /// Content hash → DDT value.
    dedup:        std::collections::HashMap<[u8; 32], u64>,
    digests:      Option<ImageDigests>,
    last_written: Option<u64>,
    /// Where the next block goes.
    append_at:    u64,
    /// Header offset of an on-disk user DDT.
    ddt_header:   Option<u64>,
}

pub struct Image<S> {
    stream:          S,
    header:          ImageHeader,
    index:           Index,
    total_sectors:   u64,
    sector_size:     u32,
    shift:           u8,
    ddt:             Ddt,
    block_cache:     GenerationalCache<CachedBlock>,
    tracks:          Vec<Track>,
    geometry:        Option<Geometry>,
    metadata:        Metadata,
    dump_hardware:   Vec<DumpHardware>,
    tape_files:      Vec<TapeFile>,
    tape_partitions: Vec<TapePartition>,
    checksums:       Vec<ChecksumEntry>,
    media_tags:      BTreeMap<DataKind, Vec<u8>>,
    cd:              Option<CdTables>,
    writer:          Option<WriteState>,
}

impl<S> Image<S> {
    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    pub fn media_type(&self) -> MediaType {
        self.header.media_type
    }

    pub fn sectors(&self) -> u64 {
        self.total_sectors
    }

    /// Declared sector size: the largest user data sector stored, or the
    /// size given at creation.
    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn sectors_per_block(&self) -> u64 {
        1 << self.shift
    }

    pub fn is_writable(&self) -> bool {
        self.writer.is_some()
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn geometry(&self) -> Option<Geometry> {
        self.geometry
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn dump_hardware(&self) -> &[DumpHardware] {
        &self.dump_hardware
    }

    pub fn tape_files(&self) -> &[TapeFile] {
        &self.tape_files
    }

    pub fn tape_partitions(&self) -> &[TapePartition] {
        &self.tape_partitions
    }

    /// Whole-image digests stored in the image, or computed by `close`.
    pub fn checksums(&self) -> &[ChecksumEntry] {
        &self.checksums
    }

    pub fn media_tags(&self) -> impl Iterator<Item = DataKind> + '_ {
        self.media_tags.keys().copied()
    }

    pub fn read_media_tag(&self, kind: DataKind) -> Result<&[u8], ImageError> {
        self.media_tags
            .get(&kind)
            .map(Vec::as_slice)
            .ok_or(ImageError::MediaTagNotFound(kind))
    }

    pub fn info(&self) -> ImageInfo {
        let has_raw_cd_data = self
            .cd
            .as_ref()
            .is_some_and(|cd| !cd.prefix.is_untouched() || !cd.suffix.is_untouched());
        ImageInfo {
            application:         self.header.application.clone(),
            application_version: format!("{}.{}", self.header.application_major, self.header.application_minor),
            format_version:      format!("{}.{}", self.header.format_major, self.header.format_minor),
            media_type:          self.header.media_type,
            media_type_name:     self.header.media_type.to_string(),
            creation_time:       self.header.creation_time,
            last_written_time:   self.header.last_written_time,
            sectors:             self.total_sectors,
            sector_size:         self.sector_size,
            sectors_per_block:   self.sectors_per_block(),
            ddt_on_disk:         self.ddt.is_on_disk(),
            blocks:              self.index.len(),
            media_tags:          self.media_tags().collect(),
            has_subchannel:      self.cd.as_ref().is_some_and(|cd| cd.subchannel.is_some()),
            has_raw_cd_data,
            tracks:              self.tracks.clone(),
            geometry:            self.geometry,
            metadata:            self.metadata.clone(),
            dump_hardware:       self.dump_hardware.clone(),
            tape_files:          self.tape_files.clone(),
            tape_partitions:     self.tape_partitions.clone(),
            checksums:           self.checksums.clone(),
        }
    }

    /// Give the stream back without finishing anything.
    pub fn into_inner(self) -> S {
        self.stream
    }

    pub(crate) fn track_for(&self, lba: u64) -> Option<&Track> {
        self.tracks.iter().find(|t| t.contains(lba))
    }

    /// Track type governing `lba` on CD media.
    pub(crate) fn cd_track_type(&self, lba: u64) -> Option<TrackType> {
        if !self.header.media_type.is_compact_disc() {
            return None;
        }
        self.track_for(lba).map(|t| t.track_type)
    }

    /// Size of a never-written sector as returned by `read_sector`.
    pub(crate) fn declared_size(&self, lba: u64) -> usize {
        match self.cd_track_type(lba) {
            Some(t) => t.user_data_size(),
            None => self.sector_size as usize,
        }
    }

    pub(crate) fn check_range(&self, lba: u64) -> Result<(), ImageError> {
        if lba >= self.total_sectors {
            return Err(ImageError::OutOfRange { lba, sectors: self.total_sectors });
        }
        Ok(())
    }

    /// Drop every cached block and cached DDT entry.
    pub fn flush_caches(&mut self) {
        self.block_cache.flush();
        self.ddt.flush_cache();
    }
}

impl Image<File> {
    /// Create a new image file, truncating any existing one.
    pub fn create_path<P: AsRef<Path>>(
        path:          P,
        media_type:    MediaType,
        options:       CreateOptions,
        total_sectors: u64,
        sector_size:   u32,
    ) -> Result<Self, ImageError> {
        let file = File::options().read(true).write(true).create(true).truncate(true).open(path)?;
        Self::create(file, media_type, options, total_sectors, sector_size)
    }

    /// Open an image file read-only.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        Self::open(File::open(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn opts(spb: u32) -> CreateOptions {
        CreateOptions { sectors_per_block: spb, ..Default::default() }
    }

    fn sector(seed: u8, len: usize) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn zero_sector_skips_block_cache() {
        let mut img = Image::create(Cursor::new(Vec::new()), MediaType::GENERIC_HDD, opts(4), 8, 512).unwrap();
        img.write_sector(1, &sector(1, 512)).unwrap();
        let bytes = img.close().unwrap().into_inner();

        let mut img = Image::open(Cursor::new(bytes)).unwrap();
        assert_eq!(img.ddt.get(&mut img.stream, 6).unwrap(), 0);
        assert_eq!(img.read_sector(6).unwrap(), vec![0u8; 512]);
        assert!(img.block_cache.is_empty());
        assert_eq!(img.read_sector(1).unwrap(), sector(1, 512));
        assert_eq!(img.block_cache.len(), 1);
    }

    #[test]
    fn evicted_blocks_are_decompressed_again() {
        let mut img = Image::create(Cursor::new(Vec::new()), MediaType::GENERIC_HDD, opts(2), 8, 512).unwrap();
        for lba in 0..8 {
            img.write_sector(lba, &sector(lba as u8 + 1, 512)).unwrap();
        }
        let bytes = img.close().unwrap().into_inner();

        // room for exactly one decompressed block
        let read = ReadOptions { max_cache_bytes: 1024 + 64, ..Default::default() };
        let mut img = Image::open_with(Cursor::new(bytes), read).unwrap();
        assert_eq!(img.read_sector(0).unwrap(), sector(1, 512));
        assert_eq!(img.read_sector(7).unwrap(), sector(8, 512));
        assert_eq!(img.block_cache.flushes(), 1);
        assert_eq!(img.read_sector(1).unwrap(), sector(2, 512));
        assert_eq!(img.block_cache.flushes(), 2);

        img.flush_caches();
        assert!(img.block_cache.is_empty());
        assert_eq!(img.read_sector(6).unwrap(), sector(7, 512));
    }

    #[test]
    fn pending_entries_publish_on_flush() {
        let mut img = Image::create(Cursor::new(Vec::new()), MediaType::GENERIC_HDD, opts(4), 8, 512).unwrap();
        img.write_sector(0, &sector(9, 512)).unwrap();
        // still buffered: not visible yet
        assert_eq!(img.ddt.get(&mut img.stream, 0).unwrap(), 0);
        assert_eq!(img.read_sector(0).unwrap(), vec![0u8; 512]);
        img.flush_buffer().unwrap();
        assert_ne!(img.ddt.get(&mut img.stream, 0).unwrap(), 0);
        assert_eq!(img.read_sector(0).unwrap(), sector(9, 512));
    }
}
