//! Opening an existing image: header, index, then one pass over the index
//! loading the DDT and every side table.

use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom};
use tracing::{debug, info, warn};

use super::{CdTables, Image, ImageError, ReadOptions, Scan};
use crate::block::{
    decode_payload, read_payload, tag_to_string, BlockKind, DataBlockHeader, DataKind, DdtHeader,
    DDT_HEADER_SIZE,
};
use crate::cache::GenerationalCache;
use crate::cd::sector::{PREFIX_SIZE, SUFFIX_SIZE};
use crate::cd::FixupTable;
use crate::checksum::{crc64, read_checksum_block, ChecksumEntry};
use crate::codec::CompressionKind;
use crate::ddt::{Ddt, DDT_ENTRY_SIZE};
use crate::header::ImageHeader;
use crate::index::{Index, IndexEntry};
use crate::media::dump::read_dump_hardware_block;
use crate::media::tape::{read_files_block, read_partitions_block};
use crate::media::track::read_tracks_block;
use crate::media::{DumpHardware, Geometry, Metadata, TapeFile, TapePartition, Track};

/// Unwrap a `Scan`, returning early from the enclosing loader on `Skip`.
macro_rules! keep {
    ($scan:expr) => {
        match $scan? {
            Scan::Keep(v) => v,
            Scan::Skip(reason) => return Ok(Scan::Skip(reason)),
        }
    };
}

/// Malformed or short data confines the damage to one block; anything else
/// is a real I/O failure.
fn soft<T>(result: io::Result<T>) -> Result<Scan<T>, ImageError> {
    match result {
        Ok(v) => Ok(Scan::Keep(v)),
        Err(e) if matches!(e.kind(), io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof) => {
            Ok(Scan::Skip(e.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Everything gathered while walking the index.
#[derive(Default)]
struct Loaded {
    user_ddt:         Option<Ddt>,
    sector_size:      u32,
    prefix_entries:   Option<Vec<u32>>,
    suffix_entries:   Option<Vec<u32>>,
    prefix_stream:    Option<Vec<u8>>,
    suffix_stream:    Option<Vec<u8>>,
    subheaders:       Option<Vec<u8>>,
    subchannel:       Option<Vec<u8>>,
    tracks:           Vec<Track>,
    geometry:         Option<Geometry>,
    metadata:         Metadata,
    dump_hardware:    Vec<DumpHardware>,
    tape_files:       Vec<TapeFile>,
    tape_partitions:  Vec<TapePartition>,
    checksums:        Vec<ChecksumEntry>,
    media_tags:       BTreeMap<DataKind, Vec<u8>>,
}

impl<S: Read + Seek> Image<S> {
    pub fn open(stream: S) -> Result<Self, ImageError> {
        Self::open_with(stream, ReadOptions::default())
    }

    pub fn open_with(mut stream: S, options: ReadOptions) -> Result<Self, ImageError> {
        stream.seek(SeekFrom::Start(0))?;
        let header = ImageHeader::read(&mut stream)?;
        if header.index_offset == 0 {
            return Err(ImageError::IndexNotFound);
        }
        stream.seek(SeekFrom::Start(header.index_offset))?;
        let index = Index::read(&mut stream)?;

        let mut loaded = Loaded::default();
        for entry in index.iter() {
            match load_entry(&mut stream, entry, &options, &mut loaded)? {
                Scan::Keep(()) => {}
                Scan::Skip(reason) => warn!(
                    offset = entry.offset,
                    kind = %tag_to_string(entry.block_kind),
                    data_kind = %entry.data_kind,
                    %reason,
                    "skipping block"
                ),
            }
        }

        let ddt = loaded.user_ddt.take().ok_or(ImageError::MissingUserDdt)?;
        let total_sectors = ddt.entries();
        let shift = ddt.shift();

        let sector_size = if loaded.sector_size > 0 {
            loaded.sector_size
        } else {
            loaded
                .tracks
                .iter()
                .map(|t| t.track_type.user_data_size() as u32)
                .max()
                .unwrap_or(512)
        };

        let cd = header.media_type.is_compact_disc().then(|| CdTables {
            prefix: fixups(loaded.prefix_entries.take(), loaded.prefix_stream.take(), total_sectors, PREFIX_SIZE),
            suffix: fixups(loaded.suffix_entries.take(), loaded.suffix_stream.take(), total_sectors, SUFFIX_SIZE),
            subheaders: loaded.subheaders.take(),
            subchannel: loaded.subchannel.take(),
        });

        info!(
            media_type = %header.media_type,
            sectors = total_sectors,
            sector_size,
            blocks = index.len(),
            ddt_on_disk = ddt.is_on_disk(),
            "opened image"
        );

        Ok(Self {
            stream,
            header,
            index,
            total_sectors,
            sector_size,
            shift,
            ddt,
            block_cache:     GenerationalCache::new("blocks", options.max_cache_bytes),
            tracks:          loaded.tracks,
            geometry:        loaded.geometry,
            metadata:        loaded.metadata,
            dump_hardware:   loaded.dump_hardware,
            tape_files:      loaded.tape_files,
            tape_partitions: loaded.tape_partitions,
            checksums:       loaded.checksums,
            media_tags:      loaded.media_tags,
            cd,
            writer:          None,
        })
    }
}

fn fixups(entries: Option<Vec<u32>>, stream: Option<Vec<u8>>, sectors: u64, slot: usize) -> FixupTable {
    let mut entries = entries.unwrap_or_default();
    entries.resize(sectors as usize, 0);
    FixupTable::from_parts(entries, stream.unwrap_or_default(), slot)
}

fn load_entry<R: Read + Seek>(
    r:       &mut R,
    entry:   &IndexEntry,
    options: &ReadOptions,
    out:     &mut Loaded,
) -> Result<Scan<()>, ImageError> {
    let Some(kind) = entry.kind() else {
        return Ok(Scan::Skip("unknown block kind".into()));
    };
    if matches!(kind, BlockKind::Index | BlockKind::Index2) {
        return Ok(Scan::Skip("index listed inside the index".into()));
    }
    r.seek(SeekFrom::Start(entry.offset))?;
    let found = keep!(soft(r.read_u32::<LittleEndian>()));
    if found != kind.tag() {
        return Ok(Scan::Skip(format!("index says {kind}, block is '{}'", tag_to_string(found))));
    }

    match kind {
        BlockKind::Data => load_data_block(r, entry, out),
        BlockKind::DeduplicationTable => load_table(r, entry, options, out),
        BlockKind::Geometry => {
            out.geometry = Some(keep!(soft(Geometry::read_after_tag(&mut *r))));
            Ok(Scan::Keep(()))
        }
        BlockKind::Metadata => {
            out.metadata = keep!(soft(Metadata::read_after_tag(&mut *r)));
            Ok(Scan::Keep(()))
        }
        BlockKind::Tracks => {
            out.tracks = keep!(soft(read_tracks_block(&mut *r)));
            Ok(Scan::Keep(()))
        }
        BlockKind::DumpHardware => {
            out.dump_hardware = keep!(soft(read_dump_hardware_block(&mut *r)));
            Ok(Scan::Keep(()))
        }
        BlockKind::TapeFile => {
            out.tape_files = keep!(soft(read_files_block(&mut *r)));
            Ok(Scan::Keep(()))
        }
        BlockKind::TapePartition => {
            out.tape_partitions = keep!(soft(read_partitions_block(&mut *r)));
            Ok(Scan::Keep(()))
        }
        BlockKind::Checksum => {
            out.checksums = keep!(soft(read_checksum_block(&mut *r)));
            Ok(Scan::Keep(()))
        }
        BlockKind::CicmXml | BlockKind::Json | BlockKind::CompactDiscIndexes => {
            debug!(offset = entry.offset, %kind, "ignoring block");
            Ok(Scan::Keep(()))
        }
        BlockKind::Index | BlockKind::Index2 => Ok(Scan::Skip("index listed inside the index".into())),
    }
}

/// Read, decode and CRC-check a side-table payload.
fn side_payload<R: Read>(
    r:           &mut R,
    compression: u16,
    cmp_length:  u64,
    length:      u64,
    crc:         u64,
) -> Result<Scan<Vec<u8>>, ImageError> {
    let payload = keep!(soft(read_payload(&mut *r, cmp_length)));
    let data = match decode_payload(compression, &payload, length as usize) {
        Ok(d) => d,
        Err(e) => return Ok(Scan::Skip(e.to_string())),
    };
    if crc64(&data) != crc {
        return Ok(Scan::Skip("payload checksum mismatch".into()));
    }
    Ok(Scan::Keep(data))
}

fn load_data_block<R: Read + Seek>(
    r:     &mut R,
    entry: &IndexEntry,
    out:   &mut Loaded,
) -> Result<Scan<()>, ImageError> {
    let header = keep!(soft(DataBlockHeader::read_after_tag(&mut *r)));
    if header.data_kind != entry.data_kind {
        return Ok(Scan::Skip(format!("index says {}, block holds {}", entry.data_kind, header.data_kind)));
    }
    if header.data_kind == DataKind::USER_DATA {
        out.sector_size = out.sector_size.max(header.sector_size);
        return Ok(Scan::Keep(()));
    }

    let data = keep!(side_payload(
        r,
        header.compression,
        header.cmp_length as u64,
        header.length as u64,
        header.crc64,
    ));
    match header.data_kind {
        DataKind::CD_SECTOR_PREFIX             => out.prefix_stream = Some(data),
        DataKind::CD_SECTOR_SUFFIX             => out.suffix_stream = Some(data),
        DataKind::CD_SECTOR_SUBCHANNEL         => out.subchannel = Some(data),
        DataKind::COMPACT_DISC_MODE2_SUBHEADER => out.subheaders = Some(data),
        k if k.is_media_tag() => {
            out.media_tags.insert(k, data);
        }
        k => return Ok(Scan::Skip(format!("{k} is not stored as a data block"))),
    }
    Ok(Scan::Keep(()))
}

fn load_table<R: Read + Seek>(
    r:       &mut R,
    entry:   &IndexEntry,
    options: &ReadOptions,
    out:     &mut Loaded,
) -> Result<Scan<()>, ImageError> {
    let header = keep!(soft(DdtHeader::read_after_tag(&mut *r)));
    if header.data_kind != entry.data_kind {
        return Ok(Scan::Skip(format!("index says {}, table holds {}", entry.data_kind, header.data_kind)));
    }

    match header.data_kind {
        DataKind::USER_DATA => {
            out.user_ddt = Some(load_user_ddt(r, entry.offset, &header, options)?);
            Ok(Scan::Keep(()))
        }
        DataKind::CD_SECTOR_PREFIX_CORRECTED | DataKind::CD_SECTOR_SUFFIX_CORRECTED => {
            let data = keep!(side_payload(r, header.compression, header.cmp_length, header.length, header.crc64));
            let entries: Vec<u32> = data
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            if header.data_kind == DataKind::CD_SECTOR_PREFIX_CORRECTED {
                out.prefix_entries = Some(entries);
            } else {
                out.suffix_entries = Some(entries);
            }
            Ok(Scan::Keep(()))
        }
        k => Ok(Scan::Skip(format!("no use for a {k} table"))),
    }
}

/// The user DDT cannot be skipped: any problem here is fatal.
fn load_user_ddt<R: Read + Seek>(
    r:       &mut R,
    offset:  u64,
    header:  &DdtHeader,
    options: &ReadOptions,
) -> Result<Ddt, ImageError> {
    let corrupt = |reason: String| ImageError::CorruptBlock { offset, reason };
    if header.shift >= 32 {
        return Err(corrupt(format!("shift {} out of range", header.shift)));
    }
    if header.length != header.entries * DDT_ENTRY_SIZE as u64 {
        return Err(corrupt(format!("{} entries in {} bytes", header.entries, header.length)));
    }
    if header.compression == CompressionKind::None as u16 {
        // addressed in place, never loaded whole
        let base = offset + DDT_HEADER_SIZE as u64;
        return Ok(Ddt::on_disk(base, header.entries, header.shift, options.max_ddt_cache_entries));
    }
    let payload = read_payload(&mut *r, header.cmp_length)?;
    let data = decode_payload(header.compression, &payload, header.length as usize)?;
    if crc64(&data) != header.crc64 {
        return Err(corrupt("deduplication table checksum mismatch".into()));
    }
    Ok(Ddt::from_bytes(&data, header.shift))
}
