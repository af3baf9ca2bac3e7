//! Write path: accumulation buffer, deduplication, CD long-sector splitting.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::{debug, info, warn};

use super::{BlockBuffer, CdTables, CreateOptions, Image, ImageError, ReadOptions, SectorTag, WriteState};
use crate::block::{
    encode_payload, BlockKind, DataBlockHeader, DataKind, EncodedPayload, DATA_BLOCK_HEADER_SIZE, DDT_HEADER_SIZE,
};
use crate::cache::GenerationalCache;
use crate::cd::sector::{
    form2_edc, prefix_is_correct, subheader_is_form2, suffix_is_correct, suffix_is_correct_mode2,
    MODE1_EDC_OFFSET, MODE1_USER_OFFSET, MODE1_USER_SIZE, MODE2_FORM1_EDC_OFFSET, MODE2_FORM1_USER_SIZE,
    MODE2_FORM2_EDC_OFFSET, MODE2_FORM2_SUFFIX_SIZE, MODE2_FORM2_USER_SIZE, MODE2_FORMLESS_SIZE,
    MODE2_SUBHEADER_OFFSET, MODE2_USER_OFFSET, PREFIX_SIZE, SUBHEADER_SIZE,
};
use crate::cd::{Fixup, FixupTable, Form2Edc, SectorMode, SECTOR_SIZE};
use crate::checksum::{content_hash, ImageDigests};
use crate::codec::CompressionKind;
use crate::ddt::{decode_entry, encode_entry, reserve_on_disk, shift_for, Ddt};
use crate::header::ImageHeader;
use crate::index::{Index, IndexEntry};
use crate::media::track::validate_tracks;
use crate::media::{DumpHardware, Geometry, MediaType, Metadata, TapeFile, TapePartition, Track, TrackType};
use crate::subchannel::SUBCHANNEL_SIZE;

fn all_zero(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}

/// Record one prefix or suffix: a reconstruction flag, or the bytes verbatim.
fn record(table: &mut FixupTable, lba: u64, verdict: Option<Fixup>, bytes: &[u8]) -> Result<(), ImageError> {
    match verdict {
        Some(fixup) => {
            table.set(lba, fixup);
            Ok(())
        }
        None => table.store(lba, bytes).map_err(|_| ImageError::SideStreamFull),
    }
}

impl<S: Read + Write + Seek> Image<S> {
    /// Start a new image on `stream`, overwriting whatever it held.
    pub fn create(
        mut stream:    S,
        media_type:    MediaType,
        options:       CreateOptions,
        total_sectors: u64,
        sector_size:   u32,
    ) -> Result<Self, ImageError> {
        options.validate()?;
        let shift = shift_for(options.sectors_per_block);
        let widest = if media_type.is_compact_disc() { sector_size.max(SECTOR_SIZE as u32) } else { sector_size };
        if (1u64 << shift).saturating_mul(widest as u64) > u32::MAX as u64 {
            return Err(ImageError::InvalidOption(format!(
                "{} sectors of {widest} bytes do not fit one data block",
                1u64 << shift
            )));
        }
        let header = ImageHeader::new(media_type);
        stream.seek(SeekFrom::Start(0))?;
        header.write(&mut stream)?;

        let read = ReadOptions::default();
        let mut index = Index::default();
        let (ddt, ddt_header) = if options.ddt_in_memory(total_sectors) {
            (Ddt::in_memory(total_sectors, shift), None)
        } else {
            let at = reserve_on_disk(&mut stream, shift, total_sectors)?;
            index.push(IndexEntry::new(BlockKind::DeduplicationTable, DataKind::USER_DATA, at));
            let base = at + DDT_HEADER_SIZE as u64;
            (Ddt::on_disk(base, total_sectors, shift, read.max_ddt_cache_entries), Some(at))
        };
        let append_at = stream.stream_position()?;

        info!(
            %media_type,
            sectors = total_sectors,
            sector_size,
            sectors_per_block = 1u64 << shift,
            ddt_on_disk = ddt.is_on_disk(),
            "creating image"
        );

        let writer = WriteState {
            digests:      ImageDigests::new(options.digests()),
            options,
            buffer:       BlockBuffer::default(),
            dedup:        HashMap::new(),
            last_written: None,
            append_at,
            ddt_header,
        };

        Ok(Self {
            stream,
            header,
            index,
            total_sectors,
            sector_size,
            shift,
            ddt,
            block_cache:     GenerationalCache::new("blocks", read.max_cache_bytes),
            tracks:          Vec::new(),
            geometry:        None,
            metadata:        Metadata::default(),
            dump_hardware:   Vec::new(),
            tape_files:      Vec::new(),
            tape_partitions: Vec::new(),
            checksums:       Vec::new(),
            media_tags:      Default::default(),
            cd:              media_type.is_compact_disc().then(|| CdTables::new(total_sectors)),
            writer:          Some(writer),
        })
    }

    pub(crate) fn ensure_writable(&self) -> Result<(), ImageError> {
        if self.writer.is_none() {
            return Err(ImageError::ReadOnly);
        }
        Ok(())
    }

    // ── Sectors ──────────────────────────────────────────────────────────────

    /// Store the user data of one sector.  CD Mode 2 tracks take any of the
    /// three Mode 2 payload sizes; everything else takes the declared size.
    pub fn write_sector(&mut self, lba: u64, data: &[u8]) -> Result<(), ImageError> {
        self.ensure_writable()?;
        self.check_range(lba)?;
        let track_type = self.cd_track_type(lba);
        let fits = match track_type {
            Some(TrackType::CdMode2Formless | TrackType::CdMode2Form1 | TrackType::CdMode2Form2) => matches!(
                data.len(),
                MODE2_FORM1_USER_SIZE | MODE2_FORM2_USER_SIZE | MODE2_FORMLESS_SIZE
            ),
            Some(t) => data.len() == t.user_data_size(),
            None => data.len() == self.sector_size as usize,
        };
        if !fits {
            return Err(ImageError::WrongSectorLength {
                lba,
                expected: self.declared_size(lba),
                actual:   data.len(),
            });
        }
        self.track_digests(lba, data);
        let compression = self.compression_for(track_type);
        self.store_user(lba, data, compression)
    }

    /// Store a raw sector.  On CD media the 2352 bytes are split into user
    /// data plus prefix and suffix fixups; elsewhere this is `write_sector`.
    pub fn write_sector_long(&mut self, lba: u64, data: &[u8]) -> Result<(), ImageError> {
        self.ensure_writable()?;
        self.check_range(lba)?;
        if !self.header.media_type.is_compact_disc() {
            if data.len() != self.sector_size as usize {
                return Err(ImageError::WrongLongSectorLength {
                    expected: self.sector_size as usize,
                    actual:   data.len(),
                });
            }
            return self.write_sector(lba, data);
        }
        if data.len() != SECTOR_SIZE {
            return Err(ImageError::WrongLongSectorLength { expected: SECTOR_SIZE, actual: data.len() });
        }
        let track_type = self.track_for(lba).map(|t| t.track_type).ok_or(ImageError::NoTrack(lba))?;
        self.track_digests(lba, data);

        match track_type.sector_mode() {
            None if track_type == TrackType::Audio => {
                let compression = self.compression_for(Some(track_type));
                self.store_user(lba, data, compression)
            }
            None | Some(SectorMode::Mode1) => self.write_mode1_long(lba, data),
            Some(SectorMode::Mode2) => self.write_mode2_long(lba, data),
        }
    }

    fn write_mode1_long(&mut self, lba: u64, sector: &[u8]) -> Result<(), ImageError> {
        self.record_prefix(lba, sector, SectorMode::Mode1)?;
        let suffix = &sector[MODE1_EDC_OFFSET..];
        let verdict = if suffix_is_correct(sector) {
            Some(Fixup::Correct)
        } else if all_zero(suffix) {
            Some(Fixup::NotDumped)
        } else {
            None
        };
        record(&mut self.cd_tables().suffix, lba, verdict, suffix)?;

        let compression = self.compression_for(Some(TrackType::CdMode1));
        self.store_user(lba, &sector[MODE1_USER_OFFSET..MODE1_USER_OFFSET + MODE1_USER_SIZE], compression)
    }

    fn write_mode2_long(&mut self, lba: u64, sector: &[u8]) -> Result<(), ImageError> {
        self.record_prefix(lba, sector, SectorMode::Mode2)?;
        let total = self.total_sectors as usize;
        let subheader = &sector[MODE2_SUBHEADER_OFFSET..MODE2_USER_OFFSET];
        let cd = self.cd_tables();
        let subheaders = cd.subheaders.get_or_insert_with(|| vec![0u8; total * SUBHEADER_SIZE]);
        let at = lba as usize * SUBHEADER_SIZE;
        subheaders[at..at + SUBHEADER_SIZE].copy_from_slice(subheader);

        let user = if subheader_is_form2(subheader) {
            let verdict = match form2_edc(sector) {
                Form2Edc::Correct => Some(Fixup::Mode2Form2Ok),
                Form2Edc::Absent  => Some(Fixup::Mode2Form2NoCrc),
                Form2Edc::Wrong   => None,
            };
            let edc = &sector[MODE2_FORM2_EDC_OFFSET..MODE2_FORM2_EDC_OFFSET + MODE2_FORM2_SUFFIX_SIZE];
            record(&mut cd.suffix, lba, verdict, edc)?;
            &sector[MODE2_USER_OFFSET..MODE2_USER_OFFSET + MODE2_FORM2_USER_SIZE]
        } else {
            let suffix = &sector[MODE2_FORM1_EDC_OFFSET..];
            let verdict = if suffix_is_correct_mode2(sector) {
                Some(Fixup::Mode2Form1Ok)
            } else if all_zero(suffix) {
                Some(Fixup::NotDumped)
            } else {
                None
            };
            record(&mut cd.suffix, lba, verdict, suffix)?;
            &sector[MODE2_USER_OFFSET..MODE2_USER_OFFSET + MODE2_FORM1_USER_SIZE]
        };

        let compression = self.compression_for(None);
        self.store_user(lba, user, compression)
    }

    fn record_prefix(&mut self, lba: u64, sector: &[u8], mode: SectorMode) -> Result<(), ImageError> {
        let prefix = &sector[..PREFIX_SIZE];
        let verdict = if prefix_is_correct(sector, mode, lba) {
            Some(Fixup::Correct)
        } else if all_zero(prefix) {
            Some(Fixup::NotDumped)
        } else {
            None
        };
        record(&mut self.cd_tables().prefix, lba, verdict, prefix)
    }

    fn cd_tables(&mut self) -> &mut CdTables {
        let total = self.total_sectors;
        self.cd.get_or_insert_with(|| CdTables::new(total))
    }

    /// Only subchannel can be written on its own: every other tag is part
    /// of the long sector.
    pub fn write_sector_tag(&mut self, lba: u64, tag: SectorTag, data: &[u8]) -> Result<(), ImageError> {
        self.ensure_writable()?;
        self.check_range(lba)?;
        if tag != SectorTag::Subchannel || !self.header.media_type.is_compact_disc() {
            return Err(ImageError::UnsupportedSectorTag(tag));
        }
        if data.len() != SUBCHANNEL_SIZE {
            return Err(ImageError::WrongTagLength { tag, expected: SUBCHANNEL_SIZE, actual: data.len() });
        }
        let total = self.total_sectors as usize;
        let subchannel = self.cd_tables().subchannel.get_or_insert_with(|| vec![0u8; total * SUBCHANNEL_SIZE]);
        let at = lba as usize * SUBCHANNEL_SIZE;
        subchannel[at..at + SUBCHANNEL_SIZE].copy_from_slice(data);
        Ok(())
    }

    // ── Accumulation buffer ──────────────────────────────────────────────────

    fn compression_for(&self, track_type: Option<TrackType>) -> CompressionKind {
        let compress = self.writer.as_ref().is_some_and(|w| w.options.compress);
        match track_type {
            _ if !compress => CompressionKind::None,
            Some(TrackType::Audio) => CompressionKind::Flac,
            _ => CompressionKind::Lzma,
        }
    }

    /// Whole-image digests only make sense for a stream written front to
    /// back; the first rewind drops them.
    fn track_digests(&mut self, lba: u64, data: &[u8]) {
        let Some(writer) = self.writer.as_mut() else { return };
        match writer.last_written {
            Some(last) if lba <= last => {
                if writer.digests.take().is_some() {
                    warn!(lba, last, "write stream rewound; image digests abandoned");
                }
            }
            _ => {
                if let Some(digests) = writer.digests.as_mut() {
                    digests.update(data);
                }
            }
        }
        writer.last_written = Some(lba);
    }

    fn store_user(&mut self, lba: u64, data: &[u8], compression: CompressionKind) -> Result<(), ImageError> {
        let shift = self.shift;
        let writer = self.writer.as_mut().ok_or(ImageError::ReadOnly)?;

        let hash = (writer.options.deduplicate || all_zero(data)).then(|| content_hash(data));
        if let Some(value) = hash.and_then(|h| writer.dedup.get(&h).copied()) {
            let (offset, _) = decode_entry(value, shift);
            writer.buffer.pending.retain(|&(l, _)| l != lba);
            if writer.buffer.holds(offset) {
                writer.buffer.pending.push((lba, value));
            } else {
                self.ddt.set(&mut self.stream, lba, value)?;
            }
            return Ok(());
        }

        let size = data.len() as u32;
        let buffer = &writer.buffer;
        let must_flush = buffer.sectors > 0
            && (buffer.sector_size != size || buffer.compression != compression || buffer.sectors >= 1u64 << shift);
        if must_flush {
            self.flush_buffer()?;
        }

        let writer = self.writer.as_mut().ok_or(ImageError::ReadOnly)?;
        let append_at = writer.append_at;
        let buffer = &mut writer.buffer;
        if buffer.sectors == 0 {
            buffer.sector_size = size;
            buffer.compression = compression;
            buffer.position    = append_at;
        }
        let value = encode_entry(buffer.position, buffer.sectors, shift).ok_or(ImageError::OffsetOutOfRange {
            offset:            buffer.position,
            sectors_per_block: 1 << shift,
        })?;
        buffer.data.extend_from_slice(data);
        buffer.sectors += 1;
        buffer.pending.retain(|&(l, _)| l != lba);
        buffer.pending.push((lba, value));
        if let Some(h) = hash {
            writer.dedup.insert(h, value);
        }
        Ok(())
    }

    /// Compress and append the open block, then publish its DDT entries.
    pub(crate) fn flush_buffer(&mut self) -> Result<(), ImageError> {
        let Some(writer) = self.writer.as_mut() else { return Ok(()) };
        if writer.buffer.sectors == 0 {
            return Ok(());
        }
        let buffer = std::mem::take(&mut writer.buffer);
        let encoded = encode_payload(&buffer.data, buffer.compression)?;
        let compression = encoded.compression;
        let offset = self.append_data_block(DataKind::USER_DATA, buffer.sector_size, encoded)?;
        debug!(
            offset,
            sectors = buffer.sectors,
            sector_size = buffer.sector_size,
            compression = compression.name(),
            "flushed data block"
        );
        for (lba, value) in buffer.pending {
            self.ddt.set(&mut self.stream, lba, value)?;
        }
        Ok(())
    }

    /// Append a Data Block at the end of the image and index it.
    pub(crate) fn append_data_block(
        &mut self,
        data_kind:   DataKind,
        sector_size: u32,
        encoded:     EncodedPayload,
    ) -> Result<u64, ImageError> {
        let header = DataBlockHeader {
            data_kind,
            compression: encoded.compression as u16,
            sector_size,
            cmp_length:  u32::try_from(encoded.payload.len()).map_err(|_| ImageError::BlockTooLarge(encoded.payload.len() as u64))?,
            length:      u32::try_from(encoded.length).map_err(|_| ImageError::BlockTooLarge(encoded.length as u64))?,
            cmp_crc64:   encoded.cmp_crc64,
            crc64:       encoded.crc64,
        };
        let mut block = Vec::with_capacity(DATA_BLOCK_HEADER_SIZE + encoded.payload.len());
        header.write(&mut block)?;
        block.extend_from_slice(&encoded.payload);
        self.append_block(BlockKind::Data, data_kind, &block)
    }

    /// Append an already framed block and index it.
    pub(crate) fn append_block(&mut self, kind: BlockKind, data_kind: DataKind, bytes: &[u8]) -> Result<u64, ImageError> {
        let writer = self.writer.as_mut().ok_or(ImageError::ReadOnly)?;
        let offset = writer.append_at;
        self.stream.seek(SeekFrom::Start(offset))?;
        self.stream.write_all(bytes)?;
        writer.append_at = offset + bytes.len() as u64;
        self.index.push(IndexEntry::new(kind, data_kind, offset));
        Ok(offset)
    }

    // ── Media description ────────────────────────────────────────────────────

    pub fn write_media_tag(&mut self, kind: DataKind, data: &[u8]) -> Result<(), ImageError> {
        self.ensure_writable()?;
        if !kind.is_media_tag() {
            return Err(ImageError::NotAMediaTag(kind));
        }
        self.media_tags.insert(kind, data.to_vec());
        Ok(())
    }

    /// Replace the track list.  Tracks must be sorted, disjoint and inside
    /// the image.
    pub fn set_tracks(&mut self, tracks: Vec<Track>) -> Result<(), ImageError> {
        self.ensure_writable()?;
        validate_tracks(&tracks).map_err(ImageError::InvalidTracks)?;
        if let Some(t) = tracks.iter().find(|t| t.end >= self.total_sectors) {
            return Err(ImageError::InvalidTracks(format!(
                "track {} ends at {} but the image has {} sectors",
                t.sequence, t.end, self.total_sectors
            )));
        }
        self.tracks = tracks;
        Ok(())
    }

    pub fn set_geometry(&mut self, geometry: Geometry) -> Result<(), ImageError> {
        self.ensure_writable()?;
        self.geometry = Some(geometry);
        Ok(())
    }

    pub fn set_metadata(&mut self, metadata: Metadata) -> Result<(), ImageError> {
        self.ensure_writable()?;
        self.metadata = metadata;
        Ok(())
    }

    pub fn set_dump_hardware(&mut self, dump_hardware: Vec<DumpHardware>) -> Result<(), ImageError> {
        self.ensure_writable()?;
        self.dump_hardware = dump_hardware;
        Ok(())
    }

    pub fn set_tape_files(&mut self, files: Vec<TapeFile>) -> Result<(), ImageError> {
        self.ensure_writable()?;
        self.tape_files = files;
        Ok(())
    }

    pub fn set_tape_partitions(&mut self, partitions: Vec<TapePartition>) -> Result<(), ImageError> {
        self.ensure_writable()?;
        self.tape_partitions = partitions;
        Ok(())
    }
}
