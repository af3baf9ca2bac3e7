//! Finishing a written image: side tables, checksums, DDT, index, header.

use chrono::Utc;
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::info;

use super::{Image, ImageError};
use crate::block::{BlockKind, DataKind, DdtHeader, DDT_HEADER_SIZE};
use crate::checksum::write_checksum_block;
use crate::codec::CompressionKind;
use crate::ddt::{encode_table, finalize_on_disk};
use crate::media::dump::write_dump_hardware_block;
use crate::media::tape::{write_files_block, write_partitions_block};
use crate::media::track::write_tracks_block;
use crate::perf::{encode_side_tables, EncodedSideTable, SideTable, SideTableShape};

impl<S: Read + Write + Seek> Image<S> {
    /// Write everything still in memory and hand the stream back.
    ///
    /// The header is rewritten last; an image whose `close` did not finish
    /// has an index offset of 0 and fails to open.
    pub fn close(mut self) -> Result<S, ImageError> {
        self.ensure_writable()?;
        self.flush_buffer()?;

        let compression = match self.writer.as_ref() {
            Some(w) if w.options.compress => CompressionKind::Lzma,
            _ => CompressionKind::None,
        };

        self.write_thin_tables()?;

        let tables = self.side_tables(compression);
        for table in encode_side_tables(tables)? {
            self.append_side_table(table)?;
        }

        let digests = self.writer.as_mut().and_then(|w| w.digests.take());
        if let Some(digests) = digests {
            self.checksums = digests.finalize();
        }
        if !self.checksums.is_empty() {
            let mut block = Vec::new();
            write_checksum_block(&mut block, &self.checksums)?;
            self.append_block(BlockKind::Checksum, DataKind::NO_DATA, &block)?;
        }

        self.write_user_ddt(compression)?;

        let Some(writer) = self.writer.take() else {
            return Err(ImageError::ReadOnly);
        };
        let index_offset = writer.append_at;
        self.stream.seek(SeekFrom::Start(index_offset))?;
        self.index.write(&mut self.stream)?;

        self.header.index_offset      = index_offset;
        self.header.last_written_time = Utc::now();
        self.stream.seek(SeekFrom::Start(0))?;
        self.header.write(&mut self.stream)?;
        self.stream.flush()?;

        info!(
            blocks = self.index.len(),
            index_offset,
            deduplicated = writer.dedup.len(),
            checksums = self.checksums.len(),
            "closed image"
        );
        Ok(self.stream)
    }

    fn write_thin_tables(&mut self) -> Result<(), ImageError> {
        if let Some(geometry) = self.geometry {
            let mut block = Vec::new();
            geometry.write(&mut block)?;
            self.append_block(BlockKind::Geometry, DataKind::NO_DATA, &block)?;
        }
        if !self.metadata.is_empty() {
            let mut block = Vec::new();
            self.metadata.write(&mut block)?;
            self.append_block(BlockKind::Metadata, DataKind::NO_DATA, &block)?;
        }
        if !self.dump_hardware.is_empty() {
            let mut block = Vec::new();
            write_dump_hardware_block(&mut block, &self.dump_hardware)?;
            self.append_block(BlockKind::DumpHardware, DataKind::NO_DATA, &block)?;
        }
        if !self.tracks.is_empty() {
            let mut block = Vec::new();
            write_tracks_block(&mut block, &self.tracks)?;
            self.append_block(BlockKind::Tracks, DataKind::NO_DATA, &block)?;
        }
        if !self.tape_files.is_empty() {
            let mut block = Vec::new();
            write_files_block(&mut block, &self.tape_files)?;
            self.append_block(BlockKind::TapeFile, DataKind::NO_DATA, &block)?;
        }
        if !self.tape_partitions.is_empty() {
            let mut block = Vec::new();
            write_partitions_block(&mut block, &self.tape_partitions)?;
            self.append_block(BlockKind::TapePartition, DataKind::NO_DATA, &block)?;
        }
        Ok(())
    }

    /// Every independently compressed table, in write order.
    fn side_tables(&self, compression: CompressionKind) -> Vec<SideTable> {
        let mut tables: Vec<SideTable> = self
            .media_tags
            .iter()
            .map(|(&kind, data)| SideTable::data(kind, compression, data.clone()))
            .collect();

        let Some(cd) = self.cd.as_ref() else { return tables };
        if !cd.prefix.stream().is_empty() {
            tables.push(SideTable::data(DataKind::CD_SECTOR_PREFIX, compression, cd.prefix.stream().to_vec()));
        }
        if !cd.suffix.stream().is_empty() {
            tables.push(SideTable::data(DataKind::CD_SECTOR_SUFFIX, compression, cd.suffix.stream().to_vec()));
        }
        if let Some(subheaders) = &cd.subheaders {
            tables.push(SideTable::data(DataKind::COMPACT_DISC_MODE2_SUBHEADER, compression, subheaders.clone()));
        }
        if let Some(subchannel) = &cd.subchannel {
            let subchannel_compression = match compression {
                CompressionKind::None => CompressionKind::None,
                _ => CompressionKind::LzmaSubchannelTransform,
            };
            tables.push(SideTable::data(DataKind::CD_SECTOR_SUBCHANNEL, subchannel_compression, subchannel.clone()));
        }
        if !cd.prefix.is_untouched() {
            tables.push(SideTable::fixups(DataKind::CD_SECTOR_PREFIX_CORRECTED, compression, cd.prefix.entries()));
        }
        if !cd.suffix.is_untouched() {
            tables.push(SideTable::fixups(DataKind::CD_SECTOR_SUFFIX_CORRECTED, compression, cd.suffix.entries()));
        }
        tables
    }

    fn append_side_table(&mut self, table: EncodedSideTable) -> Result<u64, ImageError> {
        let EncodedSideTable { data_kind, shape, encoded } = table;
        match shape {
            SideTableShape::Data { sector_size } => self.append_data_block(data_kind, sector_size, encoded),
            SideTableShape::Table { shift, entries } => {
                let header = DdtHeader {
                    data_kind,
                    compression: encoded.compression as u16,
                    shift,
                    entries,
                    cmp_length:  encoded.payload.len() as u64,
                    length:      encoded.length as u64,
                    cmp_crc64:   encoded.cmp_crc64,
                    crc64:       encoded.crc64,
                };
                let mut block = Vec::new();
                header.write(&mut block)?;
                block.extend_from_slice(&encoded.payload);
                self.append_block(BlockKind::DeduplicationTable, data_kind, &block)
            }
        }
    }

    fn write_user_ddt(&mut self, compression: CompressionKind) -> Result<(), ImageError> {
        if let Some(raw) = self.ddt.to_bytes() {
            let (header, payload) = encode_table(DataKind::USER_DATA, self.shift, self.total_sectors, &raw, compression)?;
            let mut block = Vec::with_capacity(DDT_HEADER_SIZE + payload.len());
            header.write(&mut block)?;
            block.extend_from_slice(&payload);
            self.append_block(BlockKind::DeduplicationTable, DataKind::USER_DATA, &block)?;
        } else if let Some(at) = self.writer.as_ref().and_then(|w| w.ddt_header) {
            finalize_on_disk(&mut self.stream, at)?;
        }
        Ok(())
    }
}
