//! Read path: DDT lookup, block cache, CD long-sector reconstruction.

use std::io::{Read, Seek, SeekFrom};

use super::{CachedBlock, Image, ImageError, SectorTag};
use crate::block::{decode_payload, read_payload, DataBlockHeader, DataKind, DATA_BLOCK_HEADER_SIZE};
use crate::cd::sector::{
    reconstruct_ecc, reconstruct_prefix, subheader_is_form2, ECC_OFFSET, ECC_Q_OFFSET,
    MODE1_EDC_OFFSET, MODE1_USER_OFFSET, MODE1_USER_SIZE, MODE2_FORM1_EDC_OFFSET, MODE2_FORM1_SUFFIX_SIZE,
    MODE2_FORM1_USER_SIZE, MODE2_FORM2_EDC_OFFSET, MODE2_FORM2_SUFFIX_SIZE, MODE2_FORM2_USER_SIZE,
    MODE2_FORMLESS_SIZE, MODE2_SUBHEADER_OFFSET, MODE2_USER_OFFSET, PREFIX_SIZE, SUBHEADER_SIZE,
    SUFFIX_SIZE,
};
use crate::cd::{EccLayout, Fixup, FixupTable, SectorMode, SECTOR_SIZE};
use crate::ddt::decode_entry;
use crate::media::TrackType;
use crate::subchannel::SUBCHANNEL_SIZE;

/// Layout of one raw sector, as far as tag extraction cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawLayout {
    Mode1,
    Form1,
    Form2,
}

impl<S: Read + Seek> Image<S> {
    /// User data of one sector.  Never-written sectors read as zeros of the
    /// declared size.
    pub fn read_sector(&mut self, lba: u64) -> Result<Vec<u8>, ImageError> {
        self.check_range(lba)?;
        let Some(data) = self.stored_sector(lba)? else {
            return Ok(vec![0u8; self.declared_size(lba)]);
        };
        if self.cd_track_type(lba) == Some(TrackType::CdMode2Formless) && data.len() != MODE2_FORMLESS_SIZE {
            let long = self.read_sector_long(lba)?;
            return Ok(long[MODE2_SUBHEADER_OFFSET..].to_vec());
        }
        Ok(data)
    }

    pub fn read_sectors(&mut self, lba: u64, count: u64) -> Result<Vec<u8>, ImageError> {
        let mut out = Vec::new();
        for i in 0..count {
            out.extend_from_slice(&self.read_sector(lba + i)?);
        }
        Ok(out)
    }

    /// Read `count` sectors starting `offset` sectors into track `sequence`.
    pub fn read_sectors_in_track(&mut self, sequence: u8, offset: u64, count: u64) -> Result<Vec<u8>, ImageError> {
        let track = self
            .tracks
            .iter()
            .find(|t| t.sequence == sequence)
            .ok_or(ImageError::NoSuchTrack(sequence))?;
        if offset.saturating_add(count) > track.length() {
            return Err(ImageError::CrossesTrackEnd { track: sequence, offset, count });
        }
        let start = track.start + offset;
        self.read_sectors(start, count)
    }

    /// The full 2352-byte sector for CD media, rebuilt from user data and
    /// fixups.  Other media return the stored sector unchanged.
    pub fn read_sector_long(&mut self, lba: u64) -> Result<Vec<u8>, ImageError> {
        self.check_range(lba)?;
        if !self.header.media_type.is_compact_disc() {
            return self.read_sector(lba);
        }
        let track_type = self.track_for(lba).map(|t| t.track_type).ok_or(ImageError::NoTrack(lba))?;
        let Some(data) = self.stored_sector(lba)? else {
            return Ok(vec![0u8; SECTOR_SIZE]);
        };

        let mut sector = vec![0u8; SECTOR_SIZE];
        match track_type.sector_mode() {
            None if track_type == TrackType::Audio => {
                let n = data.len().min(SECTOR_SIZE);
                sector[..n].copy_from_slice(&data[..n]);
            }
            None | Some(SectorMode::Mode1) => {
                let n = data.len().min(MODE1_USER_SIZE);
                sector[MODE1_USER_OFFSET..MODE1_USER_OFFSET + n].copy_from_slice(&data[..n]);
                self.apply_prefix(&mut sector, lba, SectorMode::Mode1);
                self.apply_suffix(&mut sector, lba, EccLayout::Mode1);
            }
            Some(SectorMode::Mode2) => {
                if data.len() == MODE2_FORMLESS_SIZE {
                    sector[MODE2_SUBHEADER_OFFSET..].copy_from_slice(&data);
                    self.apply_prefix(&mut sector, lba, SectorMode::Mode2);
                    return Ok(sector);
                }
                let n = data.len().min(MODE2_FORM2_USER_SIZE);
                sector[MODE2_USER_OFFSET..MODE2_USER_OFFSET + n].copy_from_slice(&data[..n]);
                if let Some(subheader) = self.subheader(lba) {
                    sector[MODE2_SUBHEADER_OFFSET..MODE2_USER_OFFSET].copy_from_slice(subheader);
                }
                self.apply_prefix(&mut sector, lba, SectorMode::Mode2);
                let layout = if data.len() == MODE2_FORM2_USER_SIZE {
                    EccLayout::Mode2Form2
                } else {
                    EccLayout::Mode2Form1
                };
                self.apply_suffix(&mut sector, lba, layout);
            }
        }
        Ok(sector)
    }

    /// One named part of a raw sector.
    pub fn read_sector_tag(&mut self, lba: u64, tag: SectorTag) -> Result<Vec<u8>, ImageError> {
        self.check_range(lba)?;
        if tag == SectorTag::Subchannel {
            let at = lba as usize * SUBCHANNEL_SIZE;
            return self
                .cd
                .as_ref()
                .and_then(|cd| cd.subchannel.as_ref())
                .and_then(|s| s.get(at..at + SUBCHANNEL_SIZE))
                .map(<[u8]>::to_vec)
                .ok_or(ImageError::UnsupportedSectorTag(tag));
        }
        let mode = match self.cd_track_type(lba).and_then(TrackType::sector_mode) {
            Some(mode) => mode,
            None if self.cd_track_type(lba) == Some(TrackType::Data) => SectorMode::Mode1,
            None => return Err(ImageError::UnsupportedSectorTag(tag)),
        };

        let stored_len = self.stored_sector(lba)?.map(|d| d.len());
        let long = self.read_sector_long(lba)?;
        let layout = match mode {
            SectorMode::Mode1 => RawLayout::Mode1,
            SectorMode::Mode2 => match stored_len {
                Some(MODE2_FORM1_USER_SIZE) => RawLayout::Form1,
                Some(MODE2_FORM2_USER_SIZE) => RawLayout::Form2,
                Some(_) => {
                    if subheader_is_form2(&long[MODE2_SUBHEADER_OFFSET..MODE2_USER_OFFSET]) {
                        RawLayout::Form2
                    } else {
                        RawLayout::Form1
                    }
                }
                None if self.cd_track_type(lba) == Some(TrackType::CdMode2Form2) => RawLayout::Form2,
                None => RawLayout::Form1,
            },
        };

        let range = match (tag, layout) {
            (SectorTag::Sync, _)                  => 0..12,
            (SectorTag::Header, _)                => 12..PREFIX_SIZE,
            (SectorTag::SubHeader, RawLayout::Mode1) => return Err(ImageError::UnsupportedSectorTag(tag)),
            (SectorTag::SubHeader, _)             => MODE2_SUBHEADER_OFFSET..MODE2_USER_OFFSET,
            (SectorTag::Edc, RawLayout::Mode1)    => MODE1_EDC_OFFSET..MODE1_EDC_OFFSET + 4,
            (SectorTag::Edc, RawLayout::Form1)    => MODE2_FORM1_EDC_OFFSET..MODE2_FORM1_EDC_OFFSET + 4,
            (SectorTag::Edc, RawLayout::Form2)    => MODE2_FORM2_EDC_OFFSET..MODE2_FORM2_EDC_OFFSET + 4,
            (SectorTag::Ecc | SectorTag::EccP | SectorTag::EccQ, RawLayout::Form2) => {
                return Err(ImageError::UnsupportedSectorTag(tag))
            }
            (SectorTag::Ecc, _)                   => ECC_OFFSET..SECTOR_SIZE,
            (SectorTag::EccP, _)                  => ECC_OFFSET..ECC_Q_OFFSET,
            (SectorTag::EccQ, _)                  => ECC_Q_OFFSET..SECTOR_SIZE,
            (SectorTag::Subchannel, _)            => return Err(ImageError::UnsupportedSectorTag(tag)),
        };
        Ok(long[range].to_vec())
    }

    /// Stored user data of `lba`, or `None` when it was never written.
    pub(crate) fn stored_sector(&mut self, lba: u64) -> Result<Option<Vec<u8>>, ImageError> {
        let value = self.ddt.get(&mut self.stream, lba)?;
        if value == 0 {
            return Ok(None);
        }
        let (offset, index) = decode_entry(value, self.shift);
        if let Some(block) = self.block_cache.get(offset) {
            return slice_sector(block, offset, index).map(Some);
        }
        let block = self.load_block(offset)?;
        let sector = slice_sector(&block, offset, index)?;
        let cost = block.data.len() + DATA_BLOCK_HEADER_SIZE;
        self.block_cache.insert(offset, block, cost);
        Ok(Some(sector))
    }

    fn load_block(&mut self, offset: u64) -> Result<CachedBlock, ImageError> {
        self.stream.seek(SeekFrom::Start(offset))?;
        let header = DataBlockHeader::read(&mut self.stream)?;
        if header.data_kind != DataKind::USER_DATA {
            return Err(ImageError::CorruptBlock {
                offset,
                reason: format!("deduplication table points at a {} block", header.data_kind),
            });
        }
        let payload = read_payload(&mut self.stream, header.cmp_length as u64)?;
        let data = decode_payload(header.compression, &payload, header.length as usize)?;
        Ok(CachedBlock { header, data })
    }

    fn subheader(&self, lba: u64) -> Option<&[u8]> {
        let at = lba as usize * SUBHEADER_SIZE;
        self.cd.as_ref()?.subheaders.as_ref()?.get(at..at + SUBHEADER_SIZE)
    }

    fn apply_prefix(&self, sector: &mut [u8], lba: u64, mode: SectorMode) {
        let Some(cd) = self.cd.as_ref() else {
            reconstruct_prefix(sector, mode, lba);
            return;
        };
        match cd.prefix.get(lba) {
            Fixup::Unset | Fixup::Correct => reconstruct_prefix(sector, mode, lba),
            Fixup::Stored(offset) => copy_slot(&cd.prefix, offset, &mut sector[..PREFIX_SIZE]),
            _ => sector[..PREFIX_SIZE].fill(0),
        }
    }

    /// Must run after the prefix and subheader are in place: EDC covers them.
    fn apply_suffix(&self, sector: &mut [u8], lba: u64, layout: EccLayout) {
        let fixup = self.cd.as_ref().map_or(Fixup::Unset, |cd| cd.suffix.get(lba));
        let suffix = match layout {
            EccLayout::Mode1      => MODE1_EDC_OFFSET..MODE1_EDC_OFFSET + SUFFIX_SIZE,
            EccLayout::Mode2Form1 => MODE2_FORM1_EDC_OFFSET..MODE2_FORM1_EDC_OFFSET + MODE2_FORM1_SUFFIX_SIZE,
            EccLayout::Mode2Form2 => MODE2_FORM2_EDC_OFFSET..MODE2_FORM2_EDC_OFFSET + MODE2_FORM2_SUFFIX_SIZE,
        };
        match (fixup, layout) {
            (Fixup::Unset | Fixup::Correct, _)
            | (Fixup::Mode2Form1Ok, EccLayout::Mode2Form1)
            | (Fixup::Mode2Form2Ok, EccLayout::Mode2Form2) => reconstruct_ecc(sector, layout),
            (Fixup::Stored(offset), _) => {
                if let Some(cd) = self.cd.as_ref() {
                    copy_slot(&cd.suffix, offset, &mut sector[suffix]);
                }
            }
            // not dumped, or a Form 2 sector mastered without EDC
            _ => sector[suffix].fill(0),
        }
    }
}

fn copy_slot(table: &FixupTable, offset: u32, dst: &mut [u8]) {
    match table.slot(offset) {
        Some(slot) => dst.copy_from_slice(&slot[..dst.len()]),
        None => dst.fill(0),
    }
}

fn slice_sector(block: &CachedBlock, offset: u64, index: u64) -> Result<Vec<u8>, ImageError> {
    let size = block.header.sector_size as usize;
    let start = index as usize * size;
    block
        .data
        .get(start..start + size)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| ImageError::CorruptBlock {
            offset,
            reason: format!("sector {index} lies past the end of the block"),
        })
}
