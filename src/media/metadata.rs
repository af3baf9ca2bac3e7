//! Free-form descriptive strings (`META` block).
//!
//! The block is a fixed table of `(offset, length)` pairs, one per field,
//! followed by the UTF-16LE string bytes.  Offsets are relative to the block
//! start; an absent field has offset and length zero.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Read, Write};

use super::invalid_data;
use crate::block::BlockKind;

const FIELD_COUNT: usize = 12;
/// kind · block size · sequence · last sequence · 12 × (offset, length)
pub const METADATA_HEADER_SIZE: usize = 16 + FIELD_COUNT * 8;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub media_sequence:        i32,
    pub last_media_sequence:   i32,
    pub creator:               Option<String>,
    pub comments:              Option<String>,
    pub media_title:           Option<String>,
    pub media_manufacturer:    Option<String>,
    pub media_model:           Option<String>,
    pub media_serial_number:   Option<String>,
    pub media_barcode:         Option<String>,
    pub media_part_number:     Option<String>,
    pub drive_manufacturer:    Option<String>,
    pub drive_model:           Option<String>,
    pub drive_serial_number:   Option<String>,
    pub drive_firmware:        Option<String>,
}

impl Metadata {
    fn fields(&self) -> [&Option<String>; FIELD_COUNT] {
        [
            &self.creator,
            &self.comments,
            &self.media_title,
            &self.media_manufacturer,
            &self.media_model,
            &self.media_serial_number,
            &self.media_barcode,
            &self.media_part_number,
            &self.drive_manufacturer,
            &self.drive_model,
            &self.drive_serial_number,
            &self.drive_firmware,
        ]
    }

    fn fields_mut(&mut self) -> [&mut Option<String>; FIELD_COUNT] {
        [
            &mut self.creator,
            &mut self.comments,
            &mut self.media_title,
            &mut self.media_manufacturer,
            &mut self.media_model,
            &mut self.media_serial_number,
            &mut self.media_barcode,
            &mut self.media_part_number,
            &mut self.drive_manufacturer,
            &mut self.drive_model,
            &mut self.drive_serial_number,
            &mut self.drive_firmware,
        ]
    }

    /// Nothing worth a block.
    pub fn is_empty(&self) -> bool {
        self.media_sequence == 0
            && self.last_media_sequence == 0
            && self.fields().iter().all(|f| f.is_none())
    }

    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        let mut strings: Vec<u8> = Vec::new();
        let mut table = [(0u32, 0u32); FIELD_COUNT];
        for (slot, field) in table.iter_mut().zip(self.fields()) {
            if let Some(s) = field {
                let offset = METADATA_HEADER_SIZE + strings.len();
                for unit in s.encode_utf16() {
                    strings.extend_from_slice(&unit.to_le_bytes());
                }
                *slot = (offset as u32, (METADATA_HEADER_SIZE + strings.len() - offset) as u32);
            }
        }
        w.write_u32::<LittleEndian>(BlockKind::Metadata.tag())?;
        w.write_u32::<LittleEndian>((METADATA_HEADER_SIZE + strings.len()) as u32)?;
        w.write_i32::<LittleEndian>(self.media_sequence)?;
        w.write_i32::<LittleEndian>(self.last_media_sequence)?;
        for (offset, length) in table {
            w.write_u32::<LittleEndian>(offset)?;
            w.write_u32::<LittleEndian>(length)?;
        }
        w.write_all(&strings)
    }

    /// Parse a `META` block whose kind tag was already consumed.
    pub fn read_after_tag<R: Read>(mut r: R) -> io::Result<Self> {
        let block_size = r.read_u32::<LittleEndian>()? as usize;
        if block_size < METADATA_HEADER_SIZE {
            return Err(invalid_data("metadata block smaller than its header"));
        }
        let mut meta = Metadata {
            media_sequence:      r.read_i32::<LittleEndian>()?,
            last_media_sequence: r.read_i32::<LittleEndian>()?,
            ..Default::default()
        };
        let mut table = [(0u32, 0u32); FIELD_COUNT];
        for slot in table.iter_mut() {
            *slot = (r.read_u32::<LittleEndian>()?, r.read_u32::<LittleEndian>()?);
        }
        let mut body = vec![0u8; block_size - METADATA_HEADER_SIZE];
        r.read_exact(&mut body)?;

        for (field, (offset, length)) in meta.fields_mut().into_iter().zip(table) {
            if length == 0 {
                continue;
            }
            let start = (offset as usize)
                .checked_sub(METADATA_HEADER_SIZE)
                .ok_or_else(|| invalid_data("metadata string inside header"))?;
            let bytes = body
                .get(start..start + length as usize)
                .ok_or_else(|| invalid_data("metadata string past block end"))?;
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .take_while(|&u| u != 0)
                .collect();
            *field = Some(String::from_utf16_lossy(&units));
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn empty_metadata() {
        assert!(Metadata::default().is_empty());
    }

    #[test]
    fn round_trip() {
        let meta = Metadata {
            media_sequence: 1,
            last_media_sequence: 2,
            creator: Some("Ana".into()),
            media_title: Some("Disc \u{00e9}dition".into()),
            drive_firmware: Some("1.02".into()),
            ..Default::default()
        };
        assert!(!meta.is_empty());
        let mut buf = Vec::new();
        meta.write(&mut buf).unwrap();
        assert_eq!(Metadata::read_after_tag(Cursor::new(&buf[4..])).unwrap(), meta);
    }
}
