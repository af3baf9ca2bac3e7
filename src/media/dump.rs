//! Dump provenance: which drive and software produced which extents.
//!
//! ```text
//! header   kind u32 · count u16 · length u32 · crc64 u64
//! entry    8 × string length u32 · extent count u32
//!          strings (UTF-8, unterminated) · extents (start u64, end u64)
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Read, Write};

use super::invalid_data;
use crate::block::BlockKind;
use crate::checksum::crc64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DumpExtent {
    pub start: u64,
    pub end:   u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DumpHardware {
    pub manufacturer:     String,
    pub model:            String,
    pub revision:         String,
    pub firmware:         String,
    pub serial:           String,
    pub software_name:    String,
    pub software_version: String,
    pub software_os:      String,
    pub extents:          Vec<DumpExtent>,
}

impl DumpHardware {
    fn strings(&self) -> [&str; 8] {
        [
            &self.manufacturer,
            &self.model,
            &self.revision,
            &self.firmware,
            &self.serial,
            &self.software_name,
            &self.software_version,
            &self.software_os,
        ]
    }

    fn write_entry<W: Write>(&self, mut w: W) -> io::Result<()> {
        let strings = self.strings();
        for s in strings {
            w.write_u32::<LittleEndian>(s.len() as u32)?;
        }
        w.write_u32::<LittleEndian>(self.extents.len() as u32)?;
        for s in strings {
            w.write_all(s.as_bytes())?;
        }
        for e in &self.extents {
            w.write_u64::<LittleEndian>(e.start)?;
            w.write_u64::<LittleEndian>(e.end)?;
        }
        Ok(())
    }

    fn read_entry<R: Read>(mut r: R) -> io::Result<Self> {
        let mut lengths = [0usize; 8];
        for l in lengths.iter_mut() {
            *l = r.read_u32::<LittleEndian>()? as usize;
        }
        let extent_count = r.read_u32::<LittleEndian>()? as usize;
        let mut strings: Vec<String> = Vec::with_capacity(8);
        for len in lengths {
            let mut buf = vec![0u8; len];
            r.read_exact(&mut buf)?;
            strings.push(String::from_utf8(buf).map_err(|e| invalid_data(e.to_string()))?);
        }
        let mut extents = Vec::with_capacity(extent_count);
        for _ in 0..extent_count {
            extents.push(DumpExtent {
                start: r.read_u64::<LittleEndian>()?,
                end:   r.read_u64::<LittleEndian>()?,
            });
        }
        let mut it = strings.into_iter();
        let mut next = || it.next().unwrap_or_default();
        Ok(Self {
            manufacturer:     next(),
            model:            next(),
            revision:         next(),
            firmware:         next(),
            serial:           next(),
            software_name:    next(),
            software_version: next(),
            software_os:      next(),
            extents,
        })
    }
}

pub fn write_dump_hardware_block<W: Write>(mut w: W, entries: &[DumpHardware]) -> io::Result<()> {
    let mut payload: Vec<u8> = Vec::new();
    for e in entries {
        e.write_entry(&mut payload)?;
    }
    w.write_u32::<LittleEndian>(BlockKind::DumpHardware.tag())?;
    w.write_u16::<LittleEndian>(entries.len() as u16)?;
    w.write_u32::<LittleEndian>(payload.len() as u32)?;
    w.write_u64::<LittleEndian>(crc64(&payload))?;
    w.write_all(&payload)
}

pub fn read_dump_hardware_block<R: Read>(mut r: R) -> io::Result<Vec<DumpHardware>> {
    let count  = r.read_u16::<LittleEndian>()? as usize;
    let length = r.read_u32::<LittleEndian>()? as usize;
    let crc    = r.read_u64::<LittleEndian>()?;
    let mut payload = vec![0u8; length];
    r.read_exact(&mut payload)?;
    if crc64(&payload) != crc {
        return Err(invalid_data("dump hardware checksum mismatch"));
    }
    let mut cur = &payload[..];
    (0..count).map(|_| DumpHardware::read_entry(&mut cur)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip() {
        let entries = vec![DumpHardware {
            manufacturer:  "PLEXTOR".into(),
            model:         "DVDR PX-716A".into(),
            firmware:      "1.11".into(),
            software_name: "dedupimg".into(),
            extents:       vec![DumpExtent { start: 0, end: 333_000 }],
            ..Default::default()
        }];
        let mut buf = Vec::new();
        write_dump_hardware_block(&mut buf, &entries).unwrap();
        assert_eq!(read_dump_hardware_block(Cursor::new(&buf[4..])).unwrap(), entries);
    }
}
