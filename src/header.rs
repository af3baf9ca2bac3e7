//! Image header: the fixed 72-byte record at offset 0.
//!
//! # Layout
//! ```text
//! magic "DEDUPIMG"        8
//! application name        32   UTF-16LE, zero padded
//! format major / minor    1 + 1
//! app major / minor       1 + 1
//! media type              4
//! index offset            8
//! creation time           8    100 ns ticks since 1601-01-01 UTC
//! last written time       8
//! ```
//! Written with `index_offset = 0` at creation and rewritten on close.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use std::io::{self, Read, Write};
use thiserror::Error;

use crate::media::MediaType;

pub const MAGIC: &[u8; 8] = b"DEDUPIMG";
pub const FORMAT_MAJOR: u8 = 1;
pub const FORMAT_MINOR: u8 = 0;
pub const HEADER_SIZE: usize = 72;
pub const APPLICATION_FIELD_SIZE: usize = 32;

/// Ticks between 1601-01-01 and 1970-01-01.
const UNIX_EPOCH_TICKS: i64 = 116_444_736_000_000_000;
const TICKS_PER_SECOND: i64 = 10_000_000;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Invalid magic number")]
    InvalidMagic,
    #[error("Unsupported format version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub fn ticks_from_datetime(t: DateTime<Utc>) -> i64 {
    t.timestamp() * TICKS_PER_SECOND + t.timestamp_subsec_nanos() as i64 / 100 + UNIX_EPOCH_TICKS
}

pub fn datetime_from_ticks(ticks: i64) -> DateTime<Utc> {
    let since_unix = ticks - UNIX_EPOCH_TICKS;
    let secs  = since_unix.div_euclid(TICKS_PER_SECOND);
    let nanos = (since_unix.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::from_timestamp(secs, nanos).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    pub application:       String,
    pub format_major:      u8,
    pub format_minor:      u8,
    pub application_major: u8,
    pub application_minor: u8,
    pub media_type:        MediaType,
    pub index_offset:      u64,
    pub creation_time:     DateTime<Utc>,
    pub last_written_time: DateTime<Utc>,
}

impl ImageHeader {
    /// Fresh header stamped with this crate's name and version.
    pub fn new(media_type: MediaType) -> Self {
        let now = Utc::now();
        Self {
            application:       env!("CARGO_PKG_NAME").to_string(),
            format_major:      FORMAT_MAJOR,
            format_minor:      FORMAT_MINOR,
            application_major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            application_minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            media_type,
            index_offset:      0,
            creation_time:     now,
            last_written_time: now,
        }
    }

    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_all(MAGIC)?;
        let mut app = [0u8; APPLICATION_FIELD_SIZE];
        for (slot, unit) in app.chunks_exact_mut(2).zip(self.application.encode_utf16()) {
            slot.copy_from_slice(&unit.to_le_bytes());
        }
        w.write_all(&app)?;
        w.write_u8(self.format_major)?;
        w.write_u8(self.format_minor)?;
        w.write_u8(self.application_major)?;
        w.write_u8(self.application_minor)?;
        w.write_u32::<LittleEndian>(self.media_type.0)?;
        w.write_u64::<LittleEndian>(self.index_offset)?;
        w.write_i64::<LittleEndian>(ticks_from_datetime(self.creation_time))?;
        w.write_i64::<LittleEndian>(ticks_from_datetime(self.last_written_time))?;
        Ok(())
    }

    pub fn read<R: Read>(mut r: R) -> Result<Self, HeaderError> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(HeaderError::InvalidMagic);
        }
        let mut app = [0u8; APPLICATION_FIELD_SIZE];
        r.read_exact(&mut app)?;
        let units: Vec<u16> = app
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .take_while(|&u| u != 0)
            .collect();
        let application = String::from_utf16_lossy(&units);

        let format_major = r.read_u8()?;
        let format_minor = r.read_u8()?;
        if format_major > FORMAT_MAJOR {
            return Err(HeaderError::UnsupportedVersion { major: format_major, minor: format_minor });
        }
        Ok(Self {
            application,
            format_major,
            format_minor,
            application_major: r.read_u8()?,
            application_minor: r.read_u8()?,
            media_type:        MediaType(r.read_u32::<LittleEndian>()?),
            index_offset:      r.read_u64::<LittleEndian>()?,
            creation_time:     datetime_from_ticks(r.read_i64::<LittleEndian>()?),
            last_written_time: datetime_from_ticks(r.read_i64::<LittleEndian>()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_round_trip() {
        let mut h = ImageHeader::new(MediaType::CD_ROM);
        h.index_offset = 0x1234_5678;
        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
        let back = ImageHeader::read(Cursor::new(&buf)).unwrap();
        assert_eq!(back.application, "dedupimg");
        assert_eq!(back.media_type, MediaType::CD_ROM);
        assert_eq!(back.index_offset, 0x1234_5678);
        assert_eq!(ticks_from_datetime(back.creation_time), ticks_from_datetime(h.creation_time));
    }

    #[test]
    fn long_application_name_truncated() {
        let mut h = ImageHeader::new(MediaType::GENERIC_HDD);
        h.application = "x".repeat(40);
        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        let back = ImageHeader::read(Cursor::new(&buf)).unwrap();
        assert_eq!(back.application.len(), APPLICATION_FIELD_SIZE / 2);
    }

    #[test]
    fn bad_magic() {
        let buf = vec![0u8; HEADER_SIZE];
        assert!(matches!(ImageHeader::read(Cursor::new(&buf)), Err(HeaderError::InvalidMagic)));
    }

    #[test]
    fn newer_major_rejected() {
        let mut h = ImageHeader::new(MediaType::GENERIC_HDD);
        h.format_major = FORMAT_MAJOR + 1;
        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        assert!(matches!(
            ImageHeader::read(Cursor::new(&buf)),
            Err(HeaderError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn tick_epoch() {
        let t = datetime_from_ticks(UNIX_EPOCH_TICKS);
        assert_eq!(t.timestamp(), 0);
        assert_eq!(ticks_from_datetime(t), UNIX_EPOCH_TICKS);
    }
}
