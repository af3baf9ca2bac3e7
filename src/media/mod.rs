//! Media description: the media type code and the thin side tables that
//! travel with an image (tracks, geometry, tape layout, metadata strings,
//! dump provenance).

pub mod dump;
pub mod geometry;
pub mod metadata;
pub mod tape;
pub mod track;

use serde::Serialize;
use std::fmt;
use std::io;

pub use dump::{DumpExtent, DumpHardware};
pub use geometry::Geometry;
pub use metadata::Metadata;
pub use tape::{TapeFile, TapePartition};
pub use track::{Track, TrackType};

/// Broad family a media type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MediaClass {
    Block,
    Optical,
    Tape,
}

/// Media type code stored in the image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MediaType(pub u32);

impl MediaType {
    pub const UNKNOWN:        Self = Self(0);
    pub const GENERIC_HDD:    Self = Self(1);
    pub const FLASH_DRIVE:    Self = Self(2);
    pub const SECURE_DIGITAL: Self = Self(3);
    pub const COMPACT_FLASH:  Self = Self(4);
    pub const FLOPPY_35_DD:   Self = Self(10);
    pub const FLOPPY_35_HD:   Self = Self(11);
    pub const FLOPPY_525_DD:  Self = Self(12);
    pub const CD:             Self = Self(100);
    pub const CD_ROM:         Self = Self(101);
    pub const CD_ROM_XA:      Self = Self(102);
    pub const CD_DA:          Self = Self(103);
    pub const CD_I:           Self = Self(104);
    pub const CD_R:           Self = Self(105);
    pub const CD_RW:          Self = Self(106);
    pub const VIDEO_CD:       Self = Self(107);
    pub const DVD_ROM:        Self = Self(110);
    pub const DVD_R:          Self = Self(111);
    pub const BD_ROM:         Self = Self(120);
    pub const UNKNOWN_TAPE:   Self = Self(200);
    pub const DLT:            Self = Self(201);
    pub const LTO:            Self = Self(202);
    pub const DDS:            Self = Self(203);

    const NAMES: [(MediaType, &'static str); 23] = [
        (Self::UNKNOWN, "unknown"),
        (Self::GENERIC_HDD, "hdd"),
        (Self::FLASH_DRIVE, "flash"),
        (Self::SECURE_DIGITAL, "sd"),
        (Self::COMPACT_FLASH, "cf"),
        (Self::FLOPPY_35_DD, "floppy-35-dd"),
        (Self::FLOPPY_35_HD, "floppy-35-hd"),
        (Self::FLOPPY_525_DD, "floppy-525-dd"),
        (Self::CD, "cd"),
        (Self::CD_ROM, "cdrom"),
        (Self::CD_ROM_XA, "cdrom-xa"),
        (Self::CD_DA, "cdda"),
        (Self::CD_I, "cdi"),
        (Self::CD_R, "cdr"),
        (Self::CD_RW, "cdrw"),
        (Self::VIDEO_CD, "vcd"),
        (Self::DVD_ROM, "dvdrom"),
        (Self::DVD_R, "dvdr"),
        (Self::BD_ROM, "bdrom"),
        (Self::UNKNOWN_TAPE, "tape"),
        (Self::DLT, "dlt"),
        (Self::LTO, "lto"),
        (Self::DDS, "dds"),
    ];

    pub fn class(self) -> MediaClass {
        match self.0 {
            100..=199 => MediaClass::Optical,
            200..=299 => MediaClass::Tape,
            _ => MediaClass::Block,
        }
    }

    /// Media whose raw sectors use the 2352-byte CD layout.
    pub fn is_compact_disc(self) -> bool {
        (100..110).contains(&self.0)
    }

    pub fn from_name(s: &str) -> Option<Self> {
        let s = s.to_ascii_lowercase();
        Self::NAMES.iter().find(|(_, n)| *n == s).map(|(m, _)| *m)
    }

    pub fn name(self) -> Option<&'static str> {
        Self::NAMES.iter().find(|(m, _)| *m == self).map(|(_, n)| *n)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(n) => f.write_str(n),
            None => write!(f, "media type {}", self.0),
        }
    }
}

pub(crate) fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes() {
        assert_eq!(MediaType::CD_ROM.class(), MediaClass::Optical);
        assert!(MediaType::CD_DA.is_compact_disc());
        assert!(!MediaType::DVD_ROM.is_compact_disc());
        assert_eq!(MediaType::LTO.class(), MediaClass::Tape);
        assert_eq!(MediaType::GENERIC_HDD.class(), MediaClass::Block);
    }

    #[test]
    fn names_round_trip() {
        assert_eq!(MediaType::from_name("CDROM"), Some(MediaType::CD_ROM));
        assert_eq!(MediaType::CD_ROM.to_string(), "cdrom");
        assert_eq!(MediaType(9999).to_string(), "media type 9999");
        assert_eq!(MediaType::from_name("nope"), None);
    }
}
