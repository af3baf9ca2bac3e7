//! On-disk block headers and payload framing.
//!
//! Every block starts with a 4-byte ASCII kind tag read as a little-endian
//! `u32`.  Data Blocks and DDT blocks carry the compression code, both
//! lengths and a CRC64 of the stored and of the uncompressed payload.
//!
//! # Layout
//! ```text
//! Data Block header (36 bytes)
//!   kind u32 · data kind u16 · compression u16 · sector size u32
//!   compressed length u32 · length u32 · crc64 compressed u64 · crc64 u64
//!
//! DDT header (49 bytes)
//!   kind u32 · data kind u16 · compression u16 · shift u8 · entries u64
//!   compressed length u64 · length u64 · crc64 compressed u64 · crc64 u64
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::fmt;
use std::io::{self, Read, Write};

use crate::checksum::crc64;
use crate::codec::{get_codec, CodecError, CompressionKind};

pub const DATA_BLOCK_HEADER_SIZE: usize = 36;
pub const DDT_HEADER_SIZE:        usize = 49;

const fn tag(b: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*b)
}

// ── Block kinds ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BlockKind {
    Data,
    DeduplicationTable,
    Index,
    Index2,
    Geometry,
    Metadata,
    Tracks,
    CicmXml,
    Json,
    Checksum,
    DumpHardware,
    TapeFile,
    TapePartition,
    CompactDiscIndexes,
}

impl BlockKind {
    pub const ALL: [BlockKind; 14] = [
        BlockKind::Data,
        BlockKind::DeduplicationTable,
        BlockKind::Index,
        BlockKind::Index2,
        BlockKind::Geometry,
        BlockKind::Metadata,
        BlockKind::Tracks,
        BlockKind::CicmXml,
        BlockKind::Json,
        BlockKind::Checksum,
        BlockKind::DumpHardware,
        BlockKind::TapeFile,
        BlockKind::TapePartition,
        BlockKind::CompactDiscIndexes,
    ];

    pub const fn tag(self) -> u32 {
        match self {
            BlockKind::Data               => tag(b"DBLK"),
            BlockKind::DeduplicationTable => tag(b"DDT*"),
            BlockKind::Index              => tag(b"INDX"),
            BlockKind::Index2             => tag(b"IDX2"),
            BlockKind::Geometry           => tag(b"GEOM"),
            BlockKind::Metadata           => tag(b"META"),
            BlockKind::Tracks             => tag(b"TRKS"),
            BlockKind::CicmXml            => tag(b"CICM"),
            BlockKind::Json               => tag(b"JSON"),
            BlockKind::Checksum           => tag(b"CKSM"),
            BlockKind::DumpHardware       => tag(b"DMP*"),
            BlockKind::TapeFile           => tag(b"TFLE"),
            BlockKind::TapePartition      => tag(b"TPBT"),
            BlockKind::CompactDiscIndexes => tag(b"CDIX"),
        }
    }

    pub fn from_tag(v: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == v)
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.tag().to_le_bytes();
        f.write_str(&String::from_utf8_lossy(&bytes))
    }
}

/// Render an arbitrary kind tag for diagnostics.
pub fn tag_to_string(v: u32) -> String {
    v.to_le_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
        .collect()
}

// ── Data kinds ───────────────────────────────────────────────────────────────

/// What a Data or DDT block holds.  Open-ended: every value not listed
/// among the structural kinds is a media tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DataKind(pub u16);

impl DataKind {
    pub const NO_DATA:                      Self = Self(0);
    pub const USER_DATA:                    Self = Self(1);
    pub const COMPACT_DISC_PARTIAL_TOC:     Self = Self(2);
    pub const COMPACT_DISC_SESSION_INFO:    Self = Self(3);
    pub const COMPACT_DISC_TOC:             Self = Self(4);
    pub const COMPACT_DISC_PMA:             Self = Self(5);
    pub const COMPACT_DISC_ATIP:            Self = Self(6);
    pub const COMPACT_DISC_LEAD_IN_CD_TEXT: Self = Self(7);
    pub const DVD_PFI:                      Self = Self(8);
    pub const DVD_LEAD_IN_CMI:              Self = Self(9);
    pub const DVD_DISC_KEY:                 Self = Self(10);
    pub const SCSI_INQUIRY:                 Self = Self(60);
    pub const SCSI_MODE_PAGE_2A:            Self = Self(61);
    pub const ATA_IDENTIFY:                 Self = Self(62);
    pub const ATAPI_IDENTIFY:               Self = Self(63);
    pub const PCMCIA_CIS:                   Self = Self(64);
    pub const SECURE_DIGITAL_CID:           Self = Self(65);
    pub const SECURE_DIGITAL_CSD:           Self = Self(66);
    pub const USB_DESCRIPTORS:              Self = Self(68);
    pub const CD_SECTOR_PREFIX:             Self = Self(69);
    pub const CD_SECTOR_SUFFIX:             Self = Self(70);
    pub const CD_SECTOR_SUBCHANNEL:         Self = Self(71);
    pub const CD_SECTOR_PREFIX_CORRECTED:   Self = Self(72);
    pub const CD_SECTOR_SUFFIX_CORRECTED:   Self = Self(73);
    pub const COMPACT_DISC_MODE2_SUBHEADER: Self = Self(78);

    /// Kinds the container itself interprets.
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            Self::NO_DATA
                | Self::USER_DATA
                | Self::CD_SECTOR_PREFIX
                | Self::CD_SECTOR_SUFFIX
                | Self::CD_SECTOR_SUBCHANNEL
                | Self::CD_SECTOR_PREFIX_CORRECTED
                | Self::CD_SECTOR_SUFFIX_CORRECTED
                | Self::COMPACT_DISC_MODE2_SUBHEADER
        )
    }

    pub fn is_media_tag(self) -> bool {
        !self.is_structural()
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::NO_DATA                      => "no data",
            Self::USER_DATA                    => "user data",
            Self::CD_SECTOR_PREFIX             => "CD sector prefix",
            Self::CD_SECTOR_SUFFIX             => "CD sector suffix",
            Self::CD_SECTOR_SUBCHANNEL         => "CD subchannel",
            Self::CD_SECTOR_PREFIX_CORRECTED   => "CD prefix fixups",
            Self::CD_SECTOR_SUFFIX_CORRECTED   => "CD suffix fixups",
            Self::COMPACT_DISC_MODE2_SUBHEADER => "CD Mode 2 subheaders",
            _ => return write!(f, "media tag {}", self.0),
        };
        f.write_str(name)
    }
}

// ── Data Block header ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataBlockHeader {
    pub data_kind:   DataKind,
    pub compression: u16,
    pub sector_size: u32,
    pub cmp_length:  u32,
    pub length:      u32,
    pub cmp_crc64:   u64,
    pub crc64:       u64,
}

impl DataBlockHeader {
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(BlockKind::Data.tag())?;
        w.write_u16::<LittleEndian>(self.data_kind.0)?;
        w.write_u16::<LittleEndian>(self.compression)?;
        w.write_u32::<LittleEndian>(self.sector_size)?;
        w.write_u32::<LittleEndian>(self.cmp_length)?;
        w.write_u32::<LittleEndian>(self.length)?;
        w.write_u64::<LittleEndian>(self.cmp_crc64)?;
        w.write_u64::<LittleEndian>(self.crc64)?;
        Ok(())
    }

    /// Parse the fields following an already-consumed kind tag.
    pub fn read_after_tag<R: Read>(mut r: R) -> io::Result<Self> {
        Ok(Self {
            data_kind:   DataKind(r.read_u16::<LittleEndian>()?),
            compression: r.read_u16::<LittleEndian>()?,
            sector_size: r.read_u32::<LittleEndian>()?,
            cmp_length:  r.read_u32::<LittleEndian>()?,
            length:      r.read_u32::<LittleEndian>()?,
            cmp_crc64:   r.read_u64::<LittleEndian>()?,
            crc64:       r.read_u64::<LittleEndian>()?,
        })
    }

    pub fn read<R: Read>(mut r: R) -> io::Result<Self> {
        expect_tag(&mut r, BlockKind::Data)?;
        Self::read_after_tag(r)
    }
}

// ── DDT header ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DdtHeader {
    pub data_kind:   DataKind,
    pub compression: u16,
    pub shift:       u8,
    pub entries:     u64,
    pub cmp_length:  u64,
    pub length:      u64,
    pub cmp_crc64:   u64,
    pub crc64:       u64,
}

impl DdtHeader {
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(BlockKind::DeduplicationTable.tag())?;
        w.write_u16::<LittleEndian>(self.data_kind.0)?;
        w.write_u16::<LittleEndian>(self.compression)?;
        w.write_u8(self.shift)?;
        w.write_u64::<LittleEndian>(self.entries)?;
        w.write_u64::<LittleEndian>(self.cmp_length)?;
        w.write_u64::<LittleEndian>(self.length)?;
        w.write_u64::<LittleEndian>(self.cmp_crc64)?;
        w.write_u64::<LittleEndian>(self.crc64)?;
        Ok(())
    }

    pub fn read_after_tag<R: Read>(mut r: R) -> io::Result<Self> {
        Ok(Self {
            data_kind:   DataKind(r.read_u16::<LittleEndian>()?),
            compression: r.read_u16::<LittleEndian>()?,
            shift:       r.read_u8()?,
            entries:     r.read_u64::<LittleEndian>()?,
            cmp_length:  r.read_u64::<LittleEndian>()?,
            length:      r.read_u64::<LittleEndian>()?,
            cmp_crc64:   r.read_u64::<LittleEndian>()?,
            crc64:       r.read_u64::<LittleEndian>()?,
        })
    }

    pub fn read<R: Read>(mut r: R) -> io::Result<Self> {
        expect_tag(&mut r, BlockKind::DeduplicationTable)?;
        Self::read_after_tag(r)
    }
}

fn expect_tag<R: Read>(r: &mut R, kind: BlockKind) -> io::Result<()> {
    let found = r.read_u32::<LittleEndian>()?;
    if found != kind.tag() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("expected {kind} block, found '{}'", tag_to_string(found)),
        ));
    }
    Ok(())
}

// ── Payload framing ──────────────────────────────────────────────────────────

/// Read exactly `len` stored payload bytes without trusting `len` for the
/// allocation up front.
pub fn read_payload<R: Read>(r: R, len: u64) -> io::Result<Vec<u8>> {
    let mut payload = Vec::new();
    r.take(len).read_to_end(&mut payload)?;
    if (payload.len() as u64) < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("payload truncated: {} of {len} bytes", payload.len()),
        ));
    }
    Ok(payload)
}

/// Compressed payload plus the bookkeeping a header needs.
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    pub compression: CompressionKind,
    pub payload:     Vec<u8>,
    pub length:      usize,
    pub crc64:       u64,
    pub cmp_crc64:   u64,
}

/// Compress `data` with `requested`, falling back to storing it verbatim
/// when the codec does not make it smaller.
pub fn encode_payload(data: &[u8], requested: CompressionKind) -> Result<EncodedPayload, CodecError> {
    let crc = crc64(data);
    if requested != CompressionKind::None && !data.is_empty() {
        let compressed = get_codec(requested).compress(data)?;
        if compressed.len() < data.len() {
            return Ok(EncodedPayload {
                compression: requested,
                cmp_crc64:   crc64(&compressed),
                payload:     compressed,
                length:      data.len(),
                crc64:       crc,
            });
        }
    }
    Ok(EncodedPayload {
        compression: CompressionKind::None,
        payload:     data.to_vec(),
        length:      data.len(),
        crc64:       crc,
        cmp_crc64:   crc,
    })
}

/// Reverse [`encode_payload`].  The result is checked against
/// `expected_len` but not against any CRC.
pub fn decode_payload(
    compression:  u16,
    payload:      &[u8],
    expected_len: usize,
) -> Result<Vec<u8>, CodecError> {
    let kind = CompressionKind::from_u16(compression)
        .ok_or(CodecError::UnsupportedCompression(compression))?;
    let data = get_codec(kind).decompress(payload, expected_len)?;
    if data.len() != expected_len {
        return Err(CodecError::LengthMismatch { expected: expected_len, actual: data.len() });
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn kind_tags_are_ascii_little_endian() {
        assert_eq!(BlockKind::Data.tag(), 0x4B4C_4244);
        assert_eq!(BlockKind::DeduplicationTable.tag(), 0x2A54_4444);
        assert_eq!(BlockKind::Index.tag(), 0x5844_4E49);
        assert_eq!(BlockKind::from_tag(0x3258_4449), Some(BlockKind::Index2));
        assert_eq!(BlockKind::from_tag(0xDEAD_BEEF), None);
        assert_eq!(BlockKind::Tracks.to_string(), "TRKS");
    }

    #[test]
    fn data_header_is_36_bytes() {
        let h = DataBlockHeader {
            data_kind:   DataKind::USER_DATA,
            compression: CompressionKind::Lzma as u16,
            sector_size: 2048,
            cmp_length:  100,
            length:      8192,
            cmp_crc64:   1,
            crc64:       2,
        };
        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        assert_eq!(buf.len(), DATA_BLOCK_HEADER_SIZE);
        assert_eq!(DataBlockHeader::read(Cursor::new(&buf)).unwrap(), h);
    }

    #[test]
    fn ddt_header_is_49_bytes() {
        let h = DdtHeader {
            data_kind:   DataKind::USER_DATA,
            compression: 0,
            shift:       12,
            entries:     1000,
            cmp_length:  8000,
            length:      8000,
            cmp_crc64:   7,
            crc64:       7,
        };
        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        assert_eq!(buf.len(), DDT_HEADER_SIZE);
        assert_eq!(DdtHeader::read(Cursor::new(&buf)).unwrap(), h);
    }

    #[test]
    fn wrong_tag_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"INDX");
        buf.extend_from_slice(&[0u8; 32]);
        assert!(DataBlockHeader::read(Cursor::new(&buf)).is_err());
    }

    #[test]
    fn incompressible_payload_stored_verbatim() {
        let data: Vec<u8> = (0..64u32).map(|i| (i.wrapping_mul(0x9E37_79B9) >> 24) as u8).collect();
        let enc = encode_payload(&data, CompressionKind::Lzma).unwrap();
        assert_eq!(enc.compression, CompressionKind::None);
        assert_eq!(enc.payload, data);
        assert_eq!(enc.crc64, enc.cmp_crc64);
    }

    #[test]
    fn compressible_payload_shrinks() {
        let data = vec![0x5Au8; 16 * 2048];
        let enc = encode_payload(&data, CompressionKind::Lzma).unwrap();
        assert_eq!(enc.compression, CompressionKind::Lzma);
        assert!(enc.payload.len() < data.len());
        let back = decode_payload(enc.compression as u16, &enc.payload, data.len()).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn unknown_compression_code() {
        assert!(matches!(
            decode_payload(99, &[], 0),
            Err(CodecError::UnsupportedCompression(99))
        ));
    }
}
