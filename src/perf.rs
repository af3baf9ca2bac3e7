//! Side-table compression for `close`.
//!
//! # Parallel compression
//!
//! The tables written on close (media tags, CD prefix/suffix streams, Mode 2
//! subheaders, subchannel, fixup arrays) are independent of each other, so
//! [`encode_side_tables`] compresses them concurrently with Rayon when the
//! `parallel` feature is enabled.  Output order always matches input order,
//! so the bytes on disk do not depend on the feature.

use crate::block::{encode_payload, DataKind, EncodedPayload};
use crate::codec::{CodecError, CompressionKind};

// ── Side tables ──────────────────────────────────────────────────────────────

/// How a side table is framed on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideTableShape {
    /// A Data Block; `sector_size` is 0 for whole-media blobs.
    Data { sector_size: u32 },
    /// A DDT block of `entries` fixed-size entries.
    Table { shift: u8, entries: u64 },
}

/// One table waiting to be compressed.
#[derive(Debug, Clone)]
pub struct SideTable {
    pub data_kind:   DataKind,
    pub shape:       SideTableShape,
    pub compression: CompressionKind,
    pub data:        Vec<u8>,
}

impl SideTable {
    pub fn data(data_kind: DataKind, compression: CompressionKind, data: Vec<u8>) -> Self {
        Self { data_kind, shape: SideTableShape::Data { sector_size: 0 }, compression, data }
    }

    /// A `u32`-per-sector fixup array.
    pub fn fixups(data_kind: DataKind, compression: CompressionKind, entries: &[u32]) -> Self {
        let data = entries.iter().flat_map(|e| e.to_le_bytes()).collect();
        Self {
            data_kind,
            shape: SideTableShape::Table { shift: 0, entries: entries.len() as u64 },
            compression,
            data,
        }
    }
}

/// A compressed table, ready to frame.
#[derive(Debug, Clone)]
pub struct EncodedSideTable {
    pub data_kind: DataKind,
    pub shape:     SideTableShape,
    pub encoded:   EncodedPayload,
}

fn encode_one(table: SideTable) -> Result<EncodedSideTable, CodecError> {
    let encoded = encode_payload(&table.data, table.compression)?;
    Ok(EncodedSideTable { data_kind: table.data_kind, shape: table.shape, encoded })
}

/// Compress every table, each on its own, keeping input order.
///
/// The first failure is returned and the remaining results are dropped.
pub fn encode_side_tables(tables: Vec<SideTable>) -> Result<Vec<EncodedSideTable>, CodecError> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        tables.into_par_iter().map(encode_one).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        tables.into_iter().map(encode_one).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::decode_payload;

    #[test]
    fn order_and_content_survive() {
        let tables = vec![
            SideTable::data(DataKind::SCSI_INQUIRY, CompressionKind::Lzma, vec![0x11; 4096]),
            SideTable::fixups(DataKind::CD_SECTOR_PREFIX_CORRECTED, CompressionKind::Lzma, &[0x2000_0000; 300]),
            SideTable::data(DataKind::ATA_IDENTIFY, CompressionKind::None, b"identify".to_vec()),
        ];
        let out = encode_side_tables(tables).unwrap();
        let kinds: Vec<DataKind> = out.iter().map(|t| t.data_kind).collect();
        assert_eq!(
            kinds,
            [DataKind::SCSI_INQUIRY, DataKind::CD_SECTOR_PREFIX_CORRECTED, DataKind::ATA_IDENTIFY]
        );
        assert_eq!(out[1].shape, SideTableShape::Table { shift: 0, entries: 300 });
        assert_eq!(out[1].encoded.length, 1200);

        let first = &out[0].encoded;
        assert_eq!(first.compression, CompressionKind::Lzma);
        let back = decode_payload(first.compression as u16, &first.payload, first.length).unwrap();
        assert_eq!(back, vec![0x11; 4096]);

        assert_eq!(out[2].encoded.compression, CompressionKind::None);
        assert_eq!(out[2].encoded.payload, b"identify");
    }

    #[test]
    fn incompressible_tables_are_stored() {
        let noise: Vec<u8> = (0..64u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8).collect();
        let out = encode_side_tables(vec![SideTable::data(DataKind::PCMCIA_CIS, CompressionKind::Lzma, noise.clone())])
            .unwrap();
        assert_eq!(out[0].encoded.compression, CompressionKind::None);
        assert_eq!(out[0].encoded.payload, noise);
    }
}
