//! Payload integrity check over every indexed Data and DDT block.

use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;
use std::io::{self, Read, Seek, SeekFrom};
use tracing::{info, warn};

use super::{Image, ImageError};
use crate::block::{read_payload, tag_to_string, BlockKind, DataBlockHeader, DataKind, DdtHeader};
use crate::checksum::crc64;
use crate::index::IndexEntry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum VerifyProblem {
    /// CRC64 of the stored payload differs from the header.
    CrcMismatch { stored: u64, computed: u64 },
    /// Something other than the indexed kind sits at the offset.
    KindMismatch { found: String },
    /// Header or payload runs past the end of the image.
    Truncated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockFailure {
    pub offset:    u64,
    pub kind:      BlockKind,
    pub data_kind: DataKind,
    pub problem:   VerifyProblem,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Blocks whose payload was checked.
    pub checked:  usize,
    pub failures: Vec<BlockFailure>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

impl<S: Read + Seek> Image<S> {
    /// Recompute the stored-payload CRC64 of every Data and DDT block.
    /// Nothing is repaired; failures are listed per block.
    pub fn verify(&mut self) -> Result<VerifyReport, ImageError> {
        let entries: Vec<IndexEntry> = self.index.iter().copied().collect();
        let mut report = VerifyReport::default();

        for entry in entries {
            let Some(kind @ (BlockKind::Data | BlockKind::DeduplicationTable)) = entry.kind() else {
                continue;
            };
            report.checked += 1;
            let outcome = check_block(&mut self.stream, &entry, kind)?;
            if let Some(problem) = outcome {
                warn!(offset = entry.offset, %kind, data_kind = %entry.data_kind, ?problem, "block failed verification");
                report.failures.push(BlockFailure { offset: entry.offset, kind, data_kind: entry.data_kind, problem });
            }
        }

        info!(checked = report.checked, failures = report.failures.len(), "verified image");
        Ok(report)
    }
}

fn truncated<T>(result: io::Result<T>) -> Result<Result<T, VerifyProblem>, ImageError> {
    match result {
        Ok(v) => Ok(Ok(v)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(Err(VerifyProblem::Truncated)),
        Err(e) => Err(e.into()),
    }
}

fn check_block<R: Read + Seek>(
    r:     &mut R,
    entry: &IndexEntry,
    kind:  BlockKind,
) -> Result<Option<VerifyProblem>, ImageError> {
    r.seek(SeekFrom::Start(entry.offset))?;
    let tag = match truncated(r.read_u32::<LittleEndian>())? {
        Ok(tag) => tag,
        Err(problem) => return Ok(Some(problem)),
    };
    if tag != kind.tag() {
        return Ok(Some(VerifyProblem::KindMismatch { found: tag_to_string(tag) }));
    }

    let header = match kind {
        BlockKind::Data => truncated(DataBlockHeader::read_after_tag(&mut *r))?
            .map(|h| (h.cmp_length as u64, h.cmp_crc64)),
        _ => truncated(DdtHeader::read_after_tag(&mut *r))?.map(|h| (h.cmp_length, h.cmp_crc64)),
    };
    let (cmp_length, stored) = match header {
        Ok(v) => v,
        Err(problem) => return Ok(Some(problem)),
    };
    let payload = match truncated(read_payload(&mut *r, cmp_length))? {
        Ok(p) => p,
        Err(problem) => return Ok(Some(problem)),
    };
    let computed = crc64(&payload);
    Ok((computed != stored).then_some(VerifyProblem::CrcMismatch { stored, computed }))
}
