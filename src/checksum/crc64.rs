//! CRC64 with the ECMA-182 polynomial in reflected form (the XZ variant).
//!
//! Every Data Block, DDT block, Index and side table carries one of these
//! over its payload.

use crc::{Crc, Digest, CRC_64_XZ};

static CRC64_XZ: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// Incremental CRC64 context.
pub struct Crc64 {
    digest: Digest<'static, u64>,
}

impl Default for Crc64 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc64 {
    pub fn new() -> Self {
        Self { digest: CRC64_XZ.digest() }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    pub fn finalize(self) -> u64 {
        self.digest.finalize()
    }
}

/// One-shot CRC64 of `data`.
pub fn crc64(data: &[u8]) -> u64 {
    CRC64_XZ.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(crc64(b"123456789"), 0x995D_C9BB_DF19_39FA);
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(crc64(&[]), 0);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let data = vec![0u8; 2048];
        let mut ctx = Crc64::new();
        for chunk in data.chunks(100) {
            ctx.update(chunk);
        }
        assert_eq!(ctx.finalize(), crc64(&data));
        assert_eq!(crc64(&data), 0x38FB_6818_2427_E347);
    }
}
