//! CD-ROM EDC and Reed-Solomon Product Code (P/Q parity).
//!
//! ECC parity is computed over the 4 header bytes at `0x0C` followed by
//! the sector body from `0x10`.  Mode 2 Form 1 sectors substitute a zero
//! address for the header.  Check and generation share [`ecc_parity`]
//! and differ only in compare vs store.

pub const EDC_POLY: u32 = 0xD801_8001;

const fn build_tables() -> ([u8; 256], [u8; 256], [u32; 256]) {
    let mut f = [0u8; 256];
    let mut b = [0u8; 256];
    let mut e = [0u32; 256];
    let mut i = 0usize;
    while i < 256 {
        let j = ((i << 1) ^ if i & 0x80 != 0 { 0x11D } else { 0 }) as u8;
        f[i] = j;
        b[i ^ j as usize] = i as u8;
        let mut edc = i as u32;
        let mut k = 0;
        while k < 8 {
            edc = (edc >> 1) ^ if edc & 1 != 0 { EDC_POLY } else { 0 };
            k += 1;
        }
        e[i] = edc;
        i += 1;
    }
    (f, b, e)
}

const TABLES: ([u8; 256], [u8; 256], [u32; 256]) = build_tables();
static ECC_F: [u8; 256] = TABLES.0;
static ECC_B: [u8; 256] = TABLES.1;
static EDC_TABLE: [u32; 256] = TABLES.2;

// ── EDC ──────────────────────────────────────────────────────────────────────

/// Continue an EDC over `data` from `edc`.
pub fn edc_update(mut edc: u32, data: &[u8]) -> u32 {
    for &b in data {
        edc = (edc >> 8) ^ EDC_TABLE[((edc ^ b as u32) & 0xFF) as usize];
    }
    edc
}

pub fn edc(data: &[u8]) -> u32 {
    edc_update(0, data)
}

// ── ECC ──────────────────────────────────────────────────────────────────────

/// Geometry of one of the two product-code passes.
#[derive(Debug, Clone, Copy)]
pub struct EccCode {
    pub major_count: usize,
    pub minor_count: usize,
    pub major_mult:  usize,
    pub minor_inc:   usize,
    /// Sector offset of the parity bytes.
    pub offset:      usize,
}

impl EccCode {
    pub const fn parity_len(&self) -> usize {
        self.major_count * 2
    }
}

pub const ECC_P: EccCode = EccCode { major_count: 86, minor_count: 24, major_mult: 2,  minor_inc: 86, offset: 0x81C };
pub const ECC_Q: EccCode = EccCode { major_count: 52, minor_count: 43, major_mult: 86, minor_inc: 88, offset: 0x8C8 };

/// Compute the parity of `code` into `parity`.
///
/// `address` stands in for sector bytes `0x0C..0x10`; `body` is the sector
/// from `0x10` onwards.
pub fn ecc_parity(address: &[u8; 4], body: &[u8], code: &EccCode, parity: &mut [u8]) {
    let size = code.major_count * code.minor_count;
    for major in 0..code.major_count {
        let mut index = (major >> 1) * code.major_mult + (major & 1);
        let mut a = 0u8;
        let mut b = 0u8;
        for _ in 0..code.minor_count {
            let t = if index < 4 { address[index] } else { body[index - 4] };
            index += code.minor_inc;
            if index >= size {
                index -= size;
            }
            a ^= t;
            b ^= t;
            a = ECC_F[a as usize];
        }
        a = ECC_B[(ECC_F[a as usize] ^ b) as usize];
        parity[major] = a;
        parity[major + code.major_count] = a ^ b;
    }
}

fn address_of(sector: &[u8], zero_address: bool) -> [u8; 4] {
    if zero_address {
        [0; 4]
    } else {
        [sector[0x0C], sector[0x0D], sector[0x0E], sector[0x0F]]
    }
}

/// Generate P then Q parity in place.
pub fn write_ecc(sector: &mut [u8], zero_address: bool) {
    for code in [ECC_P, ECC_Q] {
        let address = address_of(sector, zero_address);
        let mut parity = [0u8; 172];
        let parity = &mut parity[..code.parity_len()];
        ecc_parity(&address, &sector[0x10..], &code, parity);
        sector[code.offset..code.offset + parity.len()].copy_from_slice(parity);
    }
}

/// True when both P and Q parity match what is stored.
pub fn check_ecc(sector: &[u8], zero_address: bool) -> bool {
    let address = address_of(sector, zero_address);
    [ECC_P, ECC_Q].iter().all(|code| {
        let mut parity = [0u8; 172];
        let parity = &mut parity[..code.parity_len()];
        ecc_parity(&address, &sector[0x10..], code, parity);
        sector[code.offset..code.offset + parity.len()] == *parity
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_spot_values() {
        assert_eq!(ECC_F[0x80], 0x1D);
        assert_eq!(ECC_F[0x01], 0x02);
        assert_eq!(EDC_TABLE[0], 0);
        assert_eq!(EDC_TABLE[1], 0x9091_0101);
        assert_eq!(EDC_TABLE[0x80], EDC_POLY);
    }

    #[test]
    fn edc_is_incremental() {
        let data: Vec<u8> = (0..600u32).map(|i| i as u8).collect();
        assert_eq!(edc_update(edc(&data[..100]), &data[100..]), edc(&data));
    }

    #[test]
    fn parity_regions_fit_sector() {
        assert_eq!(ECC_P.offset + ECC_P.parity_len(), ECC_Q.offset);
        assert_eq!(ECC_Q.offset + ECC_Q.parity_len(), 2352);
    }

    #[test]
    fn written_ecc_checks() {
        let mut sector = vec![0u8; 2352];
        for (i, b) in sector[0x10..0x810].iter_mut().enumerate() {
            *b = (i * 7) as u8;
        }
        write_ecc(&mut sector, false);
        assert!(check_ecc(&sector, false));
        sector[0x100] ^= 1;
        assert!(!check_ecc(&sector, false));
    }
}
