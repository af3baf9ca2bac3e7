//! Raw 2352-byte sector layout, reconstruction and verification.

use super::ecc::{check_ecc, edc, write_ecc};
use super::msf::Msf;

pub const SECTOR_SIZE: usize = 2352;
pub const SYNC: [u8; 12] = [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];

pub const PREFIX_SIZE:    usize = 16;
pub const SUFFIX_SIZE:    usize = 288;
pub const SUBHEADER_SIZE: usize = 8;

pub const MODE1_USER_OFFSET: usize = 16;
pub const MODE1_USER_SIZE:   usize = 2048;
pub const MODE1_EDC_OFFSET:  usize = 0x810;
pub const MODE1_RESERVED:    std::ops::Range<usize> = 0x814..0x81C;

pub const MODE2_SUBHEADER_OFFSET: usize = 16;
pub const MODE2_USER_OFFSET:      usize = 24;
pub const MODE2_FORM1_USER_SIZE:  usize = 2048;
pub const MODE2_FORM2_USER_SIZE:  usize = 2324;
pub const MODE2_FORMLESS_SIZE:    usize = 2336;
pub const MODE2_FORM1_EDC_OFFSET: usize = 0x818;
pub const MODE2_FORM2_EDC_OFFSET: usize = 0x92C;
/// Bytes kept verbatim for a Form 1 suffix that does not reconstruct.
pub const MODE2_FORM1_SUFFIX_SIZE: usize = SECTOR_SIZE - MODE2_FORM1_EDC_OFFSET;
pub const MODE2_FORM2_SUFFIX_SIZE: usize = 4;

pub const ECC_OFFSET:   usize = 0x81C;
pub const ECC_Q_OFFSET: usize = 0x8C8;

/// Mode byte family.  Every Mode 2 variant shares mode byte 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorMode {
    Mode1,
    Mode2,
}

impl SectorMode {
    pub fn mode_byte(self) -> u8 {
        match self {
            SectorMode::Mode1 => 1,
            SectorMode::Mode2 => 2,
        }
    }
}

/// Which EDC/ECC layout to regenerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EccLayout {
    Mode1,
    Mode2Form1,
    Mode2Form2,
}

/// Outcome of checking a Form 2 EDC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Form2Edc {
    Correct,
    /// All-zero EDC: the mastering tool did not compute one.
    Absent,
    Wrong,
}

/// The 16-byte sync + header a well-formed sector at `lba` carries.
pub fn expected_prefix(mode: SectorMode, lba: u64) -> [u8; PREFIX_SIZE] {
    let mut prefix = [0u8; PREFIX_SIZE];
    prefix[..12].copy_from_slice(&SYNC);
    prefix[12..15].copy_from_slice(&Msf::from_lba(lba).to_bcd());
    prefix[15] = mode.mode_byte();
    prefix
}

/// Overwrite sync and header of `sector`.
pub fn reconstruct_prefix(sector: &mut [u8], mode: SectorMode, lba: u64) {
    sector[..PREFIX_SIZE].copy_from_slice(&expected_prefix(mode, lba));
}

pub fn prefix_is_correct(sector: &[u8], mode: SectorMode, lba: u64) -> bool {
    sector[..PREFIX_SIZE] == expected_prefix(mode, lba)
}

/// Regenerate EDC (and ECC where the layout has one) from the header and
/// payload already in `sector`.
pub fn reconstruct_ecc(sector: &mut [u8], layout: EccLayout) {
    match layout {
        EccLayout::Mode1 => {
            let e = edc(&sector[..MODE1_EDC_OFFSET]);
            sector[MODE1_EDC_OFFSET..MODE1_EDC_OFFSET + 4].copy_from_slice(&e.to_le_bytes());
            sector[MODE1_RESERVED].fill(0);
            write_ecc(sector, false);
        }
        EccLayout::Mode2Form1 => {
            let e = edc(&sector[MODE2_SUBHEADER_OFFSET..MODE2_FORM1_EDC_OFFSET]);
            sector[MODE2_FORM1_EDC_OFFSET..MODE2_FORM1_EDC_OFFSET + 4].copy_from_slice(&e.to_le_bytes());
            write_ecc(sector, true);
        }
        EccLayout::Mode2Form2 => {
            let e = edc(&sector[MODE2_SUBHEADER_OFFSET..MODE2_FORM2_EDC_OFFSET]);
            sector[MODE2_FORM2_EDC_OFFSET..MODE2_FORM2_EDC_OFFSET + 4].copy_from_slice(&e.to_le_bytes());
        }
    }
}

fn stored_edc(sector: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([sector[offset], sector[offset + 1], sector[offset + 2], sector[offset + 3]])
}

/// Mode 1 suffix: reserved bytes zero, P and Q parity valid, EDC valid.
pub fn suffix_is_correct(sector: &[u8]) -> bool {
    if sector[MODE1_RESERVED].iter().any(|&b| b != 0) {
        return false;
    }
    if !check_ecc(sector, false) {
        return false;
    }
    stored_edc(sector, MODE1_EDC_OFFSET) == edc(&sector[..MODE1_EDC_OFFSET])
}

/// Mode 2 Form 1 suffix: parity with zero address, EDC over subheader+data.
pub fn suffix_is_correct_mode2(sector: &[u8]) -> bool {
    if !check_ecc(sector, true) {
        return false;
    }
    stored_edc(sector, MODE2_FORM1_EDC_OFFSET)
        == edc(&sector[MODE2_SUBHEADER_OFFSET..MODE2_FORM1_EDC_OFFSET])
}

pub fn form2_edc(sector: &[u8]) -> Form2Edc {
    let stored = stored_edc(sector, MODE2_FORM2_EDC_OFFSET);
    if stored == 0 {
        Form2Edc::Absent
    } else if stored == edc(&sector[MODE2_SUBHEADER_OFFSET..MODE2_FORM2_EDC_OFFSET]) {
        Form2Edc::Correct
    } else {
        Form2Edc::Wrong
    }
}

/// Form 2 when the submode byte of either subheader copy has bit 5 set.
pub fn subheader_is_form2(subheader: &[u8]) -> bool {
    subheader.len() >= SUBHEADER_SIZE && (subheader[2] & 0x20 != 0 || subheader[6] & 0x20 != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode1_sector(lba: u64, fill: impl Fn(usize) -> u8) -> Vec<u8> {
        let mut s = vec![0u8; SECTOR_SIZE];
        reconstruct_prefix(&mut s, SectorMode::Mode1, lba);
        for (i, b) in s[MODE1_USER_OFFSET..MODE1_USER_OFFSET + MODE1_USER_SIZE].iter_mut().enumerate() {
            *b = fill(i);
        }
        reconstruct_ecc(&mut s, EccLayout::Mode1);
        s
    }

    #[test]
    fn lba_zero_prefix() {
        let p = expected_prefix(SectorMode::Mode1, 0);
        assert_eq!(&p[..12], &SYNC);
        assert_eq!(&p[12..], &[0x00, 0x02, 0x00, 0x01]);
    }

    #[test]
    fn zero_mode1_sector_golden_values() {
        let s = mode1_sector(14, |_| 0);
        assert_eq!(&s[0x810..0x814], &[0x9E, 0xDC, 0x20, 0x94]);
        assert_eq!(&s[0x81D..0x820], &[0xF7, 0x18, 0xF5]);
        assert_eq!(&s[0x866..0x86A], &[0xBF, 0x79, 0x60, 0xA1]);
        assert_eq!(&s[0x873..0x876], &[0xF5, 0x0C, 0xF4]);
        assert_eq!(&s[0x8BC..0x8BE], &[0x21, 0xA5]);
    }

    #[test]
    fn reconstructed_mode1_verifies() {
        let s = mode1_sector(16, |i| (i * 31 + 7) as u8);
        assert!(prefix_is_correct(&s, SectorMode::Mode1, 16));
        assert!(!prefix_is_correct(&s, SectorMode::Mode1, 17));
        assert!(suffix_is_correct(&s));
    }

    #[test]
    fn damaged_mode1_suffix_detected() {
        let mut s = mode1_sector(100, |i| i as u8);
        s[0x815] = 1;
        assert!(!suffix_is_correct(&s));
        let mut s = mode1_sector(100, |i| i as u8);
        s[0x900] ^= 0x40;
        assert!(!suffix_is_correct(&s));
        let mut s = mode1_sector(100, |i| i as u8);
        s[0x811] ^= 0x01;
        assert!(!suffix_is_correct(&s));
    }

    #[test]
    fn mode2_form1_reconstructs() {
        let mut s = vec![0u8; SECTOR_SIZE];
        reconstruct_prefix(&mut s, SectorMode::Mode2, 3);
        s[16..24].copy_from_slice(&[0, 0, 0x08, 0, 0, 0, 0x08, 0]);
        for (i, b) in s[24..24 + 2048].iter_mut().enumerate() {
            *b = (i ^ 0x55) as u8;
        }
        reconstruct_ecc(&mut s, EccLayout::Mode2Form1);
        assert!(suffix_is_correct_mode2(&s));
        assert!(!subheader_is_form2(&s[16..24]));
        // header bytes are outside Form 1 parity
        s[12] = 0x99;
        assert!(suffix_is_correct_mode2(&s));
    }

    #[test]
    fn form2_edc_states() {
        let mut s = vec![0u8; SECTOR_SIZE];
        s[16..24].copy_from_slice(&[0, 0, 0x20, 0, 0, 0, 0x20, 0]);
        s[24..24 + 2324].fill(0x33);
        assert!(subheader_is_form2(&s[16..24]));
        assert_eq!(form2_edc(&s), Form2Edc::Absent);
        reconstruct_ecc(&mut s, EccLayout::Mode2Form2);
        assert_eq!(form2_edc(&s), Form2Edc::Correct);
        s[MODE2_FORM2_EDC_OFFSET] ^= 0xFF;
        assert_eq!(form2_edc(&s), Form2Edc::Wrong);
    }

    #[test]
    fn layout_constants_add_up() {
        assert_eq!(MODE1_USER_OFFSET + MODE1_USER_SIZE, MODE1_EDC_OFFSET);
        assert_eq!(MODE2_USER_OFFSET + MODE2_FORM1_USER_SIZE, MODE2_FORM1_EDC_OFFSET);
        assert_eq!(MODE2_USER_OFFSET + MODE2_FORM2_USER_SIZE, MODE2_FORM2_EDC_OFFSET);
        assert_eq!(MODE1_EDC_OFFSET + SUFFIX_SIZE, SECTOR_SIZE);
        assert_eq!(MODE2_FORM1_SUFFIX_SIZE, 280);
        assert_eq!(ECC_Q_OFFSET - ECC_OFFSET, 172);
    }
}
