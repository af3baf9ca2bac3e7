//! Minute:second:frame addressing and BCD.

use std::fmt;

pub const FRAMES_PER_SECOND: u32 = 75;
pub const SECONDS_PER_MINUTE: u32 = 60;
pub const FRAMES_PER_MINUTE: u32 = FRAMES_PER_SECOND * SECONDS_PER_MINUTE;
/// LBA 0 sits two seconds into the disc.
pub const LBA_OFFSET: u32 = 150;

pub const fn to_bcd(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

pub const fn from_bcd(v: u8) -> u8 {
    (v >> 4) * 10 + (v & 0x0F)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Msf {
    pub minute: u32,
    pub second: u8,
    pub frame:  u8,
}

impl Msf {
    pub fn new(minute: u32, second: u8, frame: u8) -> Self {
        Self { minute, second, frame }
    }

    /// Absolute address of `lba`, including the 150-frame lead-in offset.
    pub fn from_lba(lba: u64) -> Self {
        let abs = lba + LBA_OFFSET as u64;
        Self {
            minute: (abs / FRAMES_PER_MINUTE as u64) as u32,
            second: ((abs % FRAMES_PER_MINUTE as u64) / FRAMES_PER_SECOND as u64) as u8,
            frame:  (abs % FRAMES_PER_SECOND as u64) as u8,
        }
    }

    /// Inverse of [`Msf::from_lba`]; negative inside the lead-in.
    pub fn to_lba(self) -> i64 {
        self.minute as i64 * FRAMES_PER_MINUTE as i64
            + self.second as i64 * FRAMES_PER_SECOND as i64
            + self.frame as i64
            - LBA_OFFSET as i64
    }

    /// Header bytes as they appear at sector offset `0x0C`.  Minutes past
    /// 99 are encoded digit-wise and truncated, matching what drives emit.
    pub fn to_bcd(self) -> [u8; 3] {
        let minute = (((self.minute / 10) << 4) + self.minute % 10) as u8;
        [minute, to_bcd(self.second), to_bcd(self.frame)]
    }

    pub fn from_bcd(bytes: [u8; 3]) -> Self {
        Self {
            minute: from_bcd(bytes[0]) as u32,
            second: from_bcd(bytes[1]),
            frame:  from_bcd(bytes[2]),
        }
    }

    /// One frame earlier, borrowing from seconds and minutes.  Saturates at
    /// `00:00:00`.
    pub fn previous(self) -> Self {
        if self.frame > 0 {
            return Self { frame: self.frame - 1, ..self };
        }
        if self.second > 0 {
            return Self { second: self.second - 1, frame: (FRAMES_PER_SECOND - 1) as u8, ..self };
        }
        if self.minute > 0 {
            return Self {
                minute: self.minute - 1,
                second: (SECONDS_PER_MINUTE - 1) as u8,
                frame:  (FRAMES_PER_SECOND - 1) as u8,
            };
        }
        self
    }
}

impl fmt::Display for Msf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.minute, self.second, self.frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lba_zero_is_two_seconds() {
        let msf = Msf::from_lba(0);
        assert_eq!(msf, Msf::new(0, 2, 0));
        assert_eq!(msf.to_bcd(), [0x00, 0x02, 0x00]);
        assert_eq!(msf.to_lba(), 0);
    }

    #[test]
    fn lba_round_trip() {
        for lba in [1u64, 74, 75, 4349, 4350, 333_000] {
            assert_eq!(Msf::from_lba(lba).to_lba(), lba as i64);
        }
    }

    #[test]
    fn bcd_digits() {
        assert_eq!(to_bcd(59), 0x59);
        assert_eq!(from_bcd(0x74), 74);
        let msf = Msf::new(72, 14, 63);
        assert_eq!(Msf::from_bcd(msf.to_bcd()), msf);
    }

    #[test]
    fn previous_borrows() {
        assert_eq!(Msf::new(1, 0, 0).previous(), Msf::new(0, 59, 74));
        assert_eq!(Msf::new(0, 3, 0).previous(), Msf::new(0, 2, 74));
        assert_eq!(Msf::new(0, 3, 9).previous(), Msf::new(0, 3, 8));
        assert_eq!(Msf::new(0, 0, 0).previous(), Msf::new(0, 0, 0));
        assert_eq!(Msf::from_lba(0).previous().to_lba(), -1);
    }

    #[test]
    fn display() {
        assert_eq!(Msf::new(5, 7, 3).to_string(), "05:07:03");
    }
}
