//! Per-sector fixup entries and the side streams they point into.
//!
//! Each raw CD sector has one prefix entry and one suffix entry.  An entry
//! either says how to regenerate the bytes or points at a fixed-size slot in
//! a side stream holding them verbatim.

use std::collections::HashMap;

use super::sector::{PREFIX_SIZE, SUFFIX_SIZE};

pub const CD_XFIX_MASK: u32 = 0xF000_0000;
pub const CD_DFIX_MASK: u32 = 0x0FFF_FFFF;

pub const FIX_NOT_DUMPED:          u32 = 0x1000_0000;
pub const FIX_CORRECT:             u32 = 0x2000_0000;
pub const FIX_MODE2_FORM1_OK:      u32 = 0x3000_0000;
pub const FIX_MODE2_FORM2_OK:      u32 = 0x4000_0000;
pub const FIX_MODE2_FORM2_NO_CRC:  u32 = 0x5000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fixup {
    /// Never long-written.
    Unset,
    NotDumped,
    Correct,
    Mode2Form1Ok,
    Mode2Form2Ok,
    Mode2Form2NoCrc,
    /// Byte offset of the verbatim slot in the side stream.
    Stored(u32),
}

impl Fixup {
    pub fn encode(self) -> u32 {
        match self {
            Fixup::Unset           => 0,
            Fixup::NotDumped       => FIX_NOT_DUMPED,
            Fixup::Correct         => FIX_CORRECT,
            Fixup::Mode2Form1Ok    => FIX_MODE2_FORM1_OK,
            Fixup::Mode2Form2Ok    => FIX_MODE2_FORM2_OK,
            Fixup::Mode2Form2NoCrc => FIX_MODE2_FORM2_NO_CRC,
            Fixup::Stored(offset)  => offset + 1,
        }
    }

    pub fn decode(v: u32) -> Self {
        if v == 0 {
            return Fixup::Unset;
        }
        match v & CD_XFIX_MASK {
            0                      => Fixup::Stored((v & CD_DFIX_MASK) - 1),
            FIX_NOT_DUMPED         => Fixup::NotDumped,
            FIX_CORRECT            => Fixup::Correct,
            FIX_MODE2_FORM1_OK     => Fixup::Mode2Form1Ok,
            FIX_MODE2_FORM2_OK     => Fixup::Mode2Form2Ok,
            FIX_MODE2_FORM2_NO_CRC => Fixup::Mode2Form2NoCrc,
            // unknown flag nibble
            _                      => Fixup::NotDumped,
        }
    }
}

/// One fixup array plus its append-only side stream of fixed-size slots.
#[derive(Debug, Clone)]
pub struct FixupTable {
    entries:   Vec<u32>,
    stream:    Vec<u8>,
    slot_size: usize,
    /// Slot owned by each sector, kept even after its entry turns into a flag.
    slots:     HashMap<u64, u32>,
}

/// The side stream would need a pointer beyond the 28-bit field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideStreamFull;

impl FixupTable {
    pub fn new(sectors: u64, slot_size: usize) -> Self {
        Self { entries: vec![0; sectors as usize], stream: Vec::new(), slot_size, slots: HashMap::new() }
    }

    pub fn prefix(sectors: u64) -> Self {
        Self::new(sectors, PREFIX_SIZE)
    }

    pub fn suffix(sectors: u64) -> Self {
        Self::new(sectors, SUFFIX_SIZE)
    }

    /// Rebuild from what was persisted.
    pub fn from_parts(entries: Vec<u32>, stream: Vec<u8>, slot_size: usize) -> Self {
        let slots = entries
            .iter()
            .enumerate()
            .filter_map(|(lba, &v)| match Fixup::decode(v) {
                Fixup::Stored(offset) => Some((lba as u64, offset)),
                _ => None,
            })
            .collect();
        Self { entries, stream, slot_size, slots }
    }

    pub fn get(&self, lba: u64) -> Fixup {
        self.entries.get(lba as usize).map(|&v| Fixup::decode(v)).unwrap_or(Fixup::Unset)
    }

    pub fn set(&mut self, lba: u64, fixup: Fixup) {
        if let Some(e) = self.entries.get_mut(lba as usize) {
            *e = fixup.encode();
        }
    }

    /// Store `bytes` verbatim for `lba`, reusing the sector's slot when it
    /// already has one.
    pub fn store(&mut self, lba: u64, bytes: &[u8]) -> Result<(), SideStreamFull> {
        let offset = match self.slots.get(&lba) {
            Some(&offset) => offset as usize,
            None => {
                let offset = self.stream.len();
                if offset as u64 + 1 > CD_DFIX_MASK as u64 {
                    return Err(SideStreamFull);
                }
                self.stream.resize(offset + self.slot_size, 0);
                self.slots.insert(lba, offset as u32);
                offset
            }
        };
        let slot = &mut self.stream[offset..offset + self.slot_size];
        slot.fill(0);
        let n = bytes.len().min(self.slot_size);
        slot[..n].copy_from_slice(&bytes[..n]);
        self.set(lba, Fixup::Stored(offset as u32));
        Ok(())
    }

    /// The verbatim slot for a `Stored` entry.
    pub fn slot(&self, offset: u32) -> Option<&[u8]> {
        let start = offset as usize;
        self.stream.get(start..start + self.slot_size)
    }

    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    pub fn stream(&self) -> &[u8] {
        &self.stream
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// True when no sector was ever long-written.
    pub fn is_untouched(&self) -> bool {
        self.entries.iter().all(|&e| e == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_round_trip() {
        for f in [
            Fixup::Unset,
            Fixup::NotDumped,
            Fixup::Correct,
            Fixup::Mode2Form1Ok,
            Fixup::Mode2Form2Ok,
            Fixup::Mode2Form2NoCrc,
            Fixup::Stored(0),
            Fixup::Stored(288 * 5),
        ] {
            assert_eq!(Fixup::decode(f.encode()), f);
        }
        assert_eq!(Fixup::Stored(0).encode(), 1);
    }

    #[test]
    fn rewrite_reuses_slot() {
        let mut t = FixupTable::suffix(10);
        t.store(3, &[1; 288]).unwrap();
        t.store(7, &[2; 4]).unwrap();
        assert_eq!(t.stream().len(), 2 * 288);
        t.store(3, &[9; 288]).unwrap();
        assert_eq!(t.stream().len(), 2 * 288);
        assert_eq!(t.get(3), Fixup::Stored(0));
        assert_eq!(t.slot(0).unwrap(), &[9u8; 288][..]);
        let seven = t.slot(288).unwrap();
        assert_eq!(&seven[..4], &[2; 4]);
        assert!(seven[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn flag_after_store_keeps_stream() {
        let mut t = FixupTable::prefix(4);
        t.store(0, &[5; 16]).unwrap();
        t.set(0, Fixup::Correct);
        assert_eq!(t.get(0), Fixup::Correct);
        assert_eq!(t.stream().len(), 16);
        assert!(!t.is_untouched());
        t.store(0, &[6; 16]).unwrap();
        assert_eq!(t.get(0), Fixup::Stored(0));
        assert_eq!(t.stream().len(), 16);
    }
}
