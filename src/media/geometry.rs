use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Read, Write};

use crate::block::BlockKind;

/// CHS geometry of block media (`GEOM` block, 16 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Geometry {
    pub cylinders:         u32,
    pub heads:             u32,
    pub sectors_per_track: u32,
}

impl Geometry {
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(BlockKind::Geometry.tag())?;
        w.write_u32::<LittleEndian>(self.cylinders)?;
        w.write_u32::<LittleEndian>(self.heads)?;
        w.write_u32::<LittleEndian>(self.sectors_per_track)
    }

    pub fn read_after_tag<R: Read>(mut r: R) -> io::Result<Self> {
        Ok(Self {
            cylinders:         r.read_u32::<LittleEndian>()?,
            heads:             r.read_u32::<LittleEndian>()?,
            sectors_per_track: r.read_u32::<LittleEndian>()?,
        })
    }

    pub fn total_sectors(&self) -> u64 {
        self.cylinders as u64 * self.heads as u64 * self.sectors_per_track as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip() {
        let g = Geometry { cylinders: 80, heads: 2, sectors_per_track: 18 };
        let mut buf = Vec::new();
        g.write(&mut buf).unwrap();
        assert_eq!(buf.len(), 16);
        assert_eq!(Geometry::read_after_tag(Cursor::new(&buf[4..])).unwrap(), g);
        assert_eq!(g.total_sectors(), 2880);
    }
}
