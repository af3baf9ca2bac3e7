//! Optical tracks and the `TRKS` block.
//!
//! ```text
//! header   kind u32 · count u16 · crc64 u64
//! entry    sequence u8 · type u8 · start i64 · end i64 · pregap i64
//!          session u8 · isrc [13] · flags u8                   (41 bytes)
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Read, Write};

use super::invalid_data;
use crate::block::BlockKind;
use crate::cd::sector::{
    MODE1_USER_SIZE, MODE2_FORM1_USER_SIZE, MODE2_FORM2_USER_SIZE, MODE2_FORMLESS_SIZE, SECTOR_SIZE,
};
use crate::cd::SectorMode;
use crate::checksum::crc64;

pub const TRACK_ENTRY_SIZE: usize = 41;
const ISRC_SIZE: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum TrackType {
    Audio           = 0,
    Data            = 1,
    CdMode1         = 2,
    CdMode2Formless = 3,
    CdMode2Form1    = 4,
    CdMode2Form2    = 5,
}

impl TrackType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Audio),
            1 => Some(Self::Data),
            2 => Some(Self::CdMode1),
            3 => Some(Self::CdMode2Formless),
            4 => Some(Self::CdMode2Form1),
            5 => Some(Self::CdMode2Form2),
            _ => None,
        }
    }

    /// Bytes `read_sector` returns for this track type.
    pub fn user_data_size(self) -> usize {
        match self {
            Self::Audio           => SECTOR_SIZE,
            Self::Data            => MODE1_USER_SIZE,
            Self::CdMode1         => MODE1_USER_SIZE,
            Self::CdMode2Formless => MODE2_FORMLESS_SIZE,
            Self::CdMode2Form1    => MODE2_FORM1_USER_SIZE,
            Self::CdMode2Form2    => MODE2_FORM2_USER_SIZE,
        }
    }

    /// `None` for tracks without a CD data header.
    pub fn sector_mode(self) -> Option<SectorMode> {
        match self {
            Self::Audio | Self::Data => None,
            Self::CdMode1 => Some(SectorMode::Mode1),
            Self::CdMode2Formless | Self::CdMode2Form1 | Self::CdMode2Form2 => Some(SectorMode::Mode2),
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "audio"          => Some(Self::Audio),
            "data"           => Some(Self::Data),
            "mode1"          => Some(Self::CdMode1),
            "mode2"          => Some(Self::CdMode2Formless),
            "mode2form1"     => Some(Self::CdMode2Form1),
            "mode2form2"     => Some(Self::CdMode2Form2),
            _                => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Track {
    pub sequence:   u8,
    pub session:    u8,
    pub track_type: TrackType,
    /// First LBA, inclusive.
    pub start:      u64,
    /// Last LBA, inclusive.
    pub end:        u64,
    pub pregap:     u64,
    pub isrc:       Option<String>,
    pub flags:      u8,
}

impl Track {
    pub fn new(sequence: u8, track_type: TrackType, start: u64, end: u64) -> Self {
        Self { sequence, session: 1, track_type, start, end, pregap: 0, isrc: None, flags: 0 }
    }

    pub fn contains(&self, lba: u64) -> bool {
        lba >= self.start && lba <= self.end
    }

    pub fn length(&self) -> u64 {
        self.end + 1 - self.start
    }

    fn write_entry<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_u8(self.sequence)?;
        w.write_u8(self.track_type as u8)?;
        w.write_i64::<LittleEndian>(self.start as i64)?;
        w.write_i64::<LittleEndian>(self.end as i64)?;
        w.write_i64::<LittleEndian>(self.pregap as i64)?;
        w.write_u8(self.session)?;
        let mut isrc = [0u8; ISRC_SIZE];
        if let Some(s) = &self.isrc {
            let n = s.len().min(ISRC_SIZE);
            isrc[..n].copy_from_slice(&s.as_bytes()[..n]);
        }
        w.write_all(&isrc)?;
        w.write_u8(self.flags)?;
        Ok(())
    }

    fn read_entry<R: Read>(mut r: R) -> io::Result<Self> {
        let sequence = r.read_u8()?;
        let raw_type = r.read_u8()?;
        let track_type = TrackType::from_u8(raw_type)
            .ok_or_else(|| invalid_data(format!("unknown track type {raw_type}")))?;
        let start  = r.read_i64::<LittleEndian>()?;
        let end    = r.read_i64::<LittleEndian>()?;
        let pregap = r.read_i64::<LittleEndian>()?;
        if start < 0 || end < start {
            return Err(invalid_data(format!("track {sequence} spans {start}..{end}")));
        }
        let session = r.read_u8()?;
        let mut isrc = [0u8; ISRC_SIZE];
        r.read_exact(&mut isrc)?;
        let isrc_len = isrc.iter().position(|&b| b == 0).unwrap_or(ISRC_SIZE);
        let isrc = (isrc_len > 0).then(|| String::from_utf8_lossy(&isrc[..isrc_len]).into_owned());
        Ok(Self {
            sequence,
            session,
            track_type,
            start: start as u64,
            end: end as u64,
            pregap: pregap.max(0) as u64,
            isrc,
            flags: r.read_u8()?,
        })
    }
}

pub fn write_tracks_block<W: Write>(mut w: W, tracks: &[Track]) -> io::Result<()> {
    let mut entries: Vec<u8> = Vec::with_capacity(tracks.len() * TRACK_ENTRY_SIZE);
    for t in tracks {
        t.write_entry(&mut entries)?;
    }
    w.write_u32::<LittleEndian>(BlockKind::Tracks.tag())?;
    w.write_u16::<LittleEndian>(tracks.len() as u16)?;
    w.write_u64::<LittleEndian>(crc64(&entries))?;
    w.write_all(&entries)
}

/// Read a `TRKS` block whose kind tag was already consumed.
pub fn read_tracks_block<R: Read>(mut r: R) -> io::Result<Vec<Track>> {
    let count = r.read_u16::<LittleEndian>()? as usize;
    let crc   = r.read_u64::<LittleEndian>()?;
    let mut entries = vec![0u8; count * TRACK_ENTRY_SIZE];
    r.read_exact(&mut entries)?;
    if crc64(&entries) != crc {
        return Err(invalid_data("tracks block checksum mismatch"));
    }
    entries
        .chunks_exact(TRACK_ENTRY_SIZE)
        .map(Track::read_entry)
        .collect()
}

/// Tracks sorted by start with no overlap.
pub fn validate_tracks(tracks: &[Track]) -> Result<(), String> {
    let mut sorted: Vec<&Track> = tracks.iter().collect();
    sorted.sort_by_key(|t| t.start);
    for pair in sorted.windows(2) {
        if pair[1].start <= pair[0].end {
            return Err(format!("tracks {} and {} overlap", pair[0].sequence, pair[1].sequence));
        }
    }
    match sorted.iter().find(|t| t.end < t.start) {
        Some(t) => Err(format!("track {} ends before it starts", t.sequence)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn tracks_block_round_trip() {
        let mut audio = Track::new(2, TrackType::Audio, 1000, 1999);
        audio.isrc = Some("USRC17607839".into());
        audio.pregap = 150;
        let tracks = vec![Track::new(1, TrackType::CdMode1, 0, 999), audio];
        let mut buf = Vec::new();
        write_tracks_block(&mut buf, &tracks).unwrap();
        assert_eq!(buf.len(), 4 + 2 + 8 + 2 * TRACK_ENTRY_SIZE);
        assert_eq!(read_tracks_block(Cursor::new(&buf[4..])).unwrap(), tracks);
    }

    #[test]
    fn corrupted_entries_rejected() {
        let tracks = vec![Track::new(1, TrackType::CdMode1, 0, 99)];
        let mut buf = Vec::new();
        write_tracks_block(&mut buf, &tracks).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        assert!(read_tracks_block(Cursor::new(&buf[4..])).is_err());
    }

    #[test]
    fn sizes_and_modes() {
        assert_eq!(TrackType::CdMode1.user_data_size(), 2048);
        assert_eq!(TrackType::CdMode2Form2.user_data_size(), 2324);
        assert_eq!(TrackType::Audio.sector_mode(), None);
        assert_eq!(TrackType::CdMode2Form1.sector_mode(), Some(SectorMode::Mode2));
        assert_eq!(Track::new(1, TrackType::Audio, 10, 19).length(), 10);
    }

    #[test]
    fn overlapping_tracks_rejected() {
        let tracks = vec![
            Track::new(1, TrackType::CdMode1, 0, 100),
            Track::new(2, TrackType::Audio, 100, 200),
        ];
        assert!(validate_tracks(&tracks).is_err());
    }
}
