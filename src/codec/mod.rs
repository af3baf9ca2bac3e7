//! Compression codecs for block payloads.
//!
//! # Codes on disk
//!
//! | code | codec                                   |
//! |------|-----------------------------------------|
//! | 0    | none, payload stored verbatim           |
//! | 1    | LZMA, 5-byte properties then raw stream |
//! | 2    | FLAC, CD audio only                     |
//! | 3    | subchannel transform, then LZMA         |
//!
//! The LZMA stream carries no unpacked size and no end marker; the block
//! header's uncompressed length bounds decoding.

use flac_codec::{
    byteorder::LittleEndian,
    decode::FlacByteReader,
    encode::{FlacByteWriter, Options as FlacOptions},
};
use lzma_rs::{compress, decompress};
use serde::Serialize;
use std::io::{self, Cursor, Read, Write};
use thiserror::Error;

use crate::subchannel;

/// Size of the LZMA properties header preceding every LZMA payload.
pub const LZMA_PROPERTIES_LENGTH: usize = 5;

// ── Compression kind ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u16)]
pub enum CompressionKind {
    None                    = 0,
    Lzma                    = 1,
    Flac                    = 2,
    LzmaSubchannelTransform = 3,
}

impl CompressionKind {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Lzma),
            2 => Some(Self::Flac),
            3 => Some(Self::LzmaSubchannelTransform),
            _ => None,
        }
    }

    /// Human-readable name (diagnostics only).
    pub fn name(self) -> &'static str {
        match self {
            Self::None                    => "none",
            Self::Lzma                    => "lzma",
            Self::Flac                    => "flac",
            Self::LzmaSubchannelTransform => "lzma+subchannel",
        }
    }
}

/// Name for a raw code, including ones this build does not know.
pub fn compression_name(code: u16) -> String {
    CompressionKind::from_u16(code)
        .map(|k| k.name().to_string())
        .unwrap_or_else(|| format!("unknown({code})"))
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    /// A block names a compression code this build cannot decode.
    #[error("Unsupported compression code {0}")]
    UnsupportedCompression(u16),
    #[error("Decoded {actual} bytes, header declares {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn kind(&self) -> CompressionKind;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
    /// `expected_len` is the uncompressed length recorded in the header.
    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError>;
}

// ── Built-in codec implementations ──────────────────────────────────────────

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn kind(&self) -> CompressionKind { CompressionKind::None }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8], _: usize) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
}

pub struct LzmaCodec;
impl Codec for LzmaCodec {
    fn kind(&self) -> CompressionKind { CompressionKind::Lzma }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        lzma_compress_raw(data)
    }
    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
        lzma_decompress_raw(data, expected_len)
    }
}

pub struct FlacCodec;
impl Codec for FlacCodec {
    fn kind(&self) -> CompressionKind { CompressionKind::Flac }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        // 16-bit stereo frames
        if data.len() % 4 != 0 {
            return Err(CodecError::Compression(format!(
                "FLAC input of {} bytes is not whole CDDA frames", data.len()
            )));
        }
        let mut dest = Cursor::new(Vec::with_capacity(data.len() * 3 / 5));
        let mut writer = FlacByteWriter::<_, LittleEndian>::new_cdda(
            &mut dest,
            FlacOptions::best(),
            Some(data.len() as u64),
        ).map_err(|e| CodecError::Compression(e.to_string()))?;
        writer.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        writer.finalize().map_err(|e| CodecError::Compression(e.to_string()))?;
        Ok(dest.into_inner())
    }

    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
        let mut reader = FlacByteReader::endian(data, LittleEndian)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        let mut out = Vec::with_capacity(expected_len);
        reader.read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

/// De-interleaves subchannel planes before LZMA.
pub struct LzmaSubchannelCodec;
impl Codec for LzmaSubchannelCodec {
    fn kind(&self) -> CompressionKind { CompressionKind::LzmaSubchannelTransform }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let planes = subchannel::transform(Some(data)).unwrap_or_default();
        lzma_compress_raw(&planes)
    }
    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
        let planes = lzma_decompress_raw(data, expected_len)?;
        Ok(subchannel::untransform(Some(&planes)).unwrap_or_default())
    }
}

// ── LZMA helpers ─────────────────────────────────────────────────────────────

fn lzma_compress_raw(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(LZMA_PROPERTIES_LENGTH + data.len() / 2);
    let options = compress::Options {
        unpacked_size: compress::UnpackedSize::SkipWritingToHeader,
    };
    lzma_rs::lzma_compress_with_options(&mut Cursor::new(data), &mut out, &options)
        .map_err(|e| CodecError::Compression(e.to_string()))?;
    Ok(out)
}

fn lzma_decompress_raw(data: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
    if data.len() < LZMA_PROPERTIES_LENGTH {
        return Err(CodecError::Decompression("LZMA payload shorter than its properties".into()));
    }
    let mut out = Vec::with_capacity(expected_len);
    let options = decompress::Options {
        unpacked_size: decompress::UnpackedSize::UseProvided(Some(expected_len as u64)),
        ..Default::default()
    };
    lzma_rs::lzma_decompress_with_options(&mut Cursor::new(data), &mut out, &options)
        .map_err(|e| CodecError::Decompression(e.to_string()))?;
    Ok(out)
}

// ── Factory ──────────────────────────────────────────────────────────────────

pub fn get_codec(kind: CompressionKind) -> Box<dyn Codec> {
    match kind {
        CompressionKind::None                    => Box::new(NoneCodec),
        CompressionKind::Lzma                    => Box::new(LzmaCodec),
        CompressionKind::Flac                    => Box::new(FlacCodec),
        CompressionKind::LzmaSubchannelTransform => Box::new(LzmaSubchannelCodec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(kind: CompressionKind, data: &[u8]) {
        let codec = get_codec(kind);
        assert_eq!(codec.kind(), kind);
        let packed = codec.compress(data).unwrap();
        assert_eq!(codec.decompress(&packed, data.len()).unwrap(), data);
    }

    #[test]
    fn lzma_has_five_byte_header() {
        let data = vec![7u8; 4096];
        let packed = LzmaCodec.compress(&data).unwrap();
        assert!(packed.len() > LZMA_PROPERTIES_LENGTH);
        assert!(packed.len() < data.len());
        round_trip(CompressionKind::Lzma, &data);
    }

    #[test]
    fn lzma_text_round_trip() {
        let data = b"sector sector sector sector sector sector".repeat(50);
        round_trip(CompressionKind::Lzma, &data);
    }

    #[test]
    fn flac_round_trip_cdda() {
        let mut audio = Vec::with_capacity(2352 * 4);
        for i in 0..(2352 * 4 / 4) {
            let s = ((i as f64 * 0.05).sin() * 12000.0) as i16;
            audio.extend_from_slice(&s.to_le_bytes());
            audio.extend_from_slice(&(s / 2).to_le_bytes());
        }
        round_trip(CompressionKind::Flac, &audio);
    }

    #[test]
    fn flac_rejects_partial_frames() {
        assert!(FlacCodec.compress(&[0u8; 6]).is_err());
    }

    #[test]
    fn subchannel_codec_round_trip() {
        let data: Vec<u8> = (0..96 * 8).map(|i| if i % 12 == 0 { 0xFF } else { 0x40 }).collect();
        round_trip(CompressionKind::LzmaSubchannelTransform, &data);
    }

    #[test]
    fn codes_are_stable() {
        for code in 0u16..4 {
            assert_eq!(CompressionKind::from_u16(code).map(|k| k as u16), Some(code));
        }
        assert_eq!(CompressionKind::from_u16(4), None);
        assert_eq!(compression_name(9), "unknown(9)");
    }
}
