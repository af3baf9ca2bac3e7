pub mod block;
pub mod cache;
pub mod cd;
pub mod checksum;
pub mod codec;
pub mod ddt;
pub mod header;
pub mod image;
pub mod index;
pub mod media;
pub mod perf;
pub mod recovery;
pub mod subchannel;

pub use block::{BlockKind, DataBlockHeader, DataKind, DdtHeader};
pub use checksum::{ChecksumAlgorithm, ChecksumEntry};
pub use codec::{CodecError, CompressionKind};
pub use header::ImageHeader;
pub use image::{CreateOptions, Image, ImageError, ImageInfo, ReadOptions, SectorTag, VerifyReport};
pub use index::{Index, IndexEntry};
pub use media::{MediaType, Track, TrackType};
