//! Damage assessment for images whose index cannot be trusted.

pub mod scanner;

pub use scanner::{
    scan, scan_file, BlockHealth, GarbageRegion, RecoveryQuality, RecoveryReport, ScannedBlock, TrailerStatus,
};
