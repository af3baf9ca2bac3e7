//! Creation and read tuning knobs.

use serde::Serialize;

use super::ImageError;
use crate::checksum::DigestSelection;

const MIB: u64 = 1024 * 1024;

/// Options fixed when an image is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateOptions {
    /// Rounded up to a power of two.
    pub sectors_per_block: u32,
    /// LZMA dictionary size in bytes. Validated and accepted, but lzma-rs
    /// has no dictionary setting, so the encoder default is always used.
    pub dictionary:        u32,
    /// Largest DDT, in MiB, kept in memory; bigger tables live on disk.
    pub max_ddt_size:      u64,
    pub md5:               bool,
    pub sha1:              bool,
    pub sha256:            bool,
    pub spamsum:           bool,
    pub deduplicate:       bool,
    pub compress:          bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            sectors_per_block: 4096,
            dictionary:        33_554_432,
            max_ddt_size:      256,
            md5:               false,
            sha1:              false,
            sha256:            false,
            spamsum:           false,
            deduplicate:       true,
            compress:          true,
        }
    }
}

impl CreateOptions {
    /// Apply `key=value` pairs over the defaults.
    pub fn from_pairs<I, T>(pairs: I) -> Result<Self, ImageError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut opts = Self::default();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| ImageError::InvalidOption(format!("expected key=value, got '{pair}'")))?;
            opts.set(key.trim(), value.trim())?;
        }
        opts.validate()?;
        Ok(opts)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ImageError> {
        match key.to_ascii_lowercase().as_str() {
            "sectors_per_block" => self.sectors_per_block = parse_number(key, value)?,
            "dictionary"        => self.dictionary        = parse_number(key, value)?,
            "max_ddt_size"      => self.max_ddt_size      = parse_number(key, value)?,
            "md5"               => self.md5               = parse_bool(key, value)?,
            "sha1"              => self.sha1              = parse_bool(key, value)?,
            "sha256"            => self.sha256            = parse_bool(key, value)?,
            "spamsum"           => self.spamsum           = parse_bool(key, value)?,
            "deduplicate"       => self.deduplicate       = parse_bool(key, value)?,
            "compress"          => self.compress          = parse_bool(key, value)?,
            _ => return Err(ImageError::InvalidOption(format!("unknown option '{key}'"))),
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ImageError> {
        if self.sectors_per_block == 0 || self.sectors_per_block > 1 << 31 {
            return Err(ImageError::InvalidOption(format!(
                "sectors_per_block must be in 1..=2147483648, got {}",
                self.sectors_per_block
            )));
        }
        if self.dictionary < 4096 {
            return Err(ImageError::InvalidOption(format!(
                "dictionary must be at least 4096 bytes, got {}",
                self.dictionary
            )));
        }
        Ok(())
    }

    pub fn digests(&self) -> DigestSelection {
        DigestSelection { md5: self.md5, sha1: self.sha1, sha256: self.sha256, spamsum: self.spamsum }
    }

    /// Whether a table of `entries` sectors stays in memory.
    pub fn ddt_in_memory(&self, entries: u64) -> bool {
        entries.saturating_mul(8) <= self.max_ddt_size.saturating_mul(MIB)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ImageError> {
    value
        .parse()
        .map_err(|_| ImageError::InvalidOption(format!("{key}: '{value}' is not a number")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ImageError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1"  => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ImageError::InvalidOption(format!("{key}: '{value}' is not a boolean"))),
    }
}

/// Read-side cache budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Decompressed block cache, bytes.
    pub max_cache_bytes:       usize,
    /// On-disk DDT entry cache, entries.
    pub max_ddt_cache_entries: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            max_cache_bytes:       16 * 1024 * 1024,
            max_ddt_cache_entries: 16_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_override_defaults() {
        let o = CreateOptions::from_pairs(["sectors_per_block=16", "md5=true", "deduplicate = false"]).unwrap();
        assert_eq!(o.sectors_per_block, 16);
        assert!(o.md5);
        assert!(!o.deduplicate);
        assert!(o.compress);
        assert_eq!(o.dictionary, 33_554_432);
    }

    #[test]
    fn bad_pairs_rejected() {
        assert!(CreateOptions::from_pairs(["nonsense"]).is_err());
        assert!(CreateOptions::from_pairs(["colour=blue"]).is_err());
        assert!(CreateOptions::from_pairs(["md5=maybe"]).is_err());
        assert!(CreateOptions::from_pairs(["sectors_per_block=0"]).is_err());
        assert!(CreateOptions::from_pairs(["dictionary=12"]).is_err());
    }

    #[test]
    fn ddt_budget_in_mib() {
        let o = CreateOptions { max_ddt_size: 1, ..Default::default() };
        assert!(o.ddt_in_memory(131_072));
        assert!(!o.ddt_in_memory(131_073));
        let none = CreateOptions { max_ddt_size: 0, ..Default::default() };
        assert!(!none.ddt_in_memory(1));
    }
}
