// SPDX-License-Identifier: MIT
use crate::format::{DEFAULT_MAX_DOCUMENT_SIZE, DEFAULT_METADATA_RESERVE};

/// Tool defaults, overridable through `MC_*` environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub batch_size: usize,
    pub compression_level: i32,
    pub metadata_reserve: u32,
    pub max_document_size: u32,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; unparsable values fall back
    /// to the defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            batch_size: lookup("MC_BATCH_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            compression_level: lookup("MC_COMPRESSION_LEVEL")
                .and_then(|s| s.parse().ok())
                .unwrap_or(zstd::DEFAULT_COMPRESSION_LEVEL),
            metadata_reserve: lookup("MC_METADATA_RESERVE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_METADATA_RESERVE),
            max_document_size: lookup("MC_MAX_DOCUMENT_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_DOCUMENT_SIZE),
            log_level: lookup("MC_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("MC_BATCH_SIZE must be at least 1".to_string());
        }

        let levels = zstd::compression_level_range();
        if !levels.contains(&self.compression_level) {
            return Err(format!(
                "MC_COMPRESSION_LEVEL must be between {} and {}",
                levels.start(),
                levels.end()
            ));
        }

        // Room for a minimal metadata record
        if self.metadata_reserve < 256 {
            return Err("MC_METADATA_RESERVE must be at least 256 bytes".to_string());
        }

        if self.max_document_size == 0 || self.max_document_size > DEFAULT_MAX_DOCUMENT_SIZE {
            return Err(format!(
                "MC_MAX_DOCUMENT_SIZE must be between 1 and {}",
                DEFAULT_MAX_DOCUMENT_SIZE
            ));
        }

        if !matches!(
            self.log_level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(format!("MC_LOG_LEVEL '{}' is not a log level", self.log_level));
        }

        Ok(())
    }
}
