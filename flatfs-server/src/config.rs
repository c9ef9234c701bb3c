use std::path::{Path, PathBuf};
use std::str::FromStr;

use flatfs::{FsOptions, ReadMode};
use log::LevelFilter;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadPolicy {
    Strict,
    Relaxed,
}

impl From<ReadPolicy> for ReadMode {
    fn from(policy: ReadPolicy) -> Self {
        match policy {
            ReadPolicy::Strict => ReadMode::Strict,
            ReadPolicy::Relaxed => ReadMode::Relaxed,
        }
    }
}

/// Server settings. Every key is optional in the TOML file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub port: u16,
    /// Backing file of the block region. Recreated on every start.
    pub disk: PathBuf,
    pub block_size: usize,
    pub block_count: usize,
    pub max_files: usize,
    pub reserved_blocks: usize,
    pub read_mode: ReadPolicy,
    pub scrub_on_release: bool,
    /// One of off, error, warn, info, debug, trace.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let fs = FsOptions::default();
        Self {
            port: 12345,
            disk: PathBuf::from("filesystem.dat"),
            block_size: 128,
            block_count: 10,
            max_files: fs.max_files,
            reserved_blocks: fs.reserved_blocks,
            read_mode: ReadPolicy::Strict,
            scrub_on_release: fs.scrub_on_release,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 || self.block_count == 0 {
            return Err(ConfigError::Invalid(
                "block_size and block_count must be non-zero".to_string(),
            ));
        }
        self.level_filter()?;
        Ok(())
    }

    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        LevelFilter::from_str(&self.log_level)
            .map_err(|_| ConfigError::Invalid(format!("unknown log level {:?}", self.log_level)))
    }

    pub fn fs_options(&self) -> FsOptions {
        FsOptions {
            max_files: self.max_files,
            reserved_blocks: self.reserved_blocks,
            read_mode: self.read_mode.into(),
            scrub_on_release: self.scrub_on_release,
        }
    }
}
