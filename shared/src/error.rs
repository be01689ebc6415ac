use crate::modifier::ModifierCategory;
use thiserror::Error;

/// Failures while turning packets into bytes and back.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("failed to encode packet: {0}")]
    Encode(#[source] bincode::Error),
    #[error("failed to decode packet: {0}")]
    Decode(#[source] bincode::Error),
    #[error("packet of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Table(#[from] TableError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("{category:?} level table is full ({max} levels)")]
    Full {
        category: ModifierCategory,
        max: usize,
    },
    #[error("{category:?} modifier name must not be empty")]
    EmptyName { category: ModifierCategory },
}
