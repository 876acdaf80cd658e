//! Error types shared across the generation and playback pipeline.

use crate::block::{Block, BlockId, BlockStatus};
use std::fmt;
use thiserror::Error;

/// What went wrong inside a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Network,
    Auth,
    RateLimited,
    Malformed,
    Other,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorKind::Network => write!(f, "network error"),
            ProviderErrorKind::Auth => write!(f, "authentication failed"),
            ProviderErrorKind::RateLimited => write!(f, "rate limited"),
            ProviderErrorKind::Malformed => write!(f, "malformed response"),
            ProviderErrorKind::Other => write!(f, "provider error"),
        }
    }
}

/// Failure reported by a script, voice or music provider.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        ProviderError {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Network, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Auth, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::RateLimited, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Malformed, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Other, message)
    }
}

/// The generation stage a provider failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Script,
    Voice,
    Music,
    Lyrics,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Script => write!(f, "script"),
            Stage::Voice => write!(f, "voice"),
            Stage::Music => write!(f, "music"),
            Stage::Lyrics => write!(f, "lyrics"),
        }
    }
}

/// A Director cycle that ended with a FAILED block.
///
/// The failed block travels with the error so the caller can inspect it;
/// it is already recorded in the timeline.
#[derive(Debug, Clone, Error)]
#[error("{stage} stage failed for block {}: {source}", .block.id)]
pub struct GenerationError {
    pub stage: Stage,
    pub block: Block,
    #[source]
    pub source: ProviderError,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimelineError {
    #[error("block {new} does not follow block {last}")]
    NotMonotonic { last: BlockId, new: BlockId },

    #[error("block {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: BlockId,
        from: BlockStatus,
        to: BlockStatus,
    },

    #[error("block {0} is not in the timeline")]
    Missing(BlockId),
}

#[derive(Debug, Error)]
pub enum MixError {
    #[error("cannot open '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode '{path}': {message}")]
    Decode { path: String, message: String },
}

#[derive(Debug, Error)]
#[error("cannot read tags from '{path}': {source}")]
pub struct TagError {
    pub path: String,
    #[source]
    pub source: lofty::error::LoftyError,
}

/// The speaker could not be opened.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("cannot open audio output: {0}")]
    Stream(#[from] rodio::StreamError),

    #[error("cannot create audio sink: {0}")]
    Sink(#[from] rodio::PlayError),
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("block {0} is not in the timeline")]
    UnknownBlock(BlockId),

    #[error("block {0} is still being generated")]
    NotReady(BlockId),

    #[error("station is off air")]
    OffAir,

    #[error("mixer failed for block {id}: {source}")]
    Mixer {
        id: BlockId,
        #[source]
        source: MixError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write config '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: i64,
        max: i64,
        value: i64,
    },

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfBounds {
        field: &'static str,
        min: f32,
        max: f32,
        value: f32,
    },
}
