//! Contracts for the external services the Director calls.
//!
//! Providers are blocking calls made from the Director's cycle thread. Each
//! one may reach a vendor however it likes (directly or through the
//! [`relay`](crate::relay)); the pipeline only sees the narrow result types
//! below and [`ProviderError`].

use crate::block::BlockId;
use crate::mail_queue::MailItem;
use crate::track::Track;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use crate::error::{ProviderError, ProviderErrorKind};

/// Opaque reference to synthesized or fetched audio.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioHandle {
    File(PathBuf),
    /// Encoded audio (wav, mp3, ...) held in memory.
    Bytes(Arc<Vec<u8>>),
    Silence(Duration),
}

/// What the script writer gets to work with.
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub block_id: BlockId,
    /// Scripts of the most recent READY blocks, oldest first.
    pub recent_scripts: Vec<String>,
    /// Listener mail to weave into this block, if any.
    pub mail: Option<MailItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MusicQuery {
    pub query: String,
}

impl MusicQuery {
    pub fn new(query: impl Into<String>) -> Self {
        MusicQuery {
            query: query.into(),
        }
    }
}

/// Script writer output: narration plus an optional request for music.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub text: String,
    pub music: Option<MusicQuery>,
}

impl Script {
    pub fn spoken(text: impl Into<String>) -> Self {
        Script {
            text: text.into(),
            music: None,
        }
    }

    pub fn with_music(mut self, query: impl Into<String>) -> Self {
        self.music = Some(MusicQuery::new(query));
        self
    }
}

pub const MIN_RATE: f32 = 0.25;
pub const MAX_RATE: f32 = 4.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub voice: String,
    /// Speaking rate multiplier; 1.0 is normal speed.
    pub rate: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        VoiceConfig {
            voice: "default".to_string(),
            rate: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MusicSelection {
    pub track: Track,
    pub lyrics: Option<String>,
}

pub trait ScriptProvider: Send + Sync {
    fn generate(&self, request: &ScriptRequest) -> Result<Script, ProviderError>;
}

pub trait VoiceProvider: Send + Sync {
    fn synthesize(&self, text: &str, voice: &VoiceConfig) -> Result<AudioHandle, ProviderError>;
}

pub trait MusicProvider: Send + Sync {
    fn lookup(&self, query: &MusicQuery) -> Result<MusicSelection, ProviderError>;

    /// Separate lyrics lookup, used when `lookup` found none.
    fn lyrics(&self, _track: &Track) -> Result<Option<String>, ProviderError> {
        Ok(None)
    }
}
