//! Providers that need no network, for running the station without AI or
//! TTS services.

use crate::provider::{
    AudioHandle, MAX_RATE, MIN_RATE, ProviderError, Script, ScriptProvider, ScriptRequest, VoiceConfig, VoiceProvider,
};
use std::time::Duration;

const WORDS_PER_MINUTE: f32 = 150.0;

const OPENERS: &[&str] = &[
    "You're listening to {station}. Stay with us.",
    "This is {station}, keeping you company.",
    "Welcome back to {station}.",
    "Still here on {station}, and glad you are too.",
];

const MOODS: &[&str] = &["chill", "upbeat", "acoustic", "night drive", "sunny"];

/// Script writer built from fixed templates.
pub struct TemplateWriter {
    station: String,
    /// Ask for music every this many blocks; 0 never does.
    music_every: u64,
}

impl TemplateWriter {
    pub fn new(station: impl Into<String>, music_every: u64) -> Self {
        TemplateWriter {
            station: station.into(),
            music_every,
        }
    }
}

impl ScriptProvider for TemplateWriter {
    fn generate(&self, request: &ScriptRequest) -> Result<Script, ProviderError> {
        let n = request.block_id.0;
        let opener = OPENERS[(n as usize) % OPENERS.len()].replace("{station}", &self.station);

        let mut text = opener;
        if request.recent_scripts.is_empty() {
            text.push_str(" Good to have you with us from the very first minute.");
        }
        if let Some(mail) = &request.mail {
            text.push_str(&format!(" A listener writes in: \"{}\". Thank you for that!", mail.content));
        }

        let wants_music = self.music_every > 0 && n % self.music_every == 0;
        if !wants_music {
            return Ok(Script::spoken(text));
        }
        let query = match &request.mail {
            Some(mail) => mail.content.clone(),
            None => MOODS[(n as usize) % MOODS.len()].to_string(),
        };
        text.push_str(" Here's some music for you.");
        Ok(Script::spoken(text).with_music(query))
    }
}

/// Voice provider that "reads" a script as silence of the same length.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentVoice;

/// How long `text` takes to read aloud at `rate`.
pub fn reading_time(text: &str, rate: f32) -> Duration {
    let words = text.split_whitespace().count().max(1) as f32;
    let rate = if rate.is_nan() { 1.0 } else { rate.clamp(MIN_RATE, MAX_RATE) };
    Duration::try_from_secs_f32(words / WORDS_PER_MINUTE * 60.0 / rate).unwrap_or(Duration::ZERO)
}

impl VoiceProvider for SilentVoice {
    fn synthesize(&self, text: &str, voice: &VoiceConfig) -> Result<AudioHandle, ProviderError> {
        Ok(AudioHandle::Silence(reading_time(text, voice.rate)))
    }
}
