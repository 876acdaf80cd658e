//! Station configuration, persisted as pretty JSON.

use crate::error::ConfigError;
use crate::mixer::{MAX_FADE_IN_SECS, MAX_VOLUME, MixConfig};
use crate::preload::{DEFAULT_MAX_FAILURES, DEFAULT_PRELOAD_BLOCKS, MAX_PRELOAD_BLOCKS, MIN_PRELOAD_BLOCKS, PreloadConfig};
use crate::provider::{MAX_RATE, MIN_RATE, VoiceConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CONFIG_DIR: &str = "onair";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub station_name: String,
    /// Blocks kept READY or GENERATING ahead of the listener (1–10).
    pub preload_block_count: usize,
    pub max_consecutive_failures: u32,
    /// Prior scripts handed to the script writer.
    pub context_tail: usize,
    pub voice: VoiceConfig,
    pub mix: MixConfig,
    pub music_dir: Option<PathBuf>,
    /// The offline writer asks for music every this many blocks.
    pub music_every: u64,
}

impl Default for StationConfig {
    fn default() -> Self {
        StationConfig {
            station_name: "On Air".to_string(),
            preload_block_count: DEFAULT_PRELOAD_BLOCKS,
            max_consecutive_failures: DEFAULT_MAX_FAILURES,
            context_tail: 3,
            voice: VoiceConfig::default(),
            mix: MixConfig::default(),
            music_dir: None,
            music_every: 2,
        }
    }
}

fn range(field: &'static str, min: i64, max: i64, value: i64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, min, max, value })
    }
}

fn bounds(field: &'static str, min: f32, max: f32, value: f32) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfBounds { field, min, max, value })
    }
}

impl StationConfig {
    /// `<config dir>/onair/config.json`, or a relative path when the
    /// platform has no config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join(CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_FILE)
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(StationConfig::default());
        }
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: StationConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let json = serde_json::to_string_pretty(self)?;
        let write_err = |source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(path, json).map_err(write_err)?;
        info!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        range(
            "preload_block_count",
            MIN_PRELOAD_BLOCKS as i64,
            MAX_PRELOAD_BLOCKS as i64,
            self.preload_block_count as i64,
        )?;
        range(
            "max_consecutive_failures",
            1,
            i64::from(u32::MAX),
            i64::from(self.max_consecutive_failures),
        )?;
        bounds("voice.rate", MIN_RATE, MAX_RATE, self.voice.rate)?;
        bounds("mix.voice_volume", 0.0, MAX_VOLUME, self.mix.voice_volume)?;
        bounds("mix.music_volume", 0.0, MAX_VOLUME, self.mix.music_volume)?;
        bounds("mix.music_fade_in_secs", 0.0, MAX_FADE_IN_SECS, self.mix.music_fade_in_secs)?;
        Ok(())
    }

    pub fn set_preload_block_count(&mut self, n: usize) -> Result<(), ConfigError> {
        range(
            "preload_block_count",
            MIN_PRELOAD_BLOCKS as i64,
            MAX_PRELOAD_BLOCKS as i64,
            n as i64,
        )?;
        self.preload_block_count = n;
        Ok(())
    }

    pub fn preload(&self) -> PreloadConfig {
        PreloadConfig {
            preload_block_count: self.preload_block_count,
            max_consecutive_failures: self.max_consecutive_failures,
            context_tail: self.context_tail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = StationConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, StationConfig::default());
        assert_eq!(config.preload_block_count, 3);
    }

    #[test]
    fn save_and_load_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = StationConfig::default();
        config.set_preload_block_count(5).unwrap();
        config.music_dir = Some(PathBuf::from("/music"));
        config.save(&path).unwrap();

        let loaded = StationConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn old_files_get_new_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"preload_block_count": 2}"#).unwrap();
        let config = StationConfig::load(&path).unwrap();
        assert_eq!(config.preload_block_count, 2);
        assert_eq!(config.max_consecutive_failures, 3);
        assert_eq!(config.mix, MixConfig::default());
    }

    #[test]
    fn out_of_range_preload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"preload_block_count": 11}"#).unwrap();
        let err = StationConfig::load(&path).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                field: "preload_block_count",
                value: 11,
                ..
            }
        ));

        let mut config = StationConfig::default();
        assert!(config.set_preload_block_count(0).is_err());
        assert_eq!(config.preload_block_count, 3);
    }

    #[test]
    fn out_of_range_mix_and_voice_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"mix": {"music_fade_in_secs": 1e30}}"#).unwrap();
        let err = StationConfig::load(&path).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfBounds {
                field: "mix.music_fade_in_secs",
                ..
            }
        ));

        let mut config = StationConfig::default();
        config.mix.music_volume = -0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfBounds { field: "mix.music_volume", .. })
        ));

        let mut config = StationConfig::default();
        config.voice.rate = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfBounds { field: "voice.rate", .. })
        ));
        assert!(config.save(&path).is_err());
    }

    #[test]
    fn corrupt_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(StationConfig::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn default_path_ends_in_onair_config() {
        let path = StationConfig::default_path();
        assert!(path.ends_with("onair/config.json") || path.ends_with("config.json"));
    }
}
