//! Renders a block's voice and music into one playable stream.
//!
//! The Playback Controller only knows the [`AudioMixer`] contract. The rodio
//! implementation plays the voice track first, then the music track faded in,
//! each at its own volume.

use crate::error::MixError;
use crate::provider::AudioHandle;
use crate::track::Track;
use rodio::source::Zero;
use rodio::{Decoder, Source};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::Path;
use std::time::Duration;

const SILENCE_RATE: u32 = 44_100;

pub const MAX_VOLUME: f32 = 4.0;
pub const MAX_FADE_IN_SECS: f32 = 60.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixConfig {
    pub voice_volume: f32,
    pub music_volume: f32,
    /// Fade-in applied to the music track, in seconds. 0 disables it.
    pub music_fade_in_secs: f32,
}

impl Default for MixConfig {
    fn default() -> Self {
        MixConfig {
            voice_volume: 1.0,
            music_volume: 0.8,
            music_fade_in_secs: 1.5,
        }
    }
}

impl MixConfig {
    /// Out-of-range values are clamped; NaN means no fade.
    fn fade_in(&self) -> Duration {
        Duration::try_from_secs_f32(self.music_fade_in_secs.clamp(0.0, MAX_FADE_IN_SECS)).unwrap_or(Duration::ZERO)
    }

    fn volume(value: f32) -> f32 {
        if value.is_nan() { 0.0 } else { value.clamp(0.0, MAX_VOLUME) }
    }
}

pub trait AudioMixer: Send {
    type Stream;

    fn render(&self, voice: &AudioHandle, music: Option<&Track>, config: &MixConfig) -> Result<Self::Stream, MixError>;
}

/// A rendered block, ready for a rodio sink.
pub type PlayableStream = Box<dyn Source<Item = f32> + Send>;

#[derive(Debug, Clone, Copy, Default)]
pub struct RodioMixer;

impl RodioMixer {
    pub fn new() -> Self {
        RodioMixer
    }
}

fn decode_file(path: &Path) -> Result<Decoder<BufReader<File>>, MixError> {
    let file = File::open(path).map_err(|source| MixError::Open {
        path: path.display().to_string(),
        source,
    })?;
    Decoder::new(BufReader::new(file)).map_err(|e| MixError::Decode {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn voice_source(voice: &AudioHandle, volume: f32) -> Result<PlayableStream, MixError> {
    let source: PlayableStream = match voice {
        AudioHandle::File(path) => Box::new(decode_file(path)?.convert_samples::<f32>().amplify(volume)),
        AudioHandle::Bytes(bytes) => {
            let decoder = Decoder::new(Cursor::new(bytes.to_vec())).map_err(|e| MixError::Decode {
                path: "<memory>".to_string(),
                message: e.to_string(),
            })?;
            Box::new(decoder.convert_samples::<f32>().amplify(volume))
        }
        AudioHandle::Silence(length) => Box::new(Zero::<f32>::new(1, SILENCE_RATE).take_duration(*length)),
    };
    Ok(source)
}

impl AudioMixer for RodioMixer {
    type Stream = PlayableStream;

    fn render(&self, voice: &AudioHandle, music: Option<&Track>, config: &MixConfig) -> Result<PlayableStream, MixError> {
        // Open everything before queueing so a bad music file fails the render.
        let voice = voice_source(voice, MixConfig::volume(config.voice_volume))?;
        let music = match music {
            Some(track) => Some(
                decode_file(&track.path)?
                    .convert_samples::<f32>()
                    .amplify(MixConfig::volume(config.music_volume))
                    .fade_in(config.fade_in()),
            ),
            None => None,
        };

        let (input, output) = rodio::queue::queue::<f32>(false);
        input.append(voice);
        if let Some(music) = music {
            input.append(music);
        }
        Ok(Box::new(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn silence_voice_renders_finite_samples() {
        let stream = RodioMixer::new()
            .render(&AudioHandle::Silence(Duration::from_millis(100)), None, &MixConfig::default())
            .unwrap();
        let samples: Vec<f32> = stream.take(1_000_000).collect();
        assert!(samples.len() >= 4_000);
        assert!(samples.len() < 1_000_000);
        assert!(samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn missing_voice_file_is_open_error() {
        let result = RodioMixer::new().render(
            &AudioHandle::File(PathBuf::from("__missing_voice__.wav")),
            None,
            &MixConfig::default(),
        );
        assert!(matches!(result, Err(MixError::Open { .. })));
    }

    #[test]
    fn missing_music_file_fails_render() {
        let track = Track {
            path: PathBuf::from("__missing_song__.mp3"),
            title: "Ghost".to_string(),
            artist: "Nobody".to_string(),
            duration: Duration::from_secs(1),
            lyrics: None,
        };
        let result = RodioMixer::new().render(
            &AudioHandle::Silence(Duration::from_millis(10)),
            Some(&track),
            &MixConfig::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn garbage_bytes_are_decode_error() {
        let bytes = std::sync::Arc::new(vec![0u8; 64]);
        let result = RodioMixer::new().render(&AudioHandle::Bytes(bytes), None, &MixConfig::default());
        assert!(matches!(result, Err(MixError::Decode { .. })));
    }

    #[test]
    fn mix_config_fills_missing_fields() {
        let cfg: MixConfig = serde_json::from_str(r#"{"music_volume": 0.5}"#).unwrap();
        assert_eq!(cfg.music_volume, 0.5);
        assert_eq!(cfg.voice_volume, 1.0);
        assert_eq!(cfg.fade_in(), Duration::from_millis(1500));
    }

    #[test]
    fn extreme_fade_in_is_clamped_not_fatal() {
        let huge = MixConfig {
            music_fade_in_secs: 1e30,
            ..MixConfig::default()
        };
        assert_eq!(huge.fade_in(), Duration::from_secs(60));
        let nan = MixConfig {
            music_fade_in_secs: f32::NAN,
            ..MixConfig::default()
        };
        assert_eq!(nan.fade_in(), Duration::ZERO);
        let negative = MixConfig {
            music_fade_in_secs: -3.0,
            ..MixConfig::default()
        };
        assert_eq!(negative.fade_in(), Duration::ZERO);
    }

    #[test]
    fn volumes_are_clamped() {
        assert_eq!(MixConfig::volume(1e30), MAX_VOLUME);
        assert_eq!(MixConfig::volume(-1.0), 0.0);
        assert_eq!(MixConfig::volume(f32::NAN), 0.0);
    }

    #[test]
    fn render_survives_extreme_mix_config() {
        let config = MixConfig {
            voice_volume: 1e30,
            music_volume: f32::INFINITY,
            music_fade_in_secs: 1e30,
        };
        let stream = RodioMixer::new()
            .render(&AudioHandle::Silence(Duration::from_millis(10)), None, &config)
            .unwrap();
        assert!(stream.take(100).all(|s| s == 0.0));
    }
}
