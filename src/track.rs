use crate::error::TagError;
use lofty::file::{AudioFile, TaggedFile, TaggedFileExt};
use lofty::tag::{Accessor, ItemKey, Tag};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const UNKNOWN: &str = "Unknown";

/// A music track picked for a block, with the metadata read from its tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub path: PathBuf,
    pub title: String,
    pub artist: String,
    #[serde(rename = "duration_secs", with = "secs_f64")]
    pub duration: Duration,
    /// Unsynchronized lyrics embedded in the file, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lyrics: Option<String>,
}

fn best_tag(file: &TaggedFile) -> Option<&Tag> {
    file.primary_tag().or_else(|| file.first_tag())
}

fn text(tag: Option<&Tag>, key: ItemKey) -> Option<String> {
    tag.and_then(|t| t.get_string(&key))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl Track {
    /// Read title, artist, length and lyrics from the file's tags. A missing
    /// title falls back to the file stem.
    pub fn from_path(path: &Path) -> Result<Self, TagError> {
        let file = lofty::read_from_path(path).map_err(|source| TagError {
            path: path.display().to_string(),
            source,
        })?;
        let tag = best_tag(&file);

        let title = tag
            .and_then(|t| t.title().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| UNKNOWN.to_string());
        let artist = tag
            .and_then(|t| t.artist().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string());

        Ok(Track {
            path: path.to_path_buf(),
            title,
            artist,
            duration: file.properties().duration(),
            lyrics: text(tag, ItemKey::Lyrics),
        })
    }

    /// "Artist - Title", the way the track is announced.
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }

    /// Length as M:SS.
    pub fn duration_display(&self) -> String {
        let secs = self.duration.as_secs();
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}

mod secs_f64 {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Track {
        Track {
            path: PathBuf::from("test.mp3"),
            title: "Night Drive".to_string(),
            artist: "Neon".to_string(),
            duration: Duration::from_millis(185_500),
            lyrics: None,
        }
    }

    #[test]
    fn duration_display_drops_fraction() {
        assert_eq!(sample().duration_display(), "3:05");
    }

    #[test]
    fn display_name_joins_artist_and_title() {
        assert_eq!(sample().display_name(), "Neon - Night Drive");
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = Track::from_path(Path::new("nonexistent.mp3")).unwrap_err();
        assert_eq!(err.path, "nonexistent.mp3");
    }

    #[test]
    fn json_uses_fractional_seconds() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["duration_secs"], 185.5);
        assert!(json.get("lyrics").is_none());

        let back: Track = serde_json::from_value(json).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn negative_duration_is_rejected() {
        let json = r#"{"path":"a.mp3","title":"A","artist":"B","duration_secs":-1.0}"#;
        assert!(serde_json::from_str::<Track>(json).is_err());
    }
}
