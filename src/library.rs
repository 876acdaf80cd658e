//! Local music library, usable as the station's music and lyrics provider.

use crate::provider::{MusicProvider, MusicQuery, MusicSelection, ProviderError};
use crate::track::Track;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Supported audio extensions.
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "aac", "m4a"];

/// Sidecar lyrics files looked up next to a track, in order.
const LYRICS_EXTENSIONS: &[&str] = &["lrc", "txt"];

pub struct MusicLibrary {
    root: PathBuf,
    tracks: Vec<Track>,
}

fn is_audio(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
}

/// A file whose tags could not be read still plays; name it after the file.
fn untagged(path: &Path) -> Track {
    Track {
        path: path.to_path_buf(),
        title: path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Unknown".to_string()),
        artist: "Unknown".to_string(),
        duration: Duration::ZERO,
        lyrics: None,
    }
}

impl MusicLibrary {
    /// Scan `root` (not recursively) for audio files.
    pub fn scan(root: &Path) -> io::Result<Self> {
        let mut tracks = Vec::new();
        for entry in std::fs::read_dir(root)?.flatten() {
            let path = entry.path();
            if !path.is_file() || !is_audio(&path) {
                continue;
            }
            let track = Track::from_path(&path).unwrap_or_else(|e| {
                debug!("{}", e);
                untagged(&path)
            });
            tracks.push(track);
        }
        tracks.sort_by(|a, b| a.path.cmp(&b.path));
        info!(root = %root.display(), tracks = tracks.len(), "music library scanned");
        Ok(MusicLibrary {
            root: root.to_path_buf(),
            tracks,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Tracks matching `query`, best matches only.
    ///
    /// A track whose "artist title" contains the whole query wins; failing
    /// that, tracks sharing the most query words. Empty when nothing matches.
    pub fn search(&self, query: &str) -> Vec<&Track> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }
        let haystacks: Vec<String> = self
            .tracks
            .iter()
            .map(|t| format!("{} {}", t.artist, t.title).to_lowercase())
            .collect();

        let whole: Vec<&Track> = self
            .tracks
            .iter()
            .zip(&haystacks)
            .filter(|(_, h)| h.contains(&query))
            .map(|(t, _)| t)
            .collect();
        if !whole.is_empty() {
            return whole;
        }

        let words: Vec<&str> = query.split_whitespace().filter(|w| w.len() > 2).collect();
        let scores: Vec<usize> = haystacks
            .iter()
            .map(|h| words.iter().filter(|w| h.contains(*w)).count())
            .collect();
        let best = scores.iter().copied().max().unwrap_or(0);
        if best == 0 {
            return Vec::new();
        }
        self.tracks
            .iter()
            .zip(scores)
            .filter(|(_, s)| *s == best)
            .map(|(t, _)| t)
            .collect()
    }
}

fn pick<'a>(candidates: &[&'a Track]) -> Option<&'a Track> {
    if candidates.is_empty() {
        return None;
    }
    Some(candidates[fastrand::usize(..candidates.len())])
}

impl MusicProvider for MusicLibrary {
    fn lookup(&self, query: &MusicQuery) -> Result<MusicSelection, ProviderError> {
        let matches = self.search(&query.query);
        let track = match pick(&matches) {
            Some(track) => track,
            None => {
                debug!(query = %query.query, "no library match, picking at random");
                let all: Vec<&Track> = self.tracks.iter().collect();
                pick(&all).ok_or_else(|| ProviderError::other("music library is empty"))?
            }
        };
        Ok(MusicSelection {
            track: track.clone(),
            lyrics: track.lyrics.clone(),
        })
    }

    fn lyrics(&self, track: &Track) -> Result<Option<String>, ProviderError> {
        for ext in LYRICS_EXTENSIONS {
            let sidecar = track.path.with_extension(ext);
            if !sidecar.is_file() {
                continue;
            }
            let text = std::fs::read_to_string(&sidecar)
                .map_err(|e| ProviderError::other(format!("cannot read '{}': {}", sidecar.display(), e)))?;
            let text = text.trim();
            if !text.is_empty() {
                return Ok(Some(text.to_string()));
            }
        }
        Ok(None)
    }
}
