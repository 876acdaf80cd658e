//! Blocks and the session timeline.
//!
//! A [`Block`] is one generated program segment. The [`Timeline`] is the
//! shared, append-ordered list of every block in a session. It is a cheap
//! clonable handle: the Director appends and finalizes blocks, the Preload
//! Manager and the Playback Controller only read snapshots.

use crate::error::TimelineError;
use crate::mail_queue::MailId;
use crate::provider::AudioHandle;
use crate::track::Track;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockStatus {
    Pending,
    Generating,
    Ready,
    Failed,
}

impl BlockStatus {
    /// READY and FAILED blocks never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, BlockStatus::Ready | BlockStatus::Failed)
    }

    /// Counts toward the preload lookahead.
    pub fn is_active(self) -> bool {
        matches!(self, BlockStatus::Generating | BlockStatus::Ready)
    }

    pub fn can_become(self, next: BlockStatus) -> bool {
        matches!(
            (self, next),
            (BlockStatus::Pending, BlockStatus::Generating)
                | (BlockStatus::Pending, BlockStatus::Failed)
                | (BlockStatus::Generating, BlockStatus::Ready)
                | (BlockStatus::Generating, BlockStatus::Failed)
        )
    }
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockStatus::Pending => write!(f, "PENDING"),
            BlockStatus::Generating => write!(f, "GENERATING"),
            BlockStatus::Ready => write!(f, "READY"),
            BlockStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Everything a successful cycle produces.
#[derive(Debug, Clone)]
pub struct BlockContent {
    pub script: String,
    pub voice_track: AudioHandle,
    pub music_track: Option<Track>,
    pub lyrics: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub status: BlockStatus,
    pub script: Option<String>,
    pub voice_track: Option<AudioHandle>,
    pub music_track: Option<Track>,
    pub lyrics: Option<String>,
    /// Lookup-only reference to the mail that influenced this block.
    pub source_mail: Option<MailId>,
    /// Human-readable failure reason, set once FAILED.
    pub error: Option<String>,
    pub created_at: DateTime<Local>,
}

impl Block {
    pub fn new(id: BlockId, source_mail: Option<MailId>) -> Self {
        Block {
            id,
            status: BlockStatus::Pending,
            script: None,
            voice_track: None,
            music_track: None,
            lyrics: None,
            source_mail,
            error: None,
            created_at: Local::now(),
        }
    }

    fn transition(&mut self, to: BlockStatus) -> Result<(), TimelineError> {
        if !self.status.can_become(to) {
            return Err(TimelineError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), TimelineError> {
        self.transition(BlockStatus::Generating)
    }

    pub fn complete(&mut self, content: BlockContent) -> Result<(), TimelineError> {
        self.transition(BlockStatus::Ready)?;
        self.script = Some(content.script);
        self.voice_track = Some(content.voice_track);
        self.music_track = content.music_track;
        self.lyrics = content.lyrics;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TimelineError> {
        self.transition(BlockStatus::Failed)?;
        self.error = Some(reason.into());
        Ok(())
    }

    pub fn is_playable(&self) -> bool {
        self.status == BlockStatus::Ready
    }
}

// ── Timeline ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct TimelineInner {
    blocks: Vec<Block>,
    /// Highest id ever appended; survives truncation so ids never repeat.
    high_water: Option<BlockId>,
    /// Bumped on every mutation, used by waiters.
    version: u64,
}

#[derive(Default)]
struct Shared {
    inner: Mutex<TimelineInner>,
    changed: Condvar,
}

/// Ordered sequence of all blocks in a session.
#[derive(Clone, Default)]
pub struct Timeline {
    shared: Arc<Shared>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TimelineInner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self, inner: &mut TimelineInner) {
        inner.version += 1;
        self.shared.changed.notify_all();
    }

    /// Append a block. Ids must be strictly increasing over the whole session.
    pub(crate) fn append(&self, block: Block) -> Result<(), TimelineError> {
        let mut inner = self.lock();
        if let Some(last) = inner.high_water {
            if block.id <= last {
                return Err(TimelineError::NotMonotonic {
                    last,
                    new: block.id,
                });
            }
        }
        inner.high_water = Some(block.id);
        inner.blocks.push(block);
        self.touch(&mut inner);
        Ok(())
    }

    /// Swap in a newer version of a block that is already in the timeline.
    pub(crate) fn replace(&self, block: Block) -> Result<(), TimelineError> {
        let mut inner = self.lock();
        let slot = inner
            .blocks
            .iter_mut()
            .find(|b| b.id == block.id)
            .ok_or(TimelineError::Missing(block.id))?;
        if slot.status != block.status && !slot.status.can_become(block.status) {
            return Err(TimelineError::InvalidTransition {
                id: block.id,
                from: slot.status,
                to: block.status,
            });
        }
        *slot = block;
        self.touch(&mut inner);
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<Block> {
        self.lock().blocks.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().blocks.is_empty()
    }

    pub fn get(&self, id: BlockId) -> Option<Block> {
        self.lock().blocks.iter().find(|b| b.id == id).cloned()
    }

    pub fn index_of(&self, id: BlockId) -> Option<usize> {
        self.lock().blocks.iter().position(|b| b.id == id)
    }

    /// The block right after `position`, or the first block when nothing
    /// has played yet.
    pub fn next_after(&self, position: Option<BlockId>) -> Option<Block> {
        let inner = self.lock();
        match position {
            Some(pos) => inner.blocks.iter().find(|b| b.id > pos).cloned(),
            None => inner.blocks.first().cloned(),
        }
    }

    /// Number of GENERATING or READY blocks after `position`.
    pub fn count_ahead(&self, position: Option<BlockId>) -> usize {
        self.lock()
            .blocks
            .iter()
            .filter(|b| position.is_none_or(|pos| b.id > pos))
            .filter(|b| b.status.is_active())
            .count()
    }

    pub fn count_with_status(&self, status: BlockStatus) -> usize {
        self.lock()
            .blocks
            .iter()
            .filter(|b| b.status == status)
            .count()
    }

    /// Scripts of the last `n` READY blocks, oldest first.
    pub fn recent_scripts(&self, n: usize) -> Vec<String> {
        let inner = self.lock();
        let mut scripts: Vec<String> = inner
            .blocks
            .iter()
            .rev()
            .filter(|b| b.is_playable())
            .filter_map(|b| b.script.clone())
            .take(n)
            .collect();
        scripts.reverse();
        scripts
    }

    /// Drop every block before `keep_from`. With no position, drop every
    /// finished block and keep only in-flight ones. Returns how many were
    /// removed.
    pub(crate) fn truncate_before(&self, keep_from: Option<BlockId>) -> usize {
        let mut inner = self.lock();
        let before = inner.blocks.len();
        match keep_from {
            Some(id) => inner.blocks.retain(|b| b.id >= id),
            None => inner.blocks.retain(|b| !b.status.is_terminal()),
        }
        let removed = before - inner.blocks.len();
        if removed > 0 {
            self.touch(&mut inner);
        }
        removed
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Block until the timeline changes after `seen_version` or the timeout
    /// passes. Returns the version observed on wake-up.
    pub fn wait_for_change(&self, seen_version: u64, timeout: Duration) -> u64 {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        while inner.version == seen_version {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            inner = match self.shared.changed.wait_timeout(inner, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        inner.version
    }
}
