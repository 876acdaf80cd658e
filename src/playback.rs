//! Playback position and navigation over the timeline.
//!
//! The position is a block id rather than an index, so truncating history
//! never shifts it. Every position change hands the new position to the
//! Preload Manager, which decides whether another block should be made.

use crate::block::{Block, BlockId, BlockStatus, Timeline};
use crate::error::PlaybackError;
use crate::mixer::{AudioMixer, MixConfig};
use crate::monitor::{AgentId, AgentState, Monitor};
use crate::preload::PreloadManager;
use crate::provider::AudioHandle;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of a navigation request.
pub enum Cue<S> {
    /// The block is now current; `stream` is its rendered audio.
    Playing { block: Block, stream: S },
    /// The next block is not READY yet. Nothing plays.
    Waiting,
    /// Jumped onto a FAILED block; it is shown, never played.
    SkippedFailed(Block),
}

impl<S> Cue<S> {
    pub fn block_id(&self) -> Option<BlockId> {
        match self {
            Cue::Playing { block, .. } | Cue::SkippedFailed(block) => Some(block.id),
            Cue::Waiting => None,
        }
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, Cue::Waiting)
    }
}

pub struct PlaybackController<M: AudioMixer> {
    timeline: Timeline,
    preload: PreloadManager,
    monitor: Arc<Monitor>,
    mixer: M,
    mix: MixConfig,
    current: Option<BlockId>,
    waiting: bool,
}

impl<M: AudioMixer> PlaybackController<M> {
    pub fn new(timeline: Timeline, preload: PreloadManager, monitor: Arc<Monitor>, mixer: M, mix: MixConfig) -> Self {
        PlaybackController {
            timeline,
            preload,
            monitor,
            mixer,
            mix,
            current: None,
            waiting: false,
        }
    }

    /// Id of the block last moved onto, if any.
    pub fn current(&self) -> Option<BlockId> {
        self.current
    }

    pub fn current_block(&self) -> Option<Block> {
        self.current.and_then(|id| self.timeline.get(id))
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn set_mix_config(&mut self, mix: MixConfig) {
        self.mix = mix;
    }

    /// A torn-down session plays nothing, including a block whose cycle
    /// finished after the teardown.
    fn ensure_on_air(&self) -> Result<(), PlaybackError> {
        if self.preload.is_stopped() {
            return Err(PlaybackError::OffAir);
        }
        Ok(())
    }

    fn move_to(&mut self, id: BlockId) {
        self.current = Some(id);
        self.preload.ensure_lookahead(self.current);
    }

    /// Move to the next block. FAILED blocks are stepped over; a block that
    /// is still generating (or absent) puts playback into the waiting state.
    ///
    /// A mixer failure still moves the position onto the block, so the next
    /// call continues after it.
    pub fn advance(&mut self) -> Result<Cue<M::Stream>, PlaybackError> {
        self.ensure_on_air()?;
        loop {
            let Some(next) = self.timeline.next_after(self.current) else {
                return Ok(self.wait());
            };
            match next.status {
                BlockStatus::Failed => {
                    info!(block = %next.id, "skipping failed block");
                    self.move_to(next.id);
                }
                BlockStatus::Ready => return self.play(next),
                BlockStatus::Pending | BlockStatus::Generating => return Ok(self.wait()),
            }
        }
    }

    fn wait(&mut self) -> Cue<M::Stream> {
        if !self.waiting {
            debug!(after = ?self.current, "waiting for next block");
        }
        self.waiting = true;
        self.preload.ensure_lookahead(self.current);
        Cue::Waiting
    }

    /// Like [`advance`](Self::advance), but while waiting blocks until the
    /// timeline changes, up to `timeout`.
    pub fn advance_wait(&mut self, timeout: Duration) -> Result<Cue<M::Stream>, PlaybackError> {
        let deadline = Instant::now() + timeout;
        loop {
            let seen = self.timeline.version();
            let cue = self.advance()?;
            let now = Instant::now();
            if !cue.is_waiting() || now >= deadline {
                return Ok(cue);
            }
            self.timeline.wait_for_change(seen, deadline - now);
        }
    }

    /// Seek to any block already in the timeline. Blocks beyond the
    /// generated edge do not exist yet and are rejected as unknown.
    pub fn jump_to_block(&mut self, id: BlockId) -> Result<Cue<M::Stream>, PlaybackError> {
        self.ensure_on_air()?;
        let block = self.timeline.get(id).ok_or(PlaybackError::UnknownBlock(id))?;
        match block.status {
            BlockStatus::Ready => self.play(block),
            BlockStatus::Failed => {
                info!(block = %id, "jumped to failed block");
                self.waiting = false;
                self.move_to(id);
                Ok(Cue::SkippedFailed(block))
            }
            BlockStatus::Pending | BlockStatus::Generating => Err(PlaybackError::NotReady(id)),
        }
    }

    fn play(&mut self, block: Block) -> Result<Cue<M::Stream>, PlaybackError> {
        self.waiting = false;
        self.move_to(block.id);

        self.monitor
            .publish_agent_status(AgentId::Mixer, AgentState::Busy, format!("Mixing block {}", block.id));
        let silence = AudioHandle::Silence(Duration::ZERO);
        let voice = block.voice_track.as_ref().unwrap_or(&silence);
        match self.mixer.render(voice, block.music_track.as_ref(), &self.mix) {
            Ok(stream) => {
                self.monitor
                    .publish_agent_status(AgentId::Mixer, AgentState::Ready, format!("Playing block {}", block.id));
                info!(block = %block.id, "now playing");
                Ok(Cue::Playing { block, stream })
            }
            Err(source) => {
                warn!(block = %block.id, "mixer failed: {}", source);
                self.monitor
                    .publish_agent_status(AgentId::Mixer, AgentState::Error, source.to_string());
                Err(PlaybackError::Mixer { id: block.id, source })
            }
        }
    }

    /// Drop every block before the current one (all finished blocks when
    /// nothing has played yet). Mail and in-flight generation are untouched.
    /// Returns how many blocks were removed.
    pub fn clear_history(&mut self) -> usize {
        let removed = self.timeline.truncate_before(self.current);
        info!(removed, "history cleared");
        self.preload.ensure_lookahead(self.current);
        removed
    }
}
