//! The Director turns the current context into exactly one new block.
//!
//! One call to [`Director::run_cycle`] is one generation cycle:
//!
//! 1. claim at most one unprocessed mail item,
//! 2. ask the script provider for narration (`WRITER`, API event `AI`),
//! 3. synthesize the narration (`TTS`, API event `TTS`) while, if the script
//!    asked for music, looking the track up (`Music`, then `Lyrics`),
//! 4. finalize the block as READY, or FAILED on the first provider error.
//!
//! Provider failures become data: the FAILED block is recorded in the
//! timeline and returned inside [`GenerationError`]. Nothing is retried here
//! and a consumed mail item is never put back. The Director does not guard
//! against concurrent cycles; its caller owns that decision.

use crate::block::{Block, BlockContent, BlockId, Timeline};
use crate::error::{GenerationError, ProviderError, Stage};
use crate::mail_queue::{MailItem, MailQueue};
use crate::monitor::{AgentId, AgentState, ApiService, Monitor};
use crate::provider::{
    AudioHandle, MusicProvider, MusicQuery, ScriptProvider, ScriptRequest, VoiceConfig, VoiceProvider,
};
use crate::track::Track;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use tracing::{debug, error, info, warn};

const DEFAULT_CONTEXT_TAIL: usize = 3;

/// Inputs of one cycle. Callers build it from the session timeline; what the
/// Director reads from it is its own business.
#[derive(Clone)]
pub struct ExecutionContext {
    timeline: Timeline,
    context_tail: usize,
}

impl ExecutionContext {
    pub fn new(timeline: Timeline) -> Self {
        ExecutionContext {
            timeline,
            context_tail: DEFAULT_CONTEXT_TAIL,
        }
    }

    /// How many prior scripts the writer sees for continuity.
    pub fn with_context_tail(mut self, n: usize) -> Self {
        self.context_tail = n;
        self
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }
}

/// Observable state of the Director.
#[derive(Default)]
pub struct DirectorState {
    running: AtomicBool,
    cycles: AtomicU64,
}

impl DirectorState {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Cycles started since the Director was created.
    pub fn cycles_started(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    fn enter(&self) -> RunningGuard<'_> {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("director cycle started while another one is running");
        }
        self.cycles.fetch_add(1, Ordering::Relaxed);
        RunningGuard { state: self }
    }
}

struct RunningGuard<'a> {
    state: &'a DirectorState,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::Release);
    }
}

type StageResult<T> = Result<T, (Stage, ProviderError)>;

pub struct Director {
    script: Arc<dyn ScriptProvider>,
    voice: Arc<dyn VoiceProvider>,
    music: Option<Arc<dyn MusicProvider>>,
    mail: Arc<MailQueue>,
    monitor: Arc<Monitor>,
    voice_config: VoiceConfig,
    next_id: AtomicU64,
    state: DirectorState,
}

impl Director {
    pub fn new(
        script: Arc<dyn ScriptProvider>,
        voice: Arc<dyn VoiceProvider>,
        mail: Arc<MailQueue>,
        monitor: Arc<Monitor>,
    ) -> Self {
        Director {
            script,
            voice,
            music: None,
            mail,
            monitor,
            voice_config: VoiceConfig::default(),
            next_id: AtomicU64::new(1),
            state: DirectorState::default(),
        }
    }

    pub fn with_music(mut self, music: Arc<dyn MusicProvider>) -> Self {
        self.music = Some(music);
        self
    }

    pub fn with_voice_config(mut self, voice_config: VoiceConfig) -> Self {
        self.voice_config = voice_config;
        self
    }

    pub fn state(&self) -> &DirectorState {
        &self.state
    }

    /// Run one generation cycle.
    pub fn run_cycle(&self, ctx: &ExecutionContext) -> Result<Block, GenerationError> {
        let _running = self.state.enter();
        let id = BlockId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.monitor
            .publish_agent_status(AgentId::Director, AgentState::Busy, format!("Preparing block {}", id));

        let recent = ctx.timeline.recent_scripts(ctx.context_tail);
        let mail = self.mail.get_next();
        if let Some(m) = &mail {
            info!(block = %id, mail = %m.id, "weaving listener mail into block");
        }

        let mut block = Block::new(id, mail.as_ref().map(|m| m.id));
        if let Err(e) = block.start().and_then(|()| ctx.timeline.append(block.clone())) {
            error!(block = %id, "cannot record block in timeline: {}", e);
        }

        match self.generate(id, recent, mail.as_ref()) {
            Ok(content) => {
                if let Err(e) = block.complete(content) {
                    error!(block = %id, "{}", e);
                }
                self.record(ctx, &block);
                self.monitor
                    .publish_agent_status(AgentId::Director, AgentState::Ready, format!("Block {} ready", id));
                info!(block = %id, "block ready");
                Ok(block)
            }
            Err((stage, source)) => {
                if let Err(e) = block.fail(format!("{} stage failed: {}", stage, source)) {
                    error!(block = %id, "{}", e);
                }
                self.record(ctx, &block);
                self.monitor.publish_agent_status(
                    AgentId::Director,
                    AgentState::Error,
                    format!("Block {} failed at {} stage", id, stage),
                );
                warn!(block = %id, stage = %stage, "block failed: {}", source);
                Err(GenerationError { stage, block, source })
            }
        }
    }

    fn record(&self, ctx: &ExecutionContext, block: &Block) {
        if let Err(e) = ctx.timeline.replace(block.clone()) {
            // History was cleared while the block was still generating.
            debug!(block = %block.id, "block not recorded: {}", e);
        }
    }

    fn generate(&self, id: BlockId, recent_scripts: Vec<String>, mail: Option<&MailItem>) -> StageResult<BlockContent> {
        let request = ScriptRequest {
            block_id: id,
            recent_scripts,
            mail: mail.cloned(),
        };

        let writing = match mail {
            Some(m) => format!("Writing block {} for {}", id, m.id),
            None => format!("Writing block {}", id),
        };
        self.monitor
            .publish_agent_status(AgentId::Writer, AgentState::Busy, writing);
        let details = mail.map(|m| format!("mail: {}", preview(&m.content, 40)));
        let script = self.monitor.track(ApiService::Ai, "Generate script", details, || {
            let script = self.script.generate(&request)?;
            if script.text.trim().is_empty() {
                return Err(ProviderError::malformed("script provider returned empty text"));
            }
            Ok(script)
        });
        let script = match script {
            Ok(script) => {
                self.monitor.publish_agent_status(
                    AgentId::Writer,
                    AgentState::Ready,
                    format!("Script ready ({} chars)", script.text.chars().count()),
                );
                script
            }
            Err(e) => {
                self.monitor
                    .publish_agent_status(AgentId::Writer, AgentState::Error, e.to_string());
                return Err((Stage::Script, e));
            }
        };

        let music_query = match (&script.music, &self.music) {
            (Some(query), Some(_)) => Some(query),
            (Some(query), None) => {
                debug!(block = %id, query = %query.query, "script asked for music but no music provider is configured");
                None
            }
            (None, _) => None,
        };

        // Voice and music have no data dependency; run them side by side.
        let (voice, music) = thread::scope(|scope| {
            let music_job = music_query.map(|query| scope.spawn(move || self.find_music(query)));
            let voice = self.speak(&script.text);
            let music = match music_job {
                Some(job) => job
                    .join()
                    .unwrap_or_else(|_| Err((Stage::Music, ProviderError::other("music lookup panicked"))))
                    .map(Some),
                None => Ok(None),
            };
            (voice, music)
        });

        let voice_track = voice?;
        let (music_track, lyrics) = match music? {
            Some((track, lyrics)) => (Some(track), lyrics),
            None => (None, None),
        };

        Ok(BlockContent {
            script: script.text,
            voice_track,
            music_track,
            lyrics,
        })
    }

    fn speak(&self, text: &str) -> StageResult<AudioHandle> {
        self.monitor
            .publish_agent_status(AgentId::Tts, AgentState::Busy, format!("Synthesizing with voice '{}'", self.voice_config.voice));
        let details = Some(format!("{} chars", text.chars().count()));
        match self.monitor.track(ApiService::Tts, "Synthesize speech", details, || {
            self.voice.synthesize(text, &self.voice_config)
        }) {
            Ok(handle) => {
                self.monitor
                    .publish_agent_status(AgentId::Tts, AgentState::Ready, "Voice track ready");
                Ok(handle)
            }
            Err(e) => {
                self.monitor
                    .publish_agent_status(AgentId::Tts, AgentState::Error, e.to_string());
                Err((Stage::Voice, e))
            }
        }
    }

    fn find_music(&self, query: &MusicQuery) -> StageResult<(Track, Option<String>)> {
        let Some(provider) = &self.music else {
            return Err((Stage::Music, ProviderError::other("no music provider")));
        };
        let selection = self
            .monitor
            .track(ApiService::Music, "Find track", Some(query.query.clone()), || provider.lookup(query))
            .map_err(|e| (Stage::Music, e))?;

        let lyrics = match selection.lyrics {
            Some(lyrics) => Some(lyrics),
            None => self
                .monitor
                .track(ApiService::Lyrics, "Fetch lyrics", Some(selection.track.display_name()), || {
                    provider.lyrics(&selection.track)
                })
                .map_err(|e| (Stage::Lyrics, e))?,
        };
        Ok((selection.track, lyrics))
    }
}

/// First `max` characters of `text`, with an ellipsis when cut.
fn preview(text: &str, max: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}
