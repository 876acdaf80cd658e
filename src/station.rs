//! One broadcast session with every service wired together.
//!
//! The Monitor and Mail Queue are plain objects owned here, so tests can run
//! any number of independent stations side by side.

use crate::block::{BlockId, BlockStatus, Timeline};
use crate::config::StationConfig;
use crate::director::Director;
use crate::error::PlaybackError;
use crate::library::MusicLibrary;
use crate::mail_queue::{MailItem, MailQueue, MailStatus};
use crate::mixer::{AudioMixer, RodioMixer};
use crate::monitor::{AgentId, AgentState, AgentStatus, Monitor};
use crate::offline::{SilentVoice, TemplateWriter};
use crate::playback::{Cue, PlaybackController};
use crate::preload::{Lookahead, PipelineState, PreloadManager};
use crate::provider::{MusicProvider, ScriptProvider, VoiceProvider};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

/// The external services a station generates with.
#[derive(Clone)]
pub struct Providers {
    pub script: Arc<dyn ScriptProvider>,
    pub voice: Arc<dyn VoiceProvider>,
    pub music: Option<Arc<dyn MusicProvider>>,
}

impl Providers {
    /// Template writer, silent voice and, when `music_dir` scans, the local
    /// music library.
    pub fn offline(config: &StationConfig) -> Self {
        let music = config.music_dir.as_deref().and_then(|dir| match MusicLibrary::scan(dir) {
            Ok(library) if !library.is_empty() => Some(Arc::new(library) as Arc<dyn MusicProvider>),
            Ok(_) => {
                warn!(dir = %dir.display(), "music library is empty");
                None
            }
            Err(e) => {
                warn!(dir = %dir.display(), "cannot scan music library: {}", e);
                None
            }
        });
        Providers {
            script: Arc::new(TemplateWriter::new(config.station_name.clone(), config.music_every)),
            voice: Arc::new(SilentVoice),
            music,
        }
    }
}

/// Snapshot for a front end.
#[derive(Debug, Clone, Serialize)]
pub struct StationStatus {
    pub station_name: String,
    pub connected: bool,
    pub playing: Option<BlockId>,
    pub waiting: bool,
    pub pipeline: PipelineState,
    pub preload_block_count: usize,
    pub consecutive_failures: u32,
    pub timeline_len: usize,
    pub blocks_ahead: usize,
    pub failed_blocks: usize,
    pub mail: MailStatus,
    pub agents: Vec<AgentStatus>,
}

pub struct Station<M: AudioMixer = RodioMixer> {
    config: Mutex<StationConfig>,
    monitor: Arc<Monitor>,
    mail: Arc<MailQueue>,
    timeline: Timeline,
    preload: PreloadManager,
    playback: Mutex<PlaybackController<M>>,
    connected: AtomicBool,
}

impl Station<RodioMixer> {
    pub fn new(config: StationConfig, providers: Providers) -> Self {
        Station::with_mixer(config, providers, RodioMixer::new())
    }
}

impl<M: AudioMixer> Station<M> {
    pub fn with_mixer(config: StationConfig, providers: Providers, mixer: M) -> Self {
        let monitor = Arc::new(Monitor::new());
        let mail = Arc::new(MailQueue::new());
        let timeline = Timeline::new();

        let mut director = Director::new(providers.script, providers.voice, mail.clone(), monitor.clone())
            .with_voice_config(config.voice.clone());
        if let Some(music) = providers.music {
            director = director.with_music(music);
        }
        let preload = PreloadManager::new(Arc::new(director), timeline.clone(), monitor.clone(), config.preload());
        let playback = PlaybackController::new(
            timeline.clone(),
            preload.clone(),
            monitor.clone(),
            mixer,
            config.mix.clone(),
        );

        Station {
            config: Mutex::new(config),
            monitor,
            mail,
            timeline,
            preload,
            playback: Mutex::new(playback),
            connected: AtomicBool::new(false),
        }
    }

    fn playback(&self) -> MutexGuard<'_, PlaybackController<M>> {
        self.playback.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn config_guard(&self) -> MutexGuard<'_, StationConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn mail(&self) -> &Arc<MailQueue> {
        &self.mail
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn preload(&self) -> &PreloadManager {
        &self.preload
    }

    pub fn config(&self) -> StationConfig {
        self.config_guard().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Go on air: start filling the lookahead. After `disconnect` the
    /// session is over and this reports `Stopped`.
    pub fn connect(&self) -> Lookahead {
        let position = self.playback().current();
        let outcome = self.preload.ensure_lookahead(position);
        if outcome != Lookahead::Stopped && !self.connected.swap(true, Ordering::AcqRel) {
            info!(station = %self.config_guard().station_name, "on air");
            self.monitor
                .publish_agent_status(AgentId::Director, AgentState::Idle, "On air");
        }
        outcome
    }

    /// Stop scheduling new cycles. An in-flight cycle finishes on its own
    /// before this returns.
    pub fn disconnect(&self) {
        let was_connected = self.connected.swap(false, Ordering::AcqRel);
        self.preload.shutdown();
        if was_connected {
            info!("off air");
            self.monitor
                .publish_agent_status(AgentId::Director, AgentState::Idle, "Off air");
        }
    }

    pub fn submit_mail(&self, content: &str) -> Option<MailItem> {
        self.mail.push(content)
    }

    pub fn advance(&self) -> Result<Cue<M::Stream>, PlaybackError> {
        self.playback().advance()
    }

    pub fn advance_wait(&self, timeout: Duration) -> Result<Cue<M::Stream>, PlaybackError> {
        self.playback().advance_wait(timeout)
    }

    pub fn jump_to_block(&self, id: BlockId) -> Result<Cue<M::Stream>, PlaybackError> {
        self.playback().jump_to_block(id)
    }

    pub fn clear_history(&self) -> usize {
        self.playback().clear_history()
    }

    /// Change the lookahead at runtime. Values outside 1–10 are clamped.
    pub fn set_preload_block_count(&self, n: usize) -> usize {
        let applied = self.preload.set_preload_block_count(n);
        self.config_guard().preload_block_count = applied;
        applied
    }

    pub fn resume(&self) -> Lookahead {
        self.preload.resume()
    }

    pub fn status(&self) -> StationStatus {
        let (playing, waiting) = {
            let playback = self.playback();
            (playback.current(), playback.is_waiting())
        };
        StationStatus {
            station_name: self.config_guard().station_name.clone(),
            connected: self.is_connected(),
            playing,
            waiting,
            pipeline: self.preload.state(),
            preload_block_count: self.preload.preload_block_count(),
            consecutive_failures: self.preload.consecutive_failures(),
            timeline_len: self.timeline.len(),
            blocks_ahead: self.timeline.count_ahead(playing),
            failed_blocks: self.timeline.count_with_status(BlockStatus::Failed),
            mail: self.mail.get_status(),
            agents: self.monitor.agent_statuses(),
        }
    }
}

impl<M: AudioMixer> Drop for Station<M> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
