//! Speaker thread: owns the audio device and plays rendered blocks on command.
//!
//! rodio's output stream is not `Send`, so the [`Player`] is created lazily on
//! the speaker thread and never leaves it. Callers hold a [`SpeakerHandle`].
//! The end of a block is noticed by polling the sink between commands.

use crate::block::BlockId;
use crate::mixer::PlayableStream;
use crate::player::Player;
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const POLL: Duration = Duration::from_millis(50);

pub enum SpeakerCmd {
    Play { block: BlockId, stream: PlayableStream },
    Stop,
    Pause,
    Resume,
    Shutdown,
}

/// What the speaker reports back, on the speaker thread.
#[derive(Debug, Clone, PartialEq)]
pub enum SpeakerEvent {
    Playing(BlockId),
    BlockFinished(BlockId),
    /// No output device could be opened; carries the
    /// [`OutputError`](crate::error::OutputError) text.
    PlayError(String),
    Stopped,
    Paused,
    Resumed,
}

/// Cheap to clone. Sends are fire-and-forget; once the speaker thread has
/// exited they are dropped silently.
#[derive(Clone)]
pub struct SpeakerHandle {
    tx: Sender<SpeakerCmd>,
}

impl SpeakerHandle {
    fn send(&self, cmd: SpeakerCmd) {
        if self.tx.send(cmd).is_err() {
            debug!("speaker thread is gone");
        }
    }

    pub fn play(&self, block: BlockId, stream: PlayableStream) {
        self.send(SpeakerCmd::Play { block, stream });
    }

    pub fn stop(&self) {
        self.send(SpeakerCmd::Stop);
    }

    pub fn pause(&self) {
        self.send(SpeakerCmd::Pause);
    }

    pub fn resume(&self) {
        self.send(SpeakerCmd::Resume);
    }

    pub fn shutdown(&self) {
        self.send(SpeakerCmd::Shutdown);
    }
}

/// Start the speaker thread. `on_event` runs on that thread; the `run`
/// command uses `BlockFinished` to cue the next block.
pub fn spawn_speaker<F>(on_event: F) -> io::Result<SpeakerHandle>
where
    F: Fn(SpeakerEvent) + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("speaker".into())
        .spawn(move || SpeakerThread::new(on_event).run(rx))?;
    Ok(SpeakerHandle { tx })
}

struct SpeakerThread<F> {
    player: Option<Player>,
    on_air: Option<BlockId>,
    on_event: F,
}

impl<F: Fn(SpeakerEvent)> SpeakerThread<F> {
    fn new(on_event: F) -> Self {
        SpeakerThread {
            player: None,
            on_air: None,
            on_event,
        }
    }

    fn run(mut self, rx: Receiver<SpeakerCmd>) {
        loop {
            match rx.recv_timeout(POLL) {
                Ok(SpeakerCmd::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(cmd) => self.handle(cmd),
                Err(RecvTimeoutError::Timeout) => self.check_finished(),
            }
        }
        if let Some(player) = &self.player {
            player.stop();
        }
    }

    fn handle(&mut self, cmd: SpeakerCmd) {
        match cmd {
            SpeakerCmd::Play { block, stream } => self.play(block, stream),
            SpeakerCmd::Stop => {
                if let Some(player) = &self.player {
                    player.stop();
                }
                self.on_air = None;
                (self.on_event)(SpeakerEvent::Stopped);
            }
            SpeakerCmd::Pause => {
                if let Some(player) = &self.player {
                    player.pause();
                }
                (self.on_event)(SpeakerEvent::Paused);
            }
            SpeakerCmd::Resume => {
                if let Some(player) = &self.player {
                    player.resume();
                }
                (self.on_event)(SpeakerEvent::Resumed);
            }
            SpeakerCmd::Shutdown => {}
        }
    }

    fn play(&mut self, block: BlockId, stream: PlayableStream) {
        if self.player.is_none() {
            match Player::new() {
                Ok(player) => self.player = Some(player),
                Err(e) => {
                    warn!("no audio output: {}", e);
                    (self.on_event)(SpeakerEvent::PlayError(e.to_string()));
                    return;
                }
            }
        }
        if let Some(player) = &self.player {
            player.play(stream);
            self.on_air = Some(block);
            debug!(block = %block, "speaker playing");
            (self.on_event)(SpeakerEvent::Playing(block));
        }
    }

    fn check_finished(&mut self) {
        let drained = self.player.as_ref().is_some_and(Player::is_empty);
        if drained {
            if let Some(block) = self.on_air.take() {
                (self.on_event)(SpeakerEvent::BlockFinished(block));
            }
        }
    }
}
