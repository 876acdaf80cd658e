//! Keeps generated blocks ahead of the listener.
//!
//! The manager owns the pipeline's single generation slot. Whenever the
//! playback position changes (or a cycle finishes) it counts GENERATING and
//! READY blocks after the position; if that is below `preload_block_count`
//! and the slot is free, it starts exactly one Director cycle on a worker
//! thread. Slow providers therefore cap how fast blocks are appended.
//!
//! A failed cycle leaves its FAILED block in the timeline and the next
//! evaluation simply tries again. After `max_consecutive_failures` failures
//! in a row the pipeline halts until [`PreloadManager::resume`] or a
//! preload-count change.

use crate::block::{BlockId, Timeline};
use crate::director::{Director, ExecutionContext};
use crate::monitor::{AgentId, AgentState, Monitor};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const MIN_PRELOAD_BLOCKS: usize = 1;
pub const MAX_PRELOAD_BLOCKS: usize = 10;
pub const DEFAULT_PRELOAD_BLOCKS: usize = 3;
pub const DEFAULT_MAX_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloadConfig {
    pub preload_block_count: usize,
    pub max_consecutive_failures: u32,
    pub context_tail: usize,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        PreloadConfig {
            preload_block_count: DEFAULT_PRELOAD_BLOCKS,
            max_consecutive_failures: DEFAULT_MAX_FAILURES,
            context_tail: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Generating,
    /// Consecutive-failure cap reached; no cycles until resumed.
    Halted,
    /// Session torn down.
    Stopped,
}

/// What one lookahead evaluation decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookahead {
    Started,
    Satisfied,
    InFlight,
    Halted,
    Stopped,
    /// The worker thread could not be spawned; try again later.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Idle,
    Running,
}

struct PreloadState {
    target: usize,
    max_failures: u32,
    slot: Slot,
    consecutive_failures: u32,
    halted: bool,
    /// Bumped whenever a halt is cleared.
    halt_epoch: u64,
    stopped: bool,
    position: Option<BlockId>,
    worker: Option<JoinHandle<()>>,
    cycles_started: u64,
}

struct Inner {
    director: Arc<Director>,
    timeline: Timeline,
    monitor: Arc<Monitor>,
    context_tail: usize,
    state: Mutex<PreloadState>,
    changed: Condvar,
}

/// Cheap clonable handle; clones share one generation slot.
#[derive(Clone)]
pub struct PreloadManager {
    inner: Arc<Inner>,
}

fn clamp_preload(n: usize) -> usize {
    let clamped = n.clamp(MIN_PRELOAD_BLOCKS, MAX_PRELOAD_BLOCKS);
    if clamped != n {
        warn!(requested = n, using = clamped, "preload_block_count out of range");
    }
    clamped
}

impl PreloadManager {
    pub fn new(director: Arc<Director>, timeline: Timeline, monitor: Arc<Monitor>, config: PreloadConfig) -> Self {
        PreloadManager {
            inner: Arc::new(Inner {
                director,
                timeline,
                monitor,
                context_tail: config.context_tail,
                state: Mutex::new(PreloadState {
                    target: clamp_preload(config.preload_block_count),
                    max_failures: config.max_consecutive_failures.max(1),
                    slot: Slot::Idle,
                    consecutive_failures: 0,
                    halted: false,
                    halt_epoch: 0,
                    stopped: false,
                    position: None,
                    worker: None,
                    cycles_started: 0,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PreloadState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-evaluate the lookahead for a playback position (`None` before
    /// anything has played). Starts at most one cycle.
    pub fn ensure_lookahead(&self, position: Option<BlockId>) -> Lookahead {
        let mut state = self.lock();
        state.position = position;
        self.try_start(&mut state)
    }

    fn try_start(&self, state: &mut PreloadState) -> Lookahead {
        if state.stopped {
            return Lookahead::Stopped;
        }
        if state.halted {
            return Lookahead::Halted;
        }
        if state.slot == Slot::Running {
            return Lookahead::InFlight;
        }
        let ahead = self.inner.timeline.count_ahead(state.position);
        if ahead >= state.target {
            return Lookahead::Satisfied;
        }

        let ctx = ExecutionContext::new(self.inner.timeline.clone()).with_context_tail(self.inner.context_tail);
        let worker = self.clone();
        let spawned = thread::Builder::new()
            .name("director-cycle".into())
            .spawn(move || worker.run_cycle(ctx));
        match spawned {
            Ok(handle) => {
                state.slot = Slot::Running;
                state.cycles_started += 1;
                state.worker = Some(handle);
                debug!(ahead, target = state.target, "director cycle started");
                Lookahead::Started
            }
            Err(e) => {
                error!("cannot spawn director cycle: {}", e);
                Lookahead::Deferred
            }
        }
    }

    fn run_cycle(&self, ctx: ExecutionContext) {
        let succeeded = self.inner.director.run_cycle(&ctx).is_ok();

        let mut state = self.lock();
        if state.stopped && succeeded {
            debug!("cycle finished after shutdown; block will not be played");
        }
        if succeeded {
            state.consecutive_failures = 0;
        } else {
            state.consecutive_failures += 1;
        }
        if !succeeded && !state.halted && state.consecutive_failures >= state.max_failures {
            // The slot stays Running until the halt is announced, so nobody
            // observes a halted pipeline without its status message.
            let failures = state.consecutive_failures;
            let epoch = state.halt_epoch;
            drop(state);

            error!(failures, "pipeline halted");
            self.inner.monitor.publish_agent_status(
                AgentId::Director,
                AgentState::Error,
                format!("Pipeline halted after {} consecutive failures", failures),
            );

            state = self.lock();
            if state.halt_epoch == epoch {
                state.halted = true;
            } else {
                // Resumed or resized while the halt was being announced.
                drop(state);
                self.announce_resume();
                state = self.lock();
            }
        }
        state.slot = Slot::Idle;
        self.try_start(&mut state);
        self.inner.changed.notify_all();
    }

    /// Change the lookahead size. Raising it starts catch-up generation
    /// right away; lowering it never evicts READY blocks. Also clears a
    /// halted pipeline. Returns the value actually applied.
    pub fn set_preload_block_count(&self, n: usize) -> usize {
        let n = clamp_preload(n);
        let mut state = self.lock();
        state.target = n;
        let was_halted = Self::clear_halt(&mut state);
        self.try_start(&mut state);
        self.inner.changed.notify_all();
        drop(state);
        info!(preload_block_count = n, "lookahead resized");
        if was_halted {
            self.announce_resume();
        }
        n
    }

    pub fn preload_block_count(&self) -> usize {
        self.lock().target
    }

    /// Clear a halted pipeline and re-evaluate the lookahead.
    pub fn resume(&self) -> Lookahead {
        let mut state = self.lock();
        let was_halted = Self::clear_halt(&mut state);
        let outcome = self.try_start(&mut state);
        self.inner.changed.notify_all();
        drop(state);
        if was_halted {
            self.announce_resume();
        }
        outcome
    }

    fn clear_halt(state: &mut PreloadState) -> bool {
        let was_halted = state.halted;
        state.halted = false;
        state.halt_epoch += 1;
        state.consecutive_failures = 0;
        was_halted
    }

    fn announce_resume(&self) {
        info!("pipeline resumed");
        self.inner
            .monitor
            .publish_agent_status(AgentId::Director, AgentState::Idle, "Pipeline resumed");
    }

    pub fn state(&self) -> PipelineState {
        let state = self.lock();
        if state.stopped {
            PipelineState::Stopped
        } else if state.halted {
            PipelineState::Halted
        } else if state.slot == Slot::Running {
            PipelineState::Generating
        } else {
            PipelineState::Idle
        }
    }

    pub fn is_halted(&self) -> bool {
        self.lock().halted
    }

    /// True once [`shutdown`](Self::shutdown) has been called.
    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn cycles_started(&self) -> u64 {
        self.lock().cycles_started
    }

    /// Stop scheduling and wait for an in-flight cycle to finish on its own.
    pub fn shutdown(&self) {
        let worker = {
            let mut state = self.lock();
            state.stopped = true;
            self.inner.changed.notify_all();
            state.worker.take()
        };
        if let Some(handle) = worker {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("director cycle panicked during shutdown");
            }
        }
        info!("preload manager stopped");
    }

    /// Wait until no cycle is running and nothing more will be started
    /// without a new trigger. Returns false on timeout.
    pub fn wait_until_settled(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            let settled = state.slot == Slot::Idle
                && (state.stopped
                    || state.halted
                    || self.inner.timeline.count_ahead(state.position) >= state.target);
            if settled {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.inner.changed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}
