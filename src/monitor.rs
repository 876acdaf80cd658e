//! Session-wide event bus for agent status and API-call telemetry.
//!
//! Two event families fan out through the bus:
//!
//! - **Agent status**: last-write-wins `(state, message)` per agent
//!   (`WRITER`, `TTS`, `DIRECTOR`, `MIXER`).
//! - **API calls**: one logical call per [`ApiCallId`]; a `pending` event is
//!   followed by exactly one terminal `success`/`error` event with the same id.
//!
//! Delivery is synchronous: every subscriber has seen the event before the
//! publishing call returns. A failing subscriber is logged and skipped, it
//! never reaches the pipeline. The bus does not expire anything; display
//! expiry belongs to subscribers such as [`ApiCallBoard`].

use crate::listeners::{Listeners, Subscription};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

// ── Agent status ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentId {
    Writer,
    Tts,
    Director,
    Mixer,
}

impl AgentId {
    pub const ALL: [AgentId; 4] = [AgentId::Writer, AgentId::Tts, AgentId::Director, AgentId::Mixer];
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentId::Writer => write!(f, "WRITER"),
            AgentId::Tts => write!(f, "TTS"),
            AgentId::Director => write!(f, "DIRECTOR"),
            AgentId::Mixer => write!(f, "MIXER"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    Idle,
    Busy,
    Ready,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub agent: AgentId,
    pub state: AgentState,
    pub message: String,
    pub updated_at: DateTime<Local>,
}

impl AgentStatus {
    fn idle(agent: AgentId) -> Self {
        AgentStatus {
            agent,
            state: AgentState::Idle,
            message: String::new(),
            updated_at: Local::now(),
        }
    }
}

// ── API calls ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ApiService {
    #[serde(rename = "AI")]
    Ai,
    #[serde(rename = "TTS")]
    Tts,
    Music,
    Lyrics,
    Proxy,
}

impl fmt::Display for ApiService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiService::Ai => write!(f, "AI"),
            ApiService::Tts => write!(f, "TTS"),
            ApiService::Music => write!(f, "Music"),
            ApiService::Lyrics => write!(f, "Lyrics"),
            ApiService::Proxy => write!(f, "Proxy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiCallStatus {
    Pending,
    Success,
    Error,
}

impl ApiCallStatus {
    pub fn is_terminal(self) -> bool {
        self != ApiCallStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ApiCallId(pub u64);

#[derive(Debug, Clone, Serialize)]
pub struct ApiCallEvent {
    pub id: ApiCallId,
    pub service: ApiService,
    pub action: String,
    pub details: Option<String>,
    pub status: ApiCallStatus,
    /// Set on terminal events.
    pub duration: Option<Duration>,
}

impl ApiCallEvent {
    /// `"850ms"` below one second, `"1.2s"` above.
    pub fn duration_display(&self) -> Option<String> {
        self.duration.map(|d| {
            let ms = d.as_millis();
            if ms > 1000 {
                format!("{:.1}s", d.as_secs_f64())
            } else {
                format!("{}ms", ms)
            }
        })
    }
}

// ── Bus ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    AgentStatus,
    ApiCall,
}

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    AgentStatus(AgentStatus),
    ApiCall(ApiCallEvent),
}

pub struct Monitor {
    statuses: Mutex<HashMap<AgentId, AgentStatus>>,
    agent_listeners: Listeners<AgentStatus>,
    api_listeners: Listeners<ApiCallEvent>,
    next_call: AtomicU64,
    log: Mutex<AgentLog>,
}

impl Monitor {
    pub fn new() -> Self {
        Monitor {
            statuses: Mutex::new(HashMap::new()),
            agent_listeners: Listeners::new("agent-status"),
            api_listeners: Listeners::new("api-call"),
            next_call: AtomicU64::new(1),
            log: Mutex::new(AgentLog::new()),
        }
    }

    fn statuses(&self) -> MutexGuard<'_, HashMap<AgentId, AgentStatus>> {
        self.statuses.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self) -> MutexGuard<'_, AgentLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite the last-known status of `agent` and broadcast it.
    pub fn publish_agent_status(&self, agent: AgentId, state: AgentState, message: impl Into<String>) {
        let status = AgentStatus {
            agent,
            state,
            message: message.into(),
            updated_at: Local::now(),
        };
        debug!(agent = %agent, state = ?state, message = %status.message, "agent status");
        self.statuses().insert(agent, status.clone());

        let level = if state == AgentState::Error { "error" } else { "info" };
        if !status.message.is_empty() {
            self.log().push(level, format!("[{}] {}", agent, status.message));
        }

        self.agent_listeners.emit(&status);
    }

    pub fn publish_api_call(&self, event: ApiCallEvent) {
        if event.status == ApiCallStatus::Error {
            warn!(service = %event.service, action = %event.action, details = ?event.details, "api call failed");
        }
        self.api_listeners.emit(&event);
    }

    pub fn agent_status(&self, agent: AgentId) -> AgentStatus {
        self.statuses()
            .get(&agent)
            .cloned()
            .unwrap_or_else(|| AgentStatus::idle(agent))
    }

    /// Last-known status of every agent, in [`AgentId::ALL`] order.
    pub fn agent_statuses(&self) -> Vec<AgentStatus> {
        let statuses = self.statuses();
        AgentId::ALL
            .iter()
            .map(|a| statuses.get(a).cloned().unwrap_or_else(|| AgentStatus::idle(*a)))
            .collect()
    }

    pub fn on_agent_status<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&AgentStatus) + Send + Sync + 'static,
    {
        self.agent_listeners.add(handler)
    }

    pub fn on_api_call<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ApiCallEvent) + Send + Sync + 'static,
    {
        self.api_listeners.add(handler)
    }

    /// Subscribe to one event family through a single handler type.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&MonitorEvent) + Send + Sync + 'static,
    {
        match kind {
            EventKind::AgentStatus => self
                .agent_listeners
                .add(move |s: &AgentStatus| handler(&MonitorEvent::AgentStatus(s.clone()))),
            EventKind::ApiCall => self
                .api_listeners
                .add(move |e: &ApiCallEvent| handler(&MonitorEvent::ApiCall(e.clone()))),
        }
    }

    /// Publish a `pending` event and return a guard that publishes the
    /// terminal one.
    pub fn begin_call(&self, service: ApiService, action: impl Into<String>, details: Option<String>) -> ApiCall<'_> {
        let event = ApiCallEvent {
            id: ApiCallId(self.next_call.fetch_add(1, Ordering::Relaxed)),
            service,
            action: action.into(),
            details,
            status: ApiCallStatus::Pending,
            duration: None,
        };
        self.publish_api_call(event.clone());
        ApiCall {
            monitor: self,
            event,
            started: Instant::now(),
            finished: false,
        }
    }

    /// Run `call`, reporting its lifecycle as API-call events.
    pub fn track<T, E, F>(&self, service: ApiService, action: &str, details: Option<String>, call: F) -> Result<T, E>
    where
        E: fmt::Display,
        F: FnOnce() -> Result<T, E>,
    {
        let guard = self.begin_call(service, action, details);
        match call() {
            Ok(value) => {
                guard.succeed();
                Ok(value)
            }
            Err(e) => {
                guard.fail(e.to_string());
                Err(e)
            }
        }
    }

    /// Log lines produced by agent status changes, starting at `since_index`.
    pub fn logs(&self, since_index: usize) -> Vec<LogEntry> {
        self.log().get(since_index)
    }

    pub fn clear_logs(&self) {
        self.log().clear();
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

/// In-flight API call. Publishes the terminal event exactly once; dropping
/// an unfinished call reports it as an error.
pub struct ApiCall<'a> {
    monitor: &'a Monitor,
    event: ApiCallEvent,
    started: Instant,
    finished: bool,
}

impl ApiCall<'_> {
    pub fn id(&self) -> ApiCallId {
        self.event.id
    }

    fn finish(&mut self, status: ApiCallStatus, details: Option<String>) {
        if self.finished {
            return;
        }
        self.finished = true;
        let mut event = self.event.clone();
        event.status = status;
        event.duration = Some(self.started.elapsed());
        if details.is_some() {
            event.details = details;
        }
        self.monitor.publish_api_call(event);
    }

    pub fn succeed(mut self) {
        self.finish(ApiCallStatus::Success, None);
    }

    pub fn fail(mut self, reason: impl Into<String>) {
        self.finish(ApiCallStatus::Error, Some(reason.into()));
    }
}

impl Drop for ApiCall<'_> {
    fn drop(&mut self) {
        self.finish(ApiCallStatus::Error, Some("call abandoned".to_string()));
    }
}

// ── Agent log ───────────────────────────────────────────────────────────────

const LOG_BUFFER_MAX: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub message: String,
}

pub struct AgentLog {
    entries: VecDeque<LogEntry>,
}

impl AgentLog {
    pub fn new() -> Self {
        AgentLog {
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, level: &str, message: String) {
        let timestamp = Local::now().format("%H:%M:%S").to_string();
        self.entries.push_back(LogEntry {
            timestamp,
            level: level.to_string(),
            message,
        });
        while self.entries.len() > LOG_BUFFER_MAX {
            self.entries.pop_front();
        }
    }

    pub fn get(&self, since_index: usize) -> Vec<LogEntry> {
        self.entries.iter().skip(since_index).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for AgentLog {
    fn default() -> Self {
        Self::new()
    }
}

// ── API-call board ──────────────────────────────────────────────────────────

const BOARD_CAPACITY: usize = 10;
const BOARD_LINGER: Duration = Duration::from_secs(3);

struct BoardEntry {
    event: ApiCallEvent,
    finished_at: Option<Instant>,
}

/// Subscriber-side view of recent API calls: at most ten entries, updated
/// in place by id, terminal entries dropped three seconds after finishing.
pub struct ApiCallBoard {
    entries: Vec<BoardEntry>,
}

impl ApiCallBoard {
    pub fn new() -> Self {
        ApiCallBoard {
            entries: Vec::new(),
        }
    }

    /// Create a board fed by `monitor`.
    pub fn attach(monitor: &Monitor) -> (Arc<Mutex<ApiCallBoard>>, Subscription) {
        let board = Arc::new(Mutex::new(ApiCallBoard::new()));
        let feed = board.clone();
        let sub = monitor.on_api_call(move |event| {
            feed.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .apply(event, Instant::now());
        });
        (board, sub)
    }

    pub fn apply(&mut self, event: &ApiCallEvent, now: Instant) {
        let finished_at = event.status.is_terminal().then_some(now);
        if let Some(entry) = self.entries.iter_mut().find(|e| e.event.id == event.id) {
            entry.event = event.clone();
            entry.finished_at = finished_at;
            return;
        }
        if self.entries.len() >= BOARD_CAPACITY {
            let excess = self.entries.len() + 1 - BOARD_CAPACITY;
            self.entries.drain(..excess);
        }
        self.entries.push(BoardEntry {
            event: event.clone(),
            finished_at,
        });
    }

    /// Prune expired entries and return what is still on display.
    pub fn visible(&mut self, now: Instant) -> Vec<ApiCallEvent> {
        self.entries.retain(|e| match e.finished_at {
            Some(t) => now.saturating_duration_since(t) < BOARD_LINGER,
            None => true,
        });
        self.entries.iter().map(|e| e.event.clone()).collect()
    }
}

impl Default for ApiCallBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tracing_test::traced_test;

    #[test]
    fn agent_status_is_last_write_wins() {
        let m = Monitor::new();
        m.publish_agent_status(AgentId::Writer, AgentState::Busy, "writing");
        m.publish_agent_status(AgentId::Writer, AgentState::Ready, "done");
        let s = m.agent_status(AgentId::Writer);
        assert_eq!(s.state, AgentState::Ready);
        assert_eq!(s.message, "done");
    }

    #[test]
    fn unseen_agents_report_idle() {
        let m = Monitor::new();
        let all = m.agent_statuses();
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|s| s.state == AgentState::Idle));
    }

    #[test]
    fn subscribers_see_event_before_publish_returns() {
        let m = Monitor::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let _sub = m.subscribe(EventKind::AgentStatus, move |e| {
            if let MonitorEvent::AgentStatus(st) = e {
                assert_eq!(st.agent, AgentId::Tts);
                s.fetch_add(1, Ordering::SeqCst);
            }
        });
        m.publish_agent_status(AgentId::Tts, AgentState::Busy, "speaking");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn event_kinds_are_separate() {
        let m = Monitor::new();
        let api = Arc::new(AtomicUsize::new(0));
        let a = api.clone();
        let _sub = m.subscribe(EventKind::ApiCall, move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
        m.publish_agent_status(AgentId::Mixer, AgentState::Busy, "");
        assert_eq!(api.load(Ordering::SeqCst), 0);
        m.track::<_, String, _>(ApiService::Ai, "Generate", None, || Ok(1)).unwrap();
        assert_eq!(api.load(Ordering::SeqCst), 2);
    }

    #[test]
    #[traced_test]
    fn failing_subscriber_does_not_reach_publisher() {
        let m = Monitor::new();
        let _bad = m.on_agent_status(|_| panic!("subscriber bug"));
        m.publish_agent_status(AgentId::Director, AgentState::Busy, "planning");
        assert_eq!(m.agent_status(AgentId::Director).state, AgentState::Busy);
        assert!(logs_contain("subscriber panicked"));
    }

    #[test]
    fn track_emits_pending_then_terminal_with_same_id() {
        let m = Monitor::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = events.clone();
        let _sub = m.on_api_call(move |ev| e.lock().unwrap().push(ev.clone()));

        let result: Result<(), String> = m.track(ApiService::Tts, "Synthesize", None, || Err("quota".to_string()));
        assert!(result.is_err());

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, ApiCallStatus::Pending);
        assert_eq!(events[1].status, ApiCallStatus::Error);
        assert_eq!(events[0].id, events[1].id);
        assert_eq!(events[1].details.as_deref(), Some("quota"));
        assert!(events[1].duration.is_some());
    }

    #[test]
    fn dropped_call_reports_error_once() {
        let m = Monitor::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = events.clone();
        let _sub = m.on_api_call(move |ev| e.lock().unwrap().push(ev.status));
        {
            let _call = m.begin_call(ApiService::Music, "Find track", None);
        }
        let call = m.begin_call(ApiService::Lyrics, "Fetch lyrics", None);
        call.succeed();
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                ApiCallStatus::Pending,
                ApiCallStatus::Error,
                ApiCallStatus::Pending,
                ApiCallStatus::Success
            ]
        );
    }

    #[test]
    fn status_changes_are_logged() {
        let m = Monitor::new();
        m.publish_agent_status(AgentId::Writer, AgentState::Busy, "Writing script");
        m.publish_agent_status(AgentId::Tts, AgentState::Error, "quota exceeded");
        let logs = m.logs(0);
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "[WRITER] Writing script");
        assert_eq!(logs[1].level, "error");
        assert_eq!(m.logs(1).len(), 1);
    }

    #[test]
    fn agent_log_is_bounded() {
        let mut log = AgentLog::new();
        for i in 0..(LOG_BUFFER_MAX + 20) {
            log.push("info", format!("line {}", i));
        }
        assert_eq!(log.len(), LOG_BUFFER_MAX);
        assert_eq!(log.get(0)[0].message, "line 20");
    }

    fn event(id: u64, status: ApiCallStatus) -> ApiCallEvent {
        ApiCallEvent {
            id: ApiCallId(id),
            service: ApiService::Ai,
            action: "Generate".to_string(),
            details: None,
            status,
            duration: None,
        }
    }

    #[test]
    fn board_updates_in_place_and_expires_terminal_entries() {
        let mut board = ApiCallBoard::new();
        let t0 = Instant::now();
        board.apply(&event(1, ApiCallStatus::Pending), t0);
        board.apply(&event(2, ApiCallStatus::Pending), t0);
        board.apply(&event(1, ApiCallStatus::Success), t0);

        let visible = board.visible(t0 + Duration::from_secs(1));
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[0].status, ApiCallStatus::Success);

        let visible = board.visible(t0 + Duration::from_secs(4));
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, ApiCallId(2));
    }

    #[test]
    fn board_keeps_last_ten() {
        let mut board = ApiCallBoard::new();
        let now = Instant::now();
        for id in 0..15 {
            board.apply(&event(id, ApiCallStatus::Pending), now);
        }
        let visible = board.visible(now);
        assert_eq!(visible.len(), 10);
        assert_eq!(visible[0].id, ApiCallId(5));
    }

    #[test]
    fn board_attached_to_monitor() {
        let m = Monitor::new();
        let (board, _sub) = ApiCallBoard::attach(&m);
        m.begin_call(ApiService::Proxy, "Relay", None).succeed();
        let visible = board.lock().unwrap().visible(Instant::now());
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].status, ApiCallStatus::Success);
    }

    #[test]
    fn duration_display_switches_units() {
        let mut e = event(1, ApiCallStatus::Success);
        e.duration = Some(Duration::from_millis(850));
        assert_eq!(e.duration_display().as_deref(), Some("850ms"));
        e.duration = Some(Duration::from_millis(1234));
        assert_eq!(e.duration_display().as_deref(), Some("1.2s"));
    }
}
