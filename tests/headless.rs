//! Headless integration tests for onAir.
//!
//! These drive a whole `Station` with instrumented stub providers: no audio
//! device, no network.

use on_air::block::{BlockId, BlockStatus};
use on_air::config::StationConfig;
use on_air::error::{MixError, PlaybackError, ProviderError};
use on_air::mixer::{AudioMixer, MixConfig};
use on_air::monitor::{AgentId, AgentState, ApiCallBoard, ApiCallStatus, ApiService};
use on_air::playback::Cue;
use on_air::preload::{Lookahead, PipelineState};
use on_air::provider::{
    AudioHandle, MusicProvider, MusicQuery, MusicSelection, Script, ScriptProvider, ScriptRequest, VoiceConfig,
    VoiceProvider,
};
use on_air::station::{Providers, Station};
use on_air::track::Track;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const SETTLE: Duration = Duration::from_secs(10);

// ── Stubs ───────────────────────────────────────────────────────────────────

/// Script writer that records every request and counts concurrent entries.
#[derive(Default)]
struct StubWriter {
    mail_seen: Mutex<Vec<Option<String>>>,
    inside: AtomicUsize,
    max_inside: AtomicUsize,
    calls: AtomicUsize,
    delay: Duration,
    music: Option<String>,
}

impl ScriptProvider for StubWriter {
    fn generate(&self, request: &ScriptRequest) -> Result<Script, ProviderError> {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inside.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.mail_seen
            .lock()
            .unwrap()
            .push(request.mail.as_ref().map(|m| m.content.clone()));
        std::thread::sleep(self.delay);
        self.inside.fetch_sub(1, Ordering::SeqCst);

        let script = Script::spoken(format!("segment {}", request.block_id));
        Ok(match &self.music {
            Some(q) => script.with_music(q.clone()),
            None => script,
        })
    }
}

/// Voice that fails on the given call numbers (1-based), or always.
#[derive(Default)]
struct StubVoice {
    calls: AtomicUsize,
    fail_on: Vec<usize>,
    always_fail: bool,
}

impl VoiceProvider for StubVoice {
    fn synthesize(&self, _text: &str, _voice: &VoiceConfig) -> Result<AudioHandle, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.always_fail || self.fail_on.contains(&call) {
            Err(ProviderError::network("voice service unreachable"))
        } else {
            Ok(AudioHandle::Silence(Duration::from_millis(2)))
        }
    }
}

struct StubMusic;

impl MusicProvider for StubMusic {
    fn lookup(&self, query: &MusicQuery) -> Result<MusicSelection, ProviderError> {
        Ok(MusicSelection {
            track: Track {
                path: PathBuf::from("stub.mp3"),
                title: query.query.clone(),
                artist: "Stub Band".to_string(),
                duration: Duration::from_secs(180),
                lyrics: None,
            },
            lyrics: None,
        })
    }

    fn lyrics(&self, _track: &Track) -> Result<Option<String>, ProviderError> {
        Err(ProviderError::rate_limited("lyrics quota"))
    }
}

/// Mixer that never touches audio files.
struct NullMixer;

impl AudioMixer for NullMixer {
    type Stream = ();

    fn render(&self, _voice: &AudioHandle, _music: Option<&Track>, _config: &MixConfig) -> Result<(), MixError> {
        Ok(())
    }
}

fn station(preload: usize, writer: Arc<StubWriter>, voice: StubVoice) -> Station<NullMixer> {
    let config = StationConfig {
        preload_block_count: preload,
        ..StationConfig::default()
    };
    let providers = Providers {
        script: writer,
        voice: Arc::new(voice),
        music: None,
    };
    Station::with_mixer(config, providers, NullMixer)
}

fn statuses(station: &Station<NullMixer>) -> Vec<BlockStatus> {
    station.timeline().snapshot().iter().map(|b| b.status).collect()
}

// ── Scenarios ───────────────────────────────────────────────────────────────

#[test]
fn one_cycle_consumes_only_the_oldest_mail() {
    let writer = Arc::new(StubWriter::default());
    let station = station(1, writer.clone(), StubVoice::default());
    station.submit_mail("hello");
    station.submit_mail("world");

    station.connect();
    assert!(station.preload().wait_until_settled(SETTLE));

    assert_eq!(*writer.mail_seen.lock().unwrap(), vec![Some("hello".to_string())]);
    let pending: Vec<String> = station.mail().get_pending().into_iter().map(|m| m.content).collect();
    assert_eq!(pending, vec!["world".to_string()]);
}

#[test]
fn preload_two_settles_with_exactly_two_blocks_ahead() {
    let writer = Arc::new(StubWriter::default());
    let station = station(2, writer.clone(), StubVoice::default());
    station.connect();
    assert!(station.preload().wait_until_settled(SETTLE));

    // Give a stray extra cycle the chance to show up.
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(station.timeline().count_ahead(None), 2);
    assert_eq!(station.timeline().len(), 2);
    assert_eq!(writer.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn failed_cycle_is_followed_by_a_fresh_attempt() {
    let writer = Arc::new(StubWriter::default());
    let voice = StubVoice {
        fail_on: vec![2],
        ..StubVoice::default()
    };
    let station = station(3, writer, voice);

    let tts_states = Arc::new(Mutex::new(Vec::new()));
    let seen = tts_states.clone();
    let _sub = station.monitor().on_agent_status(move |s| {
        if s.agent == AgentId::Tts {
            seen.lock().unwrap().push(s.state);
        }
    });

    station.connect();
    assert!(station.preload().wait_until_settled(SETTLE));

    assert_eq!(
        statuses(&station),
        vec![BlockStatus::Ready, BlockStatus::Failed, BlockStatus::Ready, BlockStatus::Ready]
    );
    assert!(tts_states.lock().unwrap().contains(&AgentState::Error));
    assert_eq!(station.status().pipeline, PipelineState::Idle);
}

#[test]
fn three_consecutive_failures_halt_generation() {
    let writer = Arc::new(StubWriter::default());
    let voice = StubVoice {
        always_fail: true,
        ..StubVoice::default()
    };
    let station = station(3, writer.clone(), voice);
    station.connect();
    assert!(station.preload().wait_until_settled(SETTLE));

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(writer.calls.load(Ordering::SeqCst), 3);
    assert_eq!(station.timeline().count_with_status(BlockStatus::Failed), 3);

    let status = station.status();
    assert_eq!(status.pipeline, PipelineState::Halted);
    assert_eq!(status.failed_blocks, 3);
    let director = status.agents.iter().find(|a| a.agent == AgentId::Director).unwrap();
    assert_eq!(director.state, AgentState::Error);

    // Playback waits rather than starting a fourth cycle.
    assert!(station.advance().unwrap().is_waiting());
    assert_eq!(writer.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn halt_is_reported_as_soon_as_the_pipeline_settles() {
    for _ in 0..30 {
        let voice = StubVoice {
            always_fail: true,
            ..StubVoice::default()
        };
        let station = station(3, Arc::new(StubWriter::default()), voice);
        station.connect();
        assert!(station.preload().wait_until_settled(SETTLE));

        assert_eq!(station.status().pipeline, PipelineState::Halted);
        let director = station.monitor().agent_status(AgentId::Director);
        assert_eq!(director.state, AgentState::Error);
        assert!(director.message.starts_with("Pipeline halted"), "{}", director.message);
    }
}

#[test]
fn settings_change_clears_a_halt() {
    let writer = Arc::new(StubWriter::default());
    let voice = StubVoice {
        fail_on: vec![1, 2, 3],
        ..StubVoice::default()
    };
    let station = station(1, writer, voice);
    station.connect();
    assert!(station.preload().wait_until_settled(SETTLE));
    assert_eq!(station.status().pipeline, PipelineState::Halted);

    station.set_preload_block_count(2);
    assert!(station.preload().wait_until_settled(SETTLE));
    assert_eq!(station.timeline().count_with_status(BlockStatus::Ready), 2);
    assert_eq!(station.status().consecutive_failures, 0);
}

#[test]
fn cycles_never_overlap_under_navigation_pressure() {
    let writer = Arc::new(StubWriter {
        delay: Duration::from_millis(10),
        ..StubWriter::default()
    });
    let station = Arc::new(station(3, writer.clone(), StubVoice::default()));
    station.connect();

    let workers: Vec<_> = (0..3)
        .map(|_| {
            let station = station.clone();
            std::thread::spawn(move || {
                for _ in 0..5 {
                    let _ = station.advance_wait(Duration::from_millis(200));
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    assert!(station.preload().wait_until_settled(SETTLE));
    assert_eq!(writer.max_inside.load(Ordering::SeqCst), 1);
}

#[test]
fn lookahead_stays_within_target_while_listening() {
    let writer = Arc::new(StubWriter::default());
    let station = station(2, writer, StubVoice::default());
    station.connect();

    for _ in 0..8 {
        let cue = station.advance_wait(SETTLE).unwrap();
        assert!(!cue.is_waiting());
        let playing = station.status().playing;
        assert!(station.timeline().count_ahead(playing) <= 2);
    }
    let ids: Vec<u64> = station.timeline().snapshot().iter().map(|b| b.id.0).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn failed_block_is_skipped_during_playback() {
    let writer = Arc::new(StubWriter::default());
    let voice = StubVoice {
        fail_on: vec![1],
        ..StubVoice::default()
    };
    let station = station(2, writer, voice);
    station.connect();
    assert!(station.preload().wait_until_settled(SETTLE));

    match station.advance().unwrap() {
        Cue::Playing { block, .. } => assert_eq!(block.id, BlockId(2)),
        _ => panic!("expected block #2 to play"),
    }
    assert!(matches!(station.jump_to_block(BlockId(1)).unwrap(), Cue::SkippedFailed(_)));
    assert!(station.jump_to_block(BlockId(50)).is_err());
}

#[test]
fn clear_history_keeps_mail_and_current_block() {
    let writer = Arc::new(StubWriter::default());
    let station = station(1, writer, StubVoice::default());
    station.connect();
    station.advance_wait(SETTLE).unwrap();
    station.advance_wait(SETTLE).unwrap();
    station.submit_mail("still here?");
    assert!(station.preload().wait_until_settled(SETTLE));

    let playing = station.status().playing.unwrap();
    let removed = station.clear_history();
    assert!(removed >= 1);
    assert_eq!(station.timeline().snapshot()[0].id, playing);
    assert!(station.mail().get_status().total >= 1);
}

#[test]
fn lyrics_failure_fails_the_block() {
    let writer = Arc::new(StubWriter {
        music: Some("sunny".to_string()),
        ..StubWriter::default()
    });
    let config = StationConfig {
        preload_block_count: 1,
        max_consecutive_failures: 1,
        ..StationConfig::default()
    };
    let providers = Providers {
        script: writer,
        voice: Arc::new(StubVoice::default()),
        music: Some(Arc::new(StubMusic)),
    };
    let station = Station::with_mixer(config, providers, NullMixer);

    let board_events = Arc::new(Mutex::new(Vec::new()));
    let seen = board_events.clone();
    let _sub = station
        .monitor()
        .on_api_call(move |e| seen.lock().unwrap().push((e.service, e.status)));

    station.connect();
    assert!(station.preload().wait_until_settled(SETTLE));

    let block = &station.timeline().snapshot()[0];
    assert_eq!(block.status, BlockStatus::Failed);
    assert!(block.error.as_deref().unwrap_or("").contains("lyrics"));
    assert!(
        board_events
            .lock()
            .unwrap()
            .contains(&(ApiService::Lyrics, ApiCallStatus::Error))
    );
}

#[test]
fn api_board_tracks_calls_of_a_live_station() {
    let writer = Arc::new(StubWriter::default());
    let station = station(1, writer, StubVoice::default());
    let (board, _sub) = ApiCallBoard::attach(station.monitor());

    station.connect();
    assert!(station.preload().wait_until_settled(SETTLE));

    let now = Instant::now();
    let visible = board.lock().unwrap().visible(now);
    let services: Vec<ApiService> = visible.iter().map(|e| e.service).collect();
    assert_eq!(services, vec![ApiService::Ai, ApiService::Tts]);
    assert!(visible.iter().all(|e| e.status == ApiCallStatus::Success));
    assert!(board.lock().unwrap().visible(now + Duration::from_secs(4)).is_empty());
}

#[test]
fn disconnect_lets_the_running_cycle_finish() {
    let writer = Arc::new(StubWriter {
        delay: Duration::from_millis(50),
        ..StubWriter::default()
    });
    let station = station(3, writer.clone(), StubVoice::default());
    assert_eq!(station.connect(), Lookahead::Started);
    station.disconnect();

    assert_eq!(writer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(statuses(&station), vec![BlockStatus::Ready]);
    assert_eq!(station.status().pipeline, PipelineState::Stopped);

    // The cycle completed, but a torn-down session never plays its block.
    assert!(matches!(station.advance(), Err(PlaybackError::OffAir)));
    assert!(matches!(station.jump_to_block(BlockId(1)), Err(PlaybackError::OffAir)));
    assert_eq!(station.status().playing, None);
}

#[test]
fn independent_stations_do_not_share_state() {
    let a = station(1, Arc::new(StubWriter::default()), StubVoice::default());
    let b = station(1, Arc::new(StubWriter::default()), StubVoice::default());
    a.submit_mail("only for a");
    assert_eq!(a.mail().get_status().pending, 1);
    assert_eq!(b.mail().get_status().pending, 0);
}
