use clap::{Parser, Subcommand};
use on_air::audio_runtime::{SpeakerEvent, spawn_speaker};
use on_air::config::StationConfig;
use on_air::error::PlaybackError;
use on_air::library::MusicLibrary;
use on_air::playback::Cue;
use on_air::relay::{Relay, RelayRequest};
use on_air::station::{Providers, Station};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "onair", about = "AI radio station", version)]
struct Cli {
    /// Config file (default: <config dir>/onair/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Go on air through the speakers; lines typed on stdin become listener mail
    Run {
        /// Stop after this many blocks have played
        #[arg(short, long)]
        blocks: Option<usize>,
        /// Music folder (overrides config)
        #[arg(short, long)]
        music: Option<PathBuf>,
    },
    /// Station configuration
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },
    /// List the tracks found in a music folder
    Library { path: PathBuf },
    /// Send one request through the outbound relay and print the response
    Relay {
        url: String,
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// Header as NAME:VALUE (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// JSON request body
        #[arg(short, long)]
        body: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Show current configuration
    Show,
    /// Set how many blocks are prepared ahead of playback (1-10)
    SetPreload { count: usize },
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn load_config(path: &Path) -> StationConfig {
    StationConfig::load(path).unwrap_or_else(|e| fail(e))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("on_air=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(StationConfig::default_path);

    match cli.command {
        Commands::Run { blocks, music } => {
            let mut config = load_config(&config_path);
            if music.is_some() {
                config.music_dir = music;
            }
            run(config, blocks);
        }
        Commands::Config { action } => match action {
            ConfigCmd::Show => {
                let config = load_config(&config_path);
                println!("# {}", config_path.display());
                match serde_json::to_string_pretty(&config) {
                    Ok(json) => println!("{}", json),
                    Err(e) => fail(e),
                }
            }
            ConfigCmd::SetPreload { count } => {
                let mut config = load_config(&config_path);
                if let Err(e) = config.set_preload_block_count(count) {
                    fail(e);
                }
                if let Err(e) = config.save(&config_path) {
                    fail(e);
                }
                println!("Preload block count set to {}", count);
            }
        },
        Commands::Library { path } => {
            let library = MusicLibrary::scan(&path).unwrap_or_else(|e| fail(format!("{}: {}", path.display(), e)));
            if library.is_empty() {
                println!("No audio files in {}", path.display());
                return;
            }
            for (i, track) in library.tracks().iter().enumerate() {
                let lyrics = if track.lyrics.is_some() { " [lyrics]" } else { "" };
                println!("{:>3}. {} [{}]{}", i + 1, track.display_name(), track.duration_display(), lyrics);
            }
        }
        Commands::Relay {
            url,
            method,
            headers,
            body,
        } => {
            let mut header_map = BTreeMap::new();
            for header in headers {
                match header.split_once(':') {
                    Some((name, value)) => {
                        header_map.insert(name.trim().to_string(), value.trim().to_string());
                    }
                    None => fail(format!("header '{}' is not NAME:VALUE", header)),
                }
            }
            let body = body.map(|b| serde_json::from_str(&b).unwrap_or_else(|e| fail(format!("body is not JSON: {}", e))));
            let request = RelayRequest {
                url,
                method: Some(method),
                headers: header_map,
                body,
            };
            let relay = Relay::new().unwrap_or_else(|e| fail(e));
            let response = relay.forward(&request);
            println!("HTTP {}", response.status);
            println!("{}", serde_json::to_string_pretty(&response.body).unwrap_or_default());
            if !response.is_success() {
                std::process::exit(1);
            }
        }
    }
}

fn run(config: StationConfig, max_blocks: Option<usize>) {
    let providers = Providers::offline(&config);
    let station = Station::new(config, providers);

    let _agents = station
        .monitor()
        .on_agent_status(|s| println!("  [{}] {}", s.agent, s.message));

    let mail = station.mail().clone();
    let stdin_reader = std::thread::Builder::new()
        .name("stdin-mail".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines().map_while(Result::ok) {
                if let Some(item) = mail.push(&line) {
                    println!("  Mail queued ({})", item.id);
                }
            }
        });
    if let Err(e) = stdin_reader {
        eprintln!("Warning: listener mail disabled: {}", e);
    }

    let (tx, rx) = mpsc::channel();
    let speaker = spawn_speaker(move |evt| {
        let _ = tx.send(evt);
    })
    .unwrap_or_else(|e| fail(format!("cannot start audio thread: {}", e)));

    let status = station.status();
    println!(
        "{} is on air (preload: {} blocks). Type a line and press Enter to send mail.",
        status.station_name, status.preload_block_count
    );
    station.connect();

    let mut played = 0;
    let mut announced_wait = false;
    while max_blocks.is_none_or(|max| played < max) {
        match station.advance_wait(Duration::from_millis(500)) {
            Ok(Cue::Playing { block, stream }) => {
                announced_wait = false;
                println!("Now playing block {}:", block.id);
                if let Some(script) = &block.script {
                    println!("  \"{}\"", script);
                }
                if let Some(track) = &block.music_track {
                    println!("  Music: {} [{}]", track.display_name(), track.duration_display());
                }
                speaker.play(block.id, stream);
                if !wait_for_block_end(&rx) {
                    break;
                }
                played += 1;
            }
            Ok(Cue::Waiting) => {
                if station.preload().is_halted() {
                    eprintln!("Generation halted after repeated failures; going off air.");
                    break;
                }
                if !announced_wait {
                    println!("Waiting for the next block...");
                    announced_wait = true;
                }
            }
            Ok(Cue::SkippedFailed(_)) => {}
            Err(PlaybackError::OffAir) => break,
            Err(e) => eprintln!("Warning: {}", e),
        }
    }

    station.disconnect();
    speaker.shutdown();
    println!("Off air after {} block(s).", played);
}

/// Block until the speaker finishes the current block. False when playback
/// cannot continue.
fn wait_for_block_end(rx: &mpsc::Receiver<SpeakerEvent>) -> bool {
    loop {
        match rx.recv() {
            Ok(SpeakerEvent::BlockFinished(_)) => return true,
            Ok(SpeakerEvent::PlayError(e)) => {
                eprintln!("Error: {}", e);
                return false;
            }
            Ok(_) => {}
            Err(_) => return false,
        }
    }
}
