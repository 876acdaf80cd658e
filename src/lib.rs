//! onAir: core library for an AI radio station.
//!
//! A Director writes, voices and scores one program block per cycle; the
//! Preload Manager keeps a few blocks ready ahead of the listener; the
//! Playback Controller walks the timeline and hands rendered blocks to the
//! speaker. The `onair` CLI consumes this crate.

pub mod audio_runtime;
pub mod block;
pub mod config;
pub mod director;
pub mod error;
pub mod library;
pub mod listeners;
pub mod mail_queue;
pub mod mixer;
pub mod monitor;
pub mod offline;
pub mod playback;
pub mod player;
pub mod preload;
pub mod provider;
pub mod relay;
pub mod station;
pub mod track;
