//! Player — a small CLI that decodes audio files, converts them to the
//! output device format, and plays them via CPAL.
//!
//! ## Pipeline
//! 1. **Decode**: the control thread uses Symphonia to decode each file into
//!    interleaved 16-bit PCM.
//! 2. **Convert**: a filter chain adapts signedness, bit width, channel
//!    count, gain, and sample rate to the device format.
//! 3. **Playback**: the CPAL callback pulls converted audio from a bounded
//!    queue without blocking.
//!
//! Transport commands are read from stdin: `seek <seconds>` (relative,
//! negative rewinds), `next`, `quit`. Ctrl-C requests a clean shutdown.

mod cli;

use std::io::BufRead;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use player_core::config::PlayerConfig;
use player_core::decoder::{Decoder, SymphoniaDecoder};
use player_core::device::{self, CpalOutput};
use player_core::events::Notification;
use player_core::player::{AudioPlayer, Command, PlayerHandle};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if args.list_devices {
        let host = cpal::default_host();
        device::list_devices(&host)?;
        return Ok(());
    }
    if args.files.is_empty() {
        bail!("no input files (try --list-devices to inspect outputs)");
    }

    let config = PlayerConfig {
        queue_capacity: args.queue_capacity,
        gain: args.gain,
        ..PlayerConfig::default()
    };
    let device_name = args.device.clone();
    let rate = args.rate;
    let handle = AudioPlayer::start(
        config,
        Box::new(move || Box::new(CpalOutput::new(device_name, rate))),
        Box::new(|path| SymphoniaDecoder::open(path).map(|d| Box::new(d) as Box<dyn Decoder>)),
    )?;
    let handle = Arc::new(handle);

    for file in &args.files {
        handle.enqueue_track(file.clone());
    }
    tracing::info!(tracks = args.files.len(), "playlist loaded");

    let ctrlc_handle = handle.clone();
    let _ = ctrlc::set_handler(move || ctrlc_handle.request_exit());

    spawn_command_reader(handle.clone());

    // Runs until the control thread shuts down and drops its sender.
    for note in handle.notifications().iter() {
        match note {
            Notification::Metadata(meta) => {
                let title = meta.title.as_deref().unwrap_or("<unknown>");
                match meta.artist.as_deref() {
                    Some(artist) => println!("now playing: {artist} - {title}"),
                    None => println!("now playing: {title}"),
                }
            }
            Notification::TotalTime(secs) => println!("total time: {}", format_time(secs)),
            Notification::PlaybackStop => println!("playback stopped"),
        }
    }

    Ok(())
}

fn spawn_command_reader(handle: Arc<PlayerHandle>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match parse_line(&line) {
                Some(Command::Seek(seconds)) => handle.request_seek(seconds),
                Some(Command::Next) => handle.request_next(),
                Some(Command::Exit) => {
                    handle.request_exit();
                    break;
                }
                None => {
                    if !line.trim().is_empty() {
                        eprintln!("commands: seek <seconds> | next | quit");
                    }
                }
            }
        }
    });
}

fn parse_line(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    match parts.next()? {
        "seek" => parts.next()?.parse().ok().map(Command::Seek),
        "next" => Some(Command::Next),
        "quit" | "exit" => Some(Command::Exit),
        _ => None,
    }
}

fn format_time(secs: f64) -> String {
    let total = secs.max(0.0).round() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
