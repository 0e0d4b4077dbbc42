//! CLI runtime helpers.
//!
//! Provides device enumeration, format probing, and the interactive playlist loop.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use tunedeck_engine::error::{PlaybackError, describe, is_normal_stop};
use tunedeck_engine::output::CpalSink;
use tunedeck_engine::player::Player;
use tunedeck_engine::sim::SimulatedSink;
use tunedeck_engine::sink::AudioSink;
use tunedeck_engine::{device, sniff};
use tunedeck_types::{PlaybackStatus, SessionOutcome, StopReason};

use crate::config::PlayConfig;
use crate::playlist::Playlist;

/// Commands accepted on stdin while playing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserCommand {
    TogglePause,
    Stop,
    Next,
    Back,
    Info,
    Quit,
}

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let devices = device::list_devices()?;
    if devices.is_empty() {
        println!("no output devices");
    }
    for d in devices {
        let marker = if d.is_default { "*" } else { " " };
        println!(
            "{marker} {:>2}: {} ({}-{} Hz)",
            d.index, d.name, d.min_rate, d.max_rate
        );
    }
    Ok(())
}

/// Print the sniffed file type of each path. Errors are reported per file.
pub fn run_probe(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        println!("{}: {}", path.display(), probe_line(path));
    }
    Ok(())
}

fn probe_line(path: &Path) -> String {
    match sniff::classify(path) {
        Ok(file_type) => file_type.to_string(),
        Err(PlaybackError::UnsupportedFileType { magic: Some(magic) }) => {
            format!("unsupported (magic 0x{magic:08x})")
        }
        Err(PlaybackError::UnsupportedFileType { magic: None }) => {
            "unsupported (too short)".to_string()
        }
        Err(e) => format!("error: {e}"),
    }
}

/// Play the configured files in order on the selected output.
pub fn run_play(config: PlayConfig) -> Result<()> {
    if config.null_output {
        tracing::info!("null output: audio is decoded and discarded");
        return play_playlist(SimulatedSink::new(), &config);
    }
    let mut sink = CpalSink::new(config.output.clone());
    sink.set_interpolation(config.interpolation);
    play_playlist(sink, &config)
}

fn play_playlist<S: AudioSink + 'static>(sink: S, config: &PlayConfig) -> Result<()> {
    let mut player = Player::new(sink, config.engine.clone());
    let watchdog = player.watchdog();
    let mut playlist = Playlist::new(config.paths.clone());

    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
    {
        let tx = cmd_tx.clone();
        ctrlc::set_handler(move || {
            let _ = tx.send(UserCommand::Quit);
        })
        .context("install ctrl-c handler")?;
    }
    spawn_stdin_reader(cmd_tx)?;

    let Some(first) = playlist.current() else {
        return Ok(());
    };
    start_track(&mut player, first, playlist.position())?;

    loop {
        crossbeam_channel::select! {
            recv(cmd_rx) -> msg => {
                // The ctrl-c handler keeps a sender alive, so this only fails on teardown.
                let Ok(cmd) = msg else {
                    break;
                };
                match cmd {
                    UserCommand::TogglePause => {
                        if player.is_playing() {
                            let paused = player.toggle_playback();
                            println!("{}", if paused { "paused" } else { "resumed" });
                        } else if let Some(path) = playlist.current() {
                            start_track(&mut player, path, playlist.position())?;
                        }
                    }
                    UserCommand::Stop => {
                        player.stop_playback();
                    }
                    UserCommand::Next => match playlist.advance() {
                        Some(path) => start_track(&mut player, &path, playlist.position())?,
                        None => println!("already at the last track"),
                    },
                    UserCommand::Back => {
                        if let Some(path) = playlist.back() {
                            start_track(&mut player, &path, playlist.position())?;
                        }
                    }
                    UserCommand::Info => println!("{}", format_status(&player.status())),
                    UserCommand::Quit => break,
                }
            }
            recv(watchdog.receiver()) -> outcome => {
                let Ok(outcome) = outcome else {
                    break;
                };
                report_outcome(&outcome);
                if !player.join() {
                    anyhow::bail!("playback thread panicked");
                }
                if !advances_playlist(&outcome) {
                    continue;
                }
                match playlist.advance() {
                    Some(path) => start_track(&mut player, &path, playlist.position())?,
                    None => {
                        tracing::info!("end of playlist");
                        break;
                    }
                }
            }
        }
    }

    player.stop_and_join();
    Ok(())
}

fn start_track<S: AudioSink + 'static>(
    player: &mut Player<S>,
    path: &Path,
    (index, total): (usize, usize),
) -> Result<()> {
    println!("[{index}/{total}] {}", path.display());
    player
        .start(path)
        .with_context(|| format!("start playback of {}", path.display()))
}

/// An explicit stop leaves the player idle; anything else moves on.
fn advances_playlist(outcome: &SessionOutcome) -> bool {
    !matches!(outcome, SessionOutcome::Stopped(StopReason::Requested))
}

fn report_outcome(outcome: &SessionOutcome) {
    if !is_normal_stop(outcome) {
        tracing::error!(code = outcome.as_raw(), "{}", describe(outcome));
        eprintln!("error: {}", describe(outcome));
        return;
    }
    match outcome {
        SessionOutcome::Stopped(StopReason::Requested) => println!("stopped"),
        SessionOutcome::Stopped(StopReason::DecodeFailed) => {
            tracing::warn!("decoder failed mid-stream; skipping to next track");
        }
        _ => tracing::info!("track finished"),
    }
}

fn spawn_stdin_reader(tx: Sender<UserCommand>) -> Result<()> {
    std::thread::Builder::new()
        .name("tunedeck-stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match parse_command(&line) {
                    Some(cmd) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => eprintln!("unknown command {:?} (p s n b i q)", line.trim()),
                }
            }
        })
        .context("spawn stdin reader")?;
    Ok(())
}

pub fn parse_command(line: &str) -> Option<UserCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "p" | "pause" | "play" => Some(UserCommand::TogglePause),
        "s" | "stop" => Some(UserCommand::Stop),
        "n" | "next" => Some(UserCommand::Next),
        "b" | "back" | "prev" => Some(UserCommand::Back),
        "i" | "info" | "status" => Some(UserCommand::Info),
        "q" | "quit" | "exit" => Some(UserCommand::Quit),
        _ => None,
    }
}

/// One-line status summary.
pub fn format_status(status: &PlaybackStatus) -> String {
    let state = format!("{:?}", status.state).to_lowercase();
    let Some(path) = status.now_playing.as_deref() else {
        return state;
    };
    let mut line = format!("{state}: {path}");
    if let Some(file_type) = status.file_type {
        line.push_str(&format!(" [{file_type}"));
        if let (Some(rate), Some(ch)) = (status.sample_rate, status.channels) {
            line.push_str(&format!(" {rate} Hz {ch}ch"));
        }
        line.push(']');
    }
    if let Some(elapsed) = status.elapsed_ms {
        line.push_str(&format!(" {}", format_ms(elapsed)));
        if let Some(total) = status.duration_ms {
            line.push_str(&format!(" / {}", format_ms(total)));
        }
    }
    if status.decode_errors > 0 {
        line.push_str(&format!(" ({} decode errors)", status.decode_errors));
    }
    line
}

fn format_ms(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}
