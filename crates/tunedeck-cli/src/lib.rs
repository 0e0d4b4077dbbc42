//! tunedeck: play local audio files through the slot-cycling playback engine.
//!
//! ## Modes
//! - `play`: play files in order; transport commands are read from stdin.
//! - `probe`: print the sniffed format of each file.
//! - `list-devices`: enumerate output devices.

pub mod cli;
pub mod config;
pub mod runtime;

mod playlist;
