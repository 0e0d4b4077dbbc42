use std::path::PathBuf;

use clap::{Parser, Subcommand};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "tunedeck", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Use a specific output device by substring match
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Number of PCM buffer slots cycled through the output
    #[arg(long, global = true, default_value_t = 2)]
    pub slots: usize,

    /// Engine poll interval in microseconds
    #[arg(long, global = true, default_value_t = 100)]
    pub poll_us: u64,

    /// Slot size in samples (default: the decoder's recommendation)
    #[arg(long, global = true)]
    pub buffer_samples: Option<usize>,

    /// How long to wait for the output to start consuming audio (ms)
    #[arg(long, global = true, default_value_t = 500)]
    pub start_timeout_ms: u64,

    /// Resampler input chunk size in frames (only used when the device rate differs)
    #[arg(long, global = true, default_value_t = 1024)]
    pub chunk_frames: usize,

    /// Playback callback refill cap (frames). Larger reduces lock churn but can add latency.
    #[arg(long, global = true, default_value_t = 4096)]
    pub refill_max_frames: usize,

    /// Use nearest-sample instead of cubic interpolation when resampling
    #[arg(long, global = true)]
    pub no_interpolation: bool,

    /// Decode without an audio device (slots complete immediately)
    #[arg(long, global = true)]
    pub null_output: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play files in order. Commands on stdin: p pause, s stop, n next, b back, i status, q quit
    Play {
        /// Audio files (WAV, FLAC, Ogg Vorbis/Opus/FLAC, MP3)
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Print the detected format of each file
    Probe {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// List output devices
    ListDevices,
}
