use std::path::PathBuf;
use std::time::Duration;

use tunedeck_engine::config::{EngineConfig, OutputConfig};

use crate::cli::Args;

#[derive(Clone, Debug)]
pub struct PlayConfig {
    pub paths: Vec<PathBuf>,
    pub engine: EngineConfig,
    pub output: OutputConfig,
    pub interpolation: bool,
    pub null_output: bool,
}

impl PlayConfig {
    pub fn from_args(args: &Args, paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            engine: EngineConfig {
                slot_count: args.slots,
                poll_interval: Duration::from_micros(args.poll_us.max(1)),
                start_timeout: Duration::from_millis(args.start_timeout_ms),
                buffer_samples: args.buffer_samples,
            },
            output: OutputConfig {
                device: normalize_device_name(args.device.clone()),
                chunk_frames: args.chunk_frames,
                refill_max_frames: args.refill_max_frames,
            },
            interpolation: !args.no_interpolation,
            null_output: args.null_output,
        }
    }
}

pub fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn normalize_device_name_trims_and_drops_empty() {
        assert_eq!(normalize_device_name(None), None);
        assert_eq!(normalize_device_name(Some("  ".to_string())), None);
        assert_eq!(
            normalize_device_name(Some("  USB DAC ".to_string())),
            Some("USB DAC".to_string())
        );
    }

    #[test]
    fn from_args_maps_tuning_flags() {
        let args = Args::try_parse_from([
            "tunedeck",
            "play",
            "a.wav",
            "--poll-us",
            "0",
            "--device",
            " dac ",
            "--no-interpolation",
        ])
        .unwrap();
        let cfg = PlayConfig::from_args(&args, vec![PathBuf::from("a.wav")]);
        assert_eq!(cfg.engine.poll_interval, Duration::from_micros(1));
        assert_eq!(cfg.engine.slot_count, 2);
        assert_eq!(cfg.output.device.as_deref(), Some("dac"));
        assert!(!cfg.interpolation);
        assert!(!cfg.null_output);
    }
}
