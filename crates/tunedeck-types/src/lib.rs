use std::fmt;

use serde::{Deserialize, Serialize};

/// Container/codec tag produced by the format sniffer.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    #[default]
    Unknown,
    Wav,
    Flac,
    Vorbis,
    Opus,
    Mp3,
    /// Commodore 64 tune (PSID/RSID).
    Sid,
}

impl FileType {
    /// Upper-case display label, as shown in player status lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Unknown => "UNKNOWN",
            FileType::Wav => "WAV",
            FileType::Flac => "FLAC",
            FileType::Vorbis => "VORBIS",
            FileType::Opus => "OPUS",
            FileType::Mp3 => "MP3",
            FileType::Sid => "SID",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of one playback session.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Idle,
    Initializing,
    Streaming,
    Paused,
    Draining,
    Stopped,
    Error,
}

impl EngineState {
    /// `true` while the session owns the output channel and is producing audio
    /// (streaming or paused).
    pub fn is_playing(&self) -> bool {
        matches!(self, EngineState::Streaming | EngineState::Paused)
    }

    /// `true` once a session can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineState::Stopped | EngineState::Error)
    }
}

/// Why a session that did not fail came to a stop.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of stream.
    EndOfStream,
    /// The controller asked the session to stop.
    Requested,
    /// The decoder failed mid-stream; the session drained like end of stream.
    DecodeFailed,
}

/// Domain error codes delivered to the watchdog.
///
/// Numbering of the domain codes matches the historical player firmware so logs
/// stay comparable.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Operating-system I/O error (`errno` style), when the OS reported one.
    Io { os_error: Option<i32> },
    AudioInitFailed,
    DecoderInitFailed,
    UnsupportedFileType,
    UnsupportedChannelCount,
}

impl ErrorCode {
    /// Integer form of the code. I/O errors use the raw OS error (0 if unknown).
    pub fn as_raw(&self) -> i32 {
        match self {
            ErrorCode::Io { os_error } => os_error.unwrap_or(0),
            ErrorCode::AudioInitFailed => 1000,
            ErrorCode::DecoderInitFailed => 1001,
            ErrorCode::UnsupportedFileType => 1002,
            ErrorCode::UnsupportedChannelCount => 1003,
        }
    }
}

/// Terminal result of a playback session, signalled exactly once to the watchdog.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The session ended without an error (end of stream or explicit stop).
    Stopped(StopReason),
    /// The session could not start or lost its output.
    Failed {
        code: ErrorCode,
        /// Optional human-readable detail (file path, library message).
        detail: Option<String>,
    },
}

impl SessionOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, SessionOutcome::Failed { .. })
    }

    /// Legacy integer form: `-1` for a normal stop, otherwise the error code.
    pub fn as_raw(&self) -> i32 {
        match self {
            SessionOutcome::Stopped(_) => -1,
            SessionOutcome::Failed { code, .. } => code.as_raw(),
        }
    }
}

/// Snapshot of the player for status lines and front-ends.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaybackStatus {
    /// Current engine state.
    pub state: EngineState,
    /// File being played, if any.
    pub now_playing: Option<String>,
    /// Sniffed file type.
    pub file_type: Option<FileType>,
    /// `true` when the output channel is paused.
    pub paused: bool,
    /// Source sample rate (Hz).
    pub sample_rate: Option<u32>,
    /// Channel count (1 or 2).
    pub channels: Option<u8>,
    /// Elapsed playback time in milliseconds.
    pub elapsed_ms: Option<u64>,
    /// Total duration in milliseconds, when the decoder knows it.
    pub duration_ms: Option<u64>,
    /// Interleaved samples handed back by the output so far.
    pub samples_played: u64,
    /// Best-effort interleaved sample total.
    pub total_samples: Option<u64>,
    /// Number of PCM buffer slots cycling through the output.
    pub slot_count: Option<usize>,
    /// Capacity of each slot in samples.
    pub buffer_samples: Option<usize>,
    /// Mid-stream decode failures observed by this session.
    pub decode_errors: u64,
    /// Outcome of the most recent session once it ended.
    pub last_outcome: Option<SessionOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_sentinel_does_not_collide_with_error_codes() {
        let stopped = SessionOutcome::Stopped(StopReason::EndOfStream);
        assert_eq!(stopped.as_raw(), -1);
        assert!(!stopped.is_error());

        let codes = [
            ErrorCode::Io { os_error: Some(2) },
            ErrorCode::Io { os_error: None },
            ErrorCode::AudioInitFailed,
            ErrorCode::DecoderInitFailed,
            ErrorCode::UnsupportedFileType,
            ErrorCode::UnsupportedChannelCount,
        ];
        for code in codes {
            let failed = SessionOutcome::Failed { code, detail: None };
            assert!(failed.is_error());
            assert_ne!(failed.as_raw(), -1);
        }
    }

    #[test]
    fn domain_codes_keep_historical_numbers() {
        assert_eq!(ErrorCode::AudioInitFailed.as_raw(), 1000);
        assert_eq!(ErrorCode::DecoderInitFailed.as_raw(), 1001);
        assert_eq!(ErrorCode::UnsupportedFileType.as_raw(), 1002);
        assert_eq!(ErrorCode::UnsupportedChannelCount.as_raw(), 1003);
        assert_eq!(ErrorCode::Io { os_error: Some(13) }.as_raw(), 13);
    }

    #[test]
    fn engine_state_playing_covers_streaming_and_paused_only() {
        assert!(EngineState::Streaming.is_playing());
        assert!(EngineState::Paused.is_playing());
        assert!(!EngineState::Idle.is_playing());
        assert!(!EngineState::Initializing.is_playing());
        assert!(!EngineState::Draining.is_playing());
        assert!(!EngineState::Stopped.is_playing());
        assert!(!EngineState::Error.is_playing());
    }

    #[test]
    fn file_type_labels() {
        assert_eq!(FileType::Opus.to_string(), "OPUS");
        assert_eq!(FileType::default().as_str(), "UNKNOWN");
    }

    #[test]
    fn outcome_serializes_snake_case() {
        let json = serde_json::to_string(&SessionOutcome::Stopped(StopReason::EndOfStream)).unwrap();
        assert_eq!(json, r#"{"stopped":"end_of_stream"}"#);
        let json = serde_json::to_string(&ErrorCode::UnsupportedChannelCount).unwrap();
        assert_eq!(json, r#""unsupported_channel_count""#);
    }
}
