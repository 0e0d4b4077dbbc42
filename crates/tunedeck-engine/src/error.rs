//! Error taxonomy for playback sessions.
//!
//! Every variant is local to one session: the engine tears down and reports it to the
//! watchdog as an [`ErrorCode`], the process keeps running.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tunedeck_types::{ErrorCode, SessionOutcome};

/// Errors that end a playback attempt before or during initialisation.
#[derive(Error, Debug)]
pub enum PlaybackError {
    /// File could not be opened or read. The OS error is kept as-is.
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// No known signature matched (or no Ogg mapping matched).
    #[error("File type is not supported{}", magic.map(|m| format!(" (magic {m:#010x})")).unwrap_or_default())]
    UnsupportedFileType { magic: Option<u32> },

    /// The output channel could not be opened.
    #[error("Audio output initialisation failed: {0}")]
    AudioInitFailed(String),

    /// The codec library rejected a file that passed sniffing.
    #[error("Unable to initialise decoder: {0}")]
    DecoderInitFailed(String),

    /// The decoder reported a channel layout the output cannot render.
    #[error("Unsupported number of channels: {0}")]
    UnsupportedChannelCount(u8),

    /// The output channel was lost with a previous engine thread.
    #[error("Audio output channel unavailable")]
    ChannelUnavailable,
}

impl PlaybackError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PlaybackError::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable code reported to the watchdog.
    pub fn code(&self) -> ErrorCode {
        match self {
            PlaybackError::Io { source, .. } => ErrorCode::Io {
                os_error: source.raw_os_error(),
            },
            PlaybackError::UnsupportedFileType { .. } => ErrorCode::UnsupportedFileType,
            PlaybackError::AudioInitFailed(_) | PlaybackError::ChannelUnavailable => {
                ErrorCode::AudioInitFailed
            }
            PlaybackError::DecoderInitFailed(_) => ErrorCode::DecoderInitFailed,
            PlaybackError::UnsupportedChannelCount(_) => ErrorCode::UnsupportedChannelCount,
        }
    }

    /// Extra context that the code alone does not carry.
    pub fn detail(&self) -> Option<String> {
        match self {
            PlaybackError::Io { path, .. } => Some(path.display().to_string()),
            PlaybackError::UnsupportedFileType { magic } => magic.map(|m| format!("magic {m:#010x}")),
            PlaybackError::AudioInitFailed(msg) | PlaybackError::DecoderInitFailed(msg) => {
                Some(msg.clone())
            }
            PlaybackError::UnsupportedChannelCount(n) => Some(format!("{n} channels")),
            PlaybackError::ChannelUnavailable => None,
        }
    }

    /// Convert into the outcome signalled at the end of a failed session.
    pub fn into_outcome(self) -> SessionOutcome {
        SessionOutcome::Failed {
            code: self.code(),
            detail: self.detail(),
        }
    }
}

/// Hard failure returned by a decoder adapter mid-stream.
#[derive(Error, Debug)]
#[error("decode failed: {0}")]
pub struct DecodeError(pub String);

/// Human-readable text for a session outcome, as shown by the watchdog.
pub fn describe(outcome: &SessionOutcome) -> String {
    match outcome {
        SessionOutcome::Stopped(_) => "Stopped".to_string(),
        SessionOutcome::Failed { code, detail } => {
            let base = match code {
                ErrorCode::AudioInitFailed => "Audio output initialisation failed".to_string(),
                ErrorCode::DecoderInitFailed => "Unable to initialise decoder".to_string(),
                ErrorCode::UnsupportedFileType => "File type is not supported".to_string(),
                ErrorCode::UnsupportedChannelCount => "Unsupported number of channels".to_string(),
                ErrorCode::Io { os_error: Some(raw) } => io::Error::from_raw_os_error(*raw).to_string(),
                ErrorCode::Io { os_error: None } => "I/O error".to_string(),
            };
            match detail {
                Some(d) if !d.is_empty() => format!("{base} ({d})"),
                _ => base,
            }
        }
    }
}

/// `true` when the outcome should be shown as a plain stop rather than an error.
pub fn is_normal_stop(outcome: &SessionOutcome) -> bool {
    matches!(outcome, SessionOutcome::Stopped(_))
}
