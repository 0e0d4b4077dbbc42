use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tunedeck_types::{EngineState, FileType, PlaybackStatus, SessionOutcome};

/// Shared playback status updated by the engine thread.
#[derive(Debug, Default)]
pub struct SessionStatus {
    pub state: EngineState,
    /// Path of the file being played.
    pub now_playing: Option<String>,
    pub file_type: Option<FileType>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    /// Best-effort interleaved sample total from the decoder.
    pub total_samples: Option<u64>,
    pub slot_count: Option<usize>,
    pub buffer_samples: Option<usize>,
    /// Interleaved samples reclaimed from the output.
    pub samples_played: u64,
    pub decode_errors: u64,
    /// Pause flag shared with the output.
    pub paused_flag: Option<Arc<AtomicBool>>,
    /// Outcome of the most recent session.
    pub last_outcome: Option<SessionOutcome>,
}

impl SessionStatus {
    /// Create a shared, mutex-protected status store.
    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn snapshot(&self) -> PlaybackStatus {
        let paused = self
            .paused_flag
            .as_ref()
            .map(|p| p.load(Ordering::Relaxed))
            .unwrap_or(false);
        let frames_to_ms = |samples: u64| match (self.sample_rate, self.channels) {
            (Some(rate), Some(ch)) if rate > 0 && ch > 0 => {
                Some(samples / u64::from(ch) * 1000 / u64::from(rate))
            }
            _ => None,
        };
        let state = match self.state {
            EngineState::Streaming if paused => EngineState::Paused,
            EngineState::Paused if !paused => EngineState::Streaming,
            other => other,
        };
        PlaybackStatus {
            state,
            now_playing: self.now_playing.clone(),
            file_type: self.file_type,
            paused,
            sample_rate: self.sample_rate,
            channels: self.channels,
            elapsed_ms: if self.state == EngineState::Idle {
                None
            } else {
                frames_to_ms(self.samples_played)
            },
            duration_ms: self.total_samples.and_then(frames_to_ms),
            samples_played: self.samples_played,
            total_samples: self.total_samples,
            slot_count: self.slot_count,
            buffer_samples: self.buffer_samples,
            decode_errors: self.decode_errors,
            last_outcome: self.last_outcome.clone(),
        }
    }

    /// Reset per-session fields ahead of a new session on `path`.
    pub fn begin(&mut self, path: &str) {
        self.clear_playback();
        self.state = EngineState::Initializing;
        self.now_playing = Some(path.to_string());
        self.last_outcome = None;
    }

    /// Clear track-specific fields; the last outcome is kept.
    pub fn clear_playback(&mut self) {
        self.now_playing = None;
        self.file_type = None;
        self.sample_rate = None;
        self.channels = None;
        self.total_samples = None;
        self.slot_count = None;
        self.buffer_samples = None;
        self.samples_played = 0;
        self.decode_errors = 0;
        self.paused_flag = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunedeck_types::StopReason;

    #[test]
    fn snapshot_derives_times_from_samples() {
        let mut st = SessionStatus::default();
        st.begin("/music/a.wav");
        st.state = EngineState::Streaming;
        st.sample_rate = Some(8_000);
        st.channels = Some(2);
        st.samples_played = 16_000;
        st.total_samples = Some(32_000);

        let snap = st.snapshot();
        assert_eq!(snap.elapsed_ms, Some(1_000));
        assert_eq!(snap.duration_ms, Some(2_000));
        assert_eq!(snap.now_playing.as_deref(), Some("/music/a.wav"));
    }

    #[test]
    fn snapshot_reports_pause_from_shared_flag() {
        let mut st = SessionStatus::default();
        let flag = Arc::new(AtomicBool::new(true));
        st.state = EngineState::Streaming;
        st.paused_flag = Some(flag.clone());
        let snap = st.snapshot();
        assert!(snap.paused);
        assert_eq!(snap.state, EngineState::Paused);

        flag.store(false, Ordering::Relaxed);
        assert_eq!(st.snapshot().state, EngineState::Streaming);
    }

    #[test]
    fn clear_playback_keeps_last_outcome() {
        let mut st = SessionStatus::default();
        st.begin("x");
        st.last_outcome = Some(SessionOutcome::Stopped(StopReason::EndOfStream));
        st.clear_playback();
        assert!(st.now_playing.is_none());
        assert!(st.last_outcome.is_some());
    }

    #[test]
    fn idle_snapshot_has_no_elapsed_time() {
        let st = SessionStatus::default();
        let snap = st.snapshot();
        assert_eq!(snap.state, EngineState::Idle);
        assert!(snap.elapsed_ms.is_none());
    }
}
