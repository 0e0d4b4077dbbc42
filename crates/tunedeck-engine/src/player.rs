//! Transport control surface.
//!
//! [`Player`] owns the output sink while idle and lends it to exactly one engine
//! thread at a time. The thread returns the sink when it exits, so a new session
//! can only open the channel after the previous engine thread has been joined.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tunedeck_types::PlaybackStatus;

use crate::config::EngineConfig;
use crate::engine::{self, SessionContext};
use crate::error::PlaybackError;
use crate::sink::AudioSink;
use crate::status::SessionStatus;
use crate::watchdog::Watchdog;

struct SessionHandle<S> {
    stop: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    join: JoinHandle<S>,
}

pub struct Player<S: AudioSink + 'static> {
    cfg: EngineConfig,
    /// The output channel while no engine thread holds it.
    sink: Option<S>,
    session: Option<SessionHandle<S>>,
    status: Arc<Mutex<SessionStatus>>,
    watchdog: Watchdog,
}

impl<S: AudioSink + 'static> Player<S> {
    pub fn new(sink: S, cfg: EngineConfig) -> Self {
        Self {
            cfg,
            sink: Some(sink),
            session: None,
            status: SessionStatus::shared(),
            watchdog: Watchdog::new(),
        }
    }

    /// Receiving end of the session outcome channel.
    pub fn watchdog(&self) -> Watchdog {
        self.watchdog.clone()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
            .lock()
            .map(|s| s.snapshot())
            .unwrap_or_default()
    }

    /// Start a session on `path`, stopping and joining any current one first.
    pub fn start(&mut self, path: impl Into<PathBuf>) -> Result<(), PlaybackError> {
        self.stop_and_join();
        let mut sink = self.sink.take().ok_or(PlaybackError::ChannelUnavailable)?;
        let dropped = self.watchdog.drain_stale();
        if dropped > 0 {
            tracing::debug!(dropped, "cleared unconsumed session outcomes");
        }

        let path = path.into();
        let stop = Arc::new(AtomicBool::new(false));
        let paused = sink.pause_handle();
        let ctx = SessionContext {
            stop: stop.clone(),
            status: self.status.clone(),
            signal: self.watchdog.signal(),
        };
        let cfg = self.cfg.clone();

        tracing::info!(path = %path.display(), "starting session");
        let join = std::thread::Builder::new()
            .name("tunedeck-engine".to_string())
            .spawn(move || {
                engine::run_session(&mut sink, &path, &cfg, ctx);
                sink
            })
            .map_err(|e| PlaybackError::AudioInitFailed(format!("spawn engine thread: {e}")))?;

        self.session = Some(SessionHandle { stop, paused, join });
        Ok(())
    }

    /// Flip pause on the active session and return the new paused state.
    ///
    /// No-op returning `false` unless a session is streaming or paused. A session
    /// still opening its channel would reset the flag.
    pub fn toggle_playback(&self) -> bool {
        match &self.session {
            Some(sess) if !sess.join.is_finished() && self.is_playing() => {
                let now_paused = !sess.paused.fetch_xor(true, Ordering::Relaxed);
                tracing::info!(paused = now_paused, "playback toggled");
                now_paused
            }
            _ => false,
        }
    }

    /// Ask the active session to stop. Does not wait for teardown.
    pub fn stop_playback(&self) {
        if let Some(sess) = &self.session {
            sess.stop.store(true, Ordering::Relaxed);
        }
    }

    /// `true` while a session is streaming or paused.
    pub fn is_playing(&self) -> bool {
        self.status
            .lock()
            .map(|s| s.state.is_playing())
            .unwrap_or(false)
    }

    /// Wait for the current engine thread to exit and take the channel back.
    ///
    /// Returns `false` if the thread panicked; the channel is lost in that case.
    pub fn join(&mut self) -> bool {
        let Some(sess) = self.session.take() else {
            return true;
        };
        match sess.join.join() {
            Ok(sink) => {
                self.sink = Some(sink);
                true
            }
            Err(_) => {
                tracing::error!("engine thread panicked; output channel lost");
                false
            }
        }
    }

    /// Stop the active session, if any, and join its thread.
    pub fn stop_and_join(&mut self) -> bool {
        self.stop_playback();
        self.join()
    }
}

impl<S: AudioSink + 'static> Drop for Player<S> {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
