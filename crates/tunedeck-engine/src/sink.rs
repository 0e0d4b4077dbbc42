//! Output sink abstraction.
//!
//! A sink is the single audio output channel. The engine opens it for one session,
//! hands it PCM buffers one slot at a time, and takes each buffer back once the
//! sink has finished playing it. Buffers move by value: a slot's samples belong to
//! either the engine or the sink, never both.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::PlaybackError;

/// Index of a buffer slot.
pub type SlotId = usize;

/// Where a slot currently stands, as seen by the sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotStatus {
    /// Nothing submitted (or the buffer was already reclaimed).
    Idle,
    /// Submitted and not yet fully played.
    Queued,
    /// Played; the buffer is waiting to be reclaimed.
    Done,
}

/// One slot's PCM: a fixed-capacity interleaved buffer and the valid length.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PcmBuffer {
    pub samples: Vec<i16>,
    pub len: usize,
}

impl PcmBuffer {
    pub fn with_capacity(samples: usize) -> Self {
        Self {
            samples: vec![0; samples],
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Valid samples.
    pub fn filled(&self) -> &[i16] {
        &self.samples[..self.len.min(self.samples.len())]
    }
}

/// The audio output channel.
///
/// Implementations are driven from one engine thread at a time; the paused flag is
/// the only state shared with controllers.
pub trait AudioSink: Send {
    /// Open the channel for a stream of `channels` interleaved channels at `rate` Hz.
    fn open_channel(&mut self, rate: u32, channels: u8) -> Result<(), PlaybackError>;

    /// Return the channel to a neutral state; any queued audio is dropped.
    ///
    /// The engine calls this once after a successful open, before priming slots.
    fn reset_channel(&mut self);

    /// Toggle sample interpolation, when the output resamples.
    fn set_interpolation(&mut self, _enabled: bool) {}

    /// Make a buffer visible to the playback side before it is queued.
    fn prepare(&mut self, _buffer: &PcmBuffer) {}

    /// Queue a slot's buffer. The sink owns the buffer until [`AudioSink::reclaim`].
    fn submit(&mut self, slot: SlotId, buffer: PcmBuffer);

    /// No further buffers follow in this session.
    fn finish(&mut self) {}

    fn status(&self, slot: SlotId) -> SlotStatus;

    /// Take back a slot's buffer once it is [`SlotStatus::Done`].
    fn reclaim(&mut self, slot: SlotId) -> Option<PcmBuffer>;

    /// Shared paused flag; controllers flip it without touching the sink.
    fn pause_handle(&self) -> Arc<AtomicBool>;

    fn set_paused(&self, paused: bool) {
        self.pause_handle().store(paused, Ordering::Relaxed);
    }

    fn is_paused(&self) -> bool {
        self.pause_handle().load(Ordering::Relaxed)
    }

    /// `true` once the output has started consuming submitted audio.
    fn is_playing(&self) -> bool;

    /// Block until the sink has progress to report or `timeout` elapses.
    fn wait(&mut self, timeout: Duration) {
        std::thread::sleep(timeout);
    }

    /// Close the channel. Buffers still held by the sink are dropped.
    fn close_channel(&mut self);
}
