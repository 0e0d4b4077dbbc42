//! Sample ring between the engine thread and the CPAL callback.
//!
//! The engine pushes each submitted slot's samples (converted to `f32`, already at
//! the device rate) followed by an end mark. The callback drains the ring without
//! blocking. Once the consumed count passes a slot's end mark, that slot is done
//! and the engine may reclaim its buffer.

use std::collections::{HashSet, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::sink::SlotId;

/// Interleaved `f32` samples tagged with per-slot end marks.
pub struct SlotRing {
    channels: usize,
    inner: Mutex<RingInner>,
    cv: Condvar,
}

#[derive(Default)]
struct RingInner {
    queue: VecDeque<f32>,
    produced: u64,
    consumed: u64,
    /// `(slot, produced count at the slot's last sample)`, oldest first.
    marks: VecDeque<(SlotId, u64)>,
    done: HashSet<SlotId>,
    /// Slots completed since the ring was created or cleared.
    completed: u64,
    started: bool,
}

impl RingInner {
    fn settle_marks(&mut self) -> bool {
        let mut any = false;
        while let Some(&(slot, end)) = self.marks.front() {
            if end > self.consumed {
                break;
            }
            self.marks.pop_front();
            self.done.insert(slot);
            self.completed += 1;
            any = true;
        }
        any
    }
}

impl SlotRing {
    pub fn new(channels: usize) -> Self {
        Self {
            channels: channels.max(1),
            inner: Mutex::new(RingInner::default()),
            cv: Condvar::new(),
        }
    }

    /// Channel count of the samples carried by this ring.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Append a slot's samples and its end mark.
    pub fn push_slot(&self, slot: SlotId, samples: &[f32]) {
        let mut g = self.inner.lock().unwrap();
        g.done.remove(&slot);
        g.queue.extend(samples.iter().copied());
        g.produced += samples.len() as u64;
        let end = g.produced;
        g.marks.push_back((slot, end));
        let settled = g.settle_marks();
        drop(g);
        if settled {
            self.cv.notify_all();
        }
    }

    /// Append samples that belong to the most recent slot still playing, if any.
    ///
    /// Used for the resampler tail at end of stream.
    pub fn push_tail(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let mut g = self.inner.lock().unwrap();
        g.queue.extend(samples.iter().copied());
        g.produced += samples.len() as u64;
        let end = g.produced;
        if let Some(last) = g.marks.back_mut() {
            last.1 = end;
        }
    }

    /// Return up to `max_frames` interleaved frames, or `None` if nothing is ready.
    ///
    /// Never blocks on the condition variable; safe to call from the audio callback.
    pub fn pop_nonblocking(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = self.inner.lock().unwrap();
        let available_frames = g.queue.len() / self.channels;
        let take_samples = available_frames.min(max_frames) * self.channels;
        if take_samples == 0 {
            return None;
        }

        let out: Vec<f32> = g.queue.drain(..take_samples).collect();
        g.consumed += take_samples as u64;
        g.started = true;
        g.settle_marks();
        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    pub fn is_slot_done(&self, slot: SlotId) -> bool {
        self.inner.lock().unwrap().done.contains(&slot)
    }

    /// Forget a done slot once its buffer has been reclaimed.
    pub fn clear_done(&self, slot: SlotId) {
        self.inner.lock().unwrap().done.remove(&slot);
    }

    /// `true` once the callback has consumed any audio.
    pub fn is_started(&self) -> bool {
        self.inner.lock().unwrap().started
    }

    /// Wait until another slot completes or `timeout` elapses.
    ///
    /// Slots already done on entry do not count, so a done slot the caller has not
    /// reclaimed yet does not make this return early. Returns `true` on progress.
    pub fn wait_progress(&self, timeout: Duration) -> bool {
        let g = self.inner.lock().unwrap();
        let seen = g.completed;
        let (g, _timeout) = self
            .cv
            .wait_timeout_while(g, timeout, |inner| inner.completed == seen)
            .unwrap();
        g.completed != seen
    }

    /// Drop all queued audio and marks.
    pub fn clear(&self) {
        let mut g = self.inner.lock().unwrap();
        *g = RingInner::default();
        drop(g);
        self.cv.notify_all();
    }
}
