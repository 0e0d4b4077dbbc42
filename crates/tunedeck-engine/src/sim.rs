//! Simulated output and scripted decoder.
//!
//! [`SimulatedSink`] completes queued slots in submission order, one per
//! [`AudioSink::wait`] call. A sink built with [`SimulatedSink::recording`] also
//! keeps an event log and every played sample for tests; the plain sink behind the
//! CLI's `--null-output` mode discards audio and keeps no history.
//! [`ScriptedDecoder`] hands out a fixed sample sequence and records each call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tunedeck_types::FileType;

use crate::decoder::Decoder;
use crate::error::{DecodeError, PlaybackError};
use crate::sink::{AudioSink, PcmBuffer, SlotId, SlotStatus};

/// One recorded channel operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    Open { rate: u32, channels: u8 },
    Reset,
    Submit { slot: SlotId, len: usize },
    Done { slot: SlotId },
    Reclaim { slot: SlotId },
    Close,
}

#[derive(Default)]
struct SimState {
    open: bool,
    started: bool,
    slots: Vec<(SlotStatus, Option<PcmBuffer>)>,
    queue: VecDeque<SlotId>,
    events: Vec<SinkEvent>,
    played: Vec<i16>,
    /// Misuse seen: double submit, reclaim of a slot that is not done, use while closed.
    violations: Vec<String>,
    fail_open: Option<String>,
    hold_start: bool,
    recording: bool,
}

impl SimState {
    fn record(&mut self, event: SinkEvent) {
        if self.recording {
            self.events.push(event);
        }
    }

    fn slot_mut(&mut self, slot: SlotId) -> &mut (SlotStatus, Option<PcmBuffer>) {
        if self.slots.len() <= slot {
            self.slots.resize_with(slot + 1, || (SlotStatus::Idle, None));
        }
        &mut self.slots[slot]
    }
}

/// Observer side of a [`SimulatedSink`], kept by tests after the sink moves away.
#[derive(Clone)]
pub struct SimProbe {
    state: Arc<Mutex<SimState>>,
}

impl SimProbe {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.state.lock().unwrap().events.clone()
    }

    /// Every sample that reached "the speaker", in order.
    pub fn played(&self) -> Vec<i16> {
        self.state.lock().unwrap().played.clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().unwrap().violations.clone()
    }

    /// Make the next `open_channel` fail with `reason`.
    pub fn fail_next_open(&self, reason: &str) {
        self.state.lock().unwrap().fail_open = Some(reason.to_string());
    }

    /// Keep the sink from reporting playback start. Releasing starts any queued audio.
    pub fn hold_start(&self, hold: bool) {
        let mut st = self.state.lock().unwrap();
        st.hold_start = hold;
        if !hold && st.open && !st.queue.is_empty() {
            st.started = true;
        }
    }
}

/// Output that plays instantly.
pub struct SimulatedSink {
    state: Arc<Mutex<SimState>>,
    paused: Arc<AtomicBool>,
}

impl SimulatedSink {
    /// Sink that discards audio without keeping a history.
    pub fn new() -> Self {
        Self::with_recording(false)
    }

    /// Sink that logs every operation and played sample, for inspection via [`SimProbe`].
    pub fn recording() -> Self {
        Self::with_recording(true)
    }

    fn with_recording(recording: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                recording,
                ..SimState::default()
            })),
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn probe(&self) -> SimProbe {
        SimProbe {
            state: self.state.clone(),
        }
    }
}

impl Default for SimulatedSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for SimulatedSink {
    fn open_channel(&mut self, rate: u32, channels: u8) -> Result<(), PlaybackError> {
        let mut st = self.state.lock().unwrap();
        if let Some(reason) = st.fail_open.take() {
            return Err(PlaybackError::AudioInitFailed(reason));
        }
        if st.open {
            st.violations.push("open while already open".to_string());
        }
        st.open = true;
        st.started = false;
        st.slots.clear();
        st.queue.clear();
        st.record(SinkEvent::Open { rate, channels });
        self.paused.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn reset_channel(&mut self) {
        let mut st = self.state.lock().unwrap();
        st.queue.clear();
        st.slots.clear();
        st.started = false;
        st.record(SinkEvent::Reset);
    }

    fn submit(&mut self, slot: SlotId, buffer: PcmBuffer) {
        let mut st = self.state.lock().unwrap();
        if !st.open {
            st.violations.push(format!("submit slot {slot} on closed channel"));
        }
        let len = buffer.len;
        let entry = st.slot_mut(slot);
        let busy = entry.0 != SlotStatus::Idle;
        *entry = (SlotStatus::Queued, Some(buffer));
        if busy {
            st.violations.push(format!("submit slot {slot} while still owned by sink"));
        }
        st.queue.push_back(slot);
        st.record(SinkEvent::Submit { slot, len });
        if !st.hold_start {
            st.started = true;
        }
    }

    fn status(&self, slot: SlotId) -> SlotStatus {
        let st = self.state.lock().unwrap();
        st.slots.get(slot).map(|s| s.0).unwrap_or(SlotStatus::Idle)
    }

    fn reclaim(&mut self, slot: SlotId) -> Option<PcmBuffer> {
        let mut st = self.state.lock().unwrap();
        let entry = st.slot_mut(slot);
        if entry.0 != SlotStatus::Done {
            let status = entry.0;
            st.violations.push(format!("reclaim slot {slot} in state {status:?}"));
            return None;
        }
        let buffer = entry.1.take();
        entry.0 = SlotStatus::Idle;
        st.record(SinkEvent::Reclaim { slot });
        buffer
    }

    fn pause_handle(&self) -> Arc<AtomicBool> {
        self.paused.clone()
    }

    fn is_playing(&self) -> bool {
        let st = self.state.lock().unwrap();
        st.open && st.started
    }

    fn wait(&mut self, timeout: Duration) {
        if self.paused.load(Ordering::Relaxed) {
            std::thread::sleep(timeout);
            return;
        }
        let mut st = self.state.lock().unwrap();
        if !st.started {
            drop(st);
            std::thread::sleep(timeout);
            return;
        }
        let Some(slot) = st.queue.pop_front() else {
            drop(st);
            std::thread::sleep(timeout);
            return;
        };
        if st.recording {
            let samples = st
                .slots
                .get(slot)
                .and_then(|s| s.1.as_ref())
                .map(|b| b.filled().to_vec())
                .unwrap_or_default();
            st.played.extend_from_slice(&samples);
        }
        st.slot_mut(slot).0 = SlotStatus::Done;
        st.record(SinkEvent::Done { slot });
    }

    fn close_channel(&mut self) {
        let mut st = self.state.lock().unwrap();
        st.open = false;
        st.started = false;
        st.queue.clear();
        st.slots.clear();
        st.record(SinkEvent::Close);
    }
}

/// Calls seen by a [`ScriptedDecoder`].
#[derive(Clone, Debug, Default)]
pub struct DecoderTrace {
    /// `(capacity, returned)` per decode call; `returned` is `None` for an error.
    pub calls: Vec<(usize, Option<usize>)>,
    pub shutdowns: usize,
}

/// Decoder that replays a fixed interleaved sample sequence.
pub struct ScriptedDecoder {
    samples: Vec<i16>,
    pos: usize,
    rate: u32,
    channels: u8,
    buffer_samples: usize,
    /// Fail on this call index (0-based) instead of returning data.
    fail_at: Option<usize>,
    trace: Arc<Mutex<DecoderTrace>>,
}

impl ScriptedDecoder {
    pub fn new(samples: Vec<i16>, rate: u32, channels: u8, buffer_samples: usize) -> Self {
        Self {
            samples,
            pos: 0,
            rate,
            channels,
            buffer_samples,
            fail_at: None,
            trace: Arc::new(Mutex::new(DecoderTrace::default())),
        }
    }

    pub fn failing_at(mut self, call: usize) -> Self {
        self.fail_at = Some(call);
        self
    }

    pub fn trace(&self) -> Arc<Mutex<DecoderTrace>> {
        self.trace.clone()
    }
}

impl Decoder for ScriptedDecoder {
    fn file_type(&self) -> FileType {
        FileType::Wav
    }

    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn channels(&self) -> u8 {
        self.channels
    }

    fn recommended_buffer_size(&self) -> usize {
        self.buffer_samples
    }

    fn decode(&mut self, buf: &mut [i16]) -> Result<usize, DecodeError> {
        let mut trace = self.trace.lock().unwrap();
        let call = trace.calls.len();
        if self.fail_at == Some(call) {
            trace.calls.push((buf.len(), None));
            return Err(DecodeError(format!("scripted failure on call {call}")));
        }
        let channels = usize::from(self.channels.max(1));
        let usable = buf.len() - buf.len() % channels;
        let n = usable.min(self.samples.len() - self.pos);
        buf[..n].copy_from_slice(&self.samples[self.pos..self.pos + n]);
        self.pos += n;
        trace.calls.push((buf.len(), Some(n)));
        Ok(n)
    }

    fn total_samples(&self) -> Option<u64> {
        Some(self.samples.len() as u64)
    }

    fn shutdown(self: Box<Self>) {
        self.trace.lock().unwrap().shutdowns += 1;
    }
}
