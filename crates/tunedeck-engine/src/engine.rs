//! Playback engine.
//!
//! One call to [`run_session`] is one playback session on the calling thread:
//! classify the file, open its decoder and the output channel, prime every slot,
//! then keep refilling whichever slot the sink reports done until end of stream or
//! a stop request. Teardown always runs in full and the outcome is signalled once.
//!
//! A slot is refilled only after the sink hands its buffer back through
//! [`AudioSink::reclaim`], which it does only for slots it has finished playing.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tunedeck_types::{EngineState, SessionOutcome, StopReason};

use crate::config::EngineConfig;
use crate::decoder::{Decoder, open_decoder};
use crate::error::PlaybackError;
use crate::sink::{AudioSink, PcmBuffer, SlotId, SlotStatus};
use crate::sniff;
use crate::status::SessionStatus;
use crate::watchdog::OutcomeSignal;

/// State shared between the engine thread and its controller.
pub struct SessionContext {
    /// Set by the controller to request a stop.
    pub stop: Arc<AtomicBool>,
    pub status: Arc<Mutex<SessionStatus>>,
    pub signal: OutcomeSignal,
}

/// Play `path` to completion on `sink`.
pub fn run_session<S: AudioSink + ?Sized>(
    sink: &mut S,
    path: &Path,
    cfg: &EngineConfig,
    ctx: SessionContext,
) -> SessionOutcome {
    let label = path.display().to_string();
    update(&ctx.status, |s| s.begin(&label));
    tracing::info!(path = %label, "session starting");

    let decoder = sniff::classify(path).and_then(|file_type| {
        tracing::info!(path = %label, file_type = %file_type, "format classified");
        update(&ctx.status, |s| s.file_type = Some(file_type));
        open_decoder(file_type, path)
    });
    match decoder {
        Ok(decoder) => play_decoder(sink, decoder, cfg, ctx),
        Err(err) => fail(err, ctx),
    }
}

/// Play an already opened decoder. The decoder is shut down before returning.
pub fn play_decoder<S: AudioSink + ?Sized>(
    sink: &mut S,
    decoder: Box<dyn Decoder>,
    cfg: &EngineConfig,
    ctx: SessionContext,
) -> SessionOutcome {
    let rate = decoder.sample_rate();
    let channels = decoder.channels();
    if !(1..=2).contains(&channels) {
        decoder.shutdown();
        return fail(PlaybackError::UnsupportedChannelCount(channels), ctx);
    }
    if let Err(err) = sink.open_channel(rate, channels) {
        decoder.shutdown();
        return fail(err, ctx);
    }
    sink.reset_channel();

    let slot_count = cfg.effective_slots();
    let slot_samples = cfg.slot_samples(decoder.recommended_buffer_size(), channels);
    let total_samples = decoder.total_samples();
    let file_type = decoder.file_type();
    update(&ctx.status, |s| {
        s.file_type = Some(file_type);
        s.sample_rate = Some(rate);
        s.channels = Some(channels);
        s.total_samples = total_samples;
        s.slot_count = Some(slot_count);
        s.buffer_samples = Some(slot_samples);
        s.paused_flag = Some(sink.pause_handle());
    });
    tracing::info!(
        rate_hz = rate,
        channels,
        slot_count,
        slot_samples,
        "source opened"
    );

    let status = ctx.status.clone();
    let mut engine = Engine {
        sink,
        decoder,
        status: &status,
        slots: (0..slot_count).map(|_| None).collect(),
        usable: slot_samples,
        last_buffer: false,
        decode_failed: false,
    };

    // Prime every slot before playback starts.
    let mut submitted_any = false;
    for slot in 0..slot_count {
        if engine.last_buffer {
            engine.slots[slot] = Some(PcmBuffer::with_capacity(slot_samples));
            continue;
        }
        submitted_any |= engine.refill(slot, PcmBuffer::with_capacity(slot_samples));
    }

    if submitted_any {
        engine.wait_started(cfg, &ctx.stop);
    }
    update(&ctx.status, |s| s.state = EngineState::Streaming);

    let reason = engine.stream(cfg, &ctx.stop);
    engine.teardown(reason, ctx)
}

struct Engine<'a, S: AudioSink + ?Sized> {
    sink: &'a mut S,
    decoder: Box<dyn Decoder>,
    status: &'a Mutex<SessionStatus>,
    /// Buffers currently owned by the engine, per slot.
    slots: Vec<Option<PcmBuffer>>,
    usable: usize,
    last_buffer: bool,
    decode_failed: bool,
}

impl<S: AudioSink + ?Sized> Engine<'_, S> {
    /// Decode into `buf` and submit it. Returns `true` if the slot was submitted.
    fn refill(&mut self, slot: SlotId, mut buf: PcmBuffer) -> bool {
        let capacity = buf.capacity().min(self.usable);
        match self.decoder.decode(&mut buf.samples[..capacity]) {
            Ok(0) => {
                tracing::debug!(slot, "end of stream");
                buf.len = 0;
                self.slots[slot] = Some(buf);
                self.mark_last();
                false
            }
            Ok(n) => {
                let n = n.min(capacity);
                buf.len = n;
                tracing::debug!(slot, samples = n, "slot refilled");
                self.sink.prepare(&buf);
                self.sink.submit(slot, buf);
                if n < capacity {
                    self.mark_last();
                }
                true
            }
            Err(e) => {
                tracing::warn!(slot, "{e}; draining");
                update(self.status, |s| s.decode_errors += 1);
                self.decode_failed = true;
                buf.len = 0;
                self.slots[slot] = Some(buf);
                self.mark_last();
                false
            }
        }
    }

    fn mark_last(&mut self) {
        if !self.last_buffer {
            self.last_buffer = true;
            self.sink.finish();
        }
    }

    /// Bounded wait for the sink to start consuming the primed slots.
    fn wait_started(&mut self, cfg: &EngineConfig, stop: &AtomicBool) {
        let deadline = Instant::now() + cfg.start_timeout;
        while !self.sink.is_playing() {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    timeout_ms = cfg.start_timeout.as_millis() as u64,
                    "output did not report start; continuing"
                );
                return;
            }
            std::thread::sleep(cfg.poll_interval);
        }
    }

    fn all_slots_settled(&self) -> bool {
        (0..self.slots.len()).all(|slot| self.sink.status(slot) != SlotStatus::Queued)
    }

    /// Reclaim a done slot and count what it played.
    fn take_done(&mut self, slot: SlotId) -> Option<PcmBuffer> {
        let buf = self.sink.reclaim(slot)?;
        let played = buf.len as u64;
        update(self.status, |s| s.samples_played += played);
        Some(buf)
    }

    /// Steady-state refill loop. Returns why streaming ended.
    fn stream(&mut self, cfg: &EngineConfig, stop: &AtomicBool) -> StopReason {
        let mut was_paused = false;
        loop {
            self.sink.wait(cfg.poll_interval);

            if stop.load(Ordering::Relaxed) {
                return StopReason::Requested;
            }
            if self.last_buffer && self.all_slots_settled() {
                return if self.decode_failed {
                    StopReason::DecodeFailed
                } else {
                    StopReason::EndOfStream
                };
            }

            let paused = self.sink.is_paused();
            if paused != was_paused {
                was_paused = paused;
                tracing::info!(paused, "pause toggled");
                update(self.status, |s| {
                    s.state = if paused {
                        EngineState::Paused
                    } else {
                        EngineState::Streaming
                    }
                });
            }
            if paused || self.last_buffer {
                continue;
            }

            for slot in 0..self.slots.len() {
                if self.last_buffer {
                    break;
                }
                if self.sink.status(slot) != SlotStatus::Done {
                    continue;
                }
                if let Some(buf) = self.take_done(slot) {
                    self.refill(slot, buf);
                }
            }
        }
    }

    fn teardown(mut self, reason: StopReason, ctx: SessionContext) -> SessionOutcome {
        update(self.status, |s| s.state = EngineState::Draining);
        tracing::info!(?reason, "draining");

        for slot in 0..self.slots.len() {
            if self.sink.status(slot) == SlotStatus::Done {
                if let Some(buf) = self.take_done(slot) {
                    self.slots[slot] = Some(buf);
                }
            }
        }

        let Engine {
            sink,
            decoder,
            slots,
            ..
        } = self;
        decoder.shutdown();
        sink.close_channel();
        drop(slots);

        let outcome = SessionOutcome::Stopped(reason);
        finish(outcome, EngineState::Stopped, ctx)
    }
}

fn fail(err: PlaybackError, ctx: SessionContext) -> SessionOutcome {
    tracing::warn!("session failed: {err}");
    finish(err.into_outcome(), EngineState::Error, ctx)
}

fn finish(outcome: SessionOutcome, state: EngineState, mut ctx: SessionContext) -> SessionOutcome {
    update(&ctx.status, |s| {
        s.state = state;
        s.last_outcome = Some(outcome.clone());
        s.paused_flag = None;
    });
    tracing::info!(?outcome, "session ended");
    ctx.signal.signal(outcome.clone());
    outcome
}

fn update(status: &Mutex<SessionStatus>, f: impl FnOnce(&mut SessionStatus)) {
    if let Ok(mut s) = status.lock() {
        f(&mut s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tunedeck_types::ErrorCode;

    use crate::decoder::tests::write_wav;
    use crate::sim::{ScriptedDecoder, SimProbe, SimulatedSink, SinkEvent};
    use crate::watchdog::Watchdog;

    fn cfg(slots: usize) -> EngineConfig {
        EngineConfig {
            slot_count: slots,
            poll_interval: Duration::from_micros(100),
            start_timeout: Duration::from_secs(5),
            buffer_samples: None,
        }
    }

    fn ctx(wd: &Watchdog) -> (SessionContext, Arc<Mutex<SessionStatus>>, Arc<AtomicBool>) {
        let status = SessionStatus::shared();
        let stop = Arc::new(AtomicBool::new(false));
        (
            SessionContext {
                stop: stop.clone(),
                status: status.clone(),
                signal: wd.signal(),
            },
            status,
            stop,
        )
    }

    fn ramp(len: usize) -> Vec<i16> {
        (0..len).map(|i| (i % 30_000) as i16).collect()
    }

    fn submits(events: &[SinkEvent]) -> Vec<usize> {
        events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Submit { len, .. } => Some(*len),
                _ => None,
            })
            .collect()
    }

    /// Every submit after a slot's first must follow a Done and a Reclaim of that slot.
    fn assert_exclusive(probe: &SimProbe) {
        assert!(probe.violations().is_empty(), "{:?}", probe.violations());
        let mut owned_by_sink = std::collections::HashMap::new();
        let mut done = std::collections::HashSet::new();
        for event in probe.events() {
            match event {
                SinkEvent::Submit { slot, .. } => {
                    assert!(!owned_by_sink.get(&slot).copied().unwrap_or(false), "slot {slot} refilled while in flight");
                    owned_by_sink.insert(slot, true);
                    done.remove(&slot);
                }
                SinkEvent::Done { slot } => {
                    done.insert(slot);
                }
                SinkEvent::Reclaim { slot } => {
                    assert!(done.contains(&slot), "slot {slot} reclaimed before done");
                    owned_by_sink.insert(slot, false);
                }
                _ => {}
            }
        }
    }

    #[test]
    fn two_second_mono_clip_plays_in_four_full_slots() {
        let wd = Watchdog::new();
        let (ctx, status, _) = ctx(&wd);
        let mut sink = SimulatedSink::recording();
        let probe = sink.probe();
        let samples = ramp(16_000);
        let decoder = ScriptedDecoder::new(samples.clone(), 8_000, 1, 4_000);
        let trace = decoder.trace();

        let outcome = play_decoder(&mut sink, Box::new(decoder), &cfg(2), ctx);

        assert_eq!(outcome, SessionOutcome::Stopped(StopReason::EndOfStream));
        let returned: Vec<usize> = trace
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(_, r)| r.unwrap())
            .collect();
        assert_eq!(returned, vec![4_000, 4_000, 4_000, 4_000, 0]);
        assert_eq!(trace.lock().unwrap().shutdowns, 1);
        assert_eq!(probe.played(), samples);
        assert_exclusive(&probe);

        assert_eq!(wd.try_recv(), Some(SessionOutcome::Stopped(StopReason::EndOfStream)));
        assert_eq!(wd.try_recv(), None);

        let st = status.lock().unwrap();
        assert_eq!(st.state, EngineState::Stopped);
        assert_eq!(st.samples_played, 16_000);
    }

    #[test]
    fn wav_file_plays_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let samples = ramp(16_000);
        let path = write_wav(dir.path(), "clip.wav", 1, 8_000, &samples);
        let wd = Watchdog::new();
        let (ctx, status, _) = ctx(&wd);
        let mut sink = SimulatedSink::recording();
        let probe = sink.probe();
        let config = EngineConfig {
            buffer_samples: Some(4_000),
            ..cfg(2)
        };

        let outcome = run_session(&mut sink, &path, &config, ctx);

        assert_eq!(outcome, SessionOutcome::Stopped(StopReason::EndOfStream));
        assert_eq!(probe.played(), samples);
        assert_eq!(submits(&probe.events()), vec![4_000; 4]);
        assert_eq!(probe.events().first(), Some(&SinkEvent::Open { rate: 8_000, channels: 1 }));
        assert_eq!(probe.events().get(1), Some(&SinkEvent::Reset));
        assert_eq!(probe.events().last(), Some(&SinkEvent::Close));
        let snap = status.lock().unwrap().snapshot();
        assert_eq!(snap.elapsed_ms, Some(2_000));
        assert_eq!(snap.duration_ms, Some(2_000));
    }

    #[test]
    fn short_tail_is_submitted_exactly_and_nothing_follows() {
        let wd = Watchdog::new();
        let (ctx, _, _) = ctx(&wd);
        let mut sink = SimulatedSink::recording();
        let probe = sink.probe();
        let samples = ramp(10_500);
        let decoder = ScriptedDecoder::new(samples.clone(), 8_000, 1, 4_000);
        let trace = decoder.trace();

        let outcome = play_decoder(&mut sink, Box::new(decoder), &cfg(2), ctx);

        assert_eq!(outcome, SessionOutcome::Stopped(StopReason::EndOfStream));
        assert_eq!(submits(&probe.events()), vec![4_000, 4_000, 2_500]);
        assert_eq!(trace.lock().unwrap().calls.len(), 3);
        assert_eq!(probe.played(), samples);

        // The session closes only after the tail slot played.
        let events = probe.events();
        let tail_submit = events
            .iter()
            .position(|e| matches!(e, SinkEvent::Submit { len: 2_500, .. }))
            .unwrap();
        let tail_done = events
            .iter()
            .skip(tail_submit)
            .position(|e| matches!(e, SinkEvent::Done { .. }))
            .map(|p| p + tail_submit)
            .unwrap();
        let close = events.iter().position(|e| *e == SinkEvent::Close).unwrap();
        assert!(tail_done < close);
        assert_exclusive(&probe);
    }

    #[test]
    fn slots_are_never_refilled_in_flight_with_three_slots() {
        let wd = Watchdog::new();
        let (ctx, _, _) = ctx(&wd);
        let mut sink = SimulatedSink::recording();
        let probe = sink.probe();
        let samples = ramp(44_100);
        let decoder = ScriptedDecoder::new(samples.clone(), 44_100, 2, 1_000);

        let outcome = play_decoder(&mut sink, Box::new(decoder), &cfg(3), ctx);

        assert_eq!(outcome, SessionOutcome::Stopped(StopReason::EndOfStream));
        assert_eq!(probe.played(), samples);
        assert_exclusive(&probe);
        assert!(submits(&probe.events()).iter().all(|n| n % 2 == 0));
    }

    #[test]
    fn pause_holds_slots_and_resume_continues_without_loss() {
        let wd = Watchdog::new();
        let (ctx, _, _) = ctx(&wd);
        let sink = SimulatedSink::recording();
        let probe = sink.probe();
        let paused = sink.pause_handle();
        probe.hold_start(true);

        let samples = ramp(40_000);
        let decoder = ScriptedDecoder::new(samples.clone(), 8_000, 1, 4_000);
        let trace = decoder.trace();
        let handle = std::thread::spawn(move || {
            let mut sink = sink;
            play_decoder(&mut sink, Box::new(decoder), &cfg(2), ctx)
        });

        while submits(&probe.events()).len() < 2 {
            std::thread::sleep(Duration::from_millis(1));
        }
        paused.store(true, Ordering::Relaxed);
        probe.hold_start(false);

        std::thread::sleep(Duration::from_millis(50));
        let calls_while_paused = trace.lock().unwrap().calls.len();
        let events_while_paused = probe.events().len();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(trace.lock().unwrap().calls.len(), calls_while_paused);
        assert_eq!(probe.events().len(), events_while_paused);
        assert!(!probe.events().iter().any(|e| matches!(e, SinkEvent::Done { .. })));

        paused.store(false, Ordering::Relaxed);
        let outcome = handle.join().unwrap();
        assert_eq!(outcome, SessionOutcome::Stopped(StopReason::EndOfStream));
        assert_eq!(probe.played(), samples);
        assert_exclusive(&probe);
    }

    #[test]
    fn stop_request_drains_and_tears_down() {
        let wd = Watchdog::new();
        let (ctx, status, stop) = ctx(&wd);
        let mut sink = SimulatedSink::recording();
        let probe = sink.probe();
        let decoder = ScriptedDecoder::new(ramp(100_000), 8_000, 1, 1_000);
        let trace = decoder.trace();
        stop.store(true, Ordering::Relaxed);

        let outcome = play_decoder(&mut sink, Box::new(decoder), &cfg(2), ctx);

        assert_eq!(outcome, SessionOutcome::Stopped(StopReason::Requested));
        assert_eq!(trace.lock().unwrap().shutdowns, 1);
        assert_eq!(probe.events().last(), Some(&SinkEvent::Close));
        assert!(!sink.is_playing());
        assert_eq!(wd.try_recv(), Some(outcome));
        assert_eq!(status.lock().unwrap().state, EngineState::Stopped);
    }

    #[test]
    fn decode_error_drains_like_end_of_stream() {
        let wd = Watchdog::new();
        let (ctx, status, _) = ctx(&wd);
        let mut sink = SimulatedSink::recording();
        let probe = sink.probe();
        let samples = ramp(20_000);
        let decoder = ScriptedDecoder::new(samples.clone(), 8_000, 1, 4_000).failing_at(2);
        let trace = decoder.trace();

        let outcome = play_decoder(&mut sink, Box::new(decoder), &cfg(2), ctx);

        assert_eq!(outcome, SessionOutcome::Stopped(StopReason::DecodeFailed));
        assert!(!outcome.is_error());
        assert_eq!(probe.played(), samples[..8_000].to_vec());
        assert_eq!(trace.lock().unwrap().calls.len(), 3);
        assert_eq!(trace.lock().unwrap().shutdowns, 1);
        assert_eq!(status.lock().unwrap().decode_errors, 1);
        assert_exclusive(&probe);
    }

    #[test]
    fn unsupported_channel_count_fails_before_opening_output() {
        let wd = Watchdog::new();
        let (ctx, status, _) = ctx(&wd);
        let mut sink = SimulatedSink::recording();
        let probe = sink.probe();
        let decoder = ScriptedDecoder::new(ramp(600), 48_000, 6, 600);
        let trace = decoder.trace();

        let outcome = play_decoder(&mut sink, Box::new(decoder), &cfg(2), ctx);

        assert_eq!(
            outcome,
            SessionOutcome::Failed {
                code: ErrorCode::UnsupportedChannelCount,
                detail: Some("6 channels".to_string()),
            }
        );
        assert!(probe.events().is_empty());
        assert_eq!(trace.lock().unwrap().shutdowns, 1);
        assert!(trace.lock().unwrap().calls.is_empty());
        assert_eq!(status.lock().unwrap().state, EngineState::Error);
        assert!(wd.try_recv().unwrap().is_error());
    }

    #[test]
    fn output_init_failure_is_local_to_the_session() {
        let wd = Watchdog::new();
        let mut sink = SimulatedSink::recording();
        let probe = sink.probe();
        probe.fail_next_open("device busy");

        let (first, _, _) = ctx(&wd);
        let decoder = ScriptedDecoder::new(ramp(8_000), 8_000, 1, 4_000);
        let trace = decoder.trace();
        let outcome = play_decoder(&mut sink, Box::new(decoder), &cfg(2), first);
        assert!(matches!(
            outcome,
            SessionOutcome::Failed {
                code: ErrorCode::AudioInitFailed,
                ..
            }
        ));
        assert_eq!(trace.lock().unwrap().shutdowns, 1);
        assert!(wd.try_recv().is_some());

        let (second, _, _) = ctx(&wd);
        let outcome = play_decoder(
            &mut sink,
            Box::new(ScriptedDecoder::new(ramp(8_000), 8_000, 1, 4_000)),
            &cfg(2),
            second,
        );
        assert_eq!(outcome, SessionOutcome::Stopped(StopReason::EndOfStream));
    }

    #[test]
    fn empty_stream_stops_without_submitting() {
        let wd = Watchdog::new();
        let (ctx, _, _) = ctx(&wd);
        let mut sink = SimulatedSink::recording();
        let probe = sink.probe();
        let decoder = ScriptedDecoder::new(Vec::new(), 8_000, 2, 4_000);

        let started = Instant::now();
        let outcome = play_decoder(&mut sink, Box::new(decoder), &cfg(2), ctx);

        assert_eq!(outcome, SessionOutcome::Stopped(StopReason::EndOfStream));
        assert!(submits(&probe.events()).is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn unknown_and_missing_files_fail_with_distinct_codes() {
        let dir = tempfile::tempdir().unwrap();
        let junk = dir.path().join("notes.txt");
        std::fs::write(&junk, b"hello world, not audio").unwrap();
        let wd = Watchdog::new();
        let mut sink = SimulatedSink::recording();
        let probe = sink.probe();

        let (first, _, _) = ctx(&wd);
        let outcome = run_session(&mut sink, &junk, &cfg(2), first);
        assert!(matches!(
            outcome,
            SessionOutcome::Failed {
                code: ErrorCode::UnsupportedFileType,
                ..
            }
        ));
        wd.drain_stale();

        let (second, _, _) = ctx(&wd);
        let outcome = run_session(&mut sink, &dir.path().join("missing.flac"), &cfg(2), second);
        assert!(matches!(
            outcome,
            SessionOutcome::Failed {
                code: ErrorCode::Io { os_error: Some(_) },
                ..
            }
        ));
        assert!(probe.events().is_empty());
    }

    #[test]
    fn sid_tune_is_classified_but_not_playable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tune.sid");
        std::fs::write(&path, b"PSID\x00\x02\x00\x7c").unwrap();
        let wd = Watchdog::new();
        let (ctx, status, _) = ctx(&wd);
        let mut sink = SimulatedSink::recording();

        let outcome = run_session(&mut sink, &path, &cfg(2), ctx);
        assert!(matches!(
            outcome,
            SessionOutcome::Failed {
                code: ErrorCode::UnsupportedFileType,
                ..
            }
        ));
        assert_eq!(
            status.lock().unwrap().file_type,
            Some(tunedeck_types::FileType::Sid)
        );
    }
}
