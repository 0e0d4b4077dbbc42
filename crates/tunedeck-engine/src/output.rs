//! CPAL-backed output channel.
//!
//! `cpal::Stream` is not `Send`, so each open channel gets an owner thread that
//! builds the stream, starts it, and keeps it alive until the channel closes. The
//! sink itself only holds the shared [`SlotRing`], which keeps it movable between
//! engine threads.
//!
//! The callback:
//! - drains the ring without blocking
//! - maps mono/stereo to the device layout
//! - writes silence when paused or starved, without draining while paused

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, bounded};

use crate::config::OutputConfig;
use crate::device;
use crate::error::PlaybackError;
use crate::resample::StreamResampler;
use crate::ring::SlotRing;
use crate::sink::{AudioSink, PcmBuffer, SlotId, SlotStatus};

const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Device-side facts reported by the owner thread once the stream runs.
#[derive(Clone, Debug)]
struct StreamInfo {
    device: String,
    rate: u32,
    channels: usize,
    sample_format: cpal::SampleFormat,
}

struct OpenChannel {
    ring: Arc<SlotRing>,
    close_tx: Sender<()>,
    owner: JoinHandle<()>,
    resampler: Option<StreamResampler>,
    /// Reused `f32` staging buffers.
    convert: Vec<f32>,
    resampled: Vec<f32>,
}

/// Output channel on a CPAL device.
pub struct CpalSink {
    cfg: OutputConfig,
    paused: Arc<AtomicBool>,
    interpolate: bool,
    slots: Vec<(SlotStatus, Option<PcmBuffer>)>,
    channel: Option<OpenChannel>,
    src_rate: u32,
    src_channels: usize,
}

impl CpalSink {
    pub fn new(cfg: OutputConfig) -> Self {
        Self {
            cfg,
            paused: Arc::new(AtomicBool::new(false)),
            interpolate: true,
            slots: Vec::new(),
            channel: None,
            src_rate: 0,
            src_channels: 0,
        }
    }

    fn slot_mut(&mut self, slot: SlotId) -> &mut (SlotStatus, Option<PcmBuffer>) {
        if self.slots.len() <= slot {
            self.slots.resize_with(slot + 1, || (SlotStatus::Idle, None));
        }
        &mut self.slots[slot]
    }
}

impl AudioSink for CpalSink {
    fn open_channel(&mut self, rate: u32, channels: u8) -> Result<(), PlaybackError> {
        if self.channel.is_some() {
            self.close_channel();
        }
        let src_channels = usize::from(channels.max(1));
        let ring = Arc::new(SlotRing::new(src_channels));
        let (ready_tx, ready_rx) = bounded::<Result<StreamInfo, String>>(1);
        let (close_tx, close_rx) = bounded::<()>(1);

        let owner = {
            let ring = ring.clone();
            let paused = self.paused.clone();
            let cfg = self.cfg.clone();
            thread::Builder::new()
                .name("tunedeck-output".to_string())
                .spawn(move || run_stream_owner(cfg, rate, ring, paused, ready_tx, close_rx))
                .map_err(|e| PlaybackError::AudioInitFailed(format!("spawn output thread: {e}")))?
        };

        let info = match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(info)) => info,
            Ok(Err(msg)) => {
                let _ = owner.join();
                return Err(PlaybackError::AudioInitFailed(msg));
            }
            Err(_) => {
                let _ = close_tx.send(());
                return Err(PlaybackError::AudioInitFailed(
                    "output stream did not start".to_string(),
                ));
            }
        };

        let resampler = if info.rate != rate {
            Some(
                StreamResampler::new(rate, info.rate, src_channels, self.cfg.chunk_frames, self.interpolate)
                    .map_err(|e| PlaybackError::AudioInitFailed(format!("{e:#}")))?,
            )
        } else {
            tracing::info!(rate_hz = rate, "resample skipped");
            None
        };

        tracing::info!(
            device = %info.device,
            rate_hz = info.rate,
            device_channels = info.channels,
            source_channels = src_channels,
            format = ?info.sample_format,
            "output channel open"
        );

        self.paused.store(false, Ordering::Relaxed);
        self.slots.clear();
        self.src_rate = rate;
        self.src_channels = src_channels;
        self.channel = Some(OpenChannel {
            ring,
            close_tx,
            owner,
            resampler,
            convert: Vec::new(),
            resampled: Vec::new(),
        });
        Ok(())
    }

    fn reset_channel(&mut self) {
        if let Some(ch) = &mut self.channel {
            ch.ring.clear();
            if let Some(rs) = ch.resampler.as_mut() {
                // Drop carried input; the output is discarded.
                let _ = rs.flush(&mut Vec::new());
            }
        }
        self.slots.clear();
    }

    fn set_interpolation(&mut self, enabled: bool) {
        self.interpolate = enabled;
    }

    fn submit(&mut self, slot: SlotId, buffer: PcmBuffer) {
        let mut pending = None;
        if let Some(ch) = &mut self.channel {
            ch.convert.clear();
            ch.convert.extend(
                buffer
                    .filled()
                    .iter()
                    .map(|s| <f32 as cpal::Sample>::from_sample::<i16>(*s)),
            );
            match ch.resampler.as_mut() {
                Some(rs) => {
                    ch.resampled.clear();
                    if let Err(e) = rs.process(&ch.convert, &mut ch.resampled) {
                        tracing::warn!("resample failed, slot dropped: {e:#}");
                        ch.resampled.clear();
                    }
                    ch.ring.push_slot(slot, &ch.resampled);
                }
                None => ch.ring.push_slot(slot, &ch.convert),
            }
            pending = Some(SlotStatus::Queued);
        } else {
            tracing::warn!(slot, "submit on closed output channel");
        }
        *self.slot_mut(slot) = (pending.unwrap_or(SlotStatus::Idle), Some(buffer));
    }

    fn finish(&mut self) {
        if let Some(ch) = &mut self.channel {
            if let Some(rs) = ch.resampler.as_mut() {
                ch.resampled.clear();
                match rs.flush(&mut ch.resampled) {
                    Ok(()) => ch.ring.push_tail(&ch.resampled),
                    Err(e) => tracing::warn!("resampler flush failed: {e:#}"),
                }
            }
        }
    }

    fn status(&self, slot: SlotId) -> SlotStatus {
        match self.slots.get(slot) {
            Some((SlotStatus::Queued, _)) => match &self.channel {
                Some(ch) if ch.ring.is_slot_done(slot) => SlotStatus::Done,
                _ => SlotStatus::Queued,
            },
            Some((status, _)) => *status,
            None => SlotStatus::Idle,
        }
    }

    fn reclaim(&mut self, slot: SlotId) -> Option<PcmBuffer> {
        if self.status(slot) != SlotStatus::Done {
            return None;
        }
        if let Some(ch) = &self.channel {
            ch.ring.clear_done(slot);
        }
        let entry = self.slot_mut(slot);
        entry.0 = SlotStatus::Idle;
        entry.1.take()
    }

    fn pause_handle(&self) -> Arc<AtomicBool> {
        self.paused.clone()
    }

    fn is_playing(&self) -> bool {
        self.channel
            .as_ref()
            .map(|ch| ch.ring.is_started())
            .unwrap_or(false)
    }

    fn wait(&mut self, timeout: Duration) {
        match &self.channel {
            Some(ch) if !self.paused.load(Ordering::Relaxed) => {
                ch.ring.wait_progress(timeout);
            }
            _ => thread::sleep(timeout),
        }
    }

    fn close_channel(&mut self) {
        if let Some(ch) = self.channel.take() {
            let _ = ch.close_tx.send(());
            if ch.owner.join().is_err() {
                tracing::warn!("output thread panicked");
            }
            tracing::info!(
                rate_hz = self.src_rate,
                channels = self.src_channels,
                "output channel closed"
            );
        }
        self.slots.clear();
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close_channel();
    }
}

/// Owner thread: builds and runs the stream until told to close.
fn run_stream_owner(
    cfg: OutputConfig,
    rate: u32,
    ring: Arc<SlotRing>,
    paused: Arc<AtomicBool>,
    ready_tx: Sender<Result<StreamInfo, String>>,
    close_rx: Receiver<()>,
) {
    let stream = match build_stream_for(&cfg, rate, &ring, &paused) {
        Ok((stream, info)) => {
            let _ = ready_tx.send(Ok(info));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(format!("{e:#}")));
            return;
        }
    };
    let _ = close_rx.recv();
    if let Err(e) = stream.pause() {
        tracing::debug!("stream pause on close: {e}");
    }
    drop(stream);
}

fn build_stream_for(
    cfg: &OutputConfig,
    rate: u32,
    ring: &Arc<SlotRing>,
    paused: &Arc<AtomicBool>,
) -> Result<(cpal::Stream, StreamInfo)> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, cfg.device.as_deref())?;
    let supported = device::pick_output_config(&device, Some(rate))?;
    let mut stream_config: cpal::StreamConfig = supported.config();
    if let Some(size) = device::pick_buffer_size(&supported) {
        stream_config.buffer_size = size;
    }
    let sample_format = supported.sample_format();

    let stream = build_output_stream(
        &device,
        &stream_config,
        sample_format,
        ring,
        paused,
        cfg.refill_max_frames,
    )?;
    stream.play()?;

    let name = device
        .description()
        .map(|d| d.name().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    Ok((
        stream,
        StreamInfo {
            device: name,
            rate: stream_config.sample_rate,
            channels: stream_config.channels as usize,
            sample_format,
        },
    ))
}

/// Build a CPAL output stream that plays audio from `ring`.
fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    ring: &Arc<SlotRing>,
    paused: &Arc<AtomicBool>,
    refill_max_frames: usize,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, ring, paused, refill_max_frames),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, ring, paused, refill_max_frames),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, ring, paused, refill_max_frames),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, ring, paused, refill_max_frames),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ring: &Arc<SlotRing>,
    paused: &Arc<AtomicBool>,
    refill_max_frames: usize,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let channels_out = (config.channels as usize).max(1);
    let state = Mutex::new(CallbackState {
        pos: 0,
        src_channels: ring.channels(),
        src: Vec::new(),
    });
    let refill_max_frames = refill_max_frames.max(1);
    let ring_cb = ring.clone();
    let paused_cb = paused.clone();
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if paused_cb.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }
            let Ok(mut st) = state.lock() else {
                data.fill(silence);
                return;
            };

            let frames = data.len() / channels_out;
            for frame in 0..frames {
                if st.pos >= st.src.len() {
                    st.pos = 0;
                    st.src.clear();
                    match ring_cb.pop_nonblocking(refill_max_frames) {
                        Some(v) => st.src = v,
                        None => {
                            data[frame * channels_out..].fill(silence);
                            break;
                        }
                    }
                }
                for ch in 0..channels_out {
                    let sample = next_sample_mapped(&mut st, channels_out, ch);
                    data[frame * channels_out + ch] = <T as cpal::Sample>::from_sample::<f32>(sample);
                }
            }
        },
        |err| tracing::warn!("stream error: {err}"),
        None,
    )?;
    Ok(stream)
}

struct CallbackState {
    pos: usize,
    src_channels: usize,
    src: Vec<f32>,
}

/// Read one output sample for `dst_ch`, applying a simple channel mapping.
///
/// `st.pos` advances once per destination frame (after the last channel).
fn next_sample_mapped(st: &mut CallbackState, dst_channels: usize, dst_ch: usize) -> f32 {
    if st.pos >= st.src.len() {
        return 0.0;
    }
    let frame_start = st.pos;
    let get_src = |ch: usize, st: &CallbackState| -> f32 {
        if ch < st.src_channels && frame_start + ch < st.src.len() {
            st.src[frame_start + ch]
        } else {
            0.0
        }
    };

    let out = match (st.src_channels, dst_channels) {
        (1, _) => get_src(0, st),
        (2, 1) => 0.5 * (get_src(0, st) + get_src(1, st)),
        (2, _) if dst_ch < 2 => get_src(dst_ch, st),
        _ => 0.0,
    };

    if dst_ch + 1 == dst_channels {
        st.pos += st.src_channels;
    }
    out
}
