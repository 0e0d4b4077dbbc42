//! Streaming resampler for the CPAL output.
//!
//! Converts interleaved `f32` audio from the decoder rate to the device rate with
//! Rubato. Input arrives one slot at a time; frames that do not fill a whole chunk
//! are carried over to the next call and flushed at end of stream.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

pub struct StreamResampler {
    inner: Async<f32>,
    channels: usize,
    chunk_frames: usize,
    carry: Vec<f32>,
    scratch: Vec<f32>,
    indexing: Indexing,
}

impl StreamResampler {
    /// `interpolate` selects cubic sinc interpolation; otherwise nearest.
    pub fn new(
        src_rate: u32,
        dst_rate: u32,
        channels: usize,
        chunk_frames: usize,
        interpolate: bool,
    ) -> Result<Self> {
        if src_rate == 0 || dst_rate == 0 || channels == 0 {
            return Err(anyhow!(
                "invalid resampler shape: {src_rate} Hz -> {dst_rate} Hz, {channels} ch"
            ));
        }
        let f_ratio = dst_rate as f64 / src_rate as f64;

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: if interpolate {
                SincInterpolationType::Cubic
            } else {
                SincInterpolationType::Nearest
            },
            oversampling_factor: 256,
            window,
        };

        let chunk_frames = chunk_frames.max(1);
        let inner = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init: {e}"))?;
        let scratch = vec![0.0f32; inner.output_frames_max() * channels];

        tracing::info!(
            from_hz = src_rate,
            to_hz = dst_rate,
            chunk_frames,
            interpolate,
            "resampling"
        );

        Ok(Self {
            inner,
            channels,
            chunk_frames,
            carry: Vec::new(),
            scratch,
            indexing: Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            },
        })
    }

    /// Resample as many whole chunks as `input` (plus carry) allows, appending to `out`.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<()> {
        self.carry.extend_from_slice(input);
        let chunk_samples = self.chunk_frames * self.channels;
        let mut offset = 0;
        while self.carry.len() - offset >= chunk_samples {
            let chunk = self.carry[offset..offset + chunk_samples].to_vec();
            self.run_chunk(&chunk, None, out)?;
            offset += chunk_samples;
        }
        self.carry.drain(..offset);
        Ok(())
    }

    /// Push out the carried remainder as a final partial chunk.
    pub fn flush(&mut self, out: &mut Vec<f32>) -> Result<()> {
        let frames = self.carry.len() / self.channels;
        if frames == 0 {
            self.carry.clear();
            return Ok(());
        }
        let mut tail = std::mem::take(&mut self.carry);
        tail.truncate(frames * self.channels);
        tail.resize(self.chunk_frames * self.channels, 0.0);
        self.run_chunk(&tail, Some(frames), out)
    }

    fn run_chunk(&mut self, chunk: &[f32], partial: Option<usize>, out: &mut Vec<f32>) -> Result<()> {
        let input_adapter = InterleavedSlice::new(chunk, self.channels, self.chunk_frames)
            .map_err(|e| anyhow!("interleaved slice (input): {e}"))?;
        let out_capacity_frames = self.scratch.len() / self.channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.scratch, self.channels, out_capacity_frames)
                .map_err(|e| anyhow!("interleaved slice (output): {e}"))?;

        self.indexing.input_offset = 0;
        self.indexing.output_offset = 0;
        self.indexing.partial_len = partial;

        let (_nbr_in, nbr_out) = self
            .inner
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&self.indexing))
            .map_err(|e| anyhow!("resampler process: {e}"))?;
        out.extend_from_slice(&self.scratch[..nbr_out * self.channels]);
        Ok(())
    }
}
