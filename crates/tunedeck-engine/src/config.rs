use std::time::Duration;

/// Engine tuning shared by every playback session.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Number of PCM buffer slots cycled through the output (2 = double buffering).
    pub slot_count: usize,
    /// Upper bound on one engine tick when the sink has nothing to report.
    pub poll_interval: Duration,
    /// How long to wait for the sink to report playback started after priming.
    pub start_timeout: Duration,
    /// Override of the decoder's recommended slot size, in samples.
    pub buffer_samples: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slot_count: 2,
            poll_interval: Duration::from_micros(100),
            start_timeout: Duration::from_millis(500),
            buffer_samples: None,
        }
    }
}

impl EngineConfig {
    /// Slot count clamped to at least one slot.
    pub fn effective_slots(&self) -> usize {
        self.slot_count.max(1)
    }

    /// Slot size for a decoder, rounded down to whole frames.
    ///
    /// Never smaller than one frame.
    pub fn slot_samples(&self, recommended: usize, channels: u8) -> usize {
        let channels = usize::from(channels.max(1));
        let want = self.buffer_samples.unwrap_or(recommended).max(channels);
        want - want % channels
    }
}

/// CPAL output tuning.
#[derive(Clone, Debug)]
pub struct OutputConfig {
    /// Output device substring match (case-insensitive); default device when unset.
    pub device: Option<String>,
    /// Resampler input chunk size in frames, used only when the device rate differs.
    pub chunk_frames: usize,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: None,
            chunk_frames: 1024,
            refill_max_frames: 4096,
        }
    }
}
