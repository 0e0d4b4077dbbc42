//! Decoder adapters.
//!
//! Each supported [`FileType`] has one [`DecoderBinding`]: a small capability record
//! holding the recommended slot size and the function that opens the codec library
//! for a file. Opened adapters implement [`Decoder`], which fills interleaved `i16`
//! slots for the playback engine.
//!
//! The adapters only reshape what the libraries produce. All codec work is done by
//! Symphonia (WAV, FLAC, Vorbis, MP3 and the Ogg demuxer) and libopus through
//! `symphonia-adapter-libopus`.

use std::fs::File;
use std::path::Path;
use std::sync::OnceLock;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecRegistry, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia_adapter_libopus::OpusDecoder;
use tunedeck_types::FileType;

use crate::error::{DecodeError, PlaybackError};

/// Uniform interface over the codec libraries.
///
/// An adapter exists only after a successful open, so every method is valid to call.
/// [`Decoder::shutdown`] consumes the adapter; the engine calls it exactly once.
pub trait Decoder: Send {
    /// Tag this adapter was opened for.
    fn file_type(&self) -> FileType;

    /// Output sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Interleaved channel count of the samples written by [`Decoder::decode`].
    fn channels(&self) -> u8;

    /// Slot size in samples that suits this codec's packet sizes.
    fn recommended_buffer_size(&self) -> usize;

    /// Fill `buf` with interleaved samples, whole frames only.
    ///
    /// Returns the number of samples written across all channels. `Ok(0)` means end
    /// of stream. A result shorter than the usable capacity (`buf.len()` rounded down
    /// to whole frames) is only returned at end of stream.
    fn decode(&mut self, buf: &mut [i16]) -> Result<usize, DecodeError>;

    /// Best-effort total length in interleaved samples.
    fn total_samples(&self) -> Option<u64>;

    /// Release codec resources.
    fn shutdown(self: Box<Self>);
}

/// Signature of a binding's open function.
pub type OpenFn = fn(&Path) -> Result<Box<dyn Decoder>, PlaybackError>;

/// Capability record for one codec binding.
#[derive(Clone, Copy)]
pub struct DecoderBinding {
    pub file_type: FileType,
    /// Recommended slot size in samples.
    pub buffer_samples: usize,
    pub open: OpenFn,
}

impl std::fmt::Debug for DecoderBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderBinding")
            .field("file_type", &self.file_type)
            .field("buffer_samples", &self.buffer_samples)
            .finish()
    }
}

const OPUS_SAMPLE_RATE: u32 = 48_000;

static BINDINGS: [DecoderBinding; 5] = [
    DecoderBinding {
        file_type: FileType::Wav,
        buffer_samples: WAV_SHAPE.buffer_samples,
        open: open_wav,
    },
    DecoderBinding {
        file_type: FileType::Flac,
        buffer_samples: FLAC_SHAPE.buffer_samples,
        open: open_flac,
    },
    DecoderBinding {
        file_type: FileType::Vorbis,
        buffer_samples: VORBIS_SHAPE.buffer_samples,
        open: open_vorbis,
    },
    DecoderBinding {
        file_type: FileType::Opus,
        buffer_samples: OPUS_SHAPE.buffer_samples,
        open: open_opus,
    },
    DecoderBinding {
        file_type: FileType::Mp3,
        buffer_samples: MP3_SHAPE.buffer_samples,
        open: open_mp3,
    },
];

/// Binding for a sniffed tag. SID tunes and unknown files have none.
pub fn binding_for(file_type: FileType) -> Option<&'static DecoderBinding> {
    BINDINGS.iter().find(|b| b.file_type == file_type)
}

/// Open the adapter for `file_type`.
pub fn open_decoder(file_type: FileType, path: &Path) -> Result<Box<dyn Decoder>, PlaybackError> {
    let binding =
        binding_for(file_type).ok_or(PlaybackError::UnsupportedFileType { magic: None })?;
    (binding.open)(path)
}

fn open_wav(path: &Path) -> Result<Box<dyn Decoder>, PlaybackError> {
    SymphoniaDecoder::open(path, &WAV_SHAPE).map(|d| Box::new(d) as Box<dyn Decoder>)
}

fn open_flac(path: &Path) -> Result<Box<dyn Decoder>, PlaybackError> {
    SymphoniaDecoder::open(path, &FLAC_SHAPE).map(|d| Box::new(d) as Box<dyn Decoder>)
}

fn open_vorbis(path: &Path) -> Result<Box<dyn Decoder>, PlaybackError> {
    SymphoniaDecoder::open(path, &VORBIS_SHAPE).map(|d| Box::new(d) as Box<dyn Decoder>)
}

fn open_opus(path: &Path) -> Result<Box<dyn Decoder>, PlaybackError> {
    SymphoniaDecoder::open(path, &OPUS_SHAPE).map(|d| Box::new(d) as Box<dyn Decoder>)
}

fn open_mp3(path: &Path) -> Result<Box<dyn Decoder>, PlaybackError> {
    SymphoniaDecoder::open(path, &MP3_SHAPE).map(|d| Box::new(d) as Box<dyn Decoder>)
}

/// How a binding adapts the library output to the uniform contract.
struct Shape {
    file_type: FileType,
    buffer_samples: usize,
    /// Container hint given to the probe (the sniffer already decided the format).
    container: &'static str,
    /// Force stereo output (mono duplicated, extra channels dropped).
    force_stereo: bool,
    /// Sample rate to assume when the container does not state one.
    default_rate: Option<u32>,
}

const WAV_SHAPE: Shape = Shape {
    file_type: FileType::Wav,
    buffer_samples: 16 * 1024,
    container: "wav",
    force_stereo: false,
    default_rate: None,
};

const FLAC_SHAPE: Shape = Shape {
    file_type: FileType::Flac,
    buffer_samples: 16 * 1024,
    container: "flac",
    force_stereo: false,
    default_rate: None,
};

const VORBIS_SHAPE: Shape = Shape {
    file_type: FileType::Vorbis,
    buffer_samples: 32 * 1024,
    container: "ogg",
    force_stereo: false,
    default_rate: None,
};

/// Opus packets are at most 120 ms, so one decoded packet (stereo, 48 kHz) is at
/// most 11 520 samples and a slot always spans several packets.
const OPUS_SHAPE: Shape = Shape {
    file_type: FileType::Opus,
    buffer_samples: 32 * 1024,
    container: "ogg",
    force_stereo: true,
    default_rate: Some(OPUS_SAMPLE_RATE),
};

const MP3_SHAPE: Shape = Shape {
    file_type: FileType::Mp3,
    buffer_samples: 36 * 1024,
    container: "mp3",
    force_stereo: false,
    default_rate: None,
};

/// Codecs available to the adapters, libopus included.
fn codec_registry() -> &'static CodecRegistry {
    static REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = CodecRegistry::new();
        registry.register_all::<OpusDecoder>();
        registry.register_all::<symphonia::default::codecs::MpaDecoder>();
        registry.register_all::<symphonia::default::codecs::PcmDecoder>();
        registry.register_all::<symphonia::default::codecs::AdpcmDecoder>();
        registry.register_all::<symphonia::default::codecs::VorbisDecoder>();
        registry.register_all::<symphonia::default::codecs::FlacDecoder>();
        registry
    })
}

/// Adapter over a Symphonia format reader and codec.
pub struct SymphoniaDecoder {
    file_type: FileType,
    buffer_samples: usize,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    sample_rate: u32,
    out_channels: u8,
    force_stereo: bool,
    total_frames: Option<u64>,
    /// Decoded samples (already in output layout) not yet handed out.
    pending: Vec<i16>,
    pending_pos: usize,
    eof: bool,
    /// Hard error seen after samples were already written; reported on the next call.
    deferred_error: Option<DecodeError>,
}

impl SymphoniaDecoder {
    fn open(path: &Path, shape: &Shape) -> Result<Self, PlaybackError> {
        let file = File::open(path).map_err(|e| PlaybackError::io(path, e))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        hint.with_extension(shape.container);

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| PlaybackError::DecoderInitFailed(format!("probe: {e}")))?;
        let format = probed.format;

        let track = format
            .default_track()
            .filter(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .or_else(|| {
                format
                    .tracks()
                    .iter()
                    .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            })
            .ok_or_else(|| PlaybackError::DecoderInitFailed("no audio track".to_string()))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let source_channels = params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| PlaybackError::DecoderInitFailed("unknown channel layout".to_string()))?;
        let sample_rate = params
            .sample_rate
            .or(shape.default_rate)
            .ok_or_else(|| PlaybackError::DecoderInitFailed("unknown sample rate".to_string()))?;

        let decoder = codec_registry()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| PlaybackError::DecoderInitFailed(format!("codec: {e}")))?;

        let out_channels = if shape.force_stereo {
            2
        } else {
            u8::try_from(source_channels).unwrap_or(u8::MAX)
        };

        tracing::info!(
            path = %path.display(),
            file_type = %shape.file_type,
            rate_hz = sample_rate,
            source_channels,
            out_channels,
            "decoder opened"
        );

        Ok(Self {
            file_type: shape.file_type,
            buffer_samples: shape.buffer_samples,
            format,
            decoder,
            track_id,
            sample_rate,
            out_channels,
            force_stereo: shape.force_stereo,
            total_frames: params.n_frames,
            pending: Vec::new(),
            pending_pos: 0,
            eof: false,
            deferred_error: None,
        })
    }

    /// Decode the next packet of our track into `pending`.
    ///
    /// Returns `Ok(false)` at end of stream.
    fn refill_pending(&mut self) -> Result<bool, DecodeError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                // Chained streams change parameters; we stop at the first link.
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(e) => return Err(DecodeError(format!("read packet: {e}"))),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!("skipping corrupt packet: {e}");
                    continue;
                }
                Err(e) => return Err(DecodeError(format!("decode packet: {e}"))),
            };
            if decoded.frames() == 0 {
                continue;
            }

            let src_channels = decoded.spec().channels.count();
            let mut sample_buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, *decoded.spec());
            sample_buf.copy_interleaved_ref(decoded);
            let samples = sample_buf.samples();

            self.pending.clear();
            self.pending_pos = 0;
            if self.force_stereo && src_channels != 2 {
                map_to_stereo(samples, src_channels, &mut self.pending);
            } else {
                self.pending.extend_from_slice(samples);
            }
            return Ok(true);
        }
    }
}

/// Mono is duplicated to both sides; wider layouts keep their front pair.
fn map_to_stereo(samples: &[i16], src_channels: usize, out: &mut Vec<i16>) {
    if src_channels == 0 {
        return;
    }
    for frame in samples.chunks_exact(src_channels) {
        let left = frame[0];
        let right = if src_channels > 1 { frame[1] } else { left };
        out.push(left);
        out.push(right);
    }
}

impl Decoder for SymphoniaDecoder {
    fn file_type(&self) -> FileType {
        self.file_type
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u8 {
        self.out_channels
    }

    fn recommended_buffer_size(&self) -> usize {
        self.buffer_samples
    }

    fn decode(&mut self, buf: &mut [i16]) -> Result<usize, DecodeError> {
        if let Some(err) = self.deferred_error.take() {
            return Err(err);
        }
        let channels = usize::from(self.out_channels.max(1));
        let usable = buf.len() - buf.len() % channels;
        let mut written = 0usize;

        while written < usable {
            if self.pending_pos >= self.pending.len() {
                if self.eof {
                    break;
                }
                match self.refill_pending() {
                    Ok(true) => continue,
                    Ok(false) => {
                        self.eof = true;
                        break;
                    }
                    Err(e) if written > 0 => {
                        self.eof = true;
                        self.deferred_error = Some(e);
                        break;
                    }
                    Err(e) => {
                        self.eof = true;
                        return Err(e);
                    }
                }
            }
            let available = self.pending.len() - self.pending_pos;
            let take = available.min(usable - written);
            buf[written..written + take]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + take]);
            self.pending_pos += take;
            written += take;
        }

        Ok(written)
    }

    fn total_samples(&self) -> Option<u64> {
        self.total_frames
            .map(|frames| frames.saturating_mul(u64::from(self.out_channels)))
    }

    fn shutdown(self: Box<Self>) {
        tracing::debug!(file_type = %self.file_type, "decoder shut down");
    }
}
