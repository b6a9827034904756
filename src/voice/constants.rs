//! Constants governing frame pacing and codec configuration.
//!
//! Grounded on songbird's `src/constants.rs`, narrowed to the
//! fixed Opus/48kHz/stereo pipeline this engine always runs (songbird
//! itself supports multiple mix modes and passthrough; this engine always
//! transcodes to a single target format).

use std::time::Duration;

/// Sample rate fed to the Opus encoder and expected by the voice connection.
pub const SAMPLE_RATE_HZ: u32 = 48_000;

/// Stereo output.
pub const CHANNELS: usize = 2;

/// Number of samples per channel in one 20 ms frame at 48 kHz.
pub const SAMPLES_PER_FRAME: usize = 960;

/// Length of one audio frame.
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// FIFO capacity ahead of the encoder, in samples per channel (2 * 960).
pub const FIFO_CAPACITY: usize = 2 * SAMPLES_PER_FRAME;

/// Opus encoder target bitrate.
pub const OPUS_BITRATE: i32 = 192_000;

/// Opus encoder compression effort, 0-10.
pub const OPUS_COMPRESSION_LEVEL: i32 = 10;

/// Canonical 3-byte Opus packet denoting 20ms of silence.
pub const OPUS_SILENCE_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Frame provider backpressure queue depth.
pub const FRAME_QUEUE_CAPACITY: usize = 100;

/// Time a `push` onto the frame queue will wait before giving up.
pub const FRAME_PUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Quiet period before the provider fills in a silence frame.
pub const FRAME_QUIET_TIMEOUT: Duration = Duration::from_millis(500);

/// Pause inserted between stream end and the next track starting.
pub const INTER_TRACK_QUIET: Duration = Duration::from_millis(200);

/// Threshold of downloaded bytes before a full-track download is "ready".
pub const READY_THRESHOLD_FULL: u64 = 1024 * 1024;

/// Threshold of downloaded bytes before a seek fragment is "ready".
pub const READY_THRESHOLD_FRAGMENT: u64 = 128 * 1024;

/// Download supervisor timeouts.
pub const DOWNLOAD_TOTAL_TIMEOUT: Duration = Duration::from_secs(60);
pub const DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
pub const DOWNLOAD_STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Join retry schedule: 1s, 2s, 4s, 8s, 16s.
pub const JOIN_BACKOFFS: [Duration; 5] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
    Duration::from_secs(16),
];
pub const JOIN_OPEN_TIMEOUT: Duration = Duration::from_secs(20);

/// Search timing budgets.
pub const SEARCH_OVERALL_BUDGET: Duration = Duration::from_millis(2300);
pub const SEARCH_PER_SOURCE_CEILING: Duration = Duration::from_millis(2600);
pub const SEARCH_CACHE_TTL: Duration = Duration::from_secs(3600);
pub const SEARCH_CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(600);
pub const SEARCH_RESULT_CAP: usize = 25;

/// Metadata extraction timing.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
pub const METADATA_TIMEOUT_DRM_SUSPECT: Duration = Duration::from_secs(3);
pub const METADATA_RACE_TIMEOUT: Duration = Duration::from_secs(1);

/// Seek acknowledgement and fragment-creation timeouts.
pub const SEEK_ACK_TIMEOUT: Duration = Duration::from_secs(5);
pub const FRAGMENT_CREATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Autoplay/scheduling timing.
pub const AUTOPLAY_METADATA_WAIT: Duration = Duration::from_secs(10);
pub const PLAYBACK_STARTED_LOG_WAIT: Duration = Duration::from_secs(15);
pub const VOICE_PANEL_LIFETIME: Duration = Duration::from_secs(15 * 60);
pub const CONNECTION_MONITOR_INTERVAL: Duration = Duration::from_secs(20);

/// Novelty filter history depth.
pub const HISTORY_CAPACITY: usize = 50;
pub const NOVELTY_SIMILARITY_THRESHOLD: f64 = 0.7;

/// Download scheduler concurrency.
pub const MAX_CONCURRENT_DOWNLOADS_PER_SESSION: usize = 3;
pub const CURRENT_TRACK_PRIORITY: i32 = 1;
pub const AUTOPLAY_PREFETCH_PRIORITY: i32 = 0;

/// Voice-connection retry wrapper.
pub const CONNECTION_CALL_RETRIES: u32 = 3;
pub const CONNECTION_CALL_RETRY_INTERVAL: Duration = Duration::from_millis(150);
