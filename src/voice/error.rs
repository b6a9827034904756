//! Error kinds for the voice engine.
//!
//! Grounded on `songbird::error::{JoinError, ConnectionError}`: one
//! `thiserror` enum per subsystem, converted with `?` and surfaced either as
//! a single edit of the deferred interaction response or as a log line for
//! background tasks.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to join voice channel after {attempts} attempts")]
    JoinFailed { attempts: u32 },

    #[error("timed out waiting {0:?} for the voice gateway to open the connection")]
    JoinTimeout(Duration),

    #[error("no active session for this guild")]
    NoSession,

    #[error("queue is empty")]
    QueueEmpty,

    #[error("seek acknowledgement timed out after {0:?}")]
    SeekAckTimeout(Duration),

    #[error("voice connection is not currently joined to a channel")]
    NotJoined,
}

#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    #[error("DRM-protected source, cannot be played")]
    DrmProtected,

    #[error("no song found for query {0:?}")]
    NoSongFound(String),

    #[error("track download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("track resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("track was cancelled")]
    Cancelled,

    #[error("fatal error preparing track: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("no audio stream found in source")]
    NoAudioStream,

    #[error("failed to allocate codec context: {0}")]
    CodecAllocation(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("demuxer error: {0}")]
    Demux(String),

    #[error("transcoder task panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download timed out after {0:?} total")]
    TotalTimeout(Duration),

    #[error("no bytes received within {0:?} of starting the connection")]
    ConnectTimeout(Duration),

    #[error("no new bytes received within {0:?}, stream considered stalled")]
    StallTimeout(Duration),

    #[error("download was cancelled")]
    Cancelled,

    #[error("extractor process exited with an error: {0}")]
    ExtractorFailed(String),

    #[error("io error writing cache file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("search returned no results for {0:?}")]
    NoResults(String),

    #[error("metadata extraction timed out after {0:?}")]
    MetadataTimeout(Duration),

    #[error("DRM-protected source detected")]
    DrmProtected,

    #[error("html scrape returned no usable metadata")]
    ScrapeEmpty,

    #[error("extractor process error: {0}")]
    Extractor(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
