//! Top-level error aggregation for the bot, mirroring songbird's
//! per-subsystem error enums (`songbird::error::{JoinError, ConnectionError}`)
//! plus glue-layer conversions.

use crate::voice::error::{DownloadError, ResolveError, SessionError, TrackError, TranscodeError};

/// The error type surfaced to slash-command handlers and the top-level runtime.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Track(#[from] TrackError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("discord API error: {0}")]
    Serenity(#[from] serenity::Error),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    InvalidInput(String),
}

pub type BotResult<T> = Result<T, BotError>;
