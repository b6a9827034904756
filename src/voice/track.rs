//! The [`Track`] state machine and its queued-item metadata.
//!
//! Grounded on songbird's `tracks/{mod.rs,state.rs,ready.rs}`:
//! mutable fields live behind a single lock, readiness is exposed via
//! one-shot signals, and the handle is cheaply `Clone`-able (`Arc`-backed)
//! so the queue, scheduler, and transcoder can all hold a reference without
//! the track ever changing owner.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::voice::error::TrackError;
use crate::voice::tail_reader::TailSignal;
use crate::voice::util::NotifyOnce;

/// The user-visible query mode used to place a newly resolved track/batch
/// into a session's queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueMode {
    Now,
    Next,
    Position(usize),
    Append,
}

impl QueueMode {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "now" => QueueMode::Now,
            "next" => QueueMode::Next,
            other => other
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .map(QueueMode::Position)
                .unwrap_or(QueueMode::Append),
        }
    }
}

/// Mutable metadata fields, held behind a single per-track lock.
#[derive(Debug, Default, Clone)]
pub struct TrackFields {
    pub title: String,
    pub uploader: String,
    pub duration: Duration,
    pub artwork_url: Option<String>,
}

#[derive(Debug, Default)]
struct TrackFlags {
    resolved: AtomicBool,
    enriched: AtomicBool,
    downloaded: AtomicBool,
    started: AtomicBool,
    next_logged: AtomicBool,
}

/// One playable audio item with a resolved URL and associated metadata.
///
/// Owned exclusively by the session that enqueued it. Created when added to
/// a queue, destroyed (cache files removed) when it leaves the queue for any
/// reason.
#[derive(Debug)]
pub struct Track {
    /// Resolved, playable URL. Immutable once created.
    pub url: String,
    /// Extractor-assigned id, used for cache paths and novelty/history
    /// comparisons. Empty until resolution completes.
    pub id: Mutex<String>,
    pub fields: Mutex<TrackFields>,

    pub cache_path: Mutex<PathBuf>,
    /// -1 means unknown.
    pub total_size: AtomicI64,
    pub written: AtomicU64,
    /// Current playback position, in 48kHz sample units.
    pub seek_offset: AtomicU64,
    pub priority: AtomicI64,

    flags: TrackFlags,
    pub error: Mutex<Option<TrackError>>,

    pub metadata_known: NotifyOnce,
    /// Closed once enough of the source has landed on disk (or the download
    /// has errored/finished) for a [`TailReader`] to be opened against it.
    pub ready: NotifyOnce,
    pub playback_started: NotifyOnce,
    pub finished: NotifyOnce,

    /// The [`TailSignal`] the active download is posting write/done
    /// notifications to. Set before the download starts, read by the
    /// session when it opens the tail reader for playback; the two sides
    /// must share the same instance or writes never wake the reader.
    pub tail_signal: Mutex<Option<Arc<TailSignal>>>,
}

impl Track {
    pub fn new(url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            url: url.into(),
            id: Mutex::new(String::new()),
            fields: Mutex::new(TrackFields::default()),
            cache_path: Mutex::new(PathBuf::new()),
            total_size: AtomicI64::new(-1),
            written: AtomicU64::new(0),
            seek_offset: AtomicU64::new(0),
            priority: AtomicI64::new(0),
            flags: TrackFlags::default(),
            error: Mutex::new(None),
            metadata_known: NotifyOnce::new(),
            ready: NotifyOnce::new(),
            playback_started: NotifyOnce::new(),
            finished: NotifyOnce::new(),
            tail_signal: Mutex::new(None),
        })
    }

    pub fn title(&self) -> String {
        self.fields.lock().title.clone()
    }

    pub fn duration(&self) -> Duration {
        self.fields.lock().duration
    }

    pub fn id(&self) -> String {
        self.id.lock().clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.flags.resolved.load(Ordering::Acquire)
    }

    pub fn mark_resolved(&self) {
        self.flags.resolved.store(true, Ordering::Release);
    }

    pub fn is_enriched(&self) -> bool {
        self.flags.enriched.load(Ordering::Acquire)
    }

    pub fn mark_enriched(&self) {
        self.flags.enriched.store(true, Ordering::Release);
    }

    pub fn is_downloaded(&self) -> bool {
        self.flags.downloaded.load(Ordering::Acquire)
    }

    /// Marks the track downloaded. Invariant: a track with an error
    /// never transitions to downloaded, and vice versa.
    pub fn mark_downloaded(&self) {
        debug_assert!(self.error.lock().is_none(), "downloaded track must not carry an error");
        self.flags.downloaded.store(true, Ordering::Release);
    }

    pub fn is_started(&self) -> bool {
        self.flags.started.load(Ordering::Acquire)
    }

    pub fn mark_started(&self) {
        self.flags.started.store(true, Ordering::Release);
    }

    pub fn take_next_logged(&self) -> bool {
        !self.flags.next_logged.swap(true, Ordering::AcqRel)
    }

    pub fn set_error(&self, err: TrackError) {
        debug_assert!(!self.is_downloaded(), "errored track must not be marked downloaded");
        *self.error.lock() = Some(err);
    }

    pub fn has_error(&self) -> bool {
        self.error.lock().is_some()
    }

    /// Fraction of the source downloaded so far, if the total size is known.
    pub fn download_fraction(&self) -> Option<f64> {
        let total = self.total_size.load(Ordering::Acquire);
        if total <= 0 {
            return None;
        }
        let written = self.written.load(Ordering::Acquire) as f64;
        Some((written as f64 / total as f64).clamp(0.0, 1.0))
    }

    /// Estimated byte position corresponding to `target`, within `duration`.
    pub fn estimated_buffered_duration(&self) -> Option<Duration> {
        let frac = self.download_fraction()?;
        let dur = self.duration();
        Some(Duration::from_secs_f64(dur.as_secs_f64() * frac))
    }

    /// Resets written/seek state for reuse as the target of a fresh
    /// download, used by mid-track seek fragments.
    pub fn reset_for_fragment(&self, target_samples: u64, path: PathBuf) {
        self.written.store(0, Ordering::Release);
        self.seek_offset.store(target_samples, Ordering::Release);
        *self.cache_path.lock() = path;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_mode_parses_known_tokens() {
        assert_eq!(QueueMode::parse("now"), QueueMode::Now);
        assert_eq!(QueueMode::parse("next"), QueueMode::Next);
        assert_eq!(QueueMode::parse("3"), QueueMode::Position(3));
        assert_eq!(QueueMode::parse("0"), QueueMode::Append);
        assert_eq!(QueueMode::parse("garbage"), QueueMode::Append);
    }

    #[test]
    fn download_fraction_is_none_when_unknown() {
        let track = Track::new("https://example.com/a");
        assert_eq!(track.download_fraction(), None);
        track.total_size.store(1000, Ordering::Release);
        track.written.store(250, Ordering::Release);
        assert_eq!(track.download_fraction(), Some(0.25));
    }

    #[test]
    fn downloaded_and_error_are_mutually_exclusive_in_practice() {
        let track = Track::new("https://example.com/a");
        track.mark_downloaded();
        assert!(track.is_downloaded());
        assert!(!track.has_error());
    }
}
