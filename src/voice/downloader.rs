//! Downloader: spawns the extractor, streams bytes to a `.part` file, and
//! supervises the three parallel timeout timers (connect/stall/total).
//!
//! Grounded on songbird's `input::ytdl_src` spawn pattern, with
//! the streaming-to-disk and timer-supervision parts drawn from the general
//! "write observer" shape used by caching adapters in
//! `input/adapters/cached/*` (there, writes to an in-memory cache are
//! observed to drive readiness; here the same write-then-signal idea drives
//! the [`TailReader`](crate::voice::tail_reader::TailReader)).

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::voice::constants::{
    DOWNLOAD_CONNECT_TIMEOUT, DOWNLOAD_STALL_TIMEOUT, DOWNLOAD_TOTAL_TIMEOUT, READY_THRESHOLD_FRAGMENT,
    READY_THRESHOLD_FULL,
};
use crate::voice::error::DownloadError;
use crate::voice::extractor;
use crate::voice::tail_reader::TailSignal;
use crate::voice::track::Track;
use crate::voice::util::CancelToken;

/// Downloads one track (or fragment) into `dest_part`, signalling
/// `signal` as bytes land and closing `track`'s ready gate once the
/// threshold is crossed.
pub struct Downloader;

impl Downloader {
    /// Runs the full download supervisor: spawns the
    /// extractor, streams stdout into `dest_part`, and races the total/
    /// connect/stall timers plus `cancel` against completion.
    pub async fn run(
        track: Arc<Track>,
        url: String,
        dest_part: PathBuf,
        final_path: PathBuf,
        seek_secs: Option<f64>,
        is_fragment: bool,
        signal: Arc<TailSignal>,
        ready_gate: Arc<tokio::sync::Notify>,
        cancel: CancelToken,
    ) -> Result<(), DownloadError> {
        let ready_threshold = if is_fragment { READY_THRESHOLD_FRAGMENT } else { READY_THRESHOLD_FULL };

        let mut child = extractor::spawn_stream(&url, seek_secs)?;
        let mut stdout = child.stdout.take().expect("stream child must capture stdout");
        let mut stderr_handle = child.stderr.take();

        if let Some(parent) = dest_part.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let mut file = tokio::fs::File::create(&dest_part).await?;

        let total_deadline = tokio::time::sleep(DOWNLOAD_TOTAL_TIMEOUT);
        tokio::pin!(total_deadline);

        let mut buf = vec![0u8; 64 * 1024];
        let mut first_byte_seen = false;
        let mut ready_signalled = false;
        let result: Result<(), DownloadError> = loop {
            let per_chunk_timeout = if first_byte_seen { DOWNLOAD_STALL_TIMEOUT } else { DOWNLOAD_CONNECT_TIMEOUT };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    break Err(DownloadError::Cancelled);
                },
                _ = &mut total_deadline => {
                    break Err(DownloadError::TotalTimeout(DOWNLOAD_TOTAL_TIMEOUT));
                },
                chunk = timeout(per_chunk_timeout, stdout.read(&mut buf)) => {
                    match chunk {
                        Err(_) if !first_byte_seen => break Err(DownloadError::ConnectTimeout(DOWNLOAD_CONNECT_TIMEOUT)),
                        Err(_) => break Err(DownloadError::StallTimeout(DOWNLOAD_STALL_TIMEOUT)),
                        Ok(Ok(0)) => break Ok(()),
                        Ok(Ok(n)) => {
                            first_byte_seen = true;
                            if let Err(e) = tokio::io::AsyncWriteExt::write_all(&mut file, &buf[..n]).await {
                                break Err(DownloadError::Io(e));
                            }
                            let written = track.written.fetch_add(n as u64, Ordering::AcqRel) + n as u64;
                            signal.notify_write();
                            if !ready_signalled && written >= ready_threshold {
                                ready_signalled = true;
                                ready_gate.notify_waiters();
                            }
                        },
                        Ok(Err(e)) => break Err(DownloadError::Io(e)),
                    }
                }
            }
        };

        // Always drain the child so it doesn't become a zombie, and read
        // whatever stderr is available to classify benign cancellations.
        let mut stderr_text = String::new();
        if let Some(stderr) = stderr_handle.as_mut() {
            let _ = stderr.read_to_string(&mut stderr_text).await;
        }
        let _ = child.start_kill();
        let _ = child.wait().await;

        signal.mark_done();
        ready_gate.notify_waiters();

        match result {
            Ok(()) => {
                drop(file);
                tokio::fs::rename(&dest_part, &final_path).await?;
                track.mark_downloaded();
                info!(url = %url, bytes = track.written.load(Ordering::Acquire), "download complete");
                Ok(())
            },
            Err(DownloadError::Cancelled) if extractor::is_benign_cancellation(&stderr_text) => {
                // broken-pipe/killed-by-signal on cancellation is
                // success from the extractor's point of view, but the
                // caller asked us to stop, so we still report cancellation
                // upward without touching the `.part` file's caller-owned
                // fate.
                cleanup_part(&dest_part).await;
                Err(DownloadError::Cancelled)
            },
            Err(e) => {
                if extractor::looks_drm_protected(&stderr_text) {
                    warn!(url = %url, "extractor reported DRM protection");
                }
                error!(url = %url, error = %e, stderr = %stderr_text.trim(), "download failed");
                cleanup_part(&dest_part).await;
                Err(e)
            },
        }
    }
}

async fn cleanup_part(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %e, "failed to clean up .part file");
        }
    }
}
