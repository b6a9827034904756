//! Read-while-writing file view.
//!
//! Grounded on songbird's `input::file`/`input::live_input`
//! notion of a custom `MediaSource`, but specialised to the one behaviour
//! Symphonia's demuxer needs from a file still being downloaded: block at
//! the current EOF until either more bytes land, the writer finishes, or
//! playback is cancelled — and allow a hot file-handle swap for seeks that
//! land outside the buffered region.

use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::voice::util::CancelToken;

/// Shared state a [`Downloader`](crate::voice::downloader::Downloader)
/// updates and a [`TailReader`] observes.
#[derive(Debug, Default)]
pub struct TailSignal {
    /// Coalesced, 1-slot "new bytes available" notification.
    pub write_signal: Notify,
    pub download_done: AtomicBool,
}

impl TailSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notify_write(&self) {
        self.write_signal.notify_one();
    }

    pub fn mark_done(&self) {
        self.download_done.store(true, Ordering::Release);
        // Wake any reader parked waiting for new bytes; they'll observe
        // `download_done` and drain the remainder before returning EOF.
        self.write_signal.notify_one();
    }

    pub fn is_done(&self) -> bool {
        self.download_done.load(Ordering::Acquire)
    }
}

struct Inner {
    file: std::fs::File,
    path: PathBuf,
}

/// A byte source that blocks at EOF instead of returning zero, used by the
/// transcoder's demuxer while a file is still being written.
pub struct TailReader {
    inner: Mutex<Inner>,
    signal: Arc<TailSignal>,
    cancel: CancelToken,
}

impl TailReader {
    pub fn open(path: PathBuf, signal: Arc<TailSignal>, cancel: CancelToken) -> io::Result<Self> {
        let file = std::fs::File::open(&path)?;
        Ok(Self {
            inner: Mutex::new(Inner { file, path }),
            signal,
            cancel,
        })
    }

    /// Atomically swaps the underlying file handle, used by mid-stream
    /// seeks that jump to a freshly-started fragment download. Any reader
    /// currently blocked waiting for bytes is woken so it picks up the new
    /// file on its next read.
    pub fn switch_file(&self, path: PathBuf, signal: Arc<TailSignal>) -> io::Result<()> {
        let file = std::fs::File::open(&path)?;
        {
            let mut inner = self.inner.lock();
            inner.file = file;
            inner.path = path;
        }
        signal.notify_write();
        Ok(())
    }

    /// Blocking read used from the transcoder's worker thread. Not async:
    /// Symphonia's `MediaSource` trait is synchronous, so waiting on the
    /// tokio `Notify` is done via `Handle::block_on` from that thread.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let attempt = {
                let mut inner = self.inner.lock();
                inner.file.read(buf)
            };

            match attempt {
                Ok(0) => {
                    if self.signal.is_done() {
                        return Ok(0);
                    }
                    if self.cancel.is_cancelled() {
                        return Err(io::Error::new(io::ErrorKind::Interrupted, "playback cancelled"));
                    }
                    self.block_on_more_data();
                    // Loop back and retry the read; either new bytes landed,
                    // the download finished (next iteration returns Ok(0)
                    // and the done-check above fires), or we were cancelled.
                },
                other => return other,
            }
        }
    }

    fn block_on_more_data(&self) {
        let handle = tokio::runtime::Handle::current();
        let signal = self.signal.clone();
        let cancel = self.cancel.clone();
        handle.block_on(async move {
            tokio::select! {
                _ = signal.write_signal.notified() => {},
                _ = cancel.cancelled() => {},
            }
        });
    }

    pub fn seek_from_start(&self, offset: u64) -> io::Result<u64> {
        self.inner.lock().file.seek(SeekFrom::Start(offset))
    }

    /// Generic seek used by the demuxer's `MediaSource` adapter. Seeking
    /// from the end is refused while the file may still be growing, since
    /// the final length isn't known until the download completes.
    pub fn seek(&self, pos: SeekFrom) -> io::Result<u64> {
        if matches!(pos, SeekFrom::End(_)) && !self.signal.is_done() {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "seek from end is disabled while the track is still downloading",
            ));
        }
        self.inner.lock().file.seek(pos)
    }

    pub fn path(&self) -> PathBuf {
        self.inner.lock().path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn reader_blocks_then_returns_new_bytes_and_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.part");
        std::fs::File::create(&path).unwrap();

        let signal = TailSignal::new();
        let cancel = crate::voice::util::new_cancel_token();
        let reader =
            TailReader::open(path.clone(), signal.clone(), cancel.clone()).unwrap();

        let writer_signal = signal.clone();
        let writer_path = path.clone();
        let writer = tokio::task::spawn_blocking(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            let mut f = std::fs::OpenOptions::new().append(true).open(&writer_path).unwrap();
            f.write_all(b"hello world").unwrap();
            f.flush().unwrap();
            writer_signal.notify_write();
            std::thread::sleep(std::time::Duration::from_millis(20));
            writer_signal.mark_done();
        });

        let reader_task = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            let mut buf = [0u8; 4];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => out.extend_from_slice(&buf[..n]),
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            out
        });

        writer.await.unwrap();
        let out = reader_task.await.unwrap();
        assert_eq!(out, b"hello world");
    }
}
