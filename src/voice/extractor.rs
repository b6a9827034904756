//! Wrapper around the external media extractor CLI (`yt-dlp`/`youtube-dl`).
//!
//! Grounded on songbird's `input::ytdl_src::_ytdl` /
//! `_ytdl_metadata`: spawn the tool with `tokio::process::Command`, pipe its
//! stdout, and parse either a JSON line or (here) tab-separated
//! text depending on the operation.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::config::config;
use crate::voice::error::ResolveError;

const EXTRACTOR_BIN: &str = "yt-dlp";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchSource {
    Youtube,
    YoutubeMusic,
}

impl SearchSource {
    fn prefix(self) -> &'static str {
        match self {
            SearchSource::Youtube => "ytsearch",
            SearchSource::YoutubeMusic => "ytmsearch",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub uploader: String,
    pub duration: Duration,
    pub source: SearchSource,
}

#[derive(Clone, Debug)]
pub struct PlaylistEntry {
    pub url: String,
    pub title: String,
    pub uploader: String,
    pub id: String,
}

#[derive(Clone, Debug, Default)]
pub struct ExtractedMetadata {
    pub title: String,
    pub uploader: String,
    pub duration: Duration,
    pub id: String,
    pub filesize: Option<u64>,
}

/// Flags shared by every invocation.
fn common_args(cmd: &mut Command) {
    cmd.args([
        "--quiet",
        "--ignore-config",
        "--socket-timeout",
        "30",
        "--retries",
        "20",
        "--fragment-retries",
        "20",
        "--extractor-args",
        "youtube:player_client=android,web",
    ]);

    let cfg = config();
    if let Some(cookies) = &cfg.youtube_cookies {
        cmd.arg("--cookies").arg(cookies);
    }
    if let Some(proxy) = &cfg.youtube_proxy {
        cmd.arg("--proxy").arg(proxy);
    }
}

fn spawn(args: &[&str]) -> std::io::Result<Command> {
    let mut cmd = Command::new(EXTRACTOR_BIN);
    common_args(&mut cmd);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    Ok(cmd)
}

/// Runs `ytsearch<N>:<q>` or `ytmsearch<N>:<q>` in flat-playlist mode and
/// parses the tab-separated `url\ttitle\tuploader\tduration` output.
pub async fn search(query: &str, source: SearchSource, n: usize) -> Result<Vec<SearchResult>, ResolveError> {
    let search_term = format!("{}{}:{}", source.prefix(), n, query);
    let mut cmd = spawn(&[
        "--flat-playlist",
        "--print",
        "%(url)s\t%(title)s\t%(uploader)s\t%(duration)s",
        &search_term,
    ])
    .map_err(|e| ResolveError::Extractor(e.to_string()))?;

    let output = cmd.output().await.map_err(|e| ResolveError::Extractor(e.to_string()))?;
    if !output.status.success() {
        warn!(stderr = %String::from_utf8_lossy(&output.stderr), "extractor search failed");
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut results = Vec::new();
    for line in stdout.lines() {
        let mut parts = line.splitn(4, '\t');
        let (Some(url), Some(title), Some(uploader), Some(duration)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        results.push(SearchResult {
            url: url.to_string(),
            title: title.to_string(),
            uploader: uploader.to_string(),
            duration: parse_duration_secs(duration),
            source,
        });
    }
    Ok(results)
}

/// `--skip-download --print "%(title)s\t%(uploader)s\t%(duration)s\t%(id)s\t%(filesize,filesize_approx)s"`
pub async fn metadata(url: &str) -> Result<ExtractedMetadata, ResolveError> {
    let mut cmd = spawn(&[
        "--skip-download",
        "--print",
        "%(title)s\t%(uploader)s\t%(duration)s\t%(id)s\t%(filesize,filesize_approx)s",
        url,
    ])
    .map_err(|e| ResolveError::Extractor(e.to_string()))?;

    let output = cmd.output().await.map_err(|e| ResolveError::Extractor(e.to_string()))?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    if looks_drm_protected(&stderr) {
        return Err(ResolveError::DrmProtected);
    }
    if !output.status.success() {
        return Err(ResolveError::Extractor(stderr.trim().to_string()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().next().ok_or_else(|| ResolveError::Extractor("empty metadata output".into()))?;
    let mut parts = line.splitn(5, '\t');
    let title = parts.next().unwrap_or_default().to_string();
    let uploader = parts.next().unwrap_or_default().to_string();
    let duration = parse_duration_secs(parts.next().unwrap_or_default());
    let id = parts.next().unwrap_or_default().to_string();
    let filesize = parts.next().and_then(|s| s.trim().parse::<u64>().ok());

    Ok(ExtractedMetadata { title, uploader, duration, id, filesize })
}

/// Flat-playlist extraction, tab-separated `url\ttitle\tuploader\tid`.
pub async fn playlist(url: &str, max_entries: usize) -> Result<Vec<PlaylistEntry>, ResolveError> {
    let mut cmd = spawn(&[
        "--yes-playlist",
        "--flat-playlist",
        "--playlist-end",
        &max_entries.to_string(),
        "--print",
        "%(url)s\t%(title)s\t%(uploader)s\t%(id)s",
        url,
    ])
    .map_err(|e| ResolveError::Extractor(e.to_string()))?;

    let output = cmd.output().await.map_err(|e| ResolveError::Extractor(e.to_string()))?;
    if !output.status.success() {
        return Err(ResolveError::Extractor(String::from_utf8_lossy(&output.stderr).trim().to_string()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut entries = Vec::new();
    for line in stdout.lines().take(max_entries) {
        let mut parts = line.splitn(4, '\t');
        let (Some(url), Some(title), Some(uploader), Some(id)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        entries.push(PlaylistEntry {
            url: url.to_string(),
            title: title.to_string(),
            uploader: uploader.to_string(),
            id: id.to_string(),
        });
    }
    Ok(entries)
}

/// Spawns the streaming child process for a single track. `seek_secs`, when
/// set, is passed as `--ss` (used for beyond-buffer-seek fragments).
/// Format selector and `-o -` stream to stdout.
pub fn spawn_stream(url: &str, seek_secs: Option<f64>) -> std::io::Result<Child> {
    let mut cmd = Command::new(EXTRACTOR_BIN);
    common_args(&mut cmd);
    cmd.args([
        "--no-playlist",
        "-f",
        "bestaudio[ext=webm]/bestaudio[ext=m4a]/bestaudio/best",
        "-o",
        "-",
    ]);
    if let Some(secs) = seek_secs {
        cmd.arg("--downloader-args").arg(format!("ffmpeg:-ss {secs}"));
    }
    cmd.arg(url);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.spawn()
}

/// Returns `true` when the extractor's stderr suggests killed-by-signal or
/// a broken pipe, both of which are benign when the caller cancelled the
/// child itself.
pub fn is_benign_cancellation(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("broken pipe") || lower.contains("killed by signal") || lower.contains("sigpipe")
}

pub fn looks_drm_protected(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("drm") || lower.contains("this video is drm protected")
}

fn parse_duration_secs(raw: &str) -> Duration {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or_default()
}

pub fn cache_part_path(cache_root: &std::path::Path, id: &str) -> PathBuf {
    cache_root.join(format!("{id}.webm.part"))
}

pub fn cache_final_path(cache_root: &std::path::Path, id: &str) -> PathBuf {
    cache_root.join(format!("{id}.webm"))
}

pub fn cache_meta_path(cache_root: &std::path::Path, id: &str) -> PathBuf {
    cache_root.join(format!("{id}.meta"))
}

pub fn fragment_part_path(cache_root: &std::path::Path, id: &str, target_ms: u128) -> PathBuf {
    cache_root.join(format!("{id}_{target_ms}.webm.part"))
}

pub fn fragment_final_path(cache_root: &std::path::Path, id: &str, target_ms: u128) -> PathBuf {
    cache_root.join(format!("{id}_{target_ms}.webm"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benign_cancellation_detection() {
        assert!(is_benign_cancellation("ERROR: ffmpeg exited: broken pipe"));
        assert!(is_benign_cancellation("process killed by signal 15"));
        assert!(!is_benign_cancellation("ERROR: Video unavailable"));
    }

    #[test]
    fn drm_detection() {
        assert!(looks_drm_protected("This content is DRM protected."));
        assert!(!looks_drm_protected("Video unavailable"));
    }

    #[test]
    fn duration_parsing_handles_garbage() {
        assert_eq!(parse_duration_secs("NA"), Duration::default());
        assert_eq!(parse_duration_secs("12.5"), Duration::from_secs_f64(12.5));
    }
}
