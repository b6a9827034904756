//! The per-guild `Session` coordinator.
//!
//! Grounded on songbird's `driver::Driver` + `tracks::queue`
//! combination: one mutex-guarded queue, a long-lived processor task that
//! drains it, and cancellation scopes nested per active stream — but
//! unlike songbird's own queue, this one also owns resolution and download
//! scheduling, since this engine has no separate "enqueue, then later
//! someone calls play()" split.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex as SyncMutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::Songbird;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::voice::cache::CacheStore;
use crate::voice::connection::VoiceConnection;
use crate::voice::constants::{
    CONNECTION_MONITOR_INTERVAL, CURRENT_TRACK_PRIORITY, FRAGMENT_CREATE_TIMEOUT, INTER_TRACK_QUIET,
    PLAYBACK_STARTED_LOG_WAIT,
};
use crate::voice::downloader::Downloader;
use crate::voice::error::{DownloadError, SessionError, TrackError};
use crate::voice::extractor;
use crate::voice::frame_provider::{self, PauseGate};
use crate::voice::novelty::{self, History};
use crate::voice::queue;
use crate::voice::resolver::{self, QueryCache, QueryKind};
use crate::voice::scheduler::DownloadScheduler;
use crate::voice::status::StatusManager;
use crate::voice::tail_reader::{TailReader, TailSignal};
use crate::voice::track::{QueueMode, Track};
use crate::voice::transcoder::{self, TranscoderHandle};
use crate::voice::util::{new_cancel_token, spawn_guarded, CancelToken};

struct SessionFlags {
    autoplay: AtomicBool,
    looping: AtomicBool,
    skip_loop_once: AtomicBool,
    joined: AtomicBool,
    paused_for_empty_channel: AtomicBool,
    paused_by_user: AtomicBool,
}

impl Default for SessionFlags {
    fn default() -> Self {
        Self {
            autoplay: AtomicBool::new(false),
            looping: AtomicBool::new(false),
            skip_loop_once: AtomicBool::new(false),
            joined: AtomicBool::new(false),
            paused_for_empty_channel: AtomicBool::new(false),
            paused_by_user: AtomicBool::new(false),
        }
    }
}

struct QueueState {
    items: VecDeque<Arc<Track>>,
    current: Option<Arc<Track>>,
    autoplay_prefetch: Option<Arc<Track>>,
}

/// Per-guild coordinator: owns the queue, the active stream's cancellation
/// scope, and every long-lived task tied to this guild's playback.
pub struct Session {
    pub guild_id: GuildId,
    channel_id: SyncMutex<ChannelId>,
    queue: SyncMutex<QueueState>,
    queue_updated: Notify,
    history: SyncMutex<History>,
    flags: SessionFlags,
    pub volume: Arc<AtomicI32>,
    pause_gate: Arc<PauseGate>,
    session_scope: CancelToken,
    stream_scope: SyncMutex<CancelToken>,
    current_handle: SyncMutex<Option<Arc<TranscoderHandle>>>,
    status: Arc<StatusManager>,
    scheduler: DownloadScheduler,
    query_cache: Arc<QueryCache>,
    cache: Arc<CacheStore>,
    connection: VoiceConnection,
}

impl Session {
    pub async fn create(
        guild_id: GuildId,
        channel_id: ChannelId,
        songbird: Arc<Songbird>,
        http: Arc<serenity::http::Http>,
        query_cache: Arc<QueryCache>,
        cache: Arc<CacheStore>,
    ) -> Result<Arc<Self>, SessionError> {
        let connection = VoiceConnection::join(songbird, guild_id, channel_id).await?;
        let status = Arc::new(StatusManager::new(http, channel_id));

        let session = Arc::new_cyclic(|weak: &Weak<Session>| {
            let weak = weak.clone();
            Self {
                guild_id,
                channel_id: SyncMutex::new(channel_id),
                queue: SyncMutex::new(QueueState { items: VecDeque::new(), current: None, autoplay_prefetch: None }),
                queue_updated: Notify::new(),
                history: SyncMutex::new(History::new()),
                flags: SessionFlags::default(),
                volume: Arc::new(AtomicI32::new(100)),
                pause_gate: PauseGate::new(),
                session_scope: new_cancel_token(),
                stream_scope: SyncMutex::new(new_cancel_token()),
                current_handle: SyncMutex::new(None),
                status,
                scheduler: DownloadScheduler::new(move |track: Arc<Track>| {
                    let weak = weak.clone();
                    async move {
                        if let Some(session) = weak.upgrade() {
                            session.prepare_track(track).await;
                        }
                    }
                }),
                query_cache,
                cache,
                connection,
            }
        });

        session.flags.joined.store(true, Ordering::Release);
        session.spawn_queue_processor();
        session.spawn_connection_monitor();
        Ok(session)
    }

    pub fn channel_id(&self) -> ChannelId {
        *self.channel_id.lock()
    }

    pub fn set_channel_id(&self, channel_id: ChannelId) {
        *self.channel_id.lock() = channel_id;
    }

    pub fn is_joined(&self) -> bool {
        self.flags.joined.load(Ordering::Acquire)
    }

    pub fn set_autoplay(&self, on: bool) {
        self.flags.autoplay.store(on, Ordering::Release);
    }

    pub fn autoplay(&self) -> bool {
        self.flags.autoplay.load(Ordering::Acquire)
    }

    pub fn set_looping(&self, on: bool) {
        self.flags.looping.store(on, Ordering::Release);
    }

    pub fn looping(&self) -> bool {
        self.flags.looping.load(Ordering::Acquire)
    }

    pub fn set_volume(&self, vol: i32) {
        self.volume.store(vol.clamp(0, 200), Ordering::Release);
    }

    pub fn current_title(&self) -> Option<String> {
        self.queue.lock().current.as_ref().map(|t| t.title())
    }

    /// Snapshots the current track's title followed by every queued track's
    /// title, in play order, for display in a `/queue` response.
    pub fn queue_titles(&self) -> Vec<String> {
        let state = self.queue.lock();
        state.current.iter().chain(state.items.iter()).map(|t| t.title()).collect()
    }

    /// Enqueues `tracks` per `mode`, scheduling the new head with
    /// [`CURRENT_TRACK_PRIORITY`] if the queue was empty.
    pub fn enqueue(&self, tracks: Vec<Arc<Track>>, mode: QueueMode) {
        {
            let mut state = self.queue.lock();
            if matches!(mode, QueueMode::Now) {
                let old_queue = std::mem::take(&mut state.items);
                for track in &old_queue {
                    self.cleanup_track(track);
                }
                if let Some(current) = state.current.take() {
                    self.cleanup_track(&current);
                }
                state.autoplay_prefetch = None;
                self.flags.skip_loop_once.store(true, Ordering::Release);
                self.cancel_stream();
            }
            queue::apply(&mut state.items, mode, tracks);
        }
        self.queue_updated.notify_one();
    }

    /// Resolves `url_or_query` into one or more tracks, handling playlist
    /// extraction, and enqueues them.
    pub async fn play(&self, query: &str, mode: QueueMode) -> Result<(String, usize), TrackError> {
        let normalized = resolver::normalize_query(query);

        let tracks = match normalized.kind {
            QueryKind::Playlist => {
                let entries = extractor::playlist(&normalized.text, 100)
                    .await
                    .map_err(TrackError::Resolve)?;
                if entries.is_empty() {
                    return Err(TrackError::NoSongFound(query.to_string()));
                }
                entries
                    .into_iter()
                    .map(|entry| {
                        let track = Track::new(entry.url);
                        {
                            let mut fields = track.fields.lock();
                            fields.title = entry.title;
                            fields.uploader = entry.uploader;
                        }
                        *track.id.lock() = entry.id;
                        track.mark_resolved();
                        track.metadata_known.close();
                        track
                    })
                    .collect::<Vec<_>>()
            },
            _ => vec![Track::new(normalized.text)],
        };

        let label = tracks[0].url.clone();
        let count = tracks.len();

        for track in &tracks {
            self.scheduler.schedule(track.clone(), CURRENT_TRACK_PRIORITY as i64);
        }
        self.enqueue(tracks, mode);

        Ok((label, count))
    }

    pub fn skip(&self) -> Option<String> {
        let title = self.current_title();
        self.flags.skip_loop_once.store(true, Ordering::Release);
        self.cancel_stream();
        title
    }

    pub fn stop(&self) {
        self.flags.skip_loop_once.store(true, Ordering::Release);
        self.session_scope.cancel();
        self.cancel_stream();

        let mut state = self.queue.lock();
        for track in state.items.drain(..) {
            self.cleanup_track(&track);
        }
        if let Some(current) = state.current.take() {
            self.cleanup_track(&current);
        }
        state.autoplay_prefetch = None;
        drop(state);

        self.status.clear();
    }

    /// Seeks the playing track by `delta` (positive or negative), in 48kHz
    /// sample units, clamping to its duration and switching to a freshly
    /// downloaded fragment if the target lands beyond what's buffered.
    pub async fn seek_relative(&self, delta: i64) -> Result<(), SessionError> {
        let handle = self.current_handle.lock().clone().ok_or(SessionError::QueueEmpty)?;
        let current = self.queue.lock().current.clone().ok_or(SessionError::QueueEmpty)?;

        let current_samples = handle.timestamp_samples() as i64;
        let duration_samples = (current.duration().as_secs_f64() * crate::voice::constants::SAMPLE_RATE_HZ as f64) as i64;
        let target = (current_samples + delta).clamp(0, duration_samples.max(0)) as u64;

        let beyond_buffer = current
            .estimated_buffered_duration()
            .map(|buffered| target as f64 / crate::voice::constants::SAMPLE_RATE_HZ as f64 > buffered.as_secs_f64())
            .unwrap_or(false);

        if beyond_buffer {
            self.seek_beyond_buffer(&current, target).await?;
        }

        handle.request_seek(target);
        Ok(())
    }

    async fn seek_beyond_buffer(&self, track: &Arc<Track>, target_samples: u64) -> Result<(), SessionError> {
        let target_ms = (target_samples as u128 * 1000) / crate::voice::constants::SAMPLE_RATE_HZ as u128;
        let id = track.id();
        let fragment_part = extractor::fragment_part_path(self.cache.root(), &id, target_ms);
        let final_path = extractor::fragment_final_path(self.cache.root(), &id, target_ms);

        let created = Arc::new(Notify::new());
        let signal = TailSignal::new();
        let target_secs = target_samples as f64 / crate::voice::constants::SAMPLE_RATE_HZ as f64;

        track.reset_for_fragment(target_samples, fragment_part.clone());
        *track.tail_signal.lock() = Some(signal.clone());

        let track_clone = track.clone();
        let url = track.url.clone();
        let cancel = self.stream_scope.lock().clone();
        let ready_gate = created.clone();
        spawn_guarded("seek-fragment-downloader", async move {
            let _ = Downloader::run(
                track_clone,
                url,
                fragment_part,
                final_path,
                Some(target_secs),
                true,
                signal,
                ready_gate,
                cancel,
            )
            .await;
        });

        tokio::time::timeout(FRAGMENT_CREATE_TIMEOUT, created.notified())
            .await
            .map_err(|_| SessionError::SeekAckTimeout(FRAGMENT_CREATE_TIMEOUT))?;

        Ok(())
    }

    fn cleanup_track(&self, track: &Arc<Track>) {
        let id = track.id();
        if !id.is_empty() {
            let cache = self.cache.clone();
            let id = id.clone();
            spawn_guarded("track-cleanup", async move {
                cache.remove_track_files(&id).await;
            });
        }
    }

    fn cancel_stream(&self) {
        let old = {
            let mut scope = self.stream_scope.lock();
            std::mem::replace(&mut *scope, new_cancel_token())
        };
        old.cancel();
    }

    pub fn refresh_status(&self) {
        let title = self.current_title();
        let paused = self.pause_gate.is_paused();
        let prefix = if paused { "\u{23f8}\u{fe0f} " } else { "" };
        match title {
            Some(t) => self.status.set(format!("{prefix}{t}")),
            None => self.status.clear(),
        }
    }

    pub fn set_empty_channel_paused(&self, paused: bool) {
        let was_paused = self.flags.paused_for_empty_channel.swap(paused, Ordering::AcqRel);
        if was_paused == paused {
            return;
        }
        self.recompute_pause_gate();
    }

    /// Toggles playback pause under direct user control (e.g. the voice
    /// panel's play/pause button), independent of the empty-channel gate.
    /// Returns the new paused state.
    pub fn toggle_user_pause(&self) -> bool {
        let paused = !self.flags.paused_by_user.load(Ordering::Acquire);
        self.flags.paused_by_user.store(paused, Ordering::Release);
        self.recompute_pause_gate();
        paused
    }

    fn recompute_pause_gate(&self) {
        let paused = self.flags.paused_for_empty_channel.load(Ordering::Acquire)
            || self.flags.paused_by_user.load(Ordering::Acquire);
        self.pause_gate.set_paused(paused);
        self.refresh_status();
    }

    /// Resolves `track`'s metadata (if unresolved) and downloads it into the
    /// session's cache directory. Runs on the download scheduler's worker
    /// pool; errors are recorded on the track itself rather than returned,
    /// since the queue processor discovers them asynchronously via
    /// `Track::has_error`.
    async fn prepare_track(self: Arc<Self>, track: Arc<Track>) {
        if track.has_error() || track.is_downloaded() {
            return;
        }

        if !track.is_resolved() {
            match extractor::metadata(&track.url).await {
                Ok(meta) => {
                    {
                        let mut fields = track.fields.lock();
                        fields.title = meta.title;
                        fields.uploader = meta.uploader;
                        fields.duration = meta.duration;
                    }
                    *track.id.lock() = meta.id;
                    track.mark_resolved();
                },
                Err(e) => {
                    warn!(guild = %self.guild_id, url = %track.url, error = %e, "track resolution failed");
                    track.set_error(TrackError::Resolve(e));
                    track.metadata_known.close();
                    track.ready.close();
                    return;
                },
            }
        }
        track.metadata_known.close();

        let id = track.id();
        let dest_part = extractor::cache_part_path(self.cache.root(), &id);
        let final_path = extractor::cache_final_path(self.cache.root(), &id);
        *track.cache_path.lock() = final_path.clone();

        let signal = TailSignal::new();
        *track.tail_signal.lock() = Some(signal.clone());

        let ready_gate = Arc::new(Notify::new());
        let forward_track = track.clone();
        let forward_gate = ready_gate.clone();
        spawn_guarded("track-ready-forwarder", async move {
            forward_gate.notified().await;
            forward_track.ready.close();
        });

        let cancel = self.stream_scope.lock().clone();
        let result =
            Downloader::run(track.clone(), track.url.clone(), dest_part, final_path, None, false, signal, ready_gate, cancel)
                .await;

        if let Err(e) = result {
            if !matches!(e, DownloadError::Cancelled) {
                warn!(guild = %self.guild_id, url = %track.url, error = %e, "track download failed");
                track.set_error(TrackError::Download(e));
            }
            track.ready.close();
        }
    }

    fn spawn_queue_processor(self: &Arc<Self>) {
        let session = self.clone();
        spawn_guarded("session-queue-processor", async move {
            session.queue_processor_loop().await;
        });
    }

    async fn queue_processor_loop(self: Arc<Self>) {
        loop {
            if self.session_scope.is_cancelled() {
                return;
            }

            let next = {
                let mut state = self.queue.lock();
                state.current = None;
                state.items.pop_front()
            };

            let track = match next {
                Some(track) => track,
                None if self.autoplay() => match self.promote_or_fetch_autoplay().await {
                    Some(track) => track,
                    None => {
                        self.wait_for_queue_update().await;
                        continue;
                    },
                },
                None => {
                    self.wait_for_queue_update().await;
                    continue;
                },
            };

            {
                let mut state = self.queue.lock();
                state.current = Some(track.clone());
            }
            self.scheduler.schedule(track.clone(), CURRENT_TRACK_PRIORITY as i64);

            self.flags.skip_loop_once.store(false, Ordering::Release);
            self.stream_current_track(&track).await;

            let skip_loop = self.flags.skip_loop_once.swap(false, Ordering::AcqRel);
            if self.looping() && !skip_loop {
                self.queue.lock().items.push_front(track.clone());
            } else {
                self.cleanup_track(&track);
            }

            tokio::time::sleep(INTER_TRACK_QUIET).await;
        }
    }

    async fn wait_for_queue_update(&self) {
        tokio::select! {
            _ = self.queue_updated.notified() => {},
            _ = self.session_scope.cancelled() => {},
        }
    }

    async fn promote_or_fetch_autoplay(self: &Arc<Self>) -> Option<Arc<Track>> {
        let prefetched = self.queue.lock().autoplay_prefetch.take();
        if let Some(track) = prefetched {
            return Some(track);
        }

        let candidate_url = {
            let state = self.queue.lock();
            state.current.as_ref().map(|t| t.url.clone())
        }?;

        let candidates = match resolver::search(&self.query_cache, &candidate_url).await {
            Ok(c) => c,
            Err(e) => {
                warn!(guild = %self.guild_id, error = %e, "autoplay search failed");
                return None;
            },
        };

        let picked = {
            let history = self.history.lock();
            novelty::pick_novel(
                &history,
                &candidates,
                |c| c.url.as_str(),
                |c| c.title.as_str(),
                |c| c.uploader.as_str(),
            )
            .cloned()
        }?;

        let id = resolver::video_id_from_url(&picked.url);
        self.history.lock().push(id, &picked.title, &picked.uploader);

        let track = Track::new(picked.url);
        {
            let mut fields = track.fields.lock();
            fields.title = picked.title;
            fields.uploader = picked.uploader;
        }
        Some(track)
    }

    async fn stream_current_track(&self, track: &Arc<Track>) {
        let cancel = self.stream_scope.lock().clone();

        tokio::select! {
            _ = track.metadata_known.wait() => {},
            _ = cancel.cancelled() => return,
            _ = self.session_scope.cancelled() => return,
        }
        if track.has_error() {
            warn!(guild = %self.guild_id, url = %track.url, "track errored before a readable source was available");
            return;
        }

        tokio::select! {
            _ = track.ready.wait() => {},
            _ = cancel.cancelled() => return,
            _ = self.session_scope.cancelled() => return,
        }
        if track.has_error() {
            warn!(guild = %self.guild_id, url = %track.url, "track errored while downloading");
            return;
        }

        let Some(signal) = track.tail_signal.lock().clone() else {
            error!(guild = %self.guild_id, url = %track.url, "track marked ready with no tail signal attached");
            return;
        };
        let path = track.cache_path.lock().clone();
        let reader = match TailReader::open(path, signal, cancel.clone()) {
            Ok(reader) => Arc::new(reader),
            Err(e) => {
                error!(guild = %self.guild_id, error = %e, "failed to open tail reader");
                return;
            },
        };

        let (producer, consumer) = frame_provider::channel(self.pause_gate.clone());
        let seek_offset = track.seek_offset.load(Ordering::Acquire);
        let handle = transcoder::spawn(
            reader,
            track.duration(),
            seek_offset,
            self.volume.clone(),
            cancel.clone(),
            move |frame| {
                producer.push_blocking(frame);
            },
            || {},
            || {},
        );
        *self.current_handle.lock() = Some(handle.clone());

        track.mark_started();
        spawn_guarded("playback-started-logger", {
            let track = track.clone();
            let guild_id = self.guild_id;
            async move {
                tokio::time::timeout(PLAYBACK_STARTED_LOG_WAIT, track.playback_started.wait()).await.ok();
                if track.playback_started.is_closed() {
                    info!(guild = %guild_id, title = %track.title(), "playing track");
                }
            }
        });

        self.connection.play(consumer, cancel.clone()).await;
        track.playback_started.close();
        self.refresh_status();

        cancel.cancelled().await;
        *self.current_handle.lock() = None;
        track.finished.close();
    }

    fn spawn_connection_monitor(self: &Arc<Self>) {
        let session = self.clone();
        spawn_guarded("session-connection-monitor", async move {
            let mut interval = tokio::time::interval(CONNECTION_MONITOR_INTERVAL);
            loop {
                interval.tick().await;
                if session.session_scope.is_cancelled() {
                    return;
                }
                if session.is_joined() && !session.connection.is_connected().await {
                    session.flags.joined.store(false, Ordering::Release);
                    warn!(guild = %session.guild_id, "voice connection dropped, will rejoin on next play");
                }
            }
        });
    }

    pub async fn teardown(&self) {
        self.session_scope.cancel();
        self.cancel_stream();
        self.connection.stop_all().await;
        self.connection.leave().await;
        self.status.clear();
    }
}
