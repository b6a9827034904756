//! Process-wide registry of per-guild voice sessions.
//!
//! Grounded on songbird's `songbird::Songbird` manager: one
//! process-wide handle, one entry per guild, constructed lazily and torn
//! down on disconnect. This registry additionally owns the two pieces of
//! state that must outlive any single guild's session — the shared search
//! cache and the on-disk track cache directory — neither of which the
//! songbird's manager needs, since it never caches decoded audio itself.

pub mod cache;
pub mod connection;
pub mod constants;
pub mod downloader;
pub mod error;
pub mod extractor;
pub mod frame_provider;
pub mod novelty;
pub mod queue;
pub mod resolver;
pub mod scheduler;
pub mod session;
pub mod status;
pub mod tail_reader;
pub mod track;
pub mod transcoder;
pub mod util;

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serenity::client::Context;
use serenity::model::id::{ChannelId, GuildId, UserId};
use serenity::model::voice::VoiceState;
use songbird::Songbird;
use tracing::{info, warn};

use crate::voice::cache::CacheStore;
use crate::voice::constants::{JOIN_BACKOFFS, JOIN_OPEN_TIMEOUT};
use crate::voice::error::SessionError;
use crate::voice::resolver::QueryCache;
use crate::voice::session::Session;

/// Registry of live per-guild sessions plus the process-wide resources they
/// share: the search cache, the on-disk track cache, and the `songbird`
/// connection manager.
pub struct VoiceSystem {
    sessions: DashMap<GuildId, Arc<Session>>,
    songbird: Arc<Songbird>,
    http: Arc<serenity::http::Http>,
    query_cache: Arc<QueryCache>,
    cache: Arc<CacheStore>,
}

impl VoiceSystem {
    /// Wipes the track cache directory for a fresh start — playback never
    /// resumes across a process restart — and constructs the registry.
    pub async fn new(songbird: Arc<Songbird>, http: Arc<serenity::http::Http>, cache_root: PathBuf) -> Arc<Self> {
        let cache = Arc::new(CacheStore::new(cache_root));
        cache.wipe().await;

        Arc::new(Self {
            sessions: DashMap::new(),
            songbird,
            http,
            query_cache: QueryCache::new(),
            cache,
        })
    }

    pub fn session(&self, guild_id: GuildId) -> Option<Arc<Session>> {
        self.sessions.get(&guild_id).map(|entry| entry.clone())
    }

    pub fn require_session(&self, guild_id: GuildId) -> Result<Arc<Session>, SessionError> {
        self.session(guild_id).ok_or(SessionError::NoSession)
    }

    /// Returns the guild's session, creating (and joining) one if none
    /// exists yet. If an existing session is bound to a different channel,
    /// moves it and clears the old channel's status.
    pub async fn prepare(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Arc<Session>, SessionError> {
        if let Some(existing) = self.session(guild_id) {
            let previous = existing.channel_id();
            if previous != channel_id {
                existing.set_channel_id(channel_id);
                existing.refresh_status();
            }
            return Ok(existing);
        }

        self.join(guild_id, channel_id).await
    }

    /// Joins `channel_id` in `guild_id`, retrying with the exponential
    /// backoff schedule in [`JOIN_BACKOFFS`] and a per-attempt open timeout.
    /// Idempotent if a session already holds this exact channel.
    pub async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Arc<Session>, SessionError> {
        if let Some(existing) = self.session(guild_id) {
            if existing.channel_id() == channel_id && existing.is_joined() {
                return Ok(existing);
            }
        }

        let mut last_err = SessionError::JoinFailed { attempts: 0 };
        for (attempt, backoff) in JOIN_BACKOFFS.iter().enumerate() {
            if attempt > 0 {
                connection::warn_join_retry(attempt as u32, guild_id);
            }
            tokio::time::sleep(*backoff).await;

            let attempted = tokio::time::timeout(
                JOIN_OPEN_TIMEOUT,
                Session::create(
                    guild_id,
                    channel_id,
                    self.songbird.clone(),
                    self.http.clone(),
                    self.query_cache.clone(),
                    self.cache.clone(),
                ),
            )
            .await;

            match attempted {
                Ok(Ok(session)) => {
                    connection::debug_joined(guild_id, channel_id);
                    self.sessions.insert(guild_id, session.clone());
                    return Ok(session);
                },
                Ok(Err(e)) => last_err = e,
                Err(_) => last_err = SessionError::JoinTimeout(JOIN_OPEN_TIMEOUT),
            }
        }

        warn!(guild = %guild_id, attempts = JOIN_BACKOFFS.len(), error = %last_err, "exhausted voice join attempts");
        Err(last_err)
    }

    /// Removes and tears down the guild's session. Wipes the track cache if
    /// no sessions remain afterward.
    pub async fn leave(&self, guild_id: GuildId) {
        if let Some((_, session)) = self.sessions.remove(&guild_id) {
            session.teardown().await;
            info!(guild = %guild_id, "left voice channel");
        }
        if self.sessions.is_empty() {
            self.cache.wipe().await;
        }
    }

    /// Tears down every session in parallel, then wipes the track cache.
    pub async fn shutdown(&self) {
        let guild_ids: Vec<GuildId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        let sessions: Vec<Arc<Session>> =
            guild_ids.into_iter().filter_map(|id| self.sessions.remove(&id)).map(|(_, s)| s).collect();

        futures::future::join_all(sessions.iter().map(|s| s.teardown())).await;
        self.cache.wipe().await;
        info!("voice system shut down");
    }

    /// Handles a gateway voice-state-update event: bot self-disconnect is
    /// treated as a `leave`, a bot self channel-move updates the session and
    /// its status, and any other user's state change re-evaluates whether
    /// the session's channel is empty of real listeners.
    pub async fn handle_voice_state_update(&self, ctx: &Context, guild_id: GuildId, bot_id: UserId, new: &VoiceState) {
        if new.user_id == bot_id {
            match new.channel_id {
                None => self.leave(guild_id).await,
                Some(channel_id) => {
                    if let Some(session) = self.session(guild_id) {
                        if session.channel_id() != channel_id {
                            session.set_channel_id(channel_id);
                            session.refresh_status();
                        }
                    }
                },
            }
            return;
        }

        let Some(session) = self.session(guild_id) else { return };
        let channel_id = session.channel_id();
        let listeners = count_listeners(ctx, guild_id, channel_id, bot_id);
        session.set_empty_channel_paused(listeners == 0);
    }
}

/// Counts non-bot, non-deafened members currently in `channel_id`, using the
/// gateway cache's voice-state snapshot for the guild.
fn count_listeners(ctx: &Context, guild_id: GuildId, channel_id: ChannelId, bot_id: UserId) -> usize {
    let Some(guild) = ctx.cache.guild(guild_id) else { return 0 };
    guild
        .voice_states
        .values()
        .filter(|vs| vs.channel_id == Some(channel_id))
        .filter(|vs| vs.user_id != bot_id)
        .filter(|vs| !vs.deaf && !vs.self_deaf)
        .count()
}
