//! Bridge between this engine's frame provider and songbird's
//! voice socket driver.
//!
//! The voice connection is treated as an external collaborator, obtained
//! from the gateway client and only ever referenced, never owned. Rather
//! than hand-rolling RTP/UDP/encryption, this module depends on `songbird`
//! itself for the gateway handshake and packet transport, and feeds it
//! already-Opus-encoded frames using the same DCA1 framing `songbird`'s own
//! `input::dca` reader understands — reusing songbird's registered Opus
//! decoder instead of writing a second one.

use std::io::{self, Read};
use std::sync::Arc;

use serenity::model::id::{ChannelId, GuildId};
use songbird::id::{ChannelId as SongbirdChannelId, GuildId as SongbirdGuildId};
use songbird::input::{AudioStream, Input, LiveInput};
use songbird::tracks::TrackHandle;
use songbird::{Call, Event, EventContext, EventHandler, Songbird, TrackEvent};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::voice::error::SessionError;
use crate::voice::frame_provider::FrameConsumer;
use crate::voice::util::CancelToken;

/// Cancels a stream's scope once `songbird` reports the track has ended,
/// so the session's playback loop (parked on `cancel.cancelled()`) wakes up
/// for tracks that finish on their own instead of via skip/stop.
struct EndNotifier {
    cancel: CancelToken,
}

#[async_trait::async_trait]
impl EventHandler for EndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        self.cancel.cancel();
        None
    }
}

/// Serializes one encoded frame as a DCA1-style length-prefixed chunk: a
/// little-endian `u16` byte count followed by the raw Opus packet.
fn frame_to_dca_chunk(data: &[u8]) -> Vec<u8> {
    let mut chunk = Vec::with_capacity(2 + data.len());
    chunk.extend_from_slice(&(data.len() as u16).to_le_bytes());
    chunk.extend_from_slice(data);
    chunk
}

/// A `Read` source that drains a [`FrameConsumer`] into a live DCA1
/// bytestream. Runs on a dedicated blocking thread handed to `songbird`'s
/// format probe, matching how songbird's `dca()` reader is driven
/// from synchronous I/O.
struct LiveDcaSource {
    handle: tokio::runtime::Handle,
    consumer: FrameConsumer,
    pending: std::collections::VecDeque<u8>,
    header_emitted: bool,
}

const DCA1_EMPTY_METADATA_HEADER: &[u8] = b"DCA1\x02\x00\x00\x00{}";

impl Read for LiveDcaSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.header_emitted {
            self.header_emitted = true;
            self.pending.extend(DCA1_EMPTY_METADATA_HEADER.iter().copied());
        }

        while self.pending.is_empty() {
            let handle = self.handle.clone();
            let next = handle.block_on(self.consumer.next());
            match next {
                crate::voice::frame_provider::NextFrame::Audio(frame) => {
                    self.pending.extend(frame_to_dca_chunk(&frame.data));
                },
                crate::voice::frame_provider::NextFrame::Silence => {
                    self.pending.extend(frame_to_dca_chunk(&crate::voice::frame_provider::silence_packet()));
                },
                crate::voice::frame_provider::NextFrame::Ended => {
                    return Ok(0);
                },
            }
        }

        let n = buf.len().min(self.pending.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.pending.pop_front().expect("checked non-empty above");
        }
        Ok(n)
    }
}

/// Wraps the process-wide `songbird` manager and this guild's `Call` handle.
pub struct VoiceConnection {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
}

impl VoiceConnection {
    pub async fn join(manager: Arc<Songbird>, guild_id: GuildId, channel_id: ChannelId) -> Result<Self, SessionError> {
        let call = manager
            .join(SongbirdGuildId::from(guild_id), SongbirdChannelId::from(channel_id))
            .await
            .map_err(|_| SessionError::JoinFailed { attempts: 1 })?;

        Ok(Self { manager, guild_id, call })
    }

    pub async fn is_connected(&self) -> bool {
        self.call.lock().await.current_connection().is_some()
    }

    pub async fn leave(&self) {
        let _ = self.manager.remove(SongbirdGuildId::from(self.guild_id)).await;
    }

    /// Attaches `consumer` as the active track. `cancel` is the stream's
    /// cancellation scope; it fires when `songbird` reports the track ended
    /// on its own, so the session's playback loop isn't left waiting on a
    /// cancellation that only skip/stop would otherwise send.
    pub async fn play(&self, consumer: FrameConsumer, cancel: CancelToken) -> TrackHandle {
        let source = LiveDcaSource {
            handle: tokio::runtime::Handle::current(),
            consumer,
            pending: std::collections::VecDeque::new(),
            header_emitted: false,
        };

        let input = Input::Live(
            LiveInput::Raw(AudioStream { input: Box::new(source), hint: Some({
                let mut hint = songbird::input::core::probe::Hint::new();
                hint.with_extension("dca");
                hint
            }) }),
            None,
        );

        let mut call = self.call.lock().await;
        let handle = call.play_input(input);
        if let Err(e) = handle.add_event(Event::Track(TrackEvent::End), EndNotifier { cancel }) {
            warn!(guild = %self.guild_id, error = %e, "failed to attach track-end handler");
        }
        handle
    }

    pub async fn stop_all(&self) {
        self.call.lock().await.stop();
    }
}

pub fn warn_join_retry(attempt: u32, guild_id: GuildId) {
    warn!(attempt, guild = %guild_id, "retrying voice channel join");
}

pub fn debug_joined(guild_id: GuildId, channel_id: ChannelId) {
    debug!(guild = %guild_id, channel = %channel_id, "joined voice channel");
}
