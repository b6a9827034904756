//! Debounced per-guild voice-channel status updater.
//!
//! Grounded on songbird's `driver::Driver::set_speaking` pattern
//! of pushing a small, frequently-changing piece of state to the gateway
//! without flooding it: here, a single-slot "latest requested status"
//! cell drained by a dedicated task, rather than one REST call per
//! `RefreshStatus()` invocation.

use std::sync::Arc;

use serenity::http::Http;
use serenity::model::id::ChannelId;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::voice::util::spawn_guarded;

/// Coalesces rapid-fire status updates for one voice channel into the REST
/// `PUT /channels/{id}/voice-status` call, keeping only the latest value
/// any time more than one update lands before the previous call returns.
pub struct StatusManager {
    tx: watch::Sender<Option<String>>,
}

impl StatusManager {
    pub fn new(http: Arc<Http>, channel: ChannelId) -> Self {
        let (tx, mut rx) = watch::channel(None::<String>);

        spawn_guarded("voice-status-updater", async move {
            loop {
                if rx.changed().await.is_err() {
                    return;
                }
                let Some(status) = rx.borrow_and_update().clone() else { continue };
                if let Err(e) = put_voice_status(&http, channel, &status).await {
                    warn!(channel = %channel, error = %e, "failed to update voice channel status");
                }
            }
        });

        Self { tx }
    }

    /// Requests `status` be shown; coalesces with any update still pending.
    pub fn set(&self, status: impl Into<String>) {
        let _ = self.tx.send(Some(status.into()));
    }

    pub fn clear(&self) {
        let _ = self.tx.send(Some(String::new()));
    }
}

/// The voice-status endpoint has no first-class wrapper at the pinned
/// `serenity` version, so this issues the `PUT` directly against the same
/// REST base serenity's `Http` client uses internally.
const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

async fn put_voice_status(http: &Http, channel: ChannelId, status: &str) -> Result<(), reqwest::Error> {
    let truncated: String = status.chars().take(128).collect();
    let body = serde_json::json!({ "status": truncated });
    http.client()
        .put(format!("{DISCORD_API_BASE}/channels/{channel}/voice-status"))
        .header("Authorization", format!("Bot {}", http.token()))
        .json(&body)
        .send()
        .await?
        .error_for_status()?;
    debug!(channel = %channel, status = %truncated, "updated voice channel status");
    Ok(())
}
