//! Bot-wide presence rotation, independent of any guild's voice status.
//!
//! Grounded on [`crate::voice::status::StatusManager`]'s dedicated-task
//! shape, but driven by a fixed interval instead of a `watch` channel since
//! there's no caller-supplied value to coalesce — just a list to cycle.

use std::time::Duration;

use serenity::client::Context;
use serenity::gateway::ActivityData;
use serenity::model::user::OnlineStatus;
use tracing::debug;

use crate::voice::util::spawn_guarded;

const ROTATE_INTERVAL: Duration = Duration::from_secs(5 * 60);

const ACTIVITIES: &[&str] = &[
    "the queue",
    "static on every channel",
    "with fire",
    "for /remind pings",
    "Connect Four against itself",
];

/// Spawns the task that cycles the bot's gateway presence through
/// [`ACTIVITIES`] on [`ROTATE_INTERVAL`], using the shard handle on `ctx`
/// so the rotation keeps running regardless of which event last fired.
pub fn spawn(ctx: Context) {
    spawn_guarded("status-rotation", async move {
        let mut index = 0usize;
        let mut interval = tokio::time::interval(ROTATE_INTERVAL);
        loop {
            interval.tick().await;
            let activity = ACTIVITIES[index % ACTIVITIES.len()];
            index = index.wrapping_add(1);
            ctx.shard.set_presence(Some(ActivityData::watching(activity)), OnlineStatus::Online);
            debug!(activity, "rotated bot presence");
        }
    });
}
