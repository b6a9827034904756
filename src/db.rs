//! SQLite-backed reminder storage and the background sweeper that delivers
//! them.
//!
//! Grounded on `ArcticFoxNetwork-Rustle`'s `database/repository.rs` +
//! `database/schema.rs` split: a `SqlitePool` wrapped in a thin struct,
//! migrations run once via idempotent `CREATE TABLE IF NOT EXISTS`
//! statements, per-feature CRUD functions taking `&Pool<Sqlite>` directly
//! rather than a DAO trait.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serenity::http::Http;
use serenity::model::id::{ChannelId, UserId};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, Pool, Sqlite};
use tracing::{debug, warn};

use crate::voice::util::spawn_guarded;

const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, Clone, FromRow)]
pub struct Reminder {
    pub id: i64,
    pub user_id: i64,
    pub channel_id: i64,
    pub remind_at: i64,
    pub body: String,
}

impl Reminder {
    pub fn user_id(&self) -> UserId {
        UserId::new(self.user_id as u64)
    }

    pub fn channel_id(&self) -> ChannelId {
        ChannelId::new(self.channel_id as u64)
    }
}

/// Connection pool plus the reminder sweeper's lifetime.
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn connect(path: &Path) -> Result<Self, sqlx::Error> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new().max_connections(5).connect(&url).await?;

        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL").execute(&pool).await?;

        run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn add_reminder(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
        remind_at: DateTime<Utc>,
        body: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO reminders (user_id, channel_id, remind_at, body) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id.get() as i64)
        .bind(channel_id.get() as i64)
        .bind(remind_at.timestamp())
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn reminders_for(&self, user_id: UserId) -> Result<Vec<Reminder>, sqlx::Error> {
        sqlx::query_as::<_, Reminder>(
            "SELECT id, user_id, channel_id, remind_at, body FROM reminders WHERE user_id = ? ORDER BY remind_at",
        )
        .bind(user_id.get() as i64)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn delete_reminder(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM reminders WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn due_reminders(&self, now: i64) -> Result<Vec<Reminder>, sqlx::Error> {
        sqlx::query_as::<_, Reminder>(
            "SELECT id, user_id, channel_id, remind_at, body FROM reminders WHERE remind_at <= ?",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
    }

    /// Spawns the background task that fires and deletes due reminders
    /// every [`SWEEP_INTERVAL`].
    pub fn spawn_sweeper(self: Arc<Self>, http: Arc<Http>) {
        spawn_guarded("reminder-sweeper", async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(e) = self.sweep_once(&http).await {
                    warn!(error = %e, "reminder sweep failed");
                }
            }
        });
    }

    async fn sweep_once(&self, http: &Http) -> Result<(), sqlx::Error> {
        let due = self.due_reminders(Utc::now().timestamp()).await?;
        for reminder in due {
            let content = format!("⏰ Reminder: {}", reminder.body);
            if let Err(e) = reminder.channel_id().say(http, content).await {
                warn!(reminder_id = reminder.id, error = %e, "failed to deliver reminder");
            }
            self.delete_reminder(reminder.id).await?;
            debug!(reminder_id = reminder.id, "reminder delivered and removed");
        }
        Ok(())
    }
}

async fn run_migrations(pool: &Pool<Sqlite>) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reminders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            channel_id INTEGER NOT NULL,
            remind_at INTEGER NOT NULL,
            body TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_reminders_remind_at ON reminders(remind_at);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_fetch_reminder_round_trips() {
        let db = Database::connect(Path::new(":memory:")).await.unwrap();
        let user = UserId::new(1);
        let channel = ChannelId::new(2);
        db.add_reminder(user, channel, Utc::now(), "water the plants").await.unwrap();

        let reminders = db.reminders_for(user).await.unwrap();
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].body, "water the plants");
    }

    #[tokio::test]
    async fn due_reminders_are_found_by_timestamp() {
        let db = Database::connect(Path::new(":memory:")).await.unwrap();
        let user = UserId::new(1);
        let channel = ChannelId::new(2);
        let past = Utc::now() - chrono::Duration::seconds(60);
        db.add_reminder(user, channel, past, "past due").await.unwrap();

        let due = db.due_reminders(Utc::now().timestamp()).await.unwrap();
        assert_eq!(due.len(), 1);
    }
}
