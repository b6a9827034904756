//! Process entry point: configuration, PID lock, gateway client, and the
//! shared state every slash command and the voice engine reach through.
//!
//! Grounded on songbird's own `examples/serenity/voice/src/main.rs`
//! bootstrap shape (`Client::builder(...).register_songbird_with(...)`),
//! generalized from a prefix-command `StandardFramework` to the slash
//! command `EventHandler` in [`commands::Handler`].

mod commands;
mod config;
mod connectfour;
mod cowsay;
mod db;
mod error;
mod markov;
mod pidlock;
mod status_rotation;
mod voice;

use std::sync::Arc;

use serenity::client::Client;
use serenity::model::gateway::GatewayIntents;
use songbird::SerenityInit;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::commands::{AppState, Handler};
use crate::connectfour::ConnectFourRegistry;
use crate::db::Database;
use crate::markov::MarkovChain;
use crate::pidlock::PidLock;
use crate::voice::VoiceSystem;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    dotenvy::dotenv().ok();

    let cfg = match config::init() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        },
    };

    let _pid_lock = match PidLock::acquire(&cfg.pid_lock_path) {
        Ok(lock) => lock,
        Err(e) => {
            error!(error = %e, "failed to acquire pid lock");
            std::process::exit(1);
        },
    };

    let db = match Database::connect(&cfg.database_path).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!(error = %e, "failed to open reminders database");
            std::process::exit(1);
        },
    };

    let intents = GatewayIntents::GUILD_VOICE_STATES | GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES;
    let songbird = songbird::Songbird::serenity();

    let mut client = Client::builder(&cfg.discord_token, intents)
        .event_handler(Handler)
        .register_songbird_with(songbird.clone())
        .await
        .expect("failed to construct gateway client");

    let voice = VoiceSystem::new(songbird, client.http.clone(), cfg.track_cache_dir.clone()).await;

    db.clone().spawn_sweeper(client.http.clone());

    {
        let mut data = client.data.write().await;
        data.insert::<AppState>(Arc::new(AppState {
            voice: voice.clone(),
            db: db.clone(),
            connect_four: ConnectFourRegistry::new(),
            markov: Arc::new(MarkovChain::seeded()),
        }));
    }

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received");
        voice.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    if let Err(e) = client.start().await {
        error!(error = %e, "client exited with an error");
    }
}
