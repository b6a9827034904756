//! Slash-command and voice-panel-component routing.
//!
//! Grounded on songbird's `examples/serenity/voice/src/main.rs` shim,
//! generalized from a single `EventHandler` bound to one prefix-command
//! crate into one bound to the full set of slash commands this bot exposes.
//! Every handler defers immediately, then edits the deferred response —
//! matching the way `voice::status::StatusManager` treats a REST call as
//! something to issue once and report on, not something to block a gateway
//! event loop over.

mod connectfour;
mod cowsay;
mod markov;
mod music;
mod remind;

use std::sync::Arc;

use serenity::async_trait;
use serenity::builder::{CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse};
use serenity::client::{Context, EventHandler};
use serenity::model::application::{Command, CommandInteraction, ComponentInteraction, Interaction};
use serenity::model::gateway::Ready;
use serenity::model::voice::VoiceState;
use serenity::prelude::TypeMapKey;
use tracing::{error, info, warn};

use crate::connectfour::ConnectFourRegistry;
use crate::db::Database;
use crate::markov::MarkovChain;
use crate::voice::VoiceSystem;

/// Shared application state, installed into the gateway client's `TypeMap`
/// at startup (`ClientBuilder::type_map_insert`) since `Context` carries no
/// direct generic accessor for arbitrary shared data.
pub struct AppState {
    pub voice: Arc<VoiceSystem>,
    pub db: Arc<Database>,
    pub connect_four: Arc<ConnectFourRegistry>,
    pub markov: Arc<MarkovChain>,
}

impl TypeMapKey for AppState {
    type Value = Arc<AppState>;
}

async fn state(ctx: &Context) -> Arc<AppState> {
    ctx.data.read().await.get::<AppState>().expect("AppState not installed").clone()
}

pub struct Handler;

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, "gateway session ready");

        let commands = vec![
            music::play_command(),
            music::skip_command(),
            music::stop_command(),
            music::queue_command(),
            music::volume_command(),
            music::loop_command(),
            music::autoplay_command(),
            music::seek_command(),
            remind::remind_command(),
            connectfour::connectfour_command(),
            markov::markov_command(),
            cowsay::cowsay_command(),
        ];

        if let Err(e) = Command::set_global_commands(&ctx.http, commands).await {
            error!(error = %e, "failed to register global slash commands");
        }

        crate::status_rotation::spawn(ctx);
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command) => dispatch_command(&ctx, &command).await,
            Interaction::Component(component) => dispatch_component(&ctx, &component).await,
            _ => {},
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let _ = old;
        let Some(guild_id) = new.guild_id else { return };
        let bot_id = ctx.cache.current_user().id;
        let app = state(&ctx).await;
        app.voice.handle_voice_state_update(&ctx, guild_id, bot_id, &new).await;
    }
}

async fn dispatch_command(ctx: &Context, command: &CommandInteraction) {
    if let Err(e) = command.defer(ctx).await {
        warn!(error = %e, "failed to defer interaction");
        return;
    }

    let app = state(ctx).await;
    let result = match command.data.name.as_str() {
        "play" => music::play(ctx, command, &app).await,
        "skip" => music::skip(ctx, command, &app).await,
        "stop" => music::stop(ctx, command, &app).await,
        "queue" => music::queue(ctx, command, &app).await,
        "volume" => music::volume(ctx, command, &app).await,
        "loop" => music::toggle_loop(ctx, command, &app).await,
        "autoplay" => music::toggle_autoplay(ctx, command, &app).await,
        "seek" => music::seek(ctx, command, &app).await,
        "remind" => remind::run(ctx, command, &app).await,
        "connectfour" => connectfour::run(ctx, command, &app).await,
        "markov" => markov::run(ctx, command, &app).await,
        "cowsay" => cowsay::run(command).await,
        other => Ok(format!("unknown command: {other}")),
    };

    let content = result.unwrap_or_else(|e| format!("Failed: {e}"));
    if let Err(e) = command.edit_response(ctx, EditInteractionResponse::new().content(content)).await {
        warn!(error = %e, "failed to edit deferred response");
    }
}

async fn dispatch_component(ctx: &Context, component: &ComponentInteraction) {
    let custom_id = component.data.custom_id.to_string();

    if let Some(action) = custom_id.strip_prefix("voice:panel:") {
        let app = state(ctx).await;
        let outcome = music::handle_panel_action(ctx, component, action, &app).await;
        if let Err(e) = outcome {
            warn!(error = %e, action, "voice panel action failed");
        }
        return;
    }

    if let Some(rest) = custom_id.strip_prefix("c4:") {
        let app = state(ctx).await;
        if let Err(e) = connectfour::handle_move(ctx, component, rest, &app).await {
            warn!(error = %e, "connect four move failed");
        }
    }
}

pub(crate) fn ephemeral(content: impl Into<String>) -> CreateInteractionResponse {
    CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().content(content.into()).ephemeral(true))
}
