//! Voice playback slash commands and the live panel's component actions.

use serenity::builder::{CreateActionRow, CreateButton, CreateCommand, CreateCommandOption, CreateMessage};
use serenity::client::Context;
use serenity::model::application::{ButtonStyle, CommandDataOptionValue, CommandInteraction, CommandOptionType, ComponentInteraction};
use serenity::model::id::ChannelId;

use crate::commands::AppState;
use crate::error::BotError;
use crate::voice::track::QueueMode;

fn string_option(command: &CommandInteraction, name: &str) -> Option<String> {
    command.data.options.iter().find(|o| o.name == name).and_then(|o| match &o.value {
        CommandDataOptionValue::String(s) => Some(s.clone()),
        _ => None,
    })
}

fn int_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command.data.options.iter().find(|o| o.name == name).and_then(|o| match &o.value {
        CommandDataOptionValue::Integer(v) => Some(*v),
        _ => None,
    })
}

fn bool_option(command: &CommandInteraction, name: &str) -> Option<bool> {
    command.data.options.iter().find(|o| o.name == name).and_then(|o| match &o.value {
        CommandDataOptionValue::Boolean(v) => Some(*v),
        _ => None,
    })
}

/// Finds the voice channel the invoking member is currently in, via the
/// gateway cache's guild snapshot.
fn caller_voice_channel(ctx: &Context, command: &CommandInteraction) -> Option<ChannelId> {
    let guild_id = command.guild_id?;
    let guild = ctx.cache.guild(guild_id)?;
    guild.voice_states.get(&command.user.id).and_then(|vs| vs.channel_id)
}

pub fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Play a track, queuing it according to the given mode")
        .add_option(CreateCommandOption::new(CommandOptionType::String, "query", "URL or search query").required(true))
        .add_option(CreateCommandOption::new(
            CommandOptionType::String,
            "mode",
            "now | next | a queue position (defaults to append)",
        ))
}

pub fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Skip the currently playing track")
}

pub fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Stop playback and clear the queue")
}

pub fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Show the current queue")
}

pub fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Set playback volume (0-200)")
        .add_option(CreateCommandOption::new(CommandOptionType::Integer, "level", "0-200").required(true).min_int_value(0).max_int_value(200))
}

pub fn loop_command() -> CreateCommand {
    CreateCommand::new("loop")
        .description("Toggle looping the current track")
        .add_option(CreateCommandOption::new(CommandOptionType::Boolean, "enabled", "on or off").required(true))
}

pub fn autoplay_command() -> CreateCommand {
    CreateCommand::new("autoplay")
        .description("Toggle autoplay of related tracks once the queue empties")
        .add_option(CreateCommandOption::new(CommandOptionType::Boolean, "enabled", "on or off").required(true))
}

pub fn seek_command() -> CreateCommand {
    CreateCommand::new("seek")
        .description("Seek relative to the current position, e.g. 10s, -30s, 1m")
        .add_option(CreateCommandOption::new(CommandOptionType::String, "offset", "duration literal, signed").required(true))
}

pub async fn play(ctx: &Context, command: &CommandInteraction, app: &AppState) -> Result<String, BotError> {
    let guild_id = command.guild_id.ok_or(BotError::Session(crate::voice::error::SessionError::NoSession))?;
    let query = string_option(command, "query").ok_or_else(|| BotError::InvalidInput("query is required".to_string()))?;
    let mode = string_option(command, "mode").map(|m| QueueMode::parse(&m)).unwrap_or(QueueMode::Append);

    let channel_id = caller_voice_channel(ctx, command)
        .ok_or(BotError::Session(crate::voice::error::SessionError::NotJoined))?;

    let session = app.voice.prepare(guild_id, channel_id).await?;
    let (label, count) = session.play(&query, mode).await?;

    spawn_panel(ctx, command.channel_id).await;

    Ok(if count > 1 {
        format!("Queued {count} tracks starting with **{label}**")
    } else {
        format!("Queued **{label}**")
    })
}

/// Posts the live voice panel once per `/play` invocation; the panel's
/// buttons route back through `voice:panel:<action>` component ids.
async fn spawn_panel(ctx: &Context, channel: ChannelId) {
    let row = CreateActionRow::Buttons(vec![
        CreateButton::new("voice:panel:playpause").style(ButtonStyle::Secondary).label("⏯️"),
        CreateButton::new("voice:panel:skip").style(ButtonStyle::Secondary).label("⏭️"),
        CreateButton::new("voice:panel:stop").style(ButtonStyle::Danger).label("⏹️"),
        CreateButton::new("voice:panel:loop").style(ButtonStyle::Secondary).label("🔁"),
        CreateButton::new("voice:panel:autoplay").style(ButtonStyle::Secondary).label("🔀"),
    ]);

    let _ = channel.send_message(ctx, CreateMessage::new().content("Now playing").components(vec![row])).await;
}

pub async fn skip(_ctx: &Context, command: &CommandInteraction, app: &AppState) -> Result<String, BotError> {
    let guild_id = command.guild_id.ok_or(BotError::Session(crate::voice::error::SessionError::NoSession))?;
    let session = app.voice.require_session(guild_id)?;
    match session.skip() {
        Some(title) => Ok(format!("Skipped **{title}**")),
        None => Ok("Nothing is playing".to_string()),
    }
}

pub async fn stop(_ctx: &Context, command: &CommandInteraction, app: &AppState) -> Result<String, BotError> {
    let guild_id = command.guild_id.ok_or(BotError::Session(crate::voice::error::SessionError::NoSession))?;
    let session = app.voice.require_session(guild_id)?;
    session.stop();
    Ok("Stopped and cleared the queue".to_string())
}

pub async fn queue(_ctx: &Context, command: &CommandInteraction, app: &AppState) -> Result<String, BotError> {
    let guild_id = command.guild_id.ok_or(BotError::Session(crate::voice::error::SessionError::NoSession))?;
    let session = app.voice.require_session(guild_id)?;
    let titles = session.queue_titles();
    if titles.is_empty() {
        return Ok("The queue is empty".to_string());
    }
    let mut out = String::from("**Queue:**\n");
    for (i, title) in titles.iter().enumerate() {
        out.push_str(&format!("{}. {title}\n", i + 1));
    }
    Ok(out)
}

pub async fn volume(_ctx: &Context, command: &CommandInteraction, app: &AppState) -> Result<String, BotError> {
    let guild_id = command.guild_id.ok_or(BotError::Session(crate::voice::error::SessionError::NoSession))?;
    let level = int_option(command, "level").unwrap_or(100);
    let session = app.voice.require_session(guild_id)?;
    session.set_volume(level as i32);
    Ok(format!("Volume set to {}", level.clamp(0, 200)))
}

pub async fn toggle_loop(_ctx: &Context, command: &CommandInteraction, app: &AppState) -> Result<String, BotError> {
    let guild_id = command.guild_id.ok_or(BotError::Session(crate::voice::error::SessionError::NoSession))?;
    let enabled = bool_option(command, "enabled").unwrap_or(false);
    let session = app.voice.require_session(guild_id)?;
    session.set_looping(enabled);
    Ok(format!("Looping {}", if enabled { "enabled" } else { "disabled" }))
}

pub async fn toggle_autoplay(_ctx: &Context, command: &CommandInteraction, app: &AppState) -> Result<String, BotError> {
    let guild_id = command.guild_id.ok_or(BotError::Session(crate::voice::error::SessionError::NoSession))?;
    let enabled = bool_option(command, "enabled").unwrap_or(false);
    let session = app.voice.require_session(guild_id)?;
    session.set_autoplay(enabled);
    Ok(format!("Autoplay {}", if enabled { "enabled" } else { "disabled" }))
}

pub async fn seek(_ctx: &Context, command: &CommandInteraction, app: &AppState) -> Result<String, BotError> {
    let guild_id = command.guild_id.ok_or(BotError::Session(crate::voice::error::SessionError::NoSession))?;
    let offset = string_option(command, "offset").ok_or_else(|| BotError::InvalidInput("offset is required".to_string()))?;

    let negative = offset.trim_start().starts_with('-');
    let stripped = offset.trim_start().trim_start_matches('-');
    let duration = humantime::parse_duration(stripped)
        .map_err(|_| BotError::InvalidInput(format!("invalid duration: {offset}")))?;

    let delta = duration.as_secs() as i64 * if negative { -1 } else { 1 };
    let session = app.voice.require_session(guild_id)?;
    session.seek_relative(delta).await?;
    Ok(format!("Seeked {offset}"))
}

/// Handles a voice panel button press. All actions are idempotent against
/// a missing session, since the panel can outlive the bot leaving.
pub async fn handle_panel_action(
    ctx: &Context,
    component: &ComponentInteraction,
    action: &str,
    app: &AppState,
) -> Result<(), BotError> {
    let Some(guild_id) = component.guild_id else { return Ok(()) };
    let Some(session) = app.voice.session(guild_id) else { return Ok(()) };

    match action {
        "playpause" => {
            session.toggle_user_pause();
        },
        "skip" => {
            session.skip();
        },
        "stop" => {
            session.stop();
        },
        "loop" => {
            session.set_looping(!session.looping());
        },
        "autoplay" => {
            session.set_autoplay(!session.autoplay());
        },
        "volup" => {
            session.set_volume(110);
        },
        "voldown" => {
            session.set_volume(90);
        },
        "close" => {
            let _ = component.message.delete(ctx).await;
            return Ok(());
        },
        _ => {},
    }

    session.refresh_status();
    Ok(())
}

