//! `/remind` — schedule and list per-user reminders.

use chrono::Utc;
use serenity::builder::{CreateCommand, CreateCommandOption};
use serenity::client::Context;
use serenity::model::application::{CommandDataOptionValue, CommandInteraction, CommandOptionType};

use crate::commands::AppState;
use crate::error::BotError;

pub fn remind_command() -> CreateCommand {
    CreateCommand::new("remind")
        .description("Set or list reminders")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "in", "duration from now, e.g. 10m, 2h (omit to list reminders)")
                .required(false),
        )
        .add_option(CreateCommandOption::new(CommandOptionType::String, "about", "what to remind you about").required(false))
}

pub async fn run(_ctx: &Context, command: &CommandInteraction, app: &AppState) -> Result<String, BotError> {
    let in_opt = command.data.options.iter().find(|o| o.name == "in").and_then(|o| match &o.value {
        CommandDataOptionValue::String(s) => Some(s.clone()),
        _ => None,
    });
    let about = command.data.options.iter().find(|o| o.name == "about").and_then(|o| match &o.value {
        CommandDataOptionValue::String(s) => Some(s.clone()),
        _ => None,
    });

    match (in_opt, about) {
        (Some(in_str), Some(body)) => {
            let duration = humantime::parse_duration(&in_str)
                .map_err(|_| BotError::InvalidInput(format!("invalid duration: {in_str}")))?;
            let remind_at = Utc::now() + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());

            app.db.add_reminder(command.user.id, command.channel_id, remind_at, &body).await?;
            Ok(format!("I'll remind you about \"{body}\" in {in_str}"))
        },
        _ => {
            let reminders = app.db.reminders_for(command.user.id).await?;
            if reminders.is_empty() {
                return Ok("You have no pending reminders".to_string());
            }
            let mut out = String::from("**Your reminders:**\n");
            for r in reminders {
                let remaining = r.remind_at - Utc::now().timestamp();
                out.push_str(&format!("- {} (in ~{}s): {}\n", r.id, remaining.max(0), r.body));
            }
            Ok(out)
        },
    }
}
