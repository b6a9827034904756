//! `/markov` — generate text from the seeded order-2 chain.

use serenity::builder::{CreateCommand, CreateCommandOption};
use serenity::client::Context;
use serenity::model::application::{CommandDataOptionValue, CommandInteraction, CommandOptionType};

use crate::commands::AppState;
use crate::error::BotError;

pub fn markov_command() -> CreateCommand {
    CreateCommand::new("markov")
        .description("Generate rambling text from a seed corpus")
        .add_option(CreateCommandOption::new(CommandOptionType::String, "prompt", "seed the generation with these words").required(false))
}

pub async fn run(_ctx: &Context, command: &CommandInteraction, app: &AppState) -> Result<String, BotError> {
    let prompt = command.data.options.iter().find(|o| o.name == "prompt").and_then(|o| match &o.value {
        CommandDataOptionValue::String(s) => Some(s.clone()),
        _ => None,
    });

    let text = match prompt {
        Some(p) => app.markov.generate_from(&p),
        None => app.markov.generate(),
    };

    Ok(if text.is_empty() { "…nothing came to mind".to_string() } else { text })
}
