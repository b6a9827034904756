//! `/cowsay` — render text through the cowsay bubble as a fenced code block.

use serenity::builder::{CreateCommand, CreateCommandOption};
use serenity::model::application::{CommandDataOptionValue, CommandInteraction, CommandOptionType};

use crate::error::BotError;

pub fn cowsay_command() -> CreateCommand {
    CreateCommand::new("cowsay")
        .description("Make the cow say something")
        .add_option(CreateCommandOption::new(CommandOptionType::String, "text", "what the cow should say").required(true))
}

pub async fn run(command: &CommandInteraction) -> Result<String, BotError> {
    let text = command.data.options.iter().find(|o| o.name == "text").and_then(|o| match &o.value {
        CommandDataOptionValue::String(s) => Some(s.clone()),
        _ => None,
    });

    let Some(text) = text else {
        return Ok("Text is required".to_string());
    };

    Ok(format!("```\n{}\n```", crate::cowsay::say(&text)))
}
