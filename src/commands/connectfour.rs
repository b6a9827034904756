//! `/connectfour` — challenge another member to a board rendered with
//! column-select buttons, one game per hosting message id.

use serenity::builder::{CreateActionRow, CreateButton, CreateCommand, CreateCommandOption, CreateInteractionResponse, CreateInteractionResponseMessage};
use serenity::client::Context;
use serenity::model::application::{ButtonStyle, CommandDataOptionValue, CommandInteraction, CommandOptionType, ComponentInteraction};

use crate::commands::{ephemeral, AppState};
use crate::connectfour::{DropError, GameState};
use crate::error::BotError;

pub fn connectfour_command() -> CreateCommand {
    CreateCommand::new("connectfour")
        .description("Challenge another member to Connect Four")
        .add_option(CreateCommandOption::new(CommandOptionType::User, "opponent", "who to challenge").required(true))
}

fn column_buttons(disabled: &[usize]) -> CreateActionRow {
    CreateActionRow::Buttons(
        (0..7)
            .map(|col| {
                CreateButton::new(format!("c4:{col}"))
                    .style(ButtonStyle::Secondary)
                    .label((col + 1).to_string())
                    .disabled(disabled.contains(&col))
            })
            .collect(),
    )
}

pub async fn run(ctx: &Context, command: &CommandInteraction, app: &AppState) -> Result<String, BotError> {
    let opponent = command.data.options.iter().find(|o| o.name == "opponent").and_then(|o| match &o.value {
        CommandDataOptionValue::User(id) => Some(*id),
        _ => None,
    });

    let Some(opponent) = opponent else {
        return Ok("An opponent is required".to_string());
    };
    if opponent == command.user.id {
        return Ok("You can't challenge yourself".to_string());
    }

    let reply = command
        .channel_id
        .send_message(
            ctx,
            serenity::builder::CreateMessage::new()
                .content(format!("Connect Four: <@{}> (🔴) vs <@{}> (🟡) — red's turn", command.user.id, opponent))
                .components(vec![column_buttons(&[])]),
        )
        .await?;

    app.connect_four.start(reply.id, command.user.id, opponent);
    Ok("Game started".to_string())
}

pub async fn handle_move(ctx: &Context, component: &ComponentInteraction, rest: &str, app: &AppState) -> Result<(), BotError> {
    let Ok(column) = rest.parse::<usize>() else { return Ok(()) };
    let message_id = component.message.id;

    let outcome = app.connect_four.with_game(message_id, |game| game.drop_piece(component.user.id, column));

    let Some(result) = outcome else {
        respond(ctx, component, ephemeral("This game is no longer active")).await?;
        return Ok(());
    };

    match result {
        Ok(state) => {
            let rendered = app.connect_four.with_game(message_id, |game| game.render()).unwrap_or_default();
            let (content, disabled) = match state {
                GameState::InProgress => {
                    let next = app.connect_four.with_game(message_id, |game| game.current_player_id());
                    (format!("{rendered}\n\n<@{}>'s turn", next.unwrap_or(component.user.id)), vec![])
                },
                GameState::Won(winner) => {
                    app.connect_four.remove(message_id);
                    (format!("{rendered}\n\n{} wins!", winner.emoji()), (0..7).collect())
                },
                GameState::Draw => {
                    app.connect_four.remove(message_id);
                    (format!("{rendered}\n\nIt's a draw"), (0..7).collect())
                },
            };

            let update = CreateInteractionResponse::UpdateMessage(
                CreateInteractionResponseMessage::new().content(content).components(vec![column_buttons(&disabled)]),
            );
            respond(ctx, component, update).await?;
        },
        Err(DropError::NotYourTurn) => {
            respond(ctx, component, ephemeral("It's not your turn")).await?;
        },
        Err(DropError::ColumnFull) => {
            respond(ctx, component, ephemeral("That column is full")).await?;
        },
        Err(DropError::GameOver) => {
            respond(ctx, component, ephemeral("That game has already ended")).await?;
        },
        Err(DropError::InvalidColumn) => {
            respond(ctx, component, ephemeral("Invalid column")).await?;
        },
    }

    Ok(())
}

async fn respond(ctx: &Context, component: &ComponentInteraction, builder: CreateInteractionResponse) -> Result<(), BotError> {
    component.create_response(ctx, builder).await?;
    Ok(())
}
