//! Turn-based two-player Connect Four board state machine.
//!
//! Grounded on the voice registry's own `DashMap<GuildId, Arc<Session>>`
//! shape (`voice::mod::VoiceSystem`): one process-wide map keyed by the
//! message id hosting the board, guarding each game the same way.

use std::sync::Arc;

use dashmap::DashMap;
use serenity::model::id::{MessageId, UserId};

pub const WIDTH: usize = 7;
pub const HEIGHT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Player {
    Red,
    Yellow,
}

impl Player {
    fn other(self) -> Self {
        match self {
            Player::Red => Player::Yellow,
            Player::Yellow => Player::Red,
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Player::Red => "🔴",
            Player::Yellow => "🟡",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    InProgress,
    Won(Player),
    Draw,
}

#[derive(Debug)]
pub enum DropError {
    GameOver,
    NotYourTurn,
    ColumnFull,
    InvalidColumn,
}

/// A single game's board, players, and turn state. Columns are indexed
/// 0..WIDTH; each column fills bottom-up.
#[derive(Debug)]
pub struct ConnectFourGame {
    pub players: [UserId; 2],
    board: [[Option<Player>; HEIGHT]; WIDTH],
    turn: Player,
    pub state: GameState,
}

impl ConnectFourGame {
    pub fn new(red: UserId, yellow: UserId) -> Self {
        Self { players: [red, yellow], board: [[None; HEIGHT]; WIDTH], turn: Player::Red, state: GameState::InProgress }
    }

    pub fn current_player_id(&self) -> UserId {
        match self.turn {
            Player::Red => self.players[0],
            Player::Yellow => self.players[1],
        }
    }

    fn player_for(&self, user_id: UserId) -> Option<Player> {
        if user_id == self.players[0] {
            Some(Player::Red)
        } else if user_id == self.players[1] {
            Some(Player::Yellow)
        } else {
            None
        }
    }

    /// Drops `user_id`'s piece into `column`, advancing turn and evaluating
    /// the win/draw condition. Errors without mutating state if the move is
    /// illegal.
    pub fn drop_piece(&mut self, user_id: UserId, column: usize) -> Result<GameState, DropError> {
        if self.state != GameState::InProgress {
            return Err(DropError::GameOver);
        }
        if self.player_for(user_id) != Some(self.turn) {
            return Err(DropError::NotYourTurn);
        }
        if column >= WIDTH {
            return Err(DropError::InvalidColumn);
        }

        let slot = self.board[column].iter().position(|cell| cell.is_none()).ok_or(DropError::ColumnFull)?;
        self.board[column][slot] = Some(self.turn);

        self.state = if Self::is_win(&self.board, column, slot, self.turn) {
            GameState::Won(self.turn)
        } else if self.board.iter().all(|col| col.iter().all(|cell| cell.is_some())) {
            GameState::Draw
        } else {
            GameState::InProgress
        };

        self.turn = self.turn.other();
        Ok(self.state)
    }

    pub fn cell(&self, column: usize, row: usize) -> Option<Player> {
        self.board[column][row]
    }

    fn is_win(board: &[[Option<Player>; HEIGHT]; WIDTH], col: usize, row: usize, player: Player) -> bool {
        const DIRECTIONS: [(isize, isize); 4] = [(1, 0), (0, 1), (1, 1), (1, -1)];

        DIRECTIONS.iter().any(|&(dc, dr)| {
            let mut count = 1;
            count += Self::count_direction(board, col, row, dc, dr, player);
            count += Self::count_direction(board, col, row, -dc, -dr, player);
            count >= 4
        })
    }

    fn count_direction(
        board: &[[Option<Player>; HEIGHT]; WIDTH],
        col: usize,
        row: usize,
        dc: isize,
        dr: isize,
        player: Player,
    ) -> usize {
        let mut count = 0;
        let mut c = col as isize + dc;
        let mut r = row as isize + dr;
        while c >= 0 && c < WIDTH as isize && r >= 0 && r < HEIGHT as isize {
            if board[c as usize][r as usize] != Some(player) {
                break;
            }
            count += 1;
            c += dc;
            r += dr;
        }
        count
    }

    /// Renders the board as a grid of Discord emoji, one row of text per
    /// board row, top row first.
    pub fn render(&self) -> String {
        let mut rows = Vec::with_capacity(HEIGHT);
        for row in (0..HEIGHT).rev() {
            let mut line = String::new();
            for col in 0..WIDTH {
                line.push_str(match self.board[col][row] {
                    Some(p) => p.emoji(),
                    None => "⚫",
                });
            }
            rows.push(line);
        }
        rows.join("\n")
    }
}

/// Process-wide registry of in-progress games, keyed by the message id of
/// the board they're rendered on.
#[derive(Default)]
pub struct ConnectFourRegistry {
    games: DashMap<MessageId, ConnectFourGame>,
}

impl ConnectFourRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn start(&self, message_id: MessageId, red: UserId, yellow: UserId) {
        self.games.insert(message_id, ConnectFourGame::new(red, yellow));
    }

    pub fn with_game<T>(&self, message_id: MessageId, f: impl FnOnce(&mut ConnectFourGame) -> T) -> Option<T> {
        self.games.get_mut(&message_id).map(|mut entry| f(&mut entry))
    }

    pub fn remove(&self, message_id: MessageId) {
        self.games.remove(&message_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (UserId, UserId) {
        (UserId::new(1), UserId::new(2))
    }

    #[test]
    fn horizontal_win_is_detected() {
        let (red, yellow) = ids();
        let mut game = ConnectFourGame::new(red, yellow);
        for col in 0..3 {
            assert_eq!(game.drop_piece(red, col).unwrap(), GameState::InProgress);
            assert_eq!(game.drop_piece(yellow, col).unwrap(), GameState::InProgress);
        }
        assert_eq!(game.drop_piece(red, 3).unwrap(), GameState::Won(Player::Red));
    }

    #[test]
    fn vertical_win_is_detected() {
        let (red, yellow) = ids();
        let mut game = ConnectFourGame::new(red, yellow);
        for _ in 0..3 {
            game.drop_piece(red, 0).unwrap();
            game.drop_piece(yellow, 1).unwrap();
        }
        assert_eq!(game.drop_piece(red, 0).unwrap(), GameState::Won(Player::Red));
    }

    #[test]
    fn diagonal_win_is_detected() {
        let (red, yellow) = ids();
        let mut game = ConnectFourGame::new(red, yellow);
        // Build a rising diagonal for red at (0,0), (1,1), (2,2), (3,3),
        // with yellow filling underneath columns 2 and 3 so red's drops
        // land at the right height.
        let moves = [
            (red, 0),
            (yellow, 1),
            (red, 1),
            (yellow, 2),
            (red, 3),
            (yellow, 2),
            (red, 2),
            (yellow, 3),
            (red, 0),
            (yellow, 3),
            (red, 3),
        ];
        let mut last = GameState::InProgress;
        for (player, col) in moves {
            last = game.drop_piece(player, col).unwrap();
        }
        assert_eq!(last, GameState::Won(Player::Red));
    }

    #[test]
    fn full_column_is_rejected() {
        let (red, yellow) = ids();
        let mut game = ConnectFourGame::new(red, yellow);
        for _ in 0..3 {
            game.drop_piece(red, 0).unwrap();
            game.drop_piece(yellow, 0).unwrap();
        }
        assert!(matches!(game.drop_piece(red, 0).unwrap(), GameState::InProgress));
        assert!(matches!(game.drop_piece(yellow, 0), Err(DropError::ColumnFull)));
    }

    #[test]
    fn wrong_turn_is_rejected() {
        let (red, yellow) = ids();
        let mut game = ConnectFourGame::new(red, yellow);
        assert!(matches!(game.drop_piece(yellow, 0), Err(DropError::NotYourTurn)));
    }
}
