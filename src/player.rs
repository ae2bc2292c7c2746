//! A player is whatever can sit on one side of a game. Protocol families
//! are tagged variants behind one capability surface; games never know
//! which protocol they are driving.

use crate::board::{Board, Mv};
use crate::engine::{EngineState, EventSink, UciEngine};
use crate::tc::GameClock;

pub enum Player {
    Uci(UciEngine),
    #[cfg(test)]
    Scripted(crate::testutil::ScriptedPlayer),
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Player::Uci(_) => write!(f, "Player::Uci({})", self.name()),
            #[cfg(test)]
            Player::Scripted(_) => write!(f, "Player::Scripted({})", self.name()),
        }
    }
}

impl Player {
    pub fn name(&self) -> &str {
        match self {
            Player::Uci(e) => e.name(),
            #[cfg(test)]
            Player::Scripted(p) => p.name(),
        }
    }

    pub fn state(&self) -> EngineState {
        match self {
            Player::Uci(e) => e.state(),
            #[cfg(test)]
            Player::Scripted(p) => p.state(),
        }
    }

    pub fn kick_start(&mut self) {
        match self {
            Player::Uci(e) => e.kick_start(),
            #[cfg(test)]
            Player::Scripted(p) => p.kick_start(),
        }
    }

    pub fn attach(&mut self, sink: EventSink, ponder_mode: bool) {
        match self {
            Player::Uci(e) => e.attach(sink, ponder_mode),
            #[cfg(test)]
            Player::Scripted(p) => p.attach(sink, ponder_mode),
        }
    }

    pub fn detach(&mut self) {
        match self {
            Player::Uci(e) => e.detach(),
            #[cfg(test)]
            Player::Scripted(p) => p.detach(),
        }
    }

    pub fn is_safe_to_detach(&self) -> bool {
        match self {
            Player::Uci(e) => e.is_safe_to_detach(),
            #[cfg(test)]
            Player::Scripted(p) => p.is_safe_to_detach(),
        }
    }

    pub fn prepare_to_detach(&mut self) {
        match self {
            Player::Uci(e) => e.prepare_to_detach(),
            #[cfg(test)]
            Player::Scripted(p) => p.prepare_to_detach(),
        }
    }

    pub fn new_game(&mut self) {
        match self {
            Player::Uci(e) => e.new_game(),
            #[cfg(test)]
            Player::Scripted(p) => p.new_game(),
        }
    }

    pub fn go(&mut self, board: &dyn Board, clock: &GameClock) -> bool {
        match self {
            Player::Uci(e) => e.go(board, clock),
            #[cfg(test)]
            Player::Scripted(p) => p.go(board, clock),
        }
    }

    pub fn go_ponder(&mut self, guess: Option<Mv>, board: &dyn Board, clock: &GameClock) -> bool {
        match self {
            Player::Uci(e) => e.go_ponder(guess, board, clock),
            #[cfg(test)]
            Player::Scripted(p) => p.go_ponder(guess, board, clock),
        }
    }

    pub fn stop_thinking(&mut self) -> bool {
        match self {
            Player::Uci(e) => e.stop_thinking(),
            #[cfg(test)]
            Player::Scripted(p) => p.stop_thinking(),
        }
    }

    pub fn quit(&mut self) {
        match self {
            Player::Uci(e) => e.quit(),
            #[cfg(test)]
            Player::Scripted(p) => p.quit(),
        }
    }

    pub fn kill(&mut self) {
        match self {
            Player::Uci(e) => e.kill(),
            #[cfg(test)]
            Player::Scripted(p) => p.kill(),
        }
    }

    pub fn tick(&mut self) {
        match self {
            Player::Uci(e) => e.tick(),
            #[cfg(test)]
            Player::Scripted(p) => p.tick(),
        }
    }
}
