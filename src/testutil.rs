//! Scripted stand-ins for the external board contract and for engine
//! drivers, used to exercise the game and tournament state machines
//! without subprocesses or a real move generator.

use crate::board::{
    Board, GameResult, HistEntry, MoveNote, Mv, OpeningInfo, ProbeError, Side,
};
use crate::engine::{EngineState, EventSink};
use crate::tc::GameClock;
use std::collections::{HashMap, HashSet};
use std::fmt::Write;

/// Routes `log` output to stderr for tests that drive real subprocesses;
/// run with `RUST_LOG=trace` to see the wire traffic.
pub fn init_test_logging() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        flexi_logger::Logger::try_with_env().unwrap().start().ok();
    });
}

/// A board that believes whatever the test tells it: moves are legal unless
/// listed in `reject`, results appear at scripted history lengths.
#[derive(Default)]
pub struct ScriptedBoard {
    side: Side,
    hist: Vec<HistEntry>,
    start_fen: Option<String>,
    pub reject: HashSet<String>,
    pub rule_results: HashMap<usize, GameResult>,
    pub piece_count: u32,
    pub syzygy_result: Option<GameResult>,
    pub syzygy_error: bool,
    pub captures: HashSet<String>,
}

impl ScriptedBoard {
    pub fn new() -> ScriptedBoard {
        ScriptedBoard {
            piece_count: 32,
            ..ScriptedBoard::default()
        }
    }

    /// Applies a coordinate move, panicking on junk; test setup only.
    pub fn play(&mut self, s: &str) {
        let mv = Mv::from_coordinate(s).expect("test move must parse");
        assert!(self.check_make(mv), "test move {s} was rejected");
    }
}

impl Board for ScriptedBoard {
    fn new_game(&mut self, start_fen: Option<&str>) {
        self.hist.clear();
        self.side = Side::White;
        self.start_fen = start_fen.map(str::to_string);
    }

    fn check_make(&mut self, mv: Mv) -> bool {
        let key = mv.to_string();
        if self.reject.contains(&key) {
            return false;
        }
        self.hist.push(HistEntry {
            mv,
            san: key.clone(),
            is_capture: self.captures.contains(&key),
            ..HistEntry::default()
        });
        self.side = self.side.opposite();
        true
    }

    fn rule(&self) -> GameResult {
        self.rule_results
            .get(&self.hist.len())
            .copied()
            .unwrap_or_default()
    }

    fn probe_syzygy(&self, _max_pieces: u32) -> Result<GameResult, ProbeError> {
        if self.syzygy_error {
            Err(ProbeError)
        } else {
            Ok(self.syzygy_result.unwrap_or_default())
        }
    }

    fn side_to_move(&self) -> Side {
        self.side
    }

    fn move_count(&self) -> usize {
        self.hist.len()
    }

    fn history(&self) -> &[HistEntry] {
        &self.hist
    }

    fn annotate_last(&mut self, note: MoveNote) {
        if let Some(last) = self.hist.last_mut() {
            last.elapsed = note.elapsed;
            last.score = note.score;
            last.depth = note.depth;
            last.nodes = note.nodes;
        }
    }

    fn set_last_comment(&mut self, comment: &str) {
        if let Some(last) = self.hist.last_mut() {
            last.comment = Some(comment.to_string());
        }
    }

    fn starting_fen(&self) -> Option<String> {
        self.start_fen.clone()
    }

    fn piece_count(&self) -> u32 {
        self.piece_count
    }

    fn move_text_san(&self, per_line: usize) -> String {
        let mut out = String::new();
        for (i, entry) in self.hist.iter().enumerate() {
            if i % 2 == 0 {
                let _ = write!(out, "{}. ", i / 2 + 1);
            }
            out.push_str(&entry.san);
            if i + 1 < self.hist.len() {
                if per_line > 0 && (i + 1) % per_line == 0 {
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
        }
        out
    }

    fn opening_info(&self) -> Option<OpeningInfo> {
        None
    }
}

/// An engine driver whose replies are delivered by hand from the test. It
/// records every command it is given.
pub struct ScriptedPlayer {
    name: String,
    state: EngineState,
    ponder_mode: bool,
    safe: bool,
    pub commands: Vec<String>,
    pub sink: Option<EventSink>,
}

impl ScriptedPlayer {
    pub fn new(name: &str) -> ScriptedPlayer {
        ScriptedPlayer {
            name: name.to_string(),
            state: EngineState::None,
            ponder_mode: false,
            safe: true,
            commands: Vec::new(),
            sink: None,
        }
    }

    pub fn ready(name: &str) -> ScriptedPlayer {
        let mut p = ScriptedPlayer::new(name);
        p.state = EngineState::Ready;
        p
    }

    pub fn force_state(&mut self, state: EngineState) {
        self.state = state;
    }

    /// Simulates the bestmove acknowledgement that precedes a delivery.
    pub fn acknowledge(&mut self) {
        self.state = EngineState::Ready;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn kick_start(&mut self) {
        self.commands.push(String::from("kick"));
        if self.state != EngineState::Stopped {
            // handshake is instantaneous for a scripted driver
            self.state = EngineState::Ready;
        }
    }

    pub fn attach(&mut self, sink: EventSink, ponder_mode: bool) {
        self.sink = Some(sink);
        self.ponder_mode = ponder_mode;
    }

    pub fn detach(&mut self) {
        self.sink = None;
    }

    pub fn is_safe_to_detach(&self) -> bool {
        self.safe
    }

    pub fn prepare_to_detach(&mut self) {
        self.commands.push(String::from("stop"));
        self.safe = true;
    }

    pub fn new_game(&mut self) {
        self.commands.push(String::from("newgame"));
    }

    pub fn go(&mut self, _board: &dyn Board, _clock: &GameClock) -> bool {
        self.commands.push(String::from("go"));
        self.state = EngineState::Playing;
        true
    }

    pub fn go_ponder(&mut self, guess: Option<Mv>, _board: &dyn Board, _clock: &GameClock) -> bool {
        if !self.ponder_mode {
            return false;
        }
        let Some(guess) = guess else { return false };
        self.commands.push(format!("ponder {guess}"));
        self.state = EngineState::Pondering;
        true
    }

    pub fn stop_thinking(&mut self) -> bool {
        self.commands.push(String::from("stop"));
        true
    }

    pub fn quit(&mut self) {
        self.commands.push(String::from("quit"));
        self.state = EngineState::Stopped;
    }

    pub fn kill(&mut self) {
        self.state = EngineState::Stopped;
    }

    pub fn tick(&mut self) {}
}
