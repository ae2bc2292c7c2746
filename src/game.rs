//! One match between two leased drivers. The game is a state machine
//! advanced from two directions: the scheduler's tick (readiness, grace,
//! timeout sweep) and the drivers' reader threads (move delivery). Both
//! paths meet under the per-game critical mutex; the tick side only ever
//! `try_lock`s it, so a busy delivery never stalls the scheduler.

use crate::board::{Board, GameResult, MoveNote, Mv, ResultKind, ResultReason, Side};
use crate::config::AdjudicationConfig;
use crate::engine::{EngineEvent, EngineState, EventSink, MoveReport};
use crate::pgn::{self, PgnMeta};
use crate::player::Player;
use crate::tc::{GameClock, TimeControl};
use log::warn;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Ticks to sit in `Ready` before thinking starts, letting both engines
/// settle after the handshake.
const READY_GRACE_TICKS: u32 = 3;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum GameState {
    None,
    Begin,
    Ready,
    Playing,
    Stopped,
    Ending,
    Ended,
}

/// One-way channel for operator-facing notes (timeouts, illegal moves,
/// probe failures). The game never holds a reference to its manager.
pub type MessageLogger = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct GameSetup {
    pub start_fen: Option<String>,
    pub start_moves: Vec<Mv>,
}

#[derive(Debug, Clone, Default)]
pub struct GameRules {
    pub ponder: bool,
    pub adjudication: AdjudicationConfig,
}

pub(crate) struct GameCore {
    idx: usize,
    round: u32,
    state: GameState,
    state_tick: u32,
    players: [Option<Player>; 2],
    board: Box<dyn Board>,
    clock: GameClock,
    result: GameResult,
    rules: GameRules,
    setup: GameSetup,
    logger: MessageLogger,
}

pub struct Game {
    core: Arc<Mutex<GameCore>>,
}

fn lock(core: &Arc<Mutex<GameCore>>) -> MutexGuard<'_, GameCore> {
    match core.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Game {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        idx: usize,
        round: u32,
        white: Player,
        black: Player,
        time_control: TimeControl,
        rules: GameRules,
        setup: GameSetup,
        board: Box<dyn Board>,
        logger: MessageLogger,
    ) -> Game {
        let ponder = rules.ponder;
        let core = Arc::new(Mutex::new(GameCore {
            idx,
            round,
            state: GameState::None,
            state_tick: 0,
            players: [Some(white), Some(black)],
            board,
            clock: GameClock::new(time_control),
            result: GameResult::default(),
            rules,
            setup,
            logger,
        }));

        // Drivers call back from their reader threads; a Weak reference
        // keeps the driver-inside-game cycle collectable.
        for sd in 0..2 {
            let side = Side::from_index(sd);
            let weak: Weak<Mutex<GameCore>> = Arc::downgrade(&core);
            let sink: EventSink = Arc::new(move |event| {
                if let Some(core) = weak.upgrade() {
                    deliver(&core, side, event);
                }
            });
            let mut guard = lock(&core);
            if let Some(player) = guard.players[sd].as_mut() {
                player.attach(sink, ponder);
            }
        }

        Game { core }
    }

    /// Launches both engines and enters the readiness wait.
    pub fn kick_start(&self) {
        let mut core = lock(&self.core);
        for player in core.players.iter_mut().flatten() {
            player.kick_start();
        }
        core.set_state(GameState::Begin);
    }

    /// Scheduler heartbeat. Skips the whole step when a move delivery holds
    /// the critical mutex; the next tick catches up.
    pub fn tick(&self) {
        let Ok(mut core) = self.core.try_lock() else {
            return;
        };
        core.tick_work();
    }

    pub fn state(&self) -> GameState {
        lock(&self.core).state
    }

    pub fn idx(&self) -> usize {
        lock(&self.core).idx
    }

    pub fn result(&self) -> GameResult {
        lock(&self.core).result
    }

    pub fn ply_count(&self) -> usize {
        lock(&self.core).board.move_count()
    }

    pub fn title(&self) -> String {
        let core = lock(&self.core);
        format!("{} vs {}", core.player_name(0), core.player_name(1))
    }

    /// Moves a stopped game towards teardown; called by the manager once it
    /// has copied the statistics it needs.
    pub fn begin_ending(&self) {
        let mut core = lock(&self.core);
        if core.state == GameState::Stopped {
            core.set_state(GameState::Ending);
        }
    }

    /// Detaches every driver that reports safe, nudging the others. Once
    /// both sides are detached the game becomes `Ended` and can be dropped.
    pub fn try_detach(&self) -> Vec<Player> {
        let mut core = lock(&self.core);
        if core.state < GameState::Stopped {
            return Vec::new();
        }
        let mut detached = Vec::new();
        for sd in 0..2 {
            let safe = match &core.players[sd] {
                Some(player) => player.is_safe_to_detach(),
                None => continue,
            };
            if safe {
                if let Some(mut player) = core.players[sd].take() {
                    player.detach();
                    detached.push(player);
                }
            } else if let Some(player) = core.players[sd].as_mut() {
                player.prepare_to_detach();
            }
        }
        if core.state == GameState::Ending && core.players.iter().all(Option::is_none) {
            core.set_state(GameState::Ended);
        }
        detached
    }

    pub fn render_pgn(&self, event: &str, site: &str) -> String {
        let core = lock(&self.core);
        let white = core.player_name(0);
        let black = core.player_name(1);
        let meta = PgnMeta {
            event,
            site,
            round: core.round,
            board_idx: core.idx,
            white: &white,
            black: &black,
            time_control: *core.clock.control(),
        };
        pgn::render(core.board.as_ref(), core.result, &meta)
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Arc<Mutex<GameCore>> {
        &self.core
    }
}

/// Entry point for driver callbacks (and for tests injecting frames).
pub(crate) fn deliver(core: &Arc<Mutex<GameCore>>, side: Side, event: EngineEvent) {
    let mut core = lock(core);
    match event {
        EngineEvent::BestMove(report) => core.move_from_player(side, report),
        EngineEvent::Resign => {
            if core.state == GameState::Playing {
                let msg = format!("{} resigns", core.player_name(side.index()));
                (core.logger)(&msg);
                core.game_over(GameResult::loss_for(side, ResultReason::Resign));
            }
        }
    }
}

impl GameCore {
    pub(crate) fn player_name(&self, sd: usize) -> String {
        match &self.players[sd] {
            Some(player) => player.name().to_string(),
            None => String::from("*"),
        }
    }

    fn set_state(&mut self, state: GameState) {
        if self.state != state {
            self.state_tick = 0;
        }
        self.state = state;
    }

    fn tick_work(&mut self) {
        self.state_tick += 1;
        for player in self.players.iter_mut().flatten() {
            player.tick();
        }
        match self.state {
            GameState::Begin | GameState::Ready => self.check_readiness(),
            GameState::Playing => {
                self.check_time_over();
            }
            _ => {}
        }
    }

    /// Waits for both drivers to finish their handshakes, then boots the
    /// board; a driver that died instead decides the game as a crash.
    fn check_readiness(&mut self) {
        let mut ok = 0;
        let mut stopped = 0;
        for player in self.players.iter().flatten() {
            match player.state() {
                EngineState::Stopped => stopped += 1,
                EngineState::Ready | EngineState::Playing | EngineState::Pondering => ok += 1,
                _ => {}
            }
        }
        if ok + stopped < 2 {
            return;
        }

        if stopped > 0 {
            let result = if stopped == 2 {
                GameResult::new(ResultKind::Draw, ResultReason::Crash)
            } else {
                let white_dead = self.players[0]
                    .as_ref()
                    .map(|p| p.state() == EngineState::Stopped)
                    .unwrap_or(true);
                let loser = if white_dead { Side::White } else { Side::Black };
                GameResult::loss_for(loser, ResultReason::Crash)
            };
            self.game_over(result);
            return;
        }

        match self.state {
            GameState::Begin => {
                self.set_state(GameState::Ready);
                self.new_game_setup();
            }
            GameState::Ready if self.state_tick > READY_GRACE_TICKS => {
                self.set_state(GameState::Playing);
                self.start_thinking(None);
            }
            _ => {}
        }
    }

    /// Initialises the board from the starting FEN and plays the opening
    /// prefix. A prefix move the board refuses truncates the opening with a
    /// warning and the game continues from there.
    fn new_game_setup(&mut self) {
        let fen = self.setup.start_fen.clone();
        self.board.new_game(fen.as_deref());
        let to_move = self.board.side_to_move();
        self.clock.setup_clocks_before_thinking(0, to_move);

        let mut applied = 0;
        for mv in self.setup.start_moves.clone() {
            if !self.board.check_make(mv) {
                warn!(
                    "game {}: opening prefix move {} rejected, truncating",
                    self.idx + 1,
                    mv
                );
                break;
            }
            applied += 1;
        }
        if applied > 0 {
            self.board.set_last_comment("End of opening");
        }

        for player in self.players.iter_mut().flatten() {
            player.new_game();
        }
    }

    /// Points both drivers at the current position: the waiting side gets a
    /// ponder request first (maximising overlap), then the mover gets `go`.
    fn start_thinking(&mut self, guess: Option<Mv>) {
        let to_move = self.board.side_to_move();
        self.clock
            .setup_clocks_before_thinking(self.board.move_count(), to_move);
        let sd = to_move.index();
        let GameCore {
            players,
            board,
            clock,
            rules,
            ..
        } = self;
        if rules.ponder {
            if let Some(player) = players[1 - sd].as_mut() {
                player.go_ponder(guess, board.as_ref(), clock);
            }
        }
        if let Some(player) = players[sd].as_mut() {
            player.go(board.as_ref(), clock);
        }
    }

    fn check_time_over(&mut self) -> bool {
        let side = self.board.side_to_move();
        if !self.clock.is_time_over(side) {
            return false;
        }
        let msg = format!(
            "time over for {}: used {:.2}s, {}ms were left",
            self.player_name(side.index()),
            self.clock.last_query_consumed,
            self.clock.time_left_ms(side)
        );
        (self.logger)(&msg);
        self.game_over(GameResult::loss_for(side, ResultReason::Timeout));
        true
    }

    /// A driver reported a computed move (or a stopped ponder search).
    /// Stale frames are dropped; a move that arrives after the flag fell
    /// loses to the timeout.
    pub(crate) fn move_from_player(&mut self, side: Side, report: MoveReport) {
        if self.state != GameState::Playing || self.board.side_to_move() != side {
            return;
        }
        if self.clock.is_time_over(side) {
            let msg = format!(
                "late move {} from {} discarded, flag already fell",
                report.mv_str,
                self.player_name(side.index())
            );
            (self.logger)(&msg);
            self.game_over(GameResult::loss_for(side, ResultReason::Timeout));
            return;
        }

        match report.old_state {
            EngineState::Playing => self.apply_move(side, &report),
            EngineState::Pondering => {
                // pondermiss acknowledged; issue the real search
                let sd = side.index();
                let GameCore {
                    players,
                    board,
                    clock,
                    ..
                } = self;
                if let Some(player) = players[sd].as_mut() {
                    player.go(board.as_ref(), clock);
                }
            }
            _ => {}
        }
    }

    fn apply_move(&mut self, side: Side, report: &MoveReport) {
        let parsed = Mv::from_coordinate(&report.mv_str);
        let made = match parsed {
            Some(mv) => self.board.check_make(mv),
            None => false,
        };
        if !made {
            let msg = format!(
                "illegal move {} from {}",
                report.mv_str,
                self.player_name(side.index())
            );
            (self.logger)(&msg);
            self.game_over(GameResult::loss_for(side, ResultReason::IllegalMove));
            return;
        }

        self.board.annotate_last(MoveNote {
            elapsed: report.elapsed,
            score: report.info.score,
            depth: report.info.depth,
            nodes: report.info.nodes,
        });

        let rule = self.board.rule();
        if rule.is_over() {
            self.game_over(rule);
            return;
        }
        if let Some(result) = self.adjudicate() {
            self.game_over(result);
            return;
        }

        self.clock
            .update_clock_after_move(report.elapsed, side, self.board.move_count());

        let guess = report
            .ponder_str
            .as_deref()
            .and_then(Mv::from_coordinate);
        self.start_thinking(guess);
    }

    fn adjudicate(&mut self) -> Option<GameResult> {
        let adj = &self.rules.adjudication;
        if !adj.mode {
            return None;
        }
        if adj.max_game_length > 0 && self.board.move_count() >= adj.max_game_length {
            return Some(GameResult::new(
                ResultKind::Draw,
                ResultReason::Adjudication,
            ));
        }
        if adj.egtb && self.board.piece_count() <= adj.max_pieces {
            match self.board.probe_syzygy(adj.max_pieces) {
                Ok(result) if result.is_over() => return Some(result),
                Ok(_) => {}
                Err(_) => {
                    let capture = self
                        .board
                        .history()
                        .last()
                        .map(|h| h.is_capture)
                        .unwrap_or(false);
                    // only captures are worth a message, anything else floods
                    if capture {
                        (self.logger)(
                            "unable to probe tablebase, position invalid, illegal or not in tablebase",
                        );
                    }
                }
            }
        }
        None
    }

    fn game_over(&mut self, result: GameResult) {
        for player in self.players.iter_mut().flatten() {
            player.stop_thinking();
        }
        self.result = result;
        self.set_state(GameState::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SearchInfo;
    use crate::testutil::{ScriptedBoard, ScriptedPlayer};
    use std::time::Duration;

    fn quiet_logger() -> MessageLogger {
        Arc::new(|_msg: &str| {})
    }

    fn roomy_tc() -> TimeControl {
        TimeControl {
            moves: 0,
            time: 60.0,
            increment: 0.0,
            margin: 0.5,
            ..TimeControl::default()
        }
    }

    fn tight_tc() -> TimeControl {
        TimeControl {
            moves: 0,
            time: 0.05,
            increment: 0.0,
            margin: 0.05,
            ..TimeControl::default()
        }
    }

    fn scripted_game(board: ScriptedBoard, rules: GameRules, tc: TimeControl) -> Game {
        Game::new(
            0,
            1,
            Player::Scripted(ScriptedPlayer::new("alpha")),
            Player::Scripted(ScriptedPlayer::new("beta")),
            tc,
            rules,
            GameSetup::default(),
            Box::new(board),
            quiet_logger(),
        )
    }

    fn tick_until_playing(game: &Game) {
        game.kick_start();
        for _ in 0..=READY_GRACE_TICKS + 2 {
            game.tick();
        }
        assert_eq!(game.state(), GameState::Playing);
    }

    fn report(mv: &str, old_state: EngineState) -> MoveReport {
        MoveReport {
            mv_str: mv.to_string(),
            ponder_str: None,
            elapsed: 0.01,
            info: SearchInfo::default(),
            old_state,
        }
    }

    /// Acknowledges the pending search on `side`, as the driver does right
    /// before invoking the sink.
    fn ack(game: &Game, side: Side) {
        let mut core = lock(game.core());
        if let Some(Player::Scripted(p)) = core.players[side.index()].as_mut() {
            p.acknowledge();
        }
    }

    fn deliver_move(game: &Game, side: Side, mv: &str) {
        ack(game, side);
        deliver(
            game.core(),
            side,
            EngineEvent::BestMove(report(mv, EngineState::Playing)),
        );
    }

    #[test]
    fn reaches_playing_and_asks_white_first() {
        let game = scripted_game(ScriptedBoard::new(), GameRules::default(), roomy_tc());
        tick_until_playing(&game);
        let core = lock(game.core());
        if let Some(Player::Scripted(p)) = core.players[0].as_ref() {
            assert!(p.commands.contains(&String::from("kick")));
            assert!(p.commands.contains(&String::from("newgame")));
            assert_eq!(p.commands.last().unwrap(), "go");
        } else {
            panic!("white is scripted");
        }
    }

    #[test]
    fn legal_moves_alternate_and_annotate() {
        let game = scripted_game(ScriptedBoard::new(), GameRules::default(), roomy_tc());
        tick_until_playing(&game);
        deliver_move(&game, Side::White, "e2e4");
        deliver_move(&game, Side::Black, "e7e5");
        let core = lock(game.core());
        assert_eq!(core.board.move_count(), 2);
        assert_eq!(core.state, GameState::Playing);
        assert!(core.board.history()[0].elapsed > 0.0);
    }

    #[test]
    fn stale_frame_from_wrong_side_is_dropped() {
        let game = scripted_game(ScriptedBoard::new(), GameRules::default(), roomy_tc());
        tick_until_playing(&game);
        deliver_move(&game, Side::Black, "e7e5");
        let core = lock(game.core());
        assert_eq!(core.board.move_count(), 0);
        assert_eq!(core.state, GameState::Playing);
    }

    #[test]
    fn late_move_loses_to_the_timeout() {
        let game = scripted_game(ScriptedBoard::new(), GameRules::default(), tight_tc());
        tick_until_playing(&game);
        {
            let mut core = lock(game.core());
            // budget 50ms + margin 50ms, reply comes at ~200ms
            core.clock.backdate_think_start(Duration::from_millis(200));
        }
        deliver_move(&game, Side::White, "e2e4");
        let core = lock(game.core());
        assert_eq!(core.state, GameState::Stopped);
        assert_eq!(core.result.kind, ResultKind::Loss);
        assert_eq!(core.result.reason, ResultReason::Timeout);
        // the late move was discarded, not applied
        assert_eq!(core.board.move_count(), 0);
    }

    #[test]
    fn ticker_detects_a_silent_timeout() {
        let game = scripted_game(ScriptedBoard::new(), GameRules::default(), tight_tc());
        tick_until_playing(&game);
        {
            let mut core = lock(game.core());
            core.clock.backdate_think_start(Duration::from_millis(500));
        }
        game.tick();
        assert_eq!(game.state(), GameState::Stopped);
        assert_eq!(game.result().reason, ResultReason::Timeout);
    }

    #[test]
    fn illegal_move_ends_the_game_for_the_offender() {
        let mut board = ScriptedBoard::new();
        board.reject.insert(String::from("e2e5"));
        let game = scripted_game(board, GameRules::default(), roomy_tc());
        tick_until_playing(&game);
        deliver_move(&game, Side::White, "e2e5");
        assert_eq!(game.state(), GameState::Stopped);
        let result = game.result();
        assert_eq!(result.kind, ResultKind::Loss);
        assert_eq!(result.reason, ResultReason::IllegalMove);
    }

    #[test]
    fn unparseable_move_counts_as_illegal() {
        let game = scripted_game(ScriptedBoard::new(), GameRules::default(), roomy_tc());
        tick_until_playing(&game);
        deliver_move(&game, Side::White, "0-0-0-0");
        assert_eq!(game.result().reason, ResultReason::IllegalMove);
    }

    #[test]
    fn rule_result_stops_the_game() {
        let mut board = ScriptedBoard::new();
        board.rule_results.insert(
            2,
            GameResult::new(ResultKind::Win, ResultReason::Mate),
        );
        let game = scripted_game(board, GameRules::default(), roomy_tc());
        tick_until_playing(&game);
        deliver_move(&game, Side::White, "e2e4");
        deliver_move(&game, Side::Black, "f7f6");
        assert_eq!(game.state(), GameState::Stopped);
        assert_eq!(game.result().reason, ResultReason::Mate);
    }

    #[test]
    fn resign_loses_for_the_resigner() {
        let game = scripted_game(ScriptedBoard::new(), GameRules::default(), roomy_tc());
        tick_until_playing(&game);
        deliver(game.core(), Side::White, EngineEvent::Resign);
        let result = game.result();
        assert_eq!(result.kind, ResultKind::Loss);
        assert_eq!(result.reason, ResultReason::Resign);
    }

    #[test]
    fn crash_of_one_side_is_a_win_for_the_survivor() {
        let mut white = ScriptedPlayer::new("alpha");
        white.force_state(EngineState::Stopped);
        let game = Game::new(
            0,
            1,
            Player::Scripted(white),
            Player::Scripted(ScriptedPlayer::new("beta")),
            roomy_tc(),
            GameRules::default(),
            GameSetup::default(),
            Box::new(ScriptedBoard::new()),
            quiet_logger(),
        );
        game.kick_start();
        game.tick();
        assert_eq!(game.state(), GameState::Stopped);
        let result = game.result();
        assert_eq!(result.kind, ResultKind::Loss);
        assert_eq!(result.reason, ResultReason::Crash);
    }

    #[test]
    fn crash_of_both_sides_is_a_draw() {
        let mut white = ScriptedPlayer::new("alpha");
        let mut black = ScriptedPlayer::new("beta");
        white.force_state(EngineState::Stopped);
        black.force_state(EngineState::Stopped);
        let game = Game::new(
            0,
            1,
            Player::Scripted(white),
            Player::Scripted(black),
            roomy_tc(),
            GameRules::default(),
            GameSetup::default(),
            Box::new(ScriptedBoard::new()),
            quiet_logger(),
        );
        game.kick_start();
        game.tick();
        let result = game.result();
        assert_eq!(result.kind, ResultKind::Draw);
        assert_eq!(result.reason, ResultReason::Crash);
    }

    #[test]
    fn adjudication_draws_long_games() {
        let rules = GameRules {
            ponder: false,
            adjudication: AdjudicationConfig {
                mode: true,
                max_game_length: 2,
                egtb: false,
                max_pieces: 5,
            },
        };
        let game = scripted_game(ScriptedBoard::new(), rules, roomy_tc());
        tick_until_playing(&game);
        deliver_move(&game, Side::White, "e2e4");
        deliver_move(&game, Side::Black, "e7e5");
        assert_eq!(game.state(), GameState::Stopped);
        let result = game.result();
        assert_eq!(result.kind, ResultKind::Draw);
        assert_eq!(result.reason, ResultReason::Adjudication);
    }

    #[test]
    fn tablebase_result_adjudicates() {
        let mut board = ScriptedBoard::new();
        board.piece_count = 4;
        board.syzygy_result = Some(GameResult::new(ResultKind::Win, ResultReason::Adjudication));
        let rules = GameRules {
            ponder: false,
            adjudication: AdjudicationConfig {
                mode: true,
                max_game_length: 0,
                egtb: true,
                max_pieces: 5,
            },
        };
        let game = scripted_game(board, rules, roomy_tc());
        tick_until_playing(&game);
        deliver_move(&game, Side::White, "e2e4");
        assert_eq!(game.state(), GameState::Stopped);
        assert_eq!(game.result().kind, ResultKind::Win);
    }

    #[test]
    fn opening_prefix_is_applied_and_annotated() {
        let setup = GameSetup {
            start_fen: None,
            start_moves: vec![
                Mv::from_coordinate("e2e4").unwrap(),
                Mv::from_coordinate("c7c5").unwrap(),
            ],
        };
        let game = Game::new(
            0,
            1,
            Player::Scripted(ScriptedPlayer::new("alpha")),
            Player::Scripted(ScriptedPlayer::new("beta")),
            roomy_tc(),
            GameRules::default(),
            setup,
            Box::new(ScriptedBoard::new()),
            quiet_logger(),
        );
        tick_until_playing(&game);
        let core = lock(game.core());
        assert_eq!(core.board.move_count(), 2);
        assert_eq!(
            core.board.history()[1].comment.as_deref(),
            Some("End of opening")
        );
        // white moved in the prefix, so black is to move now
        assert_eq!(core.board.side_to_move(), Side::Black);
    }

    #[test]
    fn broken_prefix_truncates_silently() {
        let mut board = ScriptedBoard::new();
        board.reject.insert(String::from("c7c5"));
        let setup = GameSetup {
            start_fen: None,
            start_moves: vec![
                Mv::from_coordinate("e2e4").unwrap(),
                Mv::from_coordinate("c7c5").unwrap(),
                Mv::from_coordinate("g1f3").unwrap(),
            ],
        };
        let game = Game::new(
            0,
            1,
            Player::Scripted(ScriptedPlayer::new("alpha")),
            Player::Scripted(ScriptedPlayer::new("beta")),
            roomy_tc(),
            GameRules::default(),
            setup,
            Box::new(ScriptedBoard::new()),
            quiet_logger(),
        );
        // board with the rejection script
        {
            let mut core = lock(game.core());
            core.board = Box::new(board);
        }
        tick_until_playing(&game);
        assert_eq!(game.ply_count(), 1);
    }

    #[test]
    fn ponder_overlap_and_pondermiss() {
        let rules = GameRules {
            ponder: true,
            adjudication: AdjudicationConfig::default(),
        };
        let game = scripted_game(ScriptedBoard::new(), rules, roomy_tc());
        tick_until_playing(&game);

        // white moves and suggests a reply; white then ponders on the
        // suggestion while black computes
        ack(&game, Side::White);
        deliver(
            game.core(),
            Side::White,
            EngineEvent::BestMove(MoveReport {
                mv_str: String::from("e2e4"),
                ponder_str: Some(String::from("e7e5")),
                elapsed: 0.01,
                info: SearchInfo::default(),
                old_state: EngineState::Playing,
            }),
        );
        {
            let core = lock(game.core());
            if let Some(Player::Scripted(p)) = core.players[0].as_ref() {
                assert_eq!(p.commands.last().unwrap(), "ponder e7e5");
            }
            if let Some(Player::Scripted(p)) = core.players[1].as_ref() {
                assert_eq!(p.commands.last().unwrap(), "go");
            }
        }

        // a pondermiss comes back flagged Pondering and white is re-asked
        deliver_move(&game, Side::Black, "c7c5");
        ack(&game, Side::White);
        deliver(
            game.core(),
            Side::White,
            EngineEvent::BestMove(report("e7e5", EngineState::Pondering)),
        );
        let core = lock(game.core());
        if let Some(Player::Scripted(p)) = core.players[0].as_ref() {
            assert_eq!(p.commands.last().unwrap(), "go");
        }
        // the stale ponder move was never applied
        assert_eq!(core.board.move_count(), 2);
    }

    #[test]
    fn stopped_game_detaches_and_ends() {
        let game = scripted_game(ScriptedBoard::new(), GameRules::default(), roomy_tc());
        tick_until_playing(&game);
        deliver(game.core(), Side::White, EngineEvent::Resign);
        assert_eq!(game.state(), GameState::Stopped);
        game.begin_ending();
        let players = game.try_detach();
        assert_eq!(players.len(), 2);
        assert_eq!(game.state(), GameState::Ended);
    }
}
