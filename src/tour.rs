//! The tournament manager: pairing generation, the 2 Hz scheduling loop,
//! ledger bookkeeping and the final standings. Everything here runs on the
//! scheduler thread; games and the pool are only ever touched from
//! `tick_work`.

use crate::board::{Board, GameResult, ResultKind, ResultReason};
use crate::book::OpeningSampler;
use crate::config::{Registry, TourConfig, TourType};
use crate::error::Error;
use crate::game::{Game, GameRules, GameSetup, GameState, MessageLogger};
use crate::ledger::{confirm_resume, MatchLedger, MatchRecord, MatchState, LEDGER_FILE};
use crate::logfile::TextLog;
use crate::pool::PlayerPool;
use crate::ticker::{Ticker, TICK_PERIOD};
use log::{error, info, warn};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Produces a fresh board for every started game.
pub type BoardFactory = Box<dyn Fn() -> Box<dyn Board> + Send>;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum TourState {
    None,
    Playing,
    Done,
}

/// One standings row, derived purely from completed match records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TourPlayer {
    pub name: String,
    pub games: u32,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    pub white_cnt: u32,
    pub elo: i32,
}

impl TourPlayer {
    /// Ranking order: fewer wins first, ties broken by more losses, then by
    /// fewer draws. The final table applies this in reverse.
    pub fn smaller(&self, other: &TourPlayer) -> bool {
        self.wins < other.wins
            || (self.wins == other.wins
                && (self.losses > other.losses
                    || (self.losses == other.losses && self.draws < other.draws)))
    }

    pub fn score(&self) -> f64 {
        self.wins as f64 + self.draws as f64 / 2.0
    }
}

/// Outcome of one knockout pair once all its scheduled games completed.
struct PairOutcome {
    pair_id: u32,
    winner: Option<TourPlayer>,
    /// Sides of the pair's first record, reused for a tie-break game.
    first_players: [String; 2],
    round: u32,
}

pub struct TourMng {
    cfg: TourConfig,
    participants: Vec<String>,
    pool: PlayerPool,
    ledger: MatchLedger,
    games: Vec<Game>,
    state: TourState,
    rng: ChaCha8Rng,
    book: Box<dyn OpeningSampler>,
    board_factory: BoardFactory,
    bye_history: HashSet<String>,
    start_time: Instant,
    result_log: Option<Arc<TextLog>>,
    engine_log: Option<Arc<TextLog>>,
    pgn_log: Option<Arc<TextLog>>,
}

fn open_sink(cfg: &crate::config::SinkConfig) -> Option<Arc<TextLog>> {
    if !cfg.enabled() {
        return None;
    }
    match TextLog::open(Path::new(&cfg.path), cfg.show_time) {
        Ok(log) => Some(log),
        Err(e) => {
            warn!("cannot open log {}: {e}", cfg.path);
            None
        }
    }
}

impl TourMng {
    pub fn new(
        cfg: TourConfig,
        registry: Registry,
        board_factory: BoardFactory,
        book: Box<dyn OpeningSampler>,
    ) -> Result<TourMng, Error> {
        cfg.check()?;
        let mut rng = match cfg.base.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_os_rng(),
        };
        let mut participants = cfg.resolve_players(&registry)?;
        if cfg.base.shuffle_players {
            participants.shuffle(&mut rng);
        }

        let engine_log = open_sink(&cfg.logs.engine);
        let result_log = open_sink(&cfg.logs.result);
        let pgn_log = open_sink(&cfg.logs.pgn);
        let ledger = MatchLedger::new(
            Path::new(LEDGER_FILE),
            cfg.base.tour_type,
            cfg.time_control,
        );

        Ok(TourMng {
            pool: PlayerPool::new(registry, engine_log.clone()),
            participants,
            ledger,
            games: Vec::new(),
            state: TourState::None,
            rng,
            book,
            board_factory,
            bye_history: HashSet::new(),
            start_time: Instant::now(),
            result_log,
            engine_log,
            pgn_log,
            cfg,
        })
    }

    /// Moves the ledger file somewhere else than `./playing.json`.
    pub fn set_ledger_path(&mut self, path: &Path) {
        let mut ledger = MatchLedger::new(path, self.ledger.tour_type, self.ledger.time_control);
        ledger.prior_elapsed = self.ledger.prior_elapsed;
        ledger.records = std::mem::take(&mut self.ledger.records);
        self.ledger = ledger;
    }

    pub fn records(&self) -> &[MatchRecord] {
        &self.ledger.records
    }

    /// Builds the match list, or restores an interrupted tournament when the
    /// ledger file still holds unplayed records and the operator agrees.
    /// Returns whether a resume happened.
    pub fn prepare(&mut self, auto_yes: bool) -> Result<bool, Error> {
        if self.cfg.base.resumable {
            if let Some(snapshot) = MatchLedger::load_snapshot(self.ledger.path()) {
                let resumable = !snapshot.record_list.is_empty()
                    && snapshot
                        .record_list
                        .iter()
                        .any(|r| r.state == MatchState::None);
                if resumable && confirm_resume(auto_yes) {
                    self.ledger.adopt(snapshot);
                    self.rebuild_bye_history();
                    let finished = self
                        .ledger
                        .records
                        .iter()
                        .filter(|r| r.is_finished())
                        .count();
                    self.match_log(&format!(
                        "resuming: {} of {} games already finished",
                        finished,
                        self.ledger.records.len()
                    ));
                    return Ok(true);
                }
            }
        }
        self.create_match_list()?;
        self.save_ledger();
        Ok(false)
    }

    /// Runs the tournament to completion on the calling thread.
    pub fn run(&mut self) {
        self.start_tournament();
        let ticker = Ticker::new(TICK_PERIOD);
        while self.state != TourState::Done {
            ticker.wait();
            self.tick_work();
        }
    }

    fn start_tournament(&mut self) {
        let banner = format!(
            "type: {}, timer: {}, players: {}, matches: {}, concurrency: {}, ponder: {}, book: {}",
            self.ledger.tour_type,
            self.ledger.time_control,
            self.participants.len(),
            self.ledger.records.len(),
            self.cfg.base.concurrency,
            if self.cfg.base.ponder { "on" } else { "off" },
            if self.book.is_empty() { "off" } else { "on" },
        );
        self.match_log(&banner);
        self.start_time = Instant::now();
        self.state = TourState::Playing;
    }

    /// One scheduler step: drive the pool and every live game, harvest the
    /// stopped ones, refill free slots.
    pub fn tick_work(&mut self) {
        self.pool.tick();

        let games = std::mem::take(&mut self.games);
        let mut keep = Vec::with_capacity(games.len());
        for game in games {
            match game.state() {
                GameState::Stopped => {
                    self.match_completed(&game);
                    game.begin_ending();
                    for player in game.try_detach() {
                        self.pool.return_player(player);
                    }
                    if game.state() != GameState::Ended {
                        keep.push(game);
                    }
                }
                GameState::Ending => {
                    for player in game.try_detach() {
                        self.pool.return_player(player);
                    }
                    if game.state() != GameState::Ended {
                        keep.push(game);
                    }
                }
                GameState::Ended => {}
                _ => {
                    game.tick();
                    keep.push(game);
                }
            }
        }
        self.games = keep;

        if self.state == TourState::Playing {
            self.play_matches();
        }
    }

    /// Copies a finished game into its record, writes the PGN and announces
    /// the terminus.
    fn match_completed(&mut self, game: &Game) {
        let idx = game.idx();
        if idx >= self.ledger.records.len() {
            return;
        }
        let result = game.result();
        self.ledger.mark_completed(idx, result);
        self.save_ledger();

        if let Some(pgn) = &self.pgn_log {
            pgn.append_raw(&game.render_pgn(&self.cfg.base.event, &self.cfg.base.site));
        }
        let line = format!(
            "{}) {}, #{}, {}",
            idx + 1,
            game.title(),
            game.ply_count(),
            result
        );
        self.match_log(&line);
    }

    fn play_matches(&mut self) {
        if self.ledger.records.is_empty() {
            return self.finish_tournament();
        }
        if self.ledger.unfinished_count() == 0 && self.games.is_empty() {
            let advanced =
                self.ledger.tour_type == TourType::Knockout && self.advance_knockout();
            if !advanced {
                return self.finish_tournament();
            }
        }

        while (self.games.len() as u32) < self.cfg.base.concurrency {
            let next = self
                .ledger
                .records
                .iter()
                .position(|r| r.state == MatchState::None);
            match next {
                Some(idx) => self.start_match(idx),
                None => break,
            }
        }
    }

    fn start_match(&mut self, idx: usize) {
        let record = self.ledger.records[idx].clone();
        let white = match self.pool.create_engine(record.white()) {
            Ok(player) => player,
            Err(e) => {
                error!("game {}: {e}", idx + 1);
                self.ledger.mark_error(idx);
                self.save_ledger();
                return;
            }
        };
        let black = match self.pool.create_engine(record.black()) {
            Ok(player) => player,
            Err(e) => {
                error!("game {}: {e}", idx + 1);
                self.pool.return_player(white);
                self.ledger.mark_error(idx);
                self.save_ledger();
                return;
            }
        };

        let rules = GameRules {
            ponder: self.cfg.base.ponder,
            adjudication: self.cfg.adjudication.clone(),
        };
        let setup = GameSetup {
            start_fen: record.start_fen.clone(),
            start_moves: record.start_moves.clone(),
        };
        let game = Game::new(
            idx,
            record.round,
            white,
            black,
            self.ledger.time_control,
            rules,
            setup,
            (self.board_factory)(),
            self.game_logger(),
        );
        game.kick_start();
        self.ledger.mark_playing(idx);
        self.save_ledger();
        self.match_log(&format!("{}. {}, started", idx + 1, game.title()));
        self.games.push(game);
    }

    fn finish_tournament(&mut self) {
        if self.state == TourState::Done {
            return;
        }
        self.state = TourState::Done;
        if !self.ledger.records.is_empty() {
            const SEPARATOR: &str = "----------------------------------";
            self.match_log(SEPARATOR);
            let table = self.standings_table();
            self.match_log(&table);
            self.match_log(SEPARATOR);
            let elapsed = self.ledger.prior_elapsed + self.start_time.elapsed().as_secs_f64();
            self.match_log(&format!("Tournament finished, elapsed: {elapsed:.0}s"));
        }
        self.ledger.remove_file();
        self.pool.shutdown();
    }

    // ---- pairing ---------------------------------------------------------

    fn create_match_list(&mut self) -> Result<(), Error> {
        self.ledger.records.clear();
        match self.ledger.tour_type {
            TourType::Roundrobin => {
                let names = self.participants.clone();
                for i in 0..names.len() {
                    for j in i + 1..names.len() {
                        self.add_pair_records(&names[i], &names[j], 1);
                    }
                }
            }
            TourType::Knockout => {
                let seeded: Vec<TourPlayer> = self
                    .participants
                    .clone()
                    .into_iter()
                    .map(|name| self.tour_player(&name))
                    .collect();
                self.create_knockout_round(seeded, 1);
            }
        }
        Ok(())
    }

    fn tour_player(&self, name: &str) -> TourPlayer {
        TourPlayer {
            name: name.to_string(),
            elo: self
                .pool
                .registry()
                .get(name)
                .map(|cfg| cfg.elo)
                .unwrap_or(0),
            ..TourPlayer::default()
        }
    }

    /// Expands one pairing into `games_per_pair` records sharing a random
    /// pair id. The first colour assignment is random, then sides alternate.
    fn add_pair_records(&mut self, name0: &str, name1: &str, round: u32) {
        let pair_id = self.fresh_pair_id();
        let swap: bool = self.rng.random();
        for g in 0..self.cfg.base.games_per_pair {
            let (white, black) = if swap ^ (g % 2 == 1) {
                (name1, name0)
            } else {
                (name0, name1)
            };
            let mut record = MatchRecord::new(white, black, round, pair_id);
            let opening = self.book.sample();
            record.start_fen = opening.fen;
            record.start_moves = opening.moves;
            self.ledger.append(record);
        }
    }

    fn fresh_pair_id(&mut self) -> u32 {
        loop {
            let id: u32 = self.rng.random();
            if !self.ledger.records.iter().any(|r| r.pair_id == id) {
                return id;
            }
        }
    }

    /// Knockout pairing for one round: an odd roster gives one lucky player
    /// a bye (preferring players that never had one), the rest are seeded by
    /// declared Elo, top half against bottom half.
    fn create_knockout_round(&mut self, mut players: Vec<TourPlayer>, round: u32) {
        if players.len() % 2 == 1 {
            let mut pick = None;
            for _ in 0..10 {
                let candidate = self.rng.random_range(0..players.len());
                if !self.bye_history.contains(&players[candidate].name) {
                    pick = Some(candidate);
                    break;
                }
            }
            let lucky = players.remove(pick.unwrap_or(0));
            self.bye_history.insert(lucky.name.clone());
            let pair_id = self.fresh_pair_id();
            let mut record = MatchRecord::new(&lucky.name, "", round, pair_id);
            record.state = MatchState::Completed;
            record.result = GameResult::new(ResultKind::Win, ResultReason::NoReason);
            self.ledger.append(record);
            self.match_log(&format!("{} gets a bye into round {round}", lucky.name));
        }

        players.sort_by(|a, b| b.elo.cmp(&a.elo));
        let n = players.len() / 2;
        for i in 0..n {
            let name0 = players[i].name.clone();
            let name1 = players[i + n].name.clone();
            self.add_pair_records(&name0, &name1, round);
        }
    }

    /// Judges every pair of the finished round. Pairs that are dead even
    /// after their scheduled games get one extra game (same pair id and
    /// original sides) and `None` is returned until the tie breaks.
    fn evaluate_knockout_round(&mut self, round: u32) -> Option<Vec<TourPlayer>> {
        let mut pairs: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (i, r) in self.ledger.records.iter().enumerate() {
            if r.round == round {
                pairs.entry(r.pair_id).or_default().push(i);
            }
        }

        let mut outcomes = Vec::new();
        for (pair_id, indices) in pairs {
            let first = &self.ledger.records[indices[0]];
            if first.is_bye() {
                let name = if first.white().is_empty() {
                    first.black()
                } else {
                    first.white()
                };
                outcomes.push(PairOutcome {
                    pair_id,
                    winner: Some(self.tour_player(name)),
                    first_players: first.players.clone(),
                    round,
                });
                continue;
            }

            let mut p0 = self.tour_player(first.white());
            let mut p1 = self.tour_player(first.black());
            for &i in &indices {
                let r = &self.ledger.records[i];
                if r.state != MatchState::Completed {
                    continue;
                }
                let white_is_p0 = r.white() == p0.name;
                match r.result.kind {
                    ResultKind::Win => {
                        if white_is_p0 {
                            p0.wins += 1;
                        } else {
                            p1.wins += 1;
                        }
                    }
                    ResultKind::Loss => {
                        if white_is_p0 {
                            p1.wins += 1;
                        } else {
                            p0.wins += 1;
                        }
                    }
                    _ => {}
                }
                if white_is_p0 {
                    p0.white_cnt += 1;
                } else {
                    p1.white_cnt += 1;
                }
            }

            let winner = if p0.wins != p1.wins {
                Some(if p0.wins > p1.wins { p0 } else { p1 })
            } else if p0.white_cnt != p1.white_cnt {
                // equal scores: the colour-handicapped player advances
                Some(if p0.white_cnt < p1.white_cnt { p0 } else { p1 })
            } else {
                None
            };
            outcomes.push(PairOutcome {
                pair_id,
                winner,
                first_players: self.ledger.records[indices[0]].players.clone(),
                round,
            });
        }

        let mut extended = false;
        let mut winners = Vec::new();
        for outcome in outcomes {
            match outcome.winner {
                Some(winner) => winners.push(winner),
                None => {
                    let mut extra = MatchRecord::new(
                        &outcome.first_players[0],
                        &outcome.first_players[1],
                        outcome.round,
                        outcome.pair_id,
                    );
                    let opening = self.book.sample();
                    extra.start_fen = opening.fen;
                    extra.start_moves = opening.moves;
                    self.ledger.append(extra);
                    self.match_log(&format!(
                        "round {} pair of {} and {} is tied, adding a tie-break game",
                        outcome.round, outcome.first_players[0], outcome.first_players[1]
                    ));
                    extended = true;
                }
            }
        }
        if extended {
            self.save_ledger();
            return None;
        }
        Some(winners)
    }

    /// Called when a knockout round has no unfinished records left. Returns
    /// true when the tournament continues (tie-break games or a new round).
    fn advance_knockout(&mut self) -> bool {
        let round = self.ledger.last_round();
        match self.evaluate_knockout_round(round) {
            None => true,
            Some(winners) => {
                if winners.len() < 2 {
                    if let Some(champion) = winners.first() {
                        self.match_log(&format!("{} wins the knockout", champion.name));
                    }
                    return false;
                }
                self.create_knockout_round(winners, round + 1);
                self.save_ledger();
                true
            }
        }
    }

    // ---- standings -------------------------------------------------------

    /// Standings derived from completed records; bye sides with an empty
    /// name do not count.
    pub fn standings(&self) -> Vec<TourPlayer> {
        let mut map: BTreeMap<String, TourPlayer> = BTreeMap::new();
        for record in &self.ledger.records {
            if record.state != MatchState::Completed || record.result.kind == ResultKind::None {
                continue;
            }
            for sd in 0..2 {
                let name = &record.players[sd];
                if name.is_empty() {
                    continue;
                }
                let row = map.entry(name.clone()).or_insert_with(|| TourPlayer {
                    name: name.clone(),
                    ..TourPlayer::default()
                });
                row.games += 1;
                if sd == 0 {
                    row.white_cnt += 1;
                }
                match record.result.kind {
                    ResultKind::Win => {
                        if sd == 0 {
                            row.wins += 1;
                        } else {
                            row.losses += 1;
                        }
                    }
                    ResultKind::Loss => {
                        if sd == 1 {
                            row.wins += 1;
                        } else {
                            row.losses += 1;
                        }
                    }
                    ResultKind::Draw => row.draws += 1,
                    ResultKind::None => {}
                }
            }
        }

        let mut list: Vec<TourPlayer> = map.into_values().collect();
        list.sort_by(|a, b| {
            if a.smaller(b) {
                Ordering::Less
            } else if b.smaller(a) {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        });
        list.reverse();
        list
    }

    pub fn standings_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:>4}  {:<24} {:>5} {:>7} {:>7} {:>7} {:>7}",
            "rank", "name", "games", "win%", "draw%", "loss%", "score"
        );
        for (i, row) in self.standings().iter().enumerate() {
            let d = row.games.max(1) as f64;
            let _ = writeln!(
                out,
                "{:>3}.  {:<24} {:>5} {:>7.1} {:>7.1} {:>7.1} {:>7.1}",
                i + 1,
                row.name,
                row.games,
                row.wins as f64 * 100.0 / d,
                row.draws as f64 * 100.0 / d,
                row.losses as f64 * 100.0 / d,
                row.score()
            );
        }
        out
    }

    // ---- plumbing --------------------------------------------------------

    fn match_log(&self, line: &str) {
        println!("{line}");
        if let Some(log) = &self.result_log {
            log.append(line);
        }
    }

    fn game_logger(&self) -> MessageLogger {
        let engine_log = self.engine_log.clone();
        Arc::new(move |msg: &str| {
            info!("{msg}");
            if let Some(log) = &engine_log {
                log.append(&format!("arbiter> {msg}"));
            }
        })
    }

    fn save_ledger(&mut self) {
        if !self.cfg.base.resumable {
            return;
        }
        let run_elapsed = if self.state == TourState::Playing {
            self.start_time.elapsed().as_secs_f64()
        } else {
            0.0
        };
        self.ledger.save(run_elapsed);
    }

    fn rebuild_bye_history(&mut self) {
        for record in &self.ledger.records {
            if record.is_bye() {
                for name in &record.players {
                    if !name.is_empty() {
                        self.bye_history.insert(name.clone());
                    }
                }
            }
        }
    }
}
