//! The resumable match ledger: the ordered list of scheduled games and its
//! on-disk JSON snapshot. The file is rewritten atomically after every
//! change, so the ledger on disk always describes a state the tournament
//! can be completed from.

use crate::board::{GameResult, Mv, ResultKind};
use crate::config::TourType;
use crate::error::Error;
use crate::tc::TimeControl;
use log::warn;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const LEDGER_FILE: &str = "./playing.json";

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum MatchState {
    #[default]
    None,
    Playing,
    Completed,
    Error,
}

/// One scheduled game. In a knockout bye the black name is empty and the
/// record is born completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "RecordWire", from = "RecordWire")]
pub struct MatchRecord {
    pub players: [String; 2],
    pub start_fen: Option<String>,
    pub start_moves: Vec<Mv>,
    pub state: MatchState,
    pub result: GameResult,
    pub game_idx: usize,
    pub round: u32,
    pub pair_id: u32,
}

impl MatchRecord {
    pub fn new(white: &str, black: &str, round: u32, pair_id: u32) -> MatchRecord {
        MatchRecord {
            players: [white.to_string(), black.to_string()],
            start_fen: None,
            start_moves: Vec::new(),
            state: MatchState::None,
            result: GameResult::default(),
            game_idx: 0,
            round,
            pair_id,
        }
    }

    pub fn white(&self) -> &str {
        &self.players[0]
    }

    pub fn black(&self) -> &str {
        &self.players[1]
    }

    pub fn is_bye(&self) -> bool {
        self.players[0].is_empty() || self.players[1].is_empty()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, MatchState::Completed | MatchState::Error)
    }
}

/// Wire shape of one record inside the ledger file. Only the result string
/// survives persistence; a record that had merely started playing comes
/// back as an unplayed one.
#[derive(Debug, Serialize, Deserialize)]
struct RecordWire {
    players: [String; 2],
    #[serde(rename = "startFen", default, skip_serializing_if = "Option::is_none")]
    start_fen: Option<String>,
    #[serde(rename = "startMoves", default, skip_serializing_if = "Vec::is_empty")]
    start_moves: Vec<u32>,
    result: String,
    #[serde(rename = "gameIdx")]
    game_idx: usize,
    round: u32,
    #[serde(rename = "pairId")]
    pair_id: u32,
}

impl From<MatchRecord> for RecordWire {
    fn from(r: MatchRecord) -> RecordWire {
        let result = match r.state {
            MatchState::Completed => r.result.to_short_string(),
            _ => "*",
        };
        RecordWire {
            players: r.players,
            start_fen: r.start_fen,
            start_moves: r.start_moves.iter().map(Mv::pack).collect(),
            result: result.to_string(),
            game_idx: r.game_idx,
            round: r.round,
            pair_id: r.pair_id,
        }
    }
}

impl From<RecordWire> for MatchRecord {
    fn from(w: RecordWire) -> MatchRecord {
        let (state, kind) = match w.result.as_str() {
            "1-0" => (MatchState::Completed, ResultKind::Win),
            "0-1" => (MatchState::Completed, ResultKind::Loss),
            "1/2-1/2" => (MatchState::Completed, ResultKind::Draw),
            _ => (MatchState::None, ResultKind::None),
        };
        MatchRecord {
            players: w.players,
            start_fen: w.start_fen,
            start_moves: w.start_moves.into_iter().map(Mv::unpack).collect(),
            state,
            result: GameResult {
                kind,
                ..GameResult::default()
            },
            game_idx: w.game_idx,
            round: w.round,
            pair_id: w.pair_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(rename = "type")]
    pub tour_type: TourType,
    #[serde(rename = "timeControl")]
    pub time_control: TimeControl,
    pub elapsed: f64,
    #[serde(rename = "recordList")]
    pub record_list: Vec<MatchRecord>,
}

#[derive(Debug)]
pub struct MatchLedger {
    path: PathBuf,
    pub tour_type: TourType,
    pub time_control: TimeControl,
    /// Wall seconds accumulated by earlier runs of a resumed tournament.
    pub prior_elapsed: f64,
    pub records: Vec<MatchRecord>,
}

impl MatchLedger {
    pub fn new(path: &Path, tour_type: TourType, time_control: TimeControl) -> MatchLedger {
        MatchLedger {
            path: path.to_path_buf(),
            tour_type,
            time_control,
            prior_elapsed: 0.0,
            records: Vec::new(),
        }
    }

    /// Appends a record, assigning its stable ledger index.
    pub fn append(&mut self, mut record: MatchRecord) -> usize {
        record.game_idx = self.records.len();
        self.records.push(record);
        self.records.len() - 1
    }

    /// The caller persists with [`MatchLedger::save`] after every mark so the
    /// on-disk ledger never lags the in-memory one.
    pub fn mark_playing(&mut self, idx: usize) {
        self.records[idx].state = MatchState::Playing;
    }

    pub fn mark_completed(&mut self, idx: usize, result: GameResult) {
        let record = &mut self.records[idx];
        record.state = MatchState::Completed;
        record.result = result;
    }

    pub fn mark_error(&mut self, idx: usize) {
        self.records[idx].state = MatchState::Error;
    }

    pub fn unfinished_count(&self) -> usize {
        self.records.iter().filter(|r| !r.is_finished()).count()
    }

    pub fn last_round(&self) -> u32 {
        self.records.iter().map(|r| r.round).max().unwrap_or(0)
    }

    /// Atomically rewrites the ledger file. Best effort: an I/O failure is
    /// logged and the tournament carries on.
    pub fn save(&mut self, run_elapsed: f64) {
        let snapshot = LedgerSnapshot {
            tour_type: self.tour_type,
            time_control: self.time_control,
            elapsed: self.prior_elapsed + run_elapsed,
            record_list: self.records.clone(),
        };
        if let Err(e) = self.write_snapshot(&snapshot) {
            warn!("cannot save match ledger {}: {e}", self.path.display());
        }
    }

    fn write_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<(), Error> {
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(serde_json::to_string_pretty(snapshot)?.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Reads a snapshot left by an earlier run. `None` when the file is
    /// missing or unreadable (a corrupt ledger is reported, not fatal).
    pub fn load_snapshot(path: &Path) -> Option<LedgerSnapshot> {
        let text = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&text) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("ignoring corrupt match ledger {}: {e}", path.display());
                None
            }
        }
    }

    /// Replaces this ledger's content with a loaded snapshot. Records that
    /// were mid-game when the snapshot was written come back unplayed.
    pub fn adopt(&mut self, snapshot: LedgerSnapshot) {
        self.tour_type = snapshot.tour_type;
        self.time_control = snapshot.time_control;
        self.prior_elapsed = snapshot.elapsed;
        self.records = snapshot.record_list;
    }

    pub fn remove_file(&self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("cannot remove {}: {e}", self.path.display());
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Asks the operator whether to pick up an interrupted tournament. Reads
/// one line from standard input unless auto-yes was passed.
pub fn confirm_resume(auto_yes: bool) -> bool {
    if auto_yes {
        return true;
    }
    println!("An unfinished tournament was found. Resume it? (y/n)");
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}
