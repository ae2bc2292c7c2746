use crate::board::Side;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeControlMode {
    /// X moves in T seconds, plus an increment per move.
    #[default]
    Standard,
    /// No wall clock at all.
    Infinite,
    /// Engine-side depth cap, no wall clock.
    Depth,
    /// Flat per-move budget.
    Movetime,
}

/// Time-control configuration as loaded from the tournament config and
/// snapshotted into the match ledger.
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct TimeControl {
    pub mode: TimeControlMode,
    /// Moves per control period in `standard` mode; 0 means the whole game.
    #[serde(default)]
    pub moves: u32,
    /// Base seconds in `standard` mode, per-move seconds in `movetime`.
    #[serde(default)]
    pub time: f64,
    #[serde(default)]
    pub increment: f64,
    /// Slack absorbing IPC jitter before a reply counts as late.
    #[serde(default)]
    pub margin: f64,
    #[serde(default)]
    pub depth: u32,
}

impl Default for TimeControl {
    fn default() -> Self {
        TimeControl {
            mode: TimeControlMode::Standard,
            moves: 40,
            time: 60.0,
            increment: 0.5,
            margin: 0.5,
            depth: 0,
        }
    }
}

impl TimeControl {
    pub fn setup(
        &mut self,
        mode: TimeControlMode,
        moves: u32,
        time: f64,
        increment: f64,
        margin: f64,
    ) {
        *self = TimeControl {
            mode,
            moves,
            time,
            increment,
            margin,
            depth: self.depth,
        };
    }

    pub fn is_valid(&self) -> bool {
        match self.mode {
            TimeControlMode::Infinite => true,
            TimeControlMode::Depth => self.depth > 0,
            TimeControlMode::Movetime => self.time > 0.0,
            TimeControlMode::Standard => {
                self.time > 0.0 && self.increment >= 0.0 && self.margin >= 0.0
            }
        }
    }
}

impl fmt::Display for TimeControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            TimeControlMode::Infinite => write!(f, "infinite"),
            TimeControlMode::Depth => write!(f, "depth:{}", self.depth),
            TimeControlMode::Movetime => write!(f, "movetime:{}", self.time),
            TimeControlMode::Standard => {
                write!(f, "{}/{}:{}", self.moves, self.time, self.increment)
            }
        }
    }
}

/// Per-game clocks. Clock state is kept in milliseconds; the per-move
/// stopwatch starts when thinking starts and backs every overtime query.
#[derive(Debug, Clone)]
pub struct GameClock {
    tc: TimeControl,
    left_ms: [i64; 2],
    overtime: [bool; 2],
    think_started: Option<Instant>,
    /// Seconds consumed at the most recent `is_time_over` query, kept for
    /// timeout diagnostics.
    pub last_query_consumed: f64,
}

impl GameClock {
    pub fn new(tc: TimeControl) -> GameClock {
        GameClock {
            tc,
            left_ms: [0; 2],
            overtime: [false; 2],
            think_started: None,
            last_query_consumed: 0.0,
        }
    }

    pub fn control(&self) -> &TimeControl {
        &self.tc
    }

    pub fn time_left_ms(&self, side: Side) -> i64 {
        self.left_ms[side.index()]
    }

    pub fn in_overtime(&self, side: Side) -> bool {
        self.overtime[side.index()]
    }

    /// Seconds since thinking started.
    pub fn move_time_consumed(&self) -> f64 {
        match self.think_started {
            Some(t) => t.elapsed().as_secs_f64(),
            None => 0.0,
        }
    }

    /// Prepares the clocks for the move about to be played and restarts the
    /// per-move stopwatch. At move 0 both clocks are filled with the base
    /// budget; in `standard` mode the side about to move is refilled at every
    /// `moves`-per-control boundary; in `movetime` mode both clocks reset to
    /// the flat budget on every call.
    pub fn setup_clocks_before_thinking(&mut self, moves_played: usize, to_move: Side) {
        let base_ms = (self.tc.time * 1000.0) as i64;
        match self.tc.mode {
            TimeControlMode::Movetime => {
                self.left_ms = [base_ms; 2];
            }
            _ if moves_played == 0 => {
                self.left_ms = [base_ms; 2];
            }
            TimeControlMode::Standard if self.tc.moves > 0 => {
                let full = moves_played / 2;
                if full > 0 && full % self.tc.moves as usize == 0 {
                    self.left_ms[to_move.index()] += base_ms;
                }
            }
            _ => {}
        }
        self.think_started = Some(Instant::now());
    }

    /// Books the elapsed seconds against the side that just moved and adds
    /// the increment. The clock never goes below zero; running out is
    /// remembered as overtime.
    pub fn update_clock_after_move(&mut self, elapsed: f64, side: Side, _moves_played: usize) {
        if self.tc.mode != TimeControlMode::Standard {
            return;
        }
        let sd = side.index();
        self.left_ms[sd] -= (elapsed * 1000.0) as i64;
        self.left_ms[sd] += (self.tc.increment * 1000.0) as i64;
        if self.left_ms[sd] < 0 {
            self.left_ms[sd] = 0;
            self.overtime[sd] = true;
        }
    }

    /// True when the side to move has consumed its remaining budget plus the
    /// configured margin. Always false without a wall clock.
    pub fn is_time_over(&mut self, side: Side) -> bool {
        match self.tc.mode {
            TimeControlMode::Standard | TimeControlMode::Movetime => {}
            _ => return false,
        }
        let consumed_ms = self.move_time_consumed() * 1000.0;
        self.last_query_consumed = consumed_ms / 1000.0;
        (self.left_ms[side.index()] as f64) + self.tc.margin * 1000.0 < consumed_ms
    }

    #[cfg(test)]
    pub fn backdate_think_start(&mut self, ago: std::time::Duration) {
        self.think_started = Some(Instant::now() - ago);
    }
}
