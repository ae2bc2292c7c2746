use crate::board::{Board, GameResult, ResultReason};
use crate::tc::TimeControl;
use std::fmt::Write;

/// Everything beyond the board needed to head one PGN game.
#[derive(Debug, Clone)]
pub struct PgnMeta<'a> {
    pub event: &'a str,
    pub site: &'a str,
    pub round: u32,
    /// Ledger index, emitted as the `Board` tag (1-based).
    pub board_idx: usize,
    pub white: &'a str,
    pub black: &'a str,
    pub time_control: TimeControl,
}

fn tag(out: &mut String, key: &str, value: &str) {
    let _ = writeln!(out, "[{key} \"{value}\"]");
}

/// Renders one finished game: the seven-tag roster, the extension tags and
/// the SAN movetext with the result token at the end.
pub fn render(board: &dyn Board, result: GameResult, meta: &PgnMeta) -> String {
    let mut out = String::new();
    let now = chrono::Local::now();

    if !meta.event.is_empty() {
        tag(&mut out, "Event", meta.event);
    }
    if !meta.site.is_empty() {
        tag(&mut out, "Site", meta.site);
    }
    tag(&mut out, "Date", &now.format("%Y.%m.%d").to_string());
    tag(&mut out, "Round", &meta.round.to_string());
    tag(&mut out, "White", meta.white);
    tag(&mut out, "Black", meta.black);
    tag(&mut out, "Result", result.to_short_string());
    tag(&mut out, "TimeControl", &meta.time_control.to_string());
    tag(&mut out, "Time", &now.format("%H:%M:%S").to_string());
    tag(&mut out, "Board", &(meta.board_idx + 1).to_string());
    if result.reason != ResultReason::NoReason {
        tag(&mut out, "Termination", result.reason.as_str());
    }
    if let Some(fen) = board.starting_fen() {
        tag(&mut out, "FEN", &fen);
        tag(&mut out, "SetUp", "1");
    }
    if let Some(info) = board.opening_info() {
        tag(&mut out, "ECO", &info.eco);
        tag(&mut out, "Opening", &info.name);
        if let Some(variation) = &info.variation {
            tag(&mut out, "Variation", variation);
        }
    }

    out.push('\n');
    let movetext = board.move_text_san(8);
    out.push_str(&movetext);
    if result.is_over() {
        if !movetext.is_empty() && !movetext.ends_with('\n') {
            out.push(' ');
        }
        out.push_str(result.to_short_string());
        out.push('\n');
    }
    out.push('\n');
    out
}
