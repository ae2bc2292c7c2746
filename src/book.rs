//! Contract for the external opening-book sampler. The orchestrator only
//! ever asks for a random starting position plus prefix moves; reading and
//! weighting actual book formats happens elsewhere.

use crate::board::Mv;
use serde::{Deserialize, Serialize};

/// One `opening books` config entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookEntry {
    #[serde(default)]
    pub mode: bool,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxply: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top100: Option<u32>,
}

/// A sampled starting point: an optional FEN and the prefix moves to apply
/// before the engines take over.
#[derive(Debug, Clone, Default)]
pub struct Opening {
    pub fen: Option<String>,
    pub moves: Vec<Mv>,
}

impl Opening {
    pub fn is_empty(&self) -> bool {
        self.fen.is_none() && self.moves.is_empty()
    }
}

pub trait OpeningSampler: Send {
    fn sample(&mut self) -> Opening;

    fn is_empty(&self) -> bool;
}

/// Sampler used when no book is configured: every game starts from the
/// standard position.
#[derive(Debug, Default)]
pub struct NoBook;

impl OpeningSampler for NoBook {
    fn sample(&mut self) -> Opening {
        Opening::default()
    }

    fn is_empty(&self) -> bool {
        true
    }
}
