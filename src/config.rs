//! Tournament configuration and the engine registry. The registry is an
//! explicit value handed to the tournament manager; nothing in here is
//! global.

use crate::book::BookEntry;
use crate::error::Error;
use crate::tc::TimeControl;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TourType {
    Roundrobin,
    Knockout,
}

impl std::fmt::Display for TourType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TourType::Roundrobin => write!(f, "roundrobin"),
            TourType::Knockout => write!(f, "knockout"),
        }
    }
}

fn default_one() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_event() -> String {
    String::from("Chess Tournament")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseConfig {
    #[serde(rename = "type")]
    pub tour_type: TourType,
    #[serde(rename = "games per pair", default = "default_one")]
    pub games_per_pair: u32,
    #[serde(default)]
    pub ponder: bool,
    #[serde(rename = "shuffle players", default)]
    pub shuffle_players: bool,
    #[serde(default = "default_true")]
    pub resumable: bool,
    #[serde(default = "default_event")]
    pub event: String,
    #[serde(default)]
    pub site: String,
    #[serde(default = "default_one")]
    pub concurrency: u32,
    /// Fixes the pairing RNG for reproducible runs; absent means a fresh
    /// seed per run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub mode: bool,
    #[serde(default)]
    pub path: String,
    #[serde(rename = "show time", default)]
    pub show_time: bool,
}

impl SinkConfig {
    pub fn enabled(&self) -> bool {
        self.mode && !self.path.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogsConfig {
    #[serde(default)]
    pub pgn: SinkConfig,
    #[serde(default)]
    pub result: SinkConfig,
    #[serde(default)]
    pub engine: SinkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryRef {
    pub path: String,
}

impl Default for RegistryRef {
    fn default() -> Self {
        RegistryRef {
            path: String::from("./engines.json"),
        }
    }
}

/// Draw-by-length and tablebase adjudication knobs, applied per game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjudicationConfig {
    #[serde(default)]
    pub mode: bool,
    #[serde(rename = "max game length", default)]
    pub max_game_length: usize,
    #[serde(default)]
    pub egtb: bool,
    #[serde(rename = "max pieces", default)]
    pub max_pieces: u32,
}

impl Default for AdjudicationConfig {
    fn default() -> Self {
        AdjudicationConfig {
            mode: false,
            max_game_length: 0,
            egtb: false,
            max_pieces: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TourConfig {
    pub base: BaseConfig,
    #[serde(rename = "time control")]
    pub time_control: TimeControl,
    #[serde(rename = "opening books", default)]
    pub opening_books: Vec<BookEntry>,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(rename = "engine configurations", default)]
    pub engine_configurations: RegistryRef,
    #[serde(default)]
    pub adjudication: AdjudicationConfig,
    /// Participant names; empty means every registered engine plays.
    #[serde(default)]
    pub players: Vec<String>,
}

impl TourConfig {
    pub fn load(path: &Path) -> Result<TourConfig, Error> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: TourConfig = serde_json::from_str(&text)?;
        cfg.check()?;
        Ok(cfg)
    }

    pub fn check(&self) -> Result<(), Error> {
        if !self.time_control.is_valid() {
            return Err(Error::config(format!(
                "time control is incomplete or contradictory: {}",
                self.time_control
            )));
        }
        if self.base.games_per_pair < 1 {
            return Err(Error::config("\"games per pair\" must be at least 1"));
        }
        if self.base.concurrency < 1 {
            return Err(Error::config("\"concurrency\" must be at least 1"));
        }
        Ok(())
    }

    /// The effective participant list; falls back to every registered
    /// engine when `players` is empty. Every name must be registered.
    pub fn resolve_players(&self, registry: &Registry) -> Result<Vec<String>, Error> {
        let names: Vec<String> = if self.players.is_empty() {
            registry.names()
        } else {
            self.players.clone()
        };
        if names.len() < 2 {
            return Err(Error::config(format!(
                "a tournament needs at least two players, got {}",
                names.len()
            )));
        }
        for name in &names {
            if !registry.contains(name) {
                return Err(Error::UnknownPlayer { name: name.clone() });
            }
        }
        Ok(names)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Uci,
}

/// One `setoption` value replayed after the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOptionValue {
    pub name: String,
    pub value: serde_json::Value,
}

impl EngineOptionValue {
    /// The textual form sent on the wire.
    pub fn value_string(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Launch parameters for one engine, keyed by `name` in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub name: String,
    #[serde(default)]
    pub protocol: Protocol,
    pub command: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(rename = "working folder", default)]
    pub working_folder: String,
    #[serde(default)]
    pub ponderable: bool,
    /// Declared rating, used to seed knockout brackets.
    #[serde(default)]
    pub elo: i32,
    #[serde(default)]
    pub options: Vec<EngineOptionValue>,
    #[serde(rename = "init strings", default)]
    pub init_strings: Vec<String>,
}

/// Name → launch-parameter registry, loaded from `engines.json`.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    map: HashMap<String, EngineConfig>,
    order: Vec<String>,
}

impl Registry {
    pub fn load(path: &Path) -> Result<Registry, Error> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let configs: Vec<EngineConfig> = serde_json::from_str(&text)?;
        Ok(Registry::from_configs(configs))
    }

    pub fn from_configs(configs: Vec<EngineConfig>) -> Registry {
        let mut registry = Registry::default();
        for cfg in configs {
            if cfg.name.is_empty() || cfg.command.is_empty() {
                continue;
            }
            if !registry.map.contains_key(&cfg.name) {
                registry.order.push(cfg.name.clone());
            }
            registry.map.insert(cfg.name.clone(), cfg);
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<&EngineConfig> {
        self.map.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Registered names in file order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }
}
