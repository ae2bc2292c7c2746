//! Chess-engine tournament orchestrator. `arbiter` pairs autonomous UCI
//! engines, drives each pairing as a timed game over local subprocess
//! pipes, and runs round-robin or knockout tournaments concurrently until a
//! ranked result table falls out — surviving crashes through a persistent
//! match ledger.
//!
//! The chess board / move generator, the opening-book sampler and the CLI
//! front-end are external collaborators: implement [`board::Board`] and
//! [`book::OpeningSampler`], then hand them to [`tour::TourMng`].
//!
//! ```no_run
//! use arbiter::book::NoBook;
//! use arbiter::config::{Registry, TourConfig};
//! use arbiter::tour::{BoardFactory, TourMng};
//! use std::path::Path;
//!
//! fn main() -> Result<(), arbiter::error::Error> {
//!     let cfg = TourConfig::load(Path::new("./tour.json"))?;
//!     let registry = Registry::load(Path::new(&cfg.engine_configurations.path))?;
//!     let factory: BoardFactory = Box::new(|| todo!("your Board implementation"));
//!     let mut tour = TourMng::new(cfg, registry, factory, Box::new(NoBook))?;
//!     tour.prepare(false)?;
//!     tour.run();
//!     Ok(())
//! }
//! ```

pub mod board;
pub mod book;
pub mod config;
pub mod engine;
pub mod error;
pub mod game;
pub mod ledger;
pub mod logfile;
pub mod pgn;
pub mod player;
pub mod pool;
pub mod tc;
pub mod ticker;
pub mod tour;

#[cfg(test)]
mod testutil;

pub use error::Error;
