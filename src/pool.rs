//! Lease/return pool of engine drivers keyed by configuration name. A
//! leased driver has a single owner (its game) until it is returned; a
//! returned driver is parked with its subprocess alive for the next game
//! that needs the same configuration.

use crate::config::Registry;
use crate::engine::{EngineState, UciEngine};
use crate::error::Error;
use crate::logfile::TextLog;
use crate::player::Player;
use log::info;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub struct PlayerPool {
    registry: Registry,
    engine_log: Option<Arc<TextLog>>,
    parked: Mutex<HashMap<String, Vec<Player>>>,
}

fn lock(parked: &Mutex<HashMap<String, Vec<Player>>>) -> MutexGuard<'_, HashMap<String, Vec<Player>>> {
    match parked.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl PlayerPool {
    pub fn new(registry: Registry, engine_log: Option<Arc<TextLog>>) -> PlayerPool {
        PlayerPool {
            registry,
            engine_log,
            parked: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Leases a driver for `name`, reusing a parked one when available.
    pub fn create_engine(&self, name: &str) -> Result<Player, Error> {
        let mut parked = lock(&self.parked);
        if let Some(drivers) = parked.get_mut(name) {
            while let Some(mut driver) = drivers.pop() {
                if driver.state() == EngineState::Stopped {
                    driver.kill();
                    continue;
                }
                return Ok(driver);
            }
        }
        drop(parked);

        let config = self
            .registry
            .get(name)
            .ok_or_else(|| Error::UnknownPlayer {
                name: name.to_string(),
            })?
            .clone();
        Ok(Player::Uci(UciEngine::new(config, self.engine_log.clone())))
    }

    /// Parks a driver for reuse; a dead one is reaped instead.
    pub fn return_player(&self, mut player: Player) {
        if player.state() == EngineState::Stopped {
            player.kill();
            return;
        }
        lock(&self.parked)
            .entry(player.name().to_string())
            .or_default()
            .push(player);
    }

    /// Drives parked drivers' reader queues and reaps the ones whose
    /// subprocess died while idle.
    pub fn tick(&self) {
        let mut parked = lock(&self.parked);
        for drivers in parked.values_mut() {
            drivers.retain_mut(|driver| {
                driver.tick();
                if driver.state() == EngineState::Stopped {
                    driver.kill();
                    false
                } else {
                    true
                }
            });
        }
    }

    /// Stops every parked subprocess: a polite `quit`, a short grace, then
    /// the axe. Leased drivers must have been returned already.
    pub fn shutdown(&self) {
        let mut parked = lock(&self.parked);
        let mut count = 0;
        for drivers in parked.values_mut() {
            for driver in drivers.iter_mut() {
                driver.quit();
                count += 1;
            }
        }
        if count > 0 {
            info!("pool shutdown: quitting {count} engines");
            std::thread::sleep(Duration::from_millis(500));
        }
        for drivers in parked.values_mut() {
            for driver in drivers.iter_mut() {
                driver.kill();
            }
        }
        parked.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::testutil::ScriptedPlayer;

    fn pool() -> PlayerPool {
        let configs: Vec<EngineConfig> = serde_json::from_str(
            r#"[{"name": "alpha", "command": "/bin/alpha"},
                {"name": "beta", "command": "/bin/beta"}]"#,
        )
        .unwrap();
        PlayerPool::new(Registry::from_configs(configs), None)
    }

    #[test]
    fn unknown_name_is_refused() {
        let err = pool().create_engine("gamma").unwrap_err();
        assert!(matches!(err, Error::UnknownPlayer { .. }));
    }

    #[test]
    fn lease_creates_then_reuses() {
        let pool = pool();
        let leased = pool.create_engine("alpha").unwrap();
        assert_eq!(leased.name(), "alpha");
        assert_eq!(leased.state(), EngineState::None);

        // park a live scripted driver and get the same one back
        let parked = ScriptedPlayer::ready("alpha");
        pool.return_player(Player::Scripted(parked));
        let again = pool.create_engine("alpha").unwrap();
        assert!(matches!(again, Player::Scripted(_)));
    }

    #[test]
    fn dead_drivers_are_not_reused() {
        let pool = pool();
        let mut dead = ScriptedPlayer::ready("beta");
        dead.force_state(EngineState::Stopped);
        pool.return_player(Player::Scripted(dead));
        // falls through to a fresh (unlaunched) UCI driver
        let leased = pool.create_engine("beta").unwrap();
        assert!(matches!(leased, Player::Uci(_)));
    }
}
