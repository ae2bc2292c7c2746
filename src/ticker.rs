use crossbeam_channel::Receiver;
use std::time::{Duration, Instant};

/// The scheduler heartbeat: everything in the core advances in ~500 ms
/// steps of the tick loop.
pub const TICK_PERIOD: Duration = Duration::from_millis(500);

/// Periodic wakeup for the scheduler thread.
pub struct Ticker {
    rx: Receiver<Instant>,
}

impl Ticker {
    pub fn new(period: Duration) -> Ticker {
        Ticker {
            rx: crossbeam_channel::tick(period),
        }
    }

    /// Blocks until the next tick.
    pub fn wait(&self) {
        let _ = self.rx.recv();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_keep_coming() {
        let ticker = Ticker::new(Duration::from_millis(5));
        let start = Instant::now();
        ticker.wait();
        ticker.wait();
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
