//! Rolling window of recent transaction fees, exposed as a running average
//! for fee-estimation consumers (spec §4.F "Cost watcher").

use lottery_book_core::constants::COST_WATCHER_WINDOW;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub struct CostWatcher {
    window: Duration,
    samples: VecDeque<(Instant, f64)>,
}

impl CostWatcher {
    pub fn new() -> Self {
        CostWatcher { window: COST_WATCHER_WINDOW, samples: VecDeque::new() }
    }

    pub fn record(&mut self, now: Instant, tx_fee_eth: f64) {
        self.samples.push_back((now, tx_fee_eth));
        self.prune(now);
    }

    fn prune(&mut self, now: Instant) {
        while let Some((ts, _)) = self.samples.front() {
            if now.duration_since(*ts) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn average(&mut self, now: Instant) -> Option<f64> {
        self.prune(now);
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().map(|(_, fee)| fee).sum::<f64>() / self.samples.len() as f64)
    }
}

impl Default for CostWatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn old_samples_fall_out_of_the_window() {
        let mut watcher = CostWatcher { window: Duration::from_secs(10), samples: VecDeque::new() };
        let t0 = Instant::now();
        watcher.record(t0, 1.0);
        watcher.record(t0 + Duration::from_secs(5), 3.0);
        assert_eq!(watcher.average(t0 + Duration::from_secs(5)), Some(2.0));

        let later = t0 + Duration::from_secs(20);
        assert_eq!(watcher.average(later), None);
    }
}
