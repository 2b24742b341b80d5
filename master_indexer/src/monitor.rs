use std::collections::VecDeque;
use std::time::Instant;

use tracing::info;

/// Rates are averaged over the last 20 ticks.
const RATE_WINDOW: usize = 20;

/// Counters reset on every monitor tick.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MonitorCounters {
    pub pushed_blocks: u64,
    pub live_pushed_blocks: u64,
    pub consumed_blocks: u64,
    pub live_consumed_blocks: u64,
    pub deserialized_actions: u64,
    pub deserialized_deltas: u64,
    pub indexed_objects: u64,
}

/// What one monitor tick decided. The event loop owns the consequences
/// (grace timer, process exit), the monitor only reports them.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickOutcome {
    /// Nothing was indexed, deserialized or consumed this tick.
    pub idle: bool,
    /// Idle and nothing was read either.
    pub fully_idle: bool,
    /// Accumulated idle time crossed the configured auto stop.
    pub auto_stop_triggered: bool,
    /// The batch range finished during this tick.
    pub range_completed_now: bool,
    pub avg_rate: f64,
}

/// Periodic progress accounting: rates, ETA, idle detection.
#[derive(Debug)]
pub struct ProgressMonitor {
    log_interval_secs: f64,
    total_range: u64,
    live_only_mode: bool,
    auto_stop: u64,
    pub counters: MonitorCounters,
    total_read: u64,
    total_blocks: u64,
    total_actions: u64,
    total_deltas: u64,
    total_indexed_blocks: u64,
    consume_rates: VecDeque<f64>,
    idle_count: u64,
    range_completed: bool,
    started_at: Instant,
}

impl ProgressMonitor {
    pub fn new(
        log_interval_secs: f64,
        total_range: u64,
        live_only_mode: bool,
        auto_stop: u64,
    ) -> Self {
        Self {
            log_interval_secs,
            total_range,
            live_only_mode,
            auto_stop,
            counters: MonitorCounters::default(),
            total_read: 0,
            total_blocks: 0,
            total_actions: 0,
            total_deltas: 0,
            total_indexed_blocks: 0,
            consume_rates: VecDeque::with_capacity(RATE_WINDOW),
            idle_count: 0,
            range_completed: false,
            started_at: Instant::now(),
        }
    }

    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    pub fn total_indexed_blocks(&self) -> u64 {
        self.total_indexed_blocks
    }

    pub fn tick(&mut self) -> TickOutcome {
        let t_scale = self.log_interval_secs;
        let mut outcome = TickOutcome::default();

        self.total_read += self.counters.pushed_blocks;
        self.total_blocks += self.counters.consumed_blocks;
        self.total_actions += self.counters.deserialized_actions;
        self.total_deltas += self.counters.deserialized_deltas;
        self.total_indexed_blocks += self.counters.indexed_objects;

        if self.consume_rates.len() == RATE_WINDOW {
            self.consume_rates.pop_front();
        }
        self.consume_rates
            .push_back(self.counters.consumed_blocks as f64 / t_scale);
        let avg_rate =
            self.consume_rates.iter().sum::<f64>() / self.consume_rates.len() as f64;
        outcome.avg_rate = avg_rate;

        if self.total_blocks < self.total_range && !self.live_only_mode {
            let percent = self.total_blocks as f64 / self.total_range as f64 * 100.0;
            if avg_rate > 0.0 {
                let eta_secs = (self.total_range - self.total_blocks) as f64 / avg_rate;
                info!(
                    "Indexed {}/{} blocks ({:.2}%) | {:.0} blocks/s | ETA {:.0}s",
                    self.total_blocks, self.total_range, percent, avg_rate, eta_secs
                );
            } else {
                info!(
                    "Indexed {}/{} blocks ({:.2}%) | waiting for data",
                    self.total_blocks, self.total_range, percent
                );
            }
        }

        if self.total_range > 0 && self.total_blocks >= self.total_range && !self.range_completed {
            info!(
                "Block range completed in {:.0}s | {} blocks | {} actions | {} deltas",
                self.started_at.elapsed().as_secs_f64(),
                self.total_blocks,
                self.total_actions,
                self.total_deltas
            );
            self.range_completed = true;
            outcome.range_completed_now = true;
        }

        if self.counters.indexed_objects == 0
            && self.counters.deserialized_actions == 0
            && self.counters.consumed_blocks == 0
        {
            outcome.idle = true;
            if self.counters.pushed_blocks == 0 {
                outcome.fully_idle = true;
                self.idle_count += 1;
                if self.auto_stop > 0 && t_scale * self.idle_count as f64 >= self.auto_stop as f64
                {
                    outcome.auto_stop_triggered = true;
                }
            }
        } else {
            self.idle_count = 0;
        }

        self.counters = MonitorCounters::default();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_resets_counters_and_accumulates_totals_once() {
        let mut monitor = ProgressMonitor::new(5.0, 1000, false, 0);
        monitor.counters.consumed_blocks = 100;
        monitor.counters.indexed_objects = 40;
        monitor.counters.deserialized_actions = 7;

        monitor.tick();
        assert_eq!(monitor.counters, MonitorCounters::default());
        assert_eq!(monitor.total_blocks(), 100);
        assert_eq!(monitor.total_indexed_blocks(), 40);

        monitor.tick();
        assert_eq!(monitor.total_blocks(), 100);
    }

    #[test]
    fn test_rate_window_is_bounded() {
        let mut monitor = ProgressMonitor::new(5.0, 0, true, 0);
        for _ in 0..50 {
            monitor.counters.consumed_blocks = 100;
            monitor.tick();
        }
        assert_eq!(monitor.consume_rates.len(), RATE_WINDOW);
        // 100 blocks over a 5 second tick
        let outcome = {
            monitor.counters.consumed_blocks = 100;
            monitor.tick()
        };
        assert!((outcome.avg_rate - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_range_completed_fires_once() {
        let mut monitor = ProgressMonitor::new(5.0, 100, false, 0);
        monitor.counters.consumed_blocks = 100;
        let first = monitor.tick();
        assert!(first.range_completed_now);
        let second = monitor.tick();
        assert!(!second.range_completed_now);
    }

    #[test]
    fn test_idle_detection_and_auto_stop() {
        // auto_stop after 15 seconds of full idle = 3 ticks at 5s
        let mut monitor = ProgressMonitor::new(5.0, 1000, false, 15);

        for _ in 0..2 {
            let outcome = monitor.tick();
            assert!(outcome.fully_idle);
            assert!(!outcome.auto_stop_triggered);
        }
        let third = monitor.tick();
        assert!(third.auto_stop_triggered);
    }

    #[test]
    fn test_activity_resets_idle_count() {
        let mut monitor = ProgressMonitor::new(5.0, 1000, false, 15);
        monitor.tick();
        monitor.tick();

        monitor.counters.consumed_blocks = 5;
        let active = monitor.tick();
        assert!(!active.idle);

        // Idle accumulation starts over.
        let outcome = monitor.tick();
        assert!(outcome.fully_idle && !outcome.auto_stop_triggered);
    }

    #[test]
    fn test_reading_keeps_auto_stop_at_bay() {
        let mut monitor = ProgressMonitor::new(5.0, 1000, false, 10);
        for _ in 0..10 {
            // Blocks are still being pushed, only the downstream is idle.
            monitor.counters.pushed_blocks = 50;
            let outcome = monitor.tick();
            assert!(outcome.idle);
            assert!(!outcome.fully_idle);
            assert!(!outcome.auto_stop_triggered);
        }
    }
}
