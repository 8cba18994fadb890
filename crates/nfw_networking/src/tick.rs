//! # Tick Loop
//!
//! Fixed-timestep loop driving the synchronise pass.
//!
//! ```text
//!   loop {
//!       while ticks.should_tick() {
//!           let start = ticks.begin_tick();
//!           establisher.synchronise(&mut container);
//!           container.synchronise();
//!           ticks.end_tick(start);
//!       }
//!       ticks.wait_for_next_tick();
//!   }
//! ```

use std::time::{Duration, Instant};

use crate::DEFAULT_TICK_RATE;

/// Below this much remaining time the wait spins instead of sleeping.
const SPIN_THRESHOLD: Duration = Duration::from_micros(500);

/// Fixed-timestep tick scheduler.
#[derive(Debug)]
pub struct TickLoop {
    tick_duration: Duration,
    last_tick: Instant,
    accumulator: Duration,
    tick_count: u64,
    stats: TickStats,
}

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickStats {
    /// Shortest tick observed, in microseconds.
    pub min_tick_us: u64,
    /// Longest tick observed, in microseconds.
    pub max_tick_us: u64,
    /// Rolling average tick duration, in microseconds.
    pub avg_tick_us: u64,
    /// Ticks that overran their budget.
    pub late_ticks: u64,
    /// Ticks measured.
    pub total_ticks: u64,
}

impl TickStats {
    fn fresh(budget: Duration) -> Self {
        Self {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: duration_micros(budget),
            late_ticks: 0,
            total_ticks: 0,
        }
    }
}

fn duration_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl TickLoop {
    /// Creates a loop ticking `tick_rate` times per second.
    ///
    /// A rate of zero is treated as one.
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        let tick_duration = Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1)));
        Self {
            tick_duration,
            last_tick: Instant::now(),
            accumulator: Duration::ZERO,
            tick_count: 0,
            stats: TickStats::fresh(tick_duration),
        }
    }

    /// Returns true while at least one tick is due.
    #[must_use]
    pub fn should_tick(&mut self) -> bool {
        let now = Instant::now();
        self.accumulator += now.duration_since(self.last_tick);
        self.last_tick = now;
        self.accumulator >= self.tick_duration
    }

    /// Consumes one due tick and returns its start time.
    #[must_use]
    pub fn begin_tick(&mut self) -> Instant {
        self.accumulator = self.accumulator.saturating_sub(self.tick_duration);
        self.tick_count += 1;
        Instant::now()
    }

    /// Records how long the tick started at `start` took.
    pub fn end_tick(&mut self, start: Instant) {
        let elapsed = start.elapsed();
        let micros = duration_micros(elapsed);

        let stats = &mut self.stats;
        stats.total_ticks += 1;
        stats.min_tick_us = stats.min_tick_us.min(micros);
        stats.max_tick_us = stats.max_tick_us.max(micros);
        stats.avg_tick_us = (stats.avg_tick_us * 15 + micros) / 16;
        if elapsed > self.tick_duration {
            stats.late_ticks += 1;
        }
    }

    /// Sleeps until the next tick is due.
    pub fn wait_for_next_tick(&self) {
        let target = self.last_tick + self.tick_duration.saturating_sub(self.accumulator);
        let now = Instant::now();
        if target <= now {
            return;
        }
        let remaining = target - now;
        if remaining > SPIN_THRESHOLD {
            std::thread::sleep(remaining - SPIN_THRESHOLD);
        }
        while Instant::now() < target {
            std::hint::spin_loop();
        }
    }

    /// Ticks executed so far.
    #[inline]
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Timing statistics.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Budget of one tick.
    #[inline]
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Clears the statistics.
    pub fn reset_stats(&mut self) {
        self.stats = TickStats::fresh(self.tick_duration);
    }
}

impl Default for TickLoop {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_RATE)
    }
}
