//! Idle blink animation.
//!
//! Runs as its own task on a coarse tick; when the scheduled deadline
//! passes it queues a blink on the sink and redraws the next deadline
//! uniformly inside the configured interval.

use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::sink::AnimationSink;
use crate::config::AnimationSettings;

const TICK: Duration = Duration::from_millis(100);

/// Next-blink deadline with uniform jitter
#[derive(Clone, Copy, Debug)]
pub struct BlinkSchedule {
    next: Instant,
    min_interval: Duration,
    max_interval: Duration,
}

impl BlinkSchedule {
    pub fn new(min_interval: Duration, max_interval: Duration) -> Self {
        let mut schedule = Self {
            next: Instant::now(),
            min_interval,
            max_interval,
        };
        schedule.redraw();
        schedule
    }

    /// Draw the next deadline in `[min_interval, max_interval]` from now
    pub fn redraw(&mut self) {
        let wait = rand::thread_rng()
            .gen_range(self.min_interval.as_secs_f64()..=self.max_interval.as_secs_f64());
        self.next = Instant::now() + Duration::from_secs_f64(wait);
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next
    }

    pub fn next_deadline(&self) -> Instant {
        self.next
    }
}

pub struct IdleAnimator {
    sink: AnimationSink,
    settings: AnimationSettings,
}

impl IdleAnimator {
    pub fn new(sink: AnimationSink, settings: AnimationSettings) -> Self {
        Self { sink, settings }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut schedule = BlinkSchedule::new(
                Duration::from_secs_f64(self.settings.blink_min_interval_secs),
                Duration::from_secs_f64(self.settings.blink_max_interval_secs),
            );
            let mut ticker = tokio::time::interval(TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                if !schedule.is_due(Instant::now()) {
                    continue;
                }

                if self.settings.suppress_blink_while_speaking && self.sink.is_speaking() {
                    // Stay due, blink right after speech ends
                    continue;
                }

                debug!("Idle blink");
                self.sink.blink();
                schedule.redraw();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_schedule_within_bounds() {
        for _ in 0..50 {
            let schedule = BlinkSchedule::new(Duration::from_secs(3), Duration::from_secs(6));
            let wait = schedule.next_deadline() - Instant::now();
            assert!(wait >= Duration::from_secs(3));
            assert!(wait <= Duration::from_secs(6));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_due_before_min_interval() {
        let schedule = BlinkSchedule::new(Duration::from_secs(3), Duration::from_secs(6));
        assert!(!schedule.is_due(Instant::now()));
        assert!(schedule.is_due(Instant::now() + Duration::from_secs(7)));
    }
}
