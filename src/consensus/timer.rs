use std::pin::Pin;

use log::debug;
use rand::Rng;
use tokio::time::{Duration, Instant, Sleep};

use crate::config::Config;

/// Events that can be emitted when a timer expires.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum TimerType {
    /// Election timer expired.
    Election,
    /// Heartbeat timer expired.
    Heartbeat,
}

/// Election and heartbeat timer for one node. Only one of the two is armed at
/// a time; expiry is delivered to the node's event loop as a [`TimerType`].
#[derive(Debug)]
pub struct NodeTimer {
    /// Base election timeout of the node.
    election_timeout: Duration,
    /// Upper bound of the random delay added to `election_timeout`.
    election_jitter: Duration,
    heartbeat_interval: Duration,
    /// The currently active timer and its type.
    active_timer: (TimerType, Pin<Box<Sleep>>),
}

impl NodeTimer {
    /// Create a timer with the election timer armed.
    pub fn new(config: &Config, election_timeout: Duration) -> Self {
        let mut timer = Self {
            election_timeout,
            election_jitter: config.election_jitter(),
            heartbeat_interval: config.heartbeat_interval,
            active_timer: (TimerType::Election, Box::pin(tokio::time::sleep(election_timeout))),
        };
        timer.reset_election_timer();
        timer
    }

    /// The type of the timer currently armed.
    pub fn active_timer_type(&self) -> TimerType {
        self.active_timer.0
    }

    /// Election timeout plus a random delay, so that nodes rarely time out
    /// together.
    fn random_election_timeout(&self) -> Duration {
        let jitter = rand::rng().random_range(Duration::ZERO..=self.election_jitter);
        self.election_timeout + jitter
    }

    /// Calculate the deadline for a timer based on its type.
    fn calculate_deadline(&self, timer_type: TimerType) -> Instant {
        let duration = match timer_type {
            TimerType::Election => self.random_election_timeout(),
            TimerType::Heartbeat => self.heartbeat_interval,
        };
        Instant::now() + duration
    }

    /// Set the active timer.
    fn set_timer(&mut self, timer_type: TimerType) {
        let deadline = self.calculate_deadline(timer_type);
        self.active_timer = (timer_type, Box::pin(tokio::time::sleep_until(deadline)));
    }

    /// Reset the election timer, regardless of the current active timer.
    pub fn reset_election_timer(&mut self) {
        self.set_timer(TimerType::Election);
    }

    /// Reset the heartbeat timer, regardless of the current active timer.
    pub fn reset_heartbeat_timer(&mut self) {
        self.set_timer(TimerType::Heartbeat);
    }

    /// Wait for the active timer to expire, re-arm it and return its type.
    pub async fn wait_for_timer_and_emit_event(&mut self) -> TimerType {
        let (timer_type, future) = &mut self.active_timer;

        future.await;
        let expired_timer_type = *timer_type;
        debug!("{:?} timer expired", expired_timer_type);

        self.set_timer(expired_timer_type);

        expired_timer_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_timer() -> NodeTimer {
        NodeTimer::new(&Config::default(), Config::default().election_timeout_min)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_starts_with_election_timer() {
        let mut timer = create_timer();
        let config = Config::default();
        let start = Instant::now();

        assert_eq!(timer.active_timer_type(), TimerType::Election);
        assert_eq!(timer.wait_for_timer_and_emit_event().await, TimerType::Election);

        let elapsed = start.elapsed();
        assert!(elapsed >= config.election_timeout_min);
        assert!(elapsed <= config.election_timeout_max);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_heartbeat_fires_after_interval() {
        let mut timer = create_timer();
        let start = Instant::now();

        timer.reset_heartbeat_timer();

        assert_eq!(timer.wait_for_timer_and_emit_event().await, TimerType::Heartbeat);
        assert!(start.elapsed() >= Config::default().heartbeat_interval);
        // the expired timer is re-armed with the same type
        assert_eq!(timer.active_timer_type(), TimerType::Heartbeat);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_reset_switches_type() {
        let mut timer = create_timer();

        timer.reset_heartbeat_timer();
        timer.reset_election_timer();

        assert_eq!(timer.wait_for_timer_and_emit_event().await, TimerType::Election);
    }
}
