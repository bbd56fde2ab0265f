//! Liveness tracking for the live channel.
//!
//! A TCP connection can die without either side noticing. While the channel is
//! open the connection manager checks the monitor every `interval`; if nothing
//! has arrived for longer than `timeout` the channel is treated as dead.
//! Any inbound frame counts as proof of life, not only `pong`.

use std::time::Duration;

use tokio::time::Instant;

/// Result of a liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Traffic seen recently; a ping should be sent
    Alive,
    /// Silent for longer than the timeout
    Dead { silent_for: Duration },
}

#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
    last_pong_at: Instant,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            last_pong_at: Instant::now(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn last_pong_at(&self) -> Instant {
        self.last_pong_at
    }

    /// Start a fresh liveness window (called when the channel opens).
    pub fn reset(&mut self, now: Instant) {
        self.last_pong_at = now;
    }

    /// Record inbound traffic of any kind.
    pub fn record_traffic(&mut self, now: Instant) {
        if now > self.last_pong_at {
            self.last_pong_at = now;
        }
    }

    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_pong_at)
    }

    pub fn check(&self, now: Instant) -> Liveness {
        let silent_for = self.silence(now);
        if silent_for > self.timeout {
            Liveness::Dead { silent_for }
        } else {
            Liveness::Alive
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HeartbeatMonitor {
        HeartbeatMonitor::new(Duration::from_secs(20), Duration::from_secs(45))
    }

    #[test]
    fn test_alive_within_timeout() {
        let start = Instant::now();
        let mut monitor = monitor();
        monitor.reset(start);

        assert_eq!(monitor.check(start + Duration::from_secs(20)), Liveness::Alive);
        assert_eq!(monitor.check(start + Duration::from_secs(45)), Liveness::Alive);
    }

    #[test]
    fn test_dead_after_timeout() {
        let start = Instant::now();
        let mut monitor = monitor();
        monitor.reset(start);

        assert_eq!(
            monitor.check(start + Duration::from_secs(60)),
            Liveness::Dead {
                silent_for: Duration::from_secs(60)
            }
        );
    }

    #[test]
    fn test_any_traffic_refreshes() {
        let start = Instant::now();
        let mut monitor = monitor();
        monitor.reset(start);

        monitor.record_traffic(start + Duration::from_secs(40));
        assert_eq!(monitor.check(start + Duration::from_secs(80)), Liveness::Alive);
        assert_eq!(monitor.silence(start + Duration::from_secs(80)), Duration::from_secs(40));
    }

    #[test]
    fn test_stale_timestamps_do_not_move_backwards() {
        let start = Instant::now();
        let mut monitor = monitor();
        monitor.reset(start + Duration::from_secs(10));
        monitor.record_traffic(start);

        assert_eq!(monitor.last_pong_at(), start + Duration::from_secs(10));
    }
}
