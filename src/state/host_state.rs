use std::time::Duration;
use tokio::time::Instant;

/// Circuit-breaker phase for one host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerPhase {
    /// Requests flow normally
    Closed,
    /// Requests fail fast until the cooldown window elapses
    Open { opened_at: Instant },
    /// One trial request is in flight; everyone else still fails fast
    HalfOpen { trial_started_at: Instant },
}

/// What the breaker says about issuing a request right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerCheck {
    /// Breaker closed
    Allow,
    /// Cooldown elapsed; the next request becomes the half-open trial
    Trial,
    /// Fail fast
    Reject { retry_in: Duration },
}

/// Per-host circuit-breaker state
///
/// Rebuilt per process; never persisted.
#[derive(Debug, Clone)]
pub struct CircuitBreakerState {
    pub host: String,
    /// Consecutive failures; a single success resets this to zero
    pub failure_count: u32,
    pub last_failure_at: Option<Instant>,
    pub phase: BreakerPhase,
}

impl CircuitBreakerState {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            failure_count: 0,
            last_failure_at: None,
            phase: BreakerPhase::Closed,
        }
    }

    /// Returns true while requests are being rejected or a trial is pending
    pub fn is_open(&self) -> bool {
        !matches!(self.phase, BreakerPhase::Closed)
    }

    /// Inspects the breaker without changing it
    pub fn check(&self, now: Instant, cooldown: Duration) -> BreakerCheck {
        match self.phase {
            BreakerPhase::Closed => BreakerCheck::Allow,
            BreakerPhase::Open { opened_at } => {
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= cooldown {
                    BreakerCheck::Trial
                } else {
                    BreakerCheck::Reject {
                        retry_in: cooldown - elapsed,
                    }
                }
            }
            // A trial that never reported back must not wedge the host forever
            BreakerPhase::HalfOpen { trial_started_at } => {
                let elapsed = now.saturating_duration_since(trial_started_at);
                if elapsed >= cooldown {
                    BreakerCheck::Trial
                } else {
                    BreakerCheck::Reject {
                        retry_in: cooldown - elapsed,
                    }
                }
            }
        }
    }

    /// Marks the half-open trial as issued
    pub fn begin_trial(&mut self, now: Instant) {
        self.phase = BreakerPhase::HalfOpen {
            trial_started_at: now,
        };
    }

    /// Closes the breaker and clears the failure streak
    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.phase = BreakerPhase::Closed;
    }

    /// Counts a failure; returns true if this failure opened the breaker
    ///
    /// A failed half-open trial reopens the breaker and restarts the cooldown.
    pub fn record_failure(&mut self, now: Instant, threshold: u32) -> bool {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_at = Some(now);

        match self.phase {
            BreakerPhase::HalfOpen { .. } => {
                self.phase = BreakerPhase::Open { opened_at: now };
                true
            }
            BreakerPhase::Open { .. } => false,
            BreakerPhase::Closed if self.failure_count >= threshold => {
                self.phase = BreakerPhase::Open { opened_at: now };
                true
            }
            BreakerPhase::Closed => false,
        }
    }
}

/// Tracks the pacing and breaker state of one remote host
#[derive(Debug, Clone)]
pub struct HostState {
    pub breaker: CircuitBreakerState,

    /// When the last request to this host was granted
    pub last_request_time: Option<Instant>,

    /// Spacing sampled at the last grant; the next grant waits this long
    pub next_delay: Duration,

    /// Penalty window set by 429/503/403 responses
    pub blocked_until: Option<Instant>,

    /// Minimum spacing announced by robots.txt
    pub crawl_delay: Option<Duration>,

    /// Number of requests granted in this process
    pub request_count: u32,
}

impl HostState {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            breaker: CircuitBreakerState::new(host),
            last_request_time: None,
            next_delay: Duration::ZERO,
            blocked_until: None,
            crawl_delay: None,
            request_count: 0,
        }
    }

    /// Calculates the time until the next request can be made
    ///
    /// Returns None if a request can be made now.
    pub fn time_until_next_request(&self, now: Instant) -> Option<Duration> {
        let mut ready_at = now;

        if let Some(last) = self.last_request_time {
            let spacing = self.next_delay.max(self.crawl_delay.unwrap_or(Duration::ZERO));
            ready_at = ready_at.max(last + spacing);
        }

        if let Some(blocked_until) = self.blocked_until {
            ready_at = ready_at.max(blocked_until);
        }

        if ready_at > now {
            Some(ready_at - now)
        } else {
            None
        }
    }

    /// Records that a request was granted and the spacing to enforce after it
    pub fn record_request(&mut self, now: Instant, next_delay: Duration) {
        self.request_count += 1;
        self.last_request_time = Some(now);
        self.next_delay = next_delay;
    }

    /// Extends the penalty window; never shortens an existing one
    pub fn block_for(&mut self, now: Instant, cooldown: Duration) {
        let until = now + cooldown;
        self.blocked_until = Some(match self.blocked_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(60);

    #[test]
    fn test_new_host_state() {
        let state = HostState::new("example.com");
        assert_eq!(state.request_count, 0);
        assert!(state.last_request_time.is_none());
        assert!(!state.breaker.is_open());
        assert_eq!(state.breaker.failure_count, 0);
    }

    #[test]
    fn test_time_until_next_request() {
        let mut state = HostState::new("example.com");
        let now = Instant::now();

        assert!(state.time_until_next_request(now).is_none());

        state.record_request(now, Duration::from_millis(1000));
        assert_eq!(
            state.time_until_next_request(now),
            Some(Duration::from_millis(1000))
        );

        let soon = now + Duration::from_millis(400);
        assert_eq!(
            state.time_until_next_request(soon),
            Some(Duration::from_millis(600))
        );

        let later = now + Duration::from_millis(1100);
        assert!(state.time_until_next_request(later).is_none());
    }

    #[test]
    fn test_crawl_delay_widens_spacing() {
        let mut state = HostState::new("example.com");
        let now = Instant::now();
        state.crawl_delay = Some(Duration::from_secs(5));
        state.record_request(now, Duration::from_millis(1000));

        assert_eq!(
            state.time_until_next_request(now + Duration::from_secs(2)),
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_block_for_keeps_longest_window() {
        let mut state = HostState::new("example.com");
        let now = Instant::now();

        state.block_for(now, Duration::from_secs(30));
        state.block_for(now, Duration::from_secs(10));

        assert_eq!(
            state.time_until_next_request(now),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_breaker_opens_at_threshold() {
        let mut breaker = CircuitBreakerState::new("example.com");
        let now = Instant::now();

        assert!(!breaker.record_failure(now, 3));
        assert!(!breaker.record_failure(now, 3));
        assert_eq!(breaker.check(now, COOLDOWN), BreakerCheck::Allow);

        assert!(breaker.record_failure(now, 3));
        assert!(breaker.is_open());
        assert!(matches!(
            breaker.check(now, COOLDOWN),
            BreakerCheck::Reject { .. }
        ));
    }

    #[test]
    fn test_breaker_half_open_after_cooldown() {
        let mut breaker = CircuitBreakerState::new("example.com");
        let now = Instant::now();
        breaker.record_failure(now, 1);

        let after = now + COOLDOWN;
        assert_eq!(breaker.check(after, COOLDOWN), BreakerCheck::Trial);

        breaker.begin_trial(after);
        assert!(matches!(
            breaker.check(after, COOLDOWN),
            BreakerCheck::Reject { .. }
        ));

        breaker.record_success();
        assert_eq!(breaker.failure_count, 0);
        assert_eq!(breaker.check(after, COOLDOWN), BreakerCheck::Allow);
    }

    #[test]
    fn test_failed_trial_restarts_cooldown() {
        let mut breaker = CircuitBreakerState::new("example.com");
        let now = Instant::now();
        breaker.record_failure(now, 1);

        let trial_at = now + COOLDOWN;
        breaker.begin_trial(trial_at);
        assert!(breaker.record_failure(trial_at, 1));

        match breaker.check(trial_at + Duration::from_secs(1), COOLDOWN) {
            BreakerCheck::Reject { retry_in } => {
                assert_eq!(retry_in, COOLDOWN - Duration::from_secs(1))
            }
            other => panic!("expected reject, got {:?}", other),
        }
    }

    #[test]
    fn test_success_resets_streak() {
        let mut breaker = CircuitBreakerState::new("example.com");
        let now = Instant::now();

        breaker.record_failure(now, 5);
        breaker.record_failure(now, 5);
        breaker.record_success();
        assert_eq!(breaker.failure_count, 0);

        // Streak starts over; two more failures do not reach the threshold
        breaker.record_failure(now, 3);
        assert!(!breaker.record_failure(now, 3));
    }
}
