//! Per-host rate limiter and circuit breaker
//!
//! Every outbound request passes through [`RateLimiter::acquire`]. Each host
//! owns its own [`HostState`] behind its own mutex, so one host's outage never
//! slows down another and concurrent workers hitting the same host are
//! serialized by that host's spacing.

use crate::config::RateLimitConfig;
use crate::state::{BreakerCheck, HostState};
use crate::throttle::backoff::ExponentialBackoff;
use crate::HarvestError;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Base of the cooldown applied after HTTP 403 (doubles per consecutive failure)
const HOSTILE_BASE_MS: u64 = 30_000;

/// Cap on the HTTP 403 cooldown
const HOSTILE_MAX_MS: u64 = 15 * 60 * 1000;

/// Resolved limiter tuning
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub max_backoff: Duration,
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub max_retry_after: Duration,
}

impl From<&RateLimitConfig> for RateLimitSettings {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            min_delay: Duration::from_millis(config.min_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            failure_threshold: config.failure_threshold,
            cooldown: Duration::from_secs(config.cooldown_secs),
            max_retry_after: Duration::from_secs(config.max_retry_after_secs),
        }
    }
}

/// Result of asking for permission to send one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Send now
    Granted,
    /// Ask again after this long
    Wait(Duration),
}

/// How a finished request went, from the host's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    Failure {
        status: Option<u16>,
        retry_after: Option<Duration>,
    },
}

/// What the limiter decided after recording an outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeAction {
    /// Penalty window applied to the host
    pub cooldown: Option<Duration>,
    /// The caller should switch to a different client identity
    pub rotate_identity: bool,
    /// This outcome tripped the breaker
    pub breaker_opened: bool,
}

/// Per-host pacing with adaptive backoff and circuit breaking
pub struct RateLimiter {
    settings: RateLimitSettings,
    hosts: Mutex<HashMap<String, Arc<Mutex<HostState>>>>,
    throttle_backoff: ExponentialBackoff,
    hostile_backoff: ExponentialBackoff,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        let throttle_backoff = ExponentialBackoff::new(
            settings.max_delay.as_millis() as u64,
            settings.max_backoff.as_millis() as u64,
        );

        Self {
            settings,
            hosts: Mutex::new(HashMap::new()),
            throttle_backoff,
            hostile_backoff: ExponentialBackoff::new(HOSTILE_BASE_MS, HOSTILE_MAX_MS),
        }
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// Waits until `host` may receive one more request
    ///
    /// Fails fast with [`HarvestError::BreakerOpen`] while the host's breaker
    /// is open. The only suspension point is the pacing sleep.
    pub async fn acquire(&self, host: &str) -> Result<(), HarvestError> {
        loop {
            match self.poll(host, Instant::now())? {
                Admission::Granted => return Ok(()),
                Admission::Wait(wait) => {
                    tracing::trace!("Waiting {:?} before next request to {}", wait, host);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Decides whether a request to `host` may be sent at `now`
    ///
    /// A `Granted` answer is a reservation: the grant is recorded and the
    /// spacing for the following request is sampled immediately.
    pub fn poll(&self, host: &str, now: Instant) -> Result<Admission, HarvestError> {
        let entry = self.host_entry(host);
        let mut state = lock(&entry);

        let check = state.breaker.check(now, self.settings.cooldown);
        if let BreakerCheck::Reject { retry_in } = check {
            return Err(HarvestError::BreakerOpen {
                host: host.to_string(),
                retry_in,
            });
        }

        if let Some(wait) = state.time_until_next_request(now) {
            return Ok(Admission::Wait(wait));
        }

        if check == BreakerCheck::Trial {
            tracing::info!("Circuit breaker half-open for {}, allowing one trial", host);
            state.breaker.begin_trial(now);
        }

        let delay = self.sample_delay(state.breaker.failure_count);
        state.record_request(now, delay);
        Ok(Admission::Granted)
    }

    /// Records how a request to `host` went
    pub fn record_outcome(
        &self,
        host: &str,
        outcome: &RequestOutcome,
        now: Instant,
    ) -> OutcomeAction {
        let entry = self.host_entry(host);
        let mut state = lock(&entry);

        let (status, retry_after) = match *outcome {
            RequestOutcome::Success => {
                if state.breaker.is_open() {
                    tracing::info!("Circuit breaker closed for {}", host);
                }
                state.breaker.record_success();
                state.blocked_until = None;
                return OutcomeAction::default();
            }
            RequestOutcome::Failure {
                status,
                retry_after,
            } => (status, retry_after),
        };

        let opened = state
            .breaker
            .record_failure(now, self.settings.failure_threshold);
        let failures = state.breaker.failure_count;
        let mut action = OutcomeAction {
            breaker_opened: opened,
            ..OutcomeAction::default()
        };

        match status {
            Some(429) | Some(503) => {
                let cooldown = match retry_after {
                    Some(requested) => requested.min(self.settings.max_retry_after),
                    None => self.throttle_backoff.delay(failures.saturating_sub(1)),
                };
                tracing::debug!("{} throttled us (HTTP {:?}), cooling down {:?}", host, status, cooldown);
                state.block_for(now, cooldown);
                action.cooldown = Some(cooldown);
            }
            Some(403) => {
                let cooldown = self.hostile_backoff.delay(failures.saturating_sub(1));
                tracing::warn!(
                    "{} refused us (HTTP 403, {} in a row), cooling down {:?}",
                    host,
                    failures,
                    cooldown
                );
                state.block_for(now, cooldown);
                action.cooldown = Some(cooldown);
                action.rotate_identity = true;
            }
            _ => {}
        }

        if opened {
            tracing::warn!(
                "Circuit breaker opened for {} after {} consecutive failures",
                host,
                failures
            );
        }

        action
    }

    /// Raises the minimum spacing for `host` (from robots.txt Crawl-delay)
    pub fn set_crawl_delay(&self, host: &str, delay: Duration) {
        let entry = self.host_entry(host);
        lock(&entry).crawl_delay = Some(delay);
    }

    /// Copy of the current state of `host`, if it has been seen
    pub fn snapshot(&self, host: &str) -> Option<HostState> {
        let hosts = lock(&self.hosts);
        hosts.get(host).map(|entry| lock(entry).clone())
    }

    /// Current consecutive-failure count for `host`
    pub fn failure_count(&self, host: &str) -> u32 {
        self.snapshot(host)
            .map(|state| state.breaker.failure_count)
            .unwrap_or(0)
    }

    /// Samples the spacing enforced after a grant
    ///
    /// Uniform in `[min_delay, max_delay]`, widened by `1 + 0.5 * failures`
    /// and capped at `max_backoff`.
    fn sample_delay(&self, failures: u32) -> Duration {
        let min = self.settings.min_delay.as_millis() as u64;
        let max = self.settings.max_delay.as_millis() as u64;
        let base = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };

        let widened = (base as f64 * (1.0 + 0.5 * failures as f64)) as u64;
        let capped = widened.min(self.settings.max_backoff.as_millis() as u64);
        Duration::from_millis(capped.max(min))
    }

    fn host_entry(&self, host: &str) -> Arc<Mutex<HostState>> {
        let mut hosts = lock(&self.hosts);
        hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(HostState::new(host))))
            .clone()
    }
}

// Pacing state stays usable after a panicking holder.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_settings() -> RateLimitSettings {
        RateLimitSettings {
            min_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(2000),
            max_backoff: Duration::from_millis(10_000),
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
            max_retry_after: Duration::from_secs(300),
        }
    }

    fn failure(status: Option<u16>) -> RequestOutcome {
        RequestOutcome::Failure {
            status,
            retry_after: None,
        }
    }

    #[test]
    fn test_first_request_granted_immediately() {
        let limiter = RateLimiter::new(create_test_settings());
        let now = Instant::now();
        assert_eq!(limiter.poll("a.com", now).unwrap(), Admission::Granted);
    }

    #[test]
    fn test_second_request_waits_at_least_min_delay() {
        let limiter = RateLimiter::new(create_test_settings());
        let now = Instant::now();
        limiter.poll("a.com", now).unwrap();

        match limiter.poll("a.com", now).unwrap() {
            Admission::Wait(wait) => {
                assert!(wait >= Duration::from_millis(1000));
                assert!(wait <= Duration::from_millis(2000));
            }
            Admission::Granted => panic!("second request should wait"),
        }
    }

    #[test]
    fn test_hosts_are_independent() {
        let limiter = RateLimiter::new(create_test_settings());
        let now = Instant::now();
        limiter.poll("a.com", now).unwrap();

        for _ in 0..3 {
            limiter.record_outcome("a.com", &failure(None), now);
        }
        assert!(limiter.poll("a.com", now).is_err());
        assert_eq!(limiter.poll("b.com", now).unwrap(), Admission::Granted);
    }

    #[test]
    fn test_delay_widens_with_failures() {
        let mut settings = create_test_settings();
        settings.max_delay = settings.min_delay;
        settings.failure_threshold = 10;
        let limiter = RateLimiter::new(settings);

        assert_eq!(limiter.sample_delay(0), Duration::from_millis(1000));
        assert_eq!(limiter.sample_delay(2), Duration::from_millis(2000));
        assert_eq!(limiter.sample_delay(100), Duration::from_millis(10_000));
    }

    #[test]
    fn test_retry_after_honored_and_capped() {
        let limiter = RateLimiter::new(create_test_settings());
        let now = Instant::now();

        let action = limiter.record_outcome(
            "a.com",
            &RequestOutcome::Failure {
                status: Some(429),
                retry_after: Some(Duration::from_secs(42)),
            },
            now,
        );
        assert_eq!(action.cooldown, Some(Duration::from_secs(42)));
        assert_eq!(
            limiter.poll("a.com", now).unwrap(),
            Admission::Wait(Duration::from_secs(42))
        );

        let action = limiter.record_outcome(
            "b.com",
            &RequestOutcome::Failure {
                status: Some(503),
                retry_after: Some(Duration::from_secs(3600)),
            },
            now,
        );
        assert_eq!(action.cooldown, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_throttle_without_retry_after_backs_off() {
        let limiter = RateLimiter::new(create_test_settings());
        let now = Instant::now();

        let action = limiter.record_outcome("a.com", &failure(Some(429)), now);
        let cooldown = action.cooldown.unwrap();
        assert!(cooldown >= Duration::from_millis(2000));
        assert!(!action.rotate_identity);
    }

    #[test]
    fn test_forbidden_rotates_identity() {
        let limiter = RateLimiter::new(create_test_settings());
        let now = Instant::now();

        let first = limiter.record_outcome("a.com", &failure(Some(403)), now);
        assert!(first.rotate_identity);
        let first_cooldown = first.cooldown.unwrap();
        assert!(first_cooldown >= Duration::from_millis(HOSTILE_BASE_MS));

        let second = limiter.record_outcome("a.com", &failure(Some(403)), now);
        assert!(second.cooldown.unwrap() >= Duration::from_millis(HOSTILE_BASE_MS * 2));
    }

    #[test]
    fn test_breaker_transition() {
        let limiter = RateLimiter::new(create_test_settings());
        let start = Instant::now();
        limiter.poll("a.com", start).unwrap();

        assert!(!limiter.record_outcome("a.com", &failure(None), start).breaker_opened);
        assert!(!limiter.record_outcome("a.com", &failure(None), start).breaker_opened);
        assert!(limiter.record_outcome("a.com", &failure(None), start).breaker_opened);

        assert!(matches!(
            limiter.poll("a.com", start),
            Err(HarvestError::BreakerOpen { .. })
        ));

        // Cooldown elapsed: exactly one trial goes through
        let later = start + Duration::from_secs(60);
        assert_eq!(limiter.poll("a.com", later).unwrap(), Admission::Granted);
        assert!(matches!(
            limiter.poll("a.com", later),
            Err(HarvestError::BreakerOpen { .. })
        ));

        limiter.record_outcome("a.com", &RequestOutcome::Success, later);
        assert_eq!(limiter.failure_count("a.com"), 0);
        assert!(!limiter.snapshot("a.com").unwrap().breaker.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_spacing() {
        let limiter = RateLimiter::new(create_test_settings());

        limiter.acquire("a.com").await.unwrap();
        let first = Instant::now();
        limiter.acquire("a.com").await.unwrap();
        let second = Instant::now();
        limiter.acquire("a.com").await.unwrap();
        let third = Instant::now();

        assert!(second - first >= Duration::from_millis(1000));
        assert!(third - second >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquires_on_one_host_stay_spaced() {
        let limiter = RateLimiter::new(create_test_settings());
        let grants = Mutex::new(Vec::new());

        futures::future::join_all((0..4).map(|_| async {
            limiter.acquire("a.com").await.unwrap();
            grants.lock().unwrap().push(Instant::now());
        }))
        .await;

        let mut grants = grants.into_inner().unwrap();
        assert_eq!(grants.len(), 4);
        grants.sort();
        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_fails_fast_when_open_then_recovers() {
        let limiter = RateLimiter::new(create_test_settings());
        limiter.acquire("a.com").await.unwrap();

        for _ in 0..3 {
            limiter.record_outcome("a.com", &failure(Some(500)), Instant::now());
        }

        let before = Instant::now();
        assert!(limiter.acquire("a.com").await.is_err());
        assert_eq!(Instant::now(), before);

        tokio::time::advance(Duration::from_secs(61)).await;
        limiter.acquire("a.com").await.unwrap();
        limiter.record_outcome("a.com", &RequestOutcome::Success, Instant::now());
        assert_eq!(limiter.failure_count("a.com"), 0);
    }
}
