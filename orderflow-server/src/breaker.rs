//! Three-state circuit breaker gating calls to the storage layer
//!
//! Closed passes everything through and counts consecutive failures. After
//! `threshold` failures the breaker opens and rejects until `open_timeout`
//! elapses, then admits up to `max_half_open` concurrent probes. A probe
//! success closes the breaker; a probe failure reopens it.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("circuit breaker is open")]
pub struct BreakerOpen;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    fail_count: u32,
    opened_at: Option<Instant>,
    half_open_probes: u32,
}

pub struct CircuitBreaker {
    threshold: u32,
    open_timeout: Duration,
    max_half_open: u32,
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, open_timeout: Duration, max_half_open: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            open_timeout,
            max_half_open,
            inner: RwLock::new(Inner {
                state: BreakerState::Closed,
                fail_count: 0,
                opened_at: None,
                half_open_probes: 0,
            }),
        }
    }

    /// Gate a call. `Err(BreakerOpen)` means skip the call entirely.
    pub fn allow(&self) -> Result<(), BreakerOpen> {
        {
            let inner = self.inner.read();
            match inner.state {
                BreakerState::Closed => return Ok(()),
                BreakerState::Open => {
                    if !self.open_elapsed(&inner) {
                        return Err(BreakerOpen);
                    }
                }
                BreakerState::HalfOpen => {
                    if inner.half_open_probes >= self.max_half_open {
                        return Err(BreakerOpen);
                    }
                }
            }
        }

        // Possible transition; re-check under the write lock.
        let mut inner = self.inner.write();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                if self.open_elapsed(&inner) {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_probes = 0;
                    Ok(())
                } else {
                    Err(BreakerOpen)
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_probes < self.max_half_open {
                    inner.half_open_probes += 1;
                    Ok(())
                } else {
                    Err(BreakerOpen)
                }
            }
        }
    }

    /// Record a positive outcome
    pub fn success(&self) {
        let mut inner = self.inner.write();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.fail_count = 0;
                inner.opened_at = None;
            }
            BreakerState::Closed => inner.fail_count = 0,
            BreakerState::Open => {}
        }
    }

    /// Record a negative outcome
    pub fn failure(&self) {
        let mut inner = self.inner.write();
        match inner.state {
            BreakerState::Closed => {
                inner.fail_count += 1;
                if inner.fail_count >= self.threshold {
                    tracing::warn!(
                        failures = inner.fail_count,
                        threshold = self.threshold,
                        "circuit breaker opening"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                tracing::warn!("circuit breaker reopening after probe failure");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.read().state
    }

    fn open_elapsed(&self, inner: &Inner) -> bool {
        inner
            .opened_at
            .is_some_and(|at| at.elapsed() >= self.open_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tripped(breaker: &CircuitBreaker, failures: u32) {
        for _ in 0..failures {
            assert!(breaker.allow().is_ok());
            breaker.failure();
        }
    }

    #[test]
    fn starts_closed_and_allows() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(10), 1);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow().is_ok());
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(10), 1);
        breaker.failure();
        breaker.failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.allow().is_err());
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(10), 1);
        breaker.failure();
        breaker.failure();
        breaker.success();
        breaker.failure();
        breaker.failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_after_timeout_then_closes_on_success() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20), 2);
        tripped(&breaker, 1);
        assert!(breaker.allow().is_err());

        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.allow().is_ok());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn probe_failure_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20), 2);
        tripped(&breaker, 1);
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.allow().is_ok());

        breaker.failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.allow().is_err());
    }

    #[test]
    fn half_open_bounds_concurrent_probes() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10), 2);
        tripped(&breaker, 1);
        std::thread::sleep(Duration::from_millis(20));

        // The transitioning call plus max_half_open counted probes.
        assert!(breaker.allow().is_ok());
        assert!(breaker.allow().is_ok());
        assert!(breaker.allow().is_ok());
        assert!(breaker.allow().is_err());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn rejection_before_timeout_keeps_open() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60), 1);
        tripped(&breaker, 1);
        assert!(breaker.allow().is_err());
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn serializable_under_contention() {
        use std::sync::Arc;

        let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_millis(1), 3));
        tripped(&breaker, 1);
        std::thread::sleep(Duration::from_millis(5));

        let admitted = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let breaker = Arc::clone(&breaker);
                let admitted = Arc::clone(&admitted);
                std::thread::spawn(move || {
                    if breaker.allow().is_ok() {
                        admitted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        // One transition admit plus at most max_half_open probes.
        let admitted = admitted.load(std::sync::atomic::Ordering::SeqCst);
        assert!(admitted >= 1 && admitted <= 4, "admitted {admitted}");
    }
}
