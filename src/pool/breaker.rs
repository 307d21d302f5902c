// Circuit breaker over recent connection errors, plus retry backoff delays.

use std::collections::VecDeque;
use tokio::time::{Duration, Instant};

use crate::error::UnraidError;

#[derive(Debug, Clone)]
pub struct BackoffSettings {
    pub initial: Duration,
    pub factor: f64,
    pub max: Duration,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            factor: 2.0,
            max: Duration::from_secs(300),
        }
    }
}

/// `initial * factor^attempt`, capped at `max`.
pub fn delay_for_attempt(settings: &BackoffSettings, attempt: u32) -> Duration {
    let secs = settings.initial.as_secs_f64() * settings.factor.powi(attempt as i32);
    if !secs.is_finite() || secs >= settings.max.as_secs_f64() {
        settings.max
    } else {
        Duration::from_secs_f64(secs)
    }
}

#[derive(Debug)]
pub(crate) struct CircuitBreaker {
    threshold: usize,
    window: Duration,
    open_for: Duration,
    recent_errors: VecDeque<Instant>,
    open_until: Option<Instant>,
}

impl CircuitBreaker {
    pub(crate) fn new(threshold: usize, window: Duration, open_for: Duration) -> Self {
        Self {
            threshold,
            window,
            open_for,
            recent_errors: VecDeque::new(),
            open_until: None,
        }
    }

    pub(crate) fn record_error(&mut self, now: Instant) {
        self.recent_errors.push_back(now);
        self.prune(now);
    }

    /// Fails while open. Closes (and forgets errors) once the open period has passed,
    /// and opens when the window holds `threshold` errors.
    pub(crate) fn check(&mut self, now: Instant) -> Result<(), UnraidError> {
        if let Some(until) = self.open_until {
            if now < until {
                return Err(UnraidError::CircuitOpen {
                    retry_in_secs: until.duration_since(now).as_secs(),
                });
            }
            self.open_until = None;
            self.recent_errors.clear();
            tracing::info!(operation = "circuit_breaker", "Circuit breaker reset");
        }

        self.prune(now);
        if self.recent_errors.len() >= self.threshold {
            let until = now + self.open_for;
            self.open_until = Some(until);
            tracing::warn!(
                operation = "circuit_breaker",
                recent_errors = self.recent_errors.len(),
                open_secs = self.open_for.as_secs(),
                "Circuit breaker opened"
            );
            return Err(UnraidError::CircuitOpen {
                retry_in_secs: self.open_for.as_secs(),
            });
        }
        Ok(())
    }

    pub(crate) fn is_open(&self, now: Instant) -> bool {
        self.open_until.is_some_and(|until| now < until)
    }

    pub(crate) fn recent_error_count(&self) -> usize {
        self.recent_errors.len()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&t) = self.recent_errors.front() {
            if now.duration_since(t) > self.window {
                self.recent_errors.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let s = BackoffSettings::default();
        assert_eq!(delay_for_attempt(&s, 0), Duration::from_secs(1));
        assert_eq!(delay_for_attempt(&s, 1), Duration::from_secs(2));
        assert_eq!(delay_for_attempt(&s, 3), Duration::from_secs(8));
        assert_eq!(delay_for_attempt(&s, 20), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_at_threshold_and_resets_after_open_period() {
        let mut b = CircuitBreaker::new(3, Duration::from_secs(60), Duration::from_secs(300));
        let now = Instant::now();
        for _ in 0..2 {
            b.record_error(now);
        }
        assert!(b.check(now).is_ok());
        b.record_error(now);
        assert!(matches!(b.check(now), Err(UnraidError::CircuitOpen { .. })));
        assert!(b.is_open(now));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(b.check(Instant::now()).is_err());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(b.check(Instant::now()).is_ok());
        assert_eq!(b.recent_error_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_outside_window_are_forgotten() {
        let mut b = CircuitBreaker::new(2, Duration::from_secs(60), Duration::from_secs(300));
        b.record_error(Instant::now());
        tokio::time::advance(Duration::from_secs(61)).await;
        b.record_error(Instant::now());
        assert!(b.check(Instant::now()).is_ok());
        assert_eq!(b.recent_error_count(), 1);
    }
}
