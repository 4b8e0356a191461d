//! Per-scope rate limiting for outbound timer events.
//!
//! Chat platforms throttle edits per conversation, so every scope gets its
//! own sliding window.

use crate::timer::ScopeId;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

const MINUTE: Duration = Duration::from_secs(60);

/// Rate limiting error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// Window is full; must wait before sending.
    #[error("rate limit exceeded; retry after {retry_after:?}")]
    Exceeded {
        /// Time until the oldest send leaves the window.
        retry_after: Duration,
    },
}

/// Sliding-window limiter for a single scope.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Maximum sends per window. Zero disables the limit.
    max_per_window: u32,
    period: Duration,
    window: VecDeque<Instant>,
}

impl RateLimiter {
    /// Limiter allowing `max_messages_per_minute` sends per minute.
    #[must_use]
    pub fn new(max_messages_per_minute: u32) -> Self {
        Self::with_window(max_messages_per_minute, MINUTE)
    }

    #[must_use]
    pub fn with_window(max_per_window: u32, period: Duration) -> Self {
        Self {
            max_per_window,
            period,
            window: VecDeque::new(),
        }
    }

    /// Record a send, or report how long to wait if the window is full.
    ///
    /// # Errors
    ///
    /// [`RateLimitError::Exceeded`] when the window is at capacity.
    pub fn try_send(&mut self) -> Result<(), RateLimitError> {
        if self.max_per_window == 0 {
            return Ok(());
        }
        let now = Instant::now();
        self.expire(now);

        if self.window.len() >= self.max_per_window as usize
            && let Some(&oldest) = self.window.front()
        {
            let retry_after = self.period.saturating_sub(now.duration_since(oldest));
            return Err(RateLimitError::Exceeded {
                retry_after: retry_after.max(Duration::from_millis(1)),
            });
        }

        self.window.push_back(now);
        Ok(())
    }

    /// Sends left in the current window.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        let used = u32::try_from(self.window.len()).unwrap_or(u32::MAX);
        self.max_per_window.saturating_sub(used)
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&first) = self.window.front() {
            if now.duration_since(first) >= self.period {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}

/// One [`RateLimiter`] per scope, created on first use.
#[derive(Debug)]
pub struct ScopedRateLimiter {
    max_per_window: u32,
    period: Duration,
    limiters: Mutex<HashMap<ScopeId, RateLimiter>>,
}

impl ScopedRateLimiter {
    #[must_use]
    pub fn new(max_messages_per_minute: u32) -> Self {
        Self::with_window(max_messages_per_minute, MINUTE)
    }

    #[must_use]
    pub fn with_window(max_per_window: u32, period: Duration) -> Self {
        Self {
            max_per_window,
            period,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Record a send in `scope`.
    ///
    /// # Errors
    ///
    /// [`RateLimitError::Exceeded`] when that scope's window is full.
    pub fn try_send(&self, scope: ScopeId) -> Result<(), RateLimitError> {
        let mut limiters = self.limiters.lock().unwrap_or_else(|e| e.into_inner());
        limiters
            .entry(scope)
            .or_insert_with(|| RateLimiter::with_window(self.max_per_window, self.period))
            .try_send()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn allows_up_to_limit_then_reports_delay() {
        let mut limiter = RateLimiter::new(3);
        for _ in 0..3 {
            assert!(limiter.try_send().is_ok());
        }
        assert_eq!(limiter.remaining(), 0);

        let Err(RateLimitError::Exceeded { retry_after }) = limiter.try_send() else {
            panic!("fourth send should be limited");
        };
        assert!(retry_after <= MINUTE);
        assert!(retry_after > Duration::from_secs(50));
    }

    #[test]
    fn window_slides() {
        let mut limiter = RateLimiter::with_window(1, Duration::from_millis(20));
        assert!(limiter.try_send().is_ok());
        assert!(limiter.try_send().is_err());
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.try_send().is_ok());
    }

    #[test]
    fn zero_means_unlimited() {
        let mut limiter = RateLimiter::new(0);
        for _ in 0..1000 {
            assert!(limiter.try_send().is_ok());
        }
    }

    #[test]
    fn scopes_are_limited_independently() {
        let limiter = ScopedRateLimiter::new(1);
        assert!(limiter.try_send(1).is_ok());
        assert!(limiter.try_send(1).is_err());
        assert!(limiter.try_send(2).is_ok());
    }
}
