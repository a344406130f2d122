use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;
use crate::errors::LlmError;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut offset) = self.offset.lock() {
            *offset += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().map(|o| *o).unwrap_or_default();
        self.origin + offset
    }
}

/// Sliding-window limiter checked once per request, before any network call.
pub struct RateLimiter {
    window: Duration,
    max_requests: usize,
    clock: Arc<dyn Clock>,
    stamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            window: config.window,
            max_requests: config.max_requests,
            clock,
            stamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a request, or fail without recording it when the window is full.
    pub fn acquire(&self) -> Result<(), LlmError> {
        let now = self.clock.now();
        let mut stamps = self.stamps();
        while let Some(oldest) = stamps.front() {
            if now.duration_since(*oldest) >= self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }
        if stamps.len() >= self.max_requests {
            return Err(LlmError::RateLimitExceeded);
        }
        stamps.push_back(now);
        Ok(())
    }

    pub fn in_window(&self) -> usize {
        self.stamps().len()
    }

    // A panic while holding the lock cannot leave the deque half-updated.
    fn stamps(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.stamps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
