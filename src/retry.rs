//! Bounded fixed-interval polling
//!
//! Both engines poll the page on a fixed period until they succeed or run
//! out of attempts. The schedule lives in [`Poller`] and the waiting in a
//! [`Clock`], so tests can drive the loops without real timers.

use std::future::Future;
use std::time::Duration;

/// One tick of a [`Poller`], numbered from 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub index: u32,
    pub max: u32,
}

impl Attempt {
    pub fn is_last(&self) -> bool {
        self.index >= self.max
    }
}

/// Fixed-interval attempt schedule with a hard upper bound
#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
    max_attempts: u32,
    issued: u32,
}

impl Poller {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            issued: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn attempts_made(&self) -> u32 {
        self.issued
    }

    pub fn is_exhausted(&self) -> bool {
        self.issued >= self.max_attempts
    }
}

impl Iterator for Poller {
    type Item = Attempt;

    fn next(&mut self) -> Option<Attempt> {
        if self.is_exhausted() {
            return None;
        }
        self.issued += 1;
        Some(Attempt {
            index: self.issued,
            max: self.max_attempts,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.max_attempts.saturating_sub(self.issued) as usize;
        (left, Some(left))
    }
}

/// Source of delays for the polling loops
pub trait Clock {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()>;
}

/// Real timers from the tokio runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> {
        tokio::time::sleep(duration)
    }
}

impl<C: Clock> Clock for &C {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> {
        (**self).sleep(duration)
    }
}
