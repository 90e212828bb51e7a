use std::num::NonZeroU64;
use std::ops::ControlFlow;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use quanta::Clock;
use quanta::Instant;

use super::Reason;
use super::Strategy;

/// A simple window-based limiter.
///
/// Divides time into fixed intervals, each allowing `capacity` units of load.
/// It is the most performant strategy but can be susceptible to "boundary bursts"
/// where double the capacity is charged in a short period spanning two windows.
#[derive(Debug)]
pub struct FixedWindow {
    capacity: u64,
    remaining: AtomicU64,
    expires: AtomicU64,
    interval: u64,
    clock: Clock,
    anchor: Instant,
}

impl Strategy for FixedWindow {
    fn process(&self, load: u64) -> ControlFlow<Reason> {
        if load > self.capacity {
            return ControlFlow::Break(Reason::Exceeded);
        }

        let now = self.elapsed_ns();
        let mut expires = self.expires.load(Ordering::Acquire);

        if now >= expires {
            let next_expires = now + self.interval;
            if self
                .expires
                .compare_exchange(expires, next_expires, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                self.remaining.store(self.capacity, Ordering::Release);
                expires = next_expires;
            } else {
                // Rotated by a different thread
                expires = self.expires.load(Ordering::Acquire);
            }
        }

        let old_remaining = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |val| {
                val.checked_sub(load)
            });

        match old_remaining {
            Ok(_) => ControlFlow::Continue(()),
            Err(_) => ControlFlow::Break(Reason::Overloaded {
                retry_after: Duration::from_nanos(expires.saturating_sub(now)),
            }),
        }
    }

    fn is_idle(&self) -> bool {
        self.elapsed_ns() >= self.expires.load(Ordering::Acquire)
            || self.remaining.load(Ordering::Acquire) == self.capacity
    }
}

impl FixedWindow {
    /// Creates a new `FixedWindow` strategy.
    ///
    /// # Arguments
    ///
    /// * `capacity` - The maximum load allowed within a single window.
    /// * `interval` - The duration of the fixed time window.
    pub fn new(capacity: NonZeroU64, interval: Duration) -> Self {
        Self::with_clock(capacity, interval, Clock::new())
    }

    pub fn with_clock(capacity: NonZeroU64, interval: Duration, clock: Clock) -> Self {
        let anchor = clock.now();
        Self {
            capacity: capacity.get(),
            remaining: AtomicU64::new(capacity.get()),
            interval: interval.as_nanos() as u64,
            expires: AtomicU64::new(interval.as_nanos() as u64),
            clock,
            anchor,
        }
    }

    fn elapsed_ns(&self) -> u64 {
        self.clock.now().duration_since(self.anchor).as_nanos() as u64
    }
}
