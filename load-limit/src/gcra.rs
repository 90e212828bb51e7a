use std::num::NonZeroU64;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use quanta::Clock;
use quanta::Instant;

use crate::Reason;
use crate::Strategy;

/// Generic Cell Rate Algorithm
///
/// Each unit of load pushes the theoretical arrival time forward by one
/// emission interval, so a load of `n` costs `n` intervals.
#[derive(Debug)]
pub struct Gcra {
    /// Theoretical Arrival Time (TAT) in nanoseconds.
    tat: AtomicU64,
    capacity: u64,
    emission_interval_ns: u64,
    delay_tolerance_ns: u64,
    clock: Clock,
    /// A fixed point in time (TSC tick) to calculate deltas from.
    anchor: Instant,
}

impl Gcra {
    pub fn new(capacity: NonZeroU64, period: Duration) -> Self {
        Self::with_clock(capacity, period, Clock::new())
    }

    pub fn with_clock(capacity: NonZeroU64, period: Duration, clock: Clock) -> Self {
        let anchor = clock.now();
        let period_ns = period.as_nanos() as u64;

        Self {
            tat: AtomicU64::new(0),
            capacity: capacity.get(),
            emission_interval_ns: period_ns / capacity.get(),
            delay_tolerance_ns: period_ns,
            clock,
            anchor,
        }
    }

    fn elapsed_ns(&self) -> u64 {
        self.clock.now().duration_since(self.anchor).as_nanos() as u64
    }
}

impl Strategy for Gcra {
    #[inline]
    fn process(&self, load: u64) -> ControlFlow<Reason> {
        if load > self.capacity {
            return ControlFlow::Break(Reason::Exceeded);
        }

        let now = self.elapsed_ns();
        let cost = load * self.emission_interval_ns;

        loop {
            let tat = self.tat.load(Ordering::Acquire);

            let arrival = if now > tat { now } else { tat };
            let next_tat = arrival + cost;

            if next_tat > now + self.delay_tolerance_ns {
                let wait_ns = next_tat - (now + self.delay_tolerance_ns);
                return ControlFlow::Break(Reason::Overloaded {
                    retry_after: Duration::from_nanos(wait_ns),
                });
            }

            if self
                .tat
                .compare_exchange_weak(tat, next_tat, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return ControlFlow::Continue(());
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.tat.load(Ordering::Acquire) <= self.elapsed_ns()
    }
}
