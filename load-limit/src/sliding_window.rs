use std::num::NonZeroU64;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use quanta::Clock;
use quanta::Instant;

use super::Reason;
use super::Strategy;

/// A Sliding Window Counter implementation.
///
/// It maintains the load charged in the current fixed window and the previous one.
/// The effective load is: (previous_load * %_of_window_left) + current_load.
#[derive(Debug)]
pub struct SlidingWindow {
    capacity: u64,
    period_ns: u64,
    /// Current window's charged load
    current_load: AtomicU64,
    /// Previous window's charged load
    previous_load: AtomicU64,
    /// Timestamp (nanos from anchor) for the start of the current window
    current_window_start: AtomicU64,
    clock: Clock,
    anchor: Instant,
}

impl SlidingWindow {
    pub fn new(capacity: NonZeroU64, period: Duration) -> Self {
        Self::with_clock(capacity, period, Clock::new())
    }

    /// Same as [`SlidingWindow::new`], reading time from `clock`.
    ///
    /// A zero `period` is clamped to one nanosecond.
    pub fn with_clock(capacity: NonZeroU64, period: Duration, clock: Clock) -> Self {
        let anchor = clock.now();
        Self {
            capacity: capacity.get(),
            period_ns: (period.as_nanos() as u64).max(1),
            current_load: AtomicU64::new(0),
            previous_load: AtomicU64::new(0),
            current_window_start: AtomicU64::new(0),
            clock,
            anchor,
        }
    }

    fn elapsed_ns(&self) -> u64 {
        self.clock.now().duration_since(self.anchor).as_nanos() as u64
    }

    /// The share of `previous` still visible `elapsed` nanos into the current window.
    fn weighted(&self, previous: u64, elapsed: u64) -> u64 {
        let left = self.period_ns.saturating_sub(elapsed);
        ((previous as u128 * left as u128) / self.period_ns as u128) as u64
    }

    /// Time until `load` fits, assuming nothing else is charged meanwhile.
    fn retry_after(&self, previous: u64, current: u64, elapsed: u64, load: u64) -> Duration {
        let period = self.period_ns as u128;
        let budget = self.capacity - load;

        let wait_ns = if current <= budget {
            // Fits later in this window, once enough of `previous` has slid out.
            let room = (budget - current) as u128;
            let visible = (room * period) / (previous.max(1) as u128);
            let fits_at = period.saturating_sub(visible) as u64;
            fits_at.saturating_sub(elapsed)
        } else {
            // Only fits once `current` becomes the previous window and decays.
            let visible = (budget as u128 * period) / current as u128;
            let fits_at = period.saturating_sub(visible) as u64;
            self.period_ns.saturating_sub(elapsed) + fits_at
        };

        Duration::from_nanos(wait_ns)
    }
}

impl Strategy for SlidingWindow {
    #[inline]
    fn process(&self, load: u64) -> ControlFlow<Reason> {
        if load > self.capacity {
            return ControlFlow::Break(Reason::Exceeded);
        }

        let now = self.elapsed_ns();
        let mut window_start = self.current_window_start.load(Ordering::Acquire);

        // 1. Check if we need to slide the window
        if now >= window_start + self.period_ns {
            let new_window_start = (now / self.period_ns) * self.period_ns;

            if self
                .current_window_start
                .compare_exchange(
                    window_start,
                    new_window_start,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                // If we moved at least two windows forward, previous_load is 0
                let prev_val = if now >= window_start + (2 * self.period_ns) {
                    0
                } else {
                    self.current_load.load(Ordering::Acquire)
                };

                self.previous_load.store(prev_val, Ordering::Release);
                self.current_load.store(0, Ordering::Release);
                window_start = new_window_start;
            } else {
                // May have been set by a different thread
                window_start = self.current_window_start.load(Ordering::Acquire);
            }
        }

        // 2. Charge the current window only if the weighted load leaves room
        let prev_load = self.previous_load.load(Ordering::Acquire);
        let elapsed_in_window = now.saturating_sub(window_start);
        let weighted_prev = self.weighted(prev_load, elapsed_in_window);

        let charged = self
            .current_load
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |curr| {
                (weighted_prev + curr + load <= self.capacity).then_some(curr + load)
            });

        match charged {
            Ok(_) => ControlFlow::Continue(()),
            Err(curr) => ControlFlow::Break(Reason::Overloaded {
                retry_after: self.retry_after(prev_load, curr, elapsed_in_window, load),
            }),
        }
    }

    fn is_idle(&self) -> bool {
        let window_start = self.current_window_start.load(Ordering::Acquire);
        self.elapsed_ns() >= window_start + 2 * self.period_ns
            || (self.current_load.load(Ordering::Acquire) == 0
                && self.previous_load.load(Ordering::Acquire) == 0)
    }
}
