use std::fmt;
use std::num::NonZeroU64;
use std::ops::ControlFlow;
use std::time::Duration;

use dashmap::DashMap;
use quanta::Clock;

use crate::FixedWindow;
use crate::Gcra;
use crate::LimitError;
use crate::LoadLimiter;
use crate::Reason;
use crate::SlidingWindow;
use crate::Strategy;
use crate::SubmitResult;

type Factory<S> = Box<dyn Fn() -> S + Send + Sync>;

/// A [`LoadLimiter`] that keeps one [`Strategy`] per tenant.
///
/// Strategies are created lazily the first time a tenant submits load, so every
/// tenant gets the full capacity of its own window.
pub struct TenantLimiter<S> {
    tenants: DashMap<String, S>,
    factory: Factory<S>,
    max_tenants: Option<usize>,
}

impl<S> fmt::Debug for TenantLimiter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantLimiter")
            .field("tenants", &self.tenants.len())
            .field("max_tenants", &self.max_tenants)
            .finish()
    }
}

impl<S: Strategy> TenantLimiter<S> {
    /// Create a limiter which builds a fresh strategy for each new tenant.
    pub fn new(factory: impl Fn() -> S + Send + Sync + 'static) -> Self {
        Self {
            tenants: DashMap::new(),
            factory: Box::new(factory),
            max_tenants: None,
        }
    }

    /// Bound the number of tracked tenants.
    ///
    /// Once full, submissions from unknown tenants fail with
    /// [`LimitError::TenantCapacity`]. Concurrent first submissions may
    /// overshoot the bound by the number of racing callers.
    pub fn with_max_tenants(mut self, max_tenants: usize) -> Self {
        self.max_tenants = Some(max_tenants);
        self
    }

    /// Drop every tenant whose strategy holds no charged load.
    ///
    /// Returns the number of tenants removed.
    pub fn purge_idle(&self) -> usize {
        let mut purged = 0;
        self.tenants.retain(|_, strategy| {
            let idle = strategy.is_idle();
            if idle {
                purged += 1;
            }
            !idle
        });
        purged
    }

    /// Forget a tenant. Its next submission starts from a fresh strategy.
    pub fn remove(&self, tenant_key: &str) -> bool {
        self.tenants.remove(tenant_key).is_some()
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    // The map guard is held across `process`, so `purge_idle` cannot evict a
    // strategy while it is being charged.
    fn charge(&self, tenant_key: &str, load: u64) -> Result<ControlFlow<Reason>, LimitError> {
        if let Some(strategy) = self.tenants.get(tenant_key) {
            return Ok(strategy.process(load));
        }

        if let Some(max_tenants) = self.max_tenants
            && self.tenants.len() >= max_tenants
        {
            return Err(LimitError::TenantCapacity { max_tenants });
        }

        let strategy = self
            .tenants
            .entry(tenant_key.to_owned())
            .or_insert_with(|| (self.factory)());
        Ok(strategy.process(load))
    }
}

impl TenantLimiter<FixedWindow> {
    /// Each tenant may charge `capacity` load per fixed `window`.
    pub fn fixed_window(capacity: NonZeroU64, window: Duration) -> Self {
        Self::fixed_window_with_clock(capacity, window, Clock::new())
    }

    pub fn fixed_window_with_clock(capacity: NonZeroU64, window: Duration, clock: Clock) -> Self {
        Self::new(move || FixedWindow::with_clock(capacity, window, clock.clone()))
    }
}

impl TenantLimiter<SlidingWindow> {
    /// Each tenant may charge `capacity` load per sliding `window`.
    pub fn sliding_window(capacity: NonZeroU64, window: Duration) -> Self {
        Self::sliding_window_with_clock(capacity, window, Clock::new())
    }

    pub fn sliding_window_with_clock(
        capacity: NonZeroU64,
        window: Duration,
        clock: Clock,
    ) -> Self {
        Self::new(move || SlidingWindow::with_clock(capacity, window, clock.clone()))
    }
}

impl TenantLimiter<Gcra> {
    /// Each tenant drains at `capacity` load per `window`, bursting up to `capacity`.
    pub fn gcra(capacity: NonZeroU64, window: Duration) -> Self {
        Self::gcra_with_clock(capacity, window, Clock::new())
    }

    pub fn gcra_with_clock(capacity: NonZeroU64, window: Duration, clock: Clock) -> Self {
        Self::new(move || Gcra::with_clock(capacity, window, clock.clone()))
    }
}

impl<S: Strategy> LoadLimiter for TenantLimiter<S> {
    fn submit(&self, tenant_key: &str, load: u64) -> Result<SubmitResult, LimitError> {
        Ok(self.charge(tenant_key, load)?.into())
    }
}
