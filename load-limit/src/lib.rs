//! # load-limit
//!
//! `load-limit` provides lock-free, load weighted rate limiting strategies and a
//! per-tenant limiter built on top of them.
//!
//! ## Core Philosophy
//!
//! A request is not always worth "one". A search endpoint may cost ten units, a
//! health check nothing at all. Every strategy in this crate charges an arbitrary
//! `load` against a capacity, and [`TenantLimiter`] keeps one strategy per tenant
//! so that one noisy client cannot starve the others.
//!
//! ## Key Concepts
//!
//! * **Lock-Free**: Strategies use atomic primitives and Compare-And-Swap (CAS)
//!   loops. The tenant table is a sharded `DashMap`.
//! * **Lazy Evaluation**: Windows are recalculated at the moment of the request,
//!   eliminating the need for background worker threads or timers.
//! * **Retry Hints**: A rejection carries the time after which the same load
//!   would fit, when such a time exists.
//!
//! ## Example
//!
//! ```rust
//! use load_limit::LoadLimiter;
//! use load_limit::TenantLimiter;
//! use std::num::NonZeroU64;
//! use std::time::Duration;
//!
//! let capacity = NonZeroU64::new(100).unwrap();
//! let limiter = TenantLimiter::fixed_window(capacity, Duration::from_secs(3));
//!
//! let result = limiter.submit("10.0.0.1", 10).unwrap();
//! assert!(result.accepted);
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;
use std::time::Duration;

mod error;
mod fixed_window;
mod gcra;
mod sliding_window;
mod tenant;

pub use error::LimitError;
pub use fixed_window::FixedWindow;
pub use gcra::Gcra;
pub use sliding_window::SlidingWindow;
pub use tenant::TenantLimiter;

/// Reasons why a load might be rejected by a strategy.
#[derive(Debug, PartialEq)]
pub enum Reason {
    /// The load does not fit right now, but will after `retry_after`.
    Overloaded { retry_after: Duration },
    /// The load is larger than the capacity and can never fit.
    Exceeded,
}

/// The core trait for all load limiting algorithms.
///
/// Strategies must be `Send` and `Sync` so a [`TenantLimiter`] can share them
/// across threads via `Arc`.
pub trait Strategy: Debug + Send + Sync {
    /// Attempts to charge `load` units.
    ///
    /// This method is non-blocking and uses atomic operations to update
    /// internal state.
    ///
    /// # Errors
    ///
    /// Returns `Reason` if charging `load` would exceed the capacity.
    fn process(&self, load: u64) -> ControlFlow<Reason>;

    /// True when the strategy holds no charged load, i.e. dropping it and
    /// starting fresh would change nothing.
    fn is_idle(&self) -> bool;
}

/// Outcome of a [`LoadLimiter::submit`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubmitResult {
    /// Whether the load was charged.
    pub accepted: bool,
    /// Whether `retry_in` carries a meaningful value.
    pub retry_in_available: bool,
    /// How long to wait before the same load would be accepted.
    pub retry_in: Duration,
}

impl SubmitResult {
    /// An accepted submission.
    pub fn accept() -> Self {
        Self {
            accepted: true,
            ..Default::default()
        }
    }

    /// A rejected submission, with a retry hint when one is known.
    pub fn reject(retry_in: Option<Duration>) -> Self {
        Self {
            accepted: false,
            retry_in_available: retry_in.is_some(),
            retry_in: retry_in.unwrap_or_default(),
        }
    }
}

impl From<ControlFlow<Reason>> for SubmitResult {
    fn from(flow: ControlFlow<Reason>) -> Self {
        match flow {
            ControlFlow::Continue(()) => Self::accept(),
            ControlFlow::Break(Reason::Overloaded { retry_after }) => {
                Self::reject(Some(retry_after))
            }
            ControlFlow::Break(Reason::Exceeded) => Self::reject(None),
        }
    }
}

/// A limiter that charges load against a tenant.
///
/// Implementations must be safe for concurrent callers.
pub trait LoadLimiter: Debug + Send + Sync {
    /// Charge `load` units to `tenant_key`.
    ///
    /// A rejection is not an error: it is reported through
    /// [`SubmitResult::accepted`].
    ///
    /// # Errors
    ///
    /// Returns [`LimitError`] if the limiter could not take a decision at all.
    fn submit(&self, tenant_key: &str, load: u64) -> Result<SubmitResult, LimitError>;
}
