//! # Tower Load Limit
//!
//! `tower-load-limit` is an admission gate for the [Tower](https://github.com/tower-rs/tower)
//! ecosystem. Every request is charged a *load* against a tenant (a client IP, an API
//! key, or a single global key) through a [`load_limit::LoadLimiter`], and is then
//! either passed on, rejected, or failed.
//!
//! ## The Admission Pipeline
//!
//! 1. **Zero Load**: Routes declaring a load of `0` skip the limiter entirely.
//! 2. **Tenant Resolution**: A fixed key or a per-request [`tenant`] function.
//!    A failure here is an error, never a rejection.
//! 3. **Submission**: The load is submitted to the limiter for that tenant.
//! 4. **Dispatch**: Accepted requests continue to the inner service; rejected
//!    requests get `429 Too Many Requests` with an `X-Retry-In` header (in
//!    milliseconds) when the limiter knows when to retry. Each of the accept,
//!    abort and error paths can be replaced by a handler.
//!
//! Configuration is checked once, when a layer is built, never per request.
//!
//! ## Per-Route Load
//!
//! One [`LoadLimitMiddleware`] is usually shared by a whole application.
//! [`LoadLimitMiddleware::with_load`] derives a layer for a route with a different cost
//! by copying the middleware, so routes sharing a limiter keep independent settings.
//!
//! ## Errors
//!
//! Unless an error handler is configured, an admission failure ([`GateError`]) is
//! returned from the service as a [`tower::BoxError`]. Hosts such as axum need an
//! error handling layer to turn it into a response.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`GateError`] and client address lookup through
//!   `ConnectInfo`.

mod admission;
mod config;
mod context;
mod error;
mod layer;
mod middleware;
mod service;
pub mod tenant;
mod utils;

#[cfg(test)]
mod tests;

pub use admission::X_RETRY_IN;
pub use config::ErrorHandler;
pub use config::LoadLimitConfig;
pub use config::SubmitHandler;
pub use config::TenantKeyFn;
pub use context::Flow;
pub use context::RequestContext;
pub use error::ConfigError;
pub use error::GateError;
pub use error::TenantKeyError;
pub use layer::LoadLimitLayer;
pub use middleware::LoadLimitMiddleware;
pub use service::LoadLimitService;
pub use service::ResponseFuture;
pub use utils::ServiceBuilderExt;
