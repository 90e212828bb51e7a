use std::fmt;
use std::sync::Arc;

use load_limit::LoadLimiter;
use load_limit::SubmitResult;
use tower::BoxError;

use crate::context::Flow;
use crate::context::RequestContext;
use crate::error::GateError;

/// Resolves the tenant a request is charged to.
pub type TenantKeyFn = Arc<dyn Fn(&RequestContext) -> Result<String, BoxError> + Send + Sync>;

/// Decides what happens to an accepted, or rejected, request.
pub type SubmitHandler = Arc<dyn Fn(&mut RequestContext, &SubmitResult) -> Flow + Send + Sync>;

/// Decides what happens to a request whose admission could not be decided.
pub type ErrorHandler = Arc<dyn Fn(&mut RequestContext, &GateError) -> Flow + Send + Sync>;

/// Configuration for a [`LoadLimitMiddleware`](crate::LoadLimitMiddleware).
///
/// Assembled incrementally and checked only when a layer is built, so a
/// partially built config is never an error by itself.
#[derive(Clone, Default)]
pub struct LoadLimitConfig {
    pub(crate) limiter: Option<Arc<dyn LoadLimiter>>,
    pub(crate) default_route_load: u64,
    pub(crate) tenant_key: Option<String>,
    pub(crate) tenant_key_fn: Option<TenantKeyFn>,
    pub(crate) accept_handler: Option<SubmitHandler>,
    pub(crate) abort_handler: Option<SubmitHandler>,
    pub(crate) error_handler: Option<ErrorHandler>,
}

impl fmt::Debug for LoadLimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadLimitConfig")
            .field("limiter", &self.limiter)
            .field("default_route_load", &self.default_route_load)
            .field("tenant_key", &self.tenant_key)
            .field("tenant_key_fn", &self.tenant_key_fn.is_some())
            .field("accept_handler", &self.accept_handler.is_some())
            .field("abort_handler", &self.abort_handler.is_some())
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

impl LoadLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// The limiter load is submitted to. Required.
    pub fn with_limiter(mut self, limiter: Arc<dyn LoadLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// The load charged per request when a route declares no load of its own.
    ///
    /// A load of `0` lets requests through without asking the limiter.
    pub fn with_default_route_load(mut self, load: u64) -> Self {
        self.default_route_load = load;
        self
    }

    /// Charge every request to one fixed tenant, limiting globally.
    ///
    /// An empty key is treated as no key at all.
    pub fn with_tenant_key(mut self, tenant_key: impl Into<String>) -> Self {
        self.tenant_key = Some(tenant_key.into());
        self
    }

    /// Resolve the tenant from each request, e.g. with [`crate::tenant::client_ip`].
    pub fn with_tenant_key_fn<F>(mut self, tenant_key_fn: F) -> Self
    where
        F: Fn(&RequestContext) -> Result<String, BoxError> + Send + Sync + 'static,
    {
        self.tenant_key_fn = Some(Arc::new(tenant_key_fn));
        self
    }

    /// Replace the default accept behaviour (continue the chain).
    ///
    /// The handler owns the outcome: nothing continues the chain unless it
    /// returns `Flow::Continue`.
    pub fn with_accept_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut RequestContext, &SubmitResult) -> Flow + Send + Sync + 'static,
    {
        self.accept_handler = Some(Arc::new(handler));
        self
    }

    /// Replace the default rejection behaviour (`429` with `X-Retry-In`).
    pub fn with_abort_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut RequestContext, &SubmitResult) -> Flow + Send + Sync + 'static,
    {
        self.abort_handler = Some(Arc::new(handler));
        self
    }

    /// Replace the default error behaviour (propagate the [`GateError`]).
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut RequestContext, &GateError) -> Flow + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }
}
