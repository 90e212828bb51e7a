use std::fmt;
use std::sync::Arc;

use load_limit::LoadLimiter;

use crate::admission::Admission;
use crate::admission::TenantSource;
use crate::config::ErrorHandler;
use crate::config::LoadLimitConfig;
use crate::config::SubmitHandler;
use crate::config::TenantKeyFn;
use crate::error::ConfigError;
use crate::layer::LoadLimitLayer;

/// A load limiting middleware bound to one limiter and one route load.
///
/// Instances are never modified. A route that needs a different load gets its
/// own instance through [`LoadLimitMiddleware::specialize`] (or directly a layer
/// through [`LoadLimitMiddleware::with_load`]), so routes sharing a limiter never
/// observe each other's settings.
///
/// ```rust
/// use std::num::NonZeroU64;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use load_limit::TenantLimiter;
/// use tower_load_limit::LoadLimitConfig;
/// use tower_load_limit::LoadLimitMiddleware;
/// use tower_load_limit::tenant;
///
/// let limiter = TenantLimiter::fixed_window(NonZeroU64::new(100).unwrap(), Duration::from_secs(3));
/// let middleware = LoadLimitMiddleware::new(
///     LoadLimitConfig::new()
///         .with_limiter(Arc::new(limiter))
///         .with_default_route_load(1)
///         .with_tenant_key_fn(tenant::client_ip()),
/// );
///
/// // For every route
/// let _default = middleware.default_layer();
/// // For an expensive route
/// let _search = middleware.with_load(10);
/// ```
#[derive(Clone)]
pub struct LoadLimitMiddleware {
    limiter: Option<Arc<dyn LoadLimiter>>,
    load: u64,
    tenant_key: Option<String>,
    tenant_key_fn: Option<TenantKeyFn>,
    accept_handler: Option<SubmitHandler>,
    abort_handler: Option<SubmitHandler>,
    error_handler: Option<ErrorHandler>,
}

impl fmt::Debug for LoadLimitMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadLimitMiddleware")
            .field("limiter", &self.limiter)
            .field("load", &self.load)
            .field("tenant_key", &self.tenant_key)
            .field("tenant_key_fn", &self.tenant_key_fn.is_some())
            .field("accept_handler", &self.accept_handler.is_some())
            .field("abort_handler", &self.abort_handler.is_some())
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

impl LoadLimitMiddleware {
    /// Create a middleware from `config`.
    ///
    /// Nothing is checked here; see [`LoadLimitMiddleware::try_default_layer`].
    pub fn new(config: LoadLimitConfig) -> Self {
        Self {
            limiter: config.limiter,
            load: config.default_route_load,
            tenant_key: config.tenant_key,
            tenant_key_fn: config.tenant_key_fn,
            accept_handler: config.accept_handler,
            abort_handler: config.abort_handler,
            error_handler: config.error_handler,
        }
    }

    /// The load charged per request.
    pub fn load(&self) -> u64 {
        self.load
    }

    /// A copy of this middleware charging `load` per request instead.
    ///
    /// `self` is left untouched.
    pub fn specialize(&self, load: u64) -> Self {
        Self {
            load,
            ..self.clone()
        }
    }

    /// Build the layer for this middleware's load.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the limiter is missing, or if not exactly one
    /// of tenant key and tenant key function is set. An empty tenant key counts
    /// as not set.
    pub fn try_default_layer(&self) -> Result<LoadLimitLayer, ConfigError> {
        let admission = self.activate()?;
        Ok(LoadLimitLayer::new(Arc::new(admission)))
    }

    /// Build the layer for a route charging `load` per request.
    ///
    /// # Errors
    ///
    /// See [`LoadLimitMiddleware::try_default_layer`].
    pub fn try_with_load(&self, load: u64) -> Result<LoadLimitLayer, ConfigError> {
        self.specialize(load).try_default_layer()
    }

    /// Build the layer for this middleware's load.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid. A route must not be installed
    /// with a broken limiter configuration.
    pub fn default_layer(&self) -> LoadLimitLayer {
        match self.try_default_layer() {
            Ok(layer) => layer,
            Err(err) => panic!("invalid load limit configuration: {err}"),
        }
    }

    /// Build the layer for a route charging `load` per request.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid, as [`LoadLimitMiddleware::default_layer`].
    pub fn with_load(&self, load: u64) -> LoadLimitLayer {
        self.specialize(load).default_layer()
    }

    fn activate(&self) -> Result<Admission, ConfigError> {
        let limiter = self.limiter.clone().ok_or(ConfigError::MissingLimiter)?;

        // An empty fixed key is the same as no fixed key
        let tenant_key = self.tenant_key.as_ref().filter(|key| !key.is_empty());
        let tenant = match (tenant_key, &self.tenant_key_fn) {
            (Some(key), None) => TenantSource::Fixed(key.clone()),
            (None, Some(key_fn)) => TenantSource::Resolved(Arc::clone(key_fn)),
            (None, None) => return Err(ConfigError::MissingTenantKey),
            (Some(_), Some(_)) => return Err(ConfigError::AmbiguousTenantKey),
        };

        Ok(Admission::new(
            limiter,
            self.load,
            tenant,
            self.accept_handler.clone(),
            self.abort_handler.clone(),
            self.error_handler.clone(),
        ))
    }
}
