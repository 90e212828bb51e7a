use tower::ServiceBuilder;
use tower::layer::util::Stack;

use crate::LoadLimitLayer;
use crate::LoadLimitMiddleware;

/// Service Builder Extension with load limiting functions for tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Add a load limit layer charging the middleware's own load
    ///
    /// # Panics
    ///
    /// Panics if the middleware configuration is invalid.
    fn load_limit(self, middleware: &LoadLimitMiddleware)
    -> ServiceBuilder<Stack<LoadLimitLayer, L>>;

    /// Add a load limit layer charging `load` per request
    ///
    /// # Panics
    ///
    /// Panics if the middleware configuration is invalid.
    fn load_limit_with(
        self,
        middleware: &LoadLimitMiddleware,
        load: u64,
    ) -> ServiceBuilder<Stack<LoadLimitLayer, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn load_limit(
        self,
        middleware: &LoadLimitMiddleware,
    ) -> ServiceBuilder<Stack<LoadLimitLayer, L>> {
        self.layer(middleware.default_layer())
    }

    fn load_limit_with(
        self,
        middleware: &LoadLimitMiddleware,
        load: u64,
    ) -> ServiceBuilder<Stack<LoadLimitLayer, L>> {
        self.layer(middleware.with_load(load))
    }
}
