use http::HeaderName;
use load_limit::LimitError;
use tower::BoxError;

/// A load limit configuration that cannot be installed.
///
/// Produced once, when a layer is built from a [`LoadLimitMiddleware`](crate::LoadLimitMiddleware),
/// never while serving requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No limiter was configured.
    #[error("limiter is required")]
    MissingLimiter,

    /// Neither a fixed tenant key nor a tenant key function was configured.
    #[error("one of tenant key or tenant key function is required")]
    MissingTenantKey,

    /// Both a fixed tenant key and a tenant key function were configured.
    #[error("only one of tenant key or tenant key function may be set")]
    AmbiguousTenantKey,
}

/// Admission could not be decided for a request.
///
/// A rejection is not a `GateError`: it means the limiter answered "no". This
/// error means the limiter could not be asked, or could not answer.
///
/// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// The tenant key function failed, so there is nobody to charge.
    #[error("error resolving tenant key: {0}")]
    TenantKey(#[source] BoxError),

    /// The limiter failed while submitting load.
    #[error("error submitting load request: {0}")]
    Submit(#[from] LimitError),
}

/// Failures of the tenant key functions in [`crate::tenant`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TenantKeyError {
    #[error("client address is not available")]
    NoClientIp,

    #[error("header {0} is missing")]
    MissingHeader(HeaderName),

    #[error("header {0} is not a visible ASCII string")]
    InvalidHeader(HeaderName),
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for GateError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}
