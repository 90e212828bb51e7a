use std::fmt;
use std::sync::Arc;

use http::HeaderName;
use http::HeaderValue;
use http::StatusCode;
use load_limit::LoadLimiter;
use load_limit::SubmitResult;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;

use crate::config::ErrorHandler;
use crate::config::SubmitHandler;
use crate::config::TenantKeyFn;
use crate::context::Flow;
use crate::context::RequestContext;
use crate::error::GateError;

/// Header carrying the retry delay, in milliseconds, on a default rejection.
pub const X_RETRY_IN: HeaderName = HeaderName::from_static("x-retry-in");

/// Where the tenant key of a request comes from. Exactly one source by construction.
#[derive(Clone)]
pub(crate) enum TenantSource {
    Fixed(String),
    Resolved(TenantKeyFn),
}

#[derive(Clone, Debug)]
struct AdmissionMetrics {
    accepted: Counter<u64>,
    rejected: Counter<u64>,
    errors: Counter<u64>,
}

/// A validated middleware, ready to decide requests.
///
/// Shared read-only by every service built from the same layer.
pub(crate) struct Admission {
    limiter: Arc<dyn LoadLimiter>,
    load: u64,
    tenant: TenantSource,
    accept_handler: Option<SubmitHandler>,
    abort_handler: Option<SubmitHandler>,
    error_handler: Option<ErrorHandler>,
    instruments: AdmissionMetrics,
}

impl fmt::Debug for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tenant = match &self.tenant {
            TenantSource::Fixed(key) => key.as_str(),
            TenantSource::Resolved(_) => "<resolved per request>",
        };
        f.debug_struct("Admission")
            .field("limiter", &self.limiter)
            .field("load", &self.load)
            .field("tenant", &tenant)
            .finish_non_exhaustive()
    }
}

impl Admission {
    pub(crate) fn new(
        limiter: Arc<dyn LoadLimiter>,
        load: u64,
        tenant: TenantSource,
        accept_handler: Option<SubmitHandler>,
        abort_handler: Option<SubmitHandler>,
        error_handler: Option<ErrorHandler>,
    ) -> Self {
        let meter = global::meter("load_limit");
        let instruments = AdmissionMetrics {
            accepted: meter.u64_counter("load_limit.accepted").build(),
            rejected: meter.u64_counter("load_limit.rejected").build(),
            errors: meter.u64_counter("load_limit.errors").build(),
        };

        Self {
            limiter,
            load,
            tenant,
            accept_handler,
            abort_handler,
            error_handler,
            instruments,
        }
    }

    /// Decide one request.
    ///
    /// Exactly one of the accept, reject or error paths runs, unless the load is
    /// zero and the limiter is skipped. `Err` is only returned by the default
    /// error path, i.e. when no error handler is configured.
    pub(crate) fn admit(&self, ctx: &mut RequestContext) -> Result<Flow, GateError> {
        if self.load == 0 {
            tracing::trace!("zero load route, skipping admission");
            return Ok(ctx.next());
        }

        // A failure here is not a rejection: there is nobody to charge.
        let tenant_key = match self.tenant_key(ctx) {
            Ok(tenant_key) => tenant_key,
            Err(err) => return self.handle_error(ctx, GateError::TenantKey(err)),
        };

        let result = match self.limiter.submit(&tenant_key, self.load) {
            Ok(result) => result,
            Err(err) => return self.handle_error(ctx, GateError::Submit(err)),
        };

        if !result.accepted {
            tracing::debug!(
                tenant = %tenant_key,
                load = self.load,
                retry_in = ?result.retry_in_available.then_some(result.retry_in),
                "load rejected"
            );
            return Ok(self.handle_rejection(ctx, &result));
        }

        tracing::trace!(tenant = %tenant_key, load = self.load, "load accepted");
        Ok(self.handle_accept(ctx, &result))
    }

    fn tenant_key(&self, ctx: &RequestContext) -> Result<String, tower::BoxError> {
        match &self.tenant {
            TenantSource::Fixed(key) => Ok(key.clone()),
            TenantSource::Resolved(key_fn) => key_fn(ctx),
        }
    }

    fn attributes(&self) -> [KeyValue; 1] {
        [KeyValue::new("load", i64::try_from(self.load).unwrap_or(i64::MAX))]
    }

    fn handle_accept(&self, ctx: &mut RequestContext, result: &SubmitResult) -> Flow {
        self.instruments.accepted.add(1, &self.attributes());
        match &self.accept_handler {
            Some(handler) => handler(ctx, result),
            None => ctx.next(),
        }
    }

    fn handle_rejection(&self, ctx: &mut RequestContext, result: &SubmitResult) -> Flow {
        self.instruments.rejected.add(1, &self.attributes());
        if let Some(handler) = &self.abort_handler {
            return handler(ctx, result);
        }

        if result.retry_in_available {
            let millis = result.retry_in.as_millis() as u64;
            ctx.set_header(X_RETRY_IN, HeaderValue::from(millis));
        }
        ctx.abort_with_status(StatusCode::TOO_MANY_REQUESTS)
    }

    fn handle_error(&self, ctx: &mut RequestContext, err: GateError) -> Result<Flow, GateError> {
        self.instruments.errors.add(1, &self.attributes());
        tracing::warn!(error = %err, load = self.load, "load admission failed");
        match &self.error_handler {
            Some(handler) => Ok(handler(ctx, &err)),
            None => Err(err),
        }
    }
}
