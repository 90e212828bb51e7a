use std::future::Future;
use std::future::Ready;
use std::future::ready;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use http::HeaderMap;
use http::Request;
use http::Response;
use pin_project_lite::pin_project;
use tower::BoxError;
use tower::Service;

use crate::admission::Admission;
use crate::context::RequestContext;

/// Decides each request before it reaches the inner service.
///
/// Admission runs synchronously inside [`Service::call`]: by the time the
/// returned future is first polled the request has either been handed to the
/// inner service, answered, or failed.
///
/// Readiness is delegated to the inner service. When a request is rejected or
/// fails, the inner service is not called and the readiness it granted stays
/// with this clone until its next call or until it is dropped. With an inner
/// `ConcurrencyLimit`, an idle clone holding a rejected request's slot keeps
/// that slot, so drop clones you no longer use.
#[derive(Debug)]
pub struct LoadLimitService<S> {
    inner: S,
    admission: Arc<Admission>,
}

impl<S: Clone> Clone for LoadLimitService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            admission: Arc::clone(&self.admission),
        }
    }
}

impl<S> LoadLimitService<S> {
    pub(crate) fn new(inner: S, admission: Arc<Admission>) -> Self {
        Self { inner, admission }
    }
}

pin_project! {
    #[project = ResponseFutureProj]
    /// Response future of [`LoadLimitService`].
    pub enum ResponseFuture<F, B> {
        Admitted {
            #[pin]
            inner: F,
            headers: Option<HeaderMap>,
        },
        Decided {
            #[pin]
            outcome: Ready<Result<Response<B>, BoxError>>,
        },
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
    E: Into<BoxError>,
{
    type Output = Result<Response<B>, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            ResponseFutureProj::Admitted { inner, headers } => match inner.poll(cx) {
                Poll::Ready(Ok(mut response)) => {
                    if let Some(headers) = headers.take() {
                        response.headers_mut().extend(headers);
                    }
                    Poll::Ready(Ok(response))
                }
                Poll::Ready(Err(err)) => Poll::Ready(Err(err.into())),
                Poll::Pending => Poll::Pending,
            },
            ResponseFutureProj::Decided { outcome } => outcome.poll(cx),
        }
    }
}

impl<S, B, ResBody> Service<Request<B>> for LoadLimitService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
    ResBody: From<String>,
{
    type Response = Response<ResBody>;
    type Error = BoxError;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Admission is only known in `call`, so readiness is always reserved on
        // the inner service. A rejected or failed request leaves it reserved for
        // this clone's next call.
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let (parts, body) = req.into_parts();
        let mut ctx = RequestContext::new(parts);
        let decision = self.admission.admit(&mut ctx);
        let (parts, headers) = ctx.into_parts();

        match decision {
            Ok(ControlFlow::Continue(())) => ResponseFuture::Admitted {
                inner: self.inner.call(Request::from_parts(parts, body)),
                headers: Some(headers),
            },
            Ok(ControlFlow::Break(response)) => {
                let mut response = response.map(ResBody::from);
                response.headers_mut().extend(headers);
                ResponseFuture::Decided {
                    outcome: ready(Ok(response)),
                }
            }
            Err(err) => ResponseFuture::Decided {
                outcome: ready(Err(err.into())),
            },
        }
    }
}
