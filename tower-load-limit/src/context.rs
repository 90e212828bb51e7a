use std::net::IpAddr;
use std::ops::ControlFlow;

use http::Extensions;
use http::HeaderMap;
use http::HeaderValue;
use http::Method;
use http::Response;
use http::StatusCode;
use http::Uri;
use http::header::IntoHeaderName;
use http::request::Parts;

/// What a handler decided to do with a request.
///
/// `Continue(())` passes the request on to the inner service. `Break(response)`
/// answers the request with `response` and the inner service never runs.
pub type Flow = ControlFlow<Response<String>>;

/// The view of a request handed to tenant key functions and admission handlers.
///
/// Headers staged with [`RequestContext::set_header`] are added to whatever
/// response the request ends up with: the inner service's, or the one a handler
/// breaks with.
#[derive(Debug)]
pub struct RequestContext {
    parts: Parts,
    response_headers: HeaderMap,
}

impl RequestContext {
    pub fn new(parts: Parts) -> Self {
        Self {
            parts,
            response_headers: HeaderMap::new(),
        }
    }

    pub(crate) fn into_parts(self) -> (Parts, HeaderMap) {
        (self.parts, self.response_headers)
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.parts.headers
    }

    pub fn extensions(&self) -> &Extensions {
        &self.parts.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.parts.extensions
    }

    /// The client address, from proxy headers or the connection.
    ///
    /// See [`crate::tenant::client_ip`] for the lookup order.
    pub fn client_ip(&self) -> Option<IpAddr> {
        crate::tenant::extract_client_ip(&self.parts)
    }

    /// Stage a header for the response, replacing any value staged before.
    pub fn set_header<K: IntoHeaderName>(&mut self, name: K, value: HeaderValue) {
        self.response_headers.insert(name, value);
    }

    /// Headers staged for the response so far.
    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Continue the chain.
    pub fn next(&self) -> Flow {
        ControlFlow::Continue(())
    }

    /// Stop the chain and answer with an empty body and `status`.
    pub fn abort_with_status(&self, status: StatusCode) -> Flow {
        let mut response = Response::new(String::new());
        *response.status_mut() = status;
        ControlFlow::Break(response)
    }

    /// Stop the chain and answer with `response`.
    pub fn abort_with_response(&self, response: Response<String>) -> Flow {
        ControlFlow::Break(response)
    }
}
