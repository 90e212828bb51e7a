//! Tenant key functions for [`LoadLimitConfig::with_tenant_key_fn`](crate::LoadLimitConfig::with_tenant_key_fn).

use std::net::IpAddr;
use std::net::SocketAddr;

use http::HeaderName;
use http::request::Parts;
use tower::BoxError;

use crate::context::RequestContext;
use crate::error::TenantKeyError;

/// Header priority for IP extraction (highest to lowest).
const IP_HEADERS: &[&str] = &[
    "cf-connecting-ip", // Cloudflare
    "x-real-ip",        // Nginx
    "x-forwarded-for",  // Standard proxy header (first IP in chain)
];

/// Limit per client IP.
///
/// Proxy headers are tried first (`CF-Connecting-IP`, `X-Real-IP`, then the first
/// address of `X-Forwarded-For`), then the peer address of the connection, taken
/// from a `SocketAddr` request extension (or axum's `ConnectInfo<SocketAddr>` with
/// the `axum` feature). Only trust proxy headers when a proxy you control sets them.
pub fn client_ip() -> impl Fn(&RequestContext) -> Result<String, BoxError> + Send + Sync + 'static
{
    |ctx: &RequestContext| {
        ctx.client_ip()
            .map(|ip| ip.to_string())
            .ok_or_else(|| TenantKeyError::NoClientIp.into())
    }
}

/// Limit per value of the `name` request header, e.g. an API key.
pub fn header(
    name: HeaderName,
) -> impl Fn(&RequestContext) -> Result<String, BoxError> + Send + Sync + 'static {
    move |ctx: &RequestContext| {
        let value = ctx
            .headers()
            .get(&name)
            .ok_or_else(|| TenantKeyError::MissingHeader(name.clone()))?;
        let value = value
            .to_str()
            .map_err(|_| TenantKeyError::InvalidHeader(name.clone()))?;
        Ok(value.to_owned())
    }
}

pub(crate) fn extract_client_ip(parts: &Parts) -> Option<IpAddr> {
    // First, try proxy headers (in case we're behind a reverse proxy)
    for header in IP_HEADERS {
        let ip = parts
            .headers
            .get(*header)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(str::trim)
            .and_then(|ip_str| ip_str.parse::<IpAddr>().ok());

        if ip.is_some() {
            return ip;
        }
    }

    parts
        .extensions
        .get::<SocketAddr>()
        .map(SocketAddr::ip)
        .or_else(|| connect_info_ip(parts))
}

#[cfg(feature = "axum")]
fn connect_info_ip(parts: &Parts) -> Option<IpAddr> {
    parts
        .extensions
        .get::<axum::extract::ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
}

#[cfg(not(feature = "axum"))]
fn connect_info_ip(_parts: &Parts) -> Option<IpAddr> {
    None
}
