use std::sync::Arc;
use std::task::{Context, Poll};

use axum::http::header::{
    CACHE_CONTROL, CONTENT_SECURITY_POLICY, REFERRER_POLICY, STRICT_TRANSPORT_SECURITY,
    X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS, X_XSS_PROTECTION,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response};
use tower::{Layer, Service};

const HSTS_VALUE: &str = "max-age=31536000; includeSubDomains";
const CSP_API_VALUE: &str = "default-src 'none'; frame-ancestors 'none'";

/// The header set stamped on every response.
///
/// `enforced` entries overwrite whatever the handler set; `defaults` only
/// fill gaps, so a handler can still choose its own caching.
#[derive(Debug)]
struct HeaderSet {
    enforced: Vec<(HeaderName, HeaderValue)>,
    defaults: Vec<(HeaderName, HeaderValue)>,
}

impl HeaderSet {
    fn new(include_hsts: bool) -> Self {
        let mut enforced = vec![
            (X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
            (X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
            (X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block")),
            (CONTENT_SECURITY_POLICY, HeaderValue::from_static(CSP_API_VALUE)),
            (
                REFERRER_POLICY,
                HeaderValue::from_static("strict-origin-when-cross-origin"),
            ),
            (
                HeaderName::from_static("permissions-policy"),
                HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
            ),
        ];
        // HTTPS deployments only
        if include_hsts {
            enforced.push((STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS_VALUE)));
        }

        Self {
            enforced,
            // Ticket and capacity reads go stale within seconds.
            defaults: vec![(CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        }
    }

    fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.enforced {
            headers.insert(name.clone(), value.clone());
        }
        for (name, value) in &self.defaults {
            headers.entry(name.clone()).or_insert_with(|| value.clone());
        }
    }
}

#[derive(Clone)]
pub struct SecurityHeadersLayer {
    headers: Arc<HeaderSet>,
}

impl SecurityHeadersLayer {
    pub fn new(include_hsts: bool) -> Self {
        tracing::info!(hsts = include_hsts, "Security headers configured");
        Self {
            headers: Arc::new(HeaderSet::new(include_hsts)),
        }
    }

    pub fn sends_hsts(&self) -> bool {
        self.headers
            .enforced
            .iter()
            .any(|(name, _)| *name == STRICT_TRANSPORT_SECURITY)
    }
}

impl<S> Layer<S> for SecurityHeadersLayer {
    type Service = SecurityHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityHeadersService {
            inner,
            headers: self.headers.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SecurityHeadersService<S> {
    inner: S,
    headers: Arc<HeaderSet>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for SecurityHeadersService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = SecurityHeadersFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        SecurityHeadersFuture {
            future: self.inner.call(request),
            headers: self.headers.clone(),
        }
    }
}

#[pin_project::pin_project]
pub struct SecurityHeadersFuture<F> {
    #[pin]
    future: F,
    headers: Arc<HeaderSet>,
}

impl<F, ResBody, E> std::future::Future for SecurityHeadersFuture<F>
where
    F: std::future::Future<Output = Result<Response<ResBody>, E>>,
{
    type Output = Result<Response<ResBody>, E>;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let mut response = std::task::ready!(this.future.poll(cx))?;
        this.headers.apply(response.headers_mut());
        Poll::Ready(Ok(response))
    }
}

pub fn create_security_headers_layer(production: bool) -> SecurityHeadersLayer {
    SecurityHeadersLayer::new(production)
}
