use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

pub const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";

const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(86400);

/// Methods the router actually mounts.
const METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

pub fn create_cors_layer(origins: &[String]) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(allowed_origins(origins))
        .allow_methods(METHODS)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            header::ORIGIN,
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static("idempotency-key"),
        ])
        .expose_headers([header::CONTENT_LENGTH, header::CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(PREFLIGHT_MAX_AGE)
}

fn allowed_origins(configured: &[String]) -> AllowOrigin {
    let mut valid = Vec::with_capacity(configured.len());
    for origin in configured {
        match HeaderValue::from_str(origin) {
            Ok(value) => valid.push(value),
            Err(e) => tracing::warn!(origin = %origin, error = %e, "CORS: skipping invalid origin"),
        }
    }

    if valid.is_empty() {
        // A wildcard cannot be combined with credentials.
        tracing::warn!("CORS: no valid origins configured, mirroring the request origin");
        return AllowOrigin::mirror_request();
    }
    tracing::info!(count = valid.len(), "CORS: origin allow-list configured");
    AllowOrigin::list(valid)
}
