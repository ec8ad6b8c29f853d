//! HTTP Basic Authentication for the controller-only admin surface (§6
//! [AMBIENT] HTTP surface): gates the export/import endpoints.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, Response, StatusCode},
    middleware::Next,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Username for the admin surface (`None` = auth disabled).
    pub username: Option<String>,
    pub password: Option<String>,
}

impl AuthConfig {
    /// Load auth config from environment variables. `ADMIN_USERNAME` and
    /// `ADMIN_PASSWORD` must both be set to enable auth.
    pub fn from_env() -> Self {
        let username = std::env::var("ADMIN_USERNAME").ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let password = std::env::var("ADMIN_PASSWORD").ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        if username.is_some() && password.is_some() {
            tracing::info!("admin surface authentication enabled");
            Self { username, password }
        } else {
            if username.is_some() || password.is_some() {
                tracing::warn!("ADMIN_USERNAME and ADMIN_PASSWORD must both be set to enable authentication");
            }
            tracing::warn!("admin surface authentication DISABLED - export/import endpoints are unauthenticated");
            Self { username: None, password: None }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    pub fn validate(&self, username: &str, password: &str) -> bool {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => constant_time_eq(u.as_bytes(), username.as_bytes()) && constant_time_eq(p.as_bytes(), password.as_bytes()),
            _ => true,
        }
    }
}

/// Constant-time byte comparison, to avoid leaking credential length/prefix
/// via response timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

fn extract_credentials(request: &Request<Body>) -> Option<(String, String)> {
    let header_value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    decoded.split_once(':').map(|(u, p)| (u.to_string(), p.to_string()))
}

fn unauthorized(realm: &str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::WWW_AUTHENTICATE, format!("Basic realm=\"{realm}\""))
        .body(Body::from("Unauthorized"))
        .unwrap()
}

/// Middleware gating the export/import admin routes (§6).
pub async fn admin_auth_middleware(State(auth_config): State<Arc<AuthConfig>>, request: Request<Body>, next: Next) -> Response<Body> {
    if !auth_config.is_enabled() {
        return next.run(request).await;
    }

    if let Some((username, password)) = extract_credentials(&request) {
        if auth_config.validate(&username, &password) {
            return next.run(request).await;
        }
    }

    unauthorized("quiz-core admin")
}
