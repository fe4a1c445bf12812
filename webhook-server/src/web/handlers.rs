//! Request handlers.
//!
//! The update endpoint rejects as early as it can: every gate runs on the
//! request head, so an unauthenticated or oversized request never has its
//! body read.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::allowlist::Allowlist;
use crate::dispatch::{error_body, Dispatcher};
use crate::telegram::Update;
use crate::Config;

use super::secret::SECRET_TOKEN_HEADER;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub webhook_path: Arc<str>,
    pub allowlist: Arc<Allowlist>,
    pub dispatcher: Dispatcher,
    pub greeting: Arc<Greeting>,
    pub readiness: Readiness,
}

impl AppState {
    pub fn new(
        config: Config,
        allowlist: Allowlist,
        dispatcher: Dispatcher,
        greeting: Greeting,
    ) -> Self {
        Self {
            webhook_path: Arc::from(config.webhook_path()),
            config: Arc::new(config),
            allowlist: Arc::new(allowlist),
            dispatcher,
            greeting: Arc::new(greeting),
            readiness: Readiness::default(),
        }
    }
}

/// Flips once the webhook is registered.
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// =============================================================================
// Health and readiness
// =============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Liveness endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Ready only after `setWebhook` succeeded.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    if state.readiness.is_ready() {
        (StatusCode::OK, Json(HealthResponse { status: "ready" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "registering",
            }),
        )
    }
}

// =============================================================================
// Greeting page
// =============================================================================

/// Static HTML served on `/`, with a content-derived ETag.
#[derive(Debug, Clone)]
pub struct Greeting {
    body: String,
    etag: HeaderValue,
}

impl Greeting {
    pub fn new(first_name: &str, username: Option<&str>) -> Self {
        let name = escape_html(first_name);
        let link = match username {
            Some(username) => {
                let username = escape_html(username);
                format!(r#"<p>Talk to me at <a href="https://t.me/{username}">@{username}</a>.</p>"#)
            }
            None => String::new(),
        };
        let body = format!(
            "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{name}</title></head>\n\
             <body>\n<h1>Hello, I am {name}.</h1>\n{link}\n</body>\n</html>\n"
        );

        let digest = Sha256::digest(body.as_bytes());
        let etag = HeaderValue::from_str(&format!("\"{}\"", hex::encode(digest)))
            .unwrap_or_else(|_| HeaderValue::from_static("\"greeting\""));

        Self { body, etag }
    }

    pub fn etag(&self) -> &HeaderValue {
        &self.etag
    }
}

/// `GET /` and `HEAD /`.
pub async fn greeting(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let greeting = &state.greeting;
    let fresh = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|tags| {
            tags.split(',')
                .any(|tag| tag.trim() == "*" || tag.trim().as_bytes() == greeting.etag.as_bytes())
        });

    if fresh {
        return (StatusCode::NOT_MODIFIED, [(header::ETAG, greeting.etag.clone())]).into_response();
    }

    (
        [(header::ETAG, greeting.etag.clone())],
        Html(greeting.body.clone()),
    )
        .into_response()
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

// =============================================================================
// Update endpoint
// =============================================================================

/// Why a request was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotFound,
    MethodNotAllowed,
    Forbidden(Option<IpAddr>),
    Unauthorized,
    UnsupportedMediaType,
    InvalidLength,
    PayloadTooLarge,
    BadRequest(String),
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::NotFound => StatusCode::NOT_FOUND,
            Rejection::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Rejection::Forbidden(_) => StatusCode::FORBIDDEN,
            Rejection::Unauthorized => StatusCode::UNAUTHORIZED,
            Rejection::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Rejection::InvalidLength | Rejection::BadRequest(_) => StatusCode::BAD_REQUEST,
            Rejection::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    fn description(&self) -> String {
        match self {
            Rejection::NotFound => "not found".to_string(),
            Rejection::MethodNotAllowed => "method not allowed".to_string(),
            Rejection::Forbidden(_) => "forbidden".to_string(),
            Rejection::Unauthorized => "unauthorized".to_string(),
            Rejection::UnsupportedMediaType => "expected application/json".to_string(),
            Rejection::InvalidLength => "invalid Content-Length".to_string(),
            Rejection::PayloadTooLarge => "payload too large".to_string(),
            Rejection::BadRequest(reason) => reason.clone(),
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let mut response = error_body(self.status(), &self.description());
        if self == Rejection::MethodNotAllowed {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("POST"));
        }
        response
    }
}

/// Fallback handler: the update endpoint plus 404 for everything else.
///
/// The webhook path is compared by exact equality rather than routed, since
/// bot tokens contain `:`.
pub async fn receive_update(State(state): State<AppState>, request: Request) -> Response {
    match ingest(&state, request).await {
        Ok(response) => response,
        Err(Rejection::NotFound) => Rejection::NotFound.into_response(),
        Err(rejection) => {
            match &rejection {
                Rejection::BadRequest(reason) => {
                    warn!(status = 400, reason = %reason, "update_decode_failed")
                }
                Rejection::Forbidden(source) => {
                    warn!(status = 403, source = ?source, "request_rejected")
                }
                other => warn!(
                    status = other.status().as_u16(),
                    reason = %other.description(),
                    "request_rejected"
                ),
            }
            rejection.into_response()
        }
    }
}

async fn ingest(state: &AppState, request: Request) -> Result<Response, Rejection> {
    if request.uri().path() != &*state.webhook_path {
        return Err(Rejection::NotFound);
    }
    if request.method() != Method::POST {
        return Err(Rejection::MethodNotAllowed);
    }

    let source = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    match source {
        Some(ip) if state.allowlist.allows(ip) => {}
        _ => return Err(Rejection::Forbidden(source)),
    }

    let headers = request.headers();
    if let Some(secret) = &state.config.secret_token {
        let provided = headers
            .get(SECRET_TOKEN_HEADER)
            .map(HeaderValue::as_bytes)
            .unwrap_or_default();
        if !secret.matches(provided) {
            return Err(Rejection::Unauthorized);
        }
    }

    if !is_json(headers) {
        return Err(Rejection::UnsupportedMediaType);
    }

    let limit = state.config.max_body_bytes;
    let declared = match headers.get(header::CONTENT_LENGTH) {
        Some(value) => Some(
            value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .ok_or(Rejection::InvalidLength)?,
        ),
        None => None,
    };
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(Rejection::PayloadTooLarge);
    }

    let body = read_body(request.into_body(), limit, declared.is_some()).await?;
    let update: Update = serde_json::from_slice(&body)
        .map_err(|e| Rejection::BadRequest(format!("invalid update: {e}")))?;

    let update_id = update.update_id;
    info!(
        update_id = update_id,
        kind = update.kind.name(),
        source = ?source,
        body_length = body.len(),
        "update_received"
    );

    let outcome = match state.dispatcher.dispatch(update).await {
        Ok(outcome) => outcome,
        Err(fault) => {
            error!(update_id = update_id, error = %fault, "dispatch_failed");
            return Ok(fault.into_response());
        }
    };

    match outcome.into_http() {
        Ok(response) => {
            info!(
                update_id = update_id,
                status = response.status().as_u16(),
                "update_handled"
            );
            Ok(response)
        }
        Err(fault) => {
            error!(update_id = update_id, error = %fault, "dispatch_failed");
            Ok(fault.into_response())
        }
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

/// Read at most `limit` bytes. Exceeding the limit is only possible without
/// a declared length; with one, the framing already bounds the body.
async fn read_body(body: Body, limit: usize, declared: bool) -> Result<axum::body::Bytes, Rejection> {
    to_bytes(body, limit).await.map_err(|e| {
        if declared {
            Rejection::BadRequest(format!("failed to read body: {e}"))
        } else {
            Rejection::PayloadTooLarge
        }
    })
}
