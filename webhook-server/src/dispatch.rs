//! Hands parsed updates to the bot's handler and turns its outcome into the
//! webhook response.

use std::any::Any;
use std::sync::Arc;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::DispatchFault;
use crate::telegram::Update;

/// The bot's business logic.
///
/// Runs on the blocking thread pool, so it may block. A panic fails only
/// the update that caused it.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, update: Update) -> Outcome;
}

impl<F> Handler for F
where
    F: Fn(Update) -> Outcome + Send + Sync + 'static,
{
    fn handle(&self, update: Update) -> Outcome {
        self(update)
    }
}

/// What the handler decided to do with an update.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Acknowledge with an empty 200.
    Done,

    /// Acknowledge and ask the platform to execute a Bot API method.
    Reply(WebhookReply),

    /// Refuse the update; the platform will redeliver it later.
    Reject {
        status: StatusCode,
        description: String,
    },
}

impl Outcome {
    pub fn reject(status: StatusCode, description: impl Into<String>) -> Self {
        Outcome::Reject {
            status,
            description: description.into(),
        }
    }

    /// HTTP response for this outcome.
    pub fn into_http(self) -> Result<Response, DispatchFault> {
        match self {
            Outcome::Done => Ok(StatusCode::OK.into_response()),
            Outcome::Reply(reply) => {
                let body = serde_json::to_vec(&reply)?;
                Ok((
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, "application/json")],
                    body,
                )
                    .into_response())
            }
            Outcome::Reject {
                status,
                description,
            } => {
                let status = if status.is_client_error() || status.is_server_error() {
                    status
                } else {
                    warn!(status = status.as_u16(), "handler_reject_status_replaced");
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                Ok(error_body(status, &description))
            }
        }
    }
}

/// Bot API call returned in the webhook response body.
///
/// Serialized as `{"method": ..., <params>}`.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookReply {
    method: String,
    params: Map<String, Value>,
}

impl WebhookReply {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: Map::new(),
        }
    }

    /// `sendMessage` to `chat_id`.
    pub fn send_message(chat_id: i64, text: impl Into<String>) -> Self {
        Self::new("sendMessage")
            .param("chat_id", chat_id)
            .param("text", text.into())
    }

    /// Add a parameter. A parameter named `method` is ignored.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != "method" {
            self.params.insert(key, value.into());
        }
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }
}

impl Serialize for WebhookReply {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.params.len() + 1))?;
        map.serialize_entry("method", &self.method)?;
        for (key, value) in &self.params {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl IntoResponse for DispatchFault {
    fn into_response(self) -> Response {
        error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

pub(crate) fn error_body(status: StatusCode, description: &str) -> Response {
    let body = json!({ "ok": false, "description": description });
    (status, axum::Json(body)).into_response()
}

/// Runs the handler for each accepted update.
#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<dyn Handler>,
}

impl Dispatcher {
    pub fn new(handler: impl Handler) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    pub async fn dispatch(&self, update: Update) -> Result<Outcome, DispatchFault> {
        let handler = Arc::clone(&self.handler);
        match tokio::task::spawn_blocking(move || handler.handle(update)).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_panic() => Err(DispatchFault::Panicked(panic_message(e.into_panic()))),
            Err(_) => Err(DispatchFault::Cancelled),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
