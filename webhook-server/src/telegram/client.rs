//! Minimal Bot API client.
//!
//! Every call goes to `<base>/bot<token>/<method>`. The token is part of the
//! URL, so request URLs are never logged; only the method name is.

use std::fmt;
use std::time::Duration;

use reqwest::multipart::Form;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::ApiError;

use super::types::{User, WebhookInfo};

/// Default Bot API endpoint.
pub const TELEGRAM_API: &str = "https://api.telegram.org";

/// Bot token. Its `Debug` and `Display` output never contain the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct BotToken(String);

impl BotToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Numeric bot id, the part before the colon.
    pub fn bot_id(&self) -> Option<&str> {
        self.0.split_once(':').map(|(id, _)| id)
    }
}

impl fmt::Debug for BotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BotToken({}:***)", self.bot_id().unwrap_or("?"))
    }
}

impl fmt::Display for BotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Response envelope shared by every Bot API method.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i32>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// Authenticated Bot API client for one bot.
#[derive(Clone)]
pub struct BotApi {
    http: Client,
    base: Url,
    token: BotToken,
}

impl BotApi {
    pub fn new(base: Url, token: BotToken, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base, token })
    }

    pub fn token(&self) -> &BotToken {
        &self.token
    }

    fn method_url(&self, method: &str) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Decode("Bot API base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .push(&format!("bot{}", self.token.expose()))
            .push(method);
        Ok(url)
    }

    /// Call a method without parameters.
    pub async fn call<T: DeserializeOwned>(&self, method: &str) -> Result<T, ApiError> {
        debug!(method = method, "bot_api_request");
        let response = self.http.get(self.method_url(method)?).send().await?;
        decode(method, response).await
    }

    /// Call a method with multipart/form-data parameters.
    pub async fn call_multipart<T: DeserializeOwned>(
        &self,
        method: &str,
        form: Form,
    ) -> Result<T, ApiError> {
        debug!(method = method, "bot_api_request");
        let response = self
            .http
            .post(self.method_url(method)?)
            .multipart(form)
            .send()
            .await?;
        decode(method, response).await
    }

    /// https://core.telegram.org/bots/api#getme
    pub async fn get_me(&self) -> Result<User, ApiError> {
        self.call("getMe").await
    }

    /// https://core.telegram.org/bots/api#getwebhookinfo
    pub async fn get_webhook_info(&self) -> Result<WebhookInfo, ApiError> {
        self.call("getWebhookInfo").await
    }
}

async fn decode<T: DeserializeOwned>(
    method: &str,
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.bytes().await?;
    let envelope: Option<Envelope<serde_json::Value>> = serde_json::from_slice(&body).ok();

    debug!(
        method = method,
        status = status.as_u16(),
        body_length = body.len(),
        "bot_api_response"
    );

    if !status.is_success() {
        let (description, retry_after) = match envelope {
            Some(e) => (
                e.description.unwrap_or_default(),
                e.parameters.and_then(|p| p.retry_after),
            ),
            None => (
                String::from_utf8_lossy(&body[..body.len().min(200)]).into_owned(),
                None,
            ),
        };
        return Err(ApiError::Status {
            status,
            description,
            retry_after,
        });
    }

    let envelope = envelope.ok_or_else(|| {
        ApiError::Decode(format!("{method} returned a body that is not a Bot API response"))
    })?;

    if !envelope.ok {
        return Err(ApiError::Api {
            error_code: envelope.error_code.unwrap_or_default(),
            description: envelope.description.unwrap_or_else(|| "unknown".to_string()),
        });
    }

    let result = envelope
        .result
        .ok_or_else(|| ApiError::Decode(format!("{method} response has no result")))?;
    serde_json::from_value(result)
        .map_err(|e| ApiError::Decode(format!("{method} result has an unexpected shape: {e}")))
}
