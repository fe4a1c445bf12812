//! Error types shared across the server.
//!
//! Startup errors (`ConfigError`, `CertificateError`, `RegistrationError`,
//! `ExternalIpError`, `ServerError`) are fatal for the process. Per-request
//! errors (`Rejection` in the web module and `DispatchFault` here) are
//! contained within the request that caused them.

use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Failure to produce or load a TLS identity.
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("failed to generate certificate: {0}")]
    Generate(#[from] rcgen::Error),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid certificate: {0}")]
    Parse(String),

    #[error("invalid private key: {0}")]
    Key(String),

    #[error("no certificate found in {0}")]
    Empty(PathBuf),

    #[error("certificate expired at unix time {not_after}")]
    Expired { not_after: i64 },

    #[error("certificate not valid before unix time {not_before}")]
    NotYetValid { not_before: i64 },

    #[error("private key does not match the certificate public key")]
    KeyMismatch,

    #[error("failed to build TLS configuration: {0}")]
    Tls(#[from] rustls::Error),
}

/// Failure of a single Bot API call.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to reach the Bot API: {0}")]
    Transport(reqwest::Error),

    #[error("Bot API answered HTTP {status}: {description}")]
    Status {
        status: StatusCode,
        description: String,
        retry_after: Option<u64>,
    },

    #[error("Bot API returned error {error_code}: {description}")]
    Api { error_code: i32, description: String },

    #[error("failed to decode Bot API response: {0}")]
    Decode(String),
}

/// The request URL embeds the bot token, so it is dropped before the error
/// can reach a log line.
impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Transport(e.without_url())
    }
}

impl ApiError {
    /// Whether repeating the same call may succeed.
    ///
    /// Network failures and server-side errors are transient. Throttling is
    /// transient only while the platform asks for a wait no longer than
    /// `max_wait_secs`.
    pub fn is_retryable(&self, max_wait_secs: u64) -> bool {
        match self {
            ApiError::Transport(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            ApiError::Status {
                status,
                retry_after,
                ..
            } => {
                if status.is_server_error() {
                    return true;
                }
                *status == StatusCode::TOO_MANY_REQUESTS
                    && retry_after.map_or(true, |secs| secs <= max_wait_secs)
            }
            ApiError::Api { .. } | ApiError::Decode(_) => false,
        }
    }

    /// Delay requested by the platform, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ApiError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Failure of the webhook registration handshake.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("invalid webhook parameters: {0}")]
    InvalidWebhook(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Bot API refused the request: {0}")]
    Refused(String),

    #[error("registration failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: ApiError },
}

/// A user handler failed in a way it did not report itself.
#[derive(Debug, Error)]
pub enum DispatchFault {
    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("handler task was cancelled")]
    Cancelled,

    #[error("failed to serialize handler reply: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure to start or run the HTTPS listener.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("listener stopped with an error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("listener task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Missing or malformed environment configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Failure to discover the public IPv4 address.
#[derive(Debug, Error)]
pub enum ExternalIpError {
    #[error("failed to reach the IP lookup service: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("IP lookup service answered HTTP {0}")]
    Status(StatusCode),

    #[error("IP lookup service returned an unexpected answer: {0}")]
    Malformed(String),

    #[error("IP lookup service returned {0}, which is not an IPv4 address")]
    NotIpv4(std::net::IpAddr),
}
