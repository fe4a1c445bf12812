//! tghook - HTTPS webhook server for Telegram bots.
//!
//! Receives updates pushed by the Bot API and hands each one to a
//! user-supplied [`Handler`].
//!
//! ## Startup
//!
//! ```text
//! Config (env) → getMe → public host (config or ipify) → TLS identity
//!   → HTTPS listener → setWebhook → ready
//! ```
//!
//! ## Per request
//!
//! ```text
//! path → method → allowlist → secret token → content type → declared size
//!   → bounded body read → decode → Handler → response
//! ```
//!
//! Shutdown stops accepting, drains in-flight requests for a grace period
//! and then calls `deleteWebhook`.

pub mod allowlist;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod external_ip;
pub mod telegram;
pub mod tls;
pub mod web;

// Re-export commonly used types
pub use allowlist::Allowlist;
pub use config::Config;
pub use dispatch::{Dispatcher, Handler, Outcome, WebhookReply};
pub use error::{
    ApiError, CertificateError, ConfigError, DispatchFault, ExternalIpError, RegistrationError,
    ServerError,
};
pub use telegram::{BotApi, BotToken, RegistrationClient, RegistrationOptions, Update, UpdateKind};
pub use tls::{CertificateSource, SelfSignedRequest, TlsIdentity};
pub use web::{router, AppState, Greeting, Readiness, RunningServer};
