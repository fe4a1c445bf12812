//! Bot API side of the server: update schema, authenticated client and the
//! webhook registration handshake.

pub mod client;
pub mod retry;
pub mod types;
pub mod webhook;

pub use client::{BotApi, BotToken, TELEGRAM_API};
pub use retry::RetryPolicy;
pub use types::{Update, UpdateKind, User, WebhookInfo};
pub use webhook::{
    RegistrationClient, RegistrationOptions, RegistrationResult, WebhookRegistration, VALID_PORTS,
};
