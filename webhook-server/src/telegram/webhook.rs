//! Webhook registration handshake.
//!
//! `setWebhook` tells the platform where to deliver updates; `deleteWebhook`
//! undoes it on shutdown. The webhook URL embeds the secret path, so it is
//! never logged: only host and port are.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use reqwest::multipart::{Form, Part};
use tracing::{error, info, warn};
use url::Url;

use crate::error::{ApiError, RegistrationError};
use crate::tls::TlsIdentity;

use super::client::BotApi;
use super::retry::RetryPolicy;
use super::types::{UpdateKind, WebhookInfo};

/// Ports the platform is willing to deliver webhooks to.
pub const VALID_PORTS: [u16; 4] = [443, 80, 88, 8443];

pub const DEFAULT_MAX_CONNECTIONS: u8 = 40;

/// Everything about the webhook besides where it points.
#[derive(Clone, PartialEq)]
pub struct RegistrationOptions {
    /// Secret path the listener serves updates on, starting with `/`.
    pub path: String,
    /// Fixed IPv4 the platform should use instead of resolving the host.
    pub ip_address: Option<Ipv4Addr>,
    pub max_connections: u8,
    pub allowed_updates: Option<Vec<String>>,
    pub drop_pending_updates: bool,
    pub secret_token: Option<String>,
}

impl Default for RegistrationOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            ip_address: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            allowed_updates: None,
            drop_pending_updates: false,
            secret_token: None,
        }
    }
}

impl fmt::Debug for RegistrationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationOptions")
            .field("path", &"<redacted>")
            .field("ip_address", &self.ip_address)
            .field("max_connections", &self.max_connections)
            .field("allowed_updates", &self.allowed_updates)
            .field("drop_pending_updates", &self.drop_pending_updates)
            .field("secret_token", &self.secret_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Validated desired state of the webhook.
#[derive(Clone, PartialEq)]
pub struct WebhookRegistration {
    url: Url,
    certificate: Option<Vec<u8>>,
    ip_address: Option<Ipv4Addr>,
    max_connections: u8,
    allowed_updates: Vec<String>,
    drop_pending_updates: bool,
    secret_token: Option<String>,
}

impl WebhookRegistration {
    pub fn new(
        identity: &TlsIdentity,
        host: &str,
        port: u16,
        options: &RegistrationOptions,
    ) -> Result<Self, RegistrationError> {
        if !VALID_PORTS.contains(&port) {
            return Err(invalid(format!(
                "port {port} is not one of {VALID_PORTS:?}"
            )));
        }
        if !(1..=100).contains(&options.max_connections) {
            return Err(invalid(format!(
                "max_connections {} is outside 1..=100",
                options.max_connections
            )));
        }
        if !options.path.starts_with('/') {
            return Err(invalid("path must start with '/'".to_string()));
        }
        if let Some(kinds) = &options.allowed_updates {
            if let Some(unknown) = kinds.iter().find(|k| !UpdateKind::is_known(k)) {
                return Err(invalid(format!("unknown update kind '{unknown}'")));
            }
        }

        let host_is_ip = match host.parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) => true,
            Ok(IpAddr::V6(_)) => {
                return Err(invalid("IPv6 hosts are not supported for webhooks".to_string()))
            }
            Err(_) => false,
        };
        if host_is_ip && options.ip_address.is_some() {
            return Err(invalid(
                "ip_address can only be combined with a host name".to_string(),
            ));
        }

        let mut url = Url::parse(&format!("https://{host}:{port}"))
            .map_err(|e| invalid(format!("invalid host '{host}': {e}")))?;
        url.set_path(&options.path);
        if url.scheme() != "https" || url.host_str().is_none() {
            return Err(invalid(format!("invalid host '{host}'")));
        }
        // Requests arrive on the encoded path, so it must match the one served
        if url.path() != options.path {
            return Err(invalid(
                "path must not need percent-encoding".to_string(),
            ));
        }

        // Without an explicit list the platform's default set includes kinds
        // that cannot be decoded
        let allowed_updates = match &options.allowed_updates {
            Some(kinds) => kinds.clone(),
            None => UpdateKind::NAMES.iter().map(|k| k.to_string()).collect(),
        };

        let certificate = identity
            .is_self_signed()
            .then(|| identity.certificate_pem().as_bytes().to_vec());

        Ok(Self {
            url,
            certificate,
            ip_address: options.ip_address,
            max_connections: options.max_connections,
            allowed_updates,
            drop_pending_updates: options.drop_pending_updates,
            secret_token: options.secret_token.clone(),
        })
    }

    /// Full webhook URL. Contains the secret path.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(443)
    }

    pub fn uploads_certificate(&self) -> bool {
        self.certificate.is_some()
    }

    /// Multipart body for `setWebhook`. A `Form` is consumed by sending, so
    /// every attempt builds a fresh one.
    fn form(&self) -> Result<Form, ApiError> {
        let mut form = Form::new()
            .text("url", self.url.to_string())
            .text("max_connections", self.max_connections.to_string())
            .text("drop_pending_updates", self.drop_pending_updates.to_string());

        if let Some(ip) = self.ip_address {
            form = form.text("ip_address", ip.to_string());
        }
        let kinds = serde_json::to_string(&self.allowed_updates)
            .map_err(|e| ApiError::Decode(format!("allowed_updates: {e}")))?;
        form = form.text("allowed_updates", kinds);
        if let Some(secret) = &self.secret_token {
            form = form.text("secret_token", secret.clone());
        }
        if let Some(pem) = &self.certificate {
            let part = Part::bytes(pem.clone())
                .file_name("cert.pem")
                .mime_str("application/octet-stream")?;
            form = form.part("certificate", part);
        }

        Ok(form)
    }
}

impl fmt::Debug for WebhookRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookRegistration")
            .field("host", &self.host())
            .field("port", &self.port())
            .field("certificate", &self.certificate.is_some())
            .field("ip_address", &self.ip_address)
            .field("max_connections", &self.max_connections)
            .field("allowed_updates", &self.allowed_updates)
            .field("drop_pending_updates", &self.drop_pending_updates)
            .finish_non_exhaustive()
    }
}

/// Outcome of a successful `setWebhook`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationResult {
    pub attempts: u32,
    pub host: String,
    pub port: u16,
    pub certificate_uploaded: bool,
}

/// Performs `setWebhook` / `deleteWebhook` with retries.
#[derive(Clone)]
pub struct RegistrationClient {
    api: BotApi,
    policy: RetryPolicy,
}

impl RegistrationClient {
    pub fn new(api: BotApi, policy: RetryPolicy) -> Self {
        Self { api, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Validate the parameters and register the webhook.
    pub async fn register(
        &self,
        identity: &TlsIdentity,
        host: &str,
        port: u16,
        options: &RegistrationOptions,
    ) -> Result<RegistrationResult, RegistrationError> {
        let registration = WebhookRegistration::new(identity, host, port, options)?;
        self.submit(&registration).await
    }

    /// Send `setWebhook`, retrying transient failures per the policy.
    pub async fn submit(
        &self,
        registration: &WebhookRegistration,
    ) -> Result<RegistrationResult, RegistrationError> {
        let max_wait_secs = self.policy.max_delay.as_secs();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match registration.form() {
                Ok(form) => self.api.call_multipart::<bool>("setWebhook", form).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(true) => {
                    info!(
                        host = %registration.host(),
                        port = registration.port(),
                        attempts = attempt,
                        certificate_uploaded = registration.uploads_certificate(),
                        "webhook_registered"
                    );
                    return Ok(RegistrationResult {
                        attempts: attempt,
                        host: registration.host().to_string(),
                        port: registration.port(),
                        certificate_uploaded: registration.uploads_certificate(),
                    });
                }
                Ok(false) => {
                    error!(attempts = attempt, "webhook_registration_refused");
                    return Err(RegistrationError::Refused(
                        "setWebhook returned false".to_string(),
                    ));
                }
                Err(e) if e.is_retryable(max_wait_secs) => {
                    if !self.policy.has_attempts_left(attempt) {
                        error!(attempts = attempt, error = %e, "webhook_registration_exhausted");
                        return Err(RegistrationError::RetriesExhausted { attempts: attempt, last: e });
                    }
                    let delay = self.policy.delay_after(attempt, e.retry_after_secs());
                    warn!(
                        attempt = attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "webhook_registration_retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(attempts = attempt, error = %e, "webhook_registration_failed");
                    return Err(e.into());
                }
            }
        }
    }

    /// Remove the webhook. Callers on the shutdown path treat failure as
    /// non-fatal.
    pub async fn deregister(&self, drop_pending_updates: bool) -> Result<(), RegistrationError> {
        let form = Form::new().text("drop_pending_updates", drop_pending_updates.to_string());
        match self.api.call_multipart::<bool>("deleteWebhook", form).await? {
            true => {
                info!("webhook_deregistered");
                Ok(())
            }
            false => Err(RegistrationError::Refused(
                "deleteWebhook returned false".to_string(),
            )),
        }
    }

    /// Current webhook state as seen by the platform.
    pub async fn webhook_info(&self) -> Result<WebhookInfo, RegistrationError> {
        Ok(self.api.get_webhook_info().await?)
    }
}

fn invalid(reason: String) -> RegistrationError {
    RegistrationError::InvalidWebhook(reason)
}
