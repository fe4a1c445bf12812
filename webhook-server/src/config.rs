//! Configuration module for environment variable parsing.
//!
//! Every setting is read from a `TGHOOK_*` variable. Unset variables take
//! their default; set but malformed variables are an error, never silently
//! replaced.

use std::collections::HashMap;
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::allowlist::{Allowlist, PRIVATE_SUBNETS};
use crate::error::ConfigError;
use crate::external_ip::IPIFY_URL;
use crate::telegram::{BotToken, RetryPolicy, UpdateKind, TELEGRAM_API, VALID_PORTS};
use crate::tls::{CertificateSource, SelfSignedRequest};
use crate::web::SecretToken;

/// Where the platform reaches the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicEndpoint {
    /// Host name registered in the webhook URL and certified by the TLS
    /// identity.
    pub host: String,

    /// Address the platform should connect to instead of resolving `host`.
    pub ip_address: Option<Ipv4Addr>,
}

/// Paths served by the listener itself, unavailable as webhook path.
const RESERVED_PATHS: [&str; 3] = ["/", "/health", "/ready"];

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bot token issued by @BotFather
    pub bot_token: BotToken,

    /// Address the HTTPS listener binds to
    pub host: IpAddr,

    /// Port the HTTPS listener binds to
    pub port: u16,

    /// Public host name or IPv4 the platform connects to; discovered when unset
    pub external_host: Option<String>,

    /// Public port, when a proxy or NAT maps it differently from `port`
    pub external_port: Option<u16>,

    /// Host name registered instead of `external_host` when that is an IP
    pub alternative_name: Option<String>,

    /// Operator-supplied certificate chain and key
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,

    /// Directory persisting the self-signed identity across restarts
    pub cert_cache_dir: Option<PathBuf>,

    /// Secret path updates are posted to; `/<token>` when unset
    pub webhook_path: Option<String>,

    pub secret_token: Option<SecretToken>,

    /// Source networks allowed to post updates; Telegram's when unset
    pub allowed_subnets: Option<Vec<String>>,

    /// Also accept loopback and RFC 1918 sources
    pub allow_private_ranges: bool,

    pub max_body_bytes: usize,

    // =========================================================================
    // Registration
    // =========================================================================
    pub max_connections: u8,

    pub allowed_updates: Option<Vec<String>>,

    pub drop_pending_updates: bool,

    pub register_max_attempts: u32,

    pub register_base_delay_ms: u64,

    pub register_max_delay_ms: u64,

    /// Bot API request timeout in milliseconds
    pub request_timeout_ms: u64,

    pub shutdown_grace_secs: u64,

    /// Call `deleteWebhook` when shutting down
    pub deregister_on_shutdown: bool,

    pub api_url: Url,

    pub ipify_url: Url,
}

impl Config {
    /// Defaults for everything except the token.
    pub fn new(bot_token: BotToken) -> Self {
        Config {
            bot_token,
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8443,
            external_host: None,
            external_port: None,
            alternative_name: None,
            cert_path: None,
            key_path: None,
            cert_cache_dir: None,
            webhook_path: None,
            secret_token: None,
            allowed_subnets: None,
            allow_private_ranges: false,
            max_body_bytes: 1024 * 1024,
            max_connections: 40,
            allowed_updates: None,
            drop_pending_updates: false,
            register_max_attempts: 5,
            register_base_delay_ms: 1000,
            register_max_delay_ms: 30_000,
            request_timeout_ms: 10_000,
            shutdown_grace_secs: 10,
            deregister_on_shutdown: true,
            api_url: default_url(TELEGRAM_API),
            ipify_url: default_url(IPIFY_URL),
        }
    }

    /// Load and validate configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = env::vars()
            .filter(|(name, _)| name.starts_with("TGHOOK_"))
            .collect();
        Self::from_vars(&vars)
    }

    /// Load and validate configuration from a variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let vars = Vars(vars);

        let token = vars
            .get("TGHOOK_BOT_TOKEN")
            .ok_or(ConfigError::Missing("TGHOOK_BOT_TOKEN"))?;
        let defaults = Config::new(BotToken::new(token));

        let secret_token = vars
            .get("TGHOOK_SECRET_TOKEN")
            .map(SecretToken::parse)
            .transpose()
            .map_err(|reason| ConfigError::Invalid {
                name: "TGHOOK_SECRET_TOKEN",
                reason,
            })?;

        let config = Config {
            host: vars.parse("TGHOOK_HOST", defaults.host)?,
            port: vars.parse("TGHOOK_PORT", defaults.port)?,
            external_host: vars.get("TGHOOK_EXTERNAL_HOST"),
            external_port: vars.parse_opt("TGHOOK_EXTERNAL_PORT")?,
            alternative_name: vars.get("TGHOOK_ALTERNATIVE_NAME"),
            cert_path: vars.get("TGHOOK_CERT_PATH").map(PathBuf::from),
            key_path: vars.get("TGHOOK_KEY_PATH").map(PathBuf::from),
            cert_cache_dir: vars.get("TGHOOK_CERT_CACHE_DIR").map(PathBuf::from),
            webhook_path: vars.get("TGHOOK_WEBHOOK_PATH"),
            secret_token,
            allowed_subnets: vars.csv("TGHOOK_ALLOWED_SUBNETS"),
            allow_private_ranges: vars.flag("TGHOOK_ALLOW_PRIVATE_RANGES", false)?,
            max_body_bytes: vars.parse("TGHOOK_MAX_BODY_BYTES", defaults.max_body_bytes)?,
            max_connections: vars.parse("TGHOOK_MAX_CONNECTIONS", defaults.max_connections)?,
            allowed_updates: vars.csv("TGHOOK_ALLOWED_UPDATES"),
            drop_pending_updates: vars.flag("TGHOOK_DROP_PENDING_UPDATES", false)?,
            register_max_attempts: vars
                .parse("TGHOOK_REGISTER_MAX_ATTEMPTS", defaults.register_max_attempts)?,
            register_base_delay_ms: vars
                .parse("TGHOOK_REGISTER_BASE_DELAY_MS", defaults.register_base_delay_ms)?,
            register_max_delay_ms: vars
                .parse("TGHOOK_REGISTER_MAX_DELAY_MS", defaults.register_max_delay_ms)?,
            request_timeout_ms: vars
                .parse("TGHOOK_REQUEST_TIMEOUT_MS", defaults.request_timeout_ms)?,
            shutdown_grace_secs: vars
                .parse("TGHOOK_SHUTDOWN_GRACE_SECS", defaults.shutdown_grace_secs)?,
            deregister_on_shutdown: vars.flag("TGHOOK_DEREGISTER_ON_SHUTDOWN", true)?,
            api_url: vars.parse("TGHOOK_API_URL", defaults.api_url.clone())?,
            ipify_url: vars.parse("TGHOOK_IPIFY_URL", defaults.ipify_url.clone())?,
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot_token.expose().trim().is_empty() {
            return Err(invalid("TGHOOK_BOT_TOKEN", "must not be empty"));
        }

        let path = self.webhook_path();
        if !path.starts_with('/') {
            return Err(invalid("TGHOOK_WEBHOOK_PATH", "must start with '/'"));
        }
        if RESERVED_PATHS.contains(&path.as_str()) {
            return Err(invalid(
                "TGHOOK_WEBHOOK_PATH",
                format!("'{path}' is reserved"),
            ));
        }
        // Compared verbatim against the request path, so nothing that would
        // be percent-encoded on the wire
        if !path.chars().all(is_path_char) {
            return Err(invalid(
                "TGHOOK_WEBHOOK_PATH",
                "may only contain ASCII letters, digits and -._~:@!$&'()*+,;=/",
            ));
        }

        if !VALID_PORTS.contains(&self.public_port()) {
            return Err(invalid(
                "TGHOOK_EXTERNAL_PORT",
                format!(
                    "public port {} is not one of {VALID_PORTS:?}",
                    self.public_port()
                ),
            ));
        }

        if !(1..=100).contains(&self.max_connections) {
            return Err(invalid("TGHOOK_MAX_CONNECTIONS", "must be within 1..=100"));
        }

        if let Some(kinds) = &self.allowed_updates {
            if let Some(unknown) = kinds.iter().find(|k| !UpdateKind::is_known(k)) {
                return Err(invalid(
                    "TGHOOK_ALLOWED_UPDATES",
                    format!("unknown update kind '{unknown}'"),
                ));
            }
        }

        self.allowlist()?;

        if let (Some(host), Some(_)) = (&self.external_host, &self.alternative_name) {
            if host.parse::<IpAddr>().is_err() {
                return Err(invalid(
                    "TGHOOK_ALTERNATIVE_NAME",
                    "only usable when TGHOOK_EXTERNAL_HOST is an IP address",
                ));
            }
        }
        if let Some(IpAddr::V6(_)) = self.external_host.as_deref().and_then(|h| h.parse().ok()) {
            return Err(invalid(
                "TGHOOK_EXTERNAL_HOST",
                "webhooks cannot be delivered to IPv6 addresses",
            ));
        }

        match (&self.cert_path, &self.key_path) {
            (Some(_), None) => return Err(invalid("TGHOOK_KEY_PATH", "required with TGHOOK_CERT_PATH")),
            (None, Some(_)) => return Err(invalid("TGHOOK_CERT_PATH", "required with TGHOOK_KEY_PATH")),
            _ => {}
        }

        if self.register_max_attempts == 0 {
            return Err(invalid("TGHOOK_REGISTER_MAX_ATTEMPTS", "must be at least 1"));
        }
        if self.register_base_delay_ms > self.register_max_delay_ms {
            return Err(invalid(
                "TGHOOK_REGISTER_BASE_DELAY_MS",
                "must not exceed TGHOOK_REGISTER_MAX_DELAY_MS",
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(invalid("TGHOOK_MAX_BODY_BYTES", "must be at least 1"));
        }

        Ok(())
    }

    /// Secret path updates are accepted on.
    pub fn webhook_path(&self) -> String {
        self.webhook_path
            .clone()
            .unwrap_or_else(|| format!("/{}", self.bot_token.expose()))
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Port registered with the platform.
    pub fn public_port(&self) -> u16 {
        self.external_port.unwrap_or(self.port)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.register_max_attempts,
            base_delay: Duration::from_millis(self.register_base_delay_ms),
            max_delay: Duration::from_millis(self.register_max_delay_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Source networks allowed to post updates.
    pub fn allowlist(&self) -> Result<Allowlist, ConfigError> {
        let Some(subnets) = &self.allowed_subnets else {
            return Ok(Allowlist::telegram(self.allow_private_ranges));
        };

        let mut subnets = subnets.clone();
        if self.allow_private_ranges {
            subnets.extend(PRIVATE_SUBNETS.iter().map(|s| s.to_string()));
        }
        Allowlist::parse(&subnets).map_err(|e| invalid("TGHOOK_ALLOWED_SUBNETS", e.to_string()))
    }

    /// Resolve the public endpoint.
    ///
    /// A host name is registered as is. An IPv4 address (configured or
    /// `discovered`) is passed as `ip_address`, and the webhook URL uses the
    /// alternative name instead, `<first name>.bot` unless configured.
    pub fn public_endpoint(
        &self,
        discovered: Option<Ipv4Addr>,
        bot_first_name: &str,
    ) -> Result<PublicEndpoint, ConfigError> {
        let ip = match self.external_host.as_deref() {
            Some(host) => match host.parse::<IpAddr>() {
                Ok(IpAddr::V4(ip)) => ip,
                Ok(IpAddr::V6(_)) => {
                    return Err(invalid(
                        "TGHOOK_EXTERNAL_HOST",
                        "webhooks cannot be delivered to IPv6 addresses",
                    ))
                }
                Err(_) => {
                    return Ok(PublicEndpoint {
                        host: host.to_string(),
                        ip_address: None,
                    })
                }
            },
            None => discovered.ok_or(ConfigError::Missing("TGHOOK_EXTERNAL_HOST"))?,
        };

        let host = self
            .alternative_name
            .clone()
            .unwrap_or_else(|| default_alternative_name(bot_first_name));
        Ok(PublicEndpoint {
            host,
            ip_address: Some(ip),
        })
    }

    /// Certificate source for a listener reachable as `common_name`.
    pub fn certificate_source(
        &self,
        common_name: &str,
        organization: &str,
        ip_address: Option<IpAddr>,
    ) -> CertificateSource {
        match (&self.cert_path, &self.key_path) {
            (Some(cert_path), Some(key_path)) => CertificateSource::Files {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            },
            _ => {
                let mut request = SelfSignedRequest::new(common_name, organization);
                request.ip_address = ip_address.filter(|ip| ip.to_string() != common_name);
                request.cache_dir = self.cert_cache_dir.clone();
                CertificateSource::SelfSigned(request)
            }
        }
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.into(),
    }
}

/// `<first name>.bot`, reduced to a valid DNS label.
fn default_alternative_name(first_name: &str) -> String {
    let label: String = first_name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let label = label.trim_matches('-');
    let label = if label.is_empty() { "telegram" } else { label };
    format!("{}.bot", &label[..label.len().min(63)])
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-._~:@!$&'()*+,;=/".contains(c)
}

fn default_url(raw: &str) -> Url {
    Url::parse(raw).unwrap_or_else(|_| unreachable!("built-in URL {raw} is valid"))
}

/// Typed access to a variable map.
struct Vars<'a>(&'a HashMap<String, String>);

impl Vars<'_> {
    /// Trimmed value; empty counts as unset.
    fn get(&self, name: &str) -> Option<String> {
        self.0
            .get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_opt<T>(&self, name: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(name)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| invalid(name, format!("'{raw}': {e}")))
            })
            .transpose()
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parse_opt(name)?.unwrap_or(default))
    }

    fn flag(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(name).map(|v| v.to_ascii_lowercase()).as_deref() {
            None => Ok(default),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some("0" | "false" | "no" | "off") => Ok(false),
            Some(other) => Err(invalid(name, format!("'{other}' is not a boolean"))),
        }
    }

    /// Parse a comma-separated list of strings.
    fn csv(&self, name: &str) -> Option<Vec<String>> {
        self.get(name).map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        let mut map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        map.entry("TGHOOK_BOT_TOKEN".to_string())
            .or_insert_with(|| "123:abc".to_string());
        map
    }

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        Config::from_vars(&vars(pairs))
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:8443".parse().unwrap());
        assert_eq!(config.public_port(), 8443);
        assert_eq!(config.webhook_path(), "/123:abc");
        assert_eq!(config.max_body_bytes, 1_048_576);
        assert_eq!(config.max_connections, 40);
        assert!(config.deregister_on_shutdown);
        assert!(!config.drop_pending_updates);
        assert_eq!(config.api_url.as_str(), "https://api.telegram.org/");
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.shutdown_grace(), Duration::from_secs(10));
    }

    #[test]
    fn test_token_is_required() {
        let empty = HashMap::new();
        assert!(matches!(
            Config::from_vars(&empty),
            Err(ConfigError::Missing("TGHOOK_BOT_TOKEN"))
        ));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("TGHOOK_PORT", "88"),
            ("TGHOOK_EXTERNAL_HOST", "bot.example.com"),
            ("TGHOOK_WEBHOOK_PATH", "/updates"),
            ("TGHOOK_SECRET_TOKEN", "s3cret"),
            ("TGHOOK_ALLOWED_UPDATES", "message, callback_query"),
            ("TGHOOK_DROP_PENDING_UPDATES", "yes"),
            ("TGHOOK_REGISTER_MAX_ATTEMPTS", "2"),
            ("TGHOOK_REGISTER_BASE_DELAY_MS", "10"),
            ("TGHOOK_REGISTER_MAX_DELAY_MS", "20"),
            ("TGHOOK_DEREGISTER_ON_SHUTDOWN", "0"),
        ])
        .unwrap();

        assert_eq!(config.port, 88);
        assert_eq!(config.external_host.as_deref(), Some("bot.example.com"));
        assert_eq!(config.webhook_path(), "/updates");
        assert!(config.secret_token.as_ref().unwrap().matches(b"s3cret"));
        assert_eq!(
            config.allowed_updates,
            Some(vec!["message".to_string(), "callback_query".to_string()])
        );
        assert!(config.drop_pending_updates);
        assert!(!config.deregister_on_shutdown);
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.base_delay, Duration::from_millis(10));
        assert_eq!(policy.max_delay, Duration::from_millis(20));
    }

    #[test]
    fn test_malformed_values_are_errors() {
        assert!(matches!(
            load(&[("TGHOOK_PORT", "eighty")]),
            Err(ConfigError::Invalid { name: "TGHOOK_PORT", .. })
        ));
        assert!(load(&[("TGHOOK_ALLOW_PRIVATE_RANGES", "maybe")]).is_err());
        assert!(load(&[("TGHOOK_SECRET_TOKEN", "no spaces allowed")]).is_err());
        assert!(load(&[("TGHOOK_API_URL", "not a url")]).is_err());
    }

    #[test]
    fn test_validation_rules() {
        assert!(load(&[("TGHOOK_WEBHOOK_PATH", "/")]).is_err());
        assert!(load(&[("TGHOOK_WEBHOOK_PATH", "/health")]).is_err());
        assert!(load(&[("TGHOOK_WEBHOOK_PATH", "hook")]).is_err());
        assert!(load(&[("TGHOOK_PORT", "8080")]).is_err());
        assert!(load(&[("TGHOOK_PORT", "8080"), ("TGHOOK_EXTERNAL_PORT", "443")]).is_ok());
        assert!(load(&[("TGHOOK_MAX_CONNECTIONS", "0")]).is_err());
        assert!(load(&[("TGHOOK_MAX_CONNECTIONS", "101")]).is_err());
        assert!(load(&[("TGHOOK_ALLOWED_UPDATES", "message,telepathy")]).is_err());
        assert!(load(&[("TGHOOK_ALLOWED_SUBNETS", "10.0.0.0/33")]).is_err());
        assert!(load(&[("TGHOOK_CERT_PATH", "/tmp/cert.pem")]).is_err());
        assert!(load(&[("TGHOOK_KEY_PATH", "/tmp/key.pem")]).is_err());
        assert!(load(&[("TGHOOK_REGISTER_MAX_ATTEMPTS", "0")]).is_err());
        assert!(load(&[("TGHOOK_BOT_TOKEN", "  ")]).is_err());
    }

    #[test]
    fn test_webhook_path_is_url_safe() {
        for path in ["/h\u{00e9}ook", "/100%25", "/a b", "/hook?x=1", "/hook#frag"] {
            assert!(
                matches!(
                    load(&[("TGHOOK_WEBHOOK_PATH", path)]),
                    Err(ConfigError::Invalid { name: "TGHOOK_WEBHOOK_PATH", .. })
                ),
                "{path} accepted"
            );
        }
        let config = load(&[("TGHOOK_WEBHOOK_PATH", "/bot/123:AA-x_y.z~")]).unwrap();
        assert_eq!(config.webhook_path(), "/bot/123:AA-x_y.z~");
    }

    #[test]
    fn test_allowlist_sources() {
        let telegram = load(&[]).unwrap().allowlist().unwrap();
        assert!(telegram.allows("149.154.167.1".parse().unwrap()));
        assert!(!telegram.allows("127.0.0.1".parse().unwrap()));

        let custom = load(&[
            ("TGHOOK_ALLOWED_SUBNETS", "203.0.113.0/24"),
            ("TGHOOK_ALLOW_PRIVATE_RANGES", "true"),
        ])
        .unwrap()
        .allowlist()
        .unwrap();
        assert!(custom.allows("203.0.113.9".parse().unwrap()));
        assert!(custom.allows("127.0.0.1".parse().unwrap()));
        assert!(!custom.allows("149.154.167.1".parse().unwrap()));
    }

    #[test]
    fn test_certificate_source() {
        let config = load(&[("TGHOOK_CERT_CACHE_DIR", "/var/cache/tghook")]).unwrap();
        match config.certificate_source("bot.example.com", "Telegram Bot: Hook", None) {
            CertificateSource::SelfSigned(request) => {
                assert_eq!(request.common_name, "bot.example.com");
                assert_eq!(request.cache_dir, Some(PathBuf::from("/var/cache/tghook")));
            }
            other => panic!("unexpected source: {other:?}"),
        }

        let config = load(&[
            ("TGHOOK_CERT_PATH", "/etc/tghook/cert.pem"),
            ("TGHOOK_KEY_PATH", "/etc/tghook/key.pem"),
        ])
        .unwrap();
        assert!(matches!(
            config.certificate_source("bot.example.com", "x", None),
            CertificateSource::Files { .. }
        ));
    }

    #[test]
    fn test_public_endpoint_for_host_name() {
        let config = load(&[("TGHOOK_EXTERNAL_HOST", "bot.example.com")]).unwrap();
        let endpoint = config.public_endpoint(None, "Hook").unwrap();
        assert_eq!(
            endpoint,
            PublicEndpoint {
                host: "bot.example.com".to_string(),
                ip_address: None,
            }
        );
    }

    #[test]
    fn test_public_endpoint_for_ip_uses_alternative_name() {
        let config = load(&[("TGHOOK_EXTERNAL_HOST", "203.0.113.5")]).unwrap();
        let endpoint = config.public_endpoint(None, "Url To Video").unwrap();
        assert_eq!(endpoint.host, "url-to-video.bot");
        assert_eq!(endpoint.ip_address, Some(Ipv4Addr::new(203, 0, 113, 5)));

        let config = load(&[
            ("TGHOOK_EXTERNAL_HOST", "203.0.113.5"),
            ("TGHOOK_ALTERNATIVE_NAME", "hook.example.com"),
        ])
        .unwrap();
        assert_eq!(
            config.public_endpoint(None, "Hook").unwrap().host,
            "hook.example.com"
        );
    }

    #[test]
    fn test_public_endpoint_from_discovery() {
        let config = load(&[]).unwrap();
        let endpoint = config
            .public_endpoint(Some(Ipv4Addr::new(198, 51, 100, 2)), "Hook")
            .unwrap();
        assert_eq!(endpoint.host, "hook.bot");
        assert_eq!(endpoint.ip_address, Some(Ipv4Addr::new(198, 51, 100, 2)));

        assert!(matches!(
            config.public_endpoint(None, "Hook"),
            Err(ConfigError::Missing(_))
        ));
    }

    #[test]
    fn test_alternative_name_requires_ip_host() {
        assert!(load(&[
            ("TGHOOK_EXTERNAL_HOST", "bot.example.com"),
            ("TGHOOK_ALTERNATIVE_NAME", "other.example.com"),
        ])
        .is_err());
        assert!(load(&[("TGHOOK_EXTERNAL_HOST", "2001:db8::1")]).is_err());
    }

    #[test]
    fn test_default_alternative_name() {
        assert_eq!(default_alternative_name("Hook"), "hook.bot");
        assert_eq!(default_alternative_name("  Bob's Bot! "), "bob-s-bot.bot");
        assert_eq!(default_alternative_name("🤖"), "telegram.bot");
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = load(&[("TGHOOK_SECRET_TOKEN", "s3cret")]).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("abc"));
        assert!(!debug.contains("s3cret"));
    }
}
