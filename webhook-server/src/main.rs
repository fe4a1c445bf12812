//! tghook - Telegram webhook server.
//!
//! This binary:
//! - Authenticates the bot token (`getMe`)
//! - Provisions a TLS identity (files or self-signed)
//! - Serves the update endpoint over HTTPS
//! - Registers the webhook and reports ready
//! - Deregisters the webhook on SIGINT/SIGTERM
//!
//! The bundled handler echoes text messages back to their chat.

use std::net::IpAddr;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tghook::external_ip::retrieve_external_ip;
use tghook::telegram::{BotApi, RegistrationClient, RegistrationOptions, Update};
use tghook::web::{self, router, AppState, Greeting};
use tghook::{tls, Config, Dispatcher, Outcome, WebhookReply};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("tghook_starting");

    // Load configuration
    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        bind_address = %config.bind_addr(),
        public_port = config.public_port(),
        external_host_configured = config.external_host.is_some(),
        certificate_files = config.cert_path.is_some(),
        secret_token_configured = config.secret_token.is_some(),
        allow_private_ranges = config.allow_private_ranges,
        max_body_bytes = config.max_body_bytes,
        "config_loaded"
    );

    let api = BotApi::new(
        config.api_url.clone(),
        config.bot_token.clone(),
        config.request_timeout(),
    )
    .context("Failed to create Bot API client")?;

    let bot = api
        .get_me()
        .await
        .context("Failed to authenticate bot with the Bot API")?;
    info!(
        bot_id = bot.id,
        first_name = %bot.first_name,
        username = ?bot.username,
        "bot_authenticated"
    );
    if !bot.is_bot {
        warn!(bot_id = bot.id, "bot_account_is_not_a_bot");
    }

    // Public endpoint: configured host, or the discovered IPv4
    let discovered = match config.external_host {
        Some(_) => None,
        None => {
            let client = reqwest::Client::builder()
                .timeout(config.request_timeout())
                .build()
                .context("Failed to create HTTP client")?;
            let ip = retrieve_external_ip(&client, &config.ipify_url)
                .await
                .context("Failed to discover the public IP address")?;
            Some(ip)
        }
    };
    let endpoint = config
        .public_endpoint(discovered, &bot.first_name)
        .context("Invalid public endpoint")?;

    let organization = format!("Telegram Bot: {}", bot.first_name);
    let source = config.certificate_source(
        &endpoint.host,
        &organization,
        endpoint.ip_address.map(IpAddr::V4),
    );
    let identity = tls::provision(&source).context("Failed to provision TLS certificate")?;

    // Start serving before registering: the platform may deliver right away
    let allowlist = config.allowlist()?;
    let state = AppState::new(
        config.clone(),
        allowlist,
        Dispatcher::new(echo),
        Greeting::new(&bot.first_name, bot.username.as_deref()),
    );
    let readiness = state.readiness.clone();

    let server = web::start(config.bind_addr(), &identity, router(state))
        .await
        .context("Failed to start HTTPS listener")?;

    let registrar = RegistrationClient::new(api, config.retry_policy());
    let options = RegistrationOptions {
        path: config.webhook_path(),
        ip_address: endpoint.ip_address,
        max_connections: config.max_connections,
        allowed_updates: config.allowed_updates.clone(),
        drop_pending_updates: config.drop_pending_updates,
        secret_token: config
            .secret_token
            .as_ref()
            .map(|s| s.expose().to_string()),
    };

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let registration = tokio::select! {
        result = registrar.register(&identity, &endpoint.host, config.public_port(), &options) => result,
        _ = &mut shutdown => {
            warn!("shutdown_during_registration");
            server.shutdown(config.shutdown_grace()).await?;
            return Ok(());
        }
    };

    if let Err(e) = registration {
        error!(error = %e, "startup_failed");
        if let Err(e) = server.shutdown(config.shutdown_grace()).await {
            error!(error = %e, "web_server_shutdown_failed");
        }
        return Err(e).context("Failed to register webhook");
    }

    readiness.mark_ready();
    info!(
        host = %endpoint.host,
        port = config.public_port(),
        "bot_server_ready"
    );

    shutdown.await;

    let stopped = server.shutdown(config.shutdown_grace()).await;

    if config.deregister_on_shutdown {
        if let Err(e) = registrar.deregister(false).await {
            error!(error = %e, "webhook_deregistration_failed");
        }
    }

    stopped.context("HTTPS listener failed")?;

    info!("tghook_shutdown_complete");

    Ok(())
}

/// Echo text messages back to their chat.
fn echo(update: Update) -> Outcome {
    let Some(message) = update.message() else {
        return Outcome::Done;
    };
    match &message.text {
        Some(text) => Outcome::Reply(WebhookReply::send_message(message.chat.id, text.clone())),
        None => Outcome::Done,
    }
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(signal = "SIGINT", "shutdown_signal_received"),
        _ = terminate => info!(signal = "SIGTERM", "shutdown_signal_received"),
    }
}
