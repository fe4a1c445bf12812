//! Public IPv4 discovery through the ipify API.
//!
//! Used when no external host is configured: the discovered address becomes
//! the webhook host and a SubjectAltName of the self-signed certificate.

use std::net::{IpAddr, Ipv4Addr};

use reqwest::Client;
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::error::ExternalIpError;

pub const IPIFY_URL: &str = "https://api.ipify.org/?format=json";

#[derive(Debug, Deserialize)]
struct IpifyResponse {
    ip: String,
}

/// Ask `url` for this host's public address.
pub async fn retrieve_external_ip(client: &Client, url: &Url) -> Result<Ipv4Addr, ExternalIpError> {
    let response = client.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ExternalIpError::Status(status));
    }

    let body = response.bytes().await?;
    let parsed: IpifyResponse =
        serde_json::from_slice(&body).map_err(|e| ExternalIpError::Malformed(e.to_string()))?;

    let ip = parsed
        .ip
        .trim()
        .parse::<IpAddr>()
        .map_err(|_| ExternalIpError::Malformed(format!("'{}' is not an address", parsed.ip)))?;

    match ip {
        IpAddr::V4(v4) => {
            info!(external_ip = %v4, "external_ip_discovered");
            Ok(v4)
        }
        IpAddr::V6(_) => Err(ExternalIpError::NotIpv4(ip)),
    }
}
