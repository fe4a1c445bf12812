//! TLS identity presented by the webhook listener.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use time::OffsetDateTime;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::CertificateError;

/// Certificate chain plus the private key it was issued for.
///
/// Immutable once built. The private key never leaves this type except as
/// part of the rustls server configuration.
pub struct TlsIdentity {
    chain: Vec<CertificateDer<'static>>,
    certificate_pem: String,
    private_key: PrivateKeyDer<'static>,
    subject: String,
    alt_names: Vec<String>,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    self_signed: bool,
}

impl TlsIdentity {
    /// Parse and validate a PEM certificate chain and private key.
    ///
    /// The leaf must be inside its validity window and must carry the public
    /// half of `key_pem`.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, CertificateError> {
        let chain = CertificateDer::pem_slice_iter(cert_pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CertificateError::Parse(e.to_string()))?;
        let leaf = chain
            .first()
            .ok_or_else(|| CertificateError::Parse("no CERTIFICATE block found".to_string()))?;

        let private_key =
            PrivateKeyDer::from_pem_slice(key_pem).map_err(|e| CertificateError::Key(e.to_string()))?;

        let (_, x509) = X509Certificate::from_der(leaf.as_ref())
            .map_err(|e| CertificateError::Parse(e.to_string()))?;

        let not_before = to_datetime(x509.validity().not_before.timestamp())?;
        let not_after = to_datetime(x509.validity().not_after.timestamp())?;
        let now = OffsetDateTime::now_utc();
        if now > not_after {
            return Err(CertificateError::Expired {
                not_after: not_after.unix_timestamp(),
            });
        }
        if now < not_before {
            return Err(CertificateError::NotYetValid {
                not_before: not_before.unix_timestamp(),
            });
        }

        check_key_matches(&private_key, x509.public_key().raw)?;

        let subject = x509
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default()
            .to_string();
        let alt_names = alt_names(&x509);
        let self_signed = x509.subject().as_raw() == x509.issuer().as_raw();
        let certificate_pem = leaf_pem(cert_pem)?;

        Ok(Self {
            chain,
            certificate_pem,
            private_key,
            subject,
            alt_names,
            not_before,
            not_after,
            self_signed,
        })
    }

    /// Common name of the certificate subject.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// DNS names and IP addresses from the SubjectAltName extension.
    pub fn alt_names(&self) -> &[String] {
        &self.alt_names
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    /// Whether the platform must be given the certificate explicitly.
    pub fn is_self_signed(&self) -> bool {
        self.self_signed
    }

    /// Public leaf certificate, PEM encoded. Safe to hand out.
    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// Remaining validity at `now`, zero once expired.
    pub fn remaining(&self, now: OffsetDateTime) -> time::Duration {
        (self.not_after - now).max(time::Duration::ZERO)
    }

    /// rustls configuration serving this identity over HTTP/1.1.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>, CertificateError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(self.chain.clone(), self.private_key.clone_key())?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(Arc::new(config))
    }
}

impl fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsIdentity")
            .field("subject", &self.subject)
            .field("alt_names", &self.alt_names)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("self_signed", &self.self_signed)
            .field("chain_length", &self.chain.len())
            .finish_non_exhaustive()
    }
}

fn to_datetime(timestamp: i64) -> Result<OffsetDateTime, CertificateError> {
    OffsetDateTime::from_unix_timestamp(timestamp)
        .map_err(|e| CertificateError::Parse(format!("validity out of range: {e}")))
}

/// Compare the SubjectPublicKeyInfo derived from the key with the leaf's.
fn check_key_matches(key: &PrivateKeyDer<'_>, leaf_spki: &[u8]) -> Result<(), CertificateError> {
    let signing_key = rustls::crypto::ring::sign::any_supported_type(key)
        .map_err(|e| CertificateError::Key(e.to_string()))?;
    let spki = signing_key
        .public_key()
        .ok_or_else(|| CertificateError::Key("cannot derive public key".to_string()))?;

    if spki.as_ref() != leaf_spki {
        return Err(CertificateError::KeyMismatch);
    }
    Ok(())
}

fn alt_names(x509: &X509Certificate<'_>) -> Vec<String> {
    let Ok(Some(san)) = x509.subject_alternative_name() else {
        return Vec::new();
    };

    san.value
        .general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some(dns.to_string()),
            GeneralName::IPAddress(bytes) => match bytes.len() {
                4 => <[u8; 4]>::try_from(*bytes).ok().map(|b| IpAddr::from(b).to_string()),
                16 => <[u8; 16]>::try_from(*bytes).ok().map(|b| IpAddr::from(b).to_string()),
                _ => None,
            },
            _ => None,
        })
        .collect()
}

/// Re-encode the first certificate of a PEM bundle on its own.
fn leaf_pem(cert_pem: &[u8]) -> Result<String, CertificateError> {
    let text = std::str::from_utf8(cert_pem)
        .map_err(|_| CertificateError::Parse("certificate file is not UTF-8".to_string()))?;
    const END: &str = "-----END CERTIFICATE-----";
    let start = text
        .find("-----BEGIN CERTIFICATE-----")
        .ok_or_else(|| CertificateError::Parse("no CERTIFICATE block found".to_string()))?;
    let end = text[start..]
        .find(END)
        .map(|i| start + i + END.len())
        .ok_or_else(|| CertificateError::Parse("unterminated CERTIFICATE block".to_string()))?;
    Ok(format!("{}\n", &text[start..end]))
}
