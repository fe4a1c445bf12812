//! Where the TLS identity comes from: operator-supplied files or a freshly
//! generated self-signed certificate, optionally cached on disk.

use std::fs;
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use rand::Rng;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose, SerialNumber,
};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::error::CertificateError;

use super::identity::TlsIdentity;

pub const DEFAULT_VALIDITY_DAYS: u32 = 365;
pub const DEFAULT_MIN_REMAINING_DAYS: u32 = 7;

const CACHED_CERT: &str = "cert.pem";
const CACHED_KEY: &str = "key.pem";

/// Parameters for a generated self-signed certificate.
#[derive(Debug, Clone, PartialEq)]
pub struct SelfSignedRequest {
    /// Host name or IP address the platform connects to.
    pub common_name: String,
    pub organization: String,
    /// Extra IP SubjectAltName, usually the discovered public address.
    pub ip_address: Option<IpAddr>,
    pub validity_days: u32,
    /// Directory holding `cert.pem` and `key.pem` across restarts.
    pub cache_dir: Option<PathBuf>,
    /// A cached certificate closer to expiry than this is regenerated.
    pub min_remaining_days: u32,
}

impl SelfSignedRequest {
    pub fn new(common_name: impl Into<String>, organization: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            organization: organization.into(),
            ip_address: None,
            validity_days: DEFAULT_VALIDITY_DAYS,
            cache_dir: None,
            min_remaining_days: DEFAULT_MIN_REMAINING_DAYS,
        }
    }

    /// Every name the certificate must cover.
    fn alt_names(&self) -> Vec<String> {
        let mut names = vec![self.common_name.clone()];
        if let Some(ip) = self.ip_address {
            let ip = ip.to_string();
            if !names.contains(&ip) {
                names.push(ip);
            }
        }
        names
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CertificateSource {
    Files { cert_path: PathBuf, key_path: PathBuf },
    SelfSigned(SelfSignedRequest),
}

/// Produce the identity described by `source`.
pub fn provision(source: &CertificateSource) -> Result<TlsIdentity, CertificateError> {
    let identity = match source {
        CertificateSource::Files {
            cert_path,
            key_path,
        } => load_files(cert_path, key_path)?,
        CertificateSource::SelfSigned(request) => match &request.cache_dir {
            Some(dir) => match load_cached(dir, request) {
                Some(identity) => identity,
                None => {
                    let (identity, key_pem) = generate_self_signed(request)?;
                    write_cache(dir, identity.certificate_pem(), &key_pem)?;
                    identity
                }
            },
            None => generate_self_signed(request)?.0,
        },
    };

    info!(
        subject = %identity.subject(),
        alt_names = ?identity.alt_names(),
        self_signed = identity.is_self_signed(),
        not_after = %identity.not_after(),
        "certificate_ready"
    );

    Ok(identity)
}

/// Load and validate a PEM certificate chain and private key.
pub fn load_files(cert_path: &Path, key_path: &Path) -> Result<TlsIdentity, CertificateError> {
    let cert_pem = read(cert_path)?;
    if cert_pem.iter().all(u8::is_ascii_whitespace) {
        return Err(CertificateError::Empty(cert_path.to_path_buf()));
    }
    let key_pem = read(key_path)?;

    TlsIdentity::from_pem(&cert_pem, &key_pem)
}

/// Generate a fresh key pair and self-signed certificate.
///
/// Returns the identity and the private key PEM, which the caller may
/// persist.
pub fn generate_self_signed(
    request: &SelfSignedRequest,
) -> Result<(TlsIdentity, String), CertificateError> {
    let key_pair = KeyPair::generate()?;

    let mut params = CertificateParams::new(request.alt_names())?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, request.organization.as_str());
    dn.push(DnType::CommonName, request.common_name.as_str());
    params.distinguished_name = dn;

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(i64::from(request.validity_days));
    params.serial_number = Some(random_serial());
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let certificate = params.self_signed(&key_pair)?;
    let key_pem = key_pair.serialize_pem();
    let identity = TlsIdentity::from_pem(certificate.pem().as_bytes(), key_pem.as_bytes())?;

    Ok((identity, key_pem))
}

/// Positive 16-byte serial: the high bit is cleared so the DER integer
/// never reads as negative.
fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes[..]);
    bytes[0] &= 0x7f;
    bytes[0] |= 0x01;
    SerialNumber::from(bytes.to_vec())
}

fn load_cached(dir: &Path, request: &SelfSignedRequest) -> Option<TlsIdentity> {
    let cert_path = dir.join(CACHED_CERT);
    let key_path = dir.join(CACHED_KEY);
    if !cert_path.exists() || !key_path.exists() {
        return None;
    }

    let identity = match load_files(&cert_path, &key_path) {
        Ok(identity) => identity,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "certificate_cache_invalid");
            return None;
        }
    };

    let min_remaining = time::Duration::days(i64::from(request.min_remaining_days));
    let covers_names = request
        .alt_names()
        .iter()
        .all(|name| identity.alt_names().contains(name));

    if identity.subject() != request.common_name || !covers_names || !identity.is_self_signed() {
        info!(dir = %dir.display(), "certificate_cache_stale");
        return None;
    }
    if identity.remaining(OffsetDateTime::now_utc()) < min_remaining {
        info!(
            dir = %dir.display(),
            not_after = %identity.not_after(),
            "certificate_cache_expiring"
        );
        return None;
    }

    info!(dir = %dir.display(), "certificate_cache_hit");
    Some(identity)
}

fn write_cache(dir: &Path, cert_pem: &str, key_pem: &str) -> Result<(), CertificateError> {
    fs::create_dir_all(dir).map_err(|source| CertificateError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let cert_path = dir.join(CACHED_CERT);
    fs::write(&cert_path, cert_pem).map_err(|source| CertificateError::Io {
        path: cert_path,
        source,
    })?;

    let key_path = dir.join(CACHED_KEY);
    write_private(&key_path, key_pem.as_bytes()).map_err(|source| CertificateError::Io {
        path: key_path,
        source,
    })?;

    info!(dir = %dir.display(), "certificate_cache_written");
    Ok(())
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies when the file is created
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(contents)
}

fn read(path: &Path) -> Result<Vec<u8>, CertificateError> {
    fs::read(path).map_err(|source| CertificateError::Io {
        path: path.to_path_buf(),
        source,
    })
}
