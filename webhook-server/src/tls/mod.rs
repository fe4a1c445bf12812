//! Certificate provisioning for the HTTPS listener.

mod identity;
mod provider;

pub use identity::TlsIdentity;
pub use provider::{
    generate_self_signed, load_files, provision, CertificateSource, SelfSignedRequest,
    DEFAULT_MIN_REMAINING_DAYS, DEFAULT_VALIDITY_DAYS,
};
