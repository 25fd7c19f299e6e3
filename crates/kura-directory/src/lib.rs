//! Shared directory access for kura.
//!
//! The directory is the domain's authority for CA-level trust: which
//! hosts provide the CA role, the certificate subject base, and the set of
//! trust anchors every host must carry. kura reads those and, on the
//! renewal master, writes renewed certificates back.
//!
//! Connections are scoped: [`DirectoryConnector::connect`] hands out a
//! [`Session`] that disconnects when dropped, so error paths never leak
//! an authenticated connection.

mod ldap;
mod memory;

use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use kura_truststore::cert::CertInfo;
use kura_truststore::TrustFlags;

pub use ldap::{LdapDirectory, LdapSettings};
pub use memory::{MemoryDirectory, MemoryDirectoryState};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory connection failed: {0}")]
    Connect(String),
    #[error("directory operation failed: {0}")]
    Operation(String),
    #[error("directory entry not found: {0}")]
    NotFound(String),
    #[error("malformed directory data: {0}")]
    Invalid(String),
    #[error("directory session already closed")]
    Closed,
    #[error("certificate does not match the domain CA: {0}")]
    CaMismatch(String),
}

impl From<ldap3::LdapError> for DirectoryError {
    fn from(e: ldap3::LdapError) -> Self {
        DirectoryError::Operation(e.to_string())
    }
}

/// Domain-wide settings read from the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub realm: Option<String>,
    pub subject_base: Option<String>,
    pub ca_subject: Option<String>,
}

/// How a CA host stores certificate serial numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialBackend {
    /// Range-allocated sequential serials; cannot serve random serials.
    Legacy,
    /// Random serial number capable.
    Random,
}

/// A host currently providing the CA role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaServer {
    pub hostname: String,
    pub serial_backend: SerialBackend,
}

/// Whether a modify request changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifyOutcome {
    Modified,
    Unchanged,
}

/// A trust anchor record held by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryAnchor {
    pub nickname: String,
    pub cert_der: Vec<u8>,
    pub flags: TrustFlags,
    /// The domain's own CA certificate.
    pub domain_ca: bool,
}

/// A new value for the domain CA entry must be a re-issue of the
/// certificate already there: same subject, same public key.
pub(crate) fn check_same_ca(current: &[u8], renewed: &[u8]) -> Result<(), DirectoryError> {
    let parse = |der: &[u8]| CertInfo::parse(der).map_err(|e| DirectoryError::CaMismatch(e.to_string()));
    let (current, renewed) = (parse(current)?, parse(renewed)?);
    if !current.subject.eq_ignore_ascii_case(&renewed.subject) {
        return Err(DirectoryError::CaMismatch(format!(
            "subject {} differs from {}",
            renewed.subject, current.subject
        )));
    }
    if current.public_key_raw != renewed.public_key_raw {
        return Err(DirectoryError::CaMismatch(format!(
            "public key of {} differs",
            renewed.subject
        )));
    }
    Ok(())
}

/// One authenticated directory connection.
pub trait DirectoryConnection {
    fn config(&mut self) -> Result<DomainConfig, DirectoryError>;

    /// Hosts providing the CA role, sorted by hostname.
    fn ca_servers(&mut self) -> Result<Vec<CaServer>, DirectoryError>;

    fn renewal_master(&mut self) -> Result<Option<String>, DirectoryError>;

    /// Store `der` as the domain CA certificate.
    fn update_ca_cert(&mut self, der: &[u8]) -> Result<ModifyOutcome, DirectoryError>;

    fn trust_anchors(&mut self) -> Result<Vec<DirectoryAnchor>, DirectoryError>;

    fn update_person_cert(
        &mut self,
        uid: &str,
        der: &[u8],
        description: &str,
    ) -> Result<ModifyOutcome, DirectoryError>;

    /// Record the serial of the host authority's signing certificate.
    fn update_authority_serial(&mut self, serial: &str) -> Result<ModifyOutcome, DirectoryError>;

    fn disconnect(&mut self) -> Result<(), DirectoryError>;
}

pub trait DirectoryConnector {
    fn connect(&self) -> Result<Session<'_>, DirectoryError>;
}

impl<D: DirectoryConnector + ?Sized> DirectoryConnector for &D {
    fn connect(&self) -> Result<Session<'_>, DirectoryError> {
        (**self).connect()
    }
}

/// Scoped directory connection. Disconnects on drop unless
/// [`Session::close`] already did.
pub struct Session<'a> {
    conn: Option<Box<dyn DirectoryConnection + 'a>>,
}

impl<'a> Session<'a> {
    pub fn new(conn: Box<dyn DirectoryConnection + 'a>) -> Self {
        Self { conn: Some(conn) }
    }

    /// Disconnect now and report the outcome.
    pub fn close(mut self) -> Result<(), DirectoryError> {
        match self.conn.take() {
            Some(mut conn) => conn.disconnect(),
            None => Err(DirectoryError::Closed),
        }
    }
}

impl<'a> Deref for Session<'a> {
    type Target = dyn DirectoryConnection + 'a;

    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(conn) => conn.as_ref(),
            // `conn` is only taken by `close`, which consumes the session.
            None => unreachable!("directory session used after close"),
        }
    }
}

impl DerefMut for Session<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => conn.as_mut(),
            None => unreachable!("directory session used after close"),
        }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = conn.disconnect() {
                tracing::warn!(error = %e, "Directory disconnect failed");
            }
        }
    }
}
