//! Local certificate and trust store access for kura.
//!
//! The CA subsystem keeps its signing keys and trust anchors in an NSS
//! database. kura reads and repairs that database during renewal and
//! refreshes the host-wide one after install.
//!
//! Backends:
//! - [`CertutilStore`]: drives `certutil` against an NSS database directory
//! - [`MemoryStore`]: in-process store for tests and dry runs

pub mod cert;
pub mod flags;
mod memory;
mod nss;

use std::path::PathBuf;

use serde::Serialize;

pub use flags::{ExtendedKeyUsage, TrustFlags, TrustFlagsError};
pub use memory::MemoryStore;
pub use nss::CertutilStore;

/// Token name NSS uses for its software key storage.
pub const INTERNAL_TOKEN: &str = "internal";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{tool} exit code {code}: {stderr}")]
    CommandFailed {
        tool: &'static str,
        code: i32,
        stderr: String,
    },
    #[error("invalid certificate: {0}")]
    Certificate(String),
    #[error("no certificate named {0:?}")]
    NotFound(String),
    #[error(transparent)]
    Flags(#[from] TrustFlagsError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One certificate as listed by a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrustRecord {
    pub nickname: String,
    pub serial: Option<String>,
    pub flags: TrustFlags,
}

/// Which key storage token an operation targets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenAccess {
    /// `None` is the internal software token.
    pub name: Option<String>,
    pub password_file: Option<PathBuf>,
}

impl TokenAccess {
    pub fn internal() -> Self {
        Self::default()
    }

    pub fn hardware(name: &str, password_file: PathBuf) -> Self {
        Self {
            name: Some(name.to_string()),
            password_file: Some(password_file),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.name.is_none()
    }
}

/// Whether a token name from the subsystem configuration refers to the
/// internal software token.
pub fn is_internal_token(name: &str) -> bool {
    let name = name.trim();
    name.is_empty()
        || name.eq_ignore_ascii_case(INTERNAL_TOKEN)
        || name.eq_ignore_ascii_case("Internal Key Storage Token")
}

/// Operations kura needs from a certificate store.
///
/// A nickname may hold several certificates (an old and a renewed one);
/// `delete` removes one of them per call.
pub trait CertStore {
    fn list(&self) -> Result<Vec<TrustRecord>, StoreError>;

    /// DER bytes of the certificate stored under `nickname`, if any.
    fn get(&self, nickname: &str, token: &TokenAccess) -> Result<Option<Vec<u8>>, StoreError>;

    /// Add `der` under `nickname`. Adding a certificate already stored
    /// under that nickname only updates its trust.
    fn add(&self, der: &[u8], nickname: &str, flags: &TrustFlags) -> Result<(), StoreError>;

    fn delete(&self, nickname: &str) -> Result<(), StoreError>;

    fn has_nickname(&self, nickname: &str) -> Result<bool, StoreError>;

    fn set_trust(
        &self,
        nickname: &str,
        flags: &TrustFlags,
        token: &TokenAccess,
    ) -> Result<(), StoreError>;

    /// Nicknames of the chain ending at `nickname`, root first.
    fn find_root_chain(&self, nickname: &str) -> Result<Vec<String>, StoreError>;
}

impl<S: CertStore + ?Sized> CertStore for &S {
    fn list(&self) -> Result<Vec<TrustRecord>, StoreError> {
        (**self).list()
    }
    fn get(&self, nickname: &str, token: &TokenAccess) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(nickname, token)
    }
    fn add(&self, der: &[u8], nickname: &str, flags: &TrustFlags) -> Result<(), StoreError> {
        (**self).add(der, nickname, flags)
    }
    fn delete(&self, nickname: &str) -> Result<(), StoreError> {
        (**self).delete(nickname)
    }
    fn has_nickname(&self, nickname: &str) -> Result<bool, StoreError> {
        (**self).has_nickname(nickname)
    }
    fn set_trust(
        &self,
        nickname: &str,
        flags: &TrustFlags,
        token: &TokenAccess,
    ) -> Result<(), StoreError> {
        (**self).set_trust(nickname, flags, token)
    }
    fn find_root_chain(&self, nickname: &str) -> Result<Vec<String>, StoreError> {
        (**self).find_root_chain(nickname)
    }
}
