//! Kura CA lifecycle: installation and renewal trust synchronisation.
//!
//! [`install::install`] brings up the CA subsystem on this host, either as
//! the domain's first CA or as a replica of an existing one.
//! [`renewal::renew`] runs after a CA certificate was renewed and repairs
//! everything that depends on it: the subsystem configuration, the
//! directory records and the local trust anchors.
//!
//! External collaborators sit behind traits so both flows run against
//! in-memory fakes in tests:
//! - [`subsystem::ServiceControl`], [`subsystem::SubsystemConfig`],
//!   [`subsystem::SubsystemInstaller`]
//! - [`kura_directory::DirectoryConnector`]
//! - [`kura_truststore::CertStore`]
//! - [`kura_readiness::ReadinessGate`]
//! - [`lock::NamedLock`]

pub mod chain;
pub mod csconfig;
pub mod dn;
pub mod error;
pub mod history;
pub mod install;
pub mod lock;
pub mod pkispawn;
pub mod renewal;
pub mod service;
pub mod subsystem;

pub use error::{InstallError, RenewalError, SubsystemError};
pub use install::{install, InstallContext, InstallOutcome, Operator};
pub use lock::{FileLock, HeldLock, LockError, MemoryLock, NamedLock, RENEWAL_LOCK_NAME};
pub use renewal::{prepare, renew, RenewalContext, RenewalEvent, RenewalReport};
