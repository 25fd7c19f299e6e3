//! Orchestrator error types.

use kura_common::error::ErrorCode;
use kura_directory::DirectoryError;
use kura_readiness::ReadinessError;
use kura_truststore::StoreError;

use crate::lock::LockError;

/// Failures of the external subsystem tooling (installer, service
/// manager, configuration files).
#[derive(Debug, thiserror::Error)]
pub enum SubsystemError {
    #[error("{program} exit code {code}: {stderr}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("cannot read {path}: {reason}")]
    Config { path: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("CA is already installed on this host")]
    AlreadyInstalled,

    #[error("conflicting options: {0}")]
    ConflictingOptions(String),

    #[error("invalid {field}: {reason}")]
    InvalidSubject { field: &'static str, reason: String },

    #[error("invalid token options: {0}")]
    InvalidTokenOptions(String),

    #[error("invalid external CA: {0}")]
    InvalidExternalCa(String),

    #[error("{0}")]
    RoleMismatch(String),

    #[error("random serial numbers rejected: {0}")]
    SerialModeRejected(String),

    #[error("administrator password is required to join an existing CA")]
    MissingCredentials,

    #[error("no CA host available to replicate from")]
    NoPeerAvailable,

    #[error("Installation aborted")]
    Aborted,

    #[error("directory: {0}")]
    Directory(#[from] DirectoryError),

    #[error("trust store: {0}")]
    Store(#[from] StoreError),

    #[error("subsystem: {0}")]
    Subsystem(#[from] SubsystemError),

    #[error("subsystem did not become ready: {0}")]
    Readiness(#[from] ReadinessError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The fatal renewal preconditions. Everything else during a renewal is
/// best-effort and reported through the `RenewalReport`.
#[derive(Debug, thiserror::Error)]
pub enum RenewalError {
    #[error("renewed certificate {0:?} not found in the store")]
    MissingCertificate(String),

    #[error("token {token:?} is not available: {reason}")]
    TokenUnavailable { token: String, reason: String },

    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Error code for a readiness failure outside an install.
pub fn readiness_code(e: &ReadinessError) -> ErrorCode {
    match e {
        ReadinessError::Timeout { .. } => ErrorCode::ReadinessTimeout,
        ReadinessError::Failed(_) => ErrorCode::ReadinessFailed,
        ReadinessError::Client(_) => ErrorCode::Internal,
    }
}

impl From<&InstallError> for ErrorCode {
    fn from(e: &InstallError) -> Self {
        match e {
            InstallError::AlreadyInstalled => ErrorCode::AlreadyInstalled,
            InstallError::ConflictingOptions(_) => ErrorCode::ConflictingOptions,
            InstallError::InvalidSubject { .. } => ErrorCode::InvalidSubject,
            InstallError::InvalidTokenOptions(_) => ErrorCode::InvalidTokenOptions,
            InstallError::InvalidExternalCa(_) => ErrorCode::InvalidExternalCa,
            InstallError::RoleMismatch(_) => ErrorCode::RoleMismatch,
            InstallError::SerialModeRejected(_) => ErrorCode::SerialModeRejected,
            InstallError::MissingCredentials => ErrorCode::MissingCredentials,
            InstallError::NoPeerAvailable => ErrorCode::NoPeerAvailable,
            InstallError::Aborted => ErrorCode::Aborted,
            InstallError::Directory(_) => ErrorCode::DirectoryError,
            InstallError::Store(_) => ErrorCode::StoreError,
            InstallError::Subsystem(_) => ErrorCode::SubsystemError,
            InstallError::Readiness(e) => readiness_code(e),
            InstallError::Io(_) => ErrorCode::IoError,
        }
    }
}

impl From<&RenewalError> for ErrorCode {
    fn from(e: &RenewalError) -> Self {
        match e {
            RenewalError::MissingCertificate(_) => ErrorCode::MissingCertificate,
            RenewalError::TokenUnavailable { .. } => ErrorCode::TokenUnavailable,
            RenewalError::Lock(LockError::Held { .. }) => ErrorCode::LockHeld,
            RenewalError::Lock(_) => ErrorCode::IoError,
        }
    }
}
