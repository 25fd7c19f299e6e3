use serde::{Deserialize, Serialize};

/// Machine-readable error codes shared by every kura crate.
///
/// Rendered in `--json` output and mapped to a process exit status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Installation preconditions
    AlreadyInstalled,
    ConflictingOptions,
    InvalidSubject,
    InvalidTokenOptions,
    InvalidExternalCa,
    RoleMismatch,
    SerialModeRejected,
    MissingCredentials,
    NoPeerAvailable,
    Aborted,
    // Renewal preconditions
    MissingCertificate,
    TokenUnavailable,
    LockHeld,
    // External collaborators
    DirectoryError,
    StoreError,
    SubsystemError,
    ReadinessTimeout,
    ReadinessFailed,
    IoError,
    Internal,
}

impl ErrorCode {
    /// Process exit status for this error.
    ///
    /// Every failure exits 1; the code itself travels in `--json` output.
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// Whether the failure was detected before kura changed anything.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInstalled
                | Self::ConflictingOptions
                | Self::InvalidSubject
                | Self::InvalidTokenOptions
                | Self::InvalidExternalCa
                | Self::RoleMismatch
                | Self::SerialModeRejected
                | Self::MissingCredentials
                | Self::NoPeerAvailable
                | Self::Aborted
                | Self::LockHeld
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_value(ErrorCode::AlreadyInstalled).unwrap(),
            "already_installed"
        );
        assert_eq!(
            serde_json::to_value(ErrorCode::MissingCertificate).unwrap(),
            "missing_certificate"
        );
        assert_eq!(
            serde_json::to_value(ErrorCode::ReadinessTimeout).unwrap(),
            "readiness_timeout"
        );
    }

    #[test]
    fn every_failure_exits_one() {
        for code in [
            ErrorCode::Aborted,
            ErrorCode::MissingCertificate,
            ErrorCode::ReadinessTimeout,
            ErrorCode::Internal,
        ] {
            assert_eq!(code.exit_code(), 1, "{code:?}");
        }
    }

    #[test]
    fn precondition_codes_are_distinguished_from_runtime_failures() {
        assert!(ErrorCode::ConflictingOptions.is_precondition());
        assert!(ErrorCode::Aborted.is_precondition());
        assert!(!ErrorCode::DirectoryError.is_precondition());
        assert!(!ErrorCode::MissingCertificate.is_precondition());
    }

    #[test]
    fn error_code_roundtrips_through_json() {
        let code = ErrorCode::SerialModeRejected;
        let json = serde_json::to_value(code).unwrap();
        assert_eq!(json, "serial_mode_rejected");
        let back: ErrorCode = serde_json::from_value(json).unwrap();
        assert_eq!(back, code);
    }
}
