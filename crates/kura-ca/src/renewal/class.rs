use std::fmt;

use serde::Serialize;

/// A certificate the renewal daemon has just saved into the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalEvent {
    pub nickname: String,
}

impl RenewalEvent {
    pub fn new(nickname: &str) -> Self {
        Self {
            nickname: nickname.to_string(),
        }
    }

    pub fn class(&self) -> CertClass {
        CertClass::of(&self.nickname)
    }
}

/// How much trust work a renewed certificate needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CertClass {
    Ordinary,
    AuditSigning,
    CaSigning,
}

impl CertClass {
    /// Only the instance's own certificates are special. Lightweight
    /// sub-CA certificates carry a suffixed nickname and stay ordinary.
    pub fn of(nickname: &str) -> Self {
        match nickname {
            "caSigningCert cert-pki-ca" => Self::CaSigning,
            "auditSigningCert cert-pki-ca" => Self::AuditSigning,
            _ => Self::Ordinary,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ordinary => "ordinary",
            Self::AuditSigning => "audit_signing",
            Self::CaSigning => "ca_signing",
        }
    }
}

impl fmt::Display for CertClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_from_nickname() {
        assert_eq!(CertClass::of("caSigningCert cert-pki-ca"), CertClass::CaSigning);
        assert_eq!(CertClass::of("auditSigningCert cert-pki-ca"), CertClass::AuditSigning);
        assert_eq!(CertClass::of("subsystemCert cert-pki-ca"), CertClass::Ordinary);
        assert_eq!(CertClass::of("webCert"), CertClass::Ordinary);
        assert_eq!(CertClass::of(""), CertClass::Ordinary);
        assert_eq!(RenewalEvent::new("caSigningCertX").class(), CertClass::Ordinary);
    }

    #[test]
    fn sub_ca_signing_cert_is_ordinary() {
        let event = RenewalEvent::new("caSigningCert cert-pki-ca 5d6c3a1e-0b7f-4c55-9b0e-2f1a8c9d4e21");
        assert_eq!(event.class(), CertClass::Ordinary);
        assert_eq!(CertClass::of("auditSigningCert cert-pki-ca extra"), CertClass::Ordinary);
        assert_eq!(CertClass::of("caSigningCert"), CertClass::Ordinary);
    }
}
