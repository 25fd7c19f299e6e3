//! Certificate helpers shared by the store backends and their callers.

use base64::Engine;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::StoreError;

/// The fields kura reads out of a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    pub subject: String,
    pub issuer: String,
    pub subject_raw: Vec<u8>,
    pub issuer_raw: Vec<u8>,
    /// Decimal serial number.
    pub serial: String,
    /// DER of the SubjectPublicKeyInfo.
    pub public_key_raw: Vec<u8>,
}

impl CertInfo {
    pub fn parse(der: &[u8]) -> Result<Self, StoreError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| StoreError::Certificate(format!("cannot parse certificate: {e}")))?;
        Ok(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            subject_raw: cert.subject().as_raw().to_vec(),
            issuer_raw: cert.issuer().as_raw().to_vec(),
            serial: cert.serial.to_string(),
            public_key_raw: cert.public_key().raw.to_vec(),
        })
    }

    pub fn is_self_signed(&self) -> bool {
        self.subject_raw == self.issuer_raw
    }

    /// Whether `other` names this certificate as its issuer.
    pub fn issued(&self, other: &CertInfo) -> bool {
        self.subject_raw == other.issuer_raw
    }
}

/// Whether `issuer_der`'s key produced the signature on `der`.
pub fn verify_issued_by(der: &[u8], issuer_der: &[u8]) -> Result<bool, StoreError> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| StoreError::Certificate(format!("cannot parse certificate: {e}")))?;
    let (_, issuer) = X509Certificate::from_der(issuer_der)
        .map_err(|e| StoreError::Certificate(format!("cannot parse issuer: {e}")))?;
    Ok(cert.verify_signature(Some(issuer.public_key())).is_ok())
}

/// Every `CERTIFICATE` block in a PEM bundle, in file order.
pub fn pem_bundle_to_der(bundle: &str) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut remaining = bundle.as_bytes();

    loop {
        let start = remaining
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(remaining.len());
        remaining = &remaining[start..];
        if remaining.is_empty() {
            break;
        }
        match x509_parser::pem::parse_x509_pem(remaining) {
            Ok((next, pem)) => {
                if pem.label == "CERTIFICATE" {
                    out.push(pem.contents);
                }
                if next.len() >= remaining.len() {
                    break;
                }
                remaining = next;
            }
            Err(_) => break,
        }
    }
    out
}

pub fn der_to_pem(der: &[u8]) -> String {
    let body = base64::engine::general_purpose::STANDARD.encode(der);
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for line in body.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}
