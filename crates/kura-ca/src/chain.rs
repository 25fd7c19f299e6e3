//! Ordering and validation of an externally signed CA chain.

use kura_truststore::cert::{verify_issued_by, CertInfo};

use crate::dn::Dn;
use crate::error::InstallError;

/// Order `certs` leaf → root and check the chain.
///
/// The leaf is the certificate whose subject is `ca_subject`; each
/// following certificate must have issued (name and signature) the one
/// before it, and the last one must be self-signed. Certificates that are
/// not part of the chain are ignored.
pub fn order_chain(certs: &[Vec<u8>], ca_subject: &Dn) -> Result<Vec<Vec<u8>>, InstallError> {
    let invalid = |reason: String| InstallError::InvalidExternalCa(reason);

    let mut parsed = Vec::with_capacity(certs.len());
    for der in certs {
        let info = CertInfo::parse(der).map_err(|e| invalid(e.to_string()))?;
        parsed.push((der, info));
    }
    if parsed.is_empty() {
        return Err(invalid("no certificates in the supplied files".to_string()));
    }

    let subject_matches = |info: &CertInfo| {
        Dn::from_certificate_subject(&info.subject)
            .map(|dn| dn == *ca_subject)
            .unwrap_or(false)
    };
    let leaves: Vec<usize> = (0..parsed.len())
        .filter(|&i| subject_matches(&parsed[i].1))
        .collect();
    let leaf = match leaves.as_slice() {
        [] => {
            return Err(invalid(format!(
                "no certificate with subject {ca_subject} in the supplied files"
            )))
        }
        [one] => *one,
        _ => {
            return Err(invalid(format!(
                "more than one certificate with subject {ca_subject}"
            )))
        }
    };

    let mut chain = vec![leaf];
    loop {
        let current = chain[chain.len() - 1];
        let (der, info) = &parsed[current];
        if info.is_self_signed() {
            let signed = verify_issued_by(der, der).map_err(|e| invalid(e.to_string()))?;
            if !signed {
                return Err(invalid(format!("{} has an invalid self-signature", info.subject)));
            }
            break;
        }
        if chain.len() >= parsed.len() {
            return Err(invalid(format!("chain from {} does not end at a root", info.subject)));
        }
        let Some(next) = (0..parsed.len())
            .find(|&i| !chain.contains(&i) && parsed[i].1.issued(info))
        else {
            return Err(invalid(format!(
                "issuer {} of {} not found in the supplied files",
                info.issuer, info.subject
            )));
        };
        let signed = verify_issued_by(der, parsed[next].0).map_err(|e| invalid(e.to_string()))?;
        if !signed {
            return Err(invalid(format!(
                "{} is not signed by {}",
                info.subject, parsed[next].1.subject
            )));
        }
        chain.push(next);
    }

    if chain.len() < parsed.len() {
        tracing::warn!(
            ignored = parsed.len() - chain.len(),
            "Ignoring certificates that are not part of the CA chain"
        );
    }
    Ok(chain.into_iter().map(|i| parsed[i].0.clone()).collect())
}
