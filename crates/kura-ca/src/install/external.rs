//! External-CA support: the `ms-cs` certificate template extension and
//! loading of the signed chain for the second pass.

use std::fmt;
use std::path::PathBuf;

use kura_truststore::cert::{pem_bundle_to_der, CertInfo};

use crate::chain::order_chain;
use crate::dn::Dn;
use crate::error::InstallError;

/// Template requested when `ms-cs` is used without a profile.
pub const DEFAULT_MSCS_TEMPLATE: &str = "SubCA";

/// Certificate Template Name (V1).
pub const TEMPLATE_NAME_OID: &str = "1.3.6.1.4.1.311.20.2";
/// Certificate Template (V2).
pub const TEMPLATE_OID: &str = "1.3.6.1.4.1.311.21.7";

/// Certificate template for an Active Directory Certificate Services CA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsCsTemplate {
    /// `SubCA`
    Name(String),
    /// `1.3.6.1.4.1.311.21.8.1.2:100[:0]`
    Versioned {
        oid: Vec<u64>,
        major: u32,
        minor: Option<u32>,
    },
}

fn parse_oid(s: &str) -> Option<Vec<u64>> {
    let arcs: Vec<u64> = s
        .split('.')
        .map(|arc| arc.parse().ok())
        .collect::<Option<_>>()?;
    let valid = arcs.len() >= 2 && arcs[0] <= 2 && (arcs[0] == 2 || arcs[1] < 40);
    valid.then_some(arcs)
}

impl MsCsTemplate {
    pub fn parse(profile: &str) -> Result<Self, InstallError> {
        let invalid = |reason: &str| {
            InstallError::InvalidExternalCa(format!("external CA profile {profile:?}: {reason}"))
        };
        let profile_trimmed = profile.trim();
        if profile_trimmed.is_empty() {
            return Err(invalid("empty"));
        }
        if !profile_trimmed.contains(':') {
            return Ok(Self::Name(profile_trimmed.to_string()));
        }

        let mut parts = profile_trimmed.split(':');
        let oid = parts
            .next()
            .and_then(parse_oid)
            .ok_or_else(|| invalid("template OID is not a dotted object identifier"))?;
        let major = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| invalid("major version must be a number"))?;
        let minor = match parts.next() {
            None => None,
            Some(v) => Some(v.parse().map_err(|_| invalid("minor version must be a number"))?),
        };
        if parts.next().is_some() {
            return Err(invalid("expected <oid>:<major>[:<minor>]"));
        }
        Ok(Self::Versioned { oid, major, minor })
    }

    /// Extension OID carrying this template.
    pub fn oid(&self) -> &'static str {
        match self {
            Self::Name(_) => TEMPLATE_NAME_OID,
            Self::Versioned { .. } => TEMPLATE_OID,
        }
    }

    /// DER extension value.
    pub fn to_der(&self) -> Vec<u8> {
        match self {
            Self::Name(name) => {
                let utf16: Vec<u8> = name.encode_utf16().flat_map(u16::to_be_bytes).collect();
                tlv(0x1e, &utf16)
            }
            Self::Versioned { oid, major, minor } => {
                let mut body = tlv(0x06, &encode_oid(oid));
                body.extend(tlv(0x02, &encode_integer(*major)));
                if let Some(minor) = minor {
                    body.extend(tlv(0x02, &encode_integer(*minor)));
                }
                tlv(0x30, &body)
            }
        }
    }
}

impl fmt::Display for MsCsTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Versioned { oid, major, minor } => {
                let oid: Vec<String> = oid.iter().map(u64::to_string).collect();
                write!(f, "{}:{major}", oid.join("."))?;
                if let Some(minor) = minor {
                    write!(f, ":{minor}")?;
                }
                Ok(())
            }
        }
    }
}

fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = value.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes: Vec<u8> = len
            .to_be_bytes()
            .into_iter()
            .skip_while(|b| *b == 0)
            .collect();
        out.push(0x80 | bytes.len() as u8);
        out.extend(bytes);
    }
    out.extend_from_slice(value);
    out
}

fn encode_base128(mut value: u64, out: &mut Vec<u8>) {
    let mut chunk = vec![(value & 0x7f) as u8];
    value >>= 7;
    while value > 0 {
        chunk.push(0x80 | (value & 0x7f) as u8);
        value >>= 7;
    }
    chunk.reverse();
    out.extend(chunk);
}

fn encode_oid(arcs: &[u64]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_base128(arcs[0] * 40 + arcs[1], &mut out);
    for arc in &arcs[2..] {
        encode_base128(*arc, &mut out);
    }
    out
}

fn encode_integer(value: u32) -> Vec<u8> {
    let mut bytes: Vec<u8> = value
        .to_be_bytes()
        .into_iter()
        .skip_while(|b| *b == 0)
        .collect();
    if bytes.first().map_or(true, |b| b & 0x80 != 0) {
        bytes.insert(0, 0);
    }
    bytes
}

/// Read the second-pass certificate files and order them leaf → root.
///
/// Files may be PEM bundles or a single DER certificate.
pub fn load_chain(files: &[PathBuf], ca_subject: &Dn) -> Result<Vec<Vec<u8>>, InstallError> {
    let mut certs = Vec::new();
    for path in files {
        let raw = std::fs::read(path).map_err(|e| {
            InstallError::InvalidExternalCa(format!("cannot read {}: {e}", path.display()))
        })?;
        let pem = String::from_utf8_lossy(&raw);
        let found = pem_bundle_to_der(&pem);
        if !found.is_empty() {
            tracing::debug!(path = %path.display(), count = found.len(), "Loaded PEM certificates");
            certs.extend(found);
        } else if CertInfo::parse(&raw).is_ok() {
            certs.push(raw);
        } else {
            return Err(InstallError::InvalidExternalCa(format!(
                "{} holds no certificates",
                path.display()
            )));
        }
    }
    order_chain(&certs, ca_subject)
}
