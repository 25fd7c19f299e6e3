//! Trust flags and their NSS trust-string form.
//!
//! NSS keeps three trust fields per certificate, `SSL,S/MIME,code-signing`,
//! each a set of letters:
//!
//! | letter | meaning |
//! |---|---|
//! | `u` | a private key for this certificate is present |
//! | `c` | valid CA (not trusted as an anchor) |
//! | `C` | trusted CA for issuing server certs (SSL) or for the field's purpose |
//! | `T` | trusted CA for issuing client certs (SSL field only) |
//! | `P` | trusted peer |
//!
//! [`TrustFlags`] is the structured form kura works with.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const EKU_PREFIX: &str = "1.3.6.1.5.5.7.3.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtendedKeyUsage {
    ServerAuth,
    ClientAuth,
    CodeSigning,
    EmailProtection,
}

impl ExtendedKeyUsage {
    pub const ALL: [ExtendedKeyUsage; 4] = [
        Self::ServerAuth,
        Self::ClientAuth,
        Self::CodeSigning,
        Self::EmailProtection,
    ];

    pub fn oid(&self) -> &'static str {
        match self {
            Self::ServerAuth => "1.3.6.1.5.5.7.3.1",
            Self::ClientAuth => "1.3.6.1.5.5.7.3.2",
            Self::CodeSigning => "1.3.6.1.5.5.7.3.3",
            Self::EmailProtection => "1.3.6.1.5.5.7.3.4",
        }
    }

    /// `None` for OIDs outside the four usages NSS trust can express.
    pub fn from_oid(oid: &str) -> Option<Self> {
        match oid.trim().strip_prefix(EKU_PREFIX)? {
            "1" => Some(Self::ServerAuth),
            "2" => Some(Self::ClientAuth),
            "3" => Some(Self::CodeSigning),
            "4" => Some(Self::EmailProtection),
            _ => None,
        }
    }
}

/// Structured trust state of one certificate in a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustFlags {
    pub has_key: bool,
    pub trusted: bool,
    pub ca: bool,
    pub usages: BTreeSet<ExtendedKeyUsage>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TrustFlagsError {
    #[error("trust string {0:?} must have three comma-separated fields")]
    FieldCount(String),
    #[error("unknown trust letter {letter:?} in {flags:?}")]
    UnknownLetter { letter: char, flags: String },
}

impl TrustFlags {
    /// The domain's own CA, and every anchor imported from the directory
    /// with default trust: `CT,C,C`.
    pub fn domain_ca() -> Self {
        Self {
            has_key: false,
            trusted: true,
            ca: true,
            usages: ExtendedKeyUsage::ALL.into_iter().collect(),
        }
    }

    /// Audit signing certificate held by the subsystem: `u,u,Pu`.
    pub fn audit_signing() -> Self {
        Self {
            has_key: true,
            trusted: true,
            ca: false,
            usages: BTreeSet::from([ExtendedKeyUsage::CodeSigning]),
        }
    }

    /// Same flags, additionally trusted for server authentication.
    pub fn with_server_auth(mut self) -> Self {
        self.trusted = true;
        self.usages.insert(ExtendedKeyUsage::ServerAuth);
        self
    }

    /// Render as an NSS trust string, e.g. `CT,C,C`.
    pub fn to_nss(&self) -> String {
        let mut ssl = String::new();
        let mut email = String::new();
        let mut sign = String::new();
        let has = |usage| self.usages.contains(&usage);

        if self.ca {
            if self.trusted {
                if has(ExtendedKeyUsage::ServerAuth) {
                    ssl.push('C');
                }
                if has(ExtendedKeyUsage::ClientAuth) {
                    ssl.push('T');
                }
                if has(ExtendedKeyUsage::EmailProtection) {
                    email.push('C');
                }
                if has(ExtendedKeyUsage::CodeSigning) {
                    sign.push('C');
                }
            } else {
                ssl.push('c');
                email.push('c');
                sign.push('c');
            }
        } else if self.trusted {
            if has(ExtendedKeyUsage::ServerAuth) {
                ssl.push('P');
            }
            if has(ExtendedKeyUsage::EmailProtection) {
                email.push('P');
            }
            if has(ExtendedKeyUsage::CodeSigning) {
                sign.push('P');
            }
        }

        if self.has_key {
            ssl.push('u');
            email.push('u');
            sign.push('u');
        }
        format!("{ssl},{email},{sign}")
    }

    /// Parse an NSS trust string. Letters that carry no meaning for kura
    /// (`p`, `w`, `I`, ...) are accepted and ignored.
    pub fn from_nss(flags: &str) -> Result<Self, TrustFlagsError> {
        let fields: Vec<&str> = flags.trim().split(',').collect();
        let [ssl, email, sign] = fields.as_slice() else {
            return Err(TrustFlagsError::FieldCount(flags.to_string()));
        };

        let mut parsed = Self::default();
        for (field, purpose) in [
            (ssl, None),
            (email, Some(ExtendedKeyUsage::EmailProtection)),
            (sign, Some(ExtendedKeyUsage::CodeSigning)),
        ] {
            for letter in field.chars() {
                match letter {
                    'u' => parsed.has_key = true,
                    'c' => parsed.ca = true,
                    'C' => {
                        parsed.ca = true;
                        parsed.trusted = true;
                        parsed.usages.insert(purpose.unwrap_or(ExtendedKeyUsage::ServerAuth));
                    }
                    'T' => {
                        parsed.ca = true;
                        parsed.trusted = true;
                        parsed.usages.insert(purpose.unwrap_or(ExtendedKeyUsage::ClientAuth));
                    }
                    'P' => {
                        parsed.trusted = true;
                        parsed.usages.insert(purpose.unwrap_or(ExtendedKeyUsage::ServerAuth));
                    }
                    'p' | 'w' | 'g' | 'I' | 'i' => {}
                    other => {
                        return Err(TrustFlagsError::UnknownLetter {
                            letter: other,
                            flags: flags.to_string(),
                        })
                    }
                }
            }
        }
        Ok(parsed)
    }
}

impl fmt::Display for TrustFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_nss())
    }
}

impl FromStr for TrustFlags {
    type Err = TrustFlagsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_nss(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_render_as_nss_strings() {
        assert_eq!(TrustFlags::domain_ca().to_nss(), "CT,C,C");
        assert_eq!(TrustFlags::audit_signing().to_nss(), "u,u,Pu");
        assert_eq!(TrustFlags::default().to_nss(), ",,");
    }

    #[test]
    fn certutil_listing_strings_parse() {
        let signing = TrustFlags::from_nss("CTu,Cu,Cu").unwrap();
        assert!(signing.has_key && signing.ca && signing.trusted);
        assert_eq!(signing.usages.len(), 4);

        let audit = TrustFlags::from_nss("u,u,Pu").unwrap();
        assert_eq!(audit, TrustFlags::audit_signing());

        let server = TrustFlags::from_nss("u,u,u").unwrap();
        assert!(server.has_key && !server.trusted && !server.ca);
    }

    #[test]
    fn untrusted_ca_keeps_ca_bit() {
        let flags = TrustFlags::from_nss("c,c,c").unwrap();
        assert!(flags.ca && !flags.trusted);
        assert_eq!(flags.to_nss(), "c,c,c");
    }

    #[test]
    fn server_auth_is_added_to_a_restricted_anchor() {
        let restricted = TrustFlags::from_nss(",C,").unwrap();
        assert_eq!(
            restricted.usages,
            BTreeSet::from([ExtendedKeyUsage::EmailProtection])
        );
        assert_eq!(restricted.with_server_auth().to_nss(), "C,C,");
    }

    #[test]
    fn malformed_strings_are_rejected() {
        assert_eq!(
            TrustFlags::from_nss("CT,C"),
            Err(TrustFlagsError::FieldCount("CT,C".to_string()))
        );
        assert!(matches!(
            TrustFlags::from_nss("CX,C,C"),
            Err(TrustFlagsError::UnknownLetter { letter: 'X', .. })
        ));
    }

    #[test]
    fn eku_oids_convert_both_ways() {
        for usage in ExtendedKeyUsage::ALL {
            assert_eq!(ExtendedKeyUsage::from_oid(usage.oid()), Some(usage));
        }
        assert_eq!(ExtendedKeyUsage::from_oid("1.3.6.1.5.5.7.3.9"), None);
        assert_eq!(ExtendedKeyUsage::from_oid("2.5.29.37.0"), None);
    }
}
