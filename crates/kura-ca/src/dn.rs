//! Distinguished names for the certificate subject base and CA subject.
//!
//! Strings are LDAP order (most specific RDN first):
//! `CN=Certificate Authority,O=EXAMPLE.COM`.

use std::fmt;

/// Attributes permitted in a certificate subject base.
const SUBJECT_BASE_ATTRS: &[&str] = &[
    "st",
    "o",
    "ou",
    "dnqualifier",
    "c",
    "serialnumber",
    "l",
    "title",
    "sn",
    "givenname",
    "initials",
    "generationqualifier",
    "dc",
    "mail",
    "uid",
    "postaladdress",
    "postalcode",
    "postofficebox",
    "houseidentifier",
    "e",
    "street",
    "pseudonym",
    "incorporationlocality",
    "incorporationstate",
    "incorporationcountry",
    "businesscategory",
];

/// Common name of the CA when no subject is given.
pub const DEFAULT_CA_CN: &str = "Certificate Authority";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ava {
    pub attr: String,
    pub value: String,
}

/// One relative distinguished name; usually a single attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdn(pub Vec<Ava>);

#[derive(Debug, Clone)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DnError {
    #[error("empty distinguished name")]
    Empty,
    #[error("malformed component {0:?}")]
    Malformed(String),
    #[error("attribute {attr:?} is not allowed here")]
    AttributeNotAllowed { attr: String },
}

/// Which attribute set a DN is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    SubjectBase,
    CaSubject,
}

/// Split on `sep` where it is not backslash-escaped.
fn split_unescaped(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == sep {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}

impl Dn {
    pub fn parse(s: &str) -> Result<Self, DnError> {
        if s.trim().is_empty() {
            return Err(DnError::Empty);
        }
        let mut rdns = Vec::new();
        for component in split_unescaped(s, ',') {
            let mut avas = Vec::new();
            for ava in split_unescaped(component, '+') {
                let Some((attr, value)) = ava.split_once('=') else {
                    return Err(DnError::Malformed(ava.trim().to_string()));
                };
                let (attr, value) = (attr.trim(), value.trim());
                if attr.is_empty() || value.is_empty() {
                    return Err(DnError::Malformed(ava.trim().to_string()));
                }
                avas.push(Ava {
                    attr: attr.to_string(),
                    value: value.to_string(),
                });
            }
            rdns.push(Rdn(avas));
        }
        Ok(Self { rdns })
    }

    /// Parse a subject as rendered by `x509-parser` (`O=..., CN=...`,
    /// encoding order) into LDAP order.
    pub fn from_certificate_subject(s: &str) -> Result<Self, DnError> {
        let mut dn = Self::parse(s)?;
        dn.rdns.reverse();
        Ok(dn)
    }

    /// `O=<REALM>`.
    pub fn default_subject_base(realm: &str) -> Self {
        Self {
            rdns: vec![Rdn(vec![Ava {
                attr: "O".to_string(),
                value: realm.to_string(),
            }])],
        }
    }

    /// `CN=Certificate Authority,<subject base>`.
    pub fn default_ca_subject(subject_base: &Dn) -> Self {
        let mut rdns = vec![Rdn(vec![Ava {
            attr: "CN".to_string(),
            value: DEFAULT_CA_CN.to_string(),
        }])];
        rdns.extend(subject_base.rdns.iter().cloned());
        Self { rdns }
    }

    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// Reject attributes outside the set allowed for `kind`.
    pub fn check_attributes(&self, kind: SubjectKind) -> Result<(), DnError> {
        for ava in self.rdns.iter().flat_map(|rdn| rdn.0.iter()) {
            let attr = ava.attr.to_ascii_lowercase();
            let allowed = SUBJECT_BASE_ATTRS.contains(&attr.as_str())
                || (kind == SubjectKind::CaSubject && attr == "cn");
            if !allowed {
                return Err(DnError::AttributeNotAllowed {
                    attr: ava.attr.clone(),
                });
            }
        }
        Ok(())
    }
}

fn ava_eq(a: &Ava, b: &Ava) -> bool {
    let attr = |s: &str| match s.to_ascii_lowercase().as_str() {
        "emailaddress" | "e" => "mail".to_string(),
        other => other.to_string(),
    };
    attr(&a.attr) == attr(&b.attr) && a.value.eq_ignore_ascii_case(&b.value)
}

fn rdn_eq(a: &Rdn, b: &Rdn) -> bool {
    a.0.len() == b.0.len() && a.0.iter().all(|x| b.0.iter().any(|y| ava_eq(x, y)))
}

/// Attribute names and values compare case-insensitively.
impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.rdns.len() == other.rdns.len()
            && self.rdns.iter().zip(&other.rdns).all(|(a, b)| rdn_eq(a, b))
    }
}

impl Eq for Dn {}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            for (j, ava) in rdn.0.iter().enumerate() {
                if j > 0 {
                    f.write_str("+")?;
                }
                write!(f, "{}={}", ava.attr, ava.value)?;
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for Dn {
    type Err = DnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
