//! LDAP-backed directory.
//!
//! Entries read and written, relative to the domain suffix:
//!
//! ```text
//! cn=ipaConfig,cn=etc                      ipaCertificateSubjectBase
//! cn=<REALM>,cn=kerberos                   realm container
//! cn=ipa,cn=cas,cn=ca                      ipaCaSubjectDN
//! cn=CA,cn=<host>,cn=masters,cn=ipa,cn=etc ipaConfigString: enabledService,
//!                                          caRenewalMaster, RSNv3
//! cn=<nickname>,cn=certificates,cn=ipa,cn=etc
//!                                          cACertificate;binary, ipaKeyTrust,
//!                                          ipaKeyExtUsage, ipaConfigString: ipaCA
//! uid=<uid>,ou=people,o=ipaca              userCertificate;binary, description
//! ou=authorities,ou=ca,o=ipaca             authoritySerial
//! ```

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use ldap3::{LdapConn, LdapConnSettings, Mod, Scope, SearchEntry, SearchResult};
use zeroize::Zeroizing;

use kura_truststore::{ExtendedKeyUsage, TrustFlags};

use crate::{
    check_same_ca, CaServer, DirectoryAnchor, DirectoryConnection, DirectoryConnector,
    DirectoryError, DomainConfig, ModifyOutcome, SerialBackend, Session,
};

const RC_NO_SUCH_OBJECT: u32 = 32;
const CA_SUBTREE: &str = "o=ipaca";

/// How to reach and authenticate to the directory.
#[derive(Debug, Clone)]
pub struct LdapSettings {
    pub uri: String,
    pub base_dn: String,
    /// `None` binds with SASL EXTERNAL.
    pub bind_dn: Option<String>,
    pub password_file: Option<PathBuf>,
    pub timeout: Duration,
}

pub struct LdapDirectory {
    settings: LdapSettings,
}

impl LdapDirectory {
    pub fn new(settings: LdapSettings) -> Self {
        Self { settings }
    }

    fn password(&self) -> Result<Zeroizing<String>, DirectoryError> {
        let Some(path) = &self.settings.password_file else {
            return Err(DirectoryError::Connect(
                "simple bind requires a password file".to_string(),
            ));
        };
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DirectoryError::Connect(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(Zeroizing::new(raw.trim_end_matches(['\r', '\n']).to_string()))
    }
}

impl DirectoryConnector for LdapDirectory {
    fn connect(&self) -> Result<Session<'_>, DirectoryError> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.settings.timeout);
        let mut conn = LdapConn::with_settings(settings, &self.settings.uri)
            .map_err(|e| DirectoryError::Connect(format!("{}: {e}", self.settings.uri)))?;

        let bind = match &self.settings.bind_dn {
            Some(dn) => {
                let password = self.password()?;
                conn.simple_bind(dn, &password)
            }
            None => conn.sasl_external_bind(),
        };
        bind.and_then(|result| result.success())
            .map_err(|e| DirectoryError::Connect(format!("bind failed: {e}")))?;

        tracing::debug!(uri = %self.settings.uri, "Directory connected");
        Ok(Session::new(Box::new(LdapSession {
            conn: Some(conn),
            base_dn: self.settings.base_dn.clone(),
            timeout: self.settings.timeout,
        })))
    }
}

struct LdapSession {
    conn: Option<LdapConn>,
    base_dn: String,
    timeout: Duration,
}

impl LdapSession {
    fn conn(&mut self) -> Result<&mut LdapConn, DirectoryError> {
        let timeout = self.timeout;
        let conn = self.conn.as_mut().ok_or(DirectoryError::Closed)?;
        Ok(conn.with_timeout(timeout))
    }

    fn dn(&self, rdns: &str) -> String {
        format!("{rdns},{}", self.base_dn)
    }

    /// Search, treating a missing base entry as an empty result.
    fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: Vec<&str>,
    ) -> Result<Vec<SearchEntry>, DirectoryError> {
        let SearchResult(entries, result) = self.conn()?.search(base, scope, filter, attrs)?;
        if result.rc == RC_NO_SUCH_OBJECT {
            return Ok(Vec::new());
        }
        result.success()?;
        Ok(entries.into_iter().map(SearchEntry::construct).collect())
    }

    fn read(&mut self, dn: &str, attrs: Vec<&str>) -> Result<Option<SearchEntry>, DirectoryError> {
        Ok(self
            .search(dn, Scope::Base, "(objectClass=*)", attrs)?
            .into_iter()
            .next())
    }

    fn replace(&mut self, dn: &str, mods: Vec<Mod<Vec<u8>>>) -> Result<(), DirectoryError> {
        self.conn()?.modify(dn, mods)?.success()?;
        Ok(())
    }
}

fn text_values<'e>(entry: &'e SearchEntry, attr: &str) -> Vec<&'e str> {
    entry
        .attrs
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case(attr))
        .flat_map(|(_, v)| v.iter().map(String::as_str))
        .collect()
}

fn first_text(entry: &SearchEntry, attr: &str) -> Option<String> {
    text_values(entry, attr).first().map(|s| s.to_string())
}

/// Binary values land in `bin_attrs` unless they happen to be valid UTF-8.
fn binary_values(entry: &SearchEntry, attr: &str) -> Vec<Vec<u8>> {
    let matches = |k: &String| {
        k.eq_ignore_ascii_case(attr)
            || k.split(';').next().is_some_and(|base| {
                attr.split(';').next().is_some_and(|a| base.eq_ignore_ascii_case(a))
            })
    };
    let mut out: Vec<Vec<u8>> = entry
        .bin_attrs
        .iter()
        .filter(|(k, _)| matches(k))
        .flat_map(|(_, v)| v.iter().cloned())
        .collect();
    out.extend(
        entry
            .attrs
            .iter()
            .filter(|(k, _)| matches(k))
            .flat_map(|(_, v)| v.iter().map(|s| s.as_bytes().to_vec())),
    );
    out
}

fn has_config_string(entry: &SearchEntry, value: &str) -> bool {
    text_values(entry, "ipaConfigString")
        .iter()
        .any(|v| v.eq_ignore_ascii_case(value))
}

/// Host name from `cn=CA,cn=<host>,cn=masters,...`.
fn master_hostname(dn: &str) -> Option<String> {
    let second = dn.split(',').nth(1)?;
    let (attr, value) = second.split_once('=')?;
    attr.trim()
        .eq_ignore_ascii_case("cn")
        .then(|| value.trim().to_string())
}

/// Trust flags from an anchor's key policy attributes.
fn anchor_flags(entry: &SearchEntry) -> TrustFlags {
    let trust = first_text(entry, "ipaKeyTrust").unwrap_or_default();
    let oids = text_values(entry, "ipaKeyExtUsage");
    let usages: BTreeSet<ExtendedKeyUsage> = if oids.is_empty() {
        ExtendedKeyUsage::ALL.into_iter().collect()
    } else {
        oids.iter().filter_map(|o| ExtendedKeyUsage::from_oid(o)).collect()
    };
    TrustFlags {
        has_key: false,
        trusted: trust.eq_ignore_ascii_case("trusted"),
        ca: true,
        usages,
    }
}

impl DirectoryConnection for LdapSession {
    fn config(&mut self) -> Result<DomainConfig, DirectoryError> {
        let config_dn = self.dn("cn=ipaConfig,cn=etc");
        let subject_base = self
            .read(&config_dn, vec!["ipaCertificateSubjectBase"])?
            .and_then(|e| first_text(&e, "ipaCertificateSubjectBase"));

        let kerberos = self.dn("cn=kerberos");
        let realm = self
            .search(&kerberos, Scope::OneLevel, "(objectClass=krbRealmContainer)", vec!["cn"])?
            .first()
            .and_then(|e| first_text(e, "cn"));

        let ca_dn = self.dn("cn=ipa,cn=cas,cn=ca");
        let ca_subject = self
            .read(&ca_dn, vec!["ipaCaSubjectDN"])?
            .and_then(|e| first_text(&e, "ipaCaSubjectDN"));

        Ok(DomainConfig {
            realm,
            subject_base,
            ca_subject,
        })
    }

    fn ca_servers(&mut self) -> Result<Vec<CaServer>, DirectoryError> {
        let masters = self.dn("cn=masters,cn=ipa,cn=etc");
        let entries = self.search(
            &masters,
            Scope::Subtree,
            "(&(objectClass=ipaConfigObject)(cn=CA))",
            vec!["ipaConfigString"],
        )?;
        let mut servers: Vec<CaServer> = entries
            .iter()
            .filter(|e| has_config_string(e, "enabledService"))
            .filter_map(|e| {
                let hostname = master_hostname(&e.dn)?;
                let serial_backend = if has_config_string(e, "RSNv3") {
                    SerialBackend::Random
                } else {
                    SerialBackend::Legacy
                };
                Some(CaServer {
                    hostname,
                    serial_backend,
                })
            })
            .collect();
        servers.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        Ok(servers)
    }

    fn renewal_master(&mut self) -> Result<Option<String>, DirectoryError> {
        let masters = self.dn("cn=masters,cn=ipa,cn=etc");
        let entries = self.search(
            &masters,
            Scope::Subtree,
            "(&(cn=CA)(ipaConfigString=caRenewalMaster))",
            vec!["cn"],
        )?;
        Ok(entries.iter().find_map(|e| master_hostname(&e.dn)))
    }

    fn update_ca_cert(&mut self, der: &[u8]) -> Result<ModifyOutcome, DirectoryError> {
        let container = self.dn("cn=certificates,cn=ipa,cn=etc");
        let entries = self.search(
            &container,
            Scope::OneLevel,
            "(&(objectClass=ipaCertificate)(ipaConfigString=ipaCA))",
            vec!["cACertificate;binary"],
        )?;
        let Some(entry) = entries.into_iter().next() else {
            return Err(DirectoryError::NotFound(format!("domain CA entry under {container}")));
        };
        let current = binary_values(&entry, "cACertificate;binary");
        if current.iter().any(|v| v == der) {
            return Ok(ModifyOutcome::Unchanged);
        }
        if let Some(existing) = current.first() {
            check_same_ca(existing, der)?;
        }
        self.conn()?
            .modify(
                &entry.dn,
                vec![Mod::Add(
                    b"cACertificate;binary".to_vec(),
                    HashSet::from([der.to_vec()]),
                )],
            )?
            .success()?;
        tracing::info!(dn = %entry.dn, "Domain CA certificate updated in directory");
        Ok(ModifyOutcome::Modified)
    }

    fn trust_anchors(&mut self) -> Result<Vec<DirectoryAnchor>, DirectoryError> {
        let container = self.dn("cn=certificates,cn=ipa,cn=etc");
        let entries = self.search(
            &container,
            Scope::OneLevel,
            "(objectClass=ipaCertificate)",
            vec!["cn", "cACertificate;binary", "ipaKeyTrust", "ipaKeyExtUsage", "ipaConfigString"],
        )?;

        let mut anchors = Vec::new();
        for entry in &entries {
            let Some(nickname) = first_text(entry, "cn") else {
                return Err(DirectoryError::Invalid(format!("{} has no cn", entry.dn)));
            };
            let flags = anchor_flags(entry);
            let domain_ca = has_config_string(entry, "ipaCA");
            for cert_der in binary_values(entry, "cACertificate;binary") {
                anchors.push(DirectoryAnchor {
                    nickname: nickname.clone(),
                    cert_der,
                    flags: flags.clone(),
                    domain_ca,
                });
            }
        }
        Ok(anchors)
    }

    fn update_person_cert(
        &mut self,
        uid: &str,
        der: &[u8],
        description: &str,
    ) -> Result<ModifyOutcome, DirectoryError> {
        let dn = format!("uid={uid},ou=people,{CA_SUBTREE}");
        let Some(entry) = self.read(&dn, vec!["userCertificate;binary", "description"])? else {
            return Err(DirectoryError::NotFound(dn));
        };
        let cert_current = binary_values(&entry, "userCertificate;binary")
            .iter()
            .any(|v| v == der);
        let description_current = first_text(&entry, "description").as_deref() == Some(description);
        if cert_current && description_current {
            return Ok(ModifyOutcome::Unchanged);
        }
        self.replace(
            &dn,
            vec![
                Mod::Replace(b"userCertificate;binary".to_vec(), HashSet::from([der.to_vec()])),
                Mod::Replace(
                    b"description".to_vec(),
                    HashSet::from([description.as_bytes().to_vec()]),
                ),
            ],
        )?;
        Ok(ModifyOutcome::Modified)
    }

    fn update_authority_serial(&mut self, serial: &str) -> Result<ModifyOutcome, DirectoryError> {
        let base = format!("ou=authorities,ou=ca,{CA_SUBTREE}");
        let entries = self.search(
            &base,
            Scope::OneLevel,
            "(&(objectClass=authority)(!(authorityParentID=*)))",
            vec!["authoritySerial"],
        )?;
        let Some(entry) = entries.into_iter().next() else {
            return Err(DirectoryError::NotFound(format!("host authority under {base}")));
        };
        if first_text(&entry, "authoritySerial").as_deref() == Some(serial) {
            return Ok(ModifyOutcome::Unchanged);
        }
        self.replace(
            &entry.dn,
            vec![Mod::Replace(
                b"authoritySerial".to_vec(),
                HashSet::from([serial.as_bytes().to_vec()]),
            )],
        )?;
        Ok(ModifyOutcome::Modified)
    }

    fn disconnect(&mut self) -> Result<(), DirectoryError> {
        let Some(mut conn) = self.conn.take() else {
            return Err(DirectoryError::Closed);
        };
        conn.unbind()?;
        tracing::debug!("Directory disconnected");
        Ok(())
    }
}
