//! `CS.cfg` and `password.conf` access.
//!
//! Both are flat `key=value` files. Relevant `CS.cfg` directives:
//!
//! ```text
//! cs.state=1                                   instance configured
//! dbs.cert.id.generator=random                 random serial numbers
//! ca.signing.tokenname=internal                key token per certificate
//! ca.signing.cert=MIIE...                      base64 DER per certificate
//! ```
//!
//! `password.conf` carries `internal=...` and `hardware-<token>=...`.

use std::path::{Path, PathBuf};

use base64::Engine;

use crate::error::SubsystemError;
use crate::install::config::Secret;
use crate::subsystem::SubsystemConfig;

/// Configuration tag of the certificates the subsystem references.
pub fn cert_tag(nickname: &str) -> Option<&'static str> {
    match nickname {
        "caSigningCert cert-pki-ca" => Some("signing"),
        "ocspSigningCert cert-pki-ca" => Some("ocsp_signing"),
        "subsystemCert cert-pki-ca" => Some("subsystem"),
        "auditSigningCert cert-pki-ca" => Some("audit_signing"),
        "Server-Cert cert-pki-ca" => Some("sslserver"),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct CsConfig {
    cs_cfg: PathBuf,
    password_conf: PathBuf,
}

fn read_lines(path: &Path) -> Result<Option<Vec<String>>, SubsystemError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw.lines().map(str::to_string).collect())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SubsystemError::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

fn lookup(lines: &[String], key: &str) -> Option<String> {
    lines.iter().find_map(|line| {
        let line = line.trim_start();
        if line.starts_with('#') {
            return None;
        }
        let (k, v) = line.split_once('=')?;
        (k.trim() == key).then(|| v.trim().to_string())
    })
}

/// Replace `key`'s first occurrence or append it.
fn set(lines: &mut Vec<String>, key: &str, value: &str) {
    let entry = format!("{key}={value}");
    let position = lines.iter().position(|line| {
        !line.trim_start().starts_with('#')
            && line
                .split_once('=')
                .is_some_and(|(k, _)| k.trim() == key)
    });
    match position {
        Some(i) => lines[i] = entry,
        None => lines.push(entry),
    }
}

impl CsConfig {
    pub fn new(cs_cfg: impl Into<PathBuf>, password_conf: impl Into<PathBuf>) -> Self {
        Self {
            cs_cfg: cs_cfg.into(),
            password_conf: password_conf.into(),
        }
    }

    pub fn directive(&self, key: &str) -> Result<Option<String>, SubsystemError> {
        Ok(read_lines(&self.cs_cfg)?.and_then(|lines| lookup(&lines, key)))
    }
}

impl SubsystemConfig for CsConfig {
    fn is_installed(&self) -> Result<bool, SubsystemError> {
        Ok(self.directive("cs.state")?.as_deref() == Some("1"))
    }

    fn has_legacy_serial_data(&self) -> Result<bool, SubsystemError> {
        let Some(lines) = read_lines(&self.cs_cfg)? else {
            return Ok(false);
        };
        let generator = lookup(&lines, "dbs.cert.id.generator");
        Ok(generator.as_deref() != Some("random"))
    }

    fn token_for(&self, nickname: &str) -> Result<Option<String>, SubsystemError> {
        let Some(tag) = cert_tag(nickname) else {
            return Ok(None);
        };
        let token = self.directive(&format!("ca.{tag}.tokenname"))?;
        Ok(token.filter(|t| !kura_truststore::is_internal_token(t)))
    }

    fn token_password(&self, token: &str) -> Result<Option<Secret>, SubsystemError> {
        let Some(lines) = read_lines(&self.password_conf)? else {
            return Ok(None);
        };
        Ok(lookup(&lines, &format!("hardware-{token}")).map(Secret::new))
    }

    fn update_cert(&self, nickname: &str, der: &[u8]) -> Result<bool, SubsystemError> {
        let Some(tag) = cert_tag(nickname) else {
            return Ok(false);
        };
        let Some(mut lines) = read_lines(&self.cs_cfg)? else {
            return Err(SubsystemError::Config {
                path: self.cs_cfg.display().to_string(),
                reason: "file not found".to_string(),
            });
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(der);
        set(&mut lines, &format!("ca.{tag}.cert"), &encoded);

        let mut raw = lines.join("\n");
        raw.push('\n');
        // In place, so the file keeps its owner and mode.
        std::fs::write(&self.cs_cfg, raw)?;
        tracing::info!(nickname, tag, "Subsystem certificate reference updated");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str, cs_cfg: &str, password_conf: &str) -> (PathBuf, CsConfig) {
        let dir = kura_common::test::scratch_dir(name);
        std::fs::write(dir.join("CS.cfg"), cs_cfg).unwrap();
        std::fs::write(dir.join("password.conf"), password_conf).unwrap();
        let config = CsConfig::new(dir.join("CS.cfg"), dir.join("password.conf"));
        (dir, config)
    }

    #[test]
    fn nickname_tags() {
        assert_eq!(cert_tag("caSigningCert cert-pki-ca"), Some("signing"));
        assert_eq!(cert_tag("Server-Cert cert-pki-ca"), Some("sslserver"));
        assert_eq!(cert_tag("auditSigningCert cert-pki-ca"), Some("audit_signing"));
        assert_eq!(cert_tag("webCert"), None);
    }

    #[test]
    fn sub_ca_nicknames_have_no_tag() {
        assert_eq!(cert_tag("caSigningCert cert-pki-ca 5d6c3a1e-0b7f-4c55-9b0e-2f1a8c9d4e21"), None);
        assert_eq!(cert_tag("subsystemCert"), None);

        let (dir, config) = fixture("cscfg-sub-ca", "ca.signing.cert=AAAA\n", "");
        let updated = config
            .update_cert("caSigningCert cert-pki-ca 5d6c3a1e-0b7f-4c55-9b0e-2f1a8c9d4e21", b"sub-ca")
            .unwrap();
        assert!(!updated);
        let raw = std::fs::read_to_string(dir.join("CS.cfg")).unwrap();
        assert_eq!(raw, "ca.signing.cert=AAAA\n");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_cs_cfg_means_not_installed_and_no_legacy_data() {
        let config = CsConfig::new("/nonexistent/CS.cfg", "/nonexistent/password.conf");
        assert!(!config.is_installed().unwrap());
        assert!(!config.has_legacy_serial_data().unwrap());
        assert_eq!(config.token_password("lunasa").unwrap().map(|s| s.expose().to_string()), None);
    }

    #[test]
    fn installed_state_and_serial_generator() {
        let (dir, config) = fixture("cscfg-state", "cs.state=1\ndbs.cert.id.generator=legacy\n", "");
        assert!(config.is_installed().unwrap());
        assert!(config.has_legacy_serial_data().unwrap());

        std::fs::write(dir.join("CS.cfg"), "cs.state=0\ndbs.cert.id.generator=random\n").unwrap();
        assert!(!config.is_installed().unwrap());
        assert!(!config.has_legacy_serial_data().unwrap());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn tokens_resolve_through_both_files() {
        let (dir, config) = fixture(
            "cscfg-token",
            "ca.signing.tokenname=lunasa\nca.ocsp_signing.tokenname=Internal Key Storage Token\n",
            "internal=secret1\nhardware-lunasa=hsm-secret\n",
        );
        assert_eq!(config.token_for("caSigningCert cert-pki-ca").unwrap().as_deref(), Some("lunasa"));
        assert_eq!(config.token_for("ocspSigningCert cert-pki-ca").unwrap(), None);
        assert_eq!(config.token_for("webCert").unwrap(), None);
        assert_eq!(
            config.token_password("lunasa").unwrap().map(|s| s.expose().to_string()).as_deref(),
            Some("hsm-secret")
        );
        assert!(config.token_password("other").unwrap().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn update_cert_replaces_the_directive_and_keeps_the_rest() {
        let (dir, config) = fixture(
            "cscfg-update",
            "# comment\ncs.state=1\nca.signing.cert=OLD\nca.signing.nickname=caSigningCert cert-pki-ca\n",
            "",
        );
        assert!(config.update_cert("caSigningCert cert-pki-ca", &[1, 2, 3]).unwrap());
        assert!(!config.update_cert("webCert", &[1, 2, 3]).unwrap());

        let raw = std::fs::read_to_string(dir.join("CS.cfg")).unwrap();
        assert_eq!(
            raw,
            "# comment\ncs.state=1\nca.signing.cert=AQID\nca.signing.nickname=caSigningCert cert-pki-ca\n"
        );

        config.update_cert("Server-Cert cert-pki-ca", &[4]).unwrap();
        assert_eq!(config.directive("ca.sslserver.cert").unwrap().as_deref(), Some("BA=="));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
