//! `config.toml` settings model.
//!
//! Every section and key is optional. A missing file yields
//! `Settings::default()`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use kura_common::paths;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub host: HostSection,
    pub subsystem: SubsystemSection,
    pub readiness: ReadinessSection,
    pub directory: DirectorySection,
    pub renewal: RenewalSection,
    pub install: InstallSection,
    pub logging: LoggingSection,
}

/// This host's identity within the domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HostSection {
    /// Fully-qualified host name. Resolved from the OS when unset.
    pub hostname: Option<String>,
    pub realm: Option<String>,
    /// Host-wide NSS database refreshed from the directory's trust anchors.
    pub trust_db: PathBuf,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            hostname: None,
            realm: None,
            trust_db: PathBuf::from("/etc/pki/nssdb"),
        }
    }
}

/// The CA subsystem instance kura installs and renews.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SubsystemSection {
    pub instance: String,
    /// systemd unit controlling the instance.
    pub unit: String,
    pub cs_cfg: PathBuf,
    pub password_conf: PathBuf,
    /// The instance's own NSS database (signing keys and trust anchors).
    pub nss_db: PathBuf,
    /// Password file for the internal token of `nss_db`.
    pub nss_password_file: Option<PathBuf>,
    pub status_url: String,
    /// Extra root trusted when talking to `status_url`.
    pub ca_cert: Option<PathBuf>,
}

impl Default for SubsystemSection {
    fn default() -> Self {
        Self {
            instance: "pki-tomcat".to_string(),
            unit: "pki-tomcatd@pki-tomcat.service".to_string(),
            cs_cfg: PathBuf::from("/var/lib/pki/pki-tomcat/ca/conf/CS.cfg"),
            password_conf: PathBuf::from("/var/lib/pki/pki-tomcat/conf/password.conf"),
            nss_db: PathBuf::from("/var/lib/pki/pki-tomcat/alias"),
            nss_password_file: None,
            status_url: "https://localhost:8443/ca/admin/ca/getStatus".to_string(),
            ca_cert: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReadinessSection {
    pub timeout_secs: u64,
    pub interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ReadinessSection {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            interval_secs: 1,
            request_timeout_secs: 10,
        }
    }
}

/// How kura authenticates to the directory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BindMethod {
    /// SASL EXTERNAL, normally over `ldapi://` as root.
    #[default]
    External,
    /// Simple bind with `bind_dn` and the password in `password_file`.
    Simple,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DirectorySection {
    pub uri: String,
    /// Domain suffix. Derived from the realm when unset.
    pub base_dn: Option<String>,
    pub bind: BindMethod,
    pub bind_dn: Option<String>,
    pub password_file: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for DirectorySection {
    fn default() -> Self {
        Self {
            uri: "ldapi://%2frun%2fslapd.socket".to_string(),
            base_dn: None,
            bind: BindMethod::External,
            bind_dn: None,
            password_file: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RenewalSection {
    /// Lock file shared by `renew-prepare` and `renew`.
    pub lock_path: Option<PathBuf>,
    pub history_log: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InstallSection {
    pub pkispawn: String,
    /// Where the first external-CA pass writes the signing request.
    pub csr_path: PathBuf,
    /// Printed after a failed install.
    pub cleanup_hint: String,
    pub preferred_peer: Option<String>,
}

impl Default for InstallSection {
    fn default() -> Self {
        Self {
            pkispawn: "pkispawn".to_string(),
            csr_path: PathBuf::from("/root/kura-ca.csr"),
            cleanup_hint: "pkidestroy -s CA -i pki-tomcat".to_string(),
            preferred_peer: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingSection {
    pub file: Option<PathBuf>,
    pub level: Option<String>,
}

impl Settings {
    /// Load settings from `path`, or from the default location when `None`.
    ///
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(paths::kura_config_path);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Self::parse(&raw).map_err(|reason| ConfigError::Invalid { path, reason })
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| e.to_string())
    }

    /// Lock file path, defaulting into the state directory.
    pub fn lock_path(&self) -> PathBuf {
        self.renewal
            .lock_path
            .clone()
            .unwrap_or_else(|| paths::kura_state_dir().join("renewal.lock"))
    }

    pub fn history_log_path(&self) -> PathBuf {
        self.renewal
            .history_log
            .clone()
            .unwrap_or_else(|| paths::kura_log_dir().join("renewal-history.log"))
    }

    /// Directory suffix: explicit `base_dn`, else `dc=` components of the realm.
    pub fn base_dn(&self) -> Option<String> {
        if let Some(dn) = &self.directory.base_dn {
            return Some(dn.clone());
        }
        let realm = self.host.realm.as_deref()?;
        Some(realm_to_base_dn(realm))
    }
}

/// `EXAMPLE.COM` → `dc=example,dc=com`.
pub fn realm_to_base_dn(realm: &str) -> String {
    realm
        .split('.')
        .filter(|part| !part.is_empty())
        .map(|part| format!("dc={}", part.to_ascii_lowercase()))
        .collect::<Vec<_>>()
        .join(",")
}
