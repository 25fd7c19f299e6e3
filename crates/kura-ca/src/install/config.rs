//! Install inputs and the resolved plan handed to the installer.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::install::external::MsCsTemplate;

/// A password that never shows up in `Debug` output or logs.
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Role asked for on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RoleRequest {
    /// Decide from the directory.
    #[default]
    Auto,
    First,
    Join,
}

/// Topology role this host takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    First,
    Join,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => f.write_str("first CA"),
            Self::Join => f.write_str("joining CA"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialMode {
    #[default]
    Sequential,
    Random,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExternalCaType {
    #[default]
    Generic,
    MsCs,
}

#[derive(Debug, Clone, Default)]
pub struct TokenOptions {
    pub name: Option<String>,
    pub library_path: Option<PathBuf>,
    pub password: Option<Secret>,
    pub password_file: Option<PathBuf>,
}

impl TokenOptions {
    pub fn is_requested(&self) -> bool {
        self.name.is_some()
            || self.library_path.is_some()
            || self.password.is_some()
            || self.password_file.is_some()
    }
}

/// Everything the operator supplied for one install run.
#[derive(Debug, Clone, Default)]
pub struct InstallConfig {
    pub role: RoleRequest,
    pub realm: Option<String>,
    pub subject_base: Option<String>,
    pub ca_subject: Option<String>,
    pub serial_mode: SerialMode,
    /// First pass of the external-CA flow: write a CSR and stop.
    pub external_ca: bool,
    pub external_ca_type: Option<ExternalCaType>,
    pub external_ca_profile: Option<String>,
    /// Second pass: the signed CA certificate and its chain.
    pub external_cert_files: Vec<PathBuf>,
    pub token: TokenOptions,
    pub admin_password: Option<Secret>,
    pub peer: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Never prompt; missing input is fatal.
    pub unattended: bool,
}

#[derive(Debug, Clone)]
pub struct HardwareToken {
    pub name: String,
    pub library_path: PathBuf,
    pub password: Secret,
}

#[derive(Debug, Clone)]
pub struct ExternalCaRequest {
    pub ca_type: ExternalCaType,
    /// Certificate template extension for `ms-cs`.
    pub template: Option<MsCsTemplate>,
}

/// Validated, fully resolved parameters for the subsystem installer.
#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub role: Role,
    pub hostname: String,
    pub realm: Option<String>,
    pub subject_base: String,
    pub ca_subject: String,
    pub serial_mode: SerialMode,
    pub peer: Option<String>,
    pub token: Option<HardwareToken>,
    pub admin_password: Option<Secret>,
    pub external_ca: Option<ExternalCaRequest>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let config = InstallConfig {
            admin_password: Some(Secret::new("hunter2")),
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("Secret(***)"));
    }

    #[test]
    fn token_options_detect_partial_input() {
        assert!(!TokenOptions::default().is_requested());
        let partial = TokenOptions {
            password_file: Some(PathBuf::from("/root/token.pw")),
            ..Default::default()
        };
        assert!(partial.is_requested());
    }
}
