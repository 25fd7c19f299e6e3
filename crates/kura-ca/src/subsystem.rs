//! Seams to the CA subsystem: service control, its configuration files,
//! and its installer.

use std::path::Path;

use crate::error::SubsystemError;
use crate::install::config::{InstallPlan, Secret};

/// Start/stop control of the subsystem instance.
pub trait ServiceControl {
    fn start(&self) -> Result<(), SubsystemError>;
    fn stop(&self) -> Result<(), SubsystemError>;
    fn is_running(&self) -> Result<bool, SubsystemError>;
}

/// The subsystem's on-disk configuration.
pub trait SubsystemConfig {
    /// A CA instance is configured on this host.
    fn is_installed(&self) -> Result<bool, SubsystemError>;

    /// Serial number data exists in a format that predates random serials.
    fn has_legacy_serial_data(&self) -> Result<bool, SubsystemError>;

    /// Key storage token holding `nickname`'s key; `None` for the internal
    /// token.
    fn token_for(&self, nickname: &str) -> Result<Option<String>, SubsystemError>;

    fn token_password(&self, token: &str) -> Result<Option<Secret>, SubsystemError>;

    /// Point the subsystem's reference for `nickname` at `der`.
    /// Returns `false` when the subsystem keeps no reference for it.
    fn update_cert(&self, nickname: &str, der: &[u8]) -> Result<bool, SubsystemError>;
}

/// The external installer, invoked as opaque procedures.
pub trait SubsystemInstaller {
    fn install_check(&self, plan: &InstallPlan) -> Result<(), SubsystemError>;
    fn install(&self, plan: &InstallPlan) -> Result<(), SubsystemError>;
    fn generate_csr(&self, plan: &InstallPlan, csr_path: &Path) -> Result<(), SubsystemError>;

    /// `chain` is ordered leaf (the CA certificate) to root.
    fn install_external_chain(
        &self,
        plan: &InstallPlan,
        chain: &[Vec<u8>],
    ) -> Result<(), SubsystemError>;
}
