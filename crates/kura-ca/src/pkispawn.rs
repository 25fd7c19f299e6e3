//! Installer backed by `pkispawn`.
//!
//! Each call renders a deployment file into a private temporary directory
//! and runs `pkispawn -s CA -f <file>`. The directory, and with it every
//! password the file carries, is removed when the call returns.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use kura_truststore::cert::der_to_pem;

use crate::error::SubsystemError;
use crate::install::config::{InstallPlan, SerialMode};
use crate::subsystem::SubsystemInstaller;

/// What a single `pkispawn` run is asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Install,
    /// External CA, first pass.
    Csr { csr_path: PathBuf },
    /// External CA, second pass.
    ExternalChain { cert_path: PathBuf, chain_path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct PkispawnInstaller {
    program: String,
    instance: String,
}

fn bool_value(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Deployment file contents for `plan`.
pub fn deployment(plan: &InstallPlan, instance: &str, step: &Step) -> String {
    let mut entries: Vec<(&str, String)> = vec![
        ("pki_instance_name", instance.to_string()),
        ("pki_hostname", plan.hostname.clone()),
        ("pki_ca_signing_subject_dn", plan.ca_subject.clone()),
        ("pki_subject_dn_base", plan.subject_base.clone()),
        (
            "pki_random_serial_numbers_enable",
            bool_value(plan.serial_mode == SerialMode::Random).to_string(),
        ),
    ];
    if let Some(realm) = &plan.realm {
        entries.push(("pki_security_domain_name", realm.clone()));
    }
    if let Some(password) = &plan.admin_password {
        entries.push(("pki_admin_password", password.expose().to_string()));
    }
    if let Some(token) = &plan.token {
        entries.push(("pki_hsm_enable", bool_value(true).to_string()));
        entries.push(("pki_hsm_libfile", token.library_path.display().to_string()));
        entries.push(("pki_token_name", token.name.clone()));
        entries.push(("pki_token_password", token.password.expose().to_string()));
    }
    if let Some(peer) = &plan.peer {
        entries.push(("pki_clone", bool_value(true).to_string()));
        entries.push(("pki_clone_uri", format!("https://{peer}:443")));
        entries.push(("pki_security_domain_hostname", peer.clone()));
        if let Some(password) = &plan.admin_password {
            entries.push(("pki_security_domain_password", password.expose().to_string()));
        }
    }
    match step {
        Step::Install => {}
        Step::Csr { csr_path } => {
            entries.push(("pki_external", bool_value(true).to_string()));
            entries.push(("pki_external_step_two", bool_value(false).to_string()));
            entries.push(("pki_ca_signing_csr_path", csr_path.display().to_string()));
        }
        Step::ExternalChain { cert_path, chain_path } => {
            entries.push(("pki_external", bool_value(true).to_string()));
            entries.push(("pki_external_step_two", bool_value(true).to_string()));
            entries.push(("pki_ca_signing_cert_path", cert_path.display().to_string()));
            entries.push(("pki_cert_chain_path", chain_path.display().to_string()));
        }
    }
    if let Some(template) = plan.external_ca.as_ref().and_then(|e| e.template.as_ref()) {
        entries.push(("pki_req_ext_add", bool_value(true).to_string()));
        entries.push(("pki_req_ext_oid", template.oid().to_string()));
        entries.push(("pki_req_ext_critical", bool_value(false).to_string()));
        entries.push(("pki_req_ext_data", hex(&template.to_der())));
    }

    let mut out = String::from("[CA]\n");
    for (key, value) in entries {
        // pkispawn interpolates `%`.
        out.push_str(&format!("{key}={}\n", value.replace('%', "%%")));
    }
    out
}

fn write_private(path: &Path, contents: &[u8]) -> Result<(), SubsystemError> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    Ok(())
}

impl PkispawnInstaller {
    pub fn new(program: &str, instance: &str) -> Self {
        Self {
            program: program.to_string(),
            instance: instance.to_string(),
        }
    }

    fn scratch(&self) -> Result<tempfile::TempDir, SubsystemError> {
        Ok(tempfile::Builder::new().prefix("kura-pkispawn-").tempdir()?)
    }

    fn run(&self, plan: &InstallPlan, step: &Step, scratch: &Path, precheck: bool) -> Result<(), SubsystemError> {
        let file = scratch.join("deployment.cfg");
        write_private(&file, deployment(plan, &self.instance, step).as_bytes())?;

        let mut command = Command::new(&self.program);
        command.args(["-s", "CA", "-f"]).arg(&file);
        if precheck {
            command.arg("--precheck");
        }
        tracing::info!(program = %self.program, step = ?step, precheck, "Running installer");
        let output = command.output()?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        tracing::error!(program = %self.program, stderr = %stderr, "Installer failed");
        Err(SubsystemError::CommandFailed {
            program: self.program.clone(),
            code: output.status.code().unwrap_or(-1),
            stderr,
        })
    }
}

impl SubsystemInstaller for PkispawnInstaller {
    fn install_check(&self, plan: &InstallPlan) -> Result<(), SubsystemError> {
        let scratch = self.scratch()?;
        self.run(plan, &Step::Install, scratch.path(), true)
    }

    fn install(&self, plan: &InstallPlan) -> Result<(), SubsystemError> {
        let scratch = self.scratch()?;
        self.run(plan, &Step::Install, scratch.path(), false)
    }

    fn generate_csr(&self, plan: &InstallPlan, csr_path: &Path) -> Result<(), SubsystemError> {
        let scratch = self.scratch()?;
        let step = Step::Csr {
            csr_path: csr_path.to_path_buf(),
        };
        self.run(plan, &step, scratch.path(), false)
    }

    fn install_external_chain(&self, plan: &InstallPlan, chain: &[Vec<u8>]) -> Result<(), SubsystemError> {
        let Some((leaf, rest)) = chain.split_first() else {
            return Err(SubsystemError::Config {
                path: "external certificate chain".to_string(),
                reason: "empty".to_string(),
            });
        };
        let scratch = self.scratch()?;
        let cert_path = scratch.path().join("ca.crt");
        let chain_path = scratch.path().join("chain.pem");
        write_private(&cert_path, der_to_pem(leaf).as_bytes())?;
        let bundle: String = rest.iter().map(|der| der_to_pem(der)).collect();
        write_private(&chain_path, bundle.as_bytes())?;

        let step = Step::ExternalChain { cert_path, chain_path };
        self.run(plan, &step, scratch.path(), false)
    }
}
