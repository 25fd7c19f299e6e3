#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use kura_ca::error::SubsystemError;
use kura_ca::install::config::{InstallPlan, Secret};
use kura_ca::install::Operator;
use kura_ca::subsystem::{ServiceControl, SubsystemConfig, SubsystemInstaller};
use kura_readiness::{ReadinessError, ReadinessGate};
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};

pub const HOSTNAME: &str = "ca1.example.com";

fn command_failed(program: &str) -> SubsystemError {
    SubsystemError::CommandFailed {
        program: program.to_string(),
        code: 1,
        stderr: "simulated failure".to_string(),
    }
}

#[derive(Default)]
pub struct FakeService {
    pub running: Cell<bool>,
    pub starts: Cell<usize>,
    pub stops: Cell<usize>,
    pub fail_stop: bool,
    pub fail_start: bool,
}

impl FakeService {
    pub fn running() -> Self {
        let service = Self::default();
        service.running.set(true);
        service
    }
}

impl ServiceControl for FakeService {
    fn start(&self) -> Result<(), SubsystemError> {
        self.starts.set(self.starts.get() + 1);
        if self.fail_start {
            return Err(command_failed("systemctl start"));
        }
        self.running.set(true);
        Ok(())
    }

    fn stop(&self) -> Result<(), SubsystemError> {
        self.stops.set(self.stops.get() + 1);
        if self.fail_stop {
            return Err(command_failed("systemctl stop"));
        }
        self.running.set(false);
        Ok(())
    }

    fn is_running(&self) -> Result<bool, SubsystemError> {
        Ok(self.running.get())
    }
}

#[derive(Default)]
pub struct FakeSubsystem {
    pub installed: bool,
    pub legacy_serial: bool,
    /// nickname → token
    pub tokens: HashMap<String, String>,
    /// token → password
    pub passwords: HashMap<String, String>,
    pub updated: RefCell<Vec<String>>,
    pub fail_update: bool,
}

impl SubsystemConfig for FakeSubsystem {
    fn is_installed(&self) -> Result<bool, SubsystemError> {
        Ok(self.installed)
    }

    fn has_legacy_serial_data(&self) -> Result<bool, SubsystemError> {
        Ok(self.legacy_serial)
    }

    fn token_for(&self, nickname: &str) -> Result<Option<String>, SubsystemError> {
        Ok(self.tokens.get(nickname).cloned())
    }

    fn token_password(&self, token: &str) -> Result<Option<Secret>, SubsystemError> {
        Ok(self.passwords.get(token).map(|p| Secret::new(p.as_str())))
    }

    fn update_cert(&self, nickname: &str, _der: &[u8]) -> Result<bool, SubsystemError> {
        if self.fail_update {
            return Err(command_failed("CS.cfg"));
        }
        self.updated.borrow_mut().push(nickname.to_string());
        Ok(nickname != "webCert")
    }
}

#[derive(Default)]
pub struct RecordingInstaller {
    pub calls: RefCell<Vec<&'static str>>,
    pub plans: RefCell<Vec<InstallPlan>>,
    pub chains: RefCell<Vec<Vec<Vec<u8>>>>,
    pub fail_install: bool,
}

impl RecordingInstaller {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.borrow().clone()
    }

    pub fn last_plan(&self) -> InstallPlan {
        self.plans.borrow().last().cloned().expect("installer was called")
    }

    fn record(&self, call: &'static str, plan: &InstallPlan) {
        self.calls.borrow_mut().push(call);
        self.plans.borrow_mut().push(plan.clone());
    }
}

impl SubsystemInstaller for RecordingInstaller {
    fn install_check(&self, plan: &InstallPlan) -> Result<(), SubsystemError> {
        self.record("install_check", plan);
        Ok(())
    }

    fn install(&self, plan: &InstallPlan) -> Result<(), SubsystemError> {
        self.record("install", plan);
        if self.fail_install {
            return Err(command_failed("pkispawn"));
        }
        Ok(())
    }

    fn generate_csr(&self, plan: &InstallPlan, _csr_path: &Path) -> Result<(), SubsystemError> {
        self.record("generate_csr", plan);
        Ok(())
    }

    fn install_external_chain(&self, plan: &InstallPlan, chain: &[Vec<u8>]) -> Result<(), SubsystemError> {
        self.record("install_external_chain", plan);
        self.chains.borrow_mut().push(chain.to_vec());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeGate {
    pub calls: Cell<usize>,
    pub never_ready: bool,
}

impl ReadinessGate for FakeGate {
    fn wait_until_running(&self, timeout: Duration) -> Result<(), ReadinessError> {
        self.calls.set(self.calls.get() + 1);
        if self.never_ready {
            return Err(ReadinessError::Timeout { waited: timeout });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct ScriptedOperator {
    pub accept: bool,
    pub password: Option<String>,
    pub confirms: Cell<usize>,
    pub prompts: RefCell<Vec<String>>,
}

impl ScriptedOperator {
    pub fn accepting() -> Self {
        Self {
            accept: true,
            ..Default::default()
        }
    }

    pub fn declining() -> Self {
        Self::default()
    }
}

impl Operator for ScriptedOperator {
    fn confirm(&self, _summary: &str) -> bool {
        self.confirms.set(self.confirms.get() + 1);
        self.accept
    }

    fn password(&self, prompt: &str) -> Option<Secret> {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.password.as_deref().map(Secret::new)
    }
}

/// A generated certificate and its key.
pub struct TestCert {
    pub cert: rcgen::Certificate,
    pub key: KeyPair,
}

impl TestCert {
    pub fn der(&self) -> Vec<u8> {
        self.cert.der().to_vec()
    }
}

fn ca_params(cn: &str) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).expect("params");
    params.distinguished_name.push(DnType::CommonName, cn);
    params.distinguished_name.push(DnType::OrganizationName, "EXAMPLE.COM");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
}

pub fn root(cn: &str) -> TestCert {
    let key = KeyPair::generate().expect("key");
    let cert = ca_params(cn).self_signed(&key).expect("self-signed");
    TestCert { cert, key }
}

pub fn issue(cn: &str, issuer: &TestCert) -> TestCert {
    let key = KeyPair::generate().expect("key");
    let cert = ca_params(cn)
        .signed_by(&key, &issuer.cert, &issuer.key)
        .expect("signed");
    TestCert { cert, key }
}
