//! systemd control of the subsystem unit.

use std::process::Command;

use crate::error::SubsystemError;
use crate::subsystem::ServiceControl;

const SYSTEMCTL: &str = "systemctl";

#[derive(Debug, Clone)]
pub struct SystemdService {
    unit: String,
    program: String,
}

impl SystemdService {
    pub fn new(unit: &str) -> Self {
        Self {
            unit: unit.to_string(),
            program: SYSTEMCTL.to_string(),
        }
    }

    /// Use a different `systemctl` binary.
    pub fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    fn systemctl(&self, verb: &str) -> Result<(), SubsystemError> {
        let output = Command::new(&self.program)
            .args([verb, self.unit.as_str()])
            .output()?;
        if output.status.success() {
            tracing::info!(unit = %self.unit, verb, "systemctl succeeded");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(unit = %self.unit, verb, stderr = %stderr.trim(), "systemctl failed");
            Err(SubsystemError::CommandFailed {
                program: format!("{} {verb}", self.program),
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            })
        }
    }
}

impl ServiceControl for SystemdService {
    fn start(&self) -> Result<(), SubsystemError> {
        self.systemctl("start")
    }

    fn stop(&self) -> Result<(), SubsystemError> {
        self.systemctl("stop")
    }

    fn is_running(&self) -> Result<bool, SubsystemError> {
        let status = Command::new(&self.program)
            .args(["is-active", "--quiet", self.unit.as_str()])
            .status()?;
        Ok(status.success())
    }
}
