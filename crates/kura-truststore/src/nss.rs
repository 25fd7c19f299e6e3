//! NSS database access via `certutil`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use crate::cert::{der_to_pem, pem_bundle_to_der};
use crate::{CertStore, StoreError, TokenAccess, TrustFlags, TrustRecord};

const CERTUTIL: &str = "certutil";

/// A certificate database directory driven through `certutil`.
#[derive(Debug, Clone)]
pub struct CertutilStore {
    db_dir: PathBuf,
    password_file: Option<PathBuf>,
    program: String,
}

impl CertutilStore {
    pub fn new(db_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_dir: db_dir.into(),
            password_file: None,
            program: CERTUTIL.to_string(),
        }
    }

    /// Password file for the database's internal token.
    pub fn with_password_file(mut self, path: Option<PathBuf>) -> Self {
        self.password_file = path;
        self
    }

    /// Use a different `certutil` binary.
    pub fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    pub fn db_dir(&self) -> &Path {
        &self.db_dir
    }

    fn command(&self, token: &TokenAccess) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-d").arg(&self.db_dir);
        match (&token.name, &token.password_file) {
            (Some(name), Some(pwfile)) => {
                cmd.arg("-h").arg(name).arg("-f").arg(pwfile);
            }
            (Some(name), None) => {
                cmd.arg("-h").arg(name);
            }
            (None, _) => {
                if let Some(pwfile) = token.password_file.as_ref().or(self.password_file.as_ref()) {
                    cmd.arg("-f").arg(pwfile);
                }
            }
        }
        cmd
    }

    fn run(&self, mut cmd: Command, stdin: Option<&[u8]>) -> Result<Output, StoreError> {
        tracing::trace!(command = ?cmd, "Running certutil");
        let output = match stdin {
            None => cmd.output()?,
            Some(input) => {
                let mut child = cmd
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()?;
                if let Some(mut pipe) = child.stdin.take() {
                    pipe.write_all(input)?;
                }
                child.wait_with_output()?
            }
        };
        Ok(output)
    }

    fn run_checked(&self, cmd: Command, stdin: Option<&[u8]>) -> Result<Output, StoreError> {
        let output = self.run(cmd, stdin)?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(command_failed(&output))
        }
    }
}

fn command_failed(output: &Output) -> StoreError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    StoreError::CommandFailed {
        tool: CERTUTIL,
        code: output.status.code().unwrap_or(-1),
        stderr: stderr.trim().to_string(),
    }
}

fn is_not_found(output: &Output) -> bool {
    let stderr = String::from_utf8_lossy(&output.stderr).to_ascii_lowercase();
    stderr.contains("could not find") || stderr.contains("pr_file_not_found_error")
}

/// Nickname as `certutil` expects it for the token.
fn qualified(nickname: &str, token: &TokenAccess) -> String {
    match &token.name {
        Some(name) => format!("{name}:{nickname}"),
        None => nickname.to_string(),
    }
}

impl CertStore for CertutilStore {
    fn list(&self) -> Result<Vec<TrustRecord>, StoreError> {
        let mut cmd = self.command(&TokenAccess::internal());
        cmd.arg("-L");
        let output = self.run_checked(cmd, None)?;
        parse_listing(&String::from_utf8_lossy(&output.stdout))
    }

    fn get(&self, nickname: &str, token: &TokenAccess) -> Result<Option<Vec<u8>>, StoreError> {
        let mut cmd = self.command(token);
        cmd.arg("-L").arg("-n").arg(qualified(nickname, token)).arg("-a");
        let output = self.run(cmd, None)?;
        if !output.status.success() {
            if is_not_found(&output) {
                return Ok(None);
            }
            return Err(command_failed(&output));
        }
        Ok(pem_bundle_to_der(&String::from_utf8_lossy(&output.stdout))
            .into_iter()
            .next())
    }

    fn add(&self, der: &[u8], nickname: &str, flags: &TrustFlags) -> Result<(), StoreError> {
        let mut cmd = self.command(&TokenAccess::internal());
        cmd.arg("-A")
            .arg("-n")
            .arg(nickname)
            .arg("-t")
            .arg(flags.to_nss())
            .arg("-a");
        self.run_checked(cmd, Some(der_to_pem(der).as_bytes()))?;
        tracing::debug!(nickname, flags = %flags, "Certificate added");
        Ok(())
    }

    fn delete(&self, nickname: &str) -> Result<(), StoreError> {
        let mut cmd = self.command(&TokenAccess::internal());
        cmd.arg("-D").arg("-n").arg(nickname);
        let output = self.run(cmd, None)?;
        if output.status.success() {
            tracing::debug!(nickname, "Certificate deleted");
            Ok(())
        } else if is_not_found(&output) {
            Err(StoreError::NotFound(nickname.to_string()))
        } else {
            Err(command_failed(&output))
        }
    }

    fn has_nickname(&self, nickname: &str) -> Result<bool, StoreError> {
        let mut cmd = self.command(&TokenAccess::internal());
        cmd.arg("-L").arg("-n").arg(nickname);
        let output = self.run(cmd, None)?;
        if output.status.success() {
            Ok(true)
        } else if is_not_found(&output) {
            Ok(false)
        } else {
            Err(command_failed(&output))
        }
    }

    fn set_trust(
        &self,
        nickname: &str,
        flags: &TrustFlags,
        token: &TokenAccess,
    ) -> Result<(), StoreError> {
        let mut cmd = self.command(token);
        cmd.arg("-M")
            .arg("-n")
            .arg(qualified(nickname, token))
            .arg("-t")
            .arg(flags.to_nss());
        self.run_checked(cmd, None)?;
        tracing::debug!(nickname, flags = %flags, "Trust flags updated");
        Ok(())
    }

    fn find_root_chain(&self, nickname: &str) -> Result<Vec<String>, StoreError> {
        let mut cmd = self.command(&TokenAccess::internal());
        cmd.arg("-O").arg("-n").arg(nickname);
        let output = self.run_checked(cmd, None)?;
        Ok(parse_chain(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse `certutil -L` output. The trust string is the last
/// whitespace-separated token of each row; the nickname is the rest.
fn parse_listing(stdout: &str) -> Result<Vec<TrustRecord>, StoreError> {
    let mut records = Vec::new();
    for line in stdout.lines() {
        let line = line.trim_end();
        if line.trim().is_empty()
            || line.starts_with("Certificate Nickname")
            || line.trim_start().starts_with("SSL,S/MIME")
        {
            continue;
        }
        let Some((nickname, flags)) = line.rsplit_once(char::is_whitespace) else {
            continue;
        };
        let nickname = nickname.trim();
        if nickname.is_empty() {
            continue;
        }
        records.push(TrustRecord {
            nickname: nickname.to_string(),
            serial: None,
            flags: TrustFlags::from_nss(flags)?,
        });
    }
    Ok(records)
}

/// Parse `certutil -O` output: one `"nickname" [subject]` line per chain
/// member, root first.
fn parse_chain(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let rest = line.trim_start().strip_prefix('"')?;
            let end = rest.find("\" [")?;
            Some(rest[..end].to_string())
        })
        .collect()
}
