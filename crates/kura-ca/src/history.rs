//! Append-only renewal history.
//!
//! One line per event: `2026-10-14T03:12:09Z | renewal | nickname=... | class=ca_signing`.
//! Renewals run unattended, so this file and the system log are the only
//! record of what happened.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

#[derive(Debug, Clone)]
pub struct History {
    path: PathBuf,
}

impl History {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &str, fields: &[(&str, &str)]) -> Result<(), std::io::Error> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        let mut line = format!("{timestamp} | {event}");
        for (key, value) in fields {
            // Keep one event per line whatever the values contain.
            let value = value.replace(['\n', '\r'], " ");
            line.push_str(&format!(" | {key}={value}"));
        }
        line.push('\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        tracing::debug!(event, "History entry written");
        Ok(())
    }

    /// Append, logging instead of failing.
    pub fn record(&self, event: &str, fields: &[(&str, &str)]) {
        if let Err(e) = self.append(event, fields) {
            tracing::warn!(path = %self.path.display(), error = %e, "Could not write history entry");
        }
    }

    pub fn read(&self) -> Result<String, std::io::Error> {
        if self.path.exists() {
            std::fs::read_to_string(&self.path)
        } else {
            Ok(String::new())
        }
    }
}
