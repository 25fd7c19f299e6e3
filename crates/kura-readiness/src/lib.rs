//! kura readiness: waits for the CA subsystem to report `running`.
//!
//! Every caller that has just started or restarted the subsystem goes
//! through [`ReadinessGate::wait_until_running`] before relying on it.
//! The poll loop asks a [`StatusSource`] once per interval until one of:
//!
//! - the status is `running` → success, no further polls;
//! - the response carries an error → immediate failure, no retry;
//! - the timeout elapses → failure.
//!
//! Refused connections and unparseable bodies are retried.

pub mod clock;
pub mod source;
pub mod status;

use std::time::Duration;

pub use clock::{Clock, ManualClock, SystemClock};
pub use source::{HttpStatusSource, StatusSource};
pub use status::{StatusReport, SubsystemStatus};

/// Default delay between two status requests.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default time to wait for the subsystem to come up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error("timeout: subsystem not running after {waited:?}")]
    Timeout { waited: Duration },

    #[error("subsystem reported an error: {0}")]
    Failed(String),

    #[error("status client error: {0}")]
    Client(String),
}

/// Blocks until the subsystem is running or the wait fails.
pub trait ReadinessGate {
    fn wait_until_running(&self, timeout: Duration) -> Result<(), ReadinessError>;
}

/// Fixed-interval readiness poller.
pub struct Poller<S, C = SystemClock> {
    source: S,
    clock: C,
    interval: Duration,
}

impl<S: StatusSource> Poller<S, SystemClock> {
    pub fn new(source: S) -> Self {
        Self::with_clock(source, SystemClock)
    }
}

impl<S: StatusSource, C: Clock> Poller<S, C> {
    pub fn with_clock(source: S, clock: C) -> Self {
        Self {
            source,
            clock,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One status request, decoded.
    pub fn status_once(&self) -> StatusReport {
        self.source.fetch(self.interval.max(Duration::from_secs(1)))
    }

    fn poll(&self, timeout: Duration) -> Result<u32, ReadinessError> {
        let start = self.clock.now();
        // A single slow request may not push failure past timeout + interval.
        let hard_stop = timeout.saturating_add(self.interval);
        let mut polls = 0u32;

        loop {
            let elapsed = self.clock.now().saturating_duration_since(start);
            let report = self.source.fetch(hard_stop.saturating_sub(elapsed));
            polls += 1;

            match report.state() {
                SubsystemStatus::Running => return Ok(polls),
                SubsystemStatus::Failed(error) => {
                    tracing::warn!(error = %error, polls, "Subsystem reported an error");
                    return Err(ReadinessError::Failed(error));
                }
                other => tracing::debug!(status = %other, polls, "Subsystem not running yet"),
            }

            let elapsed = self.clock.now().saturating_duration_since(start);
            if elapsed >= timeout {
                tracing::warn!(waited = ?elapsed, polls, "Timed out waiting for subsystem");
                return Err(ReadinessError::Timeout { waited: elapsed });
            }
            self.clock.sleep(self.interval);
        }
    }
}

impl<S: StatusSource, C: Clock> ReadinessGate for Poller<S, C> {
    fn wait_until_running(&self, timeout: Duration) -> Result<(), ReadinessError> {
        let polls = self.poll(timeout)?;
        tracing::info!(polls, "Subsystem is running");
        Ok(())
    }
}
