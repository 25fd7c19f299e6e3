use std::time::Duration;

use crate::status::{self, StatusReport};
use crate::ReadinessError;

/// Something that can be asked for the subsystem's current status.
///
/// Transport failures are not errors here: a refused connection or a
/// timed-out request is a normal state while the subsystem starts, and
/// yields an empty report.
pub trait StatusSource {
    /// Fetch one report, spending at most `budget` on the request.
    fn fetch(&self, budget: Duration) -> StatusReport;
}

impl<S: StatusSource + ?Sized> StatusSource for &S {
    fn fetch(&self, budget: Duration) -> StatusReport {
        (**self).fetch(budget)
    }
}

/// Polls the subsystem's HTTPS status endpoint.
pub struct HttpStatusSource {
    client: reqwest::blocking::Client,
    url: String,
    request_timeout: Duration,
}

impl HttpStatusSource {
    /// `extra_root_pem` is trusted in addition to the built-in roots; the
    /// subsystem normally serves a certificate issued by its own CA.
    pub fn new(
        url: &str,
        extra_root_pem: Option<&[u8]>,
        request_timeout: Duration,
    ) -> Result<Self, ReadinessError> {
        let mut builder = reqwest::blocking::Client::builder().timeout(request_timeout);
        if let Some(pem) = extra_root_pem {
            let root = reqwest::Certificate::from_pem(pem)
                .map_err(|e| ReadinessError::Client(format!("invalid CA certificate: {e}")))?;
            builder = builder.add_root_certificate(root);
        }
        let client = builder
            .build()
            .map_err(|e| ReadinessError::Client(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
            request_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl StatusSource for HttpStatusSource {
    fn fetch(&self, budget: Duration) -> StatusReport {
        let timeout = budget.min(self.request_timeout);
        if timeout.is_zero() {
            return StatusReport::default();
        }

        let response = match self.client.get(&self.url).timeout(timeout).send() {
            Ok(response) => response,
            Err(e) if e.is_connect() => {
                tracing::debug!(url = %self.url, "Status endpoint not accepting connections yet");
                return StatusReport::default();
            }
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "Status request failed");
                return StatusReport::default();
            }
        };

        let code = response.status();
        match response.text() {
            Ok(body) => {
                let report = status::decode(&body);
                tracing::trace!(http_status = %code, ?report, "Status response");
                report
            }
            Err(e) => {
                tracing::debug!(http_status = %code, error = %e, "Could not read status body");
                StatusReport::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_connection_is_an_empty_report() {
        // Port 9 (discard) on loopback is closed on test hosts.
        let source = HttpStatusSource::new(
            "https://127.0.0.1:9/ca/admin/ca/getStatus",
            None,
            Duration::from_millis(500),
        )
        .unwrap();
        assert_eq!(source.fetch(Duration::from_millis(500)), StatusReport::default());
    }

    #[test]
    fn zero_budget_skips_the_request() {
        let source = HttpStatusSource::new(
            "https://127.0.0.1:9/ca/admin/ca/getStatus",
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(source.fetch(Duration::ZERO), StatusReport::default());
    }
}
